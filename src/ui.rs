use colored::*;
use terminal_size::{terminal_size, Height, Width};

pub fn print_header(agent: &str, provider: &str, model: &str) {
    let (width, _) = terminal_size().unwrap_or((Width(80), Height(24)));
    let width = (width.0 as usize).min(100);

    let line = "─".repeat(width);
    println!("{}", line.black().bold());

    let name = "toolrelay".yellow().bold();
    let version = format!("v{}", env!("CARGO_PKG_VERSION")).black().bold();
    println!("  {} {}", name, version);

    let info = format!("  {}  •  {}  •  {}", agent, provider, model).cyan();
    println!("{}", info);

    println!("{}", line.black().bold());
}

pub fn print_field(label: &str, value: &str) {
    println!("  {:<14} {}", format!("{label}:").bold(), value);
}

pub fn print_step(msg: &str) {
    println!("  {} {}", "•".green(), msg);
}

pub fn print_success(msg: &str) {
    println!("  {} {}", "✓".green().bold(), msg.green());
}

pub fn print_warning(msg: &str) {
    println!("  {} {}", "!".yellow().bold(), msg.yellow());
}

pub fn print_error(msg: &str) {
    eprintln!("  {} {}", "✗".red().bold(), msg.red());
}
