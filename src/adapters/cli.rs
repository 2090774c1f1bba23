//! CLI adapter - interactive and single-message command line interface.

use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use colored::Colorize;

use crate::agent::{Engine, ImageSource, InboundMessage, Reply};
use crate::error::Error;
use crate::ui;
use crate::Result;

/// CLI channel for agent sessions.
pub struct CliChannel {
    engine: Arc<Engine>,
    conversation_id: String,
    test_identity: Option<String>,
}

impl CliChannel {
    /// Create a new CLI channel.
    pub fn new(engine: Arc<Engine>, conversation_id: &str) -> Self {
        Self {
            engine,
            conversation_id: conversation_id.to_string(),
            test_identity: None,
        }
    }

    /// Keep history in the engine's session buffer instead of the store.
    pub fn test_mode(mut self, identity: &str) -> Self {
        self.test_identity = Some(identity.to_string());
        self
    }

    /// Run a single message and return the reply, if any.
    pub async fn run_once(&self, text: &str, images: Vec<ImageSource>) -> Result<Option<Reply>> {
        let mut inbound = InboundMessage::new(&self.conversation_id, text);
        for image in images {
            inbound = inbound.with_image(image);
        }
        if let Some(identity) = &self.test_identity {
            inbound = inbound.test_mode(identity);
        }
        self.engine.handle_inbound_message(inbound).await
    }

    /// Run interactive REPL loop.
    pub async fn run_interactive(&self) -> Result<()> {
        let stdin = io::stdin();
        let mut stdout = io::stdout();

        loop {
            print!("\n{} ", "You:".blue().bold());
            stdout.flush()?;

            let mut line = String::new();
            if stdin.lock().read_line(&mut line)? == 0 {
                break;
            }

            let input = line.trim();
            if input.is_empty() {
                continue;
            }

            if matches!(input.to_lowercase().as_str(), "exit" | "quit" | "q") {
                println!("Goodbye!");
                break;
            }

            match self.run_once(input, Vec::new()).await {
                Ok(reply) => print_reply(self.engine.agent().name.as_str(), reply.as_ref()),
                Err(e) => ui::print_error(&e.to_string()),
            }
        }

        Ok(())
    }
}

/// Print a reply, or explain why there is none.
pub fn print_reply(agent_name: &str, reply: Option<&Reply>) {
    match reply {
        Some(reply) => println!(
            "\n{} {}",
            format!("{agent_name}:").green().bold(),
            reply.reply_text
        ),
        None => ui::print_warning("No reply: the conversation was handed to a human."),
    }
}

/// Turn a `--image` argument into an image block: URLs are passed through,
/// anything else is read from disk and base64 encoded.
pub fn load_image(arg: &str) -> Result<ImageSource> {
    if arg.starts_with("http://") || arg.starts_with("https://") {
        return Ok(ImageSource::Url { url: arg.to_string() });
    }

    let path = Path::new(arg);
    let media_type = match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => {
            return Err(Error::Validation(format!(
                "Unsupported image type for {arg} (expected png, jpg, gif or webp)"
            )))
        }
    };

    let bytes = std::fs::read(path)?;
    Ok(ImageSource::Base64 {
        media_type: media_type.to_string(),
        data: STANDARD.encode(bytes),
    })
}
