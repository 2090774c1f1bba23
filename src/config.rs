//! Configuration management

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::agent::llm::anthropic::ANTHROPIC_API_BASE;
use crate::agent::llm::assistants::ASSISTANTS_API_BASE;
use crate::agent::{DEFAULT_MAX_ITERATIONS, DEFAULT_SESSION_TTL_SECS};
use crate::error::Error;
use crate::Result;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// The agent this process answers as
    #[serde(default)]
    pub agent: AgentConfig,

    /// Model provider, bound once when the engine is built
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Maximum model submissions per inbound message
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Timeout applied to every outbound HTTP call
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// JSON file holding functions, authenticators and conversations
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    /// Idle time after which test-mode sessions are forgotten
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
}

/// Agent identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_agent_id")]
    pub id: String,

    #[serde(default = "default_organization_id")]
    pub organization_id: String,

    #[serde(default = "default_agent_name")]
    pub name: String,

    #[serde(default)]
    pub system_prompt: String,
}

/// Model provider settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProviderConfig {
    /// Stateless messages API; full history every turn
    Anthropic {
        #[serde(default)]
        api_key: String,
        #[serde(default = "default_anthropic_model")]
        model: String,
        #[serde(default = "default_anthropic_base")]
        api_base: String,
        #[serde(default = "default_max_tokens")]
        max_tokens: u32,
    },
    /// Hosted assistant threads; state lives server-side
    Assistants {
        #[serde(default)]
        api_key: String,
        #[serde(default)]
        assistant_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        #[serde(default = "default_assistants_base")]
        api_base: String,
        #[serde(default = "default_poll_interval_ms")]
        poll_interval_ms: u64,
        #[serde(default = "default_max_polls")]
        max_polls: u32,
    },
}

impl ProviderConfig {
    pub fn name(&self) -> &'static str {
        match self {
            ProviderConfig::Anthropic { .. } => "anthropic",
            ProviderConfig::Assistants { .. } => "assistants",
        }
    }

    /// Model name for display
    pub fn model(&self) -> &str {
        match self {
            ProviderConfig::Anthropic { model, .. } => model,
            ProviderConfig::Assistants { model, .. } => {
                model.as_deref().unwrap_or("(assistant default)")
            }
        }
    }

    /// Reject settings the provider cannot work with.
    pub fn validate(&self) -> Result<()> {
        match self {
            ProviderConfig::Anthropic {
                api_key,
                model,
                max_tokens,
                ..
            } => {
                if api_key.is_empty() {
                    return Err(Error::Config("Anthropic api_key is not set".to_string()));
                }
                if model.is_empty() {
                    return Err(Error::Config("Anthropic model is not set".to_string()));
                }
                if *max_tokens == 0 {
                    return Err(Error::Config("max_tokens must be greater than zero".to_string()));
                }
            }
            ProviderConfig::Assistants {
                api_key,
                assistant_id,
                max_polls,
                ..
            } => {
                if api_key.is_empty() {
                    return Err(Error::Config("Assistants api_key is not set".to_string()));
                }
                if assistant_id.is_empty() {
                    return Err(Error::Config("assistant_id is not set".to_string()));
                }
                if *max_polls == 0 {
                    return Err(Error::Config("max_polls must be greater than zero".to_string()));
                }
            }
        }
        Ok(())
    }
}

impl Config {
    /// HTTP client shared by every outbound call, bounded by the request timeout.
    pub fn http_client(&self) -> Result<reqwest::Client> {
        Ok(reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(self.request_timeout_secs.max(1)))
            .build()?)
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig::Anthropic {
            api_key: String::new(),
            model: default_anthropic_model(),
            api_base: default_anthropic_base(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            id: default_agent_id(),
            organization_id: default_organization_id(),
            name: default_agent_name(),
            system_prompt: String::new(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            agent: AgentConfig::default(),
            provider: ProviderConfig::default(),
            max_iterations: default_max_iterations(),
            request_timeout_secs: default_request_timeout_secs(),
            store_path: default_store_path(),
            session_ttl_secs: default_session_ttl_secs(),
        }
    }
}

fn default_agent_id() -> String {
    "default".to_string()
}

fn default_organization_id() -> String {
    "local".to_string()
}

fn default_agent_name() -> String {
    "Assistant".to_string()
}

fn default_anthropic_model() -> String {
    "claude-3-5-sonnet-latest".to_string()
}

fn default_anthropic_base() -> String {
    ANTHROPIC_API_BASE.to_string()
}

fn default_assistants_base() -> String {
    ASSISTANTS_API_BASE.to_string()
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_max_polls() -> u32 {
    120
}

fn default_max_iterations() -> usize {
    DEFAULT_MAX_ITERATIONS
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_session_ttl_secs() -> u64 {
    DEFAULT_SESSION_TTL_SECS
}

fn default_store_path() -> PathBuf {
    config_dir().join("store.json")
}

/// Get the config directory path
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".toolrelay")
}

/// Get the config file path
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Load configuration from the default location
pub fn load() -> Result<Config> {
    load_from(&config_path())
}

/// Load configuration from a file
pub fn load_from(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Err(Error::Config(format!(
            "Config not found at {:?}. Run 'toolrelay init' first.",
            path
        )));
    }

    let content = std::fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&content)?;
    Ok(config)
}

/// Save configuration to the default location
pub fn save(config: &Config) -> Result<()> {
    save_to(config, &config_path())
}

/// Save configuration to a file
pub fn save_to(config: &Config, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Write a default config (unless one exists) and an empty store file.
/// Returns the config that is now on disk.
pub fn init(path: &Path) -> Result<Config> {
    let config = if path.exists() {
        load_from(path)?
    } else {
        let config = Config::default();
        save_to(&config, path)?;
        config
    };

    if !config.store_path.exists() {
        crate::store::FileStore::open(&config.store_path)?.persist()?;
    }
    Ok(config)
}
