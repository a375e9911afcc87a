//! TOML configuration for the `docchat` CLI.
//!
//! Every section is optional. A missing file is not an error for commands
//! that can run on defaults; see [`Config::minimal`].
//!
//! ```toml
//! [server]
//! base_url = "http://localhost:8000"
//! api_key_header = "X-OpenAI-Key"
//! workspace = "default"
//!
//! [chat]
//! auto_enrich = false
//! reveal_step = 8
//!
//! [documents]
//! page_size = 50
//! ```

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable that overrides `server.api_key`.
pub const API_KEY_ENV: &str = "DOCCHAT_API_KEY";

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub documents: DocumentsConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_api_key_header")]
    pub api_key_header: String,
    #[serde(default)]
    pub workspace: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            api_key_header: default_api_key_header(),
            workspace: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ServerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}
fn default_api_key_header() -> String {
    "X-OpenAI-Key".to_string()
}
fn default_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChatConfig {
    #[serde(default)]
    pub auto_enrich: bool,
    #[serde(default = "default_reveal_step")]
    pub reveal_step: usize,
    #[serde(default = "default_frame_ms")]
    pub frame_ms: u64,
    #[serde(default = "default_greeting")]
    pub greeting: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            auto_enrich: false,
            reveal_step: default_reveal_step(),
            frame_ms: default_frame_ms(),
            greeting: default_greeting(),
        }
    }
}

fn default_reveal_step() -> usize {
    8
}
fn default_frame_ms() -> u64 {
    16
}
fn default_greeting() -> String {
    "Hi! Upload documents and ask me anything.".to_string()
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DocumentsConfig {
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_chunk_page_size")]
    pub chunk_page_size: u32,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            chunk_page_size: default_chunk_page_size(),
        }
    }
}

fn default_page_size() -> u32 {
    50
}
fn default_chunk_page_size() -> u32 {
    20
}

impl Config {
    /// Defaults for every section, used when no config file exists.
    pub fn minimal() -> Self {
        Self::default()
    }

    /// Apply environment overrides.
    pub fn with_env(mut self) -> Self {
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                self.server.api_key = Some(key);
            }
        }
        self
    }

    /// Copy suitable for printing: the API key is masked.
    pub fn redacted(&self) -> Self {
        let mut out = self.clone();
        out.server.api_key = out.server.api_key.as_deref().map(mask_key);
        out
    }
}

fn mask_key(key: &str) -> String {
    let visible: String = key.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
    if key.chars().count() <= 8 {
        "****".to_string()
    } else {
        format!("****{}", visible)
    }
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Load `path` when it exists, otherwise fall back to [`Config::minimal`].
///
/// A file that exists but fails to parse or validate is still an error.
pub fn load_or_minimal(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        Ok(Config::minimal())
    }
}

fn validate(config: &Config) -> Result<()> {
    let base = config.server.base_url.trim();
    if !(base.starts_with("http://") || base.starts_with("https://")) {
        bail!(
            "server.base_url must start with http:// or https:// (got '{}')",
            config.server.base_url
        );
    }
    if config.server.api_key_header.trim().is_empty() {
        bail!("server.api_key_header must not be empty");
    }
    if config.server.timeout_secs == 0 {
        bail!("server.timeout_secs must be > 0");
    }

    if config.chat.reveal_step == 0 {
        bail!("chat.reveal_step must be > 0");
    }

    if config.documents.page_size == 0 {
        bail!("documents.page_size must be > 0");
    }
    if config.documents.chunk_page_size == 0 {
        bail!("documents.chunk_page_size must be > 0");
    }

    Ok(())
}
