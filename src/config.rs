use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful assistant. Answer clearly and concisely, in the language the user writes in.";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub backend: BackendConfig,
    pub completion: CompletionConfig,
    pub chat: ChatConfig,
    pub speech: SpeechConfig,
    pub ingestion: IngestionConfig,
    pub account: AccountConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HistoryStoreKind {
    #[default]
    Remote,
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Hosted project base URL, e.g. `https://xyz.supabase.co`.
    pub project_url: String,
    pub anon_key: String,
    pub history_store: HistoryStoreKind,
    /// SQLite file used when `history_store = "local"`.
    pub local_db_path: Option<PathBuf>,
    pub reset_redirect_url: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            project_url: "http://localhost:54321".to_string(),
            anon_key: String::new(),
            history_store: HistoryStoreKind::Remote,
            local_db_path: None,
            reset_redirect_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderConfig {
    pub name: String,
    pub api_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: "local".to_string(),
            api_url: "http://localhost:11434/v1".to_string(),
            model: "llama3.2".to_string(),
            api_key: None,
            temperature: 0.7,
            max_tokens: 2048,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    pub active: Option<String>,
    pub providers: Vec<ProviderConfig>,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            active: None,
            providers: vec![ProviderConfig::default()],
        }
    }
}

impl CompletionConfig {
    /// The provider named by `active`, else the first configured one.
    pub fn active_provider(&self) -> Option<&ProviderConfig> {
        self.active
            .as_deref()
            .and_then(|name| self.providers.iter().find(|p| p.name == name))
            .or_else(|| self.providers.first())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub system_prompt: String,
    pub typewriter_interval_ms: u64,
    pub context_cap: usize,
    pub file_context_max_chars: usize,
    pub history_timeout_secs: u64,
    pub user_avatar: String,
    pub bot_avatar: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            typewriter_interval_ms: 30,
            context_cap: 10,
            file_context_max_chars: 3000,
            history_timeout_secs: 10,
            user_avatar: "https://i.ibb.co/Gfkc7dM0/favicon-1.jpg".to_string(),
            bot_avatar: "https://i.ibb.co/sdFXFR26/favicon-2.jpg".to_string(),
        }
    }
}

impl ChatConfig {
    pub fn typewriter_interval(&self) -> Duration {
        Duration::from_millis(self.typewriter_interval_ms.max(1))
    }

    pub fn history_timeout(&self) -> Duration {
        Duration::from_secs(self.history_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub enabled: bool,
    pub command: String,
    pub args: Vec<String>,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            command: "espeak".to_string(),
            args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    /// Remote endpoint that turns PDFs and images into text.
    pub extract_url: Option<String>,
    pub extract_api_key: Option<String>,
    pub max_image_edge: u32,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            extract_url: None,
            extract_api_key: None,
            max_image_edge: 2048,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountConfig {
    pub min_password_len: usize,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            min_password_len: 8,
        }
    }
}

impl AppConfig {
    /// Loads `$PARLEY_CONFIG` or the per-user config file, falling back to
    /// defaults when the file is missing or unreadable.
    pub fn load() -> Self {
        let path = match config_path() {
            Some(path) => path,
            None => {
                tracing::warn!("No config directory available; using defaults");
                return Self::default();
            }
        };

        if !path.exists() {
            tracing::info!("No config at {}; using defaults", path.display());
            return Self::default();
        }

        match Self::load_from(&path) {
            Ok(config) => config,
            Err(error) => {
                tracing::error!("Failed to load config {}: {:#}", path.display(), error);
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn local_db_path(&self) -> Option<PathBuf> {
        self.backend
            .local_db_path
            .clone()
            .or_else(|| data_dir().map(|dir| dir.join("history.sqlite3")))
    }
}

fn config_path() -> Option<PathBuf> {
    if let Ok(explicit) = std::env::var("PARLEY_CONFIG") {
        if !explicit.trim().is_empty() {
            return Some(PathBuf::from(explicit));
        }
    }
    dirs::config_dir().map(|dir| dir.join("parley").join("config.toml"))
}

pub fn data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("parley"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_the_chat_contract() {
        let config = AppConfig::default();
        assert_eq!(config.chat.context_cap, 10);
        assert_eq!(config.account.min_password_len, 8);
        assert_eq!(config.backend.history_store, HistoryStoreKind::Remote);
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[backend]
project_url = "https://demo.supabase.co"
history_store = "local"

[completion]
active = "deepseek"

[[completion.providers]]
name = "openai"
api_url = "https://api.openai.com/v1"
model = "gpt-4o-mini"

[[completion.providers]]
name = "deepseek"
api_url = "https://api.deepseek.com/v1"
model = "deepseek-chat"
"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.backend.project_url, "https://demo.supabase.co");
        assert_eq!(config.backend.history_store, HistoryStoreKind::Local);
        assert_eq!(config.chat.typewriter_interval_ms, 30);
        let active = config.completion.active_provider().unwrap();
        assert_eq!(active.model, "deepseek-chat");
        assert_eq!(active.max_tokens, 2048);
    }

    #[test]
    fn unknown_active_provider_falls_back_to_first() {
        let config = CompletionConfig {
            active: Some("missing".to_string()),
            providers: vec![ProviderConfig::default()],
        };
        assert_eq!(config.active_provider().unwrap().name, "local");
    }
}
