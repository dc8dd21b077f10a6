//! Configuration loaded from the environment at startup.
//!
//! A `.env` file in the working directory is honoured for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

#[derive(Clone, Debug)]
pub struct Config {
    /// Base URL of the backend the widget posts to.
    pub api_base: String,
    /// SQLite file backing the widget's local storage and the server tables.
    pub db_path: PathBuf,
    pub bind_address: SocketAddr,
    /// Origin echoed in CORS responses. `*` allows any origin.
    pub allowed_origin: String,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub chat_model: String,
    /// Where accepted leads are posted for the sample-link build, if anywhere.
    pub lead_webhook: Option<String>,
    /// Width the terminal front end reports as its viewport.
    pub viewport_width: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let api_base = std::env::var("LEADCHAT_API_BASE")
            .unwrap_or_else(|_| "http://localhost:8000".to_string())
            .trim_end_matches('/')
            .to_string();

        let db_path = match std::env::var("LEADCHAT_DB") {
            Ok(path) => PathBuf::from(path),
            Err(_) => {
                let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
                PathBuf::from(home).join(".leadchat").join("leadchat.db")
            }
        };

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8000".to_string());
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let allowed_origin = std::env::var("ALLOWED_ORIGIN").unwrap_or_else(|_| "*".to_string());

        let openai_api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty());
        let openai_base_url = std::env::var("OPENAI_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string())
            .trim_end_matches('/')
            .to_string();
        let chat_model = std::env::var("CHAT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());

        let lead_webhook = std::env::var("LEADCHAT_LEAD_WEBHOOK")
            .ok()
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty());

        let width_str =
            std::env::var("LEADCHAT_VIEWPORT_WIDTH").unwrap_or_else(|_| "1024".to_string());
        let viewport_width = width_str.parse::<u32>().map_err(|_| {
            ConfigError::InvalidValue(
                "LEADCHAT_VIEWPORT_WIDTH".to_string(),
                format!("'{}' is not a pixel width", width_str),
            )
        })?;

        Ok(Self {
            api_base,
            db_path,
            bind_address,
            allowed_origin,
            openai_api_key,
            openai_base_url,
            chat_model,
            lead_webhook,
            viewport_width,
        })
    }
}
