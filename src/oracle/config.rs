// src/oracle/config.rs
use anyhow::{Context, Result};
use log::info;
use std::env;
use url::Url;

use crate::utils::env::parse_env_or;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";

#[derive(Clone)]
pub struct OracleConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: Url,
    pub timeout_seconds: u64,
    pub temperature: f32,
}

impl std::fmt::Debug for OracleConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OracleConfig")
            .field("api_key", &"[hidden]")
            .field("model", &self.model)
            .field("base_url", &self.base_url.as_str())
            .field("timeout_seconds", &self.timeout_seconds)
            .field("temperature", &self.temperature)
            .finish()
    }
}

impl OracleConfig {
    pub fn from_env() -> Result<Self> {
        let api_key = env::var("GOOGLE_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .context("GOOGLE_API_KEY must be set for the similarity oracle")?;
        let raw_url = env::var("ORACLE_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let base_url = Url::parse(raw_url.trim_end_matches('/'))
            .with_context(|| format!("Invalid ORACLE_BASE_URL '{}'", raw_url))?;

        Ok(Self {
            api_key,
            model: env::var("ORACLE_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            base_url,
            timeout_seconds: parse_env_or("ORACLE_TIMEOUT_SECONDS", 60u64),
            temperature: parse_env_or("ORACLE_TEMPERATURE", 0.1f32),
        })
    }

    /// Full `generateContent` endpoint for the configured model, without the key.
    pub fn endpoint(&self) -> String {
        format!(
            "{}/{}:generateContent",
            self.base_url.as_str().trim_end_matches('/'),
            self.model
        )
    }

    pub fn log_config(&self) {
        info!("🤖 Similarity oracle");
        info!("   Model: {}", self.model);
        info!("   Endpoint: {}", self.endpoint());
        info!("   Request timeout: {}s", self.timeout_seconds);
    }
}
