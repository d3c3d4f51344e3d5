//! Engine configuration.
//!
//! Loaded from TOML (every key optional) and passed explicitly into the
//! [`Library`](crate::Library); nothing in the engine reads settings from
//! the environment on its own.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::CoreError;
use crate::sources::{ARXIV, SEMANTIC_SCHOLAR};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Sources queried by `fetch`, in fusion priority order.
    pub fetch_sources: Vec<String>,
    /// Sources queried by `search`.
    pub search_sources: Vec<String>,
    pub s2_api_key: Option<String>,
    pub request_timeout_secs: u64,
    /// Retries after a 429 response before a source is given up.
    pub max_retries: u32,
    /// Tags always offered by `Library::all_tags`.
    pub default_tags: Vec<String>,
    pub title_format: String,
    pub desc_format: String,
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fetch_sources: vec![ARXIV.to_string(), SEMANTIC_SCHOLAR.to_string()],
            search_sources: vec![ARXIV.to_string()],
            s2_api_key: None,
            request_timeout_secs: 10,
            max_retries: 3,
            default_tags: Vec::new(),
            title_format: "{title}".to_string(),
            desc_format: "{authorShort}, {year}".to_string(),
            user_agent: concat!("paperdrive/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self, CoreError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_prefer_arxiv_then_semantic_scholar() {
        let config = Config::default();
        assert_eq!(config.fetch_sources, vec!["arxiv", "semanticscholar"]);
        assert_eq!(config.search_sources, vec!["arxiv"]);
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            fetch_sources = ["semanticscholar", "arxiv"]
            default_tags = ["to-read"]
            "#,
        )
        .unwrap();
        assert_eq!(config.fetch_sources, vec!["semanticscholar", "arxiv"]);
        assert_eq!(config.default_tags, vec!["to-read"]);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.desc_format, "{authorShort}, {year}");
    }

    #[test]
    fn invalid_toml_is_a_config_error() {
        assert!(matches!(
            Config::from_toml_str("fetch_sources = 3"),
            Err(CoreError::Config(_))
        ));
    }
}
