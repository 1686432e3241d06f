use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

use crate::engine::models::FixedCommunity;
use crate::engine::validation::MAX_COMMUNITY_NAME_LENGTH;

/// Top-level client configuration, loaded from connectify.toml.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub provider: ProviderSection,
    pub backend: BackendSection,
    pub communities: CommunitiesSection,
}

/// Hosted chat provider connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderSection {
    pub api_key: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for ProviderSection {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://chat.stream-io-api.com".into(),
            timeout_secs: 30,
        }
    }
}

/// Application backend (identity, friends, friend requests).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendSection {
    pub base_url: String,
    /// Value of the backend's `jwt` session cookie.
    pub session_token: String,
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5001/api".into(),
            session_token: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CommunitiesSection {
    /// Well-known communities every user can join.
    pub fixed: Vec<FixedCommunity>,
    /// Upper bound on channels fetched when listing a user's communities.
    pub owned_query_limit: usize,
    pub max_name_length: usize,
}

impl Default for CommunitiesSection {
    fn default() -> Self {
        Self {
            fixed: vec![
                FixedCommunity::new("english", "English"),
                FixedCommunity::new("hindi", "Hindi"),
                FixedCommunity::new("spanish", "Spanish"),
                FixedCommunity::new("french", "French"),
                FixedCommunity::new("japanese", "Japanese"),
            ],
            owned_query_limit: 30,
            max_name_length: MAX_COMMUNITY_NAME_LENGTH,
        }
    }
}

impl AppConfig {
    /// Load config from a TOML file. Falls back to defaults if the file doesn't exist.
    /// Environment variables override TOML values.
    pub fn load(path: &str) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {path}"))?;
            Self::from_toml(&contents)
                .with_context(|| format!("failed to parse config file {path}"))?
        } else {
            info!("No config file found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("STREAM_API_KEY") {
            self.provider.api_key = v;
        }
        if let Ok(v) = std::env::var("STREAM_BASE_URL") {
            self.provider.base_url = v;
        }
        if let Ok(v) = std::env::var("PROVIDER_TIMEOUT_SECS")
            && let Ok(secs) = v.parse()
        {
            self.provider.timeout_secs = secs;
        }
        if let Ok(v) = std::env::var("BACKEND_URL") {
            self.backend.base_url = v;
        }
        if let Ok(v) = std::env::var("CONNECTIFY_SESSION") {
            self.backend.session_token = v;
        }
        if let Ok(v) = std::env::var("OWNED_QUERY_LIMIT")
            && let Ok(limit) = v.parse()
        {
            self.communities.owned_query_limit = limit;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Tests that modify environment variables must be serialized to avoid races.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const KEYS: [&str; 6] = [
        "STREAM_API_KEY",
        "STREAM_BASE_URL",
        "PROVIDER_TIMEOUT_SECS",
        "BACKEND_URL",
        "CONNECTIFY_SESSION",
        "OWNED_QUERY_LIMIT",
    ];

    fn with_env<F: FnOnce()>(vars: &[(&str, &str)], f: F) {
        let _lock = ENV_LOCK.lock().unwrap();
        let originals: Vec<_> = KEYS.iter().map(|k| (*k, std::env::var(k).ok())).collect();

        for key in &KEYS {
            // SAFETY: env access is serialized by ENV_LOCK
            unsafe { std::env::remove_var(key) };
        }
        for (k, v) in vars {
            // SAFETY: env access is serialized by ENV_LOCK
            unsafe { std::env::set_var(k, v) };
        }

        f();

        for (k, v) in originals {
            match v {
                // SAFETY: env access is serialized by ENV_LOCK
                Some(val) => unsafe { std::env::set_var(k, val) },
                None => unsafe { std::env::remove_var(k) },
            }
        }
    }

    #[test]
    fn test_defaults_when_file_missing() {
        with_env(&[], || {
            let config = AppConfig::load("/nonexistent/connectify.toml").unwrap();
            assert_eq!(config.provider.base_url, "https://chat.stream-io-api.com");
            assert_eq!(config.provider.timeout_secs, 30);
            assert_eq!(config.backend.base_url, "http://localhost:5001/api");
            assert_eq!(config.communities.owned_query_limit, 30);
            let ids: Vec<_> = config.communities.fixed.iter().map(|c| c.id.as_str()).collect();
            assert_eq!(ids, vec!["english", "hindi", "spanish", "french", "japanese"]);
        });
    }

    #[test]
    fn test_env_overrides() {
        with_env(
            &[
                ("STREAM_API_KEY", "key123"),
                ("BACKEND_URL", "https://api.example.com/api"),
                ("OWNED_QUERY_LIMIT", "10"),
                ("PROVIDER_TIMEOUT_SECS", "not-a-number"),
            ],
            || {
                let config = AppConfig::load("/nonexistent/connectify.toml").unwrap();
                assert_eq!(config.provider.api_key, "key123");
                assert_eq!(config.backend.base_url, "https://api.example.com/api");
                assert_eq!(config.communities.owned_query_limit, 10);
                // Unparseable numbers keep the default.
                assert_eq!(config.provider.timeout_secs, 30);
            },
        );
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [provider]
            api_key = "abc"

            [[communities.fixed]]
            id = "german"
            name = "German"
            "#,
        )
        .unwrap();

        assert_eq!(config.provider.api_key, "abc");
        assert_eq!(config.provider.timeout_secs, 30);
        assert_eq!(config.communities.fixed, vec![FixedCommunity::new("german", "German")]);
        assert_eq!(config.communities.max_name_length, MAX_COMMUNITY_NAME_LENGTH);
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        assert!(AppConfig::from_toml("[provider\napi_key = 1").is_err());
    }
}
