use std::path::Path;

use serde::Deserialize;
use tracing::info;

/// Top-level client configuration, loaded from riptide.toml.
#[derive(Deserialize, Default)]
#[serde(default)]
pub struct ClientConfig {
    pub instance: InstanceSection,
    pub sync: SyncSection,
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct InstanceSection {
    /// Base URL of the REST API.
    pub base_url: Option<String>,
    /// WebSocket endpoint for the live event stream.
    pub websocket_url: Option<String>,
    /// Session token. Usually restored from the preference store instead.
    pub auth_token: Option<String>,
}

#[derive(Deserialize, Clone)]
#[serde(default)]
pub struct SyncSection {
    /// Capacity of the live event fan-out channel.
    pub event_capacity: usize,
    /// How many recent events the bus replays to late subscribers.
    pub replay_window: usize,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            event_capacity: 256,
            replay_window: 64,
        }
    }
}

impl ClientConfig {
    /// Load config from a TOML file. Falls back to defaults if the file doesn't exist.
    /// Environment variables override TOML values.
    pub fn load(path: &str) -> Self {
        let mut config = if Path::new(path).exists() {
            let contents = std::fs::read_to_string(path)
                .unwrap_or_else(|e| panic!("failed to read config file {}: {}", path, e));
            toml::from_str(&contents)
                .unwrap_or_else(|e| panic!("failed to parse config file {}: {}", path, e))
        } else {
            info!("No config file found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("RIPTIDE_BASE_URL") {
            self.instance.base_url = Some(v);
        }
        if let Ok(v) = std::env::var("RIPTIDE_WEBSOCKET_URL") {
            self.instance.websocket_url = Some(v);
        }
        if let Ok(v) = std::env::var("RIPTIDE_TOKEN") {
            self.instance.auth_token = Some(v);
        }
        if let Ok(v) = std::env::var("RIPTIDE_EVENT_CAPACITY")
            && let Ok(n) = v.parse()
        {
            self.sync.event_capacity = n;
        }
        if let Ok(v) = std::env::var("RIPTIDE_REPLAY_WINDOW")
            && let Ok(n) = v.parse()
        {
            self.sync.replay_window = n;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert!(config.instance.base_url.is_none());
        assert_eq!(config.sync.event_capacity, 256);
        assert_eq!(config.sync.replay_window, 64);
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: ClientConfig = toml::from_str(
            r#"
            [instance]
            base_url = "https://api.example.chat"

            [sync]
            replay_window = 16
            "#,
        )
        .unwrap();
        assert_eq!(
            config.instance.base_url.as_deref(),
            Some("https://api.example.chat")
        );
        assert_eq!(config.sync.replay_window, 16);
        // Unspecified values keep their defaults.
        assert_eq!(config.sync.event_capacity, 256);
    }
}
