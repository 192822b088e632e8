use async_trait::async_trait;
use dashmap::DashMap;

/// Write-through key/value preference persistence.
///
/// The engine only reads and writes through this interface; the storage
/// format (disk, keychain, browser storage) is the implementor's concern.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
    async fn set(&self, key: &str, value: &str);
    async fn remove(&self, key: &str);
}

/// Well-known preference keys used by the engine.
pub mod keys {
    pub const BASE_URL: &str = "session.base_url";
    pub const WEBSOCKET_URL: &str = "session.websocket_url";
    pub const AUTH_TOKEN: &str = "session.auth_token";
    pub const USER_ID: &str = "session.user_id";
    pub const DISPLAY_NAME: &str = "session.display_name";

    /// Per-server "last visited channel" key.
    pub fn last_visited_channel(server_id: &str) -> String {
        format!("ui.last_channel.{server_id}")
    }
}

/// In-memory preference store. Used by tests and as a fallback when no
/// persistent store is wired in.
#[derive(Default)]
pub struct MemoryPrefs {
    values: DashMap<String, String>,
}

impl MemoryPrefs {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PreferenceStore for MemoryPrefs {
    async fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).map(|v| v.clone())
    }

    async fn set(&self, key: &str, value: &str) {
        self.values.insert(key.to_string(), value.to_string());
    }

    async fn remove(&self, key: &str) {
        self.values.remove(key);
    }
}
