use std::sync::Arc;

use tracing::{debug, info};

use crate::api::ApiClient;
use crate::error::SyncError;
use crate::prefs::{PreferenceStore, keys};

/// The credential triple plus identity fields for the active session.
/// Created on login or restored from the preference store; cleared on logout.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub base_url: Option<String>,
    pub websocket_url: Option<String>,
    pub auth_token: Option<String>,
    pub user_id: Option<String>,
    pub display_name: Option<String>,
}

/// Owns the current session and the lazily constructed API client.
///
/// Setters are idempotent: setting an unchanged value is a no-op returning
/// `false`. A changed value drops the cached client; tasks still consuming
/// the old transport belong to the previous engine generation and must be
/// cancelled by the caller (the supervisor does not track subscriber tasks).
pub struct SessionSupervisor {
    session: Session,
    prefs: Arc<dyn PreferenceStore>,
    /// Built on first `service()` call after a change, cached until the next.
    client: Option<Arc<ApiClient>>,
}

impl SessionSupervisor {
    pub fn new(prefs: Arc<dyn PreferenceStore>) -> Self {
        Self {
            session: Session::default(),
            prefs,
            client: None,
        }
    }

    /// Restore a supervisor from persisted session fields.
    pub async fn restore(prefs: Arc<dyn PreferenceStore>) -> Self {
        let session = Session {
            base_url: prefs.get(keys::BASE_URL).await,
            websocket_url: prefs.get(keys::WEBSOCKET_URL).await,
            auth_token: prefs.get(keys::AUTH_TOKEN).await,
            user_id: prefs.get(keys::USER_ID).await,
            display_name: prefs.get(keys::DISPLAY_NAME).await,
        };
        if session.base_url.is_some() {
            info!("session restored from preferences");
        }
        Self {
            session,
            prefs,
            client: None,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn has_base_url(&self) -> bool {
        self.session.base_url.is_some()
    }

    /// Set the REST base URL. Returns whether the value actually changed.
    pub async fn set_base_url(&mut self, url: &str) -> bool {
        if self.session.base_url.as_deref() == Some(url) {
            return false;
        }
        self.session.base_url = Some(url.to_string());
        self.invalidate();
        self.prefs.set(keys::BASE_URL, url).await;
        info!(%url, "base URL changed");
        true
    }

    /// Set the WebSocket URL. Returns whether the value actually changed.
    pub async fn set_websocket_url(&mut self, url: &str) -> bool {
        if self.session.websocket_url.as_deref() == Some(url) {
            return false;
        }
        self.session.websocket_url = Some(url.to_string());
        self.invalidate();
        self.prefs.set(keys::WEBSOCKET_URL, url).await;
        info!(%url, "websocket URL changed");
        true
    }

    /// Set the session token. Returns whether the value actually changed.
    pub async fn set_token(&mut self, token: &str) -> bool {
        if self.session.auth_token.as_deref() == Some(token) {
            return false;
        }
        self.session.auth_token = Some(token.to_string());
        self.invalidate();
        self.prefs.set(keys::AUTH_TOKEN, token).await;
        info!("session token changed");
        true
    }

    /// Record the identity fields delivered by a successful login.
    pub async fn set_identity(&mut self, user_id: &str, display_name: &str) {
        self.session.user_id = Some(user_id.to_string());
        self.session.display_name = Some(display_name.to_string());
        self.prefs.set(keys::USER_ID, user_id).await;
        self.prefs.set(keys::DISPLAY_NAME, display_name).await;
    }

    /// Remember the last visited channel for a server. Survives logout;
    /// it is a UI preference, not a session credential.
    pub async fn remember_last_channel(&self, server_id: &str, channel_id: &str) {
        self.prefs
            .set(&keys::last_visited_channel(server_id), channel_id)
            .await;
    }

    /// The last visited channel recorded for a server, if any.
    pub async fn last_channel(&self, server_id: &str) -> Option<String> {
        self.prefs.get(&keys::last_visited_channel(server_id)).await
    }

    /// Clear the session (logout) and forget persisted fields.
    pub async fn clear(&mut self) {
        self.session = Session::default();
        self.invalidate();
        for key in [
            keys::BASE_URL,
            keys::WEBSOCKET_URL,
            keys::AUTH_TOKEN,
            keys::USER_ID,
            keys::DISPLAY_NAME,
        ] {
            self.prefs.remove(key).await;
        }
        info!("session cleared");
    }

    /// The API client for the current session, built lazily on first access
    /// after a change and cached until the next change.
    ///
    /// Calling this before a base URL is set is a programming-contract
    /// violation, reported as [`SyncError::Configuration`] — it is not a
    /// runtime/network error and is never retried.
    pub fn service(&mut self) -> Result<Arc<ApiClient>, SyncError> {
        if let Some(client) = &self.client {
            return Ok(Arc::clone(client));
        }
        let base_url = self.session.base_url.as_deref().ok_or_else(|| {
            SyncError::Configuration("service requested before a base URL was set".into())
        })?;
        debug!(%base_url, "constructing API client");
        let client = Arc::new(ApiClient::new(
            base_url,
            self.session.auth_token.as_deref(),
        ));
        self.client = Some(Arc::clone(&client));
        Ok(client)
    }

    fn invalidate(&mut self) {
        self.client = None;
    }
}
