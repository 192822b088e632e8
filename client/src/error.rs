use thiserror::Error;

/// Error taxonomy for the synchronization engine.
///
/// Every variant renders as exactly two segments joined by the first `:`
/// character — `"<title>:<body>"`. Body text may contain further colons, so
/// consumers must split on the first colon only (see [`SyncError::title_body`]).
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    /// A required session field (base URL, token) was absent when an
    /// operation needing it was attempted. Programming-contract violation,
    /// never retried.
    #[error("Configuration error:{0}")]
    Configuration(String),

    /// Network/connection failure. Retry policy belongs to the transport
    /// collaborator, not to this engine.
    #[error("Uh oh! Something went wrong:{0}")]
    Transport(String),

    /// Non-success response with a decodable structured error body.
    #[error("Uh oh! {status_message}:The server error was '{error_type}'")]
    Server {
        /// Canonical HTTP status message ("Forbidden", "Not Found", …).
        status_message: String,
        /// The server's declared error type from the response body.
        error_type: String,
    },

    /// Success status but an unexpectedly empty or undecodable body.
    /// Treated as a server contract violation rather than silently defaulting.
    #[error("Uh oh! Protocol violation:{0}")]
    ProtocolViolation(String),
}

impl SyncError {
    /// Split the rendered message into its `(title, body)` pair at the first
    /// colon. Body text may itself contain colons.
    pub fn title_body(&self) -> (String, String) {
        let rendered = self.to_string();
        match rendered.split_once(':') {
            Some((title, body)) => (title.to_string(), body.to_string()),
            None => (rendered, String::new()),
        }
    }

    /// Wrap a transport-level failure, preserving the underlying message.
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }
}
