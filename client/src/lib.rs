//! Riptide — client-side synchronization engine for chat platforms.
//!
//! Mirrors a remote server's room hierarchy and live entity state (servers,
//! channels, emoji, messages) into a locally consistent snapshot that other
//! layers can read without talking to the network themselves. The engine is
//! fed by a transport that yields already-decoded events; presentation,
//! credential storage and wire decoding live elsewhere.

pub mod api;
pub mod config;
pub mod error;
pub mod prefs;
pub mod session;
pub mod sync;
