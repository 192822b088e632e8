//! Live synchronization: the event bus, per-kind reconcilers, the room
//! hierarchy resolver, and the message cache, all wired together by
//! [`engine::SyncEngine`].

pub mod bus;
pub mod engine;
pub mod entities;
pub mod events;
pub mod hierarchy;
pub mod messages;
pub mod reconciler;
