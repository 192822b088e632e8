use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::api::MessageEndpoint;
use crate::error::SyncError;

use super::bus::EventStream;
use super::entities::{ChannelId, Message, MessageDelta, MessageId};
use super::events::ServerEvent;

/// Sort order for a message fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageSort {
    Latest,
    Oldest,
    Relevance,
}

impl MessageSort {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Latest => "latest",
            Self::Oldest => "oldest",
            Self::Relevance => "relevance",
        }
    }
}

/// Parameters for a message fetch against the message endpoint.
#[derive(Debug, Clone)]
pub struct MessageQuery {
    pub channel_id: ChannelId,
    pub limit: Option<u32>,
    pub before: Option<MessageId>,
    pub after: Option<MessageId>,
    pub sort: Option<MessageSort>,
    pub nearby: Option<MessageId>,
    pub include_users: Option<bool>,
}

impl MessageQuery {
    pub fn new(channel_id: &str) -> Self {
        Self {
            channel_id: channel_id.to_string(),
            limit: None,
            before: None,
            after: None,
            sort: None,
            nearby: None,
            include_users: None,
        }
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn before(mut self, id: &str) -> Self {
        self.before = Some(id.to_string());
        self
    }
}

/// Per-channel, cache-first message store.
///
/// If a channel's list is cached, `fetch` returns it immediately without
/// consulting the network — pagination parameters are honored only on a
/// cache miss. Live Message* events keep warm channels current. There is no
/// TTL or eviction: once warmed, a channel's cache persists for the life of
/// the engine.
pub struct MessageCache {
    endpoint: Arc<dyn MessageEndpoint>,
    channels: DashMap<ChannelId, Vec<Message>>,
}

impl MessageCache {
    pub fn new(endpoint: Arc<dyn MessageEndpoint>) -> Self {
        Self {
            endpoint,
            channels: DashMap::new(),
        }
    }

    /// Fetch messages for a channel, cache first.
    pub async fn fetch(&self, query: MessageQuery) -> Result<Vec<Message>, SyncError> {
        if let Some(cached) = self.channels.get(&query.channel_id) {
            debug!(channel_id = %query.channel_id, count = cached.len(), "message cache hit");
            return Ok(cached.clone());
        }

        let messages = self.endpoint.fetch_messages(&query).await?;
        debug!(
            channel_id = %query.channel_id,
            count = messages.len(),
            "message cache warmed from network"
        );
        self.channels
            .insert(query.channel_id.clone(), messages.clone());
        Ok(messages)
    }

    /// Whether the cache currently holds a list for this channel.
    pub fn is_warm(&self, channel_id: &str) -> bool {
        self.channels.contains_key(channel_id)
    }

    /// Apply one live event to the cached lists. Cold channels are left
    /// cold; only already-warmed lists are updated.
    pub fn apply_event(&self, event: &ServerEvent) {
        match event {
            ServerEvent::MessageCreate { message } => {
                if let Some(mut list) = self.channels.get_mut(&message.channel_id) {
                    list.push(message.clone());
                }
            }
            ServerEvent::MessageUpdate {
                id,
                channel_id,
                data,
            } => self.update_in_place(channel_id, id, data),
            ServerEvent::MessageDelete { id, channel_id } => {
                if let Some(mut list) = self.channels.get_mut(channel_id) {
                    list.retain(|m| m.id != *id);
                }
            }
            ServerEvent::MessageReact {
                id,
                channel_id,
                user_id,
                emoji,
            } => self.with_message(channel_id, id, |m| {
                m.reactions.entry(emoji.clone()).or_default().insert(user_id.clone());
            }),
            ServerEvent::MessageUnreact {
                id,
                channel_id,
                user_id,
                emoji,
            } => self.with_message(channel_id, id, |m| {
                if let Some(users) = m.reactions.get_mut(emoji) {
                    users.remove(user_id);
                    if users.is_empty() {
                        m.reactions.remove(emoji);
                    }
                }
            }),
            _ => {}
        }
    }

    fn update_in_place(&self, channel_id: &str, id: &str, data: &MessageDelta) {
        self.with_message(channel_id, id, |m| {
            if let Some(content) = &data.content {
                m.content = content.clone();
            }
            if let Some(edited_at) = data.edited_at {
                m.edited_at = Some(edited_at);
            }
        });
    }

    fn with_message(&self, channel_id: &str, id: &str, f: impl FnOnce(&mut Message)) {
        if let Some(mut list) = self.channels.get_mut(channel_id)
            && let Some(message) = list.iter_mut().find(|m| m.id == id)
        {
            f(message);
        }
    }

    /// Consume Message* events from the bus until it ends or the token is
    /// cancelled.
    pub async fn run(self: Arc<Self>, mut events: EventStream, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.apply_event(&event),
                    None => break,
                },
            }
        }
        debug!("message cache loop stopped");
    }
}
