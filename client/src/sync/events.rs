use serde::{Deserialize, Serialize};

use super::entities::{
    ChannelId, Emoji, EmojiId, Message, MessageDelta, MessageId, Room, RoomDelta, RoomField,
    RoomId, Server, ServerDelta, ServerField, ServerId, User, UserDelta, UserField, UserId,
};

/// A decoded server-originated event, as delivered by the transport.
///
/// Delivery order matches arrival order; the engine applies these one at a
/// time per consumer. Wire decoding happens before this type — unrecognized
/// payload kinds land on [`ServerEvent::Unknown`] and are dropped with a
/// diagnostic log line rather than failing the stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Full-state snapshot delivered on (re)connection. Only the entity
    /// kinds present (`Some`) replace their reconciler's map; absent kinds
    /// are left untouched.
    Ready {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        servers: Option<Vec<Server>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rooms: Option<Vec<Room>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        emoji: Option<Vec<Emoji>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        users: Option<Vec<User>>,
    },

    ServerCreate {
        server: Server,
    },
    ServerUpdate {
        id: ServerId,
        #[serde(default)]
        data: ServerDelta,
        #[serde(default)]
        clear: Vec<ServerField>,
    },
    ServerDelete {
        id: ServerId,
    },

    ChannelCreate {
        room: Room,
    },
    ChannelUpdate {
        id: RoomId,
        #[serde(default)]
        data: RoomDelta,
        #[serde(default)]
        clear: Vec<RoomField>,
    },
    ChannelDelete {
        id: RoomId,
    },

    EmojiCreate {
        emoji: Emoji,
    },
    EmojiDelete {
        id: EmojiId,
    },

    UserUpdate {
        id: UserId,
        #[serde(default)]
        data: UserDelta,
        #[serde(default)]
        clear: Vec<UserField>,
    },

    MessageCreate {
        message: Message,
    },
    MessageUpdate {
        id: MessageId,
        channel_id: ChannelId,
        #[serde(default)]
        data: MessageDelta,
    },
    MessageDelete {
        id: MessageId,
        channel_id: ChannelId,
    },
    MessageReact {
        id: MessageId,
        channel_id: ChannelId,
        user_id: UserId,
        emoji: String,
    },
    MessageUnreact {
        id: MessageId,
        channel_id: ChannelId,
        user_id: UserId,
        emoji: String,
    },

    /// Catch-all for event kinds this engine does not recognize.
    #[serde(other)]
    Unknown,
}

impl ServerEvent {
    /// Short tag for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ready { .. } => "ready",
            Self::ServerCreate { .. } => "server_create",
            Self::ServerUpdate { .. } => "server_update",
            Self::ServerDelete { .. } => "server_delete",
            Self::ChannelCreate { .. } => "channel_create",
            Self::ChannelUpdate { .. } => "channel_update",
            Self::ChannelDelete { .. } => "channel_delete",
            Self::EmojiCreate { .. } => "emoji_create",
            Self::EmojiDelete { .. } => "emoji_delete",
            Self::UserUpdate { .. } => "user_update",
            Self::MessageCreate { .. } => "message_create",
            Self::MessageUpdate { .. } => "message_update",
            Self::MessageDelete { .. } => "message_delete",
            Self::MessageReact { .. } => "message_react",
            Self::MessageUnreact { .. } => "message_unreact",
            Self::Unknown => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::entities::testutil;

    #[test]
    fn test_tagged_decode() {
        let event: ServerEvent = serde_json::from_str(
            r#"{"type":"channel_delete","id":"ch-1"}"#,
        )
        .unwrap();
        match event {
            ServerEvent::ChannelDelete { id } => assert_eq!(id, "ch-1"),
            other => panic!("expected ChannelDelete, got {:?}", other),
        }
    }

    #[test]
    fn test_unrecognized_kind_decodes_to_unknown() {
        let event: ServerEvent =
            serde_json::from_str(r#"{"type":"voice_state_blip"}"#).unwrap();
        assert!(matches!(event, ServerEvent::Unknown));
    }

    #[test]
    fn test_ready_with_partial_kinds() {
        let event: ServerEvent = serde_json::from_str(
            r#"{"type":"ready","rooms":[{"id":"r1","kind":"space"}]}"#,
        )
        .unwrap();
        match event {
            ServerEvent::Ready {
                servers,
                rooms,
                emoji,
                users,
            } => {
                assert!(servers.is_none());
                assert_eq!(rooms.unwrap().len(), 1);
                assert!(emoji.is_none());
                assert!(users.is_none());
            }
            other => panic!("expected Ready, got {:?}", other),
        }
    }

    #[test]
    fn test_update_defaults_empty_delta_and_clear() {
        let event: ServerEvent =
            serde_json::from_str(r#"{"type":"server_update","id":"s1"}"#).unwrap();
        match event {
            ServerEvent::ServerUpdate { id, data, clear } => {
                assert_eq!(id, "s1");
                assert!(data.name.is_none());
                assert!(clear.is_empty());
            }
            other => panic!("expected ServerUpdate, got {:?}", other),
        }
    }

    #[test]
    fn test_roundtrip_message_create() {
        let event = ServerEvent::MessageCreate {
            message: testutil::message("m1", "ch-1", "hello"),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: ServerEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind(), "message_create");
    }
}
