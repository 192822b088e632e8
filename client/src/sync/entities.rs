use std::collections::{BTreeSet, HashMap};

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Room/channel identifier as assigned by the server.
pub type RoomId = String;
pub type ServerId = String;
pub type ChannelId = String;
pub type MessageId = String;
pub type UserId = String;
pub type EmojiId = String;

/// What kind of room a [`Room`] is. Spaces group channels; everything else
/// is a leaf in the resolved hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomKind {
    Space,
    TextChannel,
    VoiceChannel,
    DirectMessage,
    Group,
    SavedMessages,
}

/// A room as decoded from server payloads: a space, channel, DM, group or
/// saved-messages pseudo-channel. The flat room set plus the parent/child
/// edges is the input to hierarchy resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub kind: RoomKind,
    #[serde(default)]
    pub name: String,
    /// Declared parent room ids (a channel may be claimed by several spaces;
    /// the resolver's first-seen-wins rule places it under exactly one).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parent_ids: Vec<RoomId>,
    /// Declared child room ids. Only meaningful for spaces.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub child_ids: Vec<RoomId>,
    /// Owning server, when the room belongs to one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<ServerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
}

impl Room {
    pub fn is_space(&self) -> bool {
        self.kind == RoomKind::Space
    }
}

/// Partial room fields delivered by a channel update event. Fields left as
/// `None` preserve the previous value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub child_ids: Option<Vec<RoomId>>,
}

/// Room fields an update event may explicitly clear back to default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomField {
    Topic,
}

bitflags! {
    /// Instance-assigned server badges.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ServerFlags: u32 {
        const OFFICIAL = 1;
        const VERIFIED = 2;
    }
}

bitflags! {
    /// Permission bits carried by roles and default server permissions.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Permissions: u64 {
        const VIEW_CHANNEL    = 1 << 0;
        const SEND_MESSAGE    = 1 << 1;
        const MANAGE_MESSAGES = 1 << 2;
        const MANAGE_CHANNEL  = 1 << 3;
        const MANAGE_SERVER   = 1 << 4;
        const MANAGE_ROLES    = 1 << 5;
        const KICK_MEMBERS    = 1 << 6;
        const BAN_MEMBERS     = 1 << 7;
    }
}

/// A channel category inside a server's sidebar ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub channel_ids: Vec<ChannelId>,
}

/// A role within a server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    #[serde(default)]
    pub permissions: u64,
    #[serde(default)]
    pub rank: i64,
}

impl Role {
    pub fn permissions(&self) -> Permissions {
        Permissions::from_bits_truncate(self.permissions)
    }
}

/// A server (guild) as held by the server reconciler. Mutated by field-level
/// merge on update events: present delta fields overwrite, absent fields
/// retain the previous value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub id: ServerId,
    pub owner_id: UserId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    #[serde(default)]
    pub channel_ids: Vec<ChannelId>,
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub roles: HashMap<String, Role>,
    #[serde(default)]
    pub default_permissions: u64,
    #[serde(default)]
    pub flags: u32,
    #[serde(default)]
    pub nsfw: bool,
}

impl Server {
    pub fn flags(&self) -> ServerFlags {
        ServerFlags::from_bits_truncate(self.flags)
    }

    pub fn default_permissions(&self) -> Permissions {
        Permissions::from_bits_truncate(self.default_permissions)
    }
}

/// Partial server fields delivered by an update event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_ids: Option<Vec<ChannelId>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<Category>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roles: Option<HashMap<String, Role>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_permissions: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flags: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nsfw: Option<bool>,
}

/// Server fields an update event may explicitly clear back to default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerField {
    Icon,
    Description,
    Categories,
}

/// A custom emoji. Replace-on-create, remove-on-delete; never patched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Emoji {
    pub id: EmojiId,
    pub name: String,
    pub creator_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<ServerId>,
    #[serde(default)]
    pub animated: bool,
}

/// A user as known to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// Partial user fields delivered by an update event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UserDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserField {
    DisplayName,
    Avatar,
}

/// An uploaded file referenced by a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default)]
    pub size: u64,
}

/// A chat message. Owned by the message cache, keyed by channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub author_id: UserId,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    /// emoji -> reacting user ids. BTreeSet keeps rendering order stable.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub reactions: HashMap<String, BTreeSet<UserId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,
}

/// Partial message fields delivered by a message update event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,
}
