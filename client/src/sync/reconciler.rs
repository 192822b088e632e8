use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::bus::EventStream;
use super::entities::{Emoji, Room, RoomDelta, RoomField, Server, ServerDelta, ServerField, User, UserDelta, UserField};
use super::events::ServerEvent;

/// Immutable-at-a-point-in-time view of one entity kind's authoritative map.
/// Readers hold an `Arc` snapshot; the owning reconciler publishes a fresh
/// one after every transition, so a reader never observes a map mid-update.
pub type Snapshot<E> = Arc<HashMap<String, E>>;

/// A discrete state transition extracted from a server event.
pub enum Transition<E: Reconcile> {
    /// Full snapshot: replaces the authoritative map wholesale.
    Ready(Vec<E>),
    /// Insert or overwrite one entity.
    Create(E),
    /// Field-level merge onto an existing entity. Dropped if the id is
    /// unknown (update-before-create is not synthesized).
    Update {
        id: String,
        data: E::Delta,
        clear: Vec<E::Field>,
    },
    /// Remove one entity.
    Delete { id: String },
}

/// One reconcilable entity kind. The four kinds (servers, channels, emoji,
/// users) are structurally identical; this trait is the only per-kind code.
pub trait Reconcile: Clone + Send + Sync + 'static {
    /// Partial-update payload; `None` fields preserve the previous value.
    type Delta: Send + Sync;
    /// Fields an update may explicitly reset to default.
    type Field: Send + Sync;

    /// Entity kind tag for logging.
    const KIND: &'static str;

    fn id(&self) -> &str;
    fn apply(&mut self, data: &Self::Delta);
    fn clear(&mut self, field: &Self::Field);

    /// Map a bus event onto a transition for this kind, if it concerns it.
    fn transition(event: &ServerEvent) -> Option<Transition<Self>>;
}

/// Applies an ordered stream of transitions onto an authoritative map for
/// one entity kind, publishing a copy-on-publish snapshot after each one.
/// Single writer per kind; ordering within one reconciler is guaranteed by
/// its sequential event loop.
pub struct Reconciler<E: Reconcile> {
    authoritative: HashMap<String, E>,
    publish: watch::Sender<Snapshot<E>>,
}

impl<E: Reconcile> Reconciler<E> {
    pub fn new() -> (Self, watch::Receiver<Snapshot<E>>) {
        let (publish, subscribe) = watch::channel(Snapshot::<E>::default());
        (
            Self {
                authoritative: HashMap::new(),
                publish,
            },
            subscribe,
        )
    }

    /// Apply one transition and publish the resulting snapshot.
    pub fn apply(&mut self, transition: Transition<E>) {
        match transition {
            Transition::Ready(entities) => {
                self.authoritative = entities
                    .into_iter()
                    .map(|e| (e.id().to_string(), e))
                    .collect();
                info!(
                    kind = E::KIND,
                    count = self.authoritative.len(),
                    "reconciler reset from snapshot"
                );
            }
            Transition::Create(entity) => {
                // Overwrite on duplicate create keeps this idempotent.
                self.authoritative.insert(entity.id().to_string(), entity);
            }
            Transition::Update { id, data, clear } => {
                match self.authoritative.get_mut(&id) {
                    Some(entity) => {
                        entity.apply(&data);
                        for field in &clear {
                            entity.clear(field);
                        }
                    }
                    None => {
                        debug!(kind = E::KIND, %id, "dropping update for unknown entity");
                        return;
                    }
                }
            }
            Transition::Delete { id } => {
                if self.authoritative.remove(&id).is_none() {
                    debug!(kind = E::KIND, %id, "delete for unknown entity");
                    return;
                }
            }
        }
        self.publish
            .send_replace(Arc::new(self.authoritative.clone()));
    }

    /// Consume the bus subscription until it ends or the token is cancelled.
    pub async fn run(mut self, mut events: EventStream, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => {
                        if let Some(transition) = E::transition(&event) {
                            self.apply(transition);
                        }
                    }
                    None => break,
                },
            }
        }
        debug!(kind = E::KIND, "reconciler loop stopped");
    }
}

// ── Per-kind transition mappings ────────────────────────────────

impl Reconcile for Server {
    type Delta = ServerDelta;
    type Field = ServerField;
    const KIND: &'static str = "server";

    fn id(&self) -> &str {
        &self.id
    }

    fn apply(&mut self, data: &ServerDelta) {
        if let Some(v) = &data.name {
            self.name = v.clone();
        }
        if let Some(v) = &data.owner_id {
            self.owner_id = v.clone();
        }
        if let Some(v) = &data.description {
            self.description = Some(v.clone());
        }
        if let Some(v) = &data.icon_url {
            self.icon_url = Some(v.clone());
        }
        if let Some(v) = &data.channel_ids {
            self.channel_ids = v.clone();
        }
        if let Some(v) = &data.categories {
            self.categories = v.clone();
        }
        if let Some(v) = &data.roles {
            self.roles = v.clone();
        }
        if let Some(v) = data.default_permissions {
            self.default_permissions = v;
        }
        if let Some(v) = data.flags {
            self.flags = v;
        }
        if let Some(v) = data.nsfw {
            self.nsfw = v;
        }
    }

    fn clear(&mut self, field: &ServerField) {
        match field {
            ServerField::Icon => self.icon_url = None,
            ServerField::Description => self.description = None,
            ServerField::Categories => self.categories.clear(),
        }
    }

    fn transition(event: &ServerEvent) -> Option<Transition<Self>> {
        match event {
            ServerEvent::Ready {
                servers: Some(servers),
                ..
            } => Some(Transition::Ready(servers.clone())),
            ServerEvent::ServerCreate { server } => Some(Transition::Create(server.clone())),
            ServerEvent::ServerUpdate { id, data, clear } => Some(Transition::Update {
                id: id.clone(),
                data: data.clone(),
                clear: clear.clone(),
            }),
            ServerEvent::ServerDelete { id } => Some(Transition::Delete { id: id.clone() }),
            _ => None,
        }
    }
}

impl Reconcile for Room {
    type Delta = RoomDelta;
    type Field = RoomField;
    const KIND: &'static str = "channel";

    fn id(&self) -> &str {
        &self.id
    }

    fn apply(&mut self, data: &RoomDelta) {
        if let Some(v) = &data.name {
            self.name = v.clone();
        }
        if let Some(v) = &data.topic {
            self.topic = Some(v.clone());
        }
        if let Some(v) = &data.child_ids {
            self.child_ids = v.clone();
        }
    }

    fn clear(&mut self, field: &RoomField) {
        match field {
            RoomField::Topic => self.topic = None,
        }
    }

    fn transition(event: &ServerEvent) -> Option<Transition<Self>> {
        match event {
            ServerEvent::Ready {
                rooms: Some(rooms), ..
            } => Some(Transition::Ready(rooms.clone())),
            ServerEvent::ChannelCreate { room } => Some(Transition::Create(room.clone())),
            ServerEvent::ChannelUpdate { id, data, clear } => Some(Transition::Update {
                id: id.clone(),
                data: data.clone(),
                clear: clear.clone(),
            }),
            ServerEvent::ChannelDelete { id } => Some(Transition::Delete { id: id.clone() }),
            _ => None,
        }
    }
}

/// Emoji are replace-on-create, remove-on-delete; no partial updates exist.
impl Reconcile for Emoji {
    type Delta = ();
    type Field = ();
    const KIND: &'static str = "emoji";

    fn id(&self) -> &str {
        &self.id
    }

    fn apply(&mut self, _data: &()) {}
    fn clear(&mut self, _field: &()) {}

    fn transition(event: &ServerEvent) -> Option<Transition<Self>> {
        match event {
            ServerEvent::Ready {
                emoji: Some(emoji), ..
            } => Some(Transition::Ready(emoji.clone())),
            ServerEvent::EmojiCreate { emoji } => Some(Transition::Create(emoji.clone())),
            ServerEvent::EmojiDelete { id } => Some(Transition::Delete { id: id.clone() }),
            _ => None,
        }
    }
}

impl Reconcile for User {
    type Delta = UserDelta;
    type Field = UserField;
    const KIND: &'static str = "user";

    fn id(&self) -> &str {
        &self.id
    }

    fn apply(&mut self, data: &UserDelta) {
        if let Some(v) = &data.username {
            self.username = v.clone();
        }
        if let Some(v) = &data.display_name {
            self.display_name = Some(v.clone());
        }
        if let Some(v) = &data.avatar_url {
            self.avatar_url = Some(v.clone());
        }
    }

    fn clear(&mut self, field: &UserField) {
        match field {
            UserField::DisplayName => self.display_name = None,
            UserField::Avatar => self.avatar_url = None,
        }
    }

    fn transition(event: &ServerEvent) -> Option<Transition<Self>> {
        match event {
            ServerEvent::Ready {
                users: Some(users), ..
            } => Some(Transition::Ready(users.clone())),
            ServerEvent::UserUpdate { id, data, clear } => Some(Transition::Update {
                id: id.clone(),
                data: data.clone(),
                clear: clear.clone(),
            }),
            _ => None,
        }
    }
}
