//! Wiring for one synchronization generation: the bus pump, the per-kind
//! reconcilers, the hierarchy resolver, and the message cache all run as
//! tasks under a single cancellation token that the engine owns.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{MessageEndpoint, RoomDirectory};
use crate::config::SyncSection;
use crate::error::SyncError;
use crate::session::SessionSupervisor;
use crate::sync::bus::{self, EventBus, EventTransport};
use crate::sync::entities::{Emoji, Room, Server, User};
use crate::sync::hierarchy::{HierarchyResolver, Tree};
use crate::sync::messages::MessageCache;
use crate::sync::reconciler::{Reconciler, Snapshot};

/// One running synchronization generation.
///
/// All tasks share a cancellation token; dropping into [`SyncEngine::shutdown`]
/// cancels the token and then awaits every task, so nothing from this
/// generation is still publishing when a replacement generation starts.
pub struct SyncEngine {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    servers: watch::Receiver<Snapshot<Server>>,
    channels: watch::Receiver<Snapshot<Room>>,
    emoji: watch::Receiver<Snapshot<Emoji>>,
    users: watch::Receiver<Snapshot<User>>,
    tree: watch::Receiver<Tree>,
    messages: Arc<MessageCache>,
}

impl SyncEngine {
    /// Subscribe every consumer to the bus, then start the pump. Subscriptions
    /// are taken before the pump task runs so no early event can slip past a
    /// consumer.
    pub fn start(
        directory: Arc<dyn RoomDirectory>,
        endpoint: Arc<dyn MessageEndpoint>,
        transport: Box<dyn EventTransport>,
        sync: &SyncSection,
    ) -> Self {
        let cancel = CancellationToken::new();
        let bus = Arc::new(EventBus::new(sync.event_capacity, sync.replay_window));
        let mut tasks = Vec::new();

        let (server_rec, servers) = Reconciler::<Server>::new();
        let (channel_rec, channels) = Reconciler::<Room>::new();
        let (emoji_rec, emoji) = Reconciler::<Emoji>::new();
        let (user_rec, users) = Reconciler::<User>::new();

        tasks.push(tokio::spawn(
            server_rec.run(bus.subscribe(), cancel.clone()),
        ));
        tasks.push(tokio::spawn(
            channel_rec.run(bus.subscribe(), cancel.clone()),
        ));
        tasks.push(tokio::spawn(emoji_rec.run(bus.subscribe(), cancel.clone())));
        tasks.push(tokio::spawn(user_rec.run(bus.subscribe(), cancel.clone())));

        let messages = Arc::new(MessageCache::new(endpoint));
        tasks.push(tokio::spawn(
            Arc::clone(&messages).run(bus.subscribe(), cancel.clone()),
        ));

        let (resolver, tree) = HierarchyResolver::new(directory);
        tasks.push(tokio::spawn(resolver_loop(
            resolver,
            channels.clone(),
            cancel.clone(),
        )));

        tasks.push(tokio::spawn(bus::pump(bus, transport, cancel.clone())));

        info!("sync engine started");
        Self {
            cancel,
            tasks,
            servers,
            channels,
            emoji,
            users,
            tree,
            messages,
        }
    }

    pub fn servers(&self) -> watch::Receiver<Snapshot<Server>> {
        self.servers.clone()
    }

    pub fn channels(&self) -> watch::Receiver<Snapshot<Room>> {
        self.channels.clone()
    }

    pub fn emoji(&self) -> watch::Receiver<Snapshot<Emoji>> {
        self.emoji.clone()
    }

    pub fn users(&self) -> watch::Receiver<Snapshot<User>> {
        self.users.clone()
    }

    pub fn tree(&self) -> watch::Receiver<Tree> {
        self.tree.clone()
    }

    pub fn messages(&self) -> Arc<MessageCache> {
        Arc::clone(&self.messages)
    }

    /// Cancel every task of this generation and wait for all of them to
    /// finish. Returns only once nothing from this generation is running.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            let _ = task.await;
        }
        info!("sync engine stopped");
    }
}

/// Resolve the tree once from the directory, then rebuild it from the
/// authoritative channel map whenever that map changes.
async fn resolver_loop(
    resolver: HierarchyResolver,
    mut channels: watch::Receiver<Snapshot<Room>>,
    cancel: CancellationToken,
) {
    tokio::select! {
        _ = cancel.cancelled() => return,
        refreshed = resolver.refresh() => {
            if let Err(error) = refreshed {
                warn!(%error, "initial hierarchy refresh failed");
            }
        }
    }
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = channels.changed() => {
                if changed.is_err() {
                    break;
                }
                let rooms: Vec<Room> =
                    channels.borrow_and_update().values().cloned().collect();
                resolver.rebuild_from(rooms).await;
            }
        }
    }
    debug!("resolver loop stopped");
}

/// Produces a fresh live-event transport for each engine generation.
pub type TransportFactory = Arc<dyn Fn() -> Box<dyn EventTransport> + Send + Sync>;

/// Ties the session supervisor to the engine lifecycle. A session change
/// tears the current generation down completely before the replacement is
/// started, so stale tasks can never publish into the new generation's maps.
pub struct ClientRuntime {
    supervisor: SessionSupervisor,
    transports: TransportFactory,
    sync: SyncSection,
    engine: Option<SyncEngine>,
}

impl ClientRuntime {
    pub fn new(
        supervisor: SessionSupervisor,
        transports: TransportFactory,
        sync: SyncSection,
    ) -> Self {
        Self {
            supervisor,
            transports,
            sync,
            engine: None,
        }
    }

    pub fn supervisor(&self) -> &SessionSupervisor {
        &self.supervisor
    }

    pub fn engine(&self) -> Option<&SyncEngine> {
        self.engine.as_ref()
    }

    /// Change the REST base URL. A real change restarts the engine; an
    /// unchanged value leaves the running generation alone.
    pub async fn set_base_url(&mut self, url: &str) -> Result<bool, SyncError> {
        if !self.supervisor.set_base_url(url).await {
            return Ok(false);
        }
        self.restart().await?;
        Ok(true)
    }

    /// Change the WebSocket URL. Same restart semantics as the base URL:
    /// the transport factory is consulted again for the new generation.
    pub async fn set_websocket_url(&mut self, url: &str) -> Result<bool, SyncError> {
        if !self.supervisor.set_websocket_url(url).await {
            return Ok(false);
        }
        self.restart().await?;
        Ok(true)
    }

    /// Change the session token. Same restart semantics as the URL setters.
    pub async fn set_token(&mut self, token: &str) -> Result<bool, SyncError> {
        if !self.supervisor.set_token(token).await {
            return Ok(false);
        }
        self.restart().await?;
        Ok(true)
    }

    /// Start the engine for the current session, or restart it after a
    /// session change. Teardown of the old generation completes before the
    /// new one starts.
    pub async fn restart(&mut self) -> Result<(), SyncError> {
        if let Some(engine) = self.engine.take() {
            engine.shutdown().await;
        }
        let client = self.supervisor.service()?;
        let engine = SyncEngine::start(
            client.clone(),
            client,
            (self.transports)(),
            &self.sync,
        );
        self.engine = Some(engine);
        Ok(())
    }

    pub async fn shutdown(mut self) {
        if let Some(engine) = self.engine.take() {
            engine.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use tokio::sync::mpsc;
    use tokio::time::timeout;

    use super::*;
    use crate::sync::bus::ChannelTransport;
    use crate::sync::entities::testutil;
    use crate::sync::events::ServerEvent;
    use crate::sync::hierarchy::TreeNode;
    use crate::sync::messages::MessageQuery;

    /// Directory over a shared map so tests can mutate it mid-run.
    #[derive(Default)]
    struct StubDirectory {
        rooms: dashmap::DashMap<String, Room>,
    }

    #[async_trait::async_trait]
    impl RoomDirectory for StubDirectory {
        async fn list_rooms(&self) -> Result<Vec<Room>, SyncError> {
            Ok(self.rooms.iter().map(|e| e.value().clone()).collect())
        }

        async fn get_room(&self, id: &str) -> Result<Option<Room>, SyncError> {
            Ok(self.rooms.get(id).map(|e| e.value().clone()))
        }

        async fn get_children(&self, space_id: &str) -> Result<Vec<String>, SyncError> {
            Ok(self
                .rooms
                .get(space_id)
                .map(|e| e.child_ids.clone())
                .unwrap_or_default())
        }

        async fn get_parents(&self, room_id: &str) -> Result<Vec<String>, SyncError> {
            Ok(self
                .rooms
                .iter()
                .filter(|e| e.child_ids.iter().any(|c| c == room_id))
                .map(|e| e.key().clone())
                .collect())
        }
    }

    struct StubEndpoint;

    #[async_trait::async_trait]
    impl MessageEndpoint for StubEndpoint {
        async fn fetch_messages(
            &self,
            _query: &MessageQuery,
        ) -> Result<Vec<crate::sync::entities::Message>, SyncError> {
            Ok(Vec::new())
        }
    }

    fn engine_with_feed(
        directory: Arc<StubDirectory>,
    ) -> (mpsc::Sender<ServerEvent>, SyncEngine) {
        let (feed, transport) = ChannelTransport::new(16);
        let engine = SyncEngine::start(
            directory,
            Arc::new(StubEndpoint),
            Box::new(transport),
            &SyncSection::default(),
        );
        (feed, engine)
    }

    /// Publishes coalesce under watch, so await successive changes until the
    /// predicate holds rather than assuming one change per event.
    async fn wait_until<T>(rx: &mut watch::Receiver<T>, pred: impl Fn(&T) -> bool) {
        timeout(Duration::from_secs(1), async {
            loop {
                if pred(&*rx.borrow_and_update()) {
                    return;
                }
                rx.changed().await.expect("publisher dropped");
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_ready_populates_all_maps() {
        let (feed, engine) = engine_with_feed(Arc::new(StubDirectory::default()));
        let mut servers = engine.servers();
        let mut channels = engine.channels();

        feed.send(ServerEvent::Ready {
            servers: Some(vec![testutil::server("s1", "Home")]),
            rooms: Some(vec![testutil::space("sp1", &["c1"]), testutil::channel("c1")]),
            emoji: None,
            users: None,
        })
        .await
        .unwrap();

        wait_until(&mut servers, |map| map.contains_key("s1")).await;
        wait_until(&mut channels, |map| map.len() == 2).await;
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_channel_events_drive_tree_rebuild() {
        let directory = Arc::new(StubDirectory::default());
        directory
            .rooms
            .insert("sp1".into(), testutil::space("sp1", &["c1"]));
        directory.rooms.insert("c1".into(), testutil::channel("c1"));
        let (feed, engine) = engine_with_feed(Arc::clone(&directory));
        let mut tree = engine.tree();

        feed.send(ServerEvent::Ready {
            servers: None,
            rooms: Some(vec![testutil::space("sp1", &["c1"]), testutil::channel("c1")]),
            emoji: None,
            users: None,
        })
        .await
        .unwrap();

        wait_until(&mut tree, |snapshot| {
            snapshot
                .get("sp1")
                .and_then(TreeNode::children)
                .is_some_and(|c| c.contains_key("c1"))
                && !snapshot.contains_key("c1")
        })
        .await;

        // Deleting the channel removes it from the map and, on the next
        // rebuild, from the tree.
        directory.rooms.remove("c1");
        feed.send(ServerEvent::ChannelDelete { id: "c1".into() })
            .await
            .unwrap();
        wait_until(&mut tree, |snapshot| {
            snapshot
                .get("sp1")
                .and_then(TreeNode::children)
                .is_some_and(HashMap::is_empty)
        })
        .await;
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_all_tasks() {
        let (feed, engine) = engine_with_feed(Arc::new(StubDirectory::default()));
        let servers = engine.servers();
        engine.shutdown().await;
        // After shutdown every publisher is gone.
        assert!(servers.has_changed().is_err());
        drop(feed);
    }

    #[tokio::test]
    async fn test_runtime_noop_setter_keeps_generation() {
        let prefs = Arc::new(crate::prefs::MemoryPrefs::new());
        let supervisor = SessionSupervisor::new(prefs);
        let factory: TransportFactory = Arc::new(|| {
            let (_feed, transport) = ChannelTransport::new(4);
            Box::new(transport) as Box<dyn EventTransport>
        });
        let mut runtime = ClientRuntime::new(supervisor, factory, SyncSection::default());

        assert!(runtime
            .set_base_url("https://api.example.chat")
            .await
            .unwrap());
        assert!(runtime.engine().is_some());
        // Unchanged value: no restart, same generation keeps running.
        assert!(!runtime
            .set_base_url("https://api.example.chat")
            .await
            .unwrap());
        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_runtime_restart_on_token_change() {
        let prefs = Arc::new(crate::prefs::MemoryPrefs::new());
        let supervisor = SessionSupervisor::new(prefs);
        let factory: TransportFactory = Arc::new(|| {
            let (_feed, transport) = ChannelTransport::new(4);
            Box::new(transport) as Box<dyn EventTransport>
        });
        let mut runtime = ClientRuntime::new(supervisor, factory, SyncSection::default());
        runtime
            .set_base_url("https://api.example.chat")
            .await
            .unwrap();

        let old_servers = runtime.engine().unwrap().servers();
        assert!(runtime.set_token("tok-2").await.unwrap());
        // The old generation's publishers were torn down before the new one
        // came up.
        assert!(old_servers.has_changed().is_err());
        assert!(runtime.engine().is_some());
        runtime.shutdown().await;
    }
}
