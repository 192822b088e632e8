use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::api::RoomDirectory;
use crate::error::SyncError;

use super::entities::{Room, RoomId};

/// A node in the resolved space/channel hierarchy. Owned exclusively by the
/// resolver and rebuilt wholesale on each resolution pass; never patched in
/// place.
#[derive(Debug, Clone)]
pub enum TreeNode {
    Space {
        room: Room,
        children: HashMap<RoomId, TreeNode>,
    },
    Channel {
        room: Room,
    },
}

impl TreeNode {
    pub fn room(&self) -> &Room {
        match self {
            Self::Space { room, .. } => room,
            Self::Channel { room } => room,
        }
    }

    pub fn children(&self) -> Option<&HashMap<RoomId, TreeNode>> {
        match self {
            Self::Space { children, .. } => Some(children),
            Self::Channel { .. } => None,
        }
    }

    /// All room ids in this subtree, this node included.
    pub fn collect_ids(&self, out: &mut Vec<RoomId>) {
        out.push(self.room().id.clone());
        if let Some(children) = self.children() {
            for child in children.values() {
                child.collect_ids(out);
            }
        }
    }
}

/// The resolved top-level hierarchy, published copy-on-write.
pub type Tree = Arc<HashMap<RoomId, TreeNode>>;

/// Deduplication and cycle guard. A room id is claimed exactly once across
/// all concurrently resolving branches; the check-and-mark is a single
/// critical section so racing siblings cannot both win.
#[derive(Default)]
struct SeenSet {
    inner: Mutex<HashSet<RoomId>>,
}

impl SeenSet {
    /// Returns true if this caller claimed the id, false if it was already
    /// taken by another branch.
    fn claim(&self, id: &str) -> bool {
        self.inner
            .lock()
            .expect("seen set lock poisoned")
            .insert(id.to_string())
    }
}

/// Builds the space/channel tree from the flat room set plus child-edge
/// queries against the room directory.
///
/// Resolution is a structured fan-out: each space's children resolve
/// concurrently and are joined before the space is considered complete.
/// Dropping the resolution future aborts all in-flight child subtasks.
pub struct HierarchyResolver {
    directory: Arc<dyn RoomDirectory>,
    publish: watch::Sender<Tree>,
}

impl HierarchyResolver {
    pub fn new(directory: Arc<dyn RoomDirectory>) -> (Self, watch::Receiver<Tree>) {
        let (publish, subscribe) = watch::channel(Tree::default());
        (Self { directory, publish }, subscribe)
    }

    /// Fetch the full room directory and rebuild the published tree.
    ///
    /// On a directory fetch failure the previously published hierarchy is
    /// left untouched (stale but valid) and the error is returned.
    pub async fn refresh(&self) -> Result<(), SyncError> {
        let roots = match self.directory.list_rooms().await {
            Ok(rooms) => rooms,
            Err(e) => {
                warn!(error = %e, "room directory fetch failed; keeping previous hierarchy");
                return Err(e);
            }
        };
        self.rebuild_from(roots).await;
        Ok(())
    }

    /// Rebuild the published tree from an already-known flat room set
    /// (typically the channel reconciler's latest snapshot).
    pub async fn rebuild_from(&self, rooms: Vec<Room>) {
        let tree = self.resolve(rooms).await;
        info!(top_level = tree.len(), "hierarchy rebuilt");
        self.publish.send_replace(Arc::new(tree));
    }

    /// Resolve a flat room set into top-level tree nodes. Rooms discovered
    /// only as children of a space end up nested, not duplicated at top
    /// level; every room id appears in the result at most once.
    pub async fn resolve(&self, roots: Vec<Room>) -> HashMap<RoomId, TreeNode> {
        let seen = Arc::new(SeenSet::default());
        // Already-known-but-unplaced rooms; children found here skip the
        // remote fetch.
        let scratch: Arc<DashMap<RoomId, Room>> = Arc::new(DashMap::new());
        for room in &roots {
            scratch.insert(room.id.clone(), room.clone());
        }

        // Claim order decides placement, so it must not follow input order:
        // spaces resolve before leaves (a leaf also declared as a child must
        // be claimed by its space, not by its own top-level slot), and
        // parentless spaces before sub-spaces for the same reason.
        let (spaces, leaves): (Vec<Room>, Vec<Room>) =
            roots.into_iter().partition(Room::is_space);
        let (top_spaces, sub_spaces): (Vec<Room>, Vec<Room>) = spaces
            .into_iter()
            .partition(|room| room.parent_ids.is_empty());

        let mut result = HashMap::new();
        for room in top_spaces.into_iter().chain(sub_spaces).chain(leaves) {
            if !seen.claim(&room.id) {
                // Already nested under a space resolved earlier this pass.
                continue;
            }
            scratch.remove(&room.id);
            let node = build(
                Arc::clone(&self.directory),
                Arc::clone(&scratch),
                Arc::clone(&seen),
                room,
            )
            .await;
            result.insert(node.room().id.clone(), node);
        }
        result
    }
}

/// Resolve one room into a tree node. The caller must have claimed
/// `room.id` in the seen set before calling; marking before recursion is
/// what makes back-edges terminate instead of looping.
fn build(
    directory: Arc<dyn RoomDirectory>,
    scratch: Arc<DashMap<RoomId, Room>>,
    seen: Arc<SeenSet>,
    room: Room,
) -> BoxFuture<'static, TreeNode> {
    Box::pin(async move {
        if !room.is_space() {
            return TreeNode::Channel { room };
        }

        let child_ids = match directory.get_children(&room.id).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(space = %room.id, error = %e, "child listing failed; space resolves empty");
                Vec::new()
            }
        };

        let mut tasks: JoinSet<Option<(RoomId, TreeNode)>> = JoinSet::new();
        for child_id in child_ids {
            if !seen.claim(&child_id) {
                debug!(child = %child_id, "child already placed; skipping");
                continue;
            }
            let directory = Arc::clone(&directory);
            let scratch = Arc::clone(&scratch);
            let seen = Arc::clone(&seen);
            tasks.spawn(async move {
                let child = match scratch.remove(&child_id) {
                    Some((_, local)) => Some(local),
                    None => match directory.get_room(&child_id).await {
                        Ok(found) => found,
                        Err(e) => {
                            warn!(child = %child_id, error = %e, "child fetch failed; omitting branch");
                            None
                        }
                    },
                };
                match child {
                    Some(child) => {
                        let node = build(directory, scratch, seen, child).await;
                        Some((child_id, node))
                    }
                    None => {
                        debug!(child = %child_id, "child unknown to directory; omitting");
                        None
                    }
                }
            });
        }

        let mut children = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            if let Ok(Some((id, node))) = joined {
                children.insert(id, node);
            }
        }
        TreeNode::Space { room, children }
    })
}
