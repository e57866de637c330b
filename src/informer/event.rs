//! Watch Events
//!
//! Typed change notifications delivered by an informer to its handlers.
//! Deletions carry a `DeletedObject` so handlers never need to inspect raw
//! payloads to tell a confirmed delete from a tombstone.

use std::sync::Arc;

/// A change observed on a watched resource kind
#[derive(Debug, Clone)]
pub enum WatchEvent<K> {
    /// Object appeared in the cache
    Added(Arc<K>),

    /// Object was replaced. `old` and `new` share a resource version on resync.
    Updated { old: Arc<K>, new: Arc<K> },

    /// Object left the cache
    Deleted(DeletedObject<K>),
}

/// Last known state of a deleted object
#[derive(Debug, Clone)]
pub enum DeletedObject<K> {
    /// The API server reported the delete with the final object state
    Final(Arc<K>),

    /// The object vanished across a watch restart; this is the last state the
    /// cache held, which may be stale
    StateUnknown(Arc<K>),
}

impl<K> DeletedObject<K> {
    /// The deleted object, final or last known
    pub fn object(&self) -> &Arc<K> {
        match self {
            DeletedObject::Final(obj) | DeletedObject::StateUnknown(obj) => obj,
        }
    }

    pub fn is_state_unknown(&self) -> bool {
        matches!(self, DeletedObject::StateUnknown(_))
    }
}

impl<K> WatchEvent<K> {
    /// The object the event is about; the new state for updates
    pub fn object(&self) -> &Arc<K> {
        match self {
            WatchEvent::Added(obj) => obj,
            WatchEvent::Updated { new, .. } => new,
            WatchEvent::Deleted(deleted) => deleted.object(),
        }
    }
}

/// Receives events for one resource kind. Called on the informer task, so
/// implementations must not block.
pub trait EventHandler<K>: Send + Sync {
    fn handle(&self, event: &WatchEvent<K>);
}
