//! Liveness metadata for an endpoint.
//!
//! A live endpoint advertises `name` and `isTurnedOn = true` in its metadata
//! record. The store is asked to delete `isTurnedOn` if the process vanishes,
//! and readers treat an absent flag as off.

use std::sync::Arc;

use serde_json::Value;

use crate::tree::{DisconnectAction, RemoteTree, TreePath};

/// Metadata field holding the endpoint's display name.
pub const NAME_FIELD: &str = "name";

/// Metadata field holding the liveness flag.
pub const TURNED_ON_FIELD: &str = "isTurnedOn";

/// Marks an endpoint as live and arranges its cleanup.
#[derive(Clone)]
pub struct PresenceTracker {
    tree: Arc<dyn RemoteTree>,
    metadata: TreePath,
}

impl PresenceTracker {
    /// Track presence under the metadata record at `metadata`.
    pub fn new(tree: Arc<dyn RemoteTree>, metadata: TreePath) -> Self {
        Self { tree, metadata }
    }

    /// The tracked metadata record.
    #[must_use]
    pub fn metadata_path(&self) -> &TreePath {
        &self.metadata
    }

    /// Write `name` and `isTurnedOn = true`, and register removal of the
    /// liveness flag on ungraceful disconnect.
    pub fn announce(&self, name: &str) {
        self.tree
            .set(&self.metadata.child(NAME_FIELD), Value::from(name));
        self.tree
            .set(&self.metadata.child(TURNED_ON_FIELD), Value::Bool(true));
        self.remove_on_disconnect([TURNED_ON_FIELD]);

        tracing::info!("Presence announced for '{}' at {}", name, self.metadata);
    }

    /// Register store-side removal of each metadata field on ungraceful
    /// disconnect.
    pub fn remove_on_disconnect<'a>(&self, fields: impl IntoIterator<Item = &'a str>) {
        for field in fields {
            let path = self.metadata.child(field);
            tracing::debug!("Registering removal of {} on disconnect", path);
            self.tree.on_disconnect(&path, DisconnectAction::Remove);
        }
    }
}

impl std::fmt::Debug for PresenceTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresenceTracker")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}
