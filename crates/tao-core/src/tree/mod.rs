//! The remote tree collaborator.
//!
//! Every byte Tao exchanges goes through a hierarchical key/value store that
//! supports point reads, point writes, persistent subscriptions and
//! store-side cleanup when a connection vanishes. This module defines the
//! interface the rest of the crate programs against:
//!
//! - [`TreePath`] - a normalized, slash-separated location in the tree
//! - [`RemoteTree`] - the operations a store must provide
//! - [`Subscription`] - an ordered sequence of values for one path, starting
//!   with the present value and then streaming changes
//! - [`DisconnectAction`] - cleanup the store performs on ungraceful disconnect
//!
//! [`memory::MemoryTree`] is an in-process implementation with the same
//! observable semantics, used by the tests and by embedders that want to run
//! two endpoints in one process.
//!
//! ## Example
//!
//! ```rust,ignore
//! use tao_core::tree::{RemoteTree, TreePath};
//!
//! let path = TreePath::new("metadata/abcdefghij0123456789/isTurnedOn");
//! tree.set(&path, true.into());
//!
//! let mut updates = tree.subscribe(&path);
//! while let Some(value) = updates.next().await {
//!     println!("turned on: {}", tao_core::tree::is_truthy(&value));
//! }
//! ```

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;

pub mod memory;

pub use memory::{MemoryConnection, MemoryTree, WriteRecord};

/// A location in the remote tree.
///
/// Paths are stored without leading or trailing slashes and with empty
/// segments collapsed, so `"/a//b/"` and `"a/b"` are the same path. The empty
/// path is the root.
#[derive(Debug, Clone, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TreePath(String);

impl TreePath {
    /// Create a path, normalizing separators.
    #[must_use]
    pub fn new(path: impl AsRef<str>) -> Self {
        Self(
            path.as_ref()
                .split('/')
                .filter(|segment| !segment.is_empty())
                .collect::<Vec<_>>()
                .join("/"),
        )
    }

    /// The root of the tree.
    #[must_use]
    pub fn root() -> Self {
        Self::default()
    }

    /// Get the path as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the root path.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Descend into `child`, which may itself contain several segments.
    #[must_use]
    pub fn child(&self, child: impl AsRef<str>) -> Self {
        let child = Self::new(child);
        if self.is_root() {
            child
        } else if child.is_root() {
            self.clone()
        } else {
            Self(format!("{}/{}", self.0, child.0))
        }
    }

    /// Parent path, `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        Some(
            self.0
                .rsplit_once('/')
                .map_or_else(Self::root, |(parent, _)| Self(parent.to_string())),
        )
    }

    /// Last segment, `None` for the root.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        if self.is_root() {
            return None;
        }
        Some(self.0.rsplit('/').next().unwrap_or(&self.0))
    }

    /// Iterate over the segments from the root down.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|segment| !segment.is_empty())
    }

    /// Whether `self` is `other` or one of its ancestors.
    #[must_use]
    pub fn contains(&self, other: &Self) -> bool {
        self.is_root()
            || other.0 == self.0
            || (other.0.starts_with(&self.0) && other.0.as_bytes().get(self.0.len()) == Some(&b'/'))
    }

    /// Whether a write at `self` can change the value observed at `other`.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.contains(other) || other.contains(self)
    }
}

impl fmt::Display for TreePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0)
    }
}

impl From<&str> for TreePath {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

/// Cleanup the store performs when a connection ends without saying goodbye.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectAction {
    /// Delete the value at the registered path
    Remove,
}

/// Truthiness of a tree value.
///
/// Absent (`null`), `false`, `0` and `""` are all falsy. Flags never
/// distinguish "missing" from "off".
#[must_use]
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Persistent view of one path.
///
/// The first item is the value present when the subscription was installed;
/// every later item is a change. The sequence ends when the subscription is
/// removed with [`RemoteTree::unsubscribe`] or the store goes away.
#[derive(Debug)]
pub struct Subscription {
    path: TreePath,
    inner: UnboundedReceiverStream<Value>,
}

impl Subscription {
    /// Wrap the receiving half of a store's delivery channel.
    #[must_use]
    pub fn new(path: TreePath, rx: mpsc::UnboundedReceiver<Value>) -> Self {
        Self {
            path,
            inner: UnboundedReceiverStream::new(rx),
        }
    }

    /// The subscribed path.
    #[must_use]
    pub fn path(&self) -> &TreePath {
        &self.path
    }

    /// Wait for the next value.
    ///
    /// Returns `None` once the subscription has been removed.
    pub async fn next(&mut self) -> Option<Value> {
        StreamExt::next(&mut self.inner).await
    }
}

impl Stream for Subscription {
    type Item = Value;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Operations a remote tree must provide.
///
/// Writes are fire-and-forget: failures belong to the implementation, which
/// is expected to surface or retry them itself. Reads and subscriptions are
/// assumed to deliver eventually.
#[async_trait]
pub trait RemoteTree: Send + Sync {
    /// One-shot read. Absent values read as `Value::Null`.
    ///
    /// Must not leave a subscription registered behind it.
    async fn get(&self, path: &TreePath) -> Value;

    /// Install a persistent subscription on `path`.
    fn subscribe(&self, path: &TreePath) -> Subscription;

    /// Remove every subscription on `path` installed through this handle.
    fn unsubscribe(&self, path: &TreePath);

    /// Write `value` at `path`. Writing `Value::Null` deletes the value.
    fn set(&self, path: &TreePath, value: Value);

    /// Ask the store to perform `action` on `path` if this handle's
    /// connection ends ungracefully.
    fn on_disconnect(&self, path: &TreePath, action: DisconnectAction);
}
