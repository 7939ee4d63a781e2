//! In-process remote tree.
//!
//! [`MemoryTree`] holds a JSON document and behaves like a hosted realtime
//! tree: subscribers receive the present value first and then only actual
//! changes, writes below or above a subscribed path notify it, and `null`
//! deletes (empty objects disappear with their last child).
//!
//! Peers talk to it through [`MemoryConnection`] handles. Each handle owns
//! its own subscriptions and disconnect actions, and
//! [`MemoryConnection::drop_connection`] simulates the process vanishing.
//! Every write lands in a journal so tests can assert on what was written
//! and by whom.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::{DisconnectAction, RemoteTree, Subscription, TreePath};

/// One write applied to a [`MemoryTree`].
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRecord {
    /// Connection that issued the write, `None` for direct and store-side writes
    pub origin: Option<Uuid>,
    /// Written path
    pub path: TreePath,
    /// Written value (`null` for removals)
    pub value: Value,
}

#[derive(Debug)]
struct Subscriber {
    connection: Uuid,
    path: TreePath,
    last: Value,
    tx: mpsc::UnboundedSender<Value>,
}

#[derive(Debug, Default)]
struct TreeState {
    root: Value,
    subscribers: Vec<Subscriber>,
    on_disconnect: HashMap<Uuid, Vec<(TreePath, DisconnectAction)>>,
    journal: Vec<WriteRecord>,
}

impl TreeState {
    fn read(&self, path: &TreePath) -> Value {
        let mut node = &self.root;
        for segment in path.segments() {
            match node.get(segment) {
                Some(child) => node = child,
                None => return Value::Null,
            }
        }
        normalize(node.clone())
    }

    fn write(&mut self, origin: Option<Uuid>, path: &TreePath, value: Value) {
        let value = normalize(value);
        self.journal.push(WriteRecord {
            origin,
            path: path.clone(),
            value: value.clone(),
        });

        let segments: Vec<&str> = path.segments().collect();
        write_at(&mut self.root, &segments, value);
        self.root = normalize(std::mem::take(&mut self.root));

        self.notify(path);
    }

    fn notify(&mut self, written: &TreePath) {
        let mut subscribers = std::mem::take(&mut self.subscribers);
        subscribers.retain_mut(|sub| {
            if sub.tx.is_closed() {
                return false;
            }
            if !written.overlaps(&sub.path) {
                return true;
            }
            let current = self.read(&sub.path);
            if current == sub.last {
                return true;
            }
            sub.last = current.clone();
            sub.tx.send(current).is_ok()
        });
        self.subscribers = subscribers;
    }
}

/// Write `value` below `node`, creating intermediate objects and pruning
/// emptied ones.
fn write_at(node: &mut Value, segments: &[&str], value: Value) {
    let Some((first, rest)) = segments.split_first() else {
        *node = value;
        return;
    };

    if !node.is_object() {
        if value.is_null() {
            return;
        }
        *node = Value::Object(Map::new());
    }

    if let Value::Object(map) = node {
        if rest.is_empty() {
            if value.is_null() {
                map.remove(*first);
            } else {
                map.insert((*first).to_string(), value);
            }
            return;
        }

        let child = map.entry((*first).to_string()).or_insert(Value::Null);
        write_at(child, rest, value);
        if is_empty(child) {
            map.remove(*first);
        }
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Drop nulls and empty objects recursively, the way the tree stores them.
fn normalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let map: Map<String, Value> = map
                .into_iter()
                .map(|(k, v)| (k, normalize(v)))
                .filter(|(_, v)| !is_empty(v))
                .collect();
            if map.is_empty() {
                Value::Null
            } else {
                Value::Object(map)
            }
        }
        other => other,
    }
}

/// Shared in-memory tree.
///
/// Cloning is cheap; clones share the same document.
#[derive(Debug, Clone, Default)]
pub struct MemoryTree {
    state: Arc<Mutex<TreeState>>,
}

impl MemoryTree {
    /// Create an empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new peer connection to this tree.
    #[must_use]
    pub fn connect(&self) -> MemoryConnection {
        let id = Uuid::new_v4();
        tracing::debug!("Memory tree connection {} opened", id);
        MemoryConnection {
            id,
            tree: self.clone(),
        }
    }

    /// Read the value at `path` directly.
    #[must_use]
    pub fn value_at(&self, path: impl Into<TreePath>) -> Value {
        self.lock().read(&path.into())
    }

    /// Write directly, as an operator or another service would.
    pub fn set(&self, path: impl Into<TreePath>, value: Value) {
        self.lock().write(None, &path.into(), value);
    }

    /// Every write applied so far, oldest first.
    #[must_use]
    pub fn writes(&self) -> Vec<WriteRecord> {
        self.lock().journal.clone()
    }

    /// Values written exactly at `path`, oldest first.
    #[must_use]
    pub fn writes_to(&self, path: impl Into<TreePath>) -> Vec<Value> {
        let path = path.into();
        self.lock()
            .journal
            .iter()
            .filter(|record| record.path == path)
            .map(|record| record.value.clone())
            .collect()
    }

    /// Forget the journal.
    pub fn clear_writes(&self) {
        self.lock().journal.clear();
    }

    /// Number of live subscriptions on `path`.
    #[must_use]
    pub fn subscriber_count(&self, path: impl Into<TreePath>) -> usize {
        let path = path.into();
        self.lock()
            .subscribers
            .iter()
            .filter(|sub| sub.path == path && !sub.tx.is_closed())
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, TreeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One peer's handle on a [`MemoryTree`].
#[derive(Debug, Clone)]
pub struct MemoryConnection {
    id: Uuid,
    tree: MemoryTree,
}

impl MemoryConnection {
    /// Connection id, as recorded in [`WriteRecord::origin`].
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The tree this connection talks to.
    #[must_use]
    pub fn tree(&self) -> &MemoryTree {
        &self.tree
    }

    /// Simulate this peer vanishing: run its registered disconnect actions
    /// and end every subscription it holds.
    pub fn drop_connection(&self) {
        let mut state = self.tree.lock();

        let actions = state.on_disconnect.remove(&self.id).unwrap_or_default();
        tracing::debug!(
            "Memory tree connection {} dropped, running {} disconnect action(s)",
            self.id,
            actions.len()
        );

        state.subscribers.retain(|sub| sub.connection != self.id);

        for (path, action) in actions {
            match action {
                DisconnectAction::Remove => state.write(None, &path, Value::Null),
            }
        }
    }
}

#[async_trait]
impl RemoteTree for MemoryConnection {
    async fn get(&self, path: &TreePath) -> Value {
        self.tree.lock().read(path)
    }

    fn subscribe(&self, path: &TreePath) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.tree.lock();
        let current = state.read(path);
        // The receiver is alive, so the first send cannot fail.
        let _ = tx.send(current.clone());
        state.subscribers.push(Subscriber {
            connection: self.id,
            path: path.clone(),
            last: current,
            tx,
        });
        Subscription::new(path.clone(), rx)
    }

    fn unsubscribe(&self, path: &TreePath) {
        self.tree
            .lock()
            .subscribers
            .retain(|sub| !(sub.connection == self.id && &sub.path == path));
    }

    fn set(&self, path: &TreePath, value: Value) {
        self.tree.lock().write(Some(self.id), path, value);
    }

    fn on_disconnect(&self, path: &TreePath, action: DisconnectAction) {
        self.tree
            .lock()
            .on_disconnect
            .entry(self.id)
            .or_default()
            .push((path.clone(), action));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_set_and_get() {
        let tree = MemoryTree::new();
        let conn = tree.connect();

        conn.set(&TreePath::new("a/b/c"), json!(1));
        conn.set(&TreePath::new("a/d"), json!("x"));

        assert_eq!(conn.get(&TreePath::new("a/b/c")).await, json!(1));
        assert_eq!(conn.get(&TreePath::new("a")).await, json!({"b": {"c": 1}, "d": "x"}));
        assert_eq!(conn.get(&TreePath::new("missing")).await, Value::Null);
        assert_eq!(tree.subscriber_count("a"), 0);
    }

    #[tokio::test]
    async fn test_null_removes_and_prunes() {
        let tree = MemoryTree::new();
        tree.set("a/b/c", json!(1));
        tree.set("a/b/c", Value::Null);

        assert_eq!(tree.value_at("a"), Value::Null);
        assert_eq!(tree.value_at(""), Value::Null);
    }

    #[tokio::test]
    async fn test_write_replaces_primitive_parent() {
        let tree = MemoryTree::new();
        tree.set("a", json!(5));
        tree.set("a/b", json!(true));

        assert_eq!(tree.value_at("a"), json!({"b": true}));
    }

    #[tokio::test]
    async fn test_subscription_starts_with_present_value() {
        let tree = MemoryTree::new();
        tree.set("flag", json!(true));

        let conn = tree.connect();
        let mut sub = conn.subscribe(&TreePath::new("flag"));

        assert_eq!(sub.next().await, Some(json!(true)));
    }

    #[tokio::test]
    async fn test_subscription_only_sees_changes() {
        let tree = MemoryTree::new();
        let conn = tree.connect();
        let mut sub = conn.subscribe(&TreePath::new("flag"));

        tree.set("flag", json!(true));
        tree.set("flag", json!(true));
        tree.set("flag", json!(false));

        assert_eq!(sub.next().await, Some(Value::Null));
        assert_eq!(sub.next().await, Some(json!(true)));
        assert_eq!(sub.next().await, Some(json!(false)));

        conn.unsubscribe(&TreePath::new("flag"));
        assert_eq!(sub.next().await, None);
    }

    #[tokio::test]
    async fn test_ancestor_and_descendant_writes_notify() {
        let tree = MemoryTree::new();
        let conn = tree.connect();
        let mut parent = conn.subscribe(&TreePath::new("ch"));
        let mut leaf = conn.subscribe(&TreePath::new("ch/data"));

        tree.set("ch/data", json!(60));
        tree.set("ch", json!({"data": 61, "enabled": true}));
        tree.set("other", json!(1));

        assert_eq!(parent.next().await, Some(Value::Null));
        assert_eq!(parent.next().await, Some(json!({"data": 60})));
        assert_eq!(parent.next().await, Some(json!({"data": 61, "enabled": true})));

        assert_eq!(leaf.next().await, Some(Value::Null));
        assert_eq!(leaf.next().await, Some(json!(60)));
        assert_eq!(leaf.next().await, Some(json!(61)));
        assert_eq!(tree.subscriber_count("ch"), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_is_per_connection() {
        let tree = MemoryTree::new();
        let a = tree.connect();
        let b = tree.connect();
        let path = TreePath::new("x");

        let _sa = a.subscribe(&path);
        let _sb = b.subscribe(&path);
        a.unsubscribe(&path);

        assert_eq!(tree.subscriber_count("x"), 1);
    }

    #[tokio::test]
    async fn test_drop_connection_runs_disconnect_actions() {
        let tree = MemoryTree::new();
        let peer = tree.connect();
        let observer = tree.connect();

        peer.set(&TreePath::new("meta/isTurnedOn"), json!(true));
        peer.set(&TreePath::new("meta/name"), json!("synth"));
        peer.on_disconnect(&TreePath::new("meta/isTurnedOn"), DisconnectAction::Remove);

        let mut watch = observer.subscribe(&TreePath::new("meta/isTurnedOn"));
        assert_eq!(watch.next().await, Some(json!(true)));

        peer.drop_connection();

        assert_eq!(watch.next().await, Some(Value::Null));
        assert_eq!(tree.value_at("meta"), json!({"name": "synth"}));
        assert_eq!(
            tree.writes().last().map(|w| w.origin),
            Some(None),
            "cleanup is a store-side write"
        );
    }

    #[tokio::test]
    async fn test_journal_records_origin() {
        let tree = MemoryTree::new();
        let conn = tree.connect();

        conn.set(&TreePath::new("a"), json!(1));
        tree.set("a", json!(2));

        let writes = tree.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].origin, Some(conn.id()));
        assert_eq!(writes[1].origin, None);
        assert_eq!(tree.writes_to("a"), vec![json!(1), json!(2)]);

        tree.clear_writes();
        assert!(tree.writes().is_empty());
    }
}
