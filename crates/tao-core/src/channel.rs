//! Channels: enable-gated data paths between two endpoints.
//!
//! A channel lives in two places in the tree:
//!
//! | Location | Path | Holds |
//! |----------|------|-------|
//! | data | `channels/<route>/<format>/<name>` | `enabled`, `data` |
//! | metadata | `metadata/<id>/channels/<kind>/<name>` | `enabled` |
//!
//! `<route>` is the session's resolved input or output route, so a producer's
//! output channel and a consumer's input channel meet at the same data
//! location when their routes match.
//!
//! ## Enable state
//!
//! The channel caches the data-side `enabled` flag as last observed (or as
//! last set locally). Writes and watch deliveries are gated on that cache:
//! `set_data` on a disabled channel is dropped with a warning, and watchers
//! never see values delivered while disabled.
//!
//! Input channels are relays: they enable themselves on open and then mirror
//! their metadata-side `enabled` flag, which the operator controls, down to
//! the data side.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::tree::{is_truthy, DisconnectAction, RemoteTree, Subscription, TreePath};

/// Field holding a channel's enable flag, at both locations.
pub const ENABLED_FIELD: &str = "enabled";

/// Field holding a channel's current value, at the data location.
pub const DATA_FIELD: &str = "data";

/// Metadata subtree holding channel flags.
pub const CHANNELS_FIELD: &str = "channels";

/// Direction of a channel, seen from the owning endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// Data flows into this endpoint
    Input,
    /// Data flows out of this endpoint
    Output,
}

impl ChannelKind {
    /// Name used in tree paths.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelOptions {
    /// Channel name, unique per kind within a session
    pub name: String,
    /// Direction
    pub kind: ChannelKind,
    /// Data format namespace; the session default (`midi`) when `None`
    pub data_format: Option<String>,
}

impl ChannelOptions {
    /// Options for an input channel.
    pub fn input(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ChannelKind::Input,
            data_format: None,
        }
    }

    /// Options for an output channel.
    pub fn output(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ChannelKind::Output,
            data_format: None,
        }
    }

    /// Use `format` instead of the session default.
    #[must_use]
    pub fn with_data_format(mut self, format: impl Into<String>) -> Self {
        self.data_format = Some(format.into());
        self
    }

    fn validate(&self, data_format: &str) -> Result<()> {
        for (what, value) in [("name", self.name.as_str()), ("data format", data_format)] {
            if value.is_empty() {
                return Err(Error::InvalidChannel(format!("{what} must not be empty")));
            }
            if value.contains('/') {
                return Err(Error::InvalidChannel(format!(
                    "{what} '{value}' must not contain '/'"
                )));
            }
        }
        Ok(())
    }
}

/// State shared between a channel and its subscription tasks.
struct Shared {
    tree: Arc<dyn RemoteTree>,
    name: String,
    data_path: TreePath,
    enabled_path: TreePath,
    metadata_enabled_path: TreePath,
    enabled: AtomicBool,
    last_data: Mutex<Value>,
}

impl Shared {
    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        self.tree
            .set(&self.metadata_enabled_path, Value::Bool(enabled));
        self.tree.set(&self.enabled_path, Value::Bool(enabled));
        tracing::debug!(
            "Channel '{}' {}",
            self.name,
            if enabled { "enabled" } else { "disabled" }
        );
    }

    fn observe_enabled(&self, value: &Value) {
        self.enabled.store(is_truthy(value), Ordering::SeqCst);
    }

    fn last_data(&self) -> MutexGuard<'_, Value> {
        self.last_data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remember `value` as the last good data, if currently enabled.
    fn remember(&self, value: &Value) {
        if self.is_enabled() {
            *self.last_data() = value.clone();
        }
    }

    /// Remember the data of a delivered channel record if the same record
    /// says the channel was enabled.
    fn remember_record(&self, record: &Value) {
        if is_truthy(&record[ENABLED_FIELD]) {
            *self.last_data() = record[DATA_FIELD].clone();
        }
    }
}

/// One input or output data path.
///
/// Obtained from [`Session::channel`](crate::session::Session::channel).
/// Dropping the channel stops its relay, watcher and enable-listener tasks.
pub struct Channel {
    kind: ChannelKind,
    data_format: String,
    metadata_path: TreePath,
    shared: Arc<Shared>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Channel {
    /// Open a channel rooted at `route` (the session's resolved input or
    /// output root) with its flags under the metadata record `metadata`.
    ///
    /// Seeds the last-known data from a one-shot read before installing any
    /// subscription, and returns once the data-side enable flag has been
    /// observed.
    pub(crate) async fn open(
        tree: Arc<dyn RemoteTree>,
        route: &TreePath,
        metadata: &TreePath,
        options: ChannelOptions,
        default_format: &str,
    ) -> Result<Self> {
        let data_format = options
            .data_format
            .clone()
            .unwrap_or_else(|| default_format.to_string());
        options.validate(&data_format)?;

        let channel_path = route.child(&data_format).child(&options.name);
        let metadata_path = metadata
            .child(CHANNELS_FIELD)
            .child(options.kind.as_str())
            .child(&options.name);

        let data_path = channel_path.child(DATA_FIELD);
        let seed = tree.get(&data_path).await;

        let shared = Arc::new(Shared {
            enabled_path: channel_path.child(ENABLED_FIELD),
            metadata_enabled_path: metadata_path.child(ENABLED_FIELD),
            data_path,
            name: options.name,
            enabled: AtomicBool::new(false),
            last_data: Mutex::new(seed),
            tree,
        });

        let mut tasks = Vec::new();

        if options.kind == ChannelKind::Input {
            shared.set_enabled(true);
            let control = shared.tree.subscribe(&shared.metadata_enabled_path);
            tasks.push(tokio::spawn(relay_control(Arc::clone(&shared), control)));
        }

        let mut flag = shared.tree.subscribe(&shared.enabled_path);
        if let Some(value) = flag.next().await {
            shared.observe_enabled(&value);
        }
        tasks.push(tokio::spawn(track_enabled(Arc::clone(&shared), flag)));

        let record = shared.tree.subscribe(&channel_path);
        tasks.push(tokio::spawn(track_record(Arc::clone(&shared), record)));

        tracing::info!(
            "Opened {} channel '{}' at {}",
            options.kind,
            shared.name,
            channel_path
        );

        Ok(Self {
            kind: options.kind,
            data_format,
            metadata_path,
            shared,
            tasks: Mutex::new(tasks),
        })
    }

    /// Channel name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Channel direction.
    #[must_use]
    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Data format namespace.
    #[must_use]
    pub fn data_format(&self) -> &str {
        &self.data_format
    }

    /// Location of the `data` value.
    #[must_use]
    pub fn data_path(&self) -> &TreePath {
        &self.shared.data_path
    }

    /// Location of the data-side `enabled` flag.
    #[must_use]
    pub fn enabled_path(&self) -> &TreePath {
        &self.shared.enabled_path
    }

    /// Location of this channel's metadata record.
    #[must_use]
    pub fn metadata_path(&self) -> &TreePath {
        &self.metadata_path
    }

    /// Enable on both sides.
    pub fn enable(&self) {
        self.shared.set_enabled(true);
    }

    /// Disable on both sides.
    pub fn disable(&self) {
        self.shared.set_enabled(false);
    }

    /// Cached data-side flag. Not a fresh read.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.shared.is_enabled()
    }

    /// Read the current value.
    ///
    /// While disabled this returns the last value seen while enabled (or the
    /// value present when the channel was opened) instead of whatever is
    /// upstream.
    pub async fn get_data(&self) -> Value {
        let fresh = self.shared.tree.get(&self.shared.data_path).await;
        if self.is_enabled() {
            self.shared.remember(&fresh);
            fresh
        } else {
            self.shared.last_data().clone()
        }
    }

    /// Call `callback` with the current value and every change, while enabled.
    ///
    /// Values delivered while the channel is disabled are dropped, not
    /// replayed later.
    pub fn watch<F>(&self, mut callback: F)
    where
        F: FnMut(Value) + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        let mut data = shared.tree.subscribe(&shared.data_path);
        self.spawn(async move {
            while let Some(value) = data.next().await {
                if shared.is_enabled() {
                    callback(value);
                } else {
                    tracing::trace!("Dropped delivery on disabled channel '{}'", shared.name);
                }
            }
        });
    }

    /// Call `callback` on every transition into the enabled state, including
    /// right away if already enabled.
    pub fn on_enable<F>(&self, callback: F)
    where
        F: FnMut() + Send + 'static,
    {
        self.on_transition(true, callback);
    }

    /// Call `callback` on every transition into the disabled state, including
    /// right away if already disabled.
    pub fn on_disable<F>(&self, callback: F)
    where
        F: FnMut() + Send + 'static,
    {
        self.on_transition(false, callback);
    }

    fn on_transition<F>(&self, target: bool, mut callback: F)
    where
        F: FnMut() + Send + 'static,
    {
        let mut flag = self.shared.tree.subscribe(&self.shared.enabled_path);
        self.spawn(async move {
            let mut previous = None;
            while let Some(value) = flag.next().await {
                let enabled = is_truthy(&value);
                if previous != Some(enabled) && enabled == target {
                    callback();
                }
                previous = Some(enabled);
            }
        });
    }

    /// Publish `data`. Dropped with a warning while disabled; check
    /// [`is_enabled`](Self::is_enabled) when delivery matters.
    pub fn set_data(&self, data: impl Into<Value>) {
        if !self.is_enabled() {
            tracing::warn!(
                "Could not set data. Channel '{}' is disabled.",
                self.shared.name
            );
            return;
        }
        let data = data.into();
        self.shared.remember(&data);
        self.shared.tree.set(&self.shared.data_path, data);
    }

    /// Remove every data subscription on this channel's location, including
    /// watchers. Enable listeners are left running.
    pub fn disconnect(&self) {
        tracing::debug!("Disconnecting data watchers of '{}'", self.shared.name);
        self.shared.tree.unsubscribe(&self.shared.data_path);
    }

    /// Have the store delete `data` if this process disconnects ungracefully.
    pub fn remove_on_disconnect(&self) {
        self.shared
            .tree
            .on_disconnect(&self.shared.data_path, DisconnectAction::Remove);
    }

    fn spawn<F>(&self, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task);
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        let tasks = self.tasks.get_mut().unwrap_or_else(PoisonError::into_inner);
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.shared.name)
            .field("kind", &self.kind)
            .field("data_format", &self.data_format)
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}

/// Mirror the operator-controlled metadata flag onto both flags.
async fn relay_control(shared: Arc<Shared>, mut control: Subscription) {
    while let Some(value) = control.next().await {
        shared.set_enabled(is_truthy(&value));
    }
}

async fn track_enabled(shared: Arc<Shared>, mut flag: Subscription) {
    while let Some(value) = flag.next().await {
        shared.observe_enabled(&value);
    }
}

/// Follow the whole channel record so `enabled` and `data` arrive in store
/// order; a value counts as last good only if it was current while enabled.
async fn track_record(shared: Arc<Shared>, mut record: Subscription) {
    while let Some(value) = record.next().await {
        shared.remember_record(&value);
    }
}
