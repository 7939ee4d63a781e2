//! Sessions: one endpoint's presence in the remote tree.
//!
//! Starting a session:
//!
//! 1. validates the [`Identity`] (nothing is written when it is invalid),
//! 2. announces presence under `metadata/<id>` and registers cleanup of the
//!    liveness flag,
//! 3. reads the metadata record once to resolve the endpoint's `input` and
//!    `output` routes, moving from [`SessionState::Pending`] to
//!    [`SessionState::Ready`] and running the ready callbacks,
//! 4. listens to `metadata/<id>/api` for the lifetime of the session and
//!    forwards every value to the [`ClientApi`].
//!
//! Channels can only be opened against a ready session; [`Session::channel`]
//! waits for the transition.
//!
//! ## Example
//!
//! ```rust,ignore
//! use tao_core::{ChannelOptions, Identity, Session};
//!
//! let identity = Identity::new("synth", "https://tao.example.io", "abcdefghij0123456789");
//! let session = Session::start(identity, client, tree)?;
//!
//! let note = session.channel(ChannelOptions::output("note")).await?;
//! note.enable();
//! note.set_data(60);
//! ```

use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::channel::{Channel, ChannelOptions};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::identity::Identity;
use crate::presence::PresenceTracker;
use crate::status::{StatusMessages, StatusOptions, StatusReporter};
use crate::tree::{is_truthy, RemoteTree, TreePath};

mod metadata;

pub use metadata::{Routes, SessionMetadata};

/// Root of every endpoint's metadata record.
pub const METADATA_ROOT: &str = "metadata";

/// Root of every route.
pub const CHANNELS_ROOT: &str = "channels";

/// Metadata field the operator writes API calls into.
pub const API_FIELD: &str = "api";

/// Module name of the session's own status record.
pub const SESSION_MODULE: &str = "tao";

/// Capabilities the embedding application provides.
pub trait ClientApi: Send + Sync {
    /// Module name used for the client's status record.
    fn name(&self) -> &str;

    /// Descriptions for the status codes the client reports.
    fn status_messages(&self) -> StatusMessages {
        StatusMessages::new()
    }

    /// Handle a value written to the session's `api` field.
    fn api(&self, api_path: &TreePath, value: &Value);
}

/// Lifecycle of a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    /// Metadata not read yet
    Pending,
    /// Routes resolved
    Ready {
        /// Resolved input and output roots
        routes: Routes,
        /// Metadata record as read at resolution
        snapshot: Value,
    },
    /// Closed; no further channels can be opened
    Closed,
}

type ReadyCallback = Box<dyn FnOnce(&Value) + Send>;

/// Ready callbacks and the snapshot they were (or will be) called with.
#[derive(Default)]
struct ReadyHook {
    callbacks: Vec<ReadyCallback>,
    fired: Option<Value>,
}

/// One endpoint connected to the remote tree.
pub struct Session {
    identity: Identity,
    tree: Arc<dyn RemoteTree>,
    metadata_path: TreePath,
    presence: PresenceTracker,
    status: StatusReporter,
    config: Config,
    state: Arc<watch::Sender<SessionState>>,
    ready_hook: Arc<Mutex<ReadyHook>>,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl Session {
    /// Start a session with default configuration.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidIdentity`] when the identity fails validation;
    /// nothing is written to the tree in that case.
    pub fn start(
        identity: Identity,
        client: Arc<dyn ClientApi>,
        tree: Arc<dyn RemoteTree>,
    ) -> Result<Self> {
        Self::start_with_config(identity, client, tree, Config::default())
    }

    /// Start a session using the identity and defaults from `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured identity is missing or invalid.
    pub fn from_config(
        config: Config,
        client: Arc<dyn ClientApi>,
        tree: Arc<dyn RemoteTree>,
    ) -> Result<Self> {
        let identity = config.identity().inspect_err(|e| {
            tracing::error!("*** Tao has encountered an error: {} ***", e);
        })?;
        Self::start_with_config(identity, client, tree, config)
    }

    /// Start a session with explicit configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidIdentity`] when the identity fails validation.
    pub fn start_with_config(
        identity: Identity,
        client: Arc<dyn ClientApi>,
        tree: Arc<dyn RemoteTree>,
        config: Config,
    ) -> Result<Self> {
        identity.validate().inspect_err(|e| {
            tracing::error!("*** Tao has encountered an error: {} ***", e);
        })?;

        let metadata_path = TreePath::new(METADATA_ROOT).child(&identity.id);

        let client_status = StatusReporter::new(
            Arc::clone(&tree),
            &metadata_path,
            client.name(),
            status_options(&config, client.status_messages()),
        );

        let status = StatusReporter::new(
            Arc::clone(&tree),
            &metadata_path,
            SESSION_MODULE,
            status_options(&config, StatusMessages::new()),
        );

        let presence = PresenceTracker::new(Arc::clone(&tree), metadata_path.clone());
        presence.announce(&identity.name);

        let (state, _) = watch::channel(SessionState::Pending);
        let state = Arc::new(state);
        let ready_hook = Arc::new(Mutex::new(ReadyHook::default()));
        let (shutdown_tx, _) = broadcast::channel(1);

        let resolve = tokio::spawn(resolve_metadata(
            Arc::clone(&tree),
            metadata_path.clone(),
            Arc::clone(&state),
            Arc::clone(&ready_hook),
            shutdown_tx.subscribe(),
        ));

        let api = tokio::spawn(listen_api(
            Arc::clone(&tree),
            metadata_path.child(API_FIELD),
            client,
            client_status,
            shutdown_tx.subscribe(),
        ));

        tracing::info!(
            "Session '{}' started against {} at {}",
            identity.name,
            identity.url,
            metadata_path
        );

        Ok(Self {
            identity,
            tree,
            metadata_path,
            presence,
            status,
            config,
            state,
            ready_hook,
            shutdown_tx,
            tasks: vec![resolve, api],
        })
    }

    /// The identity this session logged in with.
    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Location of this endpoint's metadata record.
    #[must_use]
    pub fn metadata_path(&self) -> &TreePath {
        &self.metadata_path
    }

    /// Liveness tracker for this endpoint.
    #[must_use]
    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    /// Status reporter for the session itself, under `moduleStatus/tao`.
    ///
    /// Nothing is written until the caller sets a status.
    #[must_use]
    pub fn session_status(&self) -> &StatusReporter {
        &self.status
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Whether routes have been resolved.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(*self.state.borrow(), SessionState::Ready { .. })
    }

    /// Read the full metadata record once.
    pub async fn metadata(&self) -> Value {
        self.tree.get(&self.metadata_path).await
    }

    /// Read the metadata record once, parsed.
    pub async fn metadata_record(&self) -> SessionMetadata {
        SessionMetadata::from_snapshot(&self.metadata().await)
    }

    /// Run `callback` with the metadata snapshot once the session is ready.
    ///
    /// Runs immediately if the session is already ready, and never if it is
    /// closed first.
    pub fn on_ready<F>(&self, callback: F)
    where
        F: FnOnce(&Value) + Send + 'static,
    {
        let mut hook = self
            .ready_hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match hook.fired.clone() {
            Some(snapshot) => {
                drop(hook);
                callback(&snapshot);
            }
            None => hook.callbacks.push(Box::new(callback)),
        }
    }

    /// Wait until routes are resolved.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the session closes first.
    pub async fn ready(&self) -> Result<Routes> {
        let mut rx = self.state.subscribe();
        let state = rx
            .wait_for(|state| !matches!(state, SessionState::Pending))
            .await
            .map_err(|_| Error::SessionClosed)?;

        match &*state {
            SessionState::Ready { routes, .. } => Ok(routes.clone()),
            _ => Err(Error::SessionClosed),
        }
    }

    /// Open a channel, waiting for the session to become ready.
    ///
    /// # Errors
    ///
    /// Returns an error if the session closes first, the route for the
    /// channel's direction is missing from the metadata, or the options are
    /// invalid.
    pub async fn channel(&self, options: ChannelOptions) -> Result<Channel> {
        let routes = self.ready().await?;
        let route = routes.root_for(options.kind)?;
        Channel::open(
            Arc::clone(&self.tree),
            route,
            &self.metadata_path,
            options,
            &self.config.channels.default_data_format,
        )
        .await
    }

    /// Shorthand for an input channel in the default format.
    ///
    /// # Errors
    ///
    /// See [`channel`](Self::channel).
    pub async fn input(&self, name: &str) -> Result<Channel> {
        self.channel(ChannelOptions::input(name)).await
    }

    /// Shorthand for an output channel in the default format.
    ///
    /// # Errors
    ///
    /// See [`channel`](Self::channel).
    pub async fn output(&self, name: &str) -> Result<Channel> {
        self.channel(ChannelOptions::output(name)).await
    }

    /// Create a status reporter for `module` in this session's metadata.
    pub fn status(&self, module: &str, messages: StatusMessages) -> StatusReporter {
        StatusReporter::new(
            Arc::clone(&self.tree),
            &self.metadata_path,
            module,
            status_options(&self.config, messages),
        )
    }

    /// Stop the metadata resolver and the API listener and move to
    /// [`SessionState::Closed`].
    ///
    /// Channels already opened keep working; new ones are refused. Remote
    /// state is left as is; the liveness flag is cleared by the store when
    /// the connection itself goes away.
    pub fn close(&self) {
        let _ = self.shutdown_tx.send(());
        self.state.send_if_modified(|state| {
            if matches!(state, SessionState::Closed) {
                false
            } else {
                *state = SessionState::Closed;
                true
            }
        });
        tracing::info!("Session '{}' closed", self.identity.name);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.identity)
            .field("metadata_path", &self.metadata_path)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

fn status_options(config: &Config, messages: StatusMessages) -> StatusOptions {
    StatusOptions {
        status_messages: messages,
        log_enabled: config.status.log_enabled,
        unknown_description: config.status.unknown_description.clone(),
    }
}

/// One-shot metadata read that moves the session to `Ready`.
async fn resolve_metadata(
    tree: Arc<dyn RemoteTree>,
    metadata_path: TreePath,
    state: Arc<watch::Sender<SessionState>>,
    ready_hook: Arc<Mutex<ReadyHook>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let snapshot = tokio::select! {
        biased;
        _ = shutdown_rx.recv() => {
            tracing::debug!("Session closed before metadata arrived");
            return;
        }
        snapshot = tree.get(&metadata_path) => snapshot,
    };

    let record = SessionMetadata::from_snapshot(&snapshot);
    let routes = Routes::resolve(&record);
    if routes.input.is_none() {
        tracing::warn!("Metadata at {} names no input route", metadata_path);
    }
    if routes.output.is_none() {
        tracing::warn!("Metadata at {} names no output route", metadata_path);
    }

    let callbacks = {
        let mut hook = ready_hook.lock().unwrap_or_else(PoisonError::into_inner);
        let became_ready = state.send_if_modified(|state| {
            if !matches!(state, SessionState::Pending) {
                return false;
            }
            *state = SessionState::Ready {
                routes,
                snapshot: snapshot.clone(),
            };
            true
        });
        if !became_ready {
            tracing::debug!("Session closed while metadata was resolving");
            return;
        }
        hook.fired = Some(snapshot.clone());
        std::mem::take(&mut hook.callbacks)
    };

    tracing::info!("Session at {} is ready", metadata_path);

    for callback in callbacks {
        callback(&snapshot);
    }
}

/// Forward every truthy `api` value to the client for the session lifetime.
async fn listen_api(
    tree: Arc<dyn RemoteTree>,
    api_path: TreePath,
    client: Arc<dyn ClientApi>,
    status: StatusReporter,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut calls = tree.subscribe(&api_path);
    loop {
        tokio::select! {
            call = calls.next() => {
                let Some(value) = call else {
                    tracing::debug!("API subscription at {} ended", api_path);
                    break;
                };
                if is_truthy(&value) {
                    tracing::debug!("API call for '{}': {}", client.name(), value);
                    client.api(&api_path, &value);
                    status.set(value);
                }
            }
            _ = shutdown_rx.recv() => {
                tracing::debug!("API listener received shutdown signal");
                break;
            }
        }
    }
}
