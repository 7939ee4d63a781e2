//! Module status reporting.
//!
//! Each named module owns a record under `moduleStatus/<module>` in the
//! session metadata:
//!
//! | Field | Content |
//! |-------|---------|
//! | `status` | Last status code |
//! | `statusDescription` | Human description of the code, or `Unknown status` |
//! | `statusLog/<timestamp>` | Every status set, keyed by RFC 3339 UTC timestamp |
//!
//! Reporters are write-only.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde_json::Value;

use crate::tree::{is_truthy, RemoteTree, TreePath};

/// Status code to description mapping.
pub type StatusMessages = HashMap<String, String>;

/// Metadata subtree holding every module's status record.
pub const MODULE_STATUS_FIELD: &str = "moduleStatus";

/// Settings for a [`StatusReporter`].
#[derive(Debug, Clone)]
pub struct StatusOptions {
    /// Descriptions keyed by status code
    pub status_messages: StatusMessages,
    /// Append every status to `statusLog`
    pub log_enabled: bool,
    /// Description written for codes missing from `status_messages`
    pub unknown_description: String,
}

impl Default for StatusOptions {
    fn default() -> Self {
        Self {
            status_messages: StatusMessages::new(),
            log_enabled: true,
            unknown_description: crate::UNKNOWN_STATUS_DESCRIPTION.to_string(),
        }
    }
}

impl StatusOptions {
    /// Use `messages` as descriptions.
    #[must_use]
    pub fn with_messages(mut self, messages: StatusMessages) -> Self {
        self.status_messages = messages;
        self
    }

    /// Turn the status log on or off.
    #[must_use]
    pub fn with_log(mut self, enabled: bool) -> Self {
        self.log_enabled = enabled;
        self
    }
}

/// Writes a module's status into the session metadata.
#[derive(Clone)]
pub struct StatusReporter {
    tree: Arc<dyn RemoteTree>,
    module: String,
    path: TreePath,
    options: StatusOptions,
}

impl StatusReporter {
    /// Create a reporter for `module` under the metadata record at `metadata`.
    pub fn new(
        tree: Arc<dyn RemoteTree>,
        metadata: &TreePath,
        module: impl Into<String>,
        options: StatusOptions,
    ) -> Self {
        let module = module.into();
        let path = metadata.child(MODULE_STATUS_FIELD).child(&module);
        Self {
            tree,
            module,
            path,
            options,
        }
    }

    /// Module name.
    #[must_use]
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Location of this module's status record.
    #[must_use]
    pub fn path(&self) -> &TreePath {
        &self.path
    }

    /// Record `status`. Falsy statuses are ignored.
    pub fn set(&self, status: impl Into<Value>) {
        let status = status.into();
        if !is_truthy(&status) {
            return;
        }

        let description = self
            .options
            .status_messages
            .get(&status_key(&status))
            .unwrap_or(&self.options.unknown_description);

        tracing::debug!("Status of '{}' is now {} ({})", self.module, status, description);

        self.tree.set(&self.path.child("status"), status.clone());
        self.tree.set(
            &self.path.child("statusDescription"),
            Value::from(description.as_str()),
        );

        if self.options.log_enabled {
            self.log(status);
        }
    }

    fn log(&self, status: Value) {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true);
        self.tree
            .set(&self.path.child("statusLog").child(timestamp), status);
    }
}

impl std::fmt::Debug for StatusReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusReporter")
            .field("module", &self.module)
            .field("path", &self.path)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Lookup key for a status code: strings as-is, anything else as JSON text.
fn status_key(status: &Value) -> String {
    match status {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
