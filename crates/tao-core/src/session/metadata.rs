//! The per-endpoint metadata record and the routes it resolves to.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::CHANNELS_ROOT;
use crate::channel::ChannelKind;
use crate::error::{Error, Result};
use crate::tree::{is_truthy, TreePath};

/// Parsed view of `metadata/<id>`.
///
/// Parsing is lenient: the record is written by several parties, so a field
/// of the wrong type reads as absent instead of failing the whole record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    /// Display name
    pub name: Option<String>,
    /// Liveness flag, absent reads as off
    pub is_turned_on: bool,
    /// Route name for input channels
    pub input: Option<String>,
    /// Route name for output channels
    pub output: Option<String>,
    /// Last API call
    pub api: Value,
    /// Channel flags by direction and name
    pub channels: Value,
    /// Status records by module
    pub module_status: Value,
}

impl SessionMetadata {
    /// Parse a metadata snapshot.
    #[must_use]
    pub fn from_snapshot(snapshot: &Value) -> Self {
        let field = |key: &str| snapshot.get(key).cloned().unwrap_or(Value::Null);

        Self {
            name: snapshot.get("name").and_then(Value::as_str).map(str::to_string),
            is_turned_on: is_truthy(&field("isTurnedOn")),
            input: route_name(&field("input")),
            output: route_name(&field("output")),
            api: field("api"),
            channels: field("channels"),
            module_status: field("moduleStatus"),
        }
    }
}

/// Route names may be written as strings or numbers.
fn route_name(value: &Value) -> Option<String> {
    let name = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!name.is_empty() && !name.contains('/')).then_some(name)
}

/// Roots under which a session's channels live.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Routes {
    /// `channels/<input>`
    pub input: Option<TreePath>,
    /// `channels/<output>`
    pub output: Option<TreePath>,
}

impl Routes {
    /// Resolve the routes named in `metadata`.
    #[must_use]
    pub fn resolve(metadata: &SessionMetadata) -> Self {
        let root = TreePath::new(CHANNELS_ROOT);
        Self {
            input: metadata.input.as_ref().map(|name| root.child(name)),
            output: metadata.output.as_ref().map(|name| root.child(name)),
        }
    }

    /// Root for channels of `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RouteUnresolved`] when the metadata named no route for
    /// that direction.
    pub fn root_for(&self, kind: ChannelKind) -> Result<&TreePath> {
        match kind {
            ChannelKind::Input => self.input.as_ref(),
            ChannelKind::Output => self.output.as_ref(),
        }
        .ok_or(Error::RouteUnresolved(kind.as_str()))
    }
}
