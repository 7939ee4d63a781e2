//! Error types for Tao.
//!
//! Most of the synchronization protocol deliberately does not fail: writes to
//! a disabled channel and deliveries while disabled are dropped and logged.
//! The variants here cover the few conditions that are reported to callers.

use thiserror::Error;

use crate::identity::IdentityField;

/// A specialized `Result` type for Tao operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Tao.
#[derive(Error, Debug)]
pub enum Error {
    /// Identity failed validation before any remote interaction (T001)
    #[error("invalid identity {field}: {reason}")]
    InvalidIdentity {
        /// The offending identity field
        field: IdentityField,
        /// Why it was rejected
        reason: String,
    },

    /// Session metadata did not name a route for this direction (T002)
    #[error("session metadata has no '{0}' route")]
    RouteUnresolved(&'static str),

    /// Session was closed before it became ready (T003)
    #[error("session closed before metadata was resolved")]
    SessionClosed,

    /// Invalid channel options
    #[error("invalid channel options: {0}")]
    InvalidChannel(String),

    /// Configuration file error
    #[error("configuration error: {0}")]
    ConfigError(String),
}

impl Error {
    /// Returns the error code associated with this error, if any.
    ///
    /// Error codes follow the pattern TXXX where XXX is a 3-digit number.
    #[must_use]
    pub const fn code(&self) -> Option<&'static str> {
        match self {
            Self::InvalidIdentity { .. } => Some("T001"),
            Self::RouteUnresolved(_) => Some("T002"),
            Self::SessionClosed => Some("T003"),
            _ => None,
        }
    }

    /// Returns a helpful suggestion for resolving the error, if applicable.
    #[must_use]
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::InvalidIdentity { .. } => Some(
                "Check the login triple: name needs at least 4 characters,\n\
                 url at least 10 characters and id exactly 20 characters.",
            ),
            Self::RouteUnresolved(_) => Some(
                "Ask the operator to set the 'input' and 'output' fields\n\
                 of this device's metadata record before opening channels.",
            ),
            _ => None,
        }
    }
}
