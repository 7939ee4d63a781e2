//! Endpoint identity.
//!
//! An identity is the `{name, url, id}` triple a device logs in with. It is
//! validated once, before the session touches the remote tree, and never
//! changes afterwards.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Minimum length of a device name.
pub const MIN_NAME_LEN: usize = 4;

/// Minimum length of the store URL.
pub const MIN_URL_LEN: usize = 10;

/// Exact length of a device id.
pub const ID_LEN: usize = 20;

/// Field of an [`Identity`], used to report validation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityField {
    /// Display name
    Name,
    /// Store URL
    Url,
    /// Device id
    Id,
}

impl fmt::Display for IdentityField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name => write!(f, "name"),
            Self::Url => write!(f, "url"),
            Self::Id => write!(f, "id"),
        }
    }
}

/// The login triple of a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Display name written to the metadata record
    pub name: String,
    /// URL of the remote tree
    pub url: String,
    /// Device id, names the metadata record
    pub id: String,
}

impl Identity {
    /// Create an identity without validating it.
    pub fn new(name: impl Into<String>, url: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            id: id.into(),
        }
    }

    /// Check every field, in `name`, `url`, `id` order.
    ///
    /// Lengths are counted in characters.
    pub fn validate(&self) -> Result<()> {
        let name_len = self.name.chars().count();
        if name_len < MIN_NAME_LEN {
            return Err(invalid(
                IdentityField::Name,
                format!("expected at least {MIN_NAME_LEN} characters, got {name_len}"),
            ));
        }

        let url_len = self.url.chars().count();
        if url_len < MIN_URL_LEN {
            return Err(invalid(
                IdentityField::Url,
                format!("expected at least {MIN_URL_LEN} characters, got {url_len}"),
            ));
        }

        let id_len = self.id.chars().count();
        if id_len != ID_LEN {
            return Err(invalid(
                IdentityField::Id,
                format!("expected {ID_LEN} characters, got {id_len}"),
            ));
        }

        // The id becomes a path segment.
        if self.id.contains('/') {
            return Err(invalid(IdentityField::Id, "must not contain '/'".into()));
        }

        Ok(())
    }
}

fn invalid(field: IdentityField, reason: String) -> Error {
    Error::InvalidIdentity { field, reason }
}
