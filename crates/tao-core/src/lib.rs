//! # Tao Core Library
//!
//! `tao-core` lets peers exchange small typed values ("channels", such as
//! MIDI note messages) and track each other's liveness, using a shared
//! remote tree with subscriptions as the only transport. Peers never talk
//! directly: a producer's output channel and a consumer's input channel meet
//! at the same location in the tree.
//!
//! ## Modules
//!
//! - [`channel`] - Enable-gated input and output data paths
//! - [`config`] - Configuration management
//! - [`identity`] - Login triple and its validation
//! - [`presence`] - Liveness metadata and disconnect cleanup
//! - [`session`] - Endpoint bootstrap, route resolution, channel factory
//! - [`status`] - Module status records with a timestamped log
//! - [`tree`] - The remote tree interface and an in-memory implementation
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tao_core::{tree::MemoryTree, ChannelOptions, Identity, Session};
//!
//! let tree = MemoryTree::new();
//! let identity = Identity::new("synth", "https://tao.example.io", "abcdefghij0123456789");
//! let session = Session::start(identity, client, Arc::new(tree.connect()))?;
//!
//! let note = session.channel(ChannelOptions::output("note")).await?;
//! note.enable();
//! note.set_data(60);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::must_use_candidate)]

pub mod channel;
pub mod config;
pub mod error;
pub mod identity;
pub mod presence;
pub mod session;
pub mod status;
pub mod tree;

pub use channel::{Channel, ChannelKind, ChannelOptions};
pub use error::{Error, Result};
pub use identity::Identity;
pub use session::{ClientApi, Session, SessionState};
pub use status::{StatusMessages, StatusReporter};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Data format used when a channel does not name one
pub const DEFAULT_DATA_FORMAT: &str = "midi";

/// Description written for status codes without a mapping
pub const UNKNOWN_STATUS_DESCRIPTION: &str = "Unknown status";
