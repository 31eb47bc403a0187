//! Playbook sync engine
//!
//! Keeps the node records of a remote store in line with the canvas graph of
//! the playbook editor: execution orders from a topological sort, records
//! matched to canvas nodes by correlation id, minimal association edits and a
//! second pass that links dependencies once every record id is known.

#![forbid(unsafe_code)]

pub mod application;
pub mod config;
pub mod domain;
pub mod error;

pub use application::{SyncOrchestrator, SyncReport};
pub use config::SyncConfig;
pub use domain::canvas::{CanvasDocument, CanvasEdge, CanvasNode, NodeConfig, NodeId, NodeKind};
pub use domain::record::{PersistedNodeRecord, PlaybookId, RecordId, Relation};
pub use domain::repository::{RecordQuery, StoreClient};
pub use error::{StoreError, StoreResult, SyncError};

#[cfg(feature = "testing")]
pub use domain::repository::memory::MemoryStoreClient;
