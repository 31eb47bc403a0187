//! OData-style REST backend for the Playbook sync engine.
//!
//! Node records live in one entity set; skills and knowledge sources are
//! many-to-many navigations edited through `$ref` endpoints.

pub mod client;
pub mod config;
mod mapping;

pub use client::ODataStoreClient;
pub use config::{ConfigError, NodeFields, ODataStoreConfig, RelationEndpoint};
