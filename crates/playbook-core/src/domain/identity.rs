//! Correlation of persisted records back to the canvas nodes that own them.
//!
//! Records carry an explicit `client_ref` column. Records written before that
//! column existed only embed the canvas id inside their payload, so the
//! payload is parsed as a fallback.

use crate::domain::canvas::NodeId;
use crate::domain::record::PersistedNodeRecord;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Reserved payload key holding the originating canvas node id
pub const CORRELATION_KEY: &str = "__canvasNodeId";

/// Read the canvas node id embedded in an opaque payload.
///
/// Returns `None` for unparsable payloads, non-object payloads, a missing key,
/// or a value that is not a non-empty string. Never panics.
pub fn extract_correlation_id(payload: &str) -> Option<NodeId> {
    let value: Value = serde_json::from_str(payload).ok()?;
    match value.get(CORRELATION_KEY)? {
        Value::String(id) if !id.is_empty() => Some(NodeId(id.clone())),
        _ => None,
    }
}

/// Canvas node id owning a record: the `client_ref` column first, the payload second
pub fn correlation_of(record: &PersistedNodeRecord) -> Option<NodeId> {
    match record.client_ref.as_deref() {
        Some(id) if !id.is_empty() => Some(NodeId(id.to_string())),
        _ => extract_correlation_id(&record.payload),
    }
}

/// Lookup from canvas node id to the record that owns it
#[derive(Debug, Default, Clone)]
pub struct OwnershipIndex {
    owners: HashMap<NodeId, PersistedNodeRecord>,
    // Records that lost to an earlier owner of the same node
    duplicates: Vec<PersistedNodeRecord>,
    uncorrelated: Vec<PersistedNodeRecord>,
}

impl OwnershipIndex {
    /// Fold loaded records into the index; the first record per node wins
    pub fn build(records: impl IntoIterator<Item = PersistedNodeRecord>) -> Self {
        let mut index = Self::default();

        for record in records {
            let Some(node_id) = correlation_of(&record) else {
                warn!(
                    record_id = %record.id,
                    "Record carries no correlation id; treating it as unowned"
                );
                index.uncorrelated.push(record);
                continue;
            };

            if index.owners.contains_key(&node_id) {
                warn!(
                    record_id = %record.id,
                    node_id = %node_id,
                    "Duplicate record for canvas node; keeping the first one"
                );
                index.duplicates.push(record);
            } else {
                index.owners.insert(node_id, record);
            }
        }

        debug!(
            owners = index.owners.len(),
            duplicates = index.duplicates.len(),
            uncorrelated = index.uncorrelated.len(),
            "Ownership index built"
        );
        index
    }

    /// Record owning a canvas node, if any
    #[inline]
    pub fn owner(&self, node_id: &NodeId) -> Option<&PersistedNodeRecord> {
        self.owners.get(node_id)
    }

    /// Number of nodes with an owning record
    #[inline]
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    /// Whether no record was correlated
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    /// Iterate over `(node id, owning record)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &PersistedNodeRecord)> {
        self.owners.iter()
    }

    /// Records no live node owns: owners of removed nodes, duplicates and
    /// records whose correlation could not be read
    pub fn orphans(&self, live: &HashSet<NodeId>) -> Vec<&PersistedNodeRecord> {
        let mut orphans: Vec<&PersistedNodeRecord> = self
            .owners
            .iter()
            .filter(|(node_id, _)| !live.contains(*node_id))
            .map(|(_, record)| record)
            .collect();
        orphans.extend(self.duplicates.iter());
        orphans.extend(self.uncorrelated.iter());
        orphans.sort_by(|a, b| a.id.cmp(&b.id));
        orphans
    }
}
