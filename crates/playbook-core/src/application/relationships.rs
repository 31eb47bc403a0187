use crate::domain::record::{RecordId, Relation};
use crate::domain::repository::StoreClient;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Edit script turning one id set into another
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetDiff {
    pub to_add: Vec<String>,
    pub to_remove: Vec<String>,
}

impl SetDiff {
    /// Whether the two sets were already equal
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }

    /// Number of association calls the diff needs
    pub fn len(&self) -> usize {
        self.to_add.len() + self.to_remove.len()
    }
}

/// `desired - current` to add, `current - desired` to remove
pub fn diff_sets(desired: &BTreeSet<String>, current: &BTreeSet<String>) -> SetDiff {
    SetDiff {
        to_add: desired.difference(current).cloned().collect(),
        to_remove: current.difference(desired).cloned().collect(),
    }
}

/// Calls issued for one relation of one record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipOutcome {
    pub added: usize,
    pub removed: usize,
    pub failed: usize,
}

impl RelationshipOutcome {
    /// Fold another outcome into this one
    pub fn merge(&mut self, other: &RelationshipOutcome) {
        self.added += other.added;
        self.removed += other.removed;
        self.failed += other.failed;
    }
}

/// Brings the associations of a record in line with the canvas
#[derive(Clone)]
pub struct RelationshipSynchronizer {
    store: Arc<dyn StoreClient>,
}

impl RelationshipSynchronizer {
    pub fn new(store: Arc<dyn StoreClient>) -> Self {
        Self { store }
    }

    /// Issue one associate per missing id and one disassociate per extra id.
    ///
    /// Ids in both sets cause no call. Every call is attempted even when an
    /// earlier one failed.
    pub async fn sync_set(
        &self,
        record_id: &RecordId,
        relation: Relation,
        desired: &BTreeSet<String>,
        current: &BTreeSet<String>,
    ) -> RelationshipOutcome {
        let diff = diff_sets(desired, current);
        let mut outcome = RelationshipOutcome::default();
        if diff.is_empty() {
            return outcome;
        }

        for related_id in &diff.to_add {
            match self.store.associate(record_id, relation, related_id).await {
                Ok(()) => {
                    debug!(record_id = %record_id, relation = %relation, related_id = %related_id, "Associated");
                    outcome.added += 1;
                }
                Err(e) => {
                    warn!(
                        record_id = %record_id,
                        relation = %relation,
                        related_id = %related_id,
                        error = %e,
                        "Failed to associate"
                    );
                    outcome.failed += 1;
                }
            }
        }

        for related_id in &diff.to_remove {
            match self.store.disassociate(record_id, relation, related_id).await {
                Ok(()) => {
                    debug!(record_id = %record_id, relation = %relation, related_id = %related_id, "Disassociated");
                    outcome.removed += 1;
                }
                Err(e) => {
                    warn!(
                        record_id = %record_id,
                        relation = %relation,
                        related_id = %related_id,
                        error = %e,
                        "Failed to disassociate"
                    );
                    outcome.failed += 1;
                }
            }
        }

        outcome
    }
}
