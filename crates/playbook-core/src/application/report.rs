use crate::application::reconciler::NodeFailure;
use crate::application::relationships::RelationshipOutcome;
use crate::domain::canvas::NodeId;
use crate::domain::record::{PlaybookId, RecordId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What one sync run did to the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub playbook_id: PlaybookId,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,

    /// Distinct canvas nodes submitted
    pub total_nodes: usize,
    pub created: usize,
    pub updated: usize,
    pub failed: Vec<NodeFailure>,
    /// Nodes stored with execution order 0 because of a cycle
    pub unordered: Vec<NodeId>,

    /// Association calls, summed over nodes and relations
    pub relationships: RelationshipOutcome,

    pub links_written: usize,
    pub links_unchanged: usize,
    pub link_failures: Vec<NodeFailure>,

    pub deleted: Vec<RecordId>,
    pub failed_deletions: Vec<RecordId>,

    /// Final canvas id to record id mapping
    pub id_map: BTreeMap<NodeId, RecordId>,
}

impl SyncReport {
    pub(crate) fn new(playbook_id: PlaybookId, started_at: DateTime<Utc>) -> Self {
        Self {
            playbook_id,
            started_at,
            elapsed_ms: 0,
            total_nodes: 0,
            created: 0,
            updated: 0,
            failed: Vec::new(),
            unordered: Vec::new(),
            relationships: RelationshipOutcome::default(),
            links_written: 0,
            links_unchanged: 0,
            link_failures: Vec::new(),
            deleted: Vec::new(),
            failed_deletions: Vec::new(),
            id_map: BTreeMap::new(),
        }
    }

    /// Nodes whose create or update succeeded
    pub fn saved(&self) -> usize {
        self.created + self.updated
    }

    /// Whether every store call of the run succeeded
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
            && self.relationships.failed == 0
            && self.link_failures.is_empty()
            && self.failed_deletions.is_empty()
    }

    /// One-line outcome for the calling layer, e.g. `2 of 3 nodes saved; 1 failed`
    pub fn summary(&self) -> String {
        let mut summary = format!("{} of {} nodes saved", self.saved(), self.total_nodes);
        if !self.failed.is_empty() {
            summary.push_str(&format!("; {} failed", self.failed.len()));
        }
        if self.relationships.failed > 0 {
            summary.push_str(&format!(
                "; {} association {} failed",
                self.relationships.failed,
                plural(self.relationships.failed, "call", "calls")
            ));
        }
        if !self.link_failures.is_empty() {
            summary.push_str(&format!(
                "; {} dependency {} failed",
                self.link_failures.len(),
                plural(self.link_failures.len(), "link", "links")
            ));
        }
        if !self.failed_deletions.is_empty() {
            summary.push_str(&format!(
                "; {} orphaned {} not deleted",
                self.failed_deletions.len(),
                plural(self.failed_deletions.len(), "record", "records")
            ));
        }
        summary
    }
}

fn plural(count: usize, one: &'static str, many: &'static str) -> &'static str {
    if count == 1 {
        one
    } else {
        many
    }
}
