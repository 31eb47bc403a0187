//! Sequencing of a full canvas-to-store sync.
//!
//! One run goes through five phases:
//!
//! 1. load the playbook's records, with their association sets, in one query
//! 2. compute execution orders from the canvas graph
//! 3. upsert every node, building the id map, then sync the saved nodes' associations
//! 4. write each node's upstream dependency list
//! 5. delete orphaned records
//!
//! Phase 4 needs the complete id map, so it only starts once every phase-3
//! task has settled. Phase 5 is independent of phase 4 and runs alongside it.
//! Store failures inside phases 3 to 5 are logged and counted in the
//! [`SyncReport`]; they never abort the run.

use crate::application::concurrency::WorkerLimit;
use crate::application::reconciler::{DeletionOutcome, EntityReconciler, NodeFailure, UpsertOutcome};
use crate::application::relationships::{RelationshipOutcome, RelationshipSynchronizer};
use crate::application::report::SyncReport;
use crate::config::SyncConfig;
use crate::domain::canvas::{CanvasEdge, CanvasNode, NodeId};
use crate::domain::identity::OwnershipIndex;
use crate::domain::ordering::GraphOrderResolver;
use crate::domain::record::{DependencyUpdate, PersistedNodeRecord, PlaybookId, RecordId, RecordPatch, Relation};
use crate::domain::repository::{RecordQuery, StoreClient};
use crate::error::SyncError;
use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// Node that made it through the upsert
struct SavedNode<'a> {
    node: &'a CanvasNode,
    record_id: RecordId,
    /// Loaded record that was updated, `None` for records created in this run
    owner: Option<&'a PersistedNodeRecord>,
    /// Dependency column as loaded
    current_depends_on: Option<String>,
}

#[derive(Default)]
struct LinkOutcome {
    written: usize,
    unchanged: usize,
    failed: Vec<NodeFailure>,
}

/// Keeps the store in line with a canvas
#[derive(Clone)]
pub struct SyncOrchestrator {
    store: Arc<dyn StoreClient>,
    config: SyncConfig,
    limit: WorkerLimit,
    reconciler: EntityReconciler,
    relationships: RelationshipSynchronizer,
}

impl SyncOrchestrator {
    pub fn new(store: Arc<dyn StoreClient>, config: SyncConfig) -> Self {
        let limit = WorkerLimit::new("playbook-sync", config.max_concurrent_upserts);
        Self {
            reconciler: EntityReconciler::new(store.clone(), limit.clone()),
            relationships: RelationshipSynchronizer::new(store.clone()),
            store,
            config,
            limit,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Synchronize one playbook's records with the given canvas.
    ///
    /// Only an invalid configuration or a failed initial load is an error;
    /// reconciling against an unknown store state would duplicate every node.
    #[instrument(
        skip(self, nodes, edges),
        fields(playbook_id = %playbook_id, nodes = nodes.len(), edges = edges.len())
    )]
    pub async fn sync(
        &self,
        playbook_id: &PlaybookId,
        nodes: &[CanvasNode],
        edges: &[CanvasEdge],
    ) -> Result<SyncReport, SyncError> {
        self.config.validate()?;
        let clock = Instant::now();
        let mut report = SyncReport::new(playbook_id.clone(), Utc::now());

        // Phase 1
        let query = RecordQuery::for_playbook(playbook_id).with_expand(Relation::ALL);
        let existing = self.store.query(&query).await.map_err(|e| {
            error!(error = %e, "Failed to load existing node records");
            SyncError::Load(e)
        })?;
        info!(records = existing.len(), "Loaded existing node records");
        let index = OwnershipIndex::build(existing);

        // Phase 2
        let order = GraphOrderResolver::resolve(nodes, edges);
        report.unordered = order.unordered().cloned().collect();
        report.unordered.sort();

        // Phase 3
        let reconciled = self.reconciler.reconcile(playbook_id, nodes, &index, &order).await;
        report.total_nodes = reconciled.attempted();
        report.created = reconciled.created;
        report.updated = reconciled.updated;
        report.failed = reconciled.failed;

        let mut first_occurrence: HashMap<&NodeId, &CanvasNode> = HashMap::with_capacity(nodes.len());
        for node in nodes {
            first_occurrence.entry(&node.id).or_insert(node);
        }
        let saved: Vec<SavedNode<'_>> = reconciled
            .saved
            .iter()
            .filter_map(|(node_id, outcome)| {
                let node = *first_occurrence.get(node_id)?;
                let owner = index.owner(node_id);
                Some(SavedNode {
                    node,
                    record_id: outcome.record_id().clone(),
                    current_depends_on: match outcome {
                        UpsertOutcome::Updated(_) => owner.and_then(|r| r.depends_on.clone()),
                        UpsertOutcome::Created(_) => None,
                    },
                    owner: match outcome {
                        UpsertOutcome::Updated(_) => owner,
                        UpsertOutcome::Created(_) => None,
                    },
                })
            })
            .collect();

        let associations = self
            .limit
            .run_all(saved.iter().map(|entry| self.sync_associations(entry)))
            .await;
        for outcome in &associations {
            report.relationships.merge(outcome);
        }

        let mut id_map: HashMap<NodeId, RecordId> = first_occurrence
            .keys()
            .filter_map(|&node_id| index.owner(node_id).map(|r| (node_id.clone(), r.id.clone())))
            .collect();
        id_map.extend(reconciled.id_map);
        info!(
            created = report.created,
            updated = report.updated,
            failed = report.failed.len(),
            associated = report.relationships.added,
            disassociated = report.relationships.removed,
            "Upsert phase complete"
        );

        // Phases 4 and 5
        let (links, deletion) = tokio::join!(
            self.link_dependencies(&saved, edges, &id_map),
            self.delete_orphans(&reconciled.orphans)
        );

        report.links_written = links.written;
        report.links_unchanged = links.unchanged;
        report.link_failures = links.failed;
        report.deleted = deletion.deleted;
        report.failed_deletions = deletion.failed;
        report.id_map = id_map.into_iter().collect();
        report.elapsed_ms = u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX);

        if report.is_complete() {
            info!(elapsed_ms = report.elapsed_ms, summary = %report.summary(), "Sync complete");
        } else {
            warn!(elapsed_ms = report.elapsed_ms, summary = %report.summary(), "Sync completed with failures");
        }
        Ok(report)
    }

    /// Sync a saved node's associations against the loaded sets.
    ///
    /// A record created in this run starts with empty sets.
    async fn sync_associations(&self, entry: &SavedNode<'_>) -> RelationshipOutcome {
        let empty = BTreeSet::new();
        let mut outcome = RelationshipOutcome::default();
        for relation in Relation::ALL {
            let current = entry.owner.map_or(&empty, |record| record.associated(relation));
            let result = self
                .relationships
                .sync_set(&entry.record_id, relation, relation.desired(entry.node), current)
                .await;
            outcome.merge(&result);
        }
        outcome
    }

    /// Write each saved node's upstream record ids.
    ///
    /// Sources that did not resolve to a record are dropped from the list.
    async fn link_dependencies(
        &self,
        saved: &[SavedNode<'_>],
        edges: &[CanvasEdge],
        id_map: &HashMap<NodeId, RecordId>,
    ) -> LinkOutcome {
        let mut upstream: HashMap<&NodeId, Vec<&NodeId>> = HashMap::new();
        for edge in edges {
            let sources = upstream.entry(&edge.target_node_id).or_default();
            if !sources.contains(&&edge.source_node_id) {
                sources.push(&edge.source_node_id);
            }
        }

        let mut outcome = LinkOutcome::default();
        let mut writes = Vec::new();
        for entry in saved {
            let mut ids = Vec::new();
            for source in upstream.get(&entry.node.id).into_iter().flatten() {
                match id_map.get(*source) {
                    Some(id) => ids.push(id.clone()),
                    None => warn!(
                        node_id = %entry.node.id,
                        source_node_id = %source,
                        "Dropping dependency on node without a record"
                    ),
                }
            }

            let update = DependencyUpdate::from_ids(ids);
            if update.encode() == entry.current_depends_on {
                outcome.unchanged += 1;
                continue;
            }
            writes.push((entry, update));
        }

        let results = self
            .limit
            .run_all(writes.into_iter().map(|(entry, update)| async move {
                let result = self
                    .store
                    .update(&entry.record_id, RecordPatch::dependencies(update))
                    .await;
                (entry, result)
            }))
            .await;

        for (entry, result) in results {
            match result {
                Ok(()) => {
                    debug!(node_id = %entry.node.id, record_id = %entry.record_id, "Dependencies written");
                    outcome.written += 1;
                }
                Err(e) => {
                    error!(
                        node_id = %entry.node.id,
                        record_id = %entry.record_id,
                        error = %e,
                        "Failed to write dependencies"
                    );
                    outcome
                        .failed
                        .push(NodeFailure::new(&entry.node.id, Some(&entry.record_id), &e));
                }
            }
        }

        info!(
            written = outcome.written,
            unchanged = outcome.unchanged,
            failed = outcome.failed.len(),
            "Link phase complete"
        );
        outcome
    }

    async fn delete_orphans(&self, orphans: &[PersistedNodeRecord]) -> DeletionOutcome {
        if orphans.is_empty() {
            return DeletionOutcome::default();
        }
        if !self.config.delete_orphans {
            info!(orphans = orphans.len(), "Orphan deletion disabled; leaving records in place");
            return DeletionOutcome::default();
        }

        let outcome = self.reconciler.delete_records(orphans).await;
        info!(
            deleted = outcome.deleted.len(),
            failed = outcome.failed.len(),
            "Orphan deletion complete"
        );
        outcome
    }
}
