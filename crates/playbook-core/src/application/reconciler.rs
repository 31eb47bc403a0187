use crate::application::concurrency::WorkerLimit;
use crate::domain::canvas::{CanvasNode, NodeId};
use crate::domain::identity::OwnershipIndex;
use crate::domain::ordering::ExecutionOrder;
use crate::domain::record::{NewNodeRecord, PersistedNodeRecord, PlaybookId, RecordId, RecordPatch};
use crate::domain::repository::StoreClient;
use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What an upsert did for one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No record owned the node; one was created
    Created(RecordId),
    /// The owning record was refreshed in place
    Updated(RecordId),
}

impl UpsertOutcome {
    /// Record now representing the node
    pub fn record_id(&self) -> &RecordId {
        match self {
            UpsertOutcome::Created(id) | UpsertOutcome::Updated(id) => id,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, UpsertOutcome::Created(_))
    }
}

/// A store call that failed for one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeFailure {
    pub node_id: NodeId,
    /// Record the failed call targeted, when one was known
    pub record_id: Option<RecordId>,
    pub error: String,
}

impl NodeFailure {
    pub fn new(node_id: &NodeId, record_id: Option<&RecordId>, error: &StoreError) -> Self {
        Self {
            node_id: node_id.clone(),
            record_id: record_id.cloned(),
            error: error.to_string(),
        }
    }
}

/// Result of reconciling the desired nodes against the loaded records
#[derive(Debug, Clone, Default)]
pub struct ReconcileOutcome {
    /// Canvas id to record id, for nodes whose upsert succeeded
    pub id_map: HashMap<NodeId, RecordId>,
    pub created: usize,
    pub updated: usize,
    pub failed: Vec<NodeFailure>,
    /// Successful upserts, in canvas order
    pub saved: Vec<(NodeId, UpsertOutcome)>,
    /// Loaded records no desired node owns
    pub orphans: Vec<PersistedNodeRecord>,
}

impl ReconcileOutcome {
    /// Fold the result of one node's upsert
    pub fn record(
        &mut self,
        node_id: &NodeId,
        owner: Option<&RecordId>,
        result: &Result<UpsertOutcome, StoreError>,
    ) {
        match result {
            Ok(outcome) => {
                if outcome.is_created() {
                    self.created += 1;
                } else {
                    self.updated += 1;
                }
                self.id_map.insert(node_id.clone(), outcome.record_id().clone());
                self.saved.push((node_id.clone(), outcome.clone()));
            }
            Err(e) => self.failed.push(NodeFailure::new(node_id, owner, e)),
        }
    }

    /// Nodes processed, saved or not
    pub fn attempted(&self) -> usize {
        self.created + self.updated + self.failed.len()
    }
}

/// Result of an orphan deletion pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeletionOutcome {
    pub deleted: Vec<RecordId>,
    pub failed: Vec<RecordId>,
}

/// First occurrence of every canvas id, in input order
pub fn unique_nodes(nodes: &[CanvasNode]) -> Vec<&CanvasNode> {
    let mut seen = HashSet::with_capacity(nodes.len());
    nodes
        .iter()
        .filter(|&node| {
            let first = seen.insert(&node.id);
            if !first {
                warn!(node_id = %node.id, "Duplicate canvas node id; ignoring repeated node");
            }
            first
        })
        .collect()
}

/// Creates, updates and deletes node records so they match the canvas
#[derive(Clone)]
pub struct EntityReconciler {
    store: Arc<dyn StoreClient>,
    limit: WorkerLimit,
}

impl EntityReconciler {
    pub fn new(store: Arc<dyn StoreClient>, limit: WorkerLimit) -> Self {
        Self { store, limit }
    }

    /// Update the owning record if there is one, create a record otherwise.
    ///
    /// Failures are logged here and returned to the caller unchanged.
    pub async fn upsert_node(
        &self,
        playbook_id: &PlaybookId,
        node: &CanvasNode,
        owner: Option<&PersistedNodeRecord>,
        execution_order: u32,
    ) -> Result<UpsertOutcome, StoreError> {
        match owner {
            Some(record) => {
                let patch = RecordPatch::from_node(node, execution_order);
                match self.store.update(&record.id, patch).await {
                    Ok(()) => {
                        debug!(node_id = %node.id, record_id = %record.id, execution_order, "Updated node record");
                        Ok(UpsertOutcome::Updated(record.id.clone()))
                    }
                    Err(e) => {
                        error!(node_id = %node.id, record_id = %record.id, error = %e, "Failed to update node record");
                        Err(e)
                    }
                }
            }
            None => {
                let new = NewNodeRecord::from_node(playbook_id, node, execution_order);
                match self.store.create(new).await {
                    Ok(id) => {
                        debug!(node_id = %node.id, record_id = %id, execution_order, "Created node record");
                        Ok(UpsertOutcome::Created(id))
                    }
                    Err(e) => {
                        error!(node_id = %node.id, error = %e, "Failed to create node record");
                        Err(e)
                    }
                }
            }
        }
    }

    /// Upsert every desired node and collect the orphans.
    ///
    /// A failed node is left out of the id map; every other node is still
    /// attempted. Repeated canvas ids are processed once.
    pub async fn reconcile(
        &self,
        playbook_id: &PlaybookId,
        desired: &[CanvasNode],
        existing: &OwnershipIndex,
        order: &ExecutionOrder,
    ) -> ReconcileOutcome {
        let nodes = unique_nodes(desired);

        let results = self
            .limit
            .run_all(nodes.iter().map(|node| {
                self.upsert_node(playbook_id, node, existing.owner(&node.id), order.get(&node.id))
            }))
            .await;

        let mut outcome = ReconcileOutcome::default();
        for (node, result) in nodes.iter().zip(&results) {
            let owner = existing.owner(&node.id).map(|r| &r.id);
            outcome.record(&node.id, owner, result);
        }

        let live: HashSet<NodeId> = nodes.iter().map(|node| node.id.clone()).collect();
        outcome.orphans = existing.orphans(&live).into_iter().cloned().collect();

        info!(
            created = outcome.created,
            updated = outcome.updated,
            failed = outcome.failed.len(),
            orphans = outcome.orphans.len(),
            "Reconciled canvas nodes"
        );
        outcome
    }

    /// Delete records, continuing past individual failures
    pub async fn delete_records(&self, records: &[PersistedNodeRecord]) -> DeletionOutcome {
        let results = self
            .limit
            .run_all(records.iter().map(|record| async move {
                let result = self.store.delete(&record.id).await;
                match &result {
                    Ok(()) => debug!(record_id = %record.id, "Deleted orphaned record"),
                    Err(e) => error!(record_id = %record.id, error = %e, "Failed to delete orphaned record"),
                }
                (record.id.clone(), result)
            }))
            .await;

        let mut outcome = DeletionOutcome::default();
        for (id, result) in results {
            match result {
                Ok(()) => outcome.deleted.push(id),
                Err(_) => outcome.failed.push(id),
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::canvas::NodeConfig;
    use crate::domain::ordering::GraphOrderResolver;
    use crate::domain::repository::memory::MemoryStoreClient;
    use crate::domain::repository::RecordQuery;
    use crate::domain::record::Relation;

    fn playbook() -> PlaybookId {
        PlaybookId("pb-1".to_string())
    }

    fn reconciler(store: &Arc<MemoryStoreClient>) -> EntityReconciler {
        EntityReconciler::new(store.clone(), WorkerLimit::new("test", 2))
    }

    async fn load(store: &MemoryStoreClient) -> OwnershipIndex {
        let records = store
            .query(&RecordQuery::for_playbook(&playbook()).with_expand(Relation::ALL))
            .await
            .unwrap();
        OwnershipIndex::build(records)
    }

    #[tokio::test]
    async fn test_creates_then_updates() {
        let store = Arc::new(MemoryStoreClient::new());
        let nodes = vec![
            CanvasNode::new("a", NodeConfig::Start),
            CanvasNode::new("b", NodeConfig::Wait { duration_minutes: 1 }),
        ];
        let order = GraphOrderResolver::resolve(&nodes, &[]);

        let first = reconciler(&store)
            .reconcile(&playbook(), &nodes, &load(&store).await, &order)
            .await;
        assert_eq!(first.created, 2);
        assert_eq!(first.id_map.len(), 2);

        let second = reconciler(&store)
            .reconcile(&playbook(), &nodes, &load(&store).await, &order)
            .await;
        assert_eq!(second.created, 0);
        assert_eq!(second.updated, 2);
        assert_eq!(second.id_map, first.id_map);
        assert!(second.saved.iter().all(|(_, outcome)| !outcome.is_created()));
        assert_eq!(second.saved[0].0, NodeId::from("a"));
        assert!(second.orphans.is_empty());
    }

    #[tokio::test]
    async fn test_failed_node_is_left_out_of_id_map() {
        let store = Arc::new(MemoryStoreClient::new());
        store.fail_creates_for("x");
        let nodes = vec![
            CanvasNode::new("x", NodeConfig::Start),
            CanvasNode::new("y", NodeConfig::Start),
            CanvasNode::new("z", NodeConfig::Start),
        ];
        let order = GraphOrderResolver::resolve(&nodes, &[]);

        let outcome = reconciler(&store)
            .reconcile(&playbook(), &nodes, &OwnershipIndex::default(), &order)
            .await;

        assert_eq!(outcome.created, 2);
        assert_eq!(outcome.attempted(), 3);
        assert_eq!(outcome.saved.len(), 2);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].node_id, NodeId::from("x"));
        assert!(!outcome.id_map.contains_key(&NodeId::from("x")));
        assert!(outcome.id_map.contains_key(&NodeId::from("y")));
        assert!(outcome.id_map.contains_key(&NodeId::from("z")));
        assert_eq!(store.call_counts().create, 3);
    }

    #[tokio::test]
    async fn test_removed_node_becomes_orphan() {
        let store = Arc::new(MemoryStoreClient::new());
        let nodes = vec![
            CanvasNode::new("keep", NodeConfig::Start),
            CanvasNode::new("drop", NodeConfig::Start),
        ];
        let order = GraphOrderResolver::resolve(&nodes, &[]);
        let first = reconciler(&store)
            .reconcile(&playbook(), &nodes, &OwnershipIndex::default(), &order)
            .await;

        let remaining = &nodes[..1];
        let outcome = reconciler(&store)
            .reconcile(&playbook(), remaining, &load(&store).await, &order)
            .await;
        assert_eq!(outcome.orphans.len(), 1);
        assert_eq!(&outcome.orphans[0].id, &first.id_map[&NodeId::from("drop")]);

        let deletion = reconciler(&store).delete_records(&outcome.orphans).await;
        assert_eq!(deletion.deleted.len(), 1);
        assert_eq!(store.records_for(&playbook()).len(), 1);
    }

    #[tokio::test]
    async fn test_delete_failures_do_not_stop_the_rest() {
        let store = Arc::new(MemoryStoreClient::new());
        let nodes = vec![
            CanvasNode::new("a", NodeConfig::Start),
            CanvasNode::new("b", NodeConfig::Start),
        ];
        let order = GraphOrderResolver::resolve(&nodes, &[]);
        let created = reconciler(&store)
            .reconcile(&playbook(), &nodes, &OwnershipIndex::default(), &order)
            .await;
        let a = created.id_map[&NodeId::from("a")].clone();
        store.fail_deletes_for(&a);

        let records = store.records_for(&playbook());
        let deletion = reconciler(&store).delete_records(&records).await;
        assert_eq!(deletion.failed, vec![a]);
        assert_eq!(deletion.deleted.len(), 1);
    }

    #[test]
    fn test_unique_nodes_keeps_first_occurrence() {
        let nodes = vec![
            CanvasNode::new("a", NodeConfig::Start).with_label("first"),
            CanvasNode::new("b", NodeConfig::Start),
            CanvasNode::new("a", NodeConfig::Start).with_label("second"),
        ];
        let unique = unique_nodes(&nodes);
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].data.label, "first");
    }
}
