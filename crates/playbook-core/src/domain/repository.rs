//! Store client trait for the Playbook sync engine
//!
//! The engine only needs a narrow CRUD surface over node records plus
//! association calls. External crates implement [`StoreClient`] for a
//! concrete backend.

use async_trait::async_trait;

use super::record::{NewNodeRecord, PersistedNodeRecord, PlaybookId, RecordId, RecordPatch, Relation};
use crate::error::StoreResult;

/// Filtered read of the node records belonging to one playbook
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordQuery {
    /// Container whose records are loaded
    pub playbook_id: PlaybookId,
    /// Extra backend filter appended to the container filter
    pub filter: Option<String>,
    /// Columns to read; empty means the backend default
    pub select: Vec<String>,
    /// Relations whose current members are loaded in the same call
    pub expand: Vec<Relation>,
}

impl RecordQuery {
    /// All records of a playbook
    pub fn for_playbook(playbook_id: &PlaybookId) -> Self {
        Self {
            playbook_id: playbook_id.clone(),
            filter: None,
            select: Vec::new(),
            expand: Vec::new(),
        }
    }

    /// Also load the members of these relations
    pub fn with_expand(mut self, relations: impl IntoIterator<Item = Relation>) -> Self {
        self.expand.extend(relations);
        self
    }

    /// Restrict the columns read
    pub fn with_select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select.extend(columns.into_iter().map(Into::into));
        self
    }

    /// Add a backend filter expression
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }
}

/// Remote store holding persisted node records.
///
/// Every call is independently failable and there is no transaction across
/// calls.
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Load the records matching a query, with expanded relation members
    async fn query(&self, query: &RecordQuery) -> StoreResult<Vec<PersistedNodeRecord>>;

    /// Create a record and return its store-assigned id
    async fn create(&self, record: NewNodeRecord) -> StoreResult<RecordId>;

    /// Apply a partial update
    async fn update(&self, id: &RecordId, patch: RecordPatch) -> StoreResult<()>;

    /// Delete a record
    async fn delete(&self, id: &RecordId) -> StoreResult<()>;

    /// Add `related_id` to a relation of the record
    async fn associate(&self, id: &RecordId, relation: Relation, related_id: &str) -> StoreResult<()>;

    /// Remove `related_id` from a relation of the record
    async fn disassociate(
        &self,
        id: &RecordId,
        relation: Relation,
        related_id: &str,
    ) -> StoreResult<()>;
}

/// Memory implementation for testing
#[cfg(feature = "testing")]
pub mod memory {
    use super::*;
    use crate::domain::record::NodeAttributes;
    use crate::error::StoreError;
    use dashmap::{DashMap, DashSet};
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
    use tracing::debug;
    use uuid::Uuid;

    #[derive(Debug, Clone)]
    struct StoredRecord {
        seq: u64,
        playbook_id: PlaybookId,
        record: PersistedNodeRecord,
        attributes: Option<NodeAttributes>,
    }

    /// Number of calls issued per operation
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct CallCounts {
        pub query: usize,
        pub create: usize,
        pub update: usize,
        pub delete: usize,
        pub associate: usize,
        pub disassociate: usize,
    }

    #[derive(Debug, Default)]
    struct Counters {
        query: AtomicUsize,
        create: AtomicUsize,
        update: AtomicUsize,
        delete: AtomicUsize,
        associate: AtomicUsize,
        disassociate: AtomicUsize,
    }

    /// In-memory store client with call counting and failure injection
    #[derive(Debug, Default)]
    pub struct MemoryStoreClient {
        records: DashMap<String, StoredRecord>,
        next_seq: AtomicU64,
        counters: Counters,
        failing_creates: DashSet<String>,
        failing_updates: DashSet<String>,
        failing_deletes: DashSet<String>,
        failing_associations: DashSet<(Relation, String)>,
        fail_queries: AtomicBool,
    }

    impl MemoryStoreClient {
        /// Create an empty store
        pub fn new() -> Self {
            Self::default()
        }

        /// Insert a record as-is, bypassing `create` (legacy or corrupted rows)
        pub fn seed(&self, playbook_id: &PlaybookId, record: PersistedNodeRecord) {
            let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
            self.records.insert(
                record.id.0.clone(),
                StoredRecord {
                    seq,
                    playbook_id: playbook_id.clone(),
                    record,
                    attributes: None,
                },
            );
        }

        /// Make `create` fail for records correlated to this canvas id
        pub fn fail_creates_for(&self, client_ref: &str) {
            self.failing_creates.insert(client_ref.to_string());
        }

        /// Make `update` fail for this record
        pub fn fail_updates_for(&self, id: &RecordId) {
            self.failing_updates.insert(id.0.clone());
        }

        /// Make `delete` fail for this record
        pub fn fail_deletes_for(&self, id: &RecordId) {
            self.failing_deletes.insert(id.0.clone());
        }

        /// Make associate/disassociate of one related id fail
        pub fn fail_associations_for(&self, relation: Relation, related_id: &str) {
            self.failing_associations
                .insert((relation, related_id.to_string()));
        }

        /// Make every `query` fail
        pub fn fail_queries(&self) {
            self.fail_queries.store(true, Ordering::SeqCst);
        }

        /// Remove all injected failures
        pub fn clear_failures(&self) {
            self.failing_creates.clear();
            self.failing_updates.clear();
            self.failing_deletes.clear();
            self.failing_associations.clear();
            self.fail_queries.store(false, Ordering::SeqCst);
        }

        /// Calls issued so far
        pub fn call_counts(&self) -> CallCounts {
            CallCounts {
                query: self.counters.query.load(Ordering::SeqCst),
                create: self.counters.create.load(Ordering::SeqCst),
                update: self.counters.update.load(Ordering::SeqCst),
                delete: self.counters.delete.load(Ordering::SeqCst),
                associate: self.counters.associate.load(Ordering::SeqCst),
                disassociate: self.counters.disassociate.load(Ordering::SeqCst),
            }
        }

        /// Reset call counters, keeping data
        pub fn reset_counts(&self) {
            self.counters.query.store(0, Ordering::SeqCst);
            self.counters.create.store(0, Ordering::SeqCst);
            self.counters.update.store(0, Ordering::SeqCst);
            self.counters.delete.store(0, Ordering::SeqCst);
            self.counters.associate.store(0, Ordering::SeqCst);
            self.counters.disassociate.store(0, Ordering::SeqCst);
        }

        /// Record by id
        pub fn get(&self, id: &RecordId) -> Option<PersistedNodeRecord> {
            self.records.get(&id.0).map(|stored| stored.record.clone())
        }

        /// Columns last written for a record
        pub fn attributes(&self, id: &RecordId) -> Option<NodeAttributes> {
            self.records
                .get(&id.0)
                .and_then(|stored| stored.attributes.clone())
        }

        /// Records of a playbook, in insertion order
        pub fn records_for(&self, playbook_id: &PlaybookId) -> Vec<PersistedNodeRecord> {
            let mut stored: Vec<StoredRecord> = self
                .records
                .iter()
                .filter(|entry| entry.value().playbook_id == *playbook_id)
                .map(|entry| entry.value().clone())
                .collect();
            stored.sort_by_key(|s| s.seq);
            stored.into_iter().map(|s| s.record).collect()
        }

        /// Record correlated to a canvas id through its `client_ref`
        pub fn find_by_client_ref(&self, client_ref: &str) -> Option<PersistedNodeRecord> {
            self.records
                .iter()
                .find(|entry| entry.value().record.client_ref.as_deref() == Some(client_ref))
                .map(|entry| entry.value().record.clone())
        }

        fn check_association(&self, relation: Relation, related_id: &str) -> StoreResult<()> {
            if self
                .failing_associations
                .contains(&(relation, related_id.to_string()))
            {
                return Err(StoreError::Rejected(format!(
                    "injected {} association failure for {}",
                    relation, related_id
                )));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl StoreClient for MemoryStoreClient {
        async fn query(&self, query: &RecordQuery) -> StoreResult<Vec<PersistedNodeRecord>> {
            self.counters.query.fetch_add(1, Ordering::SeqCst);
            if self.fail_queries.load(Ordering::SeqCst) {
                return Err(StoreError::Transport("injected query failure".to_string()));
            }

            let records = self
                .records_for(&query.playbook_id)
                .into_iter()
                .map(|mut record| {
                    for relation in Relation::ALL {
                        if !query.expand.contains(&relation) {
                            record.associated_mut(relation).clear();
                        }
                    }
                    record
                })
                .collect();
            Ok(records)
        }

        async fn create(&self, new: NewNodeRecord) -> StoreResult<RecordId> {
            self.counters.create.fetch_add(1, Ordering::SeqCst);
            if self.failing_creates.contains(&new.client_ref) {
                return Err(StoreError::Rejected(format!(
                    "injected create failure for {}",
                    new.client_ref
                )));
            }

            let id = RecordId(Uuid::new_v4().to_string());
            let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
            let record = PersistedNodeRecord {
                id: id.clone(),
                execution_order: new.execution_order,
                payload: new.payload,
                client_ref: Some(new.client_ref),
                skill_ids: BTreeSet::new(),
                knowledge_ids: BTreeSet::new(),
                depends_on: None,
            };
            self.records.insert(
                id.0.clone(),
                StoredRecord {
                    seq,
                    playbook_id: new.playbook_id,
                    record,
                    attributes: Some(new.attributes),
                },
            );
            debug!(record_id = %id, "Memory store created record");
            Ok(id)
        }

        async fn update(&self, id: &RecordId, patch: RecordPatch) -> StoreResult<()> {
            self.counters.update.fetch_add(1, Ordering::SeqCst);
            if self.failing_updates.contains(&id.0) {
                return Err(StoreError::Rejected(format!("injected update failure for {}", id)));
            }

            let mut stored = self
                .records
                .get_mut(&id.0)
                .ok_or_else(|| StoreError::NotFound(id.0.clone()))?;

            if let Some(order) = patch.execution_order {
                stored.record.execution_order = order;
            }
            if let Some(payload) = patch.payload {
                stored.record.payload = payload;
            }
            if let Some(client_ref) = patch.client_ref {
                stored.record.client_ref = Some(client_ref);
            }
            if let Some(attributes) = patch.attributes {
                stored.attributes = Some(attributes);
            }
            if let Some(update) = patch.depends_on {
                stored.record.depends_on = update.encode();
            }
            Ok(())
        }

        async fn delete(&self, id: &RecordId) -> StoreResult<()> {
            self.counters.delete.fetch_add(1, Ordering::SeqCst);
            if self.failing_deletes.contains(&id.0) {
                return Err(StoreError::Rejected(format!("injected delete failure for {}", id)));
            }

            self.records
                .remove(&id.0)
                .map(|_| ())
                .ok_or_else(|| StoreError::NotFound(id.0.clone()))
        }

        async fn associate(&self, id: &RecordId, relation: Relation, related_id: &str) -> StoreResult<()> {
            self.counters.associate.fetch_add(1, Ordering::SeqCst);
            self.check_association(relation, related_id)?;

            let mut stored = self
                .records
                .get_mut(&id.0)
                .ok_or_else(|| StoreError::NotFound(id.0.clone()))?;
            stored
                .record
                .associated_mut(relation)
                .insert(related_id.to_string());
            Ok(())
        }

        async fn disassociate(
            &self,
            id: &RecordId,
            relation: Relation,
            related_id: &str,
        ) -> StoreResult<()> {
            self.counters.disassociate.fetch_add(1, Ordering::SeqCst);
            self.check_association(relation, related_id)?;

            let mut stored = self
                .records
                .get_mut(&id.0)
                .ok_or_else(|| StoreError::NotFound(id.0.clone()))?;
            if stored.record.associated_mut(relation).remove(related_id) {
                Ok(())
            } else {
                Err(StoreError::NotFound(format!(
                    "{} is not associated with {} via {}",
                    related_id, id, relation
                )))
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::domain::canvas::{CanvasNode, NodeConfig};

        fn playbook() -> PlaybookId {
            PlaybookId("pb-1".to_string())
        }

        #[tokio::test]
        async fn test_create_query_update_delete() {
            let store = MemoryStoreClient::new();
            let node = CanvasNode::new("n1", NodeConfig::Start).with_label("Begin");

            let id = store
                .create(NewNodeRecord::from_node(&playbook(), &node, 1))
                .await
                .unwrap();

            let loaded = store
                .query(&RecordQuery::for_playbook(&playbook()))
                .await
                .unwrap();
            assert_eq!(loaded.len(), 1);
            assert_eq!(loaded[0].client_ref.as_deref(), Some("n1"));
            assert_eq!(store.attributes(&id).unwrap().name, "Begin");

            store
                .update(&id, RecordPatch { execution_order: Some(7), ..RecordPatch::default() })
                .await
                .unwrap();
            assert_eq!(store.get(&id).unwrap().execution_order, 7);

            store.delete(&id).await.unwrap();
            assert!(store.get(&id).is_none());
            assert!(matches!(store.delete(&id).await, Err(StoreError::NotFound(_))));

            let counts = store.call_counts();
            assert_eq!(counts.create, 1);
            assert_eq!(counts.update, 1);
            assert_eq!(counts.delete, 2);
            assert_eq!(counts.query, 1);
        }

        #[tokio::test]
        async fn test_relations_only_loaded_when_expanded() {
            let store = MemoryStoreClient::new();
            let node = CanvasNode::new("n1", NodeConfig::Start);
            let id = store
                .create(NewNodeRecord::from_node(&playbook(), &node, 1))
                .await
                .unwrap();
            store.associate(&id, Relation::Skills, "s1").await.unwrap();

            let plain = store
                .query(&RecordQuery::for_playbook(&playbook()))
                .await
                .unwrap();
            assert!(plain[0].skill_ids.is_empty());

            let expanded = store
                .query(&RecordQuery::for_playbook(&playbook()).with_expand(Relation::ALL))
                .await
                .unwrap();
            assert!(expanded[0].skill_ids.contains("s1"));

            assert!(store
                .disassociate(&id, Relation::Knowledge, "k9")
                .await
                .is_err());
        }

        #[tokio::test]
        async fn test_injected_failures() {
            let store = MemoryStoreClient::new();
            store.fail_creates_for("bad");
            let node = CanvasNode::new("bad", NodeConfig::Start);
            let result = store
                .create(NewNodeRecord::from_node(&playbook(), &node, 1))
                .await;
            assert!(matches!(result, Err(StoreError::Rejected(_))));

            store.fail_queries();
            assert!(store
                .query(&RecordQuery::for_playbook(&playbook()))
                .await
                .is_err());

            store.clear_failures();
            assert!(store
                .query(&RecordQuery::for_playbook(&playbook()))
                .await
                .is_ok());
        }

        #[tokio::test]
        async fn test_records_are_scoped_to_playbook() {
            let store = MemoryStoreClient::new();
            let other = PlaybookId("pb-2".to_string());
            let node = CanvasNode::new("n1", NodeConfig::Start);
            store
                .create(NewNodeRecord::from_node(&playbook(), &node, 1))
                .await
                .unwrap();
            store
                .create(NewNodeRecord::from_node(&other, &node, 1))
                .await
                .unwrap();

            assert_eq!(store.records_for(&playbook()).len(), 1);
            assert_eq!(store.records_for(&other).len(), 1);
        }
    }
}
