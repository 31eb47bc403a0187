//! The sync engine proper: reconciliation of records and associations, and
//! the orchestrator that sequences them against a store.

pub mod concurrency;
pub mod orchestrator;
pub mod reconciler;
pub mod relationships;
pub mod report;

pub use concurrency::WorkerLimit;
pub use orchestrator::SyncOrchestrator;
pub use reconciler::{unique_nodes, DeletionOutcome, EntityReconciler, NodeFailure, ReconcileOutcome, UpsertOutcome};
pub use relationships::{diff_sets, RelationshipOutcome, RelationshipSynchronizer, SetDiff};
pub use report::SyncReport;
