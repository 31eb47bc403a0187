//! Domain model of the sync engine: the canvas graph handed over by the
//! editor, the records persisted in the store, and the pure logic relating
//! the two.

pub mod canvas;
pub mod identity;
pub mod ordering;
pub mod record;
pub mod repository;

pub use canvas::{CanvasDocument, CanvasEdge, CanvasNode, NodeConfig, NodeData, NodeId, NodeKind, OutputFormat, Position};
pub use identity::{correlation_of, extract_correlation_id, OwnershipIndex, CORRELATION_KEY};
pub use ordering::{ExecutionOrder, GraphOrderResolver};
pub use record::{
    render_payload, DependencyUpdate, NewNodeRecord, NodeAttributes, PersistedNodeRecord, PlaybookId,
    RecordId, RecordPatch, Relation,
};
pub use repository::{RecordQuery, StoreClient};
