//! End-to-end behaviour of the sync engine against the in-memory store

use playbook_core::domain::canvas::{CanvasEdge, CanvasNode, NodeConfig, NodeId, OutputFormat};
use playbook_core::domain::identity::extract_correlation_id;
use playbook_core::domain::record::{PersistedNodeRecord, PlaybookId, RecordId, Relation};
use playbook_core::{MemoryStoreClient, SyncConfig, SyncOrchestrator};
use pretty_assertions::assert_eq;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn playbook() -> PlaybookId {
    PlaybookId("playbook-42".to_string())
}

fn orchestrator(store: &Arc<MemoryStoreClient>) -> SyncOrchestrator {
    SyncOrchestrator::new(store.clone(), SyncConfig::default())
}

fn analyze(id: &str) -> CanvasNode {
    CanvasNode::new(
        id,
        NodeConfig::AiAnalysis {
            action_id: Some("act-summarize".to_string()),
            model_deployment_id: None,
            prompt_override: None,
            output_variable: Some("summary".to_string()),
        },
    )
    .with_label("Analyze")
}

fn output(id: &str) -> CanvasNode {
    CanvasNode::new(
        id,
        NodeConfig::DeliverOutput {
            template_id: None,
            output_format: OutputFormat::Markdown,
            include_citations: true,
        },
    )
    .with_label("Output")
}

fn record_for(store: &MemoryStoreClient, node_id: &str) -> PersistedNodeRecord {
    store
        .find_by_client_ref(node_id)
        .unwrap_or_else(|| panic!("no record for {node_id}"))
}

#[tokio::test]
async fn start_analyze_output_scenario() {
    init_tracing();
    let store = Arc::new(MemoryStoreClient::new());
    let nodes = vec![
        CanvasNode::new("start", NodeConfig::Start).with_label("Start"),
        analyze("analyze"),
        output("output"),
    ];
    let edges = vec![
        CanvasEdge::new("e1", "start", "analyze"),
        CanvasEdge::new("e2", "analyze", "output"),
    ];

    let report = orchestrator(&store).sync(&playbook(), &nodes, &edges).await.unwrap();

    assert_eq!(store.call_counts().create, 3);
    assert_eq!(report.created, 3);
    assert_eq!(report.summary(), "3 of 3 nodes saved");

    let orders: BTreeMap<&str, u32> = ["start", "analyze", "output"]
        .into_iter()
        .map(|id| (id, record_for(&store, id).execution_order))
        .collect();
    assert_eq!(
        orders,
        BTreeMap::from([("analyze", 2), ("output", 3), ("start", 1)])
    );

    let analyze_id = report.id_map[&NodeId::from("analyze")].clone();
    let output_record = record_for(&store, "output");
    assert_eq!(output_record.dependency_ids(), vec![analyze_id]);
    assert!(record_for(&store, "start").depends_on.is_none());
    assert_eq!(
        extract_correlation_id(&output_record.payload),
        Some(NodeId::from("output"))
    );
}

#[tokio::test]
async fn second_sync_without_changes_creates_and_deletes_nothing() {
    let store = Arc::new(MemoryStoreClient::new());
    let nodes = vec![
        CanvasNode::new("a", NodeConfig::Start).with_skills(["s1", "s2"]),
        analyze("b").with_knowledge(["k1"]),
        output("c"),
    ];
    let edges = vec![CanvasEdge::new("e1", "a", "b"), CanvasEdge::new("e2", "b", "c")];
    let sync = orchestrator(&store);

    let first = sync.sync(&playbook(), &nodes, &edges).await.unwrap();
    store.reset_counts();
    let second = sync.sync(&playbook(), &nodes, &edges).await.unwrap();

    let counts = store.call_counts();
    assert_eq!(counts.create, 0);
    assert_eq!(counts.delete, 0);
    assert_eq!(counts.associate, 0);
    assert_eq!(counts.disassociate, 0);
    assert_eq!(second.updated, 3);
    assert_eq!(second.links_written, 0);
    assert_eq!(second.id_map, first.id_map);
    assert_eq!(store.records_for(&playbook()).len(), 3);
}

#[tokio::test]
async fn removed_node_is_deleted_exactly_once() {
    let store = Arc::new(MemoryStoreClient::new());
    let sync = orchestrator(&store);
    let nodes = vec![
        CanvasNode::new("a", NodeConfig::Start),
        analyze("b"),
        output("c"),
    ];
    let first = sync.sync(&playbook(), &nodes, &[]).await.unwrap();
    let removed = first.id_map[&NodeId::from("b")].clone();

    store.reset_counts();
    let remaining = vec![nodes[0].clone(), nodes[2].clone()];
    let report = sync.sync(&playbook(), &remaining, &[]).await.unwrap();

    assert_eq!(store.call_counts().delete, 1);
    assert_eq!(report.deleted, vec![removed.clone()]);
    let ids: Vec<RecordId> = store
        .records_for(&playbook())
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert!(!ids.contains(&removed));
    assert_eq!(ids.len(), 2);
}

#[tokio::test]
async fn failed_create_does_not_block_other_nodes() {
    let store = Arc::new(MemoryStoreClient::new());
    store.fail_creates_for("x");
    let nodes = vec![
        CanvasNode::new("x", NodeConfig::Start),
        analyze("y"),
        output("z"),
    ];

    let report = orchestrator(&store).sync(&playbook(), &nodes, &[]).await.unwrap();

    assert_eq!(store.call_counts().create, 3);
    assert!(!report.id_map.contains_key(&NodeId::from("x")));
    assert!(report.id_map.contains_key(&NodeId::from("y")));
    assert!(report.id_map.contains_key(&NodeId::from("z")));
    assert_eq!(report.summary(), "2 of 3 nodes saved; 1 failed");
}

#[tokio::test]
async fn dependency_on_node_created_in_same_run() {
    let store = Arc::new(MemoryStoreClient::new());
    let nodes = vec![CanvasNode::new("A", NodeConfig::Start), analyze("B")];
    let edges = vec![CanvasEdge::new("e1", "A", "B")];

    let report = orchestrator(&store).sync(&playbook(), &nodes, &edges).await.unwrap();

    let a = report.id_map[&NodeId::from("A")].clone();
    assert_eq!(record_for(&store, "B").dependency_ids(), vec![a]);
}

#[tokio::test]
async fn removed_edge_clears_stored_dependencies() {
    let store = Arc::new(MemoryStoreClient::new());
    let nodes = vec![CanvasNode::new("a", NodeConfig::Start), analyze("b")];
    let sync = orchestrator(&store);

    let first = sync
        .sync(&playbook(), &nodes, &[CanvasEdge::new("e1", "a", "b")])
        .await
        .unwrap();
    let a = first.id_map[&NodeId::from("a")].clone();
    assert_eq!(record_for(&store, "b").dependency_ids(), vec![a]);

    store.reset_counts();
    let second = sync.sync(&playbook(), &nodes, &[]).await.unwrap();

    assert_eq!(second.links_written, 1);
    assert_eq!(second.links_unchanged, 1);
    assert_eq!(record_for(&store, "b").depends_on, None);
    assert!(record_for(&store, "b").dependency_ids().is_empty());
    // Phase-3 updates plus the one dependency write
    assert_eq!(store.call_counts().update, 3);

    let third = sync.sync(&playbook(), &nodes, &[]).await.unwrap();
    assert_eq!(third.links_written, 0);
    assert_eq!(third.links_unchanged, 2);
}

#[tokio::test]
async fn dependency_on_failed_node_is_dropped() {
    let store = Arc::new(MemoryStoreClient::new());
    store.fail_creates_for("A");
    let nodes = vec![
        CanvasNode::new("A", NodeConfig::Start),
        CanvasNode::new("C", NodeConfig::Start),
        analyze("B"),
    ];
    let edges = vec![CanvasEdge::new("e1", "A", "B"), CanvasEdge::new("e2", "C", "B")];

    let report = orchestrator(&store).sync(&playbook(), &nodes, &edges).await.unwrap();

    let c = report.id_map[&NodeId::from("C")].clone();
    assert_eq!(record_for(&store, "B").dependency_ids(), vec![c]);
    assert!(report.link_failures.is_empty());
}

#[tokio::test]
async fn association_edits_are_minimal() {
    let store = Arc::new(MemoryStoreClient::new());
    let sync = orchestrator(&store);
    let before = vec![CanvasNode::new("n", NodeConfig::Start).with_skills(["A", "B", "C"])];
    sync.sync(&playbook(), &before, &[]).await.unwrap();

    store.reset_counts();
    let after = vec![CanvasNode::new("n", NodeConfig::Start).with_skills(["B", "C", "D"])];
    let report = sync.sync(&playbook(), &after, &[]).await.unwrap();

    let counts = store.call_counts();
    assert_eq!(counts.associate, 1);
    assert_eq!(counts.disassociate, 1);
    assert_eq!(report.relationships.added, 1);
    assert_eq!(report.relationships.removed, 1);

    let expected: BTreeSet<String> = ["B", "C", "D"].iter().map(|s| s.to_string()).collect();
    assert_eq!(record_for(&store, "n").associated(Relation::Skills), &expected);
}

#[tokio::test]
async fn failed_association_is_retried_by_next_sync() {
    let store = Arc::new(MemoryStoreClient::new());
    store.fail_associations_for(Relation::Knowledge, "k2");
    let sync = orchestrator(&store);
    let nodes = vec![analyze("n").with_knowledge(["k1", "k2", "k3"])];

    let first = sync.sync(&playbook(), &nodes, &[]).await.unwrap();
    assert_eq!(first.relationships.added, 2);
    assert_eq!(first.relationships.failed, 1);
    assert!(!first.is_complete());

    store.clear_failures();
    store.reset_counts();
    let second = sync.sync(&playbook(), &nodes, &[]).await.unwrap();
    assert_eq!(store.call_counts().associate, 1);
    assert!(second.is_complete());
}

#[tokio::test]
async fn cyclic_canvas_is_saved_with_order_zero() {
    let store = Arc::new(MemoryStoreClient::new());
    let nodes = vec![
        CanvasNode::new("root", NodeConfig::Start),
        analyze("a"),
        analyze("b"),
    ];
    let edges = vec![
        CanvasEdge::new("e1", "root", "a"),
        CanvasEdge::new("e2", "a", "b"),
        CanvasEdge::new("e3", "b", "a"),
    ];

    let report = orchestrator(&store).sync(&playbook(), &nodes, &edges).await.unwrap();

    assert_eq!(report.created, 3);
    assert_eq!(report.unordered, vec![NodeId::from("a"), NodeId::from("b")]);
    assert_eq!(record_for(&store, "root").execution_order, 1);
    assert_eq!(record_for(&store, "a").execution_order, 0);

    let b = report.id_map[&NodeId::from("b")].clone();
    let root = report.id_map[&NodeId::from("root")].clone();
    assert_eq!(record_for(&store, "a").dependency_ids(), vec![root, b]);
}

#[tokio::test]
async fn legacy_and_duplicate_records_are_cleaned_up() {
    init_tracing();
    let store = Arc::new(MemoryStoreClient::new());
    let legacy = PersistedNodeRecord {
        id: RecordId::from("legacy"),
        execution_order: 1,
        payload: r#"{"__canvasNodeId":"a","nodeType":"start"}"#.to_string(),
        client_ref: None,
        skill_ids: BTreeSet::new(),
        knowledge_ids: BTreeSet::new(),
        depends_on: None,
    };
    let duplicate = PersistedNodeRecord {
        id: RecordId::from("duplicate"),
        ..legacy.clone()
    };
    let garbage = PersistedNodeRecord {
        id: RecordId::from("garbage"),
        payload: "not json".to_string(),
        ..legacy.clone()
    };
    store.seed(&playbook(), legacy);
    store.seed(&playbook(), duplicate);
    store.seed(&playbook(), garbage);

    let nodes = vec![CanvasNode::new("a", NodeConfig::Start)];
    let report = orchestrator(&store).sync(&playbook(), &nodes, &[]).await.unwrap();

    assert_eq!(report.created, 0);
    assert_eq!(report.updated, 1);
    assert_eq!(report.id_map[&NodeId::from("a")], RecordId::from("legacy"));
    assert_eq!(
        report.deleted,
        vec![RecordId::from("duplicate"), RecordId::from("garbage")]
    );
    // The update writes the explicit correlation column
    assert_eq!(
        store.get(&RecordId::from("legacy")).unwrap().client_ref.as_deref(),
        Some("a")
    );
}

#[tokio::test]
async fn serial_and_concurrent_runs_agree() {
    let nodes: Vec<CanvasNode> = (0..12)
        .map(|i| CanvasNode::new(format!("n{i}"), NodeConfig::Wait { duration_minutes: i }))
        .collect();
    let edges: Vec<CanvasEdge> = (1..12)
        .map(|i| CanvasEdge::new(format!("e{i}"), format!("n{}", i - 1), format!("n{i}")))
        .collect();

    let mut orders = Vec::new();
    for limit in [1, 8] {
        let store = Arc::new(MemoryStoreClient::new());
        let sync = SyncOrchestrator::new(
            store.clone(),
            SyncConfig::default().with_max_concurrent_upserts(limit),
        );
        let report = sync.sync(&playbook(), &nodes, &edges).await.unwrap();
        assert_eq!(report.links_written, 11);

        let by_node: BTreeMap<String, u32> = store
            .records_for(&playbook())
            .into_iter()
            .filter_map(|r| r.client_ref.map(|c| (c, r.execution_order)))
            .collect();
        orders.push(by_node);
    }
    assert_eq!(orders[0], orders[1]);
}
