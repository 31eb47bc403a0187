use crate::domain::canvas::{CanvasEdge, CanvasNode, NodeId};
use std::collections::{HashMap, VecDeque};
use tracing::warn;

/// Execution order per canvas node. `0` marks a node that could not be
/// ordered because it sits on, or downstream of, a cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionOrder {
    orders: HashMap<NodeId, u32>,
}

impl ExecutionOrder {
    /// Order of a node; unknown nodes read as `0`
    #[inline]
    pub fn get(&self, node_id: &NodeId) -> u32 {
        self.orders.get(node_id).copied().unwrap_or(0)
    }

    /// Number of nodes with an assigned order (including `0`)
    #[inline]
    pub fn len(&self) -> usize {
        self.orders.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Nodes left unordered by a cycle
    pub fn unordered(&self) -> impl Iterator<Item = &NodeId> {
        self.orders
            .iter()
            .filter(|(_, order)| **order == 0)
            .map(|(id, _)| id)
    }

    /// Borrow the underlying map
    pub fn as_map(&self) -> &HashMap<NodeId, u32> {
        &self.orders
    }
}

/// Assigns execution orders to canvas nodes by topological sort
pub struct GraphOrderResolver;

impl GraphOrderResolver {
    /// Kahn's algorithm over the canvas graph.
    ///
    /// Edges that reference ids absent from `nodes` are ignored. Ready nodes
    /// are dequeued FIFO in node-list order and successors are released in
    /// edge-list order, so the same input always yields the same map. Orders
    /// start at `1`; nodes never dequeued get `0` instead of an error.
    pub fn resolve(nodes: &[CanvasNode], edges: &[CanvasEdge]) -> ExecutionOrder {
        let mut position: HashMap<&NodeId, usize> = HashMap::with_capacity(nodes.len());
        let mut ids: Vec<&NodeId> = Vec::with_capacity(nodes.len());
        for node in nodes {
            if !position.contains_key(&node.id) {
                position.insert(&node.id, ids.len());
                ids.push(&node.id);
            }
        }

        let mut in_degree = vec![0usize; ids.len()];
        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); ids.len()];
        for edge in edges {
            let (Some(&from), Some(&to)) = (
                position.get(&edge.source_node_id),
                position.get(&edge.target_node_id),
            ) else {
                continue;
            };
            successors[from].push(to);
            in_degree[to] += 1;
        }

        let mut ready: VecDeque<usize> = (0..ids.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut assigned = vec![0u32; ids.len()];
        let mut next_order = 1u32;

        while let Some(current) = ready.pop_front() {
            assigned[current] = next_order;
            next_order += 1;

            for &succ in &successors[current] {
                in_degree[succ] -= 1;
                if in_degree[succ] == 0 {
                    ready.push_back(succ);
                }
            }
        }

        let orders: HashMap<NodeId, u32> = ids
            .iter()
            .zip(assigned)
            .map(|(id, order)| ((*id).clone(), order))
            .collect();

        let unordered = orders.values().filter(|o| **o == 0).count();
        if unordered > 0 {
            warn!(
                unordered,
                total = orders.len(),
                "Canvas graph contains a cycle; affected nodes get execution order 0"
            );
        }

        ExecutionOrder { orders }
    }
}
