//! Workflow graph implementation using petgraph.
//!
//! The graph holds node ids only; node payloads stay in the template. Two
//! synthetic nodes frame every graph:
//! - `start-node` precedes every node that has no other predecessor
//! - `end-node` follows every terminal node and every node feeding a
//!   workflow output

use crate::node::NodeId;
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// Why an edge exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    /// Listed in `upstream_node_ids`.
    Explicit,
    /// Implied by a binding promise.
    Data,
    /// Attachment to the synthetic start or end node.
    Frame,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    InProgress,
    Done,
}

/// A dependency graph over node ids.
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    graph: DiGraph<NodeId, DependencyKind>,
    /// Map from NodeId to petgraph's NodeIndex for O(1) lookup.
    node_index_map: HashMap<NodeId, NodeIndex>,
}

impl WorkflowGraph {
    /// Creates a graph holding only the start and end nodes.
    #[must_use]
    pub fn new() -> Self {
        let mut graph = Self {
            graph: DiGraph::new(),
            node_index_map: HashMap::new(),
        };
        graph.add_node(NodeId::start());
        graph.add_node(NodeId::end());
        graph
    }

    /// Adds a node. Adding an existing id is a no-op.
    pub fn add_node(&mut self, node_id: NodeId) -> NodeIndex {
        if let Some(&index) = self.node_index_map.get(&node_id) {
            return index;
        }
        let index = self.graph.add_node(node_id.clone());
        self.node_index_map.insert(node_id, index);
        index
    }

    /// Adds an edge between two existing nodes.
    ///
    /// Returns false if either node is missing, or the edge would leave
    /// `end-node` or enter `start-node`. Parallel edges are collapsed.
    pub fn add_edge(&mut self, from: &NodeId, to: &NodeId, kind: DependencyKind) -> bool {
        if from.is_end() || to.is_start() {
            return false;
        }
        let (Some(&a), Some(&b)) = (self.node_index_map.get(from), self.node_index_map.get(to)) else {
            return false;
        };
        if self.graph.find_edge(a, b).is_none() {
            self.graph.add_edge(a, b, kind);
        }
        true
    }

    /// Returns true if the graph holds the node.
    #[must_use]
    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.node_index_map.contains_key(node_id)
    }

    /// Returns all node ids, synthetic ones included, in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &NodeId> {
        self.graph.node_weights()
    }

    /// Returns the number of nodes in the graph.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns the number of edges in the graph.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Returns the direct predecessors of a node, in insertion order.
    #[must_use]
    pub fn upstream(&self, node_id: &NodeId) -> Vec<&NodeId> {
        self.neighbors(node_id, Direction::Incoming)
    }

    /// Returns the direct successors of a node, in insertion order.
    #[must_use]
    pub fn downstream(&self, node_id: &NodeId) -> Vec<&NodeId> {
        self.neighbors(node_id, Direction::Outgoing)
    }

    fn neighbors(&self, node_id: &NodeId, direction: Direction) -> Vec<&NodeId> {
        let Some(&index) = self.node_index_map.get(node_id) else {
            return Vec::new();
        };
        self.sorted_neighbors(index, direction)
            .into_iter()
            .filter_map(|i| self.graph.node_weight(i))
            .collect()
    }

    fn sorted_neighbors(&self, index: NodeIndex, direction: Direction) -> Vec<NodeIndex> {
        let mut out: Vec<NodeIndex> = self.graph.neighbors_directed(index, direction).collect();
        out.sort();
        out
    }

    /// Hangs predecessor-less nodes off `start-node` and connects
    /// successor-less nodes to `end-node`.
    pub fn attach_frame(&mut self) {
        let start = NodeId::start();
        let end = NodeId::end();
        let ids: Vec<NodeId> = self
            .graph
            .node_weights()
            .filter(|id| !id.is_reserved())
            .cloned()
            .collect();
        for id in &ids {
            if self.upstream(id).is_empty() {
                self.add_edge(&start, id, DependencyKind::Frame);
            }
            if self.downstream(id).is_empty() {
                self.add_edge(id, &end, DependencyKind::Frame);
            }
        }
    }

    /// Finds cycles by depth-first search with an in-progress set.
    ///
    /// Each back edge yields one path that starts and ends on the same node.
    #[must_use]
    pub fn find_cycles(&self) -> Vec<Vec<NodeId>> {
        let mut marks = HashMap::new();
        let mut cycles = Vec::new();
        for index in self.graph.node_indices() {
            if !marks.contains_key(&index) {
                self.visit(index, &mut marks, &mut cycles);
            }
        }
        cycles
    }

    /// Walks everything reachable from `root` with an explicit stack. The
    /// stack frames are exactly the nodes on the current path.
    fn visit(&self, root: NodeIndex, marks: &mut HashMap<NodeIndex, Visit>, cycles: &mut Vec<Vec<NodeId>>) {
        let mut stack: Vec<(NodeIndex, std::vec::IntoIter<NodeIndex>)> = Vec::new();
        marks.insert(root, Visit::InProgress);
        stack.push((root, self.sorted_neighbors(root, Direction::Outgoing).into_iter()));

        while let Some((_, successors)) = stack.last_mut() {
            let Some(next) = successors.next() else {
                if let Some((index, _)) = stack.pop() {
                    marks.insert(index, Visit::Done);
                }
                continue;
            };
            match marks.get(&next) {
                None => {
                    marks.insert(next, Visit::InProgress);
                    stack.push((next, self.sorted_neighbors(next, Direction::Outgoing).into_iter()));
                }
                Some(Visit::InProgress) => {
                    if let Some(pos) = stack.iter().position(|(i, _)| *i == next) {
                        let mut cycle: Vec<NodeId> = stack[pos..]
                            .iter()
                            .filter_map(|(i, _)| self.graph.node_weight(*i).cloned())
                            .collect();
                        cycle.extend(self.graph.node_weight(next).cloned());
                        cycles.push(cycle);
                    }
                }
                Some(Visit::Done) => {}
            }
        }
    }

    /// Returns every node reachable from `from`, `from` included.
    #[must_use]
    pub fn reachable_from(&self, from: &NodeId) -> HashSet<NodeId> {
        let mut seen = HashSet::new();
        let Some(&start) = self.node_index_map.get(from) else {
            return seen;
        };
        let mut queue = VecDeque::from([start]);
        let mut visited = HashSet::from([start]);
        while let Some(index) = queue.pop_front() {
            if let Some(id) = self.graph.node_weight(index) {
                seen.insert(id.clone());
            }
            for next in self.graph.neighbors_directed(index, Direction::Outgoing) {
                if visited.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        seen
    }

    /// Returns every node reachable from `start-node`.
    #[must_use]
    pub fn reachable_from_start(&self) -> HashSet<NodeId> {
        self.reachable_from(&NodeId::start())
    }

    /// Groups the non-synthetic nodes into batches that can run together:
    /// every node's predecessors sit in earlier batches.
    ///
    /// Returns `None` when the graph has a cycle.
    #[must_use]
    pub fn topological_batches(&self) -> Option<Vec<Vec<NodeId>>> {
        let mut in_degree: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|i| (i, self.graph.neighbors_directed(i, Direction::Incoming).count()))
            .collect();
        let mut current: BTreeSet<NodeIndex> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| *i)
            .collect();
        let mut batches = Vec::new();
        let mut seen = 0;

        while !current.is_empty() {
            seen += current.len();
            let mut next = BTreeSet::new();
            let mut batch = Vec::new();
            for &index in &current {
                if let Some(id) = self.graph.node_weight(index)
                    && !id.is_reserved()
                {
                    batch.push(id.clone());
                }
                for succ in self.graph.neighbors_directed(index, Direction::Outgoing) {
                    if let Some(d) = in_degree.get_mut(&succ) {
                        *d -= 1;
                        if *d == 0 {
                            next.insert(succ);
                        }
                    }
                }
            }
            if !batch.is_empty() {
                batches.push(batch);
            }
            current = next;
        }

        (seen == self.graph.node_count()).then_some(batches)
    }
}

impl Default for WorkflowGraph {
    fn default() -> Self {
        Self::new()
    }
}
