use crate::hop::{Hop, ProbeId};
use indexmap::{IndexMap, IndexSet};
use itertools::Itertools;
use petgraph::graph::{EdgeIndex, NodeIndex, UnGraph};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::{BTreeMap, BTreeSet};

pub mod build;
pub mod merge;
pub mod output;

pub use build::{build_graph, graph_from_file, PathSelection, TraceFile, TraceRecord};
pub use merge::{merge_all, merge_into};

/// Role a node plays in at least one observed path. A node accumulates tags
/// across files; `Transit` is a per-file fallback and never coexists with
/// the other tags in a merged graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum_macros::EnumIter)]
#[repr(u8)]
pub enum Tag {
    Source = 1,
    Ixp = 2,
    Destination = 3,
    Transit = 4,
}

impl Tag {
    pub fn from_code(code: u8) -> Option<Tag> {
        match code {
            1 => Some(Tag::Source),
            2 => Some(Tag::Ixp),
            3 => Some(Tag::Destination),
            4 => Some(Tag::Transit),
            _ => None,
        }
    }
}

/// Certainty level of a change-location verdict for one time bin.
///
/// The ordering matters: `Neg < Likely < Sure`, so "the strongest verdict
/// among the trunks" is a plain `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum_macros::Display)]
#[repr(u8)]
pub enum Certainty {
    Neg = 0,
    Likely = 1,
    Sure = 2,
}

impl Certainty {
    pub fn from_code(code: u8) -> Option<Certainty> {
        match code {
            0 => Some(Certainty::Neg),
            1 => Some(Certainty::Likely),
            2 => Some(Certainty::Sure),
            _ => None,
        }
    }
}

/// Per-node annotations.
#[derive(Debug, Clone, Default)]
pub struct NodeData {
    pub tags: BTreeSet<Tag>,
    /// Probes for which this node is their first hop.
    pub hosting: IndexSet<ProbeId>,
    /// The divergent probe set: probes that traverse this node but share no
    /// other node among their surrounding links. `None` until the probe
    /// index has been prepared, or when no such set exists.
    pub probes: Option<IndexSet<ProbeId>>,
    /// Union of the neighbours reached by the divergent probe set.
    pub effective_neighbours: Option<IndexSet<Hop>>,
    /// Per-bin change score, keyed by bin start (epoch seconds).
    pub score: BTreeMap<i64, f64>,
    pub inference: BTreeMap<i64, Certainty>,
}

/// Per-edge annotations.
#[derive(Debug, Clone, Default)]
pub struct EdgeData {
    /// Probes whose path crossed this edge. Never empty in a built graph.
    pub probes: IndexSet<ProbeId>,
    pub score: BTreeMap<i64, f64>,
    pub inference: BTreeMap<i64, Certainty>,
}

/// Undirected, simple graph over [`Hop`]s with annotated nodes and edges,
/// plus a bag of graph-wide attributes that ends up in the serialized
/// document verbatim.
///
/// Node insertion order is preserved and is the order nodes are listed (and
/// numbered) in the output document.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    graph: UnGraph<NodeData, EdgeData>,
    index: IndexMap<Hop, NodeIndex>,
    pub meta: JsonMap<String, JsonValue>,
}

impl Topology {
    pub fn new() -> Topology {
        Topology::default()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Returns the node for `hop`, inserting a fresh unannotated one if the
    /// hop has not been seen before.
    pub fn ensure_node(&mut self, hop: &Hop) -> NodeIndex {
        if let Some(&idx) = self.index.get(hop) {
            return idx;
        }
        let idx = self.graph.add_node(NodeData::default());
        self.index.insert(hop.clone(), idx);
        idx
    }

    pub fn node_index(&self, hop: &Hop) -> Option<NodeIndex> {
        self.index.get(hop).copied()
    }

    /// The hop a node index stands for. Nodes are never removed, so the
    /// ordinal of a `NodeIndex` always equals its insertion position.
    pub fn hop(&self, idx: NodeIndex) -> &Hop {
        self.index
            .get_index(idx.index())
            .map(|(hop, _)| hop)
            .expect("node index out of bounds")
    }

    pub fn node(&self, idx: NodeIndex) -> &NodeData {
        &self.graph[idx]
    }

    pub fn node_mut(&mut self, idx: NodeIndex) -> &mut NodeData {
        &mut self.graph[idx]
    }

    /// Returns the edge between `a` and `b`, inserting an empty one if the
    /// pair is not yet connected. The graph stays simple: an existing edge
    /// is found regardless of endpoint order.
    pub fn ensure_edge(&mut self, a: NodeIndex, b: NodeIndex) -> EdgeIndex {
        match self.graph.find_edge(a, b) {
            Some(edge) => edge,
            None => self.graph.add_edge(a, b, EdgeData::default()),
        }
    }

    pub fn edge_between(&self, a: NodeIndex, b: NodeIndex) -> Option<EdgeIndex> {
        self.graph.find_edge(a, b)
    }

    pub fn edge(&self, edge: EdgeIndex) -> &EdgeData {
        &self.graph[edge]
    }

    pub fn edge_mut(&mut self, edge: EdgeIndex) -> &mut EdgeData {
        &mut self.graph[edge]
    }

    pub fn endpoints(&self, edge: EdgeIndex) -> (NodeIndex, NodeIndex) {
        self.graph
            .edge_endpoints(edge)
            .expect("edge index out of bounds")
    }

    pub fn node_indices(&self) -> impl Iterator<Item = NodeIndex> {
        self.graph.node_indices()
    }

    pub fn edge_indices(&self) -> impl Iterator<Item = EdgeIndex> {
        self.graph.edge_indices()
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeIndex, &Hop, &NodeData)> {
        self.index
            .iter()
            .map(|(hop, &idx)| (idx, hop, &self.graph[idx]))
    }

    /// Neighbours of `n`, deduplicated so that a self-loop reports `n` once.
    pub fn neighbours(&self, n: NodeIndex) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.neighbors(n).unique()
    }

    /// Convenience lookup for tests and diagnostics.
    pub fn edge_by_hops(&self, a: &Hop, b: &Hop) -> Option<EdgeIndex> {
        let a = self.node_index(a)?;
        let b = self.node_index(b)?;
        self.edge_between(a, b)
    }
}
