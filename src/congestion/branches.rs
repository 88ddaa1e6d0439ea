use crate::topology::Topology;
use petgraph::graph::NodeIndex;

/// One link surrounding an endpoint of the link under analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Branch {
    pub neighbour: NodeIndex,
    /// Probes on the branch link itself.
    pub probe_count: usize,
    /// Probes the branch link shares with the link under analysis.
    pub shared_count: usize,
}

impl Branch {
    /// An extension branch carries at least one probe of the link under
    /// analysis further; a branch with no shared probe is a sibling.
    pub fn is_extension(&self) -> bool {
        self.shared_count > 0
    }
}

/// Returns the branches surrounding the link `(n1, n2)`, one list per
/// endpoint: for every neighbour of the endpoint other than the opposite
/// one, the branch link's probe count and its probe overlap with
/// `(n1, n2)`. Both lists are empty when `(n1, n2)` is not an edge.
pub fn find_branches(
    topo: &Topology,
    n1: NodeIndex,
    n2: NodeIndex,
) -> (Vec<Branch>, Vec<Branch>) {
    let Some(link) = topo.edge_between(n1, n2) else {
        return (Vec::new(), Vec::new());
    };
    let link_probes = &topo.edge(link).probes;

    let side = |n: NodeIndex, other: NodeIndex| {
        topo.neighbours(n)
            .filter(|&x| x != other)
            .filter_map(|x| {
                let edge = topo.edge_between(n, x)?;
                let probes = &topo.edge(edge).probes;
                Some(Branch {
                    neighbour: x,
                    probe_count: probes.len(),
                    shared_count: probes.intersection(link_probes).count(),
                })
            })
            .collect()
    };

    (side(n1, n2), side(n2, n1))
}
