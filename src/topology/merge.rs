use crate::topology::{Tag, Topology};

/// Folds `other` into `acc`. Attribute sets are unioned, never overwritten,
/// so merging any number of partial graphs is associative and the result
/// does not depend on input order.
///
/// A node tagged `Transit` in one file may carry a real role in another;
/// the fallback tag is dropped as soon as any other tag is present.
pub fn merge_into(acc: &mut Topology, other: Topology) {
    for (_, hop, data) in other.nodes() {
        let merged = acc.ensure_node(hop);
        let node = acc.node_mut(merged);
        node.tags.extend(data.tags.iter().copied());
        if node.tags.len() > 1 {
            node.tags.remove(&Tag::Transit);
        }
        node.hosting.extend(data.hosting.iter().cloned());
    }
    for edge in other.edge_indices() {
        let (u, v) = other.endpoints(edge);
        let a = acc.ensure_node(other.hop(u));
        let b = acc.ensure_node(other.hop(v));
        let merged = acc.ensure_edge(a, b);
        acc.edge_mut(merged)
            .probes
            .extend(other.edge(edge).probes.iter().cloned());
    }
}

/// Combines a sequence of partial graphs into one topology.
pub fn merge_all(graphs: impl IntoIterator<Item = Topology>) -> Topology {
    let mut merged = Topology::new();
    for graph in graphs {
        merge_into(&mut merged, graph);
    }
    merged
}
