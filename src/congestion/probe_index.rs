use crate::hop::ProbeId;
use crate::topology::Topology;
use indexmap::{IndexMap, IndexSet};
use multimap::MultiMap;
use petgraph::graph::{EdgeIndex, NodeIndex};
use std::time::Instant;

/// Reverse index from probes onto the topology: which links a probe's paths
/// crossed, and which nodes count the probe in their divergent set. Score
/// accumulation fans each change record out through these two maps.
#[derive(Debug, Default)]
pub struct ProbeIndex {
    pub links: MultiMap<ProbeId, EdgeIndex>,
    pub nodes: MultiMap<ProbeId, NodeIndex>,
}

/// Builds the probe index and selects each node's divergent probe set.
///
/// For a node `n`, the divergent set is a largest group of probes that
/// traverse `n` but share no other node among their surrounding links; a
/// correlated change across such a group leaves `n` as the only plausible
/// common cause. Nodes for which no group exists are left without a probe
/// set and take no part in node scoring.
pub fn prepare_probe_index(topo: &mut Topology) -> ProbeIndex {
    let started = Instant::now();
    let mut index = ProbeIndex::default();

    for edge in topo.edge_indices().collect::<Vec<_>>() {
        for probe in &topo.edge(edge).probes {
            index.links.insert(probe.clone(), edge);
        }
    }

    for n in topo.node_indices().collect::<Vec<_>>() {
        let mut reached: IndexMap<ProbeId, IndexSet<NodeIndex>> = IndexMap::new();
        for neighbour in topo.neighbours(n).collect::<Vec<_>>() {
            let edge = topo
                .edge_between(n, neighbour)
                .expect("neighbour without an edge");
            for probe in &topo.edge(edge).probes {
                reached
                    .entry(probe.clone())
                    .or_insert_with(|| IndexSet::from([n]))
                    .insert(neighbour);
            }
        }
        let Some(best) = divergent_set(&reached, n) else {
            continue;
        };
        for probe in &best.members {
            index.nodes.insert(probe.clone(), n);
        }
        let mut effective = best.attributes;
        effective.shift_remove(&n);
        let effective_hops = effective.into_iter().map(|idx| topo.hop(idx).clone()).collect();
        let node = topo.node_mut(n);
        node.probes = Some(best.members.into_iter().collect());
        node.effective_neighbours = Some(effective_hops);
    }

    tracing::info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        "probe index prepared"
    );
    index
}

#[derive(Debug, Clone)]
pub(crate) struct Candidate {
    pub members: Vec<ProbeId>,
    pub attributes: IndexSet<NodeIndex>,
}

/// Greedy single-pass search for the largest probe subset whose pairwise
/// attribute intersections are exactly `{crosspoint}`.
///
/// Each probe is offered to every candidate subset built so far (joining
/// those it stays compatible with) and then seeds a fresh singleton
/// candidate. The exact problem is a maximum-clique relative and
/// NP-complete; this approximation is deliberate and its greedy behaviour
/// (including order dependence) is part of the contract. Ties go to the
/// earliest candidate.
pub(crate) fn divergent_set(
    sets: &IndexMap<ProbeId, IndexSet<NodeIndex>>,
    crosspoint: NodeIndex,
) -> Option<Candidate> {
    let mut candidates: Vec<Candidate> = Vec::new();
    for (probe, attributes) in sets {
        for candidate in &mut candidates {
            if intersects_only_at(attributes, &candidate.attributes, crosspoint) {
                candidate.members.push(probe.clone());
                candidate.attributes.extend(attributes.iter().copied());
            }
        }
        candidates.push(Candidate {
            members: vec![probe.clone()],
            attributes: attributes.clone(),
        });
    }

    let mut best: Option<Candidate> = None;
    for candidate in candidates {
        match &best {
            Some(current) if candidate.members.len() <= current.members.len() => {}
            _ => best = Some(candidate),
        }
    }
    best
}

/// `a ∩ b == {crosspoint}`.
fn intersects_only_at(a: &IndexSet<NodeIndex>, b: &IndexSet<NodeIndex>, crosspoint: NodeIndex) -> bool {
    let mut saw_crosspoint = false;
    for item in a {
        if b.contains(item) {
            if *item != crosspoint {
                return false;
            }
            saw_crosspoint = true;
        }
    }
    saw_crosspoint
}
