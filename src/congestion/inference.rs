use crate::congestion::branches::{find_branches, Branch};
use crate::congestion::ScoreParams;
use crate::error::TopoError;
use crate::topology::{Certainty, Topology};
use petgraph::graph::{EdgeIndex, NodeIndex};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeSet, HashSet};
use std::hash::{Hash, Hasher};
use std::time::Instant;

/// First pass: a node whose divergent probe set has more than one member
/// and whose normalized score exceeds the node threshold is the common
/// cause of the change with certainty.
pub fn infer_nodes(topo: &mut Topology, params: &ScoreParams) {
    let started = Instant::now();
    let nodes: Vec<NodeIndex> = topo.node_indices().collect();
    for t in params.bins() {
        for &n in &nodes {
            let node = topo.node(n);
            let divergent = node.probes.as_ref().map_or(0, |p| p.len());
            if divergent > 1 && node.score.get(&t).copied().unwrap_or(0.0) > params.node_threshold
            {
                topo.node_mut(n).inference.insert(t, Certainty::Sure);
            }
        }
    }
    tracing::debug!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        "node change inference done"
    );
}

/// Second pass: every link over threshold in a bin is walked through the
/// recursive case analysis, which may pull neighbouring links in ahead of
/// their turn. Verdicts are memoized on the links, so each (link, bin)
/// pair is decided once.
pub fn infer_links(topo: &mut Topology, params: &ScoreParams) -> Result<(), TopoError> {
    let started = Instant::now();
    let links: Vec<EdgeIndex> = topo.edge_indices().collect();
    for t in params.bins() {
        for &link in &links {
            let data = topo.edge(link);
            if data.score.get(&t).copied().unwrap_or(0.0) > params.link_threshold
                && !data.inference.contains_key(&t)
            {
                infer_link(topo, link, t, None, 1, params)?;
            }
        }
    }
    tracing::debug!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        "link change inference done"
    );
    Ok(())
}

/// Per-endpoint branch statistics for one bin.
struct SideStats {
    ext: Vec<Branch>,
    /// Extension branches over the plain link threshold.
    abs_count: usize,
    /// Extension branches over the threshold scaled by their shared-probe
    /// fraction: a branch carrying only half the link's probes is expected
    /// to see only half the score.
    prop_count: usize,
}

fn side_stats(
    topo: &Topology,
    n: NodeIndex,
    branches: Vec<Branch>,
    t: i64,
    params: &ScoreParams,
) -> Result<SideStats, TopoError> {
    let ext: Vec<Branch> = branches.into_iter().filter(Branch::is_extension).collect();
    let mut abs_count = 0;
    let mut prop_count = 0;
    for branch in &ext {
        let score = branch_score(topo, n, branch, t)?;
        if score > params.link_threshold {
            abs_count += 1;
        }
        if score > proportional_threshold(branch, params) {
            prop_count += 1;
        }
    }
    Ok(SideStats {
        ext,
        abs_count,
        prop_count,
    })
}

fn proportional_threshold(branch: &Branch, params: &ScoreParams) -> f64 {
    branch.shared_count as f64 / branch.probe_count as f64 * params.link_threshold
}

fn branch_score(topo: &Topology, n: NodeIndex, branch: &Branch, t: i64) -> Result<f64, TopoError> {
    let edge = trunk_edge(topo, n, branch)?;
    Ok(topo.edge(edge).score.get(&t).copied().unwrap_or(0.0))
}

fn trunk_edge(topo: &Topology, n: NodeIndex, branch: &Branch) -> Result<EdgeIndex, TopoError> {
    topo.edge_between(n, branch.neighbour)
        .ok_or_else(|| TopoError::MissingEdge(topo.hop(n).clone(), topo.hop(branch.neighbour).clone()))
}

/// Load-balancing signatures at endpoint `n`: for every extension branch
/// over its proportional threshold, the hash of the probes it shares with
/// the link under analysis. More than one distinct signature means the
/// link's probes genuinely split across several onward paths.
fn lb_signatures(
    topo: &Topology,
    link: EdgeIndex,
    n: NodeIndex,
    stats: &SideStats,
    t: i64,
    params: &ScoreParams,
) -> Result<HashSet<u64>, TopoError> {
    let link_probes = &topo.edge(link).probes;
    let mut signatures = HashSet::new();
    for branch in &stats.ext {
        if branch_score(topo, n, branch, t)? <= proportional_threshold(branch, params) {
            continue;
        }
        let edge = trunk_edge(topo, n, branch)?;
        let shared: BTreeSet<&str> = topo
            .edge(edge)
            .probes
            .intersection(link_probes)
            .map(String::as_str)
            .collect();
        let mut hasher = DefaultHasher::new();
        shared.hash(&mut hasher);
        signatures.insert(hasher.finish());
    }
    Ok(signatures)
}

fn multiple_signatures(
    topo: &Topology,
    link: EdgeIndex,
    n: NodeIndex,
    stats: &SideStats,
    t: i64,
    params: &ScoreParams,
) -> Result<bool, TopoError> {
    Ok(lb_signatures(topo, link, n, stats, t, params)?.len() > 1)
}

fn record(topo: &mut Topology, link: EdgeIndex, t: i64, label: Certainty) -> Certainty {
    topo.edge_mut(link).inference.insert(t, label);
    let (a, b) = topo.endpoints(link);
    tracing::trace!(
        bin = t,
        link = %format_args!("{}-{}", topo.hop(a), topo.hop(b)),
        verdict = %label,
        "link verdict recorded"
    );
    label
}

/// Decides whether the elevated score on `link` at bin `t` was caused by
/// the link itself (`Sure`/`Likely`) or belongs to an endpoint node or an
/// upstream link (`Neg`).
///
/// `caller` is the link whose evaluation triggered this one; it is the
/// only loop-detection mechanism and must be threaded through every
/// recursive call. A trunk pointing straight back at the caller is a
/// dependency 2-cycle and resolves to `Likely` on both sides.
fn infer_link(
    topo: &mut Topology,
    link: EdgeIndex,
    t: i64,
    caller: Option<EdgeIndex>,
    depth: usize,
    params: &ScoreParams,
) -> Result<Certainty, TopoError> {
    if depth > 2 {
        let (a, b) = topo.endpoints(link);
        tracing::warn!(
            depth,
            bin = t,
            link = %format_args!("{}-{}", topo.hop(a), topo.hop(b)),
            "deep dependence chain"
        );
    }

    if let Some(&label) = topo.edge(link).inference.get(&t) {
        return Ok(label);
    }
    if topo.edge(link).score.get(&t).copied().unwrap_or(0.0) <= params.link_threshold {
        return Ok(Certainty::Neg);
    }

    let (a, b) = topo.endpoints(link);

    // A single cause explains the whole bin: an endpoint already known to
    // be responsible absorbs the link's elevated score.
    if topo.node(a).inference.get(&t) == Some(&Certainty::Sure)
        || topo.node(b).inference.get(&t) == Some(&Certainty::Sure)
    {
        return Ok(record(topo, link, t, Certainty::Neg));
    }

    let (branches_a, branches_b) = find_branches(topo, a, b);
    let side_a = side_stats(topo, a, branches_a, t, params)?;
    let side_b = side_stats(topo, b, branches_b, t, params)?;

    // 1/ strong extensions on both sides: the change flowed through, the
    // link is only the cause when its probes split on both sides.
    let label = if side_a.prop_count > 1 && side_b.prop_count > 1 {
        if multiple_signatures(topo, link, a, &side_a, t, params)?
            && multiple_signatures(topo, link, b, &side_b, t, params)?
        {
            Certainty::Sure
        } else {
            Certainty::Likely
        }
    }
    // 2/ a single onward trunk on one side, strong extensions on the other.
    else if side_a.ext.len() == 1 && side_b.prop_count > 1 {
        single_trunk_against_spread(topo, link, t, caller, depth, params, a, b, &side_a, &side_b)?
    } else if side_b.ext.len() == 1 && side_a.prop_count > 1 {
        single_trunk_against_spread(topo, link, t, caller, depth, params, b, a, &side_b, &side_a)?
    }
    // 3/ exactly one onward trunk on each side.
    else if side_a.ext.len() == 1 && side_b.ext.len() == 1 {
        let trunk_a = trunk_edge(topo, a, &side_a.ext[0])?;
        let trunk_b = trunk_edge(topo, b, &side_b.ext[0])?;
        if side_a.abs_count == 0 && side_b.abs_count == 0 {
            Certainty::Sure
        } else if caller == Some(trunk_a) {
            match infer_link(topo, trunk_b, t, Some(link), depth + 1, params)? {
                Certainty::Sure => Certainty::Neg,
                _ => Certainty::Likely,
            }
        } else if caller == Some(trunk_b) {
            match infer_link(topo, trunk_a, t, Some(link), depth + 1, params)? {
                Certainty::Sure => Certainty::Neg,
                _ => Certainty::Likely,
            }
        } else {
            let res_a = infer_link(topo, trunk_a, t, Some(link), depth + 1, params)?;
            let res_b = infer_link(topo, trunk_b, t, Some(link), depth + 1, params)?;
            if res_a == Certainty::Sure || res_b == Certainty::Sure {
                Certainty::Neg
            } else if res_a == Certainty::Likely || res_b == Certainty::Likely {
                Certainty::Likely
            } else {
                Certainty::Sure
            }
        }
    }
    // 4/ standalone link: nothing upstream to blame.
    else if side_a.ext.is_empty() && side_b.ext.is_empty() {
        Certainty::Sure
    }
    // 5/ extensions on one side only.
    else if side_a.ext.is_empty() {
        one_sided(topo, link, t, caller, depth, params, b, &side_b)?
    } else if side_b.ext.is_empty() {
        one_sided(topo, link, t, caller, depth, params, a, &side_a)?
    } else {
        Certainty::Neg
    };

    Ok(record(topo, link, t, label))
}

/// Case 2 body: endpoint `single` carries exactly one onward trunk while
/// the opposite endpoint `spread` shows several strong extensions.
#[allow(clippy::too_many_arguments)]
fn single_trunk_against_spread(
    topo: &mut Topology,
    link: EdgeIndex,
    t: i64,
    caller: Option<EdgeIndex>,
    depth: usize,
    params: &ScoreParams,
    single: NodeIndex,
    spread: NodeIndex,
    single_side: &SideStats,
    spread_side: &SideStats,
) -> Result<Certainty, TopoError> {
    if single_side.abs_count == 0 {
        // The trunk stayed quiet, so the change originates here; whether
        // certainly so depends on the spread side really load-balancing.
        return Ok(
            if multiple_signatures(topo, link, spread, spread_side, t, params)? {
                Certainty::Sure
            } else {
                Certainty::Likely
            },
        );
    }
    let trunk = trunk_edge(topo, single, &single_side.ext[0])?;
    if caller == Some(trunk) {
        return Ok(Certainty::Likely);
    }
    Ok(
        match infer_link(topo, trunk, t, Some(link), depth + 1, params)? {
            Certainty::Sure => Certainty::Neg,
            _ => Certainty::Likely,
        },
    )
}

/// Case 5 body: no extension at all on one endpoint; `open` is the other.
fn one_sided(
    topo: &mut Topology,
    link: EdgeIndex,
    t: i64,
    caller: Option<EdgeIndex>,
    depth: usize,
    params: &ScoreParams,
    open: NodeIndex,
    open_side: &SideStats,
) -> Result<Certainty, TopoError> {
    if open_side.prop_count > 1 {
        return Ok(
            if multiple_signatures(topo, link, open, open_side, t, params)? {
                Certainty::Sure
            } else {
                Certainty::Likely
            },
        );
    }
    if open_side.ext.len() == 1 {
        if open_side.abs_count == 0 {
            return Ok(Certainty::Sure);
        }
        let trunk = trunk_edge(topo, open, &open_side.ext[0])?;
        if caller == Some(trunk) {
            return Ok(Certainty::Likely);
        }
        return Ok(
            match infer_link(topo, trunk, t, Some(link), depth + 1, params)? {
                Certainty::Sure => Certainty::Neg,
                _ => Certainty::Likely,
            },
        );
    }
    Ok(Certainty::Neg)
}
