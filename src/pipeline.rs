use crate::congestion::inference::{infer_links, infer_nodes};
use crate::congestion::{accumulate_file, normalize, prepare_probe_index, ScoreParams};
use crate::error::TopoError;
use crate::topology::build::{graph_from_file, PathSelection};
use crate::topology::{merge_all, Topology};
use rayon::prelude::*;
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::path::PathBuf;
use std::time::Instant;

/// Builds the merged topology out of a batch of traceroute files.
///
/// One worker per file, pool sized to the available cores; each worker
/// owns its partial graph until handoff. A file that cannot be read
/// contributes an empty partial and is only logged, while a panicking
/// worker aborts the whole batch. `meta` is attached to the merged graph
/// and travels into the output document.
pub fn build_topology(
    files: &[PathBuf],
    selection: &PathSelection,
    meta: JsonMap<String, JsonValue>,
) -> Topology {
    let started = Instant::now();
    let partials: Vec<Topology> = files
        .par_iter()
        .map(|file| graph_from_file(file, selection))
        .collect();
    let mut merged = merge_all(partials);
    merged.meta = meta;
    tracing::info!(
        files = files.len(),
        nodes = merged.node_count(),
        links = merged.edge_count(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "topology built"
    );
    merged
}

/// Scores the topology from a batch of change-detection files and runs the
/// per-bin change-location inference, in the fixed phase order: probe
/// index, accumulation, normalization, node pass, link pass.
pub fn run_congestion(
    topo: &mut Topology,
    files: &[PathBuf],
    params: &ScoreParams,
) -> Result<(), TopoError> {
    let started = Instant::now();

    let index = prepare_probe_index(topo);
    for file in files {
        accumulate_file(topo, &index, file, params);
    }
    normalize(topo);

    infer_nodes(topo, params);
    infer_links(topo, params)?;

    topo.meta
        .insert("congestion_begin".to_owned(), params.begin.into());
    topo.meta
        .insert("congestion_end".to_owned(), params.stop.into());
    topo.meta
        .insert("cpt_method".to_owned(), params.method.clone().into());
    topo.meta
        .insert("cpt_bin_size".to_owned(), params.bin_size.into());
    topo.meta
        .insert("link_threshold".to_owned(), params.link_threshold.into());
    topo.meta
        .insert("node_threshold".to_owned(), params.node_threshold.into());

    tracing::info!(
        files = files.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "congestion scoring and inference done"
    );
    Ok(())
}
