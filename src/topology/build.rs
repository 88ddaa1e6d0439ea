use crate::error::TopoError;
use crate::hop::{Hop, ProbeId};
use crate::topology::{Tag, Topology};
use indexmap::{IndexMap, IndexSet};
use itertools::Itertools;
use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Instant;

/// Cap on retained paths per probe when a filter keeps more than the first
/// one. RIPE Atlas probes measure every 30 minutes, so this holds a week.
pub const MAX_PATHS_PER_PROBE: usize = 336;

/// Timestamped AS-path sequence of one probe, as stored in the input files.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TraceRecord {
    #[serde(default)]
    pub asn_path: Vec<Vec<Hop>>,
    #[serde(default)]
    pub epoch: Vec<i64>,
}

/// One traceroute file: probe id to its measured paths.
pub type TraceFile = IndexMap<ProbeId, TraceRecord>;

/// Which of a probe's paths take part in graph construction.
///
/// With neither a destination nor a window configured, only the first path
/// of each probe is used; otherwise all matching paths are, capped at
/// `max_paths` per probe.
#[derive(Debug, Clone)]
pub struct PathSelection {
    /// A priori known destination; paths not containing it are dropped.
    pub end: Option<Hop>,
    /// Inclusive epoch-second window on the path timestamp.
    pub begin: Option<i64>,
    pub stop: Option<i64>,
    pub max_paths: usize,
}

impl Default for PathSelection {
    fn default() -> PathSelection {
        PathSelection {
            end: None,
            begin: None,
            stop: None,
            max_paths: MAX_PATHS_PER_PROBE,
        }
    }
}

impl PathSelection {
    fn is_windowed(&self) -> bool {
        self.begin.is_some() || self.stop.is_some()
    }

    /// Paths of `record` retained by this selection, in measurement order.
    fn select<'a>(&self, record: &'a TraceRecord) -> Vec<&'a Vec<Hop>> {
        if self.end.is_none() && !self.is_windowed() {
            return record.asn_path.first().into_iter().collect();
        }
        let begin = self.begin.unwrap_or(i64::MIN);
        let stop = self.stop.unwrap_or(i64::MAX);
        let mut kept = Vec::new();
        for (i, path) in record.asn_path.iter().enumerate() {
            if let Some(end) = &self.end {
                if !path.contains(end) {
                    continue;
                }
            }
            if self.is_windowed() {
                // A path without a timestamp cannot be placed in the window.
                match record.epoch.get(i) {
                    Some(ts) if (begin..=stop).contains(ts) => {}
                    _ => continue,
                }
            }
            kept.push(path);
            if kept.len() >= self.max_paths {
                break;
            }
        }
        kept
    }
}

/// Builds the partial topology of a single traceroute batch.
///
/// Every retained path is stripped of blocklisted hops, its first remaining
/// hop recorded as a source (hosting the probe), its last as a destination,
/// and intermediate marker strings as IXPs. Consecutive hop pairs become
/// undirected edges annotated with the traversing probe. `Transit` is
/// assigned only to nodes with no other role.
pub fn build_graph(trace: &TraceFile, selection: &PathSelection) -> Topology {
    let mut topo = Topology::new();
    let mut sources: IndexSet<Hop> = IndexSet::new();
    let mut dests: IndexSet<Hop> = IndexSet::new();
    let mut ixps: IndexSet<Hop> = IndexSet::new();
    let mut hosting: IndexMap<Hop, IndexSet<ProbeId>> = IndexMap::new();

    if let Some(end) = &selection.end {
        dests.insert(end.clone());
    }

    for (probe, record) in trace {
        for path in selection.select(record) {
            let path: Vec<&Hop> = path.iter().filter(|h| !h.is_excluded()).collect();
            let Some(last) = path.len().checked_sub(1) else {
                continue;
            };
            for (i, &hop) in path.iter().enumerate() {
                if i == 0 {
                    sources.insert(hop.clone());
                    hosting
                        .entry(hop.clone())
                        .or_default()
                        .insert(probe.clone());
                } else if i == last {
                    dests.insert(hop.clone());
                } else if hop.is_name() {
                    ixps.insert(hop.clone());
                }
            }
            for (u, v) in path.iter().copied().tuple_windows() {
                let a = topo.ensure_node(u);
                let b = topo.ensure_node(v);
                let edge = topo.ensure_edge(a, b);
                topo.edge_mut(edge).probes.insert(probe.clone());
            }
        }
    }

    for idx in topo.node_indices().collect::<Vec<_>>() {
        let hop = topo.hop(idx).clone();
        let node = topo.node_mut(idx);
        if sources.contains(&hop) {
            node.tags.insert(Tag::Source);
            if let Some(probes) = hosting.get(&hop) {
                node.hosting.extend(probes.iter().cloned());
            }
        }
        if ixps.contains(&hop) {
            node.tags.insert(Tag::Ixp);
        }
        if dests.contains(&hop) {
            node.tags.insert(Tag::Destination);
        }
        if node.tags.is_empty() {
            node.tags.insert(Tag::Transit);
        }
    }

    topo
}

pub fn read_trace_file(path: &Path) -> Result<TraceFile, TopoError> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

/// File-level wrapper around [`build_graph`]: an unreadable or malformed
/// file yields an empty partial graph so the surrounding batch survives.
pub fn graph_from_file(path: &Path, selection: &PathSelection) -> Topology {
    let started = Instant::now();
    match read_trace_file(path) {
        Ok(trace) => {
            let topo = build_graph(&trace, selection);
            tracing::info!(
                file = %path.display(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                nodes = topo.node_count(),
                "traceroute file handled"
            );
            topo
        }
        Err(err) => {
            tracing::error!(file = %path.display(), %err, "skipping unreadable traceroute file");
            Topology::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(paths: Vec<Vec<Hop>>, epochs: Vec<i64>) -> TraceRecord {
        TraceRecord {
            asn_path: paths,
            epoch: epochs,
        }
    }

    fn single_probe(paths: Vec<Vec<Hop>>, epochs: Vec<i64>) -> TraceFile {
        TraceFile::from([("pb1".to_owned(), record(paths, epochs))])
    }

    #[test]
    fn single_path_tags_source_transit_destination() {
        let trace = single_probe(
            vec![vec![Hop::Asn(10), Hop::Asn(20), Hop::Asn(30)]],
            vec![100],
        );
        let topo = build_graph(&trace, &PathSelection::default());
        assert_eq!(topo.node_count(), 3);
        assert_eq!(topo.edge_count(), 2);

        let src = topo.node(topo.node_index(&Hop::Asn(10)).unwrap());
        assert_eq!(src.tags.iter().copied().collect::<Vec<_>>(), [Tag::Source]);
        assert!(src.hosting.contains("pb1"));

        let mid = topo.node(topo.node_index(&Hop::Asn(20)).unwrap());
        assert_eq!(mid.tags.iter().copied().collect::<Vec<_>>(), [Tag::Transit]);

        let dst = topo.node(topo.node_index(&Hop::Asn(30)).unwrap());
        assert_eq!(
            dst.tags.iter().copied().collect::<Vec<_>>(),
            [Tag::Destination]
        );

        let edge = topo.edge_by_hops(&Hop::Asn(10), &Hop::Asn(20)).unwrap();
        assert!(topo.edge(edge).probes.contains("pb1"));
    }

    #[test]
    fn intermediate_strings_are_ixps() {
        let trace = single_probe(
            vec![vec![
                Hop::Asn(10),
                Hop::from("ix1"),
                Hop::Asn(20),
                Hop::Asn(30),
            ]],
            vec![100],
        );
        let topo = build_graph(&trace, &PathSelection::default());
        let ixp = topo.node(topo.node_index(&Hop::from("ix1")).unwrap());
        assert!(ixp.tags.contains(&Tag::Ixp));
        assert!(!ixp.tags.contains(&Tag::Transit));
    }

    #[test]
    fn blocklisted_hops_are_stripped() {
        let trace = single_probe(
            vec![vec![Hop::Asn(10), Hop::from("private"), Hop::Asn(20)]],
            vec![100],
        );
        let topo = build_graph(&trace, &PathSelection::default());
        assert_eq!(topo.node_count(), 2);
        assert_eq!(topo.edge_count(), 1);
        assert!(topo.edge_by_hops(&Hop::Asn(10), &Hop::Asn(20)).is_some());
        assert!(topo.node_index(&Hop::from("private")).is_none());
    }

    #[test]
    fn default_selection_keeps_first_path_only() {
        let trace = single_probe(
            vec![
                vec![Hop::Asn(10), Hop::Asn(20)],
                vec![Hop::Asn(10), Hop::Asn(99)],
            ],
            vec![100, 200],
        );
        let topo = build_graph(&trace, &PathSelection::default());
        assert!(topo.node_index(&Hop::Asn(99)).is_none());
        assert_eq!(topo.edge_count(), 1);
    }

    #[test]
    fn window_keeps_matching_timestamps() {
        let trace = single_probe(
            vec![
                vec![Hop::Asn(10), Hop::Asn(20)],
                vec![Hop::Asn(10), Hop::Asn(30)],
                vec![Hop::Asn(10), Hop::Asn(40)],
            ],
            vec![100, 200, 300],
        );
        let selection = PathSelection {
            begin: Some(150),
            stop: Some(250),
            ..PathSelection::default()
        };
        let topo = build_graph(&trace, &selection);
        assert!(topo.node_index(&Hop::Asn(20)).is_none());
        assert!(topo.node_index(&Hop::Asn(30)).is_some());
        assert!(topo.node_index(&Hop::Asn(40)).is_none());
    }

    #[test]
    fn destination_filter_keeps_paths_through_it() {
        let trace = single_probe(
            vec![
                vec![Hop::Asn(10), Hop::Asn(20)],
                vec![Hop::Asn(10), Hop::Asn(30), Hop::Asn(50)],
                vec![Hop::Asn(10), Hop::Asn(40), Hop::Asn(50)],
            ],
            vec![100, 200, 300],
        );
        let selection = PathSelection {
            end: Some(Hop::Asn(50)),
            ..PathSelection::default()
        };
        let topo = build_graph(&trace, &selection);
        assert!(topo.node_index(&Hop::Asn(20)).is_none());
        assert!(topo.node_index(&Hop::Asn(30)).is_some());
        assert!(topo.node_index(&Hop::Asn(40)).is_some());
        let dst = topo.node(topo.node_index(&Hop::Asn(50)).unwrap());
        assert!(dst.tags.contains(&Tag::Destination));
    }

    #[test]
    fn per_probe_cap_applies_to_windowed_selection() {
        let paths: Vec<Vec<Hop>> = (0..5)
            .map(|i| vec![Hop::Asn(10), Hop::Asn(100 + i)])
            .collect();
        let trace = single_probe(paths, (0..5).map(|i| 100 + i).collect());
        let selection = PathSelection {
            begin: Some(0),
            stop: Some(1_000),
            max_paths: 2,
            ..PathSelection::default()
        };
        let topo = build_graph(&trace, &selection);
        assert_eq!(topo.edge_count(), 2);
        assert!(topo.node_index(&Hop::Asn(102)).is_none());
    }

    #[test]
    fn fully_blocklisted_path_contributes_nothing() {
        let trace = single_probe(vec![vec![Hop::from("private"), Hop::from("CGN")]], vec![100]);
        let topo = build_graph(&trace, &PathSelection::default());
        assert!(topo.is_empty());
    }
}
