use crate::congestion::{ProbeIndex, ScoreParams};
use crate::error::TopoError;
use crate::hop::ProbeId;
use crate::topology::Topology;
use indexmap::IndexMap;
use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Instant;

/// Change-detection output of one probe: timestamps plus one value column
/// per detection method. Only the configured method column is consumed.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChangeRecord {
    #[serde(default)]
    pub epoch: Vec<i64>,
    #[serde(flatten)]
    pub methods: IndexMap<String, Vec<f64>>,
}

/// One change-detection file. Probes may map to `null` records.
pub type ChangeFile = IndexMap<ProbeId, Option<ChangeRecord>>;

/// Folds one file of change records into the per-bin score sums of every
/// link and node the probe is indexed against. Records outside
/// `[begin, stop]` are ignored; timestamps are floored to their bin start.
pub fn accumulate(
    topo: &mut Topology,
    index: &ProbeIndex,
    changes: &ChangeFile,
    params: &ScoreParams,
) {
    for (probe, record) in changes {
        let Some(record) = record else { continue };
        let Some(values) = record.methods.get(&params.method) else {
            continue;
        };
        for (&t, &value) in record.epoch.iter().zip(values) {
            if t < params.begin || t > params.stop {
                continue;
            }
            let bin = params.bin_of(t);
            if let Some(links) = index.links.get_vec(probe) {
                for &edge in links {
                    *topo.edge_mut(edge).score.entry(bin).or_insert(0.0) += value;
                }
            }
            if let Some(nodes) = index.nodes.get_vec(probe) {
                for &node in nodes {
                    *topo.node_mut(node).score.entry(bin).or_insert(0.0) += value;
                }
            }
        }
    }
}

pub fn read_change_file(path: &Path) -> Result<ChangeFile, TopoError> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

/// File-level wrapper around [`accumulate`]: an unreadable or malformed
/// file is logged and skipped, leaving the sums gathered so far intact.
pub fn accumulate_file(
    topo: &mut Topology,
    index: &ProbeIndex,
    path: &Path,
    params: &ScoreParams,
) {
    let started = Instant::now();
    match read_change_file(path) {
        Ok(changes) => {
            accumulate(topo, index, &changes, params);
            tracing::debug!(
                file = %path.display(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "change file handled"
            );
        }
        Err(err) => {
            tracing::error!(file = %path.display(), %err, "skipping unreadable change file");
        }
    }
}

/// Turns per-bin sums into per-probe averages: each link's bin values are
/// divided by its probe count, each node's by the size of its divergent
/// set. A link with an empty probe set violates a construction invariant;
/// it is logged and left unnormalized.
pub fn normalize(topo: &mut Topology) {
    for edge in topo.edge_indices().collect::<Vec<_>>() {
        let count = topo.edge(edge).probes.len();
        if count == 0 {
            let (u, v) = topo.endpoints(edge);
            tracing::error!(
                link = %format_args!("{}-{}", topo.hop(u), topo.hop(v)),
                "link has no probes, skipping normalization"
            );
            continue;
        }
        for value in topo.edge_mut(edge).score.values_mut() {
            *value /= count as f64;
        }
    }

    for node in topo.node_indices().collect::<Vec<_>>() {
        let data = topo.node_mut(node);
        let Some(probes) = &data.probes else { continue };
        let count = probes.len();
        if count == 0 {
            continue;
        }
        for value in data.score.values_mut() {
            *value /= count as f64;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::congestion::{prepare_probe_index, CHANGE_METHOD};
    use crate::hop::Hop;
    use crate::topology::build::{build_graph, PathSelection, TraceFile, TraceRecord};
    use crate::topology::merge_all;

    fn two_probe_topology() -> Topology {
        merge_all(["pb1", "pb2"].map(|probe| {
            let trace = TraceFile::from([(
                probe.to_owned(),
                TraceRecord {
                    asn_path: vec![vec![Hop::Asn(10), Hop::Asn(20), Hop::Asn(30)]],
                    epoch: vec![0],
                },
            )]);
            build_graph(&trace, &PathSelection::default())
        }))
    }

    fn change_record(epochs: Vec<i64>, values: Vec<f64>) -> Option<ChangeRecord> {
        Some(ChangeRecord {
            epoch: epochs,
            methods: IndexMap::from([(CHANGE_METHOD.to_owned(), values)]),
        })
    }

    #[test]
    fn shared_edge_averages_probe_contributions() {
        let mut topo = two_probe_topology();
        let index = prepare_probe_index(&mut topo);
        let params = ScoreParams::new(0, 3600);

        let changes = ChangeFile::from([
            ("pb1".to_owned(), change_record(vec![10], vec![1.0])),
            ("pb2".to_owned(), change_record(vec![20], vec![0.0])),
        ]);
        accumulate(&mut topo, &index, &changes, &params);
        normalize(&mut topo);

        let edge = topo.edge_by_hops(&Hop::Asn(10), &Hop::Asn(20)).unwrap();
        assert_eq!(topo.edge(edge).score.get(&0), Some(&0.5));
    }

    #[test]
    fn records_outside_the_window_are_ignored() {
        let mut topo = two_probe_topology();
        let index = prepare_probe_index(&mut topo);
        let params = ScoreParams::new(0, 100);

        let changes = ChangeFile::from([(
            "pb1".to_owned(),
            change_record(vec![50, 101, 2000], vec![1.0, 1.0, 1.0]),
        )]);
        accumulate(&mut topo, &index, &changes, &params);

        let edge = topo.edge_by_hops(&Hop::Asn(10), &Hop::Asn(20)).unwrap();
        assert_eq!(topo.edge(edge).score.get(&0), Some(&1.0));
        assert_eq!(topo.edge(edge).score.len(), 1);
    }

    #[test]
    fn timestamps_bucket_to_bin_starts() {
        let mut topo = two_probe_topology();
        let index = prepare_probe_index(&mut topo);
        let params = ScoreParams::new(0, 3600);

        let changes = ChangeFile::from([(
            "pb1".to_owned(),
            change_record(vec![599, 601, 650], vec![1.0, 2.0, 3.0]),
        )]);
        accumulate(&mut topo, &index, &changes, &params);

        let edge = topo.edge_by_hops(&Hop::Asn(10), &Hop::Asn(20)).unwrap();
        assert_eq!(topo.edge(edge).score.get(&0), Some(&1.0));
        assert_eq!(topo.edge(edge).score.get(&600), Some(&5.0));
    }

    #[test]
    fn null_records_and_unknown_probes_are_tolerated() {
        let mut topo = two_probe_topology();
        let index = prepare_probe_index(&mut topo);
        let params = ScoreParams::new(0, 3600);

        let changes: ChangeFile = serde_json::from_str(
            r#"{"pb1": null, "stranger": {"epoch": [10], "cpt_poisson&MBIC": [1.0]}}"#,
        )
        .unwrap();
        accumulate(&mut topo, &index, &changes, &params);

        let edge = topo.edge_by_hops(&Hop::Asn(10), &Hop::Asn(20)).unwrap();
        assert!(topo.edge(edge).score.is_empty());
    }

    #[test]
    fn missing_method_column_contributes_nothing() {
        let mut topo = two_probe_topology();
        let index = prepare_probe_index(&mut topo);
        let params = ScoreParams::new(0, 3600);

        let changes = ChangeFile::from([(
            "pb1".to_owned(),
            Some(ChangeRecord {
                epoch: vec![10],
                methods: IndexMap::from([("other_method".to_owned(), vec![1.0])]),
            }),
        )]);
        accumulate(&mut topo, &index, &changes, &params);

        let edge = topo.edge_by_hops(&Hop::Asn(10), &Hop::Asn(20)).unwrap();
        assert!(topo.edge(edge).score.is_empty());
    }
}
