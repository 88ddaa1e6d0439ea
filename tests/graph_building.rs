use as_topo::hop::Hop;
use as_topo::pipeline;
use as_topo::topology::build::{build_graph, PathSelection, TraceFile, TraceRecord};
use as_topo::topology::output::{read_document, to_document, topology_from_document, write_document};
use as_topo::topology::{merge_all, Topology};
use serde_json::json;
use std::collections::BTreeMap;
use std::fs;

fn partial(probe: &str, paths: Vec<Vec<Hop>>) -> Topology {
    let trace = TraceFile::from([(
        probe.to_owned(),
        TraceRecord {
            asn_path: paths,
            epoch: vec![100],
        },
    )]);
    build_graph(&trace, &PathSelection::default())
}

type NodeSignature = BTreeMap<String, (Vec<u8>, Vec<String>)>;
type EdgeSignature = BTreeMap<(String, String), Vec<String>>;

/// Order-insensitive view of a topology: node attributes keyed by hop,
/// edge probe sets keyed by the sorted endpoint pair.
fn signature(topo: &Topology) -> (NodeSignature, EdgeSignature) {
    let mut nodes = NodeSignature::new();
    for (_, hop, data) in topo.nodes() {
        let tags = data.tags.iter().map(|&t| t as u8).collect();
        let mut hosting: Vec<String> = data.hosting.iter().cloned().collect();
        hosting.sort();
        nodes.insert(hop.to_string(), (tags, hosting));
    }
    let mut edges = EdgeSignature::new();
    for edge in topo.edge_indices() {
        let (u, v) = topo.endpoints(edge);
        let mut key = (topo.hop(u).to_string(), topo.hop(v).to_string());
        if key.0 > key.1 {
            key = (key.1, key.0);
        }
        let mut probes: Vec<String> = topo.edge(edge).probes.iter().cloned().collect();
        probes.sort();
        edges.insert(key, probes);
    }
    (nodes, edges)
}

#[test]
fn merge_result_ignores_input_order() {
    let partials = vec![
        partial("pb1", vec![vec![Hop::Asn(10), Hop::from("ix1"), Hop::Asn(20)]]),
        partial("pb2", vec![vec![Hop::Asn(10), Hop::Asn(20), Hop::Asn(30)]]),
        partial("pb3", vec![vec![Hop::Asn(30), Hop::Asn(20)]]),
    ];

    let forward = merge_all(partials.clone());
    let reversed = merge_all(partials.iter().rev().cloned());
    let rotated = merge_all([
        partials[1].clone(),
        partials[2].clone(),
        partials[0].clone(),
    ]);

    assert_eq!(signature(&forward), signature(&reversed));
    assert_eq!(signature(&forward), signature(&rotated));
}

#[test]
fn file_batch_builds_merges_and_survives_bad_input() {
    let dir = tempfile::tempdir().unwrap();
    let good1 = dir.path().join("batch1.json");
    let good2 = dir.path().join("batch2.json");
    let bad = dir.path().join("batch3.json");
    fs::write(
        &good1,
        json!({"pb1": {"asn_path": [[10, 20, 30]], "epoch": [100]}}).to_string(),
    )
    .unwrap();
    fs::write(
        &good2,
        json!({"pb2": {"asn_path": [[10, 20, 40]], "epoch": [100]}}).to_string(),
    )
    .unwrap();
    fs::write(&bad, "{ not json").unwrap();

    let topo = pipeline::build_topology(
        &[good1, good2, bad],
        &PathSelection::default(),
        serde_json::Map::new(),
    );

    assert_eq!(topo.node_count(), 4);
    assert_eq!(topo.edge_count(), 3);
    let shared = topo.edge_by_hops(&Hop::Asn(10), &Hop::Asn(20)).unwrap();
    let probes = &topo.edge(shared).probes;
    assert!(probes.contains("pb1") && probes.contains("pb2"));
}

#[test]
fn written_document_round_trips_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("graph.json");

    let mut topo = merge_all([
        partial("pb1", vec![vec![Hop::Asn(10), Hop::from("ix1"), Hop::Asn(20)]]),
        partial("pb2", vec![vec![Hop::Asn(10), Hop::Asn(20)]]),
    ]);
    topo.meta.insert("suffix".to_owned(), json!(".json"));

    write_document(&out, &to_document(&topo, false)).unwrap();
    let restored = topology_from_document(&read_document(&out).unwrap()).unwrap();

    assert_eq!(signature(&topo), signature(&restored));
    assert_eq!(restored.meta.get("suffix"), Some(&json!(".json")));

    // The only file left behind is the output itself: no temp residue.
    let names: Vec<String> = fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["graph.json".to_owned()]);
}
