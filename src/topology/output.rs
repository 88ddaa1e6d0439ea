use crate::error::TopoError;
use crate::hop::{Hop, ProbeId};
use crate::topology::{Certainty, NodeData, Tag, Topology};
use petgraph::graph::NodeIndex;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Node-link JSON document, the on-disk form of a [`Topology`].
///
/// Nodes carry synthetic contiguous ids (their listing order); links
/// reference those ids and additionally repeat the endpoint hops as
/// `src_name`/`tgt_name` for the benefit of the visualizer. Set-valued
/// attributes are emitted as sorted arrays, per-bin mappings as sorted
/// `{epoch, value}` arrays.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub congestion: Option<bool>,
    pub directed: bool,
    pub multigraph: bool,
    pub graph: JsonMap<String, JsonValue>,
    pub nodes: Vec<NodeEntry>,
    pub links: Vec<LinkEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeEntry {
    pub id: usize,
    pub name: Hop,
    pub tag: Vec<u8>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hosting: Vec<ProbeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe: Option<Vec<ProbeId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_neighbour: Option<Vec<Hop>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub score: Vec<ScorePoint>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inference: Vec<InferencePoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkEntry {
    pub source: usize,
    pub target: usize,
    pub src_name: Hop,
    pub tgt_name: Hop,
    pub probe: Vec<ProbeId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub score: Vec<ScorePoint>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inference: Vec<InferencePoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScorePoint {
    pub epoch: i64,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferencePoint {
    pub epoch: i64,
    pub value: u8,
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

fn sorted<T: Ord + Clone>(set: impl IntoIterator<Item = T>) -> Vec<T> {
    let mut items: Vec<T> = set.into_iter().collect();
    items.sort();
    items
}

fn score_points(score: &BTreeMap<i64, f64>) -> Vec<ScorePoint> {
    score
        .iter()
        .map(|(&epoch, &value)| ScorePoint {
            epoch,
            value: round3(value),
        })
        .collect()
}

/// Negative verdicts are dropped: the visualizer treats absence as "not a
/// cause", and the bulk of bins is negative.
fn inference_points(inference: &BTreeMap<i64, Certainty>) -> Vec<InferencePoint> {
    inference
        .iter()
        .filter(|(_, &c)| c != Certainty::Neg)
        .map(|(&epoch, &c)| InferencePoint {
            epoch,
            value: c as u8,
        })
        .collect()
}

fn node_entry(id: usize, hop: &Hop, node: &NodeData) -> NodeEntry {
    NodeEntry {
        id,
        name: hop.clone(),
        tag: node.tags.iter().map(|&t| t as u8).collect(),
        hosting: sorted(node.hosting.iter().cloned()),
        probe: node.probes.as_ref().map(|p| sorted(p.iter().cloned())),
        effective_neighbour: node
            .effective_neighbours
            .as_ref()
            .map(|n| sorted(n.iter().cloned())),
        score: score_points(&node.score),
        inference: inference_points(&node.inference),
    }
}

pub fn to_document(topo: &Topology, congestion: bool) -> GraphDocument {
    let nodes = topo
        .nodes()
        .enumerate()
        .map(|(id, (_, hop, node))| node_entry(id, hop, node))
        .collect();

    let links = topo
        .edge_indices()
        .map(|edge| {
            let (u, v) = topo.endpoints(edge);
            let data = topo.edge(edge);
            LinkEntry {
                source: u.index(),
                target: v.index(),
                src_name: topo.hop(u).clone(),
                tgt_name: topo.hop(v).clone(),
                probe: sorted(data.probes.iter().cloned()),
                score: score_points(&data.score),
                inference: inference_points(&data.inference),
            }
        })
        .collect();

    GraphDocument {
        congestion: congestion.then_some(true),
        directed: false,
        multigraph: false,
        graph: topo.meta.clone(),
        nodes,
        links,
    }
}

/// Rebuilds a [`Topology`] from its document form. Inverse of
/// [`to_document`] up to score rounding and dropped negative verdicts.
pub fn topology_from_document(doc: &GraphDocument) -> Result<Topology, TopoError> {
    let mut topo = Topology::new();
    topo.meta = doc.graph.clone();

    let mut by_id: HashMap<usize, NodeIndex> = HashMap::with_capacity(doc.nodes.len());
    for entry in &doc.nodes {
        let before = topo.node_count();
        let idx = topo.ensure_node(&entry.name);
        if topo.node_count() == before {
            return Err(TopoError::InvalidDocument(format!(
                "node {} listed twice",
                entry.name
            )));
        }
        if by_id.insert(entry.id, idx).is_some() {
            return Err(TopoError::InvalidDocument(format!(
                "duplicate node id {}",
                entry.id
            )));
        }
        let node = topo.node_mut(idx);
        for &code in &entry.tag {
            let tag = Tag::from_code(code)
                .ok_or_else(|| TopoError::InvalidDocument(format!("unknown tag {code}")))?;
            node.tags.insert(tag);
        }
        node.hosting.extend(entry.hosting.iter().cloned());
        node.probes = entry.probe.as_ref().map(|p| p.iter().cloned().collect());
        node.effective_neighbours = entry
            .effective_neighbour
            .as_ref()
            .map(|n| n.iter().cloned().collect());
        restore_series(&entry.score, &entry.inference, &mut node.score, &mut node.inference)?;
    }

    for entry in &doc.links {
        let resolve = |id: usize| {
            by_id.get(&id).copied().ok_or_else(|| {
                TopoError::InvalidDocument(format!("link references unknown node id {id}"))
            })
        };
        let a = resolve(entry.source)?;
        let b = resolve(entry.target)?;
        let edge = topo.ensure_edge(a, b);
        let data = topo.edge_mut(edge);
        data.probes.extend(entry.probe.iter().cloned());
        restore_series(&entry.score, &entry.inference, &mut data.score, &mut data.inference)?;
    }

    Ok(topo)
}

fn restore_series(
    score: &[ScorePoint],
    inference: &[InferencePoint],
    score_map: &mut BTreeMap<i64, f64>,
    inference_map: &mut BTreeMap<i64, Certainty>,
) -> Result<(), TopoError> {
    for point in score {
        score_map.insert(point.epoch, point.value);
    }
    for point in inference {
        let label = Certainty::from_code(point.value).ok_or_else(|| {
            TopoError::InvalidDocument(format!("unknown inference value {}", point.value))
        })?;
        inference_map.insert(point.epoch, label);
    }
    Ok(())
}

pub fn read_document(path: &Path) -> Result<GraphDocument, TopoError> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

/// Writes the document to a temporary file in the target directory and
/// renames it into place, so an interrupted run leaves no partial output.
pub fn write_document(path: &Path, doc: &GraphDocument) -> Result<(), TopoError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let tmp = NamedTempFile::new_in(dir)?;
    let mut writer = BufWriter::new(tmp.as_file());
    serde_json::to_writer(&mut writer, doc)?;
    writer.flush()?;
    drop(writer);
    tmp.persist(path)?;
    Ok(())
}
