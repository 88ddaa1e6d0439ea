//! Builds an AS-level network topology out of traceroute measurements and,
//! given per-probe RTT change-detection streams, localizes the link(s) or
//! node(s) responsible for each time bin.
//!
//! The pipeline runs in ordered phases: per-file partial graphs are built in
//! parallel, merged into a single annotated topology, scored per time bin
//! from change-detection records, and finally walked by the recursive
//! link/node inference. The result is serialized as a node-link JSON
//! document for downstream visualization.

pub mod congestion;
pub mod error;
pub mod hop;
pub mod pipeline;
pub mod topology;

pub use crate::error::TopoError;
pub use crate::hop::{Hop, ProbeId};
pub use crate::topology::{Certainty, Tag, Topology};
