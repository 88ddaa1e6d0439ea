use crate::hop::Hop;

/// Errors surfaced by the topology and congestion stages.
///
/// Per-file read failures during batch processing are deliberately *not*
/// represented here: the batch keeps going and the failure is only logged.
#[derive(Debug, thiserror::Error)]
pub enum TopoError {
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("could not persist output file: {0}")]
    Persist(#[from] tempfile::PersistError),

    /// An internal invariant gave way, e.g. a branch was reported for a
    /// neighbour pair that has no edge.
    #[error("{0} and {1} are not connected")]
    MissingEdge(Hop, Hop),

    #[error("invalid graph document: {0}")]
    InvalidDocument(String),
}
