//! Graphcaster runtime
//!
//! Takes a validated [`graphcaster_schema::Schema`] and turns documents into
//! graph batches:
//! - [`actor`]: the actor-tree interpreter that walks each document and
//!   accumulates vertex and edge contributions
//! - [`container`]: the per-batch graph container with identity-based vertex
//!   merging and edge deduplication
//! - [`caster`]: batching, worker fan-out and writer hand-off
//! - [`source`] / [`writer`]: document input and graph output boundaries
//!
//! The interpreter is deterministic: worker results are folded back in source
//! order, and all accumulation is over ordered maps.

pub mod actor;
pub mod caster;
pub mod container;
pub mod context;
pub mod location;
pub mod merge;
pub mod registry;
pub mod source;
pub mod transform;
pub mod writer;

pub use actor::ActorTree;
pub use caster::{Caster, IngestSummary, IngestionParams};
pub use container::{ConflictPolicy, GraphContainer, GraphItem};
pub use context::{ActionContext, EdgeEntry, JsonMap, RuntimeEdgeKey, VertexRep};
pub use location::{LocationIndex, LocationStep};
pub use merge::merge_doc_basis;
pub use registry::TransformRegistry;
pub use source::{DocumentSource, FilePattern, InMemorySource, JsonFileSource};
pub use transform::CompiledTransform;
pub use writer::{GraphWriter, JsonlWriter, NullWriter};

use thiserror::Error;

/// Errors surfaced by the runtime.
///
/// `TransformInput` is recoverable at the contribution level: the interpreter
/// drops the affected contribution with a warning and keeps walking.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Schema(#[from] graphcaster_schema::SchemaError),

    #[error("unknown transform function '{0}'")]
    UnknownTransform(String),

    #[error("transform input error: {0}")]
    TransformInput(String),

    #[error("identity conflict on vertex '{vertex_type}' key {key}: field '{field}'")]
    IdentityConflict {
        vertex_type: String,
        key: String,
        field: String,
    },

    #[error("writer error: {0}")]
    Write(String),

    #[error("worker pool error: {0}")]
    WorkerPool(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
