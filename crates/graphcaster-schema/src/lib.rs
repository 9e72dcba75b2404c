//! Graphcaster schema model
//!
//! Declarative descriptions of how tabular or hierarchical documents map onto
//! a labeled-property graph:
//! - Vertex and edge collections (`vertex_config`, `edge_config`)
//! - Named transforms (pure field-level functions and renames)
//! - Resources: actor pipelines (`vertex` / `transform` / `edge` / `descend`)
//!   applied to each document of a data source
//! - Filter expressions evaluated in-process or rendered for source pushdown
//!
//! Everything round-trips through YAML. The runtime lives in
//! `graphcaster-engine`; this crate is pure data model and validation.

pub mod actor;
pub mod edge;
pub mod field;
pub mod filter;
pub mod resource;
pub mod schema;
pub mod transform;
pub mod vertex;

pub use actor::ActorStep;
pub use edge::{Edge, EdgeConfig, EdgeKey, VertexWeight, WeightConfig};
pub use field::{Field, FieldType, Index, IndexType};
pub use filter::{ComparisonOperator, FilterExpression, LogicalOperator};
pub use resource::Resource;
pub use schema::{Schema, SchemaMetadata};
pub use transform::TransformSpec;
pub use vertex::{Vertex, VertexConfig};

use thiserror::Error;

/// Errors surfaced while loading or validating a schema.
///
/// `Validation` is fatal: a schema that fails validation must not be used to
/// ingest anything.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("schema validation failed: {0}")]
    Validation(String),

    #[error("malformed actor step: {0}")]
    ActorStep(String),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SchemaError {
    pub fn validation(msg: impl Into<String>) -> Self {
        SchemaError::Validation(msg.into())
    }
}
