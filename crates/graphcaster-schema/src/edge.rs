//! Edge definitions, weights and the edge collection config.

use serde::{Deserialize, Serialize};

use crate::field::{Field, Index};
use crate::filter::FilterExpression;
use crate::vertex::VertexConfig;
use crate::SchemaError;

/// Definition key of an edge collection: `(source, target, purpose)`.
/// The third slot disambiguates parallel collections between the same pair
/// of vertex types.
pub type EdgeKey = (String, String, Option<String>);

fn default_true() -> bool {
    true
}

/// How an edge collection participates in ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EdgeType {
    /// Created while documents are cast.
    #[default]
    Direct,
    /// Declared for downstream use; never produced by the interpreter.
    Indirect,
}

/// A vertex-based edge attribute: fields pulled from an accumulated vertex
/// and attached to the edge under composite `name@field` names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VertexWeight {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default = "default_true")]
    pub keep_vertex_name: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterExpression>,
}

impl VertexWeight {
    /// Composite attribute name: `vertex@field` unless prefixing is off or
    /// the weight is nameless.
    pub fn cfield(&self, field: &str) -> String {
        match (&self.name, self.keep_vertex_name) {
            (Some(name), true) => format!("{name}@{field}"),
            _ => field.to_string(),
        }
    }
}

/// Edge attribute configuration: plain fields read from the document scope
/// (`direct`) plus vertex-based weights (`vertices`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeightConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vertices: Vec<VertexWeight>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub direct: Vec<Field>,
}

impl WeightConfig {
    pub fn direct_names(&self) -> Vec<&str> {
        self.direct.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty() && self.direct.is_empty()
    }
}

/// An edge between two vertex types.
///
/// The match/exclude fields are location discriminants: when a document
/// yields same-typed vertices at several depths, `match_source` /
/// `match_target` select candidates whose location path contains the given
/// key, and `exclude_source` / `exclude_target` drop them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    #[serde(alias = "from")]
    pub source: String,
    #[serde(alias = "to")]
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_target: Option<String>,
    /// Fixed relation label for every emitted edge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,
    /// Field whose value becomes the relation label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation_field: Option<String>,
    /// Derive the relation label from the location key of the target.
    #[serde(default)]
    pub relation_from_key: bool,
    /// Disambiguates parallel collections between the same vertex pair.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weights: Option<WeightConfig>,
    #[serde(default, alias = "index", skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<Index>,
    #[serde(rename = "type", default)]
    pub edge_type: EdgeType,
    /// For indirect edges, the vertex type the connection passes through.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub by: Option<String>,
    /// Declared for downstream use only; skipped by ingestion.
    #[serde(default)]
    pub aux: bool,
}

impl Edge {
    pub fn between(source: impl Into<String>, target: impl Into<String>) -> Self {
        Edge {
            source: source.into(),
            target: target.into(),
            match_source: None,
            match_target: None,
            exclude_source: None,
            exclude_target: None,
            relation: None,
            relation_field: None,
            relation_from_key: false,
            purpose: None,
            weights: None,
            indexes: Vec::new(),
            edge_type: EdgeType::Direct,
            by: None,
            aux: false,
        }
    }

    pub fn edge_key(&self) -> EdgeKey {
        (self.source.clone(), self.target.clone(), self.purpose.clone())
    }

    /// Check vertex references and expand vertex-name indexes to composite
    /// field form.
    pub fn finish_init(&mut self, vertex_config: &VertexConfig) -> Result<(), SchemaError> {
        for endpoint in [&self.source, &self.target]
            .into_iter()
            .chain(self.by.as_ref())
        {
            if !vertex_config.contains(endpoint) {
                return Err(SchemaError::validation(format!(
                    "edge {} -> {} references undefined vertex '{}'",
                    self.source, self.target, endpoint
                )));
            }
        }
        for index in &mut self.indexes {
            if let Some(vertex_name) = index.name.clone() {
                let prefix = format!("{vertex_name}@");
                let raw: Vec<String> = if index.fields.is_empty() {
                    vertex_config.identity_fields(&vertex_name)?.to_vec()
                } else {
                    index.fields.clone()
                };
                index.fields = raw
                    .into_iter()
                    .map(|f| {
                        if f.starts_with(&prefix) {
                            f
                        } else {
                            format!("{prefix}{f}")
                        }
                    })
                    .collect();
            }
        }
        Ok(())
    }

    /// Merge another definition of the same edge into this one.
    /// Scalars fill in when unset, lists concatenate.
    pub fn update(&mut self, other: &Edge) {
        if self.match_source.is_none() {
            self.match_source = other.match_source.clone();
        }
        if self.match_target.is_none() {
            self.match_target = other.match_target.clone();
        }
        if self.exclude_source.is_none() {
            self.exclude_source = other.exclude_source.clone();
        }
        if self.exclude_target.is_none() {
            self.exclude_target = other.exclude_target.clone();
        }
        if self.relation.is_none() {
            self.relation = other.relation.clone();
        }
        if self.relation_field.is_none() {
            self.relation_field = other.relation_field.clone();
        }
        self.relation_from_key |= other.relation_from_key;
        if self.weights.is_none() {
            self.weights = other.weights.clone();
        }
        self.indexes.extend(other.indexes.iter().cloned());
    }
}

/// The set of edge collections of a schema.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EdgeConfig {
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl EdgeConfig {
    pub fn finish_init(&mut self, vertex_config: &VertexConfig) -> Result<(), SchemaError> {
        for e in &mut self.edges {
            e.finish_init(vertex_config)?;
        }
        Ok(())
    }

    /// Ingestion-relevant edges (skips `aux` and indirect declarations).
    pub fn active_edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges
            .iter()
            .filter(|e| !e.aux && e.edge_type == EdgeType::Direct)
    }

    pub fn get(&self, key: &EdgeKey) -> Option<&Edge> {
        self.edges.iter().find(|e| e.edge_key() == *key)
    }

    /// Vertex types that take part in at least one edge.
    pub fn connected_vertices(&self) -> std::collections::BTreeSet<&str> {
        self.edges
            .iter()
            .flat_map(|e| [e.source.as_str(), e.target.as_str()])
            .collect()
    }
}
