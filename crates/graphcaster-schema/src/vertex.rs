//! Vertex definitions and the vertex collection config.

use serde::{Deserialize, Serialize};

use crate::field::{Field, Index};
use crate::filter::FilterExpression;
use crate::SchemaError;

/// Identity field synthesized for blank vertices.
pub const BLANK_IDENTITY_FIELD: &str = "_key";

/// A vertex type: its fields, identity and optional filters.
///
/// Identity fields carry primary-key semantics: vertices with equal identity
/// tuples are merged in the graph container, and edges reference vertices by
/// identity tuple. Resolution order: explicit `identity`, else the fields of
/// the first declared index, else all declared fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vertex {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<Field>,
    #[serde(default)]
    pub identity: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<FilterExpression>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<Index>,
    /// Physical collection name override, passed through to writers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dbname: Option<String>,
}

impl Vertex {
    pub fn named(name: impl Into<String>, fields: &[&str]) -> Self {
        Vertex {
            name: name.into(),
            fields: fields.iter().map(|f| Field::named(*f)).collect(),
            identity: Vec::new(),
            filters: Vec::new(),
            indexes: Vec::new(),
            dbname: None,
        }
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// Resolve identity and make sure every identity field is declared.
    /// `blank` vertices with no identity get the synthetic `_key` field.
    fn normalize_identity(&mut self, blank: bool) -> Result<(), SchemaError> {
        if self.identity.is_empty() {
            if let Some(first) = self.indexes.first() {
                self.identity = first.fields.clone();
            }
        }
        if self.identity.is_empty() && blank {
            self.identity = vec![BLANK_IDENTITY_FIELD.to_string()];
        }
        if self.identity.is_empty() {
            self.identity = self.fields.iter().map(|f| f.name.clone()).collect();
        }
        if self.identity.is_empty() {
            return Err(SchemaError::validation(format!(
                "vertex '{}' must define identity fields",
                self.name
            )));
        }
        for id_field in self.identity.clone() {
            if !self.fields.iter().any(|f| f.name == id_field) {
                self.fields.push(Field::named(id_field));
            }
        }
        Ok(())
    }

    /// Collection name used by writers.
    pub fn storage_name(&self) -> &str {
        self.dbname.as_deref().unwrap_or(&self.name)
    }
}

/// The set of vertex types of a schema.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VertexConfig {
    #[serde(default)]
    pub vertices: Vec<Vertex>,
    /// Vertex types that may be emitted without any source data; the engine
    /// synthesizes their identity key.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blank_vertices: Vec<String>,
}

impl VertexConfig {
    /// Validate and normalize: unique names, blank vertices declared,
    /// identities resolved.
    pub fn finish_init(&mut self) -> Result<(), SchemaError> {
        let mut seen = std::collections::BTreeSet::new();
        for v in &self.vertices {
            if !seen.insert(v.name.clone()) {
                return Err(SchemaError::validation(format!(
                    "duplicate vertex name '{}'",
                    v.name
                )));
            }
        }
        for blank in &self.blank_vertices {
            if !seen.contains(blank) {
                return Err(SchemaError::validation(format!(
                    "blank vertex '{blank}' is not defined as a vertex"
                )));
            }
        }
        let blanks: std::collections::BTreeSet<_> = self.blank_vertices.iter().cloned().collect();
        for v in &mut self.vertices {
            v.normalize_identity(blanks.contains(&v.name))?;
        }
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vertices.iter().any(|v| v.name == name)
    }

    pub fn get(&self, name: &str) -> Result<&Vertex, SchemaError> {
        self.vertices.iter().find(|v| v.name == name).ok_or_else(|| {
            SchemaError::validation(format!("vertex '{name}' is not defined"))
        })
    }

    pub fn identity_fields(&self, name: &str) -> Result<&[String], SchemaError> {
        Ok(&self.get(name)?.identity)
    }

    pub fn filters(&self, name: &str) -> &[FilterExpression] {
        self.vertices
            .iter()
            .find(|v| v.name == name)
            .map(|v| v.filters.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_blank(&self, name: &str) -> bool {
        self.blank_vertices.iter().any(|b| b == name)
    }

    pub fn vertex_names(&self) -> impl Iterator<Item = &str> {
        self.vertices.iter().map(|v| v.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(yaml: &str) -> VertexConfig {
        let mut vc: VertexConfig = serde_yaml::from_str(yaml).unwrap();
        vc.finish_init().unwrap();
        vc
    }

    #[test]
    fn explicit_identity_wins() {
        let vc = config(
            r#"
vertices:
- name: publication
  fields: [arxiv, doi, created]
  identity: [arxiv, doi]
  indexes:
  - fields: [created]
"#,
        );
        assert_eq!(vc.identity_fields("publication").unwrap(), ["arxiv", "doi"]);
    }

    #[test]
    fn identity_from_first_index() {
        let vc = config(
            r#"
vertices:
- name: package
  fields: [name, version]
  indexes:
  - fields: [name]
"#,
        );
        assert_eq!(vc.identity_fields("package").unwrap(), ["name"]);
    }

    #[test]
    fn identity_defaults_to_all_fields() {
        let vc = config(
            r#"
vertices:
- name: feature
  fields: [name, value]
"#,
        );
        assert_eq!(vc.identity_fields("feature").unwrap(), ["name", "value"]);
    }

    #[test]
    fn identity_fields_are_appended_to_fields() {
        let vc = config(
            r#"
vertices:
- name: mention
  fields: [text]
  identity: [_key]
"#,
        );
        let v = vc.get("mention").unwrap();
        assert!(v.field_names().contains(&"_key"));
    }

    #[test]
    fn blank_vertex_gets_synthetic_identity() {
        let vc = config(
            r#"
vertices:
- name: marker
blank_vertices: [marker]
"#,
        );
        assert_eq!(vc.identity_fields("marker").unwrap(), [BLANK_IDENTITY_FIELD]);
    }

    #[test]
    fn undeclared_blank_vertex_rejected() {
        let mut vc: VertexConfig = serde_yaml::from_str(
            r#"
vertices:
- name: user
  fields: [id]
blank_vertices: [ghost]
"#,
        )
        .unwrap();
        assert!(vc.finish_init().is_err());
    }

    #[test]
    fn duplicate_vertex_rejected() {
        let mut vc: VertexConfig = serde_yaml::from_str(
            r#"
vertices:
- name: user
  fields: [id]
- name: user
  fields: [id]
"#,
        )
        .unwrap();
        assert!(vc.finish_init().is_err());
    }

    #[test]
    fn vertex_without_fields_or_identity_rejected() {
        let mut vc: VertexConfig =
            serde_yaml::from_str("vertices:\n- name: empty\n").unwrap();
        assert!(vc.finish_init().is_err());
    }
}
