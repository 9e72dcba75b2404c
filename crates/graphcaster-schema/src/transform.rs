//! Transform declarations.
//!
//! A transform either names a registered function (`function`, alias `foo`)
//! applied to `input` fields and producing `output` fields, or is a pure
//! rename described by `map` (`{input_field: output_field}`). Schema-level
//! `transforms` form a library; pipeline steps reference library entries by
//! `name` and may override input/output/params.

use std::collections::BTreeMap;

use serde::de::Deserializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::SchemaError;

/// Accept a bare string where a list of field names is expected.
fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        One(String),
        Many(Vec<String>),
    }
    Ok(match Raw::deserialize(deserializer)? {
        Raw::One(s) => vec![s],
        Raw::Many(v) => v,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformSpec {
    /// Reference into the schema transform library, or the library key
    /// itself when declared there.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Registered function to apply; a spec without one is a pure rename.
    #[serde(default, alias = "foo", skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    #[serde(
        default,
        deserialize_with = "string_or_list",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub input: Vec<String>,
    #[serde(
        default,
        deserialize_with = "string_or_list",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub output: Vec<String>,
    /// `{input_field: output_field}` renames.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub map: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, Value>,
    /// Restrict the transform's output to one vertex type of the level.
    #[serde(
        default,
        alias = "to_vertex",
        skip_serializing_if = "Option::is_none"
    )]
    pub target_vertex: Option<String>,
}

impl TransformSpec {
    /// Derive input/output from `map` and default output to input; reject
    /// specs with nothing to do.
    pub fn finish_init(&mut self) -> Result<(), SchemaError> {
        if !self.map.is_empty() {
            if self.input.is_empty() {
                self.input = self.map.keys().cloned().collect();
            }
            if self.output.is_empty() {
                self.output = self.map.values().cloned().collect();
            }
        }
        if self.output.is_empty() && !self.input.is_empty() {
            self.output = self.input.clone();
        }
        if self.map.is_empty() && self.input.len() == self.output.len() {
            self.map = self
                .input
                .iter()
                .cloned()
                .zip(self.output.iter().cloned())
                .collect();
        }
        if self.input.is_empty() && self.output.is_empty() && self.name.is_none() {
            return Err(SchemaError::validation(
                "transform needs input/output, map, or a library name",
            ));
        }
        Ok(())
    }

    /// True for a library reference with no local behavior of its own.
    pub fn is_reference(&self) -> bool {
        self.name.is_some() && self.function.is_none() && self.map.is_empty()
    }

    /// Resolve this spec against its library entry: the library provides the
    /// function and defaults, local input/output/params override.
    pub fn merge_from(&self, library: &TransformSpec) -> TransformSpec {
        let mut merged = library.clone();
        merged.name = self.name.clone().or_else(|| library.name.clone());
        if !self.input.is_empty() {
            merged.input = self.input.clone();
        }
        if !self.output.is_empty() {
            merged.output = self.output.clone();
        } else if !self.input.is_empty() && library.output.is_empty() {
            merged.output = merged.input.clone();
        }
        if !self.params.is_empty() {
            for (k, v) in &self.params {
                merged.params.insert(k.clone(), v.clone());
            }
        }
        if self.target_vertex.is_some() {
            merged.target_vertex = self.target_vertex.clone();
        }
        // re-derive the rename map for the overridden field lists
        if merged.input.len() == merged.output.len() {
            merged.map = merged
                .input
                .iter()
                .cloned()
                .zip(merged.output.iter().cloned())
                .collect();
        }
        merged
    }
}
