//! Actor pipeline steps and YAML shape normalization.
//!
//! Hand-written schemas use several equivalent spellings for each step:
//!
//! - vertex:   `{vertex: user}`
//! - transform: `{transform: {...}}`, or a bare spec (`name:` / `map:` /
//!   `foo:` / `function:` / `input:`)
//! - edge:     `{edge: {...}}`, `{create_edge: {...}}`, or inline
//!   `source:`/`target:` (aliases `from`/`to`)
//! - descend:  `{descend: {...}}`, or inline `key:`/`any_key:` with
//!   `apply:`/`pipeline:` (a single-map value counts as a one-step list)
//!
//! All spellings normalize to [`ActorStep`]; serialization emits the
//! canonical wrapped form, so parse∘serialize is the identity.

use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::edge::Edge;
use crate::transform::TransformSpec;
use crate::SchemaError;

/// Emit one vertex of the named type from the current scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VertexStep {
    pub vertex: String,
    /// When set, only these fields are picked (subset of the vertex fields).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_fields: Option<Vec<String>>,
}

/// Enter a nested part of the document and run a sub-pipeline there.
#[derive(Debug, Clone, PartialEq)]
pub struct DescendStep {
    pub key: Option<String>,
    pub any_key: bool,
    pub steps: Vec<ActorStep>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActorStep {
    Vertex(VertexStep),
    Transform(TransformSpec),
    Edge(Edge),
    Descend(DescendStep),
}

fn flatten_into(outer: &mut Map<String, Value>, inner: Value) -> Result<(), SchemaError> {
    match inner {
        Value::Object(m) => {
            for (k, v) in m {
                outer.insert(k, v);
            }
            Ok(())
        }
        other => Err(SchemaError::ActorStep(format!(
            "expected a mapping, got: {other}"
        ))),
    }
}

/// A single map where a list of steps is expected counts as one step.
fn steps_list(v: Value) -> Vec<Value> {
    match v {
        Value::Array(items) => items,
        other => vec![other],
    }
}

impl ActorStep {
    pub fn from_value(value: Value) -> Result<Self, SchemaError> {
        let Value::Object(mut map) = value else {
            return Err(SchemaError::ActorStep(format!(
                "actor step must be a mapping, got: {value}"
            )));
        };

        if map.contains_key("vertex") {
            let step: VertexStep = serde_json::from_value(Value::Object(map))
                .map_err(|e| SchemaError::ActorStep(e.to_string()))?;
            return Ok(ActorStep::Vertex(step));
        }

        if let Some(inner) = map.remove("transform") {
            flatten_into(&mut map, inner)?;
            return Self::parse_transform(map);
        }

        for wrapper in ["edge", "create_edge"] {
            if let Some(inner) = map.remove(wrapper) {
                flatten_into(&mut map, inner)?;
                return Self::parse_edge(map);
            }
        }
        let has_source = map.contains_key("source") || map.contains_key("from");
        let has_target = map.contains_key("target") || map.contains_key("to");
        if has_source && has_target {
            return Self::parse_edge(map);
        }

        if let Some(inner) = map.remove("descend") {
            flatten_into(&mut map, inner)?;
        }
        if map.contains_key("key")
            || map.contains_key("any_key")
            || map.contains_key("apply")
            || map.contains_key("pipeline")
        {
            return Self::parse_descend(map);
        }

        if map.contains_key("name")
            || map.contains_key("map")
            || map.contains_key("foo")
            || map.contains_key("function")
            || map.contains_key("input")
        {
            return Self::parse_transform(map);
        }

        Err(SchemaError::ActorStep(format!(
            "unrecognized actor step shape: {}",
            Value::Object(map)
        )))
    }

    fn parse_transform(map: Map<String, Value>) -> Result<Self, SchemaError> {
        let mut spec: TransformSpec = serde_json::from_value(Value::Object(map))
            .map_err(|e| SchemaError::ActorStep(e.to_string()))?;
        spec.finish_init()?;
        Ok(ActorStep::Transform(spec))
    }

    fn parse_edge(map: Map<String, Value>) -> Result<Self, SchemaError> {
        let edge: Edge = serde_json::from_value(Value::Object(map))
            .map_err(|e| SchemaError::ActorStep(e.to_string()))?;
        Ok(ActorStep::Edge(edge))
    }

    fn parse_descend(mut map: Map<String, Value>) -> Result<Self, SchemaError> {
        let key = match map.remove("key") {
            Some(Value::String(s)) => Some(s),
            Some(Value::Null) | None => None,
            Some(other) => {
                return Err(SchemaError::ActorStep(format!(
                    "descend key must be a string, got: {other}"
                )))
            }
        };
        let any_key = match map.remove("any_key") {
            Some(Value::Bool(b)) => b,
            None => false,
            Some(other) => {
                return Err(SchemaError::ActorStep(format!(
                    "any_key must be a boolean, got: {other}"
                )))
            }
        };
        if key.is_some() && any_key {
            return Err(SchemaError::validation(
                "descend step cannot set both key and any_key",
            ));
        }
        let raw_steps = map
            .remove("apply")
            .or_else(|| map.remove("pipeline"))
            .ok_or_else(|| {
                SchemaError::ActorStep("descend step needs apply or pipeline".to_string())
            })?;
        let steps = steps_list(raw_steps)
            .into_iter()
            .map(ActorStep::from_value)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ActorStep::Descend(DescendStep { key, any_key, steps }))
    }

    /// Parse a whole pipeline (list of step shapes).
    pub fn pipeline_from_values(values: Vec<Value>) -> Result<Vec<Self>, SchemaError> {
        values.into_iter().map(Self::from_value).collect()
    }
}

impl<'de> Deserialize<'de> for ActorStep {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let v = Value::deserialize(deserializer)?;
        ActorStep::from_value(v).map_err(de::Error::custom)
    }
}

impl Serialize for ActorStep {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            ActorStep::Vertex(step) => step.serialize(serializer),
            ActorStep::Transform(spec) => {
                let mut m = serializer.serialize_map(Some(1))?;
                m.serialize_entry("transform", spec)?;
                m.end()
            }
            ActorStep::Edge(edge) => {
                let mut m = serializer.serialize_map(Some(1))?;
                m.serialize_entry("edge", edge)?;
                m.end()
            }
            ActorStep::Descend(step) => {
                #[derive(Serialize)]
                struct Inner<'a> {
                    #[serde(skip_serializing_if = "Option::is_none")]
                    key: Option<&'a String>,
                    #[serde(skip_serializing_if = "std::ops::Not::not")]
                    any_key: bool,
                    apply: &'a [ActorStep],
                }
                let mut m = serializer.serialize_map(Some(1))?;
                m.serialize_entry(
                    "descend",
                    &Inner {
                        key: step.key.as_ref(),
                        any_key: step.any_key,
                        apply: &step.steps,
                    },
                )?;
                m.end()
            }
        }
    }
}
