//! The top-level schema document: metadata, vertex and edge configs, the
//! transform library and the resources.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::actor::{ActorStep, DescendStep};
use crate::edge::EdgeConfig;
use crate::resource::Resource;
use crate::transform::TransformSpec;
use crate::vertex::VertexConfig;
use crate::SchemaError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// A complete, validated schema. Construct through [`Schema::from_yaml_str`]
/// or [`Schema::from_yaml_file`]; both validate before returning.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schema {
    #[serde(default)]
    pub general: SchemaMetadata,
    #[serde(default)]
    pub vertex_config: VertexConfig,
    #[serde(default, skip_serializing_if = "edge_config_is_empty")]
    pub edge_config: EdgeConfig,
    #[serde(default)]
    pub resources: Vec<Resource>,
    /// Named transform library; pipeline steps reference entries by name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub transforms: BTreeMap<String, TransformSpec>,
}

fn edge_config_is_empty(ec: &EdgeConfig) -> bool {
    ec.edges.is_empty()
}

impl Schema {
    pub fn from_yaml_str(text: &str) -> Result<Self, SchemaError> {
        let mut schema: Schema = serde_yaml::from_str(text)?;
        schema.finish_init()?;
        Ok(schema)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    pub fn to_yaml_string(&self) -> Result<String, SchemaError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Validate and normalize every section. Library transforms take their
    /// name from the map key.
    pub fn finish_init(&mut self) -> Result<(), SchemaError> {
        self.vertex_config.finish_init()?;
        self.edge_config.finish_init(&self.vertex_config)?;

        for (key, spec) in &mut self.transforms {
            if spec.name.is_none() {
                spec.name = Some(key.clone());
            }
            spec.finish_init()?;
        }

        let mut seen = std::collections::BTreeSet::new();
        for resource in &self.resources {
            if !seen.insert(resource.resource_name.clone()) {
                return Err(SchemaError::validation(format!(
                    "duplicate resource name '{}'",
                    resource.resource_name
                )));
            }
            resource.finish_init(&self.vertex_config)?;
            check_transform_refs(&resource.apply, &self.transforms)?;
        }
        Ok(())
    }

    pub fn fetch_resource(&self, name: &str) -> Result<&Resource, SchemaError> {
        self.resources
            .iter()
            .find(|r| r.resource_name == name)
            .ok_or_else(|| {
                SchemaError::validation(format!("resource '{name}' is not defined"))
            })
    }

    pub fn resource_names(&self) -> impl Iterator<Item = &str> {
        self.resources.iter().map(|r| r.resource_name.as_str())
    }

    /// Resolve a pipeline transform against the library: references merge
    /// with their library entry, inline specs pass through.
    pub fn resolve_transform(&self, spec: &TransformSpec) -> Result<TransformSpec, SchemaError> {
        match spec.name.as_deref() {
            Some(name) => match self.transforms.get(name) {
                Some(library) => Ok(spec.merge_from(library)),
                None if spec.is_reference() => Err(SchemaError::validation(format!(
                    "transform '{name}' is not defined in the library"
                ))),
                None => Ok(spec.clone()),
            },
            None => Ok(spec.clone()),
        }
    }
}

fn check_transform_refs(
    steps: &[ActorStep],
    library: &BTreeMap<String, TransformSpec>,
) -> Result<(), SchemaError> {
    for step in steps {
        match step {
            ActorStep::Transform(spec) => {
                if spec.is_reference() {
                    let name = spec.name.as_deref().unwrap_or_default();
                    if !library.contains_key(name) {
                        return Err(SchemaError::validation(format!(
                            "transform '{name}' is not defined in the library"
                        )));
                    }
                }
            }
            ActorStep::Descend(DescendStep { steps, .. }) => {
                check_transform_refs(steps, library)?;
            }
            _ => {}
        }
    }
    Ok(())
}
