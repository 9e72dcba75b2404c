//! Resources: named actor pipelines bound to a document shape.

use serde::{Deserialize, Serialize};

use crate::actor::{ActorStep, DescendStep};
use crate::edge::Edge;
use crate::vertex::VertexConfig;
use crate::SchemaError;

fn default_true() -> bool {
    true
}

/// A named pipeline applied to every document of one data source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    #[serde(alias = "name")]
    pub resource_name: String,
    /// The root of the actor pipeline.
    #[serde(default, alias = "pipeline")]
    pub apply: Vec<ActorStep>,
    /// Emit edges right after each level's subtree completes. When off, all
    /// edges of the document are produced once after the walk finishes.
    #[serde(default = "default_true")]
    pub edge_greedy: bool,
    /// Fields whose list values are merged across contributions rather than
    /// overwritten.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub merge_collections: Vec<String>,
}

impl Resource {
    /// Check that every vertex and edge endpoint the pipeline references is
    /// defined.
    pub fn finish_init(&self, vertex_config: &VertexConfig) -> Result<(), SchemaError> {
        if self.apply.is_empty() {
            return Err(SchemaError::validation(format!(
                "resource '{}' has an empty pipeline",
                self.resource_name
            )));
        }
        for name in self.vertex_references() {
            if !vertex_config.contains(name) {
                return Err(SchemaError::validation(format!(
                    "resource '{}' references undefined vertex '{name}'",
                    self.resource_name
                )));
            }
        }
        Ok(())
    }

    /// Vertex type names mentioned anywhere in the pipeline, depth first.
    pub fn vertex_references(&self) -> Vec<&str> {
        let mut out = Vec::new();
        collect_vertices(&self.apply, &mut out);
        out
    }

    /// Edge declarations anywhere in the pipeline, depth first.
    pub fn edge_references(&self) -> Vec<&Edge> {
        let mut out = Vec::new();
        collect_edges(&self.apply, &mut out);
        out
    }
}

fn collect_vertices<'a>(steps: &'a [ActorStep], out: &mut Vec<&'a str>) {
    for step in steps {
        match step {
            ActorStep::Vertex(v) => out.push(v.vertex.as_str()),
            ActorStep::Edge(e) => {
                out.push(e.source.as_str());
                out.push(e.target.as_str());
            }
            ActorStep::Descend(DescendStep { steps, .. }) => collect_vertices(steps, out),
            ActorStep::Transform(_) => {}
        }
    }
}

fn collect_edges<'a>(steps: &'a [ActorStep], out: &mut Vec<&'a Edge>) {
    for step in steps {
        match step {
            ActorStep::Edge(e) => out.push(e),
            ActorStep::Descend(DescendStep { steps, .. }) => collect_edges(steps, out),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vc() -> VertexConfig {
        let mut vc: VertexConfig = serde_yaml::from_str(
            r#"
vertices:
- name: package
  fields: [name, version]
- name: maintainer
  fields: [email]
"#,
        )
        .unwrap();
        vc.finish_init().unwrap();
        vc
    }

    #[test]
    fn pipeline_alias_and_defaults() {
        let r: Resource = serde_yaml::from_str(
            r#"
name: deb_packages
pipeline:
- vertex: package
"#,
        )
        .unwrap();
        assert_eq!(r.resource_name, "deb_packages");
        assert!(r.edge_greedy);
        assert_eq!(r.apply.len(), 1);
        r.finish_init(&vc()).unwrap();
    }

    #[test]
    fn nested_references_collected() {
        let r: Resource = serde_yaml::from_str(
            r#"
resource_name: deb
apply:
- vertex: package
- key: depends
  apply:
  - vertex: package
  - source: package
    target: package
    relation_from_key: true
"#,
        )
        .unwrap();
        assert_eq!(
            r.vertex_references(),
            ["package", "package", "package", "package"]
        );
        assert_eq!(r.edge_references().len(), 1);
        r.finish_init(&vc()).unwrap();
    }

    #[test]
    fn undefined_vertex_rejected() {
        let r: Resource = serde_yaml::from_str(
            r#"
name: bad
apply:
- vertex: ghost
"#,
        )
        .unwrap();
        assert!(r.finish_init(&vc()).is_err());
    }

    #[test]
    fn empty_pipeline_rejected() {
        let r: Resource = serde_yaml::from_str("name: hollow\napply: []\n").unwrap();
        assert!(r.finish_init(&vc()).is_err());
    }
}
