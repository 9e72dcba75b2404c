//! The per-batch graph container.
//!
//! Vertices are keyed by type and identity tuple; repeated contributions to
//! the same identity merge under the configured conflict policy. Edges are
//! deduplicated on `(source key, target key, attributes)` within their
//! runtime bucket. All storage is ordered, so iteration and serialization
//! are deterministic.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::context::{JsonMap, RuntimeEdgeKey};
use crate::EngineError;

/// What to do when two contributions to the same vertex identity disagree on
/// a property value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Later contributions overwrite.
    #[default]
    LastWins,
    /// The first value sticks.
    FirstWins,
    /// Disagreement is an ingestion error.
    Error,
}

/// Stable identity key: the JSON encoding of the identity value tuple.
pub fn identity_key(identity_fields: &[String], props: &JsonMap) -> Option<String> {
    let values: Vec<&Value> = identity_fields
        .iter()
        .map(|f| props.get(f).filter(|v| !v.is_null()))
        .collect::<Option<Vec<_>>>()?;
    serde_json::to_string(&values).ok()
}

#[derive(Debug, Clone, PartialEq)]
struct StoredEdge {
    source_key: String,
    target_key: String,
    attrs: JsonMap,
}

/// One output item, vertices always ahead of the edges that reference them.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum GraphItem {
    Vertex {
        vertex_type: String,
        key: String,
        props: JsonMap,
    },
    Edge {
        source_type: String,
        target_type: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        relation: Option<String>,
        source_key: String,
        target_key: String,
        attrs: JsonMap,
    },
}

#[derive(Debug, Default)]
pub struct GraphContainer {
    policy: ConflictPolicy,
    merge_collections: Vec<String>,
    vertices: BTreeMap<String, BTreeMap<String, JsonMap>>,
    edges: BTreeMap<RuntimeEdgeKey, Vec<StoredEdge>>,
}

impl GraphContainer {
    pub fn new(policy: ConflictPolicy) -> Self {
        GraphContainer {
            policy,
            ..Default::default()
        }
    }

    pub fn with_merge_collections(mut self, fields: Vec<String>) -> Self {
        self.merge_collections = fields;
        self
    }

    /// Insert or merge one vertex. `key` is the identity key of `props`.
    pub fn upsert_vertex(
        &mut self,
        vertex_type: &str,
        key: String,
        props: JsonMap,
    ) -> Result<(), EngineError> {
        let slot = self
            .vertices
            .entry(vertex_type.to_string())
            .or_default()
            .entry(key.clone());
        match slot {
            std::collections::btree_map::Entry::Vacant(e) => {
                e.insert(props);
            }
            std::collections::btree_map::Entry::Occupied(mut e) => {
                let existing = e.get_mut();
                for (field, value) in props {
                    if value.is_null() {
                        continue;
                    }
                    if self.merge_collections.iter().any(|c| *c == field) {
                        if let (Some(Value::Array(old)), Value::Array(new)) =
                            (existing.get_mut(&field), &value)
                        {
                            for item in new {
                                if !old.contains(item) {
                                    old.push(item.clone());
                                }
                            }
                            continue;
                        }
                    }
                    match existing.get(&field) {
                        None => {
                            existing.insert(field, value);
                        }
                        Some(old) if *old == value || old.is_null() => {
                            existing.insert(field, value);
                        }
                        Some(_) => match self.policy {
                            ConflictPolicy::LastWins => {
                                existing.insert(field, value);
                            }
                            ConflictPolicy::FirstWins => {}
                            ConflictPolicy::Error => {
                                return Err(EngineError::IdentityConflict {
                                    vertex_type: vertex_type.to_string(),
                                    key,
                                    field,
                                });
                            }
                        },
                    }
                }
            }
        }
        Ok(())
    }

    /// Add one edge, dropping exact duplicates within the bucket.
    pub fn add_edge(
        &mut self,
        key: RuntimeEdgeKey,
        source_key: String,
        target_key: String,
        attrs: JsonMap,
    ) {
        let edge = StoredEdge {
            source_key,
            target_key,
            attrs,
        };
        let bucket = self.edges.entry(key).or_default();
        if !bucket.contains(&edge) {
            bucket.push(edge);
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.values().map(BTreeMap::len).sum()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(Vec::len).sum()
    }

    pub fn vertex_keys(&self, vertex_type: &str) -> Vec<&str> {
        self.vertices
            .get(vertex_type)
            .map(|m| m.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn get_vertex(&self, vertex_type: &str, key: &str) -> Option<&JsonMap> {
        self.vertices.get(vertex_type)?.get(key)
    }

    pub fn edges_for(&self, key: &RuntimeEdgeKey) -> usize {
        self.edges.get(key).map(Vec::len).unwrap_or(0)
    }

    /// Drop vertices that no edge touches. Applied before writing when the
    /// caller asked for connected output only.
    pub fn discard_disconnected(&mut self) {
        let mut touched: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for ((source_type, target_type, _), bucket) in &self.edges {
            for edge in bucket {
                touched
                    .entry(source_type.as_str())
                    .or_default()
                    .push(edge.source_key.as_str());
                touched
                    .entry(target_type.as_str())
                    .or_default()
                    .push(edge.target_key.as_str());
            }
        }
        let mut dropped = 0usize;
        for (vertex_type, slots) in &mut self.vertices {
            let keep = touched.get(vertex_type.as_str());
            slots.retain(|key, _| {
                let retain = keep.is_some_and(|keys| keys.iter().any(|k| k == key));
                if !retain {
                    dropped += 1;
                }
                retain
            });
        }
        if dropped > 0 {
            debug!(dropped, "discarded disconnected vertices");
        }
    }

    /// Everything in write order: all vertices, then all edges.
    pub fn items(&self) -> Vec<GraphItem> {
        let mut out = Vec::with_capacity(self.vertex_count() + self.edge_count());
        for (vertex_type, slots) in &self.vertices {
            for (key, props) in slots {
                out.push(GraphItem::Vertex {
                    vertex_type: vertex_type.clone(),
                    key: key.clone(),
                    props: props.clone(),
                });
            }
        }
        for ((source_type, target_type, relation), bucket) in &self.edges {
            for edge in bucket {
                out.push(GraphItem::Edge {
                    source_type: source_type.clone(),
                    target_type: target_type.clone(),
                    relation: relation.clone(),
                    source_key: edge.source_key.clone(),
                    target_key: edge.target_key.clone(),
                    attrs: edge.attrs.clone(),
                });
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(pairs: &[(&str, Value)]) -> JsonMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn key_of(fields: &[&str], p: &JsonMap) -> String {
        let fields: Vec<String> = fields.iter().map(|s| s.to_string()).collect();
        identity_key(&fields, p).unwrap()
    }

    #[test]
    fn identity_key_is_value_tuple() {
        let p = props(&[("name", json!("dpkg")), ("version", json!("1.15"))]);
        assert_eq!(key_of(&["name"], &p), r#"["dpkg"]"#);
        assert_eq!(key_of(&["name", "version"], &p), r#"["dpkg","1.15"]"#);
    }

    #[test]
    fn identity_key_missing_field_is_none() {
        let p = props(&[("name", json!("dpkg"))]);
        let fields = vec!["name".to_string(), "version".to_string()];
        assert!(identity_key(&fields, &p).is_none());
    }

    #[test]
    fn same_identity_merges() {
        let mut c = GraphContainer::new(ConflictPolicy::LastWins);
        let a = props(&[("name", json!("dpkg")), ("version", json!("1.15"))]);
        let b = props(&[("name", json!("dpkg")), ("section", json!("admin"))]);
        c.upsert_vertex("package", key_of(&["name"], &a), a).unwrap();
        c.upsert_vertex("package", key_of(&["name"], &b), b).unwrap();
        assert_eq!(c.vertex_count(), 1);
        let merged = c.get_vertex("package", r#"["dpkg"]"#).unwrap();
        assert_eq!(merged["version"], json!("1.15"));
        assert_eq!(merged["section"], json!("admin"));
    }

    #[test]
    fn last_wins_overwrites_first_wins_keeps() {
        let a = props(&[("name", json!("x")), ("v", json!(1))]);
        let b = props(&[("name", json!("x")), ("v", json!(2))]);

        let mut last = GraphContainer::new(ConflictPolicy::LastWins);
        last.upsert_vertex("t", key_of(&["name"], &a), a.clone()).unwrap();
        last.upsert_vertex("t", key_of(&["name"], &b), b.clone()).unwrap();
        assert_eq!(last.get_vertex("t", r#"["x"]"#).unwrap()["v"], json!(2));

        let mut first = GraphContainer::new(ConflictPolicy::FirstWins);
        first.upsert_vertex("t", key_of(&["name"], &a), a.clone()).unwrap();
        first.upsert_vertex("t", key_of(&["name"], &b), b.clone()).unwrap();
        assert_eq!(first.get_vertex("t", r#"["x"]"#).unwrap()["v"], json!(1));

        let mut strict = GraphContainer::new(ConflictPolicy::Error);
        strict.upsert_vertex("t", key_of(&["name"], &a), a).unwrap();
        let err = strict.upsert_vertex("t", key_of(&["name"], &b), b).unwrap_err();
        assert!(matches!(err, EngineError::IdentityConflict { .. }));
    }

    #[test]
    fn equal_values_never_conflict() {
        let a = props(&[("name", json!("x")), ("v", json!(1))]);
        let mut strict = GraphContainer::new(ConflictPolicy::Error);
        strict.upsert_vertex("t", key_of(&["name"], &a), a.clone()).unwrap();
        strict.upsert_vertex("t", key_of(&["name"], &a), a).unwrap();
        assert_eq!(strict.vertex_count(), 1);
    }

    #[test]
    fn duplicate_edges_dropped() {
        let mut c = GraphContainer::new(ConflictPolicy::LastWins);
        let key = ("a".to_string(), "b".to_string(), None);
        c.add_edge(key.clone(), "k1".into(), "k2".into(), JsonMap::new());
        c.add_edge(key.clone(), "k1".into(), "k2".into(), JsonMap::new());
        c.add_edge(
            key.clone(),
            "k1".into(),
            "k2".into(),
            props(&[("w", json!(1))]),
        );
        assert_eq!(c.edges_for(&key), 2);
    }

    #[test]
    fn items_order_vertices_first() {
        let mut c = GraphContainer::new(ConflictPolicy::LastWins);
        let key = ("user".to_string(), "user".to_string(), Some("follows".to_string()));
        c.add_edge(key, r#"["a"]"#.into(), r#"["b"]"#.into(), JsonMap::new());
        let a = props(&[("id", json!("a"))]);
        c.upsert_vertex("user", key_of(&["id"], &a), a).unwrap();
        let items = c.items();
        assert!(matches!(items[0], GraphItem::Vertex { .. }));
        assert!(matches!(items[1], GraphItem::Edge { .. }));
    }

    #[test]
    fn discard_disconnected_drops_untouched() {
        let mut c = GraphContainer::new(ConflictPolicy::LastWins);
        for id in ["a", "b", "lonely"] {
            let p = props(&[("id", json!(id))]);
            c.upsert_vertex("user", key_of(&["id"], &p), p).unwrap();
        }
        c.add_edge(
            ("user".to_string(), "user".to_string(), None),
            r#"["a"]"#.into(),
            r#"["b"]"#.into(),
            JsonMap::new(),
        );
        c.discard_disconnected();
        assert_eq!(c.vertex_count(), 2);
        assert!(c.get_vertex("user", r#"["lonely"]"#).is_none());
    }

    #[test]
    fn merge_collections_union_lists() {
        let mut c = GraphContainer::new(ConflictPolicy::LastWins)
            .with_merge_collections(vec!["tags".to_string()]);
        let a = props(&[("id", json!("x")), ("tags", json!(["red"]))]);
        let b = props(&[("id", json!("x")), ("tags", json!(["blue", "red"]))]);
        c.upsert_vertex("t", key_of(&["id"], &a), a).unwrap();
        c.upsert_vertex("t", key_of(&["id"], &b), b).unwrap();
        assert_eq!(
            c.get_vertex("t", r#"["x"]"#).unwrap()["tags"],
            json!(["red", "blue"])
        );
    }
}
