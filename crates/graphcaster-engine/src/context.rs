//! Per-document accumulation state.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::location::LocationIndex;

pub type JsonMap = serde_json::Map<String, Value>;

/// Runtime edge bucket key: `(source type, target type, resolved relation)`.
/// Unlike the definition key, the third slot carries the relation the
/// interpreter resolved (literal, field value, location key or purpose).
pub type RuntimeEdgeKey = (String, String, Option<String>);

/// One vertex contribution: the picked properties plus the residual scope it
/// was picked from.
///
/// `ctx` holds the parts of the level document that did not make it into
/// `vertex` verbatim: fields of other types, pre-transform values of
/// overwritten fields, and transform outputs no vertex consumed. Edge weights
/// and relation fields fall back to it.
#[derive(Debug, Clone, PartialEq)]
pub struct VertexRep {
    pub location: LocationIndex,
    pub vertex: JsonMap,
    pub ctx: JsonMap,
}

/// One emitted edge: picked source and target properties plus resolved
/// attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeEntry {
    pub source: JsonMap,
    pub target: JsonMap,
    pub attrs: JsonMap,
}

/// Accumulator the actor tree fills while walking one document (or, after
/// folding, a batch of documents).
#[derive(Debug, Clone, Default)]
pub struct ActionContext {
    /// Vertex contributions by type, in emission order.
    pub vertices: BTreeMap<String, Vec<VertexRep>>,
    /// Edge entries by runtime key, in emission order.
    pub edges: BTreeMap<RuntimeEdgeKey, Vec<EdgeEntry>>,
}

impl ActionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_vertex(&mut self, vertex_type: &str, rep: VertexRep) {
        self.vertices
            .entry(vertex_type.to_string())
            .or_default()
            .push(rep);
    }

    pub fn add_edge(&mut self, key: RuntimeEdgeKey, entry: EdgeEntry) {
        self.edges.entry(key).or_default().push(entry);
    }

    /// Contributions of one type whose location lies under the given prefix.
    pub fn reps_under<'a>(
        &'a self,
        vertex_type: &str,
        prefix: &LocationIndex,
    ) -> Vec<&'a VertexRep> {
        self.vertices
            .get(vertex_type)
            .map(|reps| {
                reps.iter()
                    .filter(|r| r.location.starts_with(prefix))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Fold another context into this one, preserving the other's emission
    /// order after this one's. Folding worker outputs in source order keeps
    /// the whole run deterministic.
    pub fn merge(&mut self, other: ActionContext) {
        for (vertex_type, reps) in other.vertices {
            self.vertices.entry(vertex_type).or_default().extend(reps);
        }
        for (key, entries) in other.edges {
            self.edges.entry(key).or_default().extend(entries);
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.values().map(Vec::len).sum()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rep(loc: LocationIndex, key: &str) -> VertexRep {
        let mut vertex = JsonMap::new();
        vertex.insert("id".to_string(), json!(key));
        VertexRep {
            location: loc,
            vertex,
            ctx: JsonMap::new(),
        }
    }

    #[test]
    fn reps_under_filters_by_prefix() {
        let mut ctx = ActionContext::new();
        let doc0 = LocationIndex::root().push_item(0);
        let doc1 = LocationIndex::root().push_item(1);
        ctx.add_vertex("package", rep(doc0.clone(), "a"));
        ctx.add_vertex("package", rep(doc0.push_key("depends").push_item(0), "b"));
        ctx.add_vertex("package", rep(doc1.clone(), "c"));

        assert_eq!(ctx.reps_under("package", &doc0).len(), 2);
        assert_eq!(ctx.reps_under("package", &doc1).len(), 1);
        assert_eq!(ctx.reps_under("ghost", &doc0).len(), 0);
    }

    #[test]
    fn merge_preserves_order() {
        let loc = LocationIndex::root().push_item(0);
        let mut a = ActionContext::new();
        a.add_vertex("user", rep(loc.clone(), "first"));
        let mut b = ActionContext::new();
        b.add_vertex("user", rep(loc, "second"));

        a.merge(b);
        let reps = &a.vertices["user"];
        assert_eq!(reps[0].vertex["id"], json!("first"));
        assert_eq!(reps[1].vertex["id"], json!("second"));
    }
}
