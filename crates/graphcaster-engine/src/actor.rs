//! The actor-tree interpreter.
//!
//! A resource pipeline compiles into a tree of levels. Walking a document
//! runs each level in three phases:
//!
//! 1. transforms, regardless of their listed position: outputs of untargeted
//!    transforms update the level document, targeted ones (`target_vertex`)
//!    become separate contributions;
//! 2. vertex emissions and descends, in listed order. A descend whose key is
//!    absent is silently skipped; a vertex whose filters reject it emits
//!    nothing;
//! 3. edges, over everything accumulated under the enclosing document
//!    element so far. With `edge_greedy` they fire as soon as the level's
//!    subtree completes, otherwise once at the end of the document.

use std::collections::{BTreeMap, BTreeSet};

use graphcaster_schema::filter::FilterExpression;
use graphcaster_schema::{ActorStep, Edge, Resource, Schema, VertexWeight};
use serde_json::Value;
use tracing::{debug, warn};

use crate::context::{ActionContext, EdgeEntry, JsonMap, VertexRep};
use crate::location::LocationIndex;
use crate::registry::TransformRegistry;
use crate::transform::CompiledTransform;
use crate::EngineError;

// ============================================================================
// Compiled tree
// ============================================================================

#[derive(Clone)]
struct VertexPlan {
    name: String,
    fields: Vec<String>,
    keep_fields: Option<Vec<String>>,
    filters: Vec<FilterExpression>,
    blank: bool,
}

impl VertexPlan {
    fn pick_fields(&self) -> &[String] {
        self.keep_fields.as_deref().unwrap_or(&self.fields)
    }
}

#[derive(Clone)]
enum DescendKind {
    Root,
    Key(String),
    AnyKey,
}

#[derive(Clone)]
enum LevelItem {
    Vertex(VertexPlan),
    Child(Level),
}

#[derive(Clone)]
struct Level {
    descend: DescendKind,
    transforms: Vec<CompiledTransform>,
    items: Vec<LevelItem>,
    edges: Vec<Edge>,
}

/// A compiled resource pipeline, ready to walk documents.
#[derive(Clone)]
pub struct ActorTree {
    root: Level,
    edge_greedy: bool,
    merge_collections: Vec<String>,
}

impl ActorTree {
    pub fn compile(
        resource: &Resource,
        schema: &Schema,
        registry: &TransformRegistry,
    ) -> Result<Self, EngineError> {
        let root = build_level(DescendKind::Root, &resource.apply, schema, registry)?;
        Ok(ActorTree {
            root,
            edge_greedy: resource.edge_greedy,
            merge_collections: resource.merge_collections.clone(),
        })
    }

    pub fn merge_collections(&self) -> &[String] {
        &self.merge_collections
    }
}

fn vertex_plan(
    name: &str,
    keep_fields: Option<Vec<String>>,
    schema: &Schema,
) -> Result<VertexPlan, EngineError> {
    let vertex = schema.vertex_config.get(name)?;
    let fields: Vec<String> = vertex.field_names().iter().map(|s| s.to_string()).collect();
    if let Some(kept) = &keep_fields {
        for f in kept {
            if !fields.iter().any(|known| known == f) {
                return Err(EngineError::Schema(
                    graphcaster_schema::SchemaError::validation(format!(
                        "keep_fields entry '{f}' is not a field of vertex '{name}'"
                    )),
                ));
            }
        }
    }
    Ok(VertexPlan {
        name: name.to_string(),
        fields,
        keep_fields,
        filters: vertex.filters.clone(),
        blank: schema.vertex_config.is_blank(name),
    })
}

fn build_level(
    descend: DescendKind,
    steps: &[ActorStep],
    schema: &Schema,
    registry: &TransformRegistry,
) -> Result<Level, EngineError> {
    let mut transforms = Vec::new();
    let mut items = Vec::new();
    let mut edges = Vec::new();

    for step in steps {
        match step {
            ActorStep::Transform(spec) => {
                let resolved = schema.resolve_transform(spec)?;
                transforms.push(CompiledTransform::compile(resolved, registry)?);
            }
            ActorStep::Vertex(v) => {
                items.push(LevelItem::Vertex(vertex_plan(
                    &v.vertex,
                    v.keep_fields.clone(),
                    schema,
                )?));
            }
            ActorStep::Edge(e) => {
                let mut edge = e.clone();
                // pipeline edges inherit weights and discriminants declared
                // in edge_config for the same pair
                let defaults = schema
                    .edge_config
                    .get(&edge.edge_key())
                    .or_else(|| {
                        schema
                            .edge_config
                            .get(&(edge.source.clone(), edge.target.clone(), None))
                    })
                    .cloned();
                if let Some(cfg) = defaults {
                    edge.update(&cfg);
                }
                schema.vertex_config.get(&edge.source)?;
                schema.vertex_config.get(&edge.target)?;
                edges.push(edge);
            }
            ActorStep::Descend(d) => {
                let kind = match (&d.key, d.any_key) {
                    (Some(k), _) => DescendKind::Key(k.clone()),
                    (None, true) => DescendKind::AnyKey,
                    (None, false) => DescendKind::Root,
                };
                items.push(LevelItem::Child(build_level(
                    kind, &d.steps, schema, registry,
                )?));
            }
        }
    }

    // a targeted transform implies a vertex at this level
    let mut covered: BTreeSet<String> = items
        .iter()
        .filter_map(|i| match i {
            LevelItem::Vertex(p) => Some(p.name.clone()),
            LevelItem::Child(_) => None,
        })
        .collect();
    for t in &transforms {
        if let Some(target) = t.target_vertex() {
            if covered.insert(target.to_string()) {
                items.push(LevelItem::Vertex(vertex_plan(target, None, schema)?));
            }
        }
    }

    // untargeted transforms with no vertex at the level: infer vertices from
    // the output fields
    if covered.is_empty()
        && !transforms.is_empty()
        && transforms.iter().all(|t| t.target_vertex().is_none())
    {
        let outputs: BTreeSet<&str> = transforms
            .iter()
            .flat_map(|t| t.output_fields().iter().map(String::as_str))
            .collect();
        for vertex in &schema.vertex_config.vertices {
            if vertex.field_names().iter().any(|f| outputs.contains(f)) {
                items.push(LevelItem::Vertex(vertex_plan(&vertex.name, None, schema)?));
            }
        }
    }

    Ok(Level {
        descend,
        transforms,
        items,
        edges,
    })
}

// ============================================================================
// Walk
// ============================================================================

impl ActorTree {
    /// Walk one document, accumulating contributions into `ctx`.
    pub fn walk(&self, doc: &Value, ctx: &mut ActionContext) -> Result<(), EngineError> {
        let mut deferred: Vec<(Edge, LocationIndex)> = Vec::new();
        let root = LocationIndex::root();
        match doc {
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    self.enter(&self.root, item, root.push_item(i), ctx, &mut deferred)?;
                }
            }
            // a single mapping counts as a one-element batch
            Value::Object(_) => {
                self.enter(&self.root, doc, root.push_item(0), ctx, &mut deferred)?;
            }
            other => {
                warn!(%other, "document is neither a mapping nor an array, skipping");
            }
        }
        for (edge, base) in deferred {
            self.emit_edge(&edge, &base, ctx);
        }
        Ok(())
    }

    fn enter(
        &self,
        level: &Level,
        value: &Value,
        location: LocationIndex,
        ctx: &mut ActionContext,
        deferred: &mut Vec<(Edge, LocationIndex)>,
    ) -> Result<(), EngineError> {
        match value {
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    self.enter(level, item, location.push_item(i), ctx, deferred)?;
                }
                Ok(())
            }
            Value::Object(map) => self.run_level(level, map, location, ctx, deferred),
            scalar => {
                // a bare scalar under a keyed descend is readable as a
                // one-field mapping; anything else has no shape to act on
                if let DescendKind::Key(key) = &level.descend {
                    let mut wrapped = JsonMap::new();
                    wrapped.insert(key.clone(), scalar.clone());
                    self.run_level(level, &wrapped, location, ctx, deferred)
                } else {
                    debug!(%location, "skipping scalar value");
                    Ok(())
                }
            }
        }
    }

    fn run_level(
        &self,
        level: &Level,
        doc: &JsonMap,
        location: LocationIndex,
        ctx: &mut ActionContext,
        deferred: &mut Vec<(Edge, LocationIndex)>,
    ) -> Result<(), EngineError> {
        // ---- phase 1: transforms
        let mut working = doc.clone();
        let mut output_keys: BTreeSet<String> = BTreeSet::new();
        let mut pending: Vec<(String, JsonMap)> = Vec::new();
        for transform in &level.transforms {
            match transform.apply(&working) {
                Ok(outputs) => match transform.target_vertex() {
                    Some(target) => pending.push((target.to_string(), outputs)),
                    None => {
                        for (field, value) in outputs {
                            output_keys.insert(field.clone());
                            working.insert(field, value);
                        }
                    }
                },
                Err(EngineError::TransformInput(msg)) => {
                    warn!(%location, "dropping transform contribution: {msg}");
                }
                Err(e) => return Err(e),
            }
        }

        // residual scope: the original document plus transform outputs no
        // vertex at this level consumes
        let consumed: BTreeSet<&str> = level
            .items
            .iter()
            .filter_map(|item| match item {
                LevelItem::Vertex(plan) => Some(plan.pick_fields()),
                LevelItem::Child(_) => None,
            })
            .flatten()
            .map(String::as_str)
            .collect();
        let mut residual = doc.clone();
        for key in &output_keys {
            if !consumed.contains(key.as_str()) {
                if let Some(v) = working.get(key) {
                    residual.insert(key.clone(), v.clone());
                }
            }
        }

        // ---- phase 2: vertices and descends, in listed order
        for item in &level.items {
            match item {
                LevelItem::Vertex(plan) => {
                    emit_vertex(plan, &working, &residual, &location, ctx);
                }
                LevelItem::Child(child) => match &child.descend {
                    DescendKind::Key(key) => {
                        if let Some(value) = working.get(key) {
                            self.enter(child, value, location.push_key(key), ctx, deferred)?;
                        } else {
                            debug!(%location, %key, "descend key absent, skipping");
                        }
                    }
                    DescendKind::AnyKey => {
                        for (key, value) in &working {
                            self.enter(child, value, location.push_key(key), ctx, deferred)?;
                        }
                    }
                    DescendKind::Root => {
                        self.run_level(child, &working, location.clone(), ctx, deferred)?;
                    }
                },
            }
        }
        for (target, outputs) in pending {
            if let Some(plan) = level.items.iter().find_map(|i| match i {
                LevelItem::Vertex(p) if p.name == target => Some(p),
                _ => None,
            }) {
                emit_vertex(plan, &outputs, &residual, &location, ctx);
            }
        }

        // ---- phase 3: edges
        for edge in &level.edges {
            if self.edge_greedy {
                self.emit_edge(edge, &location, ctx);
            } else {
                deferred.push((edge.clone(), location.clone()));
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Edge emission
    // ------------------------------------------------------------------------

    fn emit_edge(&self, edge: &Edge, at: &LocationIndex, ctx: &mut ActionContext) {
        // candidates come from the whole document element, wherever the edge
        // step sits in the pipeline; match/exclude keys are the discriminants
        let base = at.document_element();
        let select = |reps: Vec<&VertexRep>,
                      match_key: &Option<String>,
                      exclude_key: &Option<String>| {
            reps.into_iter()
                .filter(|r| match match_key {
                    Some(k) => r.location.contains_key(k),
                    None => true,
                })
                .filter(|r| match exclude_key {
                    Some(k) => !r.location.contains_key(k),
                    None => true,
                })
                .cloned()
                .collect::<Vec<VertexRep>>()
        };

        let mut sources = select(
            ctx.reps_under(&edge.source, &base),
            &edge.match_source,
            &edge.exclude_source,
        );
        let mut targets = select(
            ctx.reps_under(&edge.target, &base),
            &edge.match_target,
            &edge.exclude_target,
        );

        // self-referential edges without discriminants: the shallowest
        // contributions act as sources, everything deeper as targets
        let no_discriminants = edge.match_source.is_none()
            && edge.match_target.is_none()
            && edge.exclude_source.is_none()
            && edge.exclude_target.is_none();
        if edge.source == edge.target && no_discriminants {
            let Some(min_depth) = sources.iter().map(|r| r.location.depth()).min() else {
                return;
            };
            let (top, rest): (Vec<VertexRep>, Vec<VertexRep>) = sources
                .into_iter()
                .partition(|r| r.location.depth() == min_depth);
            if rest.is_empty() {
                // everything at one depth: first contribution fans out to
                // the others
                if top.len() < 2 {
                    return;
                }
                let mut it = top.into_iter();
                sources = it.next().into_iter().collect();
                targets = it.collect();
            } else {
                sources = top;
                targets = rest;
            }
        }
        if sources.is_empty() || targets.is_empty() {
            return;
        }

        // snapshot candidate reps for non-endpoint weight vertices
        let mut weight_candidates: BTreeMap<String, Vec<VertexRep>> = BTreeMap::new();
        if let Some(weights) = &edge.weights {
            for vw in &weights.vertices {
                if let Some(name) = vw.name.as_deref() {
                    if name != edge.source && name != edge.target {
                        weight_candidates.insert(
                            name.to_string(),
                            ctx.reps_under(name, &base).into_iter().cloned().collect(),
                        );
                    }
                }
            }
        }

        for s in &sources {
            for t in &targets {
                if s.location == t.location && s.vertex == t.vertex {
                    continue;
                }
                let relation = resolve_relation(edge, s, t);
                let Some(attrs) = resolve_weights(edge, s, t, &weight_candidates) else {
                    debug!(source = %edge.source, target = %edge.target, "pair rejected by weight filter");
                    continue;
                };
                ctx.add_edge(
                    (edge.source.clone(), edge.target.clone(), relation),
                    EdgeEntry {
                        source: s.vertex.clone(),
                        target: t.vertex.clone(),
                        attrs,
                    },
                );
            }
        }
    }
}

fn emit_vertex(
    plan: &VertexPlan,
    source: &JsonMap,
    residual: &JsonMap,
    location: &LocationIndex,
    ctx: &mut ActionContext,
) {
    let mut picked = JsonMap::new();
    for field in plan.pick_fields() {
        if let Some(v) = source.get(field) {
            if !v.is_null() {
                picked.insert(field.clone(), v.clone());
            }
        }
    }
    if picked.is_empty() && !plan.blank {
        debug!(%location, vertex = %plan.name, "no fields picked, skipping");
        return;
    }
    for filter in &plan.filters {
        if !filter.evaluate(&picked) {
            debug!(%location, vertex = %plan.name, "rejected by filter");
            return;
        }
    }
    let mut rep_ctx = JsonMap::new();
    for (k, v) in residual {
        if picked.get(k) != Some(v) {
            rep_ctx.insert(k.clone(), v.clone());
        }
    }
    ctx.add_vertex(
        &plan.name,
        VertexRep {
            location: location.clone(),
            vertex: picked,
            ctx: rep_ctx,
        },
    );
}

/// Relation resolution order: literal, field value, target location key,
/// purpose.
fn resolve_relation(edge: &Edge, s: &VertexRep, t: &VertexRep) -> Option<String> {
    if let Some(r) = &edge.relation {
        return Some(r.clone());
    }
    if let Some(field) = &edge.relation_field {
        for scope in [&t.vertex, &s.vertex, &t.ctx, &s.ctx] {
            if let Some(v) = scope.get(field) {
                return Some(match v {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                });
            }
        }
    }
    if edge.relation_from_key {
        if let Some(key) = t.location.last_key() {
            return Some(sanitize_relation(key));
        }
    }
    edge.purpose.clone()
}

fn sanitize_relation(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn lookup<'a>(field: &str, scopes: [&'a JsonMap; 4]) -> Option<&'a Value> {
    scopes
        .iter()
        .find_map(|scope| scope.get(field).filter(|v| !v.is_null()))
}

fn weight_allows(vw: &VertexWeight, scope: &JsonMap) -> bool {
    vw.filter.as_ref().map_or(true, |f| f.evaluate(scope))
}

/// Assemble edge attributes. `None` means a weight filter rejected the pair
/// and the edge must not be emitted.
fn resolve_weights(
    edge: &Edge,
    s: &VertexRep,
    t: &VertexRep,
    candidates: &BTreeMap<String, Vec<VertexRep>>,
) -> Option<JsonMap> {
    let mut attrs = JsonMap::new();
    let Some(weights) = &edge.weights else {
        return Some(attrs);
    };
    for field in weights.direct_names() {
        if let Some(v) = lookup(field, [&t.vertex, &s.vertex, &t.ctx, &s.ctx]) {
            attrs.insert(field.to_string(), v.clone());
        }
    }
    for vw in &weights.vertices {
        match vw.name.as_deref() {
            Some(name) if name == edge.target => {
                if !weight_allows(vw, &t.vertex) {
                    return None;
                }
                copy_weight_fields(vw, &t.vertex, &mut attrs);
            }
            Some(name) if name == edge.source => {
                if !weight_allows(vw, &s.vertex) {
                    return None;
                }
                copy_weight_fields(vw, &s.vertex, &mut attrs);
            }
            Some(name) => {
                // unrelated vertex type: pick the closest passing
                // contribution by location congruence with the target
                let mut best: Option<(&VertexRep, usize)> = None;
                for rep in candidates.get(name).map(Vec::as_slice).unwrap_or(&[]) {
                    if !weight_allows(vw, &rep.vertex) {
                        continue;
                    }
                    let measure = rep.location.congruence_measure(&t.location);
                    if best.map_or(true, |(_, m)| measure > m) {
                        best = Some((rep, measure));
                    }
                }
                match best {
                    Some((rep, _)) => copy_weight_fields(vw, &rep.vertex, &mut attrs),
                    None if vw.filter.is_some() => return None,
                    None => {}
                }
            }
            None => {
                // nameless weights read the surrounding scopes
                if vw.filter.is_some() {
                    let mut scope = s.ctx.clone();
                    for (k, v) in &t.ctx {
                        scope.insert(k.clone(), v.clone());
                    }
                    if !weight_allows(vw, &scope) {
                        return None;
                    }
                }
                for field in &vw.fields {
                    if let Some(v) = t.ctx.get(field).or_else(|| s.ctx.get(field)) {
                        if !v.is_null() {
                            attrs.insert(field.clone(), v.clone());
                        }
                    }
                }
            }
        }
    }
    Some(attrs)
}

fn copy_weight_fields(vw: &VertexWeight, source: &JsonMap, attrs: &mut JsonMap) {
    for field in &vw.fields {
        if let Some(v) = source.get(field) {
            if !v.is_null() {
                attrs.insert(vw.cfield(field), v.clone());
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema(yaml: &str) -> Schema {
        Schema::from_yaml_str(yaml).unwrap()
    }

    fn walk_resource(schema: &Schema, resource: &str, doc: Value) -> ActionContext {
        let tree = ActorTree::compile(
            schema.fetch_resource(resource).unwrap(),
            schema,
            &TransformRegistry::with_builtins(),
        )
        .unwrap();
        let mut ctx = ActionContext::new();
        tree.walk(&doc, &mut ctx).unwrap();
        ctx
    }

    fn loc(path: &[Value]) -> LocationIndex {
        let mut l = LocationIndex::root();
        for step in path {
            l = match step {
                Value::Number(n) => l.push_item(n.as_u64().unwrap() as usize),
                Value::String(s) => l.push_key(s),
                other => panic!("bad step {other}"),
            };
        }
        l
    }

    const WORKS_SCHEMA: &str = r#"
general: {name: openalex}
vertex_config:
    vertices:
    - name: work
      fields: [_key, doi, title]
      identity: [_key]
resources:
- name: works
  apply:
  - vertex: work
  - foo: split_keep_part
    params: {sep: "/", keep: -1}
    input: [id]
    output: [_key]
  - foo: split_keep_part
    params: {sep: "/", keep: [-2, -1]}
    input: [doi]
    output: [doi]
  - key: referenced_works
    apply:
    - vertex: work
    - foo: split_keep_part
      params: {sep: "/", keep: -1}
      input: [id]
      output: [_key]
  - source: work
    target: work
"#;

    #[test]
    fn transform_shortcut_picks_and_keeps_scope() {
        let s = schema(WORKS_SCHEMA);
        let ctx = walk_resource(
            &s,
            "works",
            json!({
                "doi": "https://doi.org/10.1007/978-3-123",
                "id": "https://openalex.org/A123",
            }),
        );
        let reps = &ctx.vertices["work"];
        assert_eq!(reps.len(), 1);
        assert_eq!(reps[0].location, loc(&[json!(0)]));
        assert_eq!(
            reps[0].vertex,
            json!({"_key": "A123", "doi": "10.1007/978-3-123"})
                .as_object()
                .unwrap()
                .clone()
        );
        assert_eq!(
            reps[0].ctx,
            json!({
                "doi": "https://doi.org/10.1007/978-3-123",
                "id": "https://openalex.org/A123",
            })
            .as_object()
            .unwrap()
            .clone()
        );
    }

    #[test]
    fn edges_between_levels() {
        let s = schema(WORKS_SCHEMA);
        let referenced: Vec<Value> = (0..5)
            .map(|i| json!({"id": format!("https://openalex.org/W{i}")}))
            .collect();
        let ctx = walk_resource(
            &s,
            "works",
            json!({
                "id": "https://openalex.org/A1",
                "referenced_works": referenced,
            }),
        );
        let reps = &ctx.vertices["work"];
        assert_eq!(reps.len(), 6);
        assert_eq!(
            reps.iter().filter(|r| r.location.depth() == 1).count(),
            1
        );
        assert_eq!(
            reps.iter().filter(|r| r.location.depth() > 1).count(),
            5
        );
        let key = ("work".to_string(), "work".to_string(), None);
        assert_eq!(ctx.edges[&key].len(), 5);
    }

    #[test]
    fn crossing_rename_keeps_original_scope() {
        let s = schema(
            r#"
general: {name: cross}
vertex_config:
    vertices:
    - name: person
      fields: [id]
      identity: [id]
    - name: company
      fields: [name]
      identity: [name]
resources:
- name: cross
  apply:
  - vertex: person
  - vertex: company
  - map: {name: id, id: name}
"#,
        );
        let ctx = walk_resource(
            &s,
            "cross",
            json!([
                {"name": "John", "id": "Apple"},
                {"name": "Mary", "id": "Oracle"},
            ]),
        );
        let people = &ctx.vertices["person"];
        assert_eq!(people[0].vertex, json!({"id": "John"}).as_object().unwrap().clone());
        assert_eq!(
            people[0].ctx,
            json!({"name": "John", "id": "Apple"}).as_object().unwrap().clone()
        );
        assert_eq!(people[1].vertex, json!({"id": "Mary"}).as_object().unwrap().clone());

        let companies = &ctx.vertices["company"];
        assert_eq!(
            companies[0].vertex,
            json!({"name": "Apple"}).as_object().unwrap().clone()
        );
        assert_eq!(
            companies[1].ctx,
            json!({"name": "Mary", "id": "Oracle"}).as_object().unwrap().clone()
        );
    }

    #[test]
    fn implicit_vertices_from_transform_outputs() {
        let s = schema(
            r#"
general: {name: cross}
vertex_config:
    vertices:
    - name: person
      fields: [id]
      identity: [id]
    - name: company
      fields: [name]
      identity: [name]
resources:
- name: implicit
  apply:
  - map: {name: id, id: name}
"#,
        );
        let ctx = walk_resource(&s, "implicit", json!([{"name": "John", "id": "Apple"}]));
        assert_eq!(ctx.vertices["person"][0].vertex["id"], json!("John"));
        assert_eq!(ctx.vertices["company"][0].vertex["name"], json!("Apple"));
    }

    #[test]
    fn untouched_fields_fall_out_of_scope() {
        let s = schema(
            r#"
general: {name: concepts}
vertex_config:
    vertices:
    - name: concept
      fields: [wikidata, mag]
      identity: [wikidata]
resources:
- name: concepts
  apply:
  - vertex: concept
  - foo: split_keep_part
    params: {sep: "/", keep: -1}
    input: [wikidata]
    output: [wikidata]
"#,
        );
        let ctx = walk_resource(
            &s,
            "concepts",
            json!([{"wikidata": "https://www.wikidata.org/wiki/Q123", "mag": 105794591}]),
        );
        let rep = &ctx.vertices["concept"][0];
        assert_eq!(
            rep.vertex,
            json!({"wikidata": "Q123", "mag": 105794591}).as_object().unwrap().clone()
        );
        // mag was picked verbatim, so only the overwritten field remains
        assert_eq!(
            rep.ctx,
            json!({"wikidata": "https://www.wikidata.org/wiki/Q123"})
                .as_object()
                .unwrap()
                .clone()
        );
    }

    const DEB_SCHEMA: &str = r#"
general: {name: deb}
vertex_config:
    vertices:
    - name: package
      fields: [name, version]
      indexes:
      - fields: [name]
    - name: maintainer
      fields: [name, email]
      indexes:
      - fields: [email]
resources:
- name: packages
  apply:
  - vertex: package
  - key: dependencies
    apply:
    - any_key: true
      apply:
      - vertex: package
  - source: maintainer
    target: package
    exclude_target: dependencies
  - source: package
    target: package
    relation_from_key: true
  - key: maintainer
    apply:
    - vertex: maintainer
"#;

    fn deb_doc() -> Value {
        json!([
            {
                "name": "0ad-data",
                "version": "0.0.26-1",
                "maintainer": {"name": "Debian Games Team", "email": "games@lists.debian.org"},
                "dependencies": {
                    "depends": [{"name": "fonts-dejavu-core"}, {"name": "fonts-freefont-ttf"}],
                    "pre-depends": [{"name": "dpkg", "version": ">= 1.15.6~"}],
                    "suggests": [{"name": "0ad"}],
                },
            },
            {
                "name": "0ad",
                "version": "0.0.26-3",
                "maintainer": {"name": "Debian Games Team", "email": "games@lists.debian.org"},
                "dependencies": {
                    "depends": [{"name": "0ad-data"}],
                    "breaks": [{"name": "0ad-data", "version": "<< 0.0.12-1~"}],
                },
            },
        ])
    }

    #[test]
    fn relation_from_location_key() {
        let s = schema(DEB_SCHEMA);
        let ctx = walk_resource(&s, "packages", deb_doc());
        let count = |relation: &str| {
            ctx.edges
                .get(&(
                    "package".to_string(),
                    "package".to_string(),
                    Some(relation.to_string()),
                ))
                .map(Vec::len)
                .unwrap_or(0)
        };
        assert_eq!(count("depends"), 3);
        assert_eq!(count("pre_depends"), 1);
        assert_eq!(count("suggests"), 1);
        assert_eq!(count("breaks"), 1);
        // no contributions under absent keys
        assert_eq!(count("recommends"), 0);
    }

    #[test]
    fn exclude_target_keeps_top_level() {
        let s = schema(DEB_SCHEMA);
        let ctx = walk_resource(&s, "packages", deb_doc());
        let key = ("maintainer".to_string(), "package".to_string(), None);
        assert_eq!(ctx.edges[&key].len(), 2);
        for entry in &ctx.edges[&key] {
            assert!(entry.target.contains_key("version"));
        }
    }

    const MENTION_SCHEMA: &str = r#"
general: {name: kg}
vertex_config:
    vertices:
    - name: mention
      fields: [text]
      identity: [_key]
resources:
- name: triples
  apply:
  - key: triple_index
    apply:
    - vertex: mention
    - map: {hash: _key}
  - key: triple
    apply:
    - apply:
      - vertex: mention
      - map: {hash: _key, role: _role}
  - source: mention
    target: mention
    match_source: triple_index
    match_target: triple
    weights:
        direct: [_role]
"#;

    fn mention_doc() -> Value {
        json!({
            "triple_index": {"hash": "7a440c"},
            "triple": [
                {"hash": "5e18cc", "text": "habitat shifts", "role": "source"},
                {"hash": "0f0f25", "text": "occurs in", "role": "relation"},
                {"hash": "c7f68d", "text": "paleogene", "role": "target"},
            ],
        })
    }

    #[test]
    fn match_keys_and_direct_weight_from_scope() {
        let s = schema(MENTION_SCHEMA);
        let ctx = walk_resource(&s, "triples", mention_doc());
        let key = ("mention".to_string(), "mention".to_string(), None);
        let entries = &ctx.edges[&key];
        assert_eq!(entries.len(), 3);
        let roles: BTreeSet<&str> = entries
            .iter()
            .map(|e| e.attrs["_role"].as_str().unwrap())
            .collect();
        assert_eq!(roles, BTreeSet::from(["source", "relation", "target"]));
    }

    const TICKER_SCHEMA: &str = r#"
general: {name: ticker}
vertex_config:
    vertices:
    - name: ticker
      fields: [cusip, cname]
      identity: [cusip]
    - name: feature
      fields: [name, value]
edge_config:
    edges:
    - source: ticker
      target: feature
      weights:
        direct: [t_obs]
        vertices:
        - {name: feature, fields: [name]}
resources:
- name: rows
  apply:
  - vertex: ticker
  - transform: {map: {High: value, high_label: name}, to_vertex: feature}
  - transform: {map: {Low: value, low_label: name}, to_vertex: feature}
  - transform: {map: {Volume: value, volume_label: name}, to_vertex: feature}
  - source: ticker
    target: feature
"#;

    fn ticker_row() -> Value {
        json!({
            "cusip": "037833100", "cname": "Apple", "t_obs": "2023-01-02",
            "High": 130.9, "high_label": "High",
            "Low": 124.17, "low_label": "Low",
            "Volume": 112117500.0, "volume_label": "Volume",
        })
    }

    #[test]
    fn multi_edges_from_row_with_vertex_weights() {
        let s = schema(TICKER_SCHEMA);
        let ctx = walk_resource(&s, "rows", ticker_row());
        let key = ("ticker".to_string(), "feature".to_string(), None);
        let entries = &ctx.edges[&key];
        assert_eq!(ctx.vertices["feature"].len(), 3);
        assert_eq!(entries.len(), 3);
        for entry in entries {
            assert_eq!(entry.attrs["t_obs"], json!("2023-01-02"));
        }
        let names: BTreeSet<String> = entries
            .iter()
            .map(|e| e.attrs["feature@name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            names,
            BTreeSet::from(["High".to_string(), "Low".to_string(), "Volume".to_string()])
        );
    }

    #[test]
    fn nested_edge_step_sees_enclosing_levels() {
        let s = schema(
            r#"
general: {name: deb}
vertex_config:
    vertices:
    - name: package
      fields: [name]
      identity: [name]
resources:
- name: packages
  apply:
  - vertex: package
  - key: dependencies
    apply:
    - any_key: true
      apply:
      - vertex: package
      - source: package
        target: package
        relation_from_key: true
"#,
        );
        let ctx = walk_resource(
            &s,
            "packages",
            json!({
                "name": "dpkg",
                "dependencies": {
                    "depends": [{"name": "libc6"}],
                    "pre-depends": [{"name": "tar"}],
                },
            }),
        );
        let pairs = |relation: &str| -> BTreeSet<(String, String)> {
            ctx.edges
                .get(&(
                    "package".to_string(),
                    "package".to_string(),
                    Some(relation.to_string()),
                ))
                .map(|entries| {
                    entries
                        .iter()
                        .map(|e| {
                            (
                                e.source["name"].as_str().unwrap().to_string(),
                                e.target["name"].as_str().unwrap().to_string(),
                            )
                        })
                        .collect()
                })
                .unwrap_or_default()
        };
        assert_eq!(
            pairs("depends"),
            BTreeSet::from([("dpkg".to_string(), "libc6".to_string())])
        );
        assert_eq!(
            pairs("pre_depends"),
            BTreeSet::from([("dpkg".to_string(), "tar".to_string())])
        );
    }

    #[test]
    fn scalar_list_elements_wrap_under_descend_key() {
        let s = schema(
            r#"
general: {name: refs}
vertex_config:
    vertices:
    - name: work
      fields: [id]
      identity: [id]
resources:
- name: works
  apply:
  - vertex: work
  - key: referenced_works
    apply:
    - map: {referenced_works: id}
    - vertex: work
  - source: work
    target: work
    relation: cites
"#,
        );
        let ctx = walk_resource(
            &s,
            "works",
            json!({"id": "W1", "referenced_works": ["W2", "W3"]}),
        );
        assert_eq!(ctx.vertices["work"].len(), 3);
        let key = (
            "work".to_string(),
            "work".to_string(),
            Some("cites".to_string()),
        );
        let entries = &ctx.edges[&key];
        assert_eq!(entries.len(), 2);
        let targets: BTreeSet<&str> = entries
            .iter()
            .map(|e| e.target["id"].as_str().unwrap())
            .collect();
        assert_eq!(targets, BTreeSet::from(["W2", "W3"]));
        for entry in entries {
            assert_eq!(entry.source["id"], json!("W1"));
        }
    }

    #[test]
    fn vertex_filters_reject_contributions() {
        let s = schema(
            &TICKER_SCHEMA.replace(
                "    - name: feature\n      fields: [name, value]\n",
                "    - name: feature\n      fields: [name, value]\n      filters:\n      - {field: name, foo: __ne__, value: Volume}\n",
            ),
        );
        let ctx = walk_resource(&s, "rows", ticker_row());
        let names: BTreeSet<String> = ctx.vertices["feature"]
            .iter()
            .filter_map(|r| r.vertex.get("name"))
            .map(|v| v.as_str().unwrap().to_string())
            .collect();
        assert!(!names.contains("Volume"));
    }

    #[test]
    fn weight_filter_drops_rejected_pairs() {
        let s = schema(&TICKER_SCHEMA.replace(
            "- {name: feature, fields: [name]}",
            "- {name: feature, fields: [name], filter: {field: name, foo: __ne__, value: Volume}}",
        ));
        let ctx = walk_resource(&s, "rows", ticker_row());
        assert_eq!(ctx.vertices["feature"].len(), 3);
        let key = ("ticker".to_string(), "feature".to_string(), None);
        let entries = &ctx.edges[&key];
        assert_eq!(entries.len(), 2);
        let names: BTreeSet<&str> = entries
            .iter()
            .map(|e| e.attrs["feature@name"].as_str().unwrap())
            .collect();
        assert_eq!(names, BTreeSet::from(["High", "Low"]));
    }

    #[test]
    fn create_edge_between_targeted_transforms() {
        let s = schema(
            r#"
general: {name: follows}
vertex_config:
    vertices:
    - name: users
      fields: [id]
      identity: [id]
resources:
- name: follows
  apply:
  - transform: {map: {follower_id: id}, to_vertex: users}
  - transform: {map: {followed_id: id}, to_vertex: users}
  - create_edge: {from: users, to: users}
"#,
        );
        let ctx = walk_resource(
            &s,
            "follows",
            json!({"follower_id": "u1", "followed_id": "u2"}),
        );
        assert_eq!(ctx.vertices["users"].len(), 2);
        let key = ("users".to_string(), "users".to_string(), None);
        let entries = &ctx.edges[&key];
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].source["id"], json!("u1"));
        assert_eq!(entries[0].target["id"], json!("u2"));
    }

    #[test]
    fn edge_greedy_off_defers_to_document_end() {
        let s = schema(
            &WORKS_SCHEMA.replace("- name: works\n", "- name: works\n  edge_greedy: false\n"),
        );
        let ctx = walk_resource(
            &s,
            "works",
            json!({
                "id": "https://openalex.org/A1",
                "referenced_works": [{"id": "https://openalex.org/W1"}],
            }),
        );
        let key = ("work".to_string(), "work".to_string(), None);
        assert_eq!(ctx.edges[&key].len(), 1);
    }

    #[test]
    fn missing_transform_input_drops_contribution_only() {
        let s = schema(WORKS_SCHEMA);
        // no doi field: the doi transform drops, the rest still lands
        let ctx = walk_resource(&s, "works", json!({"id": "https://openalex.org/A9"}));
        let rep = &ctx.vertices["work"][0];
        assert_eq!(rep.vertex["_key"], json!("A9"));
        assert!(!rep.vertex.contains_key("doi"));
    }
}
