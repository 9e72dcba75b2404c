//! Casting: running a resource pipeline over a document source and handing
//! the resulting graph batches to a writer.
//!
//! Documents are processed in batches. Within a batch, workers walk
//! documents in parallel; their contexts are folded back in source order, so
//! the output is identical whatever the worker count.

use std::collections::BTreeMap;

use graphcaster_schema::vertex::BLANK_IDENTITY_FIELD;
use graphcaster_schema::Schema;
use rayon::prelude::*;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::actor::ActorTree;
use crate::container::{identity_key, ConflictPolicy, GraphContainer};
use crate::context::{ActionContext, VertexRep};
use crate::location::LocationIndex;
use crate::merge::merge_doc_basis;
use crate::registry::TransformRegistry;
use crate::source::DocumentSource;
use crate::writer::GraphWriter;
use crate::EngineError;

#[derive(Debug, Clone)]
pub struct IngestionParams {
    pub batch_size: usize,
    pub workers: usize,
    /// Cap on the number of documents taken from the source.
    pub max_items: Option<usize>,
    /// Walk and count, write nothing.
    pub dry: bool,
    /// Ask the writer to drop previous output first.
    pub clean_start: bool,
    pub conflict_policy: ConflictPolicy,
    /// Drop vertices no edge touches before writing.
    pub discard_disconnected: bool,
}

impl Default for IngestionParams {
    fn default() -> Self {
        IngestionParams {
            batch_size: 1000,
            workers: 1,
            max_items: None,
            dry: false,
            clean_start: false,
            conflict_policy: ConflictPolicy::default(),
            discard_disconnected: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestSummary {
    pub docs: usize,
    pub vertices: usize,
    pub edges: usize,
    /// Contributions dropped for missing identity fields.
    pub dropped: usize,
    /// Items that still failed after the per-item retry.
    pub write_failures: usize,
}

pub struct Caster<'a> {
    schema: &'a Schema,
    registry: TransformRegistry,
    params: IngestionParams,
}

impl<'a> Caster<'a> {
    pub fn new(schema: &'a Schema) -> Self {
        Caster {
            schema,
            registry: TransformRegistry::with_builtins(),
            params: IngestionParams::default(),
        }
    }

    pub fn with_params(mut self, params: IngestionParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_registry(mut self, registry: TransformRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Cast every document of `source` through the named resource and write
    /// the resulting batches.
    pub fn ingest(
        &self,
        resource_name: &str,
        source: &dyn DocumentSource,
        writer: &mut dyn GraphWriter,
    ) -> Result<IngestSummary, EngineError> {
        let resource = self.schema.fetch_resource(resource_name)?;
        let tree = ActorTree::compile(resource, self.schema, &self.registry)?;

        let mut docs = source.documents()?;
        if let Some(max) = self.params.max_items {
            docs.truncate(max);
        }
        info!(
            resource = resource_name,
            source = source.name(),
            docs = docs.len(),
            workers = self.params.workers,
            dry = self.params.dry,
            "casting"
        );

        if self.params.clean_start && !self.params.dry {
            writer.reset()?;
        }

        let mut summary = IngestSummary {
            docs: docs.len(),
            ..Default::default()
        };
        let mut blank_counters: BTreeMap<String, usize> = BTreeMap::new();
        for batch in docs.chunks(self.params.batch_size.max(1)) {
            let mut container = GraphContainer::new(self.params.conflict_policy)
                .with_merge_collections(tree.merge_collections().to_vec());
            for ctx in self.cast_batch(&tree, batch)? {
                self.accumulate(&tree, ctx, &mut container, &mut blank_counters, &mut summary)?;
            }
            if self.params.discard_disconnected {
                container.discard_disconnected();
            }
            summary.vertices += container.vertex_count();
            summary.edges += container.edge_count();

            if !self.params.dry {
                let items = container.items();
                if let Err(batch_err) = writer.write_batch(&items) {
                    warn!(%batch_err, "batch write failed, retrying item by item");
                    for item in &items {
                        if let Err(item_err) = writer.write_item(item) {
                            warn!(%item_err, "item write failed");
                            summary.write_failures += 1;
                        }
                    }
                }
            }
        }
        if !self.params.dry {
            writer.flush()?;
        }
        info!(?summary, "cast finished");
        Ok(summary)
    }

    /// Walk every document of a batch, one context per document so merging
    /// stays within document boundaries. Contexts come back in source order.
    fn cast_batch(
        &self,
        tree: &ActorTree,
        docs: &[Value],
    ) -> Result<Vec<ActionContext>, EngineError> {
        if self.params.workers <= 1 {
            return docs
                .iter()
                .map(|doc| {
                    let mut ctx = ActionContext::new();
                    tree.walk(doc, &mut ctx)?;
                    Ok(ctx)
                })
                .collect();
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.params.workers)
            .build()
            .map_err(|e| EngineError::WorkerPool(e.to_string()))?;
        pool.install(|| {
            docs.par_iter()
                .map(|doc| {
                    let mut ctx = ActionContext::new();
                    tree.walk(doc, &mut ctx)?;
                    Ok(ctx)
                })
                .collect()
        })
    }

    /// Resolve one document's context into the container: merge contributions
    /// per location, key vertices by identity, synthesize keys for blank
    /// vertices and pair their edges, drop what has none.
    fn accumulate(
        &self,
        tree: &ActorTree,
        ctx: ActionContext,
        container: &mut GraphContainer,
        blank_counters: &mut BTreeMap<String, usize>,
        summary: &mut IngestSummary,
    ) -> Result<(), EngineError> {
        let mut blank_keys: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (vertex_type, reps) in &ctx.vertices {
            let identity = self.schema.vertex_config.identity_fields(vertex_type)?;
            let blank = self.schema.vertex_config.is_blank(vertex_type);

            let mut by_location: BTreeMap<&LocationIndex, Vec<VertexRep>> = BTreeMap::new();
            for rep in reps {
                by_location
                    .entry(&rep.location)
                    .or_default()
                    .push(rep.clone());
            }
            for group in by_location.into_values() {
                for merged in merge_doc_basis(group, identity, tree.merge_collections()) {
                    let mut props = merged.vertex;
                    let key = match identity_key(identity, &props) {
                        Some(key) => key,
                        None if blank => {
                            let counter = blank_counters
                                .entry(vertex_type.clone())
                                .or_insert(0);
                            *counter += 1;
                            let synthesized = format!("{vertex_type}:{counter}");
                            props.insert(
                                BLANK_IDENTITY_FIELD.to_string(),
                                Value::String(synthesized),
                            );
                            match identity_key(identity, &props) {
                                Some(key) => {
                                    blank_keys
                                        .entry(vertex_type.clone())
                                        .or_default()
                                        .push(key.clone());
                                    key
                                }
                                None => continue,
                            }
                        }
                        None => {
                            warn!(
                                %vertex_type,
                                location = %merged.location,
                                "dropping contribution without identity fields"
                            );
                            summary.dropped += 1;
                            continue;
                        }
                    };
                    container.upsert_vertex(vertex_type, key, props)?;
                }
            }
        }

        let mut blank_cursors: BTreeMap<String, usize> = BTreeMap::new();
        for (key, entries) in &ctx.edges {
            let (source_type, target_type, _) = key;
            let source_identity = self.schema.vertex_config.identity_fields(source_type)?;
            let target_identity = self.schema.vertex_config.identity_fields(target_type)?;
            for entry in entries {
                // blank endpoints pair with the keys synthesized above, in
                // emission order
                let source_key = identity_key(source_identity, &entry.source)
                    .or_else(|| next_blank_key(&blank_keys, &mut blank_cursors, source_type));
                let target_key = identity_key(target_identity, &entry.target)
                    .or_else(|| next_blank_key(&blank_keys, &mut blank_cursors, target_type));
                match source_key.zip(target_key) {
                    Some((source_key, target_key)) => {
                        container.add_edge(key.clone(), source_key, target_key, entry.attrs.clone());
                    }
                    None => {
                        warn!(
                            source = %source_type,
                            target = %target_type,
                            "dropping edge with unresolved endpoint identity"
                        );
                        summary.dropped += 1;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Hand out the synthesized keys of one blank vertex type, one per edge
/// entry that could not resolve that endpoint.
fn next_blank_key(
    keys: &BTreeMap<String, Vec<String>>,
    cursors: &mut BTreeMap<String, usize>,
    vertex_type: &str,
) -> Option<String> {
    let synthesized = keys.get(vertex_type)?;
    let cursor = cursors.entry(vertex_type.to_string()).or_insert(0);
    let key = synthesized.get(*cursor)?.clone();
    *cursor += 1;
    Some(key)
}
