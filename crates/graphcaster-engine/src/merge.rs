//! Basis merging of vertex contributions.
//!
//! A level can contribute to the same vertex type several times: a picked
//! vertex step plus targeted transform outputs, for instance. Contributions
//! that carry at least one identity field act as a basis; the rest are
//! folded into the closest preceding basis, field by field.

use serde_json::Value;

use crate::context::{JsonMap, VertexRep};

fn has_basis(vertex: &JsonMap, index_keys: &[String]) -> bool {
    index_keys
        .iter()
        .any(|k| matches!(vertex.get(k), Some(v) if !v.is_null()))
}

/// Fold `extra` into `base`. Non-null values overwrite; nulls never do.
/// Fields named in `merge_collections` concatenate list values instead.
fn fold_into(base: &mut JsonMap, extra: &JsonMap, merge_collections: &[String]) {
    for (k, v) in extra {
        if v.is_null() {
            continue;
        }
        if merge_collections.iter().any(|c| c == k) {
            if let (Some(Value::Array(existing)), Value::Array(incoming)) =
                (base.get_mut(k), v)
            {
                for item in incoming {
                    if !existing.contains(item) {
                        existing.push(item.clone());
                    }
                }
                continue;
            }
        }
        base.insert(k.clone(), v.clone());
    }
}

/// Merge a list of contributions around their identity-bearing members.
///
/// Contributions without any identity field merge into the closest preceding
/// basis; leading orphans merge into the first basis that appears. When no
/// contribution has an identity field, everything collapses into one.
pub fn merge_doc_basis(
    reps: Vec<VertexRep>,
    index_keys: &[String],
    merge_collections: &[String],
) -> Vec<VertexRep> {
    let mut out: Vec<VertexRep> = Vec::new();
    let mut leading: Vec<VertexRep> = Vec::new();

    for rep in reps {
        if has_basis(&rep.vertex, index_keys) {
            let mut basis = rep;
            for orphan in leading.drain(..) {
                fold_into(&mut basis.vertex, &orphan.vertex, merge_collections);
                fold_into(&mut basis.ctx, &orphan.ctx, merge_collections);
            }
            out.push(basis);
        } else if let Some(basis) = out.last_mut() {
            fold_into(&mut basis.vertex, &rep.vertex, merge_collections);
            fold_into(&mut basis.ctx, &rep.ctx, merge_collections);
        } else {
            leading.push(rep);
        }
    }

    // no basis at all: collapse the orphans into one contribution
    if out.is_empty() && !leading.is_empty() {
        let mut it = leading.into_iter();
        let mut merged = match it.next() {
            Some(first) => first,
            None => return Vec::new(),
        };
        for rep in it {
            fold_into(&mut merged.vertex, &rep.vertex, merge_collections);
            fold_into(&mut merged.ctx, &rep.ctx, merge_collections);
        }
        return vec![merged];
    }
    out
}
