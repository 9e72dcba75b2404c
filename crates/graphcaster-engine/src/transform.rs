//! Compiled transforms: a resolved spec bound to its registered function.

use std::sync::Arc;

use graphcaster_schema::TransformSpec;
use serde_json::Value;

use crate::context::JsonMap;
use crate::registry::{TransformFn, TransformRegistry};
use crate::EngineError;

/// A transform ready to run: library references are already merged and the
/// function, if any, is resolved against the registry.
#[derive(Clone)]
pub struct CompiledTransform {
    pub spec: TransformSpec,
    func: Option<Arc<TransformFn>>,
}

impl CompiledTransform {
    pub fn compile(spec: TransformSpec, registry: &TransformRegistry) -> Result<Self, EngineError> {
        let func = match spec.function.as_deref() {
            Some(name) => Some(registry.get(name)?),
            None => None,
        };
        Ok(CompiledTransform { spec, func })
    }

    pub fn target_vertex(&self) -> Option<&str> {
        self.spec.target_vertex.as_deref()
    }

    pub fn output_fields(&self) -> &[String] {
        &self.spec.output
    }

    /// Apply to a level document, returning the output fields only.
    ///
    /// All inputs are read before any output is produced, so crossing renames
    /// (`{name: id, id: name}`) swap cleanly. A missing or null input is a
    /// `TransformInput` error; the caller drops the contribution and keeps
    /// walking.
    pub fn apply(&self, doc: &JsonMap) -> Result<JsonMap, EngineError> {
        let mut out = JsonMap::new();
        match &self.func {
            Some(func) => {
                let inputs = self
                    .spec
                    .input
                    .iter()
                    .map(|field| self.fetch(doc, field))
                    .collect::<Result<Vec<_>, _>>()?;
                let outputs = func(&inputs, &self.spec.params)?;
                if outputs.len() != self.spec.output.len() {
                    return Err(EngineError::TransformInput(format!(
                        "transform '{}' produced {} values for {} output fields",
                        self.name(),
                        outputs.len(),
                        self.spec.output.len()
                    )));
                }
                for (field, value) in self.spec.output.iter().zip(outputs) {
                    out.insert(field.clone(), value);
                }
            }
            None => {
                // pure rename over the map pairs, reading the original doc
                for (input, output) in &self.spec.map {
                    out.insert(output.clone(), self.fetch(doc, input)?);
                }
            }
        }
        Ok(out)
    }

    fn fetch(&self, doc: &JsonMap, field: &str) -> Result<Value, EngineError> {
        match doc.get(field) {
            Some(v) if !v.is_null() => Ok(v.clone()),
            _ => Err(EngineError::TransformInput(format!(
                "transform '{}': input field '{field}' is absent",
                self.name()
            ))),
        }
    }

    fn name(&self) -> &str {
        self.spec
            .name
            .as_deref()
            .or(self.spec.function.as_deref())
            .unwrap_or("<rename>")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(pairs: &[(&str, Value)]) -> JsonMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn compile(yaml: &str) -> CompiledTransform {
        let mut spec: TransformSpec = serde_yaml::from_str(yaml).unwrap();
        spec.finish_init().unwrap();
        CompiledTransform::compile(spec, &TransformRegistry::with_builtins()).unwrap()
    }

    #[test]
    fn crossing_rename_swaps() {
        let t = compile("map: {name: id, id: name}");
        let out = t
            .apply(&doc(&[("name", json!("John")), ("id", json!("Apple"))]))
            .unwrap();
        assert_eq!(out["id"], json!("John"));
        assert_eq!(out["name"], json!("Apple"));
    }

    #[test]
    fn functional_output_zip() {
        let t = compile(
            r#"
function: split_keep_part
params: {sep: "/", keep: -1}
input: [id]
output: [_key]
"#,
        );
        let out = t
            .apply(&doc(&[("id", json!("https://openalex.org/A123"))]))
            .unwrap();
        assert_eq!(out, doc(&[("_key", json!("A123"))]));
    }

    #[test]
    fn missing_input_is_error() {
        let t = compile("{function: lowercase, input: [country]}");
        assert!(matches!(
            t.apply(&doc(&[("name", json!("x"))])),
            Err(EngineError::TransformInput(_))
        ));
    }

    #[test]
    fn null_input_is_error() {
        let t = compile("{function: lowercase, input: [country]}");
        assert!(t.apply(&doc(&[("country", Value::Null)])).is_err());
    }

    #[test]
    fn unknown_function_fails_compile() {
        let mut spec: TransformSpec =
            serde_yaml::from_str("{function: nope, input: [a]}").unwrap();
        spec.finish_init().unwrap();
        assert!(matches!(
            CompiledTransform::compile(spec, &TransformRegistry::with_builtins()),
            Err(EngineError::UnknownTransform(_))
        ));
    }
}
