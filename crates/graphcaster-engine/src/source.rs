//! Document input boundary.
//!
//! A [`DocumentSource`] yields the documents a resource is cast over. The
//! file source walks a directory tree and picks files whose names match a
//! pattern, in sorted order so runs are reproducible.

use std::path::{Path, PathBuf};

use regex::Regex;
use serde_json::Value;
use tracing::debug;
use walkdir::WalkDir;

use crate::EngineError;

pub trait DocumentSource {
    /// A short label for logs.
    fn name(&self) -> &str;

    fn documents(&self) -> Result<Vec<Value>, EngineError>;
}

/// Documents handed over directly, mostly for tests and embedding.
pub struct InMemorySource {
    name: String,
    docs: Vec<Value>,
}

impl InMemorySource {
    pub fn new(name: impl Into<String>, docs: Vec<Value>) -> Self {
        InMemorySource {
            name: name.into(),
            docs,
        }
    }
}

impl DocumentSource for InMemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn documents(&self) -> Result<Vec<Value>, EngineError> {
        Ok(self.docs.clone())
    }
}

/// A file-name pattern over a directory walk.
#[derive(Debug, Clone)]
pub struct FilePattern {
    regex: Regex,
}

impl FilePattern {
    pub fn new(pattern: &str) -> Result<Self, EngineError> {
        let regex = Regex::new(pattern)
            .map_err(|e| EngineError::Write(format!("bad file pattern '{pattern}': {e}")))?;
        Ok(FilePattern { regex })
    }

    pub fn matches(&self, file_name: &str) -> bool {
        self.regex.is_match(file_name)
    }
}

/// Reads `.json` (top-level array or single object) and `.jsonl` files.
pub struct JsonFileSource {
    root: PathBuf,
    patterns: Vec<FilePattern>,
    limit_files: Option<usize>,
}

impl JsonFileSource {
    pub fn new(root: impl AsRef<Path>, patterns: Vec<FilePattern>) -> Self {
        JsonFileSource {
            root: root.as_ref().to_path_buf(),
            patterns,
            limit_files: None,
        }
    }

    pub fn with_limit_files(mut self, limit: Option<usize>) -> Self {
        self.limit_files = limit;
        self
    }

    /// Matching files under the root, sorted by path.
    pub fn matching_files(&self) -> Result<Vec<PathBuf>, EngineError> {
        let mut files = Vec::new();
        for entry in WalkDir::new(&self.root).sort_by_file_name() {
            let entry = entry.map_err(|e| EngineError::Write(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy();
            if self.patterns.iter().any(|p| p.matches(&file_name)) {
                files.push(entry.path().to_path_buf());
            }
        }
        files.sort();
        if let Some(limit) = self.limit_files {
            files.truncate(limit);
        }
        Ok(files)
    }

    fn load_file(path: &Path) -> Result<Vec<Value>, EngineError> {
        let text = std::fs::read_to_string(path)?;
        if path.extension().is_some_and(|e| e == "jsonl") {
            return text
                .lines()
                .filter(|l| !l.trim().is_empty())
                .map(|l| serde_json::from_str(l).map_err(EngineError::from))
                .collect();
        }
        let value: Value = serde_json::from_str(&text)?;
        Ok(match value {
            Value::Array(items) => items,
            other => vec![other],
        })
    }
}

impl DocumentSource for JsonFileSource {
    fn name(&self) -> &str {
        self.root.to_str().unwrap_or("<files>")
    }

    fn documents(&self) -> Result<Vec<Value>, EngineError> {
        let mut docs = Vec::new();
        for path in self.matching_files()? {
            let loaded = Self::load_file(&path)?;
            debug!(path = %path.display(), count = loaded.len(), "loaded documents");
            docs.extend(loaded);
        }
        Ok(docs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn pattern_matching() {
        let p = FilePattern::new(r"^packages.*\.json$").unwrap();
        assert!(p.matches("packages_main.json"));
        assert!(!p.matches("readme.md"));
        assert!(FilePattern::new("[").is_err());
    }

    #[test]
    fn walks_and_loads_in_sorted_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(
            dir.path().join("nested/b.json"),
            r#"[{"id": 2}, {"id": 3}]"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("a.json"), r#"{"id": 1}"#).unwrap();
        std::fs::write(dir.path().join("skip.txt"), "nope").unwrap();

        let source = JsonFileSource::new(
            dir.path(),
            vec![FilePattern::new(r"\.json$").unwrap()],
        );
        let docs = source.documents().unwrap();
        assert_eq!(docs, vec![json!({"id": 1}), json!({"id": 2}), json!({"id": 3})]);
    }

    #[test]
    fn jsonl_lines_become_documents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.jsonl");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, r#"{{"id": "a"}}"#).unwrap();
        writeln!(f).unwrap();
        writeln!(f, r#"{{"id": "b"}}"#).unwrap();
        drop(f);

        let source =
            JsonFileSource::new(dir.path(), vec![FilePattern::new(r"\.jsonl$").unwrap()]);
        assert_eq!(source.documents().unwrap().len(), 2);
    }

    #[test]
    fn limit_files_truncates() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.json", "b.json", "c.json"] {
            std::fs::write(dir.path().join(name), r#"{"x": 1}"#).unwrap();
        }
        let source = JsonFileSource::new(
            dir.path(),
            vec![FilePattern::new(r"\.json$").unwrap()],
        )
        .with_limit_files(Some(2));
        assert_eq!(source.matching_files().unwrap().len(), 2);
    }
}
