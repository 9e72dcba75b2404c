//! Graph output boundary.
//!
//! The caster hands finished batches to a [`GraphWriter`]. Writers are
//! batch-first: a failed batch is retried item by item so one poison item
//! cannot sink the rest.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::info;

use crate::container::GraphItem;
use crate::EngineError;

pub trait GraphWriter: Send {
    fn write_item(&mut self, item: &GraphItem) -> Result<(), EngineError>;

    fn write_batch(&mut self, items: &[GraphItem]) -> Result<(), EngineError> {
        for item in items {
            self.write_item(item)?;
        }
        Ok(())
    }

    /// Drop previously written output before a fresh run.
    fn reset(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    fn flush(&mut self) -> Result<(), EngineError> {
        Ok(())
    }
}

/// Counts what it is given and writes nothing. Backs dry runs.
#[derive(Debug, Default)]
pub struct NullWriter {
    pub vertices: usize,
    pub edges: usize,
}

impl NullWriter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GraphWriter for NullWriter {
    fn write_item(&mut self, item: &GraphItem) -> Result<(), EngineError> {
        match item {
            GraphItem::Vertex { .. } => self.vertices += 1,
            GraphItem::Edge { .. } => self.edges += 1,
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), EngineError> {
        info!(
            vertices = self.vertices,
            edges = self.edges,
            "dry run complete"
        );
        Ok(())
    }
}

/// Writes one JSON object per line.
pub struct JsonlWriter {
    out: BufWriter<File>,
    path: std::path::PathBuf,
}

impl JsonlWriter {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(&path)?;
        Ok(JsonlWriter {
            out: BufWriter::new(file),
            path,
        })
    }
}

impl GraphWriter for JsonlWriter {
    fn write_item(&mut self, item: &GraphItem) -> Result<(), EngineError> {
        serde_json::to_writer(&mut self.out, item)?;
        self.out.write_all(b"\n")?;
        Ok(())
    }

    fn reset(&mut self) -> Result<(), EngineError> {
        self.out = BufWriter::new(File::create(&self.path)?);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), EngineError> {
        self.out.flush()?;
        Ok(())
    }
}
