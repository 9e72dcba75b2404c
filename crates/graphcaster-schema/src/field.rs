//! Typed fields and index definitions.
//!
//! Fields are written in YAML either as bare strings (`- arxiv`) or as maps
//! (`{name: arxiv, type: STRING}`); both forms deserialize to [`Field`].

use serde::de::Deserializer;
use serde::{Deserialize, Serialize};

/// Field types for backends that require them. Schema-agnostic backends
/// leave the type unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldType {
    Int,
    Uint,
    Float,
    Double,
    Bool,
    String,
    DateTime,
}

/// A named, optionally typed field of a vertex or edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub field_type: Option<FieldType>,
}

impl Field {
    pub fn named(name: impl Into<String>) -> Self {
        Field {
            name: name.into(),
            field_type: None,
        }
    }
}

impl<'de> Deserialize<'de> for Field {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Name(String),
            Full {
                name: String,
                #[serde(rename = "type", default)]
                field_type: Option<FieldType>,
            },
        }

        match Raw::deserialize(deserializer)? {
            Raw::Name(name) => Ok(Field {
                name,
                field_type: None,
            }),
            Raw::Full { name, field_type } => Ok(Field { name, field_type }),
        }
    }
}

/// Index types understood by downstream writers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IndexType {
    #[default]
    Persistent,
    Hash,
    Skiplist,
    Fulltext,
}

fn default_true() -> bool {
    true
}

/// A secondary index over vertex or edge fields.
///
/// For edges, `name` may reference a vertex type: the index then covers that
/// vertex's identity fields under `vertex@field` composite names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Index {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default = "default_true")]
    pub unique: bool,
    #[serde(rename = "type", default)]
    pub index_type: IndexType,
    #[serde(default = "default_true")]
    pub deduplicate: bool,
    #[serde(default)]
    pub sparse: bool,
    #[serde(default)]
    pub exclude_edge_endpoints: bool,
}

impl Index {
    pub fn over(fields: Vec<String>) -> Self {
        Index {
            name: None,
            fields,
            unique: true,
            index_type: IndexType::Persistent,
            deduplicate: true,
            sparse: false,
            exclude_edge_endpoints: false,
        }
    }
}
