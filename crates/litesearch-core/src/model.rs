use serde::{Deserialize, Serialize};
use serde_json::{Number, Value as JsonValue};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

pub type IndexId = String;
pub type DocumentId = String; // uuid v4 hex when generated

/// field path -> number of documents in the index that contain it
pub type IndexFields = BTreeMap<String, u64>;

/// field path -> leaf values collected under that path, in document order
pub type DocumentFields = BTreeMap<String, Vec<Primitive>>;

/// A JSON leaf value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Primitive {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
}

impl Primitive {
    /// Returns `None` for arrays and objects.
    pub fn from_json(value: &JsonValue) -> Option<Self> {
        match value {
            JsonValue::Null => Some(Self::Null),
            JsonValue::Bool(b) => Some(Self::Bool(*b)),
            JsonValue::Number(n) => Some(Self::Number(n.clone())),
            JsonValue::String(s) => Some(Self::String(s.clone())),
            JsonValue::Array(_) | JsonValue::Object(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
        }
    }

    /// Equality by value: numbers compare numerically, so `1` equals `1.0`.
    pub fn same_value(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Number(_), Self::Number(_)) => self.as_f64() == other.as_f64(),
            _ => self == other,
        }
    }

    /// Ordering between values of the same type; `None` across types.
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Number(_), Self::Number(_)) => self.as_f64()?.partial_cmp(&other.as_f64()?),
            (Self::String(a), Self::String(b)) => Some(a.cmp(b)),
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            // quoted the way the query lexer reads string literals back
            Self::String(s) => {
                write!(f, "\"")?;
                for c in s.chars() {
                    if matches!(c, '"' | '\\') {
                        write!(f, "\\")?;
                    }
                    write!(f, "{c}")?;
                }
                write!(f, "\"")
            }
        }
    }
}

impl From<bool> for Primitive {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i32> for Primitive {
    fn from(n: i32) -> Self {
        Self::Number(n.into())
    }
}

impl From<i64> for Primitive {
    fn from(n: i64) -> Self {
        Self::Number(n.into())
    }
}

impl From<&str> for Primitive {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Index {
    pub id: IndexId,
    #[serde(default)]
    pub fields: IndexFields,
}

impl Index {
    pub fn new(id: impl Into<IndexId>) -> Self {
        Self {
            id: id.into(),
            fields: IndexFields::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub index_id: IndexId,
    pub source: JsonValue,
    #[serde(default)]
    pub fields: DocumentFields,
}

impl Document {
    pub fn summary(&self) -> DocumentSummary {
        DocumentSummary {
            id: self.id.clone(),
            index_id: self.index_id.clone(),
            fields: self.fields.clone(),
        }
    }
}

/// A document as returned in query pages, without its source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub id: DocumentId,
    pub index_id: IndexId,
    pub fields: DocumentFields,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Page {
    pub const DEFAULT_LIMIT: usize = 100;

    pub fn new(offset: usize, limit: usize) -> Self {
        Self { offset, limit }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: Self::DEFAULT_LIMIT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub total: u64,
    pub documents: Vec<DocumentSummary>,
}

pub fn new_document_id() -> DocumentId {
    uuid::Uuid::new_v4().simple().to_string()
}
