//! Storage collaborator boundary.
//!
//! The dispatcher talks to a collection only through [`Storage`]. Find queries are
//! handed over as a [`FindQuery`] whose modifiers keep the order they were chained in.

mod eval;
mod memory;
mod predicate;

pub use eval::{check_projection, compare_bson, eval_predicate, get_path, project};
pub use memory::{MemoryCollection, VirtualFn};
pub use predicate::{CmpOp, Pattern, Predicate};

use crate::errors::StorageError;
use crate::query::{ExecHints, Explain, SortSpec};
use bson::{Bson, Document};
use std::future::Future;

pub type StorageResult<T> = Result<T, StorageError>;

/// One chained modifier of a find query.
#[derive(Debug, Clone, PartialEq)]
pub enum Modifier {
    Sort(Vec<SortSpec>),
    Skip(u64),
    Limit(u64),
    Select(Vec<String>),
    Populate(Vec<String>),
    Lean,
    MaxTimeMs(u64),
    Explain(Explain),
}

impl Modifier {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Sort(_) => "sort",
            Self::Skip(_) => "skip",
            Self::Limit(_) => "limit",
            Self::Select(_) => "select",
            Self::Populate(_) => "populate",
            Self::Lean => "lean",
            Self::MaxTimeMs(_) => "maxTimeMS",
            Self::Explain(_) => "explain",
        }
    }
}

/// A filtered find with its modifier chain.
#[derive(Debug, Clone, PartialEq)]
pub struct FindQuery {
    pub filter: Document,
    pub modifiers: Vec<Modifier>,
}

impl FindQuery {
    #[must_use]
    pub const fn new(filter: Document) -> Self {
        Self { filter, modifiers: Vec::new() }
    }

    #[must_use]
    pub fn sort(self, spec: Vec<SortSpec>) -> Self {
        self.push(Modifier::Sort(spec))
    }

    #[must_use]
    pub fn skip(self, n: u64) -> Self {
        self.push(Modifier::Skip(n))
    }

    #[must_use]
    pub fn limit(self, n: u64) -> Self {
        self.push(Modifier::Limit(n))
    }

    #[must_use]
    pub fn select(self, fields: Vec<String>) -> Self {
        self.push(Modifier::Select(fields))
    }

    #[must_use]
    pub fn populate(self, paths: Vec<String>) -> Self {
        self.push(Modifier::Populate(paths))
    }

    #[must_use]
    pub fn lean(self) -> Self {
        self.push(Modifier::Lean)
    }

    #[must_use]
    pub fn max_time_ms(self, ms: u64) -> Self {
        self.push(Modifier::MaxTimeMs(ms))
    }

    #[must_use]
    pub fn explain(self, explain: Explain) -> Self {
        self.push(Modifier::Explain(explain))
    }

    fn push(mut self, m: Modifier) -> Self {
        self.modifiers.push(m);
        self
    }

    /// Modifier names in chain order.
    #[must_use]
    pub fn chain(&self) -> Vec<&'static str> {
        self.modifiers.iter().map(Modifier::name).collect()
    }
}

/// A record as returned by storage: plain data, or a materialized record with
/// derived (virtual) fields alongside.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredRecord {
    Lean(Document),
    Hydrated { doc: Document, virtuals: Document },
}

impl StoredRecord {
    /// Plain document; hydrated records get their virtuals merged in.
    /// Stored fields win over virtuals of the same name.
    #[must_use]
    pub fn into_document(self) -> Document {
        match self {
            Self::Lean(doc) => doc,
            Self::Hydrated { mut doc, virtuals } => {
                for (k, v) in virtuals {
                    if !doc.contains_key(&k) {
                        doc.insert(k, v);
                    }
                }
                doc
            }
        }
    }
}

/// Map-reduce job handed to storage.
#[derive(Debug, Clone, PartialEq)]
pub struct MapReduceJob {
    pub map: String,
    pub reduce: String,
    pub limit: Option<u64>,
    pub query: Document,
    pub scope: Option<Document>,
    pub finalize: Option<String>,
}

/// Per-collection storage operations. Each call resolves exactly once.
pub trait Storage: Send + Sync {
    fn find(&self, query: FindQuery) -> impl Future<Output = StorageResult<Vec<StoredRecord>>> + Send;

    fn find_one(
        &self,
        query: FindQuery,
    ) -> impl Future<Output = StorageResult<Option<StoredRecord>>> + Send;

    fn count(&self, filter: Document) -> impl Future<Output = StorageResult<u64>> + Send;

    fn distinct(
        &self,
        field: String,
        filter: Document,
        max_time_ms: Option<u64>,
    ) -> impl Future<Output = StorageResult<Vec<Bson>>> + Send;

    fn aggregate(
        &self,
        pipeline: Vec<Document>,
        options: ExecHints,
    ) -> impl Future<Output = StorageResult<Vec<Document>>> + Send;

    fn map_reduce(&self, job: MapReduceJob) -> impl Future<Output = StorageResult<Bson>> + Send;
}

/// Convert a JSON value into BSON. Integers become `Int32` when they fit.
#[must_use]
pub fn json_to_bson(value: &serde_json::Value) -> Bson {
    use serde_json::Value;
    match value {
        Value::Null => Bson::Null,
        Value::Bool(b) => Bson::Boolean(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => i32::try_from(i).map_or(Bson::Int64(i), Bson::Int32),
            None => Bson::Double(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => Bson::String(s.clone()),
        Value::Array(items) => Bson::Array(items.iter().map(json_to_bson).collect()),
        Value::Object(map) => Bson::Document(json_object_to_document(map)),
    }
}

#[must_use]
pub fn json_object_to_document(map: &serde_json::Map<String, serde_json::Value>) -> Document {
    let mut d = Document::new();
    for (k, v) in map {
        d.insert(k.clone(), json_to_bson(v));
    }
    d
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn chain_keeps_call_order() {
        let q = FindQuery::new(doc! {}).limit(1).sort(vec![SortSpec::asc("a")]).lean();
        assert_eq!(q.chain(), vec!["limit", "sort", "lean"]);
    }

    #[test]
    fn hydrated_merge_prefers_stored_fields() {
        let r = StoredRecord::Hydrated {
            doc: doc! {"name": "a", "id": "stored"},
            virtuals: doc! {"id": "virtual", "label": "A"},
        };
        assert_eq!(r.into_document(), doc! {"name": "a", "id": "stored", "label": "A"});
    }

    #[test]
    fn json_numbers_narrow() {
        let v = serde_json::json!({"a": 1, "b": 5_000_000_000_i64, "c": 1.5, "d": [null, "x"]});
        assert_eq!(
            json_to_bson(&v),
            Bson::Document(doc! {"a": 1, "b": 5_000_000_000_i64, "c": 1.5, "d": [Bson::Null, "x"]})
        );
    }
}
