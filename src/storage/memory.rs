use crate::errors::StorageError;
use crate::query::{ExecHints, Explain, Order, SortSpec};
use bson::oid::ObjectId;
use bson::{Bson, Document};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::eval::{check_projection, compare_docs, dedupe, eval_predicate, get_path, project};
use super::predicate::Predicate;
use super::{FindQuery, MapReduceJob, Modifier, Storage, StorageResult, StoredRecord};

/// Derived field computed from a stored document on the materialized path.
pub type VirtualFn = Arc<dyn Fn(&Document) -> Option<Bson> + Send + Sync>;

/// In-memory collection implementing [`Storage`].
///
/// Documents get an `ObjectId` `_id` on insert when they lack one. Non-lean reads
/// come back hydrated with virtual fields, including `id` (the hex form of `_id`).
pub struct MemoryCollection {
    name: String,
    docs: RwLock<Vec<Document>>,
    virtuals: RwLock<Vec<(String, VirtualFn)>>,
    relations: RwLock<HashMap<String, Arc<MemoryCollection>>>,
}

impl MemoryCollection {
    pub fn new(name: impl Into<String>) -> Self {
        let id_virtual: VirtualFn = Arc::new(|d: &Document| match d.get("_id") {
            Some(Bson::ObjectId(oid)) => Some(Bson::String(oid.to_hex())),
            Some(Bson::String(s)) => Some(Bson::String(s.clone())),
            Some(other) => Some(Bson::String(other.to_string())),
            None => None,
        });
        Self {
            name: name.into(),
            docs: RwLock::new(Vec::new()),
            virtuals: RwLock::new(vec![("id".to_owned(), id_virtual)]),
            relations: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Insert a document, returning its `_id`.
    pub fn insert(&self, mut doc: Document) -> Bson {
        if !doc.contains_key("_id") {
            doc.insert("_id", ObjectId::new());
        }
        let id = doc.get("_id").cloned().unwrap_or(Bson::Null);
        self.docs.write().push(doc);
        id
    }

    pub fn insert_many(&self, docs: impl IntoIterator<Item = Document>) -> Vec<Bson> {
        docs.into_iter().map(|d| self.insert(d)).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.docs.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.docs.read().is_empty()
    }

    /// Snapshot of all stored documents in insertion order.
    #[must_use]
    pub fn documents(&self) -> Vec<Document> {
        self.docs.read().clone()
    }

    /// Register a derived field returned on non-lean reads.
    pub fn add_virtual(&self, name: impl Into<String>, f: VirtualFn) {
        self.virtuals.write().push((name.into(), f));
    }

    /// Declare that `path` holds ids (or arrays of ids) of documents in `target`.
    pub fn add_relation(&self, path: impl Into<String>, target: Arc<Self>) {
        self.relations.write().insert(path.into(), target);
    }

    fn matching(&self, filter: &Document, deadline: &Deadline) -> StorageResult<Vec<Document>> {
        let pred = Predicate::compile(filter)?;
        let docs = self.docs.read();
        let mut out = Vec::new();
        for d in docs.iter() {
            deadline.check()?;
            if eval_predicate(d, &pred) {
                out.push(d.clone());
            }
        }
        Ok(out)
    }

    fn run_find(&self, query: &FindQuery, single: bool) -> StorageResult<Vec<StoredRecord>> {
        let plan = FindPlan::from_modifiers(&query.modifiers);
        let deadline = Deadline::new(plan.max_time_ms);
        let mut docs = self.matching(&query.filter, &deadline)?;
        let examined = self.len();

        if let Some(sort) = &plan.sort {
            docs.sort_by(|a, b| compare_docs(a, b, sort));
        }
        let skip = usize::try_from(plan.skip.unwrap_or(0)).unwrap_or(usize::MAX);
        let limit = match plan.limit {
            Some(0) | None => usize::MAX,
            Some(n) => usize::try_from(n).unwrap_or(usize::MAX),
        };
        let limit = if single { limit.min(1) } else { limit };
        let mut docs: Vec<Document> = docs.into_iter().skip(skip).take(limit).collect();

        if let Some(explain) = &plan.explain {
            return Ok(vec![StoredRecord::Lean(self.explain_doc(query, &plan, explain, examined, docs.len()))]);
        }
        if let Some(fields) = &plan.select {
            check_projection(fields)?;
            for d in &mut docs {
                *d = project(d, fields);
            }
        }
        for path in &plan.populate {
            deadline.check()?;
            self.populate(&mut docs, path)?;
        }
        let mut out = Vec::with_capacity(docs.len());
        for d in docs {
            out.push(self.materialize(d, plan.lean));
            deadline.check()?;
        }
        Ok(out)
    }

    fn populate(&self, docs: &mut [Document], path: &str) -> StorageResult<()> {
        let target = self
            .relations
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| StorageError::Unsupported(format!("no relation registered for `{path}`")))?;
        let related = target.documents();
        let lookup = |id: &Bson| related.iter().find(|r| r.get("_id") == Some(id)).cloned();
        for d in docs.iter_mut() {
            let Some(current) = get_path(d, path).cloned() else { continue };
            let expanded = match current {
                Bson::Array(ids) => {
                    Bson::Array(ids.iter().filter_map(&lookup).map(Bson::Document).collect())
                }
                id => lookup(&id).map_or(Bson::Null, Bson::Document),
            };
            replace_path(d, path, expanded);
        }
        Ok(())
    }

    fn materialize(&self, doc: Document, lean: bool) -> StoredRecord {
        if lean {
            return StoredRecord::Lean(doc);
        }
        let mut virtuals = Document::new();
        for (name, f) in self.virtuals.read().iter() {
            if let Some(v) = f(&doc) {
                virtuals.insert(name.clone(), v);
            }
        }
        StoredRecord::Hydrated { doc, virtuals }
    }

    fn explain_doc(
        &self,
        query: &FindQuery,
        plan: &FindPlan,
        explain: &Explain,
        examined: usize,
        returned: usize,
    ) -> Document {
        let mut planner = Document::new();
        planner.insert("namespace", self.name.clone());
        planner.insert("filter", query.filter.clone());
        planner.insert("chain", query.chain().into_iter().map(Bson::from).collect::<Vec<_>>());
        if let Some(sort) = &plan.sort {
            let mut s = Document::new();
            for spec in sort {
                s.insert(spec.field.clone(), if spec.order == Order::Asc { 1 } else { -1 });
            }
            planner.insert("sort", s);
        }
        let mut out = Document::new();
        out.insert("queryPlanner", planner);
        if matches!(explain, Explain::Verbosity(v) if v != "queryPlanner") {
            let mut stats = Document::new();
            stats.insert("nReturned", i64::try_from(returned).unwrap_or(i64::MAX));
            stats.insert("totalDocsExamined", i64::try_from(examined).unwrap_or(i64::MAX));
            out.insert("executionStats", stats);
        }
        out
    }

    fn run_aggregate(&self, pipeline: &[Document], options: &ExecHints) -> StorageResult<Vec<Document>> {
        if options.explain_requested().is_some() {
            let mut d = Document::new();
            d.insert("stages", pipeline.iter().cloned().map(Bson::Document).collect::<Vec<_>>());
            return Ok(vec![d]);
        }
        let deadline = Deadline::new(options.max_time_ms);
        let mut docs = self.documents();
        for stage in pipeline {
            deadline.check()?;
            let Some((name, arg)) = stage.iter().next() else {
                return Err(StorageError::UnsupportedStage("empty stage".into()));
            };
            docs = match (name.as_str(), arg) {
                ("$match", Bson::Document(filter)) => {
                    let pred = Predicate::compile(filter)?;
                    docs.into_iter().filter(|d| eval_predicate(d, &pred)).collect()
                }
                ("$sort", Bson::Document(spec)) => {
                    let sort = sort_specs(spec);
                    docs.sort_by(|a, b| compare_docs(a, b, &sort));
                    docs
                }
                ("$skip", n) => docs.into_iter().skip(stage_count(name, n)?).collect(),
                ("$limit", n) => docs.into_iter().take(stage_count(name, n)?).collect(),
                ("$project", Bson::Document(spec)) => {
                    let fields = projection_fields(spec);
                    check_projection(&fields)?;
                    docs.iter().map(|d| project(d, &fields)).collect()
                }
                ("$count", Bson::String(field)) => {
                    let mut d = Document::new();
                    d.insert(field.clone(), i64::try_from(docs.len()).unwrap_or(i64::MAX));
                    vec![d]
                }
                (other, _) => return Err(StorageError::UnsupportedStage(other.to_owned())),
            };
        }
        Ok(docs)
    }
}

impl Storage for MemoryCollection {
    async fn find(&self, query: FindQuery) -> StorageResult<Vec<StoredRecord>> {
        self.run_find(&query, false)
    }

    async fn find_one(&self, query: FindQuery) -> StorageResult<Option<StoredRecord>> {
        Ok(self.run_find(&query, true)?.into_iter().next())
    }

    async fn count(&self, filter: Document) -> StorageResult<u64> {
        let n = self.matching(&filter, &Deadline::new(None))?.len();
        Ok(u64::try_from(n).unwrap_or(u64::MAX))
    }

    async fn distinct(
        &self,
        field: String,
        filter: Document,
        max_time_ms: Option<u64>,
    ) -> StorageResult<Vec<Bson>> {
        let docs = self.matching(&filter, &Deadline::new(max_time_ms))?;
        let mut values = Vec::new();
        for d in &docs {
            match get_path(d, &field) {
                Some(Bson::Array(items)) => values.extend(items.iter().cloned()),
                Some(v) => values.push(v.clone()),
                None => {}
            }
        }
        Ok(dedupe(values))
    }

    async fn aggregate(&self, pipeline: Vec<Document>, options: ExecHints) -> StorageResult<Vec<Document>> {
        self.run_aggregate(&pipeline, &options)
    }

    async fn map_reduce(&self, _job: MapReduceJob) -> StorageResult<Bson> {
        Err(StorageError::Unsupported(format!(
            "mapReduce is not available on in-memory collection `{}`",
            self.name
        )))
    }
}

/// Modifier chain folded into the settings the scan needs.
#[derive(Debug, Default)]
struct FindPlan {
    sort: Option<Vec<SortSpec>>,
    skip: Option<u64>,
    limit: Option<u64>,
    select: Option<Vec<String>>,
    populate: Vec<String>,
    lean: bool,
    max_time_ms: Option<u64>,
    explain: Option<Explain>,
}

impl FindPlan {
    fn from_modifiers(mods: &[Modifier]) -> Self {
        let mut plan = Self::default();
        for m in mods {
            match m {
                Modifier::Sort(s) => plan.sort = Some(s.clone()),
                Modifier::Skip(n) => plan.skip = Some(*n),
                Modifier::Limit(n) => plan.limit = Some(*n),
                Modifier::Select(f) => plan.select = Some(f.clone()),
                Modifier::Populate(p) => plan.populate.extend(p.iter().cloned()),
                Modifier::Lean => plan.lean = true,
                Modifier::MaxTimeMs(ms) => plan.max_time_ms = Some(*ms),
                Modifier::Explain(e) => plan.explain = Some(e.clone()).filter(Explain::is_requested),
            }
        }
        plan
    }
}

/// `maxTimeMS` deadline; zero or absent means unbounded.
struct Deadline {
    at: Option<(Instant, u64)>,
}

impl Deadline {
    fn new(max_time_ms: Option<u64>) -> Self {
        let at = max_time_ms
            .filter(|ms| *ms > 0)
            .map(|ms| (Instant::now() + Duration::from_millis(ms), ms));
        Self { at }
    }

    fn check(&self) -> StorageResult<()> {
        match self.at {
            Some((at, max_time_ms)) if Instant::now() > at => {
                Err(StorageError::Timeout { max_time_ms })
            }
            _ => Ok(()),
        }
    }
}

fn replace_path(doc: &mut Document, path: &str, value: Bson) {
    match path.split_once('.') {
        None => {
            doc.insert(path.to_owned(), value);
        }
        Some((head, rest)) => {
            if let Some(Bson::Document(child)) = doc.get_mut(head) {
                replace_path(child, rest, value);
            }
        }
    }
}

fn sort_specs(spec: &Document) -> Vec<SortSpec> {
    spec.iter()
        .map(|(field, dir)| match dir {
            Bson::Int32(n) if *n < 0 => SortSpec::desc(field.clone()),
            Bson::Int64(n) if *n < 0 => SortSpec::desc(field.clone()),
            Bson::Double(n) if *n < 0.0 => SortSpec::desc(field.clone()),
            _ => SortSpec::asc(field.clone()),
        })
        .collect()
}

fn projection_fields(spec: &Document) -> Vec<String> {
    spec.iter()
        .map(|(field, flag)| match flag {
            Bson::Int32(0) | Bson::Int64(0) | Bson::Boolean(false) => format!("-{field}"),
            _ => field.clone(),
        })
        .collect()
}

fn stage_count(name: &str, n: &Bson) -> StorageResult<usize> {
    let v = match n {
        Bson::Int32(i) => i64::from(*i),
        Bson::Int64(i) => *i,
        _ => return Err(StorageError::UnsupportedStage(format!("{name} requires an integer"))),
    };
    usize::try_from(v).map_err(|_| StorageError::UnsupportedStage(format!("{name} must be non-negative")))
}
