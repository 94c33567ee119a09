use crate::completion::deliver;
use crate::config::ExecOptions;
use crate::errors::{ParseError, QueryError};
use crate::logger::{NoopLog, QueryLog};
use crate::storage::{FindQuery, MapReduceJob, Storage, StoredRecord, json_object_to_document};
use bson::{Document, doc};
use std::sync::Arc;

use super::flatten::flatten;
use super::types::{QueryDescriptor, QueryMode, QueryOutput};

/// Runs a [`QueryDescriptor`] against a [`Storage`] collaborator.
pub struct Dispatcher<S> {
    storage: Arc<S>,
    log: Arc<dyn QueryLog>,
}

impl<S> Clone for Dispatcher<S> {
    fn clone(&self) -> Self {
        Self { storage: Arc::clone(&self.storage), log: Arc::clone(&self.log) }
    }
}

impl<S: Storage> Dispatcher<S> {
    pub fn new(storage: Arc<S>, log: Arc<dyn QueryLog>) -> Self {
        Self { storage, log }
    }

    /// Dispatcher that logs nowhere.
    pub fn silent(storage: Arc<S>) -> Self {
        Self::new(storage, Arc::new(NoopLog))
    }

    #[must_use]
    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    /// Execute `desc`, resolving once with the shaped output.
    ///
    /// Each supported mode logs its name and filter at debug level. An
    /// unsupported mode is not an error: it logs at error level and yields
    /// [`QueryOutput::Empty`].
    ///
    /// # Errors
    /// Storage failures are forwarded unchanged as [`QueryError::Storage`].
    pub async fn execute(
        &self,
        desc: &QueryDescriptor,
        opts: &ExecOptions,
    ) -> Result<QueryOutput, QueryError> {
        let filter = desc.filter.to_document();
        if !matches!(desc.mode, QueryMode::Unsupported(_)) {
            self.log.debug(&format!("{}: {filter}", desc.mode.as_str()));
        }
        match &desc.mode {
            QueryMode::Find => {
                let records = self.storage.find(find_query(desc, filter, opts)).await?;
                Ok(QueryOutput::Records(
                    records.into_iter().map(|r| shape(r, desc.flatten)).collect(),
                ))
            }
            QueryMode::FindOne => {
                let record = self.storage.find_one(find_query(desc, filter, opts)).await?;
                Ok(QueryOutput::Record(record.map(|r| shape(r, desc.flatten))))
            }
            QueryMode::Count => {
                let count = self.storage.count(filter).await?;
                Ok(QueryOutput::Count { count })
            }
            QueryMode::Distinct => {
                let field = desc.distinct_field().ok_or(ParseError::MissingDistinctField)?;
                let values = self
                    .storage
                    .distinct(field.to_owned(), filter, desc.exec.max_time_ms)
                    .await?;
                Ok(QueryOutput::Values(values))
            }
            QueryMode::Aggregate => {
                let pipeline = vec![doc! {"$match": filter}];
                let docs = self.storage.aggregate(pipeline, desc.exec.clone()).await?;
                Ok(QueryOutput::Documents(docs))
            }
            QueryMode::MapReduce => {
                let spec = desc.map_reduce.as_ref().ok_or(ParseError::IncompleteMapReduce)?;
                let job = MapReduceJob {
                    map: spec.map.clone(),
                    reduce: spec.reduce.clone(),
                    limit: desc.limit,
                    query: filter,
                    scope: spec.scope.as_ref().map(json_object_to_document),
                    finalize: spec.finalize.clone(),
                };
                Ok(QueryOutput::MapReduce(self.storage.map_reduce(job).await?))
            }
            QueryMode::Unsupported(token) => {
                self.log.error(&format!("unsupported query type `{token}`"));
                Ok(QueryOutput::Empty)
            }
        }
    }

    /// Callback form of [`Dispatcher::execute`]; `done` is called exactly once.
    pub async fn execute_with<F>(&self, desc: &QueryDescriptor, opts: &ExecOptions, done: F)
    where
        F: FnOnce(Result<QueryOutput, QueryError>),
    {
        deliver(self.execute(desc, opts), done).await;
    }
}

/// Chain modifiers in the fixed order: sort, skip, limit, select, populate,
/// lean, maxTimeMS, explain.
fn find_query(desc: &QueryDescriptor, filter: Document, opts: &ExecOptions) -> FindQuery {
    let mut q = FindQuery::new(filter);
    if let Some(sort) = &desc.sort {
        q = q.sort(sort.clone());
    }
    if let Some(n) = desc.skip {
        q = q.skip(n);
    }
    if let Some(n) = desc.limit {
        q = q.limit(n);
    }
    if let Some(fields) = desc.projection() {
        q = q.select(fields.to_vec());
    }
    if !desc.populate.is_empty() {
        q = q.populate(desc.populate.clone());
    }
    if opts.lean {
        q = q.lean();
    }
    if let Some(ms) = desc.exec.max_time_ms {
        q = q.max_time_ms(ms);
    }
    if let Some(explain) = desc.exec.explain_requested() {
        q = q.explain(explain.clone());
    }
    q
}

fn shape(record: StoredRecord, flat: bool) -> Document {
    let doc = record.into_document();
    if flat { flatten(&doc) } else { doc }
}
