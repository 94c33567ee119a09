use crate::completion::deliver;
use crate::config::{ExecOptions, ServiceConfig};
use crate::errors::QueryError;
use crate::logger::{FacadeLog, NoopLog, QueryLog};
use crate::query::{Dispatcher, QueryDescriptor, QueryOutput, QueryParams, Translator};
use crate::storage::Storage;
use std::sync::Arc;

// Integration entry points: translate a parameter map, then dispatch it.
// The default pair returns materialized records; the lean pair plain data.

pub struct QueryService<S> {
    translator: Translator,
    dispatcher: Dispatcher<S>,
    default_opts: ExecOptions,
    lean_opts: ExecOptions,
}

impl<S: Storage> QueryService<S> {
    pub fn new(storage: Arc<S>, log: Arc<dyn QueryLog>, config: &ServiceConfig) -> Self {
        Self {
            translator: Translator::new(Arc::clone(&log)),
            dispatcher: Dispatcher::new(storage, log),
            default_opts: config.exec_options(),
            lean_opts: config.lean_exec_options(),
        }
    }

    /// Logs through the `log` facade when the config asks for logging, otherwise nowhere.
    pub fn from_config(storage: Arc<S>, config: &ServiceConfig) -> Self {
        let log: Arc<dyn QueryLog> =
            if config.wants_logging() { Arc::new(FacadeLog) } else { Arc::new(NoopLog) };
        Self::new(storage, log, config)
    }

    #[must_use]
    pub const fn translator(&self) -> &Translator {
        &self.translator
    }

    #[must_use]
    pub const fn dispatcher(&self) -> &Dispatcher<S> {
        &self.dispatcher
    }

    /// Translate only.
    ///
    /// # Errors
    /// Returns [`QueryError::Parse`] on malformed parameters.
    pub fn describe(&self, params: &QueryParams) -> Result<QueryDescriptor, QueryError> {
        Ok(self.translator.translate(params)?)
    }

    /// # Errors
    /// Parse and storage failures, see [`QueryError`].
    pub async fn query(&self, params: &QueryParams) -> Result<QueryOutput, QueryError> {
        self.run(params, self.default_opts).await
    }

    /// # Errors
    /// Parse and storage failures, see [`QueryError`].
    pub async fn lean_query(&self, params: &QueryParams) -> Result<QueryOutput, QueryError> {
        self.run(params, self.lean_opts).await
    }

    pub async fn query_with<F>(&self, params: &QueryParams, done: F)
    where
        F: FnOnce(Result<QueryOutput, QueryError>),
    {
        deliver(self.run(params, self.default_opts), done).await;
    }

    pub async fn lean_query_with<F>(&self, params: &QueryParams, done: F)
    where
        F: FnOnce(Result<QueryOutput, QueryError>),
    {
        deliver(self.run(params, self.lean_opts), done).await;
    }

    async fn run(&self, params: &QueryParams, opts: ExecOptions) -> Result<QueryOutput, QueryError> {
        let desc = self.translator.translate(params)?;
        self.dispatcher.execute(&desc, &opts).await
    }
}
