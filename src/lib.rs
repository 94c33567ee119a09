//! Translate flat URL query parameters into typed document-store queries and run
//! them against a pluggable storage collaborator.
//!
//! ```no_run
//! use std::sync::Arc;
//! use urlquery::{MemoryCollection, QueryParams, QueryService, ServiceConfig};
//!
//! # async fn demo() -> Result<(), urlquery::QueryError> {
//! let people = Arc::new(MemoryCollection::new("people"));
//! let service = QueryService::from_config(people, &ServiceConfig::default());
//! let out = service.query(&QueryParams::from_query_string("age[gte]=18&sort=-age&limit=5")).await?;
//! println!("{}", out.to_bson());
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod completion;
pub mod config;
pub mod errors;
pub mod logger;
pub mod query;
pub mod storage;

pub use api::QueryService;
pub use config::{ExecOptions, ServiceConfig};
pub use errors::{ConfigError, ParseError, QueryError, StorageError};
pub use logger::{FacadeLog, MemoryLog, NoopLog, QueryLog};
pub use query::{
    Dispatcher, QueryDescriptor, QueryMode, QueryOutput, QueryParams, Translator, translate,
};
pub use storage::{MemoryCollection, Storage};
