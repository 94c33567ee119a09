// Parameter translation and dispatch, split by concern
mod coerce;
mod dispatch;
mod flatten;
mod params;
mod parse;
mod types;

// Public API re-exports
pub use coerce::{COERCIONS, coerce, coerce_exists};
pub use dispatch::Dispatcher;
pub use flatten::flatten;
pub use params::{ParamValue, QueryParams};
pub use parse::{Translator, reserved, split_operator, translate};
pub use types::{
    Clause, ExecHints, Explain, Fields, Filter, MapReduceSpec, Operator, Order, QueryDescriptor,
    QueryMode, QueryOutput, SortSpec,
};
