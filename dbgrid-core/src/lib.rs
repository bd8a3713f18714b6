//! Core SQL introspection, partition discovery, predicate injection, fan-out
//! scheduling, aggregate merging and result caching for the dbgrid
//! coordinator. `dbgrid-server` wires these modules to HTTP; this crate
//! contains no transport-layer code.

pub mod cache;
pub mod error;
pub mod executor;
pub mod introspector;
pub mod merge;
pub mod model;
pub mod partition;
pub mod rewrite;
pub mod scheduler;
pub mod sql_ast;
pub mod store_url;

pub use error::{CoordinatorError, ExecutorError};
pub use model::{CellValue, DistributedResultSet, NumThreads, ProfilingResultSet, QueryRequest, ResultSet, Row};
