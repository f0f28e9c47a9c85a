//! Logical query engine.
//!
//! A [`Query`] is what callers build. It is translated into one or more
//! primitive [`QueryDefinition`](kinddb_proto::QueryDefinition)s the store
//! can execute directly: `!=` and `IN` filters fan out into several
//! definitions, whose results are merged and re-sorted on the client.

mod builder;
pub mod decompose;
pub mod distinct;
mod executor;
mod filter;
mod hooks;
pub mod resort;

pub use builder::Query;
pub use decompose::decompose;
pub use distinct::physical_orders;
pub use executor::QueryIter;
pub use filter::FilterEvaluator;
pub use hooks::{FilterHook, FilterRequest, HookOutcome, LimitFn, MergeFn, OrderHook};
pub use resort::{logical_orders, resort};
