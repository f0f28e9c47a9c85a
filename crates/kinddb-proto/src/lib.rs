//! KindDB protocol types.
//!
//! This crate defines the value objects shared by the query engine and the
//! store backends.
//!
//! # Modules
//!
//! - [`value`] - Property values and their cross-type ordering
//! - [`key`] - Hierarchical entity keys
//! - [`entity`] - Schemaless entities
//! - [`query`] - Primitive query definitions, filters and sort orders
//! - [`error`] - Protocol error types

pub mod entity;
pub mod error;
pub mod key;
pub mod query;
pub mod value;

pub use entity::Entity;
pub use error::Error;
pub use key::{key_helper, Key, KeyId, KeyInput};
pub use query::{
    FilterOp, FilterOperator, PropertyFilter, QueryDefinition, SortOrder, DEFAULT_LIMIT,
    KEY_SPECIAL_PROPERTY,
};
pub use value::{Value, ValueType};
