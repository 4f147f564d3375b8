//! Catalog module
//!
//! This module contains the system catalog, schema definitions, and data types.

pub mod catalog;
pub mod schema;
pub mod types;

pub use catalog::{Catalog, TableEntry};
pub use schema::{Column, ForeignRef, Schema};
pub use types::DataType;
