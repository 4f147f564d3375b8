//! MiniDB - A small relational database engine written in Rust
//!
//! This library provides the core components for a SQL database:
//! - SQL parsing (lexer, parser, AST, semantic analysis)
//! - Storage engine (pages, buffer pool, table files)
//! - Query planning and execution (planner, optimizer, executor)
//! - System catalog

pub mod catalog;
pub mod error;
pub mod executor;
pub mod sql;
pub mod storage;

pub use error::{Error, Result};
