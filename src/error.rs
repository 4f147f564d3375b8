//! Error types for MiniDB
//!
//! This module defines all error types used throughout the database engine.

use thiserror::Error;

/// The main error type for MiniDB
#[derive(Error, Debug)]
pub enum Error {
    // ========== Lexer Errors ==========
    #[error("Lex error at {line}:{column}: {message}")]
    Lex {
        message: String,
        line: usize,
        column: usize,
    },

    // ========== Parser Errors ==========
    /// The message carries the recovery hint when the parser recognized a
    /// well-known mistake (e.g. a JOIN with no ON clause).
    #[error("Parse error at {line}:{column}: {message}")]
    Parse {
        message: String,
        line: usize,
        column: usize,
    },

    // ========== Semantic Errors ==========
    #[error("Semantic error at {line}:{column}: {message}")]
    Semantic {
        message: String,
        line: usize,
        column: usize,
    },

    // ========== Planner Errors ==========
    #[error("Plan error: {0}")]
    Plan(String),

    // ========== Type Errors ==========
    #[error("Type error: {0}")]
    Type(String),

    // ========== Constraint Violations ==========
    /// Primary key duplicates, VARCHAR(n) overflow, foreign key misses.
    #[error("Constraint violation: {0}")]
    Constraint(String),

    // ========== Storage Errors ==========
    #[error("Buffer pool exhausted: all {0} frames are pinned")]
    BufferExhausted(usize),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ========== Execution Errors ==========
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl Error {
    /// Build a lex error from a source position.
    pub fn lex(message: impl Into<String>, line: usize, column: usize) -> Self {
        Error::Lex {
            message: message.into(),
            line,
            column,
        }
    }

    /// Build a parse error from a source position.
    pub fn parse(message: impl Into<String>, line: usize, column: usize) -> Self {
        Error::Parse {
            message: message.into(),
            line,
            column,
        }
    }

    /// Build a semantic error from a source position.
    pub fn semantic(message: impl Into<String>, line: usize, column: usize) -> Self {
        Error::Semantic {
            message: message.into(),
            line,
            column,
        }
    }
}

/// Result type alias for MiniDB operations
pub type Result<T> = std::result::Result<T, Error>;
