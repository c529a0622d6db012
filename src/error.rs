//! Typed errors surfaced at the store boundary.
//!
//! Queries that simply miss return `Ok(None)`; `NotFound` is reserved for
//! writes that depend on a row being present. Task-level code wraps these in
//! `anyhow` like every other failure.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Validation failure. The reason is recorded in the validation log.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// A write depended on a row that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Alias cycle, foreign-key mismatch, or duplicate canonical record.
    #[error("referential violation: {0}")]
    ReferentialViolation(String),

    /// Persistence-layer failure; eligible for retry by the caller.
    #[error("storage failure: {0}")]
    Io(#[from] rusqlite::Error),

    /// Unrecoverable corruption.
    #[error("fatal: {0}")]
    Fatal(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
