//! Library error type.
//!
//! Execution failures are reported inside `ExecutionResult`, never through
//! this enum; `ExecError` is reserved for conditions the caller must handle
//! out of band.

use thiserror::Error;

use crate::types::Language;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExecError {
    /// No executor is registered for the requested language.
    #[error("executor for {0} is not available")]
    UnsupportedLanguage(Language),

    /// The target executor is serving another request. Soft signal; the
    /// caller may drop it.
    #[error("{0} executor is busy")]
    Busy(Language),
}
