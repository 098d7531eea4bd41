//! CodeZone execution core.
//!
//! Accepts a source snippet and a language tag, evaluates it in an
//! isolated, resource-bounded environment, and returns a structured
//! result. Three backends: TypeScript/JavaScript (transpiled, then Node.js
//! or an embedded V8 isolate), Go (host toolchain in a scratch workspace),
//! and PostgreSQL (pooled connection to a configured server).

mod duration;
mod error;
mod golang;
mod manager;
mod postgres;
pub mod spawn;
mod typescript;
mod types;

pub use duration::format_duration;
pub use error::ExecError;
pub use golang::GoExecutor;
pub use manager::{ExecutionManager, Executor};
pub use postgres::PostgresExecutor;
pub use typescript::TypeScriptExecutor;
pub use types::{
    exit_code, ExecutionConfig, ExecutionResult, ExecutorOptions, Language, PostgresConfig,
    QueryType, SqlQueryResult, SslMode,
};
