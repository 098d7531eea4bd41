//! Core types for the execution subsystem.

use serde::{Deserialize, Deserializer, Serialize};
use std::time::{Duration, Instant};

use crate::duration::format_duration;

/// Supported languages.
///
/// `javascript` is accepted on the wire as a legacy alias of `typescript`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Language {
    #[serde(rename = "typescript", alias = "javascript")]
    TypeScript,
    #[serde(rename = "go")]
    Go,
    #[serde(rename = "postgres")]
    Postgres,
}

impl Language {
    pub fn as_str(self) -> &'static str {
        match self {
            Language::TypeScript => "typescript",
            Language::Go => "go",
            Language::Postgres => "postgres",
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "typescript" | "javascript" => Ok(Language::TypeScript),
            "go" => Ok(Language::Go),
            "postgres" => Ok(Language::Postgres),
            other => Err(format!("unknown language: {other}")),
        }
    }
}

/// Reserved exit codes shared with the UI shell.
pub mod exit_code {
    /// Generic runtime or compile failure.
    pub const FAILURE: i32 = 1;
    /// TypeScript transpile failure.
    pub const TRANSPILE_FAILED: i32 = 2;
    /// Execution or query deadline elapsed.
    pub const TIMEOUT: i32 = 124;
    /// Go toolchain not found on the host.
    pub const GO_NOT_INSTALLED: i32 = 150;
    /// PostgreSQL executor has no usable configuration.
    pub const POSTGRES_NOT_AVAILABLE: i32 = 151;
    /// PostgreSQL pool creation or connection failed.
    pub const POSTGRES_CONN_FAILED: i32 = 152;
    /// PostgreSQL query failed or the query was empty.
    pub const POSTGRES_QUERY_ERROR: i32 = 153;
    /// No external JavaScript runtime to fall back to.
    pub const NODE_NOT_AVAILABLE: i32 = 160;
}

/// A request to execute a snippet.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionConfig {
    pub code: String,

    pub language: Language,

    /// Request deadline; zero means "use the executor's default".
    #[serde(with = "duration_nanos", default)]
    pub timeout: Duration,

    /// Stdin text for Go programs. Unused by the other executors.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub input: String,

    /// When present on a Postgres request, replaces the executor's bound
    /// configuration before the query runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postgresql_conn: Option<PostgresConfig>,
}

impl ExecutionConfig {
    pub fn new(code: impl Into<String>, language: Language) -> Self {
        Self {
            code: code.into(),
            language,
            timeout: Duration::ZERO,
            input: String::new(),
            postgresql_conn: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = input.into();
        self
    }

    pub fn with_postgresql_conn(mut self, config: PostgresConfig) -> Self {
        self.postgresql_conn = Some(config);
        self
    }
}

/// Outcome of one execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub output: String,

    pub error: String,

    pub exit_code: i32,

    #[serde(with = "duration_nanos")]
    pub duration: Duration,

    pub duration_string: String,

    pub language: Language,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql_result: Option<SqlQueryResult>,
}

impl ExecutionResult {
    pub(crate) fn new(language: Language) -> Self {
        Self {
            output: String::new(),
            error: String::new(),
            exit_code: 0,
            duration: Duration::ZERO,
            duration_string: String::new(),
            language,
            sql_result: None,
        }
    }

    /// Records the wall time since `started` and its rendering.
    pub(crate) fn stamp(&mut self, started: Instant) {
        self.duration = started.elapsed();
        self.duration_string = format_duration(self.duration);
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Leading-keyword classification of a SQL statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QueryType {
    Select,
    Insert,
    Update,
    Delete,
    Create,
    Drop,
    Alter,
    With,
    Other,
}

impl QueryType {
    /// Whether the statement produces a row set rather than a command tag.
    pub fn returns_rows(self) -> bool {
        matches!(self, QueryType::Select | QueryType::With)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QueryType::Select => "SELECT",
            QueryType::Insert => "INSERT",
            QueryType::Update => "UPDATE",
            QueryType::Delete => "DELETE",
            QueryType::Create => "CREATE",
            QueryType::Drop => "DROP",
            QueryType::Alter => "ALTER",
            QueryType::With => "WITH",
            QueryType::Other => "OTHER",
        }
    }
}

impl std::fmt::Display for QueryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured payload for a SQL execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlQueryResult {
    pub query_type: QueryType,

    /// Column names in server order.
    pub columns: Vec<String>,

    /// Rows in server order; every row is aligned to `columns`.
    pub rows: Vec<Vec<serde_json::Value>>,

    /// Server row count for command statements; `rows.len()` for row sets.
    pub rows_affected: i64,

    /// Wall time of the query call alone.
    #[serde(with = "duration_nanos")]
    pub execution_time: Duration,
}

/// TLS negotiation mode for a PostgreSQL connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SslMode {
    Disable,
    #[default]
    Prefer,
    Require,
}

impl SslMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SslMode::Disable => "disable",
            SslMode::Prefer => "prefer",
            SslMode::Require => "require",
        }
    }
}

// Settings dialogs ship an empty string before the user picks a mode, so
// treat empty as the default rather than rejecting the config.
impl<'de> Deserialize<'de> for SslMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        match raw.as_str() {
            "" | "prefer" => Ok(SslMode::Prefer),
            "disable" => Ok(SslMode::Disable),
            "require" => Ok(SslMode::Require),
            other => Err(serde::de::Error::unknown_variant(
                other,
                &["disable", "prefer", "require"],
            )),
        }
    }
}

/// Connection parameters for the PostgreSQL executor.
///
/// Host, port, database, username, and `ssl_mode` determine pool identity;
/// changing any of them tears the current pool down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub ssl_mode: SslMode,
}

/// Knobs shared by every executor.
#[derive(Debug, Clone, Copy)]
pub struct ExecutorOptions {
    /// Default deadline applied when a request carries none.
    pub timeout: Duration,
    /// Sandbox heap ceiling in MiB.
    pub memory_mb: usize,
    /// Cap on captured console lines per evaluation.
    pub max_outputs: usize,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            memory_mb: 50,
            max_outputs: 1000,
        }
    }
}

mod duration_nanos {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_nanos().min(u128::from(u64::MAX)) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_nanos(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_round_trips_and_honors_the_legacy_alias() {
        let lang: Language = serde_json::from_str("\"javascript\"").unwrap();
        assert_eq!(lang, Language::TypeScript);
        assert_eq!(serde_json::to_string(&lang).unwrap(), "\"typescript\"");

        let lang: Language = serde_json::from_str("\"postgres\"").unwrap();
        assert_eq!(lang, Language::Postgres);
    }

    #[test]
    fn result_serializes_with_wire_field_names() {
        let mut result = ExecutionResult::new(Language::Go);
        result.exit_code = 124;
        result.duration = Duration::from_millis(3);
        result.duration_string = "3ms".to_string();

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["exitCode"], 124);
        assert_eq!(value["durationString"], "3ms");
        assert_eq!(value["duration"], 3_000_000u64);
        assert_eq!(value["language"], "go");
        assert!(value.get("sqlResult").is_none());
    }

    #[test]
    fn config_accepts_missing_timeout_and_empty_ssl_mode() {
        let config: ExecutionConfig = serde_json::from_str(
            r#"{
                "code": "SELECT 1",
                "language": "postgres",
                "postgresqlConn": {
                    "host": "localhost",
                    "port": 5432,
                    "database": "app",
                    "username": "app",
                    "password": "",
                    "sslMode": ""
                }
            }"#,
        )
        .unwrap();

        assert_eq!(config.timeout, Duration::ZERO);
        let conn = config.postgresql_conn.unwrap();
        assert_eq!(conn.ssl_mode, SslMode::Prefer);
    }

    #[test]
    fn query_type_uses_uppercase_tags() {
        assert_eq!(
            serde_json::to_string(&QueryType::Select).unwrap(),
            "\"SELECT\""
        );
        assert!(QueryType::With.returns_rows());
        assert!(!QueryType::Insert.returns_rows());
    }
}
