//! PostgreSQL execution over a pooled connection.
//!
//! The executor owns at most one pool, keyed to its bound configuration.
//! Changing the configuration tears the pool down; the next execution
//! rebuilds it lazily.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow, PgSslMode};
use sqlx::{Column, Row, TypeInfo};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::duration::format_duration;
use crate::error::ExecError;
use crate::manager::Executor;
use crate::types::{
    exit_code, ExecutionResult, Language, PostgresConfig, QueryType, SqlQueryResult, SslMode,
};

const POOL_MAX_CONNS: u32 = 5;
const POOL_MIN_CONNS: u32 = 1;
const POOL_MAX_LIFETIME: Duration = Duration::from_secs(60 * 60);
const POOL_MAX_IDLE: Duration = Duration::from_secs(30 * 60);
const STATUS_PING_TIMEOUT: Duration = Duration::from_secs(2);

/// Rows past this point are elided from the text rendering. The structured
/// payload always carries the full set.
const DISPLAY_ROW_CAP: usize = 100;

struct PgState {
    config: Option<PostgresConfig>,
    pool: Option<PgPool>,
}

pub struct PostgresExecutor {
    state: Mutex<PgState>,
}

impl PostgresExecutor {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PgState {
                config: None,
                pool: None,
            }),
        }
    }

    /// Binds a new configuration. Any open pool is closed so the next call
    /// rebuilds against the new parameters.
    pub async fn set_config(&self, config: PostgresConfig) {
        let mut state = self.state.lock().await;
        state.config = Some(config);
        if let Some(pool) = state.pool.take() {
            tracing::debug!("closing connection pool after config change");
            pool.close().await;
        }
    }

    pub async fn current_config(&self) -> Option<PostgresConfig> {
        self.state.lock().await.config.clone()
    }

    /// Binds `config` and eagerly builds a pool against it, replacing any
    /// previous pool. The new pool must answer a ping before it is adopted.
    pub async fn create_pool(&self, config: PostgresConfig) -> Result<(), sqlx::Error> {
        let mut state = self.state.lock().await;
        tracing::info!(
            host = %config.host,
            port = config.port,
            database = %config.database,
            "creating connection pool"
        );
        state.config = Some(config);
        if let Some(pool) = state.pool.take() {
            tracing::debug!("closing previous connection pool");
            pool.close().await;
        }
        ensure_pool(&mut state).await.map(|_| ())
    }

    /// Pings the current pool. Requires one to exist.
    pub async fn test_connection(&self) -> Result<(), sqlx::Error> {
        let state = self.state.lock().await;
        let Some(pool) = &state.pool else {
            return Err(sqlx::Error::Configuration(
                "no connection pool available - connect first".into(),
            ));
        };
        ping(pool).await
    }

    /// Whether a configuration with the mandatory fields is bound.
    pub async fn is_configured(&self) -> bool {
        configured(&self.state.lock().await)
    }

    /// Configured, pooled, and answering pings within a short window.
    pub async fn is_connected(&self) -> bool {
        let state = self.state.lock().await;
        if !configured(&state) {
            return false;
        }
        let Some(pool) = &state.pool else {
            return false;
        };
        match tokio::time::timeout(STATUS_PING_TIMEOUT, ping(pool)).await {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "connection status check failed");
                false
            }
            Err(_) => {
                tracing::warn!("connection status check timed out");
                false
            }
        }
    }

    /// Closes and clears the pool. The bound configuration survives.
    pub async fn disconnect(&self) {
        let mut state = self.state.lock().await;
        if let Some(pool) = state.pool.take() {
            tracing::info!("closing connection pool");
            pool.close().await;
        }
    }
}

impl Default for PostgresExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Executor for PostgresExecutor {
    async fn execute(
        &self,
        code: &str,
        _input: &str,
        timeout: Duration,
    ) -> Result<ExecutionResult, ExecError> {
        let Ok(mut state) = self.state.try_lock() else {
            return Err(ExecError::Busy(Language::Postgres));
        };
        let started = Instant::now();
        let mut result = ExecutionResult::new(Language::Postgres);

        if !configured(&state) {
            result.error = "PostgreSQL connection is not configured or unavailable".to_string();
            result.exit_code = exit_code::POSTGRES_NOT_AVAILABLE;
            result.stamp(started);
            return Ok(result);
        }

        let sql = clean_sql(code);
        if sql.is_empty() {
            result.error = "No SQL query provided".to_string();
            result.exit_code = exit_code::POSTGRES_QUERY_ERROR;
            result.stamp(started);
            return Ok(result);
        }

        let pool = match tokio::time::timeout(timeout, ensure_pool(&mut state)).await {
            Ok(Ok(pool)) => pool,
            Ok(Err(err)) => {
                result.error = format!("Failed to connect to PostgreSQL: {err}");
                result.exit_code = exit_code::POSTGRES_CONN_FAILED;
                result.stamp(started);
                return Ok(result);
            }
            Err(_) => {
                result.error = "Query execution timed out".to_string();
                result.exit_code = exit_code::TIMEOUT;
                result.stamp(started);
                return Ok(result);
            }
        };

        let remaining = timeout.saturating_sub(started.elapsed());
        match run_query(&pool, &sql, remaining).await {
            Ok(sql_result) => {
                result.output = render_output(&sql_result);
                result.sql_result = Some(sql_result);
            }
            Err(QueryError::TimedOut) => {
                result.error = "Query execution timed out".to_string();
                result.exit_code = exit_code::TIMEOUT;
            }
            Err(QueryError::Sql(err)) => {
                result.error = format!("SQL execution error: {err}");
                result.exit_code = exit_code::POSTGRES_QUERY_ERROR;
            }
        }

        result.stamp(started);
        Ok(result)
    }

    fn language(&self) -> Language {
        Language::Postgres
    }

    async fn is_available(&self) -> bool {
        self.is_configured().await
    }

    async fn cleanup(&self) {
        self.disconnect().await;
    }
}

fn configured(state: &PgState) -> bool {
    state
        .config
        .as_ref()
        .is_some_and(|c| !c.host.is_empty() && !c.database.is_empty() && !c.username.is_empty())
}

/// Returns a healthy pool, rebuilding it when the current one is missing or
/// fails its ping.
async fn ensure_pool(state: &mut PgState) -> Result<PgPool, sqlx::Error> {
    if let Some(pool) = &state.pool {
        if ping(pool).await.is_ok() {
            tracing::debug!("existing connection pool is healthy");
            return Ok(pool.clone());
        }
        tracing::warn!("existing connection pool failed its ping, rebuilding");
        if let Some(pool) = state.pool.take() {
            pool.close().await;
        }
    }

    let Some(config) = &state.config else {
        return Err(sqlx::Error::Configuration(
            "no PostgreSQL configuration provided".into(),
        ));
    };

    tracing::debug!(
        max_conns = POOL_MAX_CONNS,
        min_conns = POOL_MIN_CONNS,
        "building connection pool"
    );
    let pool = PgPoolOptions::new()
        .max_connections(POOL_MAX_CONNS)
        .min_connections(POOL_MIN_CONNS)
        .max_lifetime(POOL_MAX_LIFETIME)
        .idle_timeout(POOL_MAX_IDLE)
        .connect_with(connect_options(config))
        .await?;

    if let Err(err) = ping(&pool).await {
        tracing::warn!(error = %err, "new connection pool failed its ping");
        pool.close().await;
        return Err(err);
    }

    tracing::info!("connection pool created and pinged");
    state.pool = Some(pool.clone());
    Ok(pool)
}

fn connect_options(config: &PostgresConfig) -> PgConnectOptions {
    PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .database(&config.database)
        .username(&config.username)
        .password(&config.password)
        .ssl_mode(match config.ssl_mode {
            SslMode::Disable => PgSslMode::Disable,
            SslMode::Prefer => PgSslMode::Prefer,
            SslMode::Require => PgSslMode::Require,
        })
}

async fn ping(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await.map(|_| ())
}

enum QueryError {
    TimedOut,
    Sql(sqlx::Error),
}

async fn run_query(
    pool: &PgPool,
    sql: &str,
    deadline: Duration,
) -> Result<SqlQueryResult, QueryError> {
    let query_type = classify(sql);
    let query_start = Instant::now();

    let mut result = SqlQueryResult {
        query_type,
        columns: Vec::new(),
        rows: Vec::new(),
        rows_affected: 0,
        execution_time: Duration::ZERO,
    };

    if query_type.returns_rows() {
        let rows = match tokio::time::timeout(deadline, sqlx::query(sql).fetch_all(pool)).await {
            Ok(Ok(rows)) => rows,
            Ok(Err(err)) => return Err(QueryError::Sql(err)),
            Err(_) => return Err(QueryError::TimedOut),
        };
        if let Some(first) = rows.first() {
            result.columns = first
                .columns()
                .iter()
                .map(|column| column.name().to_string())
                .collect();
        }
        result.rows = rows.iter().map(convert_row).collect();
        result.rows_affected = result.rows.len() as i64;
    } else {
        let done = match tokio::time::timeout(deadline, sqlx::query(sql).execute(pool)).await {
            Ok(Ok(done)) => done,
            Ok(Err(err)) => return Err(QueryError::Sql(err)),
            Err(_) => return Err(QueryError::TimedOut),
        };
        result.rows_affected = done.rows_affected() as i64;
        result.columns = vec!["Rows Affected".to_string()];
        result.rows = vec![vec![Value::from(result.rows_affected)]];
    }

    result.execution_time = query_start.elapsed();
    Ok(result)
}

/// Strips `--` comments and blank lines, keeping statement text only.
fn clean_sql(code: &str) -> String {
    let mut lines = Vec::new();
    for line in code.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("--") {
            continue;
        }
        let line = match line.find("--") {
            Some(idx) => line[..idx].trim(),
            None => line,
        };
        if !line.is_empty() {
            lines.push(line);
        }
    }
    lines.join("\n")
}

fn classify(sql: &str) -> QueryType {
    let upper = sql.trim_start().to_uppercase();
    if upper.starts_with("SELECT") {
        QueryType::Select
    } else if upper.starts_with("INSERT") {
        QueryType::Insert
    } else if upper.starts_with("UPDATE") {
        QueryType::Update
    } else if upper.starts_with("DELETE") {
        QueryType::Delete
    } else if upper.starts_with("CREATE") {
        QueryType::Create
    } else if upper.starts_with("DROP") {
        QueryType::Drop
    } else if upper.starts_with("ALTER") {
        QueryType::Alter
    } else if upper.starts_with("WITH") {
        QueryType::With
    } else {
        QueryType::Other
    }
}

fn convert_row(row: &PgRow) -> Vec<Value> {
    (0..row.columns().len())
        .map(|idx| convert_cell(row, idx))
        .collect()
}

/// Canonicalizes one cell into a JSON-serializable scalar.
///
/// SQL NULL maps to JSON null, identifiers and temporal values become
/// strings, arrays become a readable rendering, and anything sqlx cannot
/// decode degrades to null instead of failing the whole result set.
fn convert_cell(row: &PgRow, idx: usize) -> Value {
    let type_name = row.columns()[idx].type_info().name();
    match type_name {
        "UUID" => decode(row, idx, |v: uuid::Uuid| Value::String(v.to_string())),
        "BYTEA" => decode(row, idx, |v: Vec<u8>| {
            Value::String(String::from_utf8_lossy(&v).into_owned())
        }),
        "TIMESTAMPTZ" => decode(row, idx, |v: chrono::DateTime<chrono::Utc>| {
            Value::String(v.to_rfc3339())
        }),
        "TIMESTAMP" => decode(row, idx, |v: chrono::NaiveDateTime| {
            Value::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
        }),
        "DATE" => decode(row, idx, |v: chrono::NaiveDate| Value::String(v.to_string())),
        "TIME" => decode(row, idx, |v: chrono::NaiveTime| Value::String(v.to_string())),
        "BOOL" => decode(row, idx, Value::Bool),
        "INT2" => decode(row, idx, |v: i16| Value::from(v)),
        "INT4" => decode(row, idx, |v: i32| Value::from(v)),
        "INT8" => decode(row, idx, |v: i64| Value::from(v)),
        "FLOAT4" => decode(row, idx, |v: f32| Value::from(f64::from(v))),
        "FLOAT8" => decode(row, idx, |v: f64| Value::from(v)),
        "NUMERIC" => decode(row, idx, |v: rust_decimal::Decimal| {
            Value::String(v.to_string())
        }),
        "JSON" | "JSONB" => decode(row, idx, |v: Value| v),
        "RECORD" => Value::String("[nested result]".to_string()),
        name if name.ends_with("[]") => convert_array(row, idx),
        _ => decode(row, idx, Value::String),
    }
}

fn decode<'r, T>(row: &'r PgRow, idx: usize, wrap: impl FnOnce(T) -> Value) -> Value
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    match row.try_get::<Option<T>, _>(idx) {
        Ok(Some(value)) => wrap(value),
        Ok(None) => Value::Null,
        Err(_) => Value::Null,
    }
}

fn convert_array(row: &PgRow, idx: usize) -> Value {
    if let Ok(Some(v)) = row.try_get::<Option<Vec<String>>, _>(idx) {
        return Value::String(format!("{v:?}"));
    }
    if let Ok(Some(v)) = row.try_get::<Option<Vec<i64>>, _>(idx) {
        return Value::String(format!("{v:?}"));
    }
    if let Ok(Some(v)) = row.try_get::<Option<Vec<i32>>, _>(idx) {
        return Value::String(format!("{v:?}"));
    }
    if let Ok(Some(v)) = row.try_get::<Option<Vec<f64>>, _>(idx) {
        return Value::String(format!("{v:?}"));
    }
    if let Ok(Some(v)) = row.try_get::<Option<Vec<bool>>, _>(idx) {
        return Value::String(format!("{v:?}"));
    }
    Value::Null
}

/// Human-readable rendering of a query result. Advisory only; the
/// structured payload is the contract.
fn render_output(result: &SqlQueryResult) -> String {
    let mut out = String::new();
    out.push_str(&format!("Query Type: {}\n", result.query_type));
    out.push_str(&format!(
        "Execution Time: {}\n",
        format_duration(result.execution_time)
    ));

    if result.query_type.returns_rows() {
        out.push_str(&format!("Rows Returned: {}\n\n", result.rows.len()));
        if !result.rows.is_empty() && !result.columns.is_empty() {
            let header = result.columns.join(" | ");
            out.push_str(&header);
            out.push('\n');
            out.push_str(&"-".repeat(header.len()));
            out.push('\n');
            for row in &result.rows {
                let cells: Vec<String> = row.iter().map(render_cell).collect();
                out.push_str(&cells.join(" | "));
                out.push('\n');
            }
            if result.rows.len() > DISPLAY_ROW_CAP {
                out.push_str(&format!(
                    "... and {} more rows\n",
                    result.rows.len() - DISPLAY_ROW_CAP
                ));
            }
        }
    } else {
        out.push_str(&format!("Rows Affected: {}\n", result.rows_affected));
    }
    out
}

fn render_cell(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PostgresConfig {
        PostgresConfig {
            host: "localhost".to_string(),
            port: 5432,
            database: "app".to_string(),
            username: "app".to_string(),
            password: String::new(),
            ssl_mode: SslMode::Prefer,
        }
    }

    #[test]
    fn cleaning_strips_comments_and_blank_lines() {
        let sql = "-- leading comment\nSELECT 1, -- trailing\n\n  2  \n--tail\n";
        assert_eq!(clean_sql(sql), "SELECT 1,\n2");
    }

    #[test]
    fn cleaning_is_idempotent() {
        let sql = "SELECT a -- pick a\nFROM t -- the table";
        let once = clean_sql(sql);
        assert_eq!(clean_sql(&once), once);
    }

    #[test]
    fn comment_only_input_cleans_to_empty() {
        assert_eq!(clean_sql("-- nothing here\n   -- or here"), "");
    }

    #[test]
    fn classification_matches_the_leading_keyword() {
        assert_eq!(classify("select * from t"), QueryType::Select);
        assert_eq!(classify("  WITH x AS (SELECT 1) SELECT * FROM x"), QueryType::With);
        assert_eq!(classify("INSERT INTO t VALUES (1)"), QueryType::Insert);
        assert_eq!(classify("update t set a = 1"), QueryType::Update);
        assert_eq!(classify("DELETE FROM t"), QueryType::Delete);
        assert_eq!(classify("create table t (a int)"), QueryType::Create);
        assert_eq!(classify("DROP TABLE t"), QueryType::Drop);
        assert_eq!(classify("alter table t add b int"), QueryType::Alter);
        assert_eq!(classify("EXPLAIN SELECT 1"), QueryType::Other);
    }

    #[test]
    fn rendering_prints_nulls_and_headers() {
        let result = SqlQueryResult {
            query_type: QueryType::Select,
            columns: vec!["id".to_string(), "name".to_string()],
            rows: vec![
                vec![Value::from(1), Value::String("ada".to_string())],
                vec![Value::from(2), Value::Null],
            ],
            rows_affected: 2,
            execution_time: Duration::from_millis(3),
        };
        let text = render_output(&result);
        assert!(text.contains("Query Type: SELECT\n"));
        assert!(text.contains("Rows Returned: 2\n"));
        assert!(text.contains("id | name\n"));
        assert!(text.contains("1 | ada\n"));
        assert!(text.contains("2 | NULL\n"));
    }

    #[test]
    fn rendering_command_results_reports_rows_affected() {
        let result = SqlQueryResult {
            query_type: QueryType::Update,
            columns: vec!["Rows Affected".to_string()],
            rows: vec![vec![Value::from(7)]],
            rows_affected: 7,
            execution_time: Duration::from_micros(42),
        };
        let text = render_output(&result);
        assert!(text.contains("Rows Affected: 7\n"));
        assert!(!text.contains("Rows Returned"));
    }

    #[test]
    fn rendering_notes_the_overflow_past_the_display_cap() {
        let rows: Vec<Vec<Value>> = (0..150).map(|i| vec![Value::from(i)]).collect();
        let result = SqlQueryResult {
            query_type: QueryType::Select,
            columns: vec!["n".to_string()],
            rows,
            rows_affected: 150,
            execution_time: Duration::ZERO,
        };
        let text = render_output(&result);
        assert!(text.contains("... and 50 more rows\n"));
    }

    #[tokio::test]
    async fn unconfigured_executor_reports_unavailable() {
        let executor = PostgresExecutor::new();
        assert!(!executor.is_available().await);
        let result = executor
            .execute("SELECT 1", "", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(result.exit_code, exit_code::POSTGRES_NOT_AVAILABLE);
        assert!(result.sql_result.is_none());
    }

    #[tokio::test]
    async fn comment_only_query_is_rejected_before_any_connection() {
        // Configured but never connected: reaching the server would fail,
        // so a 153 here proves the preflight rejection short-circuits.
        let executor = PostgresExecutor::new();
        executor.set_config(config()).await;
        let result = executor
            .execute("-- just a comment", "", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(result.exit_code, exit_code::POSTGRES_QUERY_ERROR);
        assert_eq!(result.error, "No SQL query provided");
    }

    #[tokio::test]
    async fn set_config_requires_mandatory_fields() {
        let executor = PostgresExecutor::new();
        let mut partial = config();
        partial.host = String::new();
        executor.set_config(partial).await;
        assert!(!executor.is_available().await);
        assert!(!executor.is_connected().await);
    }

    #[tokio::test]
    async fn test_connection_without_a_pool_is_an_error() {
        let executor = PostgresExecutor::new();
        executor.set_config(config()).await;
        assert!(executor.test_connection().await.is_err());
    }
}
