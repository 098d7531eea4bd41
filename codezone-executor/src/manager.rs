//! Execution manager: routes requests to language executors.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::error::ExecError;
use crate::golang::GoExecutor;
use crate::postgres::PostgresExecutor;
use crate::typescript::TypeScriptExecutor;
use crate::types::{ExecutionConfig, ExecutionResult, ExecutorOptions, Language};

/// One language backend. Implementations serialize their own requests and
/// report execution failures inside the result, never through `Err`.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(
        &self,
        code: &str,
        input: &str,
        timeout: Duration,
    ) -> Result<ExecutionResult, ExecError>;

    fn language(&self) -> Language;

    async fn is_available(&self) -> bool;

    /// Releases long-lived resources. Must be safe to call repeatedly.
    async fn cleanup(&self);
}

const REGISTRATION_ORDER: [Language; 3] = [Language::TypeScript, Language::Go, Language::Postgres];

/// Owns the set of executors and dispatches requests to them.
///
/// The manager itself is thread-safe; distinct executors run concurrently,
/// while each executor rejects overlapping requests with a busy signal.
pub struct ExecutionManager {
    executors: RwLock<HashMap<Language, Arc<dyn Executor>>>,
    postgres: RwLock<Arc<PostgresExecutor>>,
    options: ExecutorOptions,
}

impl ExecutionManager {
    pub fn new(options: ExecutorOptions) -> Self {
        let postgres = Arc::new(PostgresExecutor::new());

        let mut executors: HashMap<Language, Arc<dyn Executor>> = HashMap::new();
        executors.insert(
            Language::TypeScript,
            Arc::new(TypeScriptExecutor::new(options)),
        );
        executors.insert(Language::Go, Arc::new(GoExecutor::new()));
        executors.insert(Language::Postgres, postgres.clone());

        Self {
            executors: RwLock::new(executors),
            postgres: RwLock::new(postgres),
            options,
        }
    }

    /// Routes one request. A supplied Postgres configuration is bound before
    /// the query runs; the request deadline is the smaller of the caller's
    /// timeout and the executor default.
    pub async fn execute(&self, config: ExecutionConfig) -> Result<ExecutionResult, ExecError> {
        let started = Instant::now();

        if config.code.trim().is_empty() {
            // Blank input never reaches a backend.
            let mut result = ExecutionResult::new(config.language);
            result.stamp(started);
            return Ok(result);
        }

        if config.language == Language::Postgres {
            if let Some(conn) = &config.postgresql_conn {
                self.postgres.read().await.set_config(conn.clone()).await;
            }
        }

        let executor = self
            .executor(config.language)
            .await
            .ok_or(ExecError::UnsupportedLanguage(config.language))?;

        let timeout = effective_timeout(config.timeout, self.options.timeout);
        tracing::debug!(
            language = %config.language,
            timeout_ms = timeout.as_millis() as u64,
            code_len = config.code.len(),
            "dispatching execution"
        );
        executor.execute(&config.code, &config.input, timeout).await
    }

    /// Registered language tags, in registration order.
    pub async fn supported_languages(&self) -> Vec<Language> {
        let executors = self.executors.read().await;
        REGISTRATION_ORDER
            .iter()
            .copied()
            .filter(|language| executors.contains_key(language))
            .collect()
    }

    pub async fn executor(&self, language: Language) -> Option<Arc<dyn Executor>> {
        self.executors.read().await.get(&language).cloned()
    }

    /// The typed Postgres executor, for connection management commands.
    pub async fn postgres(&self) -> Arc<PostgresExecutor> {
        self.postgres.read().await.clone()
    }

    /// Destroys and recreates the executor for `language`, clearing
    /// transient state. The Postgres configuration is durable and carries
    /// over; its pool does not.
    pub async fn refresh(&self, language: Language) -> Result<(), ExecError> {
        tracing::info!(language = %language, "refreshing executor");
        match language {
            Language::TypeScript => {
                let fresh: Arc<dyn Executor> = Arc::new(TypeScriptExecutor::new(self.options));
                self.replace(language, fresh).await;
            }
            Language::Go => {
                let fresh: Arc<dyn Executor> = Arc::new(GoExecutor::new());
                self.replace(language, fresh).await;
            }
            Language::Postgres => {
                let fresh = Arc::new(PostgresExecutor::new());
                let old = {
                    let mut typed = self.postgres.write().await;
                    std::mem::replace(&mut *typed, fresh.clone())
                };
                if let Some(config) = old.current_config().await {
                    fresh.set_config(config).await;
                }
                old.cleanup().await;
                self.executors
                    .write()
                    .await
                    .insert(Language::Postgres, fresh);
            }
        }
        Ok(())
    }

    async fn replace(&self, language: Language, fresh: Arc<dyn Executor>) {
        let old = self.executors.write().await.insert(language, fresh);
        if let Some(old) = old {
            old.cleanup().await;
        }
    }

    /// Cleans up every executor, newest registration first.
    pub async fn shutdown(&self) {
        let executors = self.executors.read().await.clone();
        for language in REGISTRATION_ORDER.iter().rev() {
            if let Some(executor) = executors.get(language) {
                tracing::debug!(language = %language, "cleaning up executor");
                executor.cleanup().await;
            }
        }
    }
}

fn effective_timeout(requested: Duration, default: Duration) -> Duration {
    if requested > Duration::ZERO {
        requested.min(default)
    } else {
        default
    }
}
