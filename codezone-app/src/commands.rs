//! Stable command surface.
//!
//! One function per named operation the UI shell invokes. The names and
//! payload shapes are the contract; every UI (desktop shell, CLI) goes
//! through these.

use anyhow::{Context, Result};

use codezone_executor::{spawn, ExecutionConfig, ExecutionResult, Language, PostgresConfig};

use crate::App;

/// Executes a snippet with the persistent execution manager.
pub async fn execute(app: &App, config: ExecutionConfig) -> Result<ExecutionResult> {
    app.manager().execute(config).await.map_err(Into::into)
}

/// Registered language tags.
pub async fn get_supported_languages(app: &App) -> Vec<Language> {
    app.manager().supported_languages().await
}

/// Recreates the executor for `language`, clearing its transient state.
pub async fn refresh_executor(app: &App, language: Language) -> Result<()> {
    app.manager().refresh(language).await.map_err(Into::into)
}

/// Builds a PostgreSQL pool for `config` and verifies it with a ping.
/// Returns `true` once the connection is usable.
pub async fn handle_connection(app: &App, config: PostgresConfig) -> Result<bool> {
    tracing::info!(
        host = %config.host,
        port = config.port,
        database = %config.database,
        username = %config.username,
        "attempting PostgreSQL connection"
    );

    let postgres = app.manager().postgres().await;
    postgres
        .create_pool(config)
        .await
        .context("failed to create connection pool")?;
    postgres
        .test_connection()
        .await
        .context("connection test failed")?;

    tracing::info!("PostgreSQL connection established");
    Ok(true)
}

/// Binds a PostgreSQL configuration without opening a pool.
pub async fn set_postgresql_config(app: &App, config: PostgresConfig) -> Result<()> {
    app.manager().postgres().await.set_config(config).await;
    Ok(())
}

/// Whether the bound PostgreSQL server currently answers pings.
pub async fn get_postgresql_connection_status(app: &App) -> bool {
    app.manager().postgres().await.is_connected().await
}

/// Closes the PostgreSQL pool.
pub async fn disconnect_postgresql(app: &App) -> Result<()> {
    tracing::info!("disconnecting from PostgreSQL");
    app.manager().postgres().await.disconnect().await;
    Ok(())
}

/// Short human-readable Go toolchain version, e.g. `go v1.22.4`.
pub async fn get_go_version() -> String {
    match spawn::output("go", &["version"]).await {
        Ok(out) if out.status.success() => {
            parse_go_version(String::from_utf8_lossy(&out.stdout).trim())
        }
        _ => "Error getting Go version".to_string(),
    }
}

// Expected format: "go version go1.22.4 linux/amd64".
fn parse_go_version(version: &str) -> String {
    match version.split_whitespace().nth(2) {
        Some(tag) => format!("go v{}", tag.trim_start_matches("go")),
        None => "Unknown Go version".to_string(),
    }
}
