use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};

use codezone_app::{commands, App};
use codezone_executor::{ExecutionConfig, Language, PostgresConfig, SslMode};

#[derive(Parser)]
#[command(name = "codezone")]
#[command(about = "Run TypeScript/JavaScript, Go, or PostgreSQL snippets")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a snippet and print the result
    Run {
        /// Source code; omit to read from --file
        code: Option<String>,

        /// Read the snippet from a file instead
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Language tag (typescript, javascript, go, postgres)
        #[arg(short, long, default_value = "typescript")]
        language: Language,

        /// Deadline in milliseconds; 0 uses the executor default
        #[arg(short, long, default_value_t = 0)]
        timeout_ms: u64,

        /// Stdin text for Go programs
        #[arg(long)]
        stdin: Option<String>,

        /// Emit the full result as JSON instead of plain text
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        postgres: PostgresArgs,
    },
    /// List the registered language tags
    Languages,
    /// Print the host Go toolchain version
    GoVersion,
    /// Connect to PostgreSQL and verify the connection
    PgTest {
        #[command(flatten)]
        postgres: PostgresArgs,
    },
}

#[derive(Args)]
struct PostgresArgs {
    /// PostgreSQL host
    #[arg(long)]
    pg_host: Option<String>,

    /// PostgreSQL port
    #[arg(long, default_value_t = 5432)]
    pg_port: u16,

    /// Database name
    #[arg(long)]
    pg_database: Option<String>,

    /// User name
    #[arg(long)]
    pg_user: Option<String>,

    /// Password
    #[arg(long, default_value = "")]
    pg_password: String,

    /// TLS mode: disable, prefer, require
    #[arg(long, default_value = "prefer")]
    pg_ssl_mode: String,
}

impl PostgresArgs {
    fn into_config(self) -> Result<Option<PostgresConfig>> {
        let Some(host) = self.pg_host else {
            return Ok(None);
        };
        let ssl_mode = match self.pg_ssl_mode.as_str() {
            "" | "prefer" => SslMode::Prefer,
            "disable" => SslMode::Disable,
            "require" => SslMode::Require,
            other => bail!("unknown ssl mode: {other}"),
        };
        Ok(Some(PostgresConfig {
            host,
            port: self.pg_port,
            database: self
                .pg_database
                .context("--pg-database is required with --pg-host")?,
            username: self
                .pg_user
                .context("--pg-user is required with --pg-host")?,
            password: self.pg_password,
            ssl_mode,
        }))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let app = App::new();

    match cli.command {
        Commands::Run {
            code,
            file,
            language,
            timeout_ms,
            stdin,
            json,
            postgres,
        } => {
            let code = match (code, file) {
                (Some(code), None) => code,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?,
                (Some(_), Some(_)) => bail!("pass either a snippet or --file, not both"),
                (None, None) => bail!("pass a snippet or --file"),
            };

            let mut config = ExecutionConfig::new(code, language)
                .with_timeout(Duration::from_millis(timeout_ms));
            if let Some(stdin) = stdin {
                config = config.with_input(stdin);
            }
            if let Some(conn) = postgres.into_config()? {
                config = config.with_postgresql_conn(conn);
            }

            let result = commands::execute(&app, config).await?;
            app.shutdown().await;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                if !result.output.is_empty() {
                    println!("{}", result.output);
                }
                if !result.error.is_empty() {
                    eprintln!("{}", result.error);
                }
                eprintln!("({})", result.duration_string);
            }
            std::process::exit(result.exit_code);
        }
        Commands::Languages => {
            for language in commands::get_supported_languages(&app).await {
                println!("{language}");
            }
        }
        Commands::GoVersion => {
            println!("{}", commands::get_go_version().await);
        }
        Commands::PgTest { postgres } => {
            let config = postgres
                .into_config()?
                .context("--pg-host is required")?;
            let connected = commands::handle_connection(&app, config).await?;
            println!("connected: {connected}");
            app.shutdown().await;
        }
    }

    Ok(())
}
