//! Go execution through the host toolchain.
//!
//! Loose snippets are wrapped into a compilable program, written into a
//! scratch workspace, and run with `go run`. The workspace never survives
//! the call.

use async_trait::async_trait;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::error::ExecError;
use crate::manager::Executor;
use crate::spawn;
use crate::types::{exit_code, ExecutionResult, Language};

const GO_INSTALL_HINT: &str = "Go is not installed. Please install Go from \
     https://golang.org/dl/ or install it using your system's package manager";

pub struct GoExecutor {
    gate: Mutex<()>,
}

impl GoExecutor {
    pub fn new() -> Self {
        Self {
            gate: Mutex::new(()),
        }
    }
}

impl Default for GoExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Executor for GoExecutor {
    async fn execute(
        &self,
        code: &str,
        input: &str,
        timeout: Duration,
    ) -> Result<ExecutionResult, ExecError> {
        let Ok(_guard) = self.gate.try_lock() else {
            return Err(ExecError::Busy(Language::Go));
        };
        let started = Instant::now();
        let mut result = ExecutionResult::new(Language::Go);

        if !toolchain_available().await {
            result.error = GO_INSTALL_HINT.to_string();
            result.exit_code = exit_code::GO_NOT_INSTALLED;
            result.stamp(started);
            return Ok(result);
        }

        let workspace = match tempfile::Builder::new().prefix("codezone-go-").tempdir() {
            Ok(dir) => dir,
            Err(err) => {
                result.error = format!("Failed to create temp directory: {err}");
                result.exit_code = exit_code::FAILURE;
                result.stamp(started);
                return Ok(result);
            }
        };

        let program = prepare_program(code);
        if let Err(err) = tokio::fs::write(workspace.path().join("main.go"), program).await {
            result.error = format!("Failed to write temp file: {err}");
            result.exit_code = exit_code::FAILURE;
            result.stamp(started);
            return Ok(result);
        }

        let mut cmd = spawn::command("go");
        cmd.args(["run", "main.go"]);

        match spawn::run(cmd, Some(workspace.path()), input, timeout).await {
            Ok(out) => {
                result.output = out.stdout.trim().to_string();
                if !out.success {
                    let stderr = out.stderr.trim();
                    result.error = if stderr.is_empty() {
                        format!("go run exited with status {}", out.exit_code)
                    } else {
                        clean_diagnostics(stderr, workspace.path())
                    };
                    result.exit_code = out.exit_code;
                }
            }
            Err(spawn::CommandError::TimedOut) => {
                result.error = "Execution timed out".to_string();
                result.exit_code = exit_code::TIMEOUT;
            }
            Err(spawn::CommandError::Io(err)) => {
                result.error = format!("Failed to launch go: {err}");
                result.exit_code = exit_code::FAILURE;
            }
        }

        // `workspace` drops here, removing the scratch directory on every path.
        result.stamp(started);
        Ok(result)
    }

    fn language(&self) -> Language {
        Language::Go
    }

    async fn is_available(&self) -> bool {
        toolchain_available().await
    }

    async fn cleanup(&self) {}
}

async fn toolchain_available() -> bool {
    spawn::output("go", &["version"])
        .await
        .map(|out| out.status.success())
        .unwrap_or(false)
}

/// Wraps user code into a compilable program when needed.
///
/// A snippet with a `package` declaration is used verbatim; one with only a
/// `func main(` gets a `package main` prefix; anything else becomes the body
/// of a generated `main` that imports `fmt`.
fn prepare_program(code: &str) -> String {
    if code.contains("package ") {
        return code.to_string();
    }
    if code.contains("func main(") {
        return format!("package main\n\n{code}");
    }
    format!(
        "package main\n\nimport \"fmt\"\n\nfunc main() {{\n{}\n}}",
        indent(code)
    )
}

fn indent(code: &str) -> String {
    code.lines()
        .map(|line| {
            if line.trim().is_empty() {
                line.to_string()
            } else {
                format!("\t{line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Rewrites scratch-workspace paths in toolchain output so diagnostics read
/// as if the snippet lived in a local `main.go`.
fn clean_diagnostics(stderr: &str, workspace: &Path) -> String {
    let file = workspace.join("main.go");
    let file = file.to_string_lossy();
    let dir = workspace.to_string_lossy();
    stderr
        .lines()
        .map(|line| {
            line.replace(file.as_ref(), "main.go")
                .replace(dir.as_ref(), "main.go")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ExecutorOptions;

    fn executor() -> GoExecutor {
        GoExecutor::new()
    }

    fn deadline() -> Duration {
        ExecutorOptions::default().timeout
    }

    #[test]
    fn snippet_with_package_is_used_verbatim() {
        let code = "package main\n\nfunc main() {}";
        assert_eq!(prepare_program(code), code);
        // Idempotent: preparing prepared code changes nothing.
        assert_eq!(prepare_program(&prepare_program(code)), code);
    }

    #[test]
    fn snippet_with_main_gets_only_a_package_prefix() {
        let code = "func main() {\n\tprintln(\"hi\")\n}";
        let program = prepare_program(code);
        assert_eq!(program, format!("package main\n\n{code}"));
        assert!(!program.contains("import \"fmt\""));
    }

    #[test]
    fn loose_snippet_is_wrapped_and_indented() {
        let program = prepare_program("fmt.Println(\"hi\")\n\nfmt.Println(\"bye\")");
        assert!(program.starts_with("package main\n\nimport \"fmt\"\n\nfunc main() {\n"));
        assert!(program.contains("\tfmt.Println(\"hi\")"));
        assert!(program.contains("\n\n\tfmt.Println(\"bye\")"));
        assert!(program.ends_with("}"));
    }

    #[test]
    fn diagnostics_lose_the_scratch_path() {
        let workspace = Path::new("/tmp/codezone-go-abc123");
        let stderr = "/tmp/codezone-go-abc123/main.go:3:2: undefined: foo";
        assert_eq!(
            clean_diagnostics(stderr, workspace),
            "main.go:3:2: undefined: foo"
        );
    }

    #[tokio::test]
    async fn runs_a_wrapped_snippet() {
        let executor = executor();
        if !executor.is_available().await {
            return;
        }
        let result = executor
            .execute("fmt.Println(\"Hello, World!\")", "", deadline())
            .await
            .unwrap();
        assert_eq!(result.exit_code, 0, "error: {}", result.error);
        assert_eq!(result.output, "Hello, World!");
        assert_eq!(result.language, Language::Go);
    }

    #[tokio::test]
    async fn feeds_stdin_to_the_program() {
        let executor = executor();
        if !executor.is_available().await {
            return;
        }
        let code = "var name string\nfmt.Scanln(&name)\nfmt.Println(\"hi\", name)";
        let result = executor.execute(code, "zone\n", deadline()).await.unwrap();
        assert_eq!(result.exit_code, 0, "error: {}", result.error);
        assert_eq!(result.output, "hi zone");
    }

    #[tokio::test]
    async fn compile_errors_surface_cleaned_stderr() {
        let executor = executor();
        if !executor.is_available().await {
            return;
        }
        let result = executor
            .execute("this is not go", "", deadline())
            .await
            .unwrap();
        assert_ne!(result.exit_code, 0);
        assert!(!result.error.is_empty());
        assert!(
            !result.error.contains("codezone-go-"),
            "scratch path leaked: {}",
            result.error
        );
    }

    #[tokio::test]
    async fn long_running_programs_hit_the_deadline() {
        let executor = executor();
        if !executor.is_available().await {
            return;
        }
        let code = "package main\n\nimport \"time\"\n\nfunc main() { time.Sleep(time.Minute) }";
        let result = executor
            .execute(code, "", Duration::from_secs(8))
            .await
            .unwrap();
        assert_eq!(result.exit_code, exit_code::TIMEOUT);
        assert_eq!(result.error, "Execution timed out");
    }
}
