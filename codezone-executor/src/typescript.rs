//! TypeScript/JavaScript execution.
//!
//! Source is always transpiled to plain ECMAScript first. When the host has
//! Node.js the transpiled script runs there; otherwise it runs inside an
//! embedded V8 isolate with a captured `console`.

use async_trait::async_trait;
use serde::Deserialize;
use std::io::Write;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OnceCell};

use crate::error::ExecError;
use crate::manager::Executor;
use crate::spawn;
use crate::types::{exit_code, ExecutionResult, ExecutorOptions, Language};

const NODE_UNAVAILABLE_HINT: &str = "The embedded JavaScript engine could not run this code and \
     Node.js was not found. Install Node.js from https://nodejs.org/ to run it with the system \
     runtime.";

/// Failure messages that point at the embedded engine choking on the script
/// rather than the script failing on its own terms.
const FALLBACK_PATTERNS: [&str; 4] = [
    "unexpected token",
    "syntaxerror",
    "referenceerror",
    "typeerror",
];

pub struct TypeScriptExecutor {
    options: ExecutorOptions,
    gate: Mutex<()>,
    node_available: OnceCell<bool>,
}

impl TypeScriptExecutor {
    pub fn new(options: ExecutorOptions) -> Self {
        Self {
            options,
            gate: Mutex::new(()),
            node_available: OnceCell::new(),
        }
    }

    /// Probes for Node.js once per executor instance; the startup value
    /// wins for the executor's lifetime. Test builds always sandbox.
    async fn node_available(&self) -> bool {
        *self
            .node_available
            .get_or_init(|| async {
                if forced_sandbox() {
                    return false;
                }
                match spawn::output("node", &["--version"]).await {
                    Ok(out) => out.status.success(),
                    Err(_) => false,
                }
            })
            .await
    }

    async fn execute_with_node(&self, code: &str, timeout: Duration) -> ExecutionResult {
        let mut result = ExecutionResult::new(Language::TypeScript);

        let scratch = match write_scratch_script(code) {
            Ok(file) => file,
            Err(err) => {
                result.error = format!("Failed to create temp file: {err}");
                result.exit_code = exit_code::FAILURE;
                return result;
            }
        };

        let mut cmd = spawn::command("node");
        cmd.arg(scratch.path());

        match spawn::run(cmd, None, "", timeout).await {
            Ok(out) => {
                let combined = format!("{}{}", out.stdout, out.stderr);
                if out.success {
                    result.output = combined;
                } else {
                    result.error = combined;
                    result.exit_code = exit_code::FAILURE;
                }
            }
            Err(spawn::CommandError::TimedOut) => {
                result.error = "Execution timed out".to_string();
                result.exit_code = exit_code::TIMEOUT;
            }
            Err(spawn::CommandError::Io(err)) => {
                result.error = format!("Failed to launch node: {err}");
                result.exit_code = exit_code::FAILURE;
            }
        }

        // `scratch` drops here, removing the temp file on every path.
        result
    }

    async fn execute_in_sandbox(&self, code: &str, timeout: Duration) -> ExecutionResult {
        let mut result = ExecutionResult::new(Language::TypeScript);

        let code = code.to_string();
        let heap_mb = self.options.memory_mb;
        let max_outputs = self.options.max_outputs;

        let (handle_tx, handle_rx) = tokio::sync::oneshot::channel();
        let mut worker =
            tokio::task::spawn_blocking(move || run_isolate(&code, heap_mb, max_outputs, handle_tx));

        let isolate = handle_rx.await.ok();

        let outcome = match tokio::time::timeout(timeout, &mut worker).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join_err)) => {
                result.error = format!("Sandbox worker panicked: {join_err}");
                result.exit_code = exit_code::FAILURE;
                return result;
            }
            Err(_) => {
                if let Some(handle) = isolate {
                    handle.terminate_execution();
                }
                // Wait the worker out so the isolate is disposed, not leaked.
                let _ = worker.await;
                result.error = "Execution timed out".to_string();
                result.exit_code = exit_code::TIMEOUT;
                return result;
            }
        };

        result.output = outcome.outputs.join("\n");
        if let Some(error) = outcome.error {
            result.error = error;
            result.exit_code = exit_code::FAILURE;
        }
        if !outcome.errors.is_empty() {
            let stream = outcome.errors.join("\n");
            if result.error.is_empty() {
                result.error = stream;
            } else {
                result.error = format!("{}\n{stream}", result.error);
            }
        }
        result
    }
}

#[async_trait]
impl Executor for TypeScriptExecutor {
    async fn execute(
        &self,
        code: &str,
        _input: &str,
        timeout: Duration,
    ) -> Result<ExecutionResult, ExecError> {
        let Ok(_guard) = self.gate.try_lock() else {
            return Err(ExecError::Busy(Language::TypeScript));
        };
        let started = Instant::now();

        let transpiled = match transpile(code) {
            Ok(js) => js,
            Err(message) => {
                let mut result = ExecutionResult::new(Language::TypeScript);
                result.error = format!("TypeScript transpile error:\n{message}");
                result.exit_code = exit_code::TRANSPILE_FAILED;
                result.stamp(started);
                return Ok(result);
            }
        };

        if self.node_available().await {
            let mut result = self.execute_with_node(&transpiled, timeout).await;
            result.stamp(started);
            return Ok(result);
        }

        let mut result = self.execute_in_sandbox(&transpiled, timeout).await;
        if result.exit_code == exit_code::FAILURE && is_engine_limitation(&result.error) {
            let mut fallback = ExecutionResult::new(Language::TypeScript);
            fallback.error = NODE_UNAVAILABLE_HINT.to_string();
            fallback.exit_code = exit_code::NODE_NOT_AVAILABLE;
            fallback.stamp(started);
            return Ok(fallback);
        }
        result.stamp(started);
        Ok(result)
    }

    fn language(&self) -> Language {
        Language::TypeScript
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn cleanup(&self) {}
}

fn forced_sandbox() -> bool {
    cfg!(test) || std::env::var("CODEZONE_TEST_MODE").is_ok_and(|v| v == "true")
}

fn is_engine_limitation(message: &str) -> bool {
    let lowered = message.to_lowercase();
    FALLBACK_PATTERNS
        .iter()
        .any(|pattern| lowered.contains(pattern))
}

/// Transpiles TypeScript (plain JavaScript is a subset) to latest-target
/// ECMAScript with no source map. Diagnostics come back one per line.
fn transpile(source: &str) -> Result<String, String> {
    let specifier = deno_ast::ModuleSpecifier::parse("file:///snippet.ts")
        .map_err(|err| err.to_string())?;

    let parsed = deno_ast::parse_module(deno_ast::ParseParams {
        specifier,
        text: source.into(),
        media_type: deno_ast::MediaType::TypeScript,
        capture_tokens: false,
        scope_analysis: false,
        maybe_syntax: None,
    })
    .map_err(|diagnostic| diagnostic.to_string())?;

    let emitted = parsed
        .transpile(
            &deno_ast::TranspileOptions::default(),
            &deno_ast::TranspileModuleOptions::default(),
            &deno_ast::EmitOptions {
                source_map: deno_ast::SourceMapOption::None,
                ..Default::default()
            },
        )
        .map_err(|err| err.to_string())?;

    Ok(emitted.into_source().text)
}

fn write_scratch_script(code: &str) -> std::io::Result<tempfile::NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("codezone-")
        .suffix(".js")
        .tempfile()?;
    file.write_all(code.as_bytes())?;
    Ok(file)
}

#[derive(Debug, Default, Deserialize)]
struct ConsoleCapture {
    out: Vec<String>,
    err: Vec<String>,
}

struct SandboxOutcome {
    outputs: Vec<String>,
    errors: Vec<String>,
    error: Option<String>,
}

const CAPTURE_SCRIPT: &str =
    "JSON.stringify({ out: globalThis.__codezone_out ?? [], err: globalThis.__codezone_err ?? [] })";

fn console_prelude(max_outputs: usize) -> String {
    format!(
        r#"(() => {{
  const out = [];
  const err = [];
  const render = (args) => args.map((a) => String(a)).join(" ");
  const push = (buf, args) => {{ if (buf.length < {max_outputs}) buf.push(render(args)); }};
  globalThis.__codezone_out = out;
  globalThis.__codezone_err = err;
  globalThis.console = {{
    log: (...args) => push(out, args),
    warn: (...args) => push(out, args),
    info: (...args) => push(out, args),
    error: (...args) => push(err, args),
  }};
}})();"#
    )
}

/// Runs `code` in a fresh isolate. Blocking; lives on the worker pool. The
/// isolate handle is sent back immediately so the async side can terminate
/// a runaway script.
fn run_isolate(
    code: &str,
    heap_mb: usize,
    max_outputs: usize,
    handle_tx: tokio::sync::oneshot::Sender<deno_core::v8::IsolateHandle>,
) -> SandboxOutcome {
    use deno_core::{JsRuntime, RuntimeOptions};

    let mut options = RuntimeOptions::default();
    if heap_mb > 0 {
        let max_bytes = heap_mb * 1024 * 1024;
        let initial_bytes = (max_bytes / 10).min(10 * 1024 * 1024);
        options.create_params =
            Some(deno_core::v8::CreateParams::default().heap_limits(initial_bytes, max_bytes));
    }

    let mut runtime = JsRuntime::new(options);
    let _ = handle_tx.send(runtime.v8_isolate().thread_safe_handle());

    let mut outcome = SandboxOutcome {
        outputs: Vec::new(),
        errors: Vec::new(),
        error: None,
    };

    if let Err(err) = runtime.execute_script("<console>", console_prelude(max_outputs)) {
        outcome.error = Some(format!("Failed to set up console: {err}"));
        return outcome;
    }

    let completion = runtime.execute_script("<user_code>", code.to_string());

    // Console buffers survive a failed script, so drain them either way.
    let capture = match runtime.execute_script("<capture>", CAPTURE_SCRIPT) {
        Ok(value) => {
            let scope = &mut runtime.handle_scope();
            let local = deno_core::v8::Local::new(scope, value);
            let json = local.to_rust_string_lossy(scope);
            serde_json::from_str::<ConsoleCapture>(&json).unwrap_or_default()
        }
        Err(_) => ConsoleCapture::default(),
    };
    outcome.outputs = capture.out;
    outcome.errors = capture.err;

    match completion {
        Ok(value) => {
            let scope = &mut runtime.handle_scope();
            let local = deno_core::v8::Local::new(scope, value);
            if !local.is_undefined() && !local.is_null() {
                outcome.outputs.push(local.to_rust_string_lossy(scope));
            }
        }
        Err(err) => outcome.error = Some(err.to_string()),
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor() -> TypeScriptExecutor {
        TypeScriptExecutor::new(ExecutorOptions::default())
    }

    fn deadline() -> Duration {
        Duration::from_secs(10)
    }

    #[tokio::test]
    async fn captures_console_log_output() {
        let result = executor()
            .execute(r#"console.log("Hello, World!");"#, "", deadline())
            .await
            .unwrap();
        assert_eq!(result.exit_code, 0, "error: {}", result.error);
        assert!(result.output.contains("Hello, World!"));
        assert_eq!(result.language, Language::TypeScript);
        assert!(!result.duration_string.is_empty());
    }

    #[tokio::test]
    async fn routes_console_error_to_the_error_stream() {
        let result = executor()
            .execute(r#"console.error("This is an error");"#, "", deadline())
            .await
            .unwrap();
        assert_eq!(result.exit_code, 0);
        assert!(result.error.contains("This is an error"));
        assert!(result.output.is_empty());
    }

    #[tokio::test]
    async fn treats_warn_and_info_as_output() {
        let result = executor()
            .execute(
                r#"console.warn("careful"); console.info("fyi");"#,
                "",
                deadline(),
            )
            .await
            .unwrap();
        assert_eq!(result.output, "careful\nfyi");
    }

    #[tokio::test]
    async fn joins_console_arguments_with_single_spaces() {
        let result = executor()
            .execute(r#"console.log("a", 1, true);"#, "", deadline())
            .await
            .unwrap();
        assert_eq!(result.output, "a 1 true");
    }

    #[tokio::test]
    async fn appends_a_meaningful_final_expression() {
        let result = executor().execute("2 + 2", "", deadline()).await.unwrap();
        assert_eq!(result.exit_code, 0, "error: {}", result.error);
        assert!(result.output.contains('4'));
    }

    #[tokio::test]
    async fn suppresses_undefined_and_null_completions() {
        let result = executor()
            .execute("let x = 1;", "", deadline())
            .await
            .unwrap();
        assert_eq!(result.output, "");

        let result = executor().execute("null", "", deadline()).await.unwrap();
        assert_eq!(result.output, "");
    }

    #[tokio::test]
    async fn transpile_failure_reports_exit_code_two() {
        let result = executor()
            .execute("const x = {;", "", deadline())
            .await
            .unwrap();
        assert_eq!(result.exit_code, exit_code::TRANSPILE_FAILED);
        assert!(result.error.starts_with("TypeScript transpile error:"));
    }

    #[tokio::test]
    async fn strips_type_annotations_before_evaluating() {
        let result = executor()
            .execute(
                r#"const greet = (name: string): string => `hi ${name}`; console.log(greet("zone"));"#,
                "",
                deadline(),
            )
            .await
            .unwrap();
        assert_eq!(result.exit_code, 0, "error: {}", result.error);
        assert!(result.output.contains("hi zone"));
    }

    #[tokio::test]
    async fn thrown_errors_keep_the_generic_failure_code() {
        // "Error: boom" matches none of the engine-limitation patterns.
        let result = executor()
            .execute(r#"throw new Error("boom");"#, "", deadline())
            .await
            .unwrap();
        assert_eq!(result.exit_code, exit_code::FAILURE);
        assert!(result.error.contains("boom"));
    }

    #[tokio::test]
    async fn engine_limitation_without_node_maps_to_runtime_unavailable() {
        // Test builds force the sandbox path, so the ReferenceError from an
        // undefined identifier must surface as the install-prompt code.
        let result = executor()
            .execute("definitelyNotDefined();", "", deadline())
            .await
            .unwrap();
        assert_eq!(result.exit_code, exit_code::NODE_NOT_AVAILABLE);
        assert!(result.error.contains("Node.js"));
    }

    #[tokio::test]
    async fn runaway_scripts_hit_the_deadline() {
        let result = executor()
            .execute("while (true) {}", "", Duration::from_millis(200))
            .await
            .unwrap();
        assert_eq!(result.exit_code, exit_code::TIMEOUT);
        assert_eq!(result.error, "Execution timed out");
    }

    #[tokio::test]
    async fn concurrent_requests_get_a_busy_signal() {
        let executor = std::sync::Arc::new(executor());
        let busy_holder = executor.clone();
        let long_run = tokio::spawn(async move {
            busy_holder
                .execute("while (true) {}", "", Duration::from_secs(2))
                .await
        });

        tokio::time::sleep(Duration::from_millis(300)).await;
        let second = executor.execute("1 + 1", "", deadline()).await;
        assert_eq!(second.unwrap_err(), ExecError::Busy(Language::TypeScript));

        let first = long_run.await.unwrap().unwrap();
        assert_eq!(first.exit_code, exit_code::TIMEOUT);
    }

    #[test]
    fn fallback_patterns_match_case_insensitively() {
        assert!(is_engine_limitation("Uncaught SyntaxError: Unexpected token"));
        assert!(is_engine_limitation("uncaught typeerror: x is not a function"));
        assert!(!is_engine_limitation("Error: boom"));
        assert!(!is_engine_limitation("Execution timed out"));
    }
}
