use std::{
    path::Path,
    sync::{Arc, Mutex},
    time::Instant,
};

use rhai::{Dynamic, Engine, EvalAltResult, Map, Position, Scope};
use serde_json::Value;
use tracing::{debug, info};

use crate::{
    config::ScriptConfig,
    engine::build_engine,
    error::{Fault, ScriptError, ScriptEvalOutcome},
};

/// API surface that a host exposes to Rhai scripts.
pub trait ScriptApi: Send + Sync + 'static {
    /// Register functions, types, and modules on the engine.
    fn register(&self, engine: &mut Engine);

    /// Callback invoked when the script prints.
    fn on_print(&self, _text: &str) {}
    /// Callback invoked when the script emits debug output.
    fn on_debug(&self, _text: &str, _source: Option<&str>, _pos: Position) {}
}

/// Executes Rhai scripts using a provided API and configuration.
///
/// Each run gets a fresh engine, so nothing leaks between scripts except what
/// the API itself holds (for the harness: open sessions and the ID sequence).
pub struct RhaiScriptExecutor<A> {
    api: Arc<A>,
    config: ScriptConfig,
}

impl<A: ScriptApi> RhaiScriptExecutor<A> {
    /// Create a new script executor with the provided API and configuration.
    pub fn new(api: Arc<A>, config: ScriptConfig) -> Self {
        Self { api, config }
    }

    /// The limits scripts run under.
    pub fn config(&self) -> &ScriptConfig {
        &self.config
    }

    /// Execute an anonymous script with optional JSON arguments.
    pub fn execute(&self, script: &str, args: Option<Value>) -> ScriptEvalOutcome {
        self.execute_named(None, script, args)
    }

    /// Load and execute a script file. Fault locations name `path`.
    pub fn execute_file(&self, path: &Path, args: Option<Value>) -> ScriptEvalOutcome {
        match std::fs::read_to_string(path) {
            Ok(script) => {
                let name = path.display().to_string();
                self.execute_named(Some(&name), &script, args)
            }
            Err(e) => ScriptEvalOutcome::failed(
                Vec::new(),
                &ScriptError::Custom(format!("Failed to read {}: {e}", path.display())),
                None,
            ),
        }
    }

    /// Execute a script, tagging its AST with `source` for error locations.
    ///
    /// The script sees `args` as an object map (empty when no arguments were
    /// given). Its final expression becomes the outcome's `value`.
    pub fn execute_named(
        &self,
        source: Option<&str>,
        script: &str,
        args: Option<Value>,
    ) -> ScriptEvalOutcome {
        let mut engine = build_engine(&self.config);
        self.api.register(&mut engine);

        let logs = Arc::new(Mutex::new(Vec::new()));
        let logs_c = logs.clone();
        let api_print = self.api.clone();
        engine.on_print(move |text| {
            if let Ok(mut l) = logs_c.lock() {
                l.push(text.to_string());
            }
            api_print.on_print(text);
        });

        let api_debug = self.api.clone();
        engine.on_debug(move |text, src, pos| api_debug.on_debug(text, src, pos));

        let mut scope = Scope::new();
        let args = match args {
            Some(a) => match rhai::serde::to_dynamic(a) {
                Ok(val) => val,
                Err(e) => {
                    return ScriptEvalOutcome::failed(
                        Vec::new(),
                        &ScriptError::Custom(format!("Failed to serialize args: {e}")),
                        source,
                    );
                }
            },
            None => Dynamic::from_map(Map::new()),
        };
        scope.push("args", args);

        let mut ast = match engine.compile_with_scope(&scope, script) {
            Ok(ast) => ast,
            Err(e) => return ScriptEvalOutcome::failed(Vec::new(), &ScriptError::Parse(e), source),
        };
        if let Some(source) = source {
            ast.set_source(source);
        }

        let start = Instant::now();
        let timeout = self.config.timeout;
        let timeout_ms = timeout.as_millis() as u64;
        engine.on_progress(move |_| {
            if start.elapsed() > timeout {
                Some(Dynamic::from(ScriptError::Timeout { ms: timeout_ms }))
            } else {
                None
            }
        });

        info!(script = source.unwrap_or("<inline>"), "running script");
        let result = engine.eval_ast_with_scope::<Dynamic>(&mut scope, &ast);
        let captured_logs = logs.lock().unwrap_or_else(|e| e.into_inner()).clone();

        match result {
            Ok(val) => {
                debug!(elapsed = ?start.elapsed(), "script finished");
                let json_val =
                    rhai::serde::from_dynamic(&val).unwrap_or_else(|_| Value::String(val.to_string()));
                ScriptEvalOutcome {
                    value: Some(json_val),
                    logs: captured_logs,
                    error: None,
                }
            }
            Err(e) => {
                let err = classify(e, source);
                if let ScriptError::Fault(fault) = &err {
                    debug!(
                        kind = %fault.kind,
                        location = fault.location().as_deref().unwrap_or("<unknown>"),
                        "script fault"
                    );
                }
                ScriptEvalOutcome::failed(captured_logs, &err, source)
            }
        }
    }
}

/// Recover harness faults and timeouts from an engine error.
///
/// Termination values raised inside script-defined functions arrive wrapped
/// in call frames; those are unwrapped to reach the value. Faults raised
/// without a file are attributed to `source`.
fn classify(err: Box<EvalAltResult>, source: Option<&str>) -> ScriptError {
    if let Some(token) = termination_value(&err) {
        if let Some(mut fault) = token.clone().try_cast::<Fault>() {
            if fault.file.is_none() {
                fault.file = source.map(str::to_string);
            }
            return ScriptError::Fault(fault);
        }
        if let Some(script_err) = token.clone().try_cast::<ScriptError>() {
            return script_err;
        }
    }
    ScriptError::Runtime(Arc::from(err))
}

fn termination_value(err: &EvalAltResult) -> Option<&Dynamic> {
    match err {
        EvalAltResult::ErrorTerminated(token, _) => Some(token),
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _)
        | EvalAltResult::ErrorInModule(_, inner, _) => termination_value(inner),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rhai::NativeCallContext;
    use serde_json::json;

    use super::*;
    use crate::{bridge::RhaiResultOf, error::FaultKind};

    struct Echo;

    impl ScriptApi for Echo {
        fn register(&self, engine: &mut Engine) {
            engine.register_fn("boom", |ctx: NativeCallContext| -> RhaiResultOf<()> {
                let pos = ctx.call_position();
                let fault = Fault::new(FaultKind::ScriptAbort, "boom").at(None, pos.line());
                Err(fault.into_eval_error(pos))
            });
        }
    }

    fn executor() -> RhaiScriptExecutor<Echo> {
        RhaiScriptExecutor::new(Arc::new(Echo), ScriptConfig::default())
    }

    #[test]
    fn returns_final_value_and_logs() {
        let outcome = executor().execute(r#"print("hi"); 1 + 2"#, None);
        assert!(outcome.is_success());
        assert_eq!(outcome.value, Some(json!(3)));
        assert_eq!(outcome.logs, ["hi"]);
    }

    #[test]
    fn args_are_visible_as_a_map() {
        let outcome = executor().execute("args.port", Some(json!({"port": "5001"})));
        assert_eq!(outcome.value, Some(json!("5001")));

        let outcome = executor().execute("args.len()", None);
        assert_eq!(outcome.value, Some(json!(0)));
    }

    #[test]
    fn parse_errors_are_reported() {
        let outcome = executor().execute("let = ;", None);
        assert_eq!(outcome.error.unwrap().error_type, "parse");
    }

    #[test]
    fn faults_escape_try_catch() {
        let script = "
            let caught = false;
            try {
                boom();
            } catch {
                caught = true;
            }
            caught
        ";
        let outcome = executor().execute_named(Some("abort.rhai"), script, None);
        let error = outcome.error.expect("fault");
        assert_eq!(error.error_type, "script_abort");
        assert_eq!(error.location.as_deref(), Some("abort.rhai:4"));
    }

    #[test]
    fn parse_and_runtime_errors_name_the_script_file() {
        let outcome = executor().execute_named(Some("bad.rhai"), "let x = 1;\nlet = ;", None);
        let error = outcome.error.unwrap();
        assert_eq!(error.error_type, "parse");
        assert_eq!(error.location.as_deref(), Some("bad.rhai:2"));

        let outcome = executor().execute_named(Some("bad.rhai"), "let x = 1;\nx.nope()", None);
        assert_eq!(outcome.error.unwrap().location.as_deref(), Some("bad.rhai:2"));
    }

    #[test]
    fn faults_inside_functions_are_unwrapped() {
        let script = "
            fn helper() { boom(); }
            helper();
        ";
        let outcome = executor().execute(script, None);
        assert_eq!(outcome.error.unwrap().error_type, "script_abort");
    }

    #[test]
    fn runtime_errors_keep_their_location() {
        let outcome = executor().execute("let x = 1;\nx.nope()", None);
        let error = outcome.error.unwrap();
        assert_eq!(error.error_type, "runtime");
        assert_eq!(error.location.as_deref(), Some("line 2"));
    }

    #[test]
    fn wall_clock_timeout_terminates_loops() {
        let config = ScriptConfig::default().with_timeout(Duration::from_millis(50));
        let executor = RhaiScriptExecutor::new(Arc::new(Echo), config);
        let outcome = executor.execute("loop {}", None);
        assert_eq!(outcome.error.unwrap().error_type, "timeout");
    }

    #[test]
    fn missing_files_fail_cleanly() {
        let outcome = executor().execute_file(Path::new("/nonexistent/script.rhai"), None);
        assert_eq!(outcome.error.unwrap().error_type, "custom");
    }
}
