use std::{fmt, sync::Arc};

use rhai::{Dynamic, EvalAltResult, ParseError, Position};
use serde::{Deserialize, Serialize};

/// Category of a fatal script condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// An expected tag was absent from the received message.
    MissingField,
    /// An expected tag carried a different value.
    ValueMismatch,
    /// No message arrived within the receive ceiling.
    ReceiveTimeout,
    /// The script called `fatal`.
    ScriptAbort,
    /// A field list passed from the script could not be marshaled.
    InvalidFields,
    /// Opening, sending on or otherwise driving a session failed.
    Session,
    /// A scalar argument was out of range.
    InvalidArgument,
}

impl FaultKind {
    /// Stable snake_case name, as used in JSON output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingField => "missing_field",
            Self::ValueMismatch => "value_mismatch",
            Self::ReceiveTimeout => "receive_timeout",
            Self::ScriptAbort => "script_abort",
            Self::InvalidFields => "invalid_fields",
            Self::Session => "session",
            Self::InvalidArgument => "invalid_argument",
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&tagscript::Error> for FaultKind {
    fn from(err: &tagscript::Error) -> Self {
        match err {
            tagscript::Error::MissingField { .. } => Self::MissingField,
            tagscript::Error::ValueMismatch { .. } => Self::ValueMismatch,
            tagscript::Error::ReceiveTimeout { .. } => Self::ReceiveTimeout,
            _ => Self::Session,
        }
    }
}

/// A fatal condition raised by a harness function.
///
/// Faults travel through the Rhai engine as termination values, so a script's
/// `try`/`catch` cannot swallow them; the run always ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct Fault {
    /// What went wrong.
    pub kind: FaultKind,
    /// The failing condition, in words.
    pub message: String,
    /// Script file the fault was raised from.
    pub file: Option<String>,
    /// Line the fault was raised from.
    pub line: Option<usize>,
}

impl Fault {
    /// Create a fault with no location.
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            file: None,
            line: None,
        }
    }

    /// Attach the script location the fault was raised from.
    pub fn at(mut self, file: Option<&str>, line: Option<usize>) -> Self {
        self.file = file.map(str::to_string);
        self.line = line;
        self
    }

    /// `file:line`, `line N`, or `None` when the location is unknown.
    pub fn location(&self) -> Option<String> {
        match (&self.file, self.line) {
            (Some(file), Some(line)) => Some(format!("{file}:{line}")),
            (Some(file), None) => Some(file.clone()),
            (None, Some(line)) => Some(format!("line {line}")),
            (None, None) => None,
        }
    }

    /// Wrap the fault as an uncatchable engine error.
    pub fn into_eval_error(self, pos: Position) -> Box<EvalAltResult> {
        EvalAltResult::ErrorTerminated(Dynamic::from(self), pos).into()
    }
}

impl From<&tagscript::Error> for Fault {
    fn from(err: &tagscript::Error) -> Self {
        Self::new(FaultKind::from(err), err.to_string())
    }
}

/// Serializable error details for script evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptErrorInfo {
    /// Short error category.
    pub error_type: String,
    /// Human-readable error message.
    pub message: String,
    /// Location in the script, when available.
    pub location: Option<String>,
    /// Captured backtrace frames, when available.
    pub backtrace: Option<Vec<String>>,
    /// Structured error details.
    pub details: Option<serde_json::Value>,
}

/// Serializable outcome of a script evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptEvalOutcome {
    /// JSON value returned by the script.
    pub value: Option<serde_json::Value>,
    /// Collected log lines from `print`.
    pub logs: Vec<String>,
    /// Error details when evaluation failed.
    pub error: Option<ScriptErrorInfo>,
}

impl ScriptEvalOutcome {
    /// Whether the script ran to completion.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// The outcome as a single JSON document.
    pub fn to_json(&self) -> String {
        match serde_json::to_string(self) {
            Ok(json) => json,
            Err(err) => {
                let fallback = serde_json::json!({
                    "value": null,
                    "logs": [],
                    "error": {
                        "error_type": "runtime",
                        "message": format!("Failed to serialize output: {err}"),
                    },
                });
                fallback.to_string()
            }
        }
    }

    pub(crate) fn failed(logs: Vec<String>, err: &ScriptError, source: Option<&str>) -> Self {
        Self {
            value: None,
            logs,
            error: Some(format_error(err, source)),
        }
    }
}

/// Errors that can occur during script evaluation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ScriptError {
    /// The script exceeded the configured timeout.
    #[error("Script timed out after {ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds.
        ms: u64,
    },
    /// The script failed to parse.
    #[error("Parse error: {0}")]
    Parse(ParseError),
    /// The script failed at runtime.
    #[error("Runtime error: {0}")]
    Runtime(Arc<EvalAltResult>),
    /// A harness function raised a fatal condition.
    #[error("{0}")]
    Fault(Fault),
    /// The script could not be loaded or set up.
    #[error("{0}")]
    Custom(String),
}

/// Convert a script error to a structured, serializable form.
///
/// `source` names the script file; parse and runtime locations are reported
/// as `file:line` when it is given. Faults carry their own location.
pub fn format_error(err: &ScriptError, source: Option<&str>) -> ScriptErrorInfo {
    match err {
        ScriptError::Timeout { ms } => ScriptErrorInfo {
            error_type: "timeout".to_string(),
            message: format!("Script timed out after {ms}ms"),
            location: None,
            backtrace: None,
            details: None,
        },
        ScriptError::Parse(err) => ScriptErrorInfo {
            error_type: "parse".to_string(),
            message: err.to_string(),
            location: format_location(err.position(), source),
            backtrace: None,
            details: None,
        },
        ScriptError::Runtime(err) => ScriptErrorInfo {
            error_type: "runtime".to_string(),
            message: err.to_string(),
            location: format_location(err.position(), source),
            backtrace: collect_backtrace(err),
            details: None,
        },
        ScriptError::Fault(fault) => ScriptErrorInfo {
            error_type: fault.kind.as_str().to_string(),
            message: fault.message.clone(),
            location: fault.location(),
            backtrace: None,
            details: serde_json::to_value(fault).ok(),
        },
        ScriptError::Custom(msg) => ScriptErrorInfo {
            error_type: "custom".to_string(),
            message: msg.clone(),
            location: None,
            backtrace: None,
            details: None,
        },
    }
}

pub(crate) fn format_location(pos: Position, file: Option<&str>) -> Option<String> {
    let line = pos.line()?;
    Some(match file {
        Some(file) => format!("{file}:{line}"),
        None => format!("line {line}"),
    })
}

fn collect_backtrace(error: &EvalAltResult) -> Option<Vec<String>> {
    let mut frames = Vec::new();
    let mut current = error;
    loop {
        match current {
            EvalAltResult::ErrorInFunctionCall(name, src, inner, pos) => {
                frames.push(frame(name, src, *pos));
                current = &**inner;
            }
            EvalAltResult::ErrorInModule(name, inner, pos) => {
                frames.push(frame(name, "", *pos));
                current = &**inner;
            }
            other => {
                if let Some(line) = other.position().line() {
                    frames.push(format!("at <main> (line {line})"));
                }
                break;
            }
        }
    }
    if frames.is_empty() { None } else { Some(frames) }
}

fn frame(name: &str, src: &str, pos: Position) -> String {
    match (src.is_empty(), pos.line()) {
        (true, Some(line)) => format!("at {name} (line {line})"),
        (false, Some(line)) => format!("at {name} ({src}:{line})"),
        (_, None) => format!("at {name}"),
    }
}
