#![warn(missing_docs)]

//! Rhai scripting for the `tagscript` harness.
//!
//! Scripts open sessions, send messages and assert on replies through the
//! functions registered by [`HarnessApi`]; [`RhaiScriptExecutor`] runs them
//! under [`ScriptConfig`] limits and reports a serializable
//! [`ScriptEvalOutcome`].
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use tagscript::{Harness, HarnessConfig};
//! use tagscript_rhai::{HarnessApi, RhaiScriptExecutor, ScriptConfig};
//!
//! let harness = Arc::new(Harness::start(HarnessConfig::default()).unwrap());
//! let executor = RhaiScriptExecutor::new(
//!     Arc::new(HarnessApi::new(harness.clone())),
//!     ScriptConfig::default(),
//! );
//! let outcome = executor.execute(
//!     r#"
//!         let s = open("tcp://localhost:5001", "FIX.4.2", [[49, "CLIENT"], [56, "SERVER"]]);
//!         s.send("A", [[98, 0], [108, 30]]);
//!         s.expect([[35, "A"]]);
//!     "#,
//!     None,
//! );
//! harness.shutdown();
//! assert!(outcome.is_success());
//! ```

mod bridge;
mod config;
mod engine;
mod error;
mod executor;
pub mod marshal;

pub use bridge::{HarnessApi, ScriptSession};
pub use config::ScriptConfig;
pub use error::{Fault, FaultKind, ScriptError, ScriptErrorInfo, ScriptEvalOutcome, format_error};
pub use executor::{RhaiScriptExecutor, ScriptApi};
pub use marshal::ScriptMessage;
