//! `tagscript` - run a Rhai protocol test script against a live counterparty.
//!
//! Usage:
//!   tagscript logon.rhai --arg port=5001
//!   tagscript logon.rhai --json --log-level debug

use std::{path::PathBuf, process::ExitCode, sync::Arc, time::Duration};

use clap::Parser;
use serde_json::{Map, Value};
use tagscript::{Harness, HarnessConfig};
use tagscript_rhai::{HarnessApi, RhaiScriptExecutor, ScriptConfig, ScriptEvalOutcome};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser, Debug)]
#[command(name = "tagscript")]
#[command(version, about = "Scripted tag/value protocol test harness", long_about = None)]
struct Cli {
    /// Script to run
    script: PathBuf,

    /// Script argument, visible to the script as `args.KEY`
    #[arg(long = "arg", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    args: Vec<(String, String)>,

    /// Wall-clock limit for the whole script, in seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Limit for establishing each connection, in seconds
    #[arg(long, value_name = "SECS", default_value_t = 10)]
    connect_timeout: u64,

    /// Log filter (trace, debug, info, warn, error, or an EnvFilter directive)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Print the outcome as JSON on stdout
    #[arg(long)]
    json: bool,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))?;
    if key.is_empty() {
        return Err(format!("empty key in '{s}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let harness_config = HarnessConfig {
        connect_timeout: Duration::from_secs(cli.connect_timeout),
        ..HarnessConfig::default()
    };
    let harness = match Harness::start(harness_config) {
        Ok(harness) => Arc::new(harness),
        Err(e) => {
            error!("failed to start harness: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut config = ScriptConfig::default();
    if let Some(secs) = cli.timeout {
        config = config.with_timeout(Duration::from_secs(secs));
    }
    let executor = RhaiScriptExecutor::new(Arc::new(HarnessApi::new(harness.clone())), config);

    let args: Map<String, Value> = cli
        .args
        .into_iter()
        .map(|(k, v)| (k, Value::String(v)))
        .collect();
    let outcome = executor.execute_file(&cli.script, Some(Value::Object(args)));

    harness.shutdown();
    report(&outcome, cli.json);

    if outcome.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn report(outcome: &ScriptEvalOutcome, json: bool) {
    if json {
        println!("{}", outcome.to_json());
    }
    match &outcome.error {
        None => info!("script completed"),
        Some(err) => error!(
            error_type = %err.error_type,
            location = err.location.as_deref().unwrap_or("<unknown>"),
            "script failed: {}",
            err.message
        ),
    }
}
