//! sleuth: debug a Python script with a model at your side.
//!
//! Logging: set `SLEUTH_LOG=sleuth_session=debug` (or `info`, `warn`) to see
//! session logs on stderr, or pass `--log-file`.

mod cli;
mod logging;
mod terminal;

use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Parser;
use sleuth_agents::OpenAiProvider;
use sleuth_config::{AppConfig, ConfigLoader};
use sleuth_session::{RunOptions, run_debugger};
use tracing::warn;

use crate::cli::Cli;
use crate::terminal::StdinOperator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_file.as_deref(), cli.log_json)?;

    let Some(script) = cli.script.clone() else {
        bail!("no script given. Usage: sleuth SCRIPT [ARGS]...");
    };
    if !script.is_file() {
        bail!("script not found: {}", script.display());
    }

    let loader = match &cli.config {
        Some(path) => ConfigLoader::with_path(path),
        None => ConfigLoader::new(),
    };
    let mut config = loader.load().context("failed to load configuration")?;
    apply_cli_overrides(&mut config, &cli);

    let api_key = config.llm.api_key.clone().unwrap_or_else(|| {
        warn!("no API key configured (SLEUTH_API_KEY or OPENAI_API_KEY); model requests will fail");
        String::new()
    });
    let provider = Arc::new(OpenAiProvider::new(
        api_key,
        Some(config.llm.base_url.clone()),
    ));

    let options = RunOptions {
        script,
        args: cli.args.clone(),
        breakpoints: cli.breakpoints.clone(),
        inject_breaks: cli.inject_breaks.clone(),
        focus_files: cli.focus_files.clone(),
        focus_functions: cli.focus_functions.clone(),
        restore: cli.restore.clone(),
        pre_run: cli.pre_run,
    };

    let mut operator = StdinOperator::new();
    run_debugger(&config, &options, provider, &mut operator)
        .await
        .context("debug session failed")?;
    Ok(())
}

/// Command-line flags win over the config file and environment.
fn apply_cli_overrides(config: &mut AppConfig, cli: &Cli) {
    if cli.break_on_entry {
        config.debugger.break_on_entry = true;
    }
    if cli.no_break_on_exception {
        config.debugger.break_on_exception = false;
    }
    if cli.trace_memory {
        config.debugger.trace_memory = true;
    }
    if let Some(model) = &cli.model {
        config.llm.model = model.clone();
    }
    if let Some(dir) = &cli.state_dir {
        config.state.dir = dir.clone();
    }
    if cli.perf {
        config.perf_mode = true;
    }
}
