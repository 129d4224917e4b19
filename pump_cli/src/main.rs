#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! `podctl`: drive the pump manager against a simulated pod.
//!
//! Each invocation restores the engine and the simulated pod from the state
//! file, runs one command and writes both back. Dose records go to the JSON
//! ledger.

mod atomic;
mod cli;
mod commands;
mod error_fmt;
mod ledger;
mod logging;
mod session;

use clap::Parser;
use eyre::WrapErr;
use std::fs;

use crate::cli::{Cli, JSON_MODE};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};

fn load_config(path: &std::path::Path) -> eyre::Result<pump_config::Config> {
    let text = fs::read_to_string(path).wrap_err_with(|| format!("read config {path:?}"))?;
    let cfg = pump_config::load_toml(&text)
        .map_err(|e| eyre::eyre!("parse config {:?}: {}", path, e))?;
    cfg.validate().wrap_err("invalid config")?;
    Ok(cfg)
}

fn run(cli: &Cli) -> eyre::Result<()> {
    let cfg = load_config(&cli.config)?;
    logging::init(&cfg.logging, cli.json, &cli.log_level)?;
    tracing::debug!(config = ?cli.config, cmd = ?cli.cmd, "starting");
    commands::run(&cfg, &cli.cmd, cli.json, cli.fail_next.map(Into::into))
}

fn main() {
    if let Err(e) = color_eyre::install() {
        eprintln!("warning: could not install error report hooks: {e}");
    }
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);

    if let Err(err) = run(&cli) {
        tracing::error!(error = %err, "command failed");
        if JSON_MODE.get().copied().unwrap_or(false) {
            eprintln!("{}", format_error_json(&err));
        } else {
            eprintln!("{}", humanize(&err));
        }
        std::process::exit(exit_code_for_error(&err));
    }
}
