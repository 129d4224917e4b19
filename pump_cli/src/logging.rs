//! Tracing subscriber setup for the CLI.
//!
//! Console output goes to stderr (pretty or JSON lines). An optional file
//! layer writes JSON lines through a non-blocking `tracing-appender` writer
//! whose guard lives in [`FILE_GUARD`] for the rest of the process.

use std::path::Path;

use eyre::WrapErr;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::FILE_GUARD;

fn rotation(name: Option<&str>) -> eyre::Result<Rotation> {
    Ok(match name.unwrap_or("never") {
        "never" => Rotation::NEVER,
        "daily" => Rotation::DAILY,
        "hourly" => Rotation::HOURLY,
        other => eyre::bail!("logging.rotation must be never, daily or hourly, got {other:?}"),
    })
}

/// Install the global subscriber. `RUST_LOG` overrides `console_level`.
pub fn init(cfg: &pump_config::Logging, json: bool, console_level: &str) -> eyre::Result<()> {
    let console_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(console_level))
        .wrap_err_with(|| format!("invalid --log-level {console_level:?}"))?;
    let mut layers = Vec::new();
    layers.push(if json {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(console_filter)
            .boxed()
    } else {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .with_filter(console_filter)
            .boxed()
    });

    if let Some(path) = &cfg.file {
        let path = Path::new(path);
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let name = path
            .file_name()
            .ok_or_else(|| eyre::eyre!("logging.file {path:?} has no file name"))?;
        let appender = RollingFileAppender::new(rotation(cfg.rotation.as_deref())?, dir, name);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(guard);
        let level = cfg.level.as_deref().unwrap_or("info");
        let filter = EnvFilter::try_new(level)
            .wrap_err_with(|| format!("invalid logging.level {level:?}"))?;
        layers.push(
            fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(filter)
                .boxed(),
        );
    }
    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .wrap_err("install tracing subscriber")?;
    Ok(())
}
