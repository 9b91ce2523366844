//! Logging setup.
//!
//! Logs always go to stderr so stdout carries only command output.
//!
//! Priority order (highest to lowest):
//! 1. `DAGPREP_LOG` / `DAGPREP_LOG_FORMAT` environment variables
//! 2. CLI flags (`-v`, `--log-format`)
//! 3. Defaults (`info`, text)

use anyhow::{Result, bail};
use clap::ValueEnum;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const LOG_ENV: &str = "DAGPREP_LOG";
const FORMAT_ENV: &str = "DAGPREP_LOG_FORMAT";

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Install the global subscriber.
pub fn init_logging(verbose: u8, format: LogFormat) -> Result<()> {
    let filter = build_env_filter(verbose);
    let format = determine_format(format)?;
    let base_subscriber = Registry::default().with(filter);

    match format {
        LogFormat::Json => base_subscriber
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_writer(std::io::stderr),
            )
            .try_init()?,
        LogFormat::Text => base_subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(atty::is(atty::Stream::Stderr))
                    .with_writer(std::io::stderr),
            )
            .try_init()?,
    }

    Ok(())
}

fn build_env_filter(verbose: u8) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_env(LOG_ENV) {
        return filter;
    }

    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    EnvFilter::new(level)
}

fn determine_format(flag: LogFormat) -> Result<LogFormat> {
    match std::env::var(FORMAT_ENV) {
        Ok(value) => match value.as_str() {
            "json" => Ok(LogFormat::Json),
            "text" => Ok(LogFormat::Text),
            other => bail!("Invalid {} '{}': expected 'json' or 'text'", FORMAT_ENV, other),
        },
        Err(_) => Ok(flag),
    }
}
