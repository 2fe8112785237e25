//! Logging arguments and subscriber setup.

use clap::{ArgAction, Parser, ValueEnum};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub(crate) enum LogFormat {
    /// Full format with timestamp, level, target and spans.
    #[default]
    Full,
    /// Minimal format with level and message.
    Compact,
    /// Structured JSON, one object per line.
    Json,
}

/// Logging configuration shared by every subcommand.
///
/// Verbosity maps to the log level:
/// - No flag: `WARN`
/// - `-v`: `INFO`
/// - `-vv`: `DEBUG`
/// - `-vvv` or more: `TRACE`
///
/// `RUST_LOG` overrides the level when set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Parser)]
pub(crate) struct LoggingArgs {
    /// Increase logging verbosity.
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub(crate) verbosity: u8,

    /// Log output format.
    #[arg(long = "log-format", value_enum, default_value = "full", global = true)]
    pub(crate) format: LogFormat,
}

impl LoggingArgs {
    /// Converts the verbosity count to a [`LevelFilter`].
    pub(crate) const fn log_level_filter(&self) -> LevelFilter {
        match self.verbosity {
            0 => LevelFilter::WARN,
            1 => LevelFilter::INFO,
            2 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    }

    /// Installs the global tracing subscriber. Logs go to stderr so reports on stdout
    /// stay machine readable.
    pub(crate) fn init_tracing(&self) -> anyhow::Result<()> {
        let filter = EnvFilter::builder()
            .with_default_directive(self.log_level_filter().into())
            .from_env_lossy();
        let registry = tracing_subscriber::registry().with(filter);

        match self.format {
            LogFormat::Full => registry.with(fmt::layer().with_writer(std::io::stderr)).try_init(),
            LogFormat::Compact => {
                registry.with(fmt::layer().compact().with_writer(std::io::stderr)).try_init()
            }
            LogFormat::Json => {
                registry.with(fmt::layer().json().with_writer(std::io::stderr)).try_init()
            }
        }?;
        Ok(())
    }
}
