//! Logging bootstrap shared by the IED binary and tests.

use clap::{Args, ValueEnum};
use tracing_subscriber::EnvFilter;

/// Output format for log lines.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// Human-readable single-line output.
    #[default]
    Full,
    /// Abbreviated output for dense terminals.
    Compact,
    /// One JSON object per line, for log collectors.
    Json,
}

/// Logging configuration, flattenable into any binary's CLI options.
#[derive(Clone, Debug, Args)]
pub struct Config {
    /// Tracing filter directive, e.g. `info` or `ied=debug,tide_disco=warn`.
    #[clap(long = "log-level", env = "LOG_LEVEL", default_value = "info")]
    pub level: String,

    /// Format of emitted log lines.
    #[clap(long = "log-format", env = "LOG_FORMAT", value_enum, default_value = "full")]
    pub format: Format,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: Format::Full,
        }
    }
}

impl Config {
    /// Install the global tracing subscriber.
    ///
    /// Safe to call more than once; subsequent calls are no-ops so that test
    /// binaries can initialize logging from every test.
    pub fn init(&self) {
        let filter = EnvFilter::try_new(&self.level).unwrap_or_else(|err| {
            eprintln!("invalid LOG_LEVEL {:?} ({err}), falling back to info", self.level);
            EnvFilter::new("info")
        });
        let builder = tracing_subscriber::fmt().with_env_filter(filter);
        let result = match self.format {
            Format::Full => builder.try_init(),
            Format::Compact => builder.compact().try_init(),
            Format::Json => builder.json().try_init(),
        };
        if result.is_err() {
            tracing::debug!("logging already initialized");
        }
    }
}
