//! Logging setup on top of `tracing-subscriber`.
//!
//! `RUST_LOG` wins over the configured level when it is set. Worker spans
//! can be made visible with [`TracingConfig::with_span_events`] to follow a frame
//! through the feeder and processor tasks.
//!
//! Installing twice is harmless: if a global subscriber already exists the
//! call returns `Ok` and leaves it in place.
//!
//! # Example
//! ```no_run
//! use hsi_capture::{config::PipelineConfig, tracing_setup};
//! use tracing::info;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PipelineConfig::load()?;
//! tracing_setup::init_from_config(&config)?;
//! info!(app = %config.application.name, "Pipeline starting");
//! # Ok(())
//! # }
//! ```

use crate::config::{PipelineConfig, LOG_LEVELS};
use hsi_core::{HsiError, HsiResult};
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::{
    fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
    Registry,
};

/// How events are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Multi-line with colours, for a developer terminal.
    #[default]
    Pretty,
    /// One plain line per event.
    Compact,
    /// Newline-delimited JSON for log shippers.
    Json,
}

/// Subscriber settings.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    pub level: Level,
    pub format: OutputFormat,
    /// Log span creation and close, with timings.
    pub with_span_events: bool,
    pub with_file_and_line: bool,
    pub with_thread_names: bool,
    /// Only honoured by [`OutputFormat::Pretty`].
    pub with_ansi: bool,
}

impl TracingConfig {
    pub fn new(level: Level) -> Self {
        Self {
            level,
            format: OutputFormat::default(),
            with_span_events: false,
            with_file_and_line: true,
            with_thread_names: true,
            with_ansi: true,
        }
    }

    pub fn from_pipeline_config(config: &PipelineConfig) -> HsiResult<Self> {
        parse_log_level(&config.application.log_level).map(Self::new)
    }

    #[must_use]
    pub fn with_format(self, format: OutputFormat) -> Self {
        Self { format, ..self }
    }

    #[must_use]
    pub fn with_span_events(self, with_span_events: bool) -> Self {
        Self {
            with_span_events,
            ..self
        }
    }

    #[must_use]
    pub fn with_ansi(self, with_ansi: bool) -> Self {
        Self { with_ansi, ..self }
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.level.to_string().to_lowercase()))
    }

    fn spans(&self) -> FmtSpan {
        match self.with_span_events {
            true => FmtSpan::NEW | FmtSpan::CLOSE,
            false => FmtSpan::NONE,
        }
    }
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self::new(Level::INFO)
    }
}

/// Install a subscriber at the level named in `[application]`.
pub fn init_from_config(config: &PipelineConfig) -> HsiResult<()> {
    init(TracingConfig::from_pipeline_config(config)?)
}

/// Install the global subscriber described by `config`.
pub fn init(config: TracingConfig) -> HsiResult<()> {
    let base = tracing_subscriber::fmt::layer()
        .with_span_events(config.spans())
        .with_file(config.with_file_and_line)
        .with_line_number(config.with_file_and_line)
        .with_thread_names(config.with_thread_names);

    let layer: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        OutputFormat::Pretty => base.pretty().with_ansi(config.with_ansi).boxed(),
        OutputFormat::Compact => base.compact().with_ansi(false).boxed(),
        OutputFormat::Json => base.json().boxed(),
    };

    match tracing_subscriber::registry()
        .with(layer.with_filter(config.filter()))
        .try_init()
    {
        Ok(()) => Ok(()),
        Err(e) if e.to_string().contains("already been set") => Ok(()),
        Err(e) => Err(HsiError::Configuration(format!(
            "cannot install tracing subscriber: {}",
            e
        ))),
    }
}

/// Level names are matched without regard to case.
pub fn parse_log_level(name: &str) -> HsiResult<Level> {
    Level::from_str(name.trim()).map_err(|_| {
        HsiError::Configuration(format!(
            "unknown log level '{}', expected one of {}",
            name,
            LOG_LEVELS.join(", ")
        ))
    })
}
