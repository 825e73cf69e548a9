//! Tracing initialisation installs a global subscriber, so it gets its own
//! test binary.

use anyhow::Result;
use hsi_capture::tracing_setup::{self, OutputFormat, TracingConfig};
use hsi_capture::PipelineConfig;
use tracing::Level;

#[test]
fn init_is_idempotent() -> Result<()> {
    let config = TracingConfig::new(Level::DEBUG).with_format(OutputFormat::Compact);
    tracing_setup::init(config.clone())?;
    tracing_setup::init(config)?;
    tracing_setup::init_from_config(&PipelineConfig::default())?;
    tracing::info!(test = "init_is_idempotent", "Logging after repeated init");
    Ok(())
}

#[test]
fn init_from_config_rejects_bad_level() {
    let mut config = PipelineConfig::default();
    config.application.log_level = "chatty".into();
    assert!(tracing_setup::init_from_config(&config)
        .unwrap_err()
        .is_configuration());
}
