use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

use crate::config::{self, LoggingConfig};
use crate::error::ConfigError;
use crate::layer::PipelineLayer;

/// Install a [`Registry`] with a [`PipelineLayer`] as the global default
/// subscriber, so every `tracing` event in the process flows through the
/// configured pipeline.
///
/// **Errors**
///
/// [`ConfigError::SubscriberInstalled`] when a global subscriber is
/// already set.
pub fn init_tracing() -> Result<(), ConfigError> {
    let subscriber = Registry::default().with(PipelineLayer::new());
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// [`configure`](crate::config::configure) with `config`, then
/// [`init_tracing`].
pub fn init_tracing_with_config(config: LoggingConfig) -> Result<(), ConfigError> {
    config::configure(config)?;
    init_tracing()
}
