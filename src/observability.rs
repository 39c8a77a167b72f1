//! Tracing setup for hosts that do not install their own subscriber.
//!
//! Every layer of the crate emits structured `tracing` events under
//! `turnkit::*` targets: the adapter pipeline, the turn context's outbound
//! chains, storage, and the dialog machine. [`init`] wires those events to
//! stdout behind an env filter so a host binary sees them with one call.

use thiserror::Error;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// The filter applied when neither `RUST_LOG` nor an explicit directive is
/// given.
pub const DEFAULT_FILTER: &str = "turnkit=info";

#[derive(Debug, Error)]
pub enum ObservabilityError {
    #[error("invalid filter directive: {0}")]
    Filter(#[from] ParseError),
    #[error("a global tracing subscriber is already installed")]
    AlreadyInstalled,
}

/// How [`init`] filters and formats the crate's tracing output.
#[derive(Debug, Clone, Default)]
pub struct ObservabilityConfig {
    /// Filter directives in `EnvFilter` syntax, per-target levels included,
    /// e.g. `"turnkit=debug,turnkit::dialogs=trace"`. `None` reads
    /// `RUST_LOG`, falling back to [`DEFAULT_FILTER`].
    pub filter: Option<String>,
    /// Drop the `turnkit::*` target prefix from each line.
    pub hide_targets: bool,
}

/// Installs the global subscriber. Call once from the host's entry point.
/// Returns [`ObservabilityError::AlreadyInstalled`] when another subscriber
/// got there first.
pub fn init(config: ObservabilityConfig) -> Result<(), ObservabilityError> {
    let filter = match config.filter {
        Some(directives) => EnvFilter::try_new(directives)?,
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
    };
    let layer = fmt::layer().with_target(!config.hide_targets);
    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .map_err(|_| ObservabilityError::AlreadyInstalled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_installs_the_subscriber_once() {
        assert!(init(ObservabilityConfig::default()).is_ok());

        let second = init(ObservabilityConfig {
            filter: Some("turnkit=debug".to_string()),
            hide_targets: true,
        });
        assert!(matches!(second, Err(ObservabilityError::AlreadyInstalled)));
    }

    #[test]
    fn test_bad_filter_directive_is_reported() {
        let config = ObservabilityConfig {
            filter: Some("turnkit=!!!".to_string()),
            hide_targets: false,
        };
        assert!(matches!(init(config), Err(ObservabilityError::Filter(_))));
    }
}
