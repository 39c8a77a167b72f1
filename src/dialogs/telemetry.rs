//! Telemetry hooks for dialog lifecycle events.

use std::sync::Arc;

/// Receives dialog lifecycle notifications. A client set on a [`DialogSet`]
/// is propagated through the container graph so nested dialogs report too.
///
/// [`DialogSet`]: super::DialogSet
pub trait DialogTelemetry: Send + Sync {
    /// A dialog instance was begun.
    fn track_dialog_begin(&self, dialog_id: &str);

    /// A dialog instance ended or was cancelled.
    fn track_dialog_end(&self, dialog_id: &str, cancelled: bool);
}

/// Default telemetry client that emits structured tracing events.
#[derive(Debug, Default, Clone)]
pub struct TracingTelemetry;

impl TracingTelemetry {
    pub fn new() -> Self {
        Self
    }

    pub fn shared() -> Arc<dyn DialogTelemetry> {
        Arc::new(Self)
    }
}

impl DialogTelemetry for TracingTelemetry {
    fn track_dialog_begin(&self, dialog_id: &str) {
        tracing::debug!(
            target: "turnkit::dialogs",
            dialog_id = %dialog_id,
            event = "dialog_begin"
        );
    }

    fn track_dialog_end(&self, dialog_id: &str, cancelled: bool) {
        tracing::debug!(
            target: "turnkit::dialogs",
            dialog_id = %dialog_id,
            cancelled,
            event = "dialog_end"
        );
    }
}
