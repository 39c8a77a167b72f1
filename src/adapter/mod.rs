//! Channel adapters: the boundary between the turn engine and a channel
//! transport.
//!
//! An adapter owns the middleware pipeline and is the single entry point for
//! both reactive turns (an inbound activity arrived) and proactive turns (the
//! application initiated a callback with no inbound activity). Outbound
//! operations started on a [`TurnContext`] terminate in the adapter's
//! [`ChannelAdapter`] implementation.

pub mod channel_service;
mod middleware;

pub use channel_service::{ChannelServiceAdapter, ConnectorClient, ConnectorFactory};
pub use middleware::{Middleware, MiddlewareSet, Next, TurnHandler};

use crate::activity::{Activity, ConversationReference, ResourceResponse};
use crate::turn::{TurnContext, TurnError};
use async_trait::async_trait;
use std::sync::Arc;

/// The transport surface a [`TurnContext`] terminates outbound operations
/// into.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Delivers a batch of activities to the channel, returning one resource
    /// response per activity in order.
    async fn send_activities(
        &self,
        ctx: &TurnContext,
        activities: &[Activity],
    ) -> Result<Vec<ResourceResponse>, TurnError>;

    /// Replaces an existing activity on the channel. Channels without update
    /// support return [`TurnError::NotSupported`]; that error is expected,
    /// not papered over.
    async fn update_activity(
        &self,
        ctx: &TurnContext,
        activity: &Activity,
    ) -> Result<ResourceResponse, TurnError>;

    /// Deletes the activity a conversation reference points at.
    async fn delete_activity(
        &self,
        ctx: &TurnContext,
        reference: &ConversationReference,
    ) -> Result<(), TurnError>;
}

/// Recovers from errors raised while running a turn.
///
/// When registered, the handler owns the turn-level error contract: it may
/// send a user-facing apology before the turn ends, and its own result
/// becomes the turn's result. Cancellation never reaches it.
#[async_trait]
pub trait TurnErrorHandler: Send + Sync {
    async fn on_turn_error(&self, ctx: &TurnContext, error: &TurnError) -> Result<(), TurnError>;
}

/// The middleware pipeline and error contract shared by adapters.
///
/// Concrete adapters embed an `AdapterPipeline` and route every turn,
/// reactive or proactive, through [`AdapterPipeline::run_pipeline`].
#[derive(Default)]
pub struct AdapterPipeline {
    middleware: MiddlewareSet,
    on_turn_error: Option<Arc<dyn TurnErrorHandler>>,
}

impl AdapterPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a middleware to the pipeline.
    pub fn use_middleware(&mut self, middleware: impl Middleware + 'static) -> &mut Self {
        self.middleware.use_middleware(middleware);
        self
    }

    /// The underlying middleware set.
    pub fn middleware(&self) -> &MiddlewareSet {
        &self.middleware
    }

    /// Registers the turn-level error handler.
    pub fn set_on_turn_error(&mut self, handler: Arc<dyn TurnErrorHandler>) -> &mut Self {
        self.on_turn_error = Some(handler);
        self
    }

    /// Runs one turn through the pipeline.
    ///
    /// Reactive turns (the context carries an inbound activity) run the full
    /// middleware chain ending in `callback`. Proactive turns (no inbound
    /// activity) skip the middleware entirely and invoke `callback` directly:
    /// inbound-only cross-cutting concerns such as activity validation have
    /// nothing to act on.
    ///
    /// # Errors
    ///
    /// [`TurnError::Cancelled`] is always rethrown, bypassing the registered
    /// error handler: cancellation is a shutdown signal, not an application
    /// error. Any other error is routed to the handler when one is
    /// registered, else returned to the caller.
    pub async fn run_pipeline(
        &self,
        ctx: &TurnContext,
        callback: Option<&dyn TurnHandler>,
    ) -> Result<(), TurnError> {
        if ctx.cancellation().is_cancelled() {
            return Err(TurnError::Cancelled);
        }

        if ctx.activity().is_none() {
            tracing::debug!(target: "turnkit::adapter", event = "proactive_turn");
            return match callback {
                Some(callback) => callback.on_turn(ctx).await,
                None => Ok(()),
            };
        }

        tracing::debug!(
            target: "turnkit::adapter",
            middleware = self.middleware.len(),
            event = "pipeline_start"
        );
        match self.middleware.run(ctx, callback).await {
            Ok(()) => Ok(()),
            Err(error) if error.is_cancellation() => Err(error),
            Err(error) => match &self.on_turn_error {
                Some(handler) => {
                    tracing::warn!(
                        target: "turnkit::adapter",
                        error = %error,
                        event = "turn_error_handled"
                    );
                    handler.on_turn_error(ctx, &error).await
                }
                None => {
                    tracing::error!(
                        target: "turnkit::adapter",
                        error = %error,
                        event = "turn_error_unhandled"
                    );
                    Err(error)
                }
            },
        }
    }
}
