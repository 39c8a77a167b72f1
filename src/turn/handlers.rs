//! Interception chains for outbound activity operations.
//!
//! Each of the three outbound operations on a [`TurnContext`] (send, update,
//! delete) carries its own ordered list of dynamically registered handlers.
//! A handler wraps the rest of its chain through a `next` continuation, in
//! the same chain-of-responsibility shape as the adapter's middleware set:
//! registered order is preserved both before and after awaiting `next`, and a
//! handler that never calls `next` short-circuits everything downstream,
//! including the transport call.

use crate::activity::{Activity, ConversationReference, ResourceResponse};
use crate::adapter::ChannelAdapter;
use async_trait::async_trait;
use std::sync::Arc;

use super::TurnContext;
use super::error::TurnError;

/// Intercepts outbound activity batches before they reach the adapter.
///
/// Handlers receive the buffered activity list by value and may add, remove,
/// or reorder entries before passing the list on; mutations are visible to
/// every later handler and to the final transport payload.
#[async_trait]
pub trait SendHandler: Send + Sync {
    async fn on_send(
        &self,
        ctx: &TurnContext,
        activities: Vec<Activity>,
        next: SendNext<'_>,
    ) -> Result<Vec<ResourceResponse>, TurnError>;
}

/// Continuation over the remaining send handlers, terminating in the
/// adapter's send operation.
pub struct SendNext<'a> {
    pub(super) handlers: &'a [Arc<dyn SendHandler>],
    pub(super) adapter: &'a dyn ChannelAdapter,
}

impl SendNext<'_> {
    /// Invokes the rest of the chain with the given activity list.
    pub async fn run(
        self,
        ctx: &TurnContext,
        activities: Vec<Activity>,
    ) -> Result<Vec<ResourceResponse>, TurnError> {
        match self.handlers.split_first() {
            Some((head, rest)) => {
                let next = SendNext {
                    handlers: rest,
                    adapter: self.adapter,
                };
                head.on_send(ctx, activities, next).await
            }
            None => {
                // Responded reflects the final buffered list, after every
                // handler has had its say. Traces stay invisible to it.
                if activities.iter().any(|activity| !activity.is_trace()) {
                    ctx.mark_responded();
                }
                self.adapter.send_activities(ctx, &activities).await
            }
        }
    }
}

/// Intercepts activity updates before they reach the adapter.
#[async_trait]
pub trait UpdateHandler: Send + Sync {
    async fn on_update(
        &self,
        ctx: &TurnContext,
        activity: Activity,
        next: UpdateNext<'_>,
    ) -> Result<ResourceResponse, TurnError>;
}

/// Continuation over the remaining update handlers.
pub struct UpdateNext<'a> {
    pub(super) handlers: &'a [Arc<dyn UpdateHandler>],
    pub(super) adapter: &'a dyn ChannelAdapter,
}

impl UpdateNext<'_> {
    pub async fn run(
        self,
        ctx: &TurnContext,
        activity: Activity,
    ) -> Result<ResourceResponse, TurnError> {
        match self.handlers.split_first() {
            Some((head, rest)) => {
                let next = UpdateNext {
                    handlers: rest,
                    adapter: self.adapter,
                };
                head.on_update(ctx, activity, next).await
            }
            None => self.adapter.update_activity(ctx, &activity).await,
        }
    }
}

/// Intercepts activity deletions before they reach the adapter.
#[async_trait]
pub trait DeleteHandler: Send + Sync {
    async fn on_delete(
        &self,
        ctx: &TurnContext,
        reference: ConversationReference,
        next: DeleteNext<'_>,
    ) -> Result<(), TurnError>;
}

/// Continuation over the remaining delete handlers.
pub struct DeleteNext<'a> {
    pub(super) handlers: &'a [Arc<dyn DeleteHandler>],
    pub(super) adapter: &'a dyn ChannelAdapter,
}

impl DeleteNext<'_> {
    pub async fn run(
        self,
        ctx: &TurnContext,
        reference: ConversationReference,
    ) -> Result<(), TurnError> {
        match self.handlers.split_first() {
            Some((head, rest)) => {
                let next = DeleteNext {
                    handlers: rest,
                    adapter: self.adapter,
                };
                head.on_delete(ctx, reference, next).await
            }
            None => self.adapter.delete_activity(ctx, &reference).await,
        }
    }
}
