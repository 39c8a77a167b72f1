//! The turn context: per-turn mutable state and outbound activity operations.
//!
//! A [`TurnContext`] lives for exactly one turn. It is created by an adapter,
//! handed through the middleware chain to the application callback, and holds
//! everything that callback needs: the inbound activity, turn-scoped service
//! and state bags, and the send/update/delete operations whose calls pass
//! through dynamically registered interception chains before reaching the
//! transport adapter.

pub mod error;
pub mod handlers;
mod state_bag;

pub use error::TurnError;
pub use handlers::{
    DeleteHandler, DeleteNext, SendHandler, SendNext, UpdateHandler, UpdateNext,
};
pub use state_bag::StateBag;

use crate::activity::{Activity, ConversationReference, ResourceResponse};
use crate::adapter::ChannelAdapter;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Per-turn context created by an adapter.
///
/// # Design Notes
///
/// - `responded` becomes true the first time any non-trace activity is sent
///   and is never reset within the turn.
/// - The handler lists, state bags, responded flag, and cancellation token
///   are shared by reference with contexts produced by [`TurnContext::fork_for`],
///   so retargeting the activity never loses registered interceptors.
/// - A single turn is one sequential logical flow; the internal locks exist
///   for shared ownership, not for cross-task contention, and are never held
///   across an await point.
pub struct TurnContext {
    adapter: Arc<dyn ChannelAdapter>,
    activity: Option<Activity>,
    responded: Arc<AtomicBool>,
    cancellation: CancellationToken,
    services: Arc<StateBag>,
    stack_state: Arc<StateBag>,
    send_handlers: Arc<Mutex<Vec<Arc<dyn SendHandler>>>>,
    update_handlers: Arc<Mutex<Vec<Arc<dyn UpdateHandler>>>>,
    delete_handlers: Arc<Mutex<Vec<Arc<dyn DeleteHandler>>>>,
}

impl TurnContext {
    /// Creates a context for a reactive turn (`Some` activity) or a
    /// proactive turn (`None`).
    pub fn new(adapter: Arc<dyn ChannelAdapter>, activity: Option<Activity>) -> Self {
        Self::with_cancellation(adapter, activity, CancellationToken::new())
    }

    /// Creates a context wired to an externally owned cancellation token.
    pub fn with_cancellation(
        adapter: Arc<dyn ChannelAdapter>,
        activity: Option<Activity>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            adapter,
            activity,
            responded: Arc::new(AtomicBool::new(false)),
            cancellation,
            services: Arc::new(StateBag::new()),
            stack_state: Arc::new(StateBag::new()),
            send_handlers: Arc::new(Mutex::new(Vec::new())),
            update_handlers: Arc::new(Mutex::new(Vec::new())),
            delete_handlers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// The inbound activity, or `None` for proactive turns.
    pub fn activity(&self) -> Option<&Activity> {
        self.activity.as_ref()
    }

    /// The adapter this context terminates outbound operations into.
    pub fn adapter(&self) -> &Arc<dyn ChannelAdapter> {
        &self.adapter
    }

    /// The cooperative cancellation token flowing through this turn.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// True once any non-trace activity has been sent during this turn.
    pub fn responded(&self) -> bool {
        self.responded.load(Ordering::SeqCst)
    }

    /// Marks the turn as responded. One-way: there is no reset.
    pub fn mark_responded(&self) {
        self.responded.store(true, Ordering::SeqCst);
    }

    /// Turn-scoped services: connector client, claims identity, and whatever
    /// middleware chooses to share with the application callback.
    pub fn services(&self) -> &StateBag {
        &self.services
    }

    /// Cross-cutting turn flags, such as the buffered invoke response.
    pub fn stack_state(&self) -> &StateBag {
        &self.stack_state
    }

    /// Creates a context retargeted at `activity`, sharing handler lists,
    /// state bags, responded flag, adapter, and cancellation token with this
    /// one.
    pub fn fork_for(&self, activity: Activity) -> TurnContext {
        TurnContext {
            adapter: self.adapter.clone(),
            activity: Some(activity),
            responded: self.responded.clone(),
            cancellation: self.cancellation.clone(),
            services: self.services.clone(),
            stack_state: self.stack_state.clone(),
            send_handlers: self.send_handlers.clone(),
            update_handlers: self.update_handlers.clone(),
            delete_handlers: self.delete_handlers.clone(),
        }
    }

    /// Registers a handler to intercept outbound activity batches. Handlers
    /// run in registration order.
    pub fn on_send_activities(&self, handler: impl SendHandler + 'static) {
        lock(&self.send_handlers).push(Arc::new(handler));
    }

    /// Registers a handler to intercept activity updates.
    pub fn on_update_activity(&self, handler: impl UpdateHandler + 'static) {
        lock(&self.update_handlers).push(Arc::new(handler));
    }

    /// Registers a handler to intercept activity deletions.
    pub fn on_delete_activity(&self, handler: impl DeleteHandler + 'static) {
        lock(&self.delete_handlers).push(Arc::new(handler));
    }

    /// Sends a batch of activities through the send-handler chain to the
    /// adapter.
    ///
    /// Before anything else runs, each activity is rebound to the inbound
    /// activity's conversation reference and its id is cleared; the channel
    /// transport assigns outbound ids.
    pub async fn send_activities(
        &self,
        activities: Vec<Activity>,
    ) -> Result<Vec<ResourceResponse>, TurnError> {
        if activities.is_empty() {
            return Err(TurnError::InvalidArgument(
                "activities must not be empty".to_string(),
            ));
        }

        let mut outgoing = activities;
        let reference = self
            .activity
            .as_ref()
            .map(Activity::get_conversation_reference);
        for activity in &mut outgoing {
            if let Some(reference) = &reference {
                activity.apply_conversation_reference(reference, false);
            }
            activity.id = None;
        }

        let handlers: Vec<Arc<dyn SendHandler>> = lock(&self.send_handlers).clone();
        tracing::debug!(
            target: "turnkit::turn",
            count = outgoing.len(),
            handlers = handlers.len(),
            event = "send_activities"
        );
        let next = SendNext {
            handlers: &handlers,
            adapter: self.adapter.as_ref(),
        };
        next.run(self, outgoing).await
    }

    /// Sends a single activity; see [`TurnContext::send_activities`].
    pub async fn send_activity(&self, activity: Activity) -> Result<ResourceResponse, TurnError> {
        let mut responses = self.send_activities(vec![activity]).await?;
        Ok(responses.pop().unwrap_or_default())
    }

    /// Sends a plain text message reply.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<ResourceResponse, TurnError> {
        self.send_activity(Activity::message(text)).await
    }

    /// Sends a trace activity through the regular send chain.
    ///
    /// Traces participate in (and can be intercepted by) the same handler
    /// chain as ordinary sends, but never mark the turn as responded.
    pub async fn trace_activity(
        &self,
        name: impl Into<String>,
        value: Option<Value>,
        label: Option<String>,
    ) -> Result<ResourceResponse, TurnError> {
        self.send_activity(Activity::trace(name, value, label)).await
    }

    /// Replaces an existing activity on the channel, routed through the
    /// update-handler chain.
    ///
    /// Channels that do not support updates surface the adapter's error to
    /// the caller unchanged; there is no fallback.
    pub async fn update_activity(
        &self,
        activity: Activity,
    ) -> Result<ResourceResponse, TurnError> {
        if activity.id.is_none() {
            return Err(TurnError::InvalidArgument(
                "an activity id is required to update".to_string(),
            ));
        }

        let mut outgoing = activity;
        if let Some(incoming) = &self.activity {
            let reference = incoming.get_conversation_reference();
            outgoing.apply_conversation_reference(&reference, false);
        }

        let handlers: Vec<Arc<dyn UpdateHandler>> = lock(&self.update_handlers).clone();
        tracing::debug!(
            target: "turnkit::turn",
            activity_id = outgoing.id.as_deref().unwrap_or_default(),
            handlers = handlers.len(),
            event = "update_activity"
        );
        let next = UpdateNext {
            handlers: &handlers,
            adapter: self.adapter.as_ref(),
        };
        next.run(self, outgoing).await
    }

    /// Deletes a previously sent activity, routed through the delete-handler
    /// chain.
    pub async fn delete_activity(&self, activity_id: &str) -> Result<(), TurnError> {
        if activity_id.is_empty() {
            return Err(TurnError::InvalidArgument(
                "an activity id is required to delete".to_string(),
            ));
        }

        let mut reference = self
            .activity
            .as_ref()
            .map(Activity::get_conversation_reference)
            .unwrap_or_default();
        reference.activity_id = Some(activity_id.to_string());

        let handlers: Vec<Arc<dyn DeleteHandler>> = lock(&self.delete_handlers).clone();
        tracing::debug!(
            target: "turnkit::turn",
            activity_id,
            handlers = handlers.len(),
            event = "delete_activity"
        );
        let next = DeleteNext {
            handlers: &handlers,
            adapter: self.adapter.as_ref(),
        };
        next.run(self, reference).await
    }

    /// Deletes the activity a conversation reference points at.
    pub async fn delete_conversation_reference(
        &self,
        reference: ConversationReference,
    ) -> Result<(), TurnError> {
        if reference.activity_id.is_none() {
            return Err(TurnError::InvalidArgument(
                "the conversation reference carries no activity id".to_string(),
            ));
        }
        let handlers: Vec<Arc<dyn DeleteHandler>> = lock(&self.delete_handlers).clone();
        let next = DeleteNext {
            handlers: &handlers,
            adapter: self.adapter.as_ref(),
        };
        next.run(self, reference).await
    }
}

impl Drop for TurnContext {
    fn drop(&mut self) {
        // The bags are shared with forked contexts; only the last owner
        // releases their contents.
        if Arc::strong_count(&self.services) == 1 {
            self.services.clear();
        }
        if Arc::strong_count(&self.stack_state) == 1 {
            self.stack_state.clear();
        }
    }
}

impl std::fmt::Debug for TurnContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnContext")
            .field("activity", &self.activity)
            .field("responded", &self.responded())
            .finish_non_exhaustive()
    }
}
