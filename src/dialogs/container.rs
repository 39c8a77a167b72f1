//! Container dialogs: an isolated dialog set behind a single stack entry.

use super::context::DialogContext;
use super::error::DialogError;
use super::set::DialogSet;
use super::telemetry::DialogTelemetry;
use super::{
    Dialog, DialogEvent, DialogInstance, DialogReason, DialogState, DialogTurnResult,
    DialogTurnStatus,
};
use crate::turn::TurnContext;
use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;

/// The key the inner stack is persisted under in the container's own
/// instance state.
const PERSISTED_DIALOG_STATE: &str = "dialogs";

/// A dialog composed of its own inner dialog set and stack.
///
/// From the outside a component is one stack entry; inside it drives a full
/// child stack persisted in that entry's state. Id resolution inside the
/// component chains outward, so inner dialogs can begin dialogs registered
/// in enclosing sets, while outer dialogs cannot reach the component's
/// children.
///
/// The component stays on the outer stack while its inner stack is waiting
/// and ends itself (resuming the outer dialog with the inner result) when
/// the inner stack completes.
pub struct ComponentDialog {
    id: String,
    dialogs: DialogSet,
    initial_dialog_id: Option<String>,
}

impl ComponentDialog {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            dialogs: DialogSet::new(),
            initial_dialog_id: None,
        }
    }

    /// Registers a child dialog. The first one added becomes the initial
    /// dialog unless one was set explicitly.
    pub fn add_dialog(&mut self, dialog: impl Dialog + 'static) -> Result<&mut Self, DialogError> {
        let id = dialog.id().to_string();
        self.dialogs.add(dialog)?;
        if self.initial_dialog_id.is_none() {
            self.initial_dialog_id = Some(id);
        }
        Ok(self)
    }

    /// Builder form of [`ComponentDialog::add_dialog`].
    pub fn with_dialog(mut self, dialog: impl Dialog + 'static) -> Result<Self, DialogError> {
        self.add_dialog(dialog)?;
        Ok(self)
    }

    /// The child dialog begun when the component starts.
    pub fn initial_dialog_id(&self) -> Option<&str> {
        self.initial_dialog_id.as_deref()
    }

    pub fn set_initial_dialog_id(&mut self, dialog_id: impl Into<String>) -> &mut Self {
        self.initial_dialog_id = Some(dialog_id.into());
        self
    }

    /// The inner dialog set.
    pub fn dialogs(&self) -> &DialogSet {
        &self.dialogs
    }

    fn initial(&self) -> Result<String, DialogError> {
        self.initial_dialog_id.clone().ok_or_else(|| {
            DialogError::State(format!("component '{}' has no initial dialog", self.id))
        })
    }

    fn load_inner_state(instance: &DialogInstance) -> Result<DialogState, DialogError> {
        match instance.state.get(PERSISTED_DIALOG_STATE) {
            Some(value) => Ok(serde_json::from_value(value.clone())?),
            None => Ok(DialogState::new()),
        }
    }

    fn store_inner_state(
        instance: &mut DialogInstance,
        inner: &DialogState,
    ) -> Result<(), DialogError> {
        instance
            .state
            .insert(PERSISTED_DIALOG_STATE.to_string(), serde_json::to_value(inner)?);
        Ok(())
    }

    /// The outer sets an inner context falls back to: the component's host
    /// set first, then its hosts in turn.
    fn parent_chain<'a>(dc: &DialogContext<'a>) -> Vec<&'a DialogSet> {
        let mut chain = Vec::with_capacity(dc.parents().len() + 1);
        chain.push(dc.dialogs());
        chain.extend_from_slice(dc.parents());
        chain
    }

    /// Maps the inner stack's turn outcome onto the outer stack. A waiting
    /// inner stack keeps the component parked; anything else ends the
    /// component, handing the inner result to the outer dialog underneath.
    async fn finish_turn(
        &self,
        dc: &mut DialogContext<'_>,
        inner_result: DialogTurnResult,
    ) -> Result<DialogTurnResult, DialogError> {
        match inner_result.status {
            DialogTurnStatus::Waiting => Ok(DialogTurnResult::waiting()),
            DialogTurnStatus::Empty => dc.end_dialog(None).await,
            DialogTurnStatus::Complete | DialogTurnStatus::Cancelled => {
                dc.end_dialog(inner_result.result).await
            }
        }
    }

    fn active_instance_mut<'c>(
        &self,
        dc: &'c mut DialogContext<'_>,
    ) -> Result<&'c mut DialogInstance, DialogError> {
        dc.active_dialog_mut().ok_or_else(|| {
            DialogError::State(format!(
                "component '{}' invoked with no active dialog instance",
                self.id
            ))
        })
    }
}

#[async_trait]
impl Dialog for ComponentDialog {
    fn id(&self) -> &str {
        &self.id
    }

    /// Digest over the component's id and its child ids. Child ids rather
    /// than child versions keeps the digest finite when components are
    /// shared across sets.
    fn version(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.id.as_bytes());
        hasher.update([0u8]);
        for dialog in self.dialogs.iter() {
            hasher.update(dialog.id().as_bytes());
            hasher.update([0u8]);
        }
        let digest = hasher.finalize();
        let mut hex = String::with_capacity(digest.len() * 2);
        for byte in digest {
            let _ = write!(hex, "{byte:02x}");
        }
        hex
    }

    async fn begin(
        &self,
        dc: &mut DialogContext<'_>,
        options: Option<Value>,
    ) -> Result<DialogTurnResult, DialogError> {
        let initial = self.initial()?;
        let parents = Self::parent_chain(dc);
        let ctx = dc.context();

        let mut inner_state = DialogState::new();
        let inner_result = {
            let mut inner =
                DialogContext::with_parents(&self.dialogs, ctx, &mut inner_state, parents);
            inner.begin_dialog(&initial, options).await?
        };

        Self::store_inner_state(self.active_instance_mut(dc)?, &inner_state)?;
        self.finish_turn(dc, inner_result).await
    }

    async fn continue_dialog(
        &self,
        dc: &mut DialogContext<'_>,
    ) -> Result<DialogTurnResult, DialogError> {
        let parents = Self::parent_chain(dc);
        let ctx = dc.context();

        let mut inner_state = Self::load_inner_state(self.active_instance_mut(dc)?)?;
        let inner_result = {
            let mut inner =
                DialogContext::with_parents(&self.dialogs, ctx, &mut inner_state, parents);
            inner.continue_dialog().await?
        };

        Self::store_inner_state(self.active_instance_mut(dc)?, &inner_state)?;
        self.finish_turn(dc, inner_result).await
    }

    /// A dialog the component pushed onto the outer stack has ended. The
    /// inner stack never parks on the outer stack, so there is nothing to
    /// forward the result into; the component re-prompts instead.
    async fn resume(
        &self,
        dc: &mut DialogContext<'_>,
        _reason: DialogReason,
        _result: Option<Value>,
    ) -> Result<DialogTurnResult, DialogError> {
        let ctx = dc.context();
        if let Some(instance) = dc.active_dialog_mut() {
            self.reprompt(ctx, instance).await?;
        }
        Ok(DialogTurnResult::waiting())
    }

    async fn end(
        &self,
        ctx: &TurnContext,
        instance: &mut DialogInstance,
        reason: DialogReason,
    ) -> Result<(), DialogError> {
        // Cancellation unwinds the inner stack too, so inner cleanup hooks
        // run before the component disappears.
        if reason == DialogReason::CancelCalled {
            let mut inner_state = Self::load_inner_state(instance)?;
            {
                let mut inner = DialogContext::new(&self.dialogs, ctx, &mut inner_state);
                inner.cancel_all_dialogs(None, None).await?;
            }
            Self::store_inner_state(instance, &inner_state)?;
        }
        Ok(())
    }

    async fn reprompt(
        &self,
        ctx: &TurnContext,
        instance: &mut DialogInstance,
    ) -> Result<(), DialogError> {
        let mut inner_state = Self::load_inner_state(instance)?;
        {
            let mut inner = DialogContext::new(&self.dialogs, ctx, &mut inner_state);
            inner.reprompt_dialog().await?;
        }
        Self::store_inner_state(instance, &inner_state)
    }

    /// Forwards events raised on the component into its inner stack.
    async fn on_dialog_event(
        &self,
        dc: &mut DialogContext<'_>,
        event: &DialogEvent,
    ) -> Result<bool, DialogError> {
        if !event.bubble {
            return Ok(false);
        }
        let parents = Self::parent_chain(dc);
        let ctx = dc.context();

        let mut inner_state = Self::load_inner_state(self.active_instance_mut(dc)?)?;
        let handled = {
            let mut inner =
                DialogContext::with_parents(&self.dialogs, ctx, &mut inner_state, parents);
            inner
                .emit_event(&event.name, event.value.clone(), event.bubble)
                .await?
        };
        Self::store_inner_state(self.active_instance_mut(dc)?, &inner_state)?;
        Ok(handled)
    }

    fn propagate_telemetry(
        &self,
        client: &Arc<dyn DialogTelemetry>,
        visited: &mut HashSet<String>,
    ) {
        if !visited.insert(self.id.clone()) {
            return;
        }
        self.dialogs.set_telemetry_guarded(client.clone(), visited);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::{Activity, ConversationReference, ResourceResponse};
    use crate::adapter::ChannelAdapter;
    use crate::dialogs::waterfall::{WaterfallDialog, WaterfallStepInfo};
    use crate::turn::{TurnContext, TurnError};
    use futures::future::BoxFuture;
    use serde_json::json;

    struct NullAdapter;

    #[async_trait]
    impl ChannelAdapter for NullAdapter {
        async fn send_activities(
            &self,
            _ctx: &TurnContext,
            activities: &[Activity],
        ) -> Result<Vec<ResourceResponse>, TurnError> {
            Ok(activities
                .iter()
                .map(|_| ResourceResponse::default())
                .collect())
        }

        async fn update_activity(
            &self,
            _ctx: &TurnContext,
            _activity: &Activity,
        ) -> Result<ResourceResponse, TurnError> {
            Ok(ResourceResponse::default())
        }

        async fn delete_activity(
            &self,
            _ctx: &TurnContext,
            _reference: &ConversationReference,
        ) -> Result<(), TurnError> {
            Ok(())
        }
    }

    fn message_context(text: &str) -> TurnContext {
        TurnContext::new(Arc::new(NullAdapter), Some(Activity::message(text)))
    }

    fn ask<'a>(
        dc: &'a mut DialogContext<'_>,
        _step: WaterfallStepInfo,
    ) -> BoxFuture<'a, Result<DialogTurnResult, DialogError>> {
        Box::pin(async move {
            dc.context().send_text("name?").await?;
            Ok(DialogTurnResult::waiting())
        })
    }

    fn finish<'a>(
        _dc: &'a mut DialogContext<'_>,
        step: WaterfallStepInfo,
    ) -> BoxFuture<'a, Result<DialogTurnResult, DialogError>> {
        Box::pin(async move { Ok(DialogTurnResult::complete(step.result)) })
    }

    fn component() -> ComponentDialog {
        ComponentDialog::new("profile")
            .with_dialog(WaterfallDialog::new("ask-name").with_step(ask).with_step(finish))
            .unwrap()
    }

    fn host_set() -> DialogSet {
        let mut set = DialogSet::new();
        set.add(component()).unwrap();
        set
    }

    #[tokio::test]
    async fn test_component_waits_while_inner_stack_waits() {
        let set = host_set();
        let mut state = DialogState::new();

        let ctx = message_context("hi");
        let result = set
            .create_context(&ctx, &mut state)
            .begin_dialog("profile", None)
            .await
            .unwrap();

        assert_eq!(result.status, DialogTurnStatus::Waiting);
        assert_eq!(state.stack.len(), 1);
        assert_eq!(state.stack[0].id, "profile");
        assert!(
            state.stack[0].state.contains_key("dialogs"),
            "inner stack is persisted inside the component's instance"
        );
    }

    #[tokio::test]
    async fn test_inner_completion_ends_the_component() {
        let set = host_set();
        let mut state = DialogState::new();

        let ctx = message_context("hi");
        set.create_context(&ctx, &mut state)
            .begin_dialog("profile", None)
            .await
            .unwrap();

        let ctx = message_context("alice");
        let result = set
            .create_context(&ctx, &mut state)
            .continue_dialog()
            .await
            .unwrap();

        assert_eq!(result.status, DialogTurnStatus::Complete);
        assert_eq!(result.result, Some(json!("alice")));
        assert!(state.is_empty(), "outer stack is unwound with the component");
    }

    #[tokio::test]
    async fn test_inner_stack_survives_serialization() {
        let set = host_set();
        let mut state = DialogState::new();

        let ctx = message_context("hi");
        set.create_context(&ctx, &mut state)
            .begin_dialog("profile", None)
            .await
            .unwrap();

        // Round-trip the whole outer state, as storage middleware would.
        let persisted = serde_json::to_value(&state).unwrap();
        let mut restored: DialogState = serde_json::from_value(persisted).unwrap();

        let ctx = message_context("alice");
        let result = set
            .create_context(&ctx, &mut restored)
            .continue_dialog()
            .await
            .unwrap();

        assert_eq!(result.status, DialogTurnStatus::Complete);
        assert_eq!(result.result, Some(json!("alice")));
    }

    #[tokio::test]
    async fn test_cancel_unwinds_inner_stack() {
        let set = host_set();
        let mut state = DialogState::new();

        let ctx = message_context("hi");
        set.create_context(&ctx, &mut state)
            .begin_dialog("profile", None)
            .await
            .unwrap();

        let ctx = message_context("never mind");
        let result = set
            .create_context(&ctx, &mut state)
            .cancel_all_dialogs(None, None)
            .await
            .unwrap();

        assert_eq!(result.status, DialogTurnStatus::Cancelled);
        assert!(state.is_empty());
    }

    #[tokio::test]
    async fn test_outer_dialogs_cannot_reach_component_children() {
        let set = host_set();
        let mut state = DialogState::new();

        let ctx = message_context("hi");
        let err = set
            .create_context(&ctx, &mut state)
            .begin_dialog("ask-name", None)
            .await
            .unwrap_err();

        assert!(matches!(err, DialogError::NotRegistered(id) if id == "ask-name"));
    }

    #[test]
    fn test_component_without_children_has_no_initial_dialog() {
        let component = ComponentDialog::new("empty");
        assert!(component.initial_dialog_id().is_none());
    }

    #[test]
    fn test_version_reflects_child_registration() {
        let a = ComponentDialog::new("c")
            .with_dialog(WaterfallDialog::new("one"))
            .unwrap();
        let b = ComponentDialog::new("c")
            .with_dialog(WaterfallDialog::new("one"))
            .unwrap()
            .with_dialog(WaterfallDialog::new("two"))
            .unwrap();
        assert_ne!(a.version(), b.version());
    }
}
