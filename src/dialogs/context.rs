//! Turn-scoped view over a dialog set and its persisted stack.

use super::error::DialogError;
use super::set::DialogSet;
use super::{
    Dialog, DialogEvent, DialogInstance, DialogReason, DialogState, DialogTurnResult, events,
};
use crate::turn::TurnContext;
use serde_json::Value;
use std::sync::Arc;

/// Drives the dialog stack for one turn.
///
/// Created by [`DialogSet::create_context`]. All stack mutation flows through
/// this type so the begin/continue/end/cancel lifecycle stays consistent:
/// index 0 of the stack is always the active dialog, and unwinding always
/// runs the detached instance's cleanup hook before resuming whatever is
/// underneath.
pub struct DialogContext<'a> {
    dialogs: &'a DialogSet,
    context: &'a TurnContext,
    state: &'a mut DialogState,
    /// Outer dialog sets, nearest first. Lookup falls back through these so
    /// a dialog inside a container can begin a dialog registered outside it.
    parents: Vec<&'a DialogSet>,
}

impl<'a> DialogContext<'a> {
    pub(crate) fn new(
        dialogs: &'a DialogSet,
        context: &'a TurnContext,
        state: &'a mut DialogState,
    ) -> Self {
        Self {
            dialogs,
            context,
            state,
            parents: Vec::new(),
        }
    }

    /// Builds a context whose lookups fall back through `parents` when the
    /// primary set misses. Used by containers to chain their inner sets to
    /// the outer ones.
    pub fn with_parents(
        dialogs: &'a DialogSet,
        context: &'a TurnContext,
        state: &'a mut DialogState,
        parents: Vec<&'a DialogSet>,
    ) -> Self {
        Self {
            dialogs,
            context,
            state,
            parents,
        }
    }

    /// The turn this context operates within.
    pub fn context(&self) -> &'a TurnContext {
        self.context
    }

    /// The dialog set this context resolves ids against first.
    pub fn dialogs(&self) -> &'a DialogSet {
        self.dialogs
    }

    /// The fallback chain of outer dialog sets, nearest first.
    pub fn parents(&self) -> &[&'a DialogSet] {
        &self.parents
    }

    /// The persisted stack being driven this turn.
    pub fn state(&self) -> &DialogState {
        self.state
    }

    /// The active (top-of-stack) dialog instance, if any.
    pub fn active_dialog(&self) -> Option<&DialogInstance> {
        self.state.stack.first()
    }

    /// Mutable access to the active instance's persisted state bag.
    pub fn active_dialog_mut(&mut self) -> Option<&mut DialogInstance> {
        self.state.stack.first_mut()
    }

    /// Resolves a dialog id against this set, then each parent set in order.
    pub fn find_dialog(&self, dialog_id: &str) -> Option<Arc<dyn Dialog>> {
        if let Some(dialog) = self.dialogs.find(dialog_id) {
            return Some(dialog);
        }
        self.parents.iter().find_map(|set| set.find(dialog_id))
    }

    /// Pushes a new instance of `dialog_id` onto the stack and starts it.
    pub async fn begin_dialog(
        &mut self,
        dialog_id: &str,
        options: Option<Value>,
    ) -> Result<DialogTurnResult, DialogError> {
        if dialog_id.is_empty() {
            return Err(DialogError::EmptyDialogId);
        }
        let dialog = self
            .find_dialog(dialog_id)
            .ok_or_else(|| DialogError::NotRegistered(dialog_id.to_string()))?;

        let mut instance = DialogInstance::new(dialog_id);
        instance.version = Some(dialog.version());
        self.state.stack.insert(0, instance);

        if let Some(client) = self.dialogs.telemetry() {
            client.track_dialog_begin(dialog_id);
        }
        tracing::debug!(
            target: "turnkit::dialogs",
            dialog_id = %dialog_id,
            depth = self.state.stack.len(),
            event = "begin_dialog"
        );
        dialog.begin(self, options).await
    }

    /// Continues the active dialog with the turn's inbound activity.
    ///
    /// Returns [`DialogTurnStatus::Empty`] without running anything when the
    /// stack is empty. A stack entry whose dialog definition has changed
    /// since it was begun raises a `versionChanged` event first.
    ///
    /// [`DialogTurnStatus::Empty`]: super::DialogTurnStatus::Empty
    pub async fn continue_dialog(&mut self) -> Result<DialogTurnResult, DialogError> {
        if self.state.stack.is_empty() {
            return Ok(DialogTurnResult::empty());
        }
        self.check_version().await?;

        let Some(instance) = self.state.stack.first() else {
            return Ok(DialogTurnResult::empty());
        };
        let id = instance.id.clone();
        let dialog = self
            .find_dialog(&id)
            .ok_or(DialogError::MissingDialog(id))?;
        dialog.continue_dialog(self).await
    }

    /// Pops the active dialog and resumes whatever is underneath with
    /// `result`. With nothing underneath, the stack completes.
    pub async fn end_dialog(
        &mut self,
        result: Option<Value>,
    ) -> Result<DialogTurnResult, DialogError> {
        self.end_active_dialog(DialogReason::EndCalled).await?;

        if let Some(instance) = self.state.stack.first() {
            let id = instance.id.clone();
            let dialog = self
                .find_dialog(&id)
                .ok_or(DialogError::MissingDialog(id))?;
            dialog.resume(self, DialogReason::EndCalled, result).await
        } else {
            Ok(DialogTurnResult::complete(result))
        }
    }

    /// Swaps the active dialog for a fresh instance of `dialog_id`. The
    /// outgoing instance is detached without running its cleanup hook; the
    /// dialog underneath is not resumed.
    pub async fn replace_dialog(
        &mut self,
        dialog_id: &str,
        options: Option<Value>,
    ) -> Result<DialogTurnResult, DialogError> {
        self.end_active_dialog(DialogReason::ReplaceCalled).await?;
        self.begin_dialog(dialog_id, options).await
    }

    /// Unwinds the entire stack, running each instance's cleanup hook top
    /// down.
    ///
    /// When `event_name` is given, the event is raised before each pop; a
    /// dialog that handles it stops the unwind with the remaining stack
    /// intact. Returns [`DialogTurnStatus::Empty`] if there was nothing to
    /// cancel.
    ///
    /// [`DialogTurnStatus::Empty`]: super::DialogTurnStatus::Empty
    pub async fn cancel_all_dialogs(
        &mut self,
        event_name: Option<&str>,
        event_value: Option<Value>,
    ) -> Result<DialogTurnResult, DialogError> {
        if self.state.stack.is_empty() {
            return Ok(DialogTurnResult::empty());
        }
        tracing::debug!(
            target: "turnkit::dialogs",
            depth = self.state.stack.len(),
            event = "cancel_all_dialogs"
        );
        while !self.state.stack.is_empty() {
            if let Some(name) = event_name {
                let handled = self.emit_event(name, event_value.clone(), false).await?;
                if handled {
                    break;
                }
            }
            self.end_active_dialog(DialogReason::CancelCalled).await?;
        }
        Ok(DialogTurnResult::cancelled())
    }

    /// Asks the active dialog to re-send its last prompt, first giving it
    /// the chance to intercept via a `repromptDialog` event. No-op on an
    /// empty stack.
    pub async fn reprompt_dialog(&mut self) -> Result<(), DialogError> {
        let handled = self
            .emit_event(events::REPROMPT_DIALOG, None, false)
            .await?;
        if handled {
            return Ok(());
        }
        let Some(instance) = self.state.stack.first() else {
            return Ok(());
        };
        let id = instance.id.clone();
        let dialog = self
            .find_dialog(&id)
            .ok_or(DialogError::MissingDialog(id))?;
        let ctx = self.context;
        if let Some(instance) = self.state.stack.first_mut() {
            dialog.reprompt(ctx, instance).await?;
        }
        Ok(())
    }

    /// Raises an event on the active dialog. Returns whether it was handled.
    pub async fn emit_event(
        &mut self,
        name: &str,
        value: Option<Value>,
        bubble: bool,
    ) -> Result<bool, DialogError> {
        let event = DialogEvent {
            name: name.to_string(),
            value,
            bubble,
        };
        self.dispatch_event(&event).await
    }

    async fn dispatch_event(&mut self, event: &DialogEvent) -> Result<bool, DialogError> {
        let Some(instance) = self.state.stack.first() else {
            return Ok(false);
        };
        let Some(dialog) = self.find_dialog(&instance.id) else {
            return Ok(false);
        };
        dialog.on_dialog_event(self, event).await
    }

    /// Detaches the top instance and runs its cleanup hook. The hook is
    /// skipped on replacement, which is a swap rather than a completion.
    async fn end_active_dialog(&mut self, reason: DialogReason) -> Result<(), DialogError> {
        if self.state.stack.is_empty() {
            return Ok(());
        }
        let mut instance = self.state.stack.remove(0);
        if reason != DialogReason::ReplaceCalled {
            // A missing definition only blocks continuation; unwinding a
            // stale instance is always allowed.
            if let Some(dialog) = self.find_dialog(&instance.id) {
                dialog.end(self.context, &mut instance, reason).await?;
            }
            if let Some(client) = self.dialogs.telemetry() {
                client.track_dialog_end(&instance.id, reason == DialogReason::CancelCalled);
            }
        }
        tracing::debug!(
            target: "turnkit::dialogs",
            dialog_id = %instance.id,
            reason = ?reason,
            depth = self.state.stack.len(),
            event = "end_active_dialog"
        );
        Ok(())
    }

    /// Refreshes the active instance's stored version and raises
    /// `versionChanged` when the dialog's definition has drifted since the
    /// instance was begun.
    async fn check_version(&mut self) -> Result<(), DialogError> {
        let Some(instance) = self.state.stack.first() else {
            return Ok(());
        };
        let id = instance.id.clone();
        let held = instance.version.clone();
        let Some(dialog) = self.find_dialog(&id) else {
            return Ok(());
        };
        let current = dialog.version();

        match held {
            Some(held) if held != current => {
                if let Some(front) = self.state.stack.first_mut() {
                    front.version = Some(current);
                }
                tracing::warn!(
                    target: "turnkit::dialogs",
                    dialog_id = %id,
                    event = "dialog_version_changed"
                );
                self.emit_event(events::VERSION_CHANGED, Some(Value::String(id)), false)
                    .await?;
            }
            None => {
                if let Some(front) = self.state.stack.first_mut() {
                    front.version = Some(current);
                }
            }
            Some(_) => {}
        }
        Ok(())
    }
}

impl std::fmt::Debug for DialogContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DialogContext")
            .field("stack", &self.state.stack)
            .field("parents", &self.parents.len())
            .finish_non_exhaustive()
    }
}
