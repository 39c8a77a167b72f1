//! Resumable multi-turn conversation logic as a persisted dialog stack.
//!
//! A dialog is a unit of conversational logic with a begin/continue/resume/
//! end lifecycle. Active dialogs live on a stack ([`DialogState`]) that is
//! loaded from storage at the start of a turn, mutated in place through a
//! [`DialogContext`], and persisted again at turn end by the surrounding
//! state middleware. The front of the stack is the only dialog whose step
//! logic runs in a given continuation; deeper instances are reached only by
//! explicit end/cancel unwinding.

pub mod container;
pub mod context;
pub mod error;
pub mod set;
pub mod telemetry;
pub mod waterfall;

pub use container::ComponentDialog;
pub use context::DialogContext;
pub use error::DialogError;
pub use set::DialogSet;
pub use telemetry::{DialogTelemetry, TracingTelemetry};
pub use waterfall::{WaterfallDialog, WaterfallStepInfo};

use crate::turn::TurnContext;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;

/// Well-known dialog event names.
pub mod events {
    /// Asks the active dialog to re-send its last prompt.
    pub const REPROMPT_DIALOG: &str = "repromptDialog";
    /// The dialog graph changed between turns; a persisted instance was
    /// begun against a different dialog definition than the one resuming it.
    pub const VERSION_CHANGED: &str = "versionChanged";
}

/// How far the dialog stack got this turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DialogTurnStatus {
    /// The stack was empty; nothing ran.
    Empty,
    /// The active dialog is parked, waiting for the next inbound activity.
    Waiting,
    /// The last dialog on the stack completed, carrying its result.
    Complete,
    /// The stack was cancelled.
    Cancelled,
}

/// The outcome of a dialog stack operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogTurnResult {
    pub status: DialogTurnStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl DialogTurnResult {
    pub fn empty() -> Self {
        Self {
            status: DialogTurnStatus::Empty,
            result: None,
        }
    }

    /// End of turn: the dialog is waiting for more input.
    pub fn waiting() -> Self {
        Self {
            status: DialogTurnStatus::Waiting,
            result: None,
        }
    }

    pub fn complete(result: Option<Value>) -> Self {
        Self {
            status: DialogTurnStatus::Complete,
            result,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            status: DialogTurnStatus::Cancelled,
            result: None,
        }
    }
}

/// Why a dialog lifecycle method is being invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DialogReason {
    BeginCalled,
    ContinueCalled,
    EndCalled,
    ReplaceCalled,
    CancelCalled,
}

/// An event raised through the dialog hierarchy.
///
/// Containers see events for their inner stacks via
/// [`Dialog::on_dialog_event`] and may handle them, which halts further
/// propagation.
#[derive(Debug, Clone, PartialEq)]
pub struct DialogEvent {
    pub name: String,
    pub value: Option<Value>,
    /// Whether the event should continue to deeper containers when the
    /// receiving dialog leaves it unhandled.
    pub bubble: bool,
}

/// One entry on the dialog stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogInstance {
    /// Id of the dialog this instance was begun from.
    pub id: String,
    /// The dialog's own persisted state bag.
    #[serde(default)]
    pub state: Map<String, Value>,
    /// The dialog's version string at begin time, compared on resume to
    /// detect definition changes across deploys.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl DialogInstance {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: Map::new(),
            version: None,
        }
    }
}

/// The persisted root of the dialog machine: the stack of active dialog
/// instances, most-recent-active first (index 0 is the top).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DialogState {
    #[serde(default)]
    pub stack: Vec<DialogInstance>,
}

impl DialogState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }
}

/// A resumable unit of multi-turn conversational logic.
#[async_trait]
pub trait Dialog: Send + Sync {
    /// The id this dialog registers under.
    fn id(&self) -> &str;

    /// A version string hashed into the owning set's version. The default is
    /// the dialog id; dialogs whose behavior depends on more than their id
    /// (step lists, child sets) fold that in so definition changes are
    /// detected across turns.
    fn version(&self) -> String {
        self.id().to_string()
    }

    /// Starts the dialog. The instance is already on the stack front.
    async fn begin(
        &self,
        dc: &mut DialogContext<'_>,
        options: Option<Value>,
    ) -> Result<DialogTurnResult, DialogError>;

    /// Processes the next inbound activity for an already-active dialog.
    /// The default parks the dialog until something resumes it.
    async fn continue_dialog(
        &self,
        dc: &mut DialogContext<'_>,
    ) -> Result<DialogTurnResult, DialogError> {
        let _ = dc;
        Ok(DialogTurnResult::waiting())
    }

    /// Resumes this dialog after a child above it on the stack ended,
    /// carrying the child's result. The default ends this dialog too,
    /// bubbling the result further down the stack.
    async fn resume(
        &self,
        dc: &mut DialogContext<'_>,
        reason: DialogReason,
        result: Option<Value>,
    ) -> Result<DialogTurnResult, DialogError> {
        let _ = reason;
        dc.end_dialog(result).await
    }

    /// Cleanup hook invoked when the instance is ended or cancelled. The
    /// instance has already been detached from the stack.
    async fn end(
        &self,
        ctx: &TurnContext,
        instance: &mut DialogInstance,
        reason: DialogReason,
    ) -> Result<(), DialogError> {
        let _ = (ctx, instance, reason);
        Ok(())
    }

    /// Asks the dialog to re-send its last prompt.
    async fn reprompt(
        &self,
        ctx: &TurnContext,
        instance: &mut DialogInstance,
    ) -> Result<(), DialogError> {
        let _ = (ctx, instance);
        Ok(())
    }

    /// Offers the dialog an event raised on its context. Returning `true`
    /// marks the event handled and halts propagation.
    async fn on_dialog_event(
        &self,
        dc: &mut DialogContext<'_>,
        event: &DialogEvent,
    ) -> Result<bool, DialogError> {
        let _ = (dc, event);
        Ok(false)
    }

    /// Pushes a telemetry client through the dialog graph. Containers
    /// recurse into their children; `visited` guards against cycles in
    /// container graphs that register each other.
    fn propagate_telemetry(
        &self,
        client: &Arc<dyn DialogTelemetry>,
        visited: &mut HashSet<String>,
    ) {
        let _ = (client, visited);
    }
}

/// Drives the stack for one turn: continue the active dialog, or begin
/// `dialog_id` when the stack is empty.
pub async fn run_dialog(
    dialogs: &DialogSet,
    dialog_id: &str,
    ctx: &TurnContext,
    state: &mut DialogState,
) -> Result<DialogTurnResult, DialogError> {
    let mut dc = dialogs.create_context(ctx, state);
    let result = dc.continue_dialog().await?;
    if result.status == DialogTurnStatus::Empty {
        dc.begin_dialog(dialog_id, None).await
    } else {
        Ok(result)
    }
}
