//! Sequential multi-step dialogs.

use super::context::DialogContext;
use super::error::DialogError;
use super::{Dialog, DialogReason, DialogTurnResult, DialogTurnStatus};
use crate::activity::ActivityType;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::{Value, json};
use std::sync::Arc;

const STEP_INDEX: &str = "stepIndex";
const OPTIONS: &str = "options";

/// One step of a [`WaterfallDialog`].
///
/// Steps are plain functions returning a boxed future:
///
/// ```ignore
/// fn ask_name<'a>(
///     dc: &'a mut DialogContext<'_>,
///     step: WaterfallStepInfo,
/// ) -> BoxFuture<'a, Result<DialogTurnResult, DialogError>> {
///     Box::pin(async move {
///         dc.context().send_text("What is your name?").await?;
///         Ok(DialogTurnResult::waiting())
///     })
/// }
/// ```
pub type WaterfallStep = Arc<
    dyn for<'a, 'b> Fn(
            &'a mut DialogContext<'b>,
            WaterfallStepInfo,
        ) -> BoxFuture<'a, Result<DialogTurnResult, DialogError>>
        + Send
        + Sync,
>;

/// Everything a waterfall step sees about its invocation.
#[derive(Debug, Clone)]
pub struct WaterfallStepInfo {
    /// Zero-based index of the running step.
    pub index: usize,
    /// Why the step is running.
    pub reason: DialogReason,
    /// The options the waterfall was begun with.
    pub options: Option<Value>,
    /// The previous step's outcome: the inbound activity's value or text on
    /// continuation, or a child dialog's result on resumption.
    pub result: Option<Value>,
}

/// A dialog that runs an ordered list of steps, advancing one step per
/// resumption.
///
/// Each inbound message (and each child dialog completion) moves the
/// waterfall to its next step. The step index lives in the instance's
/// persisted state, so a waterfall survives process restarts mid-sequence.
/// Running past the last step ends the dialog with the final result.
pub struct WaterfallDialog {
    id: String,
    steps: Vec<WaterfallStep>,
}

impl WaterfallDialog {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            steps: Vec::new(),
        }
    }

    /// Appends a step. Steps run in the order they were added.
    pub fn add_step<F>(&mut self, step: F) -> &mut Self
    where
        F: for<'a, 'b> Fn(
                &'a mut DialogContext<'b>,
                WaterfallStepInfo,
            ) -> BoxFuture<'a, Result<DialogTurnResult, DialogError>>
            + Send
            + Sync
            + 'static,
    {
        self.steps.push(Arc::new(step));
        self
    }

    /// Builder form of [`WaterfallDialog::add_step`].
    pub fn with_step<F>(mut self, step: F) -> Self
    where
        F: for<'a, 'b> Fn(
                &'a mut DialogContext<'b>,
                WaterfallStepInfo,
            ) -> BoxFuture<'a, Result<DialogTurnResult, DialogError>>
            + Send
            + Sync
            + 'static,
    {
        self.add_step(step);
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    async fn run_step(
        &self,
        dc: &mut DialogContext<'_>,
        index: usize,
        reason: DialogReason,
        result: Option<Value>,
    ) -> Result<DialogTurnResult, DialogError> {
        if index >= self.steps.len() {
            return dc.end_dialog(result).await;
        }

        let options = {
            let instance = dc.active_dialog_mut().ok_or_else(|| {
                DialogError::State("waterfall step with no active dialog instance".to_string())
            })?;
            instance.state.insert(STEP_INDEX.to_string(), json!(index));
            instance.state.get(OPTIONS).cloned()
        };

        tracing::trace!(
            target: "turnkit::dialogs",
            dialog_id = %self.id,
            step = index,
            reason = ?reason,
            event = "waterfall_step"
        );
        let step = self.steps[index].clone();
        let info = WaterfallStepInfo {
            index,
            reason,
            options,
            result,
        };
        let depth = dc.state().stack.len();
        let outcome = step(dc, info).await?;

        // A step may finish the waterfall by returning a terminal status
        // instead of calling `end_dialog` itself. The instance is still on
        // the stack front in that case; detach it and resume whatever is
        // underneath with the step's result.
        if matches!(
            outcome.status,
            DialogTurnStatus::Complete | DialogTurnStatus::Cancelled
        ) && dc.state().stack.len() == depth
            && dc.active_dialog().is_some_and(|instance| instance.id == self.id)
        {
            return dc.end_dialog(outcome.result).await;
        }
        Ok(outcome)
    }

    fn stored_index(&self, dc: &DialogContext<'_>) -> usize {
        dc.active_dialog()
            .and_then(|instance| instance.state.get(STEP_INDEX))
            .and_then(Value::as_u64)
            .map(|index| index as usize)
            .unwrap_or(0)
    }
}

#[async_trait]
impl Dialog for WaterfallDialog {
    fn id(&self) -> &str {
        &self.id
    }

    /// Folds the step count in, so adding or removing a step between deploys
    /// is detected on resumption.
    fn version(&self) -> String {
        format!("{}:{}", self.id, self.steps.len())
    }

    async fn begin(
        &self,
        dc: &mut DialogContext<'_>,
        options: Option<Value>,
    ) -> Result<DialogTurnResult, DialogError> {
        if let Some(options) = options
            && let Some(instance) = dc.active_dialog_mut()
        {
            instance.state.insert(OPTIONS.to_string(), options);
        }
        self.run_step(dc, 0, DialogReason::BeginCalled, None).await
    }

    async fn continue_dialog(
        &self,
        dc: &mut DialogContext<'_>,
    ) -> Result<DialogTurnResult, DialogError> {
        // Only messages advance the sequence; other activity types end the
        // turn with the waterfall still parked on its current step.
        let Some(activity) = dc.context().activity() else {
            return Ok(DialogTurnResult::waiting());
        };
        if activity.activity_type != ActivityType::Message {
            return Ok(DialogTurnResult::waiting());
        }
        let result = activity
            .value
            .clone()
            .or_else(|| activity.text.clone().map(Value::String));
        self.resume(dc, DialogReason::ContinueCalled, result).await
    }

    async fn resume(
        &self,
        dc: &mut DialogContext<'_>,
        reason: DialogReason,
        result: Option<Value>,
    ) -> Result<DialogTurnResult, DialogError> {
        let next_index = self.stored_index(dc) + 1;
        self.run_step(dc, next_index, reason, result).await
    }
}
