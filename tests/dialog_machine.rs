//! End-to-end tests for the dialog stack driven through the pipeline and
//! persisted across turns.

mod common;

use async_trait::async_trait;
use common::{RecordingAdapter, inbound_message};
use futures::future::BoxFuture;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use turnkit::adapter::{AdapterPipeline, TurnHandler};
use turnkit::dialogs::{
    Dialog, DialogContext, DialogError, DialogSet, DialogState, DialogTurnResult,
    DialogTurnStatus, WaterfallDialog, WaterfallStepInfo, run_dialog,
};
use turnkit::dialogs::telemetry::DialogTelemetry;
use turnkit::storage::{AutoSaveStateMiddleware, ConversationState, MemoryStorage};
use turnkit::turn::{TurnContext, TurnError};

const DIALOG_STATE: &str = "dialogState";

fn ask_name<'a>(
    dc: &'a mut DialogContext<'_>,
    _step: WaterfallStepInfo,
) -> BoxFuture<'a, Result<DialogTurnResult, DialogError>> {
    Box::pin(async move {
        dc.context().send_text("What is your name?").await?;
        Ok(DialogTurnResult::waiting())
    })
}

fn greet<'a>(
    dc: &'a mut DialogContext<'_>,
    step: WaterfallStepInfo,
) -> BoxFuture<'a, Result<DialogTurnResult, DialogError>> {
    Box::pin(async move {
        let name = step
            .result
            .as_ref()
            .and_then(Value::as_str)
            .unwrap_or("stranger")
            .to_string();
        dc.context().send_text(format!("Hello, {name}!")).await?;
        Ok(DialogTurnResult::complete(Some(json!(name))))
    })
}

fn greeting_set() -> DialogSet {
    let mut set = DialogSet::new();
    set.add(
        WaterfallDialog::new("greeting")
            .with_step(ask_name)
            .with_step(greet),
    )
    .unwrap();
    set
}

/// The application callback: loads the stack from conversation state, drives
/// it one turn, and stores it back for the auto-save middleware to persist.
struct DialogAgent {
    dialogs: DialogSet,
    state: ConversationState,
}

#[async_trait]
impl TurnHandler for DialogAgent {
    async fn on_turn(&self, ctx: &TurnContext) -> Result<(), TurnError> {
        let mut stack: DialogState = self
            .state
            .get(ctx, DIALOG_STATE)?
            .unwrap_or_default();
        run_dialog(&self.dialogs, "greeting", ctx, &mut stack)
            .await
            .map_err(|error| TurnError::Other(anyhow::Error::new(error)))?;
        self.state.set(ctx, DIALOG_STATE, &stack)?;
        Ok(())
    }
}

#[tokio::test]
async fn a_waterfall_survives_process_restarts_between_turns() {
    let storage = Arc::new(MemoryStorage::new());

    // Each turn builds the whole agent from scratch, as separate processes
    // sharing only the storage would.
    let run_turn = |text: &str| {
        let storage = storage.clone();
        let text = text.to_string();
        async move {
            let state = ConversationState::new(storage);
            let mut pipeline = AdapterPipeline::new();
            pipeline.use_middleware(AutoSaveStateMiddleware::new(state.clone()));
            let handler = DialogAgent {
                dialogs: greeting_set(),
                state,
            };

            let adapter = Arc::new(RecordingAdapter::new());
            let ctx = TurnContext::new(adapter.clone(), Some(inbound_message(&text)));
            pipeline.run_pipeline(&ctx, Some(&handler)).await.unwrap();
            adapter.sent_texts()
        }
    };

    assert_eq!(run_turn("hi").await, vec!["What is your name?".to_string()]);
    assert_eq!(run_turn("Alice").await, vec!["Hello, Alice!".to_string()]);

    // A third turn starts the dialog over: the completed stack was persisted
    // empty.
    assert_eq!(run_turn("hi again").await, vec!["What is your name?".to_string()]);
}

#[tokio::test]
async fn run_dialog_begins_when_the_stack_is_empty_and_continues_otherwise() {
    let set = greeting_set();
    let mut stack = DialogState::new();

    let adapter = Arc::new(RecordingAdapter::new());
    let ctx = TurnContext::new(adapter.clone(), Some(inbound_message("hi")));
    let result = run_dialog(&set, "greeting", &ctx, &mut stack).await.unwrap();
    assert_eq!(result.status, DialogTurnStatus::Waiting);

    let ctx = TurnContext::new(adapter.clone(), Some(inbound_message("Bob")));
    let result = run_dialog(&set, "greeting", &ctx, &mut stack).await.unwrap();
    assert_eq!(result.status, DialogTurnStatus::Complete);
    assert_eq!(result.result, Some(json!("Bob")));
}

#[tokio::test]
async fn continuing_an_empty_stack_reports_empty_without_failing() {
    let set = greeting_set();
    let adapter = Arc::new(RecordingAdapter::new());
    let mut stack = DialogState::new();
    let ctx = TurnContext::new(adapter, Some(inbound_message("hi")));

    let result = set
        .create_context(&ctx, &mut stack)
        .continue_dialog()
        .await
        .unwrap();
    assert_eq!(result.status, DialogTurnStatus::Empty);
}

/// A dialog whose version is configurable and which records every event it
/// is offered.
struct Probe {
    id: String,
    version: String,
    events: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Dialog for Probe {
    fn id(&self) -> &str {
        &self.id
    }

    fn version(&self) -> String {
        self.version.clone()
    }

    async fn begin(
        &self,
        _dc: &mut DialogContext<'_>,
        _options: Option<Value>,
    ) -> Result<DialogTurnResult, DialogError> {
        Ok(DialogTurnResult::waiting())
    }

    async fn continue_dialog(
        &self,
        _dc: &mut DialogContext<'_>,
    ) -> Result<DialogTurnResult, DialogError> {
        Ok(DialogTurnResult::waiting())
    }

    async fn on_dialog_event(
        &self,
        _dc: &mut DialogContext<'_>,
        event: &turnkit::dialogs::DialogEvent,
    ) -> Result<bool, DialogError> {
        self.events.lock().unwrap().push(event.name.clone());
        Ok(false)
    }
}

#[tokio::test]
async fn a_definition_change_between_turns_raises_version_changed() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let adapter = Arc::new(RecordingAdapter::new());
    let mut stack = DialogState::new();

    let mut before = DialogSet::new();
    before
        .add(Probe {
            id: "probe".to_string(),
            version: "v1".to_string(),
            events: events.clone(),
        })
        .unwrap();
    let ctx = TurnContext::new(adapter.clone(), Some(inbound_message("hi")));
    before
        .create_context(&ctx, &mut stack)
        .begin_dialog("probe", None)
        .await
        .unwrap();

    // A redeploy changes the dialog's definition.
    let mut after = DialogSet::new();
    after
        .add(Probe {
            id: "probe".to_string(),
            version: "v2".to_string(),
            events: events.clone(),
        })
        .unwrap();
    let ctx = TurnContext::new(adapter.clone(), Some(inbound_message("again")));
    let result = after
        .create_context(&ctx, &mut stack)
        .continue_dialog()
        .await
        .unwrap();

    assert_eq!(result.status, DialogTurnStatus::Waiting);
    assert_eq!(events.lock().unwrap().clone(), vec!["versionChanged"]);
    assert_eq!(
        stack.stack[0].version.as_deref(),
        Some("v2"),
        "the event fires once; the stored version is refreshed"
    );
}

#[tokio::test]
async fn continuing_against_a_removed_dialog_is_fatal() {
    let set = greeting_set();
    let adapter = Arc::new(RecordingAdapter::new());
    let mut stack = DialogState::new();

    let ctx = TurnContext::new(adapter.clone(), Some(inbound_message("hi")));
    set.create_context(&ctx, &mut stack)
        .begin_dialog("greeting", None)
        .await
        .unwrap();

    let empty = DialogSet::new();
    let ctx = TurnContext::new(adapter, Some(inbound_message("Alice")));
    let err = empty
        .create_context(&ctx, &mut stack)
        .continue_dialog()
        .await
        .unwrap_err();

    assert!(matches!(err, DialogError::MissingDialog(id) if id == "greeting"));
}

/// A dialog that re-sends its prompt on request.
struct Prompting {
    id: String,
}

#[async_trait]
impl Dialog for Prompting {
    fn id(&self) -> &str {
        &self.id
    }

    async fn begin(
        &self,
        dc: &mut DialogContext<'_>,
        _options: Option<Value>,
    ) -> Result<DialogTurnResult, DialogError> {
        dc.context().send_text("pick a color").await?;
        Ok(DialogTurnResult::waiting())
    }

    async fn reprompt(
        &self,
        ctx: &TurnContext,
        _instance: &mut turnkit::dialogs::DialogInstance,
    ) -> Result<(), DialogError> {
        ctx.send_text("pick a color").await?;
        Ok(())
    }
}

#[tokio::test]
async fn reprompt_reaches_the_active_dialog() {
    let mut set = DialogSet::new();
    set.add(Prompting {
        id: "color".to_string(),
    })
    .unwrap();

    let adapter = Arc::new(RecordingAdapter::new());
    let mut stack = DialogState::new();
    let ctx = TurnContext::new(adapter.clone(), Some(inbound_message("hi")));

    let mut dc = set.create_context(&ctx, &mut stack);
    dc.begin_dialog("color", None).await.unwrap();
    dc.reprompt_dialog().await.unwrap();

    assert_eq!(
        adapter.sent_texts(),
        vec!["pick a color".to_string(), "pick a color".to_string()]
    );
}

#[tokio::test]
async fn reprompting_an_empty_stack_is_a_no_op() {
    let set = greeting_set();
    let adapter = Arc::new(RecordingAdapter::new());
    let mut stack = DialogState::new();
    let ctx = TurnContext::new(adapter.clone(), Some(inbound_message("hi")));

    set.create_context(&ctx, &mut stack)
        .reprompt_dialog()
        .await
        .unwrap();
    assert!(adapter.sent.lock().unwrap().is_empty());
}

/// A dialog that records every invocation of its cleanup hook.
struct HookProbe {
    id: String,
    ended: Arc<Mutex<Vec<(String, String)>>>,
}

#[async_trait]
impl Dialog for HookProbe {
    fn id(&self) -> &str {
        &self.id
    }

    async fn begin(
        &self,
        _dc: &mut DialogContext<'_>,
        _options: Option<Value>,
    ) -> Result<DialogTurnResult, DialogError> {
        Ok(DialogTurnResult::waiting())
    }

    async fn end(
        &self,
        _ctx: &TurnContext,
        instance: &mut turnkit::dialogs::DialogInstance,
        reason: turnkit::dialogs::DialogReason,
    ) -> Result<(), DialogError> {
        self.ended
            .lock()
            .unwrap()
            .push((instance.id.clone(), format!("{reason:?}")));
        Ok(())
    }
}

#[tokio::test]
async fn replacement_skips_the_outgoing_dialogs_cleanup_hook() {
    let ended = Arc::new(Mutex::new(Vec::new()));
    let mut set = DialogSet::new();
    set.add(HookProbe {
        id: "first".to_string(),
        ended: ended.clone(),
    })
    .unwrap();
    set.add(HookProbe {
        id: "second".to_string(),
        ended: ended.clone(),
    })
    .unwrap();

    let adapter = Arc::new(RecordingAdapter::new());
    let mut stack = DialogState::new();
    let ctx = TurnContext::new(adapter, Some(inbound_message("hi")));

    let mut dc = set.create_context(&ctx, &mut stack);
    dc.begin_dialog("first", None).await.unwrap();
    dc.replace_dialog("second", None).await.unwrap();
    assert!(
        ended.lock().unwrap().is_empty(),
        "replacing is a swap; the outgoing dialog's hook must not run"
    );

    let result = dc.end_dialog(Some(json!("done"))).await.unwrap();
    assert_eq!(result.status, DialogTurnStatus::Complete);
    assert_eq!(
        ended.lock().unwrap().clone(),
        vec![("second".to_string(), "EndCalled".to_string())],
        "only the replacement completes; the replaced dialog never does"
    );
}

#[tokio::test]
async fn cancellation_runs_every_cleanup_hook_top_down() {
    let ended = Arc::new(Mutex::new(Vec::new()));
    let mut set = DialogSet::new();
    set.add(HookProbe {
        id: "outer".to_string(),
        ended: ended.clone(),
    })
    .unwrap();
    set.add(HookProbe {
        id: "inner".to_string(),
        ended: ended.clone(),
    })
    .unwrap();

    let adapter = Arc::new(RecordingAdapter::new());
    let mut stack = DialogState::new();
    let ctx = TurnContext::new(adapter, Some(inbound_message("hi")));

    let mut dc = set.create_context(&ctx, &mut stack);
    dc.begin_dialog("outer", None).await.unwrap();
    dc.begin_dialog("inner", None).await.unwrap();
    let result = dc.cancel_all_dialogs(None, None).await.unwrap();

    assert_eq!(result.status, DialogTurnStatus::Cancelled);
    assert_eq!(
        ended.lock().unwrap().clone(),
        vec![
            ("inner".to_string(), "CancelCalled".to_string()),
            ("outer".to_string(), "CancelCalled".to_string()),
        ]
    );
    assert!(stack.stack.is_empty());
}

#[derive(Default)]
struct RecordingTelemetry {
    begun: Mutex<Vec<String>>,
    ended: Mutex<Vec<(String, bool)>>,
}

impl DialogTelemetry for RecordingTelemetry {
    fn track_dialog_begin(&self, dialog_id: &str) {
        self.begun.lock().unwrap().push(dialog_id.to_string());
    }

    fn track_dialog_end(&self, dialog_id: &str, cancelled: bool) {
        self.ended
            .lock()
            .unwrap()
            .push((dialog_id.to_string(), cancelled));
    }
}

#[tokio::test]
async fn telemetry_sees_begin_end_and_cancellation() {
    let telemetry = Arc::new(RecordingTelemetry::default());
    let set = greeting_set();
    set.set_telemetry(telemetry.clone());

    let adapter = Arc::new(RecordingAdapter::new());
    let mut stack = DialogState::new();

    let ctx = TurnContext::new(adapter.clone(), Some(inbound_message("hi")));
    set.create_context(&ctx, &mut stack)
        .begin_dialog("greeting", None)
        .await
        .unwrap();

    let ctx = TurnContext::new(adapter.clone(), Some(inbound_message("stop")));
    set.create_context(&ctx, &mut stack)
        .cancel_all_dialogs(None, None)
        .await
        .unwrap();

    assert_eq!(telemetry.begun.lock().unwrap().clone(), vec!["greeting"]);
    assert_eq!(
        telemetry.ended.lock().unwrap().clone(),
        vec![("greeting".to_string(), true)]
    );
}
