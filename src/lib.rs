//! 'turnkit' - A turn-based engine for building conversational agents in Rust.
//!
//! This library provides the plumbing between a channel transport and your
//! conversation logic: activities in and out of a channel, a per-turn context
//! with interceptable outbound operations, a composable middleware pipeline
//! owned by the adapter, pluggable state storage, and a persisted dialog
//! stack for resumable multi-turn flows.
//!
//! The flow of one turn:
//!
//! 1. A channel adapter receives an inbound [`Activity`] and builds a
//!    [`TurnContext`] for it.
//! 2. The adapter's middleware pipeline runs, each middleware wrapping the
//!    rest of the chain, ending in the application's turn handler.
//! 3. The handler (often via the dialog machine in [`dialogs`]) sends
//!    activities back through the context, which routes them through
//!    dynamically registered send handlers before they reach the transport.

pub mod activity;
pub mod adapter;
pub mod dialogs;
pub mod identity;
pub mod observability;
pub mod storage;
pub mod turn;

pub use activity::{
    Activity, ActivityType, ConversationReference, DeliveryMode, ExpectedReplies, InvokeResponse,
    ResourceResponse,
};
pub use adapter::{
    AdapterPipeline, ChannelAdapter, ChannelServiceAdapter, ConnectorClient, ConnectorFactory,
    Middleware, MiddlewareSet, Next, TurnErrorHandler, TurnHandler,
};
pub use dialogs::{
    ComponentDialog, Dialog, DialogContext, DialogError, DialogSet, DialogState, DialogTurnResult,
    DialogTurnStatus, WaterfallDialog, WaterfallStepInfo, run_dialog,
};
pub use identity::ClaimsIdentity;
pub use storage::{
    AutoSaveStateMiddleware, ConversationState, MemoryStorage, Storage, StorageError, StoreItem,
};
pub use turn::{TurnContext, TurnError};
