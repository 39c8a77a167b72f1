//! The channel-service adapter: translates pipeline turns into connector
//! operations.
//!
//! This adapter resolves a [`ConnectorClient`] per turn from the caller's
//! claims identity, creates the [`TurnContext`], and implements the
//! request/response conventions channels depend on: invoke turns return a
//! buffered [`InvokeResponse`], and expect-replies turns buffer every
//! outbound activity into a single [`ExpectedReplies`] body instead of
//! sending them individually.

use crate::activity::{
    Activity, ActivityType, ConversationAccount, ConversationReference,
    ConversationResourceResponse, DeliveryMode, ExpectedReplies, InvokeResponse,
    ResourceResponse,
};
use crate::identity::ClaimsIdentity;
use crate::turn::{TurnContext, TurnError};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use super::{AdapterPipeline, ChannelAdapter, Middleware, TurnErrorHandler, TurnHandler};

/// Keys the adapter uses in the turn's service and stack-state bags.
pub mod keys {
    /// The per-turn [`super::ConnectorClient`] (services bag).
    pub const CONNECTOR_CLIENT: &str = "turnkit.connectorClient";
    /// The caller's [`crate::identity::ClaimsIdentity`] (services bag).
    pub const CLAIMS_IDENTITY: &str = "turnkit.claimsIdentity";
    /// The conversation reference of a proactive turn (services bag).
    pub const CONVERSATION_REFERENCE: &str = "turnkit.conversationReference";
    /// Activities buffered for an expect-replies turn (stack-state bag).
    pub const BUFFERED_REPLIES: &str = "turnkit.bufferedReplies";
    /// The invoke-response activity produced during an invoke turn
    /// (stack-state bag).
    pub const INVOKE_RESPONSE: &str = "turnkit.invokeResponse";
}

/// The channel transport collaborator: HTTP-like conversation operations
/// resolved per turn.
#[async_trait]
pub trait ConnectorClient: Send + Sync {
    async fn send_to_conversation(
        &self,
        conversation_id: &str,
        activity: &Activity,
    ) -> Result<ResourceResponse, TurnError>;

    async fn reply_to_activity(
        &self,
        conversation_id: &str,
        activity_id: &str,
        activity: &Activity,
    ) -> Result<ResourceResponse, TurnError>;

    async fn update_activity(
        &self,
        conversation_id: &str,
        activity_id: &str,
        activity: &Activity,
    ) -> Result<ResourceResponse, TurnError>;

    async fn delete_activity(
        &self,
        conversation_id: &str,
        activity_id: &str,
    ) -> Result<(), TurnError>;

    async fn create_conversation(
        &self,
        parameters: &Value,
    ) -> Result<ConversationResourceResponse, TurnError>;
}

/// Resolves a connector client for a turn given the verified caller identity,
/// the channel's service URL, and the audience outbound calls present.
#[async_trait]
pub trait ConnectorFactory: Send + Sync {
    async fn create(
        &self,
        identity: &ClaimsIdentity,
        service_url: &str,
        audience: &str,
    ) -> Result<Arc<dyn ConnectorClient>, TurnError>;
}

/// A concrete adapter speaking the channel-service conventions.
///
/// Configure middleware and the error handler before wrapping the adapter in
/// an `Arc`; turns are then processed through [`ChannelServiceAdapter::process_activity`]
/// and [`ChannelServiceAdapter::continue_conversation`].
pub struct ChannelServiceAdapter {
    pipeline: AdapterPipeline,
    connectors: Arc<dyn ConnectorFactory>,
}

impl ChannelServiceAdapter {
    pub fn new(connectors: Arc<dyn ConnectorFactory>) -> Self {
        Self {
            pipeline: AdapterPipeline::new(),
            connectors,
        }
    }

    /// Appends a middleware to the adapter's pipeline.
    pub fn use_middleware(&mut self, middleware: impl Middleware + 'static) -> &mut Self {
        self.pipeline.use_middleware(middleware);
        self
    }

    /// Registers the turn-level error handler.
    pub fn set_on_turn_error(&mut self, handler: Arc<dyn TurnErrorHandler>) -> &mut Self {
        self.pipeline.set_on_turn_error(handler);
        self
    }

    /// The adapter's pipeline, for direct use in tests and hosts.
    pub fn pipeline(&self) -> &AdapterPipeline {
        &self.pipeline
    }

    /// Processes one inbound activity end to end: resolves the connector,
    /// creates the turn context, runs the pipeline, and packages the reply.
    ///
    /// Returns `Some(InvokeResponse)` for invoke turns and for turns whose
    /// inbound activity used [`DeliveryMode::ExpectReplies`]; `None`
    /// otherwise.
    pub async fn process_activity(
        self: &Arc<Self>,
        identity: ClaimsIdentity,
        activity: Activity,
        callback: &dyn TurnHandler,
    ) -> Result<Option<InvokeResponse>, TurnError> {
        let activity_type = activity.activity_type;
        let delivery_mode = activity.delivery_mode;
        let service_url = activity.service_url.clone().unwrap_or_default();
        let audience = identity.outgoing_app_id().unwrap_or_default().to_string();

        let connector = self
            .connectors
            .create(&identity, &service_url, &audience)
            .await?;

        let ctx = TurnContext::new(self.clone() as Arc<dyn ChannelAdapter>, Some(activity));
        ctx.services().set(keys::CONNECTOR_CLIENT, connector);
        ctx.services().set(keys::CLAIMS_IDENTITY, identity);

        tracing::info!(
            target: "turnkit::adapter",
            activity_type = ?activity_type,
            delivery_mode = ?delivery_mode,
            event = "process_activity"
        );
        self.pipeline.run_pipeline(&ctx, Some(callback)).await?;

        if delivery_mode == DeliveryMode::ExpectReplies {
            let activities = ctx
                .stack_state()
                .get::<Mutex<Vec<Activity>>>(keys::BUFFERED_REPLIES)
                .map(|buffer| match buffer.lock() {
                    Ok(guard) => guard.clone(),
                    Err(poisoned) => poisoned.into_inner().clone(),
                })
                .unwrap_or_default();
            let body = serde_json::to_value(ExpectedReplies { activities })?;
            return Ok(Some(InvokeResponse::new(200, Some(body))));
        }

        if activity_type == ActivityType::Invoke {
            return match ctx.stack_state().get::<Activity>(keys::INVOKE_RESPONSE) {
                Some(reply) => {
                    let value = reply.value.clone().unwrap_or(Value::Null);
                    let response: InvokeResponse = serde_json::from_value(value)?;
                    Ok(Some(response))
                }
                // The handler never produced an invoke response.
                None => Ok(Some(InvokeResponse::new(501, None))),
            };
        }

        Ok(None)
    }

    /// Runs a proactive turn against a previously captured conversation
    /// reference. The context carries no inbound activity, so the middleware
    /// chain is skipped and `callback` runs directly.
    pub async fn continue_conversation(
        self: &Arc<Self>,
        identity: ClaimsIdentity,
        reference: ConversationReference,
        callback: &dyn TurnHandler,
    ) -> Result<(), TurnError> {
        let service_url = reference.service_url.clone().unwrap_or_default();
        let audience = identity.outgoing_app_id().unwrap_or_default().to_string();
        let connector = self
            .connectors
            .create(&identity, &service_url, &audience)
            .await?;

        let ctx = TurnContext::new(self.clone() as Arc<dyn ChannelAdapter>, None);
        ctx.services().set(keys::CONNECTOR_CLIENT, connector);
        ctx.services().set(keys::CLAIMS_IDENTITY, identity);
        ctx.services().set(keys::CONVERSATION_REFERENCE, reference);

        tracing::info!(target: "turnkit::adapter", event = "continue_conversation");
        self.pipeline.run_pipeline(&ctx, Some(callback)).await
    }

    /// Creates a conversation on the channel and runs a proactive turn bound
    /// to it.
    pub async fn create_conversation(
        self: &Arc<Self>,
        identity: ClaimsIdentity,
        channel_id: &str,
        service_url: &str,
        parameters: Value,
        callback: &dyn TurnHandler,
    ) -> Result<ConversationReference, TurnError> {
        let audience = identity.outgoing_app_id().unwrap_or_default().to_string();
        let connector = self
            .connectors
            .create(&identity, service_url, &audience)
            .await?;
        let resource = connector.create_conversation(&parameters).await?;

        let reference = ConversationReference {
            activity_id: resource.activity_id.clone(),
            user: None,
            agent: None,
            conversation: Some(ConversationAccount::new(resource.id.clone())),
            channel_id: Some(channel_id.to_string()),
            service_url: resource
                .service_url
                .clone()
                .or_else(|| Some(service_url.to_string())),
        };

        tracing::info!(
            target: "turnkit::adapter",
            conversation_id = %resource.id,
            event = "create_conversation"
        );
        self.continue_conversation(identity, reference.clone(), callback)
            .await?;
        Ok(reference)
    }

    fn connector_for(&self, ctx: &TurnContext) -> Result<Arc<Arc<dyn ConnectorClient>>, TurnError> {
        ctx.services()
            .get::<Arc<dyn ConnectorClient>>(keys::CONNECTOR_CLIENT)
            .ok_or_else(|| {
                TurnError::Transport("no connector client resolved for this turn".to_string())
            })
    }

    fn conversation_id(activity: &Activity) -> Result<&str, TurnError> {
        activity
            .conversation
            .as_ref()
            .map(|conversation| conversation.id.as_str())
            .ok_or_else(|| {
                TurnError::InvalidArgument(
                    "the outbound activity carries no conversation id".to_string(),
                )
            })
    }

    fn is_expect_replies(ctx: &TurnContext) -> bool {
        ctx.activity()
            .map(|activity| activity.delivery_mode == DeliveryMode::ExpectReplies)
            .unwrap_or(false)
    }
}

#[async_trait]
impl ChannelAdapter for ChannelServiceAdapter {
    async fn send_activities(
        &self,
        ctx: &TurnContext,
        activities: &[Activity],
    ) -> Result<Vec<ResourceResponse>, TurnError> {
        let mut responses = Vec::with_capacity(activities.len());
        let expect_replies = Self::is_expect_replies(ctx);

        for activity in activities {
            if activity.activity_type == ActivityType::InvokeResponse {
                // Buffered for the host to return as the invoke body, never
                // sent to the transport.
                ctx.stack_state().set(keys::INVOKE_RESPONSE, activity.clone());
                responses.push(ResourceResponse::new(Uuid::new_v4().to_string()));
                continue;
            }

            if expect_replies {
                let buffer = ctx
                    .stack_state()
                    .get_or_insert_with(keys::BUFFERED_REPLIES, || {
                        Mutex::new(Vec::<Activity>::new())
                    });
                match buffer.lock() {
                    Ok(mut guard) => guard.push(activity.clone()),
                    Err(poisoned) => poisoned.into_inner().push(activity.clone()),
                }
                responses.push(ResourceResponse::new(Uuid::new_v4().to_string()));
                continue;
            }

            let connector = self.connector_for(ctx)?;
            let conversation_id = Self::conversation_id(activity)?;
            let response = match &activity.reply_to_id {
                Some(reply_to_id) => {
                    connector
                        .reply_to_activity(conversation_id, reply_to_id, activity)
                        .await?
                }
                None => {
                    connector
                        .send_to_conversation(conversation_id, activity)
                        .await?
                }
            };
            responses.push(response);
        }

        Ok(responses)
    }

    async fn update_activity(
        &self,
        ctx: &TurnContext,
        activity: &Activity,
    ) -> Result<ResourceResponse, TurnError> {
        let connector = self.connector_for(ctx)?;
        let conversation_id = Self::conversation_id(activity)?;
        let activity_id = activity.id.as_deref().ok_or_else(|| {
            TurnError::InvalidArgument("an activity id is required to update".to_string())
        })?;
        connector
            .update_activity(conversation_id, activity_id, activity)
            .await
    }

    async fn delete_activity(
        &self,
        ctx: &TurnContext,
        reference: &ConversationReference,
    ) -> Result<(), TurnError> {
        let connector = self.connector_for(ctx)?;
        let conversation_id = reference
            .conversation
            .as_ref()
            .map(|conversation| conversation.id.as_str())
            .ok_or_else(|| {
                TurnError::InvalidArgument(
                    "the conversation reference carries no conversation id".to_string(),
                )
            })?;
        let activity_id = reference.activity_id.as_deref().ok_or_else(|| {
            TurnError::InvalidArgument("an activity id is required to delete".to_string())
        })?;
        connector.delete_activity(conversation_id, activity_id).await
    }
}
