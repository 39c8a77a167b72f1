//! Shared mocks for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use turnkit::activity::{
    Activity, ConversationReference, ConversationResourceResponse, ResourceResponse,
};
use turnkit::adapter::{ChannelAdapter, ConnectorClient, ConnectorFactory};
use turnkit::identity::ClaimsIdentity;
use turnkit::turn::{TurnContext, TurnError};

/// A transport that records everything it is asked to deliver.
#[derive(Default)]
pub struct RecordingAdapter {
    pub sent: Mutex<Vec<Activity>>,
    pub updated: Mutex<Vec<Activity>>,
    pub deleted: Mutex<Vec<ConversationReference>>,
    counter: AtomicUsize,
}

impl RecordingAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|activity| activity.text.clone())
            .collect()
    }

    fn next_id(&self) -> String {
        format!("sent-{}", self.counter.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl ChannelAdapter for RecordingAdapter {
    async fn send_activities(
        &self,
        _ctx: &TurnContext,
        activities: &[Activity],
    ) -> Result<Vec<ResourceResponse>, TurnError> {
        let mut sent = self.sent.lock().unwrap();
        let mut responses = Vec::with_capacity(activities.len());
        for activity in activities {
            sent.push(activity.clone());
            responses.push(ResourceResponse::new(self.next_id()));
        }
        Ok(responses)
    }

    async fn update_activity(
        &self,
        _ctx: &TurnContext,
        activity: &Activity,
    ) -> Result<ResourceResponse, TurnError> {
        self.updated.lock().unwrap().push(activity.clone());
        Ok(ResourceResponse::new(
            activity.id.clone().unwrap_or_default(),
        ))
    }

    async fn delete_activity(
        &self,
        _ctx: &TurnContext,
        reference: &ConversationReference,
    ) -> Result<(), TurnError> {
        self.deleted.lock().unwrap().push(reference.clone());
        Ok(())
    }
}

/// Records every connector call made during a turn.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectorCall {
    SendToConversation {
        conversation_id: String,
        text: Option<String>,
    },
    ReplyToActivity {
        conversation_id: String,
        activity_id: String,
        text: Option<String>,
    },
    UpdateActivity {
        conversation_id: String,
        activity_id: String,
    },
    DeleteActivity {
        conversation_id: String,
        activity_id: String,
    },
    CreateConversation,
}

#[derive(Default)]
pub struct MockConnector {
    pub calls: Mutex<Vec<ConnectorCall>>,
    counter: AtomicUsize,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<ConnectorCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: ConnectorCall) -> ResourceResponse {
        self.calls.lock().unwrap().push(call);
        ResourceResponse::new(format!(
            "resource-{}",
            self.counter.fetch_add(1, Ordering::SeqCst)
        ))
    }
}

#[async_trait]
impl ConnectorClient for MockConnector {
    async fn send_to_conversation(
        &self,
        conversation_id: &str,
        activity: &Activity,
    ) -> Result<ResourceResponse, TurnError> {
        Ok(self.record(ConnectorCall::SendToConversation {
            conversation_id: conversation_id.to_string(),
            text: activity.text.clone(),
        }))
    }

    async fn reply_to_activity(
        &self,
        conversation_id: &str,
        activity_id: &str,
        activity: &Activity,
    ) -> Result<ResourceResponse, TurnError> {
        Ok(self.record(ConnectorCall::ReplyToActivity {
            conversation_id: conversation_id.to_string(),
            activity_id: activity_id.to_string(),
            text: activity.text.clone(),
        }))
    }

    async fn update_activity(
        &self,
        conversation_id: &str,
        activity_id: &str,
        _activity: &Activity,
    ) -> Result<ResourceResponse, TurnError> {
        Ok(self.record(ConnectorCall::UpdateActivity {
            conversation_id: conversation_id.to_string(),
            activity_id: activity_id.to_string(),
        }))
    }

    async fn delete_activity(
        &self,
        conversation_id: &str,
        activity_id: &str,
    ) -> Result<(), TurnError> {
        self.record(ConnectorCall::DeleteActivity {
            conversation_id: conversation_id.to_string(),
            activity_id: activity_id.to_string(),
        });
        Ok(())
    }

    async fn create_conversation(
        &self,
        _parameters: &Value,
    ) -> Result<ConversationResourceResponse, TurnError> {
        self.record(ConnectorCall::CreateConversation);
        Ok(ConversationResourceResponse {
            id: "conv-new".to_string(),
            activity_id: Some("act-new".to_string()),
            service_url: Some("https://channel.example".to_string()),
        })
    }
}

/// Hands out one shared [`MockConnector`] regardless of identity.
pub struct MockFactory {
    pub connector: Arc<MockConnector>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self {
            connector: Arc::new(MockConnector::new()),
        }
    }
}

#[async_trait]
impl ConnectorFactory for MockFactory {
    async fn create(
        &self,
        _identity: &ClaimsIdentity,
        _service_url: &str,
        _audience: &str,
    ) -> Result<Arc<dyn ConnectorClient>, TurnError> {
        Ok(self.connector.clone() as Arc<dyn ConnectorClient>)
    }
}

/// An inbound message with full routing fields, as a channel would deliver.
pub fn inbound_message(text: &str) -> Activity {
    let mut activity = Activity::message(text);
    activity.id = Some("inbound-1".to_string());
    activity.channel_id = Some("test".to_string());
    activity.service_url = Some("https://channel.example".to_string());
    activity.conversation = Some(turnkit::activity::ConversationAccount::new("conv-1"));
    activity.from = Some(turnkit::activity::ChannelAccount::new("user-1"));
    activity.recipient = Some(turnkit::activity::ChannelAccount::new("agent-1"));
    activity
}
