//! The activity data model shared by channels, adapters, and dialogs.
//!
//! An [`Activity`] is the single unit of conversation exchange: a user message,
//! a channel event, an invoke request, or a diagnostic trace. Activities are
//! deliberately schema-light; channel-specific payloads travel in the opaque
//! `value` field as JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The kind of conversation exchange an [`Activity`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActivityType {
    /// A user-visible message.
    Message,
    /// A channel- or application-defined event.
    Event,
    /// A request/response style call that expects an [`InvokeResponse`].
    Invoke,
    /// The reply to an invoke, buffered by the adapter rather than sent.
    InvokeResponse,
    /// A diagnostic trace. Traces never mark a turn as responded.
    Trace,
    /// A typing indicator.
    Typing,
    /// Signals the end of a conversation.
    EndOfConversation,
    /// Membership or metadata changes on the conversation.
    ConversationUpdate,
}

/// How outbound activities produced during a turn are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeliveryMode {
    /// Each activity is sent to the channel individually.
    #[default]
    Normal,
    /// Activities are buffered for the turn and returned as a single
    /// [`InvokeResponse`] carrying [`ExpectedReplies`].
    ExpectReplies,
    /// Activities are streamed to the channel as they are produced.
    Stream,
}

/// A user or agent account on a channel.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelAccount {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChannelAccount {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }
}

/// Identifies a conversation on a channel.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationAccount {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ConversationAccount {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }
}

/// A single inbound or outbound unit of conversation exchange.
///
/// # Design Notes
///
/// - `id` is assigned by the channel transport. It is cleared before every
///   outbound send attempt and reassigned from the transport's response.
/// - Routing fields (`channel_id`, `service_url`, `conversation`) are rebound
///   from the inbound activity's [`ConversationReference`] before an outbound
///   send, so replies always target the correct conversation regardless of
///   what the caller populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    #[serde(rename = "type")]
    pub activity_type: ActivityType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Event/invoke name, or the trace name for trace activities.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Descriptive label for trace activities.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Opaque channel- or application-specific payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation: Option<ConversationAccount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<ChannelAccount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient: Option<ChannelAccount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
    #[serde(default)]
    pub delivery_mode: DeliveryMode,
}

impl Activity {
    /// Creates an activity of the given type with all other fields empty.
    pub fn new(activity_type: ActivityType) -> Self {
        Self {
            activity_type,
            id: None,
            text: None,
            name: None,
            label: None,
            value: None,
            channel_id: None,
            service_url: None,
            conversation: None,
            from: None,
            recipient: None,
            reply_to_id: None,
            delivery_mode: DeliveryMode::Normal,
        }
    }

    /// Creates a message activity with the given text.
    pub fn message(text: impl Into<String>) -> Self {
        let mut activity = Self::new(ActivityType::Message);
        activity.text = Some(text.into());
        activity
    }

    /// Creates an event activity with the given name.
    pub fn event(name: impl Into<String>) -> Self {
        let mut activity = Self::new(ActivityType::Event);
        activity.name = Some(name.into());
        activity
    }

    /// Creates an invoke activity with the given name.
    pub fn invoke(name: impl Into<String>) -> Self {
        let mut activity = Self::new(ActivityType::Invoke);
        activity.name = Some(name.into());
        activity
    }

    /// Creates a trace activity carrying a diagnostic value.
    pub fn trace(
        name: impl Into<String>,
        value: Option<Value>,
        label: Option<String>,
    ) -> Self {
        let mut activity = Self::new(ActivityType::Trace);
        activity.name = Some(name.into());
        activity.value = value;
        activity.label = label;
        activity
    }

    /// Returns true for trace activities.
    pub fn is_trace(&self) -> bool {
        self.activity_type == ActivityType::Trace
    }

    /// Creates a reply to this activity, addressed back to its sender.
    pub fn create_reply(&self, text: impl Into<String>) -> Activity {
        let mut reply = Activity::message(text);
        reply.apply_conversation_reference(&self.get_conversation_reference(), false);
        reply
    }

    /// Captures the routing fields of this activity as a reusable reference.
    pub fn get_conversation_reference(&self) -> ConversationReference {
        ConversationReference {
            activity_id: self.id.clone(),
            user: self.from.clone(),
            agent: self.recipient.clone(),
            conversation: self.conversation.clone(),
            channel_id: self.channel_id.clone(),
            service_url: self.service_url.clone(),
        }
    }

    /// Rebinds this activity's routing fields from a conversation reference.
    ///
    /// With `is_incoming` false (the outbound direction) the sender/recipient
    /// roles are swapped and `reply_to_id` is taken from the reference's
    /// activity id.
    pub fn apply_conversation_reference(
        &mut self,
        reference: &ConversationReference,
        is_incoming: bool,
    ) -> &mut Self {
        self.channel_id = reference.channel_id.clone();
        self.service_url = reference.service_url.clone();
        self.conversation = reference.conversation.clone();

        if is_incoming {
            self.from = reference.user.clone();
            self.recipient = reference.agent.clone();
            if let Some(id) = &reference.activity_id {
                self.id = Some(id.clone());
            }
        } else {
            self.from = reference.agent.clone();
            self.recipient = reference.user.clone();
            if let Some(id) = &reference.activity_id {
                self.reply_to_id = Some(id.clone());
            }
        }
        self
    }
}

/// The routing fields needed to address a conversation later: resuming a
/// proactive conversation, replying, or deleting a previous activity.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationReference {
    /// Id of the activity this reference was captured from, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<ChannelAccount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<ChannelAccount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation: Option<ConversationAccount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_url: Option<String>,
}

/// The transport's acknowledgement of a sent or updated activity.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceResponse {
    /// The id the channel assigned to the activity.
    pub id: String,
}

impl ResourceResponse {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// The result of creating a conversation through the connector.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationResourceResponse {
    /// Id of the newly created conversation.
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_url: Option<String>,
}

/// The body returned for an invoke turn, or for a turn whose inbound activity
/// used [`DeliveryMode::ExpectReplies`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeResponse {
    /// HTTP-like status code for the invoke.
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl InvokeResponse {
    pub fn new(status: u16, body: Option<Value>) -> Self {
        Self { status, body }
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The buffered replies of an expect-replies turn, packaged as one body.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpectedReplies {
    pub activities: Vec<Activity>,
}
