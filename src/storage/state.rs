//! Conversation-scoped state over the [`Storage`] collaborator.
//!
//! `ConversationState` caches one JSON property map per conversation in the
//! turn's stack-state bag: load before use, mutate through typed accessors,
//! save after mutation. [`AutoSaveStateMiddleware`] wires the save into the
//! end of the middleware chain so the application callback only mutates.

use crate::adapter::{Middleware, Next};
use crate::turn::{TurnContext, TurnError};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{Storage, StoreItem};

const CACHE_KEY: &str = "turnkit.conversationState";

#[derive(Debug, Default)]
struct CachedState {
    properties: Map<String, Value>,
    etag: Option<String>,
}

/// Per-conversation property container persisted through a [`Storage`].
#[derive(Clone)]
pub struct ConversationState {
    storage: Arc<dyn Storage>,
}

impl ConversationState {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// The storage key for the turn's conversation:
    /// `{channel_id}/conversations/{conversation_id}`.
    pub fn storage_key(ctx: &TurnContext) -> Result<String, TurnError> {
        let activity = ctx.activity().ok_or_else(|| {
            TurnError::InvalidArgument(
                "conversation state requires an inbound activity".to_string(),
            )
        })?;
        let channel_id = activity.channel_id.as_deref().ok_or_else(|| {
            TurnError::InvalidArgument("conversation state requires a channel id".to_string())
        })?;
        let conversation_id = activity
            .conversation
            .as_ref()
            .map(|conversation| conversation.id.as_str())
            .ok_or_else(|| {
                TurnError::InvalidArgument(
                    "conversation state requires a conversation id".to_string(),
                )
            })?;
        Ok(format!("{channel_id}/conversations/{conversation_id}"))
    }

    /// Loads the conversation's properties into the turn, once per turn.
    pub async fn load(&self, ctx: &TurnContext) -> Result<(), TurnError> {
        if ctx.stack_state().contains_key(CACHE_KEY) {
            return Ok(());
        }
        let key = Self::storage_key(ctx)?;
        let mut items = self.storage.read(std::slice::from_ref(&key)).await?;
        let cached = match items.remove(&key) {
            Some(item) => CachedState {
                properties: match item.value {
                    Value::Object(map) => map,
                    _ => Map::new(),
                },
                etag: item.etag,
            },
            None => CachedState::default(),
        };
        tracing::debug!(
            target: "turnkit::storage",
            key = %key,
            properties = cached.properties.len(),
            event = "conversation_state_loaded"
        );
        ctx.stack_state().set(CACHE_KEY, Mutex::new(cached));
        Ok(())
    }

    fn cache(ctx: &TurnContext) -> Result<Arc<Mutex<CachedState>>, TurnError> {
        ctx.stack_state()
            .get::<Mutex<CachedState>>(CACHE_KEY)
            .ok_or_else(|| {
                TurnError::InvalidArgument(
                    "conversation state is not loaded for this turn".to_string(),
                )
            })
    }

    fn locked(cache: &Mutex<CachedState>) -> MutexGuard<'_, CachedState> {
        match cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Reads a typed property. Requires [`ConversationState::load`] first.
    pub fn get<T: DeserializeOwned>(
        &self,
        ctx: &TurnContext,
        property: &str,
    ) -> Result<Option<T>, TurnError> {
        let cache = Self::cache(ctx)?;
        let guard = Self::locked(&cache);
        match guard.properties.get(property) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    /// Writes a typed property into the turn's cached state.
    pub fn set<T: Serialize>(
        &self,
        ctx: &TurnContext,
        property: &str,
        value: &T,
    ) -> Result<(), TurnError> {
        let cache = Self::cache(ctx)?;
        let serialized = serde_json::to_value(value)?;
        Self::locked(&cache)
            .properties
            .insert(property.to_string(), serialized);
        Ok(())
    }

    /// Removes a property from the turn's cached state.
    pub fn remove(&self, ctx: &TurnContext, property: &str) -> Result<(), TurnError> {
        let cache = Self::cache(ctx)?;
        Self::locked(&cache).properties.remove(property);
        Ok(())
    }

    /// Persists the cached properties with the ETag they were loaded under.
    ///
    /// The cache entry is dropped after a successful write; a later access
    /// within the same turn reloads and picks up the fresh ETag.
    pub async fn save_changes(&self, ctx: &TurnContext) -> Result<(), TurnError> {
        let key = Self::storage_key(ctx)?;
        let cache = Self::cache(ctx)?;
        let (value, etag) = {
            let guard = Self::locked(&cache);
            (Value::Object(guard.properties.clone()), guard.etag.clone())
        };
        let item = StoreItem { value, etag };
        self.storage
            .write(HashMap::from([(key.clone(), item)]))
            .await?;
        tracing::debug!(
            target: "turnkit::storage",
            key = %key,
            event = "conversation_state_saved"
        );
        ctx.stack_state().remove::<Mutex<CachedState>>(CACHE_KEY);
        Ok(())
    }
}

/// Loads conversation state before the rest of the chain and saves it after:
/// the surrounding state middleware of a stateful agent.
pub struct AutoSaveStateMiddleware {
    state: ConversationState,
}

impl AutoSaveStateMiddleware {
    pub fn new(state: ConversationState) -> Self {
        Self { state }
    }
}

#[async_trait]
impl Middleware for AutoSaveStateMiddleware {
    async fn on_turn(&self, ctx: &TurnContext, next: Next<'_>) -> Result<(), TurnError> {
        self.state.load(ctx).await?;
        next.run(ctx).await?;
        self.state.save_changes(ctx).await
    }
}
