use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::dialogs::stack::DialogStack;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ConversationId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("conversation store unavailable: {0}")]
    Unavailable(String),
    #[error("stored dialog stack could not be decoded: {0}")]
    Decode(String),
}

/// Key-value persistence for dialog stacks, keyed by conversation.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// `None` means the conversation has no active dialogs.
    async fn load(&self, conversation: &ConversationId) -> Result<Option<DialogStack>, StoreError>;
    async fn save(&self, conversation: &ConversationId, stack: &DialogStack)
        -> Result<(), StoreError>;
    async fn clear(&self, conversation: &ConversationId) -> Result<(), StoreError>;
}

#[derive(Default)]
pub struct InMemoryConversationStore {
    stacks: RwLock<HashMap<ConversationId, DialogStack>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.stacks.read().await.len()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn load(&self, conversation: &ConversationId) -> Result<Option<DialogStack>, StoreError> {
        let stacks = self.stacks.read().await;
        Ok(stacks.get(conversation).cloned())
    }

    async fn save(
        &self,
        conversation: &ConversationId,
        stack: &DialogStack,
    ) -> Result<(), StoreError> {
        let mut stacks = self.stacks.write().await;
        stacks.insert(conversation.clone(), stack.clone());
        Ok(())
    }

    async fn clear(&self, conversation: &ConversationId) -> Result<(), StoreError> {
        let mut stacks = self.stacks.write().await;
        stacks.remove(conversation);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{ConversationId, ConversationStore, InMemoryConversationStore};
    use crate::dialogs::definition::DialogId;
    use crate::dialogs::slots::SlotStore;
    use crate::dialogs::stack::{DialogInvocation, DialogStack};

    #[tokio::test]
    async fn in_memory_store_round_trip_and_clear() {
        let store = InMemoryConversationStore::new();
        let conversation = ConversationId::from("conv-1");
        let mut stack = DialogStack::new();
        stack.push(DialogInvocation::new(DialogId::from("transfer"), SlotStore::new()));

        assert_eq!(store.load(&conversation).await.expect("load"), None);
        store.save(&conversation, &stack).await.expect("save");
        assert_eq!(store.load(&conversation).await.expect("load"), Some(stack));
        assert_eq!(store.len().await, 1);

        store.clear(&conversation).await.expect("clear");
        assert_eq!(store.load(&conversation).await.expect("load"), None);
        assert_eq!(store.len().await, 0);
    }
}
