//! Persisted dialog stacks, one row per conversation.

use async_trait::async_trait;
use banko_core::dialogs::{ConversationId, ConversationStore, DialogStack, StoreError};
use chrono::Utc;
use sqlx::Row;

use super::RepositoryError;
use crate::DbPool;

/// SQLite implementation of the conversation state store. The stack is kept as a JSON
/// document so a whole turn's write-back is a single statement.
pub struct SqlConversationStore {
    pool: DbPool,
}

impl SqlConversationStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn find(
        &self,
        conversation: &ConversationId,
    ) -> Result<Option<DialogStack>, RepositoryError> {
        let row =
            sqlx::query("SELECT dialog_stack FROM conversation_state WHERE conversation_id = ?")
                .bind(conversation.as_str())
                .fetch_optional(&self.pool)
                .await?;

        row.map(|row| -> Result<DialogStack, RepositoryError> {
            let raw = row.try_get::<String, _>("dialog_stack")?;
            serde_json::from_str::<DialogStack>(&raw)
                .map_err(|error| RepositoryError::Decode(error.to_string()))
        })
        .transpose()
    }

    pub async fn upsert(
        &self,
        conversation: &ConversationId,
        stack: &DialogStack,
    ) -> Result<(), RepositoryError> {
        let raw = serde_json::to_string(stack)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;
        let depth = i64::try_from(stack.depth()).unwrap_or(i64::MAX);

        sqlx::query(
            r#"
            INSERT INTO conversation_state (conversation_id, dialog_stack, stack_depth, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(conversation_id) DO UPDATE SET
                dialog_stack = excluded.dialog_stack,
                stack_depth = excluded.stack_depth,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(conversation.as_str())
        .bind(raw)
        .bind(depth)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete(&self, conversation: &ConversationId) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM conversation_state WHERE conversation_id = ?")
            .bind(conversation.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn count(&self) -> Result<i64, RepositoryError> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM conversation_state")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>("count")?)
    }
}

#[async_trait]
impl ConversationStore for SqlConversationStore {
    async fn load(
        &self,
        conversation: &ConversationId,
    ) -> Result<Option<DialogStack>, StoreError> {
        self.find(conversation).await.map_err(|error| {
            tracing::warn!(
                event_name = "db.conversation.load_failed",
                conversation_id = %conversation,
                error = %error,
                "could not load dialog stack"
            );
            StoreError::from(error)
        })
    }

    async fn save(
        &self,
        conversation: &ConversationId,
        stack: &DialogStack,
    ) -> Result<(), StoreError> {
        if stack.is_empty() {
            return self.clear(conversation).await;
        }
        self.upsert(conversation, stack).await?;
        tracing::debug!(
            event_name = "db.conversation.saved",
            conversation_id = %conversation,
            depth = stack.depth(),
            "dialog stack saved"
        );
        Ok(())
    }

    async fn clear(&self, conversation: &ConversationId) -> Result<(), StoreError> {
        self.delete(conversation).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use banko_core::dialogs::{
        ConversationId, ConversationStore, DialogId, DialogInvocation, DialogStack, FillSource,
        PendingPrompt, PromptId, PromptTarget, SlotName, SlotStore, SlotValue, StoreError,
    };

    use super::SqlConversationStore;
    use crate::connect_with_settings;
    use crate::migrations::run_pending;

    async fn store() -> SqlConversationStore {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("migrate");
        SqlConversationStore::new(pool)
    }

    fn suspended_transfer() -> DialogStack {
        let mut slots = SlotStore::new();
        slots
            .fill(
                SlotName::from("account"),
                SlotValue::Text("Savings".to_owned()),
                FillSource::PreFilled,
            )
            .expect("fill");
        let mut invocation = DialogInvocation::new(DialogId::from("transfer"), slots);
        invocation.cursor = 2;
        invocation.pending = Some(PendingPrompt {
            prompt: PromptId::from("date"),
            target: PromptTarget::Slot(SlotName::from("date")),
            retries: 1,
        });

        let mut stack = DialogStack::new();
        stack.push(invocation);
        stack
    }

    #[tokio::test]
    async fn missing_conversation_loads_as_none() {
        let store = store().await;
        let loaded = store.load(&ConversationId::from("nobody")).await.expect("load");
        assert_eq!(loaded, None);
    }

    #[tokio::test]
    async fn save_then_load_returns_the_same_stack() {
        let store = store().await;
        let conversation = ConversationId::from("conv-1");
        let stack = suspended_transfer();

        store.save(&conversation, &stack).await.expect("save");
        assert_eq!(store.load(&conversation).await.expect("load"), Some(stack));
    }

    #[tokio::test]
    async fn saving_again_replaces_the_row() {
        let store = store().await;
        let conversation = ConversationId::from("conv-1");
        let mut stack = suspended_transfer();
        store.save(&conversation, &stack).await.expect("first save");

        if let Some(top) = stack.top_mut() {
            top.pending = None;
            top.cursor = 3;
        }
        store.save(&conversation, &stack).await.expect("second save");

        assert_eq!(store.count().await.expect("count"), 1);
        assert_eq!(store.load(&conversation).await.expect("load"), Some(stack));
    }

    #[tokio::test]
    async fn empty_stack_and_clear_remove_the_row() {
        let store = store().await;
        let conversation = ConversationId::from("conv-1");

        store.save(&conversation, &suspended_transfer()).await.expect("save");
        store.save(&conversation, &DialogStack::new()).await.expect("save empty");
        assert_eq!(store.count().await.expect("count"), 0);

        store.save(&conversation, &suspended_transfer()).await.expect("save");
        store.clear(&conversation).await.expect("clear");
        assert_eq!(store.load(&conversation).await.expect("load"), None);
    }

    #[tokio::test]
    async fn corrupt_row_is_reported_as_decode_error() {
        let store = store().await;
        sqlx::query(
            "INSERT INTO conversation_state (conversation_id, dialog_stack, stack_depth, updated_at)
             VALUES ('conv-bad', '{not json', 1, '2026-10-18T00:00:00Z')",
        )
        .execute(&store.pool)
        .await
        .expect("seed corrupt row");

        let error = store.load(&ConversationId::from("conv-bad")).await.expect_err("decode");
        assert!(matches!(error, StoreError::Decode(_)));
    }

    #[tokio::test]
    async fn closed_pool_is_reported_as_unavailable() {
        let store = store().await;
        store.pool.close().await;

        let error = store
            .save(&ConversationId::from("conv-1"), &suspended_transfer())
            .await
            .expect_err("pool closed");
        assert!(matches!(error, StoreError::Unavailable(_)));
    }
}
