use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use banko_agent::{BankoRuntime, InboundActivity};
use banko_core::{Activity, InterfaceError};
use serde::Serialize;
use uuid::Uuid;

pub const CORRELATION_HEADER: &str = "x-correlation-id";

#[derive(Clone)]
pub struct MessagesState {
    runtime: Arc<BankoRuntime>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MessagesResponse {
    pub activities: Vec<Activity>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MessagesError {
    pub error: String,
    pub correlation_id: String,
}

pub fn router(runtime: Arc<BankoRuntime>) -> Router {
    Router::new().route("/api/messages", post(post_message)).with_state(MessagesState { runtime })
}

pub async fn post_message(
    State(state): State<MessagesState>,
    headers: HeaderMap,
    payload: Result<Json<InboundActivity>, JsonRejection>,
) -> Result<Json<MessagesResponse>, (StatusCode, Json<MessagesError>)> {
    let correlation_id = headers
        .get(CORRELATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.trim().is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let Json(mut inbound) = payload.map_err(|rejection| {
        tracing::info!(
            event_name = "server.messages.rejected",
            correlation_id = %correlation_id,
            reason = %rejection.body_text(),
            "malformed activity"
        );
        (
            StatusCode::BAD_REQUEST,
            Json(MessagesError {
                error: rejection.body_text(),
                correlation_id: correlation_id.clone(),
            }),
        )
    })?;
    inbound.correlation_id.get_or_insert(correlation_id);

    match state.runtime.handle_activity(inbound).await {
        Ok(activities) => Ok(Json(MessagesResponse { activities })),
        Err(error) => Err(error_response(&error)),
    }
}

fn error_response(error: &InterfaceError) -> (StatusCode, Json<MessagesError>) {
    let status = match error {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(MessagesError {
            error: error.user_message().to_string(),
            correlation_id: error.correlation_id().to_string(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        http::{header::CONTENT_TYPE, Request, StatusCode},
        Router,
    };
    use banko_agent::{BankoRuntime, KeywordRecognizer};
    use banko_core::dialogs::{
        ConversationId, ConversationStore, DialogStack, InMemoryConversationStore, Orchestrator,
        StoreError,
    };
    use banko_core::{banking_registry, RandomLedger};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::messages::{router, CORRELATION_HEADER};

    struct LockedStore;

    #[async_trait]
    impl ConversationStore for LockedStore {
        async fn load(&self, _: &ConversationId) -> Result<Option<DialogStack>, StoreError> {
            Err(StoreError::Unavailable("database is locked".to_owned()))
        }

        async fn save(&self, _: &ConversationId, _: &DialogStack) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("database is locked".to_owned()))
        }

        async fn clear(&self, _: &ConversationId) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("database is locked".to_owned()))
        }
    }

    fn app(store: Arc<dyn ConversationStore>) -> Router {
        let registry = banking_registry(Arc::new(RandomLedger)).expect("registry");
        let orchestrator =
            Orchestrator::new(Arc::new(registry), store, Arc::new(KeywordRecognizer::new()));
        router(Arc::new(BankoRuntime::new(Arc::new(orchestrator))))
    }

    async fn post(app: Router, body: String) -> (StatusCode, Value) {
        let request = Request::post("/api/messages")
            .header(CONTENT_TYPE, "application/json")
            .header(CORRELATION_HEADER, "req-42")
            .body(Body::from(body))
            .expect("request");
        let response = app.oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        (status, serde_json::from_slice(&bytes).expect("json body"))
    }

    #[tokio::test]
    async fn message_returns_ordered_activities() {
        let body =
            json!({ "type": "message", "conversation_id": "c-1", "text": "make a transfer" });

        let (status, payload) =
            post(app(Arc::new(InMemoryConversationStore::new())), body.to_string()).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            payload,
            json!({ "activities": [
                { "type": "message", "text": "OK, we're going to make a transfer." },
                { "type": "message", "text": "How much?" }
            ] })
        );
    }

    #[tokio::test]
    async fn conversation_update_greets_the_new_member() {
        let body = json!({
            "type": "conversationUpdate",
            "conversation_id": "c-2",
            "members_added": ["banko", "user-1"],
            "recipient_id": "banko"
        });

        let (status, payload) =
            post(app(Arc::new(InMemoryConversationStore::new())), body.to_string()).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["activities"][0]["text"], "Hello, I'm the Banko bot.");
        assert_eq!(payload["activities"].as_array().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn malformed_json_is_a_bad_request() {
        let (status, payload) =
            post(app(Arc::new(InMemoryConversationStore::new())), "{ not json".to_owned()).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(payload["correlation_id"], "req-42");
    }

    #[tokio::test]
    async fn message_without_text_gets_the_usage_answer() {
        let body = json!({ "type": "message", "conversation_id": "c-3" });

        let (status, payload) =
            post(app(Arc::new(InMemoryConversationStore::new())), body.to_string()).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            payload["activities"][0]["text"],
            "I don't know what you want to do. Type `make a transfer` or `get a balance`."
        );
    }

    #[tokio::test]
    async fn blank_answer_reaches_the_pending_prompt() {
        let app = app(Arc::new(InMemoryConversationStore::new()));
        let start =
            json!({ "type": "message", "conversation_id": "c-5", "text": "make a transfer" });
        post(app.clone(), start.to_string()).await;

        let blank = json!({ "type": "message", "conversation_id": "c-5", "text": "" });
        let (status, payload) = post(app, blank.to_string()).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            payload["activities"][0]["text"],
            "How much do you want to transfer? You can say a number, for example 23, 100, 10 or \
             ten."
        );
    }

    #[tokio::test]
    async fn blank_conversation_id_is_a_bad_request() {
        let body = json!({ "type": "message", "conversation_id": " ", "text": "get a balance" });

        let (status, payload) =
            post(app(Arc::new(InMemoryConversationStore::new())), body.to_string()).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(payload["correlation_id"], "req-42");
    }

    #[tokio::test]
    async fn store_outage_maps_to_service_unavailable() {
        let body = json!({ "type": "message", "conversation_id": "c-4", "text": "get a balance" });

        let (status, payload) = post(app(Arc::new(LockedStore)), body.to_string()).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            payload["error"],
            "Sorry, I can't reach my services right now. Please try again in a moment."
        );
        assert_eq!(payload["correlation_id"], "req-42");
    }
}
