use std::sync::Arc;

use banko_core::dialogs::{
    ConversationId, Orchestrator, TurnInput, TurnKind, TurnOutcome, TurnStatus,
};
use banko_core::{Activity, ApplicationError, DomainError, InterfaceError};
use serde::Deserialize;
use uuid::Uuid;

pub const GREETING: &str = "Hello, I'm the Banko bot.";
pub const USAGE_HINT: &str = "How can I help you? (Type `make a transfer` or `get a balance`.)";
pub const UNKNOWN_INTENT_MESSAGE: &str =
    "I don't know what you want to do. Type `make a transfer` or `get a balance`.";
pub const CANCELLED_MESSAGE: &str =
    "Sorry, I still couldn't understand that, so I've stopped what we were doing. \
     Type `make a transfer` or `get a balance` to start again.";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InboundKind {
    Message,
    ConversationUpdate,
    #[serde(other)]
    Other,
}

/// One activity as delivered by the channel.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct InboundActivity {
    #[serde(rename = "type")]
    pub kind: InboundKind,
    pub conversation_id: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub members_added: Vec<String>,
    #[serde(default)]
    pub recipient_id: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

impl InboundActivity {
    pub fn message(conversation_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind: InboundKind::Message,
            conversation_id: conversation_id.into(),
            text: Some(text.into()),
            members_added: Vec::new(),
            recipient_id: None,
            correlation_id: None,
        }
    }
}

/// Owns everything the user sees that the dialogs themselves do not say: greetings, the
/// unknown-intent answer, the cancellation notice and collaborator failure text.
pub struct BankoRuntime {
    orchestrator: Arc<Orchestrator>,
}

impl BankoRuntime {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub async fn handle_activity(
        &self,
        inbound: InboundActivity,
    ) -> Result<Vec<Activity>, InterfaceError> {
        let correlation_id =
            inbound.correlation_id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());

        if inbound.conversation_id.trim().is_empty() {
            return Err(bad_request("activity without conversation id", correlation_id));
        }

        match inbound.kind {
            InboundKind::ConversationUpdate => Ok(greet(&inbound)),
            InboundKind::Message => {
                // A blank message still answers a pending prompt; with nothing pending it
                // selects no dialog.
                let text = inbound.text.as_deref().map(str::trim).unwrap_or_default();
                let input = TurnInput::message(inbound.conversation_id.as_str(), text)
                    .with_correlation_id(correlation_id.as_str());
                self.run(input).await
            }
            InboundKind::Other => {
                let input = TurnInput {
                    conversation_id: ConversationId::new(inbound.conversation_id),
                    kind: TurnKind::Event,
                    text: inbound.text,
                    correlation_id,
                };
                self.run(input).await
            }
        }
    }

    pub async fn reset(
        &self,
        conversation_id: &str,
        correlation_id: &str,
    ) -> Result<(), InterfaceError> {
        self.orchestrator
            .reset(&ConversationId::from(conversation_id), correlation_id)
            .await
            .map_err(|error| ApplicationError::from(error).into_interface(correlation_id))
    }

    async fn run(&self, input: TurnInput) -> Result<Vec<Activity>, InterfaceError> {
        let correlation_id = input.correlation_id.clone();
        match self.orchestrator.handle_turn(input).await {
            Ok(outcome) => Ok(with_fallback_text(outcome)),
            Err(error) => {
                let interface = ApplicationError::from(error).into_interface(correlation_id);
                tracing::warn!(
                    event_name = "agent.turn.failed",
                    correlation_id = %interface.correlation_id(),
                    error = %interface,
                    "turn failed, replying with fallback text"
                );
                Err(interface)
            }
        }
    }
}

fn greet(inbound: &InboundActivity) -> Vec<Activity> {
    let someone_joined = inbound
        .members_added
        .iter()
        .any(|member| inbound.recipient_id.as_deref() != Some(member.as_str()));
    if !someone_joined {
        return Vec::new();
    }
    vec![Activity::message(GREETING), Activity::message(USAGE_HINT)]
}

fn with_fallback_text(outcome: TurnOutcome) -> Vec<Activity> {
    let mut activities = outcome.activities;
    match outcome.status {
        TurnStatus::NoDialogSelected { .. } => {
            activities.push(Activity::message(UNKNOWN_INTENT_MESSAGE));
        }
        TurnStatus::Cancelled { .. } => activities.push(Activity::message(CANCELLED_MESSAGE)),
        TurnStatus::Suspended { .. } | TurnStatus::NoActiveDialog { .. } | TurnStatus::Ignored => {}
    }
    activities
}

fn bad_request(message: &str, correlation_id: String) -> InterfaceError {
    ApplicationError::from(DomainError::InvariantViolation(message.to_owned()))
        .into_interface(correlation_id)
}
