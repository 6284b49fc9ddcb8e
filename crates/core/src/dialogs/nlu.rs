use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dialogs::entities::ExtractedEntities;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntentScore {
    pub label: String,
    pub score: f32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Recognition {
    pub intent: Option<IntentScore>,
    pub entities: ExtractedEntities,
}

impl Recognition {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn intent(label: &str, score: f32) -> Self {
        Self { intent: Some(IntentScore { label: label.to_owned(), score }), ..Self::default() }
    }

    pub fn with_entities(mut self, entities: ExtractedEntities) -> Self {
        self.entities = entities;
        self
    }

    /// The top intent label, if it clears `min_confidence`.
    pub fn confident_intent(&self, min_confidence: f32) -> Option<&str> {
        self.intent
            .as_ref()
            .filter(|intent| intent.score >= min_confidence)
            .map(|intent| intent.label.as_str())
    }
}

#[derive(Debug, Error)]
pub enum RecognizerError {
    #[error("recognizer request failed: {0}")]
    Transport(String),
    #[error("recognizer returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("recognizer response could not be decoded: {0}")]
    Decode(String),
}

/// External intent and entity classification.
#[async_trait]
pub trait Recognizer: Send + Sync {
    async fn recognize(&self, utterance: &str) -> Result<Recognition, RecognizerError>;
}
