//! LUIS v2 prediction endpoint adapter.
//!
//! The adapter only classifies: it maps `topScoringIntent` and `entities[]` onto a
//! [`Recognition`] and leaves routing, thresholds and slot filling to the orchestrator.

use std::time::Duration;

use async_trait::async_trait;
use banko_core::config::NluConfig;
use banko_core::dialogs::{
    EntityCandidate, EntityValue, ExtractedEntities, IntentScore, Recognition, Recognizer,
    RecognizerError,
};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

pub const ENTITY_MONEY: &str = "money";
pub const ENTITY_NUMBER: &str = "number";
pub const ENTITY_DATE: &str = "datetimeV2";

const ERROR_BODY_LIMIT: usize = 200;

#[derive(Debug, Error)]
pub enum LuisSetupError {
    #[error("nlu.app_id is required for the luis provider")]
    MissingAppId,
    #[error("nlu.subscription_key is required for the luis provider")]
    MissingSubscriptionKey,
    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),
}

pub struct LuisRecognizer {
    http: Client,
    url: String,
    subscription_key: SecretString,
}

impl LuisRecognizer {
    pub fn from_config(config: &NluConfig) -> Result<Self, LuisSetupError> {
        let app_id = config
            .app_id
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .ok_or(LuisSetupError::MissingAppId)?;
        let subscription_key =
            config.subscription_key.clone().ok_or(LuisSetupError::MissingSubscriptionKey)?;

        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(LuisSetupError::Client)?;

        Ok(Self {
            http,
            url: format!("{}/luis/v2.0/apps/{}", config.endpoint.trim_end_matches('/'), app_id),
            subscription_key,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Recognizer for LuisRecognizer {
    async fn recognize(&self, utterance: &str) -> Result<Recognition, RecognizerError> {
        let response = self
            .http
            .get(&self.url)
            .query(&[
                ("subscription-key", self.subscription_key.expose_secret()),
                ("q", utterance),
                ("verbose", "true"),
            ])
            .send()
            .await
            .map_err(|error| RecognizerError::Transport(error.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RecognizerError::Status {
                status: status.as_u16(),
                body: body.chars().take(ERROR_BODY_LIMIT).collect(),
            });
        }

        let payload = response
            .json::<LuisResponse>()
            .await
            .map_err(|error| RecognizerError::Decode(error.without_url().to_string()))?;
        let recognition = payload.into_recognition();

        tracing::debug!(
            event_name = "nlu.luis.recognized",
            intent = recognition.intent.as_ref().map(|intent| intent.label.as_str()),
            entity_kinds = recognition.entities.kinds().count(),
            "luis prediction received"
        );
        Ok(recognition)
    }
}

/// Decodes a raw prediction body. Exposed for fixtures and offline replays.
pub fn parse_prediction(body: &str) -> Result<Recognition, RecognizerError> {
    serde_json::from_str::<LuisResponse>(body)
        .map(LuisResponse::into_recognition)
        .map_err(|error| RecognizerError::Decode(error.to_string()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LuisResponse {
    #[serde(default)]
    query: String,
    top_scoring_intent: Option<LuisIntent>,
    #[serde(default)]
    entities: Vec<LuisEntity>,
}

#[derive(Debug, Deserialize)]
struct LuisIntent {
    intent: String,
    #[serde(default)]
    score: f32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LuisEntity {
    entity: String,
    #[serde(rename = "type")]
    kind: String,
    start_index: Option<usize>,
    end_index: Option<usize>,
    score: Option<f32>,
    resolution: Option<Value>,
}

impl LuisResponse {
    fn into_recognition(self) -> Recognition {
        let mut entities = ExtractedEntities::new();
        for entity in &self.entities {
            let Some((kind, value)) = entity.typed_value(&self.query) else {
                continue;
            };
            entities.push(
                kind,
                EntityCandidate {
                    value,
                    score: entity.score,
                    start: entity.start_index,
                    end: entity.end_index,
                },
            );
        }

        Recognition {
            intent: self
                .top_scoring_intent
                .map(|intent| IntentScore { label: intent.intent, score: intent.score }),
            entities,
        }
    }
}

impl LuisEntity {
    fn typed_value<'a>(&'a self, query: &str) -> Option<(&'a str, EntityValue)> {
        match self.kind.as_str() {
            "builtin.currency" => self.resolved_number().map(|n| (ENTITY_MONEY, n)),
            "builtin.number" => self.resolved_number().map(|n| (ENTITY_NUMBER, n)),
            kind if kind.starts_with("builtin.datetimeV2") => {
                let expressions = self.date_expressions();
                (!expressions.is_empty())
                    .then_some((ENTITY_DATE, EntityValue::DateExpressions(expressions)))
            }
            kind if kind.starts_with("builtin.") => None,
            kind => Some((kind, EntityValue::Text(self.original_text(query)))),
        }
    }

    fn resolved_number(&self) -> Option<EntityValue> {
        let value = self.resolution.as_ref().and_then(|resolution| resolution.get("value"));
        let number = match value {
            Some(Value::Number(number)) => number.as_f64(),
            Some(Value::String(text)) => text.replace(',', "").trim().parse::<f64>().ok(),
            _ => None,
        };
        number.map(EntityValue::Number)
    }

    /// Concrete `value`s first, then the timex they came from, without repeats.
    fn date_expressions(&self) -> Vec<String> {
        let values = self
            .resolution
            .as_ref()
            .and_then(|resolution| resolution.get("values"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut expressions: Vec<String> = Vec::new();
        for field in ["value", "timex"] {
            for value in &values {
                if let Some(text) = value.get(field).and_then(Value::as_str) {
                    if !expressions.iter().any(|seen| seen == text) {
                        expressions.push(text.to_owned());
                    }
                }
            }
        }
        expressions
    }

    /// LUIS lower-cases `entity`; the query slice keeps what the user typed.
    fn original_text(&self, query: &str) -> String {
        match (self.start_index, self.end_index) {
            (Some(start), Some(end)) if end >= start => {
                let text: String = query.chars().skip(start).take(end - start + 1).collect();
                if text.to_lowercase() == self.entity.to_lowercase() {
                    text
                } else {
                    self.entity.clone()
                }
            }
            _ => self.entity.clone(),
        }
    }
}
