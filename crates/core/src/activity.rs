use serde::{Deserialize, Serialize};

/// Outbound activity, delivered to the channel verbatim and in order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Activity {
    Message { text: String },
    Typing,
    Delay { millis: u64 },
}

impl Activity {
    pub fn message(text: impl Into<String>) -> Self {
        Self::Message { text: text.into() }
    }

    pub fn delay(millis: u64) -> Self {
        Self::Delay { millis }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Message { text } => Some(text),
            Self::Typing | Self::Delay { .. } => None,
        }
    }
}
