//! Banko collaborators around the dialog core.
//!
//! - `luis` - LUIS v2 recognizer over HTTP
//! - `keyword` - offline recognizer with the same entity kinds
//! - `runtime` - `BankoRuntime`, which turns orchestrator outcomes into channel replies
//!
//! Recognizers only classify text. Slot filling, validation and routing stay in
//! `banko-core`.

use std::sync::Arc;

use banko_core::config::{NluConfig, NluProvider};
use banko_core::dialogs::Recognizer;

pub mod keyword;
pub mod luis;
pub mod runtime;

pub use keyword::KeywordRecognizer;
pub use luis::{LuisRecognizer, LuisSetupError};
pub use runtime::{BankoRuntime, InboundActivity, InboundKind};

/// Builds the recognizer named by `nlu.provider`.
pub fn recognizer_from_config(config: &NluConfig) -> Result<Arc<dyn Recognizer>, LuisSetupError> {
    match config.provider {
        NluProvider::Luis => Ok(Arc::new(LuisRecognizer::from_config(config)?)),
        NluProvider::Keyword => Ok(Arc::new(KeywordRecognizer::new())),
    }
}
