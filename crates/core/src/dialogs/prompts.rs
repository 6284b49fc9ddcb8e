use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::dialogs::dates::{parse_date_expression, DateWindow};
use crate::dialogs::slots::SlotValue;

const AFFIRMATIVE: &[&str] = &[
    "yes", "y", "yeah", "yep", "yup", "sure", "ok", "okay", "correct", "confirm", "affirmative",
    "yes please", "that's right", "thats right", "do it",
];
const NEGATIVE: &[&str] =
    &["no", "n", "nope", "nah", "cancel", "negative", "no thanks", "don't", "dont", "stop"];

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PromptId(pub String);

impl PromptId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl From<&str> for PromptId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Display for PromptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PromptKind {
    Text,
    Integer { min: Option<i64>, max: Option<i64> },
    Date(DateWindow),
    Confirm,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rejection {
    TypeMismatch,
    OutOfRange(String),
}

impl Rejection {
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::TypeMismatch => None,
            Self::OutOfRange(reason) => Some(reason),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ValidationContext {
    pub today: NaiveDate,
}

pub type Validator =
    Arc<dyn Fn(&SlotValue, &ValidationContext) -> Result<(), Rejection> + Send + Sync>;

/// A reusable typed input collector. Holds no per-conversation state.
#[derive(Clone)]
pub struct Prompt {
    id: PromptId,
    kind: PromptKind,
    retry_message: String,
    validator: Option<Validator>,
}

impl fmt::Debug for Prompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Prompt")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("retry_message", &self.retry_message)
            .field("validator", &self.validator.is_some())
            .finish()
    }
}

impl Prompt {
    pub fn new(
        id: impl Into<PromptId>,
        kind: PromptKind,
        retry_message: impl Into<String>,
    ) -> Self {
        Self { id: id.into(), kind, retry_message: retry_message.into(), validator: None }
    }

    pub fn text(id: &str, retry_message: &str) -> Self {
        Self::new(id, PromptKind::Text, retry_message)
    }

    pub fn integer(id: &str, min: Option<i64>, max: Option<i64>, retry_message: &str) -> Self {
        Self::new(id, PromptKind::Integer { min, max }, retry_message)
    }

    pub fn date(id: &str, window: DateWindow, retry_message: &str) -> Self {
        Self::new(id, PromptKind::Date(window), retry_message)
    }

    pub fn confirm(id: &str, retry_message: &str) -> Self {
        Self::new(id, PromptKind::Confirm, retry_message)
    }

    pub fn with_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&SlotValue, &ValidationContext) -> Result<(), Rejection> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn id(&self) -> &PromptId {
        &self.id
    }

    pub fn kind(&self) -> PromptKind {
        self.kind
    }

    pub fn retry_message(&self) -> &str {
        &self.retry_message
    }

    /// Message sent after a rejection: the specific reason, when there is one, followed by the
    /// retry message.
    pub fn retry_text(&self, rejection: &Rejection) -> String {
        match rejection.reason() {
            Some(reason) => format!("{reason} {}", self.retry_message),
            None => self.retry_message.clone(),
        }
    }

    pub fn validate(&self, raw: &str, context: &ValidationContext) -> Result<SlotValue, Rejection> {
        let value = interpret(self.kind, raw, context)?;
        if let Some(validator) = &self.validator {
            validator(&value, context)?;
        }
        Ok(value)
    }
}

fn interpret(
    kind: PromptKind,
    raw: &str,
    context: &ValidationContext,
) -> Result<SlotValue, Rejection> {
    let trimmed = raw.trim();
    match kind {
        PromptKind::Text => {
            if trimmed.is_empty() {
                return Err(Rejection::TypeMismatch);
            }
            Ok(SlotValue::Text(trimmed.to_owned()))
        }
        PromptKind::Integer { min, max } => {
            let value = parse_integer(trimmed).ok_or(Rejection::TypeMismatch)?;
            if let Some(min) = min.filter(|min| value < *min) {
                return Err(Rejection::OutOfRange(format!("The value must be at least {min}.")));
            }
            if let Some(max) = max.filter(|max| value > *max) {
                return Err(Rejection::OutOfRange(format!("The value must be at most {max}.")));
            }
            Ok(SlotValue::Integer(value))
        }
        PromptKind::Date(window) => {
            let expression =
                parse_date_expression(trimmed, context.today).ok_or(Rejection::TypeMismatch)?;
            window
                .check(&expression, context.today)
                .map(SlotValue::Date)
                .map_err(|violation| Rejection::OutOfRange(violation.to_string()))
        }
        PromptKind::Confirm => {
            parse_confirmation(trimmed).map(SlotValue::Boolean).ok_or(Rejection::TypeMismatch)
        }
    }
}

/// Recognizes the closed set of yes/no phrasings. Anything else is `None`, never a default.
pub fn parse_confirmation(input: &str) -> Option<bool> {
    let normalized = input
        .trim()
        .trim_end_matches(|ch: char| matches!(ch, '.' | '!'))
        .to_ascii_lowercase();
    if AFFIRMATIVE.contains(&normalized.as_str()) {
        return Some(true);
    }
    if NEGATIVE.contains(&normalized.as_str()) {
        return Some(false);
    }
    None
}

/// Parses digits (with optional sign and thousands separators) or English number words.
pub fn parse_integer(input: &str) -> Option<i64> {
    let compact = input.replace(',', "");
    if let Ok(value) = compact.parse::<i64>() {
        return Some(value);
    }
    parse_number_words(&compact.to_ascii_lowercase())
}

fn parse_number_words(input: &str) -> Option<i64> {
    let mut words = input
        .split(|ch: char| ch.is_whitespace() || ch == '-')
        .filter(|word| !word.is_empty() && *word != "and")
        .peekable();
    words.peek()?;

    let mut negative = false;
    let mut total: i64 = 0;
    let mut current: i64 = 0;
    for word in words {
        if matches!(word, "minus" | "negative") && total == 0 && current == 0 {
            negative = true;
            continue;
        }
        match word {
            "hundred" => current = current.max(1).checked_mul(100)?,
            "thousand" => {
                total = total.checked_add(current.max(1).checked_mul(1_000)?)?;
                current = 0;
            }
            "million" => {
                total = total.checked_add(current.max(1).checked_mul(1_000_000)?)?;
                current = 0;
            }
            other => current = current.checked_add(small_number(other)?)?,
        }
    }

    let value = total.checked_add(current)?;
    Some(if negative { -value } else { value })
}

fn small_number(word: &str) -> Option<i64> {
    let value = match word {
        "zero" => 0,
        "one" | "a" => 1,
        "two" => 2,
        "three" => 3,
        "four" => 4,
        "five" => 5,
        "six" => 6,
        "seven" => 7,
        "eight" => 8,
        "nine" => 9,
        "ten" => 10,
        "eleven" => 11,
        "twelve" => 12,
        "thirteen" => 13,
        "fourteen" => 14,
        "fifteen" => 15,
        "sixteen" => 16,
        "seventeen" => 17,
        "eighteen" => 18,
        "nineteen" => 19,
        "twenty" => 20,
        "thirty" => 30,
        "forty" => 40,
        "fifty" => 50,
        "sixty" => 60,
        "seventy" => 70,
        "eighty" => 80,
        "ninety" => 90,
        _ => return None,
    };
    Some(value)
}
