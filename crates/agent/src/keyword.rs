//! Offline recognizer for local runs and the CLI. Picks intents from keywords and pulls the
//! same entity kinds the LUIS app produces, so the banking dialogs prefill identically.

use async_trait::async_trait;
use banko_core::banking::{ENTITY_ACCOUNT, ENTITY_DATE, ENTITY_MONEY, ENTITY_PAYEE};
use banko_core::dialogs::prompts::parse_integer;
use banko_core::dialogs::{
    parse_date_expression, EntityCandidate, Recognition, Recognizer, RecognizerError,
};
use chrono::{NaiveDate, Utc};

const KEYWORD_SCORE: f32 = 0.9;

const TRANSFER_WORDS: &[&str] = &["transfer", "send", "pay", "move"];
const BALANCE_WORDS: &[&str] = &["balance", "overdrawn"];
const ACCOUNT_WORDS: &[(&str, &str)] =
    &[("joint", "Joint"), ("current", "Current"), ("savings", "Savings"), ("saving", "Savings")];
const PAYEE_STOP_WORDS: &[&str] = &["from", "on", "at", "for", "please"];

#[derive(Clone, Copy, Debug, Default)]
pub struct KeywordRecognizer;

impl KeywordRecognizer {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, utterance: &str, today: NaiveDate) -> Recognition {
        let tokens = Token::split(utterance);
        let date_span = find_date_span(&tokens, today);
        let outside_date =
            |index: &usize| date_span.map_or(true, |(start, end)| !(start..end).contains(index));

        let mut recognition = match intent_for(&tokens) {
            Some(label) => Recognition::intent(label, KEYWORD_SCORE),
            None => Recognition::none(),
        };
        let entities = &mut recognition.entities;

        if let Some((start, end)) = date_span {
            let expression = tokens[start..end]
                .iter()
                .map(|token| token.lower.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            entities.push(ENTITY_DATE, EntityCandidate::dates([expression]));
        }

        if let Some(amount) = (0..tokens.len())
            .filter(outside_date)
            .find_map(|index| amount_from(&tokens[index].lower))
        {
            entities.push(ENTITY_MONEY, EntityCandidate::number(amount));
        }

        if let Some(account) = tokens.iter().find_map(|token| {
            ACCOUNT_WORDS
                .iter()
                .find(|(word, _)| token.lower == *word)
                .map(|(_, label)| *label)
        }) {
            entities.push(ENTITY_ACCOUNT, EntityCandidate::text(account));
        }

        if let Some(payee) = payee_after_to(&tokens, date_span.map(|(start, _)| start)) {
            entities.push(ENTITY_PAYEE, EntityCandidate::text(payee));
        }

        recognition
    }
}

#[async_trait]
impl Recognizer for KeywordRecognizer {
    async fn recognize(&self, utterance: &str) -> Result<Recognition, RecognizerError> {
        let recognition = self.classify(utterance, Utc::now().date_naive());
        tracing::debug!(
            event_name = "nlu.keyword.recognized",
            intent = recognition.intent.as_ref().map(|intent| intent.label.as_str()),
            entity_kinds = recognition.entities.kinds().count(),
            "keyword classification done"
        );
        Ok(recognition)
    }
}

#[derive(Debug)]
struct Token {
    raw: String,
    lower: String,
}

impl Token {
    fn split(utterance: &str) -> Vec<Self> {
        utterance
            .split_whitespace()
            .map(|word| word.trim_matches(|ch: char| matches!(ch, ',' | '.' | '!' | '?')))
            .filter(|word| !word.is_empty())
            .map(|word| Self { raw: word.to_owned(), lower: word.to_lowercase() })
            .collect()
    }
}

fn intent_for(tokens: &[Token]) -> Option<&'static str> {
    let has = |words: &[&str]| tokens.iter().any(|token| words.contains(&token.lower.as_str()));
    if has(TRANSFER_WORDS) {
        Some("Transfer")
    } else if has(BALANCE_WORDS) {
        Some("Balance")
    } else {
        None
    }
}

/// Longest run of tokens that reads as a date, earliest first.
fn find_date_span(tokens: &[Token], today: NaiveDate) -> Option<(usize, usize)> {
    for start in 0..tokens.len() {
        for end in (start + 1..=tokens.len()).rev() {
            let candidate =
                tokens[start..end].iter().map(|token| token.lower.as_str()).collect::<Vec<_>>();
            if parse_date_expression(&candidate.join(" "), today).is_some() {
                return Some((start, end));
            }
        }
    }
    None
}

fn amount_from(token: &str) -> Option<f64> {
    let stripped = token.trim_start_matches('£').replace(',', "");
    if stripped.chars().next().is_some_and(|ch| ch.is_ascii_digit()) {
        return stripped.parse::<f64>().ok();
    }
    // "a transfer" is not an amount.
    if stripped == "a" {
        return None;
    }
    parse_integer(&stripped).map(|value| value as f64)
}

fn payee_after_to(tokens: &[Token], date_start: Option<usize>) -> Option<String> {
    let to = tokens.iter().position(|token| token.lower == "to")?;
    let stop = date_start.filter(|start| *start > to).unwrap_or(tokens.len());
    let words = tokens[to + 1..stop]
        .iter()
        .take_while(|token| !PAYEE_STOP_WORDS.contains(&token.lower.as_str()))
        .map(|token| token.raw.as_str())
        .collect::<Vec<_>>();
    (!words.is_empty()).then(|| words.join(" "))
}
