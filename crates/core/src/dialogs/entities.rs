use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::dialogs::dates::{parse_date_expression, DateWindow};
use crate::dialogs::slots::{FillSource, SlotName, SlotStore, SlotValue};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum EntityValue {
    Text(String),
    Number(f64),
    /// Alternative interpretations of one date mention, best first.
    DateExpressions(Vec<String>),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityCandidate {
    pub value: EntityValue,
    pub score: Option<f32>,
    pub start: Option<usize>,
    pub end: Option<usize>,
}

impl EntityCandidate {
    pub fn text(value: impl Into<String>) -> Self {
        Self::bare(EntityValue::Text(value.into()))
    }

    pub fn number(value: f64) -> Self {
        Self::bare(EntityValue::Number(value))
    }

    pub fn dates<I, S>(expressions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::bare(EntityValue::DateExpressions(expressions.into_iter().map(Into::into).collect()))
    }

    fn bare(value: EntityValue) -> Self {
        Self { value, score: None, start: None, end: None }
    }
}

/// Turn-scoped NLU output: entity kind to candidate values in recognizer order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEntities {
    entities: BTreeMap<String, Vec<EntityCandidate>>,
}

impl ExtractedEntities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: &str, candidate: EntityCandidate) -> Self {
        self.push(kind, candidate);
        self
    }

    pub fn push(&mut self, kind: &str, candidate: EntityCandidate) {
        self.entities.entry(kind.to_owned()).or_default().push(candidate);
    }

    pub fn candidates(&self, kind: &str) -> &[EntityCandidate] {
        self.entities.get(kind).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.values().all(Vec::is_empty)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Extraction {
    /// First non-blank text candidate.
    FirstText,
    /// First strictly positive number. Zero means "not provided" upstream.
    FirstNonZeroAmount,
    /// First date expression that resolves inside the window.
    DateWithin(DateWindow),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrefillRule {
    pub entity: String,
    pub slot: SlotName,
    pub extraction: Extraction,
}

impl PrefillRule {
    pub fn new(entity: &str, slot: impl Into<SlotName>, extraction: Extraction) -> Self {
        Self { entity: entity.to_owned(), slot: slot.into(), extraction }
    }
}

/// Builds the initial slot store for a freshly pushed invocation. Never fails: anything
/// missing or malformed leaves the slot empty so its step prompts as usual.
pub fn merge_entities(
    rules: &[PrefillRule],
    entities: Option<&ExtractedEntities>,
    today: NaiveDate,
) -> SlotStore {
    let mut store = SlotStore::new();
    let Some(entities) = entities else {
        return store;
    };

    for rule in rules {
        let candidates = entities.candidates(&rule.entity);
        let value = match rule.extraction {
            Extraction::FirstText => first_text(candidates),
            Extraction::FirstNonZeroAmount => first_amount(candidates),
            Extraction::DateWithin(window) => first_date(candidates, window, today),
        };
        if let Some(value) = value {
            store.fill_if_empty(rule.slot.clone(), value, FillSource::PreFilled);
        }
    }

    store
}

fn first_text(candidates: &[EntityCandidate]) -> Option<SlotValue> {
    candidates.iter().find_map(|candidate| match &candidate.value {
        EntityValue::Text(text) if !text.trim().is_empty() => {
            Some(SlotValue::Text(text.trim().to_owned()))
        }
        _ => None,
    })
}

fn first_amount(candidates: &[EntityCandidate]) -> Option<SlotValue> {
    candidates.iter().find_map(|candidate| match candidate.value {
        EntityValue::Number(number) if number.is_finite() && number > 0.0 => {
            Decimal::try_from(number).ok().map(|amount| SlotValue::Decimal(amount.normalize()))
        }
        _ => None,
    })
}

fn first_date(
    candidates: &[EntityCandidate],
    window: DateWindow,
    today: NaiveDate,
) -> Option<SlotValue> {
    candidates
        .iter()
        .filter_map(|candidate| match &candidate.value {
            EntityValue::DateExpressions(expressions) => Some(expressions.iter()),
            EntityValue::Text(text) => Some(std::slice::from_ref(text).iter()),
            EntityValue::Number(_) => None,
        })
        .flatten()
        .filter_map(|expression| parse_date_expression(expression, today))
        .find_map(|expression| window.check(&expression, today).ok())
        .map(SlotValue::Date)
}
