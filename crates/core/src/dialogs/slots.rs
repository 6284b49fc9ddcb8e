use std::fmt;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotName(pub String);

impl SlotName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SlotName {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Display for SlotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SlotValue {
    Integer(i64),
    Decimal(Decimal),
    Text(String),
    Date(NaiveDate),
    Boolean(bool),
}

impl SlotValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Self::Date(value) => Some(*value),
            _ => None,
        }
    }

    /// Numeric view over both integer and decimal slots.
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Self::Integer(value) => Some(Decimal::from(*value)),
            Self::Decimal(value) => Some(*value),
            _ => None,
        }
    }
}

impl fmt::Display for SlotValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(value) => write!(f, "{value}"),
            Self::Decimal(value) => write!(f, "{}", value.normalize()),
            Self::Text(value) => f.write_str(value),
            Self::Date(value) => write!(f, "{}", value.format("%A, %B %-d, %Y")),
            Self::Boolean(true) => f.write_str("yes"),
            Self::Boolean(false) => f.write_str("no"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillSource {
    UserEntered,
    PreFilled,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub name: SlotName,
    pub value: SlotValue,
    pub source: FillSource,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SlotError {
    #[error("slot `{0}` is already filled")]
    AlreadyFilled(SlotName),
    #[error("slot `{0}` is not filled")]
    NotFilled(SlotName),
}

/// Slots collected by one dialog invocation, kept in fill order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotStore {
    slots: Vec<Slot>,
}

impl SlotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &SlotName) -> Option<&SlotValue> {
        self.slot(name).map(|slot| &slot.value)
    }

    pub fn slot(&self, name: &SlotName) -> Option<&Slot> {
        self.slots.iter().find(|slot| &slot.name == name)
    }

    pub fn contains(&self, name: &SlotName) -> bool {
        self.slot(name).is_some()
    }

    pub fn require(&self, name: &SlotName) -> Result<&SlotValue, SlotError> {
        self.get(name).ok_or_else(|| SlotError::NotFilled(name.clone()))
    }

    pub fn fill(
        &mut self,
        name: SlotName,
        value: SlotValue,
        source: FillSource,
    ) -> Result<(), SlotError> {
        if self.contains(&name) {
            return Err(SlotError::AlreadyFilled(name));
        }
        self.slots.push(Slot { name, value, source });
        Ok(())
    }

    /// Fills `name` unless it already holds a value. Returns whether the value was stored.
    pub fn fill_if_empty(&mut self, name: SlotName, value: SlotValue, source: FillSource) -> bool {
        if self.contains(&name) {
            return false;
        }
        self.slots.push(Slot { name, value, source });
        true
    }

    /// Replaces a filled slot in place. Only correction steps go through here.
    pub fn correct(&mut self, name: SlotName, value: SlotValue) -> Result<(), SlotError> {
        let Some(slot) = self.slots.iter_mut().find(|slot| slot.name == name) else {
            return Err(SlotError::NotFilled(name));
        };
        slot.value = value;
        slot.source = FillSource::UserEntered;
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
