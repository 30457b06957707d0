use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::SlotError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotName {
    Target,
    Amount,
    Memo,
    Alias,
    TransferDate,
}

impl SlotName {
    pub const ALL: [SlotName; 5] =
        [Self::Target, Self::Amount, Self::Memo, Self::Alias, Self::TransferDate];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Target => "target",
            Self::Amount => "amount",
            Self::Memo => "memo",
            Self::Alias => "alias",
            Self::TransferDate => "transfer_date",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Target => "recipient",
            Self::Amount => "amount",
            Self::Memo => "memo",
            Self::Alias => "sender name",
            Self::TransferDate => "transfer date",
        }
    }
}

impl fmt::Display for SlotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SlotName {
    type Err = SlotError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|slot| slot.as_str() == value)
            .ok_or_else(|| SlotError::UnknownSlot { slot: value.to_owned() })
    }
}

/// A cast, normalized and rule-checked slot value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlotValue {
    Text(String),
    Integer(i64),
    Date(NaiveDate),
}

impl SlotValue {
    pub fn to_json(&self) -> Value {
        match self {
            Self::Text(text) => Value::String(text.clone()),
            Self::Integer(number) => Value::from(*number),
            Self::Date(date) => Value::String(date.format("%Y-%m-%d").to_string()),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Slots {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer_date: Option<NaiveDate>,
}

impl Slots {
    pub fn is_set(&self, slot: SlotName) -> bool {
        match slot {
            SlotName::Target => self.target.is_some(),
            SlotName::Amount => self.amount.is_some(),
            SlotName::Memo => self.memo.is_some(),
            SlotName::Alias => self.alias.is_some(),
            SlotName::TransferDate => self.transfer_date.is_some(),
        }
    }

    pub fn has_any(&self) -> bool {
        SlotName::ALL.into_iter().any(|slot| self.is_set(slot))
    }

    pub fn get(&self, slot: SlotName) -> Option<SlotValue> {
        match slot {
            SlotName::Target => self.target.clone().map(SlotValue::Text),
            SlotName::Amount => self.amount.map(SlotValue::Integer),
            SlotName::Memo => self.memo.clone().map(SlotValue::Text),
            SlotName::Alias => self.alias.clone().map(SlotValue::Text),
            SlotName::TransferDate => self.transfer_date.map(SlotValue::Date),
        }
    }

    /// Returns false when the value kind does not fit the slot.
    pub fn write(&mut self, slot: SlotName, value: SlotValue) -> bool {
        match (slot, value) {
            (SlotName::Target, SlotValue::Text(text)) => self.target = Some(text),
            (SlotName::Amount, SlotValue::Integer(number)) => self.amount = Some(number),
            (SlotName::Memo, SlotValue::Text(text)) => self.memo = Some(text),
            (SlotName::Alias, SlotValue::Text(text)) => self.alias = Some(text),
            (SlotName::TransferDate, SlotValue::Date(date)) => self.transfer_date = Some(date),
            _ => return false,
        }
        true
    }

    pub fn clear(&mut self, slot: SlotName) {
        match slot {
            SlotName::Target => self.target = None,
            SlotName::Amount => self.amount = None,
            SlotName::Memo => self.memo = None,
            SlotName::Alias => self.alias = None,
            SlotName::TransferDate => self.transfer_date = None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotKind {
    Text,
    Integer,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotFormat {
    IsoDate,
}

#[derive(Clone, Copy, Debug)]
pub struct SlotSpec {
    pub name: SlotName,
    pub kind: SlotKind,
    pub required: bool,
    pub format: Option<SlotFormat>,
    pub rule: Option<fn(&SlotValue) -> bool>,
    pub error_message: &'static str,
}

impl SlotSpec {
    /// Runs the cast, normalize, rule pipeline on one raw value.
    pub fn validate(&self, raw: &Value) -> Result<SlotValue, SlotError> {
        let cast = cast(self.kind, raw).ok_or_else(|| SlotError::Cast {
            slot: self.name.as_str().to_owned(),
            value: raw.to_string(),
        })?;

        let normalized = match self.format {
            Some(format) => normalize(format, cast).ok_or_else(|| SlotError::Format {
                slot: self.name.as_str().to_owned(),
                value: raw.to_string(),
            })?,
            None => cast,
        };

        match self.rule {
            Some(rule) if !rule(&normalized) => {
                Err(SlotError::Rule { slot: self.name.as_str().to_owned() })
            }
            _ => Ok(normalized),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SlotSchema {
    specs: Vec<SlotSpec>,
}

impl SlotSchema {
    pub fn new(specs: Vec<SlotSpec>) -> Self {
        Self { specs }
    }

    pub fn transfer() -> Self {
        Self::new(vec![
            SlotSpec {
                name: SlotName::Target,
                kind: SlotKind::Text,
                required: true,
                format: None,
                rule: Some(non_blank),
                error_message: "Please tell me who should receive the transfer.",
            },
            SlotSpec {
                name: SlotName::Amount,
                kind: SlotKind::Integer,
                required: true,
                format: None,
                rule: Some(positive_amount),
                error_message: "The amount must be at least 1.",
            },
            SlotSpec {
                name: SlotName::Memo,
                kind: SlotKind::Text,
                required: false,
                format: None,
                rule: None,
                error_message: "That memo could not be used.",
            },
            SlotSpec {
                name: SlotName::Alias,
                kind: SlotKind::Text,
                required: false,
                format: None,
                rule: None,
                error_message: "That sender name could not be used.",
            },
            SlotSpec {
                name: SlotName::TransferDate,
                kind: SlotKind::Text,
                required: false,
                format: Some(SlotFormat::IsoDate),
                rule: None,
                error_message: "Please give the transfer date as YYYY-MM-DD.",
            },
        ])
    }

    pub fn spec(&self, slot: SlotName) -> Option<&SlotSpec> {
        self.specs.iter().find(|spec| spec.name == slot)
    }

    pub fn required(&self) -> impl Iterator<Item = SlotName> + '_ {
        self.specs.iter().filter(|spec| spec.required).map(|spec| spec.name)
    }

    pub fn missing_required(&self, slots: &Slots) -> Vec<SlotName> {
        self.required().filter(|slot| !slots.is_set(*slot)).collect()
    }
}

impl Default for SlotSchema {
    fn default() -> Self {
        Self::transfer()
    }
}

fn cast(kind: SlotKind, raw: &Value) -> Option<SlotValue> {
    match kind {
        SlotKind::Text => match raw {
            Value::String(text) => Some(SlotValue::Text(text.trim().to_owned())),
            Value::Number(number) => Some(SlotValue::Text(number.to_string())),
            _ => None,
        },
        SlotKind::Integer => match raw {
            Value::Number(number) => number.as_i64().or_else(|| {
                number.as_f64().filter(|f| f.is_finite() && f.fract() == 0.0).map(|f| f as i64)
            }),
            Value::String(text) => text.trim().parse::<i64>().ok(),
            _ => None,
        }
        .map(SlotValue::Integer),
    }
}

fn normalize(format: SlotFormat, value: SlotValue) -> Option<SlotValue> {
    match (format, value) {
        (SlotFormat::IsoDate, SlotValue::Text(text)) => parse_iso_date(&text).map(SlotValue::Date),
        (SlotFormat::IsoDate, SlotValue::Date(date)) => Some(SlotValue::Date(date)),
        _ => None,
    }
}

/// Accepts exactly `YYYY-MM-DD` with zero padding.
pub fn parse_iso_date(text: &str) -> Option<NaiveDate> {
    let bytes = text.as_bytes();
    let shaped = bytes.len() == 10
        && bytes[4] == b'-'
        && bytes[7] == b'-'
        && bytes.iter().enumerate().all(|(i, b)| i == 4 || i == 7 || b.is_ascii_digit());
    if !shaped {
        return None;
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()
}

fn non_blank(value: &SlotValue) -> bool {
    matches!(value, SlotValue::Text(text) if !text.trim().is_empty())
}

fn positive_amount(value: &SlotValue) -> bool {
    matches!(value, SlotValue::Integer(amount) if *amount >= 1)
}
