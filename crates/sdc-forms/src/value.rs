//! Typed answer values and the comparisons the engine needs on them.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time};

/// FHIR `Coding`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

impl Coding {
    pub fn new(system: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            system: Some(system.into()),
            code: Some(code.into()),
            ..Self::default()
        }
    }

    pub fn with_display(mut self, display: impl Into<String>) -> Self {
        self.display = Some(display.into());
        self
    }
}

/// FHIR `Quantity`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quantity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl Quantity {
    pub fn new(value: f64, unit: impl Into<String>) -> Self {
        Self {
            value: Some(value),
            unit: Some(unit.into()),
            ..Self::default()
        }
    }

    /// Two quantities are comparable only when unit and system agree.
    pub fn same_unit(&self, other: &Quantity) -> bool {
        let unit = |q: &Quantity| q.code.clone().or_else(|| q.unit.clone());
        unit(self) == unit(other) && self.system == other.system
    }
}

/// FHIR `Reference`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

/// FHIR `Attachment`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Kind of value a question collects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnswerType {
    Boolean,
    Decimal,
    Integer,
    Date,
    DateTime,
    Time,
    String,
    Uri,
    Coding,
    Quantity,
    Reference,
    Attachment,
}

impl AnswerType {
    pub const ALL: [AnswerType; 12] = [
        AnswerType::Boolean,
        AnswerType::Decimal,
        AnswerType::Integer,
        AnswerType::Date,
        AnswerType::DateTime,
        AnswerType::Time,
        AnswerType::String,
        AnswerType::Uri,
        AnswerType::Coding,
        AnswerType::Quantity,
        AnswerType::Reference,
        AnswerType::Attachment,
    ];

    /// Suffix of the FHIR choice element (`valueDate`, `answerCoding`, ...).
    pub fn suffix(self) -> &'static str {
        match self {
            AnswerType::Boolean => "Boolean",
            AnswerType::Decimal => "Decimal",
            AnswerType::Integer => "Integer",
            AnswerType::Date => "Date",
            AnswerType::DateTime => "DateTime",
            AnswerType::Time => "Time",
            AnswerType::String => "String",
            AnswerType::Uri => "Uri",
            AnswerType::Coding => "Coding",
            AnswerType::Quantity => "Quantity",
            AnswerType::Reference => "Reference",
            AnswerType::Attachment => "Attachment",
        }
    }

    /// Kinds the ordering operators of `enableWhen` accept.
    pub fn is_ordered(self) -> bool {
        matches!(
            self,
            AnswerType::Integer
                | AnswerType::Decimal
                | AnswerType::Date
                | AnswerType::DateTime
                | AnswerType::Time
                | AnswerType::String
                | AnswerType::Quantity
        )
    }
}

/// One typed answer value.
#[derive(Debug, Clone, PartialEq)]
pub enum AnswerValue {
    Boolean(bool),
    Decimal(f64),
    Integer(i64),
    Date(String),
    DateTime(String),
    Time(String),
    String(String),
    Uri(String),
    Coding(Coding),
    Quantity(Quantity),
    Reference(Reference),
    Attachment(Attachment),
}

impl AnswerValue {
    pub fn answer_type(&self) -> AnswerType {
        match self {
            AnswerValue::Boolean(_) => AnswerType::Boolean,
            AnswerValue::Decimal(_) => AnswerType::Decimal,
            AnswerValue::Integer(_) => AnswerType::Integer,
            AnswerValue::Date(_) => AnswerType::Date,
            AnswerValue::DateTime(_) => AnswerType::DateTime,
            AnswerValue::Time(_) => AnswerType::Time,
            AnswerValue::String(_) => AnswerType::String,
            AnswerValue::Uri(_) => AnswerType::Uri,
            AnswerValue::Coding(_) => AnswerType::Coding,
            AnswerValue::Quantity(_) => AnswerType::Quantity,
            AnswerValue::Reference(_) => AnswerType::Reference,
            AnswerValue::Attachment(_) => AnswerType::Attachment,
        }
    }

    /// Reads the first `{prefix}{Type}` property of a FHIR object, e.g.
    /// `valueCoding` on a response answer or `answerInteger` on `enableWhen`.
    pub fn from_choice(object: &Map<String, Value>, prefix: &str) -> Option<AnswerValue> {
        AnswerType::ALL.iter().find_map(|kind| {
            let key = format!("{prefix}{}", kind.suffix());
            object
                .get(&key)
                .and_then(|value| AnswerValue::from_json(*kind, value))
        })
    }

    /// Writes the value as a `{prefix}{Type}` property pair.
    pub fn to_choice(&self, prefix: &str) -> (String, Value) {
        (
            format!("{prefix}{}", self.answer_type().suffix()),
            self.to_json(),
        )
    }

    /// Interprets a plain JSON value (an expression result, a choice element
    /// payload) as a value of `kind`.
    pub fn from_json(kind: AnswerType, value: &Value) -> Option<AnswerValue> {
        match kind {
            AnswerType::Boolean => match value {
                Value::Bool(flag) => Some(AnswerValue::Boolean(*flag)),
                Value::String(text) => match text.as_str() {
                    "true" => Some(AnswerValue::Boolean(true)),
                    "false" => Some(AnswerValue::Boolean(false)),
                    _ => None,
                },
                _ => None,
            },
            AnswerType::Decimal => value.as_f64().map(AnswerValue::Decimal),
            AnswerType::Integer => value
                .as_i64()
                .or_else(|| {
                    value
                        .as_f64()
                        .filter(|number| number.fract() == 0.0)
                        .map(|number| number as i64)
                })
                .map(AnswerValue::Integer),
            AnswerType::Date => value.as_str().map(|s| AnswerValue::Date(s.to_string())),
            AnswerType::DateTime => value
                .as_str()
                .map(|s| AnswerValue::DateTime(s.to_string())),
            AnswerType::Time => value.as_str().map(|s| AnswerValue::Time(s.to_string())),
            AnswerType::String => value.as_str().map(|s| AnswerValue::String(s.to_string())),
            AnswerType::Uri => value.as_str().map(|s| AnswerValue::Uri(s.to_string())),
            AnswerType::Coding => match value {
                Value::String(code) => Some(AnswerValue::Coding(Coding {
                    code: Some(code.clone()),
                    ..Coding::default()
                })),
                Value::Object(_) => serde_json::from_value(value.clone())
                    .ok()
                    .map(AnswerValue::Coding),
                _ => None,
            },
            AnswerType::Quantity => match value {
                Value::Number(number) => number.as_f64().map(|value| {
                    AnswerValue::Quantity(Quantity {
                        value: Some(value),
                        ..Quantity::default()
                    })
                }),
                Value::Object(_) => serde_json::from_value(value.clone())
                    .ok()
                    .map(AnswerValue::Quantity),
                _ => None,
            },
            AnswerType::Reference => serde_json::from_value(value.clone())
                .ok()
                .map(AnswerValue::Reference),
            AnswerType::Attachment => serde_json::from_value(value.clone())
                .ok()
                .map(AnswerValue::Attachment),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            AnswerValue::Boolean(flag) => Value::Bool(*flag),
            AnswerValue::Decimal(number) => Value::from(*number),
            AnswerValue::Integer(number) => Value::from(*number),
            AnswerValue::Date(text)
            | AnswerValue::DateTime(text)
            | AnswerValue::Time(text)
            | AnswerValue::String(text)
            | AnswerValue::Uri(text) => Value::String(text.clone()),
            AnswerValue::Coding(coding) => serde_json::to_value(coding).unwrap_or(Value::Null),
            AnswerValue::Quantity(quantity) => {
                serde_json::to_value(quantity).unwrap_or(Value::Null)
            }
            AnswerValue::Reference(reference) => {
                serde_json::to_value(reference).unwrap_or(Value::Null)
            }
            AnswerValue::Attachment(attachment) => {
                serde_json::to_value(attachment).unwrap_or(Value::Null)
            }
        }
    }

    /// Blank strings do not count as an answer.
    pub fn is_meaningful(&self) -> bool {
        match self {
            AnswerValue::String(text) | AnswerValue::Uri(text) => !text.trim().is_empty(),
            AnswerValue::Coding(coding) => coding.code.is_some() || coding.display.is_some(),
            AnswerValue::Quantity(quantity) => quantity.value.is_some(),
            _ => true,
        }
    }

    /// Equality within one answer type.
    pub fn type_eq(&self, other: &AnswerValue) -> bool {
        match (self, other) {
            (AnswerValue::Boolean(a), AnswerValue::Boolean(b)) => a == b,
            (AnswerValue::Decimal(a), AnswerValue::Decimal(b)) => a == b,
            (AnswerValue::Integer(a), AnswerValue::Integer(b)) => a == b,
            (AnswerValue::Date(a), AnswerValue::Date(b)) => {
                compare_dates(a, b).map_or(a == b, Ordering::is_eq)
            }
            (AnswerValue::DateTime(a), AnswerValue::DateTime(b)) => {
                compare_date_times(a, b).map_or(a == b, Ordering::is_eq)
            }
            (AnswerValue::Time(a), AnswerValue::Time(b)) => {
                compare_times(a, b).map_or(a == b, Ordering::is_eq)
            }
            (
                AnswerValue::String(a) | AnswerValue::Uri(a),
                AnswerValue::String(b) | AnswerValue::Uri(b),
            ) => a == b,
            (AnswerValue::Coding(a), AnswerValue::Coding(b)) => {
                let systems_agree = match (&a.system, &b.system) {
                    (Some(x), Some(y)) => x == y,
                    _ => true,
                };
                match (&a.code, &b.code) {
                    (Some(x), Some(y)) => x == y && systems_agree,
                    (None, None) => a.display.is_some() && a.display == b.display,
                    _ => false,
                }
            }
            (AnswerValue::Quantity(a), AnswerValue::Quantity(b)) => {
                a.same_unit(b) && a.value == b.value
            }
            (AnswerValue::Reference(a), AnswerValue::Reference(b)) => {
                a.reference.is_some() && a.reference == b.reference
            }
            (AnswerValue::Attachment(a), AnswerValue::Attachment(b)) => a == b,
            _ => false,
        }
    }

    /// Ordering for the comparable kinds; `None` when the pair is not
    /// comparable (different kinds, unparsable calendar values, quantities in
    /// different units).
    pub fn compare(&self, other: &AnswerValue) -> Option<Ordering> {
        match (self, other) {
            (AnswerValue::Integer(a), AnswerValue::Integer(b)) => Some(a.cmp(b)),
            (AnswerValue::Decimal(a), AnswerValue::Decimal(b)) => a.partial_cmp(b),
            (AnswerValue::Integer(a), AnswerValue::Decimal(b)) => (*a as f64).partial_cmp(b),
            (AnswerValue::Decimal(a), AnswerValue::Integer(b)) => a.partial_cmp(&(*b as f64)),
            (AnswerValue::Date(a), AnswerValue::Date(b)) => compare_dates(a, b),
            (AnswerValue::DateTime(a), AnswerValue::DateTime(b)) => compare_date_times(a, b),
            (AnswerValue::Time(a), AnswerValue::Time(b)) => compare_times(a, b),
            (AnswerValue::String(a), AnswerValue::String(b)) => Some(a.cmp(b)),
            (AnswerValue::Quantity(a), AnswerValue::Quantity(b)) if a.same_unit(b) => {
                a.value?.partial_cmp(&b.value?)
            }
            _ => None,
        }
    }

    /// Stable identifier derived from the typed value.
    pub fn token(&self) -> String {
        match self {
            AnswerValue::Boolean(flag) => format!("boolean:{flag}"),
            AnswerValue::Decimal(number) => format!("decimal:{number}"),
            AnswerValue::Integer(number) => format!("integer:{number}"),
            AnswerValue::Date(text) => format!("date:{text}"),
            AnswerValue::DateTime(text) => format!("dateTime:{text}"),
            AnswerValue::Time(text) => format!("time:{text}"),
            AnswerValue::String(text) => format!("string:{text}"),
            AnswerValue::Uri(text) => format!("uri:{text}"),
            AnswerValue::Coding(coding) => format!(
                "coding:{}|{}",
                coding.system.as_deref().unwrap_or_default(),
                coding
                    .code
                    .as_deref()
                    .or(coding.display.as_deref())
                    .unwrap_or_default()
            ),
            AnswerValue::Quantity(quantity) => format!(
                "quantity:{}|{}",
                quantity.value.map(|v| v.to_string()).unwrap_or_default(),
                quantity
                    .code
                    .as_deref()
                    .or(quantity.unit.as_deref())
                    .unwrap_or_default()
            ),
            AnswerValue::Reference(reference) => format!(
                "reference:{}",
                reference.reference.as_deref().unwrap_or_default()
            ),
            AnswerValue::Attachment(attachment) => format!(
                "attachment:{}",
                attachment
                    .url
                    .as_deref()
                    .or(attachment.title.as_deref())
                    .unwrap_or_default()
            ),
        }
    }

    /// Human readable label used for option lists.
    pub fn label(&self) -> String {
        match self {
            AnswerValue::Boolean(true) => "Yes".to_string(),
            AnswerValue::Boolean(false) => "No".to_string(),
            AnswerValue::Decimal(number) => number.to_string(),
            AnswerValue::Integer(number) => number.to_string(),
            AnswerValue::Date(text)
            | AnswerValue::DateTime(text)
            | AnswerValue::Time(text)
            | AnswerValue::String(text)
            | AnswerValue::Uri(text) => text.clone(),
            AnswerValue::Coding(coding) => coding
                .display
                .clone()
                .or_else(|| coding.code.clone())
                .unwrap_or_default(),
            AnswerValue::Quantity(quantity) => format!(
                "{} {}",
                quantity.value.map(|v| v.to_string()).unwrap_or_default(),
                quantity.unit.as_deref().unwrap_or_default()
            )
            .trim()
            .to_string(),
            AnswerValue::Reference(reference) => reference
                .display
                .clone()
                .or_else(|| reference.reference.clone())
                .unwrap_or_default(),
            AnswerValue::Attachment(attachment) => attachment
                .title
                .clone()
                .or_else(|| attachment.url.clone())
                .unwrap_or_default(),
        }
    }
}

/// Token used for the "no value" option.
pub const NULL_TOKEN: &str = "null";

/// Token of an optional value.
pub fn value_token(value: Option<&AnswerValue>) -> String {
    value.map_or_else(|| NULL_TOKEN.to_string(), AnswerValue::token)
}

fn parse_date(text: &str) -> Option<Date> {
    Date::parse(text, format_description!("[year]-[month]-[day]")).ok()
}

fn is_partial_date(text: &str) -> bool {
    let bytes = text.as_bytes();
    match bytes.len() {
        4 => bytes.iter().all(u8::is_ascii_digit),
        7 => bytes[..4].iter().all(u8::is_ascii_digit)
            && bytes[4] == b'-'
            && bytes[5..].iter().all(u8::is_ascii_digit),
        _ => false,
    }
}

fn compare_dates(a: &str, b: &str) -> Option<Ordering> {
    match (parse_date(a), parse_date(b)) {
        (Some(x), Some(y)) => Some(x.cmp(&y)),
        _ if a.len() == b.len() && is_partial_date(a) && is_partial_date(b) => Some(a.cmp(b)),
        _ => None,
    }
}

enum DateTimeValue {
    Offset(OffsetDateTime),
    Local(PrimitiveDateTime),
}

fn parse_date_time(text: &str) -> Option<DateTimeValue> {
    if let Ok(value) = OffsetDateTime::parse(text, &time::format_description::well_known::Rfc3339) {
        return Some(DateTimeValue::Offset(value));
    }
    PrimitiveDateTime::parse(
        text,
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
    )
    .ok()
    .map(DateTimeValue::Local)
}

fn compare_date_times(a: &str, b: &str) -> Option<Ordering> {
    match (parse_date_time(a)?, parse_date_time(b)?) {
        (DateTimeValue::Offset(x), DateTimeValue::Offset(y)) => Some(x.cmp(&y)),
        (DateTimeValue::Local(x), DateTimeValue::Local(y)) => Some(x.cmp(&y)),
        _ => None,
    }
}

fn parse_time(text: &str) -> Option<Time> {
    Time::parse(text, format_description!("[hour]:[minute]:[second]"))
        .or_else(|_| Time::parse(text, format_description!("[hour]:[minute]")))
        .ok()
}

fn compare_times(a: &str, b: &str) -> Option<Ordering> {
    Some(parse_time(a)?.cmp(&parse_time(b)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_choice_elements_by_prefix() {
        let object = json!({ "answerCoding": { "system": "s", "code": "a" } });
        let value = AnswerValue::from_choice(object.as_object().unwrap(), "answer");
        assert_eq!(value, Some(AnswerValue::Coding(Coding::new("s", "a"))));

        let (key, payload) = AnswerValue::Integer(4).to_choice("value");
        assert_eq!(key, "valueInteger");
        assert_eq!(payload, json!(4));
    }

    #[test]
    fn coding_equality_ignores_missing_system() {
        let a = AnswerValue::Coding(Coding::new("s", "x"));
        let b = AnswerValue::Coding(Coding {
            code: Some("x".into()),
            ..Coding::default()
        });
        let c = AnswerValue::Coding(Coding::new("other", "x"));
        assert!(a.type_eq(&b));
        assert!(!a.type_eq(&c));
    }

    #[test]
    fn calendar_values_compare_after_parsing() {
        let early = AnswerValue::Date("2020-01-05".into());
        let late = AnswerValue::Date("2020-11-01".into());
        assert_eq!(early.compare(&late), Some(Ordering::Less));
        assert_eq!(
            AnswerValue::Date("2020".into()).compare(&AnswerValue::Date("2021".into())),
            Some(Ordering::Less)
        );
        assert_eq!(
            AnswerValue::Date("not-a-date".into()).compare(&late),
            None
        );
        assert_eq!(
            AnswerValue::Time("09:30".into()).compare(&AnswerValue::Time("10:00:00".into())),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn quantities_in_different_units_do_not_compare() {
        let kg = AnswerValue::Quantity(Quantity::new(80.0, "kg"));
        let lb = AnswerValue::Quantity(Quantity::new(10.0, "lb"));
        assert_eq!(kg.compare(&lb), None);
        assert!(!kg.type_eq(&lb));
    }

    #[test]
    fn whitespace_strings_are_not_meaningful() {
        assert!(!AnswerValue::String("   ".into()).is_meaningful());
        assert!(AnswerValue::String(" hi ".into()).is_meaningful());
    }

    #[test]
    fn tokens_are_stable_per_typed_value() {
        assert_eq!(
            AnswerValue::Coding(Coding::new("http://loinc.org", "LA33-6")).token(),
            "coding:http://loinc.org|LA33-6"
        );
        assert_eq!(value_token(None), NULL_TOKEN);
    }
}
