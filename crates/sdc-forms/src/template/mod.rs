//! Serde models for the Questionnaire template.
//!
//! Only the elements the engine reads are modelled; everything else is
//! ignored on input. Choice elements (`answer[x]`, `value[x]`, `initial.value[x]`)
//! are kept as flattened JSON maps and decoded on demand through
//! [`AnswerValue::from_choice`].

mod extension;

pub use extension::{ToggleBinding, urls};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::FormError;
use crate::value::{AnswerType, AnswerValue};

fn questionnaire_resource() -> String {
    "Questionnaire".to_string()
}

/// Root template resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Questionnaire {
    #[serde(default = "questionnaire_resource")]
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extension: Vec<Extension>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub item: Vec<QuestionnaireItem>,
}

impl Default for Questionnaire {
    fn default() -> Self {
        Self {
            resource_type: questionnaire_resource(),
            id: None,
            url: None,
            title: None,
            status: None,
            extension: Vec::new(),
            item: Vec::new(),
        }
    }
}

impl Questionnaire {
    pub fn from_json(value: Value) -> Result<Self, FormError> {
        let questionnaire: Questionnaire = serde_json::from_value(value)?;
        questionnaire.check_link_ids()?;
        Ok(questionnaire)
    }

    /// Every item must carry a `linkId`; tokens cannot be derived otherwise.
    pub fn check_link_ids(&self) -> Result<(), FormError> {
        fn walk(items: &[QuestionnaireItem], prefix: &str) -> Result<(), FormError> {
            for (index, item) in items.iter().enumerate() {
                let path = format!("{prefix}item[{index}]");
                if item.link_id.as_deref().is_none_or(str::is_empty) {
                    return Err(FormError::MissingLinkId { path });
                }
                walk(&item.item, &format!("{path}."))?;
            }
            Ok(())
        }
        walk(&self.item, "")
    }
}

/// `Questionnaire.item.type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum ItemType {
    Group,
    Display,
    Question,
    Boolean,
    Decimal,
    Integer,
    Date,
    DateTime,
    Time,
    String,
    Text,
    Url,
    Coding,
    Choice,
    #[serde(rename = "open-choice")]
    OpenChoice,
    Attachment,
    Reference,
    Quantity,
}

impl ItemType {
    /// Value kind collected by a question of this type.
    pub fn answer_type(self) -> Option<AnswerType> {
        Some(match self {
            ItemType::Group | ItemType::Display | ItemType::Question => return None,
            ItemType::Boolean => AnswerType::Boolean,
            ItemType::Decimal => AnswerType::Decimal,
            ItemType::Integer => AnswerType::Integer,
            ItemType::Date => AnswerType::Date,
            ItemType::DateTime => AnswerType::DateTime,
            ItemType::Time => AnswerType::Time,
            ItemType::String | ItemType::Text => AnswerType::String,
            ItemType::Url => AnswerType::Uri,
            ItemType::Coding | ItemType::Choice | ItemType::OpenChoice => AnswerType::Coding,
            ItemType::Attachment => AnswerType::Attachment,
            ItemType::Reference => AnswerType::Reference,
            ItemType::Quantity => AnswerType::Quantity,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum EnableWhenOperator {
    #[serde(rename = "exists")]
    Exists,
    #[serde(rename = "=")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
    #[serde(rename = ">")]
    Greater,
    #[serde(rename = "<")]
    Less,
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[serde(rename = "<=")]
    LessOrEqual,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum EnableBehavior {
    All,
    #[default]
    Any,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum DisabledDisplay {
    #[default]
    Hidden,
    Protected,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum AnswerConstraint {
    #[default]
    OptionsOnly,
    OptionsOrType,
    OptionsOrString,
}

impl AnswerConstraint {
    pub fn allows_custom(self) -> bool {
        !matches!(self, AnswerConstraint::OptionsOnly)
    }
}

/// One `enableWhen` condition; `answer[x]` stays in the flattened map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnableWhen {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extension: Vec<Extension>,
    pub question: String,
    pub operator: EnableWhenOperator,
    #[serde(flatten)]
    pub answer: Map<String, Value>,
}

impl EnableWhen {
    /// Expected value decoded as `kind`, if the condition carries `answer{Kind}`.
    pub fn expected_as(&self, kind: AnswerType) -> Option<AnswerValue> {
        let key = format!("answer{}", kind.suffix());
        self.answer
            .get(&key)
            .and_then(|value| AnswerValue::from_json(kind, value))
    }

    pub fn expected(&self) -> Option<AnswerValue> {
        AnswerValue::from_choice(&self.answer, "answer")
    }

    /// Number of `answer[x]` properties the condition carries.
    pub fn answer_count(&self) -> usize {
        self.answer
            .keys()
            .filter(|key| key.starts_with("answer"))
            .count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnswerOption {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_selected: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extension: Vec<Extension>,
    #[serde(flatten)]
    pub value: Map<String, Value>,
}

impl AnswerOption {
    pub fn value(&self) -> Option<AnswerValue> {
        AnswerValue::from_choice(&self.value, "value")
    }
}

/// `Questionnaire.item.initial`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Initial {
    #[serde(flatten)]
    pub value: Map<String, Value>,
}

impl Initial {
    pub fn value(&self) -> Option<AnswerValue> {
        AnswerValue::from_choice(&self.value, "value")
    }
}

/// FHIR `Extension` with its `value[x]` flattened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Extension {
    pub url: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extension: Vec<Extension>,
    #[serde(flatten)]
    pub value: Map<String, Value>,
}

/// FHIR `Expression`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Expression {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Extension holder of a primitive element (`_text`, `_required`, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PrimitiveElement {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extension: Vec<Extension>,
}

/// `Questionnaire.item`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct QuestionnaireItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeats: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_only: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enable_when: Vec<EnableWhen>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_behavior: Option<EnableBehavior>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_display: Option<DisabledDisplay>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_constraint: Option<AnswerConstraint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_value_set: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub answer_option: Vec<AnswerOption>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub initial: Vec<Initial>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extension: Vec<Extension>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub item: Vec<QuestionnaireItem>,
    #[serde(rename = "_text", default, skip_serializing_if = "Option::is_none")]
    pub text_element: Option<PrimitiveElement>,
    #[serde(rename = "_required", default, skip_serializing_if = "Option::is_none")]
    pub required_element: Option<PrimitiveElement>,
    #[serde(rename = "_readOnly", default, skip_serializing_if = "Option::is_none")]
    pub read_only_element: Option<PrimitiveElement>,
    #[serde(rename = "_repeats", default, skip_serializing_if = "Option::is_none")]
    pub repeats_element: Option<PrimitiveElement>,
}

impl QuestionnaireItem {
    /// `linkId`, which is checked to be present before any node is built.
    pub fn key(&self) -> &str {
        self.link_id.as_deref().unwrap_or_default()
    }

    pub fn answer_type(&self) -> Option<AnswerType> {
        self.item_type.answer_type()
    }

    pub fn is_required(&self) -> bool {
        self.required.unwrap_or(false)
    }

    pub fn is_repeating(&self) -> bool {
        self.repeats.unwrap_or(false)
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only.unwrap_or(false)
    }

    pub fn enable_behavior(&self) -> EnableBehavior {
        self.enable_behavior.unwrap_or_default()
    }

    pub fn disabled_display(&self) -> DisabledDisplay {
        self.disabled_display.unwrap_or_default()
    }

    pub fn answer_constraint(&self) -> AnswerConstraint {
        match self.answer_constraint {
            Some(constraint) => constraint,
            None if self.item_type == ItemType::OpenChoice => AnswerConstraint::OptionsOrString,
            None => AnswerConstraint::OptionsOnly,
        }
    }

    /// Static `initial` values decoded for this item's answer kind.
    pub fn initial_values(&self) -> Vec<AnswerValue> {
        self.initial.iter().filter_map(Initial::value).collect()
    }

    /// Option values flagged `initialSelected`.
    pub fn initially_selected(&self) -> Vec<AnswerValue> {
        self.answer_option
            .iter()
            .filter(|option| option.initial_selected.unwrap_or(false))
            .filter_map(AnswerOption::value)
            .collect()
    }

    /// Has `answerOption`, `answerValueSet` or an answer expression.
    pub fn has_options(&self) -> bool {
        !self.answer_option.is_empty()
            || self.answer_value_set.is_some()
            || self.extension(urls::ANSWER_EXPRESSION).is_some()
    }
}
