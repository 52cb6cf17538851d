//! Persisted response resource shape.

use schemars::JsonSchema;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::value::AnswerValue;

fn response_resource() -> String {
    "QuestionnaireResponse".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct QuestionnaireResponse {
    #[serde(default = "response_resource")]
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub questionnaire: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub item: Vec<ResponseItem>,
}

impl Default for QuestionnaireResponse {
    fn default() -> Self {
        Self {
            resource_type: response_resource(),
            id: None,
            questionnaire: None,
            status: None,
            item: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResponseItem {
    pub link_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub answer: Vec<ResponseAnswer>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub item: Vec<ResponseItem>,
}

impl ResponseItem {
    pub fn new(link_id: impl Into<String>) -> Self {
        Self {
            link_id: link_id.into(),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.answer.is_empty() && self.item.is_empty()
    }
}

/// One answer; `value[x]` is (de)serialized as a FHIR choice element.
#[derive(Debug, Clone, Default, PartialEq, JsonSchema)]
pub struct ResponseAnswer {
    #[schemars(with = "Option<Value>")]
    pub value: Option<AnswerValue>,
    pub item: Vec<ResponseItem>,
}

impl ResponseAnswer {
    pub fn new(value: AnswerValue) -> Self {
        Self {
            value: Some(value),
            item: Vec::new(),
        }
    }
}

impl Serialize for ResponseAnswer {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut object = Map::new();
        if let Some(value) = &self.value {
            let (key, payload) = value.to_choice("value");
            object.insert(key, payload);
        }
        if !self.item.is_empty() {
            let items = serde_json::to_value(&self.item).map_err(serde::ser::Error::custom)?;
            object.insert("item".into(), items);
        }
        object.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ResponseAnswer {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let object = Map::<String, Value>::deserialize(deserializer)?;
        let item = match object.get("item") {
            Some(items) => serde_json::from_value(items.clone()).map_err(D::Error::custom)?,
            None => Vec::new(),
        };
        Ok(Self {
            value: AnswerValue::from_choice(&object, "value"),
            item,
        })
    }
}

/// Depth-first search for the first response item carrying `link_id`.
pub fn find_item<'a>(items: &'a [ResponseItem], link_id: &str) -> Option<&'a ResponseItem> {
    items.iter().find_map(|item| {
        if item.link_id == link_id {
            return Some(item);
        }
        find_item(&item.item, link_id).or_else(|| {
            item.answer
                .iter()
                .find_map(|answer| find_item(&answer.item, link_id))
        })
    })
}
