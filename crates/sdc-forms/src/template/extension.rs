use serde_json::Value;

use super::{Expression, Extension, PrimitiveElement, Questionnaire, QuestionnaireItem};
use crate::value::{AnswerType, AnswerValue};

/// Canonical URLs of the extensions the engine understands.
pub mod urls {
    pub const ENABLE_WHEN_EXPRESSION: &str =
        "http://hl7.org/fhir/uv/sdc/StructureDefinition/sdc-questionnaire-enableWhenExpression";
    pub const INITIAL_EXPRESSION: &str =
        "http://hl7.org/fhir/uv/sdc/StructureDefinition/sdc-questionnaire-initialExpression";
    pub const CALCULATED_EXPRESSION: &str =
        "http://hl7.org/fhir/uv/sdc/StructureDefinition/sdc-questionnaire-calculatedExpression";
    pub const ANSWER_EXPRESSION: &str =
        "http://hl7.org/fhir/uv/sdc/StructureDefinition/sdc-questionnaire-answerExpression";
    pub const OPTIONS_TOGGLE_EXPRESSION: &str = "http://hl7.org/fhir/uv/sdc/StructureDefinition/sdc-questionnaire-answerOptionsToggleExpression";
    pub const MIN_QUANTITY: &str =
        "http://hl7.org/fhir/uv/sdc/StructureDefinition/sdc-questionnaire-minQuantity";
    pub const MAX_QUANTITY: &str =
        "http://hl7.org/fhir/uv/sdc/StructureDefinition/sdc-questionnaire-maxQuantity";
    pub const PREFERRED_TERMINOLOGY_SERVER: &str = "http://hl7.org/fhir/uv/sdc/StructureDefinition/sdc-questionnaire-preferredTerminologyServer";

    pub const VARIABLE: &str = "http://hl7.org/fhir/StructureDefinition/variable";
    pub const MIN_OCCURS: &str = "http://hl7.org/fhir/StructureDefinition/questionnaire-minOccurs";
    pub const MAX_OCCURS: &str = "http://hl7.org/fhir/StructureDefinition/questionnaire-maxOccurs";
    pub const MIN_VALUE: &str = "http://hl7.org/fhir/StructureDefinition/minValue";
    pub const MAX_VALUE: &str = "http://hl7.org/fhir/StructureDefinition/maxValue";
    pub const MIN_LENGTH: &str = "http://hl7.org/fhir/StructureDefinition/minLength";
    pub const MAX_DECIMAL_PLACES: &str = "http://hl7.org/fhir/StructureDefinition/maxDecimalPlaces";
    pub const MIME_TYPE: &str = "http://hl7.org/fhir/StructureDefinition/mimeType";
    pub const MAX_SIZE: &str = "http://hl7.org/fhir/StructureDefinition/maxSize";
    pub const REGEX: &str = "http://hl7.org/fhir/StructureDefinition/regex";
    pub const HIDDEN: &str = "http://hl7.org/fhir/StructureDefinition/questionnaire-hidden";
    pub const ITEM_CONTROL: &str =
        "http://hl7.org/fhir/StructureDefinition/questionnaire-itemControl";
    pub const CQF_EXPRESSION: &str = "http://hl7.org/fhir/StructureDefinition/cqf-expression";
}

impl Extension {
    pub fn expression(&self) -> Option<Expression> {
        self.value
            .get("valueExpression")
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub fn string(&self) -> Option<&str> {
        ["valueString", "valueUri", "valueUrl", "valueCanonical", "valueCode"]
            .iter()
            .find_map(|key| self.value.get(*key).and_then(Value::as_str))
    }

    pub fn boolean(&self) -> Option<bool> {
        self.value.get("valueBoolean").and_then(Value::as_bool)
    }

    pub fn integer(&self) -> Option<i64> {
        self.value.get("valueInteger").and_then(Value::as_i64)
    }

    pub fn number(&self) -> Option<f64> {
        ["valueInteger", "valueDecimal"]
            .iter()
            .find_map(|key| self.value.get(*key).and_then(Value::as_f64))
    }

    /// `value[x]` decoded as whatever kind it declares.
    pub fn typed(&self) -> Option<AnswerValue> {
        AnswerValue::from_choice(&self.value, "value")
    }

    /// `value{Kind}` decoded as `kind`.
    pub fn typed_as(&self, kind: AnswerType) -> Option<AnswerValue> {
        self.value
            .get(&format!("value{}", kind.suffix()))
            .and_then(|value| AnswerValue::from_json(kind, value))
    }

    /// Codes of a `valueCodeableConcept`.
    pub fn concept_codes(&self) -> Vec<&str> {
        self.value
            .get("valueCodeableConcept")
            .and_then(|concept| concept.get("coding"))
            .and_then(Value::as_array)
            .map(|codings| {
                codings
                    .iter()
                    .filter_map(|coding| coding.get("code").and_then(Value::as_str))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn sub_extensions<'a>(&'a self, url: &'a str) -> impl Iterator<Item = &'a Extension> + 'a {
        self.extension.iter().filter(move |ext| ext.url == url)
    }
}

fn find<'a>(extensions: &'a [Extension], url: &str) -> Option<&'a Extension> {
    extensions.iter().find(|ext| ext.url == url)
}

/// One `answerOptionsToggleExpression` binding as authored.
#[derive(Debug, Clone, PartialEq)]
pub struct ToggleBinding {
    pub options: Vec<AnswerValue>,
    pub expression: Option<Expression>,
}

impl QuestionnaireItem {
    pub fn extension(&self, url: &str) -> Option<&Extension> {
        find(&self.extension, url)
    }

    pub fn extensions<'a>(&'a self, url: &'a str) -> impl Iterator<Item = &'a Extension> + 'a {
        self.extension.iter().filter(move |ext| ext.url == url)
    }

    /// `valueExpression` of the extension at `url`.
    pub fn expression(&self, url: &str) -> Option<Expression> {
        self.extension(url).and_then(Extension::expression)
    }

    /// Named `variable` expressions declared on this item.
    pub fn variables(&self) -> Vec<Expression> {
        self.extensions(urls::VARIABLE)
            .filter_map(Extension::expression)
            .collect()
    }

    pub fn toggles(&self) -> Vec<ToggleBinding> {
        self.extensions(urls::OPTIONS_TOGGLE_EXPRESSION)
            .map(|ext| ToggleBinding {
                options: ext
                    .sub_extensions("option")
                    .filter_map(Extension::typed)
                    .collect(),
                expression: ext
                    .sub_extensions("expression")
                    .find_map(Extension::expression),
            })
            .collect()
    }

    pub fn is_hidden(&self) -> bool {
        self.extension(urls::HIDDEN)
            .and_then(Extension::boolean)
            .unwrap_or(false)
    }

    /// First `questionnaire-itemControl` code (`page`, `header`, ...).
    pub fn item_control(&self) -> Option<&str> {
        self.extension(urls::ITEM_CONTROL)
            .and_then(|ext| ext.concept_codes().into_iter().next())
    }

    pub fn min_length(&self) -> Option<u64> {
        self.extension(urls::MIN_LENGTH)
            .and_then(Extension::integer)
            .and_then(|value| u64::try_from(value).ok())
    }

    pub fn max_decimal_places(&self) -> Option<u32> {
        self.extension(urls::MAX_DECIMAL_PLACES)
            .and_then(Extension::integer)
            .and_then(|value| u32::try_from(value).ok())
    }

    pub fn mime_types(&self) -> Vec<String> {
        self.extensions(urls::MIME_TYPE)
            .filter_map(Extension::string)
            .map(str::to_string)
            .collect()
    }

    pub fn max_size(&self) -> Option<u64> {
        self.extension(urls::MAX_SIZE)
            .and_then(Extension::number)
            .filter(|size| *size >= 0.0)
            .map(|size| size as u64)
    }

    pub fn regex(&self) -> Option<&str> {
        self.extension(urls::REGEX).and_then(Extension::string)
    }

    pub fn preferred_servers(&self) -> Vec<String> {
        preferred_servers(&self.extension)
    }

    /// `cqf-expression` attached to a primitive element such as `_text`.
    pub fn element_expression(element: Option<&PrimitiveElement>) -> Option<Expression> {
        element
            .and_then(|element| find(&element.extension, urls::CQF_EXPRESSION))
            .and_then(Extension::expression)
    }
}

impl Questionnaire {
    pub fn extension(&self, url: &str) -> Option<&Extension> {
        find(&self.extension, url)
    }

    pub fn variables(&self) -> Vec<Expression> {
        self.extension
            .iter()
            .filter(|ext| ext.url == urls::VARIABLE)
            .filter_map(Extension::expression)
            .collect()
    }

    pub fn preferred_servers(&self) -> Vec<String> {
        preferred_servers(&self.extension)
    }
}

fn preferred_servers(extensions: &[Extension]) -> Vec<String> {
    extensions
        .iter()
        .filter(|ext| ext.url == urls::PREFERRED_TERMINOLOGY_SERVER)
        .filter_map(Extension::string)
        .map(|server| server.trim_end_matches('/').to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn toggle_bindings_collect_options_and_expression() {
        let item: QuestionnaireItem = serde_json::from_value(json!({
            "linkId": "drink",
            "type": "coding",
            "extension": [{
                "url": urls::OPTIONS_TOGGLE_EXPRESSION,
                "extension": [
                    { "url": "option", "valueCoding": { "code": "beer" } },
                    { "url": "option", "valueCoding": { "code": "wine" } },
                    { "url": "expression", "valueExpression": {
                        "language": "application/x-fhir-query+json",
                        "expression": "{\"op\":\"literal\",\"value\":true}"
                    } }
                ]
            }]
        }))
        .expect("fixture should deserialize");

        let toggles = item.toggles();
        assert_eq!(toggles.len(), 1);
        assert_eq!(toggles[0].options.len(), 2);
        assert!(toggles[0].expression.is_some());
    }

    #[test]
    fn item_control_reads_the_first_code() {
        let item: QuestionnaireItem = serde_json::from_value(json!({
            "linkId": "p1",
            "type": "group",
            "extension": [{
                "url": urls::ITEM_CONTROL,
                "valueCodeableConcept": { "coding": [ { "code": "page" } ] }
            }]
        }))
        .expect("fixture should deserialize");
        assert_eq!(item.item_control(), Some("page"));
    }
}
