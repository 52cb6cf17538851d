use std::cmp::Ordering;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Environment, ExpressionEvaluator, ExpressionKind};
use crate::error::EvalError;

/// Media type of [`JsonExpr`] expression text.
pub const JSON_EXPR_LANGUAGE: &str = "application/x-sdc-expression+json";

fn resource_root() -> String {
    "resource".to_string()
}

/// Small JSON-encoded expression tree.
///
/// Every operation yields a collection, mirroring FHIRPath: an empty
/// collection means "no value" and propagates through comparisons.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum JsonExpr {
    Literal {
        value: Value,
    },
    Var {
        name: String,
    },
    /// Answer values of every response item with `link_id` below `%{from}`.
    Answers {
        link_id: String,
        #[serde(default = "resource_root")]
        from: String,
    },
    Exists {
        expression: Box<JsonExpr>,
    },
    Count {
        expression: Box<JsonExpr>,
    },
    Sum {
        expressions: Vec<JsonExpr>,
    },
    And {
        expressions: Vec<JsonExpr>,
    },
    Or {
        expressions: Vec<JsonExpr>,
    },
    Not {
        expression: Box<JsonExpr>,
    },
    Eq {
        left: Box<JsonExpr>,
        right: Box<JsonExpr>,
    },
    Ne {
        left: Box<JsonExpr>,
        right: Box<JsonExpr>,
    },
    Lt {
        left: Box<JsonExpr>,
        right: Box<JsonExpr>,
    },
    Lte {
        left: Box<JsonExpr>,
        right: Box<JsonExpr>,
    },
    Gt {
        left: Box<JsonExpr>,
        right: Box<JsonExpr>,
    },
    Gte {
        left: Box<JsonExpr>,
        right: Box<JsonExpr>,
    },
}

impl JsonExpr {
    pub fn parse(text: &str) -> Result<Self, EvalError> {
        serde_json::from_str(text).map_err(|err| EvalError::Parse(err.to_string()))
    }

    pub fn evaluate(&self, env: &Environment<'_>) -> Result<Vec<Value>, EvalError> {
        match self {
            JsonExpr::Literal { value } => Ok(match value {
                Value::Null => Vec::new(),
                Value::Array(values) => values.clone(),
                other => vec![other.clone()],
            }),
            JsonExpr::Var { name } => env
                .get(name)
                .ok_or_else(|| EvalError::UnknownVariable(name.trim_start_matches('%').into())),
            JsonExpr::Answers { link_id, from } => {
                let roots = env
                    .get(from)
                    .ok_or_else(|| EvalError::UnknownVariable(from.clone()))?;
                let mut found = Vec::new();
                for root in &roots {
                    collect_answers(root, link_id, &mut found);
                }
                Ok(found)
            }
            JsonExpr::Exists { expression } => {
                Ok(vec![Value::Bool(!expression.evaluate(env)?.is_empty())])
            }
            JsonExpr::Count { expression } => {
                Ok(vec![Value::from(expression.evaluate(env)?.len())])
            }
            JsonExpr::Sum { expressions } => {
                let mut total = 0.0;
                let mut integral = true;
                for expression in expressions {
                    for value in expression.evaluate(env)? {
                        let number = numeric(&value).ok_or_else(|| {
                            EvalError::Evaluation(format!("sum of non-numeric value {value}"))
                        })?;
                        integral &= value.is_i64() || value.is_u64();
                        total += number;
                    }
                }
                Ok(vec![if integral {
                    Value::from(total as i64)
                } else {
                    Value::from(total)
                }])
            }
            JsonExpr::And { expressions } => Self::evaluate_and(expressions, env),
            JsonExpr::Or { expressions } => Self::evaluate_or(expressions, env),
            JsonExpr::Not { expression } => Ok(expression
                .evaluate_bool(env)?
                .map(|value| vec![Value::Bool(!value)])
                .unwrap_or_default()),
            JsonExpr::Eq { left, right } => {
                Self::evaluate_binary(left, right, env, |l, r| Some(values_equal(l, r)))
            }
            JsonExpr::Ne { left, right } => {
                Self::evaluate_binary(left, right, env, |l, r| Some(!values_equal(l, r)))
            }
            JsonExpr::Lt { left, right } => Self::evaluate_binary(left, right, env, |l, r| {
                compare_values(l, r).map(Ordering::is_lt)
            }),
            JsonExpr::Lte { left, right } => Self::evaluate_binary(left, right, env, |l, r| {
                compare_values(l, r).map(Ordering::is_le)
            }),
            JsonExpr::Gt { left, right } => Self::evaluate_binary(left, right, env, |l, r| {
                compare_values(l, r).map(Ordering::is_gt)
            }),
            JsonExpr::Gte { left, right } => Self::evaluate_binary(left, right, env, |l, r| {
                compare_values(l, r).map(Ordering::is_ge)
            }),
        }
    }

    /// Singleton boolean view of the result; `None` for an empty collection.
    pub fn evaluate_bool(&self, env: &Environment<'_>) -> Result<Option<bool>, EvalError> {
        Ok(self.evaluate(env)?.first().and_then(truthy))
    }

    fn evaluate_and(expressions: &[JsonExpr], env: &Environment<'_>) -> Result<Vec<Value>, EvalError> {
        let mut seen_empty = false;
        for expression in expressions {
            match expression.evaluate_bool(env)? {
                Some(false) => return Ok(vec![Value::Bool(false)]),
                Some(true) => {}
                None => seen_empty = true,
            }
        }
        Ok(if seen_empty {
            Vec::new()
        } else {
            vec![Value::Bool(true)]
        })
    }

    fn evaluate_or(expressions: &[JsonExpr], env: &Environment<'_>) -> Result<Vec<Value>, EvalError> {
        let mut seen_empty = false;
        for expression in expressions {
            match expression.evaluate_bool(env)? {
                Some(true) => return Ok(vec![Value::Bool(true)]),
                Some(false) => {}
                None => seen_empty = true,
            }
        }
        Ok(if seen_empty {
            Vec::new()
        } else {
            vec![Value::Bool(false)]
        })
    }

    fn evaluate_binary(
        left: &JsonExpr,
        right: &JsonExpr,
        env: &Environment<'_>,
        relation: fn(&Value, &Value) -> Option<bool>,
    ) -> Result<Vec<Value>, EvalError> {
        let left = left.evaluate(env)?;
        let right = right.evaluate(env)?;
        let (Some(left), Some(right)) = (left.first(), right.first()) else {
            return Ok(Vec::new());
        };
        Ok(relation(left, right)
            .map(|holds| vec![Value::Bool(holds)])
            .unwrap_or_default())
    }
}

fn truthy(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(value) => Some(*value),
        Value::Number(number) => number.as_f64().map(|value| value != 0.0),
        Value::String(text) => match text.as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::Object(object) => object.get("value").and_then(Value::as_f64),
        _ => None,
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    if let (Some(left), Some(right)) = (left.as_f64(), right.as_f64()) {
        return left == right;
    }
    match (left.get("code"), right.get("code")) {
        (Some(left_code), Some(right_code)) => {
            left_code == right_code
                && match (left.get("system"), right.get("system")) {
                    (Some(a), Some(b)) => a == b,
                    _ => true,
                }
        }
        _ => left == right,
    }
}

fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::String(left), Value::String(right)) => Some(left.cmp(right)),
        _ => numeric(left)?.partial_cmp(&numeric(right)?),
    }
}

/// Collects `value[x]` payloads of every answer below items named `link_id`.
fn collect_answers(node: &Value, link_id: &str, found: &mut Vec<Value>) {
    let Some(items) = node.get("item").and_then(Value::as_array) else {
        return;
    };
    for item in items {
        if item.get("linkId").and_then(Value::as_str) == Some(link_id)
            && let Some(answers) = item.get("answer").and_then(Value::as_array)
        {
            for answer in answers {
                let payload = answer.as_object().and_then(|object| {
                    object
                        .iter()
                        .find(|(key, _)| key.starts_with("value"))
                        .map(|(_, value)| value.clone())
                });
                found.extend(payload);
            }
        }
        collect_answers(item, link_id, found);
        if let Some(answers) = item.get("answer").and_then(Value::as_array) {
            for answer in answers {
                collect_answers(answer, link_id, found);
            }
        }
    }
}

/// Evaluator for [`JsonExpr`] expression text.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonExprEvaluator;

impl ExpressionEvaluator for JsonExprEvaluator {
    fn evaluate(
        &self,
        env: &Environment<'_>,
        expression: &str,
        _kind: ExpressionKind,
    ) -> Result<Vec<Value>, EvalError> {
        JsonExpr::parse(expression)?.evaluate(env)
    }
}
