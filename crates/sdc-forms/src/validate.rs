//! Occurrence and constraint checks.
//!
//! Checks only run for enabled, editable nodes that were edited or whose form
//! had a submit attempt. Every issue is tagged with the node token.

use std::rc::Rc;

use regex::Regex;
use tracing::warn;

use crate::issue::{Issue, IssueCode, Severity};
use crate::node::{GroupNode, GroupWrapperNode, Node, QuestionNode};
use crate::slot::SlotPurpose;
use crate::value::{AnswerType, AnswerValue};

fn due(node: &Node) -> bool {
    node.is_enabled()
        && !node.read_only()
        && (node.is_dirty() || node.base().ctx.submit_attempted.get())
}

fn occurrence_issues(count: usize, min: usize, max: Option<usize>, noun: &str) -> Vec<Issue> {
    let mut issues = Vec::new();
    if count == 0 && min > 0 {
        issues.push(Issue::error(IssueCode::Required, "a value is required"));
    } else if count < min {
        issues.push(Issue::error(
            IssueCode::Invariant,
            format!("at least {min} {noun} expected, found {count}"),
        ));
    }
    if let Some(max) = max
        && count > max
    {
        issues.push(Issue::error(
            IssueCode::Invariant,
            format!("at most {max} {noun} allowed, found {count}"),
        ));
    }
    issues
}

pub(crate) fn question_issues(question: &Rc<QuestionNode>) -> Vec<Issue> {
    let node = Node::Question(question.clone());
    if !due(&node) {
        return Vec::new();
    }
    let values: Vec<AnswerValue> = question
        .answer_values()
        .into_iter()
        .filter(AnswerValue::is_meaningful)
        .collect();
    let mut issues = occurrence_issues(
        values.len(),
        question.min_occurs(),
        question.max_occurs(),
        "answers",
    );
    for value in &values {
        issues.extend(value_issues(question, value));
    }
    issues.extend(legacy_issues(question));
    issues
        .into_iter()
        .map(|issue| issue.at(question.token()))
        .collect()
}

fn legacy_issues(question: &QuestionNode) -> Vec<Issue> {
    if !question.has_option_list() {
        return Vec::new();
    }
    let severity = if question.base.ctx.config.strict_option_matching {
        Severity::Error
    } else {
        Severity::Warning
    };
    question
        .legacy_answers()
        .into_iter()
        .map(|selection| {
            Issue::new(
                severity,
                IssueCode::Value,
                format!("`{}` is no longer an available option", selection.value.label()),
            )
        })
        .collect()
}

fn bound(question: &QuestionNode, purpose: SlotPurpose, kind: AnswerType) -> Option<AnswerValue> {
    let base = &question.base;
    base.registry.bound(&base.ctx, &base.template, purpose, kind)
}

fn value_issues(question: &QuestionNode, value: &AnswerValue) -> Vec<Issue> {
    let mut issues = Vec::new();
    let kind = value.answer_type();
    let item = &question.base.template;

    let (min_purpose, max_purpose) = if kind == AnswerType::Quantity {
        (SlotPurpose::MinQuantity, SlotPurpose::MaxQuantity)
    } else {
        (SlotPurpose::MinValue, SlotPurpose::MaxValue)
    };
    if let Some(min) = bound(question, min_purpose, kind)
        && value.compare(&min).is_some_and(|ordering| ordering.is_lt())
    {
        issues.push(Issue::error(
            IssueCode::Value,
            format!("{} is below the minimum of {}", value.label(), min.label()),
        ));
    }
    if let Some(max) = bound(question, max_purpose, kind)
        && value.compare(&max).is_some_and(|ordering| ordering.is_gt())
    {
        issues.push(Issue::error(
            IssueCode::Value,
            format!("{} is above the maximum of {}", value.label(), max.label()),
        ));
    }

    match value {
        AnswerValue::Decimal(number) => {
            if let Some(places) = item.max_decimal_places()
                && decimal_places(*number) > places
            {
                issues.push(Issue::error(
                    IssueCode::Value,
                    format!("at most {places} decimal places allowed"),
                ));
            }
        }
        AnswerValue::String(text) | AnswerValue::Uri(text) => {
            issues.extend(text_issues(question, text));
        }
        AnswerValue::Attachment(attachment) => {
            let mime_types = item.mime_types();
            if !mime_types.is_empty()
                && !attachment
                    .content_type
                    .as_ref()
                    .is_some_and(|content_type| mime_types.contains(content_type))
            {
                issues.push(Issue::error(
                    IssueCode::Value,
                    format!("attachment type must be one of {}", mime_types.join(", ")),
                ));
            }
            if let (Some(max), Some(size)) = (item.max_size(), attachment.size)
                && size > max
            {
                issues.push(Issue::error(
                    IssueCode::TooLong,
                    format!("attachment is {size} bytes, the limit is {max}"),
                ));
            }
        }
        _ => {}
    }
    issues
}

fn text_issues(question: &QuestionNode, text: &str) -> Vec<Issue> {
    let mut issues = Vec::new();
    let item = &question.base.template;
    let length = text.chars().count() as u64;
    if let Some(max) = item.max_length
        && length > max
    {
        issues.push(Issue::error(
            IssueCode::TooLong,
            format!("{length} characters entered, at most {max} allowed"),
        ));
    }
    if let Some(min) = item.min_length()
        && length < min
    {
        issues.push(Issue::error(
            IssueCode::Value,
            format!("at least {min} characters required"),
        ));
    }
    if let (Some(pattern), Some(compiled)) = (item.regex(), question.pattern()) {
        match compiled {
            Ok(regex) if !regex.is_match(text) => issues.push(Issue::error(
                IssueCode::Value,
                format!("value does not match the pattern `{pattern}`"),
            )),
            Ok(_) => {}
            Err(err) => {
                warn!(link_id = question.link_id(), %err, "ignoring invalid regex constraint");
                issues.push(Issue::warning(
                    IssueCode::Processing,
                    format!("invalid regex `{pattern}`: {err}"),
                ));
            }
        }
    }
    issues
}

pub(crate) fn compile_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("^(?:{pattern})$"))
}

fn decimal_places(number: f64) -> u32 {
    let text = number.to_string();
    text.split_once('.')
        .map_or(0, |(_, fraction)| fraction.len() as u32)
}

pub(crate) fn group_issues(group: &Rc<GroupNode>) -> Vec<Issue> {
    let node = Node::Group(group.clone());
    if !due(&node) || group.min_occurs() == 0 || group.has_content() {
        return Vec::new();
    }
    vec![
        Issue::error(IssueCode::Required, "at least one answer in this group is required")
            .at(group.token()),
    ]
}

pub(crate) fn wrapper_issues(wrapper: &Rc<GroupWrapperNode>) -> Vec<Issue> {
    let node = Node::GroupWrapper(wrapper.clone());
    if !due(&node) {
        return Vec::new();
    }
    let filled = wrapper
        .instances()
        .iter()
        .filter(|instance| instance.has_content())
        .count();
    occurrence_issues(filled, wrapper.min_occurs(), wrapper.max_occurs(), "entries")
        .into_iter()
        .map(|issue| issue.at(wrapper.token()))
        .collect()
}
