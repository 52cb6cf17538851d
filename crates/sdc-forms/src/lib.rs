#![allow(missing_docs)]
//! Reactive node and expression engine for FHIR Questionnaire forms.
//!
//! A [`Form`] turns a [`Questionnaire`] (plus an optional persisted
//! [`QuestionnaireResponse`]) into a tree of [`Node`]s whose enablement,
//! cardinality, options and issues stay consistent as answers change.

pub mod config;
pub mod error;
pub mod expr;
pub mod form;
pub mod issue;
pub mod node;
pub mod options;
pub mod response;
pub mod template;
pub mod terminology;
pub mod value;

mod context;
mod coordinator;
mod enable_when;
mod reactive;
mod registry;
mod scope;
mod slot;
mod validate;

pub use config::FormConfig;
pub use error::{EvalError, FormError, ScopeError, TerminologyError};
pub use expr::{
    Environment, ExpressionEvaluator, ExpressionKind, JSON_EXPR_LANGUAGE, JsonExpr,
    JsonExprEvaluator,
};
pub use form::{Form, FormBuilder};
pub use issue::{Issue, IssueCode, Severity};
pub use node::{
    AnswerNode, DisplayNode, GroupNode, GroupWrapperNode, Lifecycle, Node, QuestionNode,
};
pub use options::{OptionOrigin, OptionsState, ResolvedOption, Selection};
pub use response::{QuestionnaireResponse, ResponseAnswer, ResponseItem, find_item};
pub use template::{
    AnswerConstraint, DisabledDisplay, EnableBehavior, EnableWhen, EnableWhenOperator, ItemType,
    Questionnaire, QuestionnaireItem, urls,
};
pub use terminology::{TerminologyClient, ValueSetCache, ValueSetState, parse_expansion};
#[cfg(feature = "http")]
pub use terminology::HttpTerminologyClient;
pub use value::{AnswerType, AnswerValue, Attachment, Coding, Quantity, Reference};
