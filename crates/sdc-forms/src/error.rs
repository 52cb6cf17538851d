use thiserror::Error;

/// Hard failures while building a form.
#[derive(Debug, Error)]
pub enum FormError {
    #[error("questionnaire item at {path} has no linkId")]
    MissingLinkId { path: String },
    #[error("invalid questionnaire or response JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Namespace conflicts between expression slots.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScopeError {
    #[error("expression name `{name}` is already bound to another slot in this scope")]
    NameCollision { name: String },
}

/// Failure reported by an expression evaluator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("unsupported expression language `{0}`")]
    UnsupportedLanguage(String),
    #[error("expression could not be parsed: {0}")]
    Parse(String),
    #[error("unknown variable `%{0}`")]
    UnknownVariable(String),
    #[error("expression failed: {0}")]
    Evaluation(String),
}

/// Failure while expanding a value set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TerminologyError {
    #[error("terminology server {server} rejected the request with status {status}")]
    Status { server: String, status: u16 },
    #[error("terminology server {server} unreachable: {message}")]
    Transport { server: String, message: String },
    #[error("malformed expansion from {server}: {message}")]
    Malformed { server: String, message: String },
    #[error("no terminology server configured for {url}")]
    NoServer { url: String },
}

impl TerminologyError {
    /// 4xx responses are final; the next server is not tried.
    pub fn is_client_error(&self) -> bool {
        matches!(self, TerminologyError::Status { status, .. } if (400..500).contains(status))
    }
}
