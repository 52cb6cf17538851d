use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Engine settings shared by every node of a form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default, rename_all = "snake_case")]
pub struct FormConfig {
    /// Consecutive unstable writes a calculated slot may apply within one flush.
    pub max_evaluation_passes: usize,
    /// Reaction passes a single flush may run before giving up.
    pub max_flush_passes: usize,
    /// Ceiling on the answers or group instances seeded to satisfy `minOccurs`.
    pub max_seeded_repeats: usize,
    /// Ordered fallback terminology servers.
    pub terminology_servers: Vec<String>,
    /// Report answers that match no option as errors instead of warnings.
    pub strict_option_matching: bool,
}

impl Default for FormConfig {
    fn default() -> Self {
        Self {
            max_evaluation_passes: 16,
            max_flush_passes: 64,
            max_seeded_repeats: 1000,
            terminology_servers: Vec::new(),
            strict_option_matching: false,
        }
    }
}
