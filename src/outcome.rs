//! Canonical job outcomes and the raw-result processor.
//!
//! Every job ends in exactly one [`Outcome`]. The processor applies a
//! fixed precedence to a raw provider result: a blocked safety entry wins
//! over everything, then whitespace-only content, then success.

use crate::error::{CategorizedError, ErrorCategory};
use crate::providers::ProviderResult;

/// The canonical result of one job.
#[derive(Debug)]
pub enum Outcome {
    /// The model produced usable content.
    Success {
        /// Generated text.
        content: String,
        /// Tokens generated, 0 when unreported.
        tokens: u64,
        /// True when generation hit a length cutoff.
        truncated: bool,
    },
    /// The model returned no usable text.
    EmptyResponse {
        /// Finish reason reported alongside the empty content.
        finish_reason: String,
    },
    /// The remote's safety layer blocked the content.
    SafetyBlocked {
        /// Categories that reported a block.
        categories: Vec<String>,
    },
    /// The job failed with a categorized error.
    Failure(CategorizedError),
}

impl Outcome {
    /// Whether this outcome carries usable content.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// The failure category of a non-success outcome.
    ///
    /// An empty response with a finish reason is a remote fault (the
    /// model claimed to finish but sent nothing); without one the
    /// request itself was likely malformed.
    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            Self::Success { .. } => None,
            Self::EmptyResponse { finish_reason } if finish_reason.is_empty() => {
                Some(ErrorCategory::InvalidRequest)
            }
            Self::EmptyResponse { .. } => Some(ErrorCategory::Server),
            Self::SafetyBlocked { .. } => Some(ErrorCategory::ContentFiltered),
            Self::Failure(err) => Some(err.category),
        }
    }

    /// Sanitized one-line description of a non-success outcome.
    pub fn failure_message(&self) -> Option<String> {
        match self {
            Self::Success { .. } => None,
            Self::EmptyResponse { finish_reason } if finish_reason.is_empty() => {
                Some("model returned an empty response".to_owned())
            }
            Self::EmptyResponse { finish_reason } => Some(format!(
                "model returned an empty response (finish reason: {finish_reason})"
            )),
            Self::SafetyBlocked { categories } => Some(format!(
                "content blocked by safety filters: {}",
                categories.join(", ")
            )),
            Self::Failure(err) => Some(err.summary_line()),
        }
    }
}

/// Canonicalize a raw provider result.
///
/// Precedence: any blocked safety entry, then whitespace-only content,
/// then success. On success, `truncated` is normalized from the finish
/// reason (a raw truncation flag set by the adapter is preserved).
pub fn process(raw: ProviderResult) -> Outcome {
    let blocked: Vec<String> = raw
        .safety_info
        .iter()
        .filter(|entry| entry.blocked)
        .map(|entry| entry.category.clone())
        .collect();
    if !blocked.is_empty() {
        return Outcome::SafetyBlocked { categories: blocked };
    }

    if raw.content.trim().is_empty() {
        return Outcome::EmptyResponse {
            finish_reason: raw.finish_reason,
        };
    }

    Outcome::Success {
        content: raw.content,
        tokens: raw.token_count,
        truncated: raw.truncated || raw.finish_reason == "length",
    }
}

// ---------------------------------------------------------------------------
// Result set
// ---------------------------------------------------------------------------

/// Outcomes indexed by model name, preserving the input order.
///
/// Written only by the orchestrator's collector while it assembles the
/// run; afterwards handed out as a read-only view.
#[derive(Debug, Default)]
pub struct ResultSet {
    entries: Vec<(String, Outcome)>,
}

impl ResultSet {
    /// Create an empty result set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an outcome; model names are unique per run.
    pub fn insert(&mut self, model: impl Into<String>, outcome: Outcome) {
        self.entries.push((model.into(), outcome));
    }

    /// Outcome for a model, if present.
    pub fn get(&self, model: &str) -> Option<&Outcome> {
        self.entries
            .iter()
            .find(|(name, _)| name == model)
            .map(|(_, outcome)| outcome)
    }

    /// All entries in input order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Outcome)> {
        self.entries
            .iter()
            .map(|(name, outcome)| (name.as_str(), outcome))
    }

    /// Number of outcomes recorded.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether any outcomes were recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Successful `(model, content)` pairs in input order.
    pub fn successes(&self) -> Vec<(&str, &str)> {
        self.entries
            .iter()
            .filter_map(|(name, outcome)| match outcome {
                Outcome::Success { content, .. } => Some((name.as_str(), content.as_str())),
                _ => None,
            })
            .collect()
    }

    /// Failure categories in input order, for the exit policy.
    pub fn failure_categories(&self) -> Vec<ErrorCategory> {
        self.entries
            .iter()
            .filter_map(|(_, outcome)| outcome.category())
            .collect()
    }

    /// True when no outcome is a success.
    pub fn all_failed(&self) -> bool {
        !self.entries.iter().any(|(_, o)| o.is_success())
    }

    /// True when at least one outcome is not a success.
    pub fn any_failed(&self) -> bool {
        self.entries.iter().any(|(_, o)| !o.is_success())
    }

    /// True when every outcome is a success.
    pub fn all_succeeded(&self) -> bool {
        self.entries.iter().all(|(_, o)| o.is_success())
    }
}
