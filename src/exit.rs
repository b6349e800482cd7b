//! Exit-status policy: aggregate outcome → process exit code.

use crate::error::ErrorCategory;

/// Aggregate status of a run, synthesis included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateStatus {
    /// Every primary succeeded, and synthesis (if requested) succeeded.
    AllSuccess,
    /// At least one success and at least one failure.
    PartialSuccess,
    /// No primary succeeded.
    AllFailed,
}

/// Exit code for a run that produced nothing but successes.
pub const EXIT_OK: i32 = 0;
/// Fallback exit code for failures outside the category table.
pub const EXIT_GENERIC_FAILURE: i32 = 1;

/// Category precedence and exit codes. Earlier entries win when failures
/// of several categories are present.
const CATEGORY_CODES: [(ErrorCategory, i32); 9] = [
    (ErrorCategory::Auth, 2),
    (ErrorCategory::RateLimit, 3),
    (ErrorCategory::InvalidRequest, 4),
    (ErrorCategory::Server, 5),
    (ErrorCategory::Network, 6),
    (ErrorCategory::InputLimit, 7),
    (ErrorCategory::ContentFiltered, 8),
    (ErrorCategory::InsufficientCredits, 9),
    (ErrorCategory::Cancelled, 10),
];

/// The exit code a single category maps to.
pub fn code_for_category(category: ErrorCategory) -> i32 {
    CATEGORY_CODES
        .iter()
        .find(|(c, _)| *c == category)
        .map(|&(_, code)| code)
        .unwrap_or(EXIT_GENERIC_FAILURE)
}

/// Compute the process exit code for a finished run.
///
/// First match wins: all-success is 0; partial success with the tolerant
/// flag is 0; otherwise the highest-precedence failing category decides,
/// falling back to 1 for categories outside the table or when no category
/// was recorded.
pub fn exit_code(
    aggregate: AggregateStatus,
    tolerant: bool,
    failure_categories: &[ErrorCategory],
) -> i32 {
    match aggregate {
        AggregateStatus::AllSuccess => EXIT_OK,
        AggregateStatus::PartialSuccess if tolerant => EXIT_OK,
        AggregateStatus::PartialSuccess | AggregateStatus::AllFailed => {
            for (category, code) in CATEGORY_CODES {
                if failure_categories.contains(&category) {
                    return code;
                }
            }
            EXIT_GENERIC_FAILURE
        }
    }
}
