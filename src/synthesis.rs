//! Synthesis stage: combine successful primary outcomes via one further
//! model call.
//!
//! The secondary prompt concatenates the original instructions, a
//! separator header, and one labeled block per successful model, in the
//! primaries' input order. The call itself goes through the same adapter,
//! limiter, and taxonomy path as a primary job.

use crate::context::SECTION_SEPARATOR;

/// Header introducing the per-model answer blocks.
const SYNTHESIS_HEADER: &str = "Responses from the consulted models:\n\n";

/// Build the secondary prompt from the instructions and the successful
/// `(model, content)` pairs, preserving their order.
pub fn build_synthesis_prompt(instructions: &str, successes: &[(&str, &str)]) -> String {
    let mut prompt = String::with_capacity(
        instructions
            .len()
            .saturating_add(successes.iter().map(|(_, c)| c.len()).sum::<usize>())
            .saturating_add(256),
    );
    prompt.push_str(instructions.trim_end());
    prompt.push_str(SECTION_SEPARATOR);
    prompt.push_str(SYNTHESIS_HEADER);
    for (model, content) in successes {
        prompt.push_str(&format!("### {model}\n{content}\n\n"));
    }
    prompt.trim_end().to_owned()
}
