//! Token estimation utilities.
//!
//! Uses a character-based heuristic: ~4 characters per token. This
//! approximation is accurate within ~10% for BPE tokenizers on English text
//! and is trivially deterministic and pure, which the budget math depends on.

use tidechat_core::message::{Conversation, FewShotExample, Turn};

/// Per-turn overhead for role name, delimiters, and wire-format markers.
pub const TURN_OVERHEAD: usize = 4;

/// Estimate the token count for a string.
///
/// Heuristic: 1 token ≈ 4 characters. Rounds up. Pure and deterministic:
/// identical input always yields the identical cost.
pub fn measure(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    (text.len() + 3) / 4
}

/// Estimate tokens for a single turn including per-turn overhead.
pub fn measure_turn(turn: &Turn) -> usize {
    TURN_OVERHEAD + measure(&turn.content)
}

/// Estimate tokens for raw text costed as one turn.
pub fn measure_as_turn(content: &str) -> usize {
    TURN_OVERHEAD + measure(content)
}

/// Estimate tokens for a few-shot example (expands to two turns).
pub fn measure_example(example: &FewShotExample) -> usize {
    measure_as_turn(&example.user_prompt) + measure_as_turn(&example.assistant_response)
}

/// Estimate tokens for a slice of turns.
pub fn measure_turns(turns: &[Turn]) -> usize {
    turns.iter().map(measure_turn).sum()
}

/// Measured cost of everything a conversation currently holds:
/// few-shot examples plus history turns.
///
/// Stores call this after every mutation to keep `total_tokens` honest.
pub fn measure_conversation(conversation: &Conversation) -> usize {
    conversation.few_shots.iter().map(measure_example).sum::<usize>()
        + measure_turns(&conversation.turns)
}
