//! Prompt assembly: turns a stored conversation into the exact ordered
//! context sent to the model.
//!
//! Assembly order is fixed: few-shot examples first (expanded to synthetic
//! user/assistant segment pairs, insertion order preserved), then the kept
//! history turns in chronological order, ending with the newest user turn.
//!
//! Few-shot examples are never trimmed. If they alone exceed the usable
//! budget, assembly fails rather than silently degrading the steering the
//! user configured.

use crate::budget::fit_to_budget;
use crate::token::{measure, measure_example};
use tidechat_core::error::{Error, ValidationError};
use tidechat_core::message::Conversation;
use tidechat_core::model::Segment;
use tracing::debug;

/// The assembled context plus accounting the caller may want to surface.
#[derive(Debug, Clone)]
pub struct AssembledPrompt {
    /// Ordered segments: expanded examples, then kept history.
    pub segments: Vec<Segment>,
    /// Measured cost of the assembled segments.
    pub prompt_tokens: usize,
    /// History turns dropped to fit the budget.
    pub dropped_turns: usize,
}

/// Budgeted prompt assembler.
///
/// `budget` is the model's total context window; `reply_reserve` is the
/// portion held back for the model's answer. History competes for what is
/// left after the few-shot examples take their share.
#[derive(Debug, Clone)]
pub struct PromptAssembler {
    budget: usize,
    reply_reserve: usize,
}

impl PromptAssembler {
    pub fn new(budget: usize, reply_reserve: usize) -> Self {
        Self {
            budget,
            reply_reserve,
        }
    }

    /// Assemble the prompt context for a conversation.
    ///
    /// Errors:
    /// - `ValidationError::FewShotOverflow` when the examples alone exceed
    ///   the usable budget
    /// - `ValidationError::ContextOverflow` when the conversation has turns
    ///   but not even the newest one fits
    pub fn assemble(&self, conversation: &Conversation) -> Result<AssembledPrompt, Error> {
        let usable = self.budget.saturating_sub(self.reply_reserve);
        let few_shot_tokens: usize = conversation
            .few_shots
            .iter()
            .map(measure_example)
            .sum();

        if few_shot_tokens > usable {
            return Err(ValidationError::FewShotOverflow {
                few_shot_tokens,
                budget: usable,
            }
            .into());
        }

        let history_budget = usable - few_shot_tokens;
        let outcome = fit_to_budget(&conversation.turns, history_budget);
        if !conversation.turns.is_empty() && outcome.kept.is_empty() {
            let needed = conversation
                .turns
                .last()
                .map(crate::token::measure_turn)
                .unwrap_or(0);
            return Err(ValidationError::ContextOverflow {
                needed,
                budget: history_budget,
            }
            .into());
        }

        if outcome.dropped > 0 {
            debug!(
                conversation_id = %conversation.id,
                dropped = outcome.dropped,
                dropped_tokens = outcome.dropped_tokens,
                "trimmed history to fit context budget"
            );
        }

        let mut segments =
            Vec::with_capacity(conversation.few_shots.len() * 2 + outcome.kept.len());
        for example in &conversation.few_shots {
            segments.push(Segment::user(example.user_prompt.clone()));
            segments.push(Segment::assistant(example.assistant_response.clone()));
        }
        for turn in outcome.kept {
            segments.push(Segment {
                role: turn.role,
                content: turn.content,
            });
        }

        Ok(AssembledPrompt {
            segments,
            prompt_tokens: few_shot_tokens + outcome.kept_tokens,
            dropped_turns: outcome.dropped,
        })
    }

    /// Estimate tokens for arbitrary text, exposed for upload sizing.
    pub fn measure_text(text: &str) -> usize {
        measure(text)
    }
}
