//! Token accounting and prompt assembly.
//!
//! Two pieces live here:
//! - [`token`] — deterministic token cost measurement
//! - [`assembler`] — builds the exact ordered context sent to the model,
//!   trimming history to the budget while never touching few-shot examples

pub mod assembler;
pub mod budget;
pub mod token;

pub use assembler::{AssembledPrompt, PromptAssembler};
pub use budget::{TrimOutcome, fit_to_budget};
