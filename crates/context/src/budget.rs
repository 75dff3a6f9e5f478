//! Newest-back history trimming.

use crate::token::measure_turn;
use tidechat_core::message::Turn;

/// What survived a trimming pass.
#[derive(Debug, Clone)]
pub struct TrimOutcome {
    /// Kept turns, in original chronological order.
    pub kept: Vec<Turn>,
    /// Number of turns dropped from the oldest end.
    pub dropped: usize,
    /// Measured cost of the dropped turns.
    pub dropped_tokens: usize,
    /// Measured cost of the kept turns.
    pub kept_tokens: usize,
}

/// Trim `turns` to fit `budget`, walking newest to oldest.
///
/// Turns are accumulated from the newest backward. The first turn whose
/// cost would exceed the remaining budget is dropped along with everything
/// older than it, even if some older turn would individually still fit.
/// Recency wins over packing density, and the kept set is always a
/// contiguous suffix of the history.
///
/// Deterministic: the same turns and budget always produce the same outcome.
pub fn fit_to_budget(turns: &[Turn], budget: usize) -> TrimOutcome {
    let mut kept: Vec<Turn> = Vec::new();
    let mut kept_tokens = 0usize;
    let mut cutoff = turns.len();

    for (i, turn) in turns.iter().enumerate().rev() {
        let cost = measure_turn(turn);
        if kept_tokens + cost > budget {
            break;
        }
        kept_tokens += cost;
        kept.push(turn.clone());
        cutoff = i;
    }
    kept.reverse();

    let dropped_tokens = turns[..cutoff].iter().map(measure_turn).sum();
    TrimOutcome {
        kept,
        dropped: cutoff,
        dropped_tokens,
        kept_tokens,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::measure_turn;

    fn turn(i: usize) -> Turn {
        // 8 chars of content → 2 tokens + 4 overhead = 6 per turn
        Turn::user(format!("msg {:04}", i))
    }

    #[test]
    fn everything_fits_under_a_large_budget() {
        let turns: Vec<Turn> = (0..5).map(turn).collect();
        let outcome = fit_to_budget(&turns, 10_000);
        assert_eq!(outcome.kept.len(), 5);
        assert_eq!(outcome.dropped, 0);
        assert_eq!(outcome.dropped_tokens, 0);
    }

    #[test]
    fn oldest_turns_are_dropped_first() {
        let turns: Vec<Turn> = (0..10).map(turn).collect();
        // 6 tokens per turn, room for exactly 4
        let outcome = fit_to_budget(&turns, 24);
        assert_eq!(outcome.kept.len(), 4);
        assert_eq!(outcome.dropped, 6);
        assert_eq!(outcome.kept[0].content, "msg 0006");
        assert_eq!(outcome.kept[3].content, "msg 0009");
    }

    #[test]
    fn kept_turns_stay_in_chronological_order() {
        let turns: Vec<Turn> = (0..10).map(turn).collect();
        let outcome = fit_to_budget(&turns, 30);
        let contents: Vec<&str> = outcome.kept.iter().map(|t| t.content.as_str()).collect();
        let mut sorted = contents.clone();
        sorted.sort();
        assert_eq!(contents, sorted);
    }

    #[test]
    fn first_overflow_ends_the_walk() {
        // Newest is huge, older ones are tiny. The huge turn blows the
        // budget, so the tiny ones behind it must go too.
        let turns = vec![
            Turn::user("tiny"),
            Turn::user("also tiny"),
            Turn::user("x".repeat(400)), // 100 + 4 tokens
        ];
        let outcome = fit_to_budget(&turns, 50);
        assert!(outcome.kept.is_empty());
        assert_eq!(outcome.dropped, 3);
    }

    #[test]
    fn kept_cost_never_exceeds_budget() {
        let turns: Vec<Turn> = (0..20)
            .map(|i| Turn::user("y".repeat(1 + i * 7)))
            .collect();
        for budget in [0, 5, 17, 40, 100, 500] {
            let outcome = fit_to_budget(&turns, budget);
            let cost: usize = outcome.kept.iter().map(measure_turn).sum();
            assert!(cost <= budget, "budget {budget} exceeded: {cost}");
            assert_eq!(cost, outcome.kept_tokens);
        }
    }

    #[test]
    fn zero_budget_keeps_nothing() {
        let turns: Vec<Turn> = (0..3).map(turn).collect();
        let outcome = fit_to_budget(&turns, 0);
        assert!(outcome.kept.is_empty());
        assert_eq!(outcome.dropped, 3);
    }

    #[test]
    fn empty_history_is_a_noop() {
        let outcome = fit_to_budget(&[], 100);
        assert!(outcome.kept.is_empty());
        assert_eq!(outcome.dropped, 0);
    }

    #[test]
    fn trimming_is_deterministic() {
        let turns: Vec<Turn> = (0..12).map(turn).collect();
        let a = fit_to_budget(&turns, 37);
        let b = fit_to_budget(&turns, 37);
        assert_eq!(a.kept.len(), b.kept.len());
        assert_eq!(a.dropped_tokens, b.dropped_tokens);
    }
}
