//! Budget Controller (spec §4.2): tracks cycles, tokens, cost and elapsed
//! time and gates forward progress in the Perception Loop.

use crate::metrics;
use crate::types::TokenUsage;
use std::time::{Duration, Instant};

const INPUT_RATE_PER_MILLION: f64 = 3.0;
const OUTPUT_RATE_PER_MILLION: f64 = 15.0;

#[derive(Clone, Copy, Debug)]
pub struct BudgetLimits {
    pub max_cycles: u32,
    pub max_tokens: u64,
    pub max_cost_usd: f64,
    pub max_duration_ms: u64,
}

impl Default for BudgetLimits {
    fn default() -> Self {
        Self {
            max_cycles: 100,
            max_tokens: 500_000,
            max_cost_usd: 5.00,
            max_duration_ms: 600_000,
        }
    }
}

/// Point-in-time snapshot of budget usage against its limits (spec §3).
#[derive(Clone, Copy, Debug)]
pub struct BudgetState {
    pub cycles: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub elapsed_ms: u64,
    pub cost_usd: f64,
    pub limits: BudgetLimits,
}

impl BudgetState {
    /// `{cycles: maxCycles-used, tokens: maxTokens-inputUsed-outputUsed}`.
    pub fn remaining(&self) -> BudgetRemaining {
        BudgetRemaining {
            cycles: self.limits.max_cycles.saturating_sub(self.cycles),
            tokens: self
                .limits
                .max_tokens
                .saturating_sub(self.input_tokens + self.output_tokens),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct BudgetRemaining {
    pub cycles: u32,
    pub tokens: u64,
}

#[derive(Clone, Debug)]
pub struct CanProceed {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl CanProceed {
    fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn denied(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Monotonic usage accumulator: cycles, tokens, elapsed and derived cost
/// only ever grow (spec §8 invariant).
pub struct BudgetController {
    limits: BudgetLimits,
    cycles: u32,
    input_tokens: u64,
    output_tokens: u64,
    started_at: Instant,
}

impl BudgetController {
    pub fn new(limits: BudgetLimits) -> Self {
        Self {
            limits,
            cycles: 0,
            input_tokens: 0,
            output_tokens: 0,
            started_at: Instant::now(),
        }
    }

    /// Checks, in order: cycles, tokens, cost, elapsed duration. Returns the
    /// first violation as a denial reason, otherwise allowed.
    pub fn can_proceed(&self) -> CanProceed {
        if self.cycles >= self.limits.max_cycles {
            metrics::budget_denied("cycles");
            return CanProceed::denied(format!(
                "Max cycles reached ({})",
                self.limits.max_cycles
            ));
        }
        if self.input_tokens + self.output_tokens >= self.limits.max_tokens {
            metrics::budget_denied("tokens");
            return CanProceed::denied(format!(
                "Max tokens reached ({})",
                self.limits.max_tokens
            ));
        }
        let cost = self.estimate_cost();
        if cost >= self.limits.max_cost_usd {
            metrics::budget_denied("cost");
            return CanProceed::denied(format!(
                "Max cost reached (${:.2})",
                self.limits.max_cost_usd
            ));
        }
        if self.elapsed().as_millis() as u64 >= self.limits.max_duration_ms {
            metrics::budget_denied("duration");
            return CanProceed::denied(format!(
                "Max duration reached ({}ms)",
                self.limits.max_duration_ms
            ));
        }
        CanProceed::allowed()
    }

    /// It is an error to call this after a `can_proceed` denial; the
    /// controller itself does not enforce that, the Perception Loop does
    /// (spec §4.2).
    pub fn on_cycle_complete(&mut self, usage: TokenUsage) {
        self.cycles += 1;
        self.input_tokens += usage.input;
        self.output_tokens += usage.output;
    }

    pub fn estimate_cost(&self) -> f64 {
        (self.input_tokens as f64 / 1_000_000.0) * INPUT_RATE_PER_MILLION
            + (self.output_tokens as f64 / 1_000_000.0) * OUTPUT_RATE_PER_MILLION
    }

    fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn snapshot(&self) -> BudgetState {
        BudgetState {
            cycles: self.cycles,
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            elapsed_ms: self.elapsed().as_millis() as u64,
            cost_usd: self.estimate_cost(),
            limits: self.limits,
        }
    }

    /// `ceil(width * height / 750)`.
    pub fn estimate_frame_tokens(width: u64, height: u64) -> u64 {
        (width * height + 749) / 750
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_formula_matches_spec() {
        let mut controller = BudgetController::new(BudgetLimits::default());
        controller.on_cycle_complete(TokenUsage {
            input: 1_000_000,
            output: 1_000_000,
        });
        let cost = controller.estimate_cost();
        assert!((cost - 18.0).abs() < 1e-9);
    }

    #[test]
    fn frame_token_estimate_examples() {
        assert_eq!(BudgetController::estimate_frame_tokens(100, 100), 14);
        assert_eq!(BudgetController::estimate_frame_tokens(1024, 768), 1049);
    }

    #[test]
    fn denial_by_cost() {
        let limits = BudgetLimits {
            max_cycles: 1000,
            max_tokens: 10_000_000,
            max_cost_usd: 0.01,
            max_duration_ms: 600_000,
        };
        let mut controller = BudgetController::new(limits);
        controller.on_cycle_complete(TokenUsage {
            input: 1000,
            output: 1000,
        });
        let decision = controller.can_proceed();
        assert!(!decision.allowed);
        assert!(decision.reason.unwrap().contains("Max cost"));
    }

    #[test]
    fn denial_is_monotonic() {
        let limits = BudgetLimits {
            max_cycles: 1,
            ..BudgetLimits::default()
        };
        let mut controller = BudgetController::new(limits);
        controller.on_cycle_complete(TokenUsage::default());
        assert!(!controller.can_proceed().allowed);
        controller.on_cycle_complete(TokenUsage::default());
        assert!(!controller.can_proceed().allowed);
    }

    #[test]
    fn usage_never_decreases() {
        let mut controller = BudgetController::new(BudgetLimits::default());
        let before = controller.snapshot();
        controller.on_cycle_complete(TokenUsage {
            input: 10,
            output: 20,
        });
        let after = controller.snapshot();
        assert!(after.cycles >= before.cycles);
        assert!(after.input_tokens >= before.input_tokens);
        assert!(after.output_tokens >= before.output_tokens);
        assert!(after.cost_usd >= before.cost_usd);
    }
}
