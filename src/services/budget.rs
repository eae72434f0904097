//! Per-strategy token accounting.
//!
//! Counters are strategy-local; there is no cross-workflow state. Missing
//! usage fields count as zero, and all arithmetic saturates.

use crate::domain::models::AgentExecutionResult;

/// Accumulates observed token usage across a strategy invocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenMeter {
    total: u64,
    input: u64,
    output: u64,
}

impl TokenMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, tokens: u64) {
        self.total = self.total.saturating_add(tokens);
    }

    /// Record the usage observed on one agent result.
    pub fn add_result(&mut self, result: &AgentExecutionResult) {
        self.total = self.total.saturating_add(result.tokens_used);
        self.input = self.input.saturating_add(result.input_tokens);
        self.output = self.output.saturating_add(result.output_tokens);
    }

    /// Record usage for a whole result set.
    pub fn add_results<'a>(&mut self, results: impl IntoIterator<Item = &'a AgentExecutionResult>) {
        for result in results {
            self.add_result(result);
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn input(&self) -> u64 {
        self.input
    }

    pub fn output(&self) -> u64 {
        self.output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_with_tokens(total: u64, input: u64, output: u64) -> AgentExecutionResult {
        AgentExecutionResult {
            tokens_used: total,
            input_tokens: input,
            output_tokens: output,
            ..Default::default()
        }
    }

    #[test]
    fn test_sum_matches_observed_usage() {
        let mut meter = TokenMeter::new();
        meter.add_results([
            &result_with_tokens(100, 60, 40),
            &result_with_tokens(0, 0, 0),
            &result_with_tokens(50, 30, 20),
        ]);
        assert_eq!(meter.total(), 150);
        assert_eq!(meter.input(), 90);
        assert_eq!(meter.output(), 60);
    }

    #[test]
    fn test_saturating() {
        let mut meter = TokenMeter::new();
        meter.add(u64::MAX);
        meter.add(100);
        assert_eq!(meter.total(), u64::MAX);
    }
}
