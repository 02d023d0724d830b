//! Token budget accounting
//!
//! Every gathering strategy draws from a single [`TokenBudget`]. Allocation
//! is explicit and labelled so a build can report where its tokens went.

use crate::error::ContextError;

/// Rough bytes-per-token ratio used throughout the builder
pub const CHARS_PER_TOKEN: usize = 4;

/// Below this many remaining tokens, test files are not attempted
pub const MIN_TOKENS_FOR_TESTS: usize = 300;

/// Below this many remaining tokens, convention files are not attempted
pub const MIN_TOKENS_FOR_CONVENTIONS: usize = 200;

/// Minimum remaining tokens worth a partial (truncated) file read
pub const MIN_TOKENS_FOR_PARTIAL: usize = 100;

/// Below this many remaining tokens, pattern/tree summaries are skipped
pub const MIN_TOKENS_FOR_PATTERNS: usize = 150;

/// Byte-length based token estimator (≈4 chars per token)
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenEstimator;

impl TokenEstimator {
    pub fn estimate(&self, text: &str) -> usize {
        self.estimate_bytes(text.len())
    }

    pub fn estimate_bytes(&self, bytes: usize) -> usize {
        bytes.div_ceil(CHARS_PER_TOKEN)
    }

    /// How many bytes a token allowance can hold
    pub fn to_bytes(&self, tokens: usize) -> usize {
        tokens * CHARS_PER_TOKEN
    }
}

/// Tracks token allocation for one context build
#[derive(Debug, Clone)]
pub struct TokenBudget {
    total: usize,
    allocated: usize,
    allocations: Vec<(String, usize)>,
}

impl TokenBudget {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            allocated: 0,
            allocations: Vec::new(),
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn allocated(&self) -> usize {
        self.allocated
    }

    pub fn remaining(&self) -> usize {
        self.total.saturating_sub(self.allocated)
    }

    pub fn can_fit(&self, tokens: usize) -> bool {
        tokens <= self.remaining()
    }

    /// Strict allocation: fails without allocating anything when over budget
    pub fn allocate(&mut self, label: impl Into<String>, tokens: usize) -> Result<(), ContextError> {
        let label = label.into();
        if !self.can_fit(tokens) {
            return Err(ContextError::BudgetExceeded {
                label,
                needed: tokens,
                remaining: self.remaining(),
            });
        }
        self.allocated += tokens;
        self.allocations.push((label, tokens));
        Ok(())
    }

    /// Partial allocation: takes what fits and returns how much was taken
    pub fn try_allocate(&mut self, label: impl Into<String>, tokens: usize) -> usize {
        let granted = tokens.min(self.remaining());
        if granted > 0 {
            self.allocated += granted;
            self.allocations.push((label.into(), granted));
        }
        granted
    }

    /// Labelled allocations made so far, in order
    pub fn allocations(&self) -> &[(String, usize)] {
        &self.allocations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimator_ratio() {
        let est = TokenEstimator;
        assert_eq!(est.estimate("abcd"), 1);
        assert_eq!(est.estimate("abcde"), 2);
        assert_eq!(est.estimate(""), 0);
        assert_eq!(est.to_bytes(100), 400);
    }

    #[test]
    fn test_allocate_strict() {
        let mut budget = TokenBudget::new(1000);
        budget.allocate("sops", 600).unwrap();
        assert_eq!(budget.remaining(), 400);

        let err = budget.allocate("diff", 500).unwrap_err();
        assert!(err.is_budget());
        // Failed allocation must not consume anything
        assert_eq!(budget.remaining(), 400);
        assert_eq!(budget.allocations().len(), 1);
    }

    #[test]
    fn test_try_allocate_partial() {
        let mut budget = TokenBudget::new(100);
        assert_eq!(budget.try_allocate("a", 60), 60);
        assert_eq!(budget.try_allocate("b", 60), 40);
        assert_eq!(budget.try_allocate("c", 10), 0);
        assert_eq!(budget.remaining(), 0);
    }

    #[test]
    fn test_can_fit_is_pure() {
        let budget = TokenBudget::new(50);
        assert!(budget.can_fit(50));
        assert!(!budget.can_fit(51));
        assert_eq!(budget.allocated(), 0);
    }

    proptest::proptest! {
        #[test]
        fn prop_allocated_never_exceeds_total(total in 0usize..100_000, requests in proptest::collection::vec(0usize..10_000, 0..50)) {
            let mut budget = TokenBudget::new(total);
            for (i, r) in requests.iter().enumerate() {
                if i % 2 == 0 {
                    let _ = budget.allocate(format!("strict-{i}"), *r);
                } else {
                    budget.try_allocate(format!("partial-{i}"), *r);
                }
            }
            proptest::prop_assert!(budget.allocated() <= budget.total());
            let sum: usize = budget.allocations().iter().map(|(_, n)| n).sum();
            proptest::prop_assert_eq!(sum, budget.allocated());
        }
    }
}
