//! Pricing types for cost estimation.

use serde::{Deserialize, Serialize};

/// Pricing information for a model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    /// Cost per million input tokens in USD.
    pub input_per_million: f64,
    /// Cost per million output tokens in USD.
    pub output_per_million: f64,
}

impl Pricing {
    /// Create new pricing information.
    pub fn new(input_per_million: f64, output_per_million: f64) -> Self {
        Self {
            input_per_million,
            output_per_million,
        }
    }

    /// Pricing for models that cost nothing to run (local inference).
    pub fn free() -> Self {
        Self::new(0.0, 0.0)
    }

    /// Calculate cost for a given number of input and output tokens.
    pub fn calculate(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        let input_cost = (input_tokens as f64 / 1_000_000.0) * self.input_per_million;
        let output_cost = (output_tokens as f64 / 1_000_000.0) * self.output_per_million;
        input_cost + output_cost
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pricing_calculates_cost() {
        let pricing = Pricing::new(3.0, 15.0);
        let cost = pricing.calculate(1_000_000, 100_000);
        assert!((cost - 4.5).abs() < 1e-9);
    }

    #[test]
    fn free_pricing_costs_nothing() {
        assert_eq!(Pricing::free().calculate(123_456, 7_890), 0.0);
    }
}
