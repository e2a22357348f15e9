//! Request and response types for model providers.

use serde::{Deserialize, Serialize};

/// Token usage statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Number of input/prompt tokens.
    pub input_tokens: u64,
    /// Number of output/completion tokens.
    pub output_tokens: u64,
    /// Total tokens (input + output).
    pub total_tokens: u64,
}

impl Usage {
    /// Create new usage statistics.
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }
}

impl std::ops::Add for Usage {
    type Output = Usage;

    fn add(self, rhs: Usage) -> Usage {
        Usage::new(
            self.input_tokens + rhs.input_tokens,
            self.output_tokens + rhs.output_tokens,
        )
    }
}

/// Result of a single model invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    /// Raw text produced by the model.
    pub output: String,
    /// Token usage for this call.
    pub usage: Usage,
    /// Estimated cost of this call in USD.
    pub cost: f64,
}

impl Completion {
    /// Create a new completion.
    pub fn new(output: impl Into<String>, usage: Usage, cost: f64) -> Self {
        Self {
            output: output.into(),
            usage,
            cost,
        }
    }
}
