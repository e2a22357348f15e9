//! Offline provider that answers with the prompt it was given.
//!
//! Useful for dry runs of a suite: every call succeeds, costs nothing, and is
//! fully deterministic, so template rendering and scoring can be inspected
//! without network access.

use async_trait::async_trait;

use super::{Completion, ModelProvider, Usage};
use crate::{Pricing, Result};

/// Provider that echoes the last line of the rendered prompt.
#[derive(Debug, Clone, Default)]
pub struct EchoProvider {
    pricing: Option<Pricing>,
}

impl EchoProvider {
    /// Create an echo provider with no pricing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach pricing so dry runs can preview cost estimates.
    pub fn with_pricing(pricing: Pricing) -> Self {
        Self {
            pricing: Some(pricing),
        }
    }
}

/// Rough whitespace token count.
fn count_tokens(text: &str) -> u64 {
    text.split_whitespace().count() as u64
}

#[async_trait]
impl ModelProvider for EchoProvider {
    fn name(&self) -> &str {
        "echo"
    }

    async fn invoke(&self, _model: &str, prompt: &str) -> Result<Completion> {
        let output = prompt
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .unwrap_or("")
            .trim()
            .to_string();
        let usage = Usage::new(count_tokens(prompt), count_tokens(&output));
        let cost = self
            .pricing
            .map(|p| p.calculate(usage.input_tokens, usage.output_tokens))
            .unwrap_or(0.0);
        Ok(Completion::new(output, usage, cost))
    }

    fn pricing(&self, _model: &str) -> Option<Pricing> {
        self.pricing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_returns_last_non_empty_line() {
        let provider = EchoProvider::new();
        let completion = provider
            .invoke("any", "You are helpful.\n\nUser Question: Paris\n\n")
            .await
            .unwrap();

        assert_eq!(completion.output, "User Question: Paris");
        assert_eq!(completion.cost, 0.0);
    }

    #[tokio::test]
    async fn echo_counts_whitespace_tokens() {
        let provider = EchoProvider::new();
        let completion = provider.invoke("any", "one two three").await.unwrap();

        assert_eq!(completion.usage.input_tokens, 3);
        assert_eq!(completion.usage.output_tokens, 3);
    }

    #[tokio::test]
    async fn echo_applies_pricing_when_configured() {
        let provider = EchoProvider::with_pricing(Pricing::new(1_000_000.0, 0.0));
        let completion = provider.invoke("any", "a b").await.unwrap();

        assert!((completion.cost - 2.0).abs() < 1e-9);
        assert!(provider.pricing("any").is_some());
    }

    #[tokio::test]
    async fn echo_handles_empty_prompt() {
        let completion = EchoProvider::new().invoke("any", "").await.unwrap();
        assert_eq!(completion.output, "");
        assert_eq!(completion.usage.total_tokens, 0);
    }
}
