//! Model provider trait and implementations.
//!
//! The [`ModelProvider`] trait is the single seam between the evaluation engine
//! and whatever actually runs the model, cloud API or local server.
//!
//! # Example
//!
//! ```ignore
//! use evalboard_models::providers::{EchoProvider, ModelProvider};
//!
//! async fn ask(provider: &dyn ModelProvider) {
//!     let completion = provider.invoke("echo", "What is 2 + 2?").await?;
//!     println!("{} ({} tokens)", completion.output, completion.usage.total_tokens);
//! }
//! ```

mod echo;
mod ollama;
mod types;

use async_trait::async_trait;

pub use echo::EchoProvider;
pub use ollama::OllamaProvider;
pub use types::*;

use crate::{Pricing, Result};

/// Trait for model providers (cloud and local).
///
/// Implementations must be safe to call concurrently; the runner fans out
/// one call per test case up to its parallelism limit.
///
/// # Errors
///
/// Return [`Error::Transient`](crate::Error::Transient) for failures worth
/// retrying and [`Error::Permanent`](crate::Error::Permanent) for failures
/// that doom every remaining call (invalid credentials, unknown model).
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Returns the provider name (e.g., "ollama", "echo").
    fn name(&self) -> &str;

    /// Send one rendered prompt to `model` and return its output with usage.
    async fn invoke(&self, model: &str, prompt: &str) -> Result<Completion>;

    /// Get pricing information for a specific model.
    ///
    /// Providers that return `None` produce completions with zero cost.
    fn pricing(&self, _model: &str) -> Option<Pricing> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A provider that only implements the required methods.
    struct MinimalProvider;

    #[async_trait]
    impl ModelProvider for MinimalProvider {
        fn name(&self) -> &str {
            "minimal"
        }

        async fn invoke(&self, _model: &str, prompt: &str) -> Result<Completion> {
            Ok(Completion::new(prompt.to_uppercase(), Usage::new(1, 1), 0.0))
        }
    }

    #[tokio::test]
    async fn provider_invoke_returns_completion() {
        let provider = MinimalProvider;
        let completion = provider.invoke("m", "hi").await.unwrap();

        assert_eq!(completion.output, "HI");
        assert_eq!(completion.usage.total_tokens, 2);
    }

    #[test]
    fn default_pricing_returns_none() {
        assert!(MinimalProvider.pricing("m").is_none());
    }

    #[tokio::test]
    async fn providers_are_usable_as_trait_objects() {
        let providers: Vec<Box<dyn ModelProvider>> =
            vec![Box::new(MinimalProvider), Box::new(EchoProvider::new())];

        let names: Vec<&str> = providers.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["minimal", "echo"]);
    }
}
