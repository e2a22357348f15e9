//! Model provider abstractions for evalboard.
//!
//! This crate provides:
//! - The [`ModelProvider`] trait the evaluation runner calls once per test case
//! - Token usage and pricing types used to estimate the cost of a run
//! - An error type that separates transient failures (retry) from permanent ones (abort)
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │               EvalRunner                  │
//! └──────────────────────────────────────────┘
//!                     │ invoke(model, prompt)
//!                     ▼
//! ┌──────────────────────────────────────────┐
//! │          dyn ModelProvider                │
//! │   ┌──────────────┐  ┌──────────────┐      │
//! │   │ EchoProvider │  │ OllamaProvider│     │
//! │   └──────────────┘  └──────────────┘      │
//! └──────────────────────────────────────────┘
//! ```

mod error;
mod types;

pub mod providers;

pub use error::{Error, Result};
pub use providers::{Completion, ModelProvider, Usage};
pub use types::Pricing;
