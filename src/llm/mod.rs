//! LLM integration.
//!
//! Models are reached through OpenAI-compatible chat completion endpoints:
//! a LiteLLM (or any compatible) proxy via [`LiteLlmClient`], or OpenRouter
//! via [`OpenRouterProvider`], which retries transient failures itself.
//! The evaluation loop only sees the [`SampleSource`] capability.
//!
//! ```ignore
//! use std::sync::Arc;
//! use drupal_bench::llm::{LlmSampler, OpenRouterProvider, SampleSource};
//!
//! let provider = Arc::new(OpenRouterProvider::with_model(key, "openai/gpt-4o")?);
//! let sampler = LlmSampler::new(provider, "openai/gpt-4o");
//! let completions = sampler.complete(&task, 5).await?;
//! ```

pub mod litellm;
pub mod providers;
pub mod sampler;

pub use litellm::{Choice, GenerationRequest, GenerationResponse, LiteLlmClient, LlmProvider, Message, Usage};
pub use providers::OpenRouterProvider;
pub use sampler::{task_messages, LlmSampler, SampleSource, SYSTEM_PROMPT};
