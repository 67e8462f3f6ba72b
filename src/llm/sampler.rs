//! The sampling capability used by the evaluation loop.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, warn};

use super::{GenerationRequest, LlmProvider, Message};
use crate::catalog::Task;
use crate::error::LlmError;
use crate::metrics::MetricsCollector;

/// Instruction sent ahead of every task prompt.
pub const SYSTEM_PROMPT: &str = "You are an expert Drupal 11 developer.
Solve the following problem by providing a valid git diff (patch).
The patch must apply to a standard Drupal 11 installation using `patch -p1` from the project root.
Output ONLY the git diff. Prefer raw text; if you use a code block, make sure it contains the complete diff.";

/// Produces candidate completions for a task.
#[async_trait]
pub trait SampleSource: Send + Sync {
    /// Returns exactly `count` raw completions, or an error if the source gave up.
    async fn complete(&self, task: &Task, count: usize) -> Result<Vec<String>, LlmError>;
}

/// Messages sent for a task.
pub fn task_messages(task: &Task) -> Vec<Message> {
    vec![
        Message::system(SYSTEM_PROMPT),
        Message::user(format!("Problem Description:\n{}", task.prompt)),
    ]
}

/// Samples completions from an [`LlmProvider`], one request per sample,
/// issued concurrently.
pub struct LlmSampler {
    provider: Arc<dyn LlmProvider>,
    model: String,
    temperature: f64,
    max_tokens: Option<u32>,
    metrics: MetricsCollector,
}

impl LlmSampler {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.8,
            max_tokens: None,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    fn request(&self, task: &Task) -> GenerationRequest {
        let request = GenerationRequest::new(self.model.clone(), task_messages(task))
            .with_temperature(self.temperature);
        match self.max_tokens {
            Some(max) => request.with_max_tokens(max),
            None => request,
        }
    }
}

#[async_trait]
impl SampleSource for LlmSampler {
    async fn complete(&self, task: &Task, count: usize) -> Result<Vec<String>, LlmError> {
        let request = self.request(task);
        let calls = (0..count).map(|_| self.provider.generate(request.clone()));
        let responses = join_all(calls).await;

        let mut completions = Vec::with_capacity(count);
        for (index, response) in responses.into_iter().enumerate() {
            self.metrics.record_model_request(response.is_ok());
            match response {
                Ok(response) => {
                    completions.push(response.first_content().unwrap_or_default().to_string());
                }
                Err(e) => {
                    warn!(task_id = %task.id, sample = index, error = %e, "Model request failed");
                    return Err(e);
                }
            }
        }
        debug!(task_id = %task.id, count, "Received completions");
        Ok(completions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Choice, GenerationResponse, Usage};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Echo {
        calls: AtomicUsize,
        fail_on: Option<usize>,
    }

    #[async_trait]
    impl LlmProvider for Echo {
        async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if Some(call) == self.fail_on {
                return Err(LlmError::ApiError {
                    code: 503,
                    message: "overloaded".into(),
                });
            }
            Ok(GenerationResponse {
                id: call.to_string(),
                model: request.model,
                choices: vec![Choice {
                    index: 0,
                    message: Message::assistant(request.messages[1].content.clone()),
                    finish_reason: "stop".into(),
                }],
                usage: Usage::default(),
            })
        }
    }

    fn task() -> Task {
        Task::new("7", "t", "Make the block cacheable.", "")
    }

    #[test]
    fn test_prompt_framing() {
        let messages = task_messages(&task());
        assert_eq!(messages[0].role, "system");
        assert!(messages[0].content.contains("patch -p1"));
        assert_eq!(
            messages[1].content,
            "Problem Description:\nMake the block cacheable."
        );
    }

    #[tokio::test]
    async fn test_complete_returns_count_samples() {
        let provider = Arc::new(Echo {
            calls: AtomicUsize::new(0),
            fail_on: None,
        });
        let sampler = LlmSampler::new(provider.clone(), "m").with_max_tokens(4096);
        let completions = sampler.complete(&task(), 3).await.unwrap();
        assert_eq!(completions.len(), 3);
        assert!(completions[0].contains("cacheable"));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_any_failed_request_fails_the_batch() {
        let provider = Arc::new(Echo {
            calls: AtomicUsize::new(0),
            fail_on: Some(1),
        });
        let sampler = LlmSampler::new(provider, "m");
        let err = sampler.complete(&task(), 3).await.unwrap_err();
        assert!(matches!(err, LlmError::ApiError { code: 503, .. }));
    }
}
