//! Completion client: the `complete(prompt) -> text` collaborator
//!
//! Every completion reports its `CompletionUsage` (prompt and completion
//! tokens) so extraction cost can be accounted per request.
//!
//! Two implementations:
//! - `CommandCompletionClient`: spawns a configured command per prompt,
//!   writes the prompt to stdin and reads the completion from stdout
//!   (production; any CLI wrapper around an LLM endpoint works)
//! - `MockCompletionClient`: returns preconfigured responses (testing)

use crate::extract::{count_tokens, TokenizerError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::time::timeout;

/// Errors from completion client operations.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("completion backend not available: {0}")]
    Unavailable(String),
    #[error("completion failed: {0}")]
    InvocationFailed(String),
    #[error("completion timed out after {0:?}")]
    Timeout(Duration),
    #[error("cannot measure completion usage: {0}")]
    Usage(#[from] TokenizerError),
}

/// Token consumption of one completion
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl CompletionUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
        }
    }

    /// Count both sides with the pinned tokenizer
    pub fn measure(prompt: &str, completion: &str) -> Result<Self, TokenizerError> {
        Ok(Self::new(
            count_tokens(prompt)? as u64,
            count_tokens(completion)? as u64,
        ))
    }

    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

impl std::ops::AddAssign for CompletionUsage {
    fn add_assign(&mut self, other: Self) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }
}

impl std::iter::Sum for CompletionUsage {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), |mut total, usage| {
            total += usage;
            total
        })
    }
}

/// Text returned by a completion client together with what it cost
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub usage: CompletionUsage,
}

/// Client trait for text completion.
///
/// Abstracts over transport (subprocess, HTTP, mock) so extractors
/// don't depend on how the model is reached.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<Completion, LlmError>;
}

/// Completion client that runs an external command for each prompt.
pub struct CommandCompletionClient {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandCompletionClient {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: Duration::from_secs(120),
        }
    }

    /// Build from a `[program, args...]` list; `None` when the list is empty.
    pub fn from_command_line(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self::new(program.clone()).with_args(args.to_vec()))
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(&self, prompt: &str) -> Result<String, LlmError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| LlmError::Unavailable(format!("failed to start '{}': {}", self.program, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .map_err(|e| LlmError::InvocationFailed(format!("writing prompt: {}", e)))?;
            // Dropping stdin closes the pipe so the command sees EOF.
        }

        let mut stdout = String::new();
        if let Some(mut out) = child.stdout.take() {
            out.read_to_string(&mut stdout)
                .await
                .map_err(|e| LlmError::InvocationFailed(format!("reading completion: {}", e)))?;
        }

        let status = child
            .wait()
            .await
            .map_err(|e| LlmError::InvocationFailed(e.to_string()))?;
        if !status.success() {
            let mut stderr = String::new();
            if let Some(mut err) = child.stderr.take() {
                let _ = err.read_to_string(&mut stderr).await;
            }
            return Err(LlmError::InvocationFailed(format!(
                "'{}' exited with {}: {}",
                self.program,
                status,
                stderr.trim()
            )));
        }

        Ok(stdout)
    }
}

#[async_trait]
impl CompletionClient for CommandCompletionClient {
    async fn complete(&self, prompt: &str) -> Result<Completion, LlmError> {
        let text = match timeout(self.timeout, self.run(prompt)).await {
            Ok(result) => result?,
            Err(_) => return Err(LlmError::Timeout(self.timeout)),
        };
        // The command reports no usage of its own.
        let usage = CompletionUsage::measure(prompt, &text)?;
        Ok(Completion { text, usage })
    }
}

/// Mock client for testing. Returns queued responses in order.
///
/// Once the queue is drained the fallback response (if any) is returned.
/// Usage is measured with the pinned tokenizer unless fixed by `with_usage`.
pub struct MockCompletionClient {
    responses: Mutex<VecDeque<Result<String, String>>>,
    fallback: Option<String>,
    usage: Option<CompletionUsage>,
    prompts: Mutex<Vec<String>>,
}

impl MockCompletionClient {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            fallback: None,
            usage: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Queue a successful completion
    pub fn with_response(self, response: impl Into<String>) -> Self {
        self.responses.lock().unwrap().push_back(Ok(response.into()));
        self
    }

    /// Queue a failed completion
    pub fn with_failure(self, message: impl Into<String>) -> Self {
        self.responses.lock().unwrap().push_back(Err(message.into()));
        self
    }

    /// Response returned once queued responses run out
    pub fn with_fallback(mut self, response: impl Into<String>) -> Self {
        self.fallback = Some(response.into());
        self
    }

    /// Report this usage for every completion
    pub fn with_usage(mut self, usage: CompletionUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Prompts received so far
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl Default for MockCompletionClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompletionClient for MockCompletionClient {
    async fn complete(&self, prompt: &str) -> Result<Completion, LlmError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let next = self.responses.lock().unwrap().pop_front();
        let text = match next {
            Some(Ok(response)) => response,
            Some(Err(message)) => return Err(LlmError::InvocationFailed(message)),
            None => self
                .fallback
                .clone()
                .ok_or_else(|| LlmError::Unavailable("mock client has no response queued".to_string()))?,
        };
        let usage = match self.usage {
            Some(usage) => usage,
            None => CompletionUsage::measure(prompt, &text)?,
        };
        Ok(Completion { text, usage })
    }
}
