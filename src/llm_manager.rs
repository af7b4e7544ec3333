use anyhow::Result;
use async_trait::async_trait;
use log::{debug, warn};
use serde::Serialize;
use serde_json::Value;

use crate::exit_intent;
use crate::feedback;

/// Printed in place of a reply when the model returns no candidates.
pub const NO_RESPONSE: &str = "No response received.";

/// A function call part returned by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    pub args: Value,
}

/// A tool the model may call instead of answering in text.
#[derive(Debug, Clone, Serialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// The first candidate of a provider response, reduced to the parts we use.
///
/// Both fields empty means the provider returned no candidates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub text: Option<String>,
    pub function_call: Option<FunctionCall>,
}

impl Completion {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            function_call: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_none() && self.function_call.is_none()
    }

    /// First text part, or [`NO_RESPONSE`] when there was none.
    pub fn text_or_fallback(&self) -> &str {
        self.text.as_deref().unwrap_or(NO_RESPONSE)
    }
}

/// Trait representing an LLM provider.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Name of the provider.
    fn name(&self) -> &str;

    /// Model name of the provider.
    fn model_name(&self) -> &str {
        "Unknown"
    }

    /// Send a prompt to the provider and return the first candidate.
    async fn send_prompt(&self, prompt: &str) -> Result<Completion>;

    /// Send a prompt while offering `tools`. Providers without tool support ignore them.
    async fn send_prompt_with_tools(
        &self,
        prompt: &str,
        tools: &[FunctionDeclaration],
    ) -> Result<Completion> {
        let _ = tools;
        self.send_prompt(prompt).await
    }
}

/// Offline provider used when no remote LLM is available.
pub struct LocalProvider {
    exit_phrases: Vec<String>,
}

impl LocalProvider {
    pub fn new(exit_phrases: Vec<String>) -> Self {
        Self { exit_phrases }
    }
}

#[async_trait]
impl LLMProvider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    fn model_name(&self) -> &str {
        "echo"
    }

    async fn send_prompt(&self, prompt: &str) -> Result<Completion> {
        if prompt.starts_with(exit_intent::CLASSIFY_PREAMBLE) {
            let message = prompt
                .lines()
                .rev()
                .find_map(|line| line.strip_prefix("User:"))
                .unwrap_or("");
            let answer = if exit_intent::is_exit_phrase(message, &self.exit_phrases) {
                "yes"
            } else {
                "no"
            };
            Ok(Completion::text(answer))
        } else if prompt.starts_with("Ask the user") {
            Ok(Completion::text(feedback::local_question(prompt)))
        } else {
            Ok(Completion::text(format!("You said: {}", prompt.trim())))
        }
    }
}

/// Owns the active provider and exposes the calls the chat session needs.
pub struct LLMManager {
    provider: Box<dyn LLMProvider>,
    chat_tools: Vec<FunctionDeclaration>,
}

impl LLMManager {
    /// Create a new manager around `provider`.
    pub fn new(provider: Box<dyn LLMProvider>) -> Self {
        Self {
            provider,
            chat_tools: Vec::new(),
        }
    }

    /// Tools offered on every chat turn.
    pub fn with_chat_tools(mut self, tools: Vec<FunctionDeclaration>) -> Self {
        self.chat_tools = tools;
        self
    }

    /// Get the active provider.
    pub fn provider(&self) -> &dyn LLMProvider {
        &*self.provider
    }

    /// Forward a user message and return the model's reply.
    pub async fn complete(&self, message: &str) -> Result<Completion> {
        debug!(
            "Chat turn via {} ({})",
            self.provider.name(),
            self.provider.model_name()
        );
        let completion = if self.chat_tools.is_empty() {
            self.provider.send_prompt(message).await?
        } else {
            self.provider
                .send_prompt_with_tools(message, &self.chat_tools)
                .await?
        };
        if completion.is_empty() {
            warn!("{} returned no candidates", self.provider.name());
        }
        Ok(completion)
    }

    /// Ask a yes/no question; true when the answer mentions "yes".
    pub async fn classify_yes_no(&self, question: &str) -> Result<bool> {
        let completion = self.provider.send_prompt(question).await?;
        let answer = completion.text.as_deref().map(contains_yes).unwrap_or(false);
        debug!("Classifier answered {:?} -> {}", completion.text, answer);
        Ok(answer)
    }

    /// Have the model phrase `instruction` as a question for the user.
    /// Falls back to `fallback` when the model returns nothing.
    pub async fn paraphrase(&self, instruction: &str, fallback: &str) -> Result<String> {
        let completion = self.provider.send_prompt(instruction).await?;
        Ok(match completion.text {
            Some(text) if !text.trim().is_empty() => text.trim().to_string(),
            _ => fallback.to_string(),
        })
    }
}

/// Case-insensitive substring match on "yes".
pub fn contains_yes(reply: &str) -> bool {
    reply.trim().to_lowercase().contains("yes")
}
