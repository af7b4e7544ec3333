use anyhow::Result;
use log::info;
use serde::{Deserialize, Serialize};

use crate::llm_manager::LLMManager;

/// First line of every exit-intent classification prompt.
pub const CLASSIFY_PREAMBLE: &str =
    "Determine if the following user message indicates an intent to end the conversation.";

/// How a user message is judged to end the chat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitDetection {
    /// The model's yes/no classification alone decides.
    #[default]
    Model,
    /// The message must be one of the exit phrases and the model must agree.
    PhraseAndModel,
}

pub fn default_exit_phrases() -> Vec<String> {
    ["bye", "exit", "end chat", "i want to leave"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Build the yes/no question sent to the model for `message`.
pub fn classification_prompt(message: &str) -> String {
    format!(
        "{}\nRespond with 'yes' if the user wants to exit, otherwise respond with 'no'.\nUser: {}",
        CLASSIFY_PREAMBLE, message
    )
}

/// Whole-message, case-insensitive match against `phrases`.
pub fn is_exit_phrase(message: &str, phrases: &[String]) -> bool {
    let message = message.trim().to_lowercase();
    phrases
        .iter()
        .any(|phrase| phrase.trim().to_lowercase() == message)
}

pub struct ExitIntentDetector {
    detection: ExitDetection,
    phrases: Vec<String>,
}

impl ExitIntentDetector {
    pub fn new(detection: ExitDetection, phrases: Vec<String>) -> Self {
        Self { detection, phrases }
    }

    /// Decide whether `message` asks to end the conversation.
    pub async fn wants_exit(&self, manager: &LLMManager, message: &str) -> Result<bool> {
        if self.detection == ExitDetection::PhraseAndModel
            && !is_exit_phrase(message, &self.phrases)
        {
            return Ok(false);
        }

        let exit = manager
            .classify_yes_no(&classification_prompt(message))
            .await?;
        if exit {
            info!("Exit intent detected for message {:?}", message);
        }
        Ok(exit)
    }
}
