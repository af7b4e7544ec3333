use std::io::{BufRead, Write};

use anyhow::Result;
use log::{info, warn};

use crate::console::Console;
use crate::exit_intent::ExitIntentDetector;
use crate::feedback::{self, FeedbackCollector, FeedbackRecord};
use crate::llm_manager::LLMManager;

const WELCOME: &str = "Welcome to the CLI Chatbot! Type your messages below.";

/// How a chat session ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    /// Feedback was saved.
    Feedback(FeedbackRecord),
    /// The user meant to leave but input ended before a valid rating.
    FeedbackAbandoned,
    /// Input ended during the conversation.
    InputClosed,
}

/// Runs the read-reply-check cycle until the user leaves.
pub struct ChatSession<'a> {
    llm_manager: &'a LLMManager,
    detector: ExitIntentDetector,
    collector: FeedbackCollector,
}

impl<'a> ChatSession<'a> {
    pub fn new(
        llm_manager: &'a LLMManager,
        detector: ExitIntentDetector,
        collector: FeedbackCollector,
    ) -> Self {
        Self {
            llm_manager,
            detector,
            collector,
        }
    }

    /// Run one session against `console`.
    pub async fn run<R: BufRead, W: Write>(
        &self,
        console: &mut Console<R, W>,
    ) -> Result<SessionOutcome> {
        console.say(WELCOME)?;
        let mut turn = 0;

        loop {
            let Some(input) = console.read_line()? else {
                info!("Input closed after {} turns; ending without feedback", turn);
                return Ok(SessionOutcome::InputClosed);
            };
            if input.trim().is_empty() {
                continue;
            }
            turn += 1;

            let spinner = console.thinking();
            let reply = self.llm_manager.complete(&input).await;
            spinner.finish_and_clear();
            let reply = reply?;

            let volunteered = reply.function_call.as_ref().and_then(feedback::record_from_call);
            if volunteered.is_none() || reply.text.is_some() {
                console.bot(reply.text_or_fallback())?;
            }
            if let Some(record) = volunteered {
                info!("Feedback captured from the conversation on turn {}", turn);
                self.collector.save(&record, console)?;
                return Ok(SessionOutcome::Feedback(record));
            }

            let spinner = console.thinking();
            let exit = self.detector.wants_exit(self.llm_manager, &input).await;
            spinner.finish_and_clear();
            if !exit? {
                continue;
            }

            return match self.collector.collect(self.llm_manager, console).await? {
                Some(record) => Ok(SessionOutcome::Feedback(record)),
                None => {
                    warn!("Session ended without feedback");
                    Ok(SessionOutcome::FeedbackAbandoned)
                }
            };
        }
    }
}
