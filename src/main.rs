use std::io::{IsTerminal, stdout};

use anyhow::Result;
use clap::Parser;
use log::info;

mod chat_loop;
mod config;
mod console;
mod exit_intent;
mod feedback;
mod llm_manager;
mod logger;
mod providers;

use chat_loop::{ChatSession, SessionOutcome};
use config::Config;
use console::Console;
use exit_intent::ExitIntentDetector;
use feedback::{FeedbackCollector, FeedbackStore};
use llm_manager::{LLMManager, LLMProvider, LocalProvider};
use providers::gemini::GeminiProvider;

#[derive(Parser)]
#[command(name = "cli_chatbot", version, about)]
struct Args {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<String>,
    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
    /// Answer locally instead of calling Gemini
    #[arg(long)]
    offline: bool,
    /// Gemini model to use
    #[arg(short, long)]
    model: Option<String>,
    /// File that feedback is appended to
    #[arg(long)]
    feedback_file: Option<String>,
    /// Print a summary of saved feedback and exit
    #[arg(long)]
    summary: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let mut config = Config::load(&args.config)?;
    config.merge_with_args(args.model, args.feedback_file);
    logger::init(args.verbose, &config.logging)?;
    colored::control::set_override(config.ui.colorful && stdout().is_terminal());

    let store = FeedbackStore::new(&config.feedback.file);
    if args.summary {
        println!("{}: {}", store.path().display(), store.summary()?);
        return Ok(());
    }

    let provider: Box<dyn LLMProvider> = if args.offline {
        Box::new(LocalProvider::new(config.chat.exit_phrases.clone()))
    } else {
        Box::new(GeminiProvider::new(&config.gemini))
    };
    let mut llm_manager = LLMManager::new(provider);
    if config.gemini.offer_review_tool {
        llm_manager = llm_manager.with_chat_tools(vec![feedback::review_function()]);
    }
    info!(
        "Using {} ({})",
        llm_manager.provider().name(),
        llm_manager.provider().model_name()
    );

    let session = ChatSession::new(
        &llm_manager,
        ExitIntentDetector::new(config.chat.exit_detection, config.chat.exit_phrases.clone()),
        FeedbackCollector::new(store, config.chat.paraphrase_questions),
    );
    let mut console = Console::stdio().with_spinner(config.ui.spinner && stdout().is_terminal());

    match session.run(&mut console).await? {
        SessionOutcome::Feedback(record) => info!("Session closed with rating {}", record.rating),
        SessionOutcome::FeedbackAbandoned => info!("Session closed without a rating"),
        SessionOutcome::InputClosed => info!("Session closed at end of input"),
    }
    Ok(())
}
