use std::fs;
use std::path::Path;
use serde::{Deserialize, Serialize};
use anyhow::{Result, Context};
use log::warn;

use crate::exit_intent::{self, ExitDetection};

/// Main configuration structure for cli_chatbot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Gemini API settings
    #[serde(default)]
    pub gemini: GeminiConfig,

    /// Conversation behaviour
    #[serde(default)]
    pub chat: ChatConfig,

    /// Where feedback is kept
    #[serde(default)]
    pub feedback: FeedbackConfig,

    /// UI display configuration
    #[serde(default)]
    pub ui: UIConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    /// Model to use
    #[serde(default = "default_model")]
    pub model: String,

    /// API root, without a trailing `/models`
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Temperature setting; the API default applies when unset
    pub temperature: Option<f32>,

    /// Offer the `collect_review` tool on chat turns
    #[serde(default = "default_offer_review_tool")]
    pub offer_review_tool: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    #[serde(default)]
    pub exit_detection: ExitDetection,

    /// Phrases accepted by the `phrase_and_model` policy
    #[serde(default = "exit_intent::default_exit_phrases")]
    pub exit_phrases: Vec<String>,

    /// Let the model phrase the feedback questions
    #[serde(default = "default_paraphrase_questions")]
    pub paraphrase_questions: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackConfig {
    #[serde(default = "default_feedback_file")]
    pub file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UIConfig {
    /// Enable colorful output
    #[serde(default = "default_colorful")]
    pub colorful: bool,

    /// Show a spinner while waiting for the model
    #[serde(default = "default_spinner")]
    pub spinner: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// One of "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Also write log lines to this file
    pub file: Option<String>,
}

// Default value functions
fn default_model() -> String { "gemini-2.0-flash".to_string() }
fn default_base_url() -> String { "https://generativelanguage.googleapis.com/v1beta".to_string() }
fn default_api_key_env() -> String { "GEMINI_API_KEY".to_string() }
fn default_offer_review_tool() -> bool { true }
fn default_paraphrase_questions() -> bool { true }
fn default_feedback_file() -> String { "feedback.txt".to_string() }
fn default_colorful() -> bool { true }
fn default_spinner() -> bool { true }
fn default_log_level() -> String { "warn".to_string() }

impl Default for GeminiConfig {
    fn default() -> Self {
        GeminiConfig {
            model: default_model(),
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            temperature: None,
            offer_review_tool: default_offer_review_tool(),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        ChatConfig {
            exit_detection: ExitDetection::default(),
            exit_phrases: exit_intent::default_exit_phrases(),
            paraphrase_questions: default_paraphrase_questions(),
        }
    }
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        FeedbackConfig { file: default_feedback_file() }
    }
}

impl Default for UIConfig {
    fn default() -> Self {
        UIConfig {
            colorful: default_colorful(),
            spinner: default_spinner(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            file: None,
        }
    }
}

const DEFAULT_PATHS: &[&str] = &[
    "cli_chatbot.toml",
    ".cli_chatbot.toml",
    "~/.config/cli_chatbot/config.toml",
];

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))
    }

    /// Load configuration from command line argument or default locations
    pub fn load(config_path: &Option<String>) -> Result<Self> {
        Self::load_from(config_path, DEFAULT_PATHS)
    }

    /// Like [`Config::load`], searching `default_paths` in order when no path is given.
    /// An explicit path must load; a default that fails to parse is skipped with a warning.
    fn load_from(config_path: &Option<String>, default_paths: &[&str]) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::from_file(&*shellexpand::tilde(path));
        }

        for path in default_paths {
            let expanded_path = shellexpand::tilde(path);
            if Path::new(&*expanded_path).exists() {
                match Self::from_file(&*expanded_path) {
                    Ok(config) => return Ok(config),
                    Err(e) => warn!("Failed to load config from {}: {:#}", path, e),
                }
            }
        }

        // Return default config if no file found
        Ok(Self::default())
    }

    /// Merge with command-line arguments (CLI args take precedence)
    pub fn merge_with_args(&mut self, model: Option<String>, feedback_file: Option<String>) {
        if let Some(model) = model {
            self.gemini.model = model;
        }
        if let Some(file) = feedback_file {
            self.feedback.file = file;
        }
    }
}
