use std::io::{self, BufRead, StdinLock, Stdout, Write};
use std::time::Duration;

use anyhow::{Context, Result};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};

const PROMPT: &str = "> ";
const BOT_PREFIX: &str = "CLI ChatBot:";

/// Line-oriented terminal I/O for the chat session.
pub struct Console<R, W> {
    input: R,
    output: W,
    spinner: bool,
}

impl Console<StdinLock<'static>, Stdout> {
    /// Console bound to the process stdin/stdout.
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> Console<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self {
            input,
            output,
            spinner: false,
        }
    }

    /// Show a spinner while waiting on the model.
    pub fn with_spinner(mut self, enabled: bool) -> Self {
        self.spinner = enabled;
        self
    }

    /// Print the prompt and read one line. `None` on end of input.
    pub fn read_line(&mut self) -> Result<Option<String>> {
        write!(self.output, "{}", PROMPT)?;
        self.output.flush()?;

        let mut line = String::new();
        let read = self
            .input
            .read_line(&mut line)
            .context("Failed to read from stdin")?;
        if read == 0 {
            return Ok(None);
        }

        let trimmed = line.trim_end_matches(['\n', '\r']).len();
        line.truncate(trimmed);
        Ok(Some(line))
    }

    /// Print a line spoken by the bot.
    pub fn bot(&mut self, text: &str) -> Result<()> {
        writeln!(self.output, "{} {}", BOT_PREFIX.bright_cyan().bold(), text)?;
        Ok(())
    }

    pub fn say(&mut self, text: &str) -> Result<()> {
        writeln!(self.output, "{}", text)?;
        Ok(())
    }

    /// Print a correction the user should act on.
    pub fn notice(&mut self, text: &str) -> Result<()> {
        writeln!(self.output, "{}", text.yellow())?;
        Ok(())
    }

    /// Spinner shown until the caller clears it; hidden when disabled.
    pub fn thinking(&self) -> ProgressBar {
        if !self.spinner {
            return ProgressBar::hidden();
        }

        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message("Thinking...");
        bar.enable_steady_tick(Duration::from_millis(100));
        bar
    }

    #[cfg(test)]
    pub fn into_output(self) -> W {
        self.output
    }
}
