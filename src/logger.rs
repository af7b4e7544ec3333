use std::fs::OpenOptions;

use anyhow::{Context, Result};
use simplelog::{
    ColorChoice, CombinedLogger, Config, LevelFilter, SharedLogger, TermLogger, TerminalMode,
    WriteLogger,
};

use crate::config::LoggingConfig;

/// Parse a level name; unknown names fall back to `Warn`.
pub fn level_from_str(level: &str) -> LevelFilter {
    level.parse().unwrap_or(LevelFilter::Warn)
}

/// Install the global logger. `--verbose` raises the level to at least `Info`.
pub fn init(verbose: bool, config: &LoggingConfig) -> Result<()> {
    let mut level = level_from_str(&config.level);
    if verbose && level < LevelFilter::Info {
        level = LevelFilter::Info;
    }

    // Log lines go to stderr so they never interleave with the chat transcript.
    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        level,
        Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )];

    if let Some(path) = &config.file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open log file: {}", path))?;
        loggers.push(WriteLogger::new(level, Config::default(), file));
    }

    let _ = CombinedLogger::init(loggers);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_from_str() {
        assert_eq!(level_from_str("debug"), LevelFilter::Debug);
        assert_eq!(level_from_str("INFO"), LevelFilter::Info);
        assert_eq!(level_from_str("loud"), LevelFilter::Warn);
    }
}
