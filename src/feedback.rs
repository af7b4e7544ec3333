use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::console::Console;
use crate::llm_manager::{FunctionCall, FunctionDeclaration, LLMManager};

pub const REVIEW_INSTRUCTION: &str = "Ask the user how their chatbot experience was.";
pub const RATING_INSTRUCTION: &str =
    "Ask the user to rate the chatbot experience on a scale from 1 to 5.";
pub const REVIEW_FUNCTION: &str = "collect_review";

const MIN_RATING: i64 = 1;
const MAX_RATING: i64 = 5;

/// One user's review of a chat session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub review: String,
    pub rating: u8,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RatingError {
    #[error("Please enter a valid number.")]
    NotANumber,
    #[error("Please enter a number between 1 and 5.")]
    OutOfRange(i64),
}

/// Parse a rating typed by the user.
pub fn parse_rating(input: &str) -> Result<u8, RatingError> {
    let value = parse_integer(input.trim()).ok_or(RatingError::NotANumber)?;
    validate_rating(value)
}

/// Signed decimal integer, with `_` allowed between digits as in `1_000`.
/// Values too large for `i64` saturate, since they are out of range anyway.
fn parse_integer(input: &str) -> Option<i64> {
    let (negative, digits) = match input.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, input.strip_prefix('+').unwrap_or(input)),
    };
    let well_formed = digits.split('_').all(|group| {
        !group.is_empty() && group.bytes().all(|b| b.is_ascii_digit())
    });
    if !well_formed {
        return None;
    }

    let digits: String = digits.chars().filter(|c| *c != '_').collect();
    Some(match (digits.parse::<i64>(), negative) {
        (Ok(value), true) => -value,
        (Ok(value), false) => value,
        (Err(_), true) => i64::MIN,
        (Err(_), false) => i64::MAX,
    })
}

fn validate_rating(value: i64) -> Result<u8, RatingError> {
    if (MIN_RATING..=MAX_RATING).contains(&value) {
        Ok(value as u8)
    } else {
        Err(RatingError::OutOfRange(value))
    }
}

/// Question shown when the model is not asked to phrase `instruction`.
pub fn local_question(instruction: &str) -> String {
    match instruction {
        REVIEW_INSTRUCTION => "How was your experience chatting with me today?".to_string(),
        RATING_INSTRUCTION => {
            "On a scale from 1 to 5, how would you rate this conversation?".to_string()
        }
        other => other.to_string(),
    }
}

/// Tool declaration that lets the model hand back feedback it read from the chat.
pub fn review_function() -> FunctionDeclaration {
    FunctionDeclaration {
        name: REVIEW_FUNCTION.to_string(),
        description: "Collects user feedback after chat ends.".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "review": {
                    "type": "string",
                    "description": "User's feedback on the chatbot interaction."
                },
                "rating": {
                    "type": "integer",
                    "description": "Rating between 1 to 5 for the chat experience."
                }
            },
            "required": ["review", "rating"]
        }),
    }
}

/// Extract a record from a `collect_review` call, if its arguments are usable.
pub fn record_from_call(call: &FunctionCall) -> Option<FeedbackRecord> {
    if call.name != REVIEW_FUNCTION {
        return None;
    }

    let review = call.args.get("review")?.as_str()?.to_string();
    // The API may encode integers as floats.
    let rating = call.args.get("rating").and_then(|value| {
        value.as_i64().or_else(|| {
            value
                .as_f64()
                .filter(|f| f.fract() == 0.0)
                .map(|f| f as i64)
        })
    })?;

    match validate_rating(rating) {
        Ok(rating) => Some(FeedbackRecord { review, rating }),
        Err(err) => {
            warn!("Ignoring {} call with bad rating {}: {}", REVIEW_FUNCTION, rating, err);
            None
        }
    }
}

/// Append-only feedback file of pretty-printed JSON objects.
pub struct FeedbackStore {
    path: PathBuf,
}

impl FeedbackStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `record` followed by a newline, creating the file if needed.
    pub fn append(&self, record: &FeedbackRecord) -> Result<()> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
        record
            .serialize(&mut serializer)
            .context("Failed to serialize feedback")?;
        buf.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open feedback file: {}", self.path.display()))?;
        file.write_all(&buf)
            .with_context(|| format!("Failed to write feedback file: {}", self.path.display()))?;

        info!("Feedback appended to {}", self.path.display());
        Ok(())
    }

    /// Every stored record in append order. A missing file holds none.
    pub fn load(&self) -> Result<Vec<FeedbackRecord>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read feedback file: {}", self.path.display())
                });
            }
        };

        serde_json::Deserializer::from_str(&contents)
            .into_iter::<FeedbackRecord>()
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("Failed to parse feedback file: {}", self.path.display()))
    }

    pub fn summary(&self) -> Result<FeedbackSummary> {
        let records = self.load()?;
        let average_rating = if records.is_empty() {
            None
        } else {
            let total: u32 = records.iter().map(|r| u32::from(r.rating)).sum();
            Some(f64::from(total) / records.len() as f64)
        };
        Ok(FeedbackSummary {
            count: records.len(),
            average_rating,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackSummary {
    pub count: usize,
    pub average_rating: Option<f64>,
}

impl fmt::Display for FeedbackSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.average_rating {
            Some(avg) if self.count == 1 => write!(f, "1 feedback entry, rating {:.2}", avg),
            Some(avg) => write!(f, "{} feedback entries, average rating {:.2}", self.count, avg),
            None => write!(f, "No feedback recorded yet."),
        }
    }
}

/// Asks for a review and a rating, then stores them.
pub struct FeedbackCollector {
    store: FeedbackStore,
    paraphrase: bool,
}

impl FeedbackCollector {
    pub fn new(store: FeedbackStore, paraphrase: bool) -> Self {
        Self { store, paraphrase }
    }

    /// Run the review/rating exchange. `None` if input ends before a valid rating.
    pub async fn collect<R: BufRead, W: Write>(
        &self,
        manager: &LLMManager,
        console: &mut Console<R, W>,
    ) -> Result<Option<FeedbackRecord>> {
        console.say("\nBefore you go, could you please provide some feedback?")?;

        let question = self.question(manager, console, REVIEW_INSTRUCTION).await?;
        console.bot(&question)?;
        let Some(review) = console.read_line()? else {
            warn!("Input closed before a review was given; feedback abandoned");
            return Ok(None);
        };

        let rating = loop {
            let question = self.question(manager, console, RATING_INSTRUCTION).await?;
            console.bot(&question)?;
            let Some(input) = console.read_line()? else {
                warn!("Input closed before a rating was given; feedback abandoned");
                return Ok(None);
            };
            match parse_rating(&input) {
                Ok(rating) => break rating,
                Err(err) => console.notice(&err.to_string())?,
            }
        };

        let record = FeedbackRecord { review, rating };
        self.save(&record, console)?;
        Ok(Some(record))
    }

    /// Persist `record` and thank the user.
    pub fn save<R: BufRead, W: Write>(
        &self,
        record: &FeedbackRecord,
        console: &mut Console<R, W>,
    ) -> Result<()> {
        self.store.append(record)?;
        console.say("Thank you! Your feedback has been saved.")
    }

    async fn question<R: BufRead, W: Write>(
        &self,
        manager: &LLMManager,
        console: &Console<R, W>,
        instruction: &str,
    ) -> Result<String> {
        let fallback = local_question(instruction);
        if !self.paraphrase {
            return Ok(fallback);
        }

        let spinner = console.thinking();
        let question = manager.paraphrase(instruction, &fallback).await;
        spinner.finish_and_clear();
        question
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_manager::Completion;
    use crate::llm_manager::testing::ScriptedProvider;
    use std::io::Cursor;

    fn console(input: &str) -> Console<Cursor<Vec<u8>>, Vec<u8>> {
        Console::new(Cursor::new(input.as_bytes().to_vec()), Vec::new())
    }

    fn question_manager() -> LLMManager {
        LLMManager::new(Box::new(ScriptedProvider::new(|prompt| {
            if prompt == RATING_INSTRUCTION {
                Completion::text("How many stars would you give me, from 1 to 5?")
            } else {
                Completion::text("How did you like our chat?")
            }
        })))
    }

    #[test]
    fn test_parse_rating_accepts_one_to_five() {
        for (input, expected) in [("1", 1), ("2", 2), ("3", 3), ("4", 4), ("5", 5), (" 3 ", 3)] {
            assert_eq!(parse_rating(input), Ok(expected));
        }
    }

    #[test]
    fn test_parse_rating_rejects_bad_input() {
        assert_eq!(parse_rating("0"), Err(RatingError::OutOfRange(0)));
        assert_eq!(parse_rating("6"), Err(RatingError::OutOfRange(6)));
        assert_eq!(parse_rating("abc"), Err(RatingError::NotANumber));
        assert_eq!(parse_rating("4.5"), Err(RatingError::NotANumber));
        assert_eq!(parse_rating(""), Err(RatingError::NotANumber));
        assert_eq!(parse_rating("1__0"), Err(RatingError::NotANumber));
        assert_eq!(parse_rating("_3"), Err(RatingError::NotANumber));
        assert_eq!(parse_rating("3_"), Err(RatingError::NotANumber));
        assert_eq!(parse_rating("-"), Err(RatingError::NotANumber));
    }

    #[test]
    fn test_parse_rating_huge_integers_are_out_of_range() {
        assert_eq!(
            parse_rating("99999999999999999999"),
            Err(RatingError::OutOfRange(i64::MAX))
        );
        assert_eq!(
            parse_rating("-99999999999999999999"),
            Err(RatingError::OutOfRange(i64::MIN))
        );
        assert_eq!(
            parse_rating("99999999999999999999").unwrap_err().to_string(),
            "Please enter a number between 1 and 5."
        );
    }

    #[test]
    fn test_parse_rating_digit_groups_and_signs() {
        assert_eq!(parse_rating("1_0"), Err(RatingError::OutOfRange(10)));
        assert_eq!(parse_rating("+4"), Ok(4));
        assert_eq!(parse_rating("05"), Ok(5));
        assert_eq!(parse_rating("-2"), Err(RatingError::OutOfRange(-2)));
    }

    #[test]
    fn test_record_from_call() {
        let call = FunctionCall {
            name: REVIEW_FUNCTION.to_string(),
            args: json!({"review": "loved it", "rating": 5.0}),
        };
        assert_eq!(
            record_from_call(&call),
            Some(FeedbackRecord {
                review: "loved it".to_string(),
                rating: 5
            })
        );

        let out_of_range = FunctionCall {
            name: REVIEW_FUNCTION.to_string(),
            args: json!({"review": "meh", "rating": 9}),
        };
        assert_eq!(record_from_call(&out_of_range), None);

        let other = FunctionCall {
            name: "lookup_weather".to_string(),
            args: json!({"review": "x", "rating": 3}),
        };
        assert_eq!(record_from_call(&other), None);
    }

    #[test]
    fn test_store_appends_indented_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feedback.txt");
        let store = FeedbackStore::new(&path);
        store
            .append(&FeedbackRecord {
                review: "great bot".to_string(),
                rating: 5,
            })
            .unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(
            contents,
            "{\n    \"review\": \"great bot\",\n    \"rating\": 5\n}\n"
        );
    }

    #[test]
    fn test_store_load_recovers_records_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feedback.txt");
        let store = FeedbackStore::new(&path);
        assert!(store.load().unwrap().is_empty());

        let records = vec![
            FeedbackRecord {
                review: "quote \" and newline\n inside".to_string(),
                rating: 2,
            },
            FeedbackRecord {
                review: "great bot".to_string(),
                rating: 5,
            },
        ];
        for record in &records {
            store.append(record).unwrap();
        }

        assert_eq!(store.load().unwrap(), records);
        let summary = store.summary().unwrap();
        assert_eq!(summary.count, 2);
        assert_eq!(summary.average_rating, Some(3.5));
        assert_eq!(summary.to_string(), "2 feedback entries, average rating 3.50");
    }

    #[test]
    fn test_empty_summary() {
        let dir = tempfile::tempdir().unwrap();
        let store = FeedbackStore::new(dir.path().join("feedback.txt"));
        assert_eq!(store.summary().unwrap().to_string(), "No feedback recorded yet.");
    }

    #[tokio::test]
    async fn test_collect_accepts_valid_rating_first_try() {
        for rating in 1..=5u8 {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("feedback.txt");
            let collector = FeedbackCollector::new(FeedbackStore::new(&path), true);
            let mut console = console(&format!("nice\n{}\n", rating));

            let record = collector
                .collect(&question_manager(), &mut console)
                .await
                .unwrap();
            assert_eq!(
                record,
                Some(FeedbackRecord {
                    review: "nice".to_string(),
                    rating
                })
            );

            let output = String::from_utf8(console.into_output()).unwrap();
            assert_eq!(output.matches("How many stars").count(), 1);
            assert!(output.contains("Thank you! Your feedback has been saved."));
        }
    }

    #[tokio::test]
    async fn test_collect_reprompts_until_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feedback.txt");
        let collector = FeedbackCollector::new(FeedbackStore::new(&path), true);
        let mut console = console("so-so\n0\n6\nabc\n4\n");

        let record = collector
            .collect(&question_manager(), &mut console)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.rating, 4);
        assert_eq!(record.review, "so-so");

        let output = String::from_utf8(console.into_output()).unwrap();
        assert_eq!(output.matches("How many stars").count(), 4);
        assert_eq!(output.matches("Please enter a number between 1 and 5.").count(), 2);
        assert_eq!(output.matches("Please enter a valid number.").count(), 1);
        assert_eq!(FeedbackStore::new(&path).load().unwrap(), vec![record]);
    }

    #[tokio::test]
    async fn test_collect_never_accepts_invalid_ratings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feedback.txt");
        let collector = FeedbackCollector::new(FeedbackStore::new(&path), true);
        let mut console = console("review\n0\n6\nabc\n");

        let record = collector
            .collect(&question_manager(), &mut console)
            .await
            .unwrap();
        assert_eq!(record, None);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_collect_uses_local_questions_without_paraphrase() {
        let provider = ScriptedProvider::new(|_| Completion::text("unused"));
        let prompts = provider.prompts();
        let manager = LLMManager::new(Box::new(provider));
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feedback.txt");
        let collector = FeedbackCollector::new(FeedbackStore::new(&path), false);
        let mut console = console("fine\n3\n");

        collector.collect(&manager, &mut console).await.unwrap();

        assert!(prompts.lock().unwrap().is_empty());
        let output = String::from_utf8(console.into_output()).unwrap();
        assert!(output.contains(&local_question(REVIEW_INSTRUCTION)));
        assert!(output.contains(&local_question(RATING_INSTRUCTION)));
    }
}
