//! Runtime configuration.
//!
//! Settings come from the process environment, optionally seeded from a
//! dotenv file, and are gathered once into a [`Config`] that each client is
//! constructed from.
use crate::error::FlashcardError;
use anyhow::{Context, Result};
use std::fmt;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CODA_API_URL: &str = "https://coda.io/apis/v1";
pub const DEFAULT_GROQ_API_URL: &str = "https://api.groq.com/openai/v1";
/// Column id of the "Flashcard Criado" checkbox; row updates are keyed by id.
pub const DEFAULT_PROCESSED_COLUMN: &str = "c-YGQq5IUq3f";
const DEFAULT_REQUEST_DELAY_MS: u64 = 2000;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

#[derive(Clone)]
pub struct CodaConfig {
    pub api_url: String,
    pub api_key: String,
    pub doc_id: String,
    pub table_id: String,
    pub processed_column: String,
}

#[derive(Clone)]
pub struct GroqConfig {
    pub api_url: String,
    pub api_key: String,
    /// Pause before each completion call to stay under the rate limit.
    pub request_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub coda: CodaConfig,
    pub groq: GroqConfig,
    pub http_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, FlashcardError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, FlashcardError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let require = |key: &str| {
            get(key).ok_or_else(|| {
                FlashcardError::Config(format!("{key} is not set in the environment"))
            })
        };
        let number = |key: &str, default: u64| -> Result<u64, FlashcardError> {
            match get(key) {
                Some(raw) => raw.parse::<u64>().map_err(|err| {
                    FlashcardError::Config(format!("{key} must be a whole number ({err})"))
                }),
                None => Ok(default),
            }
        };

        let coda = CodaConfig {
            api_url: get("CODA_API_URL").unwrap_or_else(|| DEFAULT_CODA_API_URL.to_string()),
            api_key: require("CODA_API_KEY")?,
            doc_id: require("CODA_DOC_ID")?,
            table_id: require("CODA_TABLE_ID")?,
            processed_column: get("CODA_PROCESSED_COLUMN")
                .unwrap_or_else(|| DEFAULT_PROCESSED_COLUMN.to_string()),
        };
        let groq = GroqConfig {
            api_url: get("GROQ_API_URL").unwrap_or_else(|| DEFAULT_GROQ_API_URL.to_string()),
            api_key: require("GROQ_API_KEY")?,
            request_delay: Duration::from_millis(number(
                "FLASHCARDS_REQUEST_DELAY_MS",
                DEFAULT_REQUEST_DELAY_MS,
            )?),
        };
        let timeout_secs = number("FLASHCARDS_HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS)?;
        if timeout_secs == 0 {
            return Err(FlashcardError::Config(
                "FLASHCARDS_HTTP_TIMEOUT_SECS must be greater than zero".to_string(),
            ));
        }
        Ok(Config {
            coda,
            groq,
            http_timeout: Duration::from_secs(timeout_secs),
        })
    }
}

/// Load `KEY=value` pairs from a dotenv file into the process environment.
///
/// Variables already set in the environment win. A missing file is not an
/// error; returns whether a file was loaded.
pub fn load_env_file(path: &Path) -> Result<bool> {
    if !path.is_file() {
        tracing::debug!(path = %path.display(), "env file not found");
        return Ok(false);
    }
    dotenvy::from_path(path).with_context(|| format!("load env file {}", path.display()))?;
    Ok(true)
}

// Keys stay out of Debug output so configs can be logged.
impl fmt::Debug for CodaConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodaConfig")
            .field("api_url", &self.api_url)
            .field("api_key", &"<redacted>")
            .field("doc_id", &self.doc_id)
            .field("table_id", &self.table_id)
            .field("processed_column", &self.processed_column)
            .finish()
    }
}

impl fmt::Debug for GroqConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroqConfig")
            .field("api_url", &self.api_url)
            .field("api_key", &"<redacted>")
            .field("request_delay", &self.request_delay)
            .finish()
    }
}
