//! Domain types passed between the fetcher, the generator, and the store.
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single study-mistake row from the Coda table.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorRecord {
    pub id: String,
    pub discipline: String,
    /// Resolution text explaining the mistake; the generator works from this.
    pub description: String,
    pub processed: bool,
    pub subject: Option<String>,
    pub exam: Option<String>,
    pub error_type: Option<String>,
    pub created_at: Option<DateTime<FixedOffset>>,
}

impl ErrorRecord {
    pub fn new(
        id: impl Into<String>,
        discipline: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            discipline: discipline.into(),
            description: description.into(),
            processed: false,
            subject: None,
            exam: None,
            error_type: None,
            created_at: None,
        }
    }

    /// Label used in logs and console output.
    pub fn label(&self) -> &str {
        self.subject.as_deref().unwrap_or(&self.discipline)
    }
}

/// One generated question/answer unit, as persisted in the local store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flashcard {
    pub question: String,
    pub answer: String,
    pub topic: String,
    #[serde(default)]
    pub summary: String,
}

/// Which records a run should pick up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordFilter {
    /// Records whose processed flag is still false.
    Pending,
    /// Records whose discipline equals the name exactly.
    Discipline(String),
    /// A single record by row id.
    Id(String),
}

impl RecordFilter {
    /// Client-side check applied on top of the remote query.
    pub fn matches(&self, record: &ErrorRecord) -> bool {
        match self {
            RecordFilter::Pending => !record.processed,
            RecordFilter::Discipline(name) => record.discipline == *name,
            RecordFilter::Id(id) => record.id == *id,
        }
    }
}

impl fmt::Display for RecordFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordFilter::Pending => write!(f, "pending"),
            RecordFilter::Discipline(name) => write!(f, "discipline \"{name}\""),
            RecordFilter::Id(id) => write!(f, "id \"{id}\""),
        }
    }
}
