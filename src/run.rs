//! Run coordinator: fetch, generate per record, persist once, then mark.
//!
//! A record is marked processed only after its cards are in the local store.
//! Generation and marking failures stay per-record; fetch and store failures
//! abort the run before anything is marked.
use crate::anki;
use crate::coda::RecordSource;
use crate::generator::{self, description_too_short};
use crate::groq::CompletionModel;
use crate::record::{ErrorRecord, Flashcard, RecordFilter};
use crate::store::FlashcardStore;
use anyhow::{Context, Result};
use chrono::Local;
use std::path::PathBuf;

pub const DEFAULT_LIMIT: usize = 5;
pub const DEFAULT_CARD_COUNT: usize = 3;
pub const DEFAULT_MODEL: &str = "llama-3.3-70b-versatile";

#[derive(Debug, Clone)]
pub struct AnkiExport {
    pub dir: PathBuf,
    pub main_deck: String,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub filter: RecordFilter,
    pub limit: usize,
    pub card_count: usize,
    pub model: String,
    /// Write the processed flag back to the table.
    pub mark: bool,
    pub anki: Option<AnkiExport>,
}

impl RunOptions {
    pub fn new(filter: RecordFilter) -> Self {
        Self {
            filter,
            limit: DEFAULT_LIMIT,
            card_count: DEFAULT_CARD_COUNT,
            model: DEFAULT_MODEL.to_string(),
            mark: true,
            anki: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Cards stored; `marked` is false only when marking was disabled.
    Processed { marked: bool },
    /// Nothing sent to the model.
    Skipped { reason: String },
    GenerationFailed { reason: String },
    /// Cards stored but the flag write failed; the record stays pending.
    MarkFailed { reason: String },
}

#[derive(Debug, Clone)]
pub struct RecordResult {
    pub record: ErrorRecord,
    pub cards: Vec<Flashcard>,
    pub outcome: RecordOutcome,
}

#[derive(Debug, Default)]
pub struct RunResult {
    pub records: Vec<RecordResult>,
    pub anki_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub fetched: usize,
    pub processed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cards: usize,
}

impl RunResult {
    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary {
            fetched: self.records.len(),
            ..RunSummary::default()
        };
        for result in &self.records {
            match result.outcome {
                RecordOutcome::Processed { .. } => {
                    summary.processed += 1;
                    summary.cards += result.cards.len();
                }
                RecordOutcome::Skipped { .. } => summary.skipped += 1,
                RecordOutcome::GenerationFailed { .. } | RecordOutcome::MarkFailed { .. } => {
                    summary.failed += 1
                }
            }
        }
        summary
    }
}

pub fn run<S, M>(
    source: &S,
    model: &M,
    store: &FlashcardStore,
    options: &RunOptions,
) -> Result<RunResult>
where
    S: RecordSource + ?Sized,
    M: CompletionModel + ?Sized,
{
    let records = source
        .fetch(&options.filter, options.limit)
        .with_context(|| format!("fetch {} error records", options.filter))?;
    if records.is_empty() {
        tracing::info!(filter = %options.filter, "no error records to process");
        return Ok(RunResult::default());
    }
    tracing::info!(records = records.len(), "processing error records");

    let mut results: Vec<RecordResult> = records
        .into_iter()
        .map(|record| generate_for(model, record, options))
        .collect();

    let generated: Vec<&RecordResult> = results
        .iter()
        .filter(|result| !result.cards.is_empty())
        .collect();
    if generated.is_empty() {
        tracing::warn!("no flashcards were generated");
        return Ok(RunResult {
            records: results,
            anki_file: None,
        });
    }

    let groups: Vec<(String, Vec<Flashcard>)> = generated
        .iter()
        .map(|result| (result.record.id.clone(), result.cards.clone()))
        .collect();
    store
        .merge(&groups)
        .with_context(|| format!("write flashcard store {}", store.path().display()))?;

    let anki_file = match &options.anki {
        Some(export) => {
            let notes: Vec<(&ErrorRecord, &[Flashcard])> = generated
                .iter()
                .map(|result| (&result.record, result.cards.as_slice()))
                .collect();
            let path = anki::write_package(&export.dir, &export.main_deck, &notes, Local::now())
                .context("write anki package")?;
            Some(path)
        }
        None => None,
    };

    for result in results.iter_mut().filter(|result| !result.cards.is_empty()) {
        result.outcome = if options.mark {
            match source.mark_processed(&result.record.id) {
                Ok(()) => RecordOutcome::Processed { marked: true },
                Err(err) => {
                    tracing::error!(record_id = %result.record.id, %err, "failed to mark record as processed");
                    RecordOutcome::MarkFailed {
                        reason: err.to_string(),
                    }
                }
            }
        } else {
            RecordOutcome::Processed { marked: false }
        };
    }

    Ok(RunResult {
        records: results,
        anki_file,
    })
}

fn generate_for<M>(model: &M, record: ErrorRecord, options: &RunOptions) -> RecordResult
where
    M: CompletionModel + ?Sized,
{
    tracing::info!(record_id = %record.id, label = record.label(), "processing error record");
    if description_too_short(&record) {
        tracing::warn!(record_id = %record.id, "description too short or empty; skipping");
        return RecordResult {
            record,
            cards: Vec::new(),
            outcome: RecordOutcome::Skipped {
                reason: format!(
                    "description shorter than {} characters",
                    generator::MIN_DESCRIPTION_CHARS
                ),
            },
        };
    }
    match generator::generate_flashcards(model, &record, options.card_count, &options.model) {
        Ok(cards) => {
            tracing::info!(record_id = %record.id, cards = cards.len(), "flashcards generated");
            RecordResult {
                record,
                cards,
                // Settled after the store write and the mark call.
                outcome: RecordOutcome::Processed { marked: false },
            }
        }
        Err(err) => {
            tracing::error!(record_id = %record.id, %err, "flashcard generation failed");
            RecordResult {
                record,
                cards: Vec::new(),
                outcome: RecordOutcome::GenerationFailed {
                    reason: err.to_string(),
                },
            }
        }
    }
}
