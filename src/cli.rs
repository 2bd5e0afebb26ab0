//! CLI argument parsing.
//!
//! Exactly one record filter is required; everything else has a default.
use crate::anki::DEFAULT_MAIN_DECK;
use crate::record::RecordFilter;
use crate::run::{AnkiExport, RunOptions, DEFAULT_CARD_COUNT, DEFAULT_LIMIT, DEFAULT_MODEL};
use crate::store::DEFAULT_STORE_PATH;
use clap::{ArgGroup, Parser};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "coda-flashcards",
    version,
    about = "Generate flashcards from study-error records kept in Coda",
    after_help = "Examples:\n  coda-flashcards --pending --limit 10\n  coda-flashcards --discipline \"AUDITORIA PRIVADA\" --cards 5\n  coda-flashcards --id i-abc123 --cards 2 --anki-dir anki_decks",
    group(
        ArgGroup::new("filter")
            .required(true)
            .args(["pending", "discipline", "id"])
    )
)]
pub struct RootArgs {
    /// Process records whose flashcards were not created yet
    #[arg(long)]
    pub pending: bool,

    /// Process records of one discipline (exact match)
    #[arg(long, value_name = "NAME")]
    pub discipline: Option<String>,

    /// Process a single record by row id
    #[arg(long, value_name = "ID")]
    pub id: Option<String>,

    /// Maximum number of records to process
    #[arg(long, value_name = "N", default_value_t = DEFAULT_LIMIT)]
    pub limit: usize,

    /// Groq model used to write the cards
    #[arg(long, value_name = "NAME", default_value = DEFAULT_MODEL)]
    pub model: String,

    /// Flashcards to generate per record (upper bound)
    #[arg(long, value_name = "N", default_value_t = DEFAULT_CARD_COUNT, value_parser = parse_card_count)]
    pub cards: usize,

    /// JSON file that accumulates generated flashcards by record id
    #[arg(long, value_name = "PATH", default_value = DEFAULT_STORE_PATH)]
    pub store: PathBuf,

    /// Dotenv file with API keys and table ids
    #[arg(long, value_name = "PATH", default_value = ".env")]
    pub env_file: PathBuf,

    /// Also write an Anki package (.apkg) into this directory
    #[arg(long, value_name = "DIR")]
    pub anki_dir: Option<PathBuf>,

    /// Main Anki deck; each discipline becomes a sub-deck
    #[arg(long, value_name = "NAME", default_value = DEFAULT_MAIN_DECK, requires = "anki_dir")]
    pub deck: String,

    /// Store the cards but leave the records unmarked in Coda
    #[arg(long)]
    pub no_mark: bool,

    /// Emit debug logs (RUST_LOG overrides)
    #[arg(long)]
    pub verbose: bool,
}

impl RootArgs {
    pub fn filter(&self) -> RecordFilter {
        if let Some(id) = &self.id {
            RecordFilter::Id(id.clone())
        } else if let Some(name) = &self.discipline {
            RecordFilter::Discipline(name.clone())
        } else {
            RecordFilter::Pending
        }
    }

    pub fn run_options(&self) -> RunOptions {
        let mut options = RunOptions::new(self.filter());
        options.limit = self.limit;
        options.card_count = self.cards;
        options.model = self.model.clone();
        options.mark = !self.no_mark;
        options.anki = self.anki_dir.as_ref().map(|dir| AnkiExport {
            dir: dir.clone(),
            main_deck: self.deck.clone(),
        });
        options
    }
}

fn parse_card_count(raw: &str) -> Result<usize, String> {
    let count: usize = raw
        .parse()
        .map_err(|_| format!("`{raw}` is not a whole number"))?;
    if count == 0 {
        return Err("at least one card per record is required".to_string());
    }
    Ok(count)
}
