//! Local JSON store mapping record ids to their generated flashcards.
//!
//! The file is read, merged, and rewritten once per run. Writes go to a
//! sibling temp file first and are renamed into place.
use crate::error::FlashcardError;
use crate::record::Flashcard;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub type CardsById = BTreeMap<String, Vec<Flashcard>>;

pub const DEFAULT_STORE_PATH: &str = "flashcards.json";

#[derive(Debug, Clone)]
pub struct FlashcardStore {
    path: PathBuf,
}

impl FlashcardStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the store; a missing file is an empty store.
    pub fn load(&self) -> Result<CardsById, FlashcardError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(CardsById::new()),
            Err(err) => return Err(FlashcardError::local_io(&self.path, err)),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(CardsById::new());
        }
        serde_json::from_slice(&bytes).map_err(|err| FlashcardError::invalid_data(&self.path, err))
    }

    /// Merge card groups into the store and persist it.
    ///
    /// An id already present is replaced, so re-running a record never
    /// duplicates its entry. Returns the number of ids in the store.
    pub fn merge(&self, groups: &[(String, Vec<Flashcard>)]) -> Result<usize, FlashcardError> {
        let mut stored = self.load()?;
        for (record_id, cards) in groups {
            if stored.insert(record_id.clone(), cards.clone()).is_some() {
                tracing::debug!(record_id = %record_id, "replacing stored flashcards");
            }
        }
        let text = serde_json::to_string_pretty(&stored)
            .map_err(|err| FlashcardError::invalid_data(&self.path, err))?;
        write_atomic(&self.path, text.as_bytes())
            .map_err(|err| FlashcardError::local_io(&self.path, err))?;
        tracing::info!(
            path = %self.path.display(),
            merged = groups.len(),
            total = stored.len(),
            "flashcard store written"
        );
        Ok(stored.len())
    }
}

pub(crate) fn write_atomic(dest: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;
    let file_name = dest
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("store");
    let tmp_path = parent.join(format!(".{file_name}.tmp"));
    fs::write(&tmp_path, bytes)?;
    if let Err(err) = fs::rename(&tmp_path, dest) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }
    Ok(())
}
