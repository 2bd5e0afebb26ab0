//! Error taxonomy shared by the remote clients, the generator, and the store.
//!
//! Component seams return [`FlashcardError`] so the run coordinator can tell
//! per-record failures from fatal ones; everything above the coordinator
//! works with `anyhow`.
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlashcardError {
    /// Missing or malformed settings; always fatal.
    #[error("configuration error: {0}")]
    Config(String),

    /// Network, auth, status, or schema failures talking to Coda or Groq.
    #[error("{service} API error: {message}")]
    RemoteApi {
        service: &'static str,
        message: String,
    },

    /// The LM answered but nothing usable could be parsed from it.
    #[error("flashcard generation failed: {0}")]
    Generation(String),

    /// Reading or writing local files (store, Anki export).
    #[error("local I/O error at {}: {source}", path.display())]
    LocalIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl FlashcardError {
    pub fn remote(service: &'static str, message: impl Into<String>) -> Self {
        Self::RemoteApi {
            service,
            message: message.into(),
        }
    }

    pub fn local_io(path: &Path, source: io::Error) -> Self {
        Self::LocalIo {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Wrap a decode failure of an on-disk file as an I/O error on that path.
    pub fn invalid_data(path: &Path, err: impl std::fmt::Display) -> Self {
        Self::local_io(
            path,
            io::Error::new(io::ErrorKind::InvalidData, err.to_string()),
        )
    }
}
