//! In-memory fakes for the two remote seams, plus a reader for exported
//! Anki packages.
use crate::anki;
use crate::coda::RecordSource;
use crate::error::FlashcardError;
use crate::groq::{CompletionModel, CompletionRequest};
use crate::record::{ErrorRecord, RecordFilter};
use serde_json::{json, Value};
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Read};
use std::path::Path;

/// A model answer with `count` well-formed cards.
pub fn cards_json(count: usize) -> String {
    let cards: Vec<_> = (1..=count)
        .map(|idx| {
            json!({
                "question": format!("Pergunta {idx}"),
                "answer": format!("Resposta {idx}"),
                "topic": "Recursos - Prazo"
            })
        })
        .collect();
    json!({ "flashcards": cards, "summary": "Resumo do erro." }).to_string()
}

/// A table held in memory; marking flips the record's flag in place.
pub struct FakeTable {
    records: RefCell<Vec<ErrorRecord>>,
    marked: RefCell<Vec<String>>,
    failing_marks: BTreeSet<String>,
    fail_fetch: bool,
}

impl FakeTable {
    pub fn new(records: Vec<ErrorRecord>) -> Self {
        Self {
            records: RefCell::new(records),
            marked: RefCell::new(Vec::new()),
            failing_marks: BTreeSet::new(),
            fail_fetch: false,
        }
    }

    pub fn failing_fetch() -> Self {
        Self {
            fail_fetch: true,
            ..Self::new(Vec::new())
        }
    }

    pub fn fail_mark_for(mut self, record_id: &str) -> Self {
        self.failing_marks.insert(record_id.to_string());
        self
    }

    pub fn marked(&self) -> Vec<String> {
        self.marked.borrow().clone()
    }

    pub fn is_processed(&self, record_id: &str) -> bool {
        self.records
            .borrow()
            .iter()
            .any(|record| record.id == record_id && record.processed)
    }
}

impl RecordSource for FakeTable {
    fn fetch(
        &self,
        filter: &RecordFilter,
        limit: usize,
    ) -> Result<Vec<ErrorRecord>, FlashcardError> {
        if self.fail_fetch {
            return Err(FlashcardError::remote("coda", "HTTP 404: doc not found"));
        }
        let limit = match filter {
            RecordFilter::Id(_) => usize::MAX,
            _ => limit,
        };
        Ok(self
            .records
            .borrow()
            .iter()
            .filter(|record| filter.matches(record))
            .take(limit)
            .cloned()
            .collect())
    }

    fn mark_processed(&self, record_id: &str) -> Result<(), FlashcardError> {
        if self.failing_marks.contains(record_id) {
            return Err(FlashcardError::remote("coda", "HTTP 401: unauthorized"));
        }
        for record in self.records.borrow_mut().iter_mut() {
            if record.id == record_id {
                record.processed = true;
            }
        }
        self.marked.borrow_mut().push(record_id.to_string());
        Ok(())
    }
}

/// Owned copy of a request seen by [`ScriptedModel`].
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub model: String,
    pub system: String,
    pub user: String,
}

type Reply = Box<dyn Fn(&CompletionRequest<'_>) -> Result<String, FlashcardError>>;

/// A completion model answering from a closure and recording every call.
pub struct ScriptedModel {
    reply: Reply,
    calls: RefCell<Vec<RecordedCall>>,
}

impl ScriptedModel {
    pub fn new(
        reply: impl Fn(&CompletionRequest<'_>) -> Result<String, FlashcardError> + 'static,
    ) -> Self {
        Self {
            reply: Box::new(reply),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn replying(text: String) -> Self {
        Self::new(move |_| Ok(text.clone()))
    }

    pub fn failing() -> Self {
        Self::new(|_| Err(FlashcardError::remote("groq", "HTTP 429: rate limited")))
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.borrow().clone()
    }
}

impl CompletionModel for ScriptedModel {
    fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, FlashcardError> {
        self.calls.borrow_mut().push(RecordedCall {
            model: request.model.to_string(),
            system: request.system.to_string(),
            user: request.user.to_string(),
        });
        (self.reply)(request)
    }
}

/// One note of an exported package, with its deck resolved by name.
#[derive(Debug, PartialEq, Eq)]
pub struct PackageNote {
    pub deck: String,
    pub guid: String,
    pub fields: Vec<String>,
    pub tags: String,
}

pub struct PackageContents {
    pub media: String,
    pub model_name: String,
    pub field_names: Vec<String>,
    pub notes: Vec<PackageNote>,
}

/// Unzip an `.apkg` and read its collection back, notes in id order.
pub fn read_package(path: &Path) -> PackageContents {
    let file = fs::File::open(path).expect("open package");
    let mut archive = zip::ZipArchive::new(file).expect("read package zip");
    let mut media = String::new();
    archive
        .by_name("media")
        .expect("media entry")
        .read_to_string(&mut media)
        .expect("read media entry");

    let scratch = tempfile::tempdir().expect("create temp dir");
    let db_path = scratch.path().join("collection.anki2");
    {
        let mut entry = archive
            .by_name("collection.anki2")
            .expect("collection entry");
        let mut copy = fs::File::create(&db_path).expect("create collection copy");
        io::copy(&mut entry, &mut copy).expect("extract collection");
    }

    let conn = rusqlite::Connection::open(&db_path).expect("open collection");
    let (models, decks): (String, String) = conn
        .query_row("SELECT models, decks FROM col", [], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })
        .expect("read collection row");
    let models: Value = serde_json::from_str(&models).expect("models json");
    let decks: Value = serde_json::from_str(&decks).expect("decks json");
    let model = &models[anki::MODEL_ID.to_string().as_str()];
    let field_names = model["flds"]
        .as_array()
        .expect("model fields")
        .iter()
        .map(|field| field["name"].as_str().expect("field name").to_string())
        .collect();

    let mut statement = conn
        .prepare(
            "SELECT n.guid, n.flds, n.tags, c.did FROM notes n \
             JOIN cards c ON c.nid = n.id ORDER BY n.id",
        )
        .expect("prepare note query");
    let notes: Vec<PackageNote> = statement
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })
        .expect("query notes")
        .map(|row| {
            let (guid, fields, tags, deck_id) = row.expect("note row");
            PackageNote {
                deck: decks[deck_id.to_string().as_str()]["name"]
                    .as_str()
                    .expect("deck name")
                    .to_string(),
                guid,
                fields: fields.split('\x1f').map(str::to_string).collect(),
                tags,
            }
        })
        .collect();

    PackageContents {
        media,
        model_name: model["name"].as_str().expect("model name").to_string(),
        field_names,
        notes,
    }
}
