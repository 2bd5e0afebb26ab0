//! Anki package (`.apkg`) export for the cards of one run.
//!
//! A package is a zip holding a `collection.anki2` SQLite collection and a
//! `media` manifest. Notes use the five-field "Concurso Básico" model and
//! each discipline becomes a sub-deck of the main deck. Note guids derive
//! from the record id, so importing a regenerated record updates its notes
//! instead of duplicating them.
use crate::error::FlashcardError;
use crate::record::{ErrorRecord, Flashcard};
use crate::store::write_atomic;
use crate::util::slug;
use chrono::{DateTime, Local};
use rusqlite::{params, Connection};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};
use zip::write::FileOptions;
use zip::ZipWriter;

pub const DEFAULT_MAIN_DECK: &str = "Concurso";

pub const MODEL_ID: i64 = 1_607_392_319;
pub const MODEL_NAME: &str = "Concurso Básico";
pub const FIELD_NAMES: [&str; 5] = ["Pergunta", "Resposta", "Assunto", "Disciplina", "Fonte"];
const DEFAULT_TOPIC: &str = "Geral";
const DEFAULT_DECK_ID: i64 = 1;
const FIELD_SEPARATOR: &str = "\x1f";

const QUESTION_FORMAT: &str = concat!(
    r#"<div class="card question">"#,
    r#"<div class="discipline">{{Disciplina}}</div>"#,
    r#"<div class="topic">{{Assunto}}</div>"#,
    r#"<div class="question">{{Pergunta}}</div>"#,
    "</div>",
);

const ANSWER_FORMAT: &str = concat!(
    r#"<div class="card">"#,
    r#"<div class="discipline">{{Disciplina}}</div>"#,
    r#"<div class="topic">{{Assunto}}</div>"#,
    r#"<div class="question">{{Pergunta}}</div>"#,
    r#"<hr id="answer">"#,
    r#"<div class="answer">{{Resposta}}</div>"#,
    r#"<div class="source"><small>Fonte: {{Fonte}}</small></div>"#,
    "</div>",
);

const CARD_CSS: &str = concat!(
    ".card { font-family: Arial, sans-serif; font-size: 16px; text-align: left; margin: 20px; }\n",
    ".question { font-weight: bold; margin-bottom: 15px; }\n",
    ".discipline { font-size: 14px; color: #666; margin-bottom: 5px; }\n",
    ".topic { font-size: 14px; color: #444; margin-bottom: 15px; font-style: italic; }\n",
    ".answer { margin-top: 15px; }\n",
    ".source { margin-top: 20px; color: #888; }\n",
);

const LATEX_PRE: &str = "\\documentclass[12pt]{article}\n\\special{papersize=3in,5in}\n\\usepackage[utf8]{inputenc}\n\\usepackage{amssymb,amsmath}\n\\pagestyle{empty}\n\\setlength{\\parindent}{0in}\n\\begin{document}\n";
const LATEX_POST: &str = "\\end{document}";

const COLLECTION_SCHEMA: &str = r#"
    CREATE TABLE col (
        id              integer primary key,
        crt             integer not null,
        mod             integer not null,
        scm             integer not null,
        ver             integer not null,
        dty             integer not null,
        usn             integer not null,
        ls              integer not null,
        conf            text not null,
        models          text not null,
        decks           text not null,
        dconf           text not null,
        tags            text not null
    );
    CREATE TABLE notes (
        id              integer primary key,
        guid            text not null unique,
        mid             integer not null,
        mod             integer not null,
        usn             integer not null,
        tags            text not null,
        flds            text not null,
        sfld            text not null,
        csum            integer not null,
        flags           integer not null,
        data            text not null
    );
    CREATE TABLE cards (
        id              integer primary key,
        nid             integer not null,
        did             integer not null,
        ord             integer not null,
        mod             integer not null,
        usn             integer not null,
        type            integer not null,
        queue           integer not null,
        due             integer not null,
        ivl             integer not null,
        factor          integer not null,
        reps            integer not null,
        lapses          integer not null,
        left            integer not null,
        odue            integer not null,
        odid            integer not null,
        flags           integer not null,
        data            text not null
    );
    CREATE TABLE revlog (
        id              integer primary key,
        cid             integer not null,
        usn             integer not null,
        ease            integer not null,
        ivl             integer not null,
        lastIvl         integer not null,
        factor          integer not null,
        time            integer not null,
        type            integer not null
    );
    CREATE TABLE graves (
        usn             integer not null,
        oid             integer not null,
        type            integer not null
    );
    CREATE INDEX ix_cards_nid on cards (nid);
    CREATE INDEX ix_cards_sched on cards (did, queue, due);
    CREATE INDEX ix_cards_usn on cards (usn);
    CREATE INDEX ix_notes_usn on notes (usn);
    CREATE INDEX ix_notes_csum on notes (csum);
    CREATE INDEX ix_revlog_usn on revlog (usn);
    CREATE INDEX ix_revlog_cid on revlog (cid);
"#;

#[derive(Serialize)]
struct NoteModel {
    id: String,
    name: &'static str,
    #[serde(rename = "type")]
    model_type: i32,
    #[serde(rename = "mod")]
    modified: i64,
    usn: i32,
    #[serde(rename = "sortf")]
    sort_field: i32,
    did: i64,
    tmpls: Vec<CardTemplate>,
    flds: Vec<ModelField>,
    css: &'static str,
    #[serde(rename = "latexPre")]
    latex_pre: &'static str,
    #[serde(rename = "latexPost")]
    latex_post: &'static str,
    tags: Vec<String>,
    vers: Vec<i32>,
    req: Vec<Value>,
}

#[derive(Serialize)]
struct CardTemplate {
    name: &'static str,
    ord: i32,
    qfmt: &'static str,
    afmt: &'static str,
    bqfmt: &'static str,
    bafmt: &'static str,
    did: Option<i64>,
}

#[derive(Serialize)]
struct ModelField {
    name: &'static str,
    ord: i32,
    sticky: bool,
    rtl: bool,
    font: &'static str,
    size: i32,
    media: Vec<String>,
}

/// One note row, ready to insert.
struct Note {
    deck_id: i64,
    guid: String,
    fields: [String; 5],
    tags: String,
}

fn note_model(now: i64) -> NoteModel {
    NoteModel {
        id: MODEL_ID.to_string(),
        name: MODEL_NAME,
        model_type: 0,
        modified: now,
        usn: -1,
        sort_field: 0,
        did: DEFAULT_DECK_ID,
        tmpls: vec![CardTemplate {
            name: "Card",
            ord: 0,
            qfmt: QUESTION_FORMAT,
            afmt: ANSWER_FORMAT,
            bqfmt: "",
            bafmt: "",
            did: None,
        }],
        flds: FIELD_NAMES
            .iter()
            .zip(0..)
            .map(|(&name, ord)| ModelField {
                name,
                ord,
                sticky: false,
                rtl: false,
                font: "Arial",
                size: 20,
                media: Vec::new(),
            })
            .collect(),
        css: CARD_CSS,
        latex_pre: LATEX_PRE,
        latex_post: LATEX_POST,
        tags: Vec::new(),
        vers: Vec::new(),
        req: vec![json!([0, "any", [0]])],
    }
}

/// Write the package into `dir` and return its path.
pub fn write_package(
    dir: &Path,
    main_deck: &str,
    groups: &[(&ErrorRecord, &[Flashcard])],
    now: DateTime<Local>,
) -> Result<PathBuf, FlashcardError> {
    let file_name = format!(
        "{}_{}.apkg",
        main_deck.trim().replace(' ', "_"),
        now.format("%Y%m%d_%H%M%S")
    );
    let path = dir.join(file_name);
    let bytes =
        build_package(main_deck, groups, now).map_err(|err| FlashcardError::local_io(&path, err))?;
    write_atomic(&path, &bytes).map_err(|err| FlashcardError::local_io(&path, err))?;
    let notes: usize = groups.iter().map(|(_, cards)| cards.len()).sum();
    tracing::info!(path = %path.display(), notes, "anki package written");
    Ok(path)
}

/// Assemble the zipped package in memory.
fn build_package(
    main_deck: &str,
    groups: &[(&ErrorRecord, &[Flashcard])],
    now: DateTime<Local>,
) -> io::Result<Vec<u8>> {
    let scratch = tempfile::tempdir()?;
    let db_path = scratch.path().join("collection.anki2");
    let conn = Connection::open(&db_path).map_err(io::Error::other)?;
    write_collection(&conn, main_deck, groups, now).map_err(io::Error::other)?;
    conn.close().map_err(|(_, err)| io::Error::other(err))?;
    let collection = fs::read(db_path)?;

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default();
    zip.start_file("collection.anki2", options)
        .map_err(io::Error::other)?;
    zip.write_all(&collection)?;
    zip.start_file("media", options).map_err(io::Error::other)?;
    zip.write_all(b"{}")?;
    let cursor = zip.finish().map_err(io::Error::other)?;
    Ok(cursor.into_inner())
}

fn write_collection(
    conn: &Connection,
    main_deck: &str,
    groups: &[(&ErrorRecord, &[Flashcard])],
    now: DateTime<Local>,
) -> rusqlite::Result<()> {
    let created = now.timestamp();
    let base_id = now.timestamp_millis();
    conn.execute_batch(COLLECTION_SCHEMA)?;

    let mut decks = Map::new();
    decks.insert(
        DEFAULT_DECK_ID.to_string(),
        deck_entry(DEFAULT_DECK_ID, "Default", created),
    );
    let mut notes = Vec::new();
    for (offset, (deck, entries)) in (1..).zip(deck_layout(main_deck, groups)) {
        let deck_id = base_id + offset;
        decks.insert(deck_id.to_string(), deck_entry(deck_id, &deck, created));
        notes.extend(entries.into_iter().map(|(record, index, card)| Note {
            deck_id,
            guid: format!("{}:{index}", record.id),
            fields: note_fields(record, card),
            tags: tags(record),
        }));
    }

    let mut models = Map::new();
    models.insert(
        MODEL_ID.to_string(),
        serde_json::to_value(note_model(created)).map_err(|err| {
            rusqlite::Error::ToSqlConversionFailure(Box::new(err))
        })?,
    );
    conn.execute(
        "INSERT INTO col (id, crt, mod, scm, ver, dty, usn, ls, conf, models, decks, dconf, tags) \
         VALUES (1, ?1, ?2, ?3, 11, 0, 0, 0, ?4, ?5, ?6, ?7, '{}')",
        params![
            created,
            created,
            created,
            collection_config().to_string(),
            Value::Object(models).to_string(),
            Value::Object(decks).to_string(),
            deck_options(created).to_string(),
        ],
    )?;

    let mut insert_note = conn.prepare(
        "INSERT INTO notes (id, guid, mid, mod, usn, tags, flds, sfld, csum, flags, data) \
         VALUES (?1, ?2, ?3, ?4, -1, ?5, ?6, ?7, ?8, 0, '')",
    )?;
    let mut insert_card = conn.prepare(
        "INSERT INTO cards (id, nid, did, ord, mod, usn, type, queue, due, ivl, factor, reps, lapses, left, odue, odid, flags, data) \
         VALUES (?1, ?2, ?3, 0, ?4, -1, 0, 0, ?5, 0, 2500, 0, 0, 0, 0, 0, 0, '')",
    )?;
    for (position, note) in (0..).zip(&notes) {
        let note_id = base_id + position;
        let sort_field = &note.fields[0];
        insert_note.execute(params![
            note_id,
            note.guid,
            MODEL_ID,
            created,
            note.tags,
            note.fields.join(FIELD_SEPARATOR),
            sort_field,
            sort_field_checksum(sort_field),
        ])?;
        insert_card.execute(params![note_id, note_id, note.deck_id, created, position + 1])?;
    }
    Ok(())
}

/// Cards grouped into `<main deck>::<discipline>` decks, ordered by deck
/// name. Each card keeps its index within its record.
fn deck_layout<'a>(
    main_deck: &str,
    groups: &[(&'a ErrorRecord, &'a [Flashcard])],
) -> BTreeMap<String, Vec<(&'a ErrorRecord, usize, &'a Flashcard)>> {
    let mut decks: BTreeMap<String, Vec<_>> = BTreeMap::new();
    for &(record, cards) in groups {
        let entries = decks
            .entry(deck_name(main_deck, &record.discipline))
            .or_default();
        entries.extend(
            cards
                .iter()
                .enumerate()
                .map(|(index, card)| (record, index, card)),
        );
    }
    decks
}

fn deck_name(main_deck: &str, discipline: &str) -> String {
    let main_deck = main_deck.trim();
    let discipline = discipline.trim();
    if discipline.is_empty() {
        main_deck.to_string()
    } else {
        // `::` would nest a further level; keep each discipline one deck.
        format!("{main_deck}::{}", discipline.replace("::", ":"))
    }
}

fn note_fields(record: &ErrorRecord, card: &Flashcard) -> [String; 5] {
    let topic = if card.topic.trim().is_empty() {
        DEFAULT_TOPIC
    } else {
        &card.topic
    };
    [
        field(&card.question),
        field(&card.answer),
        field(topic),
        field(&record.discipline),
        field(&record.id),
    ]
}

/// Space-separated tags, padded the way Anki stores them.
fn tags(record: &ErrorRecord) -> String {
    let tags: Vec<String> = [Some(record.discipline.as_str()), record.exam.as_deref()]
        .into_iter()
        .flatten()
        .map(slug)
        .filter(|tag| !tag.is_empty())
        .collect();
    if tags.is_empty() {
        String::new()
    } else {
        format!(" {} ", tags.join(" "))
    }
}

/// Escape a value for an HTML field; the unit separator delimits fields.
fn field(text: &str) -> String {
    text.trim()
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace(FIELD_SEPARATOR, " ")
        .replace("\r\n", "<br>")
        .replace('\n', "<br>")
}

fn sort_field_checksum(text: &str) -> i64 {
    (1..)
        .zip(text.chars())
        .map(|(position, ch)| i64::from(u32::from(ch)) * position)
        .sum()
}

fn deck_entry(id: i64, name: &str, modified: i64) -> Value {
    json!({
        "id": id,
        "name": name,
        "desc": "",
        "mod": modified,
        "usn": 0,
        "conf": 1,
        "dyn": 0,
        "collapsed": false,
        "browserCollapsed": true,
        "extendNew": 10,
        "extendRev": 50,
        "newToday": [0, 0],
        "revToday": [0, 0],
        "lrnToday": [0, 0],
        "timeToday": [0, 0]
    })
}

fn deck_options(modified: i64) -> Value {
    json!({
        "1": {
            "id": 1,
            "name": "Default",
            "mod": modified,
            "usn": 0,
            "maxTaken": 60,
            "timer": 0,
            "autoplay": true,
            "replayq": true,
            "new": {
                "perDay": 20,
                "delays": [1, 10],
                "ints": [1, 4, 7],
                "initialFactor": 2500,
                "separate": true,
                "order": 1,
                "bury": true
            },
            "rev": {
                "perDay": 200,
                "ease4": 1.3,
                "ivlFct": 1.0,
                "maxIvl": 36500,
                "minSpace": 1,
                "bury": true
            },
            "lapse": {
                "delays": [10],
                "mult": 0.0,
                "minInt": 1,
                "leechFails": 8,
                "leechAction": 0
            }
        }
    })
}

fn collection_config() -> Value {
    json!({
        "nextPos": 1,
        "estTimes": true,
        "activeDecks": [DEFAULT_DECK_ID],
        "sortType": "noteFld",
        "timeLim": 0,
        "sortBackwards": false,
        "addToCur": true,
        "curDeck": DEFAULT_DECK_ID,
        "newSpread": 0,
        "dueCounts": true,
        "curModel": MODEL_ID.to_string(),
        "collapseTime": 1200
    })
}
