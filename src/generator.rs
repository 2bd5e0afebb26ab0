//! Flashcard generation for a single error record.
//!
//! The prompt embeds the record's discipline and description; the answer is
//! parsed leniently. Entries without a question or answer are dropped, the
//! rest are kept up to the requested count, and nothing is ever invented to
//! fill a short answer.
use crate::error::FlashcardError;
use crate::groq::{CompletionModel, CompletionRequest};
use crate::record::{ErrorRecord, Flashcard};
use crate::util::{embedded_json_values, strip_code_fences, truncate_string};
use serde_json::{Map, Value};

const SYSTEM_PROMPT: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/prompts/flashcards_system.md"
));

/// Descriptions shorter than this carry too little to generate from.
pub const MIN_DESCRIPTION_CHARS: usize = 20;

/// Whether a record's description is too short to send to the model.
pub fn description_too_short(record: &ErrorRecord) -> bool {
    record.description.trim().chars().count() < MIN_DESCRIPTION_CHARS
}

/// Generate up to `count` flashcards for one record.
pub fn generate_flashcards<M>(
    model: &M,
    record: &ErrorRecord,
    count: usize,
    model_name: &str,
) -> Result<Vec<Flashcard>, FlashcardError>
where
    M: CompletionModel + ?Sized,
{
    let system = build_system_prompt(count);
    let user = build_user_prompt(record);
    let request = CompletionRequest {
        model: model_name,
        system: &system,
        user: &user,
    };
    tracing::debug!(record_id = %record.id, model = model_name, count, "requesting flashcards");
    let text = model.complete(&request).map_err(|err| match err {
        FlashcardError::Generation(_) => err,
        other => FlashcardError::Generation(format!("completion request failed: {other}")),
    })?;
    tracing::debug!(record_id = %record.id, response = %truncate_string(&text, 2000), "model response");

    let cards = parse_flashcards(&text, record, count)?;
    if cards.len() < count {
        tracing::warn!(
            record_id = %record.id,
            requested = count,
            received = cards.len(),
            "model returned fewer flashcards than requested"
        );
    }
    Ok(cards)
}

pub fn build_system_prompt(count: usize) -> String {
    SYSTEM_PROMPT.replace("{count}", &count.to_string())
}

pub fn build_user_prompt(record: &ErrorRecord) -> String {
    let mut prompt = format!("Disciplina: {}\n", record.discipline);
    if let Some(subject) = &record.subject {
        prompt.push_str(&format!("Assunto: {subject}\n"));
    }
    if let Some(error_type) = &record.error_type {
        prompt.push_str(&format!("Tipo de erro: {error_type}\n"));
    }
    prompt.push_str("\nDescrição do erro e resolução:\n");
    prompt.push_str(record.description.trim());
    prompt.push('\n');
    prompt
}

/// Parse a model answer into at most `count` flashcards.
///
/// Accepts `{"flashcards": [...], "summary": "..."}`, a bare array, fenced
/// JSON, or JSON preceded by prose.
pub fn parse_flashcards(
    text: &str,
    record: &ErrorRecord,
    count: usize,
) -> Result<Vec<Flashcard>, FlashcardError> {
    let value = parse_response_value(text)?;
    let (entries, summary) = response_parts(&value);

    let fallback_topic = record.subject.as_deref().unwrap_or(&record.discipline);
    let mut cards = Vec::new();
    let mut dropped = 0usize;
    for entry in entries {
        match card_from_entry(entry, fallback_topic, summary) {
            Some(card) => cards.push(card),
            None => dropped += 1,
        }
    }
    if dropped > 0 {
        tracing::warn!(record_id = %record.id, dropped, "dropped malformed flashcard entries");
    }
    if cards.is_empty() {
        return Err(FlashcardError::Generation(format!(
            "no usable flashcards in response ({} entries, {dropped} malformed)",
            entries.len()
        )));
    }
    cards.truncate(count);
    Ok(cards)
}

fn parse_response_value(text: &str) -> Result<Value, FlashcardError> {
    let cleaned = strip_code_fences(text);
    if cleaned.is_empty() {
        return Err(FlashcardError::Generation("empty response".to_string()));
    }
    let err = match serde_json::from_str::<Value>(&cleaned) {
        Ok(value) => return Ok(value),
        Err(err) => err,
    };
    // Prose may carry stray brackets ("nota [1]") before the real answer.
    let mut first = None;
    for value in embedded_json_values(&cleaned) {
        if has_usable_card(&value) {
            return Ok(value);
        }
        first.get_or_insert(value);
    }
    first.ok_or_else(|| {
        FlashcardError::Generation(format!(
            "response is not JSON ({err}): {}",
            truncate_string(&cleaned, 200)
        ))
    })
}

/// Card entries and the response-level summary of a parsed answer.
fn response_parts(value: &Value) -> (&[Value], Option<&str>) {
    match value {
        Value::Array(items) => (items.as_slice(), None),
        Value::Object(map) => (card_entries(map), non_empty_str(map.get("summary"))),
        _ => (&[], None),
    }
}

fn has_usable_card(value: &Value) -> bool {
    let (entries, _) = response_parts(value);
    entries
        .iter()
        .any(|entry| card_from_entry(entry, "", None).is_some())
}

fn card_entries(map: &Map<String, Value>) -> &[Value] {
    ["flashcards", "cards"]
        .iter()
        .find_map(|key| map.get(*key).and_then(Value::as_array))
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn card_from_entry(entry: &Value, fallback_topic: &str, summary: Option<&str>) -> Option<Flashcard> {
    let map = entry.as_object()?;
    let question = non_empty_str(map.get("question"))?;
    let answer = non_empty_str(map.get("answer"))?;
    let topic = non_empty_str(map.get("topic")).unwrap_or(fallback_topic);
    let summary = non_empty_str(map.get("summary")).or(summary).unwrap_or("");
    Some(Flashcard {
        question: question.to_string(),
        answer: answer.to_string(),
        topic: topic.to_string(),
        summary: summary.to_string(),
    })
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
}
