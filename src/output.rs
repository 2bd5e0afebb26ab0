//! Console report for a finished run.
//!
//! Logs go to stderr; this text is the only thing written to stdout.
use crate::record::Flashcard;
use crate::run::{RecordOutcome, RecordResult, RunResult};
use std::path::Path;

const RULE_WIDTH: usize = 50;

pub fn render_report(result: &RunResult, store_path: &Path) -> String {
    let mut out = String::new();
    for record in &result.records {
        render_record(&mut out, record);
    }

    let summary = result.summary();
    out.push_str(&format!(
        "Run summary: {} fetched, {} processed, {} failed, {} skipped, {} flashcards\n",
        summary.fetched, summary.processed, summary.failed, summary.skipped, summary.cards
    ));
    if summary.processed > 0 || has_mark_failures(result) {
        out.push_str(&format!("Flashcards stored in {}\n", store_path.display()));
    }
    if let Some(path) = &result.anki_file {
        out.push_str(&format!("Anki package: {}\n", path.display()));
    }
    out
}

fn render_record(out: &mut String, result: &RecordResult) {
    let rule = "=".repeat(RULE_WIDTH);
    let record = &result.record;
    push_line(out, &rule);
    push_line(out, &format!("{} ({})", record.label(), record.id));
    push_line(out, &format!("Disciplina: {}", record.discipline));
    if let Some(exam) = &record.exam {
        push_line(out, &format!("Concurso: {exam}"));
    }
    if let Some(created_at) = &record.created_at {
        push_line(out, &format!("Registrado em: {}", created_at.format("%Y-%m-%d")));
    }
    push_line(out, &rule);

    match &result.outcome {
        RecordOutcome::Processed { marked } => {
            render_cards(out, &result.cards);
            if !marked {
                push_line(out, "(not marked in Coda)");
            }
        }
        RecordOutcome::MarkFailed { reason } => {
            render_cards(out, &result.cards);
            push_line(out, &format!("Stored, but marking failed: {reason}"));
        }
        RecordOutcome::GenerationFailed { reason } => {
            push_line(out, &format!("Generation failed: {reason}"));
        }
        RecordOutcome::Skipped { reason } => {
            push_line(out, &format!("Skipped: {reason}"));
        }
    }
    out.push('\n');
}

fn render_cards(out: &mut String, cards: &[Flashcard]) {
    if let Some(summary) = cards
        .iter()
        .map(|card| card.summary.as_str())
        .find(|summary| !summary.is_empty())
    {
        push_line(out, "Resumo:");
        push_line(out, summary);
        out.push('\n');
    }
    push_line(out, &format!("Total de flashcards: {}", cards.len()));
    out.push('\n');
    for (idx, card) in cards.iter().enumerate() {
        let topic = if card.topic.is_empty() {
            String::new()
        } else {
            format!(" [{}]", card.topic)
        };
        push_line(out, &format!("{}.{topic} Pergunta: {}", idx + 1, card.question));
        push_line(out, &format!("   Resposta: {}", card.answer));
        out.push('\n');
    }
}

fn push_line(out: &mut String, line: &str) {
    out.push_str(line);
    out.push('\n');
}

fn has_mark_failures(result: &RunResult) -> bool {
    result
        .records
        .iter()
        .any(|record| matches!(record.outcome, RecordOutcome::MarkFailed { .. }))
}
