//! Coda table access: fetching study-error rows and flipping their
//! processed flag.
//!
//! Rows are read with `useColumnNames=true` and `valueFormat=simple`, so
//! cell values arrive keyed by column name as plain JSON scalars. Updates go
//! through the column id because that is what the row update API keys on.
use crate::config::CodaConfig;
use crate::error::FlashcardError;
use crate::http;
use crate::record::{ErrorRecord, RecordFilter};
use chrono::DateTime;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::{Duration, Instant};
use ureq::http::StatusCode;
use ureq::Agent;

const SERVICE: &str = "coda";
/// Largest page the row listing endpoint is asked for.
const PAGE_SIZE: usize = 25;

pub const COLUMN_DISCIPLINE: &str = "Disciplina";
pub const COLUMN_DESCRIPTION: &str = "Resolução";
pub const COLUMN_PROCESSED: &str = "Flashcard Criado";
pub const COLUMN_SUBJECT: &str = "Assunto";
pub const COLUMN_EXAM: &str = "Concurso";
pub const COLUMN_ERROR_TYPE: &str = "Tipo de Erro";
pub const COLUMN_CREATED_AT: &str = "Criado em";

/// Read/write access to the table of error records.
pub trait RecordSource {
    /// Records matching `filter`, in table order, at most `limit` of them.
    /// A lookup by id ignores `limit`.
    fn fetch(&self, filter: &RecordFilter, limit: usize)
        -> Result<Vec<ErrorRecord>, FlashcardError>;

    /// Set the processed flag of one record.
    fn mark_processed(&self, record_id: &str) -> Result<(), FlashcardError>;
}

#[derive(Debug, Deserialize)]
struct RowPage {
    #[serde(default)]
    items: Vec<Row>,
    #[serde(default, rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Row {
    #[serde(default)]
    id: String,
    #[serde(default)]
    values: Map<String, Value>,
}

pub struct CodaClient {
    agent: Agent,
    config: CodaConfig,
}

impl CodaClient {
    pub fn new(config: CodaConfig, timeout: Duration) -> Self {
        Self {
            agent: http::agent(timeout),
            config,
        }
    }

    fn rows_url(&self) -> String {
        rows_url(&self.config)
    }

    fn row_url(&self, record_id: &str) -> String {
        format!("{}/{}", self.rows_url(), urlencoding::encode(record_id))
    }

    /// Page through a row query until `limit` matching rows are collected.
    fn query_rows(
        &self,
        query: &str,
        filter: &RecordFilter,
        limit: usize,
    ) -> Result<Vec<ErrorRecord>, FlashcardError> {
        let url = self.rows_url();
        let auth = http::bearer(&self.config.api_key);
        let mut records = Vec::new();
        let mut page_token: Option<String> = None;
        let mut pages = 0usize;

        while records.len() < limit {
            let batch = (limit - records.len()).min(PAGE_SIZE);
            let mut request = self
                .agent
                .get(&url)
                .header("Authorization", &auth)
                .query("query", query)
                .query("limit", batch.to_string())
                .query("useColumnNames", "true")
                .query("valueFormat", "simple");
            if let Some(token) = &page_token {
                request = request.query("pageToken", token);
            }
            let response = request
                .call()
                .map_err(|err| http::transport_error(SERVICE, &err))?;
            let page: RowPage = http::read_json(SERVICE, response)?;
            pages += 1;

            let received = page.items.len();
            for row in page.items {
                let record = record_from_row(&row.id, &row.values);
                if filter.matches(&record) {
                    records.push(record);
                } else {
                    tracing::debug!(record_id = %record.id, "row dropped by client-side filter");
                }
            }
            match page.next_page_token {
                Some(token) if received > 0 => page_token = Some(token),
                _ => break,
            }
        }

        records.truncate(limit);
        tracing::debug!(pages, rows = records.len(), "coda row query complete");
        Ok(records)
    }

    fn get_row(&self, record_id: &str) -> Result<Option<ErrorRecord>, FlashcardError> {
        let response = self
            .agent
            .get(self.row_url(record_id))
            .header("Authorization", http::bearer(&self.config.api_key))
            .query("useColumnNames", "true")
            .query("valueFormat", "simple")
            .call()
            .map_err(|err| http::transport_error(SERVICE, &err))?;
        if response.status() == StatusCode::NOT_FOUND {
            // The row endpoint also answers 404 for an unknown doc or table.
            self.ensure_table_exists()?;
            tracing::warn!(record_id, "record not found");
            return Ok(None);
        }
        let row: Row = http::read_json(SERVICE, response)?;
        let id = if row.id.is_empty() { record_id } else { row.id.as_str() };
        Ok(Some(record_from_row(id, &row.values)))
    }

    fn ensure_table_exists(&self) -> Result<(), FlashcardError> {
        let response = self
            .agent
            .get(table_url(&self.config))
            .header("Authorization", http::bearer(&self.config.api_key))
            .call()
            .map_err(|err| http::transport_error(SERVICE, &err))?;
        http::ensure_success(SERVICE, response)?;
        Ok(())
    }
}

impl RecordSource for CodaClient {
    fn fetch(
        &self,
        filter: &RecordFilter,
        limit: usize,
    ) -> Result<Vec<ErrorRecord>, FlashcardError> {
        let start = Instant::now();
        let records: Vec<ErrorRecord> = match filter {
            RecordFilter::Id(id) => self.get_row(id)?.into_iter().collect(),
            _ if limit == 0 => return Ok(Vec::new()),
            RecordFilter::Pending => {
                self.query_rows(&row_query(COLUMN_PROCESSED, &json!(false)), filter, limit)?
            }
            RecordFilter::Discipline(name) => {
                self.query_rows(&row_query(COLUMN_DISCIPLINE, &json!(name)), filter, limit)?
            }
        };
        tracing::info!(
            filter = %filter,
            records = records.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "fetched error records"
        );
        Ok(records)
    }

    fn mark_processed(&self, record_id: &str) -> Result<(), FlashcardError> {
        let body = json!({
            "row": {
                "cells": [
                    { "column": self.config.processed_column, "value": true }
                ]
            }
        });
        let response = self
            .agent
            .put(self.row_url(record_id))
            .header("Authorization", http::bearer(&self.config.api_key))
            .send_json(&body)
            .map_err(|err| http::transport_error(SERVICE, &err))?;
        http::ensure_success(SERVICE, response)?;
        tracing::info!(record_id, "record marked as processed");
        Ok(())
    }
}

fn table_url(config: &CodaConfig) -> String {
    format!(
        "{}/docs/{}/tables/{}",
        config.api_url.trim_end_matches('/'),
        urlencoding::encode(&config.doc_id),
        urlencoding::encode(&config.table_id)
    )
}

fn rows_url(config: &CodaConfig) -> String {
    format!("{}/rows", table_url(config))
}

/// Row query in Coda's `<column>:<json value>` form, e.g. `"Disciplina":"X"`.
fn row_query(column: &str, value: &Value) -> String {
    format!("{}:{}", Value::String(column.to_string()), value)
}

/// Map a row's named cells onto an [`ErrorRecord`].
fn record_from_row(id: &str, values: &Map<String, Value>) -> ErrorRecord {
    let created_at = optional_text(values, COLUMN_CREATED_AT).and_then(|raw| {
        match DateTime::parse_from_rfc3339(&raw) {
            Ok(parsed) => Some(parsed),
            Err(err) => {
                tracing::warn!(record_id = id, value = %raw, %err, "ignoring invalid creation date");
                None
            }
        }
    });
    ErrorRecord {
        processed: flag(values, COLUMN_PROCESSED),
        subject: optional_text(values, COLUMN_SUBJECT),
        exam: optional_text(values, COLUMN_EXAM),
        error_type: optional_text(values, COLUMN_ERROR_TYPE),
        created_at,
        ..ErrorRecord::new(
            id,
            text(values, COLUMN_DISCIPLINE),
            text(values, COLUMN_DESCRIPTION),
        )
    }
}

fn text(values: &Map<String, Value>, column: &str) -> String {
    optional_text(values, column).unwrap_or_default()
}

fn optional_text(values: &Map<String, Value>, column: &str) -> Option<String> {
    let text = match values.get(column)? {
        Value::String(text) => text.trim().to_string(),
        Value::Number(number) => number.to_string(),
        Value::Bool(flag) => flag.to_string(),
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(", "),
        Value::Null | Value::Object(_) => return None,
    };
    Some(text).filter(|text| !text.is_empty())
}

fn flag(values: &Map<String, Value>, column: &str) -> bool {
    match values.get(column) {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::String(text)) => text.trim().eq_ignore_ascii_case("true"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn config() -> CodaConfig {
        CodaConfig {
            api_url: "https://coda.io/apis/v1/".to_string(),
            api_key: "key".to_string(),
            doc_id: "d-AbC".to_string(),
            table_id: "Erros de Estudo".to_string(),
            processed_column: "c-YGQq5IUq3f".to_string(),
        }
    }

    fn values(raw: Value) -> Map<String, Value> {
        match raw {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn row_query_quotes_column_and_value() {
        assert_eq!(
            row_query(COLUMN_PROCESSED, &json!(false)),
            "\"Flashcard Criado\":false"
        );
        assert_eq!(
            row_query(COLUMN_DISCIPLINE, &json!("AUDITORIA \"PRIVADA\"")),
            "\"Disciplina\":\"AUDITORIA \\\"PRIVADA\\\"\""
        );
    }

    #[test]
    fn rows_url_encodes_table_names() {
        assert_eq!(
            rows_url(&config()),
            "https://coda.io/apis/v1/docs/d-AbC/tables/Erros%20de%20Estudo/rows"
        );
    }

    #[test]
    fn record_from_row_maps_named_columns() {
        let row = values(json!({
            "Disciplina": "AUDITORIA PRIVADA",
            "Resolução": "  erro sobre prazo de recurso  ",
            "Flashcard Criado": false,
            "Assunto": "Recursos",
            "Concurso": "TCU",
            "Tipo de Erro": "",
            "Criado em": "2025-03-10T14:22:00.000-03:00"
        }));
        let record = record_from_row("i-abc123", &row);
        assert_eq!(record.id, "i-abc123");
        assert_eq!(record.discipline, "AUDITORIA PRIVADA");
        assert_eq!(record.description, "erro sobre prazo de recurso");
        assert!(!record.processed);
        assert_eq!(record.subject.as_deref(), Some("Recursos"));
        assert_eq!(record.exam.as_deref(), Some("TCU"));
        assert_eq!(record.error_type, None);
        let created_at = record.created_at.expect("creation date parsed");
        assert_eq!(created_at.to_rfc3339(), "2025-03-10T14:22:00-03:00");
    }

    #[test]
    fn record_from_row_tolerates_missing_and_odd_cells() {
        let row = values(json!({
            "Flashcard Criado": "TRUE",
            "Disciplina": ["CONTABILIDADE", "CUSTOS"],
            "Criado em": "ontem"
        }));
        let record = record_from_row("i-1", &row);
        assert!(record.processed);
        assert_eq!(record.discipline, "CONTABILIDADE, CUSTOS");
        assert_eq!(record.description, "");
        assert_eq!(record.created_at, None);
    }

    #[test]
    fn row_page_reads_items_and_token() {
        let page: RowPage = serde_json::from_value(json!({
            "items": [
                {"id": "i-1", "name": "x", "values": {"Disciplina": "A"}},
                {"id": "i-2", "values": {}}
            ],
            "nextPageToken": "tok"
        }))
        .unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].id, "i-1");
        assert_eq!(page.next_page_token.as_deref(), Some("tok"));

        let empty: RowPage = serde_json::from_value(json!({})).unwrap();
        assert!(empty.items.is_empty());
        assert!(empty.next_page_token.is_none());
    }

    const ROWS_PATH: &str = r"^/docs/d-AbC/tables/grid/rows(\?|$)";
    const ROW_PATH: &str = r"^/docs/d-AbC/tables/grid/rows/i-abc123(\?|$)";
    const TABLE_PATH: &str = r"^/docs/d-AbC/tables/grid(\?|$)";

    fn client_for(server: &mockito::Server) -> CodaClient {
        CodaClient::new(
            CodaConfig {
                api_url: server.url(),
                table_id: "grid".to_string(),
                ..config()
            },
            Duration::from_secs(5),
        )
    }

    fn row(id: &str, discipline: &str, processed: bool) -> Value {
        json!({
            "id": id,
            "values": {
                "Disciplina": discipline,
                "Resolução": "erro sobre prazo de recurso",
                "Flashcard Criado": processed
            }
        })
    }

    fn query_param(key: &str, value: &str) -> Matcher {
        Matcher::UrlEncoded(key.to_string(), value.to_string())
    }

    #[test]
    fn pending_query_follows_page_tokens_and_stops_at_limit() {
        let mut server = mockito::Server::new();
        let first = server
            .mock("GET", Matcher::Regex(ROWS_PATH.to_string()))
            .match_header("authorization", "Bearer key")
            .match_query(Matcher::AllOf(vec![
                query_param("query", "\"Flashcard Criado\":false"),
                query_param("limit", "3"),
                query_param("useColumnNames", "true"),
                query_param("valueFormat", "simple"),
            ]))
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "items": [row("i-1", "CONTABILIDADE", true), row("i-2", "CONTABILIDADE", false)],
                    "nextPageToken": "p2"
                })
                .to_string(),
            )
            .expect(1)
            .create();
        let second = server
            .mock("GET", Matcher::Regex(ROWS_PATH.to_string()))
            .match_query(Matcher::AllOf(vec![
                query_param("limit", "2"),
                query_param("pageToken", "p2"),
            ]))
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "items": [
                        row("i-3", "CONTABILIDADE", false),
                        row("i-4", "AUDITORIA", false),
                        row("i-5", "AUDITORIA", false)
                    ],
                    "nextPageToken": "p3"
                })
                .to_string(),
            )
            .expect(1)
            .create();

        let records = client_for(&server)
            .fetch(&RecordFilter::Pending, 3)
            .unwrap();

        let ids: Vec<&str> = records.iter().map(|record| record.id.as_str()).collect();
        assert_eq!(ids, ["i-2", "i-3", "i-4"]);
        first.assert();
        second.assert();
    }

    #[test]
    fn discipline_query_asks_for_at_most_a_page_and_keeps_exact_matches() {
        let mut server = mockito::Server::new();
        let page = server
            .mock("GET", Matcher::Regex(ROWS_PATH.to_string()))
            .match_query(Matcher::AllOf(vec![
                query_param("query", "\"Disciplina\":\"AUDITORIA PRIVADA\""),
                query_param("limit", "25"),
            ]))
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "items": [
                        row("i-1", "AUDITORIA PRIVADA", false),
                        row("i-2", "AUDITORIA", false),
                        row("i-3", "AUDITORIA PRIVADA", true)
                    ]
                })
                .to_string(),
            )
            .expect(1)
            .create();

        let records = client_for(&server)
            .fetch(&RecordFilter::Discipline("AUDITORIA PRIVADA".to_string()), 40)
            .unwrap();

        let ids: Vec<&str> = records.iter().map(|record| record.id.as_str()).collect();
        assert_eq!(ids, ["i-1", "i-3"]);
        page.assert();
    }

    #[test]
    fn id_lookup_ignores_the_limit() {
        let mut server = mockito::Server::new();
        let lookup = server
            .mock("GET", Matcher::Regex(ROW_PATH.to_string()))
            .match_header("authorization", "Bearer key")
            .with_header("content-type", "application/json")
            .with_body(row("i-abc123", "AUDITORIA PRIVADA", false).to_string())
            .expect(2)
            .create();
        let client = client_for(&server);
        let filter = RecordFilter::Id("i-abc123".to_string());

        for limit in [5, 0] {
            let records = client.fetch(&filter, limit).unwrap();
            assert_eq!(records.len(), 1, "limit {limit}");
            assert_eq!(records[0].discipline, "AUDITORIA PRIVADA");
        }
        lookup.assert();
    }

    #[test]
    fn missing_row_in_a_known_table_is_empty() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", Matcher::Regex(ROW_PATH.to_string()))
            .with_status(404)
            .with_body(r#"{"statusCode":404,"message":"Could not find a row with the specified ID"}"#)
            .create();
        let table = server
            .mock("GET", Matcher::Regex(TABLE_PATH.to_string()))
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"grid","type":"table","name":"Erros"}"#)
            .expect(1)
            .create();

        let records = client_for(&server)
            .fetch(&RecordFilter::Id("i-abc123".to_string()), 5)
            .unwrap();

        assert!(records.is_empty());
        table.assert();
    }

    #[test]
    fn id_lookup_in_an_unknown_doc_is_a_remote_error() {
        let mut server = mockito::Server::new();
        let not_found = r#"{"statusCode":404,"message":"Could not find a doc with the specified ID"}"#;
        server
            .mock("GET", Matcher::Regex(ROW_PATH.to_string()))
            .with_status(404)
            .with_body(not_found)
            .create();
        server
            .mock("GET", Matcher::Regex(TABLE_PATH.to_string()))
            .with_status(404)
            .with_body(not_found)
            .create();

        let err = client_for(&server)
            .fetch(&RecordFilter::Id("i-abc123".to_string()), 5)
            .unwrap_err();

        assert!(
            matches!(err, FlashcardError::RemoteApi { service: "coda", .. }),
            "{err}"
        );
        assert!(err.to_string().contains("HTTP 404"), "{err}");
        assert!(err.to_string().contains("Could not find a doc"), "{err}");
    }

    #[test]
    fn mark_processed_puts_the_checkbox_cell_by_column_id() {
        let mut server = mockito::Server::new();
        let update = server
            .mock("PUT", "/docs/d-AbC/tables/grid/rows/i-abc123")
            .match_header("authorization", "Bearer key")
            .match_body(Matcher::Json(json!({
                "row": {"cells": [{"column": "c-YGQq5IUq3f", "value": true}]}
            })))
            .with_status(202)
            .with_body(r#"{"requestId":"mutate:1","id":"i-abc123"}"#)
            .expect(1)
            .create();

        client_for(&server).mark_processed("i-abc123").unwrap();

        update.assert();
    }

    #[test]
    fn rejected_mark_is_a_remote_error() {
        let mut server = mockito::Server::new();
        server
            .mock("PUT", "/docs/d-AbC/tables/grid/rows/i-abc123")
            .with_status(401)
            .with_body(r#"{"statusCode":401,"message":"Unauthorized"}"#)
            .create();

        let err = client_for(&server).mark_processed("i-abc123").unwrap_err();

        assert!(err.to_string().contains("HTTP 401"), "{err}");
    }

    #[test]
    fn zero_limit_skips_the_network() {
        let client = CodaClient::new(
            CodaConfig {
                api_url: "http://127.0.0.1:9".to_string(),
                ..config()
            },
            Duration::from_secs(1),
        );
        let records = client.fetch(&RecordFilter::Pending, 0).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn unreachable_table_is_a_remote_error() {
        let client = CodaClient::new(
            CodaConfig {
                api_url: "http://127.0.0.1:9".to_string(),
                ..config()
            },
            Duration::from_secs(2),
        );
        let err = client.fetch(&RecordFilter::Pending, 5).unwrap_err();
        assert!(matches!(
            err,
            FlashcardError::RemoteApi { service: "coda", .. }
        ));
        let err = client.mark_processed("i-1").unwrap_err();
        assert!(matches!(err, FlashcardError::RemoteApi { .. }));
    }
}
