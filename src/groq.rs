//! Groq chat-completions client.
//!
//! Groq exposes the OpenAI-compatible `/chat/completions` endpoint; requests
//! ask for a JSON object response so the generator can parse the text
//! directly.
use crate::config::GroqConfig;
use crate::error::FlashcardError;
use crate::http;
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::{Duration, Instant};
use ureq::Agent;

const SERVICE: &str = "groq";
const TEMPERATURE: f32 = 0.2;
const MAX_TOKENS: u32 = 4000;

/// One prompt for a completion model.
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    pub model: &'a str,
    pub system: &'a str,
    pub user: &'a str,
}

/// A text-completion backend.
pub trait CompletionModel {
    /// Return the raw text of the model's answer.
    fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, FlashcardError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct GroqClient {
    agent: Agent,
    config: GroqConfig,
}

impl GroqClient {
    pub fn new(config: GroqConfig, timeout: Duration) -> Self {
        Self {
            agent: http::agent(timeout),
            config,
        }
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.api_url.trim_end_matches('/')
        )
    }
}

impl CompletionModel for GroqClient {
    fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, FlashcardError> {
        if !self.config.request_delay.is_zero() {
            thread::sleep(self.config.request_delay);
        }
        let body = chat_request(request);
        let start = Instant::now();
        let response = self
            .agent
            .post(self.completions_url())
            .header("Authorization", http::bearer(&self.config.api_key))
            .send_json(&body)
            .map_err(|err| http::transport_error(SERVICE, &err))?;
        let parsed: ChatResponse = http::read_json(SERVICE, response)?;
        let content = first_content(parsed)?;

        tracing::info!(
            model = request.model,
            elapsed_ms = start.elapsed().as_millis() as u64,
            prompt_bytes = request.system.len() + request.user.len(),
            response_bytes = content.len(),
            "groq completion complete"
        );
        Ok(content)
    }
}

fn chat_request<'a>(request: &CompletionRequest<'a>) -> ChatRequest<'a> {
    ChatRequest {
        model: request.model,
        messages: [
            ChatMessage {
                role: "system",
                content: request.system,
            },
            ChatMessage {
                role: "user",
                content: request.user,
            },
        ],
        temperature: TEMPERATURE,
        max_tokens: MAX_TOKENS,
        stream: false,
        response_format: ResponseFormat {
            kind: "json_object",
        },
    }
}

fn first_content(response: ChatResponse) -> Result<String, FlashcardError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or_else(|| FlashcardError::Generation("empty completion from groq".to_string()))
}
