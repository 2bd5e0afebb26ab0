//! Blocking HTTP helpers shared by the Coda and Groq clients.
use crate::error::FlashcardError;
use crate::util::truncate_string;
use serde::de::DeserializeOwned;
use std::time::Duration;
use ureq::http::Response;
use ureq::{Agent, Body};

/// Response bodies quoted in error messages are cut to this many bytes.
const ERROR_BODY_LIMIT: usize = 500;

/// Build an agent that reports non-2xx statuses as responses, not errors.
pub fn agent(timeout: Duration) -> Agent {
    Agent::config_builder()
        .timeout_global(Some(timeout))
        .http_status_as_error(false)
        .build()
        .into()
}

pub fn bearer(api_key: &str) -> String {
    format!("Bearer {api_key}")
}

/// Map a transport-level failure (DNS, refused connection, timeout).
pub fn transport_error(service: &'static str, err: &ureq::Error) -> FlashcardError {
    FlashcardError::remote(service, format!("request failed: {err}"))
}

/// Fail on any non-2xx status, quoting the start of the body.
pub fn ensure_success(
    service: &'static str,
    mut response: Response<Body>,
) -> Result<Response<Body>, FlashcardError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.body_mut().read_to_string().unwrap_or_default();
    Err(FlashcardError::remote(
        service,
        format!(
            "HTTP {}: {}",
            status.as_u16(),
            truncate_string(body.trim(), ERROR_BODY_LIMIT)
        ),
    ))
}

/// Check the status and decode a JSON body.
pub fn read_json<T: DeserializeOwned>(
    service: &'static str,
    response: Response<Body>,
) -> Result<T, FlashcardError> {
    let mut response = ensure_success(service, response)?;
    response
        .body_mut()
        .read_json::<T>()
        .map_err(|err| FlashcardError::remote(service, format!("decode response: {err}")))
}
