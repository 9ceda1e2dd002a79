//! Pulls machine-readable JSON out of free-form model output.
//!
//! Accepted wrappers, in order of precedence:
//! 1. a ```` ```json ```` fence: the text between the first such marker and the
//!    next closing fence (or the end of input when the fence is never closed);
//! 2. a generic ```` ``` ```` fence: the text between the first two markers;
//! 3. otherwise the whole response.
//!
//! Whatever is selected must then parse strictly. Any other shape, including a
//! fence tagged with a different language, is a [`MalformedOutputError`].

use serde::de::DeserializeOwned;
use thiserror::Error;

const LANGUAGE_FENCE: &str = "```json";
const FENCE: &str = "```";

#[derive(Debug, Error)]
#[error("model output is not valid structured data: {source}")]
pub struct MalformedOutputError {
    /// Full response as returned by the provider.
    pub raw: String,
    #[source]
    pub source: serde_json::Error,
}

pub fn fenced_payload(raw: &str) -> &str {
    let text = raw.trim();

    let body = if let Some((_, rest)) = text.split_once(LANGUAGE_FENCE) {
        until_fence(rest)
    } else if let Some((_, rest)) = text.split_once(FENCE) {
        until_fence(rest)
    } else {
        text
    };

    body.trim()
}

fn until_fence(rest: &str) -> &str {
    rest.split_once(FENCE).map(|(body, _)| body).unwrap_or(rest)
}

pub fn extract_structured<T>(raw: &str) -> Result<T, MalformedOutputError>
where
    T: DeserializeOwned,
{
    serde_json::from_str(fenced_payload(raw))
        .map_err(|source| MalformedOutputError { raw: raw.to_string(), source })
}
