//! Sorting inference failures into "wait and try again" and "give up now".
//!
//! Structured signals are consulted first (our own parse errors, provider HTTP
//! status and status codes, transport timeouts). Anything left over is matched
//! on the text of its root cause, since providers do not reliably return typed
//! codes. Context we add on the way up (slide numbers and the like) is not
//! looked at.

use crate::llm::{ApiError, EmptyResponse};
use crate::script::MalformedResponse;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Transient, capacity related. Safe to retry after a wait.
    Retryable,
    /// Retrying the same request will not help.
    Fatal,
}

const RETRYABLE_CODES: &[&str] = &[
    "RESOURCE_EXHAUSTED",
    "UNAVAILABLE",
    "INTERNAL",
    "DEADLINE_EXCEEDED",
    "rate_limit_exceeded",
    "server_error",
];

pub fn classify(err: &anyhow::Error) -> ErrorKind {
    classify_typed(err).unwrap_or_else(|| classify_message(&err.root_cause().to_string()))
}

fn classify_typed(err: &anyhow::Error) -> Option<ErrorKind> {
    for cause in err.chain() {
        if cause.downcast_ref::<MalformedResponse>().is_some()
            || cause.downcast_ref::<EmptyResponse>().is_some()
        {
            return Some(ErrorKind::Fatal);
        }
        if let Some(api) = cause.downcast_ref::<ApiError>() {
            return classify_api(api);
        }
        if let Some(e) = cause.downcast_ref::<reqwest::Error>() {
            if e.is_timeout() || e.is_connect() {
                return Some(ErrorKind::Retryable);
            }
        }
    }
    None
}

fn classify_api(err: &ApiError) -> Option<ErrorKind> {
    let code_retryable = err
        .code
        .as_deref()
        .is_some_and(|c| RETRYABLE_CODES.contains(&c));

    if err.status == 429 || (500..=599).contains(&err.status) || code_retryable {
        Some(ErrorKind::Retryable)
    } else if err.status >= 400 {
        Some(ErrorKind::Fatal)
    } else {
        // error payload on a 2xx answer: only the text can tell
        None
    }
}

/// Heuristic for unstructured errors: `429`, "quota" in any case, or a 5xx status.
pub fn classify_message(message: &str) -> ErrorKind {
    if message.contains("429")
        || message.to_lowercase().contains("quota")
        || has_server_error_status(message)
    {
        ErrorKind::Retryable
    } else {
        ErrorKind::Fatal
    }
}

/// True when the text contains a standalone three digit number in 500..=599.
fn has_server_error_status(message: &str) -> bool {
    message
        .split(|c: char| !c.is_ascii_digit())
        .any(|token| token.len() == 3 && token.starts_with('5'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    fn api(status: u16, code: Option<&str>) -> anyhow::Error {
        ApiError {
            provider: "Gemini",
            status,
            code: code.map(str::to_string),
            message: "boom".to_string(),
        }
        .into()
    }

    #[test]
    fn test_rate_limit_and_quota_messages_are_retryable() {
        assert_eq!(classify_message("HTTP 429 Too Many Requests"), ErrorKind::Retryable);
        assert_eq!(classify_message("You exceeded your current QUOTA"), ErrorKind::Retryable);
        assert_eq!(classify_message("Quota exceeded for metric"), ErrorKind::Retryable);
    }

    #[test]
    fn test_server_errors_are_retryable() {
        assert_eq!(classify_message("503 Service Unavailable"), ErrorKind::Retryable);
        assert_eq!(classify_message("upstream returned (500)"), ErrorKind::Retryable);
        assert_eq!(classify_message("status=599"), ErrorKind::Retryable);
    }

    #[test]
    fn test_everything_else_is_fatal() {
        assert_eq!(classify_message("unsupported content type"), ErrorKind::Fatal);
        assert_eq!(classify_message("400 Bad Request"), ErrorKind::Fatal);
        assert_eq!(classify_message("API key not valid"), ErrorKind::Fatal);
        assert_eq!(classify_message("took 5000 ms"), ErrorKind::Fatal);
        assert_eq!(classify_message("slide 55"), ErrorKind::Fatal);
        assert_eq!(classify_message(""), ErrorKind::Fatal);
    }

    #[test]
    fn test_api_status_is_checked_before_message() {
        assert_eq!(classify(&api(429, None)), ErrorKind::Retryable);
        assert_eq!(classify(&api(502, None)), ErrorKind::Retryable);
        assert_eq!(classify(&api(400, Some("INVALID_ARGUMENT"))), ErrorKind::Fatal);
        assert_eq!(classify(&api(403, Some("PERMISSION_DENIED"))), ErrorKind::Fatal);
    }

    #[test]
    fn test_provider_code_marks_retryable() {
        assert_eq!(classify(&api(400, Some("RESOURCE_EXHAUSTED"))), ErrorKind::Retryable);
        assert_eq!(classify(&api(200, Some("UNAVAILABLE"))), ErrorKind::Retryable);
    }

    #[test]
    fn test_malformed_response_is_fatal_even_if_text_mentions_quota() {
        let err: anyhow::Error = MalformedResponse {
            index: 3,
            reason: "missing field `scripts`".to_string(),
            raw: "{\"visual_summary\": \"quota 429\"}".to_string(),
        }
        .into();
        assert_eq!(classify(&err), ErrorKind::Fatal);
    }

    #[test]
    fn test_context_wrapping_keeps_typed_cause() {
        let err = api(429, None).context("Generating slide 2");
        assert_eq!(classify(&err), ErrorKind::Retryable);
    }

    #[test]
    fn test_empty_response_is_fatal() {
        let err: anyhow::Error = EmptyResponse {
            provider: "Gemini",
            reason: "prompt blocked (SAFETY)".to_string(),
        }
        .into();
        assert_eq!(classify(&err.context("Generating analysis for slide 429")), ErrorKind::Fatal);
    }

    #[test]
    fn test_our_context_does_not_look_like_a_status() {
        let err = anyhow!("Gemini response empty. Finish reason: SAFETY")
            .context("Generating analysis for slide 503");
        assert_eq!(classify(&err), ErrorKind::Fatal);

        let err = anyhow!("image too large").context("Generating analysis for slide 429");
        assert_eq!(classify(&err), ErrorKind::Fatal);

        let err = anyhow!("Service Unavailable (503)").context("Generating analysis for slide 7");
        assert_eq!(classify(&err), ErrorKind::Retryable);
    }

    #[test]
    fn test_plain_errors_fall_back_to_text() {
        assert_eq!(classify(&anyhow!("Gemini API error: 429")), ErrorKind::Retryable);
        assert_eq!(classify(&anyhow!("image too large")), ErrorKind::Fatal);
    }
}
