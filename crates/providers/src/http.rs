//! Shared HTTP plumbing for the model clients.

use std::time::Duration;

use browserclaw_core::error::{DecisionError, GenerationError};
use tracing::warn;

/// Used when a 429 carries no usable `Retry-After`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

/// Client with a transport-level ceiling; the agent loop applies the real
/// per-call budget on top.
pub(crate) fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(300))
        .build()
        .unwrap_or_else(|e| {
            warn!(error = %e, "Falling back to default HTTP client");
            reqwest::Client::new()
        })
}

fn retry_after(response: &reqwest::Response) -> u64 {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
}

/// Map a non-success response from a decision endpoint.
pub(crate) async fn decision_error(provider: &str, response: reqwest::Response) -> DecisionError {
    let status = response.status().as_u16();
    match status {
        429 => DecisionError::RateLimited {
            retry_after_secs: retry_after(&response),
        },
        401 | 403 => DecisionError::AuthenticationFailed(format!(
            "{provider} rejected the API key (status {status})"
        )),
        _ => {
            let body = response.text().await.unwrap_or_default();
            warn!(provider, status, body = %body, "Decision request failed");
            DecisionError::ApiError {
                status_code: status,
                message: body,
            }
        }
    }
}

/// Map a non-success response from an image endpoint.
pub(crate) async fn generation_error(provider: &str, response: reqwest::Response) -> GenerationError {
    let status = response.status().as_u16();
    match status {
        401 | 403 => GenerationError::AuthenticationFailed(format!(
            "{provider} rejected the API key (status {status})"
        )),
        _ => {
            let body = response.text().await.unwrap_or_default();
            warn!(provider, status, body = %body, "Image request failed");
            GenerationError::ApiError {
                status_code: status,
                message: body,
            }
        }
    }
}

pub(crate) fn network_decision_error(e: reqwest::Error) -> DecisionError {
    DecisionError::Network(e.to_string())
}

pub(crate) fn network_generation_error(e: reqwest::Error) -> GenerationError {
    GenerationError::Network(e.to_string())
}
