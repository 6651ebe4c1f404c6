//! HTTP plumbing shared by the backends: error classification, status
//! checks and byte-to-line framing for NDJSON and SSE bodies.

use std::error::Error as _;

use hearth_core::ProviderError;
use tracing::warn;

/// Map a `reqwest` send error onto the provider taxonomy.
///
/// Timeouts and refused/reset connections are kept distinct because they
/// are the only errors the streaming adapter retries.
pub(crate) fn classify_send_error(err: reqwest::Error, base_url: &str) -> ProviderError {
    if err.is_timeout() {
        return ProviderError::Timeout(format!("{base_url}: {err}"));
    }

    if let Some(kind) = io_error_kind(&err) {
        match kind {
            std::io::ErrorKind::ConnectionRefused => {
                return ProviderError::ConnectionRefused(format!(
                    "{base_url}: is the model server running?"
                ));
            }
            std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::ConnectionAborted => {
                return ProviderError::ConnectionReset(format!("{base_url}: {err}"));
            }
            std::io::ErrorKind::TimedOut => {
                return ProviderError::Timeout(format!("{base_url}: {err}"));
            }
            _ => {}
        }
    }

    if err.is_connect() {
        return ProviderError::ConnectionRefused(format!("{base_url}: {err}"));
    }

    ProviderError::Network(err.to_string())
}

fn io_error_kind(err: &reqwest::Error) -> Option<std::io::ErrorKind> {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            return Some(io.kind());
        }
        source = cause.source();
    }
    None
}

/// Turn a non-success HTTP status into a provider error.
pub(crate) async fn check_status(
    response: reqwest::Response,
    provider: &str,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status().as_u16();

    if status == 429 {
        return Err(ProviderError::RateLimited {
            retry_after_secs: 5,
        });
    }

    if status == 401 || status == 403 {
        return Err(ProviderError::AuthenticationFailed(
            "Invalid API key or insufficient permissions".into(),
        ));
    }

    if !(200..300).contains(&status) {
        let error_body = response.text().await.unwrap_or_default();
        warn!(provider, status, body = %error_body, "Provider returned error");
        if status == 404 {
            return Err(ProviderError::ModelNotFound(error_body));
        }
        return Err(ProviderError::ApiError {
            status_code: status,
            message: error_body,
        });
    }

    Ok(response)
}

/// Splits an arbitrary byte stream into complete `\n`-terminated lines.
///
/// Bytes are buffered raw so a multi-byte UTF-8 character split across two
/// network reads is decoded intact.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes and drain every complete, non-blank line.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim();
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }
        lines
    }

    /// Whatever is left once the body ends without a trailing newline.
    pub fn finish(&mut self) -> Option<String> {
        let raw = std::mem::take(&mut self.pending);
        let line = String::from_utf8_lossy(&raw).trim().to_string();
        (!line.is_empty()).then_some(line)
    }
}
