//! Ollama native chat provider.
//!
//! Talks to `POST {base_url}/api/chat` with `"stream": true`. The body is
//! newline-delimited JSON, one object per line:
//!
//! ```text
//! {"message":{"role":"assistant","content":"Hel"},"done":false}
//! {"message":{"role":"assistant","content":"","tool_calls":[{"function":{"name":"fs.read","arguments":{"path":"a.rs"}}}]},"done":false}
//! {"message":{"role":"assistant","content":""},"done":true,"prompt_eval_count":12,"eval_count":40}
//! ```
//!
//! Tool calls are forwarded as raw deltas; Ollama usually sends arguments as
//! a finished object, which is re-serialized to a JSON string fragment so the
//! agent's accumulator treats both backends alike.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use hearth_core::error::ProviderError;
use hearth_core::message::{Message, Role};
use hearth_core::provider::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::http::{LineBuffer, check_status, classify_send_error};

pub struct OllamaProvider {
    base_url: String,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: match m.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::System => "system",
                    Role::Tool => "tool",
                }
                .into(),
                content: m.content.clone(),
                tool_calls: m
                    .tool_calls
                    .iter()
                    .map(|tc| ApiToolCall {
                        function: ApiFunction {
                            name: tc.name.clone(),
                            arguments: serde_json::from_str(&tc.arguments)
                                .unwrap_or_else(|_| serde_json::json!({})),
                        },
                    })
                    .collect(),
            })
            .collect()
    }

    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<serde_json::Value> {
        tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect()
    }

    fn request_body(request: &ProviderRequest) -> serde_json::Value {
        let mut options = serde_json::json!({ "temperature": request.temperature });
        if let Some(max_tokens) = request.max_tokens {
            options["num_predict"] = serde_json::json!(max_tokens);
        }
        if !request.stop.is_empty() {
            options["stop"] = serde_json::json!(request.stop);
        }

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "stream": true,
            "options": options,
        });
        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }
        body
    }
}

/// Parse one NDJSON line into a stream chunk.
///
/// Returns `None` for lines that are not valid JSON; Ollama occasionally
/// interleaves keep-alive noise and those lines are skipped.
pub(crate) fn parse_line(line: &str) -> Option<Result<StreamChunk, ProviderError>> {
    let parsed: StreamLine = match serde_json::from_str(line) {
        Ok(parsed) => parsed,
        Err(e) => {
            trace!(line, error = %e, "Ignoring unparseable NDJSON line");
            return None;
        }
    };

    if let Some(error) = parsed.error {
        return Some(Err(ProviderError::ApiError {
            status_code: 200,
            message: error,
        }));
    }

    let mut chunk = StreamChunk {
        done: parsed.done,
        ..StreamChunk::default()
    };

    if let Some(message) = parsed.message {
        chunk.content = message.content.filter(|c| !c.is_empty());
        chunk.tool_calls = message
            .tool_calls
            .into_iter()
            .enumerate()
            .map(|(position, tc)| ToolCallDelta {
                index: tc.index.unwrap_or(position as u32),
                id: tc.id.filter(|id| !id.is_empty()),
                name: tc.function.name,
                arguments: tc.function.arguments.map(|args| match args {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                }),
            })
            .collect();
    }

    if parsed.done {
        chunk.usage = Some(Usage {
            prompt_tokens: parsed.prompt_eval_count,
            completion_tokens: parsed.eval_count,
            total_tokens: parsed.prompt_eval_count + parsed.eval_count,
        });
    }

    Some(Ok(chunk))
}

#[async_trait]
impl Provider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkStream, ProviderError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = Self::request_body(&request);

        debug!(provider = "ollama", model = %request.model, messages = request.messages.len(), "Sending streaming request");

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_send_error(e, &self.base_url))?;
        let response = check_status(response, "ollama").await?;

        let (tx, rx) = tokio::sync::mpsc::channel(64);

        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut lines = LineBuffer::new();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                for line in lines.push(&bytes) {
                    let Some(item) = parse_line(&line) else {
                        continue;
                    };
                    let finished = matches!(&item, Ok(c) if c.done) || item.is_err();
                    if tx.send(item).await.is_err() {
                        return; // receiver dropped
                    }
                    if finished {
                        return;
                    }
                }
            }

            if let Some(item) = lines.finish().as_deref().and_then(parse_line) {
                let finished = matches!(&item, Ok(c) if c.done) || item.is_err();
                let _ = tx.send(item).await;
                if finished {
                    return;
                }
            }

            // Body ended without a done line
            let _ = tx.send(Ok(StreamChunk::done())).await;
        });

        Ok(rx)
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| classify_send_error(e, &self.base_url))?;
        let response = check_status(response, "ollama").await?;

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| classify_send_error(e, &self.base_url))?;
        Ok(response.status().is_success())
    }
}

// --- Ollama API types (internal) ---

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<ApiToolCall>,
}

#[derive(Debug, Serialize)]
struct ApiToolCall {
    function: ApiFunction,
}

#[derive(Debug, Serialize)]
struct ApiFunction {
    name: String,
    arguments: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct StreamLine {
    #[serde(default)]
    message: Option<StreamMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    prompt_eval_count: u32,
    #[serde(default)]
    eval_count: u32,
}

#[derive(Debug, Deserialize)]
struct StreamMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<StreamToolCall>,
}

#[derive(Debug, Deserialize)]
struct StreamToolCall {
    #[serde(default)]
    index: Option<u32>,
    #[serde(default)]
    id: Option<String>,
    function: StreamFunction,
}

#[derive(Debug, Deserialize)]
struct StreamFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Debug, Deserialize)]
struct TagModel {
    name: String,
}
