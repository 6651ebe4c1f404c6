//! The model seams of the verification loop.

use async_trait::async_trait;
use hearth_core::error::ProviderError;
use hearth_core::message::Message;
use hearth_core::provider::ProviderRequest;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::streaming::StreamAdapter;

/// Produces the next batch of edits for a prompt.
#[async_trait]
pub trait ModelCall: Send + Sync {
    async fn call(&self, prompt: &str) -> Result<String, ProviderError>;
}

/// Explains a failure that keeps coming back.
#[async_trait]
pub trait Unblocker: Send + Sync {
    async fn diagnose(&self, signature: &str, error_tail: &str) -> Result<String, ProviderError>;
}

pub const EDIT_SYSTEM_PROMPT: &str = r#"You are a coding agent working inside a project directory. Your changes are applied, then the project's build and test commands run.

Reply with JSON only:
```json
{"edits": [{"path": "relative/path", "action": "create|modify|delete", "content": "full new file content"}]}
```

Rules:
1. Paths are relative to the project root.
2. "content" is the COMPLETE file after your change, never a diff.
3. Change only what the task or the reported error needs.
4. When a previous iteration failed, fix that failure first."#;

pub const UNBLOCKER_SYSTEM_PROMPT: &str = "You diagnose stalls: the same failure has occurred twice in a row despite attempted fixes.

Focus on the specific failure signature and the error output. Name the root cause in one or two sentences, then describe the smallest targeted change that fixes it. Do not propose broad refactoring.";

/// Both seams over a real provider, through the streaming adapter.
pub struct ProviderModel {
    adapter: StreamAdapter,
    model: String,
    temperature: f32,
    cancel: CancellationToken,
}

impl ProviderModel {
    pub fn new(adapter: StreamAdapter, model: impl Into<String>) -> Self {
        Self {
            adapter,
            model: model.into(),
            temperature: 0.2,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Abort in-flight model calls when `cancel` fires.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    async fn complete(&self, system: &str, user: String) -> Result<String, ProviderError> {
        let request = ProviderRequest::new(
            self.model.clone(),
            vec![Message::system(system), Message::user(user)],
        )
        .with_temperature(self.temperature);

        let envelope = self.adapter.run(request, &self.cancel, None).await;
        if let Some(error) = envelope.error {
            return Err(ProviderError::StreamInterrupted(error));
        }
        if envelope.interrupted {
            return Err(ProviderError::StreamInterrupted("cancelled".into()));
        }
        debug!(
            provider = self.adapter.provider_name(),
            chars = envelope.content.len(),
            "Verification model call complete"
        );
        Ok(envelope.content)
    }
}

#[async_trait]
impl ModelCall for ProviderModel {
    async fn call(&self, prompt: &str) -> Result<String, ProviderError> {
        self.complete(EDIT_SYSTEM_PROMPT, prompt.to_string()).await
    }
}

#[async_trait]
impl Unblocker for ProviderModel {
    async fn diagnose(&self, signature: &str, error_tail: &str) -> Result<String, ProviderError> {
        let user = format!("Failure signature: {signature}\n\nError output:\n{error_tail}");
        self.complete(UNBLOCKER_SYSTEM_PROMPT, user).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::streaming::RetryPolicy;
    use crate::test_helpers::{Script, ScriptedProvider};
    use hearth_core::message::Role;

    fn model(provider: &Arc<ScriptedProvider>) -> ProviderModel {
        ProviderModel::new(StreamAdapter::new(provider.clone(), RetryPolicy::none()), "test-model")
    }

    #[tokio::test]
    async fn call_sends_edit_prompt_without_tools() {
        let provider = Arc::new(ScriptedProvider::new(vec![Script::text(r#"{"edits": []}"#)]));
        let reply = model(&provider).call("add a docstring").await.unwrap();
        assert_eq!(reply, r#"{"edits": []}"#);

        let requests = provider.requests();
        let request = &requests[0];
        assert_eq!(request.model, "test-model");
        assert!(request.tools.is_empty());
        assert_eq!(request.messages[0].role, Role::System);
        assert_eq!(request.messages[0].content, EDIT_SYSTEM_PROMPT);
        assert_eq!(request.messages[1].content, "add a docstring");
    }

    #[tokio::test]
    async fn diagnose_includes_signature_and_tail() {
        let provider = Arc::new(ScriptedProvider::new(vec![Script::text("Missing import.")]));
        let diagnosis = model(&provider)
            .diagnose("ERROR:error: cannot find value", "error: cannot find value `x`")
            .await
            .unwrap();
        assert_eq!(diagnosis, "Missing import.");

        let requests = provider.requests();
        let user = &requests[0].messages[1].content;
        assert!(user.contains("Failure signature: ERROR:error: cannot find value"));
        assert!(user.contains("error: cannot find value `x`"));
    }

    #[tokio::test]
    async fn provider_failure_is_an_error() {
        let provider = Arc::new(ScriptedProvider::new(vec![Script::OpenError(
            ProviderError::AuthenticationFailed("bad key".into()),
        )]));
        let err = model(&provider).call("x").await.unwrap_err();
        assert!(err.to_string().contains("bad key"));
    }

    #[tokio::test]
    async fn cancelled_call_is_an_error() {
        let provider = Arc::new(ScriptedProvider::new(vec![Script::text("never")]));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = model(&provider).with_cancel(cancel).call("x").await.unwrap_err();
        assert!(matches!(err, ProviderError::StreamInterrupted(_)));
    }
}
