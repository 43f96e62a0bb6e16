use crate::error::PilotError;
use crate::types::mistral::{ChatCompletionRequest, CompletionResponse, FimCompletionRequest};
use backon::{ExponentialBuilder, Retryable};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

const CHAT_PATH: &str = "v1/chat/completions";
const FIM_PATH: &str = "v1/fim/completions";
const ERROR_SNIPPET_LEN: usize = 512;

pub fn default_retry_policy() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_secs(1))
        .with_max_delay(Duration::from_secs(3))
        .with_max_times(3)
        .with_jitter()
}

/// Stateless Mistral endpoints. The API key travels with each call.
#[derive(Clone)]
pub struct MistralApi {
    client: reqwest::Client,
    base_url: Url,
    retry_policy: ExponentialBuilder,
}

impl MistralApi {
    pub fn new(client: reqwest::Client, base_url: Url) -> Self {
        Self {
            client,
            base_url,
            retry_policy: default_retry_policy(),
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: ExponentialBuilder) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub async fn chat_completion(
        &self,
        api_key: &str,
        request: &ChatCompletionRequest<'_>,
    ) -> Result<CompletionResponse, PilotError> {
        self.post(CHAT_PATH, api_key, request).await
    }

    pub async fn fim_completion(
        &self,
        api_key: &str,
        request: &FimCompletionRequest<'_>,
    ) -> Result<CompletionResponse, PilotError> {
        self.post(FIM_PATH, api_key, request).await
    }

    async fn post<T>(
        &self,
        path: &str,
        api_key: &str,
        body: &T,
    ) -> Result<CompletionResponse, PilotError>
    where
        T: Serialize,
    {
        let url = self.base_url.join(path)?;

        let attempt = (|| async {
            let resp = self
                .client
                .post(url.clone())
                .bearer_auth(api_key)
                .json(body)
                .send()
                .await
                .map_err(Attempt::Transport)?;
            if resp.status().is_server_error() {
                warn!(status = %resp.status(), "model service server error (will retry)");
                return Err(Attempt::ServerError(resp));
            }
            Ok(resp)
        })
        .retry(self.retry_policy)
        .when(Attempt::is_retryable)
        .notify(|err, dur: Duration| {
            warn!(error = %err, "retrying model request after {:?}", dur);
        })
        .await;

        // An exhausted 5xx keeps its response so the provider's message survives.
        let resp = match attempt {
            Ok(resp) | Err(Attempt::ServerError(resp)) => resp,
            Err(Attempt::Transport(e)) => return Err(e.into()),
        };

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(PilotError::ModelStatus {
                status,
                message: error_message(&text),
            });
        }

        let bytes = resp.bytes().await?;
        debug!(path, bytes = bytes.len(), "model response received");
        serde_json::from_slice(&bytes).map_err(|e| PilotError::MalformedOutput(e.to_string()))
    }
}

/// Outcome of one failed send.
enum Attempt {
    Transport(reqwest::Error),
    ServerError(reqwest::Response),
}

impl Attempt {
    fn is_retryable(&self) -> bool {
        match self {
            Attempt::Transport(e) => e.is_connect() || e.is_timeout(),
            Attempt::ServerError(_) => true,
        }
    }
}

impl std::fmt::Display for Attempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Attempt::Transport(e) => write!(f, "{e}"),
            Attempt::ServerError(resp) => write!(f, "server returned {}", resp.status()),
        }
    }
}

/// Best-effort message from a provider error body.
fn error_message(body: &str) -> String {
    let from_json = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| match v.get("message") {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
            None => None,
        });
    let mut msg = from_json.unwrap_or_else(|| body.trim().to_string());
    if msg.len() > ERROR_SNIPPET_LEN {
        let mut cut = ERROR_SNIPPET_LEN;
        while !msg.is_char_boundary(cut) {
            cut -= 1;
        }
        msg.truncate(cut);
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::mistral::ResponseFormat;
    use axum::{Json, Router, http::StatusCode as AxumStatus, routing::post};
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn exhausted_server_errors_keep_provider_message() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let overloaded = Router::new().route(
            "/v1/chat/completions",
            post(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    (
                        AxumStatus::SERVICE_UNAVAILABLE,
                        Json(json!({ "object": "error", "message": "Service overloaded" })),
                    )
                }
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, overloaded).await.unwrap();
        });

        let api = MistralApi::new(
            reqwest::Client::new(),
            Url::parse(&format!("http://{addr}/")).unwrap(),
        )
        .with_retry_policy(
            ExponentialBuilder::default()
                .with_min_delay(Duration::from_millis(1))
                .with_max_delay(Duration::from_millis(2))
                .with_max_times(2),
        );
        let request = ChatCompletionRequest {
            model: "codestral-2508",
            messages: vec![],
            response_format: Some(ResponseFormat::JSON_OBJECT),
            temperature: None,
        };

        let err = api.chat_completion("sk-test", &request).await.unwrap_err();
        match err {
            PilotError::ModelStatus { status, message } => {
                assert_eq!(status.as_u16(), 503);
                assert_eq!(message, "Service overloaded");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn error_message_prefers_json_message() {
        assert_eq!(
            error_message(r#"{"object":"error","message":"Unauthorized","type":"auth"}"#),
            "Unauthorized"
        );
        assert_eq!(error_message("  upstream exploded \n"), "upstream exploded");
    }

    #[test]
    fn error_message_is_bounded() {
        let long = "é".repeat(ERROR_SNIPPET_LEN);
        assert!(error_message(&long).len() <= ERROR_SNIPPET_LEN);
    }
}
