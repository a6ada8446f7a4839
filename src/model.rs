//! Language-model backends.
//!
//! A [`Model`] takes a system prompt plus one user instruction and returns the
//! raw text the model produced. The backend is an OpenAI-compatible chat
//! completions endpoint ([`HttpModel`]).

use std::time::Duration;

use futures::StreamExt;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// What is sent to the model for one generation.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    /// Standing instructions (output format, tone).
    pub system: String,
    /// The augmented instruction, sent as the only user turn.
    pub instruction: String,
}

/// Something that turns an instruction into text.
///
/// `Ok(None)` means the model answered without any content.
#[allow(async_fn_in_trait)]
pub trait Model {
    async fn generate(&self, request: &ModelRequest) -> Result<Option<String>, ModelError>;

    /// Generate while forwarding output to `on_chunk` as it arrives.
    ///
    /// Returns the complete output. Backends without incremental output emit
    /// everything as a single chunk.
    async fn generate_streaming<F>(
        &self,
        request: &ModelRequest,
        on_chunk: &mut F,
    ) -> Result<Option<String>, ModelError>
    where
        F: FnMut(&str),
    {
        let output = self.generate(request).await?;
        if let Some(text) = &output {
            on_chunk(text);
        }
        Ok(output)
    }
}

impl<M: Model> Model for &M {
    async fn generate(&self, request: &ModelRequest) -> Result<Option<String>, ModelError> {
        (**self).generate(request).await
    }

    async fn generate_streaming<F>(
        &self,
        request: &ModelRequest,
        on_chunk: &mut F,
    ) -> Result<Option<String>, ModelError>
    where
        F: FnMut(&str),
    {
        (**self).generate_streaming(request, on_chunk).await
    }
}

/// Errors from model backends.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("http error: {0}")]
    Http(String),

    #[error("response error: {0}")]
    Response(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

// =============================================================================
// OpenAI-compatible HTTP backend
// =============================================================================

/// Settings for [`HttpModel`].
#[derive(Debug, Clone)]
pub struct HttpModelConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Default for HttpModelConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            timeout_secs: 120,
        }
    }
}

/// Model reached over an OpenAI-compatible chat completions API.
pub struct HttpModel {
    client: reqwest::Client,
    config: HttpModelConfig,
}

impl HttpModel {
    pub fn new(config: HttpModelConfig) -> Result<Self, ModelError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ModelError::Http(e.to_string()))?;
        Ok(Self { client, config })
    }

    pub fn model_name(&self) -> &str {
        &self.config.model
    }

    fn headers(&self) -> Result<HeaderMap, ModelError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = &self.config.api_key {
            let value = format!("Bearer {}", key);
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&value).map_err(|e| ModelError::Http(e.to_string()))?,
            );
        }
        Ok(headers)
    }

    fn body(&self, request: &ModelRequest, stream: bool) -> ChatRequest {
        ChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: request.system.clone(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: request.instruction.clone(),
                },
            ],
            temperature: self.config.temperature,
            stream,
        }
    }

    async fn send(
        &self,
        request: &ModelRequest,
        stream: bool,
    ) -> Result<reqwest::Response, ModelError> {
        let response = self
            .client
            .post(&self.config.endpoint)
            .headers(self.headers()?)
            .json(&self.body(request, stream))
            .send()
            .await
            .map_err(|e| ModelError::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ModelError::Response(format!("HTTP {}: {}", status, text)));
        }
        Ok(response)
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Debug, Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    choices: Vec<ChatChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChunkChoice {
    #[serde(default)]
    delta: ChatDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChatDelta {
    content: Option<String>,
}

impl Model for HttpModel {
    async fn generate(&self, request: &ModelRequest) -> Result<Option<String>, ModelError> {
        let response = self.send(request, false).await?;
        let text = response
            .text()
            .await
            .map_err(|e| ModelError::Http(e.to_string()))?;
        parse_completion(&text)
    }

    async fn generate_streaming<F>(
        &self,
        request: &ModelRequest,
        on_chunk: &mut F,
    ) -> Result<Option<String>, ModelError>
    where
        F: FnMut(&str),
    {
        let response = self.send(request, true).await?;
        let mut stream = response.bytes_stream();
        let mut events = SseBuffer::default();
        let mut output = String::new();
        let mut received = false;

        'read: while let Some(bytes) = stream.next().await {
            let bytes = bytes.map_err(|e| ModelError::Http(e.to_string()))?;
            events.push(&bytes);
            while let Some(data) = events.next_data() {
                if data == "[DONE]" {
                    break 'read;
                }
                let chunk: ChatChunk = serde_json::from_str(&data)
                    .map_err(|e| ModelError::Serialization(e.to_string()))?;
                for choice in chunk.choices {
                    if let Some(content) = choice.delta.content {
                        received = true;
                        on_chunk(&content);
                        output.push_str(&content);
                    }
                }
            }
        }

        debug!(output_len = output.len(), "streamed completion finished");
        Ok(received.then_some(output))
    }
}

fn parse_completion(body: &str) -> Result<Option<String>, ModelError> {
    let parsed: ChatResponse =
        serde_json::from_str(body).map_err(|e| ModelError::Serialization(e.to_string()))?;
    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ModelError::Response("Missing choices".to_string()))?;
    Ok(choice.message.content)
}

/// Accumulates a server-sent event stream and yields `data:` payloads.
///
/// Works on bytes so a UTF-8 sequence split across network chunks is only
/// decoded once its line is complete.
#[derive(Debug, Default)]
struct SseBuffer {
    pending: Vec<u8>,
}

impl SseBuffer {
    fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Next complete `data:` line, skipping comments and other fields.
    fn next_data(&mut self) -> Option<String> {
        while let Some(newline) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\r', '\n']);
            if let Some(data) = line.strip_prefix("data:") {
                return Some(data.trim_start().to_string());
            }
        }
        None
    }
}

// =============================================================================
// Configured backend
// =============================================================================

/// The model selected by configuration.
pub enum ModelBackend {
    Http(HttpModel),
}

impl Model for ModelBackend {
    async fn generate(&self, request: &ModelRequest) -> Result<Option<String>, ModelError> {
        match self {
            ModelBackend::Http(model) => model.generate(request).await,
        }
    }

    async fn generate_streaming<F>(
        &self,
        request: &ModelRequest,
        on_chunk: &mut F,
    ) -> Result<Option<String>, ModelError>
    where
        F: FnMut(&str),
    {
        match self {
            ModelBackend::Http(model) => model.generate_streaming(request, on_chunk).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_completion() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"<p>hi</p>"}}]}"#;
        assert_eq!(parse_completion(body).unwrap().as_deref(), Some("<p>hi</p>"));

        let null_content = r#"{"choices":[{"message":{"role":"assistant","content":null}}]}"#;
        assert_eq!(parse_completion(null_content).unwrap(), None);

        let no_choices = r#"{"choices":[]}"#;
        assert!(matches!(
            parse_completion(no_choices),
            Err(ModelError::Response(_))
        ));
    }

    #[test]
    fn test_sse_buffer_splits_across_pushes() {
        let mut sse = SseBuffer::default();
        sse.push(b": keep-alive\n\ndata: {\"a\"");
        assert_eq!(sse.next_data(), None);
        sse.push(b":1}\r\n\ndata: [DONE]\n");
        assert_eq!(sse.next_data().as_deref(), Some("{\"a\":1}"));
        assert_eq!(sse.next_data().as_deref(), Some("[DONE]"));
        assert_eq!(sse.next_data(), None);
    }

    #[test]
    fn test_stream_flag_only_serialized_when_set() {
        let model = HttpModel::new(HttpModelConfig::default()).unwrap();
        let request = ModelRequest {
            system: "sys".to_string(),
            instruction: "make a page".to_string(),
        };

        let plain = serde_json::to_value(model.body(&request, false)).unwrap();
        assert!(plain.get("stream").is_none());
        assert_eq!(plain["messages"][0]["role"], "system");
        assert_eq!(plain["messages"][1]["content"], "make a page");

        let streamed = serde_json::to_value(model.body(&request, true)).unwrap();
        assert_eq!(streamed["stream"], true);
    }

    struct Fixed(&'static str);

    impl Model for Fixed {
        async fn generate(&self, _request: &ModelRequest) -> Result<Option<String>, ModelError> {
            Ok(Some(self.0.to_string()))
        }
    }

    #[tokio::test]
    async fn test_default_streaming_emits_single_chunk() {
        let request = ModelRequest {
            system: String::new(),
            instruction: "x".to_string(),
        };
        let mut chunks = Vec::new();
        let output = Fixed("<p>hi</p>")
            .generate_streaming(&request, &mut |c: &str| chunks.push(c.to_string()))
            .await
            .unwrap();
        assert_eq!(output.as_deref(), Some("<p>hi</p>"));
        assert_eq!(chunks, vec!["<p>hi</p>".to_string()]);
    }
}
