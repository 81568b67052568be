//! Streaming chat relay.
//!
//! The relay prepends the configured system prompt to the visitor's
//! conversation, opens a streaming completion against a hosted model and
//! forwards each text delta to the caller as soon as it arrives. The full
//! reply accumulates in a [`Transcript`].
//!
//! # Failure model
//!
//! - The provider call is retried up to `chat.max_retries` times on network
//!   errors, HTTP 429 and 5xx, with exponential backoff (500ms, 1s, 2s, ...).
//!   No retry happens once a token has been forwarded.
//! - Any other failure is logged and replaced, in the reply, by
//!   [`CHAT_FALLBACK_MESSAGE`].
//! - If the caller drops its receiver the relay stops reading the upstream.
//!
//! # Provider wire format
//!
//! OpenAI-compatible `POST {api_base}/chat/completions` with `stream: true`.
//! The body is server-sent events, one `data: {json}` line per delta, ending
//! with `data: [DONE]`.

use anyhow::{bail, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::{secret, ChatConfig};

/// Shown in place of the assistant reply when the relay fails.
pub const CHAT_FALLBACK_MESSAGE: &str =
    "Sorry, I couldn't come up with a reply just now. Please try again in a moment.";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// Checks a visitor-supplied history before any upstream call.
///
/// The history must be non-empty, contain no system messages, and end with
/// a non-blank user message.
pub fn validate_history(history: &[ChatMessage]) -> Result<(), String> {
    let last = history
        .last()
        .ok_or_else(|| "messages must not be empty".to_string())?;
    if history.iter().any(|m| m.role == Role::System) {
        return Err("system messages are not accepted".to_string());
    }
    if last.role != Role::User {
        return Err("the last message must come from the user".to_string());
    }
    if last.content.trim().is_empty() {
        return Err("the last message must not be empty".to_string());
    }
    Ok(())
}

/// Running reply text, forwarding each token to the receiver.
pub struct Transcript {
    tx: mpsc::Sender<String>,
    text: String,
}

impl Transcript {
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        Self {
            tx,
            text: String::new(),
        }
    }

    /// Appends and forwards `token`. Returns `false` once the receiver is gone.
    pub async fn push(&mut self, token: String) -> bool {
        self.text.push_str(&token);
        self.tx.send(token).await.is_ok()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// A hosted model that can stream a completion.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    fn model_name(&self) -> &str;

    /// Streams the reply to `messages` into `out`.
    ///
    /// Returns `Ok` on normal completion or when the receiver went away.
    async fn stream_completion(&self, messages: &[ChatMessage], out: &mut Transcript) -> Result<()>;
}

/// Relay front: owns the backend and the system prompt.
#[derive(Clone)]
pub struct ChatService {
    backend: Arc<dyn ChatBackend>,
    system_prompt: String,
}

impl ChatService {
    pub fn new(backend: Arc<dyn ChatBackend>, system_prompt: impl Into<String>) -> Self {
        Self {
            backend,
            system_prompt: system_prompt.into(),
        }
    }

    pub fn from_config(config: &ChatConfig) -> Result<Self> {
        let backend = OpenAiBackend::new(config)?;
        Ok(Self::new(Arc::new(backend), config.system_prompt.clone()))
    }

    /// Starts relaying a reply to `history`; tokens arrive on the receiver.
    ///
    /// The receiver closes when the reply is complete. On failure the
    /// fallback message is sent as the final chunk.
    pub fn relay(&self, history: Vec<ChatMessage>) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(64);
        let backend = self.backend.clone();

        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(ChatMessage::system(self.system_prompt.clone()));
        messages.extend(history);

        tokio::spawn(async move {
            let mut transcript = Transcript::new(tx.clone());
            match backend.stream_completion(&messages, &mut transcript).await {
                Ok(()) => {
                    info!(
                        model = backend.model_name(),
                        chars = transcript.text().len(),
                        "chat reply streamed"
                    );
                }
                Err(e) => {
                    error!(model = backend.model_name(), "chat relay failed: {:#}", e);
                    let fallback = if transcript.is_empty() {
                        CHAT_FALLBACK_MESSAGE.to_string()
                    } else {
                        format!("\n\n{}", CHAT_FALLBACK_MESSAGE)
                    };
                    let _ = tx.send(fallback).await;
                }
            }
        });

        rx
    }

    /// Relays and collects the whole reply.
    pub async fn complete(&self, history: Vec<ChatMessage>) -> String {
        let mut rx = self.relay(history);
        let mut reply = String::new();
        while let Some(token) = rx.recv().await {
            reply.push_str(&token);
        }
        reply
    }
}

// ============ OpenAI-compatible backend ============

const CONNECT_TIMEOUT_SECS: u64 = 10;

pub struct OpenAiBackend {
    client: reqwest::Client,
    api_base: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    max_retries: u32,
}

impl OpenAiBackend {
    /// Builds the backend. A missing API key is not an error here; each
    /// request fails instead, so the rest of the site keeps working.
    pub fn new(config: &ChatConfig) -> Result<Self> {
        // Bounds connecting and each read, not the whole streamed reply.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .read_timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let api_key = secret(&config.api_key_env);
        if api_key.is_none() {
            warn!(var = %config.api_key_env, "chat API key not set; chat replies will fail");
        }
        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
        })
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    fn request_body(&self, messages: &[ChatMessage]) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "stream": true,
        });
        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        body
    }

    /// Opens the stream, retrying transient failures.
    async fn open(&self, messages: &[ChatMessage]) -> Result<reqwest::Response> {
        let api_key = match &self.api_key {
            Some(key) => key,
            None => bail!("chat API key is not configured"),
        };
        let body = self.request_body(messages);
        let url = format!("{}/chat/completions", self.api_base);

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // 500ms, 1s, 2s, 4s, ...
                let delay = Duration::from_millis(500 << (attempt - 1).min(5));
                debug!(attempt, ?delay, "retrying chat completion");
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&url)
                .bearer_auth(api_key)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(anyhow::anyhow!("Chat API error {}: {}", status, body_text));
                        continue;
                    }

                    bail!("Chat API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Chat completion failed after retries")))
    }
}

#[async_trait]
impl ChatBackend for OpenAiBackend {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn stream_completion(&self, messages: &[ChatMessage], out: &mut Transcript) -> Result<()> {
        let response = self.open(messages).await?;
        let mut stream = response.bytes_stream();
        let mut decoder = SseDecoder::default();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            for delta in decoder.push(&chunk)? {
                match delta {
                    Delta::Token(token) => {
                        if !out.push(token).await {
                            debug!("chat receiver dropped, stopping");
                            return Ok(());
                        }
                    }
                    Delta::Error(message) => bail!("Chat stream error: {}", message),
                    Delta::Done => return Ok(()),
                }
            }
        }

        Ok(())
    }
}

/// One decoded stream event.
#[derive(Debug, PartialEq)]
pub enum Delta {
    Token(String),
    /// The provider reported an error inside the stream.
    Error(String),
    Done,
}

/// Incremental decoder for the completion event stream.
///
/// Network chunks may split lines and UTF-8 sequences anywhere; bytes are
/// buffered until a full line is available.
#[derive(Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Delta>> {
        self.buf.extend_from_slice(chunk);
        let mut deltas = Vec::new();

        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);

            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim_start();

            if data == "[DONE]" {
                deltas.push(Delta::Done);
                continue;
            }

            let event: Value = serde_json::from_str(data)?;
            if let Some(err) = event.get("error") {
                let message = err
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error");
                deltas.push(Delta::Error(message.to_string()));
                continue;
            }

            if let Some(token) = event
                .pointer("/choices/0/delta/content")
                .and_then(Value::as_str)
            {
                if !token.is_empty() {
                    deltas.push(Delta::Token(token.to_string()));
                }
            }
        }

        Ok(deltas)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::oneshot;

    fn sse(tokens: &[&str]) -> String {
        let mut body = String::new();
        for t in tokens {
            body.push_str(&format!(
                "data: {}\n\n",
                json!({ "choices": [{ "index": 0, "delta": { "content": t } }] })
            ));
        }
        body.push_str("data: [DONE]\n\n");
        body
    }

    fn config(api_base: String, max_retries: u32) -> ChatConfig {
        ChatConfig {
            api_base,
            api_key_env: "FOLIO_TEST_UNSET_CHAT_KEY".to_string(),
            model: "test-model".to_string(),
            system_prompt: "be brief".to_string(),
            temperature: 0.2,
            max_tokens: Some(64),
            max_retries,
            timeout_secs: 5,
        }
    }

    fn service(cfg: &ChatConfig) -> ChatService {
        let backend = OpenAiBackend::new(cfg).unwrap().with_api_key("sk-test");
        ChatService::new(Arc::new(backend), cfg.system_prompt.clone())
    }

    #[test]
    fn test_decoder_handles_split_chunks() {
        let body = sse(&["Hel", "lo ", "wörld"]);
        let bytes = body.as_bytes();
        let mut decoder = SseDecoder::default();
        let mut deltas = Vec::new();
        // Feed byte-by-byte to split lines and multi-byte characters.
        for b in bytes {
            deltas.extend(decoder.push(std::slice::from_ref(b)).unwrap());
        }
        assert_eq!(
            deltas,
            vec![
                Delta::Token("Hel".to_string()),
                Delta::Token("lo ".to_string()),
                Delta::Token("wörld".to_string()),
                Delta::Done,
            ]
        );
    }

    #[test]
    fn test_decoder_skips_role_and_comments() {
        let mut decoder = SseDecoder::default();
        let deltas = decoder
            .push(b": keep-alive\n\ndata: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n")
            .unwrap();
        assert!(deltas.is_empty());
    }

    #[test]
    fn test_decoder_surfaces_stream_error() {
        let mut decoder = SseDecoder::default();
        let deltas = decoder
            .push(b"data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\ndata: {\"error\":{\"message\":\"overloaded\"}}\n")
            .unwrap();
        assert_eq!(
            deltas,
            vec![
                Delta::Token("Hi".to_string()),
                Delta::Error("overloaded".to_string()),
            ]
        );
    }

    #[test]
    fn test_validate_history() {
        assert!(validate_history(&[]).is_err());
        assert!(validate_history(&[ChatMessage::user("hi")]).is_ok());
        assert!(validate_history(&[ChatMessage::user("  ")]).is_err());
        assert!(validate_history(&[ChatMessage::system("x"), ChatMessage::user("hi")]).is_err());
        let ends_with_assistant = vec![
            ChatMessage::user("hi"),
            ChatMessage {
                role: Role::Assistant,
                content: "hello".to_string(),
            },
        ];
        assert!(validate_history(&ends_with_assistant).is_err());
    }

    #[tokio::test]
    async fn test_relay_streams_tokens_in_order() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_body(mockito::Matcher::PartialJson(json!({
                "model": "test-model",
                "stream": true,
                "max_tokens": 64,
                "messages": [
                    { "role": "system", "content": "be brief" },
                    { "role": "user", "content": "hi" }
                ]
            })))
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(sse(&["Hi", " there", "!"]))
            .create_async()
            .await;

        let cfg = config(server.url(), 0);
        let mut rx = service(&cfg).relay(vec![ChatMessage::user("hi")]);
        let mut tokens = Vec::new();
        while let Some(t) = rx.recv().await {
            tokens.push(t);
        }
        assert_eq!(tokens, vec!["Hi", " there", "!"]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_provider_rejection_yields_fallback() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(401)
            .with_body(r#"{"error":{"message":"invalid api key"}}"#)
            .create_async()
            .await;

        let cfg = config(server.url(), 2);
        let reply = service(&cfg).complete(vec![ChatMessage::user("hi")]).await;
        assert_eq!(reply, CHAT_FALLBACK_MESSAGE);
    }

    #[tokio::test]
    async fn test_server_error_is_retried() {
        let mut server = mockito::Server::new_async().await;
        let failing = server
            .mock("POST", "/chat/completions")
            .with_status(503)
            .expect(1)
            .create_async()
            .await;
        let ok = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(sse(&["ok"]))
            .create_async()
            .await;

        let cfg = config(server.url(), 1);
        let reply = service(&cfg).complete(vec![ChatMessage::user("hi")]).await;
        assert_eq!(reply, "ok");
        failing.assert_async().await;
        ok.assert_async().await;
    }

    #[tokio::test]
    async fn test_rate_limit_is_retried() {
        let mut server = mockito::Server::new_async().await;
        let limited = server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .with_body(r#"{"error":{"message":"slow down"}}"#)
            .expect(1)
            .create_async()
            .await;
        let ok = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(sse(&["again"]))
            .create_async()
            .await;

        let cfg = config(server.url(), 1);
        let reply = service(&cfg).complete(vec![ChatMessage::user("hi")]).await;
        assert_eq!(reply, "again");
        limited.assert_async().await;
        ok.assert_async().await;
    }

    #[tokio::test]
    async fn test_stream_error_after_tokens_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mut body = String::new();
        body.push_str(&format!(
            "data: {}\n\n",
            json!({ "choices": [{ "index": 0, "delta": { "content": "Hel" } }] })
        ));
        body.push_str("data: {\"error\":{\"message\":\"overloaded\"}}\n\n");
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(body)
            .expect(1)
            .create_async()
            .await;

        let cfg = config(server.url(), 2);
        let reply = service(&cfg).complete(vec![ChatMessage::user("hi")]).await;
        assert_eq!(reply, format!("Hel\n\n{}", CHAT_FALLBACK_MESSAGE));
        mock.assert_async().await;
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf).to_string();
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + length {
                    return;
                }
            }
        }
    }

    /// Serves one completion whose tokens arrive `gap` apart.
    async fn slow_sse_server(tokens: Vec<&'static str>, gap: Duration) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_request(&mut socket).await;
            socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n")
                .await
                .unwrap();
            for t in tokens {
                let event = format!(
                    "data: {}\n\n",
                    json!({ "choices": [{ "index": 0, "delta": { "content": t } }] })
                );
                socket.write_all(event.as_bytes()).await.unwrap();
                socket.flush().await.unwrap();
                tokio::time::sleep(gap).await;
            }
            socket.write_all(b"data: [DONE]\n\n").await.unwrap();
            let _ = socket.shutdown().await;
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_reply_may_outlast_timeout() {
        let base = slow_sse_server(vec!["one", " two", " three"], Duration::from_millis(600)).await;
        let mut cfg = config(base, 0);
        cfg.timeout_secs = 1;

        let reply = service(&cfg).complete(vec![ChatMessage::user("hi")]).await;
        assert_eq!(reply, "one two three");
    }

    struct StopsWhenDropped {
        dropped: std::sync::Mutex<Option<oneshot::Receiver<()>>>,
        delivered: std::sync::Mutex<Option<oneshot::Sender<bool>>>,
    }

    #[async_trait]
    impl ChatBackend for StopsWhenDropped {
        fn model_name(&self) -> &str {
            "stops"
        }

        async fn stream_completion(&self, _: &[ChatMessage], out: &mut Transcript) -> Result<()> {
            out.push("first".to_string()).await;
            let dropped = self.dropped.lock().unwrap().take();
            if let Some(dropped) = dropped {
                let _ = dropped.await;
            }
            let delivered = out.push("second".to_string()).await;
            let tx = self.delivered.lock().unwrap().take();
            if let Some(tx) = tx {
                let _ = tx.send(delivered);
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_push_fails_once_receiver_dropped() {
        let (dropped_tx, dropped_rx) = oneshot::channel();
        let (delivered_tx, delivered_rx) = oneshot::channel();
        let backend = StopsWhenDropped {
            dropped: std::sync::Mutex::new(Some(dropped_rx)),
            delivered: std::sync::Mutex::new(Some(delivered_tx)),
        };
        let svc = ChatService::new(Arc::new(backend), "p");

        let mut rx = svc.relay(vec![ChatMessage::user("hi")]);
        assert_eq!(rx.recv().await.as_deref(), Some("first"));
        drop(rx);
        dropped_tx.send(()).unwrap();

        assert!(!delivered_rx.await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_key_yields_fallback() {
        let cfg = config("http://127.0.0.1:9".to_string(), 0);
        let backend = OpenAiBackend::new(&cfg).unwrap();
        let svc = ChatService::new(Arc::new(backend), "p");
        let reply = svc.complete(vec![ChatMessage::user("hi")]).await;
        assert_eq!(reply, CHAT_FALLBACK_MESSAGE);
    }

    struct BrokenMidway;

    #[async_trait]
    impl ChatBackend for BrokenMidway {
        fn model_name(&self) -> &str {
            "broken"
        }

        async fn stream_completion(&self, _: &[ChatMessage], out: &mut Transcript) -> Result<()> {
            out.push("Partial".to_string()).await;
            bail!("connection reset")
        }
    }

    #[tokio::test]
    async fn test_partial_reply_then_fallback() {
        let svc = ChatService::new(Arc::new(BrokenMidway), "p");
        let reply = svc.complete(vec![ChatMessage::user("hi")]).await;
        assert_eq!(reply, format!("Partial\n\n{}", CHAT_FALLBACK_MESSAGE));
    }
}
