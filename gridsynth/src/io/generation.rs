//! Text generation backends and the rate-limited client the orchestrator uses.
//!
//! The [`TextGenerator`] trait decouples orchestration from the HTTP service.
//! Tests use scripted generators that return predetermined replies without
//! touching the network.

use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::io::config::GenerationConfig;

/// Longest error body kept in a [`ServiceError`].
const ERROR_BODY_LIMIT: usize = 500;

/// Failure of one call to the generation service.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("authentication rejected (HTTP {status}): {body}")]
    Auth { status: u16, body: String },
    #[error("rate limit or quota exceeded (HTTP 429): {0}")]
    Quota(String),
    #[error("service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Map a non-success HTTP status to its error kind.
pub fn classify_status(status: u16, body: &str) -> ServiceError {
    let body: String = body.trim().chars().take(ERROR_BODY_LIMIT).collect();
    match status {
        401 | 403 => ServiceError::Auth { status, body },
        429 => ServiceError::Quota(body),
        _ => ServiceError::Status { status, body },
    }
}

/// One fully specified generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub system_instruction: String,
    pub user_prompt: String,
}

/// Abstraction over text generation backends.
pub trait TextGenerator {
    /// Issue exactly one request; never retries.
    fn generate(&self, request: &GenerationRequest) -> Result<String, ServiceError>;
}

/// OpenAI-compatible chat completions backend.
pub struct ChatCompletionsGenerator {
    http: reqwest::blocking::Client,
    endpoint: String,
    api_key: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: u32,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}

impl ChatCompletionsGenerator {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .context("build HTTP client")?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        })
    }

    /// Build from config, reading the bearer token from the configured
    /// environment variable.
    pub fn from_config(config: &GenerationConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .with_context(|| format!("{} is not set", config.api_key_env))?;
        Self::new(
            config.endpoint.clone(),
            api_key,
            Duration::from_secs(config.request_timeout_secs),
        )
    }
}

impl TextGenerator for ChatCompletionsGenerator {
    #[instrument(skip_all, fields(model = %request.model, prompt_bytes = request.user_prompt.len()))]
    fn generate(&self, request: &GenerationRequest) -> Result<String, ServiceError> {
        let body = ChatRequest {
            model: &request.model,
            temperature: request.temperature,
            max_tokens: request.max_output_tokens,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &request.system_instruction,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user_prompt,
                },
            ],
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(|err| ServiceError::Transport(err.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .map_err(|err| ServiceError::Transport(err.to_string()))?;
        if !status.is_success() {
            let err = classify_status(status.as_u16(), &text);
            warn!(status = status.as_u16(), "generation request rejected");
            return Err(err);
        }
        parse_completion(&text)
    }
}

fn parse_completion(body: &str) -> Result<String, ServiceError> {
    let parsed: ChatResponse =
        serde_json::from_str(body).map_err(|err| ServiceError::Malformed(err.to_string()))?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| ServiceError::Malformed("response has no message content".to_string()))
}

/// Rate-limited facade over a [`TextGenerator`] that owns the run's call budget
/// counter.
pub struct GenerationClient<G> {
    backend: G,
    model: String,
    temperature: f32,
    max_output_tokens: u32,
    system_instruction: String,
    min_interval: Duration,
    last_call: Option<Instant>,
    calls: u64,
}

impl<G: TextGenerator> GenerationClient<G> {
    pub fn new(backend: G, config: &GenerationConfig) -> Self {
        Self {
            backend,
            model: config.model.clone(),
            temperature: config.temperature,
            max_output_tokens: config.max_tokens,
            system_instruction: config.system_instruction.clone(),
            min_interval: config.min_interval(),
            last_call: None,
            calls: 0,
        }
    }

    /// Calls issued so far, successful or not.
    pub fn calls(&self) -> u64 {
        self.calls
    }

    pub fn backend(&self) -> &G {
        &self.backend
    }

    /// Issue one generation call, waiting out the minimum interval first.
    pub fn generate(&mut self, prompt: &str) -> Result<String, ServiceError> {
        if let Some(last) = self.last_call {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                debug!(wait_ms = wait.as_millis() as u64, "pacing generation call");
                thread::sleep(wait);
            }
        }

        let request = GenerationRequest {
            model: self.model.clone(),
            temperature: self.temperature,
            max_output_tokens: self.max_output_tokens,
            system_instruction: self.system_instruction.clone(),
            user_prompt: prompt.to_string(),
        };
        self.calls += 1;
        let result = self.backend.generate(&request);
        self.last_call = Some(Instant::now());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedGenerator;

    fn config(min_interval_ms: u64) -> GenerationConfig {
        GenerationConfig {
            min_interval_ms,
            ..GenerationConfig::default()
        }
    }

    #[test]
    fn classifies_http_failures() {
        assert!(matches!(
            classify_status(401, "bad key"),
            ServiceError::Auth { status: 401, .. }
        ));
        assert!(matches!(classify_status(403, ""), ServiceError::Auth { .. }));
        assert_eq!(
            classify_status(429, " slow down "),
            ServiceError::Quota("slow down".to_string())
        );
        assert!(matches!(
            classify_status(503, "unavailable"),
            ServiceError::Status { status: 503, .. }
        ));
    }

    #[test]
    fn error_bodies_are_bounded() {
        let body = "x".repeat(10_000);
        let ServiceError::Status { body, .. } = classify_status(500, &body) else {
            panic!("expected status error");
        };
        assert_eq!(body.len(), ERROR_BODY_LIMIT);
    }

    #[test]
    fn parses_first_choice_content() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"def p(g): return g"}}]}"#;
        assert_eq!(parse_completion(body).expect("parse"), "def p(g): return g");
        assert!(matches!(
            parse_completion(r#"{"choices":[]}"#),
            Err(ServiceError::Malformed(_))
        ));
        assert!(matches!(parse_completion("<html>"), Err(ServiceError::Malformed(_))));
    }

    #[test]
    fn counts_every_call_including_failures() {
        let backend = ScriptedGenerator::new(vec![
            Err(ServiceError::Quota("limit".to_string())),
            Ok("def p(g): return g".to_string()),
        ]);
        let mut client = GenerationClient::new(backend, &config(0));

        assert!(client.generate("first").is_err());
        assert_eq!(client.calls(), 1);
        assert_eq!(client.generate("second").expect("reply"), "def p(g): return g");
        assert_eq!(client.calls(), 2);

        let requests = client.backend().requests();
        assert_eq!(requests[1].user_prompt, "second");
        assert_eq!(requests[1].model, "openai/gpt-oss-20b");
    }

    #[test]
    fn paces_only_after_the_first_call() {
        let backend = ScriptedGenerator::new(vec![Ok(String::new()), Ok(String::new())]);
        let mut client = GenerationClient::new(backend, &config(150));

        let start = Instant::now();
        client.generate("a").expect("first");
        assert!(start.elapsed() < Duration::from_millis(150));
        client.generate("b").expect("second");
        assert!(start.elapsed() >= Duration::from_millis(150));
    }
}
