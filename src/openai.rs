//! Minimal OpenAI-compatible client backing the text and image oracles.
//!
//! We call chat.completions for text and images.generations for thumbnails.
//! Calls are instrumented and log model names, latencies, and response sizes (not contents).
//!
//! NOTE: We never log the API key and we keep payload truncations short to avoid PII leaks.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::error::PipelineError;
use crate::oracle::{ImageOracle, ModelSet, OracleRequest, TextOracle};
use crate::util::trunc_for_log;

const CLIENT_UA: &str = "coursegen-backend/0.1";

#[derive(Clone)]
pub struct OpenAI {
  pub client: reqwest::Client,
  pub api_key: String,
  pub base_url: String,
  pub fast_model: String,
  pub strong_model: String,
  pub image_model: String,
  pub timeout: Duration,
}

impl OpenAI {
  /// Construct the client if we find OPENAI_API_KEY; otherwise return None.
  pub fn from_env(timeout: Duration) -> Option<Self> {
    let api_key = std::env::var("OPENAI_API_KEY").ok()?;
    let base_url =
      std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".into());
    let fast_model =
      std::env::var("OPENAI_FAST_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into());
    let strong_model =
      std::env::var("OPENAI_STRONG_MODEL").unwrap_or_else(|_| "gpt-4o".into());
    let image_model =
      std::env::var("OPENAI_IMAGE_MODEL").unwrap_or_else(|_| "dall-e-3".into());

    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .ok()?;

    Some(Self { client, api_key, base_url, fast_model, strong_model, image_model, timeout })
  }

  pub fn models(&self) -> ModelSet {
    ModelSet { strong: self.strong_model.clone(), fast: self.fast_model.clone() }
  }

  fn map_send_error(&self, e: reqwest::Error) -> PipelineError {
    if e.is_timeout() {
      PipelineError::OracleTimeout(self.timeout)
    } else {
      PipelineError::OracleUnavailable(e.to_string())
    }
  }

  async fn check_status(res: reqwest::Response) -> Result<reqwest::Response, PipelineError> {
    if res.status().is_success() {
      return Ok(res);
    }
    let status = res.status();
    let body = res.text().await.unwrap_or_default();
    let msg = extract_openai_error(&body).unwrap_or(body);
    Err(PipelineError::OracleUnavailable(format!("OpenAI HTTP {}: {}", status, msg)))
  }
}

#[async_trait]
impl TextOracle for OpenAI {
  #[instrument(level = "info", target = "oracle", skip(self, req), fields(model = %req.model, prompt_len = req.prompt.len(), max_tokens = req.max_tokens))]
  async fn complete(&self, req: &OracleRequest) -> Result<String, PipelineError> {
    let url = format!("{}/chat/completions", self.base_url);
    let mut messages = Vec::with_capacity(2);
    if !req.system.is_empty() {
      messages.push(ChatMessageReq { role: "system".into(), content: req.system.clone() });
    }
    messages.push(ChatMessageReq { role: "user".into(), content: req.prompt.clone() });
    let body = ChatCompletionRequest {
      model: req.model.clone(),
      messages,
      temperature: req.temperature,
      max_tokens: Some(req.max_tokens),
    };

    let start = Instant::now();
    let res = self.client.post(&url)
      .header(USER_AGENT, CLIENT_UA)
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
      .json(&body).send().await.map_err(|e| self.map_send_error(e))?;
    let res = Self::check_status(res).await?;

    let body: ChatCompletionResponse = res.json().await
      .map_err(|e| PipelineError::OracleUnavailable(format!("Malformed completion envelope: {e}")))?;
    if let Some(usage) = &body.usage {
      info!(target: "oracle", prompt_tokens = ?usage.prompt_tokens, completion_tokens = ?usage.completion_tokens, total_tokens = ?usage.total_tokens, "OpenAI usage");
    }
    let choice = body.choices.into_iter().next();
    let finish_reason = choice.as_ref().and_then(|c| c.finish_reason.clone()).unwrap_or_default();
    let text = choice.and_then(|c| c.message.content).unwrap_or_default();

    if finish_reason == "length" {
      warn!(target: "oracle", model = %req.model, "Completion truncated at max_tokens");
    }
    debug!(target: "oracle", elapsed = ?start.elapsed(), len = text.len(), preview = %trunc_for_log(&text, 80), "Completion received");
    Ok(text)
  }

  fn name(&self) -> &str {
    "openai"
  }
}

#[async_trait]
impl ImageOracle for OpenAI {
  #[instrument(level = "info", target = "oracle", skip(self, prompt, size), fields(model = %self.image_model, %size))]
  async fn generate(&self, prompt: &str, size: &str) -> Result<String, PipelineError> {
    let url = format!("{}/images/generations", self.base_url);
    let body = ImageRequest { model: self.image_model.clone(), prompt: prompt.to_string(), n: 1, size: size.to_string() };

    let res = self.client.post(&url)
      .header(USER_AGENT, CLIENT_UA)
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
      .json(&body).send().await.map_err(|e| self.map_send_error(e))?;
    let res = Self::check_status(res).await?;

    let body: ImageResponse = res.json().await
      .map_err(|e| PipelineError::OracleUnavailable(format!("Malformed image envelope: {e}")))?;
    body.data.into_iter()
      .find_map(|d| d.url)
      .ok_or_else(|| PipelineError::OracleUnavailable("Image response carried no URL".into()))
  }
}

// --- DTOs ---

#[derive(Serialize)]
struct ChatCompletionRequest {
  model: String,
  messages: Vec<ChatMessageReq>,
  temperature: f32,
  #[serde(skip_serializing_if = "Option::is_none")]
  max_tokens: Option<u32>,
}
#[derive(Serialize)]
struct ChatMessageReq { role: String, content: String }

#[derive(Deserialize)]
struct ChatCompletionResponse {
  choices: Vec<ChatChoice>,
  #[serde(default)] usage: Option<Usage>,
}
#[derive(Deserialize)]
struct ChatChoice {
  message: ChatMessageResp,
  #[serde(default)] finish_reason: Option<String>,
}
#[derive(Deserialize)]
struct ChatMessageResp { content: Option<String> }
#[derive(Deserialize)]
struct Usage {
  #[serde(default)] prompt_tokens: Option<u32>,
  #[serde(default)] completion_tokens: Option<u32>,
  #[serde(default)] total_tokens: Option<u32>,
}

#[derive(Serialize)]
struct ImageRequest { model: String, prompt: String, n: u32, size: String }
#[derive(Deserialize)]
struct ImageResponse { data: Vec<ImageDatum> }
#[derive(Deserialize)]
struct ImageDatum { #[serde(default)] url: Option<String> }

/// Try to extract a clean error message from OpenAI error body.
fn extract_openai_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap { error: EObj }
  #[derive(Deserialize)]
  struct EObj { message: String }
  serde_json::from_str::<EWrap>(body).ok().map(|w| w.error.message)
}
