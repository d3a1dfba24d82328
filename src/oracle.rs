//! Oracle seams: the generative text and image services the pipeline consumes.
//!
//! The pipeline never assumes anything about the shape of a completion; every
//! reply goes through `parser::extract`. Implementations:
//! - `openai::OpenAI`: OpenAI-compatible HTTP client (production)
//! - `OfflineOracle`: answers every call with `OracleUnavailable`, which drives
//!   the whole pipeline onto the fallback cascade
//! - `testing::ScriptedOracle`: marker-routed canned replies (tests only)

use async_trait::async_trait;

use crate::error::PipelineError;

/// One text completion request.
#[derive(Clone, Debug)]
pub struct OracleRequest {
  pub system: String,
  pub prompt: String,
  pub model: String,
  pub temperature: f32,
  pub max_tokens: u32,
}

/// Model ids used for the two classes of call.
#[derive(Clone, Debug)]
pub struct ModelSet {
  /// Outline and listing regeneration.
  pub strong: String,
  /// Expansion and chunking.
  pub fast: String,
}

impl Default for ModelSet {
  fn default() -> Self {
    Self { strong: "gpt-4o".into(), fast: "gpt-4o-mini".into() }
  }
}

#[async_trait]
pub trait TextOracle: Send + Sync {
  /// Raw completion text. No structural guarantee; may be truncated at `max_tokens`.
  async fn complete(&self, req: &OracleRequest) -> Result<String, PipelineError>;

  fn name(&self) -> &str;
}

#[async_trait]
pub trait ImageOracle: Send + Sync {
  /// Returns an image URL. Best-effort.
  async fn generate(&self, prompt: &str, size: &str) -> Result<String, PipelineError>;
}

/// Stand-in used when no upstream is configured.
pub struct OfflineOracle;

#[async_trait]
impl TextOracle for OfflineOracle {
  async fn complete(&self, _req: &OracleRequest) -> Result<String, PipelineError> {
    Err(PipelineError::OracleUnavailable("no text oracle configured".into()))
  }

  fn name(&self) -> &str {
    "offline"
  }
}

#[async_trait]
impl ImageOracle for OfflineOracle {
  async fn generate(&self, _prompt: &str, _size: &str) -> Result<String, PipelineError> {
    Err(PipelineError::OracleUnavailable("no image oracle configured".into()))
  }
}

#[cfg(test)]
pub mod testing {
  //! Marker-routed oracle for tests. Each rule matches prompts containing its
  //! marker; replies are consumed in order and the last one repeats.

  use std::collections::VecDeque;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Mutex;
  use std::time::Duration;

  use async_trait::async_trait;

  use super::{ImageOracle, OracleRequest, TextOracle};
  use crate::error::PipelineError;

  enum Reply {
    Text(String),
    Fail(PipelineError),
    Hang,
    Panic,
  }

  struct Rule {
    marker: String,
    replies: VecDeque<Reply>,
  }

  /// Tracks how many calls are running at once and the highest count seen.
  #[derive(Default)]
  struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
  }

  struct InFlight<'a>(&'a Gauge);

  impl Gauge {
    fn enter(&self) -> InFlight<'_> {
      let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
      self.peak.fetch_max(now, Ordering::SeqCst);
      InFlight(self)
    }

    fn peak(&self) -> usize {
      self.peak.load(Ordering::SeqCst)
    }
  }

  impl Drop for InFlight<'_> {
    fn drop(&mut self) {
      self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
  }

  #[derive(Default)]
  pub struct ScriptedOracle {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<String>>,
    image_calls: Mutex<Vec<String>>,
    failing_images: Vec<String>,
    delays: Vec<(String, Duration)>,
    image_delay: Option<Duration>,
    text_gauge: Gauge,
    image_gauge: Gauge,
  }

  impl ScriptedOracle {
    pub fn new() -> Self {
      Self::default()
    }

    fn push(self, marker: &str, reply: Reply) -> Self {
      {
        let mut rules = self.rules.lock().unwrap();
        match rules.iter_mut().find(|r| r.marker == marker) {
          Some(rule) => rule.replies.push_back(reply),
          None => rules.push(Rule { marker: marker.to_string(), replies: VecDeque::from([reply]) }),
        }
      }
      self
    }

    /// Reply with `text` to prompts containing `marker`. Repeated calls queue replies.
    pub fn on(self, marker: &str, text: &str) -> Self {
      self.push(marker, Reply::Text(text.to_string()))
    }

    pub fn fail(self, marker: &str, err: PipelineError) -> Self {
      self.push(marker, Reply::Fail(err))
    }

    /// Never answer prompts containing `marker` (exercises the call timeout).
    pub fn hang(self, marker: &str) -> Self {
      self.push(marker, Reply::Hang)
    }

    /// Panic inside the oracle call (exercises worker isolation).
    pub fn panic_on(self, marker: &str) -> Self {
      self.push(marker, Reply::Panic)
    }

    /// Image prompts containing `marker` fail.
    pub fn fail_images(mut self, marker: &str) -> Self {
      self.failing_images.push(marker.to_string());
      self
    }

    /// Wait `delay` before answering prompts containing `marker`.
    pub fn delay(mut self, marker: &str, delay: Duration) -> Self {
      self.delays.push((marker.to_string(), delay));
      self
    }

    /// Wait `delay` before answering every image request.
    pub fn image_delay(mut self, delay: Duration) -> Self {
      self.image_delay = Some(delay);
      self
    }

    pub fn peak_text_in_flight(&self) -> usize {
      self.text_gauge.peak()
    }

    pub fn peak_image_in_flight(&self) -> usize {
      self.image_gauge.peak()
    }

    fn delay_for(&self, prompt: &str) -> Option<Duration> {
      self
        .delays
        .iter()
        .filter(|(m, _)| prompt.contains(m.as_str()))
        .max_by_key(|(m, _)| m.len())
        .map(|(_, d)| *d)
    }

    pub fn calls(&self) -> Vec<String> {
      self.calls.lock().unwrap().clone()
    }

    pub fn calls_matching(&self, marker: &str) -> usize {
      self.calls.lock().unwrap().iter().filter(|p| p.contains(marker)).count()
    }

    pub fn image_calls(&self) -> usize {
      self.image_calls.lock().unwrap().len()
    }

    fn next_reply(&self, prompt: &str) -> Option<Reply> {
      let mut rules = self.rules.lock().unwrap();
      // Longest marker wins so specific rules can shadow generic ones.
      let rule = rules
        .iter_mut()
        .filter(|r| prompt.contains(&r.marker))
        .max_by_key(|r| r.marker.len())?;
      if rule.replies.len() > 1 {
        return rule.replies.pop_front();
      }
      rule.replies.front().map(|r| match r {
        Reply::Text(t) => Reply::Text(t.clone()),
        Reply::Fail(e) => Reply::Fail(e.clone()),
        Reply::Hang => Reply::Hang,
        Reply::Panic => Reply::Panic,
      })
    }
  }

  #[async_trait]
  impl TextOracle for ScriptedOracle {
    async fn complete(&self, req: &OracleRequest) -> Result<String, PipelineError> {
      self.calls.lock().unwrap().push(req.prompt.clone());
      let _running = self.text_gauge.enter();
      if let Some(d) = self.delay_for(&req.prompt) {
        tokio::time::sleep(d).await;
      }
      match self.next_reply(&req.prompt) {
        Some(Reply::Text(t)) => Ok(t),
        Some(Reply::Fail(e)) => Err(e),
        Some(Reply::Hang) => {
          tokio::time::sleep(Duration::from_secs(3600)).await;
          Err(PipelineError::OracleUnavailable("hang elapsed".into()))
        }
        Some(Reply::Panic) => panic!("scripted oracle panic"),
        None => Err(PipelineError::OracleUnavailable("no scripted reply".into())),
      }
    }

    fn name(&self) -> &str {
      "scripted"
    }
  }

  #[async_trait]
  impl ImageOracle for ScriptedOracle {
    async fn generate(&self, prompt: &str, _size: &str) -> Result<String, PipelineError> {
      let n = {
        let mut calls = self.image_calls.lock().unwrap();
        calls.push(prompt.to_string());
        calls.len()
      };
      let _running = self.image_gauge.enter();
      if let Some(d) = self.image_delay {
        tokio::time::sleep(d).await;
      }
      if self.failing_images.iter().any(|m| prompt.contains(m)) {
        return Err(PipelineError::OracleUnavailable("image rejected".into()));
      }
      Ok(format!("https://images.test/{n}.png"))
    }
  }
}
