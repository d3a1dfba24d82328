//! Error taxonomy for the generation pipeline.
//!
//! None of these reach the public entry point: each one is recovered at the
//! lowest layer that can do so, and its display text ends up as a fallback note
//! on the affected unit.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum PipelineError {
  #[error("Outline unparsable: {0}")]
  OutlineUnparsable(String),

  #[error("Malformed chunk output: {0}")]
  MalformedChunkOutput(String),

  #[error("Incomplete enumeration: observed {observed} items, expected {min}..={max}")]
  IncompleteEnumeration { observed: usize, min: usize, max: usize },

  #[error("Oracle timed out after {0:?}")]
  OracleTimeout(Duration),

  #[error("Oracle unavailable: {0}")]
  OracleUnavailable(String),

  #[error("Invalid quiz answer '{answer}' for question '{question}'")]
  InvalidQuizAnswer { question: String, answer: String },

  #[error("Sink rejected record: {0}")]
  SinkRejected(String),
}

impl PipelineError {
  /// Oracle-side failures, as opposed to failures in what the oracle returned.
  pub fn is_oracle_failure(&self) -> bool {
    matches!(self, PipelineError::OracleTimeout(_) | PipelineError::OracleUnavailable(_))
  }
}

/// Raised by the parser when no repair tier recovers a record.
#[derive(Debug, Clone, Error)]
#[error("No structured record recoverable ({input_len} bytes of input): {reason}")]
pub struct ExtractError {
  pub input_len: usize,
  pub reason: String,
}
