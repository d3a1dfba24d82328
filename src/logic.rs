//! Core behaviors shared by both HTTP and WebSocket handlers.
//!
//! This includes:
//!   - Normalizing incoming course requests
//!   - Starting a course and logging what came back

use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

use crate::domain::CourseSpec;
use crate::scheduler::{CourseArtifact, ProgressEvent};
use crate::state::AppState;

const MAX_SUBJECT_CHARS: usize = 200;

/// Trim the request and reject ones with nothing to teach.
pub fn normalize_spec(mut spec: CourseSpec) -> Result<CourseSpec, String> {
  spec.subject = spec.subject.split_whitespace().collect::<Vec<_>>().join(" ");
  if spec.subject.is_empty() {
    return Err("subject must not be empty".into());
  }
  if spec.subject.chars().count() > MAX_SUBJECT_CHARS {
    return Err(format!("subject must be at most {MAX_SUBJECT_CHARS} characters"));
  }
  spec.user_profile = spec.user_profile.trim().to_string();
  spec.system_guidance = spec.system_guidance.trim().to_string();
  Ok(spec)
}

fn checked_spec(spec: CourseSpec) -> Result<CourseSpec, String> {
  normalize_spec(spec).map_err(|e| {
    warn!(target: "coursegen", error = %e, "Rejected course request");
    e
  })
}

fn log_started(artifact: &CourseArtifact) {
  let fallback_units = artifact.units.iter().filter(|u| u.used_fallback).count();
  info!(
    target: "coursegen",
    job_id = %artifact.job_id,
    title = %artifact.title,
    units = artifact.units.len(),
    fallback_units,
    "Course started"
  );
}

#[instrument(level = "info", skip(state, spec), fields(subject = %spec.subject))]
pub async fn start_course(state: &AppState, spec: CourseSpec) -> Result<CourseArtifact, String> {
  let spec = checked_spec(spec)?;
  let artifact = state.scheduler.generate_course(spec).await;
  log_started(&artifact);
  Ok(artifact)
}

/// Start a course with a progress receiver attached from the first event on.
#[instrument(level = "info", skip(state, spec), fields(subject = %spec.subject))]
pub async fn start_watched_course(
  state: &AppState,
  spec: CourseSpec,
) -> Result<(CourseArtifact, mpsc::Receiver<ProgressEvent>), String> {
  let spec = checked_spec(spec)?;
  let (artifact, rx) = state.scheduler.generate_course_with_progress(spec).await;
  log_started(&artifact);
  Ok((artifact, rx))
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use super::*;
  use crate::config::PipelineConfig;
  use crate::context::PipelineContext;
  use crate::domain::TargetLevel;
  use crate::oracle::{ModelSet, OfflineOracle};
  use crate::sink::TracingSink;

  #[test]
  fn normalizes_whitespace_and_rejects_empty_subjects() {
    let spec = normalize_spec(CourseSpec::new("  Learn \n hiragana ", TargetLevel::Beginner)).unwrap();
    assert_eq!(spec.subject, "Learn hiragana");
    assert!(normalize_spec(CourseSpec::new("   ", TargetLevel::Beginner)).is_err());
    assert!(normalize_spec(CourseSpec::new("x".repeat(201), TargetLevel::Beginner)).is_err());
  }

  #[tokio::test]
  async fn watched_course_receives_every_unit_including_the_first() {
    let ctx = PipelineContext::new(
      Arc::new(OfflineOracle),
      Arc::new(OfflineOracle),
      Arc::new(TracingSink),
      PipelineConfig::default(),
      ModelSet::default(),
    );
    let state = AppState::with_context(ctx);

    let (artifact, mut rx) = start_watched_course(&state, CourseSpec::new("Photosynthesis", TargetLevel::Beginner))
      .await
      .unwrap();
    let mut ready = Vec::new();
    while let Some(event) = rx.recv().await {
      match event {
        ProgressEvent::UnitReady { index, .. } => ready.push(index),
        ProgressEvent::ThumbnailReady { .. } => {}
        ProgressEvent::CourseComplete { .. } => break,
      }
    }
    ready.sort_unstable();
    assert_eq!(ready, (0..artifact.units.len()).collect::<Vec<_>>());

    assert!(start_watched_course(&state, CourseSpec::new("  ", TargetLevel::Beginner)).await.is_err());
  }
}
