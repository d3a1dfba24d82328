//! Semantic-storage sink for completed courses.
//!
//! Once every unit of a job is ready the artifact is pushed here unit by unit
//! and chunk by chunk. Emission is fire-and-forget: a rejected record is logged
//! and skipped, and nothing flows back into the artifact already delivered.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use crate::domain::{Chunk, Unit, ValidationState};
use crate::error::PipelineError;
use crate::util::trunc_for_log;

#[async_trait]
pub trait CourseSink: Send + Sync {
  async fn store_unit(&self, job_id: &str, course_title: &str, unit: &Unit) -> Result<(), PipelineError>;

  async fn store_chunk(&self, job_id: &str, unit_index: usize, chunk: &Chunk) -> Result<(), PipelineError>;
}

/// Default sink: structured log records under the `course_sink` target.
pub struct TracingSink;

#[async_trait]
impl CourseSink for TracingSink {
  async fn store_unit(&self, job_id: &str, course_title: &str, unit: &Unit) -> Result<(), PipelineError> {
    if unit.validation_state == ValidationState::Raw {
      return Err(PipelineError::SinkRejected(format!("unit {} was never expanded", unit.index)));
    }
    info!(
      target: "course_sink",
      %job_id,
      %course_title,
      index = unit.index,
      title = %unit.title,
      unit_type = unit.unit_type.as_str(),
      words = crate::util::word_count(&unit.content),
      "Unit stored"
    );
    Ok(())
  }

  async fn store_chunk(&self, job_id: &str, unit_index: usize, chunk: &Chunk) -> Result<(), PipelineError> {
    info!(
      target: "course_sink",
      %job_id,
      unit_index,
      chunk_number = chunk.chunk_number,
      chunk_type = chunk.chunk_type.as_str(),
      preview = %trunc_for_log(&chunk.content, 60),
      "Chunk stored"
    );
    Ok(())
  }
}

/// Push a finished course to the sink. Returns the number of records accepted.
#[instrument(level = "debug", target = "course_sink", skip(sink, units), fields(units = units.len()))]
pub async fn emit_course(sink: Arc<dyn CourseSink>, job_id: String, course_title: String, units: Vec<Unit>) -> usize {
  let mut accepted = 0;
  for unit in &units {
    match sink.store_unit(&job_id, &course_title, unit).await {
      Ok(()) => accepted += 1,
      Err(e) => warn!(target: "course_sink", %job_id, index = unit.index, error = %e, "Unit emission failed"),
    }
    for chunk in &unit.chunks {
      match sink.store_chunk(&job_id, unit.index, chunk).await {
        Ok(()) => accepted += 1,
        Err(e) => warn!(target: "course_sink", %job_id, index = unit.index, chunk = chunk.chunk_number, error = %e, "Chunk emission failed"),
      }
    }
  }
  accepted
}


#[cfg(test)]
mod tests {
  use super::testing::RecordingSink;
  use super::*;
  use crate::domain::{ChunkType, UnitType};
  use crate::fallback::filler_chunk;

  fn units() -> Vec<Unit> {
    (0..2)
      .map(|i| {
        let mut u = Unit::new(i, format!("Unit {i}"), UnitType::Concept);
        u.chunks = vec![filler_chunk(&u, ChunkType::Hook, 1), filler_chunk(&u, ChunkType::Recap, 2)];
        u
      })
      .collect()
  }

  #[tokio::test]
  async fn emits_every_unit_and_chunk() {
    let sink = Arc::new(RecordingSink::default());
    let accepted = emit_course(sink.clone(), "job".into(), "Course".into(), units()).await;
    assert_eq!(accepted, 6);
    assert_eq!(sink.unit_count(), 2);
    assert_eq!(sink.chunk_count(), 4);
  }

  #[tokio::test]
  async fn tracing_sink_refuses_units_that_were_never_expanded() {
    let raw = Unit::new(0, "Draft", UnitType::Concept);
    let err = TracingSink.store_unit("job", "Course", &raw).await.unwrap_err();
    assert!(matches!(err, PipelineError::SinkRejected(ref m) if m.contains("never expanded")));

    let mut expanded = units();
    for u in &mut expanded {
      u.validation_state = ValidationState::Expanded;
    }
    let accepted = emit_course(Arc::new(TracingSink), "job".into(), "Course".into(), expanded).await;
    assert_eq!(accepted, 6);
    let accepted = emit_course(Arc::new(TracingSink), "job".into(), "Course".into(), units()).await;
    assert_eq!(accepted, 4);
  }

  #[tokio::test]
  async fn rejected_records_do_not_stop_emission() {
    let sink = Arc::new(RecordingSink { reject_chunks: true, ..Default::default() });
    let accepted = emit_course(sink.clone(), "job".into(), "Course".into(), units()).await;
    assert_eq!(accepted, 2);
    assert_eq!(sink.unit_count(), 2);
  }
}
