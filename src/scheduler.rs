//! Progressive course scheduler.
//!
//! `generate_course` returns as soon as unit 0 is ready; the remaining units
//! are processed in the background in bounded batches and unlocked in place.
//!
//! Unit states:
//!   Pending -> Validating -> ChunksReady -> ImageAttached -> Unlocked
//!   any state -> FallbackReady (terminal, shown to callers as ready)
//!
//! Each job owns a pre-sized arena of unit slots. Workers never touch the job:
//! they return their unit, and the coordinating task writes slot `i` only.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::chunks::{assemble_chunks, distribute_vocabulary, generate_chunks, type_sequence};
use crate::completeness::ensure_complete;
use crate::context::{GenerationCounters, GenerationStats, PipelineContext};
use crate::domain::{ContentCategoryConfig, CourseSpec, Unit, UnitType};
use crate::expansion::expand;
use crate::fallback::fallback_unit;
use crate::outline::{classify, generate_outline, OutlineResult};
use crate::sink::emit_course;
use crate::util::fill_template;

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
  Pending,
  Validating,
  ChunksReady,
  ImageAttached,
  Unlocked,
  FallbackReady,
}

impl UnitState {
  pub fn is_ready(self) -> bool {
    matches!(self, UnitState::Unlocked | UnitState::FallbackReady)
  }
}

/// A unit as callers see it. `is_locked` is always false: pending units are
/// shown with their outline fields and enrich in place.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitView {
  #[serde(flatten)]
  pub unit: Unit,
  pub state: UnitState,
  pub is_locked: bool,
  pub used_fallback: bool,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub fallback_notes: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseArtifact {
  pub job_id: String,
  pub title: String,
  pub description: String,
  pub category: ContentCategoryConfig,
  pub targeted_concepts: BTreeSet<String>,
  pub units: Vec<UnitView>,
  pub complete: bool,
  pub stats: GenerationStats,
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
  #[serde(rename_all = "camelCase")]
  UnitReady { job_id: String, index: usize, unit: UnitView },
  #[serde(rename_all = "camelCase")]
  ThumbnailReady { job_id: String, index: usize, image_url: String },
  #[serde(rename_all = "camelCase")]
  CourseComplete { job_id: String, fallback_units: Vec<usize> },
}

struct UnitSlot {
  unit: Unit,
  state: UnitState,
  used_fallback: bool,
  notes: Vec<String>,
}

/// One generation job. Lives in the scheduler until evicted after completion.
pub struct CourseJob {
  pub id: String,
  pub category: ContentCategoryConfig,
  title: String,
  description: String,
  targeted_concepts: BTreeSet<String>,
  slots: Vec<UnitSlot>,
  thumbnails: HashMap<usize, String>,
  subscribers: Vec<mpsc::Sender<ProgressEvent>>,
  counters: Arc<GenerationCounters>,
  created_at: Instant,
  completed: bool,
}

impl CourseJob {
  fn view(&self, index: usize) -> Option<UnitView> {
    let slot = self.slots.get(index)?;
    Some(UnitView {
      unit: slot.unit.clone(),
      state: slot.state,
      is_locked: false,
      used_fallback: slot.used_fallback,
      fallback_notes: slot.notes.clone(),
    })
  }

  pub fn artifact(&self) -> CourseArtifact {
    CourseArtifact {
      job_id: self.id.clone(),
      title: self.title.clone(),
      description: self.description.clone(),
      category: self.category.clone(),
      targeted_concepts: self.targeted_concepts.clone(),
      units: (0..self.slots.len()).filter_map(|i| self.view(i)).collect(),
      complete: self.completed,
      stats: self.counters.snapshot(),
    }
  }

  fn fallback_units(&self) -> Vec<usize> {
    self.slots.iter().filter(|s| s.used_fallback).map(|s| s.unit.index).collect()
  }

  /// Fan an event out to live subscribers. Closed receivers are dropped; a full
  /// receiver misses this event but stays subscribed.
  fn notify(&mut self, event: ProgressEvent) {
    let job_id = self.id.clone();
    self.subscribers.retain(|tx| match tx.try_send(event.clone()) {
      Ok(()) => true,
      Err(TrySendError::Full(_)) => {
        warn!(target: "course", %job_id, "Subscriber lagging; event dropped");
        true
      }
      Err(TrySendError::Closed(_)) => false,
    });
  }

  fn set_state(&mut self, index: usize, state: UnitState) {
    if let Some(slot) = self.slots.get_mut(index) {
      debug!(target: "course", job_id = %self.id, index, from = ?slot.state, to = ?state, "Unit state");
      slot.state = state;
    }
  }

  /// Write a worker's result into its own slot and unlock it.
  fn apply(&mut self, index: usize, outcome: UnitOutcome) {
    let thumbnail = self.thumbnails.get(&index).cloned();
    let Some(slot) = self.slots.get_mut(index) else {
      error!(target: "course", job_id = %self.id, index, "Result for unknown slot");
      return;
    };
    let mut unit = outcome.unit;
    unit.index = index;
    slot.unit = unit;
    slot.used_fallback |= outcome.used_fallback;
    slot.notes.extend(outcome.notes);
    self.set_state(index, UnitState::ChunksReady);

    if let Some(url) = thumbnail {
      if let Some(slot) = self.slots.get_mut(index) {
        slot.unit.image_url = Some(url);
      }
      self.set_state(index, UnitState::ImageAttached);
    }

    let used_fallback = self.slots.get(index).map(|s| s.used_fallback).unwrap_or(true);
    self.set_state(index, if used_fallback { UnitState::FallbackReady } else { UnitState::Unlocked });

    if let Some(view) = self.view(index) {
      let ready = self.slots.iter().filter(|s| s.state.is_ready()).count();
      info!(target: "course", job_id = %self.id, index, state = ?view.state, chunks = view.unit.chunks.len(), ready, total = self.slots.len(), "Unit ready");
      let job_id = self.id.clone();
      self.notify(ProgressEvent::UnitReady { job_id, index, unit: view });
    }
  }

  fn attach_thumbnail(&mut self, index: usize, url: String) {
    self.thumbnails.insert(index, url.clone());
    if let Some(slot) = self.slots.get_mut(index) {
      slot.unit.image_url = Some(url.clone());
    }
    let job_id = self.id.clone();
    self.notify(ProgressEvent::ThumbnailReady { job_id, index, image_url: url });
  }
}

struct UnitOutcome {
  unit: Unit,
  used_fallback: bool,
  notes: Vec<String>,
}

/// Expand, completeness-check and chunk one unit.
async fn process_unit(ctx: PipelineContext, subject: String, unit: Unit, category: ContentCategoryConfig) -> UnitOutcome {
  let mut notes = Vec::new();

  let expanded = expand(&ctx, &subject, unit, &category).await;
  let mut used_fallback = expanded.used_fallback;
  notes.extend(expanded.note);
  let mut unit = expanded.unit;

  let mut curated = None;
  if category.enumerable_domain().is_some() && unit.unit_type == UnitType::Vocabulary {
    let checked = ensure_complete(&ctx, unit, &category).await;
    debug!(
      target: "course",
      index = checked.unit.index,
      observed = checked.report.observed_count,
      complete = checked.report.is_complete,
      regenerated = checked.regenerated,
      "Completeness checked"
    );
    used_fallback |= checked.used_fallback;
    notes.extend(checked.note);
    curated = checked.curated;
    unit = checked.unit;
  }

  let batch = generate_chunks(&ctx, &unit, &type_sequence(unit.unit_type)).await;
  used_fallback |= batch.fully_synthesized();
  notes.extend(batch.note);
  unit.chunks = batch.chunks;
  if let Some(listing) = curated {
    distribute_vocabulary(&mut unit.chunks, &listing.vocabulary_items());
  }

  UnitOutcome { unit, used_fallback, notes }
}

/// Oracle-free replacement for a unit whose worker died.
fn fallback_outcome(unit: &Unit, note: String) -> UnitOutcome {
  let mut unit = fallback_unit(unit);
  unit.chunks = assemble_chunks(&unit, &type_sequence(unit.unit_type), &[]).chunks;
  UnitOutcome { unit, used_fallback: true, notes: vec![note] }
}

/// Run one unit on its own task so a panic costs only that unit.
async fn run_unit(ctx: &PipelineContext, subject: &str, unit: Unit, category: &ContentCategoryConfig) -> UnitOutcome {
  let source = unit.clone();
  let worker = tokio::spawn(process_unit(ctx.clone(), subject.to_string(), unit, category.clone()));
  match worker.await {
    Ok(outcome) => outcome,
    Err(e) => {
      error!(target: "course", index = source.index, error = %e, "Unit worker failed; using fallback content");
      ctx.counters.record_fallback();
      fallback_outcome(&source, format!("unit worker failed: {e}"))
    }
  }
}

/// Thumbnails for every unit, in bounded batches. Failures are logged and skipped.
async fn run_thumbnails(ctx: PipelineContext, job: Arc<RwLock<CourseJob>>) {
  let prompts: Vec<(usize, String)> = {
    let j = job.read().await;
    j.slots
      .iter()
      .map(|s| (s.unit.index, fill_template(&ctx.config.prompts.image_template, &[("prompt", s.unit.image_prompt.as_str())])))
      .collect()
  };
  let batch_size = ctx.config.limits.image_batch_size.max(1);
  for group in prompts.chunks(batch_size) {
    let results = join_all(group.iter().map(|(i, prompt)| {
      let ctx = &ctx;
      async move { (*i, ctx.generate_image(prompt).await) }
    }))
    .await;
    let mut j = job.write().await;
    for (index, res) in results {
      match res {
        Ok(url) => j.attach_thumbnail(index, url),
        Err(e) => warn!(target: "course", job_id = %j.id, index, error = %e, "Thumbnail failed"),
      }
    }
  }
}

#[derive(Clone)]
pub struct Scheduler {
  ctx: PipelineContext,
  jobs: Arc<RwLock<HashMap<String, Arc<RwLock<CourseJob>>>>>,
}

impl Scheduler {
  pub fn new(ctx: PipelineContext) -> Self {
    Self { ctx, jobs: Arc::new(RwLock::new(HashMap::new())) }
  }

  pub fn context(&self) -> &PipelineContext {
    &self.ctx
  }

  /// Generate a course and return it as soon as unit 0 is ready.
  /// Never fails: every stage degrades to fallback content instead.
  pub async fn generate_course(&self, spec: CourseSpec) -> CourseArtifact {
    self.launch(spec, None).await
  }

  /// `generate_course` with a progress receiver that is registered before
  /// any unit or thumbnail can finish, so no event of the job is missed.
  pub async fn generate_course_with_progress(&self, spec: CourseSpec) -> (CourseArtifact, mpsc::Receiver<ProgressEvent>) {
    let (tx, rx) = mpsc::channel(self.ctx.config.limits.progress_channel_capacity.max(1));
    let artifact = self.launch(spec, Some(tx)).await;
    (artifact, rx)
  }

  #[instrument(level = "info", target = "course", skip_all, fields(subject = %spec.subject, level = spec.target_level.as_str()))]
  async fn launch(&self, spec: CourseSpec, watcher: Option<mpsc::Sender<ProgressEvent>>) -> CourseArtifact {
    let ctx = self.ctx.for_job();
    let job_id = Uuid::new_v4().to_string();
    let started = Instant::now();

    let category = classify(&spec, &ctx.config);
    info!(target: "course", %job_id, category = %category.category_tag, "Course requested");

    let OutlineResult { outline, used_fallback, note } = generate_outline(&ctx, &spec, &category).await;
    let slots: Vec<UnitSlot> = outline
      .units
      .into_iter()
      .map(|unit| UnitSlot { unit, state: UnitState::Pending, used_fallback, notes: note.iter().cloned().collect() })
      .collect();
    let unit_count = slots.len();

    let job = Arc::new(RwLock::new(CourseJob {
      id: job_id.clone(),
      category: category.clone(),
      title: outline.title,
      description: outline.description,
      targeted_concepts: outline.targeted_concepts,
      slots,
      thumbnails: HashMap::new(),
      subscribers: watcher.into_iter().collect(),
      counters: ctx.counters.clone(),
      created_at: started,
      completed: false,
    }));
    self.jobs.write().await.insert(job_id.clone(), job.clone());

    let thumbnails = tokio::spawn(run_thumbnails(ctx.clone(), job.clone()));

    // Unit 0 is on the critical path; nothing else starts until it is done.
    if unit_count > 0 {
      let first = {
        let mut j = job.write().await;
        j.set_state(0, UnitState::Validating);
        j.slots[0].unit.clone()
      };
      let outcome = run_unit(&ctx, &spec.subject, first, &category).await;
      job.write().await.apply(0, outcome);
    }

    let artifact = job.read().await.artifact();
    info!(target: "course", %job_id, units = unit_count, elapsed = ?started.elapsed(), "Partial course returned");

    tokio::spawn(self.clone().run_background(ctx, job, spec.subject, category, thumbnails));
    artifact
  }

  async fn run_background(
    self,
    ctx: PipelineContext,
    job: Arc<RwLock<CourseJob>>,
    subject: String,
    category: ContentCategoryConfig,
    thumbnails: JoinHandle<()>,
  ) {
    let unit_count = job.read().await.slots.len();
    let pending: Vec<usize> = (1..unit_count).collect();
    let batch_size = ctx.config.limits.unit_batch_size.max(1);

    for batch in pending.chunks(batch_size) {
      let units: Vec<Unit> = {
        let mut j = job.write().await;
        batch
          .iter()
          .map(|&i| {
            j.set_state(i, UnitState::Validating);
            j.slots[i].unit.clone()
          })
          .collect()
      };

      let mut running: FuturesUnordered<_> = units
        .into_iter()
        .map(|unit| {
          let (ctx, subject, category) = (&ctx, &subject, &category);
          async move {
            let index = unit.index;
            (index, run_unit(ctx, subject, unit, category).await)
          }
        })
        .collect();
      while let Some((index, outcome)) = running.next().await {
        job.write().await.apply(index, outcome);
      }
    }

    if let Err(e) = thumbnails.await {
      warn!(target: "course", error = %e, "Thumbnail task failed");
    }

    // Barrier: every slot is ready and no thumbnail write is outstanding.
    let (job_id, title, units) = {
      let mut j = job.write().await;
      j.completed = true;
      let job_id = j.id.clone();
      let fallback_units = j.fallback_units();
      info!(target: "course", %job_id, fallback_units = ?fallback_units, stats = ?j.counters.snapshot(), "Course complete");
      j.notify(ProgressEvent::CourseComplete { job_id: job_id.clone(), fallback_units });
      j.subscribers.clear();
      (job_id, j.title.clone(), j.slots.iter().map(|s| s.unit.clone()).collect::<Vec<_>>())
    };

    tokio::spawn(emit_course(ctx.sink.clone(), job_id, title, units));
    self.evict_completed().await;
  }

  /// Drop the oldest completed jobs beyond `max_retained_jobs`.
  async fn evict_completed(&self) {
    let max = self.ctx.config.limits.max_retained_jobs.max(1);
    let mut jobs = self.jobs.write().await;
    if jobs.len() <= max {
      return;
    }
    let mut done: Vec<(Instant, String)> = jobs
      .iter()
      .filter_map(|(id, job)| {
        let j = job.try_read().ok()?;
        j.completed.then(|| (j.created_at, id.clone()))
      })
      .collect();
    done.sort();
    let excess = jobs.len() - max;
    for (_, id) in done.into_iter().take(excess) {
      debug!(target: "course", job_id = %id, "Evicting completed job");
      jobs.remove(&id);
    }
  }

  async fn job(&self, job_id: &str) -> Option<Arc<RwLock<CourseJob>>> {
    self.jobs.read().await.get(job_id).cloned()
  }

  /// Subscribe to a job's progress. A completed job yields its completion event and closes.
  pub async fn on_unit_ready(&self, job_id: &str) -> Option<mpsc::Receiver<ProgressEvent>> {
    let job = self.job(job_id).await?;
    let (tx, rx) = mpsc::channel(self.ctx.config.limits.progress_channel_capacity.max(1));
    let mut j = job.write().await;
    if j.completed {
      let event = ProgressEvent::CourseComplete { job_id: j.id.clone(), fallback_units: j.fallback_units() };
      if tx.try_send(event).is_err() {
        warn!(target: "course", %job_id, "Could not deliver completion to late subscriber");
      }
    } else {
      j.subscribers.push(tx);
      debug!(target: "course", %job_id, subscribers = j.subscribers.len(), "Subscriber added");
    }
    Some(rx)
  }

  /// Drop every subscriber of a job. Background work carries on unobserved.
  pub async fn remove_callback(&self, job_id: &str) -> bool {
    match self.job(job_id).await {
      Some(job) => {
        job.write().await.subscribers.clear();
        true
      }
      None => false,
    }
  }

  pub async fn snapshot(&self, job_id: &str) -> Option<CourseArtifact> {
    let job = self.job(job_id).await?;
    let artifact = job.read().await.artifact();
    Some(artifact)
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use serde_json::json;

  use super::*;
  use crate::config::PipelineConfig;
  use crate::context::testing::scripted_with;
  use crate::domain::{ChunkType, TargetLevel};
  use crate::oracle::testing::ScriptedOracle;
  use crate::oracle::{ModelSet, OfflineOracle};
  use crate::sink::testing::RecordingSink;

  const TITLES: [&str; 5] = ["Light and life", "Chlorophyll", "Light reactions", "The Calvin cycle", "Review"];

  fn outline_reply() -> String {
    let types = ["introduction", "concept", "concept", "example", "summary"];
    let units: Vec<_> = TITLES
      .iter()
      .zip(types)
      .map(|(t, ty)| json!({"title": t, "type": ty, "description": "d", "keyPoints": ["Plants make food", "Light becomes sugar"]}))
      .collect();
    json!({"title": "Photosynthesis", "description": "How plants eat light", "units": units}).to_string()
  }

  fn expand_reply() -> String {
    json!({"content": vec!["photosynthesis"; 120].join(" ")}).to_string()
  }

  fn chunks_reply() -> String {
    json!({"chunks": [
      {"type": "hook", "title": "Why it matters", "content": "Plants feed the planet.", "keyPoint": "Plants make food"},
      {"type": "concept", "title": "Core idea", "content": "Light becomes sugar.", "keyPoint": "Light becomes sugar"},
      {"type": "example", "title": "A leaf", "content": "A leaf in the sun.", "keyPoint": "Leaves collect light"},
      {"type": "quiz", "title": "Check", "content": "Answer this.", "quizQuestions": [
        {"question": "What do plants turn light into?", "options": ["sugar", "salt", "sand", "steel"], "correctAnswer": "sugar", "explanation": "Photosynthesis makes sugar."}
      ]},
      {"type": "recap", "title": "Recap", "content": "Light to sugar.", "keyPoint": "Light becomes sugar"}
    ]})
    .to_string()
  }

  fn happy_oracle() -> ScriptedOracle {
    ScriptedOracle::new()
      .on("TASK: OUTLINE", &outline_reply())
      .on("TASK: EXPAND", &expand_reply())
      .on("TASK: CHUNKS", &chunks_reply())
  }

  fn scheduler_with(oracle: Arc<ScriptedOracle>, sink: Arc<RecordingSink>, config: PipelineConfig) -> Scheduler {
    Scheduler::new(scripted_with(oracle, sink, config))
  }

  fn photosynthesis() -> CourseSpec {
    CourseSpec::new("Photosynthesis", TargetLevel::Beginner)
  }

  async fn wait_complete(s: &Scheduler, job_id: &str) -> CourseArtifact {
    for _ in 0..10_000 {
      if let Some(a) = s.snapshot(job_id).await {
        if a.complete {
          return a;
        }
      }
      tokio::task::yield_now().await;
    }
    panic!("job {job_id} never completed");
  }

  #[tokio::test]
  async fn first_unit_is_unlocked_before_background_work_starts() {
    let oracle = Arc::new(happy_oracle());
    let s = scheduler_with(oracle.clone(), Arc::new(RecordingSink::default()), PipelineConfig::default());

    let artifact = s.generate_course(photosynthesis()).await;
    let calls = oracle.calls();

    assert!((4..=6).contains(&artifact.units.len()));
    assert_eq!(artifact.units[0].state, UnitState::Unlocked);
    assert_eq!(artifact.units[0].unit.chunks.len(), type_sequence(UnitType::Introduction).len());
    for view in &artifact.units[1..] {
      assert_eq!(view.state, UnitState::Pending);
      assert!(view.unit.chunks.is_empty());
      assert!(!view.is_locked);
    }
    for title in &TITLES[1..] {
      let marker = format!("Unit title: {title}\n");
      assert!(!calls.iter().any(|p| p.contains(&marker)), "{title} started before unit 0 returned");
    }

    let mut rx = s.on_unit_ready(&artifact.job_id).await.unwrap();
    loop {
      match rx.recv().await {
        Some(ProgressEvent::CourseComplete { fallback_units, .. }) => {
          assert!(fallback_units.is_empty());
          break;
        }
        Some(_) => continue,
        None => panic!("channel closed before completion"),
      }
    }

    let done = s.snapshot(&artifact.job_id).await.unwrap();
    assert!(done.complete);
    for view in &done.units {
      assert_eq!(view.state, UnitState::Unlocked);
      assert_eq!(view.unit.chunks.len(), type_sequence(view.unit.unit_type).len());
      assert!(view.unit.image_url.is_some());
    }
    assert!(done.stats.text_calls >= 1 + 2 * TITLES.len() as u64);
  }

  #[tokio::test]
  async fn offline_oracle_still_yields_a_complete_course() {
    let sink = Arc::new(RecordingSink::default());
    let ctx = PipelineContext::new(
      Arc::new(OfflineOracle),
      Arc::new(OfflineOracle),
      sink.clone(),
      PipelineConfig::default(),
      ModelSet::default(),
    );
    let s = Scheduler::new(ctx);

    let artifact = s.generate_course(photosynthesis()).await;
    assert_eq!(artifact.units.len(), 4);
    assert_eq!(artifact.units[0].state, UnitState::FallbackReady);
    assert!(artifact.units[0].state.is_ready());

    let done = wait_complete(&s, &artifact.job_id).await;
    for view in &done.units {
      assert!(view.used_fallback);
      assert_eq!(view.unit.chunks.len(), type_sequence(view.unit.unit_type).len());
      for chunk in view.unit.chunks.iter().filter(|c| c.chunk_type == ChunkType::Quiz) {
        assert!(chunk.quiz_questions.as_ref().unwrap().iter().all(|q| q.is_valid()));
      }
    }

    for _ in 0..1_000 {
      if sink.unit_count() == 4 {
        break;
      }
      tokio::task::yield_now().await;
    }
    assert_eq!(sink.unit_count(), 4);
  }

  #[tokio::test(start_paused = true)]
  async fn hung_outline_call_times_out_into_emergency_course() {
    let oracle = Arc::new(ScriptedOracle::new().hang("TASK: OUTLINE"));
    let s = scheduler_with(oracle, Arc::new(RecordingSink::default()), PipelineConfig::default());

    let started = tokio::time::Instant::now();
    let artifact = s.generate_course(photosynthesis()).await;
    assert!(started.elapsed() >= Duration::from_secs(45));
    assert_eq!(artifact.units.len(), 4);
    assert!(artifact.units[0].fallback_notes.iter().any(|n| n.contains("timed out")));
    wait_complete(&s, &artifact.job_id).await;
  }

  #[tokio::test]
  async fn panicking_worker_costs_only_its_unit() {
    let oracle = Arc::new(happy_oracle().panic_on("Unit title: Light reactions\n"));
    let s = scheduler_with(oracle, Arc::new(RecordingSink::default()), PipelineConfig::default());

    let artifact = s.generate_course(photosynthesis()).await;
    let done = wait_complete(&s, &artifact.job_id).await;

    let broken = &done.units[2];
    assert_eq!(broken.state, UnitState::FallbackReady);
    assert!(broken.fallback_notes.iter().any(|n| n.contains("worker failed")));
    assert_eq!(broken.unit.chunks.len(), type_sequence(UnitType::Concept).len());
    assert!(done.units.iter().enumerate().filter(|(i, _)| *i != 2).all(|(_, v)| v.state == UnitState::Unlocked));
  }

  #[tokio::test]
  async fn failed_thumbnail_leaves_unit_ready_without_image() {
    let oracle = Arc::new(happy_oracle().fail_images("\"Chlorophyll\""));
    let s = scheduler_with(oracle.clone(), Arc::new(RecordingSink::default()), PipelineConfig::default());

    let artifact = s.generate_course(photosynthesis()).await;
    let done = wait_complete(&s, &artifact.job_id).await;

    assert_eq!(oracle.image_calls(), TITLES.len());
    assert_eq!(done.units[1].state, UnitState::Unlocked);
    assert!(done.units[1].unit.image_url.is_none());
    assert!(done.units[0].unit.image_url.is_some());
    assert_eq!(done.stats.image_calls, TITLES.len() as u64);
  }

  #[tokio::test]
  async fn removed_subscribers_see_their_channel_close() {
    let s = scheduler_with(Arc::new(ScriptedOracle::new()), Arc::new(RecordingSink::default()), PipelineConfig::default());
    let artifact = s.generate_course(photosynthesis()).await;

    let mut rx = s.on_unit_ready(&artifact.job_id).await.unwrap();
    assert!(s.remove_callback(&artifact.job_id).await);
    while rx.recv().await.is_some() {}

    assert!(wait_complete(&s, &artifact.job_id).await.complete);
  }

  #[tokio::test]
  async fn unknown_jobs_are_reported_as_absent() {
    let s = scheduler_with(Arc::new(ScriptedOracle::new()), Arc::new(RecordingSink::default()), PipelineConfig::default());
    assert!(s.on_unit_ready("nope").await.is_none());
    assert!(s.snapshot("nope").await.is_none());
    assert!(!s.remove_callback("nope").await);
  }

  #[tokio::test]
  async fn late_subscribers_get_completion_and_old_jobs_are_evicted() {
    let mut config = PipelineConfig::default();
    config.limits.max_retained_jobs = 1;
    let s = scheduler_with(Arc::new(ScriptedOracle::new()), Arc::new(RecordingSink::default()), config);

    let first = s.generate_course(photosynthesis()).await;
    wait_complete(&s, &first.job_id).await;
    let mut rx = s.on_unit_ready(&first.job_id).await.unwrap();
    assert!(matches!(rx.recv().await, Some(ProgressEvent::CourseComplete { .. })));
    assert!(rx.recv().await.is_none());

    let second = s.generate_course(photosynthesis()).await;
    wait_complete(&s, &second.job_id).await;
    for _ in 0..1_000 {
      if s.snapshot(&first.job_id).await.is_none() {
        break;
      }
      tokio::task::yield_now().await;
    }
    assert!(s.snapshot(&first.job_id).await.is_none());
    assert!(s.snapshot(&second.job_id).await.is_some());
  }

  fn outline_of(titles: &[String]) -> String {
    let units: Vec<_> = titles
      .iter()
      .map(|t| json!({"title": t, "type": "concept", "description": "d", "keyPoints": ["Plants make food", "Light becomes sugar"]}))
      .collect();
    json!({"title": "Photosynthesis", "description": "How plants eat light", "units": units}).to_string()
  }

  #[tokio::test(start_paused = true)]
  async fn batches_bound_concurrency_and_slots_keep_their_own_units() {
    let titles: Vec<String> = (1..=8).map(|i| format!("U{i}")).collect();
    let mut config = PipelineConfig::default();
    config.general.max_units = 9;
    let mut oracle = ScriptedOracle::new()
      .on("TASK: OUTLINE", &outline_of(&titles))
      .on("TASK: EXPAND", &expand_reply())
      .on("TASK: CHUNKS", &chunks_reply())
      .image_delay(Duration::from_millis(20));
    // Later units answer faster, so they finish before earlier ones in the same batch.
    for (i, title) in titles.iter().enumerate() {
      oracle = oracle.delay(&format!("Unit title: {title}\n"), Duration::from_millis(10 * (titles.len() - i) as u64));
    }
    let oracle = Arc::new(oracle);
    let s = scheduler_with(oracle.clone(), Arc::new(RecordingSink::default()), config);

    let (artifact, mut rx) = s.generate_course_with_progress(photosynthesis()).await;
    assert_eq!(artifact.units.len(), titles.len());

    let mut order = Vec::new();
    while let Some(event) = rx.recv().await {
      match event {
        ProgressEvent::UnitReady { index, .. } => order.push(index),
        ProgressEvent::ThumbnailReady { .. } => {}
        ProgressEvent::CourseComplete { .. } => break,
      }
    }
    assert_eq!(order[0], 0);
    let pos = |i: usize| order.iter().position(|&x| x == i).unwrap();
    assert!(pos(5) < pos(1), "expected out-of-order completion, got {order:?}");
    let mut sorted = order.clone();
    sorted.sort_unstable();
    assert_ne!(order, sorted);
    assert_eq!(sorted, (0..titles.len()).collect::<Vec<_>>());

    assert_eq!(oracle.peak_text_in_flight(), 5);
    assert_eq!(oracle.peak_image_in_flight(), 3);

    let done = wait_complete(&s, &artifact.job_id).await;
    for (i, view) in done.units.iter().enumerate() {
      assert_eq!(view.unit.index, i);
      assert_eq!(view.unit.title, titles[i]);
      assert_eq!(view.state, UnitState::Unlocked);
    }
  }

  #[tokio::test(start_paused = true)]
  async fn progress_receiver_sees_thumbnails_that_land_before_the_first_unit() {
    let oracle = Arc::new(happy_oracle().delay("Unit title: Light and life\n", Duration::from_secs(1)));
    let s = scheduler_with(oracle, Arc::new(RecordingSink::default()), PipelineConfig::default());

    let (artifact, mut rx) = s.generate_course_with_progress(photosynthesis()).await;
    assert_eq!(artifact.units[0].state, UnitState::Unlocked);
    assert!(artifact.units[0].unit.image_url.is_some());

    let mut early = Vec::new();
    while let Ok(event) = rx.try_recv() {
      early.push(event);
    }
    assert!(early.iter().any(|e| matches!(e, ProgressEvent::ThumbnailReady { index: 0, .. })));
    assert!(early.iter().any(|e| matches!(e, ProgressEvent::UnitReady { index: 0, .. })));
    wait_complete(&s, &artifact.job_id).await;
  }

  #[tokio::test]
  async fn curated_listing_reaches_the_vocabulary_chunks() {
    let ctx = PipelineContext::new(
      Arc::new(OfflineOracle),
      Arc::new(OfflineOracle),
      Arc::new(RecordingSink::default()),
      PipelineConfig::default(),
      ModelSet::default(),
    );
    let s = Scheduler::new(ctx);

    let artifact = s.generate_course(CourseSpec::new("Learn the Greek alphabet", TargetLevel::Beginner)).await;
    let done = wait_complete(&s, &artifact.job_id).await;

    let vocab = done.units.iter().find(|v| v.unit.unit_type == UnitType::Vocabulary).unwrap();
    assert_eq!(vocab.state, UnitState::FallbackReady);
    let items: Vec<_> = vocab.unit.chunks.iter().filter_map(|c| c.vocabulary_items.as_ref()).flatten().collect();
    assert_eq!(items.len(), 24);
    assert_eq!(vocab.unit.chunks.len(), type_sequence(UnitType::Vocabulary).len());
  }
}
