//! Chunk generation: split one unit into an exact, typed sequence of sub-lessons.
//!
//! The requested type sequence is the contract. Whatever the oracle returns is
//! mapped onto it by position; positions it did not fill are synthesized, so
//! the result always has exactly `sequence.len()` chunks.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::completeness::table_entries;
use crate::context::PipelineContext;
use crate::domain::{Chunk, ChunkType, QuizQuestion, Unit, UnitType, VocabularyItem};
use crate::error::PipelineError;
use crate::fallback::{distractor_statements, filler_chunk};
use crate::oracle::OracleRequest;
use crate::parser::{get_array, get_bool, get_list, get_str, CHUNKS_SHAPE};
use crate::pinyin::romanize_han;
use crate::util::{contains_phrase, fill_template, stable_seed};

const CHUNK_TEMPERATURE: f32 = 0.6;

const GENERIC_OPTIONS: [&str; 4] = [
  "None of these",
  "Not covered in this unit",
  "It cannot be determined",
  "Something else entirely",
];

const VAGUE_REFERENCES: &[&str] = &[
  "the word", "this word", "the term", "this term", "the phrase", "this phrase",
  "the character", "this character", "the letter", "this letter", "the sentence",
  "this sentence", "the expression", "this expression",
];

const CONNECTORS: &[&str] = &[
  "of", "the", "a", "an", "to", "for", "with", "and", "or", "is", "are", "was", "were", "in",
  "on", "by", "from", "as", "at", "that", "which", "means", "between", "than", "like",
];

/// Chunk types a unit of the given type is split into.
pub fn type_sequence(unit_type: UnitType) -> Vec<ChunkType> {
  use ChunkType::*;
  match unit_type {
    UnitType::Introduction => vec![Hook, Concept, Example, Recap],
    UnitType::Concept => vec![Hook, Concept, Example, Quiz, Recap],
    UnitType::Vocabulary => vec![Hook, Vocabulary, Vocabulary, Practice, Quiz, Recap],
    UnitType::Example => vec![Hook, Example, Example, Quiz, Recap],
    UnitType::Practice => vec![Hook, Practice, Practice, Quiz, Recap],
    UnitType::Summary => vec![Recap, Quiz, Recap],
  }
}

#[derive(Clone, Debug, Default)]
pub struct ChunkBatch {
  pub chunks: Vec<Chunk>,
  /// Positions filled locally rather than from the oracle.
  pub synthesized: usize,
  pub dropped_questions: usize,
  pub note: Option<String>,
}

impl ChunkBatch {
  pub fn fully_synthesized(&self) -> bool {
    !self.chunks.is_empty() && self.synthesized == self.chunks.len()
  }
}

#[instrument(level = "debug", target = "course", skip_all, fields(index = unit.index, requested = sequence.len()))]
pub async fn generate_chunks(ctx: &PipelineContext, unit: &Unit, sequence: &[ChunkType]) -> ChunkBatch {
  if sequence.is_empty() {
    return ChunkBatch::default();
  }

  let prompts = &ctx.config.prompts;
  let types: Vec<&str> = sequence.iter().map(|t| t.as_str()).collect();
  let prompt = fill_template(
    &prompts.chunks_user_template,
    &[
      ("title", unit.title.as_str()),
      ("content", unit.content.as_str()),
      ("key_points", unit.key_points_or_title().join("; ").as_str()),
      ("count", sequence.len().to_string().as_str()),
      ("types", types.join(", ").as_str()),
    ],
  );
  let req = OracleRequest {
    system: prompts.chunks_system.clone(),
    prompt,
    model: ctx.models.fast.clone(),
    temperature: CHUNK_TEMPERATURE,
    max_tokens: ctx.config.limits.chunk_max_tokens,
  };

  let (raw_chunks, mut note) = match ctx.complete(req).await {
    Ok(raw) => match ctx.extract(&raw, &CHUNKS_SHAPE) {
      Ok(ex) => (get_array(&ex.value, &["chunks"]).cloned().unwrap_or_default(), None),
      Err(e) => (Vec::new(), Some(PipelineError::MalformedChunkOutput(e.to_string()).to_string())),
    },
    Err(e) => (Vec::new(), Some(e.to_string())),
  };
  if note.is_none() && raw_chunks.len() < sequence.len() {
    note = Some(
      PipelineError::MalformedChunkOutput(format!("{} of {} chunks returned", raw_chunks.len(), sequence.len()))
        .to_string(),
    );
  }

  let mut batch = assemble_chunks(unit, sequence, &raw_chunks);
  if batch.dropped_questions > 0 {
    ctx.counters.record_dropped_questions(batch.dropped_questions);
  }
  if batch.synthesized > 0 {
    ctx.counters.record_fallback();
    debug!(target: "course", index = unit.index, synthesized = batch.synthesized, "Filled missing chunk positions");
  }
  batch.note = note;
  batch
}

/// Map parsed oracle chunks onto `sequence` by position, repairing and filling as needed.
pub fn assemble_chunks(unit: &Unit, sequence: &[ChunkType], raw: &[Value]) -> ChunkBatch {
  let table_items = vocabulary_from_table(&unit.content);
  let vocab_slots = sequence.iter().filter(|t| **t == ChunkType::Vocabulary).count();
  let mut vocab_seen = 0;

  let mut chunks: Vec<Chunk> = Vec::with_capacity(sequence.len());
  let mut synthesized = 0;
  let mut dropped_questions = 0;

  for (i, &chunk_type) in sequence.iter().enumerate() {
    let number = i + 1;
    let source = raw.get(i);
    let mut chunk = match source.and_then(|v| chunk_from_value(unit, v, chunk_type, number)) {
      Some(c) => c,
      None => {
        synthesized += 1;
        filler_chunk(unit, chunk_type, number)
      }
    };

    match chunk_type {
      ChunkType::Vocabulary => {
        let mut items = source.map(parse_vocabulary).unwrap_or_default();
        if items.is_empty() {
          items = share(&table_items, vocab_seen, vocab_slots).to_vec();
        }
        vocab_seen += 1;
        chunk.vocabulary_items = if items.is_empty() { None } else { Some(items) };
      }
      ChunkType::Quiz => {
        let pool = option_pool(unit, &chunks);
        let mut questions = Vec::new();
        if let Some(v) = source {
          let (kept, dropped) = parse_questions(unit, v, &pool);
          questions = kept;
          dropped_questions += dropped;
        }
        if questions.is_empty() {
          questions = synthesize_questions(unit, &chunks);
        }
        chunk.quiz_questions = Some(questions);
      }
      _ => {}
    }
    chunks.push(chunk);
  }

  ChunkBatch { chunks, synthesized, dropped_questions, note: None }
}

/// The `slot`-th of `slots` contiguous, near-equal slices of `items`.
fn share<T>(items: &[T], slot: usize, slots: usize) -> &[T] {
  let n = items.len();
  let slots = slots.max(1);
  &items[n * slot / slots..n * (slot + 1) / slots]
}

/// Overwrite the items of every vocabulary chunk with `items`, split evenly
/// across them in order. Used when a curated listing replaces the unit text.
pub fn distribute_vocabulary(chunks: &mut [Chunk], items: &[VocabularyItem]) {
  let slots = chunks.iter().filter(|c| c.chunk_type == ChunkType::Vocabulary).count();
  for (seen, chunk) in chunks.iter_mut().filter(|c| c.chunk_type == ChunkType::Vocabulary).enumerate() {
    let part = share(items, seen, slots);
    chunk.vocabulary_items = if part.is_empty() { None } else { Some(part.to_vec()) };
  }
}

fn chunk_from_value(unit: &Unit, v: &Value, chunk_type: ChunkType, number: usize) -> Option<Chunk> {
  let content = get_str(v, &["content", "text", "body"])?;
  let filler = filler_chunk(unit, chunk_type, number);
  let declared = get_str(v, &["type", "chunkType"]).unwrap_or_default();
  if !declared.is_empty() && declared.to_lowercase() != chunk_type.as_str() {
    debug!(target: "course", index = unit.index, position = number, %declared, forced = chunk_type.as_str(), "Chunk type overridden by position");
  }
  Some(Chunk {
    chunk_number: number,
    title: get_str(v, &["title", "heading"]).unwrap_or(filler.title),
    content,
    chunk_type,
    key_point: get_str(v, &["keyPoint", "key_point"]).unwrap_or(filler.key_point),
    quiz_questions: None,
    vocabulary_items: None,
  })
}

fn fill_romanization(native: &str, romanized: Option<String>) -> String {
  romanized
    .filter(|r| !r.trim().is_empty())
    .or_else(|| romanize_han(native))
    .unwrap_or_default()
}

fn parse_vocabulary(v: &Value) -> Vec<VocabularyItem> {
  let Some(items) = get_array(v, &["vocabularyItems", "vocabulary", "items"]) else {
    return Vec::new();
  };
  items
    .iter()
    .filter_map(|item| {
      let native = get_str(item, &["native", "word", "term", "character"])?;
      let romanized = fill_romanization(&native, get_str(item, &["romanized", "romanization", "pinyin", "transliteration"]));
      Some(VocabularyItem {
        pronunciation: get_str(item, &["pronunciation"]).unwrap_or_else(|| romanized.clone()),
        meaning: get_str(item, &["meaning", "translation", "english", "definition"]).unwrap_or_default(),
        image_prompt: get_str(item, &["imagePrompt", "image_prompt"]),
        is_visual_concept: get_bool(item, &["isVisualConcept", "visual"]).unwrap_or(false),
        romanized,
        native,
      })
    })
    .collect()
}

/// Vocabulary items read from the rows of a markdown table in the unit text.
fn vocabulary_from_table(content: &str) -> Vec<VocabularyItem> {
  table_entries(content)
    .into_iter()
    .filter_map(|cells| {
      let native = cells.first().filter(|c| !c.is_empty())?.clone();
      let romanized = fill_romanization(&native, cells.get(1).cloned());
      let meaning = cells.get(2).or(cells.get(1)).cloned().unwrap_or_default();
      Some(VocabularyItem {
        pronunciation: romanized.clone(),
        romanized,
        meaning,
        image_prompt: None,
        is_visual_concept: false,
        native,
      })
    })
    .collect()
}

// --- quiz repair ---

/// Candidate padding options: earlier vocabulary meanings, then the unit's key points.
fn option_pool(unit: &Unit, prior: &[Chunk]) -> Vec<String> {
  let mut pool: Vec<String> = prior
    .iter()
    .flat_map(|c| c.vocabulary_items.iter().flatten())
    .map(|v| v.meaning.clone())
    .filter(|m| !m.is_empty())
    .collect();
  pool.extend(unit.key_points.iter().map(|k| k.trim().to_string()).filter(|k| !k.is_empty()));
  pool
}

fn parse_questions(unit: &Unit, v: &Value, pool: &[String]) -> (Vec<QuizQuestion>, usize) {
  let Some(items) = get_array(v, &["quizQuestions", "questions", "quiz"]) else {
    return (Vec::new(), 0);
  };
  let mut kept = Vec::new();
  let mut dropped = 0;
  for item in items {
    let res = repair_question(
      &unit.title,
      get_str(item, &["question", "prompt", "q"]).unwrap_or_default(),
      get_list(item, &["options", "choices", "answers"]),
      get_str(item, &["correctAnswer", "correct_answer", "answer", "correct"]).unwrap_or_default(),
      get_str(item, &["explanation", "rationale"]).unwrap_or_default(),
      pool,
    );
    match res {
      Ok(q) => kept.push(q),
      Err(e) => {
        dropped += 1;
        warn!(target: "course", index = unit.index, error = %e, "Dropped quiz question");
      }
    }
  }
  (kept, dropped)
}

/// "B) text", "(b) text", "C. text" → "text". Other strings pass through trimmed.
fn strip_option_label(s: &str) -> String {
  let t = s.trim();
  let rest = t.strip_prefix('(').unwrap_or(t);
  let mut chars = rest.chars();
  if let (Some(letter), Some(sep), Some(space)) = (chars.next(), chars.next(), chars.next()) {
    if matches!(letter, 'A'..='D' | 'a'..='d') && matches!(sep, ')' | '.' | ':') && space.is_whitespace() {
      return chars.as_str().trim().to_string();
    }
  }
  t.to_string()
}

/// "B", "b)", "(C)", "Option D" → option index.
fn letter_index(s: &str) -> Option<usize> {
  let t = s.trim();
  let t = t.strip_prefix("Option ").or_else(|| t.strip_prefix("option ")).unwrap_or(t);
  let t = t.trim_start_matches('(').trim_end_matches([')', '.', ':']).trim();
  let mut chars = t.chars();
  match (chars.next(), chars.next()) {
    (Some(c @ ('A'..='D' | 'a'..='d')), None) => Some((c.to_ascii_lowercase() as u8 - b'a') as usize),
    _ => None,
  }
}

fn fit_options(options: Vec<String>, answer: &str, pool: &[String]) -> Vec<String> {
  let mut others = 0;
  let mut out: Vec<String> = options
    .into_iter()
    .filter(|o| {
      if o == answer {
        return true;
      }
      others += 1;
      others <= 3
    })
    .collect();
  let candidates = pool.iter().map(String::as_str).chain(GENERIC_OPTIONS);
  for c in candidates {
    if out.len() >= 4 {
      break;
    }
    if !out.iter().any(|o| o.eq_ignore_ascii_case(c)) {
      out.push(c.to_string());
    }
  }
  out
}

fn has_quoted_item(stem: &str) -> bool {
  stem.matches('"').count() >= 2 || stem.contains('\u{201C}') || stem.contains('«') || stem.contains('「')
}

/// Whether a lowercased stem already names `answer` as a word of its own.
/// One- and two-letter answers (romanized kana, letters) collide with English
/// words, so for those only a quoted mention counts.
fn names_answer(lower_stem: &str, answer: &str) -> bool {
  answer.chars().count() > 2 && contains_phrase(lower_stem, &answer.to_ascii_lowercase())
}

/// Make the stem name the item under test.
pub fn repair_stem(title: &str, stem: &str, answer: &str) -> String {
  let mut stem = stem.trim().to_string();
  if stem.is_empty() {
    return format!("In \"{title}\", which option matches \"{answer}\"?");
  }

  let lower = stem.to_ascii_lowercase();
  if !has_quoted_item(&stem) && !names_answer(&lower, answer) {
    let hit = VAGUE_REFERENCES.iter().find_map(|phrase| {
      lower.match_indices(phrase).map(|(pos, _)| pos + phrase.len()).find(|end| {
        !stem[*end..].chars().next().map(|c| c.is_alphanumeric()).unwrap_or(false)
      })
    });
    if let Some(end) = hit {
      stem = format!("{} \"{}\"{}", &stem[..end], answer, &stem[end..]);
    }
  }

  let body = stem.trim_end_matches(|c: char| matches!(c, '?' | ':' | '.' | '…') || c.is_whitespace());
  let cut_off = stem.ends_with("...") || stem.ends_with('…') || stem.ends_with(':');
  let last = body.split_whitespace().last().unwrap_or("").to_ascii_lowercase();
  if cut_off || CONNECTORS.contains(&last.as_str()) {
    return format!("In \"{title}\", which option matches \"{answer}\"?");
  }
  stem
}

/// Normalize one oracle question. Fails when the answer is not among the options.
pub fn repair_question(
  title: &str,
  question: String,
  options: Vec<String>,
  correct: String,
  explanation: String,
  pool: &[String],
) -> Result<QuizQuestion, PipelineError> {
  let mut opts: Vec<String> = Vec::new();
  for o in options.iter().map(|o| strip_option_label(o)) {
    if !o.is_empty() && !opts.contains(&o) {
      opts.push(o);
    }
  }

  let mut answer = strip_option_label(&correct);
  if !opts.contains(&answer) {
    if let Some(i) = letter_index(&correct).filter(|i| *i < opts.len()) {
      answer = opts[i].clone();
    } else if let Some(o) = opts.iter().find(|o| o.eq_ignore_ascii_case(&answer)) {
      answer = o.clone();
    }
  }
  if answer.is_empty() || !opts.contains(&answer) {
    return Err(PipelineError::InvalidQuizAnswer { question, answer: correct });
  }

  let repaired = QuizQuestion {
    question: repair_stem(title, &question, &answer),
    options: fit_options(opts, &answer, pool),
    correct_answer: answer,
    explanation,
  };
  if !repaired.is_valid() {
    return Err(PipelineError::InvalidQuizAnswer { question, answer: correct });
  }
  Ok(repaired)
}

// --- quiz synthesis ---

fn seeded_question(title: &str, question: String, correct: String, distractors: Vec<String>, explanation: String) -> QuizQuestion {
  let mut options = vec![correct.clone()];
  for d in distractors.into_iter().chain(GENERIC_OPTIONS.iter().map(|s| s.to_string())) {
    if options.len() == 4 {
      break;
    }
    if !options.iter().any(|o| o.eq_ignore_ascii_case(&d)) {
      options.push(d);
    }
  }
  let mut rng = StdRng::seed_from_u64(stable_seed(&[title, &question]));
  options.shuffle(&mut rng);
  QuizQuestion { question, options, correct_answer: correct, explanation }
}

/// Questions built only from what earlier chunks introduced (the unit's key
/// points when nothing precedes the quiz).
pub fn synthesize_questions(unit: &Unit, prior: &[Chunk]) -> Vec<QuizQuestion> {
  let title = if unit.title.trim().is_empty() { "this unit" } else { unit.title.trim() };
  let vocab: Vec<&VocabularyItem> = prior
    .iter()
    .flat_map(|c| c.vocabulary_items.iter().flatten())
    .filter(|v| !v.native.is_empty() && !v.meaning.is_empty())
    .collect();

  let mut points: Vec<String> = Vec::new();
  for c in prior.iter().filter(|c| c.chunk_type != ChunkType::Quiz) {
    let kp = c.key_point.trim();
    if !kp.is_empty() && !points.iter().any(|p| p == kp) {
      points.push(kp.to_string());
    }
  }
  if points.is_empty() && vocab.is_empty() {
    points = unit.key_points_or_title();
  }

  let mut out = Vec::new();
  if let Some(item) = vocab.first() {
    let others: Vec<String> = vocab
      .iter()
      .map(|v| v.meaning.clone())
      .filter(|m| m != &item.meaning)
      .collect();
    let explanation = if item.romanized.is_empty() {
      format!("\"{}\" means {}.", item.native, item.meaning)
    } else {
      format!("\"{}\" ({}) means {}.", item.native, item.romanized, item.meaning)
    };
    out.push(seeded_question(
      title,
      format!("In \"{title}\", what does \"{}\" mean?", item.native),
      item.meaning.clone(),
      others,
      explanation,
    ));
  }
  if let Some(point) = points.last().filter(|p| !p.is_empty()) {
    out.push(seeded_question(
      title,
      format!("Which statement about \"{title}\" was covered in this unit?"),
      point.clone(),
      distractor_statements(title).to_vec(),
      format!("This unit covered: {point}."),
    ));
  }
  if out.is_empty() {
    out.push(seeded_question(
      title,
      "Which topic does this unit cover?".to_string(),
      title.to_string(),
      distractor_statements(title).to_vec(),
      format!("This unit is about {title}."),
    ));
  }
  out
}
