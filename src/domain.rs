//! Domain models: the course request, its category, the outline and its units,
//! and the typed chunks a unit is decomposed into.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Learner level requested for a course.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TargetLevel {
  #[default]
  Beginner,
  Intermediate,
  Advanced,
}

impl TargetLevel {
  pub fn as_str(&self) -> &'static str {
    match self {
      TargetLevel::Beginner => "beginner",
      TargetLevel::Intermediate => "intermediate",
      TargetLevel::Advanced => "advanced",
    }
  }

  /// Lenient parse; anything unrecognized is treated as beginner.
  pub fn from_label(s: &str) -> Self {
    match s.trim().to_lowercase().as_str() {
      "intermediate" | "medium" | "b1" | "b2" => TargetLevel::Intermediate,
      "advanced" | "expert" | "c1" | "c2" => TargetLevel::Advanced,
      _ => TargetLevel::Beginner,
    }
  }
}

fn level_from_label<'de, D>(de: D) -> Result<TargetLevel, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let s = String::deserialize(de)?;
  Ok(TargetLevel::from_label(&s))
}

/// Immutable course request.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseSpec {
  pub subject: String,
  #[serde(default, alias = "level", deserialize_with = "level_from_label")]
  pub target_level: TargetLevel,
  #[serde(default)] pub user_profile: String,
  #[serde(default)] pub system_guidance: String,
}

#[cfg(test)]
impl CourseSpec {
  pub fn new(subject: impl Into<String>, target_level: TargetLevel) -> Self {
    Self {
      subject: subject.into(),
      target_level,
      user_profile: String::new(),
      system_guidance: String::new(),
    }
  }
}

/// What kind of material the course covers. Resolved once per job.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentCategory {
  General,
  /// A natural language: vocabulary-heavy but not a closed set.
  Language { language: String },
  /// A closed, real-world listing with a known cardinality (an alphabet, a syllabary).
  Enumerable { domain: String },
}

/// Structural shape derived from the category.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentCategoryConfig {
  pub category_tag: String,
  pub category: ContentCategory,
  pub min_units: usize,
  pub max_units: usize,
  pub unit_style_hints: String,
  /// Inclusive item range a complete listing must fall in (enumerable domains only).
  #[serde(default)]
  pub expected_items: Option<(usize, usize)>,
}

impl ContentCategoryConfig {
  pub fn enumerable_domain(&self) -> Option<&str> {
    match &self.category {
      ContentCategory::Enumerable { domain } => Some(domain.as_str()),
      _ => None,
    }
  }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum UnitType {
  Introduction,
  Concept,
  Vocabulary,
  Example,
  Practice,
  Summary,
}

impl UnitType {
  pub fn as_str(&self) -> &'static str {
    match self {
      UnitType::Introduction => "introduction",
      UnitType::Concept => "concept",
      UnitType::Vocabulary => "vocabulary",
      UnitType::Example => "example",
      UnitType::Practice => "practice",
      UnitType::Summary => "summary",
    }
  }

  /// Map whatever label the oracle used onto a known unit type.
  pub fn from_label(s: &str) -> Self {
    let s = s.trim().to_lowercase();
    match s.as_str() {
      "introduction" | "intro" | "welcome" | "overview" | "hook" => UnitType::Introduction,
      "vocabulary" | "vocab" | "alphabet" | "characters" | "letters" | "reference" | "listing"
      | "words" | "glossary" => UnitType::Vocabulary,
      "example" | "examples" | "case_study" | "case study" | "demonstration" => UnitType::Example,
      "practice" | "exercise" | "exercises" | "application" | "drill" | "activity" => UnitType::Practice,
      "summary" | "review" | "recap" | "conclusion" | "wrap-up" | "wrap_up" => UnitType::Summary,
      _ => UnitType::Concept,
    }
  }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ValidationState {
  #[default]
  Raw,
  Expanded,
}

/// One top-level section of a course. Addressed by `index` for its whole life.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Unit {
  pub index: usize,
  pub title: String,
  pub description: String,
  pub content: String,
  pub key_points: Vec<String>,
  pub unit_type: UnitType,
  pub estimated_minutes: u32,
  pub image_prompt: String,
  pub validation_state: ValidationState,
  #[serde(default)] pub image_url: Option<String>,
  #[serde(default)] pub chunks: Vec<Chunk>,
}

impl Unit {
  pub fn new(index: usize, title: impl Into<String>, unit_type: UnitType) -> Self {
    let title = title.into();
    Self {
      index,
      image_prompt: format!("A clean, friendly illustration for a lesson titled \"{}\"", title),
      title,
      description: String::new(),
      content: String::new(),
      key_points: Vec::new(),
      unit_type,
      estimated_minutes: 10,
      validation_state: ValidationState::Raw,
      image_url: None,
      chunks: Vec::new(),
    }
  }

  /// Key points, or the title when the oracle supplied none.
  pub fn key_points_or_title(&self) -> Vec<String> {
    let kp: Vec<String> = self
      .key_points
      .iter()
      .map(|k| k.trim().to_string())
      .filter(|k| !k.is_empty())
      .collect();
    if kp.is_empty() { vec![self.title.clone()] } else { kp }
  }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseOutline {
  pub title: String,
  pub description: String,
  pub units: Vec<Unit>,
  pub targeted_concepts: BTreeSet<String>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
  Hook,
  Concept,
  Vocabulary,
  Example,
  Quiz,
  Practice,
  Recap,
}

impl ChunkType {
  pub fn as_str(&self) -> &'static str {
    match self {
      ChunkType::Hook => "hook",
      ChunkType::Concept => "concept",
      ChunkType::Vocabulary => "vocabulary",
      ChunkType::Example => "example",
      ChunkType::Quiz => "quiz",
      ChunkType::Practice => "practice",
      ChunkType::Recap => "recap",
    }
  }
}

/// A bite-sized, typed sub-lesson within a unit.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
  pub chunk_number: usize,
  pub title: String,
  pub content: String,
  pub chunk_type: ChunkType,
  pub key_point: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub quiz_questions: Option<Vec<QuizQuestion>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub vocabulary_items: Option<Vec<VocabularyItem>>,
}

/// Multiple-choice question. Always four options, one of which is `correct_answer`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QuizQuestion {
  pub question: String,
  pub options: Vec<String>,
  pub correct_answer: String,
  pub explanation: String,
}

impl QuizQuestion {
  pub fn is_valid(&self) -> bool {
    self.options.len() == 4 && self.options.iter().any(|o| o == &self.correct_answer)
  }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VocabularyItem {
  pub native: String,
  pub romanized: String,
  pub pronunciation: String,
  pub meaning: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub image_prompt: Option<String>,
  #[serde(default)]
  pub is_visual_concept: bool,
}
