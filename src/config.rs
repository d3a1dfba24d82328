//! Loading pipeline configuration (prompts, limits, category tables) from TOML.
//!
//! Every section is optional; missing sections fall back to the defaults below.
//! Expected item ranges for enumerable domains are heuristic, so they live
//! here rather than at the call sites.

use std::time::Duration;

use serde::Deserialize;
use tracing::{error, info, warn};

use crate::fallback::curated_listing;

#[derive(Clone, Debug, Deserialize)]
pub struct PipelineConfig {
  #[serde(default)]
  pub prompts: Prompts,
  #[serde(default)]
  pub limits: Limits,
  #[serde(default = "default_general")]
  pub general: UnitBounds,
  #[serde(default = "default_language")]
  pub language: LanguageCfg,
  #[serde(default = "default_categories")]
  pub categories: Vec<CategoryCfg>,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      prompts: Prompts::default(),
      limits: Limits::default(),
      general: default_general(),
      language: default_language(),
      categories: default_categories(),
    }
  }
}

#[derive(Clone, Debug, Deserialize)]
pub struct UnitBounds {
  pub min_units: usize,
  pub max_units: usize,
  #[serde(default)]
  pub unit_style_hints: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct LanguageCfg {
  pub min_units: usize,
  pub max_units: usize,
  #[serde(default)]
  pub unit_style_hints: String,
  /// Subject keywords naming a language ("spanish", "mandarin", ...).
  #[serde(default)]
  pub keywords: Vec<String>,
}

/// Enumerable domain entry. `tag` doubles as the curated listing key.
#[derive(Clone, Debug, Deserialize)]
pub struct CategoryCfg {
  pub tag: String,
  pub keywords: Vec<String>,
  pub min_units: usize,
  pub max_units: usize,
  #[serde(default)]
  pub unit_style_hints: String,
  pub expected_min_items: usize,
  pub expected_max_items: usize,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Limits {
  pub unit_batch_size: usize,
  pub image_batch_size: usize,
  pub min_unit_words: usize,
  pub oracle_timeout_secs: u64,
  pub outline_max_tokens: u32,
  pub unit_max_tokens: u32,
  pub chunk_max_tokens: u32,
  pub max_retained_jobs: usize,
  pub progress_channel_capacity: usize,
  pub image_size: String,
}

impl Default for Limits {
  fn default() -> Self {
    Self {
      unit_batch_size: 5,
      image_batch_size: 3,
      min_unit_words: 80,
      oracle_timeout_secs: 45,
      outline_max_tokens: 2000,
      unit_max_tokens: 1500,
      chunk_max_tokens: 3000,
      max_retained_jobs: 64,
      progress_channel_capacity: 32,
      image_size: "512x512".into(),
    }
  }
}

impl Limits {
  pub fn oracle_timeout(&self) -> Duration {
    Duration::from_secs(self.oracle_timeout_secs.max(1))
  }
}

/// Prompt templates. `{key}` placeholders are filled with `util::fill_template`.
/// Each user template starts with a `TASK:` line naming the request kind.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  pub outline_system: String,
  pub outline_user_template: String,
  pub expand_system: String,
  pub expand_user_template: String,
  pub listing_system: String,
  pub listing_user_template: String,
  pub chunks_system: String,
  pub chunks_user_template: String,
  pub image_template: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      outline_system: "You are a curriculum designer. Respond ONLY with strict JSON.".into(),
      outline_user_template: "TASK: OUTLINE\nSubject: {subject}\nLevel: {level}\nLearner profile: {profile}\nGuidance: {guidance}\nStyle: {style}\n\nDesign a course with between {min_units} and {max_units} units. Return JSON:\n{\"title\": string, \"description\": string, \"targetedConcepts\": [string], \"units\": [{\"title\": string, \"description\": string, \"type\": \"introduction|concept|vocabulary|example|practice|summary\", \"content\": string, \"keyPoints\": [string], \"estimatedMinutes\": number, \"imagePrompt\": string}]}".into(),
      expand_system: "You write complete, self-contained lesson text. Respond ONLY with strict JSON.".into(),
      expand_user_template: "TASK: EXPAND\nCourse subject: {subject}\nUnit title: {title}\nUnit description: {description}\nKey points: {key_points}\nStyle: {style}\n\nWrite at least {min_words} words of lesson content covering every key point. Return JSON {\"content\": string, \"keyPoints\": [string]}.".into(),
      listing_system: "You produce exhaustive reference listings. Never abbreviate, never skip entries. Respond ONLY with strict JSON.".into(),
      listing_user_template: "TASK: LISTING\nDomain: {domain}\nUnit title: {title}\n\nList EVERY item of the domain ({min_items} to {max_items} items) as a markdown table with columns | Item | Romanization | Meaning |, one row per item. Return JSON {\"content\": string}.".into(),
      chunks_system: "You split a lesson into bite-sized typed chunks. Respond ONLY with strict JSON.".into(),
      chunks_user_template: "TASK: CHUNKS\nUnit title: {title}\nUnit content: {content}\nKey points: {key_points}\n\nReturn exactly {count} chunks in this exact type order: {types}.\nQuiz chunks must only test material introduced in earlier chunks, with exactly 4 options per question and correctAnswer copied verbatim from options.\nReturn JSON {\"chunks\": [{\"type\": string, \"title\": string, \"content\": string, \"keyPoint\": string, \"quizQuestions\": [{\"question\": string, \"options\": [string], \"correctAnswer\": string, \"explanation\": string}], \"vocabularyItems\": [{\"native\": string, \"romanized\": string, \"pronunciation\": string, \"meaning\": string, \"isVisualConcept\": boolean}]}]}".into(),
      image_template: "Course thumbnail: {prompt}. Flat illustration, no text.".into(),
    }
  }
}

fn default_general() -> UnitBounds {
  UnitBounds {
    min_units: 4,
    max_units: 6,
    unit_style_hints: "Start with an introduction, build concepts with concrete examples, finish with a summary.".into(),
  }
}

fn default_language() -> LanguageCfg {
  LanguageCfg {
    min_units: 5,
    max_units: 8,
    unit_style_hints: "Favour vocabulary units with native words, romanization and meanings; add practice dialogues.".into(),
    keywords: [
      "spanish", "french", "german", "italian", "portuguese", "japanese", "korean", "chinese",
      "mandarin", "cantonese", "russian", "greek", "arabic", "hindi", "vietnamese", "thai",
      "language", "phrases",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect(),
  }
}

fn enumerable(tag: &str, keywords: &[&str], min_items: usize, max_items: usize) -> CategoryCfg {
  CategoryCfg {
    tag: tag.into(),
    keywords: keywords.iter().map(|s| s.to_string()).collect(),
    min_units: 4,
    max_units: 6,
    unit_style_hints: "Include one vocabulary unit that lists the complete set as a table, one row per item.".into(),
    expected_min_items: min_items,
    expected_max_items: max_items,
  }
}

fn default_categories() -> Vec<CategoryCfg> {
  vec![
    enumerable("hiragana", &["hiragana"], 46, 71),
    enumerable("greek_alphabet", &["greek alphabet", "greek letters"], 24, 24),
    enumerable("cyrillic_alphabet", &["russian alphabet", "cyrillic"], 33, 33),
    enumerable("hangul_jamo", &["hangul", "korean alphabet"], 24, 40),
    enumerable("nato_phonetic", &["nato phonetic", "phonetic alphabet"], 26, 26),
    enumerable("latin_alphabet", &["english alphabet", "latin alphabet", "abc"], 26, 26),
  ]
}

/// Load `PipelineConfig` from PIPELINE_CONFIG_PATH. On any parsing/IO error, returns None.
pub fn load_pipeline_config_from_env() -> Option<PipelineConfig> {
  let path = std::env::var("PIPELINE_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match parse_pipeline_config(&s) {
      Ok(cfg) => {
        info!(target: "coursegen", %path, categories = cfg.categories.len(), "Loaded pipeline config (TOML)");
        for (tag, items) in curated_range_conflicts(&cfg) {
          warn!(target: "coursegen", %tag, curated_items = items, "Expected item range excludes the curated listing; substitutions will be reported incomplete");
        }
        Some(cfg)
      }
      Err(e) => {
        error!(target: "coursegen", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "coursegen", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}

/// Enumerable categories whose expected item range excludes the size of their
/// curated listing, with that size.
pub fn curated_range_conflicts(cfg: &PipelineConfig) -> Vec<(String, usize)> {
  cfg
    .categories
    .iter()
    .filter_map(|c| {
      let listing = curated_listing(&c.tag)?;
      let n = listing.len();
      (n < c.expected_min_items || n > c.expected_max_items).then(|| (c.tag.clone(), n))
    })
    .collect()
}

pub fn parse_pipeline_config(s: &str) -> Result<PipelineConfig, toml::de::Error> {
  toml::from_str::<PipelineConfig>(s)
}
