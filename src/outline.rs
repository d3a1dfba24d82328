//! Course classification and outline generation.
//!
//! Classification is keyword-based and runs once per job. The outline comes
//! from a single oracle call; when that fails for any reason the static
//! emergency course is used instead, so this stage never stalls the job.

use std::collections::BTreeSet;

use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::config::PipelineConfig;
use crate::context::PipelineContext;
use crate::domain::{ContentCategory, ContentCategoryConfig, CourseOutline, CourseSpec, Unit, UnitType};
use crate::error::PipelineError;
use crate::fallback::{emergency_outline, padding_unit};
use crate::oracle::OracleRequest;
use crate::parser::{get_array, get_list, get_str, get_u32, OUTLINE_SHAPE};
use crate::util::{contains_phrase, fill_template};

const OUTLINE_TEMPERATURE: f32 = 0.5;

/// Resolve the course category from the subject. Enumerable domains are checked
/// before languages so "greek alphabet" is not mistaken for a Greek course.
pub fn classify(spec: &CourseSpec, config: &PipelineConfig) -> ContentCategoryConfig {
  let subject = spec.subject.to_lowercase();

  for cat in &config.categories {
    if cat.keywords.iter().any(|k| contains_phrase(&subject, &k.to_lowercase())) {
      return ContentCategoryConfig {
        category_tag: cat.tag.clone(),
        category: ContentCategory::Enumerable { domain: cat.tag.clone() },
        min_units: cat.min_units,
        max_units: cat.max_units.max(cat.min_units),
        unit_style_hints: cat.unit_style_hints.clone(),
        expected_items: Some((cat.expected_min_items, cat.expected_max_items.max(cat.expected_min_items))),
      };
    }
  }

  let lang = &config.language;
  if let Some(language) = lang.keywords.iter().find(|k| contains_phrase(&subject, &k.to_lowercase())) {
    return ContentCategoryConfig {
      category_tag: "language".into(),
      category: ContentCategory::Language { language: language.clone() },
      min_units: lang.min_units,
      max_units: lang.max_units.max(lang.min_units),
      unit_style_hints: lang.unit_style_hints.clone(),
      expected_items: None,
    };
  }

  let general = &config.general;
  ContentCategoryConfig {
    category_tag: "general".into(),
    category: ContentCategory::General,
    min_units: general.min_units,
    max_units: general.max_units.max(general.min_units),
    unit_style_hints: general.unit_style_hints.clone(),
    expected_items: None,
  }
}

fn unit_from_value(index: usize, v: &Value) -> Option<Unit> {
  let title = get_str(v, &["title", "name", "heading"])?;
  let unit_type = UnitType::from_label(&get_str(v, &["type", "unitType", "kind"]).unwrap_or_default());
  let mut unit = Unit::new(index, title, unit_type);
  unit.description = get_str(v, &["description", "summary"]).unwrap_or_default();
  unit.content = get_str(v, &["content", "text"]).unwrap_or_default();
  unit.key_points = get_list(v, &["keyPoints", "key_points", "points"]);
  if let Some(minutes) = get_u32(v, &["estimatedMinutes", "minutes", "duration"]) {
    unit.estimated_minutes = minutes.clamp(1, 120);
  }
  if let Some(prompt) = get_str(v, &["imagePrompt", "image_prompt"]) {
    unit.image_prompt = prompt;
  }
  Some(unit)
}

/// Build an outline from a parsed record. Zero units is an error.
pub fn outline_from_value(v: &Value, spec: &CourseSpec) -> Result<CourseOutline, PipelineError> {
  let units: Vec<Unit> = get_array(v, &["units", "sections", "lessons"])
    .map(|items| items.iter().filter_map(|item| unit_from_value(0, item)).collect())
    .unwrap_or_default();
  if units.is_empty() {
    return Err(PipelineError::OutlineUnparsable("no units in reply".into()));
  }
  let units = units
    .into_iter()
    .enumerate()
    .map(|(i, mut u)| {
      u.index = i;
      u
    })
    .collect();
  Ok(CourseOutline {
    title: get_str(v, &["title", "courseTitle"]).unwrap_or_else(|| spec.subject.trim().to_string()),
    description: get_str(v, &["description", "summary"]).unwrap_or_default(),
    units,
    targeted_concepts: get_list(v, &["targetedConcepts", "concepts", "targeted_concepts"]).into_iter().collect::<BTreeSet<_>>(),
  })
}

/// One outline call, parsed. No fallback here.
pub async fn request_outline(
  ctx: &PipelineContext,
  spec: &CourseSpec,
  category: &ContentCategoryConfig,
) -> Result<CourseOutline, PipelineError> {
  let prompts = &ctx.config.prompts;
  let prompt = fill_template(
    &prompts.outline_user_template,
    &[
      ("subject", spec.subject.as_str()),
      ("level", spec.target_level.as_str()),
      ("profile", spec.user_profile.as_str()),
      ("guidance", spec.system_guidance.as_str()),
      ("style", category.unit_style_hints.as_str()),
      ("min_units", category.min_units.to_string().as_str()),
      ("max_units", category.max_units.to_string().as_str()),
    ],
  );
  let raw = ctx
    .complete(OracleRequest {
      system: prompts.outline_system.clone(),
      prompt,
      model: ctx.models.strong.clone(),
      temperature: OUTLINE_TEMPERATURE,
      max_tokens: ctx.config.limits.outline_max_tokens,
    })
    .await?;
  let ex = ctx
    .extract(&raw, &OUTLINE_SHAPE)
    .map_err(|e| PipelineError::OutlineUnparsable(e.to_string()))?;
  outline_from_value(&ex.value, spec)
}

#[derive(Clone, Debug)]
pub struct OutlineResult {
  pub outline: CourseOutline,
  pub used_fallback: bool,
  pub note: Option<String>,
}

/// Outline for the job, bound-enforced. Never fails.
#[instrument(level = "info", target = "course", skip_all, fields(subject = %spec.subject, category = %category.category_tag))]
pub async fn generate_outline(ctx: &PipelineContext, spec: &CourseSpec, category: &ContentCategoryConfig) -> OutlineResult {
  let (outline, used_fallback, note) = match request_outline(ctx, spec, category).await {
    Ok(outline) => {
      info!(target: "course", units = outline.units.len(), title = %outline.title, "Outline generated");
      (outline, false, None)
    }
    Err(e) => {
      warn!(target: "course", error = %e, oracle_failure = e.is_oracle_failure(), "Outline failed; using emergency course");
      ctx.counters.record_fallback();
      (emergency_outline(spec), true, Some(e.to_string()))
    }
  };
  OutlineResult { outline: enforce_unit_bounds(outline, category, &spec.subject), used_fallback, note }
}

/// Truncate above `max_units`, pad below `min_units`, re-index `0..N`. Enumerable
/// courses also get a vocabulary unit to hold the listing if none was planned.
pub fn enforce_unit_bounds(mut outline: CourseOutline, category: &ContentCategoryConfig, subject: &str) -> CourseOutline {
  let min = category.min_units.max(1);
  let max = category.max_units.max(min);
  let subject = subject.trim();

  if outline.units.len() > max {
    warn!(target: "course", planned = outline.units.len(), max, "Outline too long; truncating");
    outline.units.truncate(max);
  }
  let mut ordinal = 0;
  while outline.units.len() < min {
    let index = outline.units.len();
    outline.units.push(padding_unit(index, subject, ordinal));
    ordinal += 1;
  }
  for (i, unit) in outline.units.iter_mut().enumerate() {
    unit.index = i;
  }

  if category.enumerable_domain().is_some() && !outline.units.iter().any(|u| u.unit_type == UnitType::Vocabulary) {
    let target = if outline.units.len() > 1 { 1 } else { 0 };
    outline.units[target].unit_type = UnitType::Vocabulary;
  }
  outline
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use serde_json::json;

  use super::*;
  use crate::context::testing::scripted;
  use crate::domain::TargetLevel;
  use crate::oracle::testing::ScriptedOracle;

  fn spec(subject: &str) -> CourseSpec {
    CourseSpec::new(subject, TargetLevel::Beginner)
  }

  fn outline_reply(n: usize) -> String {
    let units: Vec<Value> = (0..n)
      .map(|i| json!({"title": format!("Unit {i}"), "type": "concept", "keyPoints": ["a", "b"]}))
      .collect();
    json!({"title": "Photosynthesis", "description": "How plants eat light", "targetedConcepts": ["chlorophyll"], "units": units}).to_string()
  }

  #[test]
  fn classification_prefers_enumerable_domains() {
    let cfg = PipelineConfig::default();
    let greek = classify(&spec("The Greek alphabet"), &cfg);
    assert_eq!(greek.enumerable_domain(), Some("greek_alphabet"));
    assert_eq!(greek.expected_items, Some((24, 24)));

    let spanish = classify(&spec("Conversational Spanish"), &cfg);
    assert_eq!(spanish.category, ContentCategory::Language { language: "spanish".into() });

    let general = classify(&spec("Photosynthesis"), &cfg);
    assert_eq!(general.category, ContentCategory::General);
    assert_eq!((general.min_units, general.max_units), (4, 6));
  }

  #[test]
  fn keywords_match_on_word_boundaries() {
    let cfg = PipelineConfig::default();
    assert_eq!(classify(&spec("abcd of databases"), &cfg).category, ContentCategory::General);
    assert!(classify(&spec("ABC for kids"), &cfg).enumerable_domain().is_some());
  }

  #[test]
  fn bounds_hold_for_any_outline_length() {
    let cat = classify(&spec("Photosynthesis"), &PipelineConfig::default());
    for n in 0..12 {
      let mut outline = emergency_outline(&spec("Photosynthesis"));
      outline.units = (0..n).map(|i| Unit::new(i, format!("U{i}"), UnitType::Concept)).collect();
      let out = enforce_unit_bounds(outline, &cat, "Photosynthesis");
      assert!(out.units.len() >= cat.min_units && out.units.len() <= cat.max_units, "n = {n}");
      assert!(out.units.iter().enumerate().all(|(i, u)| u.index == i));
    }
  }

  #[test]
  fn enumerable_outlines_get_a_listing_unit() {
    let cat = classify(&spec("Learn hiragana"), &PipelineConfig::default());
    let mut outline = emergency_outline(&spec("Learn hiragana"));
    outline.units.iter_mut().for_each(|u| u.unit_type = UnitType::Concept);
    let out = enforce_unit_bounds(outline, &cat, "hiragana");
    assert_eq!(out.units[1].unit_type, UnitType::Vocabulary);
  }

  #[tokio::test]
  async fn oracle_outline_is_parsed_and_truncated() {
    let ctx = scripted(Arc::new(ScriptedOracle::new().on("TASK: OUTLINE", &outline_reply(9))));
    let s = spec("Photosynthesis");
    let cat = classify(&s, &ctx.config);
    let res = generate_outline(&ctx, &s, &cat).await;
    assert!(!res.used_fallback);
    assert_eq!(res.outline.units.len(), 6);
    assert_eq!(res.outline.title, "Photosynthesis");
    assert!(res.outline.targeted_concepts.contains("chlorophyll"));
  }

  #[tokio::test]
  async fn unparsable_outline_uses_emergency_course() {
    let ctx = scripted(Arc::new(ScriptedOracle::new().on("TASK: OUTLINE", "Sorry, I can't help with that.")));
    let s = spec("Photosynthesis");
    let cat = classify(&s, &ctx.config);

    let err = request_outline(&ctx, &s, &cat).await.unwrap_err();
    assert!(matches!(err, PipelineError::OutlineUnparsable(_)));

    let res = generate_outline(&ctx, &s, &cat).await;
    assert!(res.used_fallback);
    assert_eq!(res.outline.units.len(), 4);
    assert_eq!(res.outline.units[0].unit_type, UnitType::Introduction);
  }

  #[tokio::test]
  async fn empty_unit_list_is_unparsable() {
    let ctx = scripted(Arc::new(ScriptedOracle::new().on("TASK: OUTLINE", r#"{"title": "X", "units": []}"#)));
    let s = spec("Photosynthesis");
    let cat = classify(&s, &ctx.config);
    assert!(matches!(request_outline(&ctx, &s, &cat).await, Err(PipelineError::OutlineUnparsable(_))));
  }
}
