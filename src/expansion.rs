//! Unit expansion: make sure every unit carries enough lesson text.
//!
//! Short units get one regeneration call; if that fails or still falls short,
//! the per-type template from `fallback` replaces the content.

use tracing::{debug, instrument, warn};

use crate::context::PipelineContext;
use crate::domain::{ContentCategoryConfig, Unit, ValidationState};
use crate::fallback::fallback_unit;
use crate::oracle::OracleRequest;
use crate::parser::{get_list, get_str, UNIT_SHAPE};
use crate::util::{fill_template, word_count};

const EXPAND_TEMPERATURE: f32 = 0.7;

#[derive(Clone, Debug)]
pub struct ExpansionOutcome {
  pub unit: Unit,
  pub used_fallback: bool,
  pub note: Option<String>,
}

/// Content and key points recovered from an expansion reply.
fn read_reply(ctx: &PipelineContext, raw: &str) -> (String, Vec<String>) {
  match ctx.extract(raw, &UNIT_SHAPE) {
    Ok(ex) => (
      get_str(&ex.value, &["content", "text", "body"]).unwrap_or_default(),
      get_list(&ex.value, &["keyPoints", "key_points"]),
    ),
    // A plain-prose reply is still lesson text.
    Err(_) if !raw.contains('{') => (raw.trim().to_string(), Vec::new()),
    Err(_) => (String::new(), Vec::new()),
  }
}

#[instrument(level = "debug", target = "course", skip_all, fields(index = unit.index, title = %unit.title))]
pub async fn expand(ctx: &PipelineContext, subject: &str, unit: Unit, category: &ContentCategoryConfig) -> ExpansionOutcome {
  let min_words = ctx.config.limits.min_unit_words;
  let words = word_count(&unit.content);
  if words >= min_words {
    let mut unit = unit;
    unit.validation_state = ValidationState::Expanded;
    return ExpansionOutcome { unit, used_fallback: false, note: None };
  }

  debug!(target: "course", index = unit.index, words, min_words, "Unit below threshold; regenerating");
  let prompts = &ctx.config.prompts;
  let key_points = unit.key_points_or_title().join("; ");
  let prompt = fill_template(
    &prompts.expand_user_template,
    &[
      ("subject", subject),
      ("title", unit.title.as_str()),
      ("description", unit.description.as_str()),
      ("key_points", key_points.as_str()),
      ("style", category.unit_style_hints.as_str()),
      ("min_words", min_words.to_string().as_str()),
    ],
  );
  let req = OracleRequest {
    system: prompts.expand_system.clone(),
    prompt,
    model: ctx.models.fast.clone(),
    temperature: EXPAND_TEMPERATURE,
    max_tokens: ctx.config.limits.unit_max_tokens,
  };

  let note = match ctx.complete(req).await {
    Ok(raw) => {
      let (content, new_points) = read_reply(ctx, &raw);
      let got = word_count(&content);
      if got >= min_words {
        let mut unit = unit;
        unit.content = content;
        if unit.key_points.iter().all(|k| k.trim().is_empty()) && !new_points.is_empty() {
          unit.key_points = new_points;
        }
        unit.validation_state = ValidationState::Expanded;
        return ExpansionOutcome { unit, used_fallback: false, note: None };
      }
      format!("regenerated content still short ({got} of {min_words} words)")
    }
    Err(e) => e.to_string(),
  };

  warn!(target: "course", index = unit.index, %note, "Using template content");
  ctx.counters.record_fallback();
  ExpansionOutcome { unit: fallback_unit(&unit), used_fallback: true, note: Some(note) }
}
