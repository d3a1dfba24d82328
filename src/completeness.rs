//! Completeness checks for enumerable domains (alphabets, syllabaries, code words).
//!
//! A listing is complete when its structurally counted items fall inside the
//! category's configured range. The repair policy is two strikes: one stricter
//! regeneration, then the curated listing.

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::context::PipelineContext;
use crate::domain::{ContentCategoryConfig, Unit};
use crate::error::PipelineError;
use crate::fallback::{curated_listing, StaticListing};
use crate::oracle::OracleRequest;
use crate::parser::{get_str, LISTING_SHAPE};
use crate::util::fill_template;

const LISTING_TEMPERATURE: f32 = 0.2;

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CompletenessReport {
  pub is_complete: bool,
  pub observed_count: usize,
  pub expected_range: Option<(usize, usize)>,
}

fn is_table_line(line: &str) -> bool {
  line.trim_start().starts_with('|')
}

fn is_separator(line: &str) -> bool {
  let t = line.trim();
  t.contains('-') && t.chars().all(|c| matches!(c, '|' | '-' | ':' | ' '))
}

/// Data rows of every markdown table in `content`, split into trimmed cells.
/// Header rows (the line right above a separator) and separators are skipped.
pub fn table_entries(content: &str) -> Vec<Vec<String>> {
  let lines: Vec<&str> = content.lines().collect();
  let mut out = Vec::new();
  for (i, line) in lines.iter().enumerate() {
    if !is_table_line(line) || is_separator(line) {
      continue;
    }
    if lines.get(i + 1).map(|next| is_separator(next)).unwrap_or(false) {
      continue;
    }
    let cells: Vec<String> = line
      .trim()
      .trim_matches('|')
      .split('|')
      .map(|c| c.trim().to_string())
      .collect();
    if cells.iter().any(|c| !c.is_empty()) {
      out.push(cells);
    }
  }
  out
}

pub fn table_rows(content: &str) -> usize {
  table_entries(content).len()
}

/// Bulleted or numbered list lines.
pub fn list_items(content: &str) -> usize {
  content
    .lines()
    .map(str::trim_start)
    .filter(|l| {
      if l.starts_with("- ") || l.starts_with("* ") || l.starts_with("• ") {
        return true;
      }
      let digits = l.chars().take_while(|c| c.is_ascii_digit()).count();
      digits > 0 && matches!(l[digits..].chars().next(), Some('.') | Some(')'))
    })
    .count()
}

/// Items present in `content`, counted structurally. Tables and lists are
/// counted independently and the larger count wins.
pub fn count_items(content: &str) -> usize {
  table_rows(content).max(list_items(content))
}

pub fn validate_completeness(content: &str, category: &ContentCategoryConfig) -> CompletenessReport {
  let observed_count = count_items(content);
  let is_complete = match category.expected_items {
    Some((min, max)) => observed_count >= min && observed_count <= max,
    None => true,
  };
  CompletenessReport { is_complete, observed_count, expected_range: category.expected_items }
}

#[derive(Clone, Debug)]
pub struct CompletenessOutcome {
  pub unit: Unit,
  pub report: CompletenessReport,
  pub regenerated: bool,
  pub used_fallback: bool,
  pub note: Option<String>,
  /// The curated listing that replaced the unit text, if any.
  pub curated: Option<StaticListing>,
}

async fn regenerate_listing(ctx: &PipelineContext, unit: &Unit, domain: &str, min: usize, max: usize) -> Result<String, PipelineError> {
  let prompts = &ctx.config.prompts;
  let prompt = fill_template(
    &prompts.listing_user_template,
    &[
      ("domain", domain),
      ("title", unit.title.as_str()),
      ("min_items", min.to_string().as_str()),
      ("max_items", max.to_string().as_str()),
    ],
  );
  let raw = ctx
    .complete(OracleRequest {
      system: prompts.listing_system.clone(),
      prompt,
      model: ctx.models.strong.clone(),
      temperature: LISTING_TEMPERATURE,
      max_tokens: ctx.config.limits.unit_max_tokens.max(ctx.config.limits.chunk_max_tokens),
    })
    .await?;
  // Plain markdown replies are fine: the rows are what we count.
  let content = ctx
    .extract(&raw, &LISTING_SHAPE)
    .ok()
    .and_then(|ex| get_str(&ex.value, &["content", "table", "listing"]))
    .unwrap_or_else(|| raw.trim().to_string());
  Ok(content)
}

/// Two-strike completeness repair for one unit.
#[instrument(level = "debug", target = "course", skip_all, fields(index = unit.index, category = %category.category_tag))]
pub async fn ensure_complete(ctx: &PipelineContext, mut unit: Unit, category: &ContentCategoryConfig) -> CompletenessOutcome {
  let first = validate_completeness(&unit.content, category);
  let Some((min, max)) = category.expected_items else {
    return CompletenessOutcome { unit, report: first, regenerated: false, used_fallback: false, note: None, curated: None };
  };
  if first.is_complete {
    return CompletenessOutcome { unit, report: first, regenerated: false, used_fallback: false, note: None, curated: None };
  }

  let domain = category.enumerable_domain().unwrap_or(&category.category_tag).to_string();
  warn!(target: "course", index = unit.index, %domain, observed = first.observed_count, min, max, "Listing incomplete; regenerating once");

  let mut best = (first.observed_count, unit.content.clone());
  match regenerate_listing(ctx, &unit, &domain, min, max).await {
    Ok(content) => {
      let second = validate_completeness(&content, category);
      if second.is_complete {
        info!(target: "course", index = unit.index, observed = second.observed_count, "Regenerated listing is complete");
        unit.content = content;
        return CompletenessOutcome { unit, report: second, regenerated: true, used_fallback: false, note: None, curated: None };
      }
      if second.observed_count > best.0 {
        best = (second.observed_count, content);
      }
    }
    Err(e) => warn!(target: "course", index = unit.index, error = %e, "Listing regeneration failed"),
  }

  let err = PipelineError::IncompleteEnumeration { observed: best.0, min, max };
  match curated_listing(&domain) {
    Some(listing) => {
      ctx.counters.record_fallback();
      unit.content = listing.render_table();
      let report = validate_completeness(&unit.content, category);
      warn!(target: "course", index = unit.index, domain = %listing.domain, items = listing.len(), "Substituted curated listing");
      let mut note = err.to_string();
      if !report.is_complete {
        warn!(target: "course", domain = %listing.domain, items = listing.len(), min, max, "Curated listing size is outside the configured range");
        note = format!("{note}; curated listing has {} items", listing.len());
      }
      CompletenessOutcome { unit, report, regenerated: true, used_fallback: true, note: Some(note), curated: Some(listing) }
    }
    None => {
      warn!(target: "course", index = unit.index, %domain, "No curated listing; keeping the larger attempt");
      unit.content = best.1;
      let report = validate_completeness(&unit.content, category);
      CompletenessOutcome { unit, report, regenerated: true, used_fallback: false, note: Some(err.to_string()), curated: None }
    }
  }
}
