//! Small utility helpers used across modules.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Very small and safe string templating.
/// Replaces occurrences of `{key}` in the template with provided values.
/// This is intentionally simple (no nested/conditional logic).
pub fn fill_template(tpl: &str, pairs: &[(&str, &str)]) -> String {
  let mut out = tpl.to_string();
  for (k, v) in pairs {
    let needle = format!("{{{}}}", k);
    out = out.replace(&needle, v);
  }
  out
}

/// True if unicode char belongs to CJK ranges.
pub fn is_cjk(ch: char) -> bool {
  ('\u{4E00}'..='\u{9FFF}').contains(&ch)
    || ('\u{3400}'..='\u{4DBF}').contains(&ch)
    || ('\u{20000}'..='\u{2A6DF}').contains(&ch)
    || ('\u{2A700}'..='\u{2B73F}').contains(&ch)
    || ('\u{2B740}'..='\u{2B81F}').contains(&ch)
    || ('\u{2B820}'..='\u{2CEAF}').contains(&ch)
    || ('\u{F900}'..='\u{FAFF}').contains(&ch)
}

/// Whitespace-separated word count. Han characters count one word each,
/// since CJK prose has no spaces to split on.
pub fn word_count(s: &str) -> usize {
  s.split_whitespace()
    .map(|w| {
      let han = w.chars().filter(|c| is_cjk(*c)).count();
      if han > 0 { han.max(1) } else { 1 }
    })
    .sum()
}

/// Log-safe truncation for large strings.
/// Avoids spamming logs with huge request/response payloads.
pub fn trunc_for_log(s: &str, max: usize) -> String {
  if s.len() <= max {
    return s.to_string();
  }
  let mut cut = max;
  while !s.is_char_boundary(cut) {
    cut -= 1;
  }
  format!("{}… ({} bytes total)", &s[..cut], s.len())
}

/// True if `phrase` occurs in `text` on word boundaries (both already lowercase).
pub fn contains_phrase(text: &str, phrase: &str) -> bool {
  if phrase.is_empty() {
    return false;
  }
  text.match_indices(phrase).any(|(pos, _)| {
    let before = text[..pos].chars().next_back();
    let after = text[pos + phrase.len()..].chars().next();
    !before.map(|c| c.is_alphanumeric()).unwrap_or(false) && !after.map(|c| c.is_alphanumeric()).unwrap_or(false)
  })
}

/// Stable 64-bit seed for deterministic shuffles.
pub fn stable_seed(parts: &[&str]) -> u64 {
  let mut h = DefaultHasher::new();
  for p in parts {
    p.hash(&mut h);
  }
  h.finish()
}
