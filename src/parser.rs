//! Structured-text extraction with tiered repair.
//!
//! Oracle replies are free-form: wrapped in prose or code fences, typographic
//! quotes, raw newlines inside strings, cut off at the token limit. `extract`
//! recovers a JSON record from them, trying each tier only when the previous
//! one produced nothing usable:
//!
//! 1. direct parse of the largest brace-delimited span
//! 2. normalization (quotes, dashes, control characters, whitespace) + re-parse
//! 3. bracket-balance repair (close strings, drop dangling separators, append closers)
//! 4. manual field scanning by label, rebuilding array elements from repeated anchors
//!
//! If nothing is recoverable the caller gets an `ExtractError` and substitutes
//! its own fallback; this module never invents content.

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::ExtractError;

/// Labels the field scanner looks for, per expected record shape.
#[derive(Debug)]
pub struct Shape {
  pub name: &'static str,
  pub fields: &'static [&'static str],
  pub array: Option<ArrayShape>,
}

/// A repeated element array inside a shape. Every element carries `anchor`.
#[derive(Debug)]
pub struct ArrayShape {
  pub key: &'static str,
  pub anchor: &'static str,
  pub fields: &'static [&'static str],
}

pub const OUTLINE_SHAPE: Shape = Shape {
  name: "outline",
  fields: &["title", "description", "targetedConcepts"],
  array: Some(ArrayShape {
    key: "units",
    anchor: "title",
    fields: &["title", "description", "type", "content", "keyPoints", "estimatedMinutes", "imagePrompt"],
  }),
};

pub const UNIT_SHAPE: Shape = Shape {
  name: "unit",
  fields: &["content", "keyPoints", "title"],
  array: None,
};

pub const CHUNKS_SHAPE: Shape = Shape {
  name: "chunks",
  fields: &[],
  array: Some(ArrayShape {
    key: "chunks",
    anchor: "type",
    fields: &["type", "title", "content", "keyPoint"],
  }),
};

pub const LISTING_SHAPE: Shape = Shape {
  name: "listing",
  fields: &["content"],
  array: None,
};

impl Shape {
  /// A parsed object is usable if it carries at least one label we know.
  fn accepts(&self, v: &Value) -> bool {
    let Some(obj) = v.as_object() else { return false };
    self.fields.iter().any(|f| obj.contains_key(*f))
      || self.array.as_ref().map(|a| obj.contains_key(a.key)).unwrap_or(false)
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum RepairTier {
  Direct,
  Normalized,
  Balanced,
  FieldScan,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Confidence {
  High,
  Medium,
  Low,
}

#[derive(Clone, Debug)]
pub struct Extraction {
  pub value: Value,
  pub tier: RepairTier,
}

impl Extraction {
  pub fn confidence(&self) -> Confidence {
    match self.tier {
      RepairTier::Direct => Confidence::High,
      RepairTier::Normalized | RepairTier::Balanced => Confidence::Medium,
      RepairTier::FieldScan => Confidence::Low,
    }
  }

  pub fn was_repaired(&self) -> bool {
    self.tier != RepairTier::Direct
  }
}

pub fn extract(raw: &str, shape: &Shape) -> Result<Extraction, ExtractError> {
  let fail = |reason: &str| ExtractError { input_len: raw.len(), reason: reason.to_string() };
  if raw.trim().is_empty() {
    return Err(fail("empty input"));
  }

  let found = parse_largest_object(raw, shape)
    .filter(|v| shape.accepts(v))
    .map(|value| Extraction { value, tier: RepairTier::Direct })
    .or_else(|| {
      let normalized = normalize(raw);
      parse_largest_object(&normalized, shape)
        .filter(|v| shape.accepts(v))
        .map(|value| Extraction { value, tier: RepairTier::Normalized })
        .or_else(|| {
          balance_repair(&normalized)
            .filter(|v| shape.accepts(v))
            .map(|value| Extraction { value, tier: RepairTier::Balanced })
        })
        .or_else(|| {
          scan_fields(&normalized, shape).map(|value| Extraction { value, tier: RepairTier::FieldScan })
        })
    });

  match found {
    Some(ex) => {
      if ex.was_repaired() {
        debug!(target: "course", shape = shape.name, tier = ?ex.tier, input_len = raw.len(), "Recovered record through repair");
      }
      Ok(ex)
    }
    None => Err(fail("no tier produced a record")),
  }
}

// --- Tier 1 ---

fn parse_largest_object(text: &str, shape: &Shape) -> Option<Value> {
  let trimmed = text.trim();
  if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
    if start < end {
      if let Ok(v) = serde_json::from_str::<Value>(&trimmed[start..=end]) {
        if v.is_object() {
          return Some(v);
        }
      }
    }
  }
  // A bare top-level array of elements: wrap it under the shape's array key.
  if let (Some(array), Some(start), Some(end)) = (&shape.array, trimmed.find('['), trimmed.rfind(']')) {
    let before = &trimmed[..start];
    if start < end && !before.contains('{') {
      if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(&trimmed[start..=end]) {
        let mut obj = Map::new();
        obj.insert(array.key.to_string(), Value::Array(items));
        return Some(Value::Object(obj));
      }
    }
  }
  None
}

// --- Tier 2 ---

fn unify_char(ch: char) -> char {
  match ch {
    '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{2033}' => '"',
    '\u{2018}' | '\u{2019}' | '\u{2032}' => '\'',
    '\u{2013}' | '\u{2014}' | '\u{2012}' | '\u{2212}' => '-',
    '\u{00A0}' | '\u{2009}' | '\u{202F}' => ' ',
    c => c,
  }
}

fn is_curly_double(ch: char) -> bool {
  matches!(ch, '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{2033}')
}

/// Next non-whitespace char after byte position `from`.
fn next_significant(text: &str, from: usize) -> Option<char> {
  text[from..].chars().find(|c| !c.is_whitespace())
}

/// Unify typography, strip control characters, collapse whitespace inside
/// strings, and escape stray quotes that cannot be string delimiters.
pub fn normalize(raw: &str) -> String {
  let mut out = String::with_capacity(raw.len());
  let mut in_string = false;
  let mut escape = false;
  let mut last_ws = false;

  for (i, ch) in raw.char_indices() {
    let next_pos = i + ch.len_utf8();
    if !in_string {
      if ch == '"' || is_curly_double(ch) {
        in_string = true;
        last_ws = false;
        out.push('"');
      } else if ch.is_control() && !matches!(ch, '\n' | '\r' | '\t') {
        continue;
      } else {
        out.push(unify_char(ch));
      }
      continue;
    }

    if escape {
      escape = false;
      out.push(ch);
      continue;
    }
    if ch == '\\' {
      escape = true;
      last_ws = false;
      out.push(ch);
      continue;
    }
    if ch == '"' || is_curly_double(ch) {
      let closes = match next_significant(raw, next_pos) {
        None => true,
        Some(c) => matches!(c, ',' | ':' | '}' | ']' | '"') || is_curly_double(c),
      };
      if closes {
        in_string = false;
        out.push('"');
      } else {
        out.push_str("\\\"");
      }
      last_ws = false;
      continue;
    }
    if ch.is_whitespace() || ch.is_control() {
      if !last_ws {
        out.push(' ');
      }
      last_ws = true;
      continue;
    }
    last_ws = false;
    out.push(unify_char(ch));
  }
  out
}

// --- Tier 3 ---

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Expect {
  Key,
  Colon,
  Value,
  Comma,
}

#[derive(Clone, Copy, Debug)]
struct Frame {
  closer: char,
  expect: Expect,
}

impl Frame {
  fn is_object(&self) -> bool {
    self.closer == '}'
  }
}

fn closers(stack: &[Frame]) -> String {
  stack.iter().rev().map(|f| f.closer).collect()
}

fn trim_trailing_separators(s: &str) -> &str {
  s.trim_end().trim_end_matches(',').trim_end()
}

fn is_primitive_char(c: char) -> bool {
  c.is_ascii_alphanumeric() || matches!(c, '.' | '+' | '-')
}

/// Rebuild a syntactically closed document from a possibly truncated one.
fn balance_repair(text: &str) -> Option<Value> {
  let start = text.find('{')?;
  let text = &text[start..];

  let mut out = String::with_capacity(text.len() + 8);
  let mut stack: Vec<Frame> = Vec::new();
  // (length of `out`, closers needed at that point)
  let mut last_cut: Option<(usize, String)> = None;
  let mut in_string = false;
  let mut string_is_key = false;
  let mut escape = false;
  let mut in_primitive = false;
  let mut primitive_start = 0usize;
  let mut finished = false;

  let value_done = |stack: &mut Vec<Frame>, out: &String, last_cut: &mut Option<(usize, String)>| {
    if let Some(top) = stack.last_mut() {
      top.expect = Expect::Comma;
    }
    *last_cut = Some((out.len(), closers(stack)));
  };

  for ch in text.chars() {
    if in_string {
      out.push(ch);
      if escape {
        escape = false;
      } else if ch == '\\' {
        escape = true;
      } else if ch == '"' {
        in_string = false;
        if string_is_key {
          if let Some(top) = stack.last_mut() {
            top.expect = Expect::Colon;
          }
        } else {
          value_done(&mut stack, &out, &mut last_cut);
        }
      }
      continue;
    }

    if in_primitive {
      if is_primitive_char(ch) {
        out.push(ch);
        continue;
      }
      in_primitive = false;
      value_done(&mut stack, &out, &mut last_cut);
    }

    // A new element where a comma was expected: the oracle dropped the separator.
    let starts_element = ch == '"' || ch == '{' || ch == '[' || ch == '-' || ch.is_ascii_alphanumeric();
    if starts_element {
      if let Some(top) = stack.last_mut() {
        if top.expect == Expect::Comma {
          out.push(',');
          top.expect = if top.is_object() { Expect::Key } else { Expect::Value };
        }
      }
    }

    match ch {
      '"' => {
        string_is_key = stack.last().map(|f| f.is_object() && f.expect == Expect::Key).unwrap_or(false);
        if !string_is_key && stack.last().map(|f| f.expect != Expect::Value).unwrap_or(true) {
          // Stray quoted text where no value belongs; skip it as garbage.
          continue;
        }
        in_string = true;
        out.push('"');
      }
      '{' | '[' => {
        if let Some(top) = stack.last() {
          if top.expect != Expect::Value {
            continue;
          }
        }
        out.push(ch);
        let closer = if ch == '{' { '}' } else { ']' };
        let expect = if ch == '{' { Expect::Key } else { Expect::Value };
        stack.push(Frame { closer, expect });
        last_cut = Some((out.len(), closers(&stack)));
      }
      '}' | ']' => {
        let Some(pos) = stack.iter().rposition(|f| f.closer == ch) else { continue };
        if matches!(stack[stack.len() - 1].expect, Expect::Colon)
          || (stack[stack.len() - 1].is_object() && stack[stack.len() - 1].expect == Expect::Value)
        {
          // Dangling key: roll back to the last complete value.
          let (cut, _) = last_cut.clone()?;
          out.truncate(cut);
        }
        while stack.len() > pos {
          let trimmed_len = trim_trailing_separators(&out).len();
          out.truncate(trimmed_len);
          if let Some(f) = stack.pop() {
            out.push(f.closer);
          }
        }
        if stack.is_empty() {
          finished = true;
          break;
        }
        value_done(&mut stack, &out, &mut last_cut);
      }
      ':' => {
        if let Some(top) = stack.last_mut() {
          if top.expect == Expect::Colon {
            top.expect = Expect::Value;
            out.push(':');
          }
        }
      }
      ',' => {
        if let Some(top) = stack.last_mut() {
          if top.expect == Expect::Comma {
            top.expect = if top.is_object() { Expect::Key } else { Expect::Value };
            out.push(',');
          }
        }
      }
      c if c.is_whitespace() => out.push(c),
      c if (c == '-' || c.is_ascii_alphanumeric()) => {
        if stack.last().map(|f| f.expect == Expect::Value).unwrap_or(false) {
          in_primitive = true;
          primitive_start = out.len();
          out.push(c);
        }
      }
      _ => {}
    }
  }

  if finished {
    return serde_json::from_str::<Value>(&out).ok().filter(|v| v.is_object());
  }

  if in_primitive {
    if serde_json::from_str::<Value>(&out[primitive_start..]).is_ok() {
      value_done(&mut stack, &out, &mut last_cut);
    } else {
      out.truncate(primitive_start);
    }
  }

  // Optimistic closure: keep a truncated value string.
  let dangling_key = if in_string {
    string_is_key
  } else {
    stack
      .last()
      .map(|f| f.is_object() && matches!(f.expect, Expect::Colon | Expect::Value))
      .unwrap_or(false)
  };
  if !dangling_key {
    let mut candidate = out.clone();
    if in_string {
      if escape {
        candidate.pop();
      }
      candidate.push('"');
    }
    let body = trim_trailing_separators(&candidate).to_string();
    let repaired = format!("{}{}", body, closers(&stack));
    if let Ok(v) = serde_json::from_str::<Value>(&repaired) {
      if v.is_object() {
        return Some(v);
      }
    }
  }

  // Cut back to the last complete value.
  let (cut, tail) = last_cut?;
  let repaired = format!("{}{}", trim_trailing_separators(&out[..cut]), tail);
  serde_json::from_str::<Value>(&repaired).ok().filter(|v| v.is_object())
}

// --- Tier 4 ---

struct LabelHit {
  label_start: usize,
  value_start: usize,
  quoted: bool,
}

fn skip_ws(text: &str, mut pos: usize) -> usize {
  let bytes = text.as_bytes();
  while pos < bytes.len() && (bytes[pos] as char).is_ascii_whitespace() {
    pos += 1;
  }
  pos
}

/// First `"label":` or line-leading `label:` at or after `from`.
fn find_label(text: &str, label: &str, from: usize) -> Option<LabelHit> {
  let quoted_needle = format!("\"{}\"", label);
  let mut quoted_hit = None;
  let mut search = from;
  while let Some(rel) = text.get(search..).and_then(|t| t.find(&quoted_needle)) {
    let at = search + rel;
    let after = skip_ws(text, at + quoted_needle.len());
    if text.as_bytes().get(after) == Some(&b':') {
      quoted_hit = Some(LabelHit { label_start: at, value_start: skip_ws(text, after + 1), quoted: true });
      break;
    }
    search = at + quoted_needle.len();
  }

  let mut line_hit = None;
  let mut line_start = from;
  for line in text.get(from..).unwrap_or("").split_inclusive('\n') {
    let lead = line.len() - line.trim_start_matches(|c: char| c.is_whitespace() || c == '-' || c == '*').len();
    let body = &line[lead..];
    if body.len() > label.len()
      && body.as_bytes()[..label.len()].eq_ignore_ascii_case(label.as_bytes())
      && body.as_bytes()[label.len()] == b':'
    {
      let at = line_start + lead;
      line_hit = Some(LabelHit { label_start: at, value_start: skip_ws(text, at + label.len() + 1), quoted: false });
      break;
    }
    line_start += line.len();
  }

  match (quoted_hit, line_hit) {
    (Some(q), Some(l)) => Some(if l.label_start < q.label_start { l } else { q }),
    (q, l) => q.or(l),
  }
}

/// String-aware end of the bracketed span opening at `start`, if it closes.
fn matching_close(text: &str, start: usize) -> Option<usize> {
  let mut depth = 0i32;
  let mut in_string = false;
  let mut escape = false;
  for (i, ch) in text[start..].char_indices() {
    if in_string {
      if escape {
        escape = false;
      } else if ch == '\\' {
        escape = true;
      } else if ch == '"' {
        in_string = false;
      }
      continue;
    }
    match ch {
      '"' => in_string = true,
      '{' | '[' => depth += 1,
      '}' | ']' => {
        depth -= 1;
        if depth == 0 {
          return Some(start + i);
        }
      }
      _ => {}
    }
  }
  None
}

/// Read a JSON string starting at the opening quote; tolerates a missing close.
fn read_string(text: &str, start: usize) -> (String, usize) {
  let mut raw = String::new();
  let mut escape = false;
  let mut end = text.len();
  for (i, ch) in text[start + 1..].char_indices() {
    if escape {
      escape = false;
      raw.push(ch);
      continue;
    }
    if ch == '\\' {
      escape = true;
      raw.push(ch);
      continue;
    }
    if ch == '"' {
      end = start + 1 + i + 1;
      break;
    }
    raw.push(ch);
  }
  if escape {
    raw.pop();
  }
  let decoded = serde_json::from_str::<String>(&format!("\"{}\"", raw)).unwrap_or(raw);
  (decoded.trim().to_string(), end)
}

fn read_value(text: &str, hit: &LabelHit) -> Option<Value> {
  let start = hit.value_start;
  let first = text[start..].chars().next()?;
  match first {
    '"' => {
      let (s, _) = read_string(text, start);
      if s.is_empty() { None } else { Some(Value::String(s)) }
    }
    '[' | '{' => {
      if let Some(end) = matching_close(text, start) {
        if let Ok(v) = serde_json::from_str::<Value>(&text[start..=end]) {
          return Some(v);
        }
      }
      if first == '{' {
        return None;
      }
      // Broken array: keep the top-level string elements that survived.
      let region_end = matching_close(text, start).unwrap_or(text.len());
      let mut items = Vec::new();
      let mut pos = start + 1;
      let mut depth = 0i32;
      while pos < region_end {
        let ch = text[pos..].chars().next()?;
        match ch {
          '"' if depth == 0 => {
            let (s, end) = read_string(text, pos);
            if !s.is_empty() {
              items.push(Value::String(s));
            }
            pos = end.max(pos + 1);
            continue;
          }
          '{' | '[' => depth += 1,
          '}' | ']' => depth -= 1,
          _ => {}
        }
        pos += ch.len_utf8();
      }
      if items.is_empty() { None } else { Some(Value::Array(items)) }
    }
    c if hit.quoted && (c == '-' || c.is_ascii_digit()) => {
      let token: String = text[start..].chars().take_while(|c| is_primitive_char(*c)).collect();
      if let Ok(i) = token.parse::<i64>() {
        Some(Value::from(i))
      } else {
        token.parse::<f64>().ok().map(Value::from)
      }
    }
    't' if hit.quoted && text[start..].starts_with("true") => Some(Value::Bool(true)),
    'f' if hit.quoted && text[start..].starts_with("false") => Some(Value::Bool(false)),
    'n' if hit.quoted && text[start..].starts_with("null") => None,
    _ if !hit.quoted => {
      let line = text[start..].lines().next().unwrap_or("");
      let s = line.trim().trim_end_matches(',').trim();
      if s.is_empty() { None } else { Some(Value::String(s.to_string())) }
    }
    _ => None,
  }
}

fn scan_record(text: &str, fields: &[&str]) -> Map<String, Value> {
  let mut obj = Map::new();
  for field in fields {
    if let Some(hit) = find_label(text, field, 0) {
      if let Some(v) = read_value(text, &hit) {
        obj.insert(field.to_string(), v);
      }
    }
  }
  obj
}

fn scan_fields(text: &str, shape: &Shape) -> Option<Value> {
  let (root_region, array_region) = match &shape.array {
    Some(array) => match find_label(text, array.key, 0) {
      Some(hit) => (&text[..hit.label_start], Some(&text[hit.value_start..])),
      None if !shape.fields.contains(&array.anchor) => ("", Some(text)),
      None => (text, None),
    },
    None => (text, None),
  };

  let mut obj = scan_record(root_region, shape.fields);

  if let (Some(array), Some(region)) = (&shape.array, array_region) {
    let mut anchors = Vec::new();
    let mut from = 0;
    while let Some(hit) = find_label(region, array.anchor, from) {
      from = hit.value_start.max(hit.label_start + 1);
      anchors.push(hit.label_start);
    }
    // Each element starts at the brace opening the object that holds its anchor.
    let mut starts = Vec::with_capacity(anchors.len());
    let mut prev_end = 0;
    for &a in &anchors {
      let start = region[prev_end..a].rfind('{').map(|p| prev_end + p).unwrap_or(a);
      starts.push(start);
      prev_end = a;
    }
    let mut items = Vec::new();
    for (i, &s) in starts.iter().enumerate() {
      let e = starts.get(i + 1).copied().unwrap_or(region.len());
      let record = scan_record(&region[s..e], array.fields);
      if !record.is_empty() {
        items.push(Value::Object(record));
      }
    }
    if !items.is_empty() {
      obj.insert(array.key.to_string(), Value::Array(items));
    }
  }

  if obj.is_empty() { None } else { Some(Value::Object(obj)) }
}

// --- Accessors used by the pipeline stages ---

/// First non-empty string (or number rendered as string) under any of `keys`.
pub fn get_str(v: &Value, keys: &[&str]) -> Option<String> {
  keys.iter().find_map(|k| match v.get(*k)? {
    Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
    Value::Number(n) => Some(n.to_string()),
    _ => None,
  })
}

/// String list under any of `keys`; a single string becomes a one-element list.
pub fn get_list(v: &Value, keys: &[&str]) -> Vec<String> {
  for k in keys {
    match v.get(*k) {
      Some(Value::Array(items)) => {
        let list: Vec<String> = items
          .iter()
          .filter_map(|i| match i {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            other => get_str(other, &["text", "point", "title", "name"]),
          })
          .filter(|s| !s.is_empty())
          .collect();
        if !list.is_empty() {
          return list;
        }
      }
      Some(Value::String(s)) if !s.trim().is_empty() => return vec![s.trim().to_string()],
      _ => {}
    }
  }
  Vec::new()
}

pub fn get_array<'a>(v: &'a Value, keys: &[&str]) -> Option<&'a Vec<Value>> {
  keys.iter().find_map(|k| v.get(*k).and_then(|x| x.as_array()))
}

pub fn get_u32(v: &Value, keys: &[&str]) -> Option<u32> {
  keys.iter().find_map(|k| match v.get(*k)? {
    Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f.max(0.0) as u64)).map(|n| n as u32),
    Value::String(s) => s.trim().split_whitespace().next()?.parse::<u32>().ok(),
    _ => None,
  })
}

pub fn get_bool(v: &Value, keys: &[&str]) -> Option<bool> {
  keys.iter().find_map(|k| match v.get(*k)? {
    Value::Bool(b) => Some(*b),
    Value::String(s) => match s.trim().to_lowercase().as_str() {
      "true" | "yes" => Some(true),
      "false" | "no" => Some(false),
      _ => None,
    },
    _ => None,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn well_formed_input_short_circuits_unchanged() {
    let raw = r#"{"chunks":[{"type":"hook","title":"Sunlight","content":"Plants eat light.","keyPoint":"light"}]}"#;
    let ex = extract(raw, &CHUNKS_SHAPE).unwrap();
    assert_eq!(ex.tier, RepairTier::Direct);
    assert_eq!(ex.confidence(), Confidence::High);
    assert_eq!(ex.value, serde_json::from_str::<Value>(raw).unwrap());
  }

  #[test]
  fn strips_prose_and_code_fences() {
    let raw = "Sure! Here is the outline:\n```json\n{\"title\": \"Cells\", \"units\": []}\n```\nEnjoy.";
    let ex = extract(raw, &OUTLINE_SHAPE).unwrap();
    assert_eq!(ex.tier, RepairTier::Direct);
    assert_eq!(ex.value["title"], "Cells");
  }

  #[test]
  fn bare_array_is_wrapped_under_array_key() {
    let raw = r#"[{"type":"hook","title":"A"},{"type":"recap","title":"B"}]"#;
    let ex = extract(raw, &CHUNKS_SHAPE).unwrap();
    assert_eq!(ex.value["chunks"].as_array().unwrap().len(), 2);
  }

  #[test]
  fn normalizes_typographic_quotes_and_raw_newlines() {
    let raw = "{\u{201C}content\u{201D}: \u{201C}Line one\nline   two \u{2014} done\u{201D}}";
    let ex = extract(raw, &UNIT_SHAPE).unwrap();
    assert_eq!(ex.tier, RepairTier::Normalized);
    assert_eq!(ex.value["content"], "Line one line two - done");
  }

  #[test]
  fn escapes_stray_inner_quotes() {
    let raw = r#"{"content": "He said "hello" to everyone", "keyPoints": ["greeting"]}"#;
    let ex = extract(raw, &UNIT_SHAPE).unwrap();
    assert_eq!(ex.value["content"], "He said \"hello\" to everyone");
    assert_eq!(ex.value["keyPoints"], json!(["greeting"]));
  }

  #[test]
  fn truncated_value_string_is_closed() {
    let raw = r#"{"chunks": [ {"type":"hook","title":"Why leaves are green","content":"Chlorophyll absorbs red and blu"#;
    let ex = extract(raw, &CHUNKS_SHAPE).unwrap();
    assert_eq!(ex.tier, RepairTier::Balanced);
    let chunks = ex.value["chunks"].as_array().unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0]["type"], "hook");
    assert_eq!(chunks[0]["content"], "Chlorophyll absorbs red and blu");
  }

  #[test]
  fn dangling_key_and_trailing_comma_are_trimmed() {
    let raw = r#"{"title": "Cells", "description": "Basics", "units": [{"title": "Intro"}, {"title": "Membranes", "descr"#;
    let ex = extract(raw, &OUTLINE_SHAPE).unwrap();
    let units = ex.value["units"].as_array().unwrap();
    assert_eq!(units.len(), 2);
    assert_eq!(units[1]["title"], "Membranes");
    assert!(units[1].get("descr").is_none());

    let raw = r#"{"content": "ok", "keyPoints": ["a", "b",]}"#;
    let ex = extract(raw, &UNIT_SHAPE).unwrap();
    assert_eq!(ex.value["keyPoints"], json!(["a", "b"]));
  }

  #[test]
  fn missing_commas_between_elements_are_inserted() {
    let raw = "{\"chunks\": [{\"type\": \"hook\"} {\"type\": \"recap\"}]";
    let ex = extract(raw, &CHUNKS_SHAPE).unwrap();
    assert_eq!(ex.value["chunks"].as_array().unwrap().len(), 2);
  }

  #[test]
  fn field_scan_recovers_labelled_fragments() {
    let raw = "Title: Plant Energy\nDescription: How plants make food\nunits: broken";
    let ex = extract(raw, &OUTLINE_SHAPE).unwrap();
    assert_eq!(ex.tier, RepairTier::FieldScan);
    assert_eq!(ex.confidence(), Confidence::Low);
    assert_eq!(ex.value["title"], "Plant Energy");
    assert_eq!(ex.value["description"], "How plants make food");
  }

  #[test]
  fn field_scan_rebuilds_array_elements_from_anchors() {
    // Structure broken beyond balancing: unquoted garbage between elements.
    let raw = r#"chunks => "type": "hook", "title": "Start" ]]] "title": "Core idea", "type": "concept", "content": "Energy flows" }}} "type": "recap""#;
    let ex = extract(raw, &CHUNKS_SHAPE).unwrap();
    assert_eq!(ex.tier, RepairTier::FieldScan);
    let chunks = ex.value["chunks"].as_array().unwrap();
    assert_eq!(chunks.len(), 3);
    assert_eq!(chunks[0]["title"], "Start");
    assert_eq!(chunks[1]["type"], "concept");
    assert_eq!(chunks[1]["content"], "Energy flows");
    assert_eq!(chunks[2]["type"], "recap");
  }

  #[test]
  fn truncated_mid_field_still_yields_record() {
    let raw = r#"{"content": "Photosynthesis converts light energy into chemical energy stored in gluc"#;
    let ex = extract(raw, &UNIT_SHAPE).unwrap();
    let content = ex.value["content"].as_str().unwrap();
    assert!(content.starts_with("Photosynthesis converts"));
  }

  #[test]
  fn unrecoverable_input_is_an_error() {
    assert!(extract("", &UNIT_SHAPE).is_err());
    assert!(extract("I cannot help with that.", &UNIT_SHAPE).is_err());
    assert!(extract(r#"{"unrelated": 1}"#, &UNIT_SHAPE).is_err());
  }

  #[test]
  fn accessors_tolerate_loose_types() {
    let v = json!({"estimatedMinutes": "15 minutes", "keyPoints": "single", "n": 3, "visual": "yes"});
    assert_eq!(get_u32(&v, &["estimatedMinutes"]), Some(15));
    assert_eq!(get_list(&v, &["keyPoints"]), vec!["single".to_string()]);
    assert_eq!(get_str(&v, &["missing", "n"]).as_deref(), Some("3"));
    assert_eq!(get_bool(&v, &["visual"]), Some(true));
  }
}
