//! Hanzi → Hanyu Pinyin (tone diacritics, space-separated), copy non-Chinese as-is.
//!
//! Used to fill the romanization of vocabulary items locally when the oracle
//! left it empty.
//!
//! Example:
//!   输入: "中国人计划 2025！"
//!   输出: "zhōng guó rén jì huà 2025！"
use pinyin::ToPinyin;

use crate::util::is_cjk;

/// Convert Chinese text into Hanyu Pinyin with tone diacritics, space-separated.
/// Non-Chinese characters are copied as-is.
///
/// Per-character conversion (no word segmentation), so some polyphonic
/// characters use their default reading.
pub fn to_pinyin_diacritics(text: &str) -> String {
  let mut out = String::with_capacity(text.len() * 2);
  let mut last_was_hanzi = false;

  for ch in text.chars() {
    if let Some(py) = ch.to_pinyin() {
      if last_was_hanzi {
        out.push(' ');
      }
      out.push_str(py.with_tone());
      last_was_hanzi = true;
    } else {
      out.push(ch);
      last_was_hanzi = false;
    }
  }

  out
}

/// Romanization for a vocabulary headword, if it contains Han characters.
pub fn romanize_han(native: &str) -> Option<String> {
  if native.chars().any(is_cjk) {
    Some(to_pinyin_diacritics(native.trim()))
  } else {
    None
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn converts_han_and_keeps_other_text() {
    assert_eq!(to_pinyin_diacritics("你好 ok"), "nǐ hǎo ok");
  }

  #[test]
  fn romanize_only_applies_to_han() {
    assert_eq!(romanize_han("咖啡").as_deref(), Some("kā fēi"));
    assert_eq!(romanize_han("hola"), None);
  }
}
