//! Oracle-free content used when generation and repair both fail.
//!
//! Three levels, escalating:
//!   a) per-type template prose and filler chunks built from a unit's own key points
//!   b) curated listings for known enumerable domains
//!   c) a static four-unit course for when the outline itself cannot be produced
//!
//! Everything here is deterministic given its inputs.

use std::collections::BTreeSet;

use crate::domain::{
  Chunk, ChunkType, CourseOutline, CourseSpec, Unit, UnitType, ValidationState, VocabularyItem,
};

// ---------------------------------------------------------------------------
// (a) templated prose
// ---------------------------------------------------------------------------

fn join_points(points: &[String]) -> String {
  match points.len() {
    0 => String::new(),
    1 => points[0].clone(),
    n => format!("{} and {}", points[..n - 1].join(", "), points[n - 1]),
  }
}

/// Lesson prose for a unit, shaped by its type and built from its key points.
pub fn unit_template(unit: &Unit) -> String {
  let points = unit.key_points_or_title();
  let title = unit.title.trim();
  let mut out = String::new();

  let opening = match unit.unit_type {
    UnitType::Introduction => format!(
      "Welcome to {title}. This unit sets the stage for everything that follows: it names the main ideas, shows why they matter, and gives you a map of where the course is heading. Along the way we will meet {}.",
      join_points(&points)
    ),
    UnitType::Concept => format!(
      "This unit builds a working understanding of {title}. Each idea below is stated plainly, connected to what you already know, and then put to use so that it sticks. The ideas covered are {}.",
      join_points(&points)
    ),
    UnitType::Vocabulary => format!(
      "This unit collects the core items of {title}. Read each item aloud, note its form and its meaning, and revisit the list several times rather than memorising it in one pass. The items grouped here are {}.",
      join_points(&points)
    ),
    UnitType::Example => format!(
      "This unit works through {title} by example. Watching an idea applied to a concrete case is often the fastest way to understand it, so each example below highlights one part of the topic: {}.",
      join_points(&points)
    ),
    UnitType::Practice => format!(
      "This unit is about doing. You will apply {title} step by step, checking your work as you go. Practice focuses on {}.",
      join_points(&points)
    ),
    UnitType::Summary => format!(
      "This unit brings {title} together. We revisit the most important ideas of the course, see how they connect, and check that each one is clear: {}.",
      join_points(&points)
    ),
  };
  out.push_str(&opening);
  out.push_str("\n\n");

  for (i, point) in points.iter().enumerate() {
    let paragraph = match unit.unit_type {
      UnitType::Introduction | UnitType::Concept => format!(
        "{}. {point}. Begin by putting this idea into a single sentence of your own. Then ask where it shows up in practice and what would change if it were missing. Linking it to a familiar situation makes it far easier to recall later.",
        i + 1
      ),
      UnitType::Vocabulary => format!(
        "{}. {point}. Say it, write it, and use it in a short sentence. Pair it with an image or a situation you already know so that the meaning comes back quickly when you meet it again.",
        i + 1
      ),
      UnitType::Example => format!(
        "{}. {point}. Look at what is given, what is asked, and which step connects them. Notice the reasoning behind each step rather than only the final answer.",
        i + 1
      ),
      UnitType::Practice => format!(
        "{}. {point}. Try it on your own first, then compare your attempt with the explanation. If a step feels unclear, repeat it with a slightly different starting point.",
        i + 1
      ),
      UnitType::Summary => format!(
        "{}. {point}. Recall the definition, one example, and one common mistake. If any of the three is hard to produce, return to the unit where it was introduced.",
        i + 1
      ),
    };
    out.push_str(&paragraph);
    out.push_str("\n\n");
  }

  out.push_str(&format!(
    "Take a moment to review these points before moving on. Each later unit assumes you are comfortable with {title}."
  ));
  out
}

/// Filler chunk for one position of a unit's sequence. Quiz positions get their
/// questions from the chunk generator; this only supplies the frame.
pub fn filler_chunk(unit: &Unit, chunk_type: ChunkType, chunk_number: usize) -> Chunk {
  let points = unit.key_points_or_title();
  let key_point = points[(chunk_number.saturating_sub(1)) % points.len()].clone();
  let title = unit.title.trim();

  let (chunk_title, content) = match chunk_type {
    ChunkType::Hook => (
      format!("Why {title} matters"),
      format!("Before diving in, think of one situation where {key_point} would make a difference. Keep that picture in mind as you work through this unit."),
    ),
    ChunkType::Concept => (
      key_point.clone(),
      format!("{key_point}. State it in your own words, then connect it to what you already know about {title}."),
    ),
    ChunkType::Vocabulary => (
      format!("Key terms: {key_point}"),
      format!("Learn the form and the meaning of {key_point}. Say it aloud and use it once in a sentence of your own."),
    ),
    ChunkType::Example => (
      format!("Example: {key_point}"),
      format!("Here {key_point} is applied to a concrete case from {title}. Follow each step and note why it is taken."),
    ),
    ChunkType::Quiz => (
      format!("Check your understanding: {title}"),
      "Answer the questions below using only what this unit has covered so far.".to_string(),
    ),
    ChunkType::Practice => (
      format!("Practice: {key_point}"),
      format!("Apply {key_point} on your own. Write down each step, then compare your result with the key points of {title}."),
    ),
    ChunkType::Recap => (
      format!("Recap: {title}"),
      format!("In this unit you covered {}. Review any point that still feels uncertain before continuing.", join_points(&points)),
    ),
  };

  Chunk {
    chunk_number,
    title: chunk_title,
    content,
    chunk_type,
    key_point,
    quiz_questions: None,
    vocabulary_items: None,
  }
}

/// Unit text replaced wholesale by template content.
pub fn fallback_unit(unit: &Unit) -> Unit {
  let mut out = unit.clone();
  out.content = unit_template(unit);
  out.key_points = unit.key_points_or_title();
  out.validation_state = ValidationState::Expanded;
  out
}

/// Generic distractors for synthesized questions; never true statements about the unit.
pub fn distractor_statements(title: &str) -> [String; 4] {
  [
    format!("{title} only matters in rare edge cases"),
    format!("{title} cannot be learned step by step"),
    format!("{title} has no connection to everyday examples"),
    format!("{title} is unrelated to the rest of this course"),
  ]
}

// ---------------------------------------------------------------------------
// (b) curated listings
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct ListingItem {
  pub native: String,
  pub romanized: String,
  pub meaning: String,
}

#[derive(Clone, Debug)]
pub struct StaticListing {
  pub domain: String,
  pub title: String,
  pub items: Vec<ListingItem>,
}

impl StaticListing {
  pub fn len(&self) -> usize {
    self.items.len()
  }

  /// Markdown table, one row per item.
  pub fn render_table(&self) -> String {
    let mut out = format!("{}\n\n| Item | Romanization | Meaning |\n|---|---|---|\n", self.title);
    for item in &self.items {
      out.push_str(&format!("| {} | {} | {} |\n", item.native, item.romanized, item.meaning));
    }
    out
  }

  pub fn vocabulary_items(&self) -> Vec<VocabularyItem> {
    self
      .items
      .iter()
      .map(|i| VocabularyItem {
        native: i.native.clone(),
        romanized: i.romanized.clone(),
        pronunciation: i.romanized.clone(),
        meaning: i.meaning.clone(),
        image_prompt: None,
        is_visual_concept: false,
      })
      .collect()
  }
}

fn listing(domain: &str, title: &str, rows: &[(&str, &str, &str)]) -> StaticListing {
  StaticListing {
    domain: domain.to_string(),
    title: title.to_string(),
    items: rows
      .iter()
      .map(|(n, r, m)| ListingItem { native: n.to_string(), romanized: r.to_string(), meaning: m.to_string() })
      .collect(),
  }
}

const HIRAGANA: &[(&str, &str)] = &[
  ("あ", "a"), ("い", "i"), ("う", "u"), ("え", "e"), ("お", "o"),
  ("か", "ka"), ("き", "ki"), ("く", "ku"), ("け", "ke"), ("こ", "ko"),
  ("さ", "sa"), ("し", "shi"), ("す", "su"), ("せ", "se"), ("そ", "so"),
  ("た", "ta"), ("ち", "chi"), ("つ", "tsu"), ("て", "te"), ("と", "to"),
  ("な", "na"), ("に", "ni"), ("ぬ", "nu"), ("ね", "ne"), ("の", "no"),
  ("は", "ha"), ("ひ", "hi"), ("ふ", "fu"), ("へ", "he"), ("ほ", "ho"),
  ("ま", "ma"), ("み", "mi"), ("む", "mu"), ("め", "me"), ("も", "mo"),
  ("や", "ya"), ("ゆ", "yu"), ("よ", "yo"),
  ("ら", "ra"), ("り", "ri"), ("る", "ru"), ("れ", "re"), ("ろ", "ro"),
  ("わ", "wa"), ("を", "wo"), ("ん", "n"),
];

const GREEK: &[(&str, &str)] = &[
  ("Α α", "alpha"), ("Β β", "beta"), ("Γ γ", "gamma"), ("Δ δ", "delta"),
  ("Ε ε", "epsilon"), ("Ζ ζ", "zeta"), ("Η η", "eta"), ("Θ θ", "theta"),
  ("Ι ι", "iota"), ("Κ κ", "kappa"), ("Λ λ", "lambda"), ("Μ μ", "mu"),
  ("Ν ν", "nu"), ("Ξ ξ", "xi"), ("Ο ο", "omicron"), ("Π π", "pi"),
  ("Ρ ρ", "rho"), ("Σ σ", "sigma"), ("Τ τ", "tau"), ("Υ υ", "upsilon"),
  ("Φ φ", "phi"), ("Χ χ", "chi"), ("Ψ ψ", "psi"), ("Ω ω", "omega"),
];

const CYRILLIC: &[(&str, &str)] = &[
  ("А а", "a"), ("Б б", "b"), ("В в", "v"), ("Г г", "g"), ("Д д", "d"),
  ("Е е", "ye"), ("Ё ё", "yo"), ("Ж ж", "zh"), ("З з", "z"), ("И и", "i"),
  ("Й й", "y"), ("К к", "k"), ("Л л", "l"), ("М м", "m"), ("Н н", "n"),
  ("О о", "o"), ("П п", "p"), ("Р р", "r"), ("С с", "s"), ("Т т", "t"),
  ("У у", "u"), ("Ф ф", "f"), ("Х х", "kh"), ("Ц ц", "ts"), ("Ч ч", "ch"),
  ("Ш ш", "sh"), ("Щ щ", "shch"), ("Ъ ъ", "hard sign"), ("Ы ы", "y"),
  ("Ь ь", "soft sign"), ("Э э", "e"), ("Ю ю", "yu"), ("Я я", "ya"),
];

const HANGUL_JAMO: &[(&str, &str, &str)] = &[
  ("ㄱ", "g/k", "consonant giyeok"), ("ㄴ", "n", "consonant nieun"),
  ("ㄷ", "d/t", "consonant digeut"), ("ㄹ", "r/l", "consonant rieul"),
  ("ㅁ", "m", "consonant mieum"), ("ㅂ", "b/p", "consonant bieup"),
  ("ㅅ", "s", "consonant siot"), ("ㅇ", "ng", "consonant ieung"),
  ("ㅈ", "j", "consonant jieut"), ("ㅊ", "ch", "consonant chieut"),
  ("ㅋ", "k", "consonant kieuk"), ("ㅌ", "t", "consonant tieut"),
  ("ㅍ", "p", "consonant pieup"), ("ㅎ", "h", "consonant hieut"),
  ("ㅏ", "a", "vowel a"), ("ㅑ", "ya", "vowel ya"), ("ㅓ", "eo", "vowel eo"),
  ("ㅕ", "yeo", "vowel yeo"), ("ㅗ", "o", "vowel o"), ("ㅛ", "yo", "vowel yo"),
  ("ㅜ", "u", "vowel u"), ("ㅠ", "yu", "vowel yu"), ("ㅡ", "eu", "vowel eu"),
  ("ㅣ", "i", "vowel i"),
];

const NATO: &[&str] = &[
  "Alfa", "Bravo", "Charlie", "Delta", "Echo", "Foxtrot", "Golf", "Hotel", "India",
  "Juliett", "Kilo", "Lima", "Mike", "November", "Oscar", "Papa", "Quebec", "Romeo",
  "Sierra", "Tango", "Uniform", "Victor", "Whiskey", "X-ray", "Yankee", "Zulu",
];

/// Curated listing for an enumerable domain tag, if one exists.
pub fn curated_listing(domain: &str) -> Option<StaticListing> {
  match domain {
    "hiragana" => {
      let rows: Vec<(&str, &str, String)> =
        HIRAGANA.iter().map(|(k, r)| (*k, *r, format!("syllable {r}"))).collect();
      let rows: Vec<(&str, &str, &str)> = rows.iter().map(|(k, r, m)| (*k, *r, m.as_str())).collect();
      Some(listing(domain, "The basic hiragana syllabary", &rows))
    }
    "greek_alphabet" => {
      let rows: Vec<(&str, &str, &str)> = GREEK.iter().map(|(l, n)| (*l, *n, *n)).collect();
      Some(listing(domain, "The Greek alphabet", &rows))
    }
    "cyrillic_alphabet" => {
      let rows: Vec<(&str, &str, &str)> = CYRILLIC.iter().map(|(l, r)| (*l, *r, "letter")).collect();
      Some(listing(domain, "The Russian Cyrillic alphabet", &rows))
    }
    "hangul_jamo" => Some(listing(domain, "The basic Hangul jamo", HANGUL_JAMO)),
    "nato_phonetic" => {
      let letters: Vec<String> = NATO.iter().map(|w| w[..1].to_string()).collect();
      let rows: Vec<(&str, &str, &str)> =
        NATO.iter().zip(letters.iter()).map(|(w, l)| (l.as_str(), *w, *w)).collect();
      Some(listing(domain, "The NATO phonetic alphabet", &rows))
    }
    "latin_alphabet" => {
      let letters: Vec<(String, String)> = ('A'..='Z')
        .map(|c| (format!("{} {}", c, c.to_ascii_lowercase()), c.to_ascii_lowercase().to_string()))
        .collect();
      let rows: Vec<(&str, &str, &str)> =
        letters.iter().map(|(n, r)| (n.as_str(), r.as_str(), "letter")).collect();
      Some(listing(domain, "The Latin alphabet", &rows))
    }
    _ => None,
  }
}

// ---------------------------------------------------------------------------
// (c) emergency course
// ---------------------------------------------------------------------------

fn outline_unit(index: usize, title: String, unit_type: UnitType, description: String, key_points: Vec<String>) -> Unit {
  let mut unit = Unit::new(index, title, unit_type);
  unit.description = description;
  unit.key_points = key_points;
  unit.content = unit_template(&unit);
  unit
}

/// Static four-unit course: welcome, foundations, application, summary.
pub fn emergency_outline(spec: &CourseSpec) -> CourseOutline {
  let subject = spec.subject.trim();
  let subject = if subject.is_empty() { "the subject" } else { subject };
  let units = vec![
    outline_unit(
      0,
      format!("Welcome to {subject}"),
      UnitType::Introduction,
      format!("What {subject} is and what this course covers."),
      vec![format!("What {subject} is"), format!("Why {subject} matters"), "How this course is organised".into()],
    ),
    outline_unit(
      1,
      format!("Foundations of {subject}"),
      UnitType::Concept,
      format!("The core ideas and vocabulary of {subject}."),
      vec![format!("Core terms of {subject}"), format!("The central ideas of {subject}"), "How the ideas connect".into()],
    ),
    outline_unit(
      2,
      format!("Applying {subject}"),
      UnitType::Practice,
      format!("Using {subject} on concrete problems."),
      vec![format!("A worked example of {subject}"), "Common mistakes to avoid".into(), "Checking your own work".into()],
    ),
    outline_unit(
      3,
      format!("{subject}: Summary"),
      UnitType::Summary,
      "A review of the whole course.".into(),
      vec!["The key ideas in brief".into(), "Where to go next".into()],
    ),
  ];
  let targeted_concepts: BTreeSet<String> = [format!("Core terms of {subject}"), format!("The central ideas of {subject}")]
    .into_iter()
    .collect();
  CourseOutline {
    title: format!("{subject}: A First Course"),
    description: format!("A short {} course introducing {subject}.", spec.target_level.as_str()),
    units,
    targeted_concepts,
  }
}

/// Deterministic unit used to bring a short outline up to its minimum size.
pub fn padding_unit(index: usize, subject: &str, ordinal: usize) -> Unit {
  let (title, unit_type, points) = if ordinal % 2 == 0 {
    (
      format!("Practice: {subject}"),
      UnitType::Practice,
      vec![format!("Applying {subject} step by step"), "Checking your answers".to_string()],
    )
  } else {
    (
      format!("Review: {subject}"),
      UnitType::Summary,
      vec![format!("The main ideas of {subject}"), "Questions to revisit".to_string()],
    )
  };
  outline_unit(index, title, unit_type, format!("Consolidates what has been covered on {subject}."), points)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::TargetLevel;

  #[test]
  fn templates_are_deterministic_and_use_key_points() {
    let mut unit = Unit::new(2, "Light reactions", UnitType::Concept);
    unit.key_points = vec!["Chlorophyll absorbs light".into(), "Water is split".into()];
    let a = unit_template(&unit);
    let b = unit_template(&unit);
    assert_eq!(a, b);
    assert!(a.contains("Chlorophyll absorbs light"));
    assert!(a.contains("Water is split"));
    assert!(!a.to_lowercase().contains("lorem"));
  }

  #[test]
  fn template_without_key_points_uses_title() {
    let unit = Unit::new(0, "Cell walls", UnitType::Summary);
    assert!(unit_template(&unit).contains("Cell walls"));
  }

  #[test]
  fn curated_listings_have_real_cardinalities() {
    assert_eq!(curated_listing("hiragana").unwrap().len(), 46);
    assert_eq!(curated_listing("greek_alphabet").unwrap().len(), 24);
    assert_eq!(curated_listing("cyrillic_alphabet").unwrap().len(), 33);
    assert_eq!(curated_listing("hangul_jamo").unwrap().len(), 24);
    assert_eq!(curated_listing("nato_phonetic").unwrap().len(), 26);
    assert_eq!(curated_listing("latin_alphabet").unwrap().len(), 26);
    assert!(curated_listing("periodic_table").is_none());
  }

  #[test]
  fn rendered_table_has_one_row_per_item() {
    let listing = curated_listing("greek_alphabet").unwrap();
    let table = listing.render_table();
    let rows = table.lines().filter(|l| l.starts_with('|')).count();
    assert_eq!(rows, 24 + 2);
    assert_eq!(listing.vocabulary_items()[0].romanized, "alpha");
  }

  #[test]
  fn emergency_outline_has_four_fixed_units() {
    let outline = emergency_outline(&CourseSpec::new("Photosynthesis", TargetLevel::Beginner));
    let types: Vec<UnitType> = outline.units.iter().map(|u| u.unit_type).collect();
    assert_eq!(
      types,
      vec![UnitType::Introduction, UnitType::Concept, UnitType::Practice, UnitType::Summary]
    );
    assert!(outline.units.iter().enumerate().all(|(i, u)| u.index == i));
    assert!(outline.units[0].title.contains("Photosynthesis"));
  }

  #[test]
  fn filler_chunks_cycle_through_key_points() {
    let mut unit = Unit::new(0, "Verbs", UnitType::Vocabulary);
    unit.key_points = vec!["ser".into(), "estar".into()];
    assert_eq!(filler_chunk(&unit, ChunkType::Concept, 1).key_point, "ser");
    assert_eq!(filler_chunk(&unit, ChunkType::Concept, 2).key_point, "estar");
    assert_eq!(filler_chunk(&unit, ChunkType::Recap, 3).key_point, "ser");
  }
}
