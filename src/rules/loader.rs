use std::fs;
use std::path::{Path, PathBuf};

use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use tracing::{debug, info};

use super::{ReplacementEngine, ReplacementRule};
use crate::error::MyError;

/** one record of a rule file: `[{ "pattern": "...", "flags": "i", "replacement": "..." }, ...]` */
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleRecord {
 pub pattern: String,
 #[serde(default)]
 pub flags: Option<String>,
 pub replacement: String,
 #[serde(default)]
 pub max_iterations: Option<usize>,
}

impl RuleRecord {
 pub fn compile(&self, origin: &Path) -> Result<ReplacementRule, MyError> {
  let pattern = build_pattern(&self.pattern, self.flags.as_deref().unwrap_or(""), origin)?;
  let rule = ReplacementRule::new(pattern, translate_template(&self.replacement));
  Ok(match self.max_iterations {
   Some(n) => rule.with_max_iterations(n),
   None => rule,
  })
 }
}

/// Loads every `*.json` file of `dir`, in file name order, into one engine.
///
/// Any unreadable or malformed file aborts the load: running with half a
/// rule set would silently leave links unfixed.
pub fn load_rules_dir(dir: &Path) -> Result<ReplacementEngine, MyError> {
 let entries = fs::read_dir(dir).map_err(|source| MyError::RuleDir {
  path: dir.to_path_buf(),
  source,
 })?;

 let mut files: Vec<PathBuf> = vec![];
 for entry in entries {
  let entry = entry.map_err(|source| MyError::RuleDir {
   path: dir.to_path_buf(),
   source,
  })?;
  let path = entry.path();
  if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
   files.push(path);
  }
 }
 files.sort();

 let mut rules = vec![];
 for path in &files {
  let content = fs::read_to_string(path).map_err(|source| MyError::RuleDir {
   path: path.clone(),
   source,
  })?;
  let loaded = parse_rules(&content, path)?;
  debug!(file = %path.display(), count = loaded.len(), "loaded rule file");
  rules.extend(loaded);
 }

 if rules.is_empty() {
  return Err(MyError::NoRules(dir.to_path_buf()));
 }

 info!(count = rules.len(), files = files.len(), "found replacers");
 Ok(ReplacementEngine::new(rules))
}

pub fn parse_rules(json: &str, origin: &Path) -> Result<Vec<ReplacementRule>, MyError> {
 let records: Vec<RuleRecord> = serde_json::from_str(json).map_err(|source| MyError::RuleFile {
  path: origin.to_path_buf(),
  source,
 })?;
 records.iter().map(|record| record.compile(origin)).collect()
}

/// Maps JavaScript RegExp flag letters onto the `regex` builder.
fn build_pattern(pattern: &str, flags: &str, origin: &Path) -> Result<Regex, MyError> {
 let mut builder = RegexBuilder::new(pattern);
 for flag in flags.chars() {
  match flag {
   'i' => {
    builder.case_insensitive(true);
   }
   'm' => {
    builder.multi_line(true);
   }
   's' => {
    builder.dot_matches_new_line(true);
   }
   'x' => {
    builder.ignore_whitespace(true);
   }
   // global and unicode are always on, sticky and indices have no meaning here
   'g' | 'u' | 'y' | 'd' => {}
   flag => {
    return Err(MyError::RuleFlag {
     origin: origin.display().to_string(),
     flag,
    })
   }
  }
 }
 builder.build().map_err(|source| MyError::RulePattern {
  origin: origin.display().to_string(),
  pattern: pattern.into(),
  source,
 })
}

/// Translates a JavaScript replacement template (`$1`, `$&`, `$<name>`, `$$`)
/// into `regex` syntax. Anything else after a `$` stays literal.
pub fn translate_template(template: &str) -> String {
 let mut out = String::with_capacity(template.len() + 8);
 let mut chars = template.chars().peekable();

 while let Some(c) = chars.next() {
  if c != '$' {
   out.push(c);
   continue;
  }
  match chars.peek().copied() {
   Some('$') => {
    chars.next();
    out.push_str("$$");
   }
   Some('&') => {
    chars.next();
    out.push_str("${0}");
   }
   Some(d) if d.is_ascii_digit() => {
    chars.next();
    let mut digits = String::from(d);
    if let Some(d2) = chars.peek().copied().filter(|c| c.is_ascii_digit()) {
     chars.next();
     digits.push(d2);
    }
    if digits.bytes().all(|b| b == b'0') {
     // `$0` is not a group reference in JavaScript
     out.push_str("$$");
     out.push_str(&digits);
    } else {
     out.push_str(&format!("${{{}}}", digits.trim_start_matches('0')));
    }
   }
   Some('<') => {
    chars.next();
    let mut name = String::new();
    let mut closed = false;
    for n in chars.by_ref() {
     if n == '>' {
      closed = true;
      break;
     }
     name.push(n);
    }
    if closed {
     out.push_str(&format!("${{{name}}}"));
    } else {
     out.push_str("$$<");
     out.push_str(&name);
    }
   }
   _ => out.push_str("$$"),
  }
 }
 out
}

#[cfg(test)]
mod tests {
 use std::fs;

 use super::*;

 #[test]
 fn templates_are_translated() {
  assert_eq!(translate_template("example.com/watch?v=$1"), "example.com/watch?v=${1}");
  assert_eq!(translate_template("$1abc"), "${1}abc");
  assert_eq!(translate_template("$12x"), "${12}x");
  assert_eq!(translate_template("[$&]"), "[${0}]");
  assert_eq!(translate_template("$<id>!"), "${id}!");
  assert_eq!(translate_template("cost: $$5"), "cost: $$5");
  assert_eq!(translate_template("5 $"), "5 $$");
  assert_eq!(translate_template("$0"), "$$0");
 }

 #[test]
 fn js_group_followed_by_letters_expands() {
  let rules = parse_rules(
   r#"[{ "pattern": "v=(\\d+)", "replacement": "id-$1abc" }]"#,
   Path::new("inline"),
  )
  .unwrap();
  assert_eq!(rules[0].apply("v=42"), "id-42abc");
 }

 #[test]
 fn flags_are_applied() {
  let rules = parse_rules(
   r#"[{ "pattern": "TWITTER\\.com", "flags": "gi", "replacement": "fxtwitter.com" }]"#,
   Path::new("inline"),
  )
  .unwrap();
  assert_eq!(rules[0].apply("https://twitter.com/x"), "https://fxtwitter.com/x");
 }

 #[test]
 fn unknown_flag_is_rejected() {
  let err = parse_rules(r#"[{ "pattern": "a", "flags": "q", "replacement": "b" }]"#, Path::new("inline"))
   .unwrap_err();
  assert!(matches!(err, MyError::RuleFlag { flag: 'q', .. }));
 }

 #[test]
 fn invalid_pattern_is_rejected() {
  let err = parse_rules(r#"[{ "pattern": "(", "replacement": "b" }]"#, Path::new("inline")).unwrap_err();
  assert!(matches!(err, MyError::RulePattern { .. }));
 }

 #[test]
 fn malformed_json_is_rejected() {
  let err = parse_rules(r#"{ "pattern": "a" }"#, Path::new("inline")).unwrap_err();
  assert!(matches!(err, MyError::RuleFile { .. }));
 }

 #[test]
 fn directory_is_loaded_in_file_name_order() {
  let dir = tempfile::tempdir().unwrap();
  fs::write(dir.path().join("20-second.json"), r#"[{ "pattern": "y", "replacement": "z" }]"#).unwrap();
  fs::write(dir.path().join("10-first.json"), r#"[{ "pattern": "x", "replacement": "y" }]"#).unwrap();
  fs::write(dir.path().join("notes.txt"), "not a rule file").unwrap();

  let engine = load_rules_dir(dir.path()).unwrap();
  assert_eq!(engine.len(), 2);
  assert_eq!(engine.apply_all("x"), "z");
 }

 #[test]
 fn max_iterations_is_read() {
  let rules = parse_rules(
   r#"[{ "pattern": "a", "replacement": "aa", "maxIterations": 3 }]"#,
   Path::new("inline"),
  )
  .unwrap();
  assert_eq!(rules[0].apply("a"), "a");
 }

 #[test]
 fn empty_directory_fails() {
  let dir = tempfile::tempdir().unwrap();
  fs::write(dir.path().join("empty.json"), "[]").unwrap();
  let err = load_rules_dir(dir.path()).unwrap_err();
  assert!(matches!(err, MyError::NoRules(_)));
 }

 #[test]
 fn missing_directory_fails() {
  let dir = tempfile::tempdir().unwrap();
  let err = load_rules_dir(&dir.path().join("nope")).unwrap_err();
  assert!(matches!(err, MyError::RuleDir { .. }));
 }
 #[test]
 fn shipped_rules_load() {
  let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join(crate::config::DEFAULT_RULES_DIR);
  let engine = load_rules_dir(&dir).unwrap();
  assert_eq!(
   engine.apply_all("https://www.youtube.com/shorts/xyz_1?utm_source=share"),
   "https://www.youtube.com/watch?v=xyz_1"
  );
  assert_eq!(engine.apply_all("https://youtu.be/abc?si=Q1-w"), "https://youtu.be/abc");
  assert_eq!(
   engine.apply_all("see https://a.org/p?utm_source=x&fbclid=y now"),
   "see https://a.org/p now"
  );
  assert_eq!(engine.apply_all("https://a.org/p?id=3&utm_source=x"), "https://a.org/p?id=3&utm_source=x");
 }
}
