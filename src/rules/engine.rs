use super::rule::ReplacementRule;

/** ordered rule set; every rule sees the output of the previous one */
#[derive(Debug, Clone, Default)]
pub struct ReplacementEngine {
 rules: Vec<ReplacementRule>,
}

impl ReplacementEngine {
 pub fn new(rules: Vec<ReplacementRule>) -> Self {
  Self { rules }
 }

 pub fn len(&self) -> usize {
  self.rules.len()
 }

 pub fn is_empty(&self) -> bool {
  self.rules.is_empty()
 }

 pub fn apply_all(&self, text: &str) -> String {
  if text.is_empty() {
   return String::new();
  }
  self
   .rules
   .iter()
   .fold(text.to_string(), |current, rule| rule.apply(&current))
 }
}

impl FromIterator<ReplacementRule> for ReplacementEngine {
 fn from_iter<T: IntoIterator<Item = ReplacementRule>>(iter: T) -> Self {
  Self::new(iter.into_iter().collect())
 }
}

#[cfg(test)]
mod tests {
 use regex::Regex;

 use super::*;

 fn engine(rules: &[(&str, &str)]) -> ReplacementEngine {
  rules
   .iter()
   .map(|(p, r)| ReplacementRule::new(Regex::new(p).unwrap(), *r))
   .collect()
 }

 #[test]
 fn rules_are_chained_in_order() {
  let e = engine(&[("x", "y"), ("y", "z")]);
  assert_eq!(e.apply_all("x"), "z");

  // reversed order: the second rule never sees a "y"
  let e = engine(&[("y", "z"), ("x", "y")]);
  assert_eq!(e.apply_all("x"), "y");
 }

 #[test]
 fn identity_without_match() {
  let e = engine(&[(r"example\.com/embed/(\w+)", "example.com/watch?v=$1")]);
  let text = "plain text, no links\n  ";
  assert_eq!(e.apply_all(text), text);
 }

 #[test]
 fn empty_input_is_returned_unchanged() {
  let e = engine(&[("^$", "never")]);
  assert_eq!(e.apply_all(""), "");
 }

 #[test]
 fn apply_all_is_deterministic() {
  let e = engine(&[(r"(\w+)\.example", "$1.mirror"), ("mirror", "cdn")]);
  let first = e.apply_all("www.example/a and img.example/b");
  for _ in 0..5 {
   assert_eq!(e.apply_all("www.example/a and img.example/b"), first);
  }
  assert_eq!(first, "www.cdn/a and img.cdn/b");
 }

 #[test]
 fn empty_engine_is_identity() {
  let e = ReplacementEngine::default();
  assert!(e.is_empty());
  assert_eq!(e.apply_all("abc"), "abc");
 }
}
