use regex::Regex;
use tracing::{debug, warn};

use crate::tools::preview;

/// Lower bound for the number of substitutions one `apply` may perform.
pub const MIN_ITERATION_CAP: usize = 64;
/// Upper bound; every substitution copies the whole text.
pub const MAX_ITERATION_CAP: usize = 1024;

/** one pattern / replacement pair, compiled once when the rules are loaded */
#[derive(Debug, Clone)]
pub struct ReplacementRule {
 pattern: Regex,
 /// template in `regex` syntax (`${1}`, `${name}`, `$$`)
 replacement: String,
 max_iterations: Option<usize>,
}

impl ReplacementRule {
 pub fn new(pattern: Regex, replacement: impl Into<String>) -> Self {
  Self {
   pattern,
   replacement: replacement.into(),
   max_iterations: None,
  }
 }

 pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
  self.max_iterations = Some(max_iterations);
  self
 }

 fn iteration_cap(&self, text: &str) -> usize {
  self
   .max_iterations
   .unwrap_or_else(|| text.len().clamp(MIN_ITERATION_CAP, MAX_ITERATION_CAP))
 }

 /// Replaces matches until the pattern no longer matches.
 ///
 /// Every round looks up the first match, expands the template against its
 /// captures and substitutes the first literal occurrence of the matched
 /// text. When the cap is reached the rule is abandoned and `text` comes back
 /// untouched.
 pub fn apply(&self, text: &str) -> String {
  let cap = self.iteration_cap(text);
  let mut result = text.to_string();
  let mut iterations = 0usize;

  loop {
   let (matched, expanded) = {
    let Some(caps) = self.pattern.captures(&result) else {
     break;
    };
    let Some(whole) = caps.get(0) else {
     break;
    };
    // an empty match never makes progress
    if whole.as_str().is_empty() {
     break;
    }
    let mut expanded = String::new();
    caps.expand(&self.replacement, &mut expanded);
    (whole.as_str().to_string(), expanded)
   };

   if iterations == cap {
    warn!(
     pattern = %self.pattern,
     replacement = %self.replacement,
     text = %preview(text),
     cap,
     "rule still matches after the iteration cap, skipping it"
    );
    return text.to_string();
   }
   iterations += 1;

   debug!(matched = %matched, replacement = %expanded, "found match, replacing");
   result = result.replacen(&matched, &expanded, 1);
  }

  result
 }
}
