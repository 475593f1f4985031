use std::path::PathBuf;

use thiserror::Error;

/** every error the program can surface; recoverable clipboard failures are logged and never leave the monitors */
#[derive(Debug, Error)]
pub enum MyError {
 #[error("io error: {0}")]
 Io(#[from] std::io::Error),

 #[error("cannot read rule directory {path}: {source}")]
 RuleDir {
  path: PathBuf,
  source: std::io::Error,
 },

 #[error("invalid rule file {path}: {source}")]
 RuleFile {
  path: PathBuf,
  source: serde_json::Error,
 },

 #[error("invalid pattern `{pattern}` in {origin}: {source}")]
 RulePattern {
  origin: String,
  pattern: String,
  source: regex::Error,
 },

 #[error("unknown regex flag `{flag}` in {origin}")]
 RuleFlag { origin: String, flag: char },

 #[error("no replacement rules found in {0}")]
 NoRules(PathBuf),

 #[error("clipboard backend {backend}: {message}")]
 Clipboard {
  backend: &'static str,
  message: String,
 },

 #[cfg(target_os = "linux")]
 #[error("x11 clipboard: {0}")]
 X11(#[from] x11_clipboard::error::Error),

 #[error("helper process `{program}`: {message}")]
 Helper { program: String, message: String },

 #[error("{0} used before it was started")]
 NotStarted(&'static str),

 #[error("logging setup: {0}")]
 Logging(String),

 #[error("invalid configuration: {0}")]
 Config(String),

 #[error("{0} is not supported on this platform")]
 Unsupported(&'static str),
}

impl MyError {
 pub fn clipboard(backend: &'static str, message: impl Into<String>) -> Self {
  MyError::Clipboard {
   backend,
   message: message.into(),
  }
 }

 pub fn helper(program: &str, message: impl Into<String>) -> Self {
  MyError::Helper {
   program: program.into(),
   message: message.into(),
  }
 }
}
