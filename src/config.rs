use std::path::PathBuf;
use std::time::Duration;

use crate::clipboards::Backend;
use crate::error::MyError;
use crate::libmain::Args;
use crate::monitor::{HelperCommand, Strategy};

pub const DEFAULT_RULES_DIR: &str = "config/replacers";
pub const DEFAULT_LOG_FILE: &str = "crash.log";
pub const DEFAULT_INTERVAL_MS: u64 = 500;
pub const DEFAULT_MAX_RESTARTS: u32 = 3;
const MIN_INTERVAL_MS: u64 = 50;

pub const USAGE: &str = r#"
clipboardfixer [--rules-dir DIR] [--interval-ms N] [--strategy auto|poll|push]
               [--backend auto|x11|xclip|xsel|wl-clipboard|pbcopy|powershell]
               [--helper-command CMD] [--max-restarts N]
               [--log-file PATH] [--disabled] [--debug]

- watches the clipboard and rewrites copied text with the regex rules
  found in the *.json files of the rules directory (file name order)
- rule file: [{ "pattern": "...", "flags": "i", "replacement": "$1" }]
- warnings and errors are appended to the log file

- Signals:

 SIGINT, SIGTERM ... exits the program
 SIGUSR1 ... toggles monitoring on and off
"#;

#[derive(Clone, Debug)]
pub struct Config {
 pub debug: bool,
 pub rules_dir: PathBuf,
 pub interval: Duration,
 pub strategy: Strategy,
 pub backend: Backend,
 pub helper_command: Option<HelperCommand>,
 pub max_restarts: u32,
 pub log_file: PathBuf,
 pub start_disabled: bool,
}

impl Default for Config {
 fn default() -> Self {
  Self {
   debug: false,
   rules_dir: DEFAULT_RULES_DIR.into(),
   interval: Duration::from_millis(DEFAULT_INTERVAL_MS),
   strategy: Strategy::Auto,
   backend: Backend::Auto,
   helper_command: None,
   max_restarts: DEFAULT_MAX_RESTARTS,
   log_file: DEFAULT_LOG_FILE.into(),
   start_disabled: false,
  }
 }
}

impl Config {
 pub fn from_args(args: &Args) -> Result<Self, MyError> {
  if args.interval_ms < MIN_INTERVAL_MS {
   return Err(MyError::Config(format!(
    "--interval-ms must be at least {MIN_INTERVAL_MS}, got {}",
    args.interval_ms
   )));
  }

  let helper_command = match &args.helper_command {
   None => None,
   Some(line) => Some(
    HelperCommand::parse(line)
     .ok_or_else(|| MyError::Config("--helper-command must not be empty".into()))?,
   ),
  };

  Ok(Self {
   debug: args.debug,
   rules_dir: args.rules_dir.clone(),
   interval: Duration::from_millis(args.interval_ms),
   strategy: args.strategy,
   backend: args.backend,
   helper_command,
   max_restarts: args.max_restarts,
   log_file: args.log_file.clone(),
   start_disabled: args.disabled,
  })
 }
}
