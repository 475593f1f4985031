//! Platform clipboard monitors.
//!
//! A monitor detects clipboard changes and hands every new value to the event
//! loop as [`MyEvent::ClipboardUpdate`]; it also owns the write side, so the
//! controller can put a fixed value back. Two detection strategies exist:
//! polling ([`PollMonitor`]) and a long-lived helper process that prints one
//! clipboard value per line ([`PushMonitor`]).

mod helper;
mod poll;
mod push;
mod shell;

use std::fmt::Display;
use std::sync::mpsc::Sender;

use tracing::info;

pub use helper::{HelperCommand, RestartPolicy};
pub use poll::PollMonitor;
pub use push::{ClipboardWriter, PushMonitor};

use crate::config::Config;
use crate::error::MyError;
use crate::event::MyEvent;

/// Where detected clipboard values are delivered.
pub type UpdateSender = Sender<MyEvent>;

/** capability set shared by every platform monitor */
pub trait ClipboardMonitor: Send {
 fn name(&self) -> &'static str;

 fn start(&mut self) -> Result<(), MyError>;

 /// Never fails; stopping a stopped monitor does nothing.
 fn stop(&mut self);

 /// `Ok(false)` when the clipboard could not be written (already logged).
 /// `Err` only for misuse, e.g. writing through a writer that was never started.
 fn write_clipboard(&mut self, text: &str) -> Result<bool, MyError>;

 fn is_running(&self) -> bool;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Platform {
 Linux,
 MacOs,
 Windows,
 Other,
}

impl Platform {
 pub fn current() -> Self {
  match std::env::consts::OS {
   "linux" => Platform::Linux,
   "macos" => Platform::MacOs,
   "windows" => Platform::Windows,
   _ => Platform::Other,
  }
 }
}

impl Display for Platform {
 fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
  let name = match self {
   Platform::Linux => "linux",
   Platform::MacOs => "macos",
   Platform::Windows => "windows",
   Platform::Other => std::env::consts::OS,
  };
  f.write_str(name)
 }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum Strategy {
 Auto,
 Poll,
 Push,
}

impl Strategy {
 /// Windows ships a native change notification and a custom helper implies
 /// push; everything else polls.
 pub fn resolve(self, platform: Platform, has_helper: bool) -> Strategy {
  match self {
   Strategy::Auto if has_helper || platform == Platform::Windows => Strategy::Push,
   Strategy::Auto => Strategy::Poll,
   explicit => explicit,
  }
 }
}

/// Picks and builds the monitor for `platform`. Called once at start-up.
pub fn create_monitor(
 config: &Config,
 platform: Platform,
 sender: UpdateSender,
) -> Result<Box<dyn ClipboardMonitor>, MyError> {
 let strategy = config
  .strategy
  .resolve(platform, config.helper_command.is_some());
 let restart = RestartPolicy::with_max_restarts(config.max_restarts);

 let monitor: Box<dyn ClipboardMonitor> = match strategy {
  Strategy::Auto | Strategy::Poll => {
   let access = config.backend.open(platform)?;
   Box::new(PollMonitor::new(access, config.interval, sender))
  }
  Strategy::Push => match &config.helper_command {
   Some(helper) => {
    let access = config.backend.open(platform)?;
    Box::new(PushMonitor::new(
     helper.clone(),
     ClipboardWriter::OneShot(access),
     restart,
     sender,
    ))
   }
   None if platform == Platform::Windows => Box::new(PushMonitor::new(
    HelperCommand::windows_listener(),
    ClipboardWriter::powershell(),
    restart,
    sender,
   )),
   None => {
    return Err(MyError::Config(format!(
     "push-based monitoring on {platform} needs --helper-command"
    )))
   }
  },
 };

 info!(%platform, ?strategy, monitor = monitor.name(), "clipboard monitor selected");
 Ok(monitor)
}

#[cfg(test)]
mod tests {
 use std::sync::mpsc;

 use super::*;
 use crate::clipboards::Backend;

 #[test]
 fn strategy_resolution() {
  assert_eq!(Strategy::Auto.resolve(Platform::Windows, false), Strategy::Push);
  assert_eq!(Strategy::Auto.resolve(Platform::Linux, false), Strategy::Poll);
  assert_eq!(Strategy::Auto.resolve(Platform::MacOs, true), Strategy::Push);
  assert_eq!(Strategy::Poll.resolve(Platform::Windows, true), Strategy::Poll);
 }

 #[test]
 fn push_without_helper_is_rejected_off_windows() {
  let (tx, _rx) = mpsc::channel();
  let config = Config {
   strategy: Strategy::Push,
   ..Config::default()
  };
  let err = create_monitor(&config, Platform::Linux, tx).err().unwrap();
  assert!(matches!(err, MyError::Config(_)));
 }

 #[test]
 fn factory_builds_requested_variant() {
  let (tx, _rx) = mpsc::channel();
  let config = Config {
   strategy: Strategy::Poll,
   backend: Backend::Xsel,
   ..Config::default()
  };
  let monitor = create_monitor(&config, Platform::Linux, tx.clone()).unwrap();
  assert_eq!(monitor.name(), "poll");
  assert!(!monitor.is_running());

  let config = Config {
   backend: Backend::Xclip,
   helper_command: HelperCommand::parse("clipnotify-lines"),
   ..Config::default()
  };
  let monitor = create_monitor(&config, Platform::Linux, tx).unwrap();
  assert_eq!(monitor.name(), "push");
 }
}
