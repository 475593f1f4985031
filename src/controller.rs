use std::ops::ControlFlow;

use tracing::{debug, error, info};

use crate::error::MyError;
use crate::event::MyEvent;
use crate::monitor::ClipboardMonitor;
use crate::rules::ReplacementEngine;
use crate::tools::preview;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IgnoreReason {
 Disabled,
 Duplicate,
}

/** what the controller did with one detected clipboard value */
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpdateOutcome {
 Ignored(IgnoreReason),
 /// no rule changed the text
 Unchanged,
 Rewritten { fixed: String, written: bool },
}

/// Connects a platform monitor to the replacement engine.
///
/// `last_seen_content` is set to the fixed value right after the write-back,
/// whether the write worked or not. A monitor that later reports the program's
/// own write therefore hits the duplicate check and nothing is rewritten twice.
pub struct MonitorController {
 engine: ReplacementEngine,
 monitor: Box<dyn ClipboardMonitor>,
 enabled: bool,
 last_seen_content: String,
 /// the value of the previous update, so a value reported twice in a row
 /// is processed once even after it was rewritten
 last_update: String,
 running: bool,
}

impl MonitorController {
 pub fn new(engine: ReplacementEngine, monitor: Box<dyn ClipboardMonitor>) -> Self {
  Self {
   engine,
   monitor,
   enabled: true,
   last_seen_content: String::new(),
   last_update: String::new(),
   running: false,
  }
 }

 pub fn with_enabled(mut self, enabled: bool) -> Self {
  self.enabled = enabled;
  self
 }

 pub fn is_enabled(&self) -> bool {
  self.enabled
 }

 pub fn is_running(&self) -> bool {
  self.running
 }

 pub fn last_seen_content(&self) -> &str {
  &self.last_seen_content
 }

 pub fn start(&mut self) -> Result<(), MyError> {
  self.monitor.start()?;
  self.running = true;
  info!(
   monitor = self.monitor.name(),
   rules = self.engine.len(),
   enabled = self.enabled,
   "clipboard monitoring started"
  );
  Ok(())
 }

 pub fn stop(&mut self) {
  if !self.running {
   return;
  }
  self.monitor.stop();
  self.running = false;
  info!(monitor = self.monitor.name(), "clipboard monitoring stopped");
 }

 /// Stops the monitor; the event loop returns afterwards and the process ends.
 pub fn exit(&mut self) {
  info!("exiting application");
  self.stop();
 }

 pub fn toggle_monitoring(&mut self) -> bool {
  self.enabled = !self.enabled;
  info!(
   "clipboard monitoring {}",
   if self.enabled { "enabled" } else { "disabled" }
  );
  self.enabled
 }

 pub fn handle_update(&mut self, text: &str) -> Result<UpdateOutcome, MyError> {
  if !self.enabled {
   return Ok(UpdateOutcome::Ignored(IgnoreReason::Disabled));
  }
  let duplicate = text == self.last_seen_content || text == self.last_update;
  self.last_update = text.to_string();
  if duplicate {
   debug!(text = %preview(text), "duplicate clipboard value ignored");
   return Ok(UpdateOutcome::Ignored(IgnoreReason::Duplicate));
  }
  self.last_seen_content = text.to_string();

  let fixed = self.engine.apply_all(text);
  if fixed == text {
   return Ok(UpdateOutcome::Unchanged);
  }

  info!(original = %preview(text), fixed = %preview(&fixed), "detected link, replacing");
  let written = self.monitor.write_clipboard(&fixed);
  // set before looking at the result: the write may have landed anyway
  self.last_seen_content = fixed.clone();
  let written = written?;
  if !written {
   error!(monitor = self.monitor.name(), fixed = %preview(&fixed), "failed to update clipboard");
  }
  Ok(UpdateOutcome::Rewritten { fixed, written })
 }

 /// Processes one event of the event loop; `Break` once the program should end.
 pub fn handle_event(&mut self, event: MyEvent) -> Result<ControlFlow<()>, MyError> {
  if event.is_stop_event() {
   debug!(?event, "stop event");
   self.exit();
   return Ok(ControlFlow::Break(()));
  }
  if event.is_toggle_event() {
   self.toggle_monitoring();
   return Ok(ControlFlow::Continue(()));
  }
  match event {
   MyEvent::ClipboardUpdate(text) => {
    self.handle_update(&text)?;
   }
   other => debug!(event = ?other, "event ignored"),
  }
  Ok(ControlFlow::Continue(()))
 }
}

impl Drop for MonitorController {
 fn drop(&mut self) {
  self.stop();
 }
}
