use std::sync::Arc;

use tracing::{debug, error, info, trace};

use super::helper::{HelperCommand, HelperState, RestartPolicy, SupervisedHelper};
use super::shell::{powershell_set_clipboard, InteractiveShell};
use super::{ClipboardMonitor, UpdateSender};
use crate::clipboards::ClipboardAccess;
use crate::error::MyError;
use crate::event::MyEvent;
use crate::tools::{preview, trim_line_terminator};

/// Line prefix of an error reported by the helper.
pub const ERROR_PREFIX: &str = "ERROR:";
/// Optional line prefix of a clipboard value; the payload is a JSON string.
pub const UPDATE_PREFIX: &str = "CLIPBOARD_UPDATE:";

/** one decoded line of the helper protocol */
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HelperLine {
 Update(String),
 Error(String),
 Empty,
}

/// Decodes one line of helper output.
///
/// Exactly one line terminator is removed, nothing else is trimmed: trailing
/// blanks are part of the copied text.
pub fn parse_helper_line(raw: &str) -> HelperLine {
 let line = trim_line_terminator(raw);
 if line.is_empty() {
  return HelperLine::Empty;
 }
 if let Some(message) = line.strip_prefix(ERROR_PREFIX) {
  return HelperLine::Error(message.trim().to_string());
 }
 if let Some(payload) = line.strip_prefix(UPDATE_PREFIX) {
  let text = serde_json::from_str::<String>(payload).unwrap_or_else(|_| payload.to_string());
  if text.is_empty() {
   return HelperLine::Empty;
  }
  return HelperLine::Update(text);
 }
 HelperLine::Update(line.to_string())
}

/** the write side of a push monitor */
pub enum ClipboardWriter {
 /// one process per write
 OneShot(Arc<dyn ClipboardAccess>),
 /// a command line per write, sent to a running shell
 Interactive {
  shell: InteractiveShell,
  format: fn(&str) -> String,
 },
}

impl ClipboardWriter {
 pub fn powershell() -> Self {
  ClipboardWriter::Interactive {
   shell: InteractiveShell::powershell(),
   format: powershell_set_clipboard,
  }
 }

 fn start(&mut self) -> Result<(), MyError> {
  match self {
   ClipboardWriter::OneShot(_) => Ok(()),
   ClipboardWriter::Interactive { shell, .. } => shell.spawn(),
  }
 }

 fn stop(&mut self) {
  if let ClipboardWriter::Interactive { shell, .. } = self {
   shell.destroy();
  }
 }

 fn write(&mut self, text: &str) -> Result<bool, MyError> {
  let result = match self {
   ClipboardWriter::OneShot(access) => access.write(text),
   ClipboardWriter::Interactive { shell, format } => shell.execute(&format(text)),
  };
  match result {
   Ok(()) => Ok(true),
   Err(err @ MyError::NotStarted(_)) => Err(err),
   Err(err) => {
    error!(error = %err, text = %preview(text), "error writing to clipboard");
    Ok(false)
   }
  }
 }
}

/// Monitor fed by a helper process that blocks on the platform's clipboard
/// notification and prints one value per line.
pub struct PushMonitor {
 helper: SupervisedHelper,
 writer: ClipboardWriter,
 sender: UpdateSender,
}

impl PushMonitor {
 pub fn new(
  command: HelperCommand,
  writer: ClipboardWriter,
  policy: RestartPolicy,
  sender: UpdateSender,
 ) -> Self {
  Self {
   helper: SupervisedHelper::new(command, policy),
   writer,
   sender,
  }
 }

 pub fn helper_state(&self) -> HelperState {
  self.helper.state()
 }
}

impl ClipboardMonitor for PushMonitor {
 fn name(&self) -> &'static str {
  "push"
 }

 fn start(&mut self) -> Result<(), MyError> {
  self.writer.start()?;

  let sender = self.sender.clone();
  let program = self.helper.command().program.clone();
  let started = self.helper.start(move |raw| match parse_helper_line(raw) {
   HelperLine::Update(text) => {
    debug!(text = %preview(&text), "received clipboard update");
    if sender.send(MyEvent::ClipboardUpdate(text)).is_err() {
     trace!("event receiver gone, dropping clipboard update");
    }
   }
   HelperLine::Error(message) => {
    error!(program = %program, stream = "stdout", "helper error: {message}");
   }
   HelperLine::Empty => {}
  });

  if let Err(err) = started {
   self.writer.stop();
   return Err(err);
  }
  info!(program = %self.helper.command().program, "clipboard monitoring started (helper)");
  Ok(())
 }

 fn stop(&mut self) {
  self.helper.stop();
  self.writer.stop();
 }

 fn write_clipboard(&mut self, text: &str) -> Result<bool, MyError> {
  self.writer.write(text)
 }

 fn is_running(&self) -> bool {
  self.helper.state() == HelperState::Running
 }
}
