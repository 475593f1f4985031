use std::io::Write;
use std::process::{Child, ChildStdin, Stdio};

use base64::prelude::*;
use tracing::{debug, info, warn};

use super::helper::{drain_diagnostics, for_each_line};
use crate::error::MyError;
use crate::logging::spawn_logged;
use crate::tools::helper_command;

struct RunningShell {
 child: Child,
 stdin: ChildStdin,
}

/// A shell kept alive to run commands sent on its stdin, which saves the
/// process start-up of a one-shot command on every write.
pub struct InteractiveShell {
 program: String,
 args: Vec<String>,
 running: Option<RunningShell>,
}

impl InteractiveShell {
 pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
  Self {
   program: program.into(),
   args,
   running: None,
  }
 }

 pub fn powershell() -> Self {
  Self::new(
   "powershell.exe",
   vec![
    "-NoProfile".into(),
    "-NonInteractive".into(),
    "-Sta".into(),
    "-Command".into(),
    "-".into(),
   ],
  )
 }

 pub fn is_running(&self) -> bool {
  self.running.is_some()
 }

 pub fn spawn(&mut self) -> Result<(), MyError> {
  if self.running.is_some() {
   return Ok(());
  }

  let mut child = helper_command(&self.program)
   .args(&self.args)
   .stdin(Stdio::piped())
   .stdout(Stdio::piped())
   .stderr(Stdio::piped())
   .spawn()
   .map_err(|e| MyError::helper(&self.program, format!("cannot spawn shell: {e}")))?;

  let Some(stdin) = child.stdin.take() else {
   let _ = child.kill();
   let _ = child.wait();
   return Err(MyError::helper(&self.program, "no stdin pipe"));
  };

  if let Some(stdout) = child.stdout.take() {
   let program = self.program.clone();
   let spawned = spawn_logged(&format!("{}-stdout", self.program), move || {
    let result = for_each_line(stdout, |line| {
     let line = line.trim_end();
     if !line.is_empty() {
      debug!(program = %program, stream = "stdout", "{line}");
     }
    });
    if let Err(err) = result {
     warn!(program = %program, stream = "stdout", error = %err, "error reading shell output");
    }
   });
   if let Err(err) = spawned {
    warn!(error = %err, "cannot drain shell output");
   }
  }
  if let Some(stderr) = child.stderr.take() {
   drain_diagnostics(&self.program, "stderr", stderr);
  }

  info!(program = %self.program, pid = child.id(), "interactive shell started");
  self.running = Some(RunningShell { child, stdin });
  Ok(())
 }

 /// Sends one command line. Fails with [`MyError::NotStarted`] when the
 /// shell is not running.
 pub fn execute(&mut self, command: &str) -> Result<(), MyError> {
  let running = self
   .running
   .as_mut()
   .ok_or(MyError::NotStarted("interactive shell"))?;

  let mut line = command.to_string();
  if !line.ends_with('\n') {
   line.push('\n');
  }
  running
   .stdin
   .write_all(line.as_bytes())
   .and_then(|()| running.stdin.flush())
   .map_err(|e| MyError::helper(&self.program, format!("cannot send command: {e}")))
 }

 pub fn destroy(&mut self) {
  if let Some(RunningShell { mut child, stdin }) = self.running.take() {
   drop(stdin);
   let _ = child.kill();
   let _ = child.wait();
   info!(program = %self.program, "interactive shell stopped");
  }
 }
}

impl Drop for InteractiveShell {
 fn drop(&mut self) {
  self.destroy();
 }
}

/// PowerShell command line setting the clipboard to `text`. The payload is
/// base64 so quotes and line breaks cannot break the command.
pub fn powershell_set_clipboard(text: &str) -> String {
 let encoded = BASE64_STANDARD.encode(text.as_bytes());
 format!(
  "Set-Clipboard -Value ([System.Text.Encoding]::UTF8.GetString([System.Convert]::FromBase64String('{encoded}')))"
 )
}
