use std::io::{BufRead, BufReader, Read};
use std::process::{Child, ChildStdout, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use base64::prelude::*;
use tracing::{debug, error, info, warn};

use crate::error::MyError;
use crate::logging::spawn_logged;
use crate::tools::helper_command;

const WINDOWS_LISTENER_SCRIPT: &str = include_str!("../../assets/clipboard-monitor.ps1");

/** program and arguments of a helper process */
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HelperCommand {
 pub program: String,
 pub args: Vec<String>,
}

impl HelperCommand {
 pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
  Self {
   program: program.into(),
   args,
  }
 }

 /// Splits a command line at whitespace; `None` for a blank line.
 pub fn parse(line: &str) -> Option<Self> {
  let mut parts = line.split_whitespace().map(String::from);
  let program = parts.next()?;
  Some(Self::new(program, parts.collect()))
 }

 /// PowerShell running the bundled clipboard listener script.
 pub fn windows_listener() -> Self {
  // -EncodedCommand takes base64 of UTF-16LE
  let utf16: Vec<u8> = WINDOWS_LISTENER_SCRIPT
   .encode_utf16()
   .flat_map(u16::to_le_bytes)
   .collect();
  Self::new(
   "powershell.exe",
   vec![
    "-NoProfile".into(),
    "-NonInteractive".into(),
    "-Sta".into(),
    "-ExecutionPolicy".into(),
    "Bypass".into(),
    "-EncodedCommand".into(),
    BASE64_STANDARD.encode(utf16),
   ],
  )
 }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HelperState {
 Stopped,
 Starting,
 Running,
 Failed,
}

/** when and how often a helper that died on its own is started again */
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RestartPolicy {
 /// consecutive failures tolerated; 0 means manual restart only
 pub max_restarts: u32,
 pub initial_backoff: Duration,
 pub max_backoff: Duration,
 /// a run at least this long resets the failure count
 pub stable_after: Duration,
}

impl RestartPolicy {
 pub fn with_max_restarts(max_restarts: u32) -> Self {
  Self {
   max_restarts,
   ..Self::default()
  }
 }

 pub fn backoff(&self, failures: u32) -> Duration {
  let exponent = failures.saturating_sub(1).min(16);
  self
   .initial_backoff
   .saturating_mul(1 << exponent)
   .min(self.max_backoff)
 }
}

impl Default for RestartPolicy {
 fn default() -> Self {
  Self {
   max_restarts: 3,
   initial_backoff: Duration::from_secs(1),
   max_backoff: Duration::from_secs(30),
   stable_after: Duration::from_secs(60),
  }
 }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
 mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Reads `reader` line by line (lossy UTF-8, terminator kept) until EOF.
pub(crate) fn for_each_line<R: Read>(reader: R, mut on_line: impl FnMut(&str)) -> std::io::Result<()> {
 let mut reader = BufReader::new(reader);
 let mut buf = Vec::new();
 loop {
  buf.clear();
  if reader.read_until(b'\n', &mut buf)? == 0 {
   return Ok(());
  }
  on_line(&String::from_utf8_lossy(&buf));
 }
}

/// Logs every non-empty line of a diagnostic stream as an error.
pub(crate) fn drain_diagnostics<R: Read + Send + 'static>(program: &str, stream: &'static str, reader: R) {
 let name = format!("{program}-{stream}");
 let program = program.to_string();
 let spawned = spawn_logged(&name, move || {
  let result = for_each_line(reader, |line| {
   let line = line.trim();
   if !line.is_empty() {
    error!(program = %program, stream, "{line}");
   }
  });
  if let Err(err) = result {
   warn!(program = %program, stream, error = %err, "error reading helper stream");
  }
 });
 if let Err(err) = spawned {
  warn!(stream, error = %err, "cannot drain helper stream");
 }
}

#[cfg(unix)]
fn kill_process_group(leader: u32) {
 let Ok(pgid) = libc::pid_t::try_from(leader) else {
  return;
 };
 // SAFETY: plain syscall, a negative pid addresses the process group
 if unsafe { libc::kill(-pgid, libc::SIGKILL) } != 0 {
  debug!(pgid, error = %std::io::Error::last_os_error(), "cannot kill helper process group");
 }
}

/** shared between the control side and the supervisor thread */
struct Shared {
 command: HelperCommand,
 state: Mutex<HelperState>,
 child: Mutex<Option<Child>>,
 stopping: AtomicBool,
}

impl Shared {
 fn set_state(&self, state: HelperState) {
  *lock(&self.state) = state;
 }

 /// Spawns the helper unless a stop was requested; `Ok(None)` in that case.
 fn spawn(&self) -> Result<Option<ChildStdout>, MyError> {
  let mut slot = lock(&self.child);
  if self.stopping.load(Ordering::SeqCst) {
   return Ok(None);
  }

  let program = &self.command.program;
  let mut command = helper_command(program);
  command
   .args(&self.command.args)
   .stdin(Stdio::null())
   .stdout(Stdio::piped())
   .stderr(Stdio::piped());
  // processes started by the helper inherit its stdout; a group of its own
  // lets `kill` reach them, otherwise the reader never sees EOF
  #[cfg(unix)]
  std::os::unix::process::CommandExt::process_group(&mut command, 0);
  let mut child = command
   .spawn()
   .map_err(|e| MyError::helper(program, format!("cannot spawn: {e}")))?;

  let Some(stdout) = child.stdout.take() else {
   let _ = child.kill();
   let _ = child.wait();
   return Err(MyError::helper(program, "no stdout pipe"));
  };
  if let Some(stderr) = child.stderr.take() {
   drain_diagnostics(program, "stderr", stderr);
  }
  debug!(program = %program, pid = child.id(), "helper spawned");
  *slot = Some(child);
  Ok(Some(stdout))
 }

 fn kill(&self) {
  if let Some(child) = lock(&self.child).as_mut() {
   // not reaped yet, so the group id cannot have been reused
   #[cfg(unix)]
   kill_process_group(child.id());
   let _ = child.kill();
  }
 }

 fn reap(&self) -> Option<String> {
  let child = lock(&self.child).take();
  child.map(|mut child| match child.wait() {
   Ok(status) => status.to_string(),
   Err(err) => format!("unknown ({err})"),
  })
 }
}

/// A helper process with an explicit lifecycle.
///
/// `start` spawns the child synchronously, so a missing program is reported
/// to the caller. Afterwards a supervisor thread feeds each stdout line to the
/// callback. When the child exits without `stop` having been called it is
/// restarted according to the [`RestartPolicy`]; once the policy is exhausted
/// the helper stays [`HelperState::Failed`].
pub struct SupervisedHelper {
 shared: Arc<Shared>,
 policy: RestartPolicy,
 wakeup: Option<Sender<()>>,
 supervisor: Option<JoinHandle<()>>,
}

impl SupervisedHelper {
 pub fn new(command: HelperCommand, policy: RestartPolicy) -> Self {
  Self {
   shared: Arc::new(Shared {
    command,
    state: Mutex::new(HelperState::Stopped),
    child: Mutex::new(None),
    stopping: AtomicBool::new(false),
   }),
   policy,
   wakeup: None,
   supervisor: None,
  }
 }

 pub fn command(&self) -> &HelperCommand {
  &self.shared.command
 }

 pub fn state(&self) -> HelperState {
  *lock(&self.shared.state)
 }

 pub fn start<F>(&mut self, on_line: F) -> Result<(), MyError>
 where
  F: FnMut(&str) + Send + 'static,
 {
  if self.supervisor.is_some() {
   return Ok(());
  }

  self.shared.stopping.store(false, Ordering::SeqCst);
  self.shared.set_state(HelperState::Starting);
  let stdout = match self.shared.spawn() {
   Ok(Some(stdout)) => stdout,
   Ok(None) => {
    self.shared.set_state(HelperState::Stopped);
    return Ok(());
   }
   Err(err) => {
    self.shared.set_state(HelperState::Failed);
    error!(error = %err, "clipboard helper failed to start");
    return Err(err);
   }
  };
  self.shared.set_state(HelperState::Running);

  let (wakeup_tx, wakeup_rx) = mpsc::channel();
  let supervisor = Supervisor {
   shared: self.shared.clone(),
   policy: self.policy,
   wakeup: wakeup_rx,
  };
  let handle = spawn_logged("clipboard-helper", move || supervisor.run(stdout, on_line));
  match handle {
   Ok(handle) => {
    self.supervisor = Some(handle);
    self.wakeup = Some(wakeup_tx);
    Ok(())
   }
   Err(err) => {
    self.shared.stopping.store(true, Ordering::SeqCst);
    self.shared.kill();
    self.shared.reap();
    self.shared.set_state(HelperState::Failed);
    Err(err.into())
   }
  }
 }

 pub fn stop(&mut self) {
  let Some(handle) = self.supervisor.take() else {
   return;
  };
  self.shared.stopping.store(true, Ordering::SeqCst);
  // wakes a supervisor sleeping in its backoff
  drop(self.wakeup.take());
  self.shared.kill();
  if handle.join().is_err() {
   error!("clipboard helper supervisor panicked");
  }
  self.shared.reap();
  self.shared.set_state(HelperState::Stopped);
  info!(program = %self.shared.command.program, "clipboard helper stopped");
 }
}

impl Drop for SupervisedHelper {
 fn drop(&mut self) {
  self.stop();
 }
}

struct Supervisor {
 shared: Arc<Shared>,
 policy: RestartPolicy,
 wakeup: Receiver<()>,
}

impl Supervisor {
 fn stopping(&self) -> bool {
  self.shared.stopping.load(Ordering::SeqCst)
 }

 fn run<F: FnMut(&str)>(self, stdout: ChildStdout, mut on_line: F) {
  let program = self.shared.command.program.clone();
  let mut stdout = Some(stdout);
  let mut failures = 0u32;

  loop {
   if let Some(out) = stdout.take() {
    let started = Instant::now();
    if let Err(err) = for_each_line(out, &mut on_line) {
     warn!(program = %program, stream = "stdout", error = %err, "error reading clipboard stream");
    }
    let status = self.shared.reap().unwrap_or_else(|| "unknown".into());
    if self.stopping() {
     break;
    }
    self.shared.set_state(HelperState::Failed);
    error!(program = %program, %status, "clipboard helper exited unexpectedly");
    if started.elapsed() >= self.policy.stable_after {
     failures = 0;
    }
   }

   failures += 1;
   if failures > self.policy.max_restarts {
    error!(
     program = %program,
     restarts = self.policy.max_restarts,
     "clipboard helper keeps failing, clipboard monitoring is off until restart"
    );
    return;
   }

   let backoff = self.policy.backoff(failures);
   warn!(program = %program, attempt = failures, backoff_ms = backoff.as_millis() as u64, "restarting clipboard helper");
   match self.wakeup.recv_timeout(backoff) {
    Err(RecvTimeoutError::Timeout) => {}
    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
   }

   self.shared.set_state(HelperState::Starting);
   match self.shared.spawn() {
    Ok(Some(out)) => {
     self.shared.set_state(HelperState::Running);
     info!(program = %program, "clipboard helper restarted");
     stdout = Some(out);
    }
    Ok(None) => break,
    Err(err) => {
     self.shared.set_state(HelperState::Failed);
     error!(error = %err, "clipboard helper failed to restart");
    }
   }
  }

  self.shared.set_state(HelperState::Stopped);
 }
}
