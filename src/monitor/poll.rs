use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, error, info, trace, warn};

use super::{ClipboardMonitor, UpdateSender};
use crate::clipboards::ClipboardAccess;
use crate::error::MyError;
use crate::event::MyEvent;
use crate::logging::spawn_logged;
use crate::tools::preview;

/** reads the clipboard every `interval` and reports values that differ from the previous read */
pub struct PollMonitor {
 access: Arc<dyn ClipboardAccess>,
 interval: Duration,
 sender: UpdateSender,
 worker: Option<(Sender<()>, JoinHandle<()>)>,
}

impl PollMonitor {
 pub fn new(access: Arc<dyn ClipboardAccess>, interval: Duration, sender: UpdateSender) -> Self {
  Self {
   access,
   interval,
   sender,
   worker: None,
  }
 }
}

/** per-thread polling state */
struct Poller {
 access: Arc<dyn ClipboardAccess>,
 sender: UpdateSender,
 last_seen: String,
 failing: bool,
}

impl Poller {
 /// One tick. Returns false once nobody listens any more.
 fn poll_once(&mut self) -> bool {
  let text = match self.access.read() {
   Ok(text) => {
    if self.failing {
     info!(backend = self.access.name(), "clipboard readable again");
     self.failing = false;
    }
    text
   }
   Err(err) => {
    // a broken backend fails every tick, report it once
    if self.failing {
     trace!(backend = self.access.name(), error = %err, "clipboard read failed");
    } else {
     warn!(backend = self.access.name(), error = %err, "clipboard read failed");
     self.failing = true;
    }
    None
   }
  };

  let Some(text) = text else {
   return true;
  };
  if text.is_empty() || text == self.last_seen {
   return true;
  }

  debug!(text = %preview(&text), "clipboard changed");
  self.last_seen = text.clone();
  self.sender.send(MyEvent::ClipboardUpdate(text)).is_ok()
 }
}

impl ClipboardMonitor for PollMonitor {
 fn name(&self) -> &'static str {
  "poll"
 }

 fn start(&mut self) -> Result<(), MyError> {
  if self.worker.is_some() {
   return Ok(());
  }

  let (stop_tx, stop_rx) = mpsc::channel::<()>();
  let interval = self.interval;
  let mut poller = Poller {
   access: self.access.clone(),
   sender: self.sender.clone(),
   last_seen: String::new(),
   failing: false,
  };

  let handle = spawn_logged("clipboard-poll", move || loop {
   match stop_rx.recv_timeout(interval) {
    Err(RecvTimeoutError::Timeout) => {}
    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
   }
   if !poller.poll_once() {
    debug!("event receiver gone, polling ends");
    break;
   }
  })?;

  self.worker = Some((stop_tx, handle));
  info!(
   backend = self.access.name(),
   interval_ms = interval.as_millis() as u64,
   "clipboard monitoring started (polling)"
  );
  Ok(())
 }

 fn stop(&mut self) {
  let Some((stop_tx, handle)) = self.worker.take() else {
   return;
  };
  let _ = stop_tx.send(());
  if handle.join().is_err() {
   error!("clipboard polling thread panicked");
  }
  info!("clipboard monitoring stopped (polling)");
 }

 fn write_clipboard(&mut self, text: &str) -> Result<bool, MyError> {
  match self.access.write(text) {
   Ok(()) => Ok(true),
   Err(err) => {
    error!(backend = self.access.name(), error = %err, text = %preview(text), "error writing to clipboard");
    Ok(false)
   }
  }
 }

 fn is_running(&self) -> bool {
  self.worker.is_some()
 }
}

impl Drop for PollMonitor {
 fn drop(&mut self) {
  self.stop();
 }
}

#[cfg(test)]
mod tests {
 use std::sync::mpsc::Receiver;

 use super::*;
 use crate::clipboards::fake::ScriptedClipboard;

 const TICK: Duration = Duration::from_millis(5);

 fn updates(rx: &Receiver<MyEvent>, wait: Duration) -> Vec<String> {
  let mut seen = vec![];
  while let Ok(event) = rx.recv_timeout(wait) {
   if let MyEvent::ClipboardUpdate(text) = event {
    seen.push(text);
   }
  }
  seen
 }

 #[test]
 fn reports_each_distinct_value_once() {
  let cb = Arc::new(ScriptedClipboard::new(vec![
   Ok(None),
   Ok(Some("")),
   Err("xclip missing"),
   Ok(Some("a")),
   Ok(Some("a")),
   Ok(Some("b")),
  ]));
  let (tx, rx) = mpsc::channel();
  let mut monitor = PollMonitor::new(cb, TICK, tx);
  monitor.start().unwrap();
  assert!(monitor.is_running());

  let seen = updates(&rx, Duration::from_millis(200));
  monitor.stop();
  assert_eq!(seen, vec!["a".to_string(), "b".to_string()]);
 }

 #[test]
 fn empty_clipboard_reports_nothing() {
  let cb = Arc::new(ScriptedClipboard::new(vec![Ok(None), Ok(Some(""))]));
  let (tx, rx) = mpsc::channel();
  let mut monitor = PollMonitor::new(cb, TICK, tx);
  monitor.start().unwrap();
  let seen = updates(&rx, Duration::from_millis(100));
  monitor.stop();
  assert!(seen.is_empty());
 }

 #[test]
 fn stop_is_idempotent() {
  let cb = Arc::new(ScriptedClipboard::new(vec![]));
  let (tx, _rx) = mpsc::channel();
  let mut monitor = PollMonitor::new(cb, TICK, tx);
  monitor.stop();
  monitor.start().unwrap();
  monitor.stop();
  monitor.stop();
  assert!(!monitor.is_running());
 }

 #[test]
 fn write_failure_is_reported_not_raised() {
  let cb = Arc::new(ScriptedClipboard::new(vec![]).failing_writes());
  let (tx, _rx) = mpsc::channel();
  let mut monitor = PollMonitor::new(cb, TICK, tx);
  assert!(!monitor.write_clipboard("x").unwrap());

  let cb = Arc::new(ScriptedClipboard::new(vec![]));
  let mut monitor = PollMonitor::new(cb.clone(), TICK, mpsc::channel().0);
  assert!(monitor.write_clipboard("x").unwrap());
  assert_eq!(cb.written(), vec!["x".to_string()]);
 }
}
