use std::ffi::c_int;

use signal_hook::consts::{SIGINT, SIGTERM};

/** events delivered to the event loop by the monitors and the signal loop */
#[derive(Clone, Debug, PartialEq)]
pub enum MyEvent {
 /// a clipboard value detected by a platform monitor
 ClipboardUpdate(String),
 SignalHook(c_int), // signal_hook didn't wrap that
 Exit,
}

impl MyEvent {
 pub fn is_stop_event(&self) -> bool {
  match self {
   MyEvent::Exit => true,
   MyEvent::SignalHook(shev) if *shev == SIGINT || *shev == SIGTERM => true,
   _ => false,
  }
 }

 /// SIGUSR1 stands in for a tray menu; there is no toggle off unix.
 #[cfg(unix)]
 pub fn is_toggle_event(&self) -> bool {
  matches!(self, MyEvent::SignalHook(shev) if *shev == signal_hook::consts::SIGUSR1)
 }

 #[cfg(not(unix))]
 pub fn is_toggle_event(&self) -> bool {
  false
 }
}

#[cfg(test)]
mod tests {
 use super::*;

 #[test]
 fn stop_events() {
  assert!(MyEvent::Exit.is_stop_event());
  assert!(MyEvent::SignalHook(SIGINT).is_stop_event());
  assert!(MyEvent::SignalHook(SIGTERM).is_stop_event());
  assert!(!MyEvent::SignalHook(0).is_stop_event());
  assert!(!MyEvent::ClipboardUpdate("x".into()).is_stop_event());
 }

 #[cfg(unix)]
 #[test]
 fn usr1_toggles() {
  assert!(MyEvent::SignalHook(signal_hook::consts::SIGUSR1).is_toggle_event());
  assert!(!MyEvent::Exit.is_toggle_event());
  assert!(!MyEvent::SignalHook(SIGINT).is_toggle_event());
 }
}
