use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;

use clap::Parser;
use nu_ansi_term::{AnsiGenericString, Color};
use tracing::{debug, error, info, warn};

use crate::clipboards::Backend;
use crate::config::{Config, DEFAULT_INTERVAL_MS, DEFAULT_LOG_FILE, DEFAULT_MAX_RESTARTS, DEFAULT_RULES_DIR, USAGE};
use crate::controller::MonitorController;
use crate::error::MyError;
use crate::event::MyEvent;
use crate::logging::{self, spawn_logged};
use crate::monitor::{create_monitor, Platform, Strategy};
use crate::rules::load_rules_dir;

#[derive(Parser, Debug)]
#[command(version, about, after_help = USAGE)]
pub struct Args {
 /// directory with the *.json rule files
 #[arg(long, default_value = DEFAULT_RULES_DIR)]
 pub(crate) rules_dir: PathBuf,

 /// poll interval of the polling monitor
 #[arg(long, default_value_t = DEFAULT_INTERVAL_MS)]
 pub(crate) interval_ms: u64,

 #[arg(long, value_enum, default_value_t = Strategy::Auto)]
 pub(crate) strategy: Strategy,

 /// clipboard read/write backend
 #[arg(long, value_enum, default_value_t = Backend::Auto)]
 pub(crate) backend: Backend,

 /// helper printing one clipboard value per line, e.g. "clipnotify-lines --json"
 #[arg(long)]
 pub(crate) helper_command: Option<String>,

 /// restarts of a crashed helper before giving up, 0 disables restarts
 #[arg(long, default_value_t = DEFAULT_MAX_RESTARTS)]
 pub(crate) max_restarts: u32,

 #[arg(long, default_value = DEFAULT_LOG_FILE)]
 pub(crate) log_file: PathBuf,

 /// start with monitoring switched off
 #[arg(long, default_value_t = false)]
 pub(crate) disabled: bool,

 #[arg(long, default_value_t = false)]
 pub(crate) debug: bool,
}

/** sends SIGINT, SIGTERM (and SIGUSR1 on unix) to the event loop */
struct MySignalsLoop {
 #[cfg(unix)]
 handle: Option<signal_hook::iterator::Handle>,
 #[cfg(not(unix))]
 closed: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

impl MySignalsLoop {
 #[cfg(unix)]
 fn new() -> Self {
  Self { handle: None }
 }

 #[cfg(not(unix))]
 fn new() -> Self {
  Self {
   closed: Default::default(),
  }
 }

 #[cfg(unix)]
 fn run_thread(&mut self, sender: Sender<MyEvent>) -> Result<JoinHandle<()>, MyError> {
  use signal_hook::consts::signal::*;
  use signal_hook::iterator::Signals;

  let mut signals = Signals::new([SIGINT, SIGTERM, SIGUSR1])?;
  self.handle = Some(signals.handle());

  let thread = spawn_logged("signals", move || {
   for signal in &mut signals {
    debug!(signal, "signal received");
    if sender.send(MyEvent::SignalHook(signal)).is_err() {
     break;
    }
   }
  })?;
  Ok(thread)
 }

 #[cfg(not(unix))]
 fn run_thread(&mut self, sender: Sender<MyEvent>) -> Result<JoinHandle<()>, MyError> {
  use std::sync::atomic::{AtomicBool, Ordering};
  use std::sync::Arc;
  use std::time::Duration;

  use signal_hook::consts::{SIGINT, SIGTERM};

  let interrupted = Arc::new(AtomicBool::new(false));
  signal_hook::flag::register(SIGINT, interrupted.clone())?;
  signal_hook::flag::register(SIGTERM, interrupted.clone())?;

  let closed = self.closed.clone();
  let thread = spawn_logged("signals", move || {
   while !closed.load(Ordering::SeqCst) {
    if interrupted.swap(false, Ordering::SeqCst) {
     if sender.send(MyEvent::SignalHook(SIGINT)).is_err() {
      break;
     }
    }
    std::thread::sleep(Duration::from_millis(100));
   }
  })?;
  Ok(thread)
 }

 #[cfg(unix)]
 fn close(&mut self) {
  if let Some(handle) = self.handle.take() {
   handle.close();
  }
 }

 #[cfg(not(unix))]
 fn close(&mut self) {
  self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
 }
}

/// Feeds events to the controller until a stop event arrives or every sender
/// is gone. The monitor is stopped on every way out.
pub fn run_event_loop(controller: &mut MonitorController, events: &Receiver<MyEvent>) -> Result<(), MyError> {
 for event in events.iter() {
  match controller.handle_event(event) {
   Ok(flow) if flow.is_break() => return Ok(()),
   Ok(_) => {}
   Err(err) => {
    controller.exit();
    return Err(err);
   }
  }
 }
 warn!("all event sources closed");
 controller.exit();
 Ok(())
}

fn run(config: &Config) -> Result<(), MyError> {
 info!("loading replacers from {}", config.rules_dir.display());
 let engine = load_rules_dir(&config.rules_dir)?;

 let platform = Platform::current();
 let (sender, events) = mpsc::channel();
 let monitor = create_monitor(config, platform, sender.clone())?;
 let mut controller = MonitorController::new(engine, monitor).with_enabled(!config.start_disabled);

 let mut signals_loop = MySignalsLoop::new();
 let signals_thread = signals_loop.run_thread(sender)?;

 if let Err(err) = controller.start() {
  signals_loop.close();
  let _ = signals_thread.join();
  return Err(err);
 }
 info!("press Ctrl+C to exit");

 let result = run_event_loop(&mut controller, &events);

 signals_loop.close();
 if signals_thread.join().is_err() {
  error!("signal thread panicked");
 }
 result
}

pub fn main() {
 let args = Args::parse();

 let config = match Config::from_args(&args) {
  Ok(config) => config,
  Err(err) => {
   eprintln!("{}", Color::Red.paint(format!("clipboardfixer: {err}")));
   std::process::exit(1);
  }
 };

 let dispatch = match logging::build(&config) {
  Ok(dispatch) => dispatch,
  Err(err) => {
   eprintln!("{}", Color::Red.paint(format!("clipboardfixer: {err}")));
   std::process::exit(1);
  }
 };
 let _log_guard = tracing::dispatcher::set_default(&dispatch);

 println!("{}", AnsiGenericString::title("Clipboardfixer"));

 if let Err(err) = run(&config) {
  error!(error = %err, "clipboardfixer stopped");
  eprintln!("{}", Color::Red.paint(format!("clipboardfixer: {err}")));
  std::process::exit(1);
 }
 info!("clipboardfixer ended");
}
