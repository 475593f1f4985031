use std::fs::OpenOptions;
use std::io;
use std::sync::Mutex;
use std::thread::{self, JoinHandle};

use tracing::Dispatch;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::{self, time::ChronoLocal};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::config::Config;
use crate::error::MyError;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Builds the logging handle of the process: a console layer on stderr and
/// a file layer appending to `config.log_file`.
///
/// Nothing is installed globally; the caller decides where the dispatcher is
/// in effect (see [`spawn_logged`]).
pub fn build(config: &Config) -> Result<Dispatch, MyError> {
 let file = OpenOptions::new()
  .create(true)
  .append(true)
  .open(&config.log_file)
  .map_err(|e| MyError::Logging(format!("cannot open {}: {e}", config.log_file.display())))?;

 let default_directive = if config.debug { "debug" } else { "info" };
 let console_filter =
  EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
 let file_level = if config.debug {
  LevelFilter::DEBUG
 } else {
  LevelFilter::WARN
 };

 let console = fmt::layer()
  .with_writer(io::stderr)
  .with_timer(ChronoLocal::new(TIME_FORMAT.into()))
  .with_ansi(stderr_is_tty())
  .with_target(false)
  .with_filter(console_filter);

 let file = fmt::layer()
  .with_writer(Mutex::new(file))
  .with_timer(ChronoLocal::new(TIME_FORMAT.into()))
  .with_ansi(false)
  .with_thread_names(true)
  .with_filter(file_level);

 Ok(Dispatch::new(Registry::default().with(console).with(file)))
}

#[cfg(unix)]
fn stderr_is_tty() -> bool {
 use std::os::fd::AsFd;
 termion::is_tty(&io::stderr().as_fd())
}

#[cfg(not(unix))]
fn stderr_is_tty() -> bool {
 false
}

/// Spawns a named thread that logs through the dispatcher of the spawning
/// thread.
pub fn spawn_logged<F>(name: &str, f: F) -> io::Result<JoinHandle<()>>
where
 F: FnOnce() + Send + 'static,
{
 let dispatch = tracing::dispatcher::get_default(|d| d.clone());
 thread::Builder::new()
  .name(name.into())
  .spawn(move || tracing::dispatcher::with_default(&dispatch, f))
}

#[cfg(test)]
pub(crate) mod tests {
 use std::io::Write;
 use std::sync::{Arc, Mutex};

 use tracing_subscriber::fmt::MakeWriter;

 use super::*;

 /** collects formatted log output for assertions */
 #[derive(Clone, Default)]
 pub(crate) struct CapturedLog(Arc<Mutex<Vec<u8>>>);

 impl CapturedLog {
  pub(crate) fn contents(&self) -> String {
   String::from_utf8_lossy(&self.0.lock().unwrap()).into()
  }

  pub(crate) fn dispatch(&self) -> Dispatch {
   let subscriber = tracing_subscriber::fmt()
    .with_writer(self.clone())
    .with_ansi(false)
    .with_max_level(tracing::Level::DEBUG)
    .finish();
   Dispatch::new(subscriber)
  }
 }

 impl Write for CapturedLog {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
   self.0.lock().unwrap().extend_from_slice(buf);
   Ok(buf.len())
  }

  fn flush(&mut self) -> io::Result<()> {
   Ok(())
  }
 }

 impl<'a> MakeWriter<'a> for CapturedLog {
  type Writer = CapturedLog;

  fn make_writer(&'a self) -> Self::Writer {
   self.clone()
  }
 }

 #[test]
 fn spawned_thread_inherits_dispatcher() {
  let log = CapturedLog::default();
  let dispatch = log.dispatch();
  tracing::dispatcher::with_default(&dispatch, || {
   spawn_logged("worker", || tracing::info!("hello from worker"))
    .unwrap()
    .join()
    .unwrap();
  });
  assert!(log.contents().contains("hello from worker"));
 }

 #[test]
 fn log_file_is_appended() {
  let dir = tempfile::tempdir().unwrap();
  let config = Config {
   log_file: dir.path().join("crash.log"),
   ..Config::default()
  };

  for message in ["first failure", "second failure"] {
   let dispatch = build(&config).unwrap();
   tracing::dispatcher::with_default(&dispatch, || {
    tracing::info!("not written to the file");
    tracing::error!("{message}");
   });
  }

  let contents = std::fs::read_to_string(&config.log_file).unwrap();
  assert!(contents.contains("first failure"));
  assert!(contents.contains("second failure"));
  assert!(!contents.contains("not written to the file"));
 }
}
