use std::io::Write;
use std::process::Stdio;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::error::MyError;
use crate::monitor::Platform;
use crate::tools::{helper_command, trim_line_terminator};

/** text-in / text-out access to the system clipboard */
pub trait ClipboardAccess: Send + Sync {
 fn name(&self) -> &'static str;

 /// `Ok(None)` when the clipboard holds no text.
 fn read(&self) -> Result<Option<String>, MyError>;

 fn write(&self, text: &str) -> Result<(), MyError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum Backend {
 Auto,
 X11,
 Xclip,
 Xsel,
 WlClipboard,
 Pbcopy,
 Powershell,
}

impl Backend {
 pub fn resolve(self, platform: Platform) -> Backend {
  if self != Backend::Auto {
   return self;
  }
  match platform {
   Platform::Windows => Backend::Powershell,
   Platform::MacOs => Backend::Pbcopy,
   Platform::Linux | Platform::Other => {
    if std::env::var_os("WAYLAND_DISPLAY").is_some() {
     Backend::WlClipboard
    } else if std::env::var_os("DISPLAY").is_some() && platform == Platform::Linux {
     Backend::X11
    } else {
     Backend::Xclip
    }
   }
  }
 }

 pub fn open(self, platform: Platform) -> Result<Arc<dyn ClipboardAccess>, MyError> {
  let access: Arc<dyn ClipboardAccess> = match self.resolve(platform) {
   Backend::X11 => open_x11()?,
   Backend::Auto | Backend::Xclip => Arc::new(CommandClipboard::xclip()),
   Backend::Xsel => Arc::new(CommandClipboard::xsel()),
   Backend::WlClipboard => Arc::new(CommandClipboard::wl_clipboard()),
   Backend::Pbcopy => Arc::new(CommandClipboard::pbcopy()),
   Backend::Powershell => Arc::new(CommandClipboard::powershell()),
  };
  debug!(backend = access.name(), "clipboard backend opened");
  Ok(access)
 }
}

#[cfg(target_os = "linux")]
fn open_x11() -> Result<Arc<dyn ClipboardAccess>, MyError> {
 Ok(Arc::new(X11ReaderWriter::new()?))
}

#[cfg(not(target_os = "linux"))]
fn open_x11() -> Result<Arc<dyn ClipboardAccess>, MyError> {
 Err(MyError::Unsupported("the x11 clipboard backend"))
}

#[cfg(target_os = "linux")]
pub use x11_backend::X11ReaderWriter;

#[cfg(target_os = "linux")]
mod x11_backend {
 use std::sync::Mutex;
 use std::time::Duration;

 use tracing::trace;
 use x11_clipboard::{Atom, Atoms, Clipboard};

 use super::ClipboardAccess;
 use crate::error::MyError;

 const LOAD_TIMEOUT: Duration = Duration::from_secs(3);

 /** reads / writes the X11 CLIPBOARD selection as UTF8_STRING */
 pub struct X11ReaderWriter {
  cb: Mutex<Clipboard>,
  atom: Atom,
  atoms: Atoms,
 }

 impl X11ReaderWriter {
  pub fn new() -> Result<Self, MyError> {
   let cb = Clipboard::new()?;
   let atoms = cb.setter.atoms.clone();
   Ok(Self {
    cb: Mutex::new(cb),
    atom: atoms.clipboard,
    atoms,
   })
  }
 }

 impl ClipboardAccess for X11ReaderWriter {
  fn name(&self) -> &'static str {
   "x11"
  }

  fn read(&self) -> Result<Option<String>, MyError> {
   let cb = self
    .cb
    .lock()
    .map_err(|_| MyError::clipboard("x11", "clipboard lock poisoned"))?;
   match cb.load(self.atom, self.atoms.utf8_string, self.atoms.property, LOAD_TIMEOUT) {
    Ok(selection_u8) if selection_u8.is_empty() => Ok(None),
    Ok(selection_u8) => Ok(Some(String::from_utf8_lossy(&selection_u8).into())),
    // no selection owner or no UTF8_STRING target: nothing to read
    Err(err) => {
     trace!(error = %err, "x11 selection not readable");
     Ok(None)
    }
   }
  }

  fn write(&self, text: &str) -> Result<(), MyError> {
   let cb = self
    .cb
    .lock()
    .map_err(|_| MyError::clipboard("x11", "clipboard lock poisoned"))?;
   cb.store(self.atom, self.atoms.utf8_string, text.as_bytes())?;
   Ok(())
  }
 }
}

/** clipboard access through external utilities: one process per read or write */
#[derive(Clone, Debug)]
pub struct CommandClipboard {
 name: &'static str,
 read_argv: Vec<String>,
 /// the text is passed on stdin
 write_argv: Vec<String>,
 strip_trailing_newline: bool,
}

fn argv(parts: &[&str]) -> Vec<String> {
 parts.iter().map(|p| p.to_string()).collect()
}

impl CommandClipboard {
 pub fn new(name: &'static str, read_argv: Vec<String>, write_argv: Vec<String>) -> Self {
  Self {
   name,
   read_argv,
   write_argv,
   strip_trailing_newline: false,
  }
 }

 pub fn xclip() -> Self {
  Self::new(
   "xclip",
   argv(&["xclip", "-selection", "clipboard", "-o"]),
   argv(&["xclip", "-selection", "clipboard", "-i"]),
  )
 }

 pub fn xsel() -> Self {
  Self::new(
   "xsel",
   argv(&["xsel", "--clipboard", "--output"]),
   argv(&["xsel", "--clipboard", "--input"]),
  )
 }

 pub fn wl_clipboard() -> Self {
  Self::new(
   "wl-clipboard",
   argv(&["wl-paste", "--no-newline"]),
   argv(&["wl-copy"]),
  )
 }

 pub fn pbcopy() -> Self {
  Self::new("pbcopy", argv(&["pbpaste"]), argv(&["pbcopy"]))
 }

 pub fn powershell() -> Self {
  Self {
   // Get-Clipboard appends a line terminator of its own
   strip_trailing_newline: true,
   ..Self::new(
    "powershell",
    argv(&["powershell.exe", "-NoProfile", "-NonInteractive", "-Command", "Get-Clipboard -Raw"]),
    argv(&[
     "powershell.exe",
     "-NoProfile",
     "-NonInteractive",
     "-Command",
     "$t = [Console]::In.ReadToEnd(); Set-Clipboard -Value $t",
    ]),
   )
  }
 }

 fn split(&self, argv: &[String]) -> Result<(String, Vec<String>), MyError> {
  match argv.split_first() {
   Some((program, args)) => Ok((program.clone(), args.to_vec())),
   None => Err(MyError::clipboard(self.name, "empty command line")),
  }
 }
}

impl ClipboardAccess for CommandClipboard {
 fn name(&self) -> &'static str {
  self.name
 }

 fn read(&self) -> Result<Option<String>, MyError> {
  let (program, args) = self.split(&self.read_argv)?;
  let output = helper_command(&program)
   .args(&args)
   .stdin(Stdio::null())
   .output()
   .map_err(|e| MyError::clipboard(self.name, format!("cannot run {program}: {e}")))?;

  // wl-paste and friends fail on an empty clipboard
  if !output.status.success() {
   trace!(
    backend = self.name,
    status = %output.status,
    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
    "clipboard read command failed"
   );
   return Ok(None);
  }

  let text = String::from_utf8_lossy(&output.stdout);
  let text = if self.strip_trailing_newline {
   trim_line_terminator(&text)
  } else {
   text.as_ref()
  };
  Ok((!text.is_empty()).then(|| text.to_string()))
 }

 fn write(&self, text: &str) -> Result<(), MyError> {
  let (program, args) = self.split(&self.write_argv)?;
  // xclip and wl-copy leave a child behind that serves the selection and
  // keeps inherited pipes open, so only the exit status is waited for
  let mut child = helper_command(&program)
   .args(&args)
   .stdin(Stdio::piped())
   .stdout(Stdio::null())
   .stderr(Stdio::null())
   .spawn()
   .map_err(|e| MyError::clipboard(self.name, format!("cannot run {program}: {e}")))?;

  if let Some(mut stdin) = child.stdin.take() {
   if let Err(e) = stdin.write_all(text.as_bytes()) {
    let _ = child.kill();
    let _ = child.wait();
    return Err(MyError::clipboard(
     self.name,
     format!("cannot pass text to {program}: {e}"),
    ));
   }
  }

  let status = child
   .wait()
   .map_err(|e| MyError::clipboard(self.name, format!("{program} did not finish: {e}")))?;
  if status.success() {
   Ok(())
  } else {
   Err(MyError::clipboard(
    self.name,
    format!("{program} exited with {status}"),
   ))
  }
 }
}

#[cfg(test)]
pub(crate) mod fake {
 use std::collections::VecDeque;
 use std::sync::Mutex;

 use super::ClipboardAccess;
 use crate::error::MyError;

 /** returns scripted reads, then repeats the last one; records writes */
 #[derive(Default)]
 pub(crate) struct ScriptedClipboard {
  reads: Mutex<VecDeque<Result<Option<String>, String>>>,
  last: Mutex<Option<String>>,
  writes: Mutex<Vec<String>>,
  fail_writes: bool,
 }

 impl ScriptedClipboard {
  pub(crate) fn new(reads: Vec<Result<Option<&str>, &str>>) -> Self {
   Self {
    reads: Mutex::new(
     reads
      .into_iter()
      .map(|r| r.map(|o| o.map(String::from)).map_err(String::from))
      .collect(),
    ),
    ..Self::default()
   }
  }

  pub(crate) fn failing_writes(mut self) -> Self {
   self.fail_writes = true;
   self
  }

  pub(crate) fn written(&self) -> Vec<String> {
   self.writes.lock().unwrap().clone()
  }
 }

 impl ClipboardAccess for ScriptedClipboard {
  fn name(&self) -> &'static str {
   "scripted"
  }

  fn read(&self) -> Result<Option<String>, MyError> {
   match self.reads.lock().unwrap().pop_front() {
    Some(Ok(value)) => {
     *self.last.lock().unwrap() = value.clone();
     Ok(value)
    }
    Some(Err(message)) => Err(MyError::clipboard("scripted", message)),
    None => Ok(self.last.lock().unwrap().clone()),
   }
  }

  fn write(&self, text: &str) -> Result<(), MyError> {
   if self.fail_writes {
    return Err(MyError::clipboard("scripted", "write refused"));
   }
   self.writes.lock().unwrap().push(text.to_string());
   *self.last.lock().unwrap() = Some(text.to_string());
   Ok(())
  }
 }
}

#[cfg(all(test, unix))]
mod tests {
 use std::fs;

 use super::*;

 fn sh(script: &str) -> Vec<String> {
  argv(&["sh", "-c", script])
 }

 #[test]
 fn command_read_keeps_whitespace() {
  let cb = CommandClipboard::new("test", sh("printf 'hello  \\n'"), sh("cat > /dev/null"));
  assert_eq!(cb.read().unwrap(), Some("hello  \n".to_string()));
 }

 #[test]
 fn command_read_strips_one_terminator_when_asked() {
  let cb = CommandClipboard {
   strip_trailing_newline: true,
   ..CommandClipboard::new("test", sh("printf 'a\\n\\n'"), sh("cat > /dev/null"))
  };
  assert_eq!(cb.read().unwrap(), Some("a\n".to_string()));
 }

 #[test]
 fn empty_or_failing_read_is_no_content() {
  let cb = CommandClipboard::new("test", sh("printf ''"), sh("true"));
  assert_eq!(cb.read().unwrap(), None);

  let cb = CommandClipboard::new("test", sh("echo nothing copied >&2; exit 1"), sh("true"));
  assert_eq!(cb.read().unwrap(), None);
 }

 #[test]
 fn command_write_passes_text_on_stdin() {
  let dir = tempfile::tempdir().unwrap();
  let target = dir.path().join("clipboard.txt");
  let script = format!("cat > '{}'", target.display());
  let cb = CommandClipboard::new("test", sh("true"), sh(&script));
  cb.write("line one\nline two").unwrap();
  assert_eq!(fs::read_to_string(&target).unwrap(), "line one\nline two");
 }

 #[test]
 fn failing_write_is_an_error() {
  let cb = CommandClipboard::new("test", sh("true"), sh("cat > /dev/null; exit 3"));
  let err = cb.write("x").unwrap_err();
  assert!(err.to_string().contains("exited"));

  let cb = CommandClipboard::new(
   "test",
   argv(&["/nonexistent/clipboard-tool"]),
   argv(&["/nonexistent/clipboard-tool"]),
  );
  assert!(cb.read().is_err());
  assert!(cb.write("x").is_err());
 }

 #[test]
 fn explicit_backend_is_kept() {
  assert_eq!(Backend::Xsel.resolve(Platform::Linux), Backend::Xsel);
  assert_eq!(Backend::Auto.resolve(Platform::MacOs), Backend::Pbcopy);
  assert_eq!(Backend::Auto.resolve(Platform::Windows), Backend::Powershell);
 }
}
