use std::process::Command;

/// Removes exactly one trailing line terminator (`\r\n`, `\n` or `\r`).
/// Any other whitespace is part of the value.
pub fn trim_line_terminator(line: &str) -> &str {
 line
  .strip_suffix("\r\n")
  .or_else(|| line.strip_suffix('\n'))
  .or_else(|| line.strip_suffix('\r'))
  .unwrap_or(line)
}

/// `Command` for a helper program; on Windows no console window pops up.
pub fn helper_command(program: &str) -> Command {
 #[allow(unused_mut)]
 let mut command = Command::new(program);
 #[cfg(windows)]
 {
  use std::os::windows::process::CommandExt;
  const CREATE_NO_WINDOW: u32 = 0x0800_0000;
  command.creation_flags(CREATE_NO_WINDOW);
 }
 command
}

/// Shortens a clipboard value for log lines.
pub fn preview(text: &str) -> String {
 const MAX_CHARS: usize = 120;
 let flat = text.replace('\n', "\\n");
 if flat.chars().count() <= MAX_CHARS {
  flat
 } else {
  let mut cut: String = flat.chars().take(MAX_CHARS).collect();
  cut.push('…');
  cut
 }
}
