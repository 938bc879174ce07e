//! The host interface: everything the engine cannot do by itself.
//!
//! The dispatcher talks to the outside world only through this trait:
//! character output, blocking keyboard input, the escape flag, the `OSCLI`
//! command gateway, the centisecond clock, `WAIT`, and library loading.
//! Host failures are reported as [`HostError`] values which the engine
//! converts into trappable BASIC errors, so an `ON ERROR` handler can
//! recover from a failed command just like from any other error.

use crate::HostError;
use alloc::{boxed::Box, string::String, vec::Vec};
use core::fmt;

/// Result type of fallible host calls.
pub type HostResult<T> = Result<T, Box<dyn HostError>>;

/// Trait implemented by embedders to service the interpreter's call-outs.
pub trait Host {
    /// Writes program output. Newlines arrive embedded in `text`.
    fn write(&mut self, text: &str);

    /// Blocks until a whole input line is available and appends it
    /// (without the terminator) to `out`.
    ///
    /// # Errors
    ///
    /// Returns `Err` when no more input can ever arrive (for instance on
    /// end of file); the engine raises `Escape` from the waiting `INPUT`.
    fn read_line(&mut self, out: &mut String) -> HostResult<()>;

    /// Polls the escape flag. Checked at loop back-edges; a `true` answer
    /// makes the current statement raise `Escape`.
    fn poll_escape(&mut self) -> bool {
        false
    }

    /// Executes a host command line. When `capture` is given, the
    /// command's output lines are appended to it instead of being shown.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the command cannot be run.
    fn oscli(&mut self, command: &str, capture: Option<&mut Vec<String>>) -> HostResult<()>;

    /// The centisecond clock backing `TIME`.
    fn ticks(&self) -> i64;

    /// Blocks for the given number of centiseconds (`WAIT`).
    fn wait(&mut self, centiseconds: u32);

    /// Loads a library's source text by name (`LIBRARY "name"`).
    ///
    /// # Errors
    ///
    /// Returns `Err` if the library cannot be found or read.
    fn load_library(&mut self, name: &str) -> HostResult<String>;
}

/// Error used by the built-in hosts for call-outs they do not provide.
#[derive(Debug)]
pub struct Unavailable(&'static str);

impl fmt::Display for Unavailable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} is not available on this host", self.0)
    }
}

impl HostError for Unavailable {}

/// A host that provides nothing: output is discarded, input always fails,
/// the clock stands still. Useful for pure computations and tests.
#[derive(Debug, Default)]
pub struct NopHost;

impl Host for NopHost {
    fn write(&mut self, _text: &str) {}

    fn read_line(&mut self, _out: &mut String) -> HostResult<()> {
        Err(Box::new(Unavailable("keyboard input")))
    }

    fn oscli(&mut self, _command: &str, _capture: Option<&mut Vec<String>>) -> HostResult<()> {
        Err(Box::new(Unavailable("OSCLI")))
    }

    fn ticks(&self) -> i64 {
        0
    }

    fn wait(&mut self, _centiseconds: u32) {}

    fn load_library(&mut self, _name: &str) -> HostResult<String> {
        Err(Box::new(Unavailable("LIBRARY")))
    }
}

/// The standard host: stdin/stdout, `std::process` for `OSCLI`, the real
/// clock, libraries from the filesystem.
#[derive(Debug)]
pub struct StdHost {
    started: std::time::Instant,
}

impl StdHost {
    pub fn new() -> StdHost {
        StdHost {
            started: std::time::Instant::now(),
        }
    }
}

impl Default for StdHost {
    fn default() -> Self {
        StdHost::new()
    }
}

impl Host for StdHost {
    fn write(&mut self, text: &str) {
        use std::io::Write as _;
        let mut stdout = std::io::stdout();
        let _ = stdout.write_all(text.as_bytes());
        let _ = stdout.flush();
    }

    fn read_line(&mut self, out: &mut String) -> HostResult<()> {
        use std::io::BufRead as _;
        let mut line = String::new();
        let read = std::io::stdin()
            .lock()
            .read_line(&mut line)
            .map_err(|e| Box::new(e) as Box<dyn HostError>)?;
        if read == 0 {
            return Err(Box::new(Unavailable("keyboard input")));
        }
        out.push_str(line.trim_end_matches(['\n', '\r']));
        Ok(())
    }

    fn oscli(&mut self, command: &str, capture: Option<&mut Vec<String>>) -> HostResult<()> {
        let mut invocation = std::process::Command::new("/bin/sh");
        invocation.arg("-c").arg(command);
        match capture {
            Some(lines) => {
                let output = invocation
                    .output()
                    .map_err(|e| Box::new(e) as Box<dyn HostError>)?;
                let text = String::from_utf8_lossy(&output.stdout);
                lines.extend(text.lines().map(String::from));
            }
            None => {
                invocation
                    .status()
                    .map_err(|e| Box::new(e) as Box<dyn HostError>)?;
            }
        }
        Ok(())
    }

    fn ticks(&self) -> i64 {
        (self.started.elapsed().as_millis() / 10) as i64
    }

    fn wait(&mut self, centiseconds: u32) {
        std::thread::sleep(std::time::Duration::from_millis(centiseconds as u64 * 10));
    }

    fn load_library(&mut self, name: &str) -> HostResult<String> {
        std::fs::read_to_string(name).map_err(|e| Box::new(e) as Box<dyn HostError>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nop_host_denies_callouts() {
        let mut host = NopHost;
        let mut line = String::new();
        assert!(host.read_line(&mut line).is_err());
        assert!(host.oscli("true", None).is_err());
        assert!(host.load_library("lib").is_err());
        assert_eq!(host.ticks(), 0);
        assert!(!host.poll_escape());
    }
}
