//! The IO collaborator boundary.
//!
//! The core never talks to the terminal directly: syscalls are routed
//! through a [`SimIo`] implementation supplied by the embedder. Reads block
//! until input arrives or [`SimIo::cancel_read`] is called from another
//! thread, in which case they return `None` and the run winds down.

use std::collections::{HashMap, VecDeque};
use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

/// The output streams a print can be directed at.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum IoStream {
    Standard,
    Error,
    Debug,
}

/// Blocking reads and fire-and-forget prints.
///
/// Implementations must be callable from the simulation thread while
/// `cancel_read` arrives from any other thread.
pub trait SimIo: Send + Sync {
    /// Read a whole integer; `None` means the read was cancelled.
    fn read_int(&self) -> Option<i64>;
    /// Read a line of text (without the newline); `None` means cancelled.
    fn read_string(&self) -> Option<String>;
    /// Read a single character; `None` means cancelled.
    fn read_char(&self) -> Option<char>;

    fn print_string(&self, stream: IoStream, text: &str);
    fn print_int(&self, stream: IoStream, value: i64);
    fn print_char(&self, stream: IoStream, value: char);

    /// Unblock any in-flight read, making it return `None`.
    fn cancel_read(&self);
}

// ============================================================================
// BufferIo: scripted IO for tests and headless runs
// ============================================================================

/// An in-memory [`SimIo`]: reads are served from a queue of scripted lines
/// and prints are captured per stream for later inspection.
#[derive(Default)]
pub struct BufferIo {
    input: Mutex<VecDeque<String>>,
    output: Mutex<HashMap<IoStream, String>>,
    cancelled: AtomicBool,
}

impl BufferIo {
    pub fn new() -> Self {
        BufferIo::default()
    }

    /// Queue a line of input for a future read.
    pub fn feed(&self, line: &str) {
        let mut input = self.input.lock().unwrap_or_else(|e| e.into_inner());
        input.push_back(line.to_string());
    }

    /// Everything printed to `stream` so far.
    pub fn output(&self, stream: IoStream) -> String {
        let output = self.output.lock().unwrap_or_else(|e| e.into_inner());
        output.get(&stream).cloned().unwrap_or_default()
    }

    fn next_line(&self) -> Option<String> {
        if self.cancelled.load(Ordering::Acquire) {
            return None;
        }
        let mut input = self.input.lock().unwrap_or_else(|e| e.into_inner());
        input.pop_front()
    }

    fn append(&self, stream: IoStream, text: &str) {
        let mut output = self.output.lock().unwrap_or_else(|e| e.into_inner());
        output.entry(stream).or_default().push_str(text);
    }
}

impl SimIo for BufferIo {
    fn read_int(&self) -> Option<i64> {
        // an unparseable scripted line reads as zero, matching a user
        // typing garbage at a prompt
        self.next_line().map(|line| line.trim().parse().unwrap_or(0))
    }

    fn read_string(&self) -> Option<String> {
        self.next_line()
    }

    fn read_char(&self) -> Option<char> {
        self.next_line().map(|line| line.chars().next().unwrap_or('\0'))
    }

    fn print_string(&self, stream: IoStream, text: &str) {
        self.append(stream, text);
    }

    fn print_int(&self, stream: IoStream, value: i64) {
        self.append(stream, &value.to_string());
    }

    fn print_char(&self, stream: IoStream, value: char) {
        self.append(stream, &value.to_string());
    }

    fn cancel_read(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

// ============================================================================
// ConsoleIo: terminal-backed IO for the CLI
// ============================================================================

/// Terminal IO. A dedicated reader thread owns stdin so that a blocking
/// read can still be cancelled from another thread.
pub struct ConsoleIo {
    lines: Mutex<Receiver<String>>,
    cancelled: AtomicBool,
}

impl ConsoleIo {
    pub fn new() -> Self {
        let (tx, rx): (Sender<String>, Receiver<String>) = mpsc::channel();
        thread::Builder::new()
            .name("stdin-reader".to_string())
            .spawn(move || {
                let stdin = std::io::stdin();
                for line in stdin.lock().lines() {
                    match line {
                        Ok(line) => {
                            if tx.send(line).is_err() {
                                break;
                            }
                        }
                        Err(_) => break,
                    }
                }
            })
            .ok();
        ConsoleIo {
            lines: Mutex::new(rx),
            cancelled: AtomicBool::new(false),
        }
    }

    fn next_line(&self) -> Option<String> {
        let lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if self.cancelled.load(Ordering::Acquire) {
                return None;
            }
            match lines.recv_timeout(Duration::from_millis(50)) {
                Ok(line) => return Some(line),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    fn write(&self, stream: IoStream, text: &str) {
        let _ = match stream {
            IoStream::Standard => {
                let mut out = std::io::stdout();
                out.write_all(text.as_bytes()).and_then(|_| out.flush())
            }
            IoStream::Error | IoStream::Debug => {
                let mut err = std::io::stderr();
                err.write_all(text.as_bytes()).and_then(|_| err.flush())
            }
        };
    }
}

impl Default for ConsoleIo {
    fn default() -> Self {
        ConsoleIo::new()
    }
}

impl SimIo for ConsoleIo {
    fn read_int(&self) -> Option<i64> {
        self.next_line().map(|line| line.trim().parse().unwrap_or(0))
    }

    fn read_string(&self) -> Option<String> {
        self.next_line()
    }

    fn read_char(&self) -> Option<char> {
        self.next_line().map(|line| line.chars().next().unwrap_or('\0'))
    }

    fn print_string(&self, stream: IoStream, text: &str) {
        self.write(stream, text);
    }

    fn print_int(&self, stream: IoStream, value: i64) {
        self.write(stream, &value.to_string());
    }

    fn print_char(&self, stream: IoStream, value: char) {
        self.write(stream, &value.to_string());
    }

    fn cancel_read(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_io_reads() {
        let io = BufferIo::new();
        io.feed("42");
        io.feed("hello");
        io.feed("x");
        assert_eq!(io.read_int(), Some(42));
        assert_eq!(io.read_string(), Some("hello".to_string()));
        assert_eq!(io.read_char(), Some('x'));
        // queue exhausted
        assert_eq!(io.read_int(), None);
    }

    #[test]
    fn test_buffer_io_bad_int_reads_zero() {
        let io = BufferIo::new();
        io.feed("not a number");
        assert_eq!(io.read_int(), Some(0));
    }

    #[test]
    fn test_buffer_io_output_per_stream() {
        let io = BufferIo::new();
        io.print_string(IoStream::Standard, "out");
        io.print_int(IoStream::Standard, 7);
        io.print_char(IoStream::Error, '!');
        assert_eq!(io.output(IoStream::Standard), "out7");
        assert_eq!(io.output(IoStream::Error), "!");
        assert_eq!(io.output(IoStream::Debug), "");
    }

    #[test]
    fn test_buffer_io_cancel() {
        let io = BufferIo::new();
        io.feed("42");
        io.cancel_read();
        assert_eq!(io.read_int(), None);
    }
}
