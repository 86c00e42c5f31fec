//! Console sink and command layer
//!
//! The engine writes everything user-visible through [`Console`] and uses
//! it to open and close the input loop. The host decides what "input open"
//! means; [`StdConsole`] gates reading stdin on it.

pub mod commands;
pub mod dispatcher;

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

pub use dispatcher::{Command, CommandDispatcher};

/// Where the engine sends output, and the input loop gate
pub trait Console: Send + Sync {
    /// Write text verbatim
    fn output(&self, text: &str);

    /// Write text followed by a newline
    fn output_line(&self, line: &str) {
        self.output(&format!("{}\n", line));
    }

    /// Accept user commands
    fn start_input(&self);

    /// Stop accepting user commands (the target is running)
    fn stop_input(&self);

    fn is_input_open(&self) -> bool;
}

/// Console on the process's stdout
pub struct StdConsole {
    prompt: String,
    input_open: AtomicBool,
}

impl StdConsole {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            input_open: AtomicBool::new(false),
        }
    }

    /// Print the prompt if input is open
    pub fn prompt(&self) {
        if self.is_input_open() {
            let mut out = std::io::stdout().lock();
            let _ = write!(out, "{}", self.prompt);
            let _ = out.flush();
        }
    }
}

impl Console for StdConsole {
    fn output(&self, text: &str) {
        let mut out = std::io::stdout().lock();
        let _ = out.write_all(text.as_bytes());
        let _ = out.flush();
    }

    fn start_input(&self) {
        if !self.input_open.swap(true, Ordering::SeqCst) {
            self.prompt();
        }
    }

    fn stop_input(&self) {
        self.input_open.store(false, Ordering::SeqCst);
    }

    fn is_input_open(&self) -> bool {
        self.input_open.load(Ordering::SeqCst)
    }
}

/// Console that records everything in memory
#[derive(Default)]
pub struct MemoryConsole {
    text: Mutex<String>,
    input_open: AtomicBool,
    input_opened: std::sync::atomic::AtomicUsize,
}

impl MemoryConsole {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far
    pub fn text(&self) -> String {
        self.text.lock().map(|t| t.clone()).unwrap_or_default()
    }

    /// Written output split into lines
    pub fn lines(&self) -> Vec<String> {
        self.text().lines().map(str::to_string).collect()
    }

    /// How many times input was opened
    pub fn input_opened_count(&self) -> usize {
        self.input_opened.load(Ordering::SeqCst)
    }
}

impl Console for MemoryConsole {
    fn output(&self, text: &str) {
        if let Ok(mut t) = self.text.lock() {
            t.push_str(text);
        }
    }

    fn start_input(&self) {
        self.input_opened.fetch_add(1, Ordering::SeqCst);
        self.input_open.store(true, Ordering::SeqCst);
    }

    fn stop_input(&self) {
        self.input_open.store(false, Ordering::SeqCst);
    }

    fn is_input_open(&self) -> bool {
        self.input_open.load(Ordering::SeqCst)
    }
}
