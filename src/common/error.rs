//! Error types for dapshell
//!
//! Messages are shown verbatim at the console prompt, so they should say
//! what went wrong and, where there is one, what to do about it.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the session engine and its collaborators
#[derive(Error, Debug)]
pub enum Error {
    // === Session Errors ===
    #[error("There is no active debugging session.")]
    SessionNotActive,

    #[error("The program is not yet running (use 'run' to start it).")]
    NotYetRunning,

    #[error("There is nothing to relaunch.")]
    NothingToRelaunch,

    #[error("There is nothing to run, or already attached to a process.")]
    NothingToRun,

    // === Lookup Errors ===
    #[error("Breakpoint #{0} not found")]
    BreakpointNotFound(u32),

    #[error("No breakpoint is registered under adapter id {0}")]
    BreakpointIdNotFound(i64),

    #[error("Thread {0} not found")]
    ThreadNotFound(i64),

    #[error("There is no focus thread. Wait for the program to stop.")]
    NoFocusThread,

    #[error("There are only {available} frames in the thread's stack trace.")]
    FrameNotFound { index: usize, available: usize },

    #[error("There is no scope named '{0}' in the current context.")]
    ScopeNotFound(String),

    // === Adapter Errors ===
    #[error("Debug adapter '{name}' not found. Searched: {searched}")]
    AdapterNotFound { name: String, searched: String },

    #[error("Debug adapter failed to start: {0}")]
    AdapterStartFailed(String),

    #[error("Debug adapter crashed unexpectedly")]
    AdapterCrashed,

    // === DAP Protocol Errors ===
    #[error("DAP protocol error: {0}")]
    DapProtocol(String),

    #[error("DAP request '{command}' failed: {message}")]
    DapRequestFailed { command: String, message: String },

    #[error("DAP request '{command}' timed out after {secs} seconds")]
    Timeout { command: String, secs: u64 },

    // === Console Errors ===
    #[error("Unknown command '{0}'. Type 'help' for a list of commands.")]
    UnknownCommand(String),

    #[error("{0}")]
    Usage(String),

    // === Configuration Errors ===
    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create an adapter not found error with search paths
    pub fn adapter_not_found<S: AsRef<str>>(name: &str, paths: &[S]) -> Self {
        Self::AdapterNotFound {
            name: name.to_string(),
            searched: paths.iter().map(|s| s.as_ref()).collect::<Vec<_>>().join(", "),
        }
    }

    /// Create a DAP request failed error
    pub fn dap_request_failed(command: &str, message: &str) -> Self {
        Self::DapRequestFailed {
            command: command.to_string(),
            message: message.to_string(),
        }
    }

    /// Create a usage error for a console command
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage(message.into())
    }
}
