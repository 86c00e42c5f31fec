//! dapshell - an interactive debugger console for Debug Adapter Protocol adapters
//!
//! The [`engine`] drives one adapter session at a time and keeps the user's
//! breakpoints and the target's threads in sync with what the adapter
//! reports. [`dap`] is the wire side, [`console`] the command side.

pub mod common;
pub mod console;
pub mod dap;
pub mod engine;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use engine::{AdapterAction, AdapterDescription, Engine, EngineEvent, SessionState};
