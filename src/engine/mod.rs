//! Debug session engine
//!
//! Owns the adapter session lifecycle and the registries that outlive it.

pub mod breakpoints;
pub mod session;
pub mod source_cache;
pub mod threads;

pub use breakpoints::{Breakpoint, BreakpointRegistry};
pub use session::{
    AdapterAction, AdapterDescription, BreakpointSetResult, Engine, EngineEvent, SessionState,
    VariablesInScope,
};
pub use source_cache::SourceCache;
pub use threads::{Thread, ThreadRegistry};
