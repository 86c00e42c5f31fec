//! Common utilities shared by the engine, transport and console

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use error::{Error, Result};
