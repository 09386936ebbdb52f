//! # evio-core
//!
//! Core utilities shared by the evio reactor crates.
//!
//! ## Modules
//!
//! - `buffer` - Growable message buffer with separate read/write cursors
//! - `elog` - Leveled stderr logging macros
//! - `env` - Environment variable utilities

#![allow(dead_code)]

pub mod buffer;
pub mod elog;
pub mod env;

// Re-exports for convenience
pub use buffer::{MsgBuffer, DEFAULT_BUFFER_SIZE};
pub use env::{env_get, env_get_bool, env_get_opt, env_get_str, env_is_set};
