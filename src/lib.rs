//! Remote-environment-variable lookup engine.
//!
//! See `engine::lookup_remote_env` for the entry point; the other modules
//! are the components spec.md's system overview names, leaves first.

pub mod cli;
pub mod engine;
pub mod error;
pub mod logging;
pub mod preconditions;
pub mod proc_maps;
pub mod ptrace_transport;
pub mod remote_call;
pub mod restore;
pub mod scratch;
pub mod symbol;
