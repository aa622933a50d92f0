//! Shared infrastructure for the bigitr synchronization engine: layered
//! config, ignore patterns, the command runner, its run log, and small
//! filesystem helpers used by every higher-level component.

pub mod command;
pub mod config;
pub mod error;
pub mod ignore;
pub mod runlog;
pub mod util;

pub use command::*;
pub use config::*;
pub use error::*;
pub use ignore::*;
pub use runlog::*;
pub use util::*;
