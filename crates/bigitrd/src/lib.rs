//! Scheduling daemon: builds repository jobs from a `DaemonConfig`, holds
//! the PID lock for the process lifetime, and runs the poll/sync loop.

pub mod daemon;
pub mod jobs;
pub mod pidlock;

pub use daemon::*;
pub use jobs::*;
pub use pidlock::*;
