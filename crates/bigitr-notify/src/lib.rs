//! Per-repository SMTP error reports accreted over the course of a run.

pub mod error;
pub mod mailer;

pub use error::*;
pub use mailer::*;
