//! Synchronization pipelines binding `bigitr-vcs` drivers to the CENTRAL
//! <-> DIST migration semantics: keyword demangling, merge cascades, import,
//! export, and the top-level synchronizer.

pub mod error;
pub mod exporter;
pub mod importer;
pub mod keywords;
pub mod merge;
pub mod sync;

pub use error::*;
pub use exporter::*;
pub use importer::*;
pub use keywords::*;
pub use merge::*;
pub use sync::*;
