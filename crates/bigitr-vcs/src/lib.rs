//! Drivers wrapping external CENTRAL (CVS) and DIST (Git) commands.

pub mod central;
pub mod dist;

pub use central::*;
pub use dist::*;
