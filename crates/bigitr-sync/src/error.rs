//! Error taxonomy for the synchronization pipelines (§7), composing the
//! seam errors defined in `bigitr-core` and `bigitr-vcs`.

use bigitr_core::error::{
    CentralError, EmptyExportError, ExitCodeError, MergeFailure, MetadataLeakError,
    MissingBranchError,
};

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    ExitCode(#[from] ExitCodeError),
    #[error(transparent)]
    Central(#[from] CentralError),
    #[error(transparent)]
    MissingBranch(#[from] MissingBranchError),
    #[error(transparent)]
    EmptyExport(#[from] EmptyExportError),
    #[error(transparent)]
    MetadataLeak(#[from] MetadataLeakError),
    #[error(transparent)]
    Merge(#[from] MergeFailure),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
