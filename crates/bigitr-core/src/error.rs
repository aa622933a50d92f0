use std::path::PathBuf;

/// Errors raised while loading or querying a layered INI configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed line {line} in {path}: {text:?}")]
    Parse {
        path: PathBuf,
        line: usize,
        text: String,
    },
    #[error("no key '{key}' in section [{section}] or [GLOBAL] of {path}")]
    MissingKey {
        path: PathBuf,
        section: String,
        key: String,
    },
    #[error("key '{key}' in section [{section}] must resolve to an absolute path, got {value:?}")]
    NotAbsolute {
        section: String,
        key: String,
        value: String,
    },
    #[error("no repository section named '{name}'")]
    UnknownRepository { name: String },
    #[error("invalid time spec {value:?} for key '{key}'")]
    InvalidTimeSpec { key: String, value: String },
}

/// Raised by CommandRunner when a fatal subprocess exits non-zero.
#[derive(Debug, thiserror::Error)]
#[error("command {command:?} exited with status {retcode}")]
pub struct ExitCodeError {
    pub command: Vec<String>,
    pub retcode: i32,
}

/// Wraps any error raised while a CentralDriver held an active checkout;
/// the checkout directory has already been removed by the time this is seen.
#[derive(Debug, thiserror::Error)]
#[error("CENTRAL operation failed in checkout {checkout}: {source}")]
pub struct CentralError {
    pub checkout: PathBuf,
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

#[derive(Debug, thiserror::Error)]
#[error("branch '{branch}' not found in repository '{repository}'")]
pub struct MissingBranchError {
    pub repository: String,
    pub branch: String,
}

#[derive(Debug, thiserror::Error)]
#[error("{context}")]
pub struct EmptyExportError {
    pub context: String,
}

#[derive(Debug, thiserror::Error)]
#[error("export would introduce CENTRAL metadata directory '{directory}'")]
pub struct MetadataLeakError {
    pub directory: PathBuf,
}

#[derive(Debug, thiserror::Error)]
#[error("merge cascade failed for branches: {}", failed.join(", "))]
pub struct MergeFailure {
    pub failed: Vec<String>,
}
