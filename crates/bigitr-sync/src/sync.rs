//! Synchronizer (§4.11): the per-repository import/export/import cycle, and
//! the error-isolation policy a multi-repository driver layers on top of it.

use bigitr_core::config::OnError;
use bigitr_core::runlog::RunLog;
use bigitr_notify::Mailer;
use bigitr_vcs::{CentralDriver, DistDriver};

use crate::error::SyncError;
use crate::exporter::{export_branch, ExportRequest};
use crate::importer::{import_branch, ImportRequest};

/// Runs one repository's sync cycle: an optional pre-import pass, the export
/// pass, then the import pass again (so branches CENTRAL just received are
/// reflected back before the run ends). The first failing branch aborts the
/// whole cycle for this repository — mirrors `Synchronizer.synchronize` in
/// `bigitr/sync.py`, which has no internal per-branch isolation.
pub fn synchronize(
    central: &CentralDriver,
    dist: &DistDriver,
    imports: &[ImportRequest],
    exports: &[ExportRequest],
    pre_import: bool,
    log: &mut RunLog,
    mailer: &mut Mailer,
) -> Result<(), SyncError> {
    if pre_import {
        for request in imports {
            import_branch(central, dist, request, log, mailer)?;
        }
    }
    for request in exports {
        export_branch(central, dist, request, log)?;
    }
    for request in imports {
        import_branch(central, dist, request, log, mailer)?;
    }
    Ok(())
}

/// Records `err` against `repository`'s run log and, for `OnError::Warn`,
/// also echoes it to stderr (ABORT ends up on stderr anyway at the caller's
/// level, so it is not duplicated here). Returns whether the caller should
/// stop processing further repositories. A command-exit failure additionally
/// attaches the command's captured output to `mailer`, mirroring
/// `synchronizeAll`'s special case for `shell.ErrorExitCode` versus the
/// catch-all branch.
pub fn report_failure(
    repository: &str,
    err: &SyncError,
    log: &mut RunLog,
    mailer: &mut Mailer,
    on_error: OnError,
) -> bool {
    if matches!(err, SyncError::ExitCode(_) | SyncError::Central(_)) {
        if let Ok(segment) = log.last_output() {
            mailer.add_attachment(
                &segment.stdout.unwrap_or_default(),
                &format!("output before failure in {repository}"),
            );
            mailer.add_attachment(
                &segment.stderr.unwrap_or_default(),
                &format!("errors before failure in {repository}"),
            );
        }
    }

    let errmsg = format!("Error for repository '{repository}':\n{err}\n");
    let _ = log.write_stderr(errmsg.as_bytes());

    match on_error {
        OnError::Warn => {
            eprint!("{errmsg}");
            false
        }
        OnError::Continue => false,
        OnError::Abort => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigitr_core::error::ExitCodeError;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn unique_temp_dir(name: &str) -> std::path::PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("bigitr-sync-test-{name}-{nanos}"));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn continue_policy_never_requests_abort() {
        let dir = unique_temp_dir("continue");
        let mut log = RunLog::open(&dir, "repo").expect("open log");
        let mut mailer = Mailer::new("repo", Vec::new(), None, "localhost");
        let err = SyncError::ExitCode(ExitCodeError {
            command: vec!["cvs".to_string(), "update".to_string()],
            retcode: 1,
        });
        let should_abort = report_failure("repo", &err, &mut log, &mut mailer, OnError::Continue);
        assert!(!should_abort);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn abort_policy_requests_abort() {
        let dir = unique_temp_dir("abort");
        let mut log = RunLog::open(&dir, "repo").expect("open log");
        let mut mailer = Mailer::new("repo", Vec::new(), None, "localhost");
        let err = SyncError::ExitCode(ExitCodeError {
            command: vec!["cvs".to_string(), "update".to_string()],
            retcode: 1,
        });
        let should_abort = report_failure("repo", &err, &mut log, &mut mailer, OnError::Abort);
        assert!(should_abort);
        std::fs::remove_dir_all(&dir).ok();
    }
}
