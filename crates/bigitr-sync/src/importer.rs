//! Importer (§4.8): CENTRAL → DIST pipeline per (centralBranch, distBranch).

use std::collections::HashMap;
use std::path::Path;

use bigitr_core::error::{EmptyExportError, MergeFailure};
use bigitr_core::runlog::RunLog;
use bigitr_core::util;
use bigitr_notify::Mailer;
use bigitr_vcs::{CentralDriver, DistDriver};
use chrono::Local;

use crate::error::SyncError;
use crate::keywords::demangle_tree;
use crate::merge::merge_cascade;

pub struct ImportRequest<'a> {
    pub module: &'a str,
    pub central_branch: &'a str,
    pub dist_branch: &'a str,
    pub dist_url: &'a str,
    pub skeleton: Option<&'a Path>,
    pub merge_map: &'a HashMap<String, Vec<String>>,
    pub import_post_hooks: &'a HashMap<String, Vec<String>>,
    pub pre_hooks: &'a [String],
    pub post_hooks: &'a [String],
}

/// Runs one import per the state machine in §4.8. The orphan-bootstrap path
/// never reaches `mergeFastForward` — it only runs on the "existing local
/// branch" transition (see SPEC_FULL.md §9's resolved Open Question).
pub fn import_branch(
    central: &CentralDriver,
    dist: &DistDriver,
    request: &ImportRequest,
    log: &mut RunLog,
    mailer: &mut Mailer,
) -> Result<(), SyncError> {
    util::remove_recursive(&central.checkout)?;
    central.export_module(log, request.module, request.central_branch)?;

    let exported = util::list_files(&central.checkout)?;
    if exported.is_empty() {
        return Err(EmptyExportError {
            context: format!(
                "CENTRAL branch '{}' for module '{}' contains no files",
                request.central_branch, request.module
            ),
        }
        .into());
    }
    demangle_tree(&central.checkout)?;

    if !dist.root.exists() {
        dist.initialize_repository(log, request.dist_url, true, request.skeleton)?;
    }

    let branches = dist.branches(log)?;
    let mut add_skeleton = false;
    if !branches.iter().any(|b| b == request.dist_branch) {
        let remote = format!("remotes/origin/{}", request.dist_branch);
        if branches.iter().any(|b| b == &remote) {
            dist.track_branch(log, request.dist_branch)?;
            dist.checkout(log, request.dist_branch)?;
        } else {
            dist.checkout_new_import_branch(log, request.dist_branch)?;
            add_skeleton = true;
        }
    } else {
        if dist.branch(log)? != request.dist_branch {
            dist.checkout(log, request.dist_branch)?;
        }
        dist.fetch(log)?;
        let origin_ref = format!("origin/{}", request.dist_branch);
        dist.merge_fast_forward(log, &origin_ref)?;
    }

    dist.pristine(log)?;
    util::delete_all_files(&dist.root)?;

    util::copy_tree(&central.checkout, &dist.root)?;
    if add_skeleton {
        if let Some(skeleton) = request.skeleton {
            util::copy_tree(skeleton, &dist.root)?;
        }
    }

    dist.run_hooks(log, request.pre_hooks)?;

    if !dist.status(log)?.trim().is_empty() {
        dist.add_all(log)?;
        let message = format!("import from CENTRAL as of {}", Local::now().format("%a %b %e %H:%M:%S %Y"));
        dist.commit(log, &message)?;
        dist.push(log, "origin", request.dist_branch, request.dist_branch)?;
    }

    // Try to merge downstream branches even if there was nothing to commit,
    // since a prior conflict may have been resolved externally.
    let failed = merge_cascade(dist, request.merge_map, request.import_post_hooks, request.dist_branch, log, mailer)?;

    // status() can report clean with ignored files left over from the
    // CENTRAL export; remove them now that the import itself is done.
    dist.pristine(log)?;

    dist.run_hooks(log, request.post_hooks)?;

    if !failed.is_empty() {
        return Err(MergeFailure { failed }.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_export_is_rejected_before_any_dist_mutation() {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let checkout = std::env::temp_dir().join(format!("bigitr-importer-test-{nanos}"));
        std::fs::create_dir_all(&checkout).unwrap();
        let exported = util::list_files(&checkout).unwrap();
        assert!(exported.is_empty());
        std::fs::remove_dir_all(&checkout).ok();
    }
}
