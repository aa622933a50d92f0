//! Exporter (§4.9): DIST → CENTRAL pipeline per (gitBranch, cvsBranch,
//! exportBranch) triple.

use std::collections::BTreeSet;
use std::path::Path;

use bigitr_core::error::{EmptyExportError, MetadataLeakError, MissingBranchError};
use bigitr_core::runlog::RunLog;
use bigitr_vcs::{CentralDriver, DistDriver};

use crate::error::SyncError;

pub struct ExportRequest<'a> {
    pub repository: &'a str,
    pub module: &'a str,
    pub git_branch: &'a str,
    pub central_branch: &'a str,
    pub export_branch: &'a str,
    pub prefix: Option<&'a str>,
    pub cvsvars: &'a [(String, String)],
    pub dist_pre_hooks: &'a [String],
    pub dist_post_hooks: &'a [String],
    pub central_pre_hooks: &'a [String],
    pub central_post_hooks: &'a [String],
}

/// Ensures `branch` exists locally: tracks the matching remote if one exists,
/// branches off the current HEAD and pushes it upstream if `create_branch` is
/// true and neither exists, or fails with `MissingBranchError` otherwise.
/// Mirrors the static `Exporter.trackBranch` in `gitcvs/gitexport.py`.
fn ensure_branch(
    dist: &DistDriver,
    log: &mut RunLog,
    repository: &str,
    branches: &[String],
    branch: &str,
    create_branch: bool,
) -> Result<(), SyncError> {
    if branches.iter().any(|b| b == branch) {
        return Ok(());
    }
    let remote = format!("remotes/origin/{branch}");
    if branches.iter().any(|b| b == &remote) {
        dist.track_branch(log, branch)?;
        return Ok(());
    }
    if !create_branch {
        return Err(MissingBranchError {
            repository: repository.to_string(),
            branch: branch.to_string(),
        }
        .into());
    }
    dist.new_branch(log, branch)?;
    Ok(())
}

/// Runs one export. Computes the six file-set deltas between the CENTRAL
/// checkout and the DIST `gitBranch` tree, refuses to push an empty branch,
/// and replays the delta into CENTRAL before fast-forwarding `exportBranch`
/// back onto `gitBranch`.
pub fn export_branch(
    central: &CentralDriver,
    dist: &DistDriver,
    request: &ExportRequest,
    log: &mut RunLog,
) -> Result<(), SyncError> {
    if central.checkout.exists() {
        central.update(log)?;
    } else {
        central.checkout_module(log, request.module, request.central_branch)?;
    }
    let cvs_files: BTreeSet<String> = central.list_content_files()?.into_iter().collect();

    dist.fetch(log)?;
    dist.pristine(log)?;
    let branches = dist.branches(log)?;
    ensure_branch(dist, log, request.repository, &branches, request.git_branch, false)?;
    dist.checkout(log, request.git_branch)?;
    let origin_ref = format!("origin/{}", request.git_branch);
    if let Err(err) = dist.merge_fast_forward(log, &origin_ref) {
        bigitr_core::util::remove_recursive(&dist.root).ok();
        return Err(err.into());
    }
    ensure_branch(dist, log, request.repository, &branches, request.export_branch, true)?;

    let git_files: BTreeSet<String> = dist
        .list_content_files(log)?
        .into_iter()
        .collect();

    let mut deleted: BTreeSet<String> = cvs_files.difference(&git_files).cloned().collect();
    deleted.retain(|f| f.rsplit('/').next() != Some(".cvsignore"));
    let added: BTreeSet<String> = git_files.difference(&cvs_files).cloned().collect();
    let common: BTreeSet<String> = git_files.intersection(&cvs_files).cloned().collect();

    let git_dirs: BTreeSet<String> = dirnames(&git_files);
    let cvs_dirs: BTreeSet<String> = dirnames(&cvs_files);
    let added_dirs: BTreeSet<String> = git_dirs.difference(&cvs_dirs).cloned().collect();

    if let Some(leaked) = added_dirs.iter().find(|d| d.as_str() == "CVS" || d.ends_with("/CVS")) {
        return Err(MetadataLeakError {
            directory: Path::new(leaked).to_path_buf(),
        }
        .into());
    }

    let meaningful: BTreeSet<&String> = git_files.iter().filter(|f| f.as_str() != ".gitignore").collect();
    if meaningful.is_empty() {
        return Err(EmptyExportError {
            context: format!(
                "refusing to export empty branch '{}' from git branch '{}'",
                request.central_branch, request.git_branch
            ),
        }
        .into());
    }

    let git_messages = dist.log_messages(log, request.export_branch, request.git_branch)?;
    let mut message = if git_messages.trim().is_empty() {
        format!("Initial export to CVS from git branch {}", request.git_branch)
    } else {
        git_messages
    };
    if let Some(prefix) = request.prefix {
        message = format!("{prefix}\n\n{message}");
    }

    dist.run_hooks(log, request.dist_pre_hooks)?;

    dist.info_diff(log, Some(request.export_branch))?;

    let deleted_sorted: Vec<String> = deleted.into_iter().collect();
    central.remove_files(log, &deleted_sorted)?;

    let copied_sorted: Vec<String> = common.union(&added).cloned().collect();
    bigitr_core::util::copy_files(&dist.root, &central.checkout, &copied_sorted)?;

    for dir in &added_dirs {
        central.add_directories(log, Path::new(dir))?;
    }
    let added_sorted: Vec<String> = added.into_iter().collect();
    central.add_files(log, &added_sorted)?;

    central.run_hooks(log, request.central_pre_hooks)?;

    central.commit(log, &message, request.central_branch, request.cvsvars)?;

    central.run_hooks(log, request.central_post_hooks)?;

    dist.checkout(log, request.export_branch)?;
    dist.merge_fast_forward(log, request.git_branch)?;
    dist.push(log, "origin", request.export_branch, request.export_branch)?;

    dist.run_hooks(log, request.dist_post_hooks)?;
    Ok(())
}

fn dirnames(files: &BTreeSet<String>) -> BTreeSet<String> {
    files
        .iter()
        .filter_map(|f| f.rsplit_once('/').map(|(dir, _)| dir.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dirnames_ignores_top_level_files() {
        let files: BTreeSet<String> =
            ["a.txt".to_string(), "sub/b.txt".to_string(), "sub/deep/c.txt".to_string()]
                .into_iter()
                .collect();
        let dirs = dirnames(&files);
        assert_eq!(
            dirs,
            BTreeSet::from(["sub".to_string(), "sub/deep".to_string()])
        );
    }

    #[test]
    fn metadata_leak_is_detected_only_for_newly_added_cvs_directories() {
        let cvs: BTreeSet<String> = ["CVS/Entries".to_string()].into_iter().collect();
        let git: BTreeSet<String> = ["CVS/Entries".to_string()].into_iter().collect();
        let git_dirs = dirnames(&git);
        let cvs_dirs = dirnames(&cvs);
        let added_dirs: BTreeSet<String> = git_dirs.difference(&cvs_dirs).cloned().collect();
        assert!(added_dirs.iter().find(|d| d.as_str() == "CVS" || d.ends_with("/CVS")).is_none());

        let git_with_new_leak: BTreeSet<String> = ["src/sub/CVS/Entries".to_string()].into_iter().collect();
        let cvs_empty: BTreeSet<String> = BTreeSet::new();
        let git_dirs2 = dirnames(&git_with_new_leak);
        let cvs_dirs2 = dirnames(&cvs_empty);
        let added_dirs2: BTreeSet<String> = git_dirs2.difference(&cvs_dirs2).cloned().collect();
        assert!(added_dirs2.iter().any(|d| d.as_str() == "CVS" || d.ends_with("/CVS")));
    }

    #[test]
    fn cvsignore_deletions_are_filtered_out() {
        let cvs: BTreeSet<String> = ["keep.txt".to_string(), ".cvsignore".to_string()].into_iter().collect();
        let git: BTreeSet<String> = ["keep.txt".to_string()].into_iter().collect();
        let mut deleted: BTreeSet<String> = cvs.difference(&git).cloned().collect();
        deleted.retain(|f| f.rsplit('/').next() != Some(".cvsignore"));
        assert!(deleted.is_empty());
    }
}
