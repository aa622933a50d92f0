//! CentralDriver: all interactions with the legacy centralized VCS (§4.7).

use std::io::Write as _;
use std::path::{Path, PathBuf};

use bigitr_core::command::{run, RunOptions};
use bigitr_core::error::CentralError;
use bigitr_core::runlog::RunLog;
use bigitr_core::util;

/// The symbolic trunk token maps to "no branch flag" everywhere a real
/// branch name would otherwise be passed on the command line.
const TRUNK_TOKEN: &str = "@{trunk}";

fn branch_flag(branch: &str) -> Option<&str> {
    if branch == TRUNK_TOKEN {
        None
    } else {
        Some(branch)
    }
}

pub struct CentralDriver {
    pub cvsroot: String,
    pub checkout: PathBuf,
}

impl CentralDriver {
    pub fn new(cvsroot: String, checkout: PathBuf) -> Self {
        CentralDriver { cvsroot, checkout }
    }

    /// Exports the CENTRAL root through the environment variable the `cvs`
    /// binary expects, immediately before any subprocess spawn — never
    /// implied by a decorator (§9's "scoped acquisition primitives" note).
    fn set_environment(&self) {
        std::env::set_var("CVSROOT", &self.cvsroot);
    }

    fn wrap<T>(
        &self,
        result: Result<T, bigitr_core::error::ExitCodeError>,
    ) -> Result<T, CentralError> {
        result.map_err(|err| {
            util::remove_recursive(&self.checkout).ok();
            CentralError {
                checkout: self.checkout.clone(),
                source: Box::new(err),
            }
        })
    }

    fn target_basename(&self) -> String {
        self.checkout
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Checks out `module` at `branch` (trunk when `@{trunk}`) into
    /// `self.checkout`, creating the parent directory first.
    pub fn checkout_module(
        &self,
        log: &mut RunLog,
        module: &str,
        branch: &str,
    ) -> Result<(), CentralError> {
        self.set_environment();
        if let Some(parent) = self.checkout.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let target = self.target_basename();
        let mut args = vec!["cvs", "checkout", "-kk", "-d", &target];
        if let Some(branch) = branch_flag(branch) {
            args.push("-r");
            args.push(branch);
        }
        args.push(module);
        let parent = self.checkout.parent().unwrap_or(Path::new(".")).to_path_buf();
        self.wrap(run(log, &args, Some(&parent), RunOptions::fatal()).map(|_| ()))
    }

    /// Exports a pristine snapshot of `module` at `branch` into a fresh
    /// directory; trunk exports use `-D now` instead of `-r branch`.
    pub fn export_module(
        &self,
        log: &mut RunLog,
        module: &str,
        branch: &str,
    ) -> Result<(), CentralError> {
        self.set_environment();
        if let Some(parent) = self.checkout.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let target = self.target_basename();
        let mut args = vec!["cvs", "export", "-kk", "-d", &target];
        match branch_flag(branch) {
            Some(branch) => {
                args.push("-r");
                args.push(branch);
            }
            None => {
                args.push("-D");
                args.push("now");
            }
        }
        args.push(module);
        let parent = self.checkout.parent().unwrap_or(Path::new(".")).to_path_buf();
        self.wrap(run(log, &args, Some(&parent), RunOptions::fatal()).map(|_| ()))
    }

    pub fn update(&self, log: &mut RunLog) -> Result<(), CentralError> {
        self.set_environment();
        let outcome = run(log, &["cvs", "update", "-kk", "-d"], Some(&self.checkout), RunOptions::fatal());
        self.wrap(outcome.map(|_| ()))
    }

    /// Recursively ensures every ancestor of `dir` (top-down, stopping at
    /// directories whose CVS metadata subdirectory already exists) is
    /// registered with `cvs add` before adding `dir` itself.
    pub fn add_directories(&self, log: &mut RunLog, dir: &Path) -> Result<(), CentralError> {
        let full = self.checkout.join(dir);
        if full.join("CVS").exists() {
            return Ok(());
        }
        if let Some(parent) = dir.parent() {
            if parent != Path::new("") {
                self.add_directories(log, parent)?;
            }
        }
        self.set_environment();
        let rel = dir.to_string_lossy().into_owned();
        let outcome = run(log, &["cvs", "add", &rel], Some(&self.checkout), RunOptions::fatal());
        self.wrap(outcome.map(|_| ()))
    }

    /// Adds files with keyword mode "kk"; no-op on an empty list.
    pub fn add_files(&self, log: &mut RunLog, files: &[String]) -> Result<(), CentralError> {
        if files.is_empty() {
            return Ok(());
        }
        self.set_environment();
        let mut args = vec!["cvs".to_string(), "add".to_string(), "-kk".to_string()];
        args.extend(files.iter().cloned());
        let argv: Vec<&str> = args.iter().map(String::as_str).collect();
        let outcome = run(log, &argv, Some(&self.checkout), RunOptions::fatal());
        self.wrap(outcome.map(|_| ()))
    }

    pub fn remove_files(&self, log: &mut RunLog, files: &[String]) -> Result<(), CentralError> {
        if files.is_empty() {
            return Ok(());
        }
        self.set_environment();
        for name in files {
            std::fs::remove_file(self.checkout.join(name)).ok();
        }
        let mut args = vec!["cvs", "remove"];
        let owned: Vec<&str> = files.iter().map(String::as_str).collect();
        args.extend(owned);
        let outcome = run(log, &args, Some(&self.checkout), RunOptions::fatal());
        self.wrap(outcome.map(|_| ()))
    }

    /// Commits staged changes. The message is written to a temp file and
    /// passed via `-F` (CVS historically mishandles embedded newlines on
    /// `-m`); `cvsvars` become repeated `-s K=V` flags; the current branch is
    /// targeted with `-r branch` unless it is the symbolic trunk token.
    pub fn commit(
        &self,
        log: &mut RunLog,
        message: &str,
        branch: &str,
        cvsvars: &[(String, String)],
    ) -> Result<(), CentralError> {
        self.set_environment();
        let mut msgfile = self
            .wrap_io(tempfile::NamedTempFile::new())?;
        self.wrap_io(msgfile.write_all(message.as_bytes()))?;
        self.wrap_io(msgfile.flush())?;
        let msgpath = msgfile.path().to_string_lossy().into_owned();

        let mut args = vec!["cvs".to_string()];
        for (key, value) in cvsvars {
            args.push("-s".to_string());
            args.push(format!("{key}={value}"));
        }
        args.push("commit".to_string());
        if let Some(branch) = branch_flag(branch) {
            args.push("-r".to_string());
            args.push(branch.to_string());
        }
        args.push("-R".to_string());
        args.push("-F".to_string());
        args.push(msgpath);
        let argv: Vec<&str> = args.iter().map(String::as_str).collect();
        let outcome = run(log, &argv, Some(&self.checkout), RunOptions::fatal());
        self.wrap(outcome.map(|_| ()))
    }

    fn wrap_io<T>(&self, result: std::io::Result<T>) -> Result<T, CentralError> {
        result.map_err(|err| {
            util::remove_recursive(&self.checkout).ok();
            CentralError {
                checkout: self.checkout.clone(),
                source: Box::new(err),
            }
        })
    }

    /// Tags the checkout with a branch name; used to materialize a new
    /// CENTRAL branch the first time DIST introduces one.
    pub fn tag_branch(&self, log: &mut RunLog, branch: &str) -> Result<(), CentralError> {
        self.set_environment();
        let outcome = run(log, &["cvs", "tag", "-b", branch], Some(&self.checkout), RunOptions::fatal());
        self.wrap(outcome.map(|_| ()))
    }

    /// Diff-for-info; a non-zero exit is CVS's normal "differences found"
    /// signal, not a failure.
    pub fn info_diff(&self, log: &mut RunLog) -> Result<(), CentralError> {
        self.set_environment();
        let outcome = run(log, &["cvs", "diff"], Some(&self.checkout), RunOptions::non_fatal());
        self.wrap(outcome.map(|_| ()))
    }

    pub fn log_since(&self, log: &mut RunLog, since: &str) -> Result<String, CentralError> {
        self.set_environment();
        let date_flag = format!("-d{since}<now");
        let outcome = run(
            log,
            &["cvs", "log", &date_flag],
            Some(&self.checkout),
            RunOptions::capturing(),
        );
        self.wrap(outcome.map(|out| {
            out.stdout
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                .unwrap_or_default()
        }))
    }

    /// Tracked content files under the checkout, excluding `CVS` metadata
    /// directories.
    pub fn list_content_files(&self) -> std::io::Result<Vec<String>> {
        let mut out = Vec::new();
        walk_excluding_cvs(&self.checkout, &self.checkout, &mut out)?;
        out.sort();
        Ok(out)
    }

    pub fn run_hooks(&self, log: &mut RunLog, hooks: &[String]) -> Result<(), CentralError> {
        for hook in hooks {
            let argv: Vec<&str> = hook.split_whitespace().collect();
            if argv.is_empty() {
                continue;
            }
            let outcome = run(log, &argv, Some(&self.checkout), RunOptions::fatal());
            self.wrap(outcome.map(|_| ()))?;
        }
        Ok(())
    }
}

fn walk_excluding_cvs(root: &Path, dir: &Path, out: &mut Vec<String>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            if path.file_name().and_then(|n| n.to_str()) == Some("CVS") {
                continue;
            }
            walk_excluding_cvs(root, &path, out)?;
        } else if file_type.is_file() {
            if let Ok(rel) = path.strip_prefix(root) {
                out.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cvs_available() -> bool {
        std::process::Command::new("cvs")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    #[test]
    fn branch_flag_maps_trunk_token_to_none() {
        assert_eq!(branch_flag(TRUNK_TOKEN), None);
        assert_eq!(branch_flag("release-1"), Some("release-1"));
    }

    #[test]
    fn list_content_files_excludes_cvs_metadata_dir() {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let checkout = std::env::temp_dir().join(format!("bigitr-central-list-{nanos}"));
        std::fs::create_dir_all(checkout.join("CVS")).unwrap();
        std::fs::write(checkout.join("CVS").join("Entries"), b"").unwrap();
        std::fs::write(checkout.join("a.txt"), b"a").unwrap();
        let driver = CentralDriver::new("/nonexistent/cvsroot".to_string(), checkout.clone());
        let files = driver.list_content_files().expect("list");
        assert_eq!(files, vec!["a.txt".to_string()]);
        std::fs::remove_dir_all(&checkout).ok();
    }

    #[test]
    fn wrap_removes_checkout_directory_on_failure() {
        if !cvs_available() {
            eprintln!("skipping: cvs not on PATH");
            return;
        }
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let checkout = std::env::temp_dir().join(format!("bigitr-central-test-{nanos}"));
        std::fs::create_dir_all(&checkout).unwrap();
        let driver = CentralDriver::new("/nonexistent/cvsroot".to_string(), checkout.clone());
        let log_dir = std::env::temp_dir().join(format!("bigitr-central-log-{nanos}"));
        let mut log = RunLog::open(&log_dir, "repo").expect("open log");
        let result = driver.update(&mut log);
        assert!(result.is_err());
        assert!(!checkout.exists());
        std::fs::remove_dir_all(&log_dir).ok();
    }
}
