//! DistDriver: all interactions with the distributed VCS tool (§4.6).

use std::path::{Path, PathBuf};

use bigitr_core::command::{run, RunOptions};
use bigitr_core::error::ExitCodeError;
use bigitr_core::runlog::RunLog;

pub struct DistDriver {
    pub root: PathBuf,
}

impl DistDriver {
    pub fn new(root: PathBuf) -> Self {
        DistDriver { root }
    }

    fn run(&self, log: &mut RunLog, args: &[&str], options: RunOptions) -> Result<String, ExitCodeError> {
        let outcome = run(log, args, Some(&self.root), options)?;
        Ok(outcome
            .stdout
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default())
    }

    pub fn clone(&self, log: &mut RunLog, url: &str) -> Result<(), ExitCodeError> {
        let parent = self.root.parent().unwrap_or(Path::new("."));
        run(log, &["git", "clone", url, &self.root.to_string_lossy()], Some(parent), RunOptions::fatal())?;
        Ok(())
    }

    pub fn fetch(&self, log: &mut RunLog) -> Result<(), ExitCodeError> {
        self.run(log, &["git", "fetch", "--all"], RunOptions::fatal())?;
        Ok(())
    }

    pub fn branches(&self, log: &mut RunLog) -> Result<Vec<String>, ExitCodeError> {
        let out = self.run(log, &["git", "branch", "-a"], RunOptions::capturing())?;
        Ok(out
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| l.trim_start_matches('*').trim().split_whitespace().next().unwrap_or("").to_string())
            .filter(|s| !s.is_empty())
            .collect())
    }

    pub fn branch(&self, log: &mut RunLog) -> Result<String, ExitCodeError> {
        let out = self.run(log, &["git", "rev-parse", "--abbrev-ref", "HEAD"], RunOptions::capturing())?;
        Ok(out.trim().to_string())
    }

    /// `None` when the repository has no refs at all (sentinel for "empty").
    /// Each entry is `(ref, hash)`; the list is sorted so unrelated reordering
    /// in `git show-ref`'s output never looks like new content.
    pub fn refs(&self, log: &mut RunLog) -> Result<Option<Vec<(String, String)>>, ExitCodeError> {
        let options = RunOptions { error_fatal: false, capture_stdout: true };
        let outcome = run(log, &["git", "show-ref", "--head"], Some(&self.root), options)?;
        if outcome.exit_code != 0 {
            return Ok(None);
        }
        let stdout = outcome.stdout.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()).unwrap_or_default();
        let mut refs: Vec<(String, String)> = stdout
            .lines()
            .filter_map(|line| {
                let mut parts = line.split_whitespace();
                let hash = parts.next()?;
                let name = parts.next()?;
                Some((name.to_string(), hash.to_string()))
            })
            .collect();
        refs.sort();
        Ok(Some(refs))
    }

    fn clean(&self, log: &mut RunLog) -> Result<(), ExitCodeError> {
        self.run(log, &["git", "clean", "--force", "-x", "-d"], RunOptions::fatal())?;
        Ok(())
    }

    fn reset(&self, log: &mut RunLog) -> Result<(), ExitCodeError> {
        self.run(log, &["git", "reset", "--hard", "HEAD"], RunOptions::fatal())?;
        Ok(())
    }

    pub fn status(&self, log: &mut RunLog) -> Result<String, ExitCodeError> {
        self.run(log, &["git", "status", "--porcelain"], RunOptions::capturing())
    }

    pub fn status_ignored(&self, log: &mut RunLog) -> Result<String, ExitCodeError> {
        self.run(log, &["git", "status", "--porcelain", "--ignored"], RunOptions::capturing())
    }

    /// Force-clean untracked+ignored; hard-reset to HEAD when refs exist.
    pub fn pristine(&self, log: &mut RunLog) -> Result<(), ExitCodeError> {
        if !self.status_ignored(log)?.trim().is_empty() {
            self.clean(log)?;
            if self.refs(log)?.is_some() {
                self.reset(log)?;
            }
        }
        Ok(())
    }

    pub fn checkout(&self, log: &mut RunLog, branch: &str) -> Result<(), ExitCodeError> {
        self.run(log, &["git", "checkout", "-f", branch], RunOptions::fatal())?;
        Ok(())
    }

    /// Creates an orphan branch with an empty index; tolerates failure of
    /// the subsequent "remove all" when there are no files yet.
    pub fn checkout_new_import_branch(&self, log: &mut RunLog, branch: &str) -> Result<(), ExitCodeError> {
        self.run(log, &["git", "checkout", "--orphan", branch], RunOptions::fatal())?;
        self.run(log, &["git", "rm", "-rf", "."], RunOptions::non_fatal())?;
        Ok(())
    }

    pub fn track_branch(&self, log: &mut RunLog, branch: &str) -> Result<(), ExitCodeError> {
        let remote = format!("origin/{branch}");
        self.run(log, &["git", "branch", "--track", branch, &remote], RunOptions::fatal())?;
        Ok(())
    }

    /// Branches off the current HEAD and immediately publishes it upstream,
    /// so a freshly introduced export branch exists on `origin` before
    /// anything is pushed to it.
    pub fn new_branch(&self, log: &mut RunLog, branch: &str) -> Result<(), ExitCodeError> {
        self.run(log, &["git", "branch", branch], RunOptions::fatal())?;
        self.run(log, &["git", "push", "--set-upstream", "origin", branch], RunOptions::fatal())?;
        Ok(())
    }

    /// Tracked, non-ignored files, excluding anything whose basename begins
    /// with the DIST tool's own metadata prefix.
    pub fn list_content_files(&self, log: &mut RunLog) -> Result<Vec<String>, ExitCodeError> {
        let outcome = run(log, &["git", "ls-files", "--exclude-standard", "-z"], Some(&self.root), RunOptions::capturing())?;
        let bytes = outcome.stdout.unwrap_or_default();
        let raw = String::from_utf8_lossy(&bytes);
        Ok(raw
            .split('\0')
            .filter(|p| !p.is_empty())
            .filter(|p| {
                !p.rsplit('/').next().unwrap_or(p).starts_with(".git")
            })
            .map(str::to_string)
            .collect())
    }

    pub fn info_diff(&self, log: &mut RunLog, since: Option<&str>) -> Result<(), ExitCodeError> {
        let range;
        let mut args = vec!["git", "diff", "--stat=200", "--patch", "--minimal", "--irreversible-delete"];
        if let Some(since) = since {
            range = format!("{since}..HEAD");
            args.push(&range);
        }
        self.run(log, &args, RunOptions::fatal())?;
        Ok(())
    }

    pub fn add_all(&self, log: &mut RunLog) -> Result<(), ExitCodeError> {
        self.run(log, &["git", "add", "-A", "."], RunOptions::fatal())?;
        Ok(())
    }

    pub fn merge_fast_forward(&self, log: &mut RunLog, reference: &str) -> Result<(), ExitCodeError> {
        self.run(log, &["git", "merge", "--ff", "--ff-only", reference], RunOptions::fatal())?;
        Ok(())
    }

    /// Ordinary three-way merge; returns the exit code without failing on
    /// conflict (caller decides what a non-zero code means).
    pub fn merge_default(&self, log: &mut RunLog, branch: &str, message: &str) -> Result<i32, ExitCodeError> {
        let outcome = run(log, &["git", "merge", branch, "-m", message], Some(&self.root), RunOptions::non_fatal())?;
        Ok(outcome.exit_code)
    }

    pub fn merge_ignore(&self, log: &mut RunLog, branch: &str) -> Result<(), ExitCodeError> {
        let message = format!("branch \"{branch}\" closed");
        self.run(log, &["git", "merge", "--strategy=ours", "--ff", "-m", &message, branch], RunOptions::fatal())?;
        Ok(())
    }

    pub fn commit(&self, log: &mut RunLog, message: &str) -> Result<(), ExitCodeError> {
        self.run(log, &["git", "commit", "-m", message], RunOptions::fatal())?;
        Ok(())
    }

    pub fn push(&self, log: &mut RunLog, remote: &str, local: &str, remote_name: &str) -> Result<(), ExitCodeError> {
        let refspec = format!("{local}:{remote_name}");
        self.run(log, &["git", "push", remote, &refspec], RunOptions::fatal())?;
        Ok(())
    }

    pub fn log_messages(&self, log: &mut RunLog, since: &str, until: &str) -> Result<String, ExitCodeError> {
        let range = format!("{since}..{until}");
        self.run(log, &["git", "log", &range], RunOptions::capturing())
    }

    pub fn run_hooks(&self, log: &mut RunLog, hooks: &[String]) -> Result<(), ExitCodeError> {
        for hook in hooks {
            let argv: Vec<&str> = hook.split_whitespace().collect();
            if argv.is_empty() {
                continue;
            }
            self.run(log, &argv, RunOptions::fatal())?;
        }
        Ok(())
    }

    /// Clones if missing; if the clone has no refs and `create`, materializes
    /// an initial commit (skeleton, or an empty/.gitignore placeholder) and
    /// pushes the default branch. With `create=false`, an empty clone fails.
    pub fn initialize_repository(
        &self,
        log: &mut RunLog,
        url: &str,
        create: bool,
        seed: Option<&Path>,
    ) -> Result<(), ExitCodeError> {
        if !self.root.exists() {
            self.clone(log, url)?;
        }
        if self.refs(log)?.is_some() {
            return Ok(());
        }
        if !create {
            // An empty clone with create=false is a configuration error the
            // caller surfaces as EmptyExportError/MissingBranchError.
            return Err(ExitCodeError {
                command: vec!["git".to_string(), "initializeRepository".to_string()],
                retcode: 1,
            });
        }
        if let Some(seed_dir) = seed {
            bigitr_core::util::copy_tree(seed_dir, &self.root)
                .unwrap_or_else(|err| eprintln!("failed to seed initial commit: {err}"));
        } else {
            let gitignore = self.root.join(".gitignore");
            if !gitignore.exists() {
                std::fs::write(&gitignore, b"").unwrap_or_else(|err| {
                    eprintln!("failed to write placeholder .gitignore: {err}")
                });
            }
        }
        self.add_all(log)?;
        self.commit(log, "initial import")?;
        let branch = self.branch(log)?;
        self.push(log, "origin", &branch, &branch)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn unique_temp_dir(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock")
            .as_nanos();
        std::env::temp_dir().join(format!("bigitr-dist-test-{name}-{nanos}"))
    }

    fn run_git(dir: &Path, args: &[&str]) {
        let status = Command::new("git")
            .args(args)
            .current_dir(dir)
            .status()
            .expect("run git");
        assert!(status.success(), "git {args:?} failed");
    }

    fn init_repo_with_commit(dir: &Path) {
        std::fs::create_dir_all(dir).unwrap();
        run_git(dir, &["init", "-q", "-b", "main"]);
        run_git(dir, &["config", "user.email", "test@example.com"]);
        run_git(dir, &["config", "user.name", "Test"]);
        std::fs::write(dir.join("a.txt"), b"a").unwrap();
        run_git(dir, &["add", "a.txt"]);
        run_git(dir, &["commit", "-q", "-m", "initial"]);
    }

    #[test]
    fn branch_reports_current_branch_name() {
        let dir = unique_temp_dir("branch");
        init_repo_with_commit(&dir);
        let driver = DistDriver::new(dir.clone());
        let mut log = RunLog::open(&dir, "repo").expect("open log");
        assert_eq!(driver.branch(&mut log).expect("branch"), "main");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn list_content_files_excludes_git_metadata() {
        let dir = unique_temp_dir("list");
        init_repo_with_commit(&dir);
        std::fs::write(dir.join(".gitattributes"), b"").unwrap();
        run_git(&dir, &["add", ".gitattributes"]);
        run_git(&dir, &["commit", "-q", "-m", "meta"]);
        let driver = DistDriver::new(dir.clone());
        let mut log = RunLog::open(&dir, "repo").expect("open log");
        let files = driver.list_content_files(&mut log).expect("list");
        assert_eq!(files, vec!["a.txt".to_string()]);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn pristine_resets_dirty_tracked_file() {
        let dir = unique_temp_dir("pristine");
        init_repo_with_commit(&dir);
        std::fs::write(dir.join("a.txt"), b"dirty").unwrap();
        let driver = DistDriver::new(dir.clone());
        let mut log = RunLog::open(&dir, "repo").expect("open log");
        driver.pristine(&mut log).expect("pristine");
        assert_eq!(std::fs::read(dir.join("a.txt")).unwrap(), b"a");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn refs_returns_none_sentinel_for_empty_repository() {
        let dir = unique_temp_dir("empty-refs");
        std::fs::create_dir_all(&dir).unwrap();
        run_git(&dir, &["init", "-q", "-b", "main"]);
        let driver = DistDriver::new(dir.clone());
        let mut log = RunLog::open(&dir, "repo").expect("open log");
        assert!(driver.refs(&mut log).expect("refs").is_none());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn refs_lists_head_and_branch_after_a_commit() {
        let dir = unique_temp_dir("populated-refs");
        init_repo_with_commit(&dir);
        let driver = DistDriver::new(dir.clone());
        let mut log = RunLog::open(&dir, "repo").expect("open log");
        let refs = driver.refs(&mut log).expect("refs").expect("some refs");
        assert!(refs.iter().any(|(name, _)| name == "HEAD"));
        assert!(refs.iter().any(|(name, _)| name.ends_with("refs/heads/main")));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn merge_fast_forward_fails_on_diverged_history() {
        let dir = unique_temp_dir("ff");
        init_repo_with_commit(&dir);
        run_git(&dir, &["checkout", "-q", "-b", "other"]);
        std::fs::write(dir.join("b.txt"), b"b").unwrap();
        run_git(&dir, &["add", "b.txt"]);
        run_git(&dir, &["commit", "-q", "-m", "other commit"]);
        run_git(&dir, &["checkout", "-q", "main"]);
        std::fs::write(dir.join("c.txt"), b"c").unwrap();
        run_git(&dir, &["add", "c.txt"]);
        run_git(&dir, &["commit", "-q", "-m", "main commit"]);
        let driver = DistDriver::new(dir.clone());
        let mut log = RunLog::open(&dir, "repo").expect("open log");
        assert!(driver.merge_fast_forward(&mut log, "other").is_err());
        std::fs::remove_dir_all(&dir).ok();
    }
}
