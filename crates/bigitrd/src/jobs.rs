//! Builds one `RepositoryJob` per repository section across every
//! application context's repo-config globs (§4.12's "construction loads a
//! daemon config and, for each configured application context x
//! repository-config glob pair, constructs a Synchronizer bound to each
//! repository listed there"). Grounded on
//! `examples/original_source/bigitr/bigitrdaemon.py`'s `createSynchronizers`
//! and `examples/original_source/gitcvs/repositorymap.py`'s branch-map
//! accessors.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use bigitr_core::config::{AppConfig, DaemonConfig, OnError, RepoConfig};
use bigitr_core::error::ConfigError;
use bigitr_vcs::{CentralDriver, DistDriver};

pub struct ImportJob {
    pub module: String,
    pub central_branch: String,
    pub dist_branch: String,
    pub dist_url: String,
    pub skeleton: Option<PathBuf>,
    pub merge_map: HashMap<String, Vec<String>>,
    pub pre_hooks: Vec<String>,
    pub post_hooks: Vec<String>,
}

pub struct ExportJob {
    pub module: String,
    pub git_branch: String,
    pub central_branch: String,
    pub export_branch: String,
    pub prefix: Option<String>,
    pub cvsvars: Vec<(String, String)>,
    pub dist_pre_hooks: Vec<String>,
    pub dist_post_hooks: Vec<String>,
    pub central_pre_hooks: Vec<String>,
    pub central_post_hooks: Vec<String>,
    /// Each export branch gets its own CentralDriver checkout directory
    /// (§4.7: "one instance per repository, centralBranch"); exports don't
    /// share a checkout the way repeated imports into one snapshot dir do.
    pub central: CentralDriver,
}

pub struct RepositoryJob {
    pub name: String,
    pub dist: DistDriver,
    pub central_import: CentralDriver,
    pub imports: Vec<ImportJob>,
    pub exports: Vec<ExportJob>,
    /// `posthook.git.imp.<branch>` for every branch the merge cascade can
    /// push to, keyed by branch (§4.10's `runImpPostHooks(T)`).
    pub import_post_hooks: HashMap<String, Vec<String>>,
    pub pre_import: bool,
    pub log_dir: PathBuf,
    pub compress_logs: bool,
    pub mailer_recipients: Vec<String>,
    pub mailfrom: Option<String>,
    pub smarthost: String,
    pub on_error: OnError,
}

/// Loads the daemon config plus every application context's app config and
/// repo-config globs, and flattens them into one job per repository.
/// Admin-wide email is appended to each repository's recipient list when
/// `mailall` is set, mirroring `DaemonConfig.getMailAll`.
pub fn build_repository_jobs(daemon_config: &DaemonConfig) -> Result<Vec<RepositoryJob>, ConfigError> {
    let mut jobs = Vec::new();
    let admin_email = daemon_config.email();
    let mailall = daemon_config.mailall();

    for context in daemon_config.application_contexts() {
        let Some(app_config_path) = daemon_config.app_config(&context) else {
            continue;
        };
        let app_config = AppConfig::load(&app_config_path)?;

        for repo_config_path in daemon_config.repo_configs(&context) {
            let repo_config = RepoConfig::load(&repo_config_path)?;
            for repository in repo_config.repositories() {
                let job = build_one_job(&app_config, &repo_config, &repository, mailall, &admin_email)?;
                jobs.push(job);
            }
        }
    }
    Ok(jobs)
}

fn build_one_job(
    app_config: &AppConfig,
    repo_config: &RepoConfig,
    repository: &str,
    mailall: bool,
    admin_email: &[String],
) -> Result<RepositoryJob, ConfigError> {
    let name = Path::new(repository)
        .file_name()
        .and_then(|f| f.to_str())
        .unwrap_or(repository)
        .to_string();

    let gitdir = app_config.gitdir().unwrap_or_else(|| PathBuf::from("/var/lib/bigitr/git"));
    let logdir = app_config.logdir().unwrap_or_else(|| PathBuf::from("/var/log/bigitr"));
    let cvsdir = app_config.cvsdir().unwrap_or_else(|| PathBuf::from("/var/lib/bigitr/cvs"));

    let cvsroot = repo_config.require(repository, "cvsroot")?;
    let cvspath = repo_config.require(repository, "cvspath")?;
    let gitroot = repo_config.require(repository, "gitroot")?;
    let dist_url = format!("{gitroot}:{repository}");
    let skeleton = repo_config.get(repository, "skeleton").map(PathBuf::from);
    let merge_map: HashMap<String, Vec<String>> = repo_config.merge_map(repository).into_iter().collect();
    let cvsvars = repo_config.cvsvars(repository);

    let mut import_post_hooks: HashMap<String, Vec<String>> = HashMap::new();
    for target in merge_map.values().flatten() {
        import_post_hooks
            .entry(target.clone())
            .or_insert_with(|| repo_config.hooks(repository, "posthook", "git", "imp", target));
    }

    let mut email = repo_config.email(repository);
    if mailall {
        email.extend(admin_email.iter().cloned());
    }

    let dist = DistDriver::new(gitdir.join(&name));
    let central_import = CentralDriver::new(cvsroot.clone(), cvsdir.join(&name).join("import").join(&cvspath));

    let imports = repo_config
        .import_map(repository)
        .into_iter()
        .map(|(central_branch, dist_branch)| ImportJob {
            module: cvspath.clone(),
            pre_hooks: repo_config.hooks(repository, "prehook", "git", "imp", &dist_branch),
            post_hooks: repo_config.hooks(repository, "posthook", "git", "imp", &dist_branch),
            dist_url: dist_url.clone(),
            skeleton: skeleton.clone(),
            merge_map: merge_map.clone(),
            central_branch,
            dist_branch,
        })
        .collect();

    let exports = repo_config
        .export_map(repository)
        .into_iter()
        .map(|(git_branch, central_branch)| {
            let export_branch = format!("export-{git_branch}");
            let central = CentralDriver::new(
                cvsroot.clone(),
                cvsdir.join(&name).join("export").join(&central_branch).join(&cvspath),
            );
            let dist_pre_hooks = repo_config.hooks(repository, "prehook", "git", "exp", &git_branch);
            let dist_post_hooks = repo_config.hooks(repository, "posthook", "git", "exp", &git_branch);
            let central_pre_hooks = repo_config.hooks(repository, "prehook", "cvs", "exp", &central_branch);
            let central_post_hooks = repo_config.hooks(repository, "posthook", "cvs", "exp", &central_branch);
            ExportJob {
                module: cvspath.clone(),
                prefix: repo_config.prefix(repository, &git_branch),
                cvsvars: cvsvars.clone(),
                dist_pre_hooks,
                dist_post_hooks,
                central_pre_hooks,
                central_post_hooks,
                git_branch,
                central_branch,
                export_branch,
                central,
            }
        })
        .collect();

    Ok(RepositoryJob {
        name,
        dist,
        central_import,
        imports,
        exports,
        import_post_hooks,
        pre_import: app_config.preimport(),
        log_dir: logdir,
        compress_logs: app_config.compress_logs(),
        mailer_recipients: email,
        mailfrom: app_config.mailfrom(),
        smarthost: app_config.smarthost().unwrap_or_else(|| "localhost".to_string()),
        on_error: app_config.on_error(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn unique_dir(name: &str) -> PathBuf {
        let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
        let dir = std::env::temp_dir().join(format!("bigitrd-jobs-test-{name}-{nanos}"));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn build_repository_jobs_flattens_contexts_and_globs() {
        let dir = unique_dir("flatten");

        let app_path = dir.join("app.ini");
        fs::write(
            &app_path,
            format!(
                "[global]\ngitdir = {0}/git\nlogdir = {0}/log\ncvsdir = {0}/cvs\n",
                dir.display()
            ),
        )
        .unwrap();

        let repo_path = dir.join("repo.ini");
        fs::write(
            &repo_path,
            "[GLOBAL]\ngitroot = git@example.com\n\n[org/myrepo]\ncvsroot = /cvsroot\ncvspath = mod\ncvs.b1 = b1\ngit.b1 = b1\nmerge.cvs-b1 = b1\n",
        )
        .unwrap();

        let daemon_path = dir.join("daemon.ini");
        fs::write(
            &daemon_path,
            format!(
                "[GLOBAL]\nemail = admin@example.com\nmailall = true\n\n[ctx1]\nappconfig = {}\nrepoconfig = {}\n",
                app_path.display(),
                repo_path.display()
            ),
        )
        .unwrap();

        let daemon_config = DaemonConfig::load(&daemon_path).expect("load daemon config");
        let jobs = build_repository_jobs(&daemon_config).expect("build jobs");
        assert_eq!(jobs.len(), 1);
        let job = &jobs[0];
        assert_eq!(job.name, "myrepo");
        assert_eq!(job.imports.len(), 1);
        assert_eq!(job.exports.len(), 1);
        assert!(job.mailer_recipients.contains(&"admin@example.com".to_string()));
        assert_eq!(job.exports[0].export_branch, "export-b1");
        assert!(job.compress_logs, "compresslogs defaults to true when unset");

        fs::remove_dir_all(&dir).ok();
    }
}
