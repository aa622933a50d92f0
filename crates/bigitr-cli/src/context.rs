//! Resolves a CLI sub-command's repository selectors against config and
//! builds the drivers/requests each `do(repo, dist, requestedBranch)`
//! dispatch needs. Grounded on `bigitr/__init__.py`'s `_Runner.getBranchMaps`
//! (selector resolution) and `build_one_job` in `bigitrd`'s `jobs.rs` (the
//! same per-repository driver/request construction, without the daemon's
//! multi-context/admin-mail layering).

use std::collections::HashMap;
use std::path::PathBuf;

use bigitr_core::config::{AppConfig, OnError, RepoConfig};
use bigitr_core::error::ConfigError;
use bigitr_sync::exporter::ExportRequest;
use bigitr_sync::importer::ImportRequest;
use bigitr_vcs::{CentralDriver, DistDriver};

/// One `<nameOrSection>[::<branch>]` selector, resolved to a section name.
pub struct Selector {
    pub section: String,
    pub requested_branch: Option<String>,
}

/// Splits `raw` into selectors; an empty list resolves to every configured
/// repository with no branch restriction.
pub fn parse_selectors(raw: &[String], repo_config: &RepoConfig) -> Result<Vec<Selector>, ConfigError> {
    if raw.is_empty() {
        return Ok(repo_config
            .repositories()
            .into_iter()
            .map(|section| Selector { section, requested_branch: None })
            .collect());
    }
    raw.iter()
        .map(|entry| {
            let (name, branch) = match entry.split_once("::") {
                Some((n, b)) => (n, Some(b.to_string())),
                None => (entry.as_str(), None),
            };
            let section = repo_config.resolve_section(name)?;
            Ok(Selector { section, requested_branch: branch })
        })
        .collect()
}

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

impl ImportJob {
    pub fn request<'a>(&'a self, import_post_hooks: &'a HashMap<String, Vec<String>>) -> ImportRequest<'a> {
        ImportRequest {
            module: &self.module,
            central_branch: &self.central_branch,
            dist_branch: &self.dist_branch,
            dist_url: &self.dist_url,
            skeleton: self.skeleton.as_deref(),
            merge_map: &self.merge_map,
            import_post_hooks,
            pre_hooks: &self.pre_hooks,
            post_hooks: &self.post_hooks,
        }
    }
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
    pub central: CentralDriver,
}

impl ExportJob {
    pub fn request<'a>(&'a self, repository: &'a str) -> ExportRequest<'a> {
        ExportRequest {
            repository,
            module: &self.module,
            git_branch: &self.git_branch,
            central_branch: &self.central_branch,
            export_branch: &self.export_branch,
            prefix: self.prefix.as_deref(),
            cvsvars: &self.cvsvars,
            dist_pre_hooks: &self.dist_pre_hooks,
            dist_post_hooks: &self.dist_post_hooks,
            central_pre_hooks: &self.central_pre_hooks,
            central_post_hooks: &self.central_post_hooks,
        }
    }
}

pub struct RepositoryContext {
    pub name: String,
    pub dist: DistDriver,
    pub central_import: CentralDriver,
    pub imports: Vec<ImportJob>,
    pub exports: Vec<ExportJob>,
    pub merge_map: HashMap<String, Vec<String>>,
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

pub fn build_context(app_config: &AppConfig, repo_config: &RepoConfig, section: &str) -> Result<RepositoryContext, ConfigError> {
    let name = std::path::Path::new(section)
        .file_name()
        .and_then(|f| f.to_str())
        .unwrap_or(section)
        .to_string();

    let gitdir = app_config.gitdir().unwrap_or_else(|| PathBuf::from("/var/lib/bigitr/git"));
    let logdir = app_config.logdir().unwrap_or_else(|| PathBuf::from("/var/log/bigitr"));
    let cvsdir = app_config.cvsdir().unwrap_or_else(|| PathBuf::from("/var/lib/bigitr/cvs"));

    let cvsroot = repo_config.require(section, "cvsroot")?;
    let cvspath = repo_config.require(section, "cvspath")?;
    let gitroot = repo_config.require(section, "gitroot")?;
    let dist_url = format!("{gitroot}:{section}");
    let skeleton = repo_config.get(section, "skeleton").map(PathBuf::from);
    let merge_map: HashMap<String, Vec<String>> = repo_config.merge_map(section).into_iter().collect();
    let cvsvars = repo_config.cvsvars(section);

    let mut import_post_hooks: HashMap<String, Vec<String>> = HashMap::new();
    for target in merge_map.values().flatten() {
        import_post_hooks
            .entry(target.clone())
            .or_insert_with(|| repo_config.hooks(section, "posthook", "git", "imp", target));
    }

    let dist = DistDriver::new(gitdir.join(&name));
    let central_import = CentralDriver::new(cvsroot.clone(), cvsdir.join(&name).join("import").join(&cvspath));

    let imports = repo_config
        .import_map(section)
        .into_iter()
        .map(|(central_branch, dist_branch)| ImportJob {
            module: cvspath.clone(),
            pre_hooks: repo_config.hooks(section, "prehook", "git", "imp", &dist_branch),
            post_hooks: repo_config.hooks(section, "posthook", "git", "imp", &dist_branch),
            dist_url: dist_url.clone(),
            skeleton: skeleton.clone(),
            merge_map: merge_map.clone(),
            central_branch,
            dist_branch,
        })
        .collect();

    let exports = repo_config
        .export_map(section)
        .into_iter()
        .map(|(git_branch, central_branch)| {
            let export_branch = format!("export-{git_branch}");
            let central = CentralDriver::new(
                cvsroot.clone(),
                cvsdir.join(&name).join("export").join(&central_branch).join(&cvspath),
            );
            ExportJob {
                module: cvspath.clone(),
                prefix: repo_config.prefix(section, &git_branch),
                cvsvars: cvsvars.clone(),
                dist_pre_hooks: repo_config.hooks(section, "prehook", "git", "exp", &git_branch),
                dist_post_hooks: repo_config.hooks(section, "posthook", "git", "exp", &git_branch),
                central_pre_hooks: repo_config.hooks(section, "prehook", "cvs", "exp", &central_branch),
                central_post_hooks: repo_config.hooks(section, "posthook", "cvs", "exp", &central_branch),
                git_branch,
                central_branch,
                export_branch,
                central,
            }
        })
        .collect();

    Ok(RepositoryContext {
        name,
        dist,
        central_import,
        imports,
        exports,
        merge_map,
        import_post_hooks,
        pre_import: app_config.preimport(),
        log_dir: logdir,
        compress_logs: app_config.compress_logs(),
        mailer_recipients: repo_config.email(section),
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
        let dir = std::env::temp_dir().join(format!("bigitr-cli-context-test-{name}-{nanos}"));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_repo_config(dir: &PathBuf) -> RepoConfig {
        let path = dir.join("repo.ini");
        fs::write(
            &path,
            "[GLOBAL]\ngitroot = git@example.com\n\n[org/myrepo]\ncvsroot = /cvsroot\ncvspath = mod\ncvs.b1 = b1\ngit.b1 = b1\nmerge.cvs-b1 = b1\nemail = team@example.com\n",
        )
        .unwrap();
        RepoConfig::load(&path).expect("load repo config")
    }

    #[test]
    fn parse_selectors_defaults_to_all_repositories_with_no_branch() {
        let dir = unique_dir("selectors-all");
        let repo_config = write_repo_config(&dir);
        let selectors = parse_selectors(&[], &repo_config).expect("parse");
        assert_eq!(selectors.len(), 1);
        assert_eq!(selectors[0].section, "org/myrepo");
        assert!(selectors[0].requested_branch.is_none());
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn parse_selectors_splits_branch_suffix_and_resolves_basename() {
        let dir = unique_dir("selectors-branch");
        let repo_config = write_repo_config(&dir);
        let selectors = parse_selectors(&["myrepo::b1".to_string()], &repo_config).expect("parse");
        assert_eq!(selectors.len(), 1);
        assert_eq!(selectors[0].section, "org/myrepo");
        assert_eq!(selectors[0].requested_branch.as_deref(), Some("b1"));
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn parse_selectors_rejects_unknown_repository() {
        let dir = unique_dir("selectors-unknown");
        let repo_config = write_repo_config(&dir);
        let err = parse_selectors(&["nope".to_string()], &repo_config).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownRepository { .. }));
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn build_context_reads_import_and_export_maps() {
        let dir = unique_dir("build-context");
        let app_path = dir.join("app.ini");
        fs::write(
            &app_path,
            format!("[global]\ngitdir = {0}/git\nlogdir = {0}/log\ncvsdir = {0}/cvs\n", dir.display()),
        )
        .unwrap();
        let app_config = AppConfig::load(&app_path).expect("load app config");
        let repo_config = write_repo_config(&dir);

        let ctx = build_context(&app_config, &repo_config, "org/myrepo").expect("build context");
        assert_eq!(ctx.name, "myrepo");
        assert_eq!(ctx.imports.len(), 1);
        assert_eq!(ctx.exports.len(), 1);
        assert_eq!(ctx.exports[0].export_branch, "export-b1");
        assert_eq!(ctx.mailer_recipients, vec!["team@example.com".to_string()]);
        assert!(ctx.compress_logs, "compresslogs defaults to true when unset");
        fs::remove_dir_all(&dir).ok();
    }
}
