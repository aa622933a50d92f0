//! Layered INI configuration: GLOBAL fallback, `${ENV}` interpolation,
//! absolute-path validation on `*dir` keys.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

pub const GLOBAL_SECTION: &str = "GLOBAL";

/// One parsed INI document: ordered sections, each an ordered map of key to
/// raw (pre-interpolation) value. Order of sections as encountered in the
/// file is preserved so repository enumeration is deterministic even before
/// the caller applies its own sort.
#[derive(Debug, Clone, Default)]
pub struct Ini {
    section_order: Vec<String>,
    sections: BTreeMap<String, BTreeMap<String, String>>,
}

impl Ini {
    pub fn parse(path: &Path, contents: &str) -> Result<Self, ConfigError> {
        let mut ini = Ini::default();
        let mut current = GLOBAL_SECTION.to_string();
        ini.ensure_section(&current);

        for (idx, raw_line) in contents.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if line.starts_with('[') {
                let Some(end) = line.find(']') else {
                    return Err(ConfigError::Parse {
                        path: path.to_path_buf(),
                        line: idx + 1,
                        text: raw_line.to_string(),
                    });
                };
                current = line[1..end].trim().to_string();
                ini.ensure_section(&current);
                continue;
            }
            let (key, value) = split_key_value(line).ok_or_else(|| ConfigError::Parse {
                path: path.to_path_buf(),
                line: idx + 1,
                text: raw_line.to_string(),
            })?;
            ini.sections
                .get_mut(&current)
                .expect("section inserted above")
                .insert(key.to_string(), interpolate_env(value.trim()));
        }
        Ok(ini)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let body = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_ref.to_path_buf(),
            source,
        })?;
        Self::parse(path_ref, &body)
    }

    fn ensure_section(&mut self, name: &str) {
        if !self.sections.contains_key(name) {
            self.sections.insert(name.to_string(), BTreeMap::new());
            self.section_order.push(name.to_string());
        }
    }

    /// Section names as they appeared in the file, excluding GLOBAL.
    pub fn sections(&self) -> impl Iterator<Item = &str> {
        self.section_order
            .iter()
            .map(String::as_str)
            .filter(|s| *s != GLOBAL_SECTION)
    }

    pub fn has_section(&self, name: &str) -> bool {
        self.sections.contains_key(name)
    }

    /// Raw lookup: section, falling back to GLOBAL, else None.
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)
            .and_then(|m| m.get(key))
            .or_else(|| self.sections.get(GLOBAL_SECTION).and_then(|m| m.get(key)))
            .map(String::as_str)
    }

    /// Keys in `section` (falling back to GLOBAL only for an absent section)
    /// whose name starts with `prefix`, sorted ascending, with the prefix
    /// stripped. Matches the reference implementation's requirement that
    /// `cvs.*`/`git.*`/`merge.*` enumeration be deterministic.
    pub fn keys_with_prefix(&self, section: &str, prefix: &str) -> Vec<(String, String)> {
        let mut out = BTreeMap::new();
        if let Some(global) = self.sections.get(GLOBAL_SECTION) {
            collect_prefixed(global, prefix, &mut out);
        }
        if let Some(local) = self.sections.get(section) {
            collect_prefixed(local, prefix, &mut out);
        }
        out.into_iter().collect()
    }
}

fn collect_prefixed(map: &BTreeMap<String, String>, prefix: &str, out: &mut BTreeMap<String, String>) {
    for (k, v) in map {
        if let Some(rest) = k.strip_prefix(prefix) {
            out.insert(rest.to_string(), v.clone());
        }
    }
}

fn split_key_value(line: &str) -> Option<(&str, &str)> {
    let sep = line.find(['=', ':'])?;
    Some((line[..sep].trim(), &line[sep + 1..]))
}

/// Literal `${VAR}` substitution against the process environment. Unresolved
/// variables are left verbatim rather than failing the whole file, matching
/// the tolerant `safe_substitute` semantics of the reference implementation.
fn interpolate_env(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let bytes = value.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' && bytes.get(i + 1) == Some(&b'{') {
            if let Some(end) = value[i + 2..].find('}') {
                let name = &value[i + 2..i + 2 + end];
                match std::env::var(name) {
                    Ok(resolved) => out.push_str(&resolved),
                    Err(_) => out.push_str(&value[i..i + 2 + end + 1]),
                }
                i += 2 + end + 1;
                continue;
            }
        }
        let ch = value[i..].chars().next().unwrap();
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

/// Repository config: `GLOBAL` section plus one per repository, per §4.5.
pub struct RepoConfig {
    ini: Ini,
    path: PathBuf,
}

/// Keys whose resolved value must be an absolute path, beyond the generic
/// `*dir`-suffix rule.
const ABSOLUTE_KEYS: &[&str] = &["skeleton"];

impl RepoConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref().to_path_buf();
        let ini = Ini::load(&path_ref)?;
        let config = RepoConfig { ini, path: path_ref };
        config.validate_absolute_paths()?;
        Ok(config)
    }

    fn validate_absolute_paths(&self) -> Result<(), ConfigError> {
        for section in std::iter::once(GLOBAL_SECTION.to_string())
            .chain(self.ini.sections().map(str::to_string))
        {
            let Some(map) = self.ini.sections.get(&section) else {
                continue;
            };
            for (key, value) in map {
                let must_be_absolute =
                    key.ends_with("dir") || ABSOLUTE_KEYS.contains(&key.as_str());
                if must_be_absolute && !value.is_empty() && !Path::new(value).is_absolute() {
                    return Err(ConfigError::NotAbsolute {
                        section: section.clone(),
                        key: key.clone(),
                        value: value.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Repositories accept either the full section name or its basename.
    pub fn resolve_section(&self, name_or_section: &str) -> Result<String, ConfigError> {
        if self.ini.has_section(name_or_section) {
            return Ok(name_or_section.to_string());
        }
        for section in self.ini.sections() {
            if Path::new(section)
                .file_name()
                .and_then(|f| f.to_str())
                .map(|base| base == name_or_section)
                .unwrap_or(false)
            {
                return Ok(section.to_string());
            }
        }
        Err(ConfigError::UnknownRepository {
            name: name_or_section.to_string(),
        })
    }

    pub fn repositories(&self) -> Vec<String> {
        self.ini.sections().map(str::to_string).collect()
    }

    pub fn get(&self, repo: &str, key: &str) -> Option<String> {
        self.ini.get(repo, key).map(str::to_string)
    }

    pub fn require(&self, repo: &str, key: &str) -> Result<String, ConfigError> {
        self.get(repo, key).ok_or_else(|| ConfigError::MissingKey {
            path: self.path.clone(),
            section: repo.to_string(),
            key: key.to_string(),
        })
    }

    /// `cvs.<branch>` entries: centralBranch -> distBranch (`cvs-<value>`).
    pub fn import_map(&self, repo: &str) -> Vec<(String, String)> {
        self.ini
            .keys_with_prefix(repo, "cvs.")
            .into_iter()
            .map(|(branch, value)| (branch, format!("cvs-{value}")))
            .collect()
    }

    /// `git.<branch>` entries: distBranch -> centralBranch.
    pub fn export_map(&self, repo: &str) -> Vec<(String, String)> {
        self.ini.keys_with_prefix(repo, "git.")
    }

    /// `merge.<branch>` entries: sourceBranch -> whitespace-separated targets.
    pub fn merge_map(&self, repo: &str) -> Vec<(String, Vec<String>)> {
        self.ini
            .keys_with_prefix(repo, "merge.")
            .into_iter()
            .map(|(src, targets)| {
                (
                    src,
                    targets
                        .split_whitespace()
                        .map(str::to_string)
                        .collect::<Vec<_>>(),
                )
            })
            .collect()
    }

    pub fn cvsvars(&self, repo: &str) -> Vec<(String, String)> {
        self.ini.keys_with_prefix(repo, "cvsvar.")
    }

    pub fn prefix(&self, repo: &str, branch: &str) -> Option<String> {
        self.ini.get(repo, &format!("prefix.{branch}")).map(str::to_string)
    }

    pub fn email(&self, repo: &str) -> Vec<String> {
        self.ini
            .get(repo, "email")
            .map(|v| v.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Hooks matching `{prehook,posthook}.{cvs,git}[.{imp,exp}][.<branch>]`,
    /// run generic -> direction-qualified -> branch-qualified -> both, per §4.5.
    pub fn hooks(&self, repo: &str, stage: &str, tool: &str, direction: &str, branch: &str) -> Vec<String> {
        let candidates = [
            format!("{stage}.{tool}"),
            format!("{stage}.{tool}.{direction}"),
            format!("{stage}.{tool}.{branch}"),
            format!("{stage}.{tool}.{direction}.{branch}"),
        ];
        candidates
            .iter()
            .filter_map(|key| self.ini.get(repo, key))
            .map(str::to_string)
            .collect()
    }
}

/// Application config: `global`/`import`/`export` sections per §6.
pub struct AppConfig {
    ini: Ini,
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let ini = Ini::load(path)?;
        Ok(AppConfig { ini })
    }

    pub fn gitdir(&self) -> Option<PathBuf> {
        self.ini.get("global", "gitdir").map(PathBuf::from)
    }

    pub fn logdir(&self) -> Option<PathBuf> {
        self.ini.get("global", "logdir").map(PathBuf::from)
    }

    pub fn cvsdir(&self) -> Option<PathBuf> {
        self.ini.get("global", "cvsdir").map(PathBuf::from)
    }

    pub fn mailfrom(&self) -> Option<String> {
        self.ini.get("global", "mailfrom").map(str::to_string)
    }

    pub fn smarthost(&self) -> Option<String> {
        self.ini.get("global", "smarthost").map(str::to_string)
    }

    pub fn compress_logs(&self) -> bool {
        self.ini
            .get("global", "compresslogs")
            .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
            .unwrap_or(true)
    }

    pub fn preimport(&self) -> bool {
        self.ini
            .get("import", "preimport")
            .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
            .unwrap_or(true)
    }

    pub fn on_error(&self) -> OnError {
        match self.ini.get("global", "onerror") {
            Some("warn") => OnError::Warn,
            Some("continue") => OnError::Continue,
            _ => OnError::Abort,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnError {
    Abort,
    Warn,
    Continue,
}

/// Daemon config: `GLOBAL` plus one section per application context, each
/// naming an app config file and the repo config globs it should process
/// (§6). Mirrors `bigitr/daemonconfig.py`'s `DaemonConfig`.
pub struct DaemonConfig {
    ini: Ini,
}

impl DaemonConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let ini = Ini::load(path)?;
        Ok(DaemonConfig { ini })
    }

    pub fn application_contexts(&self) -> Vec<String> {
        self.ini.sections().map(str::to_string).collect()
    }

    pub fn app_config(&self, context: &str) -> Option<PathBuf> {
        self.ini.get(context, "appconfig").map(PathBuf::from)
    }

    /// Expands each whitespace-separated glob in `repoconfig` for `context`
    /// against the filesystem, in the order the globs appear.
    pub fn repo_configs(&self, context: &str) -> Vec<PathBuf> {
        let Some(patterns) = self.ini.get(context, "repoconfig") else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for pattern in patterns.split_whitespace() {
            if let Ok(paths) = glob::glob(pattern) {
                out.extend(paths.filter_map(Result::ok));
            }
        }
        out
    }

    pub fn email(&self) -> Vec<String> {
        self.ini
            .get(GLOBAL_SECTION, "email")
            .map(|v| v.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub fn mailfrom(&self) -> Option<String> {
        self.ini.get(GLOBAL_SECTION, "mailfrom").map(str::to_string)
    }

    pub fn mailall(&self) -> bool {
        self.ini
            .get(GLOBAL_SECTION, "mailall")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false)
    }

    pub fn smarthost(&self) -> String {
        self.ini
            .get(GLOBAL_SECTION, "smarthost")
            .unwrap_or("localhost")
            .to_string()
    }

    pub fn poll_frequency(&self) -> Result<u64, ConfigError> {
        let value = self.ini.get(GLOBAL_SECTION, "pollfrequency").unwrap_or("5m");
        parse_time_spec("pollfrequency", value)
    }

    pub fn sync_frequency(&self) -> Result<u64, ConfigError> {
        let value = self.ini.get(GLOBAL_SECTION, "syncfrequency").unwrap_or("1d");
        parse_time_spec("syncfrequency", value)
    }

    pub fn parallel(&self) -> u32 {
        self.ini
            .get(GLOBAL_SECTION, "parallel")
            .and_then(|v| v.parse().ok())
            .unwrap_or(1)
    }
}

/// `[Nd][Nh][Nm][Ns]` time spec used by daemon config, case-insensitive.
/// Fixes a unit bug present in one variant of the reference implementation,
/// where the days multiplier was 86000 instead of 86400.
pub fn parse_time_spec(key: &str, value: &str) -> Result<u64, ConfigError> {
    let lower = value.to_ascii_lowercase();
    let mut rest = lower.as_str();
    let mut total: u64 = 0;
    let mut matched_any = false;

    for (suffix, multiplier) in [("d", 86_400u64), ("h", 3_600), ("m", 60), ("s", 1)] {
        rest = rest.trim_start();
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            continue;
        }
        let after = &rest[digits.len()..];
        if let Some(remainder) = after.strip_prefix(suffix) {
            let amount: u64 = digits.parse().map_err(|_| ConfigError::InvalidTimeSpec {
                key: key.to_string(),
                value: value.to_string(),
            })?;
            total += amount * multiplier;
            matched_any = true;
            rest = remainder;
        }
    }

    // A bare trailing number with no suffix means seconds.
    let trimmed = rest.trim();
    if !trimmed.is_empty() {
        if let Ok(amount) = trimmed.parse::<u64>() {
            total += amount;
            matched_any = true;
        } else if !matched_any {
            return Err(ConfigError::InvalidTimeSpec {
                key: key.to_string(),
                value: value.to_string(),
            });
        }
    }

    if !matched_any {
        return Err(ConfigError::InvalidTimeSpec {
            key: key.to_string(),
            value: value.to_string(),
        });
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn unique_temp_path(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock")
            .as_nanos();
        std::env::temp_dir().join(format!("bigitr-config-test-{name}-{nanos}"))
    }

    fn write_temp(name: &str, contents: &str) -> PathBuf {
        let path = unique_temp_path(name);
        fs::write(&path, contents).expect("write temp config");
        path
    }

    #[test]
    fn global_fallback_applies_when_repo_key_absent() {
        let path = write_temp(
            "global-fallback",
            "[GLOBAL]\ngitroot = git@example.com\n\n[myrepo]\ncvspath = mod\n",
        );
        let cfg = RepoConfig::load(&path).expect("load");
        assert_eq!(cfg.get("myrepo", "gitroot").as_deref(), Some("git@example.com"));
        fs::remove_file(&path).ok();
    }

    #[test]
    fn repo_key_overrides_global() {
        let path = write_temp(
            "override",
            "[GLOBAL]\ngitroot = git@global.example.com\n\n[myrepo]\ngitroot = git@repo.example.com\n",
        );
        let cfg = RepoConfig::load(&path).expect("load");
        assert_eq!(
            cfg.get("myrepo", "gitroot").as_deref(),
            Some("git@repo.example.com")
        );
        fs::remove_file(&path).ok();
    }

    #[test]
    fn env_interpolation_substitutes_known_var() {
        std::env::set_var("BIGITR_TEST_VAR", "resolved");
        let path = write_temp("env", "[GLOBAL]\nvalue = ${BIGITR_TEST_VAR}/suffix\n");
        let cfg = RepoConfig::load(&path).expect("load");
        assert_eq!(cfg.get("GLOBAL", "value").as_deref(), Some("resolved/suffix"));
        fs::remove_file(&path).ok();
    }

    #[test]
    fn env_interpolation_leaves_unresolved_var_verbatim() {
        std::env::remove_var("BIGITR_NOT_SET_EVER");
        let path = write_temp("env-missing", "[GLOBAL]\nvalue = ${BIGITR_NOT_SET_EVER}\n");
        let cfg = RepoConfig::load(&path).expect("load");
        assert_eq!(cfg.get("GLOBAL", "value").as_deref(), Some("${BIGITR_NOT_SET_EVER}"));
        fs::remove_file(&path).ok();
    }

    #[test]
    fn absolute_path_validation_rejects_relative_dir() {
        let path = write_temp("abs", "[GLOBAL]\nlogdir = relative/path\n");
        let err = RepoConfig::load(&path).expect_err("must reject");
        assert!(matches!(err, ConfigError::NotAbsolute { .. }));
        fs::remove_file(&path).ok();
    }

    #[test]
    fn import_map_is_sorted_ascending_by_branch() {
        let path = write_temp(
            "import-map",
            "[myrepo]\ncvs.zeta = z\ncvs.alpha = a\n",
        );
        let cfg = RepoConfig::load(&path).expect("load");
        let map = cfg.import_map("myrepo");
        assert_eq!(
            map,
            vec![
                ("alpha".to_string(), "cvs-a".to_string()),
                ("zeta".to_string(), "cvs-z".to_string()),
            ]
        );
        fs::remove_file(&path).ok();
    }

    #[test]
    fn merge_map_splits_whitespace_separated_targets() {
        let path = write_temp("merge-map", "[myrepo]\nmerge.cvs-b1 = b1 b2\n");
        let cfg = RepoConfig::load(&path).expect("load");
        let map = cfg.merge_map("myrepo");
        assert_eq!(
            map,
            vec![("cvs-b1".to_string(), vec!["b1".to_string(), "b2".to_string()])]
        );
        fs::remove_file(&path).ok();
    }

    #[test]
    fn resolve_section_accepts_basename() {
        let path = write_temp("basename", "[org/myrepo]\ncvspath = mod\n");
        let cfg = RepoConfig::load(&path).expect("load");
        assert_eq!(cfg.resolve_section("myrepo").expect("resolve"), "org/myrepo");
        fs::remove_file(&path).ok();
    }

    #[test]
    fn hooks_resolve_in_generic_then_qualified_order() {
        let path = write_temp(
            "hooks",
            "[myrepo]\nprehook.git = echo generic\nprehook.git.imp = echo direction\nprehook.git.b1 = echo branch\nprehook.git.imp.b1 = echo both\n",
        );
        let cfg = RepoConfig::load(&path).expect("load");
        let hooks = cfg.hooks("myrepo", "prehook", "git", "imp", "b1");
        assert_eq!(
            hooks,
            vec![
                "echo generic".to_string(),
                "echo direction".to_string(),
                "echo branch".to_string(),
                "echo both".to_string(),
            ]
        );
        fs::remove_file(&path).ok();
    }

    #[test]
    fn parse_time_spec_combines_units() {
        assert_eq!(parse_time_spec("syncfrequency", "1d2h3m4s").unwrap(), 93_784);
    }

    #[test]
    fn parse_time_spec_days_use_86400_not_86000() {
        assert_eq!(parse_time_spec("syncfrequency", "1d").unwrap(), 86_400);
    }

    #[test]
    fn parse_time_spec_bare_number_is_seconds() {
        assert_eq!(parse_time_spec("pollfrequency", "300").unwrap(), 300);
    }

    #[test]
    fn parse_time_spec_rejects_garbage() {
        assert!(parse_time_spec("pollfrequency", "banana").is_err());
    }

    #[test]
    fn daemon_config_reads_per_context_sections() {
        let path = write_temp(
            "daemon",
            "[GLOBAL]\nemail = admin@example.com\nmailall = true\n\n[ctx1]\nappconfig = /etc/bigitr/app.ini\nrepoconfig = /etc/bigitr/repos/*.ini\n",
        );
        let cfg = DaemonConfig::load(&path).expect("load");
        assert_eq!(cfg.application_contexts(), vec!["ctx1".to_string()]);
        assert_eq!(cfg.app_config("ctx1"), Some(PathBuf::from("/etc/bigitr/app.ini")));
        assert_eq!(cfg.email(), vec!["admin@example.com".to_string()]);
        assert!(cfg.mailall());
        fs::remove_file(&path).ok();
    }

    #[test]
    fn daemon_config_defaults_match_reference_implementation() {
        let path = write_temp("daemon-defaults", "[GLOBAL]\nemail = a@example.com\n\n[ctx1]\nappconfig = /x\nrepoconfig = /y\n");
        let cfg = DaemonConfig::load(&path).expect("load");
        assert_eq!(cfg.poll_frequency().unwrap(), 300);
        assert_eq!(cfg.sync_frequency().unwrap(), 86_400);
        assert_eq!(cfg.smarthost(), "localhost");
        assert!(!cfg.mailall());
        fs::remove_file(&path).ok();
    }
}
