//! Filesystem helpers shared by CentralDriver/DistDriver/Importer/Exporter,
//! and the scoped working-directory guard named in §9's design notes.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

/// All file paths under `root`, relative to `root`, using `/` separators.
pub fn list_files(root: &Path) -> std::io::Result<BTreeSet<String>> {
    let mut out = BTreeSet::new();
    walk(root, root, &mut out)?;
    Ok(out)
}

fn walk(root: &Path, dir: &Path, out: &mut BTreeSet<String>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            walk(root, &path, out)?;
        } else if file_type.is_file() {
            if let Ok(rel) = path.strip_prefix(root) {
                out.insert(rel.to_string_lossy().replace('\\', "/"));
            }
        }
    }
    Ok(())
}

/// Copies `fileNames` (paths relative to `source_dir`) into `target_dir`,
/// creating parent directories as needed and preserving the source mode.
pub fn copy_files(source_dir: &Path, target_dir: &Path, file_names: &[String]) -> std::io::Result<()> {
    for name in file_names {
        let source_file = source_dir.join(name);
        let target_file = target_dir.join(name);
        if let Some(parent) = target_file.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&source_file, &target_file)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&source_file)?.permissions().mode();
            fs::set_permissions(&target_file, fs::Permissions::from_mode(mode))?;
        }
    }
    Ok(())
}

/// Recursively copies the entire contents of `source` into `target`.
pub fn copy_tree(source: &Path, target: &Path) -> std::io::Result<()> {
    let files = list_files(source)?;
    let names: Vec<String> = files.into_iter().collect();
    copy_files(source, target, &names)
}

/// Removes `dir` and everything beneath it. A thin wrapper over
/// `remove_dir_all` kept as a named operation because CentralDriver and
/// DistDriver failure paths both call it explicitly (see §5's
/// "failure semantics for shared resources").
pub fn remove_recursive(dir: &Path) -> std::io::Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir)?;
    }
    Ok(())
}

/// Deletes every tracked file under `root` (used before wholesale tree
/// replacement during import) without removing the directory itself.
pub fn delete_all_files(root: &Path) -> std::io::Result<()> {
    for name in list_files(root)? {
        fs::remove_file(root.join(name))?;
    }
    Ok(())
}

/// Expands `~` and `$VAR`/`${VAR}` then makes the result absolute.
pub fn expand_path(raw: &str) -> PathBuf {
    let home_expanded = if let Some(rest) = raw.strip_prefix("~/") {
        std::env::var("HOME")
            .map(|home| format!("{home}/{rest}"))
            .unwrap_or_else(|_| raw.to_string())
    } else {
        raw.to_string()
    };
    let env_expanded = expand_env_vars(&home_expanded);
    let path = PathBuf::from(env_expanded);
    if path.is_absolute() {
        path
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path.clone()))
            .unwrap_or(path)
    }
}

fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let chars: Vec<char> = value.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '$' {
            if chars.get(i + 1) == Some(&'{') {
                if let Some(end) = chars[i + 2..].iter().position(|c| *c == '}') {
                    let name: String = chars[i + 2..i + 2 + end].iter().collect();
                    if let Ok(v) = std::env::var(&name) {
                        out.push_str(&v);
                    }
                    i += 2 + end + 1;
                    continue;
                }
            } else if chars.get(i + 1).map(|c| c.is_alphabetic() || *c == '_').unwrap_or(false) {
                let mut j = i + 1;
                while j < chars.len() && (chars[j].is_alphanumeric() || chars[j] == '_') {
                    j += 1;
                }
                let name: String = chars[i + 1..j].iter().collect();
                if let Ok(v) = std::env::var(&name) {
                    out.push_str(&v);
                }
                i = j;
                continue;
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

/// Restores the previous working directory on every exit path (panic
/// unwinding included), per §9's "scoped acquisition primitives" design
/// note.
pub struct ChdirScope {
    previous: PathBuf,
}

impl ChdirScope {
    pub fn enter(target: &Path) -> std::io::Result<Self> {
        let previous = std::env::current_dir()?;
        std::env::set_current_dir(target)?;
        Ok(ChdirScope { previous })
    }
}

impl Drop for ChdirScope {
    fn drop(&mut self) {
        let _ = std::env::set_current_dir(&self.previous);
    }
}

/// Best-effort liveness check for the PID recorded in a PidLock file.
/// Shells out to `kill -0`, which sends no signal but still validates that
/// the process exists and is killable by this user.
pub fn process_is_alive(pid: u32) -> bool {
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn unique_temp_dir(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("bigitr-util-test-{name}-{nanos}"));
        fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    #[test]
    fn list_files_returns_relative_paths() {
        let dir = unique_temp_dir("list");
        fs::create_dir_all(dir.join("sub")).unwrap();
        fs::write(dir.join("a.txt"), b"a").unwrap();
        fs::write(dir.join("sub/b.txt"), b"b").unwrap();
        let files = list_files(&dir).expect("list");
        assert_eq!(files, BTreeSet::from(["a.txt".to_string(), "sub/b.txt".to_string()]));
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn copy_files_preserves_relative_structure() {
        let src = unique_temp_dir("copy-src");
        let dst = unique_temp_dir("copy-dst");
        fs::create_dir_all(src.join("sub")).unwrap();
        fs::write(src.join("sub/file.txt"), b"payload").unwrap();
        copy_files(&src, &dst, &["sub/file.txt".to_string()]).expect("copy");
        assert_eq!(fs::read(dst.join("sub/file.txt")).unwrap(), b"payload");
        fs::remove_dir_all(&src).ok();
        fs::remove_dir_all(&dst).ok();
    }

    #[test]
    fn delete_all_files_leaves_directory_but_removes_contents() {
        let dir = unique_temp_dir("delete-all");
        fs::write(dir.join("a.txt"), b"a").unwrap();
        delete_all_files(&dir).expect("delete all");
        assert!(dir.exists());
        assert!(list_files(&dir).unwrap().is_empty());
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn chdir_scope_restores_previous_directory_on_drop() {
        let dir = unique_temp_dir("chdir");
        let before = std::env::current_dir().unwrap();
        {
            let _scope = ChdirScope::enter(&dir).expect("enter");
            assert_eq!(std::env::current_dir().unwrap().canonicalize().unwrap(), dir.canonicalize().unwrap());
        }
        assert_eq!(std::env::current_dir().unwrap(), before);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn expand_path_resolves_env_var() {
        std::env::set_var("BIGITR_UTIL_TEST", "/tmp/resolved");
        let expanded = expand_path("$BIGITR_UTIL_TEST/sub");
        assert_eq!(expanded, PathBuf::from("/tmp/resolved/sub"));
    }

    #[test]
    fn process_is_alive_true_for_self() {
        assert!(process_is_alive(std::process::id()));
    }

    #[test]
    fn process_is_alive_false_for_unlikely_pid() {
        assert!(!process_is_alive(u32::MAX - 1));
    }
}
