//! Per-repository append-only stdout/stderr streams, with byte-offset
//! marks around each invocation and gzip compression on close.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use flate2::write::GzEncoder;
use flate2::Compression;

#[derive(Debug, Clone, Copy, Default)]
struct Mark {
    stdout: u64,
    stderr: u64,
}

pub struct RunLog {
    repo: String,
    stdout_path: PathBuf,
    stderr_path: PathBuf,
    stdout: File,
    stderr: File,
    start_mark: Option<Mark>,
    stop_mark: Option<Mark>,
}

/// Pair of byte ranges captured around one invocation, one per stream.
#[derive(Debug, Clone, Default)]
pub struct LogSegment {
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

impl RunLog {
    /// Opens `<logDir>/<repo>/<YYYYMMDD-HH:MM:SS>.log` and `.err` for
    /// read+write, creating the per-repository directory if needed.
    pub fn open(log_dir: &Path, repo: &str) -> std::io::Result<Self> {
        let repo_dir = log_dir.join(repo);
        fs::create_dir_all(&repo_dir)?;
        let basename = Local::now().format("%Y%m%d-%H:%M:%S").to_string();
        let stdout_path = repo_dir.join(format!("{basename}.log"));
        let stderr_path = repo_dir.join(format!("{basename}.err"));
        let stdout = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&stdout_path)?;
        let stderr = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&stderr_path)?;
        Ok(RunLog {
            repo: repo.to_string(),
            stdout_path,
            stderr_path,
            stdout,
            stderr,
            start_mark: None,
            stop_mark: None,
        })
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    pub fn stdout_file(&self) -> &File {
        &self.stdout
    }

    pub fn stderr_file(&self) -> &File {
        &self.stderr
    }

    pub(crate) fn write_stdout(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.stdout.write_all(bytes)
    }

    pub(crate) fn write_stderr(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.stderr.write_all(bytes)
    }

    fn current_mark(&mut self) -> std::io::Result<Mark> {
        Ok(Mark {
            stdout: self.stdout.stream_position()?,
            stderr: self.stderr.stream_position()?,
        })
    }

    pub fn mark_start(&mut self) -> std::io::Result<()> {
        self.start_mark = Some(self.current_mark()?);
        self.stop_mark = None;
        Ok(())
    }

    pub fn mark_stop(&mut self) -> std::io::Result<()> {
        self.stop_mark = Some(self.current_mark()?);
        Ok(())
    }

    fn read_range(&self, path: &Path, start: u64, stop: u64) -> std::io::Result<String> {
        let mut file = File::open(path)?;
        file.seek(SeekFrom::Start(start))?;
        let mut buf = vec![0u8; (stop - start) as usize];
        file.read_exact(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// The byte ranges captured between the most recent start and stop.
    pub fn last_output(&self) -> std::io::Result<LogSegment> {
        let (Some(start), Some(stop)) = (self.start_mark, self.stop_mark) else {
            return Ok(LogSegment::default());
        };
        Ok(LogSegment {
            stdout: Some(self.read_range(&self.stdout_path, start.stdout, stop.stdout)?),
            stderr: Some(self.read_range(&self.stderr_path, start.stderr, stop.stderr)?),
        })
    }

    /// The tail of stderr since the last start mark, even if stop was never
    /// reached (used when a command is about to fail).
    pub fn last_error(&mut self) -> std::io::Result<String> {
        let start = self.start_mark.map(|m| m.stderr).unwrap_or(0);
        let end = self.stderr.stream_position()?;
        if end <= start {
            return Ok(String::new());
        }
        self.read_range(&self.stderr_path, start, end)
    }

    /// When `compress` is true, compresses non-empty streams and removes the
    /// uncompressed originals (the `compresslogs` application-config key,
    /// §6); when false, the plain `.log`/`.err` files are left as-is.
    /// Returns whether stderr had content (callers use this to decide
    /// whether to attach an error notice before calling `close`).
    pub fn close(mut self, compress: bool) -> std::io::Result<bool> {
        self.stdout.flush()?;
        self.stderr.flush()?;
        let out_len = self.stdout.metadata()?.len();
        let err_len = self.stderr.metadata()?.len();

        if compress {
            if err_len > 0 {
                compress_and_remove(&self.stderr_path)?;
            }
            if out_len > 0 {
                compress_and_remove(&self.stdout_path)?;
            }
        }
        Ok(err_len > 0)
    }
}

fn compress_and_remove(path: &Path) -> std::io::Result<()> {
    let contents = fs::read(path)?;
    let gz_path = path.with_extension(format!(
        "{}.gz",
        path.extension().and_then(|e| e.to_str()).unwrap_or("")
    ));
    let gz_file = File::create(&gz_path)?;
    let mut encoder = GzEncoder::new(gz_file, Compression::best());
    encoder.write_all(&contents)?;
    encoder.finish()?;
    fs::remove_file(path)?;
    Ok(())
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
        let dir = std::env::temp_dir().join(format!("bigitr-runlog-test-{name}-{nanos}"));
        fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    #[test]
    fn open_creates_log_and_err_files() {
        let dir = unique_temp_dir("open");
        let log = RunLog::open(&dir, "myrepo").expect("open runlog");
        assert!(log.stdout_path.exists());
        assert!(log.stderr_path.exists());
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn mark_start_stop_captures_written_range() {
        let dir = unique_temp_dir("marks");
        let mut log = RunLog::open(&dir, "myrepo").expect("open runlog");
        log.mark_start().expect("mark start");
        log.write_stdout(b"hello\n").expect("write");
        log.write_stderr(b"world\n").expect("write");
        log.mark_stop().expect("mark stop");
        let segment = log.last_output().expect("segment");
        assert_eq!(segment.stdout.as_deref(), Some("hello\n"));
        assert_eq!(segment.stderr.as_deref(), Some("world\n"));
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn last_error_returns_tail_since_start_without_stop() {
        let dir = unique_temp_dir("lasterr");
        let mut log = RunLog::open(&dir, "myrepo").expect("open runlog");
        log.mark_start().expect("mark start");
        log.write_stderr(b"boom\n").expect("write");
        let tail = log.last_error().expect("last error");
        assert_eq!(tail, "boom\n");
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn close_compresses_nonempty_streams_and_removes_originals() {
        let dir = unique_temp_dir("close");
        let mut log = RunLog::open(&dir, "myrepo").expect("open runlog");
        let stdout_path = log.stdout_path.clone();
        let stderr_path = log.stderr_path.clone();
        log.write_stdout(b"output\n").expect("write");
        let had_errors = log.close(true).expect("close");
        assert!(!had_errors);
        assert!(!stdout_path.exists());
        assert!(stdout_path.with_extension("log.gz").exists());
        assert!(!stderr_path.exists());
        assert!(!stderr_path.with_extension("err.gz").exists());
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn close_reports_stderr_content_present() {
        let dir = unique_temp_dir("close-err");
        let mut log = RunLog::open(&dir, "myrepo").expect("open runlog");
        log.write_stderr(b"oops\n").expect("write");
        let had_errors = log.close(true).expect("close");
        assert!(had_errors);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn close_leaves_plain_files_when_compress_is_false() {
        let dir = unique_temp_dir("close-nocompress");
        let mut log = RunLog::open(&dir, "myrepo").expect("open runlog");
        let stdout_path = log.stdout_path.clone();
        log.write_stdout(b"output\n").expect("write");
        let had_errors = log.close(false).expect("close");
        assert!(!had_errors);
        assert!(stdout_path.exists());
        assert!(!stdout_path.with_extension("log.gz").exists());
        fs::remove_dir_all(&dir).ok();
    }
}
