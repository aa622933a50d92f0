//! Spawns a subprocess, tees stdout/stderr into a RunLog with START/COMPLETE
//! framing, and surfaces a non-zero exit as a typed error.

use std::process::{Command, Stdio};

use chrono::Local;

use crate::error::ExitCodeError;
use crate::runlog::RunLog;

#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// If true (the default), a non-zero exit becomes `ExitCodeError`.
    pub error_fatal: bool,
    /// If true, stdout is piped back to the caller instead of only being
    /// teed to the log.
    pub capture_stdout: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions { error_fatal: true, capture_stdout: false }
    }
}

impl RunOptions {
    pub fn fatal() -> Self {
        Self::default()
    }

    pub fn non_fatal() -> Self {
        RunOptions { error_fatal: false, capture_stdout: false }
    }

    pub fn capturing() -> Self {
        RunOptions { error_fatal: true, capture_stdout: true }
    }
}

pub struct RunOutcome {
    pub exit_code: i32,
    pub stdout: Option<Vec<u8>>,
}

/// `[Day Mon DD HH:MM:SS.FFFF TZ YYYY]`, local time, four fractional digits.
fn timestamp() -> String {
    Local::now().format("[%a %b %d %H:%M:%S%.4f %Z %Y]").to_string()
}

/// Runs `argv`, tees output into `log` with START/COMPLETE framing, and
/// returns the exit code (plus captured stdout bytes when requested).
///
/// On a non-zero exit with `error_fatal`, the last captured stderr chunk is
/// surfaced via `eprintln!` (the process-wide log sink named in §4.1) and an
/// `ExitCodeError` is returned.
pub fn run(
    log: &mut RunLog,
    argv: &[impl AsRef<str>],
    cwd: Option<&std::path::Path>,
    options: RunOptions,
) -> Result<RunOutcome, ExitCodeError> {
    let argv: Vec<&str> = argv.iter().map(|a| a.as_ref()).collect();
    let joined = argv.join(" ");
    let to_exit_error = |retcode: i32| ExitCodeError {
        command: argv.iter().map(|s| s.to_string()).collect(),
        retcode,
    };

    let start_line = format!("{} START: {}\n", timestamp(), joined);
    let _ = log.write_stdout(start_line.as_bytes());
    let _ = log.write_stderr(start_line.as_bytes());
    let _ = log.mark_start();

    let mut command = Command::new(argv[0]);
    command.args(&argv[1..]);
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    let stderr_handle = log
        .stderr_file()
        .try_clone()
        .unwrap_or_else(|err| panic!("failed to dup run log stderr handle: {err}"));
    command.stderr(Stdio::from(stderr_handle));

    let (exit_code, stdout) = if options.capture_stdout {
        command.stdout(Stdio::piped());
        match command.output() {
            Ok(output) => {
                let _ = log.write_stdout(&output.stdout);
                (output.status.code().unwrap_or(-1), Some(output.stdout))
            }
            Err(_) => (-1, None),
        }
    } else {
        let stdout_handle = log
            .stdout_file()
            .try_clone()
            .unwrap_or_else(|err| panic!("failed to dup run log stdout handle: {err}"));
        command.stdout(Stdio::from(stdout_handle));
        match command.status() {
            Ok(status) => (status.code().unwrap_or(-1), None),
            Err(_) => (-1, None),
        }
    };

    let _ = log.mark_stop();
    let finish_line = format!("{} COMPLETE with return code: {}\n", timestamp(), exit_code);
    let _ = log.write_stdout(finish_line.as_bytes());
    let _ = log.write_stderr(finish_line.as_bytes());

    if exit_code != 0 && options.error_fatal {
        if let Ok(tail) = log.last_error() {
            for line in tail.lines() {
                eprintln!("{line}");
            }
        }
        return Err(to_exit_error(exit_code));
    }

    Ok(RunOutcome { exit_code, stdout })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn unique_temp_dir(name: &str) -> std::path::PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("bigitr-command-test-{name}-{nanos}"));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    #[test]
    fn successful_command_returns_zero_exit_code() {
        let dir = unique_temp_dir("ok");
        let mut log = RunLog::open(&dir, "repo").expect("open runlog");
        let outcome = run(&mut log, &["true"], None, RunOptions::fatal()).expect("run true");
        assert_eq!(outcome.exit_code, 0);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn fatal_nonzero_exit_returns_exit_code_error() {
        let dir = unique_temp_dir("fail");
        let mut log = RunLog::open(&dir, "repo").expect("open runlog");
        let err = run(&mut log, &["false"], None, RunOptions::fatal()).expect_err("must fail");
        assert_eq!(err.retcode, 1);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn non_fatal_nonzero_exit_is_returned_not_raised() {
        let dir = unique_temp_dir("nonfatal");
        let mut log = RunLog::open(&dir, "repo").expect("open runlog");
        let outcome =
            run(&mut log, &["false"], None, RunOptions::non_fatal()).expect("non-fatal ok");
        assert_eq!(outcome.exit_code, 1);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn capture_stdout_returns_bytes() {
        let dir = unique_temp_dir("capture");
        let mut log = RunLog::open(&dir, "repo").expect("open runlog");
        let outcome = run(&mut log, &["echo", "hello"], None, RunOptions::capturing())
            .expect("run echo");
        assert_eq!(outcome.stdout.as_deref(), Some(b"hello\n".as_ref()));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn log_contains_start_and_complete_framing() {
        let dir = unique_temp_dir("framing");
        let mut log = RunLog::open(&dir, "repo").expect("open runlog");
        run(&mut log, &["true"], None, RunOptions::fatal()).expect("run true");
        let had_errors = log.close(true).expect("close");
        assert!(!had_errors);
        let log_gz = dir.join("repo").read_dir().expect("read dir").find(|e| {
            e.as_ref()
                .map(|e| e.file_name().to_string_lossy().ends_with(".log.gz"))
                .unwrap_or(false)
        });
        assert!(log_gz.is_some());
        std::fs::remove_dir_all(&dir).ok();
    }
}
