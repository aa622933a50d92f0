//! Daemon (§4.12): schedules full syncs and cheap polls, handles signals,
//! and re-execs itself on SIGHUP. Grounded on the signal-flag pattern in
//! `orchd/src/main.rs`'s daemon mode, adapted to bigitr's own poll/sync
//! frequency tracking from `bigitr/bigitrdaemon.py`.

use std::io::{Read, Seek, SeekFrom};
use std::os::unix::process::CommandExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bigitr_core::runlog::RunLog;
use bigitr_notify::Mailer;
use bigitr_sync::exporter::{export_branch, ExportRequest};
use bigitr_sync::importer::{import_branch, ImportRequest};
use bigitr_sync::sync::report_failure;

use crate::jobs::RepositoryJob;

/// Per-repository cached ref snapshot used by the polling shortcut (§4.11's
/// `newContent`): `None` until the first fetch, after which a changed ref
/// listing (or a still-empty repository turning non-empty) means "new
/// content arrived since the last poll or sync".
#[derive(Default)]
struct PollState {
    last_refs: Option<Vec<(String, String)>>,
}

pub struct Daemon {
    jobs: Vec<RepositoryJob>,
    poll_state: Vec<PollState>,
    poll_frequency: u64,
    sync_frequency: u64,
    stop: Arc<AtomicBool>,
    restart: Arc<AtomicBool>,
}

impl Daemon {
    /// Registers SIGTERM/SIGINT to request a clean stop and SIGHUP to
    /// request a re-exec restart. SIGCHLD is left at its default
    /// disposition; bigitrd never reaps children of its own (CommandRunner
    /// always waits synchronously on its subprocesses).
    pub fn new(jobs: Vec<RepositoryJob>, poll_frequency: u64, sync_frequency: u64) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let restart = Arc::new(AtomicBool::new(false));
        signal_hook::flag::register(signal_hook::consts::SIGTERM, stop.clone())?;
        signal_hook::flag::register(signal_hook::consts::SIGINT, stop.clone())?;
        signal_hook::flag::register(signal_hook::consts::SIGHUP, restart.clone())?;
        let poll_state = jobs.iter().map(|_| PollState::default()).collect();
        Ok(Daemon {
            jobs,
            poll_state,
            poll_frequency,
            sync_frequency,
            stop,
            restart,
        })
    }

    fn should_break(&self) -> bool {
        self.stop.load(Ordering::Relaxed) || self.restart.load(Ordering::Relaxed)
    }

    /// Runs one iteration of the schedule: if `poll` is true and a
    /// repository's DIST clone shows no new refs since the last check, its
    /// pipeline is skipped for this iteration. Errors are isolated per
    /// repository via `report_failure` and never stop the remaining jobs;
    /// `stop`/`restart` are checked between repositories, never mid-job.
    pub fn run_once(&mut self, poll: bool) {
        for (job, state) in self.jobs.iter().zip(self.poll_state.iter_mut()) {
            if self.stop.load(Ordering::Relaxed) || self.restart.load(Ordering::Relaxed) {
                break;
            }

            let mut log = match RunLog::open(&job.log_dir, &job.name) {
                Ok(log) => log,
                Err(err) => {
                    eprintln!("[bigitrd] failed to open run log for {}: {err}", job.name);
                    continue;
                }
            };

            if poll {
                match new_content(job, state, &mut log) {
                    Ok(false) => continue,
                    Ok(true) => {}
                    Err(err) => eprintln!("[bigitrd] poll check failed for {}: {err}", job.name),
                }
            }

            let mut mailer = Mailer::new(
                job.name.clone(),
                job.mailer_recipients.clone(),
                job.mailfrom.clone(),
                job.smarthost.clone(),
            );

            run_repository(job, &mut log, &mut mailer);

            let all_out = read_all(log.stdout_file());
            let all_err = read_all(log.stderr_file());
            if let Err(err) = mailer.send(&all_out, &all_err) {
                eprintln!("[bigitrd] failed to send report for {}: {err}", job.name);
            }
            if let Err(err) = log.close(job.compress_logs) {
                eprintln!("[bigitrd] failed to close run log for {}: {err}", job.name);
            }
        }
    }

    /// Runs the scheduler loop described in SPEC_FULL §4.12 until a signal
    /// requests stop or restart, then either returns (stop) or re-execs the
    /// current binary with the same argv (restart).
    pub fn main_loop(mut self) -> std::io::Result<()> {
        let mut poll = false;
        let mut sync_start = std::time::Instant::now();
        let mut wait_time = Duration::ZERO;

        loop {
            if !wait_time.is_zero() {
                std::thread::sleep(wait_time);
            }
            if self.should_break() {
                break;
            }

            let start = std::time::Instant::now();
            if !poll {
                sync_start = start;
            }
            self.run_once(poll);

            let now = std::time::Instant::now();
            let sync_elapsed = now.saturating_duration_since(sync_start);
            let poll_elapsed = now.saturating_duration_since(start);
            let sync_remaining = Duration::from_secs(self.sync_frequency).saturating_sub(sync_elapsed);
            let poll_remaining = Duration::from_secs(self.poll_frequency).saturating_sub(poll_elapsed);
            poll = poll_remaining < sync_remaining;
            wait_time = sync_remaining.min(poll_remaining);

            if self.should_break() {
                break;
            }
        }

        if self.restart.load(Ordering::Relaxed) {
            let mut argv = std::env::args();
            let program = argv.next().unwrap_or_else(|| "bigitrd".to_string());
            let err = std::process::Command::new(program).args(argv).exec();
            return Err(err);
        }
        Ok(())
    }
}

/// `newContent(dist)` (§4.11): true if the clone doesn't exist yet, or a
/// fresh `fetch` changes the ref listing from the cached snapshot. Always
/// performs a real fetch before comparing — the reference implementation's
/// attribute-access variant is treated as a bug (§9).
fn new_content(job: &RepositoryJob, state: &mut PollState, log: &mut RunLog) -> std::io::Result<bool> {
    if !job.dist.root.exists() {
        return Ok(true);
    }
    job.dist.fetch(log).map_err(std::io::Error::other)?;
    let refs = job.dist.refs(log).map_err(std::io::Error::other)?;
    let changed = refs != state.last_refs;
    state.last_refs = refs;
    Ok(changed)
}

/// One repository's pre-import / export / import cycle, run directly
/// against per-job CentralDriver instances rather than through
/// `bigitr_sync::sync::synchronize` — each export branch needs its own
/// CentralDriver checkout directory (§4.7), which that function's single
/// shared `&CentralDriver` signature cannot express. Errors are isolated at
/// branch granularity and reported via `report_failure`.
fn run_repository(job: &RepositoryJob, log: &mut RunLog, mailer: &mut Mailer) {
    if job.pre_import {
        run_imports(job, log, mailer);
    }
    run_exports(job, log, mailer);
    run_imports(job, log, mailer);
}

fn run_imports(job: &RepositoryJob, log: &mut RunLog, mailer: &mut Mailer) {
    for import in &job.imports {
        let request = ImportRequest {
            module: &import.module,
            central_branch: &import.central_branch,
            dist_branch: &import.dist_branch,
            dist_url: &import.dist_url,
            skeleton: import.skeleton.as_deref(),
            merge_map: &import.merge_map,
            import_post_hooks: &job.import_post_hooks,
            pre_hooks: &import.pre_hooks,
            post_hooks: &import.post_hooks,
        };
        if let Err(err) = import_branch(&job.central_import, &job.dist, &request, log, mailer) {
            let should_abort = report_failure(&job.name, &err, log, mailer, job.on_error);
            if should_abort {
                return;
            }
        }
    }
}

fn run_exports(job: &RepositoryJob, log: &mut RunLog, mailer: &mut Mailer) {
    for export in &job.exports {
        let request = ExportRequest {
            repository: &job.name,
            module: &export.module,
            git_branch: &export.git_branch,
            central_branch: &export.central_branch,
            export_branch: &export.export_branch,
            prefix: export.prefix.as_deref(),
            cvsvars: &export.cvsvars,
            dist_pre_hooks: &export.dist_pre_hooks,
            dist_post_hooks: &export.dist_post_hooks,
            central_pre_hooks: &export.central_pre_hooks,
            central_post_hooks: &export.central_post_hooks,
        };
        if let Err(err) = export_branch(&export.central, &job.dist, &request, log) {
            let should_abort = report_failure(&job.name, &err, log, mailer, job.on_error);
            if should_abort {
                return;
            }
        }
    }
}

fn read_all(file: &std::fs::File) -> String {
    let mut file = match file.try_clone() {
        Ok(file) => file,
        Err(_) => return String::new(),
    };
    if file.seek(SeekFrom::Start(0)).is_err() {
        return String::new();
    }
    let mut buf = String::new();
    let _ = file.read_to_string(&mut buf);
    buf
}
