//! Exclusive-lock pidfile (§4.12, §8 property 9). Mirrors the file-lock plus
//! dead-pid-break pattern used by daemons in this corpus, adapted to the
//! reference implementation's exact contract: acquire with a short timeout,
//! break a lock held by a dead pid, write our pid, release and unlink on drop.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;

#[derive(Debug, thiserror::Error)]
pub enum PidLockError {
    #[error("failed to open pidfile {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("pidfile {path} is held by another live daemon (pid {pid})")]
    HeldByLivePid { path: PathBuf, pid: u32 },
    #[error("timed out after {0:?} waiting for pidfile lock")]
    Timeout(Duration),
    #[error("i/o error on pidfile {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Holds the open, locked pidfile for the process lifetime. Dropping it
/// releases the lock and unlinks the file, per §4.12's "on shutdown, release
/// and unlink".
pub struct PidLock {
    path: PathBuf,
    file: File,
}

impl PidLock {
    /// Tries to acquire the lock for up to `timeout`, retrying while the
    /// current holder (read from the file) is a live process. If the
    /// recorded pid is dead, the lock is broken immediately rather than
    /// waited out.
    pub fn acquire(path: impl AsRef<Path>, timeout: Duration) -> Result<Self, PidLockError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| PidLockError::Io {
                path: path.clone(),
                source,
            })?;
        }

        let deadline = Instant::now() + timeout;
        loop {
            let mut file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)
                .map_err(|source| PidLockError::Open {
                    path: path.clone(),
                    source,
                })?;

            match file.try_lock_exclusive() {
                Ok(()) => {
                    file.set_len(0).map_err(|source| PidLockError::Io {
                        path: path.clone(),
                        source,
                    })?;
                    writeln!(file, "{}", std::process::id()).map_err(|source| PidLockError::Io {
                        path: path.clone(),
                        source,
                    })?;
                    file.flush().ok();
                    return Ok(PidLock { path, file });
                }
                Err(_) => {
                    let held_by = read_pid(&mut file);
                    let stale = held_by
                        .map(|pid| !bigitr_core::util::process_is_alive(pid))
                        .unwrap_or(true);
                    if stale {
                        // Drop our handle and retry; the previous holder's
                        // process has exited without releasing the lock
                        // (e.g. killed -9), so the next try_lock should
                        // succeed once the kernel has reclaimed it.
                        drop(file);
                        if Instant::now() >= deadline {
                            return Err(PidLockError::Timeout(timeout));
                        }
                        std::thread::sleep(Duration::from_millis(50));
                        continue;
                    }
                    if Instant::now() >= deadline {
                        return Err(PidLockError::HeldByLivePid {
                            path,
                            pid: held_by.unwrap_or(0),
                        });
                    }
                    drop(file);
                    std::thread::sleep(Duration::from_millis(50));
                }
            }
        }
    }
}

fn read_pid(file: &mut File) -> Option<u32> {
    use std::io::Seek;
    file.seek(std::io::SeekFrom::Start(0)).ok()?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

impl Drop for PidLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
        let _ = fs::remove_file(&self.path);
    }
}
