use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::files::now_ms;
use crate::error::IndexError;

const MALFORMED_GRACE: Duration = Duration::from_secs(2);
const BACKOFF_CAP: Duration = Duration::from_millis(250);

/// Cross-process advisory lock built on exclusive file creation.
///
/// Advisory only: correctness holds across cooperating processes that all go
/// through this module.
#[derive(Debug, Clone)]
pub struct LockOptions {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            poll_interval: Duration::from_millis(50),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LockPayload {
    pid: u32,
    created_at: i64,
}

/// Held lock; releases on drop, or explicitly via [`LockGuard::release`] to
/// surface unlink errors.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    file: Option<File>,
    released: bool,
}

impl LockGuard {
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        drop(self.file.take());
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error)
                .with_context(|| format!("Failed to release lock at {}", self.path.display())),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            drop(self.file.take());
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Acquire the lock at `path`, waiting out (or stealing from) other holders.
pub fn acquire(path: &Path, options: &LockOptions) -> Result<LockGuard> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| {
            format!("Failed to create lock parent directory {}", parent.display())
        })?;
    }

    let started = Instant::now();
    let mut backoff = options.poll_interval;

    loop {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                let payload = LockPayload {
                    pid: std::process::id(),
                    created_at: now_ms(),
                };
                let json = serde_json::to_string(&payload)
                    .context("Failed to encode lock payload")?;
                file.write_all(json.as_bytes())
                    .with_context(|| format!("Failed to write lock at {}", path.display()))?;

                return Ok(LockGuard {
                    path: path.to_path_buf(),
                    file: Some(file),
                    released: false,
                });
            }
            Err(error) if error.kind() == std::io::ErrorKind::AlreadyExists => {
                if clear_if_stale(path) {
                    // Stale holder removed, retry the exclusive create now.
                    continue;
                }

                if started.elapsed() >= options.timeout {
                    return Err(IndexError::LockTimeout {
                        path: path.to_path_buf(),
                        waited_ms: started.elapsed().as_millis() as u64,
                    }
                    .into());
                }

                std::thread::sleep(backoff);
                backoff = (backoff * 2).min(BACKOFF_CAP);
            }
            Err(error) => {
                return Err(error)
                    .with_context(|| format!("Failed to create lock at {}", path.display()));
            }
        }
    }
}

/// Poll until the lock at `path` is gone (or its holder is dead), without
/// acquiring it.
pub fn wait_for_release(path: &Path, options: &LockOptions) -> Result<()> {
    let started = Instant::now();

    loop {
        if !path.exists() || clear_if_stale(path) {
            return Ok(());
        }

        if started.elapsed() >= options.timeout {
            return Err(IndexError::LockTimeout {
                path: path.to_path_buf(),
                waited_ms: started.elapsed().as_millis() as u64,
            }
            .into());
        }

        std::thread::sleep(options.poll_interval);
    }
}

/// Remove the lock when its holder is provably gone. Returns true when the
/// file was unlinked (or had already disappeared).
fn clear_if_stale(path: &Path) -> bool {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        // Gone between the failed create and this read.
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return true,
        Err(_) => return false,
    };

    match serde_json::from_str::<LockPayload>(&contents) {
        Ok(payload) => {
            if pid_alive(payload.pid) {
                return false;
            }
            tracing::debug!(path = %path.display(), pid = payload.pid, "removing lock of dead process");
            remove_quietly(path)
        }
        Err(_) => {
            // Malformed payload: the holder may still be mid-write, so only
            // steal once the file has outlived the grace period.
            let age = std::fs::metadata(path)
                .and_then(|metadata| metadata.modified())
                .ok()
                .and_then(|modified| modified.elapsed().ok());
            match age {
                Some(age) if age >= MALFORMED_GRACE => remove_quietly(path),
                _ => false,
            }
        }
    }
}

fn remove_quietly(path: &Path) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => true,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => true,
        Err(_) => false,
    }
}

#[cfg(unix)]
fn pid_alive(pid: u32) -> bool {
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };

    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }

    // EPERM means the process exists but belongs to someone else.
    !matches!(
        std::io::Error::last_os_error().raw_os_error(),
        Some(libc::ESRCH)
    )
}

#[cfg(not(unix))]
fn pid_alive(_pid: u32) -> bool {
    // No cheap liveness probe; rely on holders releasing or the user
    // clearing the lock manually.
    true
}

#[cfg(test)]
mod unit_tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use super::{acquire, wait_for_release, LockOptions};
    use crate::error::IndexError;

    fn temp_lock_path(prefix: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!(
            "{prefix}-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time went backwards")
                .as_nanos()
        ));
        path.push("index.db.lock");
        path
    }

    fn quick_options() -> LockOptions {
        LockOptions {
            timeout: Duration::from_millis(400),
            poll_interval: Duration::from_millis(10),
        }
    }

    #[test]
    fn acquire_writes_payload_and_release_unlinks() {
        let path = temp_lock_path("mem-lock-basic");

        let guard = acquire(&path, &quick_options()).expect("acquire should succeed");
        let contents = std::fs::read_to_string(&path).expect("lock file should exist");
        assert!(contents.contains(&format!("\"pid\":{}", std::process::id())));
        assert!(contents.contains("createdAt"));

        guard.release().expect("release should succeed");
        assert!(!path.exists());
    }

    #[test]
    fn second_acquire_times_out_while_held() {
        let path = temp_lock_path("mem-lock-timeout");
        let _guard = acquire(&path, &quick_options()).expect("first acquire should succeed");

        let error = acquire(&path, &quick_options()).expect_err("second acquire should time out");
        assert!(
            matches!(
                error.downcast_ref::<IndexError>(),
                Some(IndexError::LockTimeout { .. })
            ),
            "unexpected error: {error:#}"
        );
    }

    #[test]
    fn lock_of_dead_process_is_stolen() {
        let path = temp_lock_path("mem-lock-dead");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        // i32::MAX - 1 is far above any real pid table.
        std::fs::write(&path, "{\"pid\":2147483646,\"createdAt\":0}").unwrap();

        let guard = acquire(&path, &quick_options()).expect("stale lock should be stolen");
        guard.release().unwrap();
    }

    #[test]
    fn malformed_lock_is_stolen_only_after_grace() {
        let path = temp_lock_path("mem-lock-malformed");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "not json").unwrap();

        let error = acquire(&path, &quick_options())
            .expect_err("fresh malformed lock should not be stolen");
        assert!(matches!(
            error.downcast_ref::<IndexError>(),
            Some(IndexError::LockTimeout { .. })
        ));

        std::thread::sleep(Duration::from_millis(2100));
        let guard = acquire(&path, &quick_options())
            .expect("malformed lock should be stolen after the grace period");
        guard.release().unwrap();
    }

    #[test]
    fn wait_for_release_returns_once_holder_releases() {
        let path = temp_lock_path("mem-lock-wait");
        let guard = acquire(&path, &quick_options()).expect("acquire should succeed");

        let waiter_path = path.clone();
        let waiter = std::thread::spawn(move || {
            wait_for_release(
                &waiter_path,
                &LockOptions {
                    timeout: Duration::from_secs(5),
                    poll_interval: Duration::from_millis(10),
                },
            )
        });

        std::thread::sleep(Duration::from_millis(100));
        guard.release().unwrap();

        waiter
            .join()
            .expect("waiter thread should not panic")
            .expect("wait_for_release should succeed");
    }

    #[test]
    fn dropping_the_guard_releases_the_lock() {
        let path = temp_lock_path("mem-lock-drop");
        {
            let _guard = acquire(&path, &quick_options()).expect("acquire should succeed");
            assert!(path.exists());
        }
        assert!(!path.exists());

        let guard = acquire(&path, &quick_options()).expect("reacquire should succeed");
        guard.release().unwrap();
    }
}
