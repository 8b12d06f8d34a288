use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, OnceLock};

use crate::settings::HOME_ENV;

/// Redirects the mem-cli home (and optionally the mock embedding backend)
/// through process-wide environment variables, serialized across tests.
pub struct EnvGuard {
    home: PathBuf,
    mock: bool,
    _lock: MutexGuard<'static, ()>,
}

impl EnvGuard {
    pub fn home(&self) -> &Path {
        &self.home
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        std::env::remove_var(HOME_ENV);
        if self.mock {
            std::env::remove_var(embeddings_client::MOCK_ENV);
        }
        let _ = std::fs::remove_dir_all(&self.home);
    }
}

pub fn isolated_home(prefix: &str) -> EnvGuard {
    isolated(prefix, false)
}

pub fn isolated_home_with_mock(prefix: &str) -> EnvGuard {
    isolated(prefix, true)
}

fn isolated(prefix: &str, mock: bool) -> EnvGuard {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let lock = ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .expect("env lock poisoned");

    let mut home = std::env::temp_dir();
    home.push(format!("{prefix}-{}", unique_id()));
    std::env::set_var(HOME_ENV, &home);
    if mock {
        std::env::set_var(embeddings_client::MOCK_ENV, "1");
    }

    EnvGuard {
        home,
        mock,
        _lock: lock,
    }
}

fn unique_id() -> u128 {
    use std::time::{SystemTime, UNIX_EPOCH};

    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time went backwards")
        .as_nanos()
}
