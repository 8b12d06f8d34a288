use std::sync::OnceLock;

use anyhow::{anyhow, Result};
use rusqlite::ffi::{sqlite3_auto_extension, SQLITE_OK};
use rusqlite::Connection;
use sqlite_vec::sqlite3_vec_init;

/// Register sqlite-vec for every connection opened by this process.
///
/// Registration happens once; later calls return the cached outcome.
pub fn register_auto_extension() -> Result<()> {
    static INIT: OnceLock<Result<(), String>> = OnceLock::new();

    let result = INIT.get_or_init(|| unsafe {
        let rc = sqlite3_auto_extension(Some(std::mem::transmute(sqlite3_vec_init as *const ())));
        if rc == SQLITE_OK {
            Ok(())
        } else {
            Err(format!(
                "Failed to register sqlite-vec auto extension (sqlite rc={})",
                rc
            ))
        }
    });

    match result {
        Ok(()) => Ok(()),
        Err(message) => Err(anyhow!(message.clone())),
    }
}

/// Probe the vector extension on an open connection.
///
/// Returns the extension version string when similarity functions are
/// callable, `None` when the extension is unusable on this connection.
pub fn probe_vector_extension(conn: &Connection) -> Option<String> {
    conn.query_row("SELECT vec_version()", [], |row| row.get::<_, String>(0))
        .ok()
}
