//! Storage backends
//!
//! - `file`: RON files on disk, for production use
//! - `memory`: in-process storage for tests and dry runs
//! - `test`: a memory session store with failure injection

pub mod file;
pub mod memory;

use std::path::Path;

use tokio::fs;

pub use file::{FileLedger, FileSessionStore, FileStore, FileStoreBuilder};
pub use memory::{MemoryLedger, MemorySessionStore};
pub use test::TestSessionStore;

/// Prefix marking files that are still being written
pub(crate) const TEMP_PREFIX: &str = ".tmp_";

/// Write `contents` to `path` so that readers only ever see the old or new file.
///
/// The data goes to `.tmp_{name}` in the same directory and is then renamed
/// over the destination.
pub(crate) async fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let name = path
        .file_name()
        .ok_or_else(|| std::io::Error::other(format!("{} has no file name", path.display())))?;
    let temp = path.with_file_name(format!("{TEMP_PREFIX}{}", name.to_string_lossy()));

    fs::write(&temp, contents).await?;
    fs::rename(&temp, path).await
}
