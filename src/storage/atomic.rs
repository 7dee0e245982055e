use std::io::Write;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use super::types::StoreError;

/// Replaces `path` with `bytes` through a temporary sibling and a rename.
///
/// Readers see either the old file or the complete new one. On failure the
/// temporary file is removed and the old file is left as it was.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    // Randomized suffix so concurrent writers never share a temp file
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let temp_path = path.with_extension(format!("tmp.{:016x}", suffix));

    let fail = |source: std::io::Error| {
        let _ = std::fs::remove_file(&temp_path);
        StoreError::Write {
            path: path.to_path_buf(),
            source,
        }
    };

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&temp_path)
        .map_err(|source| StoreError::Write {
            path: temp_path.clone(),
            source,
        })?;
    file.write_all(bytes).map_err(fail)?;
    file.sync_all().map_err(fail)?;
    drop(file);

    std::fs::rename(&temp_path, path).map_err(fail)?;
    Ok(())
}

/// Deletes `path`; a file that is already gone is not an error.
pub(crate) fn remove_if_exists(path: &Path) -> Result<(), StoreError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(StoreError::Write {
            path: path.to_path_buf(),
            source,
        }),
    }
}
