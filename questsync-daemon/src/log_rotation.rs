//! Size-capped rotation for `notices.jsonl`.
//!
//! Once the live file reaches the limit it becomes `notices.jsonl.1`, older
//! copies shift up by one, and anything past the last kept copy is removed.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Rotate once the live file reaches 1 MiB.
pub const MAX_NOTICE_LOG_BYTES: u64 = 1024 * 1024;

/// Rotated copies kept next to the live file.
pub const MAX_ROTATED_FILES: usize = 3;

/// Rotate `path` when it is at least `max_bytes` long. Returns whether a
/// rotation happened; a missing file is not an error.
pub fn rotate_if_needed(path: &Path, max_bytes: u64, max_files: usize) -> io::Result<bool> {
    let size = match fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    if size < max_bytes {
        return Ok(false);
    }

    if max_files == 0 {
        fs::remove_file(path)?;
        return Ok(true);
    }

    let oldest = numbered_path(path, max_files);
    match fs::remove_file(&oldest) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err),
    }
    for n in (1..max_files).rev() {
        let from = numbered_path(path, n);
        if from.exists() {
            fs::rename(&from, numbered_path(path, n + 1))?;
        }
    }
    fs::rename(path, numbered_path(path, 1))?;
    Ok(true)
}

/// `notices.jsonl` → `notices.jsonl.<n>`.
pub fn numbered_path(base: &Path, n: usize) -> PathBuf {
    let mut name = base.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{n}"));
    base.with_file_name(name)
}
