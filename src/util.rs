use memmap2::Mmap;
use std::path::Path;

use crate::error::{PatchError, Result};

/// Read a whole file into memory, attaching the path to any I/O error.
pub fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| PatchError::io(path.display().to_string(), e))
}

/// Write a whole file, truncating anything already there.
pub fn write_file(path: &Path, data: &[u8]) -> Result<()> {
    std::fs::write(path, data).map_err(|e| PatchError::io(path.display().to_string(), e))
}

/// Memory-map a file for read-only access.
///
/// # Safety
/// The mapping is read-only. Callers must not concurrently truncate or replace
/// the underlying file while the `Mmap` is live.
pub fn mmap_file(path: &Path) -> Result<Mmap> {
    let file =
        std::fs::File::open(path).map_err(|e| PatchError::io(path.display().to_string(), e))?;
    // SAFETY: We only read from this mapping; no concurrent modification of these files.
    unsafe { Mmap::map(&file).map_err(|e| PatchError::io(path.display().to_string(), e)) }
}

/// Render a byte count in binary units for progress output.
pub fn shorten_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut count = bytes as f64;
    let mut selected = "B";
    for unit in UNITS {
        if count < 1024.0 {
            break;
        }
        count /= 1024.0;
        selected = unit;
    }
    format!("{count:.1} {selected}")
}
