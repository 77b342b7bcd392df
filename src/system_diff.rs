//! Diff strategy delegating to the system `diff`(1) and `patch`(1) tools.
//!
//! Both tools are line-oriented, so file contents are rendered as one hex
//! byte per line before diffing and decoded back afterwards. Arbitrary
//! binary data survives the round trip that way. The rendering is done
//! in-process; only `diff` and `patch` run externally.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{PatchError, Result};
use crate::util;

/// Temporary file removed again on drop. Collisions are avoided with the
/// process id plus a process-wide counter.
struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    fn create(label: &str, contents: &[u8]) -> Result<Self> {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!(
            ".patchit.{label}.{}.{seq}",
            std::process::id()
        ));
        util::write_file(&path, contents)?;
        Ok(Self { path })
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn hex_render(data: &[u8]) -> Vec<u8> {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = Vec::with_capacity(data.len() * 3);
    for &b in data {
        out.push(HEX[(b >> 4) as usize]);
        out.push(HEX[(b & 0x0F) as usize]);
        out.push(b'\n');
    }
    out
}

fn hex_parse(text: &[u8], tool: &'static str) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(text.len() / 3);
    for line in text.split(|&b| b == b'\n') {
        if line.is_empty() {
            continue;
        }
        let line = std::str::from_utf8(line)
            .ok()
            .filter(|l| l.len() == 2)
            .ok_or_else(|| PatchError::ExternalTool {
                tool,
                detail: "produced a malformed hex line".to_owned(),
            })?;
        let byte = u8::from_str_radix(line, 16).map_err(|_| PatchError::ExternalTool {
            tool,
            detail: format!("produced a non-hex line: {line:?}"),
        })?;
        out.push(byte);
    }
    Ok(out)
}

/// Produce an opaque payload describing how `old_path` becomes `new_path`.
/// `diff` exits 0 for identical inputs, 1 when differences were found;
/// anything else means trouble.
pub fn produce(old_path: &Path, new_path: &Path) -> Result<Vec<u8>> {
    let old_hex = ScratchFile::create("src", &hex_render(&util::read_file(old_path)?))?;
    let new_hex = ScratchFile::create("dest", &hex_render(&util::read_file(new_path)?))?;

    let output = Command::new("diff")
        .arg(&old_hex.path)
        .arg(&new_hex.path)
        .output()
        .map_err(|e| PatchError::ExternalTool {
            tool: "diff",
            detail: format!("{e}. Is `diff` installed?"),
        })?;

    match output.status.code() {
        Some(0) | Some(1) => Ok(output.stdout),
        status => Err(PatchError::ExternalTool {
            tool: "diff",
            detail: format!("exit status {status:?}"),
        }),
    }
}

/// Feed a previously produced payload to `patch`, rewriting `target` in
/// place.
pub fn consume(payload: &[u8], target: &Path) -> Result<()> {
    let target_hex = ScratchFile::create("file", &hex_render(&util::read_file(target)?))?;
    let diff_file = ScratchFile::create("diff", payload)?;

    let status = Command::new("patch")
        .arg("-f")
        .arg("-s")
        .arg(&target_hex.path)
        .arg(&diff_file.path)
        .status()
        .map_err(|e| PatchError::ExternalTool {
            tool: "patch",
            detail: format!("{e}. Is `patch` installed?"),
        })?;

    if !status.success() {
        return Err(PatchError::ExternalTool {
            tool: "patch",
            detail: format!("exit status {:?}", status.code()),
        });
    }

    let patched = hex_parse(&util::read_file(&target_hex.path)?, "patch")?;
    util::write_file(target, &patched)
}
