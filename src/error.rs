use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PatchError>;

/// Errors produced while reading, writing or applying a patch.
///
/// Format corruption, truncation and version mismatch are separate variants
/// so callers can tell a damaged file apart from a merely cut-off one.
#[derive(Debug, Error)]
pub enum PatchError {
    #[error("invalid patch signature")]
    InvalidMagic,

    #[error("invalid patch signature: missing terminator byte")]
    MissingMagicTerminator,

    #[error("incompatible patch: compatibility version {found}, this build reads {expected}")]
    IncompatibleVersion { found: u64, expected: u64 },

    #[error("truncated patch: {what} at byte offset {offset}")]
    Truncated { what: &'static str, offset: usize },

    #[error("unrecognized instruction signature {0:#04x}")]
    UnknownInstructionSignature(u8),

    #[error("unrecognized diff signature {0:#04x}")]
    UnknownDiffSignature(u8),

    #[error("unrecognized compressor id {0:#04x}")]
    UnknownCompressorId(u8),

    #[error("corrupted instruction: {0}")]
    CorruptedInstruction(String),

    #[error("compression failed: {0}")]
    Compression(String),

    #[error("decompression failed: {0}")]
    Decompression(String),

    #[error("instruction {index} failed: {source}")]
    InstructionFailed {
        index: usize,
        #[source]
        source: Box<PatchError>,
    },

    #[error("{path}: no such file or directory")]
    MissingTarget { path: String },

    #[error("{path}: not a regular file")]
    NotARegularFile { path: String },

    #[error("{path}: missing {access} permission")]
    PermissionMissing { path: String, access: &'static str },

    #[error("{path}: is a directory and recursive deletion was not requested")]
    RefusedDirectoryDelete { path: String },

    #[error("external tool `{tool}` failed: {detail}")]
    ExternalTool { tool: &'static str, detail: String },

    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl PatchError {
    /// Attach a path to a raw I/O error.
    pub fn io(path: impl Into<String>, source: io::Error) -> Self {
        PatchError::Io {
            path: path.into(),
            source,
        }
    }
}
