//! The pluggable content-diff layer owned by Modify instructions.
//!
//! A `Diff` is a signature-tagged opaque payload: the signature byte picks
//! the strategy that produced it and knows how to feed it back to a target
//! file. The payload is kept uncompressed in memory; compression happens at
//! serialization time and the compressor id byte travels with the data, so
//! deserialization never depends on ambient configuration.

use std::path::Path;

use crate::compressor::Compressor;
use crate::error::{PatchError, Result};
use crate::{native_diff, system_diff};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffSignature {
    /// Delegates to the external `diff`/`patch` tools.
    System,
    /// Built-in block-matching diff.
    Native,
}

impl DiffSignature {
    pub const fn id(self) -> u8 {
        match self {
            DiffSignature::System => 0,
            DiffSignature::Native => 1,
        }
    }

    pub fn from_id(id: u8) -> Result<Self> {
        match id {
            0 => Ok(DiffSignature::System),
            1 => Ok(DiffSignature::Native),
            other => Err(PatchError::UnknownDiffSignature(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diff {
    signature: DiffSignature,
    payload: Vec<u8>,
}

impl Diff {
    /// An empty diff: applying it is a legal no-op.
    pub fn empty(signature: DiffSignature) -> Self {
        Self {
            signature,
            payload: Vec::new(),
        }
    }

    pub fn new(signature: DiffSignature, payload: Vec<u8>) -> Self {
        Self { signature, payload }
    }

    /// Build a diff describing how `old_path`'s contents become
    /// `new_path`'s, using the strategy named by `signature`. The payload
    /// is stored raw; it is compressed only when serialized.
    pub fn from_files(signature: DiffSignature, old_path: &Path, new_path: &Path) -> Result<Self> {
        let payload = match signature {
            DiffSignature::System => system_diff::produce(old_path, new_path)?,
            DiffSignature::Native => native_diff::produce(old_path, new_path)?,
        };
        Ok(Self { signature, payload })
    }

    pub fn signature(&self) -> DiffSignature {
        self.signature
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Rewrite `target` in place. An empty payload means "no change" and
    /// succeeds without touching the file.
    pub fn apply_to(&self, target: &Path) -> Result<()> {
        if self.payload.is_empty() {
            return Ok(());
        }
        match self.signature {
            DiffSignature::System => system_diff::consume(&self.payload, target),
            DiffSignature::Native => native_diff::consume(&self.payload, target),
        }
    }

    /// Serialized form: `compressor_id:u8 ++ compress(payload)`. The
    /// signature byte itself is written by the owning instruction.
    pub fn to_bytes(&self, compressor: Compressor) -> Result<Vec<u8>> {
        let mut out = vec![compressor.id()];
        out.extend_from_slice(&compressor.compress(&self.payload)?);
        Ok(out)
    }

    /// Inverse of [`Diff::to_bytes`]. Also returns which compressor the
    /// stream was written with.
    pub fn from_bytes(signature: DiffSignature, data: &[u8]) -> Result<(Self, Compressor)> {
        let (&id, rest) = data.split_first().ok_or_else(|| {
            PatchError::CorruptedInstruction("serialized diff is empty: missing compressor id".to_owned())
        })?;
        let compressor = Compressor::from_id(id)?;
        let payload = compressor.decompress(rest)?;
        Ok((Self { signature, payload }, compressor))
    }
}
