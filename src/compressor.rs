//! Pluggable reversible byte transforms for diff payloads.
//!
//! The chosen compressor's id byte is embedded next to the data it
//! compressed, so a patch stays self-describing no matter which strategy
//! authored it.

use crate::error::{PatchError, Result};
use crate::wire::{put_u64, Reader};

const ZSTD_LEVEL: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compressor {
    /// Returns its input unchanged in both directions. Id 0 is reserved
    /// for it.
    #[default]
    Plain,
    /// Zstandard with the original uncompressed length prepended as a u64,
    /// since decompression needs an exact destination size.
    Zstd,
}

impl Compressor {
    pub const fn id(self) -> u8 {
        match self {
            Compressor::Plain => 0,
            Compressor::Zstd => 1,
        }
    }

    pub fn from_id(id: u8) -> Result<Self> {
        match id {
            0 => Ok(Compressor::Plain),
            1 => Ok(Compressor::Zstd),
            other => Err(PatchError::UnknownCompressorId(other)),
        }
    }

    pub fn compress(self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Compressor::Plain => Ok(data.to_vec()),
            Compressor::Zstd => {
                let frame = zstd::bulk::compress(data, ZSTD_LEVEL)
                    .map_err(|e| PatchError::Compression(e.to_string()))?;
                let mut out = Vec::with_capacity(8 + frame.len());
                put_u64(&mut out, data.len() as u64);
                out.extend_from_slice(&frame);
                Ok(out)
            }
        }
    }

    /// Invariant: `decompress(compress(x)) == x` for every byte string,
    /// including the empty one. An empty plain payload decompresses to an
    /// empty payload and is not an error.
    pub fn decompress(self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Compressor::Plain => Ok(data.to_vec()),
            Compressor::Zstd => {
                let mut r = Reader::new(data);
                let original_len = r
                    .read_u64("compressed payload length prefix")
                    .map_err(|_| {
                        PatchError::Decompression(
                            "payload shorter than its length prefix".to_owned(),
                        )
                    })?;
                let capacity = usize::try_from(original_len).map_err(|_| {
                    PatchError::Decompression(format!(
                        "corrupted length prefix: {original_len} bytes"
                    ))
                })?;
                let frame = r.rest();
                // The frame header records its own content size. A prefix
                // that disagrees is corruption, caught before any buffer
                // gets sized from it.
                match zstd::zstd_safe::get_frame_content_size(frame) {
                    Ok(Some(declared)) if declared == original_len => {}
                    Ok(declared) => {
                        return Err(PatchError::Decompression(format!(
                            "length prefix claims {original_len} bytes, \
                             frame header declares {declared:?}"
                        )))
                    }
                    Err(_) => {
                        return Err(PatchError::Decompression(
                            "unreadable frame header".to_owned(),
                        ))
                    }
                }
                let mut out: Vec<u8> = Vec::new();
                out.try_reserve_exact(capacity).map_err(|_| {
                    PatchError::Decompression(format!(
                        "cannot allocate {capacity} bytes for decompression"
                    ))
                })?;
                // The Decompressor method is generic over WriteBuf, so the
                // Vec's reserved capacity is visible to zstd; the free
                // function takes &mut [u8] and would see an empty slice.
                let written = zstd::bulk::Decompressor::new()
                    .and_then(|mut d| d.decompress_to_buffer(frame, &mut out))
                    .map_err(|e| PatchError::Decompression(e.to_string()))?;
                if written != capacity {
                    return Err(PatchError::Decompression(format!(
                        "length prefix promised {capacity} bytes, frame held {written}"
                    )));
                }
                Ok(out)
            }
        }
    }
}
