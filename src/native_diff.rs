//! Built-in diff strategy: rsync-style block matching.
//!
//! The payload is a flat chunk list describing how to rebuild the new file
//! from the old one:
//! 1. Split old data into fixed-size blocks
//! 2. Build a hash table from rolling hash -> block signatures
//! 3. Scan new data with a rolling hash, matching against old blocks
//! 4. Emit Copy chunks for matches, Insert chunks for non-matching regions

use std::collections::HashMap;
use std::path::Path;

use crate::error::{PatchError, Result};
use crate::rolling_hash::RollingHash;
use crate::util;
use crate::wire::{put_u64, Reader};

pub const BLOCK_SIZE: usize = 4096;

const CHUNK_COPY: u8 = 0;
const CHUNK_INSERT: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffChunk {
    Copy { offset: u64, length: u64 },
    Insert { data: Vec<u8> },
}

struct BlockSignature {
    rolling_hash: u32,
    strong_hash: blake3::Hash,
    offset: u64,
}

/// Produce a payload that rewrites the contents of `old_path` into the
/// contents of `new_path`. Identical inputs produce an empty payload.
pub fn produce(old_path: &Path, new_path: &Path) -> Result<Vec<u8>> {
    let old = util::read_file(old_path)?;
    let new = util::read_file(new_path)?;
    if old == new {
        return Ok(Vec::new());
    }
    Ok(encode_chunks(&compute_diff(&old, &new)))
}

/// Apply a previously produced payload to `target`, rewriting the file in
/// place.
pub fn consume(payload: &[u8], target: &Path) -> Result<()> {
    let chunks = decode_chunks(payload)?;
    let old = util::read_file(target)?;
    let new = reconstruct(&old, &chunks)?;
    util::write_file(target, &new)
}

/// Chunk wire format: a `Copy` is `0x00 ++ offset:u64 ++ length:u64`, an
/// `Insert` is `0x01 ++ length:u64 ++ data`, all integers little-endian.
pub fn encode_chunks(chunks: &[DiffChunk]) -> Vec<u8> {
    let mut out = Vec::new();
    for chunk in chunks {
        match chunk {
            DiffChunk::Copy { offset, length } => {
                out.push(CHUNK_COPY);
                put_u64(&mut out, *offset);
                put_u64(&mut out, *length);
            }
            DiffChunk::Insert { data } => {
                out.push(CHUNK_INSERT);
                put_u64(&mut out, data.len() as u64);
                out.extend_from_slice(data);
            }
        }
    }
    out
}

pub fn decode_chunks(payload: &[u8]) -> Result<Vec<DiffChunk>> {
    let mut r = Reader::new(payload);
    let mut chunks = Vec::new();
    while !r.is_empty() {
        match r.read_u8("diff chunk tag")? {
            CHUNK_COPY => chunks.push(DiffChunk::Copy {
                offset: r.read_u64("copy chunk offset")?,
                length: r.read_u64("copy chunk length")?,
            }),
            CHUNK_INSERT => {
                let len = r.read_u64("insert chunk length")?;
                let len = usize::try_from(len).map_err(|_| {
                    PatchError::CorruptedInstruction(format!(
                        "insert chunk claims {len} bytes"
                    ))
                })?;
                chunks.push(DiffChunk::Insert {
                    data: r.read_exact(len, "insert chunk data")?.to_vec(),
                });
            }
            other => {
                return Err(PatchError::CorruptedInstruction(format!(
                    "unknown diff chunk tag {other:#04x}"
                )))
            }
        }
    }
    Ok(chunks)
}

/// Reconstruct the new file contents from the old contents and a chunk list.
/// Copy ranges are bounds-checked against the old data.
pub fn reconstruct(old: &[u8], chunks: &[DiffChunk]) -> Result<Vec<u8>> {
    let estimated: u64 = chunks
        .iter()
        .map(|c| match c {
            DiffChunk::Copy { length, .. } => *length,
            DiffChunk::Insert { data } => data.len() as u64,
        })
        .sum();

    let mut result = Vec::with_capacity(estimated as usize);

    for chunk in chunks {
        match chunk {
            DiffChunk::Copy { offset, length } => {
                let start = usize::try_from(*offset)
                    .ok()
                    .filter(|&s| s <= old.len());
                let end = start.and_then(|s| {
                    usize::try_from(*length)
                        .ok()
                        .and_then(|l| s.checked_add(l))
                        .filter(|&e| e <= old.len())
                });
                match (start, end) {
                    (Some(start), Some(end)) => result.extend_from_slice(&old[start..end]),
                    _ => {
                        return Err(PatchError::CorruptedInstruction(format!(
                            "copy chunk {offset}+{length} exceeds the {} source bytes",
                            old.len()
                        )))
                    }
                }
            }
            DiffChunk::Insert { data } => result.extend_from_slice(data),
        }
    }

    Ok(result)
}

/// Compute a chunk list that turns `old` into `new`.
pub fn compute_diff(old: &[u8], new: &[u8]) -> Vec<DiffChunk> {
    if old.is_empty() {
        if new.is_empty() {
            return vec![];
        }
        return vec![DiffChunk::Insert {
            data: new.to_vec(),
        }];
    }

    let signatures = build_signatures(old);
    let hash_table = build_hash_table(&signatures);

    match_blocks(old, new, &hash_table, &signatures)
}

fn build_signatures(data: &[u8]) -> Vec<BlockSignature> {
    let num_blocks = data.len().div_ceil(BLOCK_SIZE);
    let mut sigs = Vec::with_capacity(num_blocks);

    for i in 0..num_blocks {
        let start = i * BLOCK_SIZE;
        let end = (start + BLOCK_SIZE).min(data.len());
        let block = &data[start..end];

        sigs.push(BlockSignature {
            rolling_hash: RollingHash::seed(block).digest(),
            strong_hash: blake3::hash(block),
            offset: start as u64,
        });
    }

    sigs
}

fn build_hash_table(signatures: &[BlockSignature]) -> HashMap<u32, Vec<usize>> {
    let mut table: HashMap<u32, Vec<usize>> = HashMap::with_capacity(signatures.len());
    for (idx, sig) in signatures.iter().enumerate() {
        table.entry(sig.rolling_hash).or_default().push(idx);
    }
    table
}

fn match_blocks(
    old: &[u8],
    new: &[u8],
    hash_table: &HashMap<u32, Vec<usize>>,
    signatures: &[BlockSignature],
) -> Vec<DiffChunk> {
    let mut chunks: Vec<DiffChunk> = Vec::new();
    let mut insert_buf: Vec<u8> = Vec::new();

    if new.len() < BLOCK_SIZE {
        return vec![DiffChunk::Insert {
            data: new.to_vec(),
        }];
    }

    let mut rolling = RollingHash::seed(&new[..BLOCK_SIZE]);

    let mut pos: usize = 0;

    loop {
        let window_end = pos + BLOCK_SIZE;
        if window_end > new.len() {
            break;
        }

        let digest = rolling.digest();

        if let Some((offset, length)) =
            find_match(digest, &new[pos..window_end], old, hash_table, signatures)
        {
            if !insert_buf.is_empty() {
                chunks.push(DiffChunk::Insert {
                    data: std::mem::take(&mut insert_buf),
                });
            }

            chunks.push(DiffChunk::Copy { offset, length });

            pos += length as usize;

            if pos + BLOCK_SIZE <= new.len() {
                rolling = RollingHash::seed(&new[pos..pos + BLOCK_SIZE]);
            }
        } else {
            insert_buf.push(new[pos]);
            pos += 1;

            if pos + BLOCK_SIZE <= new.len() {
                rolling.slide(new[pos - 1], new[pos + BLOCK_SIZE - 1]);
            }
        }
    }

    // Remaining bytes that don't fill a complete block window
    if pos < new.len() {
        insert_buf.extend_from_slice(&new[pos..]);
    }

    if !insert_buf.is_empty() {
        chunks.push(DiffChunk::Insert { data: insert_buf });
    }

    chunks
}

/// Try to find a matching old block for the current new window.
/// Returns (old_offset, length) on match.
fn find_match(
    rolling_digest: u32,
    new_block: &[u8],
    old: &[u8],
    hash_table: &HashMap<u32, Vec<usize>>,
    signatures: &[BlockSignature],
) -> Option<(u64, u64)> {
    let candidates = hash_table.get(&rolling_digest)?;

    let new_strong = blake3::hash(new_block);

    for &sig_idx in candidates {
        let sig = &signatures[sig_idx];
        if sig.strong_hash == new_strong {
            let block_end = (sig.offset as usize + BLOCK_SIZE).min(old.len());
            let block_len = block_end - sig.offset as usize;
            return Some((sig.offset, block_len as u64));
        }
    }

    None
}
