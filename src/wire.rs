//! Little-endian primitives shared by the container and instruction codecs.

use crate::error::{PatchError, Result};

/// Forward-only view over a serialized buffer. Tracks its byte offset so
/// truncation errors can point at the exact spot the data ran out.
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn offset(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_u8(&mut self, what: &'static str) -> Result<u8> {
        let byte = *self.data.get(self.pos).ok_or(PatchError::Truncated {
            what,
            offset: self.pos,
        })?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn read_u64(&mut self, what: &'static str) -> Result<u64> {
        let bytes = self.read_exact(8, what)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(raw))
    }

    pub fn read_exact(&mut self, len: usize, what: &'static str) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(PatchError::Truncated {
                what,
                offset: self.pos,
            });
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    /// Read a NUL-terminated UTF-8 string, consuming the terminator.
    /// A missing terminator is a hard parse error, never a
    /// rest-of-buffer fallback.
    pub fn read_cstr(&mut self, what: &'static str) -> Result<String> {
        let tail = &self.data[self.pos..];
        let nul = tail.iter().position(|&b| b == 0).ok_or_else(|| {
            PatchError::CorruptedInstruction(format!("{what}: missing NUL terminator"))
        })?;
        let s = std::str::from_utf8(&tail[..nul]).map_err(|_| {
            PatchError::CorruptedInstruction(format!("{what}: not valid UTF-8"))
        })?;
        self.pos += nul + 1;
        Ok(s.to_owned())
    }

    /// Consume and return everything left in the buffer.
    pub fn rest(&mut self) -> &'a [u8] {
        let slice = &self.data[self.pos..];
        self.pos = self.data.len();
        slice
    }
}

pub fn put_u64(buf: &mut Vec<u8>, value: u64) {
    buf.extend_from_slice(&value.to_le_bytes());
}

pub fn put_cstr(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
}
