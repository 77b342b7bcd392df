//! The patch container: an ordered instruction list behind a magic header.
//!
//! File layout, all integers little-endian u64:
//!
//! ```text
//! "__PATCHIT__"  magic
//! 0x00           magic terminator
//! u64            compatibility version
//! u64            instruction count
//! per instruction:
//!   u64          payload length (the signature byte is framed separately
//!                and not counted)
//!   u8           instruction signature
//!   bytes        payload
//! ```

use std::fmt::Write as _;
use std::path::Path;

use crate::error::{PatchError, Result};
use crate::instruction::{Instruction, InstructionSignature};
use crate::util;
use crate::wire::{put_u64, Reader};

pub const MAGIC: &[u8] = b"__PATCHIT__";

/// Format revision this build reads and writes. A patch carrying any other
/// value is rejected outright.
pub const COMPATIBILITY_VERSION: u64 = 0;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    instructions: Vec<Instruction>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the given instruction; insertion order is the application
    /// order.
    pub fn append(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        out.extend_from_slice(MAGIC);
        out.push(0);
        put_u64(&mut out, COMPATIBILITY_VERSION);
        put_u64(&mut out, self.instructions.len() as u64);

        for instruction in &self.instructions {
            let payload = instruction.to_payload()?;
            put_u64(&mut out, payload.len() as u64);
            out.push(instruction.signature().id());
            out.extend_from_slice(&payload);
        }

        Ok(out)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data);

        let head = r
            .read_exact(MAGIC.len(), "magic")
            .map_err(|_| PatchError::InvalidMagic)?;
        if head != MAGIC {
            return Err(PatchError::InvalidMagic);
        }
        let terminator = r
            .read_u8("magic terminator")
            .map_err(|_| PatchError::MissingMagicTerminator)?;
        if terminator != 0 {
            return Err(PatchError::MissingMagicTerminator);
        }

        let found = r.read_u64("compatibility version")?;
        if found != COMPATIBILITY_VERSION {
            return Err(PatchError::IncompatibleVersion {
                found,
                expected: COMPATIBILITY_VERSION,
            });
        }

        let count = r.read_u64("instruction count")?;

        let mut patch = Patch::new();
        for _ in 0..count {
            let len = r.read_u64("instruction length")?;
            let signature = InstructionSignature::from_id(r.read_u8("instruction signature")?)?;
            let len = usize::try_from(len).map_err(|_| PatchError::Truncated {
                what: "instruction payload",
                offset: r.offset(),
            })?;
            let payload = r.read_exact(len, "instruction payload")?;
            patch.append(Instruction::from_payload(signature, payload)?);
        }

        Ok(patch)
    }

    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        util::write_file(path, &self.to_bytes()?)
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let data = util::mmap_file(path)?;
        Self::from_bytes(&data)
    }

    /// Apply every instruction in stored order, stopping at the first
    /// failure. Instructions already applied stay applied; there is no
    /// rollback.
    pub fn apply(&self) -> Result<()> {
        for (index, instruction) in self.instructions.iter().enumerate() {
            instruction
                .apply()
                .map_err(|e| PatchError::InstructionFailed {
                    index,
                    source: Box::new(e),
                })?;
        }
        Ok(())
    }

    /// Render a read-only description of the patch. Level 0 prints counts
    /// only; 1 adds each instruction's kind; 2 adds target paths; 3 adds
    /// boolean flags.
    pub fn describe(&self, verbosity: u8) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "compatibility version: {COMPATIBILITY_VERSION}");
        let _ = writeln!(out, "contains: {} instructions", self.instructions.len());

        if verbosity < 1 {
            return out;
        }

        let _ = writeln!(out, "instructions:");
        for (i, instruction) in self.instructions.iter().enumerate() {
            let _ = writeln!(out, "  {}. {}", i + 1, instruction.kind_name());
            if verbosity < 2 {
                continue;
            }

            match instruction {
                Instruction::Modify(ins) => {
                    let _ = writeln!(out, "    target: {}", ins.target);
                    if verbosity >= 3 {
                        let mut flags = Vec::new();
                        if ins.create_subdirectories {
                            flags.push("create subdirectories");
                        }
                        if ins.create_empty_file_if_not_exists {
                            flags.push("create empty file if not exists");
                        }
                        let _ = writeln!(out, "    flags: {}", flags.join(", "));
                    }
                }
                Instruction::Move(ins) => {
                    let _ = writeln!(out, "    from: {}", ins.move_from);
                    let _ = writeln!(out, "    to: {}", ins.move_to);
                    if verbosity >= 3 {
                        let mut flags = Vec::new();
                        if ins.override_if_already_exists {
                            flags.push("override if already exists");
                        }
                        if ins.create_subdirectories {
                            flags.push("create subdirectories");
                        }
                        let _ = writeln!(out, "    flags: {}", flags.join(", "));
                    }
                }
                Instruction::Delete(ins) => {
                    let _ = writeln!(out, "    target: {}", ins.target);
                    if verbosity >= 3 {
                        let mut flags = Vec::new();
                        if ins.delete_recursively_if_directory {
                            flags.push("delete recursively if directory");
                        }
                        let _ = writeln!(out, "    flags: {}", flags.join(", "));
                    }
                }
            }
        }

        out
    }
}
