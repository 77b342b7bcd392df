//! The three filesystem mutation instructions a patch can carry.
//!
//! Each instruction serializes to a payload-only byte string; the signature
//! byte tagging the kind is framed by the container, not by the instruction
//! itself. All embedded paths are NUL-terminated UTF-8.

use std::fs;
use std::io;
use std::path::Path;

use crate::compressor::Compressor;
use crate::diff::{Diff, DiffSignature};
use crate::error::{PatchError, Result};
use crate::util;
use crate::wire::{put_cstr, Reader};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstructionSignature {
    Move,
    Delete,
    Modify,
}

impl InstructionSignature {
    pub const fn id(self) -> u8 {
        match self {
            InstructionSignature::Move => 0,
            InstructionSignature::Delete => 1,
            InstructionSignature::Modify => 2,
        }
    }

    pub fn from_id(id: u8) -> Result<Self> {
        match id {
            0 => Ok(InstructionSignature::Move),
            1 => Ok(InstructionSignature::Delete),
            2 => Ok(InstructionSignature::Modify),
            other => Err(PatchError::UnknownInstructionSignature(other)),
        }
    }
}

/// Relocate a regular file by copying its contents and removing the source.
/// Not an atomic rename: a crash mid-move can leave both files present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveInstruction {
    pub override_if_already_exists: bool,
    pub create_subdirectories: bool,
    pub move_from: String,
    pub move_to: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteInstruction {
    pub delete_recursively_if_directory: bool,
    pub target: String,
}

/// Rewrite a file's contents by applying the owned diff. The compressor is
/// an explicit per-instruction choice consulted only while serializing the
/// diff; deserialization restores whichever one the stream was written with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifyInstruction {
    pub create_subdirectories: bool,
    pub create_empty_file_if_not_exists: bool,
    pub target: String,
    pub diff: Diff,
    pub compressor: Compressor,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    Move(MoveInstruction),
    Delete(DeleteInstruction),
    Modify(ModifyInstruction),
}

impl Instruction {
    pub fn signature(&self) -> InstructionSignature {
        match self {
            Instruction::Move(_) => InstructionSignature::Move,
            Instruction::Delete(_) => InstructionSignature::Delete,
            Instruction::Modify(_) => InstructionSignature::Modify,
        }
    }

    pub(crate) fn kind_name(&self) -> &'static str {
        match self {
            Instruction::Move(_) => "entity relocation",
            Instruction::Delete(_) => "entity deletion",
            Instruction::Modify(_) => "entity modification",
        }
    }

    pub fn to_payload(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        match self {
            Instruction::Move(ins) => {
                out.push(ins.override_if_already_exists as u8);
                out.push(ins.create_subdirectories as u8);
                put_cstr(&mut out, &ins.move_from);
                put_cstr(&mut out, &ins.move_to);
            }
            Instruction::Delete(ins) => {
                out.push(ins.delete_recursively_if_directory as u8);
                put_cstr(&mut out, &ins.target);
            }
            Instruction::Modify(ins) => {
                out.push(ins.diff.signature().id());
                put_cstr(&mut out, &ins.target);
                out.push(ins.create_subdirectories as u8);
                out.push(ins.create_empty_file_if_not_exists as u8);
                out.extend_from_slice(&ins.diff.to_bytes(ins.compressor)?);
            }
        }
        Ok(out)
    }

    pub fn from_payload(signature: InstructionSignature, payload: &[u8]) -> Result<Self> {
        let mut r = Reader::new(payload);
        match signature {
            InstructionSignature::Move => {
                let override_if_already_exists = r.read_u8("relocation flags")? != 0;
                let create_subdirectories = r.read_u8("relocation flags")? != 0;
                let move_from = r.read_cstr("relocation source path")?;
                let move_to = r.read_cstr("relocation destination path")?;
                Ok(Instruction::Move(MoveInstruction {
                    override_if_already_exists,
                    create_subdirectories,
                    move_from,
                    move_to,
                }))
            }
            InstructionSignature::Delete => {
                let delete_recursively_if_directory = r.read_u8("deletion flags")? != 0;
                let target = r.read_cstr("deletion target path")?;
                Ok(Instruction::Delete(DeleteInstruction {
                    delete_recursively_if_directory,
                    target,
                }))
            }
            InstructionSignature::Modify => {
                let diff_signature = DiffSignature::from_id(r.read_u8("diff signature")?)?;
                let target = r.read_cstr("modification target path")?;
                let create_subdirectories = r.read_u8("modification flags")? != 0;
                let create_empty_file_if_not_exists = r.read_u8("modification flags")? != 0;
                let (diff, compressor) = Diff::from_bytes(diff_signature, r.rest())?;
                Ok(Instruction::Modify(ModifyInstruction {
                    create_subdirectories,
                    create_empty_file_if_not_exists,
                    target,
                    diff,
                    compressor,
                }))
            }
        }
    }

    pub fn apply(&self) -> Result<()> {
        match self {
            Instruction::Move(ins) => ins.apply(),
            Instruction::Delete(ins) => ins.apply(),
            Instruction::Modify(ins) => ins.apply(),
        }
    }
}

/// Stat a path, turning "not found" into `None` instead of an error.
fn stat(path: &str) -> Result<Option<fs::Metadata>> {
    match fs::metadata(path) {
        Ok(meta) => Ok(Some(meta)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(PatchError::io(path, e)),
    }
}

#[cfg(unix)]
fn check_access(meta: &fs::Metadata, path: &str, write: bool) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mode = meta.permissions().mode();
    if mode & 0o400 == 0 {
        return Err(PatchError::PermissionMissing {
            path: path.to_owned(),
            access: "read",
        });
    }
    if write && mode & 0o200 == 0 {
        return Err(PatchError::PermissionMissing {
            path: path.to_owned(),
            access: "write",
        });
    }
    Ok(())
}

#[cfg(not(unix))]
fn check_access(meta: &fs::Metadata, path: &str, write: bool) -> Result<()> {
    if write && meta.permissions().readonly() {
        return Err(PatchError::PermissionMissing {
            path: path.to_owned(),
            access: "write",
        });
    }
    Ok(())
}

fn create_parent_dirs(path: &str) -> Result<()> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .map_err(|e| PatchError::io(parent.display().to_string(), e))?;
        }
    }
    Ok(())
}

impl MoveInstruction {
    pub fn apply(&self) -> Result<()> {
        let src_meta = stat(&self.move_from)?.ok_or_else(|| PatchError::MissingTarget {
            path: self.move_from.clone(),
        })?;
        if !src_meta.is_file() {
            return Err(PatchError::NotARegularFile {
                path: self.move_from.clone(),
            });
        }
        check_access(&src_meta, &self.move_from, false)?;

        let dest_exists = stat(&self.move_to)?.is_some();

        if !dest_exists && self.create_subdirectories {
            create_parent_dirs(&self.move_to)?;
        }

        if dest_exists && !self.override_if_already_exists {
            // Deliberate silent no-op: the destination is kept as-is.
            return Ok(());
        }

        let data = util::read_file(Path::new(&self.move_from))?;
        util::write_file(Path::new(&self.move_to), &data)?;
        fs::remove_file(&self.move_from).map_err(|e| PatchError::io(&self.move_from, e))
    }
}

impl DeleteInstruction {
    pub fn apply(&self) -> Result<()> {
        // A target that is already gone is a failure, not a tolerated state.
        let meta = stat(&self.target)?.ok_or_else(|| PatchError::MissingTarget {
            path: self.target.clone(),
        })?;

        if meta.is_dir() {
            if !self.delete_recursively_if_directory {
                return Err(PatchError::RefusedDirectoryDelete {
                    path: self.target.clone(),
                });
            }
            fs::remove_dir_all(&self.target).map_err(|e| PatchError::io(&self.target, e))
        } else {
            fs::remove_file(&self.target).map_err(|e| PatchError::io(&self.target, e))
        }
    }
}

impl ModifyInstruction {
    pub fn apply(&self) -> Result<()> {
        let meta = match stat(&self.target)? {
            Some(meta) => meta,
            None => {
                if self.create_subdirectories {
                    create_parent_dirs(&self.target)?;
                }
                if self.create_empty_file_if_not_exists {
                    fs::File::create(&self.target)
                        .map_err(|e| PatchError::io(&self.target, e))?;
                    // Creating the missing file and applying the diff are
                    // mutually exclusive outcomes: the fresh file stays empty.
                    return Ok(());
                }
                return Err(PatchError::MissingTarget {
                    path: self.target.clone(),
                });
            }
        };

        if !meta.is_file() {
            return Err(PatchError::NotARegularFile {
                path: self.target.clone(),
            });
        }
        check_access(&meta, &self.target, true)?;

        self.diff.apply_to(Path::new(&self.target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_move() -> Instruction {
        Instruction::Move(MoveInstruction {
            override_if_already_exists: true,
            create_subdirectories: false,
            move_from: "a/b/from.bin".to_owned(),
            move_to: "c/to.bin".to_owned(),
        })
    }

    fn sample_delete() -> Instruction {
        Instruction::Delete(DeleteInstruction {
            delete_recursively_if_directory: true,
            target: "some/dir".to_owned(),
        })
    }

    fn sample_modify(compressor: Compressor) -> Instruction {
        Instruction::Modify(ModifyInstruction {
            create_subdirectories: true,
            create_empty_file_if_not_exists: false,
            target: "lib/data.bin".to_owned(),
            diff: Diff::new(DiffSignature::Native, vec![1, 2, 3, 4, 5]),
            compressor,
        })
    }

    #[test]
    fn test_signature_ids_are_stable() {
        assert_eq!(InstructionSignature::Move.id(), 0);
        assert_eq!(InstructionSignature::Delete.id(), 1);
        assert_eq!(InstructionSignature::Modify.id(), 2);
        assert!(matches!(
            InstructionSignature::from_id(150),
            Err(PatchError::UnknownInstructionSignature(150))
        ));
    }

    #[test]
    fn test_payload_round_trips() {
        let samples = [
            sample_move(),
            sample_delete(),
            sample_modify(Compressor::Plain),
            sample_modify(Compressor::Zstd),
        ];
        for ins in samples {
            let payload = ins.to_payload().unwrap();
            let restored = Instruction::from_payload(ins.signature(), &payload).unwrap();
            assert_eq!(restored, ins);
        }
    }

    #[test]
    fn test_move_payload_layout() {
        let payload = sample_move().to_payload().unwrap();
        assert_eq!(payload[0], 1); // override flag
        assert_eq!(payload[1], 0); // create_subdirectories flag
        assert_eq!(&payload[2..], b"a/b/from.bin\0c/to.bin\0");
    }

    #[test]
    fn test_modify_payload_layout() {
        let payload = sample_modify(Compressor::Plain).to_payload().unwrap();
        assert_eq!(payload[0], DiffSignature::Native.id());
        assert_eq!(&payload[1..14], b"lib/data.bin\0");
        assert_eq!(payload[14], 1); // create_subdirectories
        assert_eq!(payload[15], 0); // create_empty_file_if_not_exists
        assert_eq!(payload[16], Compressor::Plain.id());
        assert_eq!(&payload[17..], &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_missing_nul_terminator_rejected() {
        // Delete payload whose target never terminates.
        let payload = [1u8, b'x', b'y', b'z'];
        assert!(matches!(
            Instruction::from_payload(InstructionSignature::Delete, &payload),
            Err(PatchError::CorruptedInstruction(_))
        ));
    }

    #[test]
    fn test_move_missing_second_string_rejected() {
        let payload = [0u8, 0, b'a', 0, b'b'];
        assert!(matches!(
            Instruction::from_payload(InstructionSignature::Move, &payload),
            Err(PatchError::CorruptedInstruction(_))
        ));
    }

    #[test]
    fn test_modify_unknown_diff_signature_rejected() {
        let payload = [99u8, b'f', 0, 0, 0, 0];
        assert!(matches!(
            Instruction::from_payload(InstructionSignature::Modify, &payload),
            Err(PatchError::UnknownDiffSignature(99))
        ));
    }

    #[test]
    fn test_modify_missing_flags_rejected() {
        let payload = [DiffSignature::Native.id(), b'f', 0];
        assert!(matches!(
            Instruction::from_payload(InstructionSignature::Modify, &payload),
            Err(PatchError::Truncated { .. })
        ));
    }

    #[test]
    fn test_empty_move_payload_rejected() {
        assert!(Instruction::from_payload(InstructionSignature::Move, &[]).is_err());
    }
}
