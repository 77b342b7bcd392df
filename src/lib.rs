//! A versioned binary patch container for directory trees.
//!
//! A patch file is an ordered list of filesystem instructions behind a
//! magic header. Three instruction kinds exist: relocate a file, delete an
//! entity, and modify a file's contents through a pluggable diff strategy.
//! Diff payloads are compressed independently with a per-instruction
//! compressor choice, and every signature byte in the format belongs to a
//! closed set, so an unrecognized byte is a hard load error rather than a
//! guess.

pub mod compressor;
pub mod create;
pub mod diff;
pub mod error;
pub mod instruction;
mod native_diff;
pub mod patch;
mod rolling_hash;
mod system_diff;
pub mod util;
mod wire;

pub use compressor::Compressor;
pub use create::{create_patch, CreateSummary};
pub use diff::{Diff, DiffSignature};
pub use error::{PatchError, Result};
pub use instruction::{
    DeleteInstruction, Instruction, InstructionSignature, ModifyInstruction, MoveInstruction,
};
pub use patch::{Patch, COMPATIBILITY_VERSION, MAGIC};
