use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Instant;

use patchit::{create_patch, util, Compressor, DiffSignature, Patch};

#[derive(Parser)]
#[command(name = "patchit", about = "Binary patch creator and applier")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DiffKind {
    /// Built-in block-matching diff
    Native,
    /// Delegate to the system `diff` and `patch` tools
    System,
}

impl From<DiffKind> for DiffSignature {
    fn from(kind: DiffKind) -> Self {
        match kind {
            DiffKind::Native => DiffSignature::Native,
            DiffKind::System => DiffSignature::System,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CompressKind {
    /// Store diff payloads uncompressed
    None,
    /// Compress diff payloads with zstd
    Zstd,
}

impl From<CompressKind> for Compressor {
    fn from(kind: CompressKind) -> Self {
        match kind {
            CompressKind::None => Compressor::Plain,
            CompressKind::Zstd => Compressor::Zstd,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create a patch by comparing old and new directories
    Create {
        /// Path to the old (original) directory
        #[arg(long)]
        old: PathBuf,
        /// Path to the new (updated) directory
        #[arg(long)]
        new: PathBuf,
        /// Output path for the patch file
        #[arg(long, short)]
        output: PathBuf,
        /// Diff strategy for modified files
        #[arg(long, value_enum, default_value_t = DiffKind::Native)]
        diff: DiffKind,
        /// Compression for diff payloads
        #[arg(long, value_enum, default_value_t = CompressKind::Zstd)]
        compress: CompressKind,
    },
    /// Apply a patch to a target directory
    Apply {
        /// Path to the target directory to patch
        #[arg(long)]
        target: PathBuf,
        /// Path to the patch file
        #[arg(long, short)]
        patch: PathBuf,
    },
    /// Print what a patch file contains without applying it
    Inspect {
        /// Path to the patch file
        patch: PathBuf,
        /// Increase detail (-v kinds, -vv paths, -vvv flags)
        #[arg(short, action = clap::ArgAction::Count)]
        verbose: u8,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Create {
            old,
            new,
            output,
            diff,
            compress,
        } => {
            println!("Creating patch...");
            println!("  Old: {}", old.display());
            println!("  New: {}", new.display());
            println!("  Output: {}", output.display());

            let start = Instant::now();
            let (patch, summary) = create_patch(&old, &new, diff.into(), compress.into())?;
            patch.write_to_file(&output)?;
            let elapsed = start.elapsed();
            let written = std::fs::metadata(&output)?.len();

            println!("\nPatch created successfully!");
            println!("  Files moved: {}", summary.files_moved);
            println!("  Files added: {}", summary.files_added);
            println!("  Files modified: {}", summary.files_modified);
            println!("  Files deleted: {}", summary.files_deleted);
            println!("  Directories deleted: {}", summary.dirs_deleted);
            println!("  Patch size: {}", util::shorten_size(written));
            println!("  Time elapsed: {:.3}s", elapsed.as_secs_f64());
        }
        Commands::Apply { target, patch } => {
            println!("Applying patch...");
            println!("  Target: {}", target.display());
            println!("  Patch: {}", patch.display());

            let start = Instant::now();
            let loaded = Patch::load_from_file(&patch)?;
            std::env::set_current_dir(&target)?;
            loaded.apply()?;
            let elapsed = start.elapsed();

            println!("\nPatch applied successfully!");
            println!("  Instructions applied: {}", loaded.len());
            println!("  Time elapsed: {:.3}s", elapsed.as_secs_f64());
        }
        Commands::Inspect { patch, verbose } => {
            let loaded = Patch::load_from_file(&patch)?;
            print!("{}", loaded.describe(verbose));
        }
    }

    Ok(())
}
