use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, OnceLock};

use tempfile::TempDir;
use walkdir::WalkDir;

use patchit::{
    create_patch, Compressor, DeleteInstruction, Diff, DiffSignature, Instruction,
    ModifyInstruction, MoveInstruction, Patch, PatchError,
};

// Applying a patch resolves instruction paths against the current
// directory, so tests that change it must not overlap.
static CWD_MUTEX: OnceLock<Mutex<()>> = OnceLock::new();

fn cwd_lock() -> MutexGuard<'static, ()> {
    CWD_MUTEX
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|e| e.into_inner())
}

struct CwdGuard {
    previous: PathBuf,
    _lock: MutexGuard<'static, ()>,
}

impl CwdGuard {
    fn enter(dir: &Path) -> Self {
        let lock = cwd_lock();
        let previous = std::env::current_dir().unwrap();
        std::env::set_current_dir(dir).unwrap();
        Self {
            previous,
            _lock: lock,
        }
    }
}

impl Drop for CwdGuard {
    fn drop(&mut self) {
        let _ = std::env::set_current_dir(&self.previous);
    }
}

fn write_file(root: &Path, relative: &str, contents: &[u8]) -> PathBuf {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, contents).unwrap();
    path
}

fn copy_dir(source: &Path, dest: &Path) {
    fs::create_dir_all(dest).unwrap();
    for entry in WalkDir::new(source).min_depth(1) {
        let entry = entry.unwrap();
        let relative = entry.path().strip_prefix(source).unwrap();
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).unwrap();
        } else {
            fs::copy(entry.path(), &target).unwrap();
        }
    }
}

/// Map of relative file path to contents, for whole-tree comparisons.
fn snapshot_files(root: &Path) -> BTreeMap<String, Vec<u8>> {
    let mut files = BTreeMap::new();
    for entry in WalkDir::new(root).min_depth(1) {
        let entry = entry.unwrap();
        if entry.file_type().is_file() {
            let relative = entry
                .path()
                .strip_prefix(root)
                .unwrap()
                .to_str()
                .unwrap()
                .replace('\\', "/");
            files.insert(relative, fs::read(entry.path()).unwrap());
        }
    }
    files
}

fn populate_old(old: &Path) {
    write_file(old, "unchanged.bin", b"never touched");
    write_file(old, "changed.txt", &vec![7u8; 10_000]);
    write_file(old, "renamed_from.dat", b"relocated but identical");
    write_file(old, "removed.tmp", b"should disappear");
    write_file(old, "doomed/nested/deep.bin", b"whole tree goes away");
}

fn populate_new(new: &Path) {
    write_file(new, "unchanged.bin", b"never touched");
    let mut changed = vec![7u8; 10_000];
    changed[5000..5100].fill(9);
    changed.extend_from_slice(b"appended tail");
    write_file(new, "changed.txt", &changed);
    write_file(new, "moved/renamed_to.dat", b"relocated but identical");
    write_file(new, "fresh/added.bin", b"brand new contents");
}

fn end_to_end(diff: DiffSignature, compressor: Compressor) {
    let dir = TempDir::new().unwrap();
    let old = dir.path().join("old");
    let new = dir.path().join("new");
    let target = dir.path().join("target");
    populate_old(&old);
    populate_new(&new);
    copy_dir(&old, &target);

    let (patch, summary) = create_patch(&old, &new, diff, compressor).unwrap();
    assert_eq!(summary.files_modified, 1);
    assert_eq!(summary.files_moved, 1);
    assert_eq!(summary.files_added, 1);

    // Round-trip through disk before applying, like the real tool does.
    let patch_file = dir.path().join("update.patchit");
    patch.write_to_file(&patch_file).unwrap();
    let loaded = Patch::load_from_file(&patch_file).unwrap();
    assert_eq!(loaded, patch);

    {
        let _cwd = CwdGuard::enter(&target);
        loaded.apply().unwrap();
    }

    assert_eq!(snapshot_files(&target), snapshot_files(&new));
    assert!(!target.join("doomed").exists());
}

#[test]
fn end_to_end_native_diff_plain() {
    end_to_end(DiffSignature::Native, Compressor::Plain);
}

#[test]
fn end_to_end_native_diff_zstd() {
    end_to_end(DiffSignature::Native, Compressor::Zstd);
}

#[test]
fn end_to_end_system_diff() {
    let available = |tool: &str| {
        std::process::Command::new(tool)
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    };
    if !available("diff") || !available("patch") {
        eprintln!("skipping: diff/patch not installed");
        return;
    }
    end_to_end(DiffSignature::System, Compressor::Zstd);
}

#[test]
fn end_to_end_kind_changes() {
    let dir = TempDir::new().unwrap();
    let old = dir.path().join("old");
    let new = dir.path().join("new");
    let target = dir.path().join("target");
    write_file(&old, "swap_to_dir", b"plain file today");
    write_file(&old, "swap_to_file/one.bin", b"first inner file");
    write_file(&old, "swap_to_file/nested/two.bin", b"second inner file");
    write_file(&old, "stable.bin", b"untouched");
    write_file(&new, "swap_to_dir/inner.bin", b"now inside a directory");
    write_file(&new, "swap_to_file", b"flattened to one file");
    write_file(&new, "stable.bin", b"untouched");
    copy_dir(&old, &target);

    let (patch, _) = create_patch(&old, &new, DiffSignature::Native, Compressor::Plain).unwrap();

    {
        let _cwd = CwdGuard::enter(&target);
        patch.apply().unwrap();
    }

    assert_eq!(snapshot_files(&target), snapshot_files(&new));
    assert!(target.join("swap_to_dir").is_dir());
    assert!(target.join("swap_to_file").is_file());
}

#[test]
fn modify_with_empty_diff_leaves_file_alone() {
    let dir = TempDir::new().unwrap();
    let file = write_file(dir.path(), "kept.bin", b"untouched");

    let instruction = Instruction::Modify(ModifyInstruction {
        create_subdirectories: false,
        create_empty_file_if_not_exists: false,
        target: file.to_str().unwrap().to_owned(),
        diff: Diff::empty(DiffSignature::Native),
        compressor: Compressor::Plain,
    });

    instruction.apply().unwrap();
    assert_eq!(fs::read(&file).unwrap(), b"untouched");
}

#[test]
fn modify_missing_target_fails() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("no/such/file.bin");

    let instruction = Instruction::Modify(ModifyInstruction {
        create_subdirectories: false,
        create_empty_file_if_not_exists: false,
        target: missing.to_str().unwrap().to_owned(),
        diff: Diff::empty(DiffSignature::Native),
        compressor: Compressor::Plain,
    });

    assert!(matches!(
        instruction.apply(),
        Err(PatchError::MissingTarget { .. })
    ));
}

#[test]
fn modify_creates_missing_file_empty_and_skips_diff() {
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("sub/created.bin");

    let instruction = Instruction::Modify(ModifyInstruction {
        create_subdirectories: true,
        create_empty_file_if_not_exists: true,
        target: target.to_str().unwrap().to_owned(),
        diff: Diff::new(DiffSignature::Native, vec![1, 2, 3]),
        compressor: Compressor::Plain,
    });

    instruction.apply().unwrap();
    // The file is created but the diff does not run against it.
    assert_eq!(fs::read(&target).unwrap(), b"");
}

#[test]
fn move_without_override_is_a_silent_noop() {
    let dir = TempDir::new().unwrap();
    let from = write_file(dir.path(), "from.bin", b"source contents");
    let to = write_file(dir.path(), "to.bin", b"already here");

    let instruction = Instruction::Move(MoveInstruction {
        override_if_already_exists: false,
        create_subdirectories: false,
        move_from: from.to_str().unwrap().to_owned(),
        move_to: to.to_str().unwrap().to_owned(),
    });

    instruction.apply().unwrap();
    assert_eq!(fs::read(&from).unwrap(), b"source contents");
    assert_eq!(fs::read(&to).unwrap(), b"already here");
}

#[test]
fn move_with_override_replaces_and_removes_source() {
    let dir = TempDir::new().unwrap();
    let from = write_file(dir.path(), "from.bin", b"source contents");
    let to = write_file(dir.path(), "to.bin", b"stale");

    let instruction = Instruction::Move(MoveInstruction {
        override_if_already_exists: true,
        create_subdirectories: false,
        move_from: from.to_str().unwrap().to_owned(),
        move_to: to.to_str().unwrap().to_owned(),
    });

    instruction.apply().unwrap();
    assert!(!from.exists());
    assert_eq!(fs::read(&to).unwrap(), b"source contents");
}

#[test]
fn move_missing_source_fails() {
    let dir = TempDir::new().unwrap();
    let instruction = Instruction::Move(MoveInstruction {
        override_if_already_exists: true,
        create_subdirectories: true,
        move_from: dir.path().join("absent.bin").to_str().unwrap().to_owned(),
        move_to: dir.path().join("dest.bin").to_str().unwrap().to_owned(),
    });
    assert!(matches!(
        instruction.apply(),
        Err(PatchError::MissingTarget { .. })
    ));
}

#[test]
fn delete_refuses_directory_without_recursive_flag() {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "victim/inner.bin", b"data");
    let victim = dir.path().join("victim");

    let instruction = Instruction::Delete(DeleteInstruction {
        delete_recursively_if_directory: false,
        target: victim.to_str().unwrap().to_owned(),
    });
    assert!(matches!(
        instruction.apply(),
        Err(PatchError::RefusedDirectoryDelete { .. })
    ));
    assert!(victim.exists());

    let instruction = Instruction::Delete(DeleteInstruction {
        delete_recursively_if_directory: true,
        target: victim.to_str().unwrap().to_owned(),
    });
    instruction.apply().unwrap();
    assert!(!victim.exists());
}

#[test]
fn delete_missing_target_fails() {
    let dir = TempDir::new().unwrap();
    let instruction = Instruction::Delete(DeleteInstruction {
        delete_recursively_if_directory: true,
        target: dir.path().join("gone.bin").to_str().unwrap().to_owned(),
    });
    assert!(matches!(
        instruction.apply(),
        Err(PatchError::MissingTarget { .. })
    ));
}

#[test]
fn apply_reports_the_failing_instruction_index() {
    let dir = TempDir::new().unwrap();
    let present = write_file(dir.path(), "present.bin", b"data");

    let mut patch = Patch::new();
    patch.append(Instruction::Delete(DeleteInstruction {
        delete_recursively_if_directory: false,
        target: present.to_str().unwrap().to_owned(),
    }));
    patch.append(Instruction::Delete(DeleteInstruction {
        delete_recursively_if_directory: false,
        target: dir.path().join("absent.bin").to_str().unwrap().to_owned(),
    }));

    match patch.apply() {
        Err(PatchError::InstructionFailed { index, source }) => {
            assert_eq!(index, 1);
            assert!(matches!(*source, PatchError::MissingTarget { .. }));
        }
        other => panic!("expected an instruction failure, got {other:?}"),
    }
    // The first instruction stays applied; there is no rollback.
    assert!(!present.exists());
}

#[test]
fn corrupted_patch_file_fails_to_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("patch.bin");

    let mut patch = Patch::new();
    patch.append(Instruction::Delete(DeleteInstruction {
        delete_recursively_if_directory: false,
        target: "whatever.bin".to_owned(),
    }));
    patch.write_to_file(&path).unwrap();

    let mut bytes = fs::read(&path).unwrap();
    bytes[0] ^= 0xFF;
    fs::write(&path, &bytes).unwrap();

    assert!(matches!(
        Patch::load_from_file(&path),
        Err(PatchError::InvalidMagic)
    ));
}

#[test]
fn truncated_patch_file_fails_to_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("patch.bin");

    let mut patch = Patch::new();
    patch.append(Instruction::Delete(DeleteInstruction {
        delete_recursively_if_directory: false,
        target: "whatever.bin".to_owned(),
    }));
    patch.write_to_file(&path).unwrap();

    let bytes = fs::read(&path).unwrap();
    fs::write(&path, &bytes[..bytes.len() - 1]).unwrap();

    assert!(Patch::load_from_file(&path).is_err());
}

#[test]
fn describe_survives_a_disk_round_trip() {
    let dir = TempDir::new().unwrap();
    let old = dir.path().join("old");
    let new = dir.path().join("new");
    populate_old(&old);
    populate_new(&new);

    let (patch, _) = create_patch(&old, &new, DiffSignature::Native, Compressor::Zstd).unwrap();
    let path = dir.path().join("patch.bin");
    patch.write_to_file(&path).unwrap();

    let report = Patch::load_from_file(&path).unwrap().describe(2);
    assert!(report.contains("entity relocation"));
    assert!(report.contains("changed.txt"));
    assert!(report.contains("doomed"));
}
