//! Mutating file operations: create, delete, rename, copy, move,
//! encrypt/decrypt in place, and edit.
//!
//! Every operation that returns a listing re-reads the target folder once
//! it is done, so callers always get a fresh view rather than a delta.
//! Multi-item operations follow the instance's [`BatchPolicy`].

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::BatchPolicy;
use crate::error::{EngineError, IoResultExt, Result};
use crate::files::listing::{self, FolderListing};
use crate::files::naming::{sanitize_name, split_extension, unique_name, unique_path, ItemKind};
use crate::files::transfer::write_atomic;
use crate::registry::Instance;

// ============================================================================
// Batch handling
// ============================================================================

/// Tracks failures across the items of a multi-item operation.
pub(crate) struct Batch {
    policy: BatchPolicy,
    last_error: Option<EngineError>,
    failures: usize,
}

impl Batch {
    pub(crate) fn new(policy: BatchPolicy) -> Self {
        Self {
            policy,
            last_error: None,
            failures: 0,
        }
    }

    /// Run one item. Under `Stop` the first failure is returned; under
    /// `Continue` it is remembered and processing goes on.
    pub(crate) fn run<F>(&mut self, item: &str, op: F) -> Result<()>
    where
        F: FnOnce() -> Result<()>,
    {
        match op() {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(item, error = %e, "Item failed");
                self.failures += 1;
                match self.policy {
                    BatchPolicy::Stop => Err(e),
                    BatchPolicy::Continue => {
                        self.last_error = Some(e);
                        Ok(())
                    }
                }
            }
        }
    }

    /// Report the last failure, if any.
    pub(crate) fn finish(self) -> Result<()> {
        match self.last_error {
            Some(e) => {
                debug!(failures = self.failures, "Batch finished with failures");
                Err(e)
            }
            None => Ok(()),
        }
    }
}

fn refuse(context: impl Into<String>) -> EngineError {
    EngineError::OperationFailed {
        context: context.into(),
        source: io::Error::new(io::ErrorKind::InvalidInput, "operation refused"),
    }
}

/// Whether two physical paths name the same item.
fn same_path(a: &Path, b: &Path) -> bool {
    if cfg!(any(windows, target_os = "macos")) {
        a.to_string_lossy().to_lowercase() == b.to_string_lossy().to_lowercase()
    } else {
        a == b
    }
}

fn item_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| EngineError::InvalidName(path.display().to_string()))
}

// ============================================================================
// New items
// ============================================================================

/// Create a folder named `name` inside `path`, resolving collisions.
pub fn new_folder(instance: &Instance, path: &str, name: &str) -> Result<FolderListing> {
    instance.sandbox().ensure_root()?;
    let name = sanitize_name(name)?;
    let dir = instance.sandbox().resolve_dir_or_root(path);
    let target = unique_path(&dir, &name, ItemKind::Dir);

    fs::create_dir(&target).op_context(|| format!("create folder {}", target.display()))?;
    info!(instance = instance.id(), folder = %instance.sandbox().to_virtual(&target), "Created folder");

    listing::list(instance, path)
}

/// Create an empty file named `name` inside `path`, resolving collisions.
pub fn new_file(instance: &Instance, path: &str, name: &str) -> Result<FolderListing> {
    instance.sandbox().ensure_root()?;
    let name = sanitize_name(name)?;
    let dir = instance.sandbox().resolve_dir_or_root(path);
    let target = unique_path(&dir, &name, ItemKind::File);

    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&target)
        .op_context(|| format!("create file {}", target.display()))?;
    info!(instance = instance.id(), file = %instance.sandbox().to_virtual(&target), "Created file");

    listing::list(instance, path)
}

// ============================================================================
// Delete
// ============================================================================

/// Delete items, moving them to the recycle bin when it is enabled.
///
/// Items already inside the recycle bin, and the bin itself, are removed
/// permanently. The root can never be deleted.
pub fn delete(instance: &Instance, path: &str, items: &[String]) -> Result<FolderListing> {
    instance.sandbox().ensure_root()?;
    let bin = instance.recycle_bin();
    let use_bin = instance.config().use_recycle_bin;
    if use_bin && !bin.exists() {
        fs::create_dir_all(&bin).op_context(|| format!("create recycle bin {}", bin.display()))?;
        debug!(instance = instance.id(), "Created recycle bin");
    }

    let mut batch = Batch::new(instance.config().batch_policy);
    for item in items {
        batch.run(item, || delete_item(instance, item, use_bin.then_some(bin.as_path())))?;
    }
    batch.finish()?;

    listing::list(instance, path)
}

fn delete_item(instance: &Instance, item: &str, bin: Option<&Path>) -> Result<()> {
    let physical = instance.sandbox().resolve_item(item)?;
    if same_path(&physical, instance.sandbox().root()) {
        return Err(refuse("the root folder cannot be deleted"));
    }

    match bin {
        Some(bin) if !physical.starts_with(bin) => {
            let name = item_name(&physical)?;
            let target = unique_path(bin, &name, ItemKind::of(&physical));
            move_item(&physical, &target)?;
            info!(
                instance = instance.id(),
                item,
                to = %instance.sandbox().to_virtual(&target),
                "Moved to recycle bin"
            );
        }
        _ => {
            remove_item(&physical)?;
            info!(instance = instance.id(), item, "Deleted permanently");
        }
    }
    Ok(())
}

/// Remove a file or a directory tree.
pub(crate) fn remove_item(path: &Path) -> Result<()> {
    let meta = fs::symlink_metadata(path).op_context(|| format!("inspect {}", path.display()))?;
    if meta.is_dir() {
        remove_tree(path)
    } else {
        fs::remove_file(path).op_context(|| format!("delete {}", path.display()))
    }
}

/// Remove a directory tree with an explicit work-list.
///
/// Files are removed while walking; directories are collected in visit
/// order and removed deepest-first afterwards. Symlinks are unlinked, not
/// followed.
fn remove_tree(root: &Path) -> Result<()> {
    let mut pending = vec![root.to_path_buf()];
    let mut visited: Vec<PathBuf> = Vec::new();

    while let Some(dir) = pending.pop() {
        let entries =
            fs::read_dir(&dir).op_context(|| format!("read directory {}", dir.display()))?;
        for entry in entries {
            let entry = entry.op_context(|| format!("read directory {}", dir.display()))?;
            let path = entry.path();
            let file_type = entry
                .file_type()
                .op_context(|| format!("inspect {}", path.display()))?;
            if file_type.is_dir() {
                pending.push(path);
            } else {
                fs::remove_file(&path).op_context(|| format!("delete {}", path.display()))?;
            }
        }
        visited.push(dir);
    }

    for dir in visited.iter().rev() {
        fs::remove_dir(dir).op_context(|| format!("delete folder {}", dir.display()))?;
    }
    Ok(())
}

// ============================================================================
// Rename
// ============================================================================

/// Rename each item to `new_name` within its own folder.
///
/// Renaming to the current name is a no-op. A file keeps its extension
/// when the new name has none.
pub fn rename(
    instance: &Instance,
    path: &str,
    items: &[String],
    new_name: &str,
) -> Result<FolderListing> {
    instance.sandbox().ensure_root()?;
    let new_name = sanitize_name(new_name)?;

    let mut batch = Batch::new(instance.config().batch_policy);
    for item in items {
        batch.run(item, || rename_item(instance, item, &new_name))?;
    }
    batch.finish()?;

    listing::list(instance, path)
}

fn rename_item(instance: &Instance, item: &str, new_name: &str) -> Result<()> {
    let physical = instance.sandbox().resolve_item(item)?;
    let parent = match physical.parent() {
        Some(parent) if !same_path(&physical, instance.sandbox().root()) => parent,
        _ => return Err(refuse("the root folder cannot be renamed")),
    };

    let kind = ItemKind::of(&physical);
    let target_name = match kind {
        ItemKind::Dir => new_name.to_string(),
        ItemKind::File => {
            let (_, new_ext) = split_extension(new_name);
            if new_ext.is_empty() {
                let old_name = item_name(&physical)?;
                let (_, old_ext) = split_extension(&old_name);
                format!("{new_name}{old_ext}")
            } else {
                new_name.to_string()
            }
        }
    };

    let target = parent.join(&target_name);
    if target == physical {
        debug!(item, "Rename to the same name, nothing to do");
        return Ok(());
    }

    // A case-only rename on a case-insensitive filesystem collides with itself.
    let target = if same_path(&target, &physical) {
        target
    } else {
        let name = unique_name(&target_name, kind, |candidate| {
            parent.join(candidate).symlink_metadata().is_ok()
        });
        parent.join(name)
    };

    fs::rename(&physical, &target).op_context(|| {
        format!("rename {} to {}", physical.display(), target.display())
    })?;
    info!(
        instance = instance.id(),
        item,
        to = %instance.sandbox().to_virtual(&target),
        "Renamed"
    );
    Ok(())
}

// ============================================================================
// Copy and cut
// ============================================================================

/// Whether items are duplicated or moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    Copy,
    Cut,
}

/// Copy items into the folder at `path`, resolving collisions.
pub fn copy(instance: &Instance, path: &str, items: &[String]) -> Result<FolderListing> {
    transfer_items(instance, path, items, TransferMode::Copy)
}

/// Move items into the folder at `path`, resolving collisions.
pub fn cut(instance: &Instance, path: &str, items: &[String]) -> Result<FolderListing> {
    transfer_items(instance, path, items, TransferMode::Cut)
}

fn transfer_items(
    instance: &Instance,
    path: &str,
    items: &[String],
    mode: TransferMode,
) -> Result<FolderListing> {
    instance.sandbox().ensure_root()?;
    let dest_dir = instance.sandbox().resolve_dir_or_root(path);

    let mut batch = Batch::new(instance.config().batch_policy);
    for item in items {
        batch.run(item, || transfer_item(instance, item, &dest_dir, mode))?;
    }
    batch.finish()?;

    listing::list(instance, path)
}

fn transfer_item(instance: &Instance, item: &str, dest_dir: &Path, mode: TransferMode) -> Result<()> {
    let source = instance.sandbox().resolve_item(item)?;
    if same_path(&source, instance.sandbox().root()) {
        return Err(refuse("the root folder cannot be copied or moved"));
    }

    let name = item_name(&source)?;
    let direct = dest_dir.join(&name);
    if mode == TransferMode::Cut && same_path(&direct, &source) {
        debug!(item, "Source and destination are the same, nothing to do");
        return Ok(());
    }

    let kind = ItemKind::of(&source);
    if kind == ItemKind::Dir && dest_dir.starts_with(&source) {
        return Err(refuse(format!(
            "cannot place folder {} inside itself",
            source.display()
        )));
    }

    let target = unique_path(dest_dir, &name, kind);
    match (mode, kind) {
        (TransferMode::Copy, ItemKind::File) => copy_file(&source, &target, is_symlink(&source))?,
        (TransferMode::Copy, ItemKind::Dir) => copy_tree(&source, &target)?,
        (TransferMode::Cut, _) => move_item(&source, &target)?,
    }

    info!(
        instance = instance.id(),
        item,
        to = %instance.sandbox().to_virtual(&target),
        mode = ?mode,
        "Transferred"
    );
    Ok(())
}

/// Move a file, symlink or directory to `target`, which must not exist.
///
/// Files and links are renamed, falling back to copy and delete across
/// devices. Directories are copied in full and the original removed
/// afterwards; if that removal fails the copy is kept and a distinct error
/// returned.
pub(crate) fn move_item(source: &Path, target: &Path) -> Result<()> {
    let file_type = fs::symlink_metadata(source)
        .op_context(|| format!("inspect {}", source.display()))?
        .file_type();
    if file_type.is_dir() {
        copy_tree(source, target)?;
        return remove_tree(source).map_err(original_kept);
    }

    if let Err(e) = fs::rename(source, target) {
        debug!(error = %e, "Rename failed, falling back to copy");
        copy_file(source, target, file_type.is_symlink())?;
        fs::remove_file(source)
            .op_context(|| format!("delete original file after move {}", source.display()))?;
    }
    Ok(())
}

/// Mark a failure to remove the original folder once its copy is complete.
fn original_kept(error: EngineError) -> EngineError {
    match error {
        EngineError::OperationFailed { context, source } => EngineError::OperationFailed {
            context: format!("delete original folder after move ({context})"),
            source,
        },
        other => other,
    }
}

/// Copy a directory tree byte-for-byte with an explicit work-list.
///
/// Destination directories are created as they are reached. Symlinks are
/// recreated pointing at the same target; other special files are skipped.
pub(crate) fn copy_tree(source: &Path, target: &Path) -> Result<()> {
    let mut pending = vec![(source.to_path_buf(), target.to_path_buf())];

    while let Some((src_dir, dst_dir)) = pending.pop() {
        fs::create_dir_all(&dst_dir)
            .op_context(|| format!("create folder {}", dst_dir.display()))?;

        let entries =
            fs::read_dir(&src_dir).op_context(|| format!("read directory {}", src_dir.display()))?;
        for entry in entries {
            let entry = entry.op_context(|| format!("read directory {}", src_dir.display()))?;
            let from = entry.path();
            let to = dst_dir.join(entry.file_name());
            let file_type = entry
                .file_type()
                .op_context(|| format!("inspect {}", from.display()))?;

            if file_type.is_dir() {
                pending.push((from, to));
            } else if file_type.is_file() || file_type.is_symlink() {
                copy_file(&from, &to, file_type.is_symlink())?;
            } else {
                warn!(path = %from.display(), "Skipping special file during copy");
            }
        }
    }
    Ok(())
}

fn is_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok_and(|meta| meta.file_type().is_symlink())
}

/// Copy one file, or recreate a symlink as a link rather than its content.
fn copy_file(from: &Path, to: &Path, link: bool) -> Result<()> {
    if link {
        return copy_link(from, to);
    }
    fs::copy(from, to)
        .map(|_| ())
        .op_context(|| format!("copy {} to {}", from.display(), to.display()))
}

#[cfg(unix)]
fn copy_link(from: &Path, to: &Path) -> Result<()> {
    let target = fs::read_link(from).op_context(|| format!("read link {}", from.display()))?;
    std::os::unix::fs::symlink(&target, to)
        .op_context(|| format!("link {} to {}", to.display(), target.display()))
}

#[cfg(windows)]
fn copy_link(from: &Path, to: &Path) -> Result<()> {
    use std::os::windows::fs::{symlink_dir, symlink_file};

    let target = fs::read_link(from).op_context(|| format!("read link {}", from.display()))?;
    let made = if from.is_dir() {
        symlink_dir(&target, to)
    } else {
        symlink_file(&target, to)
    };
    made.op_context(|| format!("link {} to {}", to.display(), target.display()))
}

#[cfg(not(any(unix, windows)))]
fn copy_link(from: &Path, _to: &Path) -> Result<()> {
    Err(refuse(format!("cannot copy symlink {}", from.display())))
}

// ============================================================================
// Encrypt / decrypt in place
// ============================================================================

/// Which state files should end up in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    Encrypt,
    Decrypt,
}

/// Encrypt every file in `items`, recursing into folders.
pub fn encrypt(instance: &Instance, path: &str, items: &[String]) -> Result<FolderListing> {
    transform_items(instance, path, items, Transform::Encrypt)
}

/// Decrypt every file in `items`, recursing into folders.
pub fn decrypt(instance: &Instance, path: &str, items: &[String]) -> Result<FolderListing> {
    transform_items(instance, path, items, Transform::Decrypt)
}

fn transform_items(
    instance: &Instance,
    path: &str,
    items: &[String],
    transform: Transform,
) -> Result<FolderListing> {
    instance.quota().ensure_not_full()?;
    instance.sandbox().ensure_root()?;

    let mut batch = Batch::new(instance.config().batch_policy);
    for item in items {
        batch.run(item, || {
            let physical = instance.sandbox().resolve_existing(item)?;
            if physical.is_dir() {
                for entry in WalkDir::new(&physical).follow_links(false) {
                    let entry = entry.map_err(|e| {
                        EngineError::io(format!("walk {}", physical.display()), e.into())
                    })?;
                    if entry.file_type().is_file() {
                        transform_file(instance, entry.path(), transform)?;
                    }
                }
                Ok(())
            } else {
                transform_file(instance, &physical, transform).map(|_| ())
            }
        })?;
    }
    batch.finish()?;

    listing::list(instance, path)
}

/// Rewrite one file in the requested state. Returns whether it changed.
fn transform_file(instance: &Instance, path: &Path, transform: Transform) -> Result<bool> {
    let codec = instance.codec();
    let source = File::open(path).op_context(|| format!("open {}", path.display()))?;
    let mut reader = match transform {
        Transform::Encrypt => codec.encrypt_stream(source),
        Transform::Decrypt => codec.decrypt_stream(source),
    }
    .op_context(|| format!("read {}", path.display()))?;

    if !reader.is_transforming() {
        debug!(path = %path.display(), ?transform, "Already in requested state");
        return Ok(false);
    }

    write_atomic(path, |out| io::copy(&mut reader, out).map(|_| ()))?;
    info!(
        instance = instance.id(),
        file = %instance.sandbox().to_virtual(path),
        ?transform,
        "Rewrote file"
    );
    Ok(true)
}

// ============================================================================
// Edit
// ============================================================================

/// Replace the content of a text file, encrypting per the instance setting.
pub fn edit(instance: &Instance, file_path: &str, content: &str) -> Result<()> {
    instance.quota().ensure_room_for(content.len() as u64)?;
    instance.sandbox().ensure_root()?;
    let path = instance.sandbox().resolve_file(file_path)?;

    let codec = instance.codec();
    let encrypted = codec
        .is_encrypted_file(&path)
        .op_context(|| format!("read {}", path.display()))?;
    if encrypted && !codec.is_enabled() {
        return Err(EngineError::EncryptedConflict);
    }

    let mut reader = codec
        .encrypt_stream(content.as_bytes())
        .op_context(|| format!("encrypt {}", path.display()))?;
    write_atomic(&path, |out| io::copy(&mut reader, out).map(|_| ()))?;
    info!(
        instance = instance.id(),
        file = file_path,
        bytes = content.len(),
        "Edited file"
    );
    Ok(())
}
