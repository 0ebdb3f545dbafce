//! Zip creation and extraction.
//!
//! Archives are built in memory with entries stored as plaintext, then the
//! whole archive is sealed as one envelope when written to disk. Extraction
//! reverses this and re-encrypts each entry for the current instance.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Cursor, Read, Write};
use std::path::{Component, Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::config::MAX_COMPRESSION_LEVEL;
use crate::error::{EngineError, IoResultExt, Result};
use crate::files::listing::{self, FolderListing};
use crate::files::naming::{unique_path, ItemKind};
use crate::files::operations::Batch;
use crate::files::transfer::write_atomic;
use crate::registry::Instance;

/// Base name used when the requested archive name is empty.
const DEFAULT_ARCHIVE_NAME: &str = "archive";

/// A file queued for the archive.
#[derive(Debug)]
struct PendingEntry {
    key: String,
    path: PathBuf,
}

fn zip_error(context: impl Into<String>, e: zip::result::ZipError) -> EngineError {
    EngineError::io(context, io::Error::from(e))
}

/// Archive name with leading separators and a trailing `.zip` removed.
fn archive_base_name(requested: &str) -> String {
    let trimmed = requested.trim().trim_start_matches(['/', '\\']);
    let trimmed = match trimmed.len().checked_sub(4) {
        Some(cut)
            if trimmed.is_char_boundary(cut) && trimmed[cut..].eq_ignore_ascii_case(".zip") =>
        {
            &trimmed[..cut]
        }
        _ => trimmed,
    };
    let last = trimmed
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or("")
        .trim();
    if last.is_empty() || last == "." || last == ".." {
        DEFAULT_ARCHIVE_NAME.to_string()
    } else {
        last.to_string()
    }
}

/// `/`-separated entry key for `path` relative to `base`.
fn entry_key(base: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(base).ok()?;
    let parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

// ============================================================================
// Zip
// ============================================================================

/// Compress `items` into a new archive inside the folder at `path`.
///
/// Folders contribute every file beneath them, keyed relative to the
/// folder's parent; selected files are keyed by their bare name.
pub fn zip(
    instance: &Instance,
    path: &str,
    items: &[String],
    file_name: &str,
) -> Result<FolderListing> {
    instance.quota().ensure_not_full()?;
    instance.sandbox().ensure_root()?;

    let dest_dir = instance.sandbox().resolve_dir_or_root(path);
    let target = unique_path(
        &dest_dir,
        &format!("{}.zip", archive_base_name(file_name)),
        ItemKind::File,
    );

    let mut entries = Vec::new();
    let mut batch = Batch::new(instance.config().batch_policy);
    for item in items {
        batch.run(item, || collect_entries(instance, item, &mut entries))?;
    }
    batch.finish()?;

    let codec = instance.codec();
    let mut total: u64 = 0;
    for entry in &entries {
        total += codec
            .plaintext_len(&entry.path)
            .op_context(|| format!("inspect {}", entry.path.display()))?;
    }
    instance.quota().ensure_compressible(total)?;
    instance.quota().ensure_room_for(total)?;

    let archive = build_archive(instance, &entries)?;
    let sealed = codec
        .encrypt_bytes(&archive)
        .op_context(|| format!("encrypt {}", target.display()))?;
    write_atomic(&target, |out| out.write_all(&sealed))?;

    info!(
        instance = instance.id(),
        archive = %instance.sandbox().to_virtual(&target),
        entries = entries.len(),
        bytes = total,
        "Created archive"
    );
    listing::list(instance, path)
}

fn collect_entries(instance: &Instance, item: &str, entries: &mut Vec<PendingEntry>) -> Result<()> {
    let physical = instance.sandbox().resolve_existing(item)?;

    if !physical.is_dir() {
        let key = physical
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| EngineError::NotFound(item.to_string()))?;
        entries.push(PendingEntry {
            key,
            path: physical,
        });
        return Ok(());
    }

    let root = instance.sandbox().root();
    let base = match physical.parent() {
        Some(parent) if physical != root => parent.to_path_buf(),
        _ => physical.clone(),
    };
    for entry in WalkDir::new(&physical).follow_links(false).sort_by_file_name() {
        let entry =
            entry.map_err(|e| EngineError::io(format!("walk {}", physical.display()), e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(key) = entry_key(&base, entry.path()) {
            entries.push(PendingEntry {
                key,
                path: entry.into_path(),
            });
        }
    }
    Ok(())
}

fn build_archive(instance: &Instance, entries: &[PendingEntry]) -> Result<Vec<u8>> {
    let level = instance.config().compression_level.min(MAX_COMPRESSION_LEVEL) as i32;
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(level));

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let mut seen = HashSet::new();
    for entry in entries {
        if !seen.insert(entry.key.as_str()) {
            warn!(key = %entry.key, "Duplicate archive entry skipped");
            continue;
        }
        let file = File::open(&entry.path).op_context(|| format!("open {}", entry.path.display()))?;
        let mut reader = instance
            .codec()
            .decrypt_stream(file)
            .op_context(|| format!("read {}", entry.path.display()))?;

        writer
            .start_file(entry.key.as_str(), options)
            .map_err(|e| zip_error(format!("add {}", entry.key), e))?;
        io::copy(&mut reader, &mut writer)
            .op_context(|| format!("compress {}", entry.path.display()))?;
        debug!(key = %entry.key, "Added archive entry");
    }

    let cursor = writer
        .finish()
        .map_err(|e| zip_error("finish archive", e))?;
    Ok(cursor.into_inner())
}

// ============================================================================
// Unzip
// ============================================================================

/// Extract each archive in `items` into the folder at `path`.
///
/// Existing files are overwritten. Entries whose names would escape the
/// destination are skipped.
pub fn unzip(instance: &Instance, path: &str, items: &[String]) -> Result<FolderListing> {
    instance.sandbox().ensure_root()?;
    let dest_dir = instance.sandbox().resolve_dir_or_root(path);

    let mut batch = Batch::new(instance.config().batch_policy);
    for item in items {
        batch.run(item, || extract(instance, item, &dest_dir))?;
    }
    batch.finish()?;

    listing::list(instance, path)
}

fn extract(instance: &Instance, item: &str, dest_dir: &Path) -> Result<()> {
    let archive_path = instance.sandbox().resolve_file(item)?;
    let on_disk = fs::metadata(&archive_path)
        .op_context(|| format!("inspect {}", archive_path.display()))?
        .len();
    instance.quota().ensure_compressible(on_disk)?;
    instance.quota().ensure_room_for(on_disk)?;

    let sealed = fs::read(&archive_path).op_context(|| format!("read {}", archive_path.display()))?;
    let codec = instance.codec();
    let plain = codec
        .decrypt_bytes(&sealed)
        .op_context(|| format!("decrypt {}", archive_path.display()))?;
    let mut archive = ZipArchive::new(Cursor::new(plain))
        .map_err(|e| zip_error(format!("open archive {item}"), e))?;

    let mut extracted = 0usize;
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| zip_error(format!("read archive {item}"), e))?;
        if entry.is_dir() {
            continue;
        }
        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
            warn!(archive = item, entry = entry.name(), "Skipping entry outside destination");
            continue;
        };

        let target = dest_dir.join(&relative);
        let parent = target.parent().unwrap_or(dest_dir);
        fs::create_dir_all(parent).op_context(|| format!("create folder {}", parent.display()))?;
        let canonical_parent =
            fs::canonicalize(parent).op_context(|| format!("resolve {}", parent.display()))?;
        if !instance.sandbox().contains(&canonical_parent) {
            warn!(archive = item, entry = entry.name(), "Skipping entry outside root");
            continue;
        }

        let mut content = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut content)
            .op_context(|| format!("extract {}", entry.name()))?;
        let sealed = codec
            .encrypt_bytes(&content)
            .op_context(|| format!("encrypt {}", target.display()))?;
        write_atomic(&target, |out| out.write_all(&sealed))?;
        extracted += 1;
    }

    info!(
        instance = instance.id(),
        archive = item,
        to = %instance.sandbox().to_virtual(dest_dir),
        entries = extracted,
        "Extracted archive"
    );
    Ok(())
}
