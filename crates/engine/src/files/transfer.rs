//! Byte-serving, upload and atomic file writes.
//!
//! Downloads hand out a reader over the decrypted content that owns the
//! file handle, so the handle is released when the consumer drops it.
//! Uploads and every in-place rewrite go through [`write_atomic`], which
//! writes a temporary sibling and renames it over the target.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, Cursor, Read, Write};
use std::path::Path;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{EngineError, IoResultExt, Result};
use crate::files::naming::{sanitize_name, split_extension};
use crate::files::quota::BYTES_PER_MB;
use crate::registry::Instance;

/// Extensions served inline by `preview`.
const IMAGE_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "webp", "gif", "svg", "apng", "avif", "ico", "bmp", "tif", "tiff",
];

/// How a client should present a served file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Display in place.
    Inline,
    /// Save to disk.
    Attachment,
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disposition::Inline => write!(f, "inline"),
            Disposition::Attachment => write!(f, "attachment"),
        }
    }
}

/// Decrypted content ready to be streamed to a client.
pub struct FileStream {
    /// Plaintext reader. Owns the underlying file handle.
    pub reader: Box<dyn Read + Send>,
    /// MIME type guessed from the extension.
    pub mime: String,
    /// Name to present to the client.
    pub file_name: String,
    /// Presentation hint.
    pub disposition: Disposition,
}

impl fmt::Debug for FileStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileStream")
            .field("mime", &self.mime)
            .field("file_name", &self.file_name)
            .field("disposition", &self.disposition)
            .finish_non_exhaustive()
    }
}

impl FileStream {
    /// Drain the stream into memory.
    pub fn into_bytes(mut self) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        self.reader.read_to_end(&mut out)?;
        Ok(out)
    }
}

/// Result of a preview request.
#[derive(Debug)]
pub enum Preview {
    /// An image, served inline.
    Image(FileStream),
    /// Icon key for anything that is not an image.
    Icon(&'static str),
}

// ============================================================================
// Serving
// ============================================================================

/// Serve a file as an attachment.
pub fn download(instance: &Instance, file_path: &str) -> Result<FileStream> {
    open_stream(instance, file_path, false)
}

/// Serve a file for display: text and images inline, anything else as an
/// attachment.
pub fn view(instance: &Instance, file_path: &str) -> Result<FileStream> {
    open_stream(instance, file_path, true)
}

fn open_stream(instance: &Instance, file_path: &str, view: bool) -> Result<FileStream> {
    instance.sandbox().ensure_root()?;
    let path = instance.sandbox().resolve_file(file_path)?;
    let file_name = display_name(&path);
    let mime = mime_guess::from_path(&path).first_or_octet_stream();

    let file = File::open(&path).op_context(|| format!("open {}", path.display()))?;
    let reader = instance
        .codec()
        .decrypt_stream(file)
        .op_context(|| format!("read {}", path.display()))?;

    if view && mime == mime_guess::mime::TEXT_PLAIN {
        let text = read_stripped(reader).op_context(|| format!("read {}", path.display()))?;
        debug!(file = file_path, bytes = text.len(), "Serving text inline");
        return Ok(FileStream {
            reader: Box::new(Cursor::new(text)),
            mime: "text/plain; charset=utf-8".to_string(),
            file_name,
            disposition: Disposition::Inline,
        });
    }

    let inline = view
        && (mime.type_() == mime_guess::mime::IMAGE || mime == mime_guess::mime::APPLICATION_PDF);
    let disposition = if inline {
        Disposition::Inline
    } else {
        Disposition::Attachment
    };
    debug!(file = file_path, mime = %mime, %disposition, "Serving file");

    Ok(FileStream {
        reader: Box::new(reader),
        mime: mime.essence_str().to_string(),
        file_name,
        disposition,
    })
}

/// Serve an image inline, or name an icon for any other file type.
pub fn preview(instance: &Instance, file_path: &str) -> Result<Preview> {
    let ext = Path::new(file_path)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        let mut stream = open_stream(instance, file_path, false)?;
        stream.disposition = Disposition::Inline;
        return Ok(Preview::Image(stream));
    }
    Ok(Preview::Icon(icon_for(&ext)))
}

/// Icon key for a lowercase extension.
pub fn icon_for(ext: &str) -> &'static str {
    match ext {
        "zip" | "rar" | "tar" | "7z" | "gzip" | "7zip" => "zip",
        "js" => "js",
        "php" => "php",
        "html" => "html",
        "css" => "css",
        "json" => "json",
        "txt" => "txt",
        "pdf" => "pdf",
        "mp4" => "mp4",
        "mp3" => "mp3",
        "exe" => "exe",
        "dll" => "dll",
        _ => "file",
    }
}

/// Decrypted text of a file for editing, with NUL bytes removed.
pub fn get_file_text(instance: &Instance, file_path: &str) -> Result<String> {
    instance.sandbox().ensure_root()?;
    let path = instance.sandbox().resolve_file(file_path)?;
    let file = File::open(&path).op_context(|| format!("open {}", path.display()))?;
    let reader = instance
        .codec()
        .decrypt_stream(file)
        .op_context(|| format!("read {}", path.display()))?;
    let bytes = read_stripped(reader).op_context(|| format!("read {}", path.display()))?;

    String::from_utf8(bytes).map_err(|_| EngineError::NotEditable(file_path.to_string()))
}

fn read_stripped<R: Read>(mut reader: R) -> io::Result<Vec<u8>> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    bytes.retain(|b| *b != 0);
    Ok(bytes)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

// ============================================================================
// Upload
// ============================================================================

/// Store uploaded bytes under `path`, encrypting per the instance setting.
///
/// Without a chunk index the file is created or replaced. Chunk 0 starts a
/// new file and fails if one exists; later chunks append.
pub fn upload(
    instance: &Instance,
    path: &str,
    file_name: &str,
    data: &[u8],
    chunk: Option<u32>,
) -> Result<()> {
    let size = data.len() as u64;
    instance.quota().ensure_room_for(size)?;

    let config = instance.config();
    let limit = config.max_upload_size_mb.saturating_mul(BYTES_PER_MB);
    if config.max_upload_size_mb > 0 && size > limit {
        return Err(EngineError::TooLarge { size, limit });
    }

    let name = sanitize_name(file_name)?;
    if !config.accepts(&name) {
        let (_, ext) = split_extension(&name);
        return Err(EngineError::RejectedExtension(if ext.is_empty() {
            name.clone()
        } else {
            ext.to_string()
        }));
    }

    instance.sandbox().ensure_root()?;
    let dir = instance.sandbox().resolve_dir_or_root(path);
    let target = dir.join(&name);
    let codec = instance.codec();

    match chunk {
        Some(0) if target.exists() => {
            return Err(EngineError::AlreadyExists(instance.sandbox().to_virtual(&target)));
        }
        None | Some(0) => {
            let mut reader = codec
                .encrypt_stream(data)
                .op_context(|| format!("encrypt {}", target.display()))?;
            write_atomic(&target, |out| io::copy(&mut reader, out).map(|_| ()))?;
        }
        Some(_) => {
            codec
                .append_stream_to_file(data, &target)
                .op_context(|| format!("append to {}", target.display()))?;
        }
    }

    info!(
        instance = instance.id(),
        file = %instance.sandbox().to_virtual(&target),
        bytes = size,
        chunk = ?chunk,
        "Uploaded"
    );
    Ok(())
}

// ============================================================================
// Atomic writes
// ============================================================================

/// Replace `target` with whatever `write` produces.
///
/// Content goes to a uniquely named sibling first and is renamed over the
/// target only after it has been fully written and synced. On failure the
/// temporary file is removed and the target is left as it was.
pub(crate) fn write_atomic<F>(target: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut File) -> io::Result<()>,
{
    let dir = target
        .parent()
        .ok_or_else(|| EngineError::NotFound(target.display().to_string()))?;
    let name = display_name(target);
    let temp = dir.join(format!(".{name}.{}.tmp", Uuid::new_v4().simple()));

    let written: io::Result<()> = (|| {
        let mut file = File::create(&temp)?;
        write(&mut file)?;
        file.flush()?;
        file.sync_all()
    })();

    let result = written.and_then(|()| fs::rename(&temp, target));
    if let Err(e) = result {
        if let Err(cleanup) = fs::remove_file(&temp) {
            if cleanup.kind() != io::ErrorKind::NotFound {
                warn!(temp = %temp.display(), error = %cleanup, "Failed to remove temporary file");
            }
        }
        return Err(EngineError::io(format!("write {}", target.display()), e));
    }
    Ok(())
}
