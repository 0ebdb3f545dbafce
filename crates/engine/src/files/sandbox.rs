//! Virtual path resolution confined to an instance root.
//!
//! Virtual paths are `/`-rooted strings relative to the physical root.
//! Resolution is lexical first (so `..` can never climb above the root)
//! and then, for paths that exist, canonical (so symlinks cannot point
//! outside it either).

use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::{EngineError, Result};

/// Outcome of resolving a virtual path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The path exists inside the root. Holds the canonical physical path.
    Found(PathBuf),
    /// The path is inside the root but nothing exists there yet.
    NotFound(PathBuf),
    /// The path would leave the root.
    OutsideRoot,
}

/// Maps virtual paths onto a single physical root.
#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
}

impl Sandbox {
    /// Create a sandbox over an existing directory.
    pub fn new(root: &Path) -> Result<Self> {
        let canonical =
            fs::canonicalize(root).map_err(|_| EngineError::InvalidRoot(root.to_path_buf()))?;
        if !canonical.is_dir() {
            return Err(EngineError::InvalidRoot(root.to_path_buf()));
        }
        Ok(Self { root: canonical })
    }

    /// Canonical physical root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Fail with `InvalidRoot` if the root has disappeared.
    pub fn ensure_root(&self) -> Result<()> {
        if self.root.is_dir() {
            Ok(())
        } else {
            Err(EngineError::InvalidRoot(self.root.clone()))
        }
    }

    /// Resolve a virtual path.
    ///
    /// Backslashes count as separators, empty and `.` segments are ignored,
    /// and leading separators (including UNC-style `\\server`) are treated
    /// as the virtual root.
    pub fn resolve(&self, virtual_path: &str) -> Resolution {
        let Some(physical) = self.lexical(virtual_path) else {
            return Resolution::OutsideRoot;
        };

        if fs::symlink_metadata(&physical).is_ok() {
            return match fs::canonicalize(&physical) {
                Ok(canonical) if self.contains(&canonical) => Resolution::Found(canonical),
                Ok(_) => Resolution::OutsideRoot,
                // Dangling symlink: treat as absent but never follow it.
                Err(_) => Resolution::OutsideRoot,
            };
        }

        // Nothing there yet; the nearest existing ancestor must still be inside.
        let mut ancestor = physical.parent();
        while let Some(dir) = ancestor {
            if let Ok(canonical) = fs::canonicalize(dir) {
                return if self.contains(&canonical) {
                    Resolution::NotFound(physical)
                } else {
                    Resolution::OutsideRoot
                };
            }
            ancestor = dir.parent();
        }
        Resolution::OutsideRoot
    }

    /// Resolve an existing item without following a symlink in its last segment.
    ///
    /// Folders leading up to the item are canonicalized and must stay inside
    /// the root. The item itself is returned as named, so deleting, renaming
    /// or moving a link acts on the link and never on what it points at.
    pub fn resolve_item(&self, virtual_path: &str) -> Result<PathBuf> {
        let not_found = || EngineError::NotFound(virtual_path.to_string());
        let physical = self.lexical(virtual_path).ok_or_else(not_found)?;
        if physical == self.root {
            return Ok(physical);
        }

        let (Some(parent), Some(name)) = (physical.parent(), physical.file_name()) else {
            return Err(not_found());
        };
        let parent = fs::canonicalize(parent)
            .ok()
            .filter(|p| self.contains(p))
            .ok_or_else(not_found)?;
        let item = parent.join(name);
        fs::symlink_metadata(&item).map_err(|_| not_found())?;
        Ok(item)
    }

    /// Map a virtual path onto the root without touching the filesystem.
    ///
    /// Returns `None` when `..` climbs above the root or a segment is not a
    /// plain name.
    fn lexical(&self, virtual_path: &str) -> Option<PathBuf> {
        let normalized = virtual_path.replace('\\', "/");
        let mut segments: Vec<&str> = Vec::new();
        for segment in normalized.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    segments.pop()?;
                }
                name => segments.push(name),
            }
        }

        let mut physical = self.root.clone();
        for segment in &segments {
            // A segment such as "C:" must not turn into a path prefix.
            let mut components = Path::new(segment).components();
            match (components.next(), components.next()) {
                (Some(Component::Normal(_)), None) => physical.push(segment),
                _ => return None,
            }
        }
        Some(physical)
    }

    /// Resolve to an existing directory, falling back to the root.
    pub fn resolve_dir_or_root(&self, virtual_path: &str) -> PathBuf {
        match self.resolve(virtual_path) {
            Resolution::Found(p) if p.is_dir() => p,
            _ => self.root.clone(),
        }
    }

    /// Resolve to an existing item or fail with `NotFound`.
    pub fn resolve_existing(&self, virtual_path: &str) -> Result<PathBuf> {
        match self.resolve(virtual_path) {
            Resolution::Found(p) => Ok(p),
            _ => Err(EngineError::NotFound(virtual_path.to_string())),
        }
    }

    /// Resolve to an existing regular file or fail with `NotFound`.
    pub fn resolve_file(&self, virtual_path: &str) -> Result<PathBuf> {
        let path = self.resolve_existing(virtual_path)?;
        if path.is_file() {
            Ok(path)
        } else {
            Err(EngineError::NotFound(virtual_path.to_string()))
        }
    }

    /// Whether `physical` is the root or a descendant of it.
    pub fn contains(&self, physical: &Path) -> bool {
        is_within(&self.root, physical)
    }

    /// Virtual path (`/`-rooted, `/`-separated) for a physical path inside the root.
    pub fn to_virtual(&self, physical: &Path) -> String {
        let relative = physical.strip_prefix(&self.root).unwrap_or(Path::new(""));
        let parts: Vec<String> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        format!("/{}", parts.join("/"))
    }
}

/// Component-wise containment check.
///
/// Case-insensitive on platforms whose default filesystems are.
fn is_within(root: &Path, path: &Path) -> bool {
    if cfg!(any(windows, target_os = "macos")) {
        let lower = |p: &Path| PathBuf::from(p.to_string_lossy().to_lowercase());
        lower(path).starts_with(lower(root))
    } else {
        path.starts_with(root)
    }
}
