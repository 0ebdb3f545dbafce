//! Collision-free naming for new items.

use std::path::{Path, PathBuf};

use crate::error::{EngineError, Result};

/// Whether the candidate names a file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    /// Suffix goes before the extension.
    File,
    /// Suffix goes at the end.
    Dir,
}

impl ItemKind {
    /// Kind of an existing path. A symlink is a file even when it points
    /// at a folder.
    pub fn of(path: &Path) -> Self {
        if path.symlink_metadata().is_ok_and(|meta| meta.is_dir()) {
            ItemKind::Dir
        } else {
            ItemKind::File
        }
    }
}

/// Split a file name into stem and extension (with its dot).
///
/// A leading dot does not start an extension, so `.bashrc` has none.
pub fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(0) | None => (name, ""),
        Some(idx) => name.split_at(idx),
    }
}

/// First name of the form `base`, `base (1)`, `base (2)`, ... for which
/// `exists` returns false. Files keep their extension after the suffix.
pub fn unique_name<F>(base: &str, kind: ItemKind, exists: F) -> String
where
    F: Fn(&str) -> bool,
{
    if !exists(base) {
        return base.to_string();
    }

    let (stem, ext) = match kind {
        ItemKind::File => split_extension(base),
        ItemKind::Dir => (base, ""),
    };

    let mut n: u64 = 1;
    loop {
        let candidate = format!("{stem} ({n}){ext}");
        if !exists(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Collision-free path for `name` inside `dir`.
pub fn unique_path(dir: &Path, name: &str, kind: ItemKind) -> PathBuf {
    let name = unique_name(name, kind, |candidate| {
        dir.join(candidate).symlink_metadata().is_ok()
    });
    dir.join(name)
}

/// Reduce a user-supplied name to its final component.
///
/// Rejects names that are empty or refer to the current or parent directory.
pub fn sanitize_name(name: &str) -> Result<String> {
    let last = name
        .rsplit(['/', '\\'])
        .find(|segment| !segment.trim().is_empty())
        .unwrap_or("")
        .trim();
    if last.is_empty() || last == "." || last == ".." || last.contains('\0') {
        return Err(EngineError::InvalidName(name.to_string()));
    }
    Ok(last.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::fs;
    use tempfile::TempDir;

    fn taken(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_free_name_unchanged() {
        let existing = taken(&[]);
        assert_eq!(
            unique_name("report.pdf", ItemKind::File, |n| existing.contains(n)),
            "report.pdf"
        );
    }

    #[test]
    fn test_file_suffix_before_extension() {
        let existing = taken(&["report.pdf", "report (1).pdf"]);
        assert_eq!(
            unique_name("report.pdf", ItemKind::File, |n| existing.contains(n)),
            "report (2).pdf"
        );
    }

    #[test]
    fn test_dir_suffix_at_end() {
        let existing = taken(&["v1.0"]);
        assert_eq!(
            unique_name("v1.0", ItemKind::Dir, |n| existing.contains(n)),
            "v1.0 (1)"
        );
    }

    #[test]
    fn test_multi_dot_and_dotfile() {
        let existing = taken(&["a.tar.gz", ".bashrc", "noext"]);
        assert_eq!(
            unique_name("a.tar.gz", ItemKind::File, |n| existing.contains(n)),
            "a.tar (1).gz"
        );
        assert_eq!(
            unique_name(".bashrc", ItemKind::File, |n| existing.contains(n)),
            ".bashrc (1)"
        );
        assert_eq!(
            unique_name("noext", ItemKind::File, |n| existing.contains(n)),
            "noext (1)"
        );
    }

    #[test]
    fn test_split_extension() {
        assert_eq!(split_extension("a.txt"), ("a", ".txt"));
        assert_eq!(split_extension("a"), ("a", ""));
        assert_eq!(split_extension(".env"), (".env", ""));
        assert_eq!(split_extension("trailing."), ("trailing", "."));
    }

    #[test]
    fn test_unique_path_on_disk() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("docs")).unwrap();
        assert_eq!(
            unique_path(dir.path(), "docs", ItemKind::Dir),
            dir.path().join("docs (1)")
        );
        assert_eq!(
            unique_path(dir.path(), "new.txt", ItemKind::File),
            dir.path().join("new.txt")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_kind_of_symlink_to_folder() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("docs")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("docs"), dir.path().join("alias")).unwrap();
        assert_eq!(ItemKind::of(&dir.path().join("docs")), ItemKind::Dir);
        assert_eq!(ItemKind::of(&dir.path().join("alias")), ItemKind::File);
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("plain.txt").unwrap(), "plain.txt");
        assert_eq!(sanitize_name("../../etc/passwd").unwrap(), "passwd");
        assert_eq!(sanitize_name("dir\\file.txt").unwrap(), "file.txt");
        assert_eq!(sanitize_name("trailing/").unwrap(), "trailing");
        for bad in ["", "  ", ".", "..", "a/..", "/"] {
            assert!(
                matches!(sanitize_name(bad), Err(EngineError::InvalidName(_))),
                "{bad:?}"
            );
        }
    }
}
