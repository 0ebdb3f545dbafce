//! Folder listings and recursive search.
//!
//! Every listing reports on-disk state directly: the encryption flag of a
//! file comes from sniffing its leading bytes, never from an index.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{IoResultExt, Result};
use crate::registry::Instance;

/// Timestamp format used in listings.
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Contents of a folder, or the results of a search under it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FolderListing {
    /// Virtual path that was listed.
    pub current_path: String,
    /// Sub-folders.
    pub folders: Vec<FolderDetail>,
    /// Files.
    pub files: Vec<FileDetail>,
}

/// A folder entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FolderDetail {
    pub folder_name: String,
    pub virtual_path: String,
    pub created_at: String,
    pub modified_at: String,
}

/// A file entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileDetail {
    pub file_name: String,
    pub virtual_path: String,
    /// Human-readable size of the decrypted content.
    pub size: String,
    /// Human-readable size on disk.
    pub encrypted_size: String,
    pub created_at: String,
    pub modified_at: String,
    pub is_encrypted: bool,
}

/// List the folder at `virtual_path`, falling back to the root.
pub fn list(instance: &Instance, virtual_path: &str) -> Result<FolderListing> {
    instance.sandbox().ensure_root()?;
    let dir = instance.sandbox().resolve_dir_or_root(virtual_path);
    list_dir(instance, &dir)
}

/// List a physical directory already known to be inside the root.
pub fn list_dir(instance: &Instance, dir: &Path) -> Result<FolderListing> {
    let sandbox = instance.sandbox();
    let mut folders = Vec::new();
    let mut files = Vec::new();

    let entries = fs::read_dir(dir).op_context(|| format!("read directory {}", dir.display()))?;
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable directory entry");
                continue;
            }
        };
        let path = entry.path();
        if !is_inside(instance, &path) {
            debug!(path = %path.display(), "Skipping entry that points outside the root");
            continue;
        }
        if path.is_dir() {
            folders.push(folder_detail(instance, &path));
        } else if path.is_file() {
            files.push(file_detail(instance, &path));
        }
    }

    folders.sort_by(|a, b| a.folder_name.cmp(&b.folder_name));
    files.sort_by(|a, b| a.file_name.cmp(&b.file_name));

    Ok(FolderListing {
        current_path: sandbox.to_virtual(dir),
        folders,
        files,
    })
}

/// Recursive search under `virtual_path` (falling back to the root).
///
/// A query containing `*` is a case-insensitive glob over entry names;
/// any other query is a case-insensitive substring. Empty matches all.
pub fn search(instance: &Instance, virtual_path: &str, query: &str) -> Result<FolderListing> {
    instance.sandbox().ensure_root()?;
    let dir = instance.sandbox().resolve_dir_or_root(virtual_path);
    let matcher = NameMatcher::new(query);

    let mut folder_paths: Vec<PathBuf> = Vec::new();
    let mut file_paths: Vec<PathBuf> = Vec::new();

    for entry in WalkDir::new(&dir).min_depth(1).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Skipping entry during search");
                continue;
            }
        };
        let name = entry.file_name().to_string_lossy();
        if !matcher.matches(&name) {
            continue;
        }
        if entry.file_type().is_dir() {
            folder_paths.push(entry.into_path());
        } else if entry.file_type().is_file() {
            file_paths.push(entry.into_path());
        }
    }

    folder_paths.sort();
    file_paths.sort();
    debug!(
        query,
        folders = folder_paths.len(),
        files = file_paths.len(),
        "Search complete"
    );

    Ok(FolderListing {
        current_path: instance.sandbox().to_virtual(&dir),
        folders: folder_paths
            .iter()
            .map(|p| folder_detail(instance, p))
            .collect(),
        files: file_paths.iter().map(|p| file_detail(instance, p)).collect(),
    })
}

enum NameMatcher {
    All,
    Glob(Pattern),
    Substring(String),
}

impl NameMatcher {
    fn new(query: &str) -> Self {
        let query = query.trim();
        if query.is_empty() {
            return NameMatcher::All;
        }
        if query.contains('*') {
            if let Ok(pattern) = Pattern::new(query) {
                return NameMatcher::Glob(pattern);
            }
        }
        NameMatcher::Substring(query.to_lowercase())
    }

    fn matches(&self, name: &str) -> bool {
        match self {
            NameMatcher::All => true,
            NameMatcher::Glob(pattern) => pattern.matches_with(
                name,
                MatchOptions {
                    case_sensitive: false,
                    ..MatchOptions::new()
                },
            ),
            NameMatcher::Substring(needle) => name.to_lowercase().contains(needle),
        }
    }
}

fn is_inside(instance: &Instance, path: &Path) -> bool {
    match fs::canonicalize(path) {
        Ok(canonical) => instance.sandbox().contains(&canonical),
        Err(_) => false,
    }
}

/// Listing entry for a folder.
pub fn folder_detail(instance: &Instance, path: &Path) -> FolderDetail {
    let (created_at, modified_at) = timestamps(path);
    FolderDetail {
        folder_name: file_name(path),
        virtual_path: instance.sandbox().to_virtual(path),
        created_at,
        modified_at,
    }
}

/// Listing entry for a file.
pub fn file_detail(instance: &Instance, path: &Path) -> FileDetail {
    let codec = instance.codec();
    let on_disk = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    let is_encrypted = codec.is_encrypted_file(path).unwrap_or(false);
    let plain = if is_encrypted {
        codec.plaintext_len(path).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "Could not read envelope size");
            on_disk
        })
    } else {
        on_disk
    };
    let (created_at, modified_at) = timestamps(path);

    FileDetail {
        file_name: file_name(path),
        virtual_path: instance.sandbox().to_virtual(path),
        size: format_size(plain),
        encrypted_size: format_size(on_disk),
        created_at,
        modified_at,
        is_encrypted,
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn timestamps(path: &Path) -> (String, String) {
    match fs::metadata(path) {
        Ok(meta) => {
            let modified = meta.modified().ok();
            let created = meta.created().ok().or(modified);
            (format_time(created), format_time(modified))
        }
        Err(_) => (String::new(), String::new()),
    }
}

fn format_time(time: Option<SystemTime>) -> String {
    time.map(|t| DateTime::<Utc>::from(t).format(TIME_FORMAT).to_string())
        .unwrap_or_default()
}

/// Human-readable byte count, e.g. `512 B` or `1.50 MB`.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InstanceConfig;
    use tempfile::TempDir;

    fn instance(dir: &TempDir, encrypted: bool) -> Instance {
        let mut config = InstanceConfig::new("t", dir.path());
        if encrypted {
            config.use_encryption = true;
            config.encryption_key = Some("listing".to_string());
        }
        Instance::open(config).unwrap()
    }

    fn populate(dir: &Path) {
        fs::create_dir_all(dir.join("beta/nested")).unwrap();
        fs::create_dir_all(dir.join("alpha")).unwrap();
        fs::write(dir.join("b.txt"), b"bbb").unwrap();
        fs::write(dir.join("a.TXT"), b"a").unwrap();
        fs::write(dir.join("beta/report.pdf"), b"pdf").unwrap();
        fs::write(dir.join("beta/nested/Report-final.txt"), b"final").unwrap();
    }

    #[test]
    fn test_list_sorted() {
        let dir = TempDir::new().unwrap();
        populate(dir.path());
        let inst = instance(&dir, false);

        let listing = list(&inst, "/").unwrap();
        assert_eq!(listing.current_path, "/");
        let folders: Vec<_> = listing.folders.iter().map(|f| f.folder_name.as_str()).collect();
        assert_eq!(folders, vec!["alpha", "beta"]);
        let files: Vec<_> = listing.files.iter().map(|f| f.file_name.as_str()).collect();
        assert_eq!(files, vec!["a.TXT", "b.txt"]);
        assert_eq!(listing.files[1].virtual_path, "/b.txt");
        assert_eq!(listing.files[1].size, "3 B");
        assert!(!listing.files[1].is_encrypted);
    }

    #[test]
    fn test_list_falls_back_to_root() {
        let dir = TempDir::new().unwrap();
        populate(dir.path());
        let inst = instance(&dir, false);
        assert_eq!(list(&inst, "../../etc").unwrap().current_path, "/");
        assert_eq!(list(&inst, "/missing").unwrap().current_path, "/");
        assert_eq!(list(&inst, "/b.txt").unwrap().current_path, "/");
        assert_eq!(list(&inst, "beta").unwrap().current_path, "/beta");
    }

    #[test]
    fn test_list_reports_encrypted_file() {
        let dir = TempDir::new().unwrap();
        let inst = instance(&dir, true);
        let path = inst.sandbox().root().join("secret.txt");
        inst.codec()
            .save_stream_to_file(&vec![7u8; 2048][..], &path)
            .unwrap();

        let listing = list(&inst, "/").unwrap();
        let file = &listing.files[0];
        assert!(file.is_encrypted);
        assert_eq!(file.size, "2.00 KB");
        assert_ne!(file.encrypted_size, file.size);
    }

    #[test]
    fn test_listing_json_shape() {
        let dir = TempDir::new().unwrap();
        populate(dir.path());
        let inst = instance(&dir, false);
        let json = serde_json::to_value(list(&inst, "/").unwrap()).unwrap();
        assert!(json.get("currentPath").is_some());
        assert!(json["folders"][0].get("folderName").is_some());
        assert!(json["files"][0].get("encryptedSize").is_some());
        assert!(json["files"][0].get("isEncrypted").is_some());
        let created = json["files"][0]["createdAt"].as_str().unwrap();
        assert_eq!(created.len(), "2024-01-01 00:00:00".len());
    }

    #[test]
    fn test_search_substring_case_insensitive() {
        let dir = TempDir::new().unwrap();
        populate(dir.path());
        let inst = instance(&dir, false);

        let result = search(&inst, "/", "report").unwrap();
        let files: Vec<_> = result.files.iter().map(|f| f.virtual_path.as_str()).collect();
        assert_eq!(files, vec!["/beta/nested/Report-final.txt", "/beta/report.pdf"]);
        assert!(result.folders.is_empty());
    }

    #[test]
    fn test_search_glob() {
        let dir = TempDir::new().unwrap();
        populate(dir.path());
        let inst = instance(&dir, false);

        let result = search(&inst, "/", "*.txt").unwrap();
        let names: Vec<_> = result.files.iter().map(|f| f.file_name.as_str()).collect();
        assert_eq!(names, vec!["a.TXT", "b.txt", "Report-final.txt"]);

        let result = search(&inst, "/", "be*").unwrap();
        assert_eq!(result.folders.len(), 1);
        assert_eq!(result.folders[0].virtual_path, "/beta");
    }

    #[test]
    fn test_search_empty_query_matches_all() {
        let dir = TempDir::new().unwrap();
        populate(dir.path());
        let inst = instance(&dir, false);

        let result = search(&inst, "/beta", "").unwrap();
        assert_eq!(result.current_path, "/beta");
        assert_eq!(result.folders.len(), 1);
        assert_eq!(result.files.len(), 2);
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.00 MB");
    }

    #[test]
    fn test_invalid_root() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("root");
        let inst = Instance::open(InstanceConfig::new("t", &root)).unwrap();
        fs::remove_dir(&root).unwrap();
        assert!(matches!(
            list(&inst, "/"),
            Err(crate::error::EngineError::InvalidRoot(_))
        ));
    }
}
