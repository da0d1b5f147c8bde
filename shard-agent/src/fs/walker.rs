//! Index directory listing.
//!
//! Collects the files of a shard's index directory so they can be copied one
//! by one. Directory names are never returned, only regular files.

use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Options for directory walking
#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// Follow symbolic links
    pub follow_links: bool,

    /// Maximum depth (None = unlimited)
    pub max_depth: Option<usize>,

    /// File names to skip (exact match or suffix)
    pub exclude_patterns: Vec<String>,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            follow_links: false,
            // Index directories are flat
            max_depth: Some(1),
            exclude_patterns: vec![
                // Held by the live index writer, meaningless elsewhere
                "write.lock".to_string(),
                ".partial".to_string(),
            ],
        }
    }
}

/// A file discovered in an index directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Full path to the file
    pub path: PathBuf,

    /// Path relative to the root, `/`-separated
    pub name: String,

    /// File size in bytes
    pub size: u64,
}

impl FileInfo {
    fn from_entry(entry: &DirEntry, root: &Path) -> std::io::Result<Option<Self>> {
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            return Ok(None);
        }
        let path = entry.path().to_path_buf();
        let name = path
            .strip_prefix(root)
            .unwrap_or(&path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        Ok(Some(Self {
            path,
            name,
            size: metadata.len(),
        }))
    }
}

/// Walk a directory and collect its files, sorted by name.
pub fn walk_directory(root: &Path, options: &WalkOptions) -> std::io::Result<Vec<FileInfo>> {
    let mut walker = WalkDir::new(root)
        .follow_links(options.follow_links)
        .min_depth(1);

    if let Some(max_depth) = options.max_depth {
        walker = walker.max_depth(max_depth);
    }

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry?;

        if should_exclude(&entry, &options.exclude_patterns) {
            continue;
        }

        if entry.file_type().is_dir() {
            continue;
        }

        if let Some(file_info) = FileInfo::from_entry(&entry, root)? {
            files.push(file_info);
        }
    }

    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}

/// Total size of the files a walk would return
pub fn calculate_total_size(files: &[FileInfo]) -> u64 {
    files.iter().map(|f| f.size).sum()
}

fn should_exclude(entry: &DirEntry, patterns: &[String]) -> bool {
    let file_name = entry.file_name().to_string_lossy();
    patterns
        .iter()
        .any(|pattern| file_name == pattern.as_str() || file_name.ends_with(pattern.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_walk_empty_directory() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let files = walk_directory(temp_dir.path(), &WalkOptions::default())?;
        assert!(files.is_empty());
        Ok(())
    }

    #[test]
    fn test_walk_index_files_sorted() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::write(temp_dir.path().join("segments_2"), b"seg")?;
        fs::write(temp_dir.path().join("_0.cfs"), b"content1")?;
        fs::write(temp_dir.path().join("_0.si"), b"si")?;

        let files = walk_directory(temp_dir.path(), &WalkOptions::default())?;
        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["_0.cfs", "_0.si", "segments_2"]);
        assert_eq!(calculate_total_size(&files), 13);
        Ok(())
    }

    #[test]
    fn test_lock_and_partial_files_skipped() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::write(temp_dir.path().join("write.lock"), b"")?;
        fs::write(temp_dir.path().join("._1.cfs.abc.partial"), b"half")?;
        fs::write(temp_dir.path().join("_1.cfs"), b"keep")?;

        let files = walk_directory(temp_dir.path(), &WalkOptions::default())?;
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "_1.cfs");
        Ok(())
    }

    #[test]
    fn test_default_depth_ignores_subdirectories() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::create_dir(temp_dir.path().join("snapshot"))?;
        fs::write(temp_dir.path().join("snapshot/_9.cfs"), b"old")?;
        fs::write(temp_dir.path().join("_0.cfs"), b"new")?;

        let flat = walk_directory(temp_dir.path(), &WalkOptions::default())?;
        assert_eq!(flat.len(), 1);

        let deep = walk_directory(
            temp_dir.path(),
            &WalkOptions {
                max_depth: None,
                ..WalkOptions::default()
            },
        )?;
        assert_eq!(deep.len(), 2);
        assert!(deep.iter().any(|f| f.name == "snapshot/_9.cfs"));
        Ok(())
    }
}
