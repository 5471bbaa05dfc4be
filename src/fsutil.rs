//! Filesystem helper: input enumeration and output directory creation.
//!
//! Enumeration is non-recursive (sub-subdirectories are not entered), skips
//! hidden files, and returns supported images in sorted order so batch
//! splitting is deterministic.

use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "bmp"];

pub fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .map(|ext| extensions.contains(&ext.as_str()))
        .unwrap_or(false)
}

pub fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

/// Non-hidden regular files with a supported image extension, immediate
/// children only, sorted by path.
pub fn list_image_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| !is_hidden(e.path()))
        .filter(|e| has_extension(e.path(), SUPPORTED_EXTENSIONS))
        .map(|e| e.path().to_path_buf())
        .collect();
    files.sort();
    files
}

/// Immediate subdirectories of `root`, sorted. Unlike per-file helpers this
/// is fallible: not being able to list the input root aborts the whole scan.
pub fn list_subdirectories(root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() && !is_hidden(&path) {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

pub fn ensure_dir(path: &Path) -> io::Result<()> {
    std::fs::create_dir_all(path)
}
