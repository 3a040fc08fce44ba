use std::path::{Path, PathBuf};

use anyhow::Result;
use walkdir::{DirEntry, WalkDir};

use crate::ingest::mimetype::is_image;

/// Image files under `root`, skipping hidden entries, sorted by path.
pub fn scan_images(root: &Path) -> Result<Vec<PathBuf>> {
    let walker = WalkDir::new(root).into_iter();
    let mut found = Vec::new();

    for entry in walker.filter_entry(|e| e.depth() == 0 || !is_hidden(e)) {
        let entry = entry?;
        if entry.file_type().is_file() && looks_like_image(entry.path()) {
            found.push(entry.path().to_path_buf());
        }
    }

    found.sort();
    Ok(found)
}

fn looks_like_image(path: &Path) -> bool {
    match infer::get_from_path(path) {
        Ok(Some(kind)) => is_image(kind.mime_type()),
        _ => false,
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}
