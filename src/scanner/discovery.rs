use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Recursively list image files under `directory` with one of the given extensions.
pub fn discover_images(directory: &Path, extensions: &[String]) -> Vec<PathBuf> {
    let mut images: Vec<PathBuf> = WalkDir::new(directory)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|entry| entry.file_type().is_file() && has_image_extension(entry.path(), extensions))
        .map(|entry| entry.into_path())
        .collect();

    // Sort by path for consistent ordering
    images.sort();
    images
}

pub fn has_image_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .map(|ext| {
            let ext_lower = ext.to_string_lossy().to_lowercase();
            extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext_lower))
        })
        .unwrap_or(false)
}
