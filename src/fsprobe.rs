use std::fs;
use std::io;
use std::path::Path;

use log::{debug, warn};
use walkdir::WalkDir;

/// Narrow interface to the filesystem operations the cleanup needs.
pub(crate) trait FileSystemProbe: Send + Sync {
    /// Whether a regular file exists at `path`. Directories do not count.
    fn file_exists(&self, path: &str) -> bool;

    /// Recursively finds symlinks under `root` whose target does not
    /// resolve, restricted to the given file extensions.
    fn find_broken_symlinks(&self, root: &str, extensions: &[&str]) -> io::Result<Vec<String>>;

    /// Removes a symlink from disk.
    fn delete_symlink(&self, path: &str) -> io::Result<()>;
}

/// [`FileSystemProbe`] backed by the real filesystem.
pub(crate) struct DiskProbe;

impl FileSystemProbe for DiskProbe {
    fn file_exists(&self, path: &str) -> bool {
        if path.is_empty() {
            return false;
        }
        match fs::metadata(path) {
            Ok(meta) => meta.is_file(),
            Err(_) => false,
        }
    }

    fn find_broken_symlinks(&self, root: &str, extensions: &[&str]) -> io::Result<Vec<String>> {
        let mut broken = Vec::new();

        for entry in WalkDir::new(root).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    // Unreadable subtrees are skipped, not fatal.
                    warn!("Skipping unreadable path under {}: {}", root, err);
                    continue;
                }
            };

            if !entry.path_is_symlink() {
                continue;
            }
            if !has_target_extension(entry.path(), extensions) {
                continue;
            }
            // A dangling link has lstat metadata but no stat metadata.
            if fs::metadata(entry.path()).is_err() {
                broken.push(entry.path().to_string_lossy().into_owned());
            }
        }

        debug!("Found {} broken symlinks under {}", broken.len(), root);
        Ok(broken)
    }

    fn delete_symlink(&self, path: &str) -> io::Result<()> {
        let meta = fs::symlink_metadata(path)?;
        if !meta.file_type().is_symlink() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{path} is not a symlink"),
            ));
        }
        fs::remove_file(path)
    }
}

fn has_target_extension(path: &Path, extensions: &[&str]) -> bool {
    if extensions.is_empty() {
        return true;
    }
    let name = match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => name.to_lowercase(),
        None => return false,
    };
    extensions.iter().any(|ext| {
        let ext = ext.to_lowercase();
        if ext.starts_with('.') {
            name.ends_with(&ext)
        } else {
            name.ends_with(&format!(".{ext}"))
        }
    })
}
