//! Packaged archive (bundle) sources.
//!
//! A bundle is a zip archive carrying a manifest plus the files it lists.
//! Extraction goes to an ephemeral directory; the manifest is expected at
//! the archive root or, for archives with a single wrapping directory, in
//! the first immediate subdirectory that contains one. A missing manifest
//! or a broken archive aborts the sync for this source.

use anyhow::{bail, Context, Result};
use std::fs::File;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::manifest::MANIFEST_FILE;

/// An extracted bundle; the directory is removed on drop.
pub struct ExtractedBundle {
    dir: TempDir,
    manifest_path: PathBuf,
}

impl ExtractedBundle {
    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    pub fn manifest_dir(&self) -> &Path {
        // manifest_path always has a parent inside the temp dir
        self.manifest_path.parent().unwrap_or_else(|| self.dir.path())
    }
}

/// Extract `archive_path` and locate its manifest.
pub fn extract(archive_path: &Path) -> Result<ExtractedBundle> {
    let file = File::open(archive_path)
        .with_context(|| format!("Failed to open bundle: {}", archive_path.display()))?;

    let mut archive = zip::ZipArchive::new(file)
        .with_context(|| format!("Failed to read bundle: {}", archive_path.display()))?;

    let dir = TempDir::new().with_context(|| "Failed to create extraction directory")?;

    archive
        .extract(dir.path())
        .with_context(|| format!("Failed to extract bundle: {}", archive_path.display()))?;

    let manifest_path = locate_manifest(dir.path())?;

    Ok(ExtractedBundle { dir, manifest_path })
}

fn locate_manifest(root: &Path) -> Result<PathBuf> {
    let direct = root.join(MANIFEST_FILE);
    if direct.is_file() {
        return Ok(direct);
    }

    let mut subdirs: Vec<PathBuf> = std::fs::read_dir(root)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    subdirs.sort();

    for subdir in subdirs {
        let candidate = subdir.join(MANIFEST_FILE);
        if candidate.is_file() {
            return Ok(candidate);
        }
    }

    bail!("Bundle contains no {} at its root or first level", MANIFEST_FILE)
}
