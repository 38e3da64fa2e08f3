//! Extraction workspace management
//!
//! The workspace is exclusively owned by the batch orchestrator and is
//! fully reset (remove-and-recreate) before each submission so no
//! submission can observe another's artifacts.

use std::collections::BTreeSet;
use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use zip::ZipArchive;

use crate::checks::VENDOR_DIR;
use crate::manifest::MANIFEST_FILE;

/// Remove and recreate the workspace directory
pub fn reset_workspace(dir: &Path) -> Result<()> {
    if dir.exists() {
        std::fs::remove_dir_all(dir)
            .with_context(|| format!("Failed to clear workspace {:?}", dir))?;
    }
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create workspace {:?}", dir))?;
    Ok(())
}

/// Extract a zip archive into `dest`, preserving relative structure
pub fn extract_archive(archive_path: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive_path)
        .with_context(|| format!("Failed to open archive {:?}", archive_path))?;
    let mut archive = ZipArchive::new(file)
        .with_context(|| format!("Failed to read archive {:?}", archive_path))?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;

        // ZIP slip protection: only paths contained within dest
        let Some(relative) = entry.enclosed_name() else {
            continue;
        };
        let outpath = dest.join(relative);

        if entry.name().ends_with('/') {
            std::fs::create_dir_all(&outpath)?;
        } else {
            if let Some(parent) = outpath.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut outfile = File::create(&outpath)?;
            std::io::copy(&mut entry, &mut outfile)?;
        }
    }

    Ok(())
}

/// Directories never descended into when scanning a submission tree
pub(crate) fn skip_dir(name: &str) -> bool {
    name == VENDOR_DIR || name == "__MACOSX" || name.starts_with('.')
}

/// Locate the effective working directory of an extracted submission:
/// the deepest directory containing a manifest, else the first directory
/// containing any required file, else the extraction root itself.
pub fn locate_working_dir(root: &Path, required_files: &BTreeSet<String>) -> PathBuf {
    let mut manifest_dirs: Vec<PathBuf> = Vec::new();
    let mut first_required_dir: Option<PathBuf> = None;

    // Breadth-first so "first directory containing a required file"
    // means the shallowest one
    let mut queue = std::collections::VecDeque::from([root.to_path_buf()]);
    while let Some(dir) = queue.pop_front() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            if path.is_dir() {
                if !skip_dir(&name) {
                    queue.push_back(path);
                }
            } else if name == MANIFEST_FILE {
                manifest_dirs.push(dir.clone());
            } else if first_required_dir.is_none() && required_files.contains(&name) {
                first_required_dir = Some(dir.clone());
            }
        }
    }

    if let Some(deepest) = manifest_dirs
        .into_iter()
        .max_by_key(|dir| dir.components().count())
    {
        return deepest;
    }
    if let Some(dir) = first_required_dir {
        return dir;
    }
    root.to_path_buf()
}
