//! Staging directory operations.
//!
//! The staging directory is emptied, refilled from a template and topped up
//! with board binaries before every archive. Deletion is best effort; copying
//! is not.

use anyhow::{bail, Context, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// An entry that could not be removed while clearing the staging directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupFailure {
    pub path: PathBuf,
    pub reason: String,
}

/// Remove everything directly inside `dir`, recursing into subdirectories.
///
/// Symlinks are unlinked, never followed. A failure on one entry is logged
/// and recorded, and the remaining entries are still processed. A missing
/// `dir` is created so that the first run on a fresh checkout works.
///
/// Returns the entries that could not be removed.
pub fn clear_directory(dir: &Path) -> Result<Vec<CleanupFailure>> {
    clear_directory_with(dir, remove_entry)
}

/// [`clear_directory`] with the per-entry removal supplied by the caller.
pub(crate) fn clear_directory_with<F>(dir: &Path, mut remove: F) -> Result<Vec<CleanupFailure>>
where
    F: FnMut(&Path) -> io::Result<()>,
{
    if !dir.exists() {
        fs::create_dir_all(dir)
            .with_context(|| format!("creating staging directory '{}'", dir.display()))?;
        return Ok(Vec::new());
    }

    let entries = fs::read_dir(dir)
        .with_context(|| format!("reading staging directory '{}'", dir.display()))?;

    let mut failures = Vec::new();
    for entry in entries {
        let path = match entry {
            Ok(entry) => entry.path(),
            Err(err) => {
                failures.push(log_cleanup_failure(dir.to_path_buf(), &err));
                continue;
            }
        };

        if let Err(err) = remove(&path) {
            failures.push(log_cleanup_failure(path, &err));
        }
    }

    Ok(failures)
}

fn log_cleanup_failure(path: PathBuf, err: &io::Error) -> CleanupFailure {
    eprintln!(
        "  [WARN] Failed to delete {}. Reason: {}",
        path.display(),
        err
    );
    CleanupFailure {
        path,
        reason: err.to_string(),
    }
}

fn remove_entry(path: &Path) -> io::Result<()> {
    if fs::symlink_metadata(path)?.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// Materialize the template tree at `src` inside `dst`.
///
/// Symlinks in the template are resolved: linked files land as regular
/// files and linked directories are copied in full, so links pointing
/// outside the template still work once staged. Entries already in `dst`
/// are overwritten. A link cycle is an error.
pub fn copy_template_tree(src: &Path, dst: &Path) -> Result<()> {
    if !src.is_dir() {
        bail!("template directory not found: {}", src.display());
    }
    fs::create_dir_all(dst)
        .with_context(|| format!("creating staging directory '{}'", dst.display()))?;

    for ent in WalkDir::new(src).follow_links(true).min_depth(1) {
        let ent = ent.with_context(|| format!("walking template '{}'", src.display()))?;
        let rel = ent.path().strip_prefix(src).with_context(|| {
            format!(
                "template entry '{}' outside '{}'",
                ent.path().display(),
                src.display()
            )
        })?;
        let target = dst.join(rel);

        if ent.file_type().is_dir() {
            make_room(&target, true)?;
            fs::create_dir_all(&target)
                .with_context(|| format!("creating '{}'", target.display()))?;
        } else if ent.file_type().is_file() {
            make_room(&target, false)?;
            fs::copy(ent.path(), &target).with_context(|| {
                format!(
                    "copying template file '{}' to '{}'",
                    ent.path().display(),
                    target.display()
                )
            })?;
        }
    }

    Ok(())
}

/// Drop whatever sits at `target` unless it is already a real directory and
/// a directory is wanted. Never writes through a stale symlink.
fn make_room(target: &Path, want_dir: bool) -> Result<()> {
    let Ok(existing) = fs::symlink_metadata(target) else {
        return Ok(());
    };
    if want_dir && existing.is_dir() {
        return Ok(());
    }
    remove_entry(target)
        .with_context(|| format!("replacing existing entry '{}'", target.display()))
}

/// Copy `source_dir/<relative>` into `dest_dir`, keeping only its file name.
///
/// A missing source is fatal: a distribution without its binaries is useless.
pub fn copy_artifact(source_dir: &Path, relative: &str, dest_dir: &Path) -> Result<PathBuf> {
    let src = source_dir.join(relative);
    if !src.is_file() {
        bail!("required artifact not found: {}", src.display());
    }
    let file_name = src
        .file_name()
        .ok_or_else(|| anyhow::anyhow!("artifact path has no file name: {}", src.display()))?;

    fs::create_dir_all(dest_dir)
        .with_context(|| format!("creating artifact directory '{}'", dest_dir.display()))?;
    let dst = dest_dir.join(file_name);
    make_room(&dst, false)?;
    fs::copy(&src, &dst)
        .with_context(|| format!("copying '{}' to '{}'", src.display(), dst.display()))?;
    Ok(dst)
}
