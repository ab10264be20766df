//! Zip archive creation for distribution packages.
//!
//! Entry names are relative to the archived directory, so its contents land
//! at the archive root. Entries are written in sorted order with a fixed
//! timestamp, which keeps archives of identical trees byte-identical.

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

/// A finished archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub path: PathBuf,
    /// Number of file and directory entries written.
    pub entries: usize,
    pub size_bytes: u64,
    pub sha256: String,
}

/// Zip the contents of `src_dir` into `out_path`.
///
/// The archive is written to `<out_path>.partial` first and renamed into
/// place only once complete, so a failure never leaves a truncated archive
/// under the final name.
///
/// # Example
///
/// ```rust,ignore
/// use tonex_distrib::artifact::archive::create_zip;
/// use std::path::Path;
///
/// let summary = create_zip(Path::new("temp"), Path::new("Out.zip"))?;
/// println!("{} entries, sha256 {}", summary.entries, summary.sha256);
/// ```
pub fn create_zip(src_dir: &Path, out_path: &Path) -> Result<ArchiveSummary> {
    if !src_dir.is_dir() {
        bail!("archive source directory not found: {}", src_dir.display());
    }
    if let Some(parent) = out_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating archive directory '{}'", parent.display()))?;
    }

    let partial = partial_path(out_path);
    let entries = match write_zip(src_dir, &partial) {
        Ok(entries) => entries,
        Err(err) => {
            let _ = fs::remove_file(&partial);
            return Err(err);
        }
    };

    fs::rename(&partial, out_path).with_context(|| {
        format!(
            "moving finished archive '{}' -> '{}'",
            partial.display(),
            out_path.display()
        )
    })?;

    let (sha256, size_bytes) = sha256_file(out_path)?;
    Ok(ArchiveSummary {
        path: out_path.to_path_buf(),
        entries,
        size_bytes,
        sha256,
    })
}

fn partial_path(out_path: &Path) -> PathBuf {
    let mut name = out_path.as_os_str().to_os_string();
    name.push(".partial");
    PathBuf::from(name)
}

fn write_zip(src_dir: &Path, out_path: &Path) -> Result<usize> {
    let out = File::create(out_path)
        .with_context(|| format!("Failed to create {}", out_path.display()))?;
    let mut writer = ZipWriter::new(BufWriter::new(out));

    let entries = collect_entries(src_dir)?;
    for (path, rel) in &entries {
        // Follows symlinks: the archive carries the linked content.
        let md = fs::metadata(path)
            .with_context(|| format!("reading metadata for '{}'", path.display()))?;

        if md.is_dir() {
            let options = entry_options(&md, 0o755);
            writer
                .add_directory(format!("{rel}/"), options)
                .with_context(|| format!("adding directory entry '{rel}/'"))?;
            continue;
        }

        if md.is_file() {
            let options = entry_options(&md, 0o644);
            writer
                .start_file(rel.as_str(), options)
                .with_context(|| format!("adding file entry '{rel}'"))?;
            let mut f = File::open(path)
                .with_context(|| format!("opening '{}' for archiving", path.display()))?;
            io::copy(&mut f, &mut writer)
                .with_context(|| format!("writing '{}' into archive", path.display()))?;
        }
    }

    let mut inner = writer
        .finish()
        .with_context(|| format!("finalizing archive '{}'", out_path.display()))?;
    inner.flush()?;
    Ok(entries.len())
}

fn entry_options(md: &fs::Metadata, fallback_mode: u32) -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default())
        .unix_permissions(entry_mode(md, fallback_mode))
}

/// Permission bits stored for an entry; platforms without Unix modes use
/// `fallback_mode`.
#[cfg(unix)]
fn entry_mode(md: &fs::Metadata, _fallback_mode: u32) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    md.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn entry_mode(_md: &fs::Metadata, fallback_mode: u32) -> u32 {
    fallback_mode
}

/// Collect every path under `src_dir` (excluding the root) with its
/// `/`-separated relative name, sorted by that name.
fn collect_entries(src_dir: &Path) -> Result<Vec<(PathBuf, String)>> {
    let mut entries = Vec::new();
    for ent in WalkDir::new(src_dir).follow_links(true) {
        let ent = ent.with_context(|| format!("walking '{}'", src_dir.display()))?;
        let p = ent.path();
        if p == src_dir {
            continue;
        }
        let rel = p
            .strip_prefix(src_dir)
            .unwrap_or(p)
            .to_string_lossy()
            .replace('\\', "/");
        entries.push((p.to_path_buf(), rel));
    }
    entries.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(entries)
}

/// Entry names of an archive, in stored order. Directories end with `/`.
pub fn list_entries(archive_path: &Path) -> Result<Vec<String>> {
    let mut archive = open_archive(archive_path)?;
    let mut names = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let file = archive
            .by_index(i)
            .with_context(|| format!("reading entry {i} of '{}'", archive_path.display()))?;
        names.push(file.name().to_string());
    }
    Ok(names)
}

/// Extract an archive into `dest`. Entries that would escape `dest` are rejected.
pub fn extract_zip(archive_path: &Path, dest: &Path) -> Result<()> {
    let mut archive = open_archive(archive_path)?;
    fs::create_dir_all(dest)
        .with_context(|| format!("creating extraction directory '{}'", dest.display()))?;

    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .with_context(|| format!("reading entry {i} of '{}'", archive_path.display()))?;

        let Some(rel) = file.enclosed_name() else {
            bail!(
                "unsafe entry name '{}' in '{}'",
                file.name(),
                archive_path.display()
            );
        };
        let dest_path = dest.join(rel);

        if file.is_dir() {
            fs::create_dir_all(&dest_path)?;
            continue;
        }

        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut outfile = File::create(&dest_path)
            .with_context(|| format!("creating '{}'", dest_path.display()))?;
        io::copy(&mut file, &mut outfile)
            .with_context(|| format!("extracting '{}'", dest_path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = file.unix_mode() {
                fs::set_permissions(&dest_path, fs::Permissions::from_mode(mode))?;
            }
        }
    }

    Ok(())
}

fn open_archive(archive_path: &Path) -> Result<ZipArchive<BufReader<File>>> {
    let file = File::open(archive_path)
        .with_context(|| format!("opening archive '{}'", archive_path.display()))?;
    ZipArchive::new(BufReader::new(file))
        .with_context(|| format!("reading zip directory of '{}'", archive_path.display()))
}

/// SHA-256 (lowercase hex) and size of a file.
pub fn sha256_file(path: &Path) -> Result<(String, u64)> {
    let f = File::open(path).with_context(|| format!("opening '{}' for hashing", path.display()))?;
    let mut r = BufReader::new(f);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let n = r.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok((format!("{:x}", hasher.finalize()), size))
}

/// Write `<archive>.sha256` in `sha256sum` format.
///
/// Verify with:
///   sha256sum -c TonexOneController_V<version>_<board>.zip.sha256
pub fn write_checksum_file(archive: &ArchiveSummary) -> Result<PathBuf> {
    let file_name = archive
        .path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow::anyhow!("archive path has no file name: {}", archive.path.display()))?;

    let mut checksum_path = archive.path.as_os_str().to_os_string();
    checksum_path.push(".sha256");
    let checksum_path = PathBuf::from(checksum_path);

    fs::write(&checksum_path, format!("{}  {}\n", archive.sha256, file_name))
        .with_context(|| format!("writing checksum '{}'", checksum_path.display()))?;
    Ok(checksum_path)
}
