//! Per-board distribution builds.
//!
//! Each build runs Clean -> CopyTemplate -> CopyBinaries -> Archive against
//! the shared staging directory. The builder holds an exclusive lock on that
//! directory for its whole lifetime.

use anyhow::{bail, Context, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::artifact::archive::{create_zip, write_checksum_file, ArchiveSummary};
use crate::config::{required_artifacts, BuildTarget, DistribConfig};
use crate::staging::{clear_directory, copy_artifact, copy_template_tree, CleanupFailure};

/// Subfolder of the staging tree receiving the board binaries.
pub const BIN_DIR: &str = "bin";

/// Result of one successful target build.
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub output_base_name: String,
    pub archive: ArchiveSummary,
    pub checksum_file: Option<PathBuf>,
    /// Stale staging entries that could not be removed before this build.
    pub cleanup_failures: Vec<CleanupFailure>,
}

/// A target that failed in keep-going mode.
#[derive(Debug)]
pub struct TargetFailure {
    pub board_label: String,
    pub error: anyhow::Error,
}

/// Aggregate of a keep-going run.
#[derive(Debug, Default)]
pub struct BuildSummary {
    pub built: Vec<BuildOutcome>,
    pub failed: Vec<TargetFailure>,
}

impl BuildSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Turn the summary into an error naming every failed board.
    pub fn into_result(self) -> Result<Vec<BuildOutcome>> {
        if self.failed.is_empty() {
            return Ok(self.built);
        }
        let msg = self
            .failed
            .iter()
            .map(|f| format!("  {}: {:#}", f.board_label, f.error))
            .collect::<Vec<_>>()
            .join("\n");
        Err(anyhow::anyhow!(
            "{} of {} distribution(s) failed:\n{}",
            self.failed.len(),
            self.failed.len() + self.built.len(),
            msg
        ))
    }
}

/// Builds distribution archives for the targets of a [`DistribConfig`].
#[derive(Debug)]
pub struct DistributionBuilder {
    config: DistribConfig,
    _lock: StagingLock,
}

impl DistributionBuilder {
    /// Validate `config` and take exclusive ownership of its staging directory.
    pub fn new(config: DistribConfig) -> Result<Self> {
        config.validate()?;
        let lock = StagingLock::acquire(&config.staging_lock_path())?;
        Ok(Self {
            config,
            _lock: lock,
        })
    }

    pub fn config(&self) -> &DistribConfig {
        &self.config
    }

    pub fn staging_dir(&self) -> &Path {
        &self.config.staging_dir
    }

    /// Build one target using the configured version for its archive name.
    pub fn build_target(&self, target: &BuildTarget) -> Result<BuildOutcome> {
        self.build_distribution(
            &target.template,
            &target.target_folder,
            target.include_ota,
            &target.output_base_name(&self.config.version),
        )
        .with_context(|| format!("building distribution for '{}'", target.board_label))
    }

    /// Assemble the staging tree for one board and archive it as
    /// `<output_dir>/<output_base_name>.zip`.
    ///
    /// A missing template or binary aborts before any archive is written.
    pub fn build_distribution(
        &self,
        template: &str,
        target_folder: &str,
        include_ota: bool,
        output_base_name: &str,
    ) -> Result<BuildOutcome> {
        let tag = target_folder;
        let src = self.config.repo_root.join(template);
        let dest = self.config.staging_dir.as_path();

        println!("[distrib:{tag}] building {output_base_name}");

        println!("[distrib:{tag}] clearing {}", dest.display());
        let cleanup_failures = clear_directory(dest)?;

        println!("[distrib:{tag}] copying template files from {template}");
        copy_template_tree(&src, dest).with_context(|| {
            format!(
                "copying template '{}' into '{}'",
                src.display(),
                dest.display()
            )
        })?;

        let source_dir = self.config.source_root.join(target_folder);
        let bin_dir = dest.join(BIN_DIR);
        for artifact in required_artifacts(include_ota) {
            println!(
                "[distrib:{tag}] copying {} to {}",
                source_dir.join(artifact).display(),
                bin_dir.display()
            );
            copy_artifact(&source_dir, artifact, &bin_dir)?;
        }

        let archive_path = self
            .config
            .output_dir
            .join(format!("{output_base_name}.zip"));
        println!("[distrib:{tag}] zipping into {}", archive_path.display());
        let archive = create_zip(dest, &archive_path)?;

        let checksum_file = if self.config.write_checksums {
            Some(write_checksum_file(&archive)?)
        } else {
            None
        };

        println!(
            "[distrib:{tag}] build complete: {} ({} entries, {} bytes, sha256 {})",
            archive.path.display(),
            archive.entries,
            archive.size_bytes,
            archive.sha256
        );

        Ok(BuildOutcome {
            output_base_name: output_base_name.to_string(),
            archive,
            checksum_file,
            cleanup_failures,
        })
    }

    /// Build every target in order. The first failure aborts the run.
    pub fn build_all(&self) -> Result<Vec<BuildOutcome>> {
        let mut outcomes = Vec::with_capacity(self.config.targets.len());
        for target in &self.config.targets {
            outcomes.push(self.build_target(target)?);
        }
        println!("[distrib] all done: {} archive(s)", outcomes.len());
        Ok(outcomes)
    }

    /// Build every target in order, recording failures and carrying on.
    pub fn build_all_isolated(&self) -> BuildSummary {
        let mut summary = BuildSummary::default();
        for target in &self.config.targets {
            match self.build_target(target) {
                Ok(outcome) => summary.built.push(outcome),
                Err(error) => {
                    eprintln!(
                        "  [WARN] {} failed, continuing: {:#}",
                        target.board_label, error
                    );
                    summary.failed.push(TargetFailure {
                        board_label: target.board_label.clone(),
                        error,
                    });
                }
            }
        }
        println!(
            "[distrib] done: {} built, {} failed",
            summary.built.len(),
            summary.failed.len()
        );
        summary
    }
}

/// Exclusive advisory lock on `<staging>.lock`, released on drop.
///
/// The holder writes its pid into the file so a refused builder can say who
/// owns the staging directory. The file itself is left in place: unlinking it
/// would let another process lock a fresh inode under the same name.
#[derive(Debug)]
struct StagingLock {
    _file: File,
}

impl StagingLock {
    fn acquire(lock_path: &Path) -> Result<Self> {
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("creating lock directory '{}'", parent.display())
            })?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(lock_path)
            .with_context(|| format!("opening staging lock '{}'", lock_path.display()))?;

        if let Err(err) = file.try_lock_exclusive() {
            let mut holder = String::new();
            let _ = file.read_to_string(&mut holder);
            let holder = match holder.trim() {
                "" => "unknown process".to_string(),
                pid => format!("pid {pid}"),
            };
            bail!(
                "Staging directory is locked by another build ({holder}): {} ({err})",
                lock_path.display()
            );
        }

        file.set_len(0)
            .and_then(|()| file.seek(SeekFrom::Start(0)))
            .and_then(|_| writeln!(file, "{}", std::process::id()))
            .with_context(|| format!("recording owner in '{}'", lock_path.display()))?;

        Ok(Self { _file: file })
    }
}
