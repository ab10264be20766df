//! Preflight checks for distribution builds.
//!
//! Validates that every template directory and every required board binary
//! exists before anything is written. This lets a release manager see all
//! missing inputs at once instead of one per run.
//!
//! # Example
//!
//! ```rust,ignore
//! use tonex_distrib::config::DistribConfig;
//! use tonex_distrib::preflight::check_inputs;
//!
//! let config = DistribConfig::with_defaults(&std::env::current_dir()?);
//! if let Err(e) = check_inputs(&config) {
//!     eprintln!("{}", e);
//! }
//! ```

use anyhow::{bail, Result};
use std::path::PathBuf;

use crate::config::{BuildTarget, DistribConfig};

/// A required input that is not on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingInput {
    pub board_label: String,
    pub path: PathBuf,
}

/// Every missing template directory or binary for one target.
pub fn missing_inputs_for(config: &DistribConfig, target: &BuildTarget) -> Vec<MissingInput> {
    let mut missing = Vec::new();

    let template = config.template_dir(target);
    if !template.is_dir() {
        missing.push(MissingInput {
            board_label: target.board_label.clone(),
            path: template,
        });
    }

    let source_dir = config.target_source_dir(target);
    for artifact in target.required_artifacts() {
        let path = source_dir.join(artifact);
        if !path.is_file() {
            missing.push(MissingInput {
                board_label: target.board_label.clone(),
                path,
            });
        }
    }

    missing
}

/// Check all configured targets.
///
/// # Returns
///
/// * `Ok(())` if every input is present
/// * `Err` listing every missing input, grouped by board
pub fn check_inputs(config: &DistribConfig) -> Result<()> {
    let missing: Vec<MissingInput> = config
        .targets
        .iter()
        .flat_map(|target| missing_inputs_for(config, target))
        .collect();

    if !missing.is_empty() {
        let msg = missing
            .iter()
            .map(|m| format!("  [{}] {}", m.board_label, m.path.display()))
            .collect::<Vec<_>>()
            .join("\n");
        bail!("Missing distribution inputs:\n{}", msg);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn config_for(repo: &Path, targets: Vec<BuildTarget>) -> DistribConfig {
        let mut config = DistribConfig::with_defaults(repo);
        config.source_root = repo.join("source");
        config.targets = targets;
        config
    }

    fn write_board(repo: &Path, folder: &str, with_ota: bool) {
        let dir = repo.join("source").join(folder);
        fs::create_dir_all(dir.join("bootloader")).unwrap();
        fs::create_dir_all(dir.join("partition_table")).unwrap();
        fs::write(dir.join("bootloader/bootloader.bin"), b"b").unwrap();
        fs::write(dir.join("partition_table/partition-table.bin"), b"p").unwrap();
        fs::write(dir.join("TonexController.bin"), b"f").unwrap();
        if with_ota {
            fs::write(dir.join("ota_data_initial.bin"), b"o").unwrap();
        }
    }

    #[test]
    fn complete_inputs_pass() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("tmpl")).unwrap();
        write_board(temp.path(), "build_a", true);
        let config = config_for(
            temp.path(),
            vec![BuildTarget::new("tmpl", "build_a", true, "A")],
        );

        assert!(check_inputs(&config).is_ok());
    }

    #[test]
    fn ota_file_only_required_when_included() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("tmpl")).unwrap();
        write_board(temp.path(), "build_a", false);

        let without = config_for(
            temp.path(),
            vec![BuildTarget::new("tmpl", "build_a", false, "A")],
        );
        assert!(check_inputs(&without).is_ok());

        let with = config_for(
            temp.path(),
            vec![BuildTarget::new("tmpl", "build_a", true, "A")],
        );
        let missing = missing_inputs_for(&with, &with.targets[0]);
        assert_eq!(missing.len(), 1);
        assert!(missing[0].path.ends_with("build_a/ota_data_initial.bin"));
    }

    #[test]
    fn reports_every_missing_input_across_targets() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("tmpl")).unwrap();
        write_board(temp.path(), "build_a", true);
        let config = config_for(
            temp.path(),
            vec![
                BuildTarget::new("tmpl", "build_a", true, "A"),
                BuildTarget::new("missing_tmpl", "build_b", true, "B"),
            ],
        );

        let err = check_inputs(&config).unwrap_err().to_string();
        assert!(err.contains("missing_tmpl"));
        assert!(err.contains("build_b/bootloader/bootloader.bin"));
        assert!(err.contains("build_b/TonexController.bin"));
        assert!(!err.contains("[A]"));
    }
}
