//! Distribution build configuration.
//!
//! A [`DistribConfig`] is built once at startup, either from the compiled-in
//! board list ([`DistribConfig::with_defaults`]) or from a TOML file
//! ([`DistribConfig::load`]), and then handed to the builder explicitly.
//!
//! # TOML layout
//!
//! ```toml
//! version = "1.0.7.2_beta_4"
//! source_dir = "../source"   # optional, relative to the repo root
//! staging_dir = "temp"       # optional
//! output_dir = "."           # optional
//! write_checksums = false    # optional
//!
//! [[targets]]
//! template = "template_cust_partition"
//! target_folder = "build_ws169"
//! include_ota = true         # optional, defaults to true
//! board_label = "Waveshare_1_69"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Version string embedded in archive names when no config overrides it.
pub const DEFAULT_VERSION: &str = "1.0.7.2_beta_4";

/// Template directory shared by every compiled-in board.
pub const DEFAULT_TEMPLATE: &str = "template_cust_partition";

/// Staging directory, relative to the repo root.
pub const DEFAULT_STAGING_DIR: &str = "temp";

/// Firmware build tree, relative to the repo root.
pub const DEFAULT_SOURCE_DIR: &str = "../source";

/// Prefix of every produced archive name.
pub const ARCHIVE_PREFIX: &str = "TonexOneController_V";

/// Compiled-in boards, in build order.
///
/// Each tuple is (target_folder, board_label).
pub const DEFAULT_TARGETS: &[(&str, &str)] = &[
    ("build_ws169", "Waveshare_1_69"),
    ("build_ws43b_as", "Waveshare_4_3B_Display_Amp_Skins"),
    ("build_ws43b_ps", "Waveshare_4_3B_Display_Pedal_Skins"),
    ("build_wszero", "Waveshare_Zero"),
    ("build_devkitc_N8R2", "DevKitC_N8R2"),
    ("build_devkitc_N16R8", "DevKitC_N16R8"),
    ("build_m5atoms3r", "M5AtomS3R"),
];

/// Second-stage bootloader image, relative to the target folder.
pub const BOOTLOADER_BIN: &str = "bootloader/bootloader.bin";
/// Partition table image, relative to the target folder.
pub const PARTITION_TABLE_BIN: &str = "partition_table/partition-table.bin";
/// Initial OTA data partition, relative to the target folder.
pub const OTA_DATA_BIN: &str = "ota_data_initial.bin";
/// Application firmware image, relative to the target folder.
pub const FIRMWARE_BIN: &str = "TonexController.bin";

/// One board to package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildTarget {
    /// Template directory name under the repo root.
    pub template: String,
    /// Folder under the source root holding this board's build output.
    pub target_folder: String,
    /// Whether `ota_data_initial.bin` ships with this board.
    pub include_ota: bool,
    /// Suffix identifying the board in the archive name.
    pub board_label: String,
}

impl BuildTarget {
    pub fn new(
        template: impl Into<String>,
        target_folder: impl Into<String>,
        include_ota: bool,
        board_label: impl Into<String>,
    ) -> Self {
        Self {
            template: template.into(),
            target_folder: target_folder.into(),
            include_ota,
            board_label: board_label.into(),
        }
    }

    /// `TonexOneController_V<version>_<board_label>`
    pub fn output_base_name(&self, version: &str) -> String {
        format!("{ARCHIVE_PREFIX}{version}_{}", self.board_label)
    }

    pub fn required_artifacts(&self) -> Vec<&'static str> {
        required_artifacts(self.include_ota)
    }
}

/// Binaries copied into `bin/`, in copy order.
pub fn required_artifacts(include_ota: bool) -> Vec<&'static str> {
    let mut artifacts = vec![BOOTLOADER_BIN, PARTITION_TABLE_BIN];
    if include_ota {
        artifacts.push(OTA_DATA_BIN);
    }
    artifacts.push(FIRMWARE_BIN);
    artifacts
}

/// Fully resolved configuration for one invocation.
#[derive(Debug, Clone)]
pub struct DistribConfig {
    pub version: String,
    pub repo_root: PathBuf,
    pub source_root: PathBuf,
    pub staging_dir: PathBuf,
    pub output_dir: PathBuf,
    pub write_checksums: bool,
    pub targets: Vec<BuildTarget>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DistribToml {
    version: Option<String>,
    source_dir: Option<String>,
    staging_dir: Option<String>,
    output_dir: Option<String>,
    write_checksums: Option<bool>,
    targets: Vec<TargetToml>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TargetToml {
    template: Option<String>,
    target_folder: String,
    include_ota: Option<bool>,
    board_label: String,
}

impl DistribConfig {
    /// The compiled-in board list rooted at `repo_root`.
    pub fn with_defaults(repo_root: &Path) -> Self {
        let targets = DEFAULT_TARGETS
            .iter()
            .map(|(folder, label)| BuildTarget::new(DEFAULT_TEMPLATE, *folder, true, *label))
            .collect();

        Self {
            version: DEFAULT_VERSION.to_string(),
            repo_root: repo_root.to_path_buf(),
            source_root: resolve_repo_path(repo_root, DEFAULT_SOURCE_DIR),
            staging_dir: resolve_repo_path(repo_root, DEFAULT_STAGING_DIR),
            output_dir: repo_root.to_path_buf(),
            write_checksums: false,
            targets,
        }
    }

    /// Load and validate a TOML config file.
    pub fn load(repo_root: &Path, config_path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(config_path)
            .with_context(|| format!("reading distrib config '{}'", config_path.display()))?;
        Self::from_toml_str(repo_root, &raw)
            .with_context(|| format!("loading distrib config '{}'", config_path.display()))
    }

    /// Parse and validate TOML text. Relative paths resolve against `repo_root`.
    pub fn from_toml_str(repo_root: &Path, raw: &str) -> Result<Self> {
        let parsed: DistribToml = toml::from_str(raw).context("parsing distrib config")?;

        let targets = parsed
            .targets
            .into_iter()
            .map(|target| {
                BuildTarget::new(
                    target
                        .template
                        .unwrap_or_else(|| DEFAULT_TEMPLATE.to_string()),
                    target.target_folder,
                    target.include_ota.unwrap_or(true),
                    target.board_label,
                )
            })
            .collect();

        let config = Self {
            version: parsed
                .version
                .unwrap_or_else(|| DEFAULT_VERSION.to_string()),
            repo_root: repo_root.to_path_buf(),
            source_root: resolve_repo_path(
                repo_root,
                parsed.source_dir.as_deref().unwrap_or(DEFAULT_SOURCE_DIR),
            ),
            staging_dir: resolve_repo_path(
                repo_root,
                parsed.staging_dir.as_deref().unwrap_or(DEFAULT_STAGING_DIR),
            ),
            output_dir: parsed
                .output_dir
                .as_deref()
                .map(|path| resolve_repo_path(repo_root, path))
                .unwrap_or_else(|| repo_root.to_path_buf()),
            write_checksums: parsed.write_checksums.unwrap_or(false),
            targets,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would produce colliding or misplaced output.
    pub fn validate(&self) -> Result<()> {
        validate_name_part(&self.version, "version")?;

        if self.targets.is_empty() {
            bail!("no build targets configured");
        }

        let mut labels = BTreeSet::new();
        for target in &self.targets {
            parse_relative_path(&target.template, "template")?;
            parse_relative_path(&target.target_folder, "target_folder")?;
            validate_name_part(&target.board_label, "board_label")?;
            if !labels.insert(target.board_label.as_str()) {
                bail!(
                    "duplicate board_label '{}'; archive names would collide",
                    target.board_label
                );
            }
        }

        let staging = normalize_path(&self.staging_dir)?;
        if normalize_path(&self.output_dir)?.starts_with(&staging) {
            bail!(
                "output directory '{}' lies inside staging directory '{}'",
                self.output_dir.display(),
                self.staging_dir.display()
            );
        }

        // Staging is wiped before every target, so it must not overlap
        // anything the build reads from.
        if normalize_path(&self.repo_root)?.starts_with(&staging) {
            bail!(
                "staging directory '{}' contains the repo root '{}'",
                self.staging_dir.display(),
                self.repo_root.display()
            );
        }
        ensure_disjoint(&staging, &self.staging_dir, &self.source_root, "source root")?;
        for target in &self.targets {
            ensure_disjoint(
                &staging,
                &self.staging_dir,
                &self.template_dir(target),
                "template directory",
            )?;
        }

        Ok(())
    }

    /// Keep only the targets whose board labels are listed, in config order.
    pub fn retain_targets(&mut self, board_labels: &[String]) -> Result<()> {
        if board_labels.is_empty() {
            return Ok(());
        }
        for label in board_labels {
            if !self.targets.iter().any(|t| &t.board_label == label) {
                let known = self
                    .targets
                    .iter()
                    .map(|t| t.board_label.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                bail!("unknown board '{}'; expected one of: {}", label, known);
            }
        }
        self.targets
            .retain(|target| board_labels.contains(&target.board_label));
        Ok(())
    }

    /// Lock file guarding the staging directory; sits beside it, never inside.
    pub fn staging_lock_path(&self) -> PathBuf {
        let mut name = self
            .staging_dir
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| DEFAULT_STAGING_DIR.into());
        name.push(".lock");
        self.staging_dir.with_file_name(name)
    }

    pub fn template_dir(&self, target: &BuildTarget) -> PathBuf {
        self.repo_root.join(&target.template)
    }

    pub fn target_source_dir(&self, target: &BuildTarget) -> PathBuf {
        self.source_root.join(&target.target_folder)
    }

    pub fn archive_path(&self, target: &BuildTarget) -> PathBuf {
        self.output_dir
            .join(format!("{}.zip", target.output_base_name(&self.version)))
    }
}

/// Absolute form of `path` with `.` and `..` folded away lexically.
fn normalize_path(path: &Path) -> Result<PathBuf> {
    let absolute = std::path::absolute(path)
        .with_context(|| format!("resolving path '{}'", path.display()))?;
    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

fn ensure_disjoint(staging: &Path, staging_raw: &Path, other: &Path, what: &str) -> Result<()> {
    let other_norm = normalize_path(other)?;
    if other_norm.starts_with(staging) || staging.starts_with(&other_norm) {
        bail!(
            "staging directory '{}' overlaps {} '{}'",
            staging_raw.display(),
            what,
            other.display()
        );
    }
    Ok(())
}

pub(crate) fn resolve_repo_path(repo_root: &Path, path: &str) -> PathBuf {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        repo_root.join(candidate)
    }
}

fn parse_relative_path(raw: &str, field: &str) -> Result<PathBuf> {
    if raw.trim().is_empty() {
        bail!("{field} must not be empty");
    }
    let candidate = Path::new(raw);
    if candidate.is_absolute() {
        bail!("{field} must be relative, got absolute path '{}'", raw);
    }
    for component in candidate.components() {
        if matches!(
            component,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        ) {
            bail!(
                "{field} contains invalid traversal/root component in '{}'",
                raw
            );
        }
    }
    Ok(candidate.to_path_buf())
}

fn validate_name_part(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("{field} must not be empty");
    }
    if value.contains(['/', '\\']) {
        bail!("{field} '{}' must not contain path separators", value);
    }
    Ok(())
}
