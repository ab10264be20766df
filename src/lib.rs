//! Firmware distribution packaging for Tonex One controller boards.
//!
//! For every board this crate clears a staging directory, copies a template
//! tree of support files into it, adds the board's pre-built binaries under
//! `bin/` and zips the result into
//! `TonexOneController_V<version>_<board>.zip`.
//!
//! - **Configuration** - Compiled-in board list or a TOML file ([`config`])
//! - **Staging** - Best-effort cleanup and template/binary copies ([`staging`])
//! - **Archives** - Deterministic zip output and checksums ([`artifact`])
//! - **Preflight** - Report every missing input up front ([`preflight`])
//! - **Builder** - Per-board build and the driver loops ([`builder`])
//!
//! # Layout
//!
//! ```text
//! <repo_root>/
//!     template_cust_partition/     template tree (readme, flasher, bin/)
//!     temp/                        staging, rebuilt per board
//!     temp.lock                    held while a builder is alive
//!     TonexOneController_V*.zip    output
//! <repo_root>/../source/<target_folder>/
//!     bootloader/bootloader.bin
//!     partition_table/partition-table.bin
//!     ota_data_initial.bin
//!     TonexController.bin
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use tonex_distrib::{DistribConfig, DistributionBuilder};
//!
//! let config = DistribConfig::with_defaults(&std::env::current_dir()?);
//! let builder = DistributionBuilder::new(config)?;
//! for outcome in builder.build_all()? {
//!     println!("{}", outcome.archive.path.display());
//! }
//! ```

pub mod artifact;
pub mod builder;
pub mod config;
pub mod preflight;
pub mod staging;

pub use builder::{BuildOutcome, BuildSummary, DistributionBuilder};
pub use config::{BuildTarget, DistribConfig};
