//! Artifact writers for distribution output.
//!
//! - [`archive`] - Deterministic zip archives of the staging tree, plus
//!   listing, extraction and SHA-256 digests of finished archives

pub mod archive;
