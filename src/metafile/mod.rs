// src/metafile/mod.rs

//! Sidecar metadata files.
//!
//! - [`canonical`] reads, validates and writes `<locator>.thoth.yaml` in the
//!   canonical byte form.
//! - [`merge`] is the structural deep merge used by `merge-meta` and the diff
//!   expectations.
//! - [`diff`] compares existing and expected metadata in the three report
//!   formats.

pub mod canonical;
pub mod diff;
pub mod merge;

pub use canonical::{
    MetaDocument, MetaFileError, SIDECAR_SUFFIX, canonicalize, is_sidecar, load_meta_file,
    marshal_meta, parse_meta, sidecar_locator, write_meta_file,
};
pub use diff::{DiffDetail, DiffReport, DiffSummary, ValueDiff};
pub use merge::{deep_merge, deep_merge_maps, merge_optional};
