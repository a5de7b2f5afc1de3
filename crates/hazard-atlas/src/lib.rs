//! Hazard Atlas -- lossless packing of hazard-report tables into RGBA texels.
//!
//! This crate turns a table of regional hazard ratings into a square,
//! power-of-two RGBA8 image that a fragment shader can index by row. It has
//! no GPU dependency: the output is a plain byte buffer that any texture
//! wrapper can upload.
//!
//! The pieces, leaf-first:
//!
//! - [`codec`] -- numeric value <-> 4-byte big-endian texel.
//! - [`atlas`] -- square power-of-two layout, one record per row.
//! - [`report`] -- the [`HazardRecord`](report::HazardRecord) table and its
//!   ingestion rules.
//! - [`texture`] -- the deterministic report-texture builder and its cache.
//!
//! # Quick Start
//!
//! ```
//! use hazard_atlas::prelude::*;
//!
//! let report = HazardReport::from_json(
//!     r#"[{"regionCode": "AT-07-01", "dangerBorder": 2000, "ratingHigh": 3,
//!          "ratingLow": 2, "unfavorableStart": 14, "unfavorableEnd": 2}]"#,
//! ).unwrap();
//!
//! let texture = ReportTexture::build(&report, FieldLayout::Magnitudes).unwrap();
//! assert_eq!(texture.atlas().side(), 8);
//! assert_eq!(decode_value(texture.atlas().texel(0, 0)), 2000.0);
//! ```

#![deny(unsafe_code)]

pub mod atlas;
pub mod codec;
pub mod report;
pub mod texture;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced while building report atlases.
#[derive(Debug, thiserror::Error)]
pub enum AtlasError {
    /// The number of encoded texels does not match `rows * fields_per_row`.
    #[error("expected {expected} texels ({rows} rows x {fields_per_row} fields), got {actual}")]
    TexelCountMismatch {
        rows: u32,
        fields_per_row: u32,
        expected: usize,
        actual: usize,
    },

    /// The atlas side would exceed the largest texture we are willing to build.
    #[error("atlas side {side} exceeds the maximum of {max} texels ({rows} rows)")]
    AtlasTooLarge { rows: u32, side: u32, max: u32 },

    /// The report payload could not be parsed.
    #[error("invalid hazard report: {0}")]
    InvalidReport(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::atlas::{next_pow2, AtlasLayout, EncodedAtlas, MAX_ATLAS_SIDE};
    pub use crate::codec::{
        decode_nibbles, decode_value, encode_nibbles, encode_value, pack_sectors, unpack_sectors,
        MAX_ENCODABLE,
    };
    pub use crate::report::{HazardRecord, HazardReport, DEFAULT_DANGER_BORDER};
    pub use crate::texture::{FieldLayout, ReportTexture, ReportTextureCache};
    pub use crate::AtlasError;
}
