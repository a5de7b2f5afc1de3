//! Hazard Render -- two-phase per-tile avalanche hazard overlay.
//!
//! This crate builds on [`hazard_atlas`] to draw a hazard overlay over map
//! tiles. Each frame the surrounding map renderer calls
//! [`HazardLayer::draw`](pipeline::HazardLayer::draw) twice:
//!
//! 1. During the **offscreen** pass, every tile whose elevation data changed
//!    is *prepared*: its DEM, its region-membership raster, and the shared
//!    report atlas are combined into an offscreen texture holding the slope
//!    derivative and a hazard level per pixel.
//! 2. During the **translucent** pass, each prepared tile's offscreen texture
//!    is *composited* into the scene with directional shading and the rating
//!    color ramp.
//!
//! GPU work goes through the [`RenderBackend`](backend::RenderBackend) trait.
//! [`SoftwareBackend`](backend::software::SoftwareBackend) evaluates the same
//! math on the CPU and is always available; the `wgpu` backend lives behind
//! the `renderer` feature.
//!
//! # Quick Start
//!
//! ```
//! use hazard_render::prelude::*;
//!
//! let config = HazardLayerConfig {
//!     region_source: Some("regions".to_owned()),
//!     ..Default::default()
//! };
//! let mut layer = HazardLayer::new(config, HazardReport::empty());
//! let tile = OverscaledTileId::new(10, 0, 10, 544, 358);
//!
//! layer.on_dem_loaded(tile);
//! assert_eq!(layer.phase(&tile), TilePhase::NeedsPrepare);
//! assert!(layer.has_offscreen_pass());
//! ```

#![deny(unsafe_code)]

pub mod backend;
pub mod cache;
pub mod config;
pub mod dem;
pub mod derive;
pub mod geo;
pub mod pipeline;

/// Re-export the atlas crate for convenience.
pub use hazard_atlas;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by the hazard render pipeline.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// The region-membership source is missing or cannot serve the tile.
    ///
    /// Fatal for the tile's prepare step this frame; the tile stays dirty so
    /// the next frame retries once the configuration is fixed.
    #[error("hazard layer misconfigured (region source '{source_name}'): {reason}")]
    Configuration { source_name: String, reason: String },

    /// Building the report atlas failed.
    #[error("report atlas: {0}")]
    Atlas(#[from] hazard_atlas::AtlasError),

    /// A layer parameter is out of range.
    #[error("invalid {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    /// Layer configuration JSON could not be parsed.
    #[error("invalid layer configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),

    /// A raster's byte length does not match its dimensions.
    #[error("raster size mismatch: expected {expected} bytes, got {actual}")]
    RasterSize { expected: usize, actual: usize },

    /// The GPU backend rejected an operation.
    #[error("render backend: {0}")]
    Backend(String),
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use hazard_atlas::prelude::*;

    pub use crate::backend::software::SoftwareBackend;
    pub use crate::backend::{
        CompositeUniforms, FramebufferId, PrepareBindings, PrepareUniforms, RenderBackend,
        StencilMode, TextureDesc, TextureFilter, TextureId,
    };
    pub use crate::cache::{TexturePool, TilePhase, TileResourceCache, TileRiskState};
    pub use crate::config::{HazardLayerConfig, IlluminationAnchor, Rgba, Visibility};
    pub use crate::dem::{DemData, DemEncoding};
    pub use crate::geo::{CanonicalTileId, OverscaledTileId, EXTENT};
    pub use crate::pipeline::{
        CompositeOutcome, FrameStats, HazardLayer, PrepareOutcome, RegionSource, RenderHost,
        RenderPass, SkipReason, TileSources,
    };
    pub use crate::RenderError;
}
