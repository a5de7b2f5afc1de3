//! The two-pass hazard layer.
//!
//! [`HazardLayer`] is the service the map renderer drives. It holds the
//! evaluated configuration, the current hazard report, and the per-tile
//! resource cache, and it is invoked once per render pass through
//! [`HazardLayer::draw`]:
//!
//! - [`RenderPass::Offscreen`] prepares every dirty tile into its own
//!   framebuffer.
//! - [`RenderPass::Translucent`] composites prepared tiles into the scene.
//! - Any other pass is ignored.
//!
//! The renderer feeds tile lifecycle events in with
//! [`HazardLayer::on_dem_loaded`] and [`HazardLayer::on_tile_evicted`].

use std::collections::{BTreeMap, HashMap};

use hazard_atlas::report::HazardReport;
use hazard_atlas::texture::{FieldLayout, ReportTextureCache};

use crate::backend::{
    CompositeUniforms, PrepareBindings, PrepareUniforms, RenderBackend, StencilMode, TextureDesc,
    TextureFilter, TextureId,
};
use crate::cache::{TilePhase, TileResourceCache};
use crate::config::{HazardLayerConfig, Visibility};
use crate::dem::DemData;
use crate::geo::{prepare_matrix, tile_lat_range, OverscaledTileId};
use crate::RenderError;

// ---------------------------------------------------------------------------
// Host interfaces
// ---------------------------------------------------------------------------

/// The render pass the host is currently executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderPass {
    Offscreen,
    Opaque,
    Translucent,
}

/// A raster source mapping tiles to region-membership textures.
///
/// Each texel of such a texture names an atlas row in its red and green
/// channels; a zero alpha means the pixel lies in no reported region.
pub trait RegionSource {
    fn tile_texture(&self, tile: &OverscaledTileId) -> Option<TextureId>;
}

impl RegionSource for HashMap<OverscaledTileId, TextureId> {
    fn tile_texture(&self, tile: &OverscaledTileId) -> Option<TextureId> {
        self.get(tile).copied()
    }
}

/// Tile data loaded by the host.
pub trait TileSources {
    /// Elevation data for a tile, once loaded.
    fn dem(&self, tile: &OverscaledTileId) -> Option<&DemData>;

    /// A registered region source by name.
    fn region_source(&self, name: &str) -> Option<&dyn RegionSource>;
}

/// The map renderer's view of the frame.
pub trait RenderHost {
    fn render_pass(&self) -> RenderPass;

    /// Full scene viewport `[x, y, width, height]`.
    fn viewport(&self) -> [u32; 4];

    /// Map bearing in radians.
    fn bearing(&self) -> f32;

    /// Column-major matrix placing the tile quad `[0, EXTENT]^2` in the scene.
    fn tile_matrix(&self, tile: &OverscaledTileId) -> [f32; 16];

    /// Stencil modes per overscaled zoom that keep overlapping tiles from
    /// drawing over each other. Zooms without an entry draw unmasked.
    fn stencil_for_overlap(&self, _tiles: &[OverscaledTileId]) -> BTreeMap<u8, StencilMode> {
        BTreeMap::new()
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Why a tile was not prepared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Nothing changed since the last prepare.
    NotDirty,
    /// The tile's elevation data has not arrived yet.
    DemUnavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareOutcome {
    Prepared,
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeOutcome {
    Drawn,
    /// The tile has never been prepared; nothing was drawn.
    NotPrepared,
}

/// What one [`HazardLayer::draw`] call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub prepared: u32,
    pub skipped: u32,
    /// Tiles whose prepare failed; they stay dirty.
    pub failed: u32,
    pub composited: u32,
    pub report_uploads: u32,
}

// ---------------------------------------------------------------------------
// HazardLayer
// ---------------------------------------------------------------------------

/// The report atlas as currently uploaded to the backend.
#[derive(Debug, Clone, Copy)]
struct UploadedReport {
    texture: TextureId,
    fingerprint: blake3::Hash,
    layout: FieldLayout,
    side: u32,
}

/// A hazard overlay layer and all of its GPU state.
#[derive(Debug)]
pub struct HazardLayer {
    config: HazardLayerConfig,
    report: HazardReport,
    report_cache: ReportTextureCache,
    report_upload: Option<UploadedReport>,
    report_uploads: u64,
    last_offscreen: FrameStats,
    tiles: TileResourceCache,
}

impl HazardLayer {
    /// Create a layer. The configuration is assumed valid; see
    /// [`HazardLayerConfig::validate`].
    pub fn new(config: HazardLayerConfig, report: HazardReport) -> Self {
        Self {
            config,
            report,
            report_cache: ReportTextureCache::new(),
            report_upload: None,
            report_uploads: 0,
            last_offscreen: FrameStats::default(),
            tiles: TileResourceCache::new(),
        }
    }

    pub fn config(&self) -> &HazardLayerConfig {
        &self.config
    }

    pub fn report(&self) -> &HazardReport {
        &self.report
    }

    pub fn tiles(&self) -> &TileResourceCache {
        &self.tiles
    }

    /// Total report atlas uploads over the layer's lifetime.
    pub fn report_uploads(&self) -> u64 {
        self.report_uploads
    }

    /// What the most recent offscreen pass did, including the tiles that
    /// failed when it returned an error.
    pub fn last_offscreen_stats(&self) -> FrameStats {
        self.last_offscreen
    }

    /// Whether the layer takes part in the offscreen pass.
    pub fn has_offscreen_pass(&self) -> bool {
        self.config.has_offscreen_pass()
    }

    pub fn phase(&self, tile: &OverscaledTileId) -> TilePhase {
        self.tiles.phase(tile)
    }

    // -- Lifecycle ----------------------------------------------------------

    /// Elevation data for `tile` arrived or changed.
    pub fn on_dem_loaded(&mut self, tile: OverscaledTileId) {
        self.tiles.mark_dirty(tile);
    }

    /// The host dropped `tile`; free its resources.
    pub fn on_tile_evicted(
        &mut self,
        tile: &OverscaledTileId,
        backend: &mut dyn RenderBackend,
    ) -> bool {
        self.tiles.evict(tile, backend)
    }

    /// Replace the hazard report. Every tile is re-prepared when the table
    /// content changed.
    pub fn set_report(&mut self, report: HazardReport) {
        if report.fingerprint() != self.report.fingerprint() {
            tracing::debug!(records = report.len(), "hazard report replaced");
            self.tiles.invalidate_all();
        }
        self.report = report;
    }

    /// Replace the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::InvalidParameter`] and keeps the old
    /// configuration if the new one is out of range.
    pub fn set_config(&mut self, config: HazardLayerConfig) -> Result<(), RenderError> {
        config.validate()?;
        if config.region_source != self.config.region_source
            || config.field_layout != self.config.field_layout
        {
            self.tiles.invalidate_all();
        }
        self.config = config;
        Ok(())
    }

    /// Destroy every GPU resource the layer owns.
    pub fn clear(&mut self, backend: &mut dyn RenderBackend) {
        self.tiles.clear(backend);
        if let Some(upload) = self.report_upload.take() {
            backend.destroy_texture(upload.texture);
        }
        self.report_cache.invalidate();
    }

    // -- Drawing ------------------------------------------------------------

    /// Run the layer for the host's current render pass over `tiles`.
    ///
    /// The viewport is reset to the host's scene viewport before returning,
    /// whether or not the pass succeeded.
    ///
    /// # Errors
    ///
    /// The offscreen pass tries every tile and then returns the first
    /// failure; a tile whose prepare failed stays dirty and is retried next
    /// frame. The translucent pass stops at the first failing tile.
    pub fn draw(
        &mut self,
        host: &dyn RenderHost,
        backend: &mut dyn RenderBackend,
        sources: &dyn TileSources,
        tiles: &[OverscaledTileId],
    ) -> Result<FrameStats, RenderError> {
        let uploads_before = self.report_uploads;
        let result = match host.render_pass() {
            RenderPass::Offscreen => self.offscreen_pass(backend, sources, tiles),
            RenderPass::Translucent => self.translucent_pass(host, backend, tiles),
            RenderPass::Opaque => Ok(FrameStats::default()),
        };
        backend.set_viewport(host.viewport());

        result.map(|mut stats| {
            stats.report_uploads = (self.report_uploads - uploads_before) as u32;
            stats
        })
    }

    fn offscreen_pass(
        &mut self,
        backend: &mut dyn RenderBackend,
        sources: &dyn TileSources,
        tiles: &[OverscaledTileId],
    ) -> Result<FrameStats, RenderError> {
        let mut stats = FrameStats::default();
        self.last_offscreen = stats;
        if !self.has_offscreen_pass() {
            return Ok(stats);
        }

        let uploads_before = self.report_uploads;
        let mut first_error = None;
        for tile in tiles {
            match self.prepare_tile(*tile, backend, sources) {
                Ok(PrepareOutcome::Prepared) => stats.prepared += 1,
                Ok(PrepareOutcome::Skipped(_)) => stats.skipped += 1,
                Err(e) => {
                    tracing::error!(tile = %tile, error = %e, "hazard prepare failed");
                    stats.failed += 1;
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        stats.report_uploads = (self.report_uploads - uploads_before) as u32;
        self.last_offscreen = stats;
        match first_error {
            Some(e) => Err(e),
            None => Ok(stats),
        }
    }

    fn translucent_pass(
        &mut self,
        host: &dyn RenderHost,
        backend: &mut dyn RenderBackend,
        tiles: &[OverscaledTileId],
    ) -> Result<FrameStats, RenderError> {
        let mut stats = FrameStats::default();
        if self.config.visibility == Visibility::None {
            return Ok(stats);
        }

        let stencils = host.stencil_for_overlap(tiles);
        backend.set_viewport(host.viewport());
        for tile in tiles {
            let stencil = stencils
                .get(&tile.overscaled_z)
                .copied()
                .unwrap_or_default();
            match self.composite_tile(*tile, host, backend, stencil) {
                Ok(CompositeOutcome::Drawn) => stats.composited += 1,
                Ok(CompositeOutcome::NotPrepared) => {}
                Err(e) => {
                    tracing::error!(tile = %tile, error = %e, "hazard composite failed");
                    return Err(e);
                }
            }
        }
        Ok(stats)
    }

    /// Prepare one tile if it is dirty.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Configuration`] when the region source is not
    /// set, not registered, or has no texture for the tile, and propagates
    /// atlas and backend failures. The tile stays dirty on error.
    pub fn prepare_tile(
        &mut self,
        tile: OverscaledTileId,
        backend: &mut dyn RenderBackend,
        sources: &dyn TileSources,
    ) -> Result<PrepareOutcome, RenderError> {
        if self.tiles.phase(&tile) != TilePhase::NeedsPrepare {
            return Ok(PrepareOutcome::Skipped(SkipReason::NotDirty));
        }
        let Some(dem) = sources.dem(&tile) else {
            tracing::trace!(tile = %tile, "hazard prepare skipped -- DEM not loaded");
            return Ok(PrepareOutcome::Skipped(SkipReason::DemUnavailable));
        };
        let regions = self.region_texture(&tile, sources)?;

        let (dim, stride) = (dem.dim(), dem.stride());
        let dem_texture = self.tiles.ensure_dem_texture(tile, backend, stride)?;
        backend.upload_texture(dem_texture, dem.get_pixels())?;

        let (report, report_dimension) = self.ensure_report_texture(backend)?;
        let framebuffer = self.tiles.ensure_framebuffer(tile, backend, dim)?;

        backend.set_viewport([0, 0, dim, dim]);
        let uniforms = PrepareUniforms {
            matrix: prepare_matrix(),
            unpack: dem.unpack_vector(),
            dimension: [stride as f32, stride as f32],
            report_dimension: report_dimension.map(|d| d as f32),
            lat_range: tile_lat_range(tile.canonical),
            zoom: f32::from(tile.overscaled_z),
            report_layout: self.config.field_layout,
        };
        let bindings = PrepareBindings {
            dem: dem_texture,
            regions,
            report,
        };
        backend.draw_prepare(framebuffer, &bindings, &uniforms)?;

        self.tiles.mark_prepared(tile);
        tracing::trace!(tile = %tile, dim, "hazard tile prepared");
        Ok(PrepareOutcome::Prepared)
    }

    /// Composite one prepared tile into the scene.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub fn composite_tile(
        &self,
        tile: OverscaledTileId,
        host: &dyn RenderHost,
        backend: &mut dyn RenderBackend,
        stencil: StencilMode,
    ) -> Result<CompositeOutcome, RenderError> {
        let target = match self.tiles.get(&tile) {
            Some(state) if state.prepare_count > 0 => state.framebuffer,
            _ => None,
        };
        let Some(target) = target else {
            return Ok(CompositeOutcome::NotPrepared);
        };
        let source = backend.color_attachment(target.framebuffer).ok_or_else(|| {
            RenderError::Backend(format!("framebuffer of tile {tile} has no colour attachment"))
        })?;

        let uniforms = CompositeUniforms {
            matrix: host.tile_matrix(&tile),
            lat_range: tile_lat_range(tile.canonical),
            light: self.config.light(host.bearing()),
            shadow: self.config.shadow_color.premultiplied(),
            highlight: self.config.highlight_color.premultiplied(),
            accent: self.config.accent_color.premultiplied(),
            ratings: self.config.rating_ramp(),
        };
        backend.draw_composite(source, &uniforms, stencil)?;
        Ok(CompositeOutcome::Drawn)
    }

    fn region_texture(
        &self,
        tile: &OverscaledTileId,
        sources: &dyn TileSources,
    ) -> Result<TextureId, RenderError> {
        let misconfigured = |name: &str, reason: String| RenderError::Configuration {
            source_name: name.to_owned(),
            reason,
        };

        let name = self
            .config
            .region_source
            .as_deref()
            .ok_or_else(|| misconfigured("", "no region source is configured".to_owned()))?;
        let source = sources
            .region_source(name)
            .ok_or_else(|| misconfigured(name, "source is not registered".to_owned()))?;
        source
            .tile_texture(tile)
            .ok_or_else(|| misconfigured(name, format!("no region texture for tile {tile}")))
    }

    /// Build the report atlas if stale and upload it if the backend copy
    /// differs. Returns the texture and its size.
    fn ensure_report_texture(
        &mut self,
        backend: &mut dyn RenderBackend,
    ) -> Result<(TextureId, [u32; 2]), RenderError> {
        let texture = self
            .report_cache
            .get_or_build(&self.report, self.config.field_layout)?;
        let dimensions = texture.dimensions();
        let fingerprint = texture.fingerprint();
        let layout = texture.layout();

        let reusable = match self.report_upload {
            Some(upload) if upload.fingerprint == fingerprint && upload.layout == layout => {
                return Ok((upload.texture, dimensions));
            }
            Some(upload) if upload.side == dimensions[0] => Some(upload.texture),
            Some(upload) => {
                backend.destroy_texture(upload.texture);
                None
            }
            None => None,
        };
        let id = match reusable {
            Some(id) => id,
            None => backend.create_texture(&TextureDesc::square(
                dimensions[0],
                TextureFilter::Nearest,
                "hazard report",
            ))?,
        };
        self.report_upload = None;
        if let Err(e) = backend.upload_texture(id, texture.atlas().as_bytes()) {
            backend.destroy_texture(id);
            return Err(e);
        }

        self.report_upload = Some(UploadedReport {
            texture: id,
            fingerprint,
            layout,
            side: dimensions[0],
        });
        self.report_uploads += 1;
        tracing::debug!(
            side = dimensions[0],
            ?layout,
            fingerprint = %fingerprint.to_hex(),
            "uploaded hazard report texture"
        );
        Ok((id, dimensions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicted_tiles_return_to_uninitialized() {
        let mut backend = crate::backend::software::SoftwareBackend::new();
        let mut layer = HazardLayer::new(HazardLayerConfig::default(), HazardReport::empty());
        let tile = OverscaledTileId::new(9, 0, 9, 272, 179);

        layer.on_dem_loaded(tile);
        assert_eq!(layer.phase(&tile), TilePhase::NeedsPrepare);
        assert!(layer.on_tile_evicted(&tile, &mut backend));
        assert_eq!(layer.phase(&tile), TilePhase::Uninitialized);
    }

    #[test]
    fn config_changes_that_affect_prepare_invalidate_tiles() {
        let mut layer = HazardLayer::new(HazardLayerConfig::default(), HazardReport::empty());
        let tile = OverscaledTileId::new(9, 0, 9, 272, 179);
        layer.on_dem_loaded(tile);
        layer.tiles.mark_prepared(tile);

        layer
            .set_config(HazardLayerConfig {
                exaggeration: 0.9,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(layer.phase(&tile), TilePhase::Ready, "shading only");

        layer
            .set_config(HazardLayerConfig {
                field_layout: FieldLayout::SectorFlags,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(layer.phase(&tile), TilePhase::NeedsPrepare);
    }

    #[test]
    fn invalid_config_is_rejected_and_kept() {
        let mut layer = HazardLayer::new(HazardLayerConfig::default(), HazardReport::empty());
        let err = layer
            .set_config(HazardLayerConfig {
                illumination_direction: 400.0,
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, RenderError::InvalidParameter { .. }));
        assert_eq!(layer.config().illumination_direction, 335.0);
    }
}
