//! Per-tile GPU resources.
//!
//! Every tile the hazard layer has seen owns a [`TileRiskState`]: its
//! uploaded DEM texture, its offscreen framebuffer, and a dirty flag. States
//! live in a map keyed by [`OverscaledTileId`] and are created, reused, and
//! destroyed explicitly; nothing is freed behind the caller's back.
//!
//! DEM textures come from a [`TexturePool`] keyed by raster side, so tiles
//! evicted and reloaded at the same resolution do not allocate.

use std::collections::HashMap;

use crate::backend::{FramebufferId, RenderBackend, TextureDesc, TextureFilter, TextureId};
use crate::geo::OverscaledTileId;
use crate::RenderError;

// ---------------------------------------------------------------------------
// TexturePool
// ---------------------------------------------------------------------------

/// A texture borrowed from a [`TexturePool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PooledTexture {
    pub id: TextureId,
    pub side: u32,
}

/// Free lists of square textures, keyed by side.
#[derive(Debug, Default)]
pub struct TexturePool {
    free: HashMap<u32, Vec<TextureId>>,
}

impl TexturePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a free texture of `side` or create one.
    pub fn acquire(
        &mut self,
        backend: &mut dyn RenderBackend,
        side: u32,
    ) -> Result<PooledTexture, RenderError> {
        if let Some(id) = self.free.get_mut(&side).and_then(Vec::pop) {
            return Ok(PooledTexture { id, side });
        }
        let id = backend.create_texture(&TextureDesc::square(side, TextureFilter::Nearest, "dem"))?;
        Ok(PooledTexture { id, side })
    }

    /// Return a texture for reuse.
    pub fn release(&mut self, texture: PooledTexture) {
        self.free.entry(texture.side).or_default().push(texture.id);
    }

    /// Number of free textures across all sides.
    pub fn free_count(&self) -> usize {
        self.free.values().map(Vec::len).sum()
    }

    /// Destroy every free texture.
    pub fn drain(&mut self, backend: &mut dyn RenderBackend) {
        for id in self.free.drain().flat_map(|(_, ids)| ids) {
            backend.destroy_texture(id);
        }
    }
}

// ---------------------------------------------------------------------------
// TileRiskState
// ---------------------------------------------------------------------------

/// Where a tile is in its prepare lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TilePhase {
    /// No elevation data has arrived for the tile.
    Uninitialized,
    /// Elevation data changed since the last successful prepare.
    NeedsPrepare,
    /// The offscreen texture matches the current inputs.
    Ready,
}

/// An offscreen render target owned by one tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffscreenTarget {
    pub framebuffer: FramebufferId,
    pub side: u32,
}

/// GPU resources and dirty flag of one tile.
#[derive(Debug, Clone, Default)]
pub struct TileRiskState {
    /// Set when elevation data or shared inputs change; cleared by prepare.
    pub needs_prepare: bool,
    pub dem_texture: Option<PooledTexture>,
    pub framebuffer: Option<OffscreenTarget>,
    /// Number of successful prepares.
    pub prepare_count: u64,
}

impl TileRiskState {
    pub fn phase(&self) -> TilePhase {
        if self.needs_prepare {
            TilePhase::NeedsPrepare
        } else if self.prepare_count > 0 {
            TilePhase::Ready
        } else {
            TilePhase::Uninitialized
        }
    }
}

// ---------------------------------------------------------------------------
// TileResourceCache
// ---------------------------------------------------------------------------

/// Tile states keyed by tile identity, plus the DEM texture pool.
#[derive(Debug, Default)]
pub struct TileResourceCache {
    tiles: HashMap<OverscaledTileId, TileRiskState>,
    pool: TexturePool,
}

impl TileResourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flag a tile for preparation, creating its state if needed.
    pub fn mark_dirty(&mut self, tile: OverscaledTileId) {
        self.tiles.entry(tile).or_default().needs_prepare = true;
    }

    /// Flag every known tile for preparation.
    pub fn invalidate_all(&mut self) {
        for state in self.tiles.values_mut() {
            state.needs_prepare = true;
        }
    }

    pub fn get(&self, tile: &OverscaledTileId) -> Option<&TileRiskState> {
        self.tiles.get(tile)
    }

    pub fn phase(&self, tile: &OverscaledTileId) -> TilePhase {
        self.tiles
            .get(tile)
            .map_or(TilePhase::Uninitialized, TileRiskState::phase)
    }

    /// Tiles currently flagged for preparation.
    pub fn dirty_tiles(&self) -> impl Iterator<Item = OverscaledTileId> + '_ {
        self.tiles
            .iter()
            .filter(|(_, state)| state.needs_prepare)
            .map(|(tile, _)| *tile)
    }

    /// The tile's DEM texture, sized `side x side`.
    ///
    /// Reuses the texture from a previous prepare when the side matches;
    /// otherwise swaps it for one from the pool.
    pub fn ensure_dem_texture(
        &mut self,
        tile: OverscaledTileId,
        backend: &mut dyn RenderBackend,
        side: u32,
    ) -> Result<TextureId, RenderError> {
        let state = self.tiles.entry(tile).or_default();
        match state.dem_texture {
            Some(texture) if texture.side == side => Ok(texture.id),
            previous => {
                let texture = self.pool.acquire(backend, side)?;
                if let Some(previous) = previous {
                    self.pool.release(previous);
                }
                state.dem_texture = Some(texture);
                Ok(texture.id)
            }
        }
    }

    /// The tile's offscreen framebuffer, sized to the tile's elevation
    /// dimension and created on first use.
    pub fn ensure_framebuffer(
        &mut self,
        tile: OverscaledTileId,
        backend: &mut dyn RenderBackend,
        side: u32,
    ) -> Result<FramebufferId, RenderError> {
        let state = self.tiles.entry(tile).or_default();
        match state.framebuffer {
            Some(target) if target.side == side => Ok(target.framebuffer),
            previous => {
                let framebuffer = backend.create_framebuffer(side)?;
                if let Some(previous) = previous {
                    backend.destroy_framebuffer(previous.framebuffer);
                }
                tracing::trace!(tile = %tile, side, "allocated hazard framebuffer");
                state.framebuffer = Some(OffscreenTarget { framebuffer, side });
                Ok(framebuffer)
            }
        }
    }

    /// Record a successful prepare.
    pub fn mark_prepared(&mut self, tile: OverscaledTileId) {
        let state = self.tiles.entry(tile).or_default();
        state.needs_prepare = false;
        state.prepare_count += 1;
    }

    /// Drop a tile: its DEM texture returns to the pool and its framebuffer
    /// is destroyed.
    pub fn evict(&mut self, tile: &OverscaledTileId, backend: &mut dyn RenderBackend) -> bool {
        let Some(state) = self.tiles.remove(tile) else {
            return false;
        };
        if let Some(texture) = state.dem_texture {
            self.pool.release(texture);
        }
        if let Some(target) = state.framebuffer {
            backend.destroy_framebuffer(target.framebuffer);
        }
        true
    }

    /// Evict every tile and destroy the pooled textures.
    pub fn clear(&mut self, backend: &mut dyn RenderBackend) {
        let tiles: Vec<_> = self.tiles.keys().copied().collect();
        for tile in &tiles {
            self.evict(tile, backend);
        }
        self.pool.drain(backend);
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn pool(&self) -> &TexturePool {
        &self.pool
    }
}
