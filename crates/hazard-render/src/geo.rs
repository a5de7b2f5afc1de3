//! Tile identity and the little projection math the pipeline needs itself.
//!
//! Everything else about the map transform (position matrices, overlap
//! stencils) is supplied by the surrounding renderer through
//! [`RenderHost`](crate::pipeline::RenderHost).

use std::f64::consts::PI;
use std::fmt;

/// Tile-local coordinate extent of a full tile quad.
pub const EXTENT: f32 = 8192.0;

// ---------------------------------------------------------------------------
// Tile ids
// ---------------------------------------------------------------------------

/// A tile in the canonical Web Mercator pyramid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CanonicalTileId {
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

/// A tile as drawn: canonical id plus overzoom level and world wrap.
///
/// This is the identity per-tile resources are keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OverscaledTileId {
    pub overscaled_z: u8,
    pub wrap: i32,
    pub canonical: CanonicalTileId,
}

impl OverscaledTileId {
    /// Create an id. `overscaled_z` must be at least `z`.
    pub fn new(overscaled_z: u8, wrap: i32, z: u8, x: u32, y: u32) -> Self {
        debug_assert!(overscaled_z >= z, "overscaled zoom below canonical zoom");
        Self {
            overscaled_z,
            wrap,
            canonical: CanonicalTileId { z, x, y },
        }
    }
}

impl fmt::Display for OverscaledTileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = self.canonical;
        write!(f, "{}/{}/{}", c.z, c.x, c.y)?;
        if self.overscaled_z != c.z {
            write!(f, "@{}", self.overscaled_z)?;
        }
        if self.wrap != 0 {
            write!(f, "~{}", self.wrap)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Latitude range
// ---------------------------------------------------------------------------

/// Latitude in degrees of a normalized Mercator y (0 = north edge, 1 = south).
fn mercator_y_to_lat(y: f64) -> f64 {
    let y2 = 180.0 - y * 360.0;
    360.0 / PI * (y2 * PI / 180.0).exp().atan() - 90.0
}

/// Latitudes `[north, south]` of a tile's top and bottom edges.
///
/// Slope magnitudes derived from the DEM are divided by the cosine of the
/// latitude interpolated across this range, undoing Mercator stretching.
pub fn tile_lat_range(tile: CanonicalTileId) -> [f32; 2] {
    let tiles_at_zoom = 2f64.powi(i32::from(tile.z));
    let y = f64::from(tile.y);
    [
        mercator_y_to_lat(y / tiles_at_zoom) as f32,
        mercator_y_to_lat((y + 1.0) / tiles_at_zoom) as f32,
    ]
}

/// Latitude at normalized vertical tile position `v` (0 = top, 1 = bottom).
pub fn latitude_at(lat_range: [f32; 2], v: f32) -> f32 {
    lat_range[0] + (lat_range[1] - lat_range[0]) * v
}

// ---------------------------------------------------------------------------
// Matrices
// ---------------------------------------------------------------------------

/// Column-major orthographic projection (OpenGL convention, like `gl-matrix`).
pub fn ortho(left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) -> [f32; 16] {
    let lr = 1.0 / (left - right);
    let bt = 1.0 / (bottom - top);
    let nf = 1.0 / (near - far);

    // col0     col1     col2     col3
    [
        -2.0 * lr, 0.0, 0.0, 0.0, // column 0
        0.0, -2.0 * bt, 0.0, 0.0, // column 1
        0.0, 0.0, 2.0 * nf, 0.0, // column 2
        (left + right) * lr,
        (top + bottom) * bt,
        (far + near) * nf,
        1.0, // column 3
    ]
}

/// Post-multiply `m` by a translation.
pub fn translate(m: [f32; 16], [x, y, z]: [f32; 3]) -> [f32; 16] {
    let mut out = m;
    for row in 0..4 {
        out[12 + row] = m[row] * x + m[4 + row] * y + m[8 + row] * z + m[12 + row];
    }
    out
}

/// Transform a point by a column-major matrix (`w = 1`).
pub fn transform_point(m: &[f32; 16], [x, y, z]: [f32; 3]) -> [f32; 4] {
    let mut out = [0.0; 4];
    for (row, value) in out.iter_mut().enumerate() {
        *value = m[row] * x + m[4 + row] * y + m[8 + row] * z + m[12 + row];
    }
    out
}

/// Matrix mapping the tile quad `[0, EXTENT]^2` onto the full offscreen target.
///
/// The y axis is flipped relative to the scene so the offscreen texture can
/// be sampled with tile-space texture coordinates.
pub fn prepare_matrix() -> [f32; 16] {
    let m = ortho(0.0, EXTENT, -EXTENT, 0.0, 0.0, 1.0);
    translate(m, [0.0, -EXTENT, 0.0])
}

#[cfg(test)]
mod tests {
    use super::*;

    const WEB_MERCATOR_MAX_LAT: f32 = 85.051_13;

    #[test]
    fn world_tile_spans_mercator_limits() {
        let [north, south] = tile_lat_range(CanonicalTileId { z: 0, x: 0, y: 0 });
        assert!((north - WEB_MERCATOR_MAX_LAT).abs() < 1e-3, "north = {north}");
        assert!((south + WEB_MERCATOR_MAX_LAT).abs() < 1e-3, "south = {south}");
    }

    #[test]
    fn z1_top_row_ends_at_equator() {
        let [north, south] = tile_lat_range(CanonicalTileId { z: 1, x: 0, y: 0 });
        assert!(north > 85.0);
        assert!(south.abs() < 1e-4);
    }

    #[test]
    fn latitude_interpolates_top_to_bottom() {
        assert_eq!(latitude_at([40.0, 20.0], 0.0), 40.0);
        assert_eq!(latitude_at([40.0, 20.0], 1.0), 20.0);
        assert_eq!(latitude_at([40.0, 20.0], 0.25), 35.0);
    }

    #[test]
    fn prepare_matrix_covers_clip_space() {
        let m = prepare_matrix();
        let origin = transform_point(&m, [0.0, 0.0, 0.0]);
        let corner = transform_point(&m, [EXTENT, EXTENT, 0.0]);
        for (got, want) in origin.iter().zip([-1.0, -1.0, -1.0, 1.0]) {
            assert!((got - want).abs() < 1e-6, "origin {origin:?}");
        }
        for (got, want) in corner[..2].iter().zip([1.0, 1.0]) {
            assert!((got - want).abs() < 1e-6, "corner {corner:?}");
        }
    }

    #[test]
    fn display_includes_overscale_and_wrap() {
        assert_eq!(OverscaledTileId::new(12, 0, 12, 2176, 1436).to_string(), "12/2176/1436");
        assert_eq!(OverscaledTileId::new(16, -1, 14, 1, 2).to_string(), "14/1/2@16~-1");
    }
}
