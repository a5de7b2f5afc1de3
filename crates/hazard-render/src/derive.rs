//! Per-pixel math of the prepare and composite steps.
//!
//! These functions are the CPU reference for the WGSL shaders: the software
//! backend runs them directly and the `wgpu` backend's shaders mirror them
//! line for line. Keep both in sync.
//!
//! # Offscreen texel format
//!
//! | Channel | Content                                               |
//! |---------|-------------------------------------------------------|
//! | `r, g`  | slope derivative `d / 2 + 0.5`, clamped to `0..=1`    |
//! | `b`     | hazard level / 5 (0 = no hazard)                      |
//! | `a`     | 1 inside a reported region, 0 outside                 |

use hazard_atlas::codec::{decode_nibbles, decode_value, unpack_sectors};
use hazard_atlas::texture::FieldLayout;

use crate::backend::CompositeUniforms;
use crate::geo::latitude_at;

/// Slopes below this angle (degrees) are not avalanche terrain.
pub const STEEP_SLOPE_DEG: f32 = 30.0;

/// Highest hazard level on the danger scale.
pub const MAX_LEVEL: u8 = 5;

/// Compass sectors in the orientation rose.
const SECTORS: u8 = 16;

// ---------------------------------------------------------------------------
// Region lookup
// ---------------------------------------------------------------------------

/// Atlas row referenced by a region-membership texel.
///
/// Transparent texels lie outside every region; otherwise the row is
/// `r * 256 + g`.
pub fn region_row(texel: [u8; 4]) -> Option<u32> {
    let [r, g, _, a] = texel;
    (a != 0).then(|| u32::from(r) * 256 + u32::from(g))
}

/// The decoded fields of one report atlas row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReportRow {
    pub danger_border: f32,
    pub rating_high: f32,
    pub rating_low: f32,
    pub unfavorable_start: u8,
    pub unfavorable_end: u8,
}

impl ReportRow {
    /// Decode a row from its leading texels.
    ///
    /// `texel(col)` must return the texel at column `col` of the row.
    pub fn read(layout: FieldLayout, texel: impl Fn(u32) -> [u8; 4]) -> Self {
        let field = |col| decode_value(texel(col)) as f32;
        let sector = |value: f32| value.min(f32::from(SECTORS - 1)) as u8;
        let (unfavorable_start, unfavorable_end) = match layout {
            FieldLayout::Magnitudes => (sector(field(3)), sector(field(4))),
            FieldLayout::SectorFlags => unpack_sectors(decode_nibbles([texel(4), texel(5)])),
        };
        Self {
            danger_border: field(0),
            rating_high: field(1),
            rating_low: field(2),
            unfavorable_start,
            unfavorable_end,
        }
    }
}

// ---------------------------------------------------------------------------
// Slope and aspect
// ---------------------------------------------------------------------------

/// Slope derivative from a 3x3 elevation neighbourhood (`n[row][col]`).
///
/// Uses Horn weights and the zoom-dependent scaling of hillshading, so the
/// same value drives both the hazard classification and the shading.
pub fn slope_derivative(n: [[f32; 3]; 3], zoom: f32) -> [f32; 2] {
    let [[a, b, c], [d, _, f], [g, h, i]] = n.map(|row| row.map(|e| e / 4.0));

    let exaggeration_factor = if zoom < 2.0 {
        0.4
    } else if zoom < 4.5 {
        0.35
    } else {
        0.3
    };
    let exaggeration = if zoom < 15.0 {
        (zoom - 15.0) * exaggeration_factor
    } else {
        0.0
    };
    let scale = 2f32.powf(exaggeration + (19.2562 - zoom));

    [
        ((c + f + f + i) - (a + d + d + g)) / scale,
        ((g + h + h + i) - (a + b + b + c)) / scale,
    ]
}

/// Slope angle in radians for a derivative at the given latitude.
pub fn slope_angle(deriv: [f32; 2], latitude: f32) -> f32 {
    let length = deriv[0].hypot(deriv[1]);
    (1.25 * length / latitude.to_radians().cos()).atan()
}

/// Compass sector (0..16, N = 0, clockwise) the slope faces downhill.
pub fn aspect_sector(deriv: [f32; 2]) -> u8 {
    // x grows east, y grows south; downhill is the negative gradient.
    let bearing = (-deriv[0]).atan2(deriv[1]).to_degrees().rem_euclid(360.0);
    (((bearing + 11.25) / 22.5).floor() as u8) % SECTORS
}

/// Whether `sector` lies in the inclusive range `start..=end`, wrapping
/// through north when `start > end`.
pub fn sector_in_range(sector: u8, start: u8, end: u8) -> bool {
    if start <= end {
        (start..=end).contains(&sector)
    } else {
        sector >= start || sector <= end
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Hazard level (0..=5) for a pixel of a reported region.
///
/// The rating above or below the danger border applies on steep terrain,
/// raised by one on unfavorable aspects. Gentle slopes and zero ratings
/// yield 0.
pub fn hazard_level(row: &ReportRow, elevation: f32, slope_deg: f32, sector: u8) -> u8 {
    let mut rating = if elevation >= row.danger_border {
        row.rating_high
    } else {
        row.rating_low
    };
    if rating <= 0.0 || slope_deg < STEEP_SLOPE_DEG {
        return 0;
    }
    if sector_in_range(sector, row.unfavorable_start, row.unfavorable_end) {
        rating += 1.0;
    }
    rating.min(f32::from(MAX_LEVEL)) as u8
}

/// Pack a prepared pixel into its offscreen texel.
pub fn pack_prepared(deriv: [f32; 2], level: u8, inside_region: bool) -> [u8; 4] {
    let channel = |d: f32| ((d * 0.5 + 0.5).clamp(0.0, 1.0) * 255.0).round() as u8;
    let level = level.min(MAX_LEVEL);
    [
        channel(deriv[0]),
        channel(deriv[1]),
        (f32::from(level) / f32::from(MAX_LEVEL) * 255.0).round() as u8,
        if inside_region { 255 } else { 0 },
    ]
}

/// Inverse of [`pack_prepared`]: derivative, level, and region coverage.
pub fn unpack_prepared(texel: [u8; 4]) -> ([f32; 2], u8, f32) {
    let unit = |c: u8| f32::from(c) / 255.0;
    let deriv = [unit(texel[0]) * 2.0 - 1.0, unit(texel[1]) * 2.0 - 1.0];
    let level = (unit(texel[2]) * f32::from(MAX_LEVEL)).round() as u8;
    (deriv, level, unit(texel[3]))
}

// ---------------------------------------------------------------------------
// Shading
// ---------------------------------------------------------------------------

fn mix(a: [f32; 4], b: [f32; 4], t: f32) -> [f32; 4] {
    std::array::from_fn(|i| a[i] + (b[i] - a[i]) * t)
}

fn scale(c: [f32; 4], s: f32) -> [f32; 4] {
    c.map(|v| v * s)
}

/// `src` over `dst`, both premultiplied.
fn over(src: [f32; 4], dst: [f32; 4]) -> [f32; 4] {
    std::array::from_fn(|i| src[i] + dst[i] * (1.0 - src[3]))
}

/// Premultiplied output color of one composited pixel.
///
/// `v` is the vertical tile position (0 = top) used to interpolate the
/// latitude. The hillshade term sits over the rating tint.
pub fn shade(texel: [u8; 4], v: f32, uniforms: &CompositeUniforms) -> [f32; 4] {
    use std::f32::consts::PI;

    let (deriv, level, coverage) = unpack_prepared(texel);
    let slope = slope_angle(deriv, latitude_at(uniforms.lat_range, v));
    let aspect = if deriv[0] != 0.0 {
        deriv[1].atan2(-deriv[0])
    } else {
        PI / 2.0 * if deriv[1] > 0.0 { 1.0 } else { -1.0 }
    };

    let [intensity, azimuth] = uniforms.light;
    let azimuth = azimuth + PI;
    let base = 1.875 - intensity * 1.75;
    let max_value = 0.5 * PI;
    let scaled_slope = if intensity != 0.5 {
        ((base.powf(slope) - 1.0) / (base.powf(max_value) - 1.0)) * max_value
    } else {
        slope
    };
    let strength = (intensity * 2.0).clamp(0.0, 1.0);

    let accent = scale(uniforms.accent, (1.0 - scaled_slope.cos()) * strength);
    let shade = ((aspect + azimuth) / PI + 0.5).rem_euclid(2.0) - 1.0;
    let shade_color = scale(
        mix(uniforms.shadow, uniforms.highlight, shade.abs()),
        scaled_slope.sin() * strength,
    );
    let hillshade = over(shade_color, accent);

    if level == 0 || coverage == 0.0 {
        return hillshade;
    }
    let tint = scale(uniforms.ratings[usize::from(level - 1)], coverage);
    over(hillshade, tint)
}
