//! Elevation rasters (DEM tiles).
//!
//! A [`DemData`] holds a `dim x dim` elevation tile stored as RGBA texels
//! with a one-texel border on every side, so the raster is
//! `stride = dim + 2` texels wide. The border lets the 3x3 slope kernel run
//! on edge pixels; tile loaders fill it from neighbouring tiles, and
//! [`DemData::from_elevations`] fills it by repeating the edge.
//!
//! Elevations are recovered with the encoding's unpack vector:
//!
//! ```text
//! elevation = r * unpack[0] + g * unpack[1] + b * unpack[2] - unpack[3]
//! ```

use crate::RenderError;

/// Bytes per texel.
const CHANNELS: usize = 4;

/// How elevations are packed into RGB.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DemEncoding {
    /// Mapbox terrain-RGB: `-10000 + (r * 65536 + g * 256 + b) * 0.1`.
    #[default]
    MapboxTerrainRgb,
    /// Terrarium: `r * 256 + g + b / 256 - 32768`.
    Terrarium,
}

impl DemEncoding {
    /// The `[r, g, b, offset]` unpack vector.
    pub fn unpack_vector(self) -> [f32; 4] {
        match self {
            DemEncoding::MapboxTerrainRgb => [6553.6, 25.6, 0.1, 10000.0],
            DemEncoding::Terrarium => [256.0, 1.0, 1.0 / 256.0, 32768.0],
        }
    }

    /// Pack an elevation (meters) into an opaque texel.
    pub fn encode(self, elevation: f32) -> [u8; 4] {
        match self {
            DemEncoding::MapboxTerrainRgb => {
                let v = ((elevation + 10000.0) * 10.0).round().clamp(0.0, 16_777_215.0) as u32;
                [(v >> 16) as u8, (v >> 8) as u8, v as u8, 255]
            }
            DemEncoding::Terrarium => {
                let v = (elevation + 32768.0).clamp(0.0, 65535.996);
                let whole = v.floor();
                [
                    (whole / 256.0) as u8,
                    (whole % 256.0) as u8,
                    ((v - whole) * 256.0) as u8,
                    255,
                ]
            }
        }
    }
}

/// Decode a texel with an unpack vector.
pub fn unpack_elevation(texel: [u8; 4], unpack: [f32; 4]) -> f32 {
    let [r, g, b, _] = texel.map(f32::from);
    r * unpack[0] + g * unpack[1] + b * unpack[2] - unpack[3]
}

// ---------------------------------------------------------------------------
// DemData
// ---------------------------------------------------------------------------

/// A bordered elevation tile. Read-only once loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct DemData {
    dim: u32,
    encoding: DemEncoding,
    pixels: Vec<u8>,
}

impl DemData {
    /// Wrap already-encoded, bordered pixels (`(dim + 2)^2` RGBA texels).
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::RasterSize`] if `pixels` has the wrong length.
    pub fn new(dim: u32, encoding: DemEncoding, pixels: Vec<u8>) -> Result<Self, RenderError> {
        let stride = dim as usize + 2;
        let expected = stride * stride * CHANNELS;
        if dim == 0 || pixels.len() != expected {
            return Err(RenderError::RasterSize {
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            dim,
            encoding,
            pixels,
        })
    }

    /// Encode `dim * dim` row-major elevations and fill the border by
    /// repeating the outermost rows and columns.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::RasterSize`] if `elevations` has the wrong length.
    pub fn from_elevations(
        dim: u32,
        encoding: DemEncoding,
        elevations: &[f32],
    ) -> Result<Self, RenderError> {
        let d = dim as usize;
        if dim == 0 || elevations.len() != d * d {
            return Err(RenderError::RasterSize {
                expected: d * d,
                actual: elevations.len(),
            });
        }

        let stride = d + 2;
        let mut pixels = vec![0u8; stride * stride * CHANNELS];
        for sy in 0..stride {
            let y = sy.saturating_sub(1).min(d - 1);
            for sx in 0..stride {
                let x = sx.saturating_sub(1).min(d - 1);
                let offset = (sy * stride + sx) * CHANNELS;
                pixels[offset..offset + CHANNELS]
                    .copy_from_slice(&encoding.encode(elevations[y * d + x]));
            }
        }

        Self::new(dim, encoding, pixels)
    }

    /// Side of the elevation tile without its border.
    pub fn dim(&self) -> u32 {
        self.dim
    }

    /// Side of the stored raster, border included.
    pub fn stride(&self) -> u32 {
        self.dim + 2
    }

    /// The encoding of the pixels.
    pub fn encoding(&self) -> DemEncoding {
        self.encoding
    }

    /// The `[r, g, b, offset]` unpack vector for shaders.
    pub fn unpack_vector(&self) -> [f32; 4] {
        self.encoding.unpack_vector()
    }

    /// Raw bordered RGBA pixels, row-major.
    pub fn get_pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Elevation at `(x, y)` in tile pixels; `-1` and `dim` address the border.
    pub fn elevation(&self, x: i32, y: i32) -> f32 {
        let stride = self.stride() as i32;
        let sx = (x + 1).clamp(0, stride - 1) as usize;
        let sy = (y + 1).clamp(0, stride - 1) as usize;
        let offset = (sy * stride as usize + sx) * CHANNELS;
        let mut texel = [0u8; 4];
        texel.copy_from_slice(&self.pixels[offset..offset + CHANNELS]);
        unpack_elevation(texel, self.unpack_vector())
    }
}
