//! Square power-of-two atlas layout for fixed-width records.
//!
//! Record `i` always starts at texel `(0, i)`, so a shader can fetch field
//! `f` of record `i` with `textureLoad(atlas, vec2(f, i))` regardless of how
//! many records the table holds. Everything outside the records is zero,
//! which means unused capacity can never be mistaken for a valid record.
//!
//! # Layout
//!
//! ```text
//!          col 0   col 1   ...  col F-1   col F ... col S-1
//! row 0   [rec0.0][rec0.1] ... [rec0.F-1] [0 0 0 0 ...     ]
//! row 1   [rec1.0][rec1.1] ... [rec1.F-1] [0 0 0 0 ...     ]
//! ...
//! row N   [0 0 0 0 ...                                      ]
//! ```

use crate::AtlasError;

/// Largest atlas side we build, in texels.
///
/// Matches the minimum `max_texture_dimension_2d` guaranteed by WebGPU.
pub const MAX_ATLAS_SIDE: u32 = 8192;

/// Bytes per texel (RGBA8).
const CHANNELS: usize = 4;

/// Round `n` up to the next power of two by bit smearing.
///
/// `0` is treated as `1`: the smallest atlas still has one texel.
///
/// ```
/// use hazard_atlas::atlas::next_pow2;
///
/// assert_eq!(next_pow2(0), 1);
/// assert_eq!(next_pow2(17), 32);
/// assert_eq!(next_pow2(256), 256);
/// ```
pub fn next_pow2(n: u32) -> u32 {
    if n <= 1 {
        return 1;
    }
    let mut v = n - 1;
    v |= v >> 1;
    v |= v >> 2;
    v |= v >> 4;
    v |= v >> 8;
    v |= v >> 16;
    v.wrapping_add(1)
}

// ---------------------------------------------------------------------------
// AtlasLayout
// ---------------------------------------------------------------------------

/// Geometry of a report atlas: how many records, how wide each is, and the
/// resulting square side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtlasLayout {
    row_count: u32,
    fields_per_row: u32,
    side: u32,
}

impl AtlasLayout {
    /// Compute the layout for `row_count` records of `fields_per_row` texels.
    ///
    /// The side is the smallest power of two that holds every record in its
    /// own row. For tables with at least as many records as fields that is
    /// `next_pow2(row_count)`; very small tables are widened so a record is
    /// never truncated.
    pub fn new(row_count: u32, fields_per_row: u32) -> Self {
        let side = next_pow2(row_count.max(fields_per_row));
        Self {
            row_count,
            fields_per_row,
            side,
        }
    }

    /// Number of records.
    pub fn row_count(&self) -> u32 {
        self.row_count
    }

    /// Texels per record.
    pub fn fields_per_row(&self) -> u32 {
        self.fields_per_row
    }

    /// Width and height of the atlas in texels.
    pub fn side(&self) -> u32 {
        self.side
    }

    /// Bytes per atlas row.
    pub fn row_stride(&self) -> usize {
        self.side as usize * CHANNELS
    }

    /// Place `texels` (record-major, `row_count * fields_per_row` entries)
    /// into a zero-filled square buffer.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::TexelCountMismatch`] if `texels` has the wrong
    /// length and [`AtlasError::AtlasTooLarge`] if the side exceeds
    /// [`MAX_ATLAS_SIDE`].
    pub fn pack(&self, texels: &[[u8; 4]]) -> Result<EncodedAtlas, AtlasError> {
        let expected = self.row_count as usize * self.fields_per_row as usize;
        if texels.len() != expected {
            return Err(AtlasError::TexelCountMismatch {
                rows: self.row_count,
                fields_per_row: self.fields_per_row,
                expected,
                actual: texels.len(),
            });
        }
        if self.side > MAX_ATLAS_SIDE {
            return Err(AtlasError::AtlasTooLarge {
                rows: self.row_count,
                side: self.side,
                max: MAX_ATLAS_SIDE,
            });
        }

        let stride = self.row_stride();
        let mut data = vec![0u8; stride * self.side as usize];

        if self.fields_per_row > 0 {
            for (row, record) in texels.chunks(self.fields_per_row as usize).enumerate() {
                let start = row * stride;
                let dst = &mut data[start..start + record.len() * CHANNELS];
                for (slot, texel) in dst.chunks_exact_mut(CHANNELS).zip(record) {
                    slot.copy_from_slice(texel);
                }
            }
        }

        Ok(EncodedAtlas {
            layout: *self,
            data,
        })
    }
}

// ---------------------------------------------------------------------------
// EncodedAtlas
// ---------------------------------------------------------------------------

/// A packed, zero-padded RGBA8 atlas ready for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedAtlas {
    layout: AtlasLayout,
    data: Vec<u8>,
}

impl EncodedAtlas {
    /// The layout this atlas was packed with.
    pub fn layout(&self) -> AtlasLayout {
        self.layout
    }

    /// Width and height in texels.
    pub fn side(&self) -> u32 {
        self.layout.side
    }

    /// Number of records stored.
    pub fn row_count(&self) -> u32 {
        self.layout.row_count
    }

    /// Texels per record.
    pub fn fields_per_row(&self) -> u32 {
        self.layout.fields_per_row
    }

    /// Bytes per row (`side * 4`).
    pub fn row_stride(&self) -> usize {
        self.layout.row_stride()
    }

    /// The texel at column `col` of row `row`.
    ///
    /// # Panics
    ///
    /// Panics if `row` or `col` is outside the atlas.
    pub fn texel(&self, row: u32, col: u32) -> [u8; 4] {
        assert!(
            row < self.side() && col < self.side(),
            "texel ({col}, {row}) outside {side}x{side} atlas",
            side = self.side()
        );
        let offset = row as usize * self.row_stride() + col as usize * CHANNELS;
        let mut texel = [0u8; 4];
        texel.copy_from_slice(&self.data[offset..offset + CHANNELS]);
        texel
    }

    /// The raw bytes of row `row` (`side * 4` bytes).
    pub fn row(&self, row: u32) -> &[u8] {
        let start = row as usize * self.row_stride();
        &self.data[start..start + self.row_stride()]
    }

    /// The whole buffer, row-major.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}
