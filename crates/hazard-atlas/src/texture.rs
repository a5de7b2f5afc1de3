//! Report texture builder.
//!
//! Encodes a [`HazardReport`] through the [codec](crate::codec) in a fixed
//! field order and packs the result with [`AtlasLayout`]. The build is a pure
//! function of the table and the [`FieldLayout`], so identical inputs always
//! yield byte-identical atlases and [`ReportTextureCache`] can skip rebuilds
//! by comparing fingerprints.

use serde::{Deserialize, Serialize};

use crate::atlas::{AtlasLayout, EncodedAtlas};
use crate::codec::{encode_nibbles, encode_value, pack_sectors};
use crate::report::{HazardRecord, HazardReport};
use crate::AtlasError;

// ---------------------------------------------------------------------------
// FieldLayout
// ---------------------------------------------------------------------------

/// Which texels a record occupies in the atlas.
///
/// | Column | `Magnitudes`       | `SectorFlags`                  |
/// |--------|--------------------|--------------------------------|
/// | 0      | danger border      | danger border                  |
/// | 1      | rating high        | rating high                    |
/// | 2      | rating low         | rating low                     |
/// | 3      | unfavorable start  | `start << 4 \| end`            |
/// | 4      | unfavorable end    | high nibble of col 3, as 0/1   |
/// | 5      | --                 | low nibble of col 3, as 0/1    |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldLayout {
    /// Five magnitude texels per record.
    #[default]
    Magnitudes,
    /// Three magnitudes, the packed sector byte, and its two nibble texels.
    /// The prepare pass reads the sectors from the nibble texels.
    SectorFlags,
}

impl FieldLayout {
    /// Texels per record.
    pub fn fields_per_row(self) -> u32 {
        match self {
            FieldLayout::Magnitudes => 5,
            FieldLayout::SectorFlags => 6,
        }
    }

    /// Discriminant handed to shaders.
    pub fn shader_index(self) -> u32 {
        match self {
            FieldLayout::Magnitudes => 0,
            FieldLayout::SectorFlags => 1,
        }
    }

    fn encode_record(self, record: &HazardRecord, out: &mut Vec<[u8; 4]>) {
        let [border, high, low, start, end] = record.magnitudes();
        match self {
            FieldLayout::Magnitudes => {
                out.extend([border, high, low, start, end].map(encode_value));
            }
            FieldLayout::SectorFlags => {
                let packed = pack_sectors(sector_index(start), sector_index(end));
                let [hi, lo] = encode_nibbles(packed);
                out.extend([border, high, low, f64::from(packed)].map(encode_value));
                out.push(hi);
                out.push(lo);
            }
        }
    }
}

/// Clamp a sanitized magnitude to a 0..=15 sector index.
fn sector_index(value: f64) -> u8 {
    value.floor().clamp(0.0, 15.0) as u8
}

// ---------------------------------------------------------------------------
// ReportTexture
// ---------------------------------------------------------------------------

/// An encoded report atlas plus the identity of the table it came from.
#[derive(Debug, Clone)]
pub struct ReportTexture {
    atlas: EncodedAtlas,
    layout: FieldLayout,
    fingerprint: blake3::Hash,
}

impl ReportTexture {
    /// Encode `report` with `layout`.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::AtlasTooLarge`] if the table needs an atlas
    /// larger than [`MAX_ATLAS_SIDE`](crate::atlas::MAX_ATLAS_SIDE).
    pub fn build(report: &HazardReport, layout: FieldLayout) -> Result<Self, AtlasError> {
        let fields = layout.fields_per_row();
        let mut texels = Vec::with_capacity(report.len() * fields as usize);
        for record in report.records() {
            layout.encode_record(record, &mut texels);
        }

        // Row counts above u32::MAX cannot fit any texture anyway.
        let rows = u32::try_from(report.len()).unwrap_or(u32::MAX);
        let atlas = AtlasLayout::new(rows, fields).pack(&texels)?;

        Ok(Self {
            atlas,
            layout,
            fingerprint: report.fingerprint(),
        })
    }

    /// The packed atlas.
    pub fn atlas(&self) -> &EncodedAtlas {
        &self.atlas
    }

    /// `[width, height]` in texels, as the shader's report-dimension uniform.
    pub fn dimensions(&self) -> [u32; 2] {
        [self.atlas.side(), self.atlas.side()]
    }

    /// The field layout used.
    pub fn layout(&self) -> FieldLayout {
        self.layout
    }

    /// Fingerprint of the source table.
    pub fn fingerprint(&self) -> blake3::Hash {
        self.fingerprint
    }
}

// ---------------------------------------------------------------------------
// ReportTextureCache
// ---------------------------------------------------------------------------

/// Keeps the last built [`ReportTexture`] and rebuilds only when the table
/// content or the layout changes.
#[derive(Debug, Default)]
pub struct ReportTextureCache {
    current: Option<ReportTexture>,
    builds: u64,
}

impl ReportTextureCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached texture for `report`, building it if the cached one
    /// is stale or missing.
    ///
    /// # Errors
    ///
    /// Propagates [`ReportTexture::build`] failures. A failed build leaves
    /// the previous texture cached.
    pub fn get_or_build(
        &mut self,
        report: &HazardReport,
        layout: FieldLayout,
    ) -> Result<&ReportTexture, AtlasError> {
        let fresh = self
            .current
            .as_ref()
            .is_some_and(|t| t.fingerprint == report.fingerprint() && t.layout == layout);

        let texture = match self.current.take() {
            Some(cached) if fresh => cached,
            previous => match ReportTexture::build(report, layout) {
                Ok(texture) => {
                    self.builds += 1;
                    tracing::debug!(
                        records = report.len(),
                        side = texture.atlas.side(),
                        ?layout,
                        fingerprint = %texture.fingerprint.to_hex(),
                        "built hazard report texture"
                    );
                    texture
                }
                Err(e) => {
                    self.current = previous;
                    return Err(e);
                }
            },
        };

        Ok(self.current.insert(texture))
    }

    /// The cached texture, if any.
    pub fn current(&self) -> Option<&ReportTexture> {
        self.current.as_ref()
    }

    /// How many times a texture has been built.
    pub fn build_count(&self) -> u64 {
        self.builds
    }

    /// Drop the cached texture.
    pub fn invalidate(&mut self) {
        self.current = None;
    }
}
