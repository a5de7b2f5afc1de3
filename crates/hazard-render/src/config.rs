//! Layer configuration.
//!
//! [`HazardLayerConfig`] carries the already-evaluated paint properties of a
//! hazard layer: lighting, shading colors, the rating color ramp, and the
//! name of the raster source that supplies region membership. Style
//! evaluation and color parsing happen upstream; this struct only holds the
//! results.
//!
//! # JSON
//!
//! ```
//! use hazard_render::config::{HazardLayerConfig, IlluminationAnchor};
//!
//! let config = HazardLayerConfig::from_json(r#"{
//!     "region_source": "micro-regions",
//!     "exaggeration": 0.8,
//!     "illumination_anchor": "map"
//! }"#).unwrap();
//!
//! assert_eq!(config.region_source.as_deref(), Some("micro-regions"));
//! assert_eq!(config.illumination_anchor, IlluminationAnchor::Map);
//! assert_eq!(config.illumination_direction, 335.0);
//! ```

use serde::{Deserialize, Serialize};

use hazard_atlas::texture::FieldLayout;

use crate::RenderError;

// ---------------------------------------------------------------------------
// Rgba
// ---------------------------------------------------------------------------

/// A straight-alpha RGBA color, each channel in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rgba(pub [f32; 4]);

impl Rgba {
    pub const BLACK: Rgba = Rgba([0.0, 0.0, 0.0, 1.0]);
    pub const WHITE: Rgba = Rgba([1.0, 1.0, 1.0, 1.0]);
    pub const TRANSPARENT: Rgba = Rgba([0.0, 0.0, 0.0, 0.0]);

    /// The color with RGB multiplied by alpha, as shaders blend it.
    pub fn premultiplied(self) -> [f32; 4] {
        let [r, g, b, a] = self.0;
        [r * a, g * a, b * a, a]
    }
}

/// European avalanche danger scale, levels 1 (low) to 5 (very high).
const DEFAULT_RATING_COLORS: [Rgba; 5] = [
    Rgba([0.8, 1.0, 0.4, 1.0]),
    Rgba([1.0, 1.0, 0.0, 1.0]),
    Rgba([1.0, 0.6, 0.0, 1.0]),
    Rgba([1.0, 0.0, 0.0, 1.0]),
    Rgba([0.5, 0.0, 0.0, 1.0]),
];

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// What the illumination direction is relative to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IlluminationAnchor {
    /// Fixed to the map: rotating the map rotates the light with it.
    Map,
    /// Fixed to the screen: the light direction ignores map rotation.
    #[default]
    Viewport,
}

/// Layer visibility.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Visible,
    None,
}

// ---------------------------------------------------------------------------
// HazardLayerConfig
// ---------------------------------------------------------------------------

/// Evaluated paint properties of a hazard layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HazardLayerConfig {
    /// Name of the raster source that supplies region membership per tile.
    pub region_source: Option<String>,
    /// Shading intensity, `0.0..=1.0`. Zero disables the offscreen pass.
    pub exaggeration: f32,
    /// Direction of the light source in degrees, `0.0..=360.0`.
    pub illumination_direction: f32,
    /// Whether the light follows the map or the viewport.
    pub illumination_anchor: IlluminationAnchor,
    /// Color of slopes facing away from the light.
    pub shadow_color: Rgba,
    /// Color of slopes facing the light.
    pub highlight_color: Rgba,
    /// Color that accentuates steep terrain.
    pub accent_color: Rgba,
    /// Tint for hazard levels 1 through 5.
    pub rating_colors: [Rgba; 5],
    /// Layer visibility.
    pub visibility: Visibility,
    /// How report records are laid out in the atlas.
    pub field_layout: FieldLayout,
}

impl Default for HazardLayerConfig {
    fn default() -> Self {
        Self {
            region_source: None,
            exaggeration: 0.5,
            illumination_direction: 335.0,
            illumination_anchor: IlluminationAnchor::Viewport,
            shadow_color: Rgba::BLACK,
            highlight_color: Rgba::WHITE,
            accent_color: Rgba::BLACK,
            rating_colors: DEFAULT_RATING_COLORS,
            visibility: Visibility::Visible,
            field_layout: FieldLayout::Magnitudes,
        }
    }
}

impl HazardLayerConfig {
    /// Parse and validate a configuration. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::ConfigParse`] for malformed JSON or unknown
    /// keys and [`RenderError::InvalidParameter`] for out-of-range values.
    pub fn from_json(json: &str) -> Result<Self, RenderError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check parameter ranges.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::InvalidParameter`] naming the first bad value.
    pub fn validate(&self) -> Result<(), RenderError> {
        if !(0.0..=1.0).contains(&self.exaggeration) {
            return Err(RenderError::InvalidParameter {
                name: "exaggeration",
                reason: format!("{} is outside 0..=1", self.exaggeration),
            });
        }
        if !(0.0..=360.0).contains(&self.illumination_direction) {
            return Err(RenderError::InvalidParameter {
                name: "illumination_direction",
                reason: format!("{} is outside 0..=360 degrees", self.illumination_direction),
            });
        }
        let colors = [self.shadow_color, self.highlight_color, self.accent_color]
            .into_iter()
            .chain(self.rating_colors);
        for color in colors {
            if color.0.iter().any(|c| !(0.0..=1.0).contains(c)) {
                return Err(RenderError::InvalidParameter {
                    name: "color",
                    reason: format!("{:?} has a channel outside 0..=1", color.0),
                });
            }
        }
        if matches!(self.region_source.as_deref(), Some("")) {
            return Err(RenderError::InvalidParameter {
                name: "region_source",
                reason: "source name is empty".to_owned(),
            });
        }
        Ok(())
    }

    /// Whether the layer needs an offscreen pass this frame.
    pub fn has_offscreen_pass(&self) -> bool {
        self.exaggeration != 0.0 && self.visibility != Visibility::None
    }

    /// The `[exaggeration, azimuth]` lighting term.
    ///
    /// The azimuth is in radians. With a viewport anchor the map `bearing`
    /// (radians) is subtracted so the light stays put on screen.
    pub fn light(&self, bearing: f32) -> [f32; 2] {
        let mut azimuth = self.illumination_direction.to_radians();
        if self.illumination_anchor == IlluminationAnchor::Viewport {
            azimuth -= bearing;
        }
        [self.exaggeration, azimuth]
    }

    /// Premultiplied rating colors for the shader.
    pub fn rating_ramp(&self) -> [[f32; 4]; 5] {
        self.rating_colors.map(Rgba::premultiplied)
    }
}
