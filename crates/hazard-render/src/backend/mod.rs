//! GPU abstraction the pipeline draws through.
//!
//! The pipeline never talks to a graphics API directly. It creates textures
//! and framebuffers, uploads pixels, and issues exactly two kinds of draw
//! call through [`RenderBackend`]. Resources are named by opaque integer
//! handles, so per-tile state stays plain data.
//!
//! - [`software::SoftwareBackend`] -- CPU evaluation of the draw calls,
//!   always available.
//! - `gpu::WgpuBackend` -- `wgpu` implementation (feature `renderer`).

use hazard_atlas::texture::FieldLayout;

use crate::RenderError;

#[cfg(feature = "renderer")]
pub mod gpu;
pub mod software;

// ---------------------------------------------------------------------------
// Handles and descriptors
// ---------------------------------------------------------------------------

/// Handle to a backend texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u64);

/// Handle to a backend framebuffer (one RGBA8 colour attachment).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FramebufferId(pub u64);

/// Sampling filter for a texture.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TextureFilter {
    #[default]
    Nearest,
    Linear,
}

/// Description of an RGBA8 texture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub filter: TextureFilter,
    pub label: &'static str,
}

impl TextureDesc {
    /// A square texture.
    pub fn square(side: u32, filter: TextureFilter, label: &'static str) -> Self {
        Self {
            width: side,
            height: side,
            filter,
            label,
        }
    }

    /// Byte length of the texture's pixels.
    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

/// Stencil test applied to a composite draw.
///
/// Overlapping tiles of different zoom levels are masked by the host so each
/// screen pixel is drawn by one tile only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StencilMode {
    #[default]
    Disabled,
    /// Draw where the stencil buffer equals `reference`.
    Equal { reference: u32 },
}

// ---------------------------------------------------------------------------
// Uniforms
// ---------------------------------------------------------------------------

/// Textures read by the prepare draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrepareBindings {
    /// Bordered DEM, `stride x stride`.
    pub dem: TextureId,
    /// Region-membership raster for the tile.
    pub regions: TextureId,
    /// The shared report atlas.
    pub report: TextureId,
}

/// Parameters of the prepare draw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrepareUniforms {
    /// Column-major position matrix of the tile quad.
    pub matrix: [f32; 16],
    /// DEM unpack vector `[r, g, b, offset]`.
    pub unpack: [f32; 4],
    /// DEM stride (`dim + 2`) in both axes.
    pub dimension: [f32; 2],
    /// Report atlas size in texels.
    pub report_dimension: [f32; 2],
    /// Latitudes of the tile's top and bottom edges.
    pub lat_range: [f32; 2],
    /// Zoom the tile is drawn at (overscaled).
    pub zoom: f32,
    pub report_layout: FieldLayout,
}

/// Parameters of the composite draw.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CompositeUniforms {
    /// Column-major position matrix of the tile in the scene.
    pub matrix: [f32; 16],
    /// Latitudes of the tile's top and bottom edges.
    pub lat_range: [f32; 2],
    /// `[exaggeration, azimuth (radians)]`.
    pub light: [f32; 2],
    /// Premultiplied shading colours.
    pub shadow: [f32; 4],
    pub highlight: [f32; 4],
    pub accent: [f32; 4],
    /// Premultiplied tint per hazard level 1..=5.
    pub ratings: [[f32; 4]; 5],
}

// ---------------------------------------------------------------------------
// RenderBackend
// ---------------------------------------------------------------------------

/// The graphics operations the hazard pipeline needs.
///
/// Implementations own every resource they hand out; callers must destroy
/// what they create. Destroying an unknown handle is a no-op.
pub trait RenderBackend {
    /// Create an uninitialised RGBA8 texture.
    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureId, RenderError>;

    /// Replace the whole content of `texture` with tightly packed RGBA8 rows.
    fn upload_texture(&mut self, texture: TextureId, pixels: &[u8]) -> Result<(), RenderError>;

    fn destroy_texture(&mut self, texture: TextureId);

    /// Create a framebuffer with a `side x side` RGBA8 colour attachment.
    fn create_framebuffer(&mut self, side: u32) -> Result<FramebufferId, RenderError>;

    /// The colour attachment of `framebuffer`, sampleable by composite draws.
    fn color_attachment(&self, framebuffer: FramebufferId) -> Option<TextureId>;

    /// Destroy a framebuffer together with its colour attachment.
    fn destroy_framebuffer(&mut self, framebuffer: FramebufferId);

    /// Set the viewport `[x, y, width, height]` for subsequent draws.
    fn set_viewport(&mut self, viewport: [u32; 4]);

    /// Draw the derivation quad into `target`, replacing its content.
    fn draw_prepare(
        &mut self,
        target: FramebufferId,
        bindings: &PrepareBindings,
        uniforms: &PrepareUniforms,
    ) -> Result<(), RenderError>;

    /// Blend a prepared texture over the current scene target.
    fn draw_composite(
        &mut self,
        source: TextureId,
        uniforms: &CompositeUniforms,
        stencil: StencilMode,
    ) -> Result<(), RenderError>;
}
