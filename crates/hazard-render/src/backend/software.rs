//! CPU implementation of [`RenderBackend`].
//!
//! Evaluates the prepare and composite draws pixel by pixel with the
//! functions in [`crate::derive`]. Used by tests, by headless tooling, and as
//! the reference the `wgpu` shaders are checked against.

use std::collections::HashMap;

use hazard_atlas::texture::FieldLayout;

use super::{
    CompositeUniforms, FramebufferId, PrepareBindings, PrepareUniforms, RenderBackend,
    StencilMode, TextureDesc, TextureId,
};
use crate::derive::{
    aspect_sector, hazard_level, pack_prepared, region_row, shade, slope_angle, slope_derivative,
    ReportRow,
};
use crate::dem::unpack_elevation;
use crate::geo::latitude_at;
use crate::RenderError;

struct SoftTexture {
    desc: TextureDesc,
    pixels: Vec<u8>,
}

impl SoftTexture {
    fn texel(&self, x: u32, y: u32) -> [u8; 4] {
        let x = x.min(self.desc.width.saturating_sub(1)) as usize;
        let y = y.min(self.desc.height.saturating_sub(1)) as usize;
        let offset = (y * self.desc.width as usize + x) * 4;
        let mut texel = [0u8; 4];
        texel.copy_from_slice(&self.pixels[offset..offset + 4]);
        texel
    }

    /// Nearest texel at normalized coordinates.
    fn sample(&self, u: f32, v: f32) -> [u8; 4] {
        let x = (u * self.desc.width as f32).max(0.0) as u32;
        let y = (v * self.desc.height as f32).max(0.0) as u32;
        self.texel(x, y)
    }
}

/// One composite draw and the premultiplied colours it produced.
#[derive(Debug, Clone)]
pub struct CompositeRecord {
    pub source: TextureId,
    pub uniforms: CompositeUniforms,
    pub stencil: StencilMode,
    pub viewport: [u32; 4],
    /// Side of the source texture.
    pub side: u32,
    /// Row-major shaded pixels.
    pub pixels: Vec<[f32; 4]>,
}

impl CompositeRecord {
    /// Shaded colour at `(x, y)` of the source texture.
    pub fn pixel(&self, x: u32, y: u32) -> [f32; 4] {
        self.pixels[(y * self.side + x) as usize]
    }
}

/// A [`RenderBackend`] that runs on the CPU.
#[derive(Default)]
pub struct SoftwareBackend {
    next_id: u64,
    textures: HashMap<TextureId, SoftTexture>,
    framebuffers: HashMap<FramebufferId, TextureId>,
    viewport: [u32; 4],
    textures_created: u64,
    composites: Vec<CompositeRecord>,
}

impl SoftwareBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn texture(&self, id: TextureId) -> Result<&SoftTexture, RenderError> {
        self.textures
            .get(&id)
            .ok_or_else(|| RenderError::Backend(format!("unknown texture {id:?}")))
    }

    /// Pixels of a live texture.
    pub fn texture_pixels(&self, id: TextureId) -> Option<&[u8]> {
        self.textures.get(&id).map(|t| t.pixels.as_slice())
    }

    /// Descriptor of a live texture.
    pub fn texture_desc(&self, id: TextureId) -> Option<&TextureDesc> {
        self.textures.get(&id).map(|t| &t.desc)
    }

    /// Number of live textures, colour attachments included.
    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    /// Number of live framebuffers.
    pub fn live_framebuffers(&self) -> usize {
        self.framebuffers.len()
    }

    /// Textures created over the backend's lifetime.
    pub fn textures_created(&self) -> u64 {
        self.textures_created
    }

    /// The last viewport set.
    pub fn viewport(&self) -> [u32; 4] {
        self.viewport
    }

    /// Composite draws issued so far, oldest first.
    pub fn composites(&self) -> &[CompositeRecord] {
        &self.composites
    }

    /// Forget recorded composite draws.
    pub fn clear_composites(&mut self) {
        self.composites.clear();
    }

    fn prepare_pixels(
        &self,
        side: u32,
        bindings: &PrepareBindings,
        uniforms: &PrepareUniforms,
    ) -> Result<Vec<u8>, RenderError> {
        let dem = self.texture(bindings.dem)?;
        let regions = self.texture(bindings.regions)?;
        let report = self.texture(bindings.report)?;
        let report_rows = uniforms.report_dimension[1] as u32;
        let layout: FieldLayout = uniforms.report_layout;

        let elevation = |x: i64, y: i64| {
            let cx = x.clamp(0, i64::from(dem.desc.width) - 1) as u32;
            let cy = y.clamp(0, i64::from(dem.desc.height) - 1) as u32;
            unpack_elevation(dem.texel(cx, cy), uniforms.unpack)
        };

        let mut pixels = Vec::with_capacity(side as usize * side as usize * 4);
        for py in 0..side {
            let v = (py as f32 + 0.5) / side as f32;
            for px in 0..side {
                let u = (px as f32 + 0.5) / side as f32;
                // Output pixel p reads DEM texel p + 1, past the border.
                let (dx, dy) = (i64::from(px) + 1, i64::from(py) + 1);

                let mut neighbourhood = [[0.0f32; 3]; 3];
                for (row, cells) in neighbourhood.iter_mut().enumerate() {
                    for (col, cell) in cells.iter_mut().enumerate() {
                        *cell = elevation(dx + col as i64 - 1, dy + row as i64 - 1);
                    }
                }
                let deriv = slope_derivative(neighbourhood, uniforms.zoom);

                let row = region_row(regions.sample(u, v)).filter(|&row| row < report_rows);
                let level = match row {
                    Some(row) => {
                        let record = ReportRow::read(layout, |col| report.texel(col, row));
                        let slope = slope_angle(deriv, latitude_at(uniforms.lat_range, v));
                        hazard_level(
                            &record,
                            neighbourhood[1][1],
                            slope.to_degrees(),
                            aspect_sector(deriv),
                        )
                    }
                    None => 0,
                };

                pixels.extend_from_slice(&pack_prepared(deriv, level, row.is_some()));
            }
        }
        Ok(pixels)
    }
}

impl RenderBackend for SoftwareBackend {
    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureId, RenderError> {
        if desc.width == 0 || desc.height == 0 {
            return Err(RenderError::Backend(format!(
                "texture '{}' has zero size {}x{}",
                desc.label, desc.width, desc.height
            )));
        }
        let id = TextureId(self.allocate_id());
        self.textures.insert(
            id,
            SoftTexture {
                desc: desc.clone(),
                pixels: vec![0; desc.byte_len()],
            },
        );
        self.textures_created += 1;
        Ok(id)
    }

    fn upload_texture(&mut self, texture: TextureId, pixels: &[u8]) -> Result<(), RenderError> {
        let target = self
            .textures
            .get_mut(&texture)
            .ok_or_else(|| RenderError::Backend(format!("unknown texture {texture:?}")))?;
        if pixels.len() != target.pixels.len() {
            return Err(RenderError::RasterSize {
                expected: target.pixels.len(),
                actual: pixels.len(),
            });
        }
        target.pixels.copy_from_slice(pixels);
        Ok(())
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        self.textures.remove(&texture);
    }

    fn create_framebuffer(&mut self, side: u32) -> Result<FramebufferId, RenderError> {
        let color = self.create_texture(&TextureDesc::square(
            side,
            super::TextureFilter::Linear,
            "hazard offscreen",
        ))?;
        let id = FramebufferId(self.allocate_id());
        self.framebuffers.insert(id, color);
        Ok(id)
    }

    fn color_attachment(&self, framebuffer: FramebufferId) -> Option<TextureId> {
        self.framebuffers.get(&framebuffer).copied()
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferId) {
        if let Some(color) = self.framebuffers.remove(&framebuffer) {
            self.textures.remove(&color);
        }
    }

    fn set_viewport(&mut self, viewport: [u32; 4]) {
        self.viewport = viewport;
    }

    fn draw_prepare(
        &mut self,
        target: FramebufferId,
        bindings: &PrepareBindings,
        uniforms: &PrepareUniforms,
    ) -> Result<(), RenderError> {
        let color = self
            .color_attachment(target)
            .ok_or_else(|| RenderError::Backend(format!("unknown framebuffer {target:?}")))?;
        let side = self.texture(color)?.desc.width;
        let pixels = self.prepare_pixels(side, bindings, uniforms)?;
        self.upload_texture(color, &pixels)
    }

    fn draw_composite(
        &mut self,
        source: TextureId,
        uniforms: &CompositeUniforms,
        stencil: StencilMode,
    ) -> Result<(), RenderError> {
        let texture = self.texture(source)?;
        let side = texture.desc.width;
        let height = texture.desc.height;
        let mut pixels = Vec::with_capacity(side as usize * height as usize);
        for y in 0..height {
            let v = (y as f32 + 0.5) / height as f32;
            for x in 0..side {
                pixels.push(shade(texture.texel(x, y), v, uniforms));
            }
        }
        self.composites.push(CompositeRecord {
            source,
            uniforms: *uniforms,
            stencil,
            viewport: self.viewport,
            side,
            pixels,
        });
        Ok(())
    }
}
