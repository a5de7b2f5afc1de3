//! `wgpu` implementation of [`RenderBackend`].
//!
//! Two render pipelines mirror [`crate::derive`]:
//!
//! - `prepare.wgsl` reads the DEM, region, and report textures with
//!   `textureLoad` and writes the offscreen texel format, replacing the
//!   target's content.
//! - `composite.wgsl` samples a prepared texture and blends the shaded,
//!   premultiplied result over the composite target.
//!
//! All textures are `Rgba8Unorm`. Both quads are generated from the vertex
//! index, so no vertex buffers exist. The headless composite target has no
//! stencil attachment, so [`StencilMode`] is accepted but not applied.

use std::collections::HashMap;

use hazard_atlas::texture::FieldLayout;

use super::{
    CompositeUniforms, FramebufferId, PrepareBindings, PrepareUniforms, RenderBackend,
    StencilMode, TextureDesc, TextureFilter, TextureId,
};
use crate::RenderError;

const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Vertices of the two-triangle tile quad.
const QUAD_VERTICES: u32 = 6;

// ---------------------------------------------------------------------------
// Uniform blocks
// ---------------------------------------------------------------------------

/// `PrepareUniforms` in `prepare.wgsl` layout (112 bytes).
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck_derive::Pod, bytemuck_derive::Zeroable)]
struct PrepareBlock {
    matrix: [f32; 16],
    unpack: [f32; 4],
    dimension: [f32; 2],
    report_dimension: [f32; 2],
    lat_range: [f32; 2],
    zoom: f32,
    report_layout: u32,
}

impl PrepareBlock {
    fn new(u: &PrepareUniforms) -> Self {
        Self {
            matrix: u.matrix,
            unpack: u.unpack,
            dimension: u.dimension,
            report_dimension: u.report_dimension,
            lat_range: u.lat_range,
            zoom: u.zoom,
            report_layout: FieldLayout::shader_index(u.report_layout),
        }
    }
}

/// `CompositeUniforms` in `composite.wgsl` layout (208 bytes).
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck_derive::Pod, bytemuck_derive::Zeroable)]
struct CompositeBlock {
    matrix: [f32; 16],
    shadow: [f32; 4],
    highlight: [f32; 4],
    accent: [f32; 4],
    ratings: [[f32; 4]; 5],
    light: [f32; 2],
    lat_range: [f32; 2],
}

impl CompositeBlock {
    fn new(u: &CompositeUniforms) -> Self {
        Self {
            matrix: u.matrix,
            shadow: u.shadow,
            highlight: u.highlight,
            accent: u.accent,
            ratings: u.ratings,
            light: u.light,
            lat_range: u.lat_range,
        }
    }
}

// ---------------------------------------------------------------------------
// WgpuBackend
// ---------------------------------------------------------------------------

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    desc: TextureDesc,
}

/// A [`RenderBackend`] drawing with `wgpu`.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    prepare_pipeline: wgpu::RenderPipeline,
    prepare_layout: wgpu::BindGroupLayout,
    prepare_uniforms: wgpu::Buffer,
    composite_pipeline: wgpu::RenderPipeline,
    composite_layout: wgpu::BindGroupLayout,
    composite_uniforms: wgpu::Buffer,
    nearest_sampler: wgpu::Sampler,
    linear_sampler: wgpu::Sampler,
    textures: HashMap<TextureId, GpuTexture>,
    framebuffers: HashMap<FramebufferId, TextureId>,
    composite_target: Option<TextureId>,
    viewport: [u32; 4],
    next_id: u64,
}

impl WgpuBackend {
    /// Initialize a device without a surface.
    ///
    /// This is an async function because wgpu adapter/device selection is
    /// asynchronous. Call with `.await` or use `pollster::block_on`.
    ///
    /// # Errors
    ///
    /// Returns an error if no suitable GPU adapter or device is available.
    pub async fn headless() -> Result<Self, anyhow::Error> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::LowPower,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| anyhow::anyhow!("no suitable GPU adapter found"))?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("hazard_render_device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::downlevel_defaults(),
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await?;

        Ok(Self::from_device(device, queue))
    }

    /// Build the pipelines on an existing device.
    pub fn from_device(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let prepare_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("hazard_prepare_shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("prepare.wgsl").into()),
        });
        let composite_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("hazard_composite_shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("composite.wgsl").into()),
        });

        let uniform_entry = wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let texture_entry = |binding, filterable| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };

        let prepare_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("hazard_prepare_bind_group_layout"),
            entries: &[
                uniform_entry,
                texture_entry(1, false),
                texture_entry(2, false),
                texture_entry(3, false),
            ],
        });
        let composite_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("hazard_composite_bind_group_layout"),
            entries: &[
                uniform_entry,
                texture_entry(1, true),
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let prepare_pipeline = create_pipeline(
            &device,
            "hazard_prepare",
            &prepare_shader,
            &prepare_layout,
            wgpu::BlendState::REPLACE,
        );
        let composite_pipeline = create_pipeline(
            &device,
            "hazard_composite",
            &composite_shader,
            &composite_layout,
            wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING,
        );

        let uniform_buffer = |label, size: usize| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: size as wgpu::BufferAddress,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        };
        let prepare_uniforms =
            uniform_buffer("hazard_prepare_uniform", std::mem::size_of::<PrepareBlock>());
        let composite_uniforms =
            uniform_buffer("hazard_composite_uniform", std::mem::size_of::<CompositeBlock>());

        let sampler = |label, filter| {
            device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some(label),
                address_mode_u: wgpu::AddressMode::ClampToEdge,
                address_mode_v: wgpu::AddressMode::ClampToEdge,
                mag_filter: filter,
                min_filter: filter,
                ..Default::default()
            })
        };
        let nearest_sampler = sampler("hazard_nearest_sampler", wgpu::FilterMode::Nearest);
        let linear_sampler = sampler("hazard_linear_sampler", wgpu::FilterMode::Linear);

        Self {
            device,
            queue,
            prepare_pipeline,
            prepare_layout,
            prepare_uniforms,
            composite_pipeline,
            composite_layout,
            composite_uniforms,
            nearest_sampler,
            linear_sampler,
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            composite_target: None,
            viewport: [0; 4],
            next_id: 0,
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// Direct composite draws into `target`, a texture from
    /// [`create_texture`](RenderBackend::create_texture).
    pub fn set_composite_target(&mut self, target: Option<TextureId>) {
        self.composite_target = target;
    }

    /// Copy a texture back to the CPU as tightly packed RGBA8 rows.
    ///
    /// Blocks until the GPU finishes all submitted work.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown textures or when the buffer cannot be
    /// mapped.
    pub fn read_texture(&self, id: TextureId) -> Result<Vec<u8>, anyhow::Error> {
        let gpu = self
            .textures
            .get(&id)
            .ok_or_else(|| anyhow::anyhow!("unknown texture {id:?}"))?;
        let (width, height) = (gpu.desc.width, gpu.desc.height);
        let unpadded = width * 4;
        let padded = unpadded.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
            * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("hazard_readback"),
            size: u64::from(padded) * u64::from(height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("hazard_readback_encoder"),
            });
        encoder.copy_texture_to_buffer(
            gpu.texture.as_image_copy(),
            wgpu::ImageCopyBuffer {
                buffer: &buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(height),
                },
            },
            extent(&gpu.desc),
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        rx.recv()??;

        let mapped = slice.get_mapped_range();
        let mut pixels = Vec::with_capacity((unpadded * height) as usize);
        for row in mapped.chunks_exact(padded as usize) {
            pixels.extend_from_slice(&row[..unpadded as usize]);
        }
        drop(mapped);
        buffer.unmap();
        Ok(pixels)
    }

    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn texture(&self, id: TextureId) -> Result<&GpuTexture, RenderError> {
        self.textures
            .get(&id)
            .ok_or_else(|| RenderError::Backend(format!("unknown texture {id:?}")))
    }

    fn sampler_for(&self, filter: TextureFilter) -> &wgpu::Sampler {
        match filter {
            TextureFilter::Nearest => &self.nearest_sampler,
            TextureFilter::Linear => &self.linear_sampler,
        }
    }

    /// Encode one quad into `target` and submit it.
    fn draw_quad(
        &self,
        label: &str,
        target: &GpuTexture,
        load: wgpu::LoadOp<wgpu::Color>,
        pipeline: &wgpu::RenderPipeline,
        bind_group: &wgpu::BindGroup,
    ) {
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(label),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            let [x, y, w, h] = clamp_viewport(self.viewport, target.desc.width, target.desc.height);
            if w > 0 && h > 0 {
                render_pass.set_viewport(x as f32, y as f32, w as f32, h as f32, 0.0, 1.0);
                render_pass.set_pipeline(pipeline);
                render_pass.set_bind_group(0, bind_group, &[]);
                render_pass.draw(0..QUAD_VERTICES, 0..1);
            }
        }
        self.queue.submit(std::iter::once(encoder.finish()));
    }
}

impl RenderBackend for WgpuBackend {
    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureId, RenderError> {
        let max = self.device.limits().max_texture_dimension_2d;
        if desc.width == 0 || desc.height == 0 || desc.width > max || desc.height > max {
            return Err(RenderError::Backend(format!(
                "texture '{}' size {}x{} outside 1..={max}",
                desc.label, desc.width, desc.height
            )));
        }
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(desc.label),
            size: extent(desc),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let id = TextureId(self.allocate_id());
        self.textures.insert(
            id,
            GpuTexture {
                texture,
                view,
                desc: desc.clone(),
            },
        );
        Ok(id)
    }

    fn upload_texture(&mut self, texture: TextureId, pixels: &[u8]) -> Result<(), RenderError> {
        let gpu = self.texture(texture)?;
        if pixels.len() != gpu.desc.byte_len() {
            return Err(RenderError::RasterSize {
                expected: gpu.desc.byte_len(),
                actual: pixels.len(),
            });
        }
        self.queue.write_texture(
            gpu.texture.as_image_copy(),
            pixels,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(gpu.desc.width * 4),
                rows_per_image: Some(gpu.desc.height),
            },
            extent(&gpu.desc),
        );
        Ok(())
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        if let Some(gpu) = self.textures.remove(&texture) {
            gpu.texture.destroy();
        }
        if self.composite_target == Some(texture) {
            self.composite_target = None;
        }
    }

    fn create_framebuffer(&mut self, side: u32) -> Result<FramebufferId, RenderError> {
        let color = self.create_texture(&TextureDesc::square(
            side,
            TextureFilter::Linear,
            "hazard_offscreen",
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
            self.destroy_texture(color);
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
        let target = self.texture(color)?;
        let dem = self.texture(bindings.dem)?;
        let regions = self.texture(bindings.regions)?;
        let report = self.texture(bindings.report)?;

        self.queue.write_buffer(
            &self.prepare_uniforms,
            0,
            bytemuck::bytes_of(&PrepareBlock::new(uniforms)),
        );
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("hazard_prepare_bind_group"),
            layout: &self.prepare_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.prepare_uniforms.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&dem.view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&regions.view),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(&report.view),
                },
            ],
        });

        self.draw_quad(
            "hazard_prepare_pass",
            target,
            wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
            &self.prepare_pipeline,
            &bind_group,
        );
        Ok(())
    }

    fn draw_composite(
        &mut self,
        source: TextureId,
        uniforms: &CompositeUniforms,
        stencil: StencilMode,
    ) -> Result<(), RenderError> {
        let target_id = self
            .composite_target
            .ok_or_else(|| RenderError::Backend("no composite target set".to_owned()))?;
        let target = self.texture(target_id)?;
        let source = self.texture(source)?;
        if stencil != StencilMode::Disabled {
            tracing::trace!(?stencil, "stencil mask ignored by headless target");
        }

        self.queue.write_buffer(
            &self.composite_uniforms,
            0,
            bytemuck::bytes_of(&CompositeBlock::new(uniforms)),
        );
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("hazard_composite_bind_group"),
            layout: &self.composite_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.composite_uniforms.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&source.view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(self.sampler_for(source.desc.filter)),
                },
            ],
        });

        self.draw_quad(
            "hazard_composite_pass",
            target,
            wgpu::LoadOp::Load,
            &self.composite_pipeline,
            &bind_group,
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn extent(desc: &TextureDesc) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: desc.width,
        height: desc.height,
        depth_or_array_layers: 1,
    }
}

/// Intersect a viewport with a `width x height` target.
fn clamp_viewport([x, y, w, h]: [u32; 4], width: u32, height: u32) -> [u32; 4] {
    let x = x.min(width);
    let y = y.min(height);
    [x, y, w.min(width - x), h.min(height - y)]
}

fn create_pipeline(
    device: &wgpu::Device,
    label: &str,
    shader: &wgpu::ShaderModule,
    bind_group_layout: &wgpu::BindGroupLayout,
    blend: wgpu::BlendState,
) -> wgpu::RenderPipeline {
    let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &[bind_group_layout],
        push_constant_ranges: &[],
    });

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(&layout),
        vertex: wgpu::VertexState {
            module: shader,
            entry_point: Some("vs_main"),
            buffers: &[],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: shader,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState {
                format: FORMAT,
                blend: Some(blend),
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: None,
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState {
            count: 1,
            mask: !0,
            alpha_to_coverage_enabled: false,
        },
        multiview: None,
        cache: None,
    })
}
