//! Headless hazard overlay demo -- prepares and composites one synthetic tile
//! on the GPU and compares the offscreen result with the CPU backend.
//!
//! Run with:
//!   cargo run --example headless_tile --features renderer -p hazard-render
//!
//! Set `RUST_LOG=hazard_render=trace` to follow the pipeline.

use std::collections::{BTreeMap, HashMap};

use hazard_render::backend::gpu::WgpuBackend;
use hazard_render::geo::ortho;
use hazard_render::prelude::*;

const DIM: u32 = 64;
const SCENE: u32 = 256;
const SOURCE: &str = "micro-regions";

const REPORT: &str = r#"{"regions": [
    {"regionCode": "AT-07-14", "dangerBorder": 2200, "ratingHigh": 3, "ratingLow": 2,
     "unfavorableStart": 14, "unfavorableEnd": 2},
    {"regionCode": "AT-07-15", "dangerBorder": null, "ratingHigh": 4, "ratingLow": 3,
     "unfavorableStart": 4, "unfavorableEnd": 8}
]}"#;

// ---------------------------------------------------------------------------
// Host
// ---------------------------------------------------------------------------

struct Host {
    pass: RenderPass,
}

impl RenderHost for Host {
    fn render_pass(&self) -> RenderPass {
        self.pass
    }

    fn viewport(&self) -> [u32; 4] {
        [0, 0, SCENE, SCENE]
    }

    fn bearing(&self) -> f32 {
        15f32.to_radians()
    }

    fn tile_matrix(&self, _tile: &OverscaledTileId) -> [f32; 16] {
        ortho(0.0, EXTENT, EXTENT, 0.0, 0.0, 1.0)
    }

    fn stencil_for_overlap(&self, _tiles: &[OverscaledTileId]) -> BTreeMap<u8, StencilMode> {
        BTreeMap::new()
    }
}

struct Sources {
    dem: DemData,
    tile: OverscaledTileId,
    regions: HashMap<OverscaledTileId, TextureId>,
}

impl TileSources for Sources {
    fn dem(&self, tile: &OverscaledTileId) -> Option<&DemData> {
        (*tile == self.tile).then_some(&self.dem)
    }

    fn region_source(&self, name: &str) -> Option<&dyn RegionSource> {
        (name == SOURCE).then_some(&self.regions as &dyn RegionSource)
    }
}

// ---------------------------------------------------------------------------
// Scene setup
// ---------------------------------------------------------------------------

/// A cone-shaped peak rising to 3000 m in the middle of the tile.
fn peak_dem() -> Result<DemData, RenderError> {
    let center = DIM as f32 / 2.0;
    let elevations: Vec<f32> = (0..DIM * DIM)
        .map(|i| {
            let (x, y) = ((i % DIM) as f32, (i / DIM) as f32);
            let distance = (x - center).hypot(y - center);
            (3000.0 - distance * 45.0).max(1200.0)
        })
        .collect();
    DemData::from_elevations(DIM, DemEncoding::MapboxTerrainRgb, &elevations)
}

/// West half in region row 0, east half in row 1, bottom strip unreported.
fn region_pixels(side: u32) -> Vec<u8> {
    let mut pixels = Vec::with_capacity((side * side * 4) as usize);
    for y in 0..side {
        for x in 0..side {
            let texel = match (x < side / 2, y < side * 7 / 8) {
                (_, false) => [0, 0, 0, 0],
                (true, true) => [0, 0, 0, 255],
                (false, true) => [0, 1, 0, 255],
            };
            pixels.extend_from_slice(&texel);
        }
    }
    pixels
}

fn upload_regions(backend: &mut dyn RenderBackend) -> Result<TextureId, RenderError> {
    let id = backend.create_texture(&TextureDesc::square(32, TextureFilter::Nearest, "regions"))?;
    backend.upload_texture(id, &region_pixels(32))?;
    Ok(id)
}

fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let config = HazardLayerConfig::from_json(&format!(
        r#"{{"region_source": "{SOURCE}", "exaggeration": 0.6, "illumination_anchor": "viewport"}}"#
    ))?;
    let report = HazardReport::from_json(REPORT)?;
    let tile = OverscaledTileId::new(12, 0, 12, 2176, 1436);
    let tiles = [tile];

    // GPU run.
    let mut gpu = pollster::block_on(WgpuBackend::headless())?;
    let scene = gpu.create_texture(&TextureDesc::square(SCENE, TextureFilter::Nearest, "scene"))?;
    gpu.set_composite_target(Some(scene));
    let sources = Sources {
        dem: peak_dem()?,
        tile,
        regions: HashMap::from([(tile, upload_regions(&mut gpu)?)]),
    };

    let mut layer = HazardLayer::new(config.clone(), report.clone());
    layer.on_dem_loaded(tile);
    for pass in [RenderPass::Offscreen, RenderPass::Opaque, RenderPass::Translucent] {
        let stats = layer.draw(&Host { pass }, &mut gpu, &sources, &tiles)?;
        println!("{pass:?}: {stats:?}");
    }

    let prepared = layer
        .tiles()
        .get(&tile)
        .and_then(|state| state.framebuffer)
        .and_then(|target| gpu.color_attachment(target.framebuffer))
        .ok_or_else(|| anyhow::anyhow!("tile {tile} was not prepared"))?;
    let gpu_prepared = gpu.read_texture(prepared)?;
    let composited = gpu.read_texture(scene)?;

    // CPU reference run.
    let mut cpu = SoftwareBackend::new();
    let cpu_sources = Sources {
        dem: peak_dem()?,
        tile,
        regions: HashMap::from([(tile, upload_regions(&mut cpu)?)]),
    };
    let mut reference = HazardLayer::new(config, report);
    reference.on_dem_loaded(tile);
    reference.draw(&Host { pass: RenderPass::Offscreen }, &mut cpu, &cpu_sources, &tiles)?;
    let cpu_prepared = reference
        .tiles()
        .get(&tile)
        .and_then(|state| state.framebuffer)
        .and_then(|target| cpu.color_attachment(target.framebuffer))
        .and_then(|id| cpu.texture_pixels(id))
        .ok_or_else(|| anyhow::anyhow!("reference tile {tile} was not prepared"))?;

    let max_diff = gpu_prepared
        .iter()
        .zip(cpu_prepared)
        .map(|(a, b)| a.abs_diff(*b))
        .max()
        .unwrap_or(0);
    let mut levels = [0usize; 6];
    for texel in gpu_prepared.chunks_exact(4).filter(|t| t[3] > 0) {
        levels[usize::from((f32::from(texel[2]) / 51.0).round() as u8).min(5)] += 1;
    }
    let covered = composited.chunks_exact(4).filter(|t| t[3] > 0).count();

    println!("tile {tile}: {} offscreen texels", gpu_prepared.len() / 4);
    println!("hazard levels 0..=5 inside regions: {levels:?}");
    println!("max GPU/CPU channel difference: {max_diff}");
    println!("composited pixels with coverage: {covered} of {}", SCENE * SCENE);
    Ok(())
}
