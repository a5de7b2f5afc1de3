//! Integration tests for the two-pass hazard layer.
//!
//! The layer runs against a [`SoftwareBackend`] wrapped in a recorder so the
//! order of GPU operations can be checked frame by frame.

use std::collections::{BTreeMap, HashMap};

use hazard_render::prelude::*;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// A GPU operation as seen by the backend.
#[derive(Debug, Clone, PartialEq)]
enum Call {
    CreateTexture(TextureId),
    Upload(TextureId),
    DestroyTexture(TextureId),
    CreateFramebuffer(FramebufferId),
    DestroyFramebuffer(FramebufferId),
    Viewport([u32; 4]),
    Prepare(FramebufferId),
    Composite(TextureId, StencilMode),
}

#[derive(Default)]
struct RecordingBackend {
    inner: SoftwareBackend,
    calls: Vec<Call>,
}

impl RecordingBackend {
    fn take_calls(&mut self) -> Vec<Call> {
        std::mem::take(&mut self.calls)
    }
}

impl RenderBackend for RecordingBackend {
    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureId, RenderError> {
        let id = self.inner.create_texture(desc)?;
        self.calls.push(Call::CreateTexture(id));
        Ok(id)
    }

    fn upload_texture(&mut self, texture: TextureId, pixels: &[u8]) -> Result<(), RenderError> {
        self.calls.push(Call::Upload(texture));
        self.inner.upload_texture(texture, pixels)
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        self.calls.push(Call::DestroyTexture(texture));
        self.inner.destroy_texture(texture);
    }

    fn create_framebuffer(&mut self, side: u32) -> Result<FramebufferId, RenderError> {
        let id = self.inner.create_framebuffer(side)?;
        self.calls.push(Call::CreateFramebuffer(id));
        Ok(id)
    }

    fn color_attachment(&self, framebuffer: FramebufferId) -> Option<TextureId> {
        self.inner.color_attachment(framebuffer)
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferId) {
        self.calls.push(Call::DestroyFramebuffer(framebuffer));
        self.inner.destroy_framebuffer(framebuffer);
    }

    fn set_viewport(&mut self, viewport: [u32; 4]) {
        self.calls.push(Call::Viewport(viewport));
        self.inner.set_viewport(viewport);
    }

    fn draw_prepare(
        &mut self,
        target: FramebufferId,
        bindings: &PrepareBindings,
        uniforms: &PrepareUniforms,
    ) -> Result<(), RenderError> {
        self.calls.push(Call::Prepare(target));
        self.inner.draw_prepare(target, bindings, uniforms)
    }

    fn draw_composite(
        &mut self,
        source: TextureId,
        uniforms: &CompositeUniforms,
        stencil: StencilMode,
    ) -> Result<(), RenderError> {
        self.calls.push(Call::Composite(source, stencil));
        self.inner.draw_composite(source, uniforms, stencil)
    }
}

const SCENE_VIEWPORT: [u32; 4] = [0, 0, 1280, 720];

struct Host {
    pass: RenderPass,
    bearing: f32,
}

impl Host {
    fn new(pass: RenderPass) -> Self {
        Self { pass, bearing: 0.0 }
    }
}

impl RenderHost for Host {
    fn render_pass(&self) -> RenderPass {
        self.pass
    }

    fn viewport(&self) -> [u32; 4] {
        SCENE_VIEWPORT
    }

    fn bearing(&self) -> f32 {
        self.bearing
    }

    fn tile_matrix(&self, tile: &OverscaledTileId) -> [f32; 16] {
        let mut m = [0.0; 16];
        m[0] = 1.0 / EXTENT;
        m[5] = 1.0 / EXTENT;
        m[10] = 1.0;
        m[12] = tile.canonical.x as f32;
        m[15] = 1.0;
        m
    }

    fn stencil_for_overlap(&self, tiles: &[OverscaledTileId]) -> BTreeMap<u8, StencilMode> {
        tiles
            .iter()
            .map(|t| {
                (
                    t.overscaled_z,
                    StencilMode::Equal {
                        reference: u32::from(t.overscaled_z),
                    },
                )
            })
            .collect()
    }
}

#[derive(Default)]
struct Sources {
    dems: HashMap<OverscaledTileId, DemData>,
    regions: HashMap<String, HashMap<OverscaledTileId, TextureId>>,
}

impl TileSources for Sources {
    fn dem(&self, tile: &OverscaledTileId) -> Option<&DemData> {
        self.dems.get(tile)
    }

    fn region_source(&self, name: &str) -> Option<&dyn RegionSource> {
        self.regions.get(name).map(|r| r as &dyn RegionSource)
    }
}

const SOURCE: &str = "micro-regions";
const DIM: u32 = 8;

fn tile(x: u32) -> OverscaledTileId {
    OverscaledTileId::new(15, 0, 15, x, 11_600)
}

/// Terrain rising `rise` meters per pixel towards the east from 2000 m.
fn ramp_dem(rise: f32) -> DemData {
    let elevations: Vec<f32> = (0..DIM * DIM)
        .map(|i| 2000.0 + rise * (i % DIM) as f32)
        .collect();
    DemData::from_elevations(DIM, DemEncoding::MapboxTerrainRgb, &elevations).unwrap()
}

/// A 4x4 region raster pointing every pixel at `row`.
fn region_texture(backend: &mut dyn RenderBackend, row: u16) -> TextureId {
    let id = backend
        .create_texture(&TextureDesc::square(4, TextureFilter::Nearest, "regions"))
        .unwrap();
    let [r, g] = row.to_be_bytes();
    let pixels: Vec<u8> = std::iter::repeat([r, g, 0, 255]).take(16).flatten().collect();
    backend.upload_texture(id, &pixels).unwrap();
    id
}

fn record(high: f64, low: f64) -> HazardRecord {
    HazardRecord {
        region_code: "AT-07-14".to_owned(),
        danger_border: Some(1800.0),
        rating_high: high,
        rating_low: low,
        unfavorable_start: 14.0,
        unfavorable_end: 2.0,
    }
}

fn config() -> HazardLayerConfig {
    HazardLayerConfig {
        region_source: Some(SOURCE.to_owned()),
        ..Default::default()
    }
}

/// A layer, backend, and sources with DEMs and regions for `tiles`.
fn setup(tiles: &[OverscaledTileId]) -> (HazardLayer, RecordingBackend, Sources) {
    let mut backend = RecordingBackend::default();
    let mut sources = Sources::default();
    let mut regions = HashMap::new();
    let mut layer = HazardLayer::new(config(), HazardReport::from_records(vec![record(3.0, 2.0)]));
    for t in tiles {
        sources.dems.insert(*t, ramp_dem(6.0));
        regions.insert(*t, region_texture(&mut backend, 0));
        layer.on_dem_loaded(*t);
    }
    sources.regions.insert(SOURCE.to_owned(), regions);
    backend.take_calls();
    (layer, backend, sources)
}

fn run(
    layer: &mut HazardLayer,
    pass: RenderPass,
    backend: &mut RecordingBackend,
    sources: &Sources,
    tiles: &[OverscaledTileId],
) -> Result<FrameStats, RenderError> {
    layer.draw(&Host::new(pass), backend, sources, tiles)
}

// ---------------------------------------------------------------------------
// Pass ordering
// ---------------------------------------------------------------------------

#[test]
fn every_composite_reads_a_prepared_framebuffer() {
    let tiles = [tile(1), tile(2)];
    let (mut layer, mut backend, sources) = setup(&tiles);

    let stats = run(&mut layer, RenderPass::Offscreen, &mut backend, &sources, &tiles).unwrap();
    assert_eq!(stats.prepared, 2);
    assert_eq!(stats.report_uploads, 1);
    let stats = run(&mut layer, RenderPass::Translucent, &mut backend, &sources, &tiles).unwrap();
    assert_eq!(stats.composited, 2);

    let calls = backend.take_calls();
    let mut prepared = Vec::new();
    let mut composited = 0;
    for call in &calls {
        match call {
            Call::Prepare(fb) => {
                assert_eq!(composited, 0, "prepare after a composite: {calls:?}");
                prepared.push(backend.color_attachment(*fb).unwrap());
            }
            Call::Composite(source, _) => {
                assert!(prepared.contains(source), "composite of unprepared {source:?}");
                composited += 1;
            }
            _ => {}
        }
    }
    assert_eq!(prepared.len(), 2);
    assert_eq!(composited, 2);
}

#[test]
fn prepare_uploads_then_draws_in_framebuffer_viewport() {
    let tiles = [tile(1)];
    let (mut layer, mut backend, sources) = setup(&tiles);
    run(&mut layer, RenderPass::Offscreen, &mut backend, &sources, &tiles).unwrap();

    let calls = backend.take_calls();
    let prepare_at = calls.iter().position(|c| matches!(c, Call::Prepare(_))).unwrap();
    assert_eq!(calls[prepare_at - 1], Call::Viewport([0, 0, DIM, DIM]));
    assert!(calls[..prepare_at].iter().filter(|c| matches!(c, Call::Upload(_))).count() >= 2);
    assert_eq!(calls.last(), Some(&Call::Viewport(SCENE_VIEWPORT)));
}

#[test]
fn composite_uses_host_stencil_per_zoom() {
    let tiles = [tile(1), OverscaledTileId::new(16, 0, 15, 3, 11_600)];
    let (mut layer, mut backend, sources) = setup(&tiles);
    run(&mut layer, RenderPass::Offscreen, &mut backend, &sources, &tiles).unwrap();
    backend.take_calls();
    run(&mut layer, RenderPass::Translucent, &mut backend, &sources, &tiles).unwrap();

    let stencils: Vec<_> = backend
        .take_calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::Composite(_, stencil) => Some(stencil),
            _ => None,
        })
        .collect();
    assert_eq!(
        stencils,
        [
            StencilMode::Equal { reference: 15 },
            StencilMode::Equal { reference: 16 }
        ]
    );
}

#[test]
fn opaque_pass_draws_nothing() {
    let tiles = [tile(1)];
    let (mut layer, mut backend, sources) = setup(&tiles);
    let stats = run(&mut layer, RenderPass::Opaque, &mut backend, &sources, &tiles).unwrap();
    assert_eq!(stats, FrameStats::default());
    assert_eq!(backend.take_calls(), [Call::Viewport(SCENE_VIEWPORT)]);
    assert_eq!(layer.phase(&tile(1)), TilePhase::NeedsPrepare);
}

#[test]
fn unprepared_tiles_are_not_composited() {
    let tiles = [tile(1)];
    let (mut layer, mut backend, sources) = setup(&tiles);
    let stats = run(&mut layer, RenderPass::Translucent, &mut backend, &sources, &tiles).unwrap();
    assert_eq!(stats.composited, 0);
    assert!(backend.inner.composites().is_empty());
}

#[test]
fn zero_exaggeration_skips_offscreen_work() {
    let tiles = [tile(1)];
    let (mut layer, mut backend, sources) = setup(&tiles);
    layer
        .set_config(HazardLayerConfig {
            exaggeration: 0.0,
            ..config()
        })
        .unwrap();
    assert!(!layer.has_offscreen_pass());

    let stats = run(&mut layer, RenderPass::Offscreen, &mut backend, &sources, &tiles).unwrap();
    assert_eq!(stats.prepared, 0);
    assert_eq!(layer.phase(&tile(1)), TilePhase::NeedsPrepare);
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[test]
fn missing_region_source_fails_and_keeps_tile_dirty() {
    let tiles = [tile(1)];
    let (mut layer, mut backend, mut sources) = setup(&tiles);
    sources.regions.clear();

    let err = run(&mut layer, RenderPass::Offscreen, &mut backend, &sources, &tiles).unwrap_err();
    match err {
        RenderError::Configuration { source_name, .. } => assert_eq!(source_name, SOURCE),
        other => panic!("expected a configuration error, got {other:?}"),
    }
    assert_eq!(layer.phase(&tile(1)), TilePhase::NeedsPrepare);
    assert!(layer.tiles().get(&tile(1)).unwrap().needs_prepare);
    assert_eq!(backend.take_calls().last(), Some(&Call::Viewport(SCENE_VIEWPORT)));
}

#[test]
fn failing_tile_does_not_block_the_rest_of_the_sweep() {
    let tiles = [tile(1), tile(2)];
    let (mut layer, mut backend, mut sources) = setup(&tiles);
    sources.regions.get_mut(SOURCE).unwrap().remove(&tile(1));

    for _ in 0..3 {
        let err = run(&mut layer, RenderPass::Offscreen, &mut backend, &sources, &tiles).unwrap_err();
        assert!(err.to_string().contains("no region texture"), "{err}");
        assert_eq!(backend.take_calls().last(), Some(&Call::Viewport(SCENE_VIEWPORT)));
    }
    assert_eq!(layer.phase(&tile(1)), TilePhase::NeedsPrepare);
    assert_eq!(layer.phase(&tile(2)), TilePhase::Ready);
    assert_eq!(layer.tiles().get(&tile(2)).unwrap().prepare_count, 1);
    let stats = layer.last_offscreen_stats();
    assert_eq!((stats.failed, stats.skipped, stats.prepared), (1, 1, 0));
}

#[test]
fn failed_tiles_are_counted_when_the_sweep_succeeds_elsewhere() {
    let tiles = [tile(1), tile(2)];
    let (mut layer, mut backend, mut sources) = setup(&tiles);
    let regions = sources.regions.get_mut(SOURCE).unwrap();
    let texture = regions.remove(&tile(1)).unwrap();
    assert!(run(&mut layer, RenderPass::Offscreen, &mut backend, &sources, &tiles).is_err());
    let stats = layer.last_offscreen_stats();
    assert_eq!((stats.failed, stats.prepared, stats.report_uploads), (1, 1, 1));

    sources.regions.get_mut(SOURCE).unwrap().insert(tile(1), texture);
    let stats = run(&mut layer, RenderPass::Offscreen, &mut backend, &sources, &tiles).unwrap();
    assert_eq!(stats.prepared, 1);
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.failed, 0);
    assert_eq!(layer.phase(&tile(1)), TilePhase::Ready);
}

#[test]
fn unset_region_source_is_a_configuration_error() {
    let tiles = [tile(1)];
    let (mut layer, mut backend, sources) = setup(&tiles);
    layer
        .set_config(HazardLayerConfig {
            region_source: None,
            ..config()
        })
        .unwrap();

    let err = run(&mut layer, RenderPass::Offscreen, &mut backend, &sources, &tiles).unwrap_err();
    assert!(matches!(err, RenderError::Configuration { .. }));
    assert_eq!(layer.phase(&tile(1)), TilePhase::NeedsPrepare);
}

#[test]
fn source_without_tile_texture_is_a_configuration_error() {
    let tiles = [tile(1)];
    let (mut layer, mut backend, mut sources) = setup(&tiles);
    sources.regions.get_mut(SOURCE).unwrap().clear();

    let err = run(&mut layer, RenderPass::Offscreen, &mut backend, &sources, &tiles).unwrap_err();
    assert!(err.to_string().contains("no region texture"), "{err}");
}

#[test]
fn missing_dem_is_skipped_not_failed() {
    let tiles = [tile(1)];
    let (mut layer, mut backend, mut sources) = setup(&tiles);
    sources.dems.clear();

    let stats = run(&mut layer, RenderPass::Offscreen, &mut backend, &sources, &tiles).unwrap();
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.prepared, 0);
    assert_eq!(layer.phase(&tile(1)), TilePhase::NeedsPrepare);
    assert_eq!(backend.inner.live_framebuffers(), 0);
}

#[test]
fn failed_tile_is_retried_next_frame() {
    let tiles = [tile(1)];
    let (mut layer, mut backend, mut sources) = setup(&tiles);
    let regions = sources.regions.remove(SOURCE).unwrap();
    assert!(run(&mut layer, RenderPass::Offscreen, &mut backend, &sources, &tiles).is_err());

    sources.regions.insert(SOURCE.to_owned(), regions);
    let stats = run(&mut layer, RenderPass::Offscreen, &mut backend, &sources, &tiles).unwrap();
    assert_eq!(stats.prepared, 1);
    assert_eq!(layer.phase(&tile(1)), TilePhase::Ready);
}

// ---------------------------------------------------------------------------
// Resource reuse
// ---------------------------------------------------------------------------

#[test]
fn clean_tiles_are_not_prepared_again() {
    let tiles = [tile(1)];
    let (mut layer, mut backend, sources) = setup(&tiles);
    run(&mut layer, RenderPass::Offscreen, &mut backend, &sources, &tiles).unwrap();
    let stats = run(&mut layer, RenderPass::Offscreen, &mut backend, &sources, &tiles).unwrap();
    assert_eq!(stats.prepared, 0);
    assert_eq!(stats.skipped, 1);
}

#[test]
fn offscreen_target_covers_the_tile_without_its_border() {
    let tiles = [tile(1)];
    let (mut layer, mut backend, sources) = setup(&tiles);
    run(&mut layer, RenderPass::Offscreen, &mut backend, &sources, &tiles).unwrap();

    let state = layer.tiles().get(&tile(1)).unwrap();
    let framebuffer = state.framebuffer.unwrap();
    assert_eq!(framebuffer.side, DIM);
    let color = backend.color_attachment(framebuffer.framebuffer).unwrap();
    assert_eq!(backend.inner.texture_desc(color).unwrap().width, DIM);
    // The DEM texture keeps the bordered stride.
    let dem = state.dem_texture.unwrap();
    assert_eq!(backend.inner.texture_desc(dem.id).unwrap().width, DIM + 2);
}

#[test]
fn edge_pixels_see_the_tile_slope_not_the_border() {
    let tiles = [tile(1)];
    let (mut layer, mut backend, mut sources) = setup(&tiles);
    // The border continues the eastward ramp, as neighbouring tiles would.
    let stride = DIM + 2;
    let pixels: Vec<u8> = (0..stride * stride)
        .flat_map(|i| DemEncoding::MapboxTerrainRgb.encode(1994.0 + 6.0 * (i % stride) as f32))
        .collect();
    sources.dems.insert(
        tile(1),
        DemData::new(DIM, DemEncoding::MapboxTerrainRgb, pixels).unwrap(),
    );
    run(&mut layer, RenderPass::Offscreen, &mut backend, &sources, &tiles).unwrap();

    let interior = offscreen_texel(&layer, &backend, 4, 4);
    for x in [0, DIM - 1] {
        let edge = offscreen_texel(&layer, &backend, x, 4);
        assert!(edge[0].abs_diff(interior[0]) <= 1, "column {x}: {edge:?} vs {interior:?}");
        assert_eq!(edge[1], interior[1]);
    }
}

#[test]
fn framebuffer_and_report_are_reused_across_prepares() {
    let tiles = [tile(1)];
    let (mut layer, mut backend, sources) = setup(&tiles);
    run(&mut layer, RenderPass::Offscreen, &mut backend, &sources, &tiles).unwrap();
    let framebuffer = layer.tiles().get(&tile(1)).unwrap().framebuffer;
    backend.take_calls();

    layer.on_dem_loaded(tile(1));
    let stats = run(&mut layer, RenderPass::Offscreen, &mut backend, &sources, &tiles).unwrap();
    assert_eq!(stats.prepared, 1);
    assert_eq!(stats.report_uploads, 0);
    assert_eq!(layer.tiles().get(&tile(1)).unwrap().framebuffer, framebuffer);
    assert_eq!(layer.tiles().get(&tile(1)).unwrap().prepare_count, 2);
    assert!(!backend
        .take_calls()
        .iter()
        .any(|c| matches!(c, Call::CreateTexture(_) | Call::CreateFramebuffer(_))));
}

#[test]
fn changed_report_is_rebuilt_and_reuploaded() {
    let tiles = [tile(1)];
    let (mut layer, mut backend, sources) = setup(&tiles);
    run(&mut layer, RenderPass::Offscreen, &mut backend, &sources, &tiles).unwrap();

    layer.set_report(HazardReport::from_records(vec![record(3.0, 2.0)]));
    assert_eq!(layer.phase(&tile(1)), TilePhase::Ready, "same content");

    layer.set_report(HazardReport::from_records(vec![record(4.0, 2.0)]));
    assert_eq!(layer.phase(&tile(1)), TilePhase::NeedsPrepare);
    let stats = run(&mut layer, RenderPass::Offscreen, &mut backend, &sources, &tiles).unwrap();
    assert_eq!(stats.report_uploads, 1);
    assert_eq!(layer.report_uploads(), 2);
}

#[test]
fn eviction_releases_tile_resources() {
    let tiles = [tile(1)];
    let (mut layer, mut backend, mut sources) = setup(&tiles);
    run(&mut layer, RenderPass::Offscreen, &mut backend, &sources, &tiles).unwrap();
    let framebuffer = layer.tiles().get(&tile(1)).unwrap().framebuffer.unwrap();
    let dem_texture = layer.tiles().get(&tile(1)).unwrap().dem_texture.unwrap();

    assert!(layer.on_tile_evicted(&tile(1), &mut backend));
    assert_eq!(layer.phase(&tile(1)), TilePhase::Uninitialized);
    assert!(backend
        .take_calls()
        .contains(&Call::DestroyFramebuffer(framebuffer.framebuffer)));
    assert_eq!(layer.tiles().pool().free_count(), 1);

    // A new tile at the same resolution takes the pooled DEM texture.
    let next = tile(2);
    sources.dems.insert(next, ramp_dem(6.0));
    let regions = region_texture(&mut backend, 0);
    sources.regions.get_mut(SOURCE).unwrap().insert(next, regions);
    layer.on_dem_loaded(next);
    run(&mut layer, RenderPass::Offscreen, &mut backend, &sources, &[next]).unwrap();
    assert_eq!(layer.tiles().get(&next).unwrap().dem_texture, Some(dem_texture));
    assert_eq!(layer.tiles().pool().free_count(), 0);
}

#[test]
fn clear_destroys_everything() {
    let tiles = [tile(1), tile(2)];
    let (mut layer, mut backend, sources) = setup(&tiles);
    run(&mut layer, RenderPass::Offscreen, &mut backend, &sources, &tiles).unwrap();

    layer.clear(&mut backend);
    assert!(layer.tiles().is_empty());
    assert_eq!(backend.inner.live_framebuffers(), 0);
    // Only the two region rasters owned by the test remain.
    assert_eq!(backend.inner.live_textures(), 2);
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn offscreen_texel(layer: &HazardLayer, backend: &RecordingBackend, x: u32, y: u32) -> [u8; 4] {
    let framebuffer = layer.tiles().get(&tile(1)).unwrap().framebuffer.unwrap();
    let color = backend.color_attachment(framebuffer.framebuffer).unwrap();
    let pixels = backend.inner.texture_pixels(color).unwrap();
    let offset = ((y * framebuffer.side + x) * 4) as usize;
    pixels[offset..offset + 4].try_into().unwrap()
}

#[test]
fn steep_terrain_above_border_gets_high_rating() {
    let tiles = [tile(1)];
    let (mut layer, mut backend, sources) = setup(&tiles);
    run(&mut layer, RenderPass::Offscreen, &mut backend, &sources, &tiles).unwrap();

    // Interior pixel: faces west, outside the unfavorable range 14..=2.
    let [r, g, b, a] = offscreen_texel(&layer, &backend, 4, 4);
    assert!(r > 128, "derivative points east, got r = {r}");
    assert_eq!(g, 128);
    assert_eq!(b, 153, "level 3");
    assert_eq!(a, 255);
}

#[test]
fn unfavorable_aspect_raises_level() {
    let tiles = [tile(1)];
    let (mut layer, mut backend, sources) = setup(&tiles);
    let mut west = record(3.0, 2.0);
    west.unfavorable_start = 11.0;
    west.unfavorable_end = 13.0;
    layer.set_report(HazardReport::from_records(vec![west]));
    run(&mut layer, RenderPass::Offscreen, &mut backend, &sources, &tiles).unwrap();

    assert_eq!(offscreen_texel(&layer, &backend, 4, 4)[2], 204, "level 4");
}

#[test]
fn flat_terrain_has_no_hazard() {
    let tiles = [tile(1)];
    let (mut layer, mut backend, mut sources) = setup(&tiles);
    sources.dems.insert(tile(1), ramp_dem(0.0));
    run(&mut layer, RenderPass::Offscreen, &mut backend, &sources, &tiles).unwrap();

    assert_eq!(offscreen_texel(&layer, &backend, 4, 4), [128, 128, 0, 255]);
}

#[test]
fn region_rows_past_the_atlas_are_outside() {
    let tiles = [tile(1)];
    let (mut layer, mut backend, mut sources) = setup(&tiles);
    let far = region_texture(&mut backend, 300);
    sources.regions.get_mut(SOURCE).unwrap().insert(tile(1), far);
    run(&mut layer, RenderPass::Offscreen, &mut backend, &sources, &tiles).unwrap();

    assert_eq!(offscreen_texel(&layer, &backend, 4, 4)[3], 0);
}

#[test]
fn composite_tints_hazard_pixels_opaque() {
    let tiles = [tile(1)];
    let (mut layer, mut backend, sources) = setup(&tiles);
    run(&mut layer, RenderPass::Offscreen, &mut backend, &sources, &tiles).unwrap();
    run(&mut layer, RenderPass::Translucent, &mut backend, &sources, &tiles).unwrap();

    let record = &backend.inner.composites()[0];
    assert_eq!(record.viewport, SCENE_VIEWPORT);
    assert_eq!(record.uniforms.ratings, layer.config().rating_ramp());
    let [_, _, _, alpha] = record.pixel(4, 4);
    assert!((alpha - 1.0).abs() < 1e-4, "alpha = {alpha}");
}

#[test]
fn viewport_anchor_rotates_light_with_bearing() {
    let tiles = [tile(1)];
    let (mut layer, mut backend, sources) = setup(&tiles);
    run(&mut layer, RenderPass::Offscreen, &mut backend, &sources, &tiles).unwrap();

    let host = Host {
        pass: RenderPass::Translucent,
        bearing: 0.25,
    };
    layer.draw(&host, &mut backend, &sources, &tiles).unwrap();
    let [intensity, azimuth] = backend.inner.composites()[0].uniforms.light;
    assert_eq!(intensity, 0.5);
    assert!((azimuth - (335f32.to_radians() - 0.25)).abs() < 1e-6);
}
