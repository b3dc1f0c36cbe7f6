use log::{debug, trace};

use crate::{
    engine::active_edge::ActiveEdgeContext,
    engine::bsp::{VisStamps, WorldPass},
    engine::config::{RenderMode, RenderSettings},
    engine::frustum::Frustum,
    engine::portal::{PortalScheduler, SpanMask, View, eligible_portals},
    engine::types::{FrameContext, Viewport},
    renderer::{RenderError, Renderer, RendererExt, Rgba, Span, SurfaceDraw},
    world::{Camera, LeafId, Level, PortalId, PvsCache, SurfaceId, TextureBank},
};

/// Totals over every pass of one frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub passes: usize,
    pub portal_passes: usize,
    pub portals_dropped: usize,
    pub leaves_marked: usize,
    pub surfaces: usize,
    pub edges: usize,
    pub spans: usize,
    pub cached_edge_hits: usize,
    pub fragments: usize,
}

/// What one pass did, kept until the next frame starts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PassSummary {
    pub portal: Option<PortalId>,
    pub depth: u32,
    pub leaf: LeafId,
    pub surfaces: usize,
    pub spans: usize,
    /// portals that received pixels in this pass
    pub eligible: Vec<PortalId>,
}

pub struct Engine<R: Renderer> {
    pub renderer: R,
    pub level: Level,
    pub camera: Camera,
    pub texture_bank: TextureBank,
    pub settings: RenderSettings,
    width: usize,
    height: usize,
    active_edges: ActiveEdgeContext,
    stamps: VisStamps,
    main_pvs: PvsCache,
    portal_pvs: PvsCache,
    scheduler: PortalScheduler,
    frame: u32,
    pass: u32,
    span_scratch: Vec<Span>,
    passes: Vec<PassSummary>,
}

impl<R: Renderer> Engine<R> {
    pub fn new(
        renderer: R,
        level: Level,
        camera: Camera,
        texture_bank: TextureBank,
        w: usize,
        h: usize,
    ) -> Self {
        let settings = RenderSettings::default();
        Self {
            renderer,
            stamps: VisStamps::new(&level),
            main_pvs: PvsCache::new(level.vis_leaf_count()),
            portal_pvs: PvsCache::new(level.vis_leaf_count()),
            level,
            camera,
            texture_bank,
            settings,
            width: w,
            height: h,
            active_edges: ActiveEdgeContext::new(),
            scheduler: PortalScheduler::new(settings.portals),
            frame: 0,
            pass: 0,
            span_scratch: Vec::new(),
            passes: Vec::new(),
        }
    }

    pub fn resize(&mut self, w: usize, h: usize) {
        self.width = w;
        self.height = h;
    }

    #[inline]
    pub fn viewport(&self) -> Viewport {
        Viewport::new(self.width, self.height, self.camera.fov())
    }

    /// Arenas of the last pass rendered (the last portal pass if any ran).
    #[inline]
    pub fn active_edges(&self) -> &ActiveEdgeContext {
        &self.active_edges
    }

    #[inline]
    pub fn last_passes(&self) -> &[PassSummary] {
        &self.passes
    }

    #[inline]
    pub fn frame(&self) -> u32 {
        self.frame
    }

    /// Render the main view and every portal view the budgets allow, then
    /// hand the finished buffer to `submit`.
    pub fn render_frame<F>(&mut self, submit: F) -> Result<FrameStats, RenderError>
    where
        F: FnOnce(&[Rgba], usize, usize),
    {
        self.frame = self.frame.wrapping_add(1);
        self.renderer
            .set_surface_cache_size(self.settings.surface_cache_pixels);
        self.renderer
            .begin_frame(self.width, self.height, self.settings.background);
        self.scheduler.begin_frame(self.settings.portals);
        self.passes.clear();
        let mut stats = FrameStats::default();

        let leaf = self.level.locate_leaf(self.camera.pos());
        self.render_view(&View::main(self.camera, leaf), &mut stats)?;

        while let Some(view) = self.scheduler.next_view() {
            self.render_view(&view, &mut stats)?;
            stats.portal_passes += 1;
        }
        stats.portals_dropped = self.scheduler.dropped();

        self.renderer.end_frame(submit);
        debug!(
            "frame {}: {} passes ({} portal, {} dropped), {} surfaces, {} edges ({} shared), {} spans",
            self.frame,
            stats.passes,
            stats.portal_passes,
            stats.portals_dropped,
            stats.surfaces,
            stats.edges,
            stats.cached_edge_hits,
            stats.spans
        );
        Ok(stats)
    }

    /// One full pass: mark, walk, scan, draw, then queue the portals that
    /// got pixels.
    fn render_view(&mut self, view: &View, stats: &mut FrameStats) -> Result<(), RenderError> {
        self.pass = self.pass.wrapping_add(1).max(1);
        let viewport = Viewport::new(self.width, self.height, view.camera.fov());

        // ─── 1. PVS ───
        let cache = if view.depth == 0 {
            &mut self.main_pvs
        } else {
            &mut self.portal_pvs
        };
        let (pvs, fresh) = cache.update(&self.level, view.leaf);
        if fresh {
            trace!("pvs for leaf {}: {} leaves", view.leaf, pvs.count());
        }
        let mut marked = self.stamps.mark_visible_leaves(&self.level, pvs, self.pass);
        if self.stamps.mark_leaf(&self.level, view.leaf, self.pass) {
            marked += 1;
        }

        // ─── 2. walk + edge emission ───
        let mut frustum = Frustum::new(&viewport, &view.camera);
        if let Some(plane) = view.clip_plane {
            frustum = frustum.with_portal_plane(plane);
        }
        let mut ctx = FrameContext::new(
            view.camera,
            viewport,
            frustum,
            self.settings,
            self.frame,
            self.pass,
            view.depth,
        );
        self.active_edges
            .begin_render(self.width, self.height, self.level.edges.len());
        let walk = {
            let mut world = WorldPass::new(&self.level, &mut ctx, &mut self.stamps, &mut self.active_edges);
            world.render_world();
            world.draw_submodels();
            world.stats
        };

        // ─── 3. scan ───
        self.active_edges.scan_edges();
        let eligible = eligible_portals(&self.level, &self.active_edges, view.mask.as_ref());

        // ─── 4. draw ───
        self.draw_pass(&ctx, view.mask.as_ref())?;

        // ─── 5. bookkeeping + portals ───
        let ae = self.active_edges.stats();
        stats.passes += 1;
        stats.leaves_marked += marked;
        stats.surfaces += ae.surfaces;
        stats.edges += ae.edges;
        stats.spans += ae.spans;
        stats.cached_edge_hits += ae.cached_edge_hits;
        stats.fragments += walk.fragments;
        self.passes.push(PassSummary {
            portal: view.portal,
            depth: view.depth,
            leaf: view.leaf,
            surfaces: ae.surfaces,
            spans: ae.spans,
            eligible: eligible.iter().map(|(p, _)| *p).collect(),
        });

        for (portal, mask) in eligible {
            self.scheduler
                .schedule(View::through_portal(&self.level, view, portal, mask));
        }
        Ok(())
    }

    fn draw_pass(&mut self, ctx: &FrameContext, mask: Option<&SpanMask>) -> Result<(), RenderError> {
        let settings = &ctx.settings;
        if settings.mode != RenderMode::EdgesOnly {
            for id in 0..self.active_edges.surfaces().len() as u32 {
                let surf = *self.active_edges.surface(id);

                self.span_scratch.clear();
                for span in self.active_edges.spans(id).filter(|s| s.count > 0) {
                    match mask {
                        Some(m) => m.clip_span(span.into(), &mut self.span_scratch),
                        None => self.span_scratch.push(span.into()),
                    }
                }
                if self.span_scratch.is_empty() {
                    continue;
                }

                let Some(source) = surf.source else {
                    self.renderer
                        .fill_spans(&self.span_scratch, &surf.zi, settings.background);
                    continue;
                };
                // a portal's pixels belong to the pass rendered through it
                if self.level.surfaces[source as usize].is_portal() {
                    continue;
                }

                if settings.mode == RenderMode::SpansOnly {
                    self.renderer
                        .fill_spans(&self.span_scratch, &surf.zi, flat_color(source));
                    continue;
                }
                let job = SurfaceDraw {
                    level: &self.level,
                    surface: source,
                    spans: &self.span_scratch,
                    zi: surf.zi,
                    camera: &ctx.camera,
                    viewport: &ctx.viewport,
                    origin: surf.origin,
                    nearest_z: surf.nearest_z(),
                    mip_override: settings.mip_override,
                    lighting: settings.lighting,
                };
                self.renderer.draw_surface(&job, &self.texture_bank)?;
            }
        }

        if settings.mode == RenderMode::EdgesOnly || settings.wireframe {
            self.renderer
                .outline_edges(self.active_edges.emitted_edges(), settings.edge_color, mask);
        }
        Ok(())
    }
}

/// Stable, distinct-looking colour per surface for the flat span mode.
fn flat_color(surface: SurfaceId) -> Rgba {
    0xFF00_0000 | (surface.wrapping_add(1).wrapping_mul(0x9E37_79B1) >> 8)
}

/*====================================================================*/
/*                                Tests                                */
/*====================================================================*/
