//! Active-edge context: the per-pass arenas the scan converter works on.
//!
//! Polygons are clipped and projected into [`AeEdge`]s, bucketed by the
//! scanline they start on. A sweep down the screen then keeps the edges
//! crossing the current row sorted by x and maintains a stack of the
//! surfaces open at the sweep position; whoever is on top owns the pixels
//! until the next edge. The output is a set of [`AeSpan`]s per surface that
//! together cover every pixel exactly once.
//!
//! All three arenas are plain `Vec`s addressed by `u32` and truncated at the
//! start of every pass. Level edges remember the arena slot they were
//! emitted into (tagged with the pass generation), so a second surface
//! sharing the edge reuses it instead of clipping and projecting it again.

use glam::{Vec2, Vec3};

use crate::engine::clip::{ClipOutcome, ClipState, EdgeTarget};
use crate::engine::frustum::ClipFlags;
use crate::engine::types::{FIXED_CEIL_BIAS, FIXED_SHIFT, FrameContext, ModelState, ZGradient};
use crate::renderer::Span;
use crate::world::{EdgeId, Level, Plane, SurfaceId};

pub type AeEdgeId = u32;
pub type AeSurfaceId = u32;
pub type AeSpanId = u32;

/// Left sentinel of the active edge list.
pub const EDGE_HEAD: AeEdgeId = 0;
/// Right sentinel; its x is the right screen edge.
pub const EDGE_TAIL: AeEdgeId = 1;
pub(crate) const FIRST_EDGE: usize = 2;

/// Surface slot 0 is the background, always at the bottom of the stack.
pub const BACKGROUND: AeSurfaceId = 0;
const BACKGROUND_KEY: u32 = u32::MAX;

/// A projected, screen-space edge.
#[derive(Clone, Copy, Debug)]
pub struct AeEdge {
    /// 16.16, already biased so that `x >> 16` is the first covered pixel
    pub x: i32,
    pub x_step: i32,
    pub prev: AeEdgeId,
    pub next: AeEdgeId,
    pub(crate) next_new: Option<AeEdgeId>,
    pub(crate) next_remove: Option<AeEdgeId>,
    /// first and last scanline crossed
    pub top: i32,
    pub bottom: i32,
    /// surface whose right side this is (edge walks downwards)
    pub trailing: Option<AeSurfaceId>,
    /// surface whose left side this is (edge walks upwards)
    pub leading: Option<AeSurfaceId>,
    /// level edge this was emitted from, if cacheable
    pub source: Option<EdgeId>,
    pub near_inv_z: f32,
    /// projected end points, for edge drawing
    pub from: Vec2,
    pub to: Vec2,
}

impl AeEdge {
    fn sentinel(x: i32) -> Self {
        Self {
            x,
            x_step: 0,
            prev: EDGE_HEAD,
            next: EDGE_TAIL,
            next_new: None,
            next_remove: None,
            top: 0,
            bottom: 0,
            trailing: None,
            leading: None,
            source: None,
            near_inv_z: 0.0,
            from: Vec2::ZERO,
            to: Vec2::ZERO,
        }
    }
}

/// A polygon that made it onto the screen, plus its spot in the sort stack.
#[derive(Clone, Copy, Debug)]
pub struct AeSurface {
    pub next: AeSurfaceId,
    pub prev: AeSurfaceId,
    pub spans: Option<AeSpanId>,
    /// +1 per leading edge crossed on this row, -1 per trailing edge
    pub span_state: i32,
    pub last_x: i32,
    pub key: u32,
    pub in_submodel: bool,
    /// `None` for the background
    pub source: Option<SurfaceId>,
    pub zi: ZGradient,
    pub nearest_inv_z: f32,
    pub origin: Vec3,
}

impl AeSurface {
    fn new(model: ModelState, source: Option<SurfaceId>) -> Self {
        Self {
            next: BACKGROUND,
            prev: BACKGROUND,
            spans: None,
            span_state: 0,
            last_x: 0,
            key: model.key,
            in_submodel: model.in_submodel,
            source,
            zi: ZGradient::default(),
            nearest_inv_z: 0.0,
            origin: model.origin,
        }
    }

    /// Depth of the closest point emitted for this surface.
    #[inline]
    pub fn nearest_z(&self) -> f32 {
        if self.nearest_inv_z > 0.0 {
            1.0 / self.nearest_inv_z
        } else {
            f32::MAX
        }
    }
}

/// Horizontal run of pixels `[x, x + count)` on row `y`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AeSpan {
    pub x: i32,
    pub y: i32,
    pub count: i32,
    pub(crate) next: Option<AeSpanId>,
}

impl From<AeSpan> for Span {
    fn from(s: AeSpan) -> Self {
        Span {
            x: s.x,
            y: s.y,
            count: s.count,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CachedEdge {
    Emitted(AeEdgeId),
    FullyClipped,
}

#[derive(Clone, Copy, Debug)]
struct CacheEntry {
    generation: u32,
    state: CachedEdge,
}

impl Default for CacheEntry {
    fn default() -> Self {
        Self {
            generation: 0,
            state: CachedEdge::FullyClipped,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EdgeStats {
    pub surfaces: usize,
    pub edges: usize,
    pub spans: usize,
    pub cached_edge_hits: usize,
    pub cached_clip_hits: usize,
}

/// Pixel rectangle the sweep covers, right/bottom exclusive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScreenBounds {
    pub left: i32,
    pub right: i32,
    pub top: i32,
    pub bottom: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Phase {
    Idle,
    Collecting,
    Scanned,
}

pub struct ActiveEdgeContext {
    pub(crate) edges: Vec<AeEdge>,
    pub(crate) surfaces: Vec<AeSurface>,
    pub(crate) spans: Vec<AeSpan>,
    /// per row, edges starting there sorted by x
    pub(crate) new_edges: Vec<Option<AeEdgeId>>,
    /// per row, edges whose last row it is
    pub(crate) remove_edges: Vec<Option<AeEdgeId>>,
    edge_cache: Vec<CacheEntry>,
    generation: u32,
    pub(crate) bounds: ScreenBounds,
    pub(crate) stats: EdgeStats,
    pub(crate) phase: Phase,
}

impl Default for ActiveEdgeContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ActiveEdgeContext {
    pub fn new() -> Self {
        Self {
            edges: Vec::new(),
            surfaces: Vec::new(),
            spans: Vec::new(),
            new_edges: Vec::new(),
            remove_edges: Vec::new(),
            edge_cache: Vec::new(),
            generation: 0,
            bounds: ScreenBounds::default(),
            stats: EdgeStats::default(),
            phase: Phase::Idle,
        }
    }

    /*──────────────────────────── pass setup ───────────────────────────*/

    /// Reset every arena for a new pass over a `w × h` screen.
    ///
    /// Bumping the generation invalidates every edge cached by the
    /// previous pass without touching the cache itself.
    pub fn begin_render(&mut self, w: usize, h: usize, num_level_edges: usize) {
        self.generation = self.generation.wrapping_add(1);
        if self.generation == 0 || self.edge_cache.len() != num_level_edges {
            self.edge_cache.clear();
            self.edge_cache.resize(num_level_edges, CacheEntry::default());
            self.generation = self.generation.max(1);
        }

        self.bounds = ScreenBounds {
            left: 0,
            right: w as i32,
            top: 0,
            bottom: h as i32,
        };

        self.edges.clear();
        self.edges.push(AeEdge::sentinel(self.bounds.left << FIXED_SHIFT));
        self.edges
            .push(AeEdge::sentinel((self.bounds.right << FIXED_SHIFT) | FIXED_CEIL_BIAS));

        self.surfaces.clear();
        let mut background = AeSurface::new(
            ModelState {
                key: BACKGROUND_KEY,
                ..ModelState::default()
            },
            None,
        );
        background.span_state = 1;
        self.surfaces.push(background);

        self.spans.clear();
        self.new_edges.clear();
        self.new_edges.resize(h + 1, None);
        self.remove_edges.clear();
        self.remove_edges.resize(h + 1, None);

        self.stats = EdgeStats::default();
        self.phase = Phase::Collecting;
    }

    /*──────────────────────────── polygon intake ───────────────────────*/

    /// Clip, project and emit the edges of a world surface.
    ///
    /// Returns the surface slot, or `None` if nothing reached the screen.
    pub fn process_surface(
        &mut self,
        ctx: &FrameContext,
        level: &Level,
        surface: SurfaceId,
        clip: ClipFlags,
    ) -> Option<AeSurfaceId> {
        debug_assert_eq!(self.phase, Phase::Collecting);
        let chain = ctx.frustum.clip_chain(clip);
        let id = self.push_surface(ctx.model, surface);
        let mut st = ClipState::default();

        for se in level.surface_edges(surface) {
            match self.lookup_cached(se.edge) {
                Some(CachedEdge::FullyClipped) => {
                    self.stats.cached_clip_hits += 1;
                    st.last_vert = None;
                    continue;
                }
                Some(CachedEdge::Emitted(e)) => {
                    self.reuse_edge(e, id, &mut st);
                    continue;
                }
                None => {}
            }

            let (a, b) = se.endpoints(&level.edges);
            let v0 = level.vertices[a as usize].pos;
            let v1 = level.vertices[b as usize].pos;
            st.begin_edge();
            let target = EdgeTarget {
                surface: id,
                source: Some(se.edge),
                depth_only: false,
            };
            self.clip_edge(&mut st, ctx, &chain, v0, v1, target);
            self.remember_edge(se.edge, &st);
        }

        self.close_polygon(&mut st, ctx, &chain, id);
        let plane = level.planes[level.surfaces[surface as usize].plane as usize];
        self.finish_surface(id, &st, ctx, plane)
    }

    /// Same as [`process_surface`](Self::process_surface) for a submodel
    /// fragment given as world-space points; fragments never share edges.
    pub fn process_fragment(
        &mut self,
        ctx: &FrameContext,
        level: &Level,
        surface: SurfaceId,
        points: &[Vec3],
        clip: ClipFlags,
    ) -> Option<AeSurfaceId> {
        debug_assert_eq!(self.phase, Phase::Collecting);
        if points.len() < 3 {
            return None;
        }
        let chain = ctx.frustum.clip_chain(clip);
        let id = self.push_surface(ctx.model, surface);
        let mut st = ClipState::default();

        for (i, &v0) in points.iter().enumerate() {
            let v1 = points[(i + 1) % points.len()];
            st.begin_edge();
            let target = EdgeTarget {
                surface: id,
                source: None,
                depth_only: false,
            };
            self.clip_edge(&mut st, ctx, &chain, v0, v1, target);
        }

        self.close_polygon(&mut st, ctx, &chain, id);
        let plane = level.planes[level.surfaces[surface as usize].plane as usize]
            .translated(ctx.model.origin);
        self.finish_surface(id, &st, ctx, plane)
    }

    fn push_surface(&mut self, model: ModelState, surface: SurfaceId) -> AeSurfaceId {
        debug_assert!(model.key != BACKGROUND_KEY);
        self.surfaces.push(AeSurface::new(model, Some(surface)));
        (self.surfaces.len() - 1) as AeSurfaceId
    }

    fn finish_surface(
        &mut self,
        id: AeSurfaceId,
        st: &ClipState,
        ctx: &FrameContext,
        plane: Plane,
    ) -> Option<AeSurfaceId> {
        if !st.emitted {
            debug_assert_eq!(id as usize, self.surfaces.len() - 1);
            self.surfaces.pop();
            return None;
        }
        let surf = &mut self.surfaces[id as usize];
        surf.zi = inverse_depth_gradient(ctx, plane);
        surf.nearest_inv_z = st.nearest_inv_z;
        self.stats.surfaces += 1;
        Some(id)
    }

    /*──────────────────────────── edge cache ───────────────────────────*/

    pub(crate) fn lookup_cached(&self, edge: EdgeId) -> Option<CachedEdge> {
        let entry = self.edge_cache.get(edge as usize)?;
        if entry.generation != self.generation {
            return None;
        }
        match entry.state {
            CachedEdge::Emitted(e) => self
                .edges
                .get(e as usize)
                .filter(|ae| ae.source == Some(edge))
                .map(|_| entry.state),
            CachedEdge::FullyClipped => Some(entry.state),
        }
    }

    /// Attach a second surface to an edge emitted earlier this pass.
    fn reuse_edge(&mut self, e: AeEdgeId, surface: AeSurfaceId, st: &mut ClipState) {
        let edge = &mut self.edges[e as usize];
        if edge.trailing.is_none() {
            edge.trailing = Some(surface);
        } else {
            edge.leading = Some(surface);
        }
        st.nearest_inv_z = st.nearest_inv_z.max(edge.near_inv_z);
        st.emitted = true;
        st.last_vert = None;
        self.stats.cached_edge_hits += 1;
    }

    /// Only edges that went through clipping untouched are worth caching.
    fn remember_edge(&mut self, edge: EdgeId, st: &ClipState) {
        let state = match (st.outcome, st.last_edge) {
            (ClipOutcome::Unclipped, Some(e)) => CachedEdge::Emitted(e),
            (ClipOutcome::Unclipped, None) | (ClipOutcome::FullyClipped, _) => {
                CachedEdge::FullyClipped
            }
            (ClipOutcome::Split, _) => return,
        };
        if let Some(entry) = self.edge_cache.get_mut(edge as usize) {
            *entry = CacheEntry {
                generation: self.generation,
                state,
            };
        }
    }

    /// Arena slot a level edge was emitted into this pass, if any.
    pub fn cached_edge(&self, edge: EdgeId) -> Option<AeEdgeId> {
        match self.lookup_cached(edge)? {
            CachedEdge::Emitted(e) => Some(e),
            CachedEdge::FullyClipped => None,
        }
    }

    /// `true` if the edge was rejected outright this pass.
    pub fn is_cached_clipped(&self, edge: EdgeId) -> bool {
        self.lookup_cached(edge) == Some(CachedEdge::FullyClipped)
    }

    /*──────────────────────────── accessors ────────────────────────────*/

    #[inline]
    pub fn surfaces(&self) -> &[AeSurface] {
        &self.surfaces
    }

    #[inline]
    pub fn surface(&self, id: AeSurfaceId) -> &AeSurface {
        &self.surfaces[id as usize]
    }

    /// Emitted edges, sentinels excluded.
    #[inline]
    pub fn emitted_edges(&self) -> &[AeEdge] {
        &self.edges[FIRST_EDGE.min(self.edges.len())..]
    }

    #[inline]
    pub fn edge(&self, id: AeEdgeId) -> &AeEdge {
        &self.edges[id as usize]
    }

    #[inline]
    pub fn bounds(&self) -> ScreenBounds {
        self.bounds
    }

    #[inline]
    pub fn stats(&self) -> EdgeStats {
        self.stats
    }

    /// Spans produced for `surface`, newest first.
    pub fn spans(&self, surface: AeSurfaceId) -> SpanIter<'_> {
        SpanIter {
            spans: &self.spans,
            next: self.surfaces.get(surface as usize).and_then(|s| s.spans),
        }
    }

    pub fn has_spans(&self, surface: AeSurfaceId) -> bool {
        self.spans(surface).any(|s| s.count > 0)
    }
}

pub struct SpanIter<'a> {
    spans: &'a [AeSpan],
    next: Option<AeSpanId>,
}

impl Iterator for SpanIter<'_> {
    type Item = AeSpan;

    fn next(&mut self) -> Option<AeSpan> {
        let span = *self.spans.get(self.next? as usize)?;
        self.next = span.next;
        Some(span)
    }
}

/// `1/z` across the screen for points on `plane`.
///
/// With the plane in view space as `n·q = d` and the ray through pixel
/// (u, v) as `q = z·((u-cx)/s, -(v-cy)/s, 1)`, `1/z` is affine in u and v.
pub fn inverse_depth_gradient(ctx: &FrameContext, plane: Plane) -> ZGradient {
    let n = ctx.camera.rotate_to_view(plane.normal);
    let mut d = plane.dist - plane.normal.dot(ctx.camera.pos());
    if d.abs() < 1e-6 {
        d = 1e-6f32.copysign(d);
    }
    let vp = &ctx.viewport;
    let step_x = n.x / (vp.scale * d);
    let step_y = -n.y / (vp.scale * d);
    ZGradient {
        step_x,
        step_y,
        origin: n.z / d - vp.center_x * step_x - vp.center_y * step_y,
    }
}

/*====================================================================*/
/*                                Tests                                */
/*====================================================================*/
