//! Edge clipping, projection and emission.
//!
//! Each polygon edge is clipped against the planes its node still
//! straddles. Where a polygon leaves and re-enters the left or a portal
//! plane, a closing edge along that plane is emitted after the loop so the
//! surface keeps a proper left boundary. The right plane's closing edge
//! only contributes depth; the sweep ends every row at the right screen
//! edge anyway.

use glam::{Vec2, Vec3};

use crate::engine::active_edge::{ActiveEdgeContext, AeEdge, AeEdgeId, AeSurfaceId};
use crate::engine::frustum::PlaneKind;
use crate::engine::types::{FIXED_CEIL_BIAS, FIXED_ONE, FIXED_SHIFT, FrameContext, NEAR_CLIP};
use crate::world::EdgeId;

const MAX_CLIP_PLANES: usize = 6;

/// Projected vertex, kept between consecutive edges of one polygon.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ProjectedVert {
    pub x: f32,
    pub y: f32,
    pub inv_z: f32,
    pub ceil_y: i32,
}

/// Where an edge leaves and re-enters the visible side of one plane.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Crossing {
    pub enter: Option<Vec3>,
    pub exit: Option<Vec3>,
}

/// What clipping did to the edge currently being processed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub(crate) enum ClipOutcome {
    #[default]
    Unclipped,
    /// At least one end point moved.
    Split,
    /// Rejected by a plane before any split.
    FullyClipped,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct EdgeTarget {
    pub surface: AeSurfaceId,
    pub source: Option<EdgeId>,
    /// only track the nearest depth, emit nothing
    pub depth_only: bool,
}

/// Per-polygon scratch state.
#[derive(Clone, Debug, Default)]
pub(crate) struct ClipState {
    pub crossings: [Crossing; MAX_CLIP_PLANES],
    pub last_vert: Option<ProjectedVert>,
    pub nearest_inv_z: f32,
    pub emitted: bool,
    pub outcome: ClipOutcome,
    pub last_edge: Option<AeEdgeId>,
}

impl ClipState {
    #[inline]
    pub fn begin_edge(&mut self) {
        self.outcome = ClipOutcome::Unclipped;
        self.last_edge = None;
    }
}

impl ActiveEdgeContext {
    /// Clip `v0 → v1` against `chain` (indices into the frustum planes)
    /// and emit what survives.
    pub(crate) fn clip_edge(
        &mut self,
        st: &mut ClipState,
        ctx: &FrameContext,
        chain: &[usize],
        mut v0: Vec3,
        mut v1: Vec3,
        target: EdgeTarget,
    ) {
        let planes = ctx.frustum.planes();
        let mut start_moved = false;
        let mut end_moved = false;

        for &pi in chain {
            let fp = &planes[pi];
            let d0 = fp.plane.distance(v0);
            let d1 = fp.plane.distance(v1);
            match (d0 >= 0.0, d1 >= 0.0) {
                (true, true) => {}
                (false, false) => {
                    if st.outcome == ClipOutcome::Unclipped {
                        st.outcome = ClipOutcome::FullyClipped;
                    }
                    st.last_vert = None;
                    return;
                }
                (true, false) => {
                    st.outcome = ClipOutcome::Split;
                    let clip = v0 + (v1 - v0) * (d0 / (d0 - d1));
                    if fp.kind.tracks_crossings() {
                        st.crossings[pi].exit = Some(clip);
                    }
                    v1 = clip;
                    end_moved = true;
                }
                (false, true) => {
                    st.outcome = ClipOutcome::Split;
                    let clip = v0 + (v1 - v0) * (d0 / (d0 - d1));
                    if fp.kind.tracks_crossings() {
                        st.crossings[pi].enter = Some(clip);
                    }
                    v0 = clip;
                    start_moved = true;
                }
            }
        }

        self.emit_edge(st, ctx, v0, v1, start_moved, end_moved, target);
    }

    /// Emit closing edges for planes the polygon both left and re-entered.
    pub(crate) fn close_polygon(
        &mut self,
        st: &mut ClipState,
        ctx: &FrameContext,
        chain: &[usize],
        surface: AeSurfaceId,
    ) {
        for (k, &pi) in chain.iter().enumerate() {
            let kind = ctx.frustum.planes()[pi].kind;
            if !kind.tracks_crossings() {
                continue;
            }
            let Crossing {
                enter: Some(enter),
                exit: Some(exit),
            } = st.crossings[pi]
            else {
                continue;
            };
            st.last_vert = None;
            st.begin_edge();
            let target = EdgeTarget {
                surface,
                source: None,
                depth_only: kind == PlaneKind::Right,
            };
            self.clip_edge(st, ctx, &chain[k + 1..], exit, enter, target);
        }
    }

    /// World point → clamped screen position and `1/z`.
    #[inline]
    pub(crate) fn project(&self, ctx: &FrameContext, p: Vec3) -> ProjectedVert {
        let v = ctx.camera.to_view(p);
        let z = v.z.max(NEAR_CLIP);
        let inv_z = 1.0 / z;
        let vp = &ctx.viewport;
        let s = vp.scale * inv_z;
        let b = &self.bounds;
        let x = (vp.center_x + v.x * s).clamp(b.left as f32 - 0.5, b.right as f32 - 0.5);
        let y = (vp.center_y - v.y * s).clamp(b.top as f32 - 0.5, b.bottom as f32 - 0.5);
        ProjectedVert {
            x,
            y,
            inv_z,
            ceil_y: y.ceil() as i32,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_edge(
        &mut self,
        st: &mut ClipState,
        ctx: &FrameContext,
        v0: Vec3,
        v1: Vec3,
        start_moved: bool,
        end_moved: bool,
        target: EdgeTarget,
    ) {
        let p0 = match st.last_vert {
            Some(p) if !start_moved => p,
            _ => self.project(ctx, v0),
        };
        let p1 = self.project(ctx, v1);
        st.last_vert = if end_moved { None } else { Some(p1) };

        let near = p0.inv_z.max(p1.inv_z);
        st.nearest_inv_z = st.nearest_inv_z.max(near);
        if target.depth_only || p0.ceil_y == p1.ceil_y {
            // horizontal edges never change which surface is on top
            return;
        }
        st.emitted = true;

        let downwards = p0.ceil_y < p1.ceil_y;
        let (top, bottom) = if downwards { (p0, p1) } else { (p1, p0) };
        let slope = (bottom.x - top.x) / (bottom.y - top.y);
        let x = top.x + (top.ceil_y as f32 - top.y) * slope;
        let fx = ((x * FIXED_ONE as f32) as i32 + FIXED_CEIL_BIAS).clamp(
            self.bounds.left << FIXED_SHIFT,
            self.bounds.right << FIXED_SHIFT,
        );

        let id = self.edges.len() as AeEdgeId;
        self.edges.push(AeEdge {
            x: fx,
            x_step: (slope * FIXED_ONE as f32) as i32,
            prev: id,
            next: id,
            next_new: None,
            next_remove: None,
            top: top.ceil_y,
            bottom: bottom.ceil_y - 1,
            trailing: downwards.then_some(target.surface),
            leading: (!downwards).then_some(target.surface),
            source: target.source,
            near_inv_z: near,
            from: Vec2::new(p0.x, p0.y),
            to: Vec2::new(p1.x, p1.y),
        });
        self.link_new_edge(id);
        st.last_edge = Some(id);
        self.stats.edges += 1;
    }

    /// Bucket the edge on its first row (sorted by x, trailing edges after
    /// leading ones at the same x) and on its last row for removal.
    fn link_new_edge(&mut self, id: AeEdgeId) {
        let edge = self.edges[id as usize];
        let sort_x = edge.x + edge.trailing.is_some() as i32;

        let row = edge.top as usize;
        let mut prev: Option<AeEdgeId> = None;
        let mut cur = self.new_edges[row];
        while let Some(c) = cur {
            if self.edges[c as usize].x >= sort_x {
                break;
            }
            prev = Some(c);
            cur = self.edges[c as usize].next_new;
        }
        self.edges[id as usize].next_new = cur;
        match prev {
            Some(p) => self.edges[p as usize].next_new = Some(id),
            None => self.new_edges[row] = Some(id),
        }

        let last = edge.bottom as usize;
        self.edges[id as usize].next_remove = self.remove_edges[last];
        self.remove_edges[last] = Some(id);
    }
}
