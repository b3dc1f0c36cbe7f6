//! The scanline sweep.
//!
//! Row by row: merge the edges starting on the row into the sorted active
//! list, walk it left to right toggling surfaces in and out of the sort
//! stack, drop edges that end on the row, then step the rest to the next
//! row and restore x order.

use crate::engine::active_edge::{
    ActiveEdgeContext, AeEdgeId, AeSpan, AeSpanId, AeSurfaceId, BACKGROUND, EDGE_HEAD, EDGE_TAIL,
    Phase,
};
use crate::engine::types::{FIXED_CEIL_BIAS, FIXED_ONE, FIXED_SHIFT};

/// Relative `1/z` margin inside which two surfaces count as coplanar.
const DEPTH_TOLERANCE: f32 = 0.01;

impl ActiveEdgeContext {
    /// Turn every emitted edge into spans.
    pub fn scan_edges(&mut self) {
        debug_assert_eq!(self.phase, Phase::Collecting);
        self.edges[EDGE_HEAD as usize].next = EDGE_TAIL;
        self.edges[EDGE_TAIL as usize].prev = EDGE_HEAD;

        for y in self.bounds.top..self.bounds.bottom {
            self.scan_row(y);
        }
        self.phase = Phase::Scanned;
    }

    fn scan_row(&mut self, y: i32) {
        let bg = &mut self.surfaces[BACKGROUND as usize];
        bg.next = BACKGROUND;
        bg.prev = BACKGROUND;
        bg.last_x = self.bounds.left;
        bg.span_state = 1;

        let row = y as usize;
        if let Some(first) = self.new_edges[row] {
            self.insert_new_edges(first);
        }

        self.generate_spans(y);

        if let Some(first) = self.remove_edges[row] {
            self.remove_edge_list(first);
        }

        if self.edges[EDGE_HEAD as usize].next != EDGE_TAIL {
            self.step_active_x();
        }
    }

    /*──────────────────────── active list upkeep ───────────────────────*/

    /// Merge an x-sorted bucket into the x-sorted active list.
    fn insert_new_edges(&mut self, first: AeEdgeId) {
        let mut cursor = self.edges[EDGE_HEAD as usize].next;
        let mut add = Some(first);
        while let Some(a) = add {
            add = self.edges[a as usize].next_new;
            let x = self.edges[a as usize].x;
            while cursor != EDGE_TAIL && self.edges[cursor as usize].x < x {
                cursor = self.edges[cursor as usize].next;
            }
            self.link_before(a, cursor);
        }
    }

    fn remove_edge_list(&mut self, first: AeEdgeId) {
        let mut cur = Some(first);
        while let Some(e) = cur {
            cur = self.edges[e as usize].next_remove;
            self.unlink(e);
        }
    }

    /// Advance every active edge one row and bubble out-of-order ones back.
    fn step_active_x(&mut self) {
        let mut e = self.edges[EDGE_HEAD as usize].next;
        while e != EDGE_TAIL {
            let edge = &mut self.edges[e as usize];
            edge.x += edge.x_step;
            let next = edge.next;
            let prev = edge.prev;
            let x = edge.x;

            if prev != EDGE_HEAD && x < self.edges[prev as usize].x {
                self.unlink(e);
                let mut after = self.edges[prev as usize].prev;
                while after != EDGE_HEAD && self.edges[after as usize].x > x {
                    after = self.edges[after as usize].prev;
                }
                let before = self.edges[after as usize].next;
                self.link_before(e, before);
            }
            e = next;
        }
    }

    #[inline]
    fn link_before(&mut self, e: AeEdgeId, before: AeEdgeId) {
        let prev = self.edges[before as usize].prev;
        self.edges[e as usize].prev = prev;
        self.edges[e as usize].next = before;
        self.edges[prev as usize].next = e;
        self.edges[before as usize].prev = e;
    }

    #[inline]
    fn unlink(&mut self, e: AeEdgeId) {
        let (prev, next) = {
            let edge = &self.edges[e as usize];
            (edge.prev, edge.next)
        };
        self.edges[prev as usize].next = next;
        self.edges[next as usize].prev = prev;
    }

    /*──────────────────────────── span output ──────────────────────────*/

    fn generate_spans(&mut self, y: i32) {
        let mut e = self.edges[EDGE_HEAD as usize].next;
        while e != EDGE_TAIL {
            let edge = self.edges[e as usize];
            if let Some(s) = edge.trailing {
                self.trailing_edge(s, edge.x, y);
            }
            if let Some(s) = edge.leading {
                self.leading_edge(s, edge.x, y);
            }
            e = edge.next;
        }
        self.cleanup_row(y);
    }

    /// A surface starts here; it goes on top if it is in front.
    fn leading_edge(&mut self, s: AeSurfaceId, x: i32, y: i32) {
        let surf = &mut self.surfaces[s as usize];
        surf.span_state += 1;
        if surf.span_state != 1 {
            return;
        }

        let ix = x >> FIXED_SHIFT;
        let top = self.surfaces[BACKGROUND as usize].next;
        if self.in_front(s, top, x, y) {
            let last = self.surfaces[top as usize].last_x;
            if ix > last {
                self.push_span(top, last, ix - last, y);
            }
            self.surfaces[s as usize].last_x = ix;
            self.insert_surface_before(s, top);
            return;
        }

        let mut below = self.surfaces[top as usize].next;
        while !self.in_front(s, below, x, y) {
            below = self.surfaces[below as usize].next;
        }
        self.insert_surface_before(s, below);
    }

    /// A surface ends here; if it was on top, the one below takes over.
    fn trailing_edge(&mut self, s: AeSurfaceId, x: i32, y: i32) {
        let surf = &mut self.surfaces[s as usize];
        surf.span_state -= 1;
        if surf.span_state < 0 {
            // crossed a right side first: malformed winding, ignore
            surf.span_state = 0;
            return;
        }
        if surf.span_state != 0 {
            return;
        }

        if self.surfaces[BACKGROUND as usize].next == s {
            let ix = x >> FIXED_SHIFT;
            let last = self.surfaces[s as usize].last_x;
            if ix > last {
                self.push_span(s, last, ix - last, y);
            }
            let below = self.surfaces[s as usize].next;
            self.surfaces[below as usize].last_x = ix;
        }

        let (prev, next) = {
            let surf = &self.surfaces[s as usize];
            (surf.prev, surf.next)
        };
        self.surfaces[prev as usize].next = next;
        self.surfaces[next as usize].prev = prev;
    }

    /// Close the top surface's span at the right edge and reset the stack.
    fn cleanup_row(&mut self, y: i32) {
        let top = self.surfaces[BACKGROUND as usize].next;
        let ix = self.edges[EDGE_TAIL as usize].x >> FIXED_SHIFT;
        let last = self.surfaces[top as usize].last_x;
        if ix > last {
            self.push_span(top, last, ix - last, y);
        }

        let mut s = top;
        while s != BACKGROUND {
            let surf = &mut self.surfaces[s as usize];
            surf.span_state = 0;
            s = surf.next;
        }
    }

    fn insert_surface_before(&mut self, s: AeSurfaceId, before: AeSurfaceId) {
        let prev = self.surfaces[before as usize].prev;
        self.surfaces[s as usize].next = before;
        self.surfaces[s as usize].prev = prev;
        self.surfaces[prev as usize].next = s;
        self.surfaces[before as usize].prev = s;
    }

    fn push_span(&mut self, s: AeSurfaceId, x: i32, count: i32, y: i32) {
        let id = self.spans.len() as AeSpanId;
        let surf = &mut self.surfaces[s as usize];
        self.spans.push(AeSpan {
            x,
            y,
            count,
            next: surf.spans,
        });
        surf.spans = Some(id);
        self.stats.spans += 1;
    }

    /*──────────────────────────── ordering ─────────────────────────────*/

    /// Does `new` belong in front of `existing` at this edge?
    ///
    /// Smaller bsp keys were reached earlier in the front-to-back walk and
    /// win outright. Within one key world geometry never loses to a
    /// submodel fragment, and otherwise `1/z` at the edge decides.
    fn in_front(&self, new: AeSurfaceId, existing: AeSurfaceId, x: i32, y: i32) -> bool {
        if existing == BACKGROUND {
            return true;
        }
        let a = &self.surfaces[new as usize];
        let b = &self.surfaces[existing as usize];
        if a.key != b.key {
            return a.key < b.key;
        }
        if a.in_submodel != b.in_submodel {
            return !a.in_submodel;
        }

        let fx = (x - FIXED_CEIL_BIAS) as f32 / FIXED_ONE as f32;
        let fy = y as f32;
        let new_zi = a.zi.at(fx, fy);
        let old_zi = b.zi.at(fx, fy);
        if new_zi * (1.0 - DEPTH_TOLERANCE) >= old_zi {
            return true;
        }
        if new_zi * (1.0 + DEPTH_TOLERANCE) >= old_zi {
            // coplanar at this point: the one getting nearer to the right wins
            return a.zi.step_x > b.zi.step_x;
        }
        false
    }
}

/*====================================================================*/
/*                                Tests                                */
/*====================================================================*/
#[cfg(test)]
mod tests {
    use crate::engine::active_edge::{ActiveEdgeContext, AeSpan, BACKGROUND, FIRST_EDGE};
    use crate::engine::config::RenderSettings;
    use crate::engine::frustum::Frustum;
    use crate::engine::types::{FrameContext, ModelState, Viewport};
    use crate::world::{BspChild, Camera, Contents, Level, LevelBuilder, Plane, SOLID_LEAF, TexInfo};
    use glam::{Vec3, vec3};
    use std::f32::consts::FRAC_PI_2;

    const W: usize = 64;
    const H: usize = 48;

    fn ctx() -> FrameContext {
        let vp = Viewport::new(W, H, FRAC_PI_2);
        let cam = Camera::new(Vec3::ZERO, 0.0, 0.0, FRAC_PI_2);
        let frustum = Frustum::new(&vp, &cam);
        FrameContext::new(cam, vp, frustum, RenderSettings::default(), 1, 1, 0)
    }

    /// One face per entry: (x0, x1, y0, y1, z), facing the origin.
    fn level(faces: &[(f32, f32, f32, f32, f32)]) -> Level {
        let mut b = LevelBuilder::new("scan");
        let tex = b.add_texinfo(TexInfo::new(Vec3::X, Vec3::NEG_Y, 0));
        let mut leaves = Vec::new();
        for &(x0, x1, y0, y1, z) in faces {
            let f = b
                .add_face(
                    &[vec3(x0, y1, z), vec3(x1, y1, z), vec3(x1, y0, z), vec3(x0, y0, z)],
                    tex,
                )
                .unwrap();
            leaves.push(b.add_leaf(Contents::Empty, &[f]));
        }
        b.set_root(BspChild::Leaf(leaves[0]));
        b.build().unwrap()
    }

    fn row_spans(ae: &ActiveEdgeContext, y: i32) -> Vec<(u32, AeSpan)> {
        let mut out: Vec<(u32, AeSpan)> = (0..ae.surfaces().len() as u32)
            .flat_map(|s| ae.spans(s).filter(|sp| sp.y == y).map(move |sp| (s, sp)))
            .collect();
        out.sort_by_key(|(_, sp)| sp.x);
        out
    }

    fn assert_partition(ae: &ActiveEdgeContext) {
        for y in 0..H as i32 {
            let spans = row_spans(ae, y);
            let mut x = 0;
            for (_, sp) in &spans {
                assert_eq!(sp.x, x, "gap or overlap on row {y}");
                assert!(sp.count > 0);
                x += sp.count;
            }
            assert_eq!(x, W as i32, "row {y} not fully covered");
        }
    }

    #[test]
    fn empty_screen_is_all_background() {
        let lvl = level(&[(-5.0, 5.0, -5.0, 5.0, 10.0)]);
        let mut ae = ActiveEdgeContext::new();
        ae.begin_render(W, H, lvl.edges.len());
        ae.scan_edges();
        assert_partition(&ae);
        assert_eq!(ae.spans(BACKGROUND).count(), H);
    }

    #[test]
    fn single_quad_spans_match_projection() {
        let lvl = level(&[(-5.0, 5.0, -5.0, 5.0, 10.0)]);
        let c = ctx();
        let mut ae = ActiveEdgeContext::new();
        ae.begin_render(W, H, lvl.edges.len());
        let s = ae.process_surface(&c, &lvl, 0, c.frustum.all_flags()).unwrap();
        ae.scan_edges();
        assert_partition(&ae);

        // projects to u in [15.5, 47.5], v in [7.5, 39.5]
        let spans: Vec<AeSpan> = ae.spans(s).collect();
        assert_eq!(spans.len(), 32);
        for sp in &spans {
            assert!((8..40).contains(&sp.y));
            assert_eq!((sp.x, sp.count), (16, 32));
        }
    }

    #[test]
    fn nearer_key_occludes() {
        // the far quad fills the screen around the near one
        let lvl = level(&[(-2.5, 2.5, -2.5, 2.5, 10.0), (-20.0, 20.0, -20.0, 20.0, 20.0)]);
        let mut c = ctx();
        let mut ae = ActiveEdgeContext::new();
        ae.begin_render(W, H, lvl.edges.len());
        c.model = ModelState { key: 0, ..ModelState::default() };
        let near = ae.process_surface(&c, &lvl, 0, c.frustum.all_flags()).unwrap();
        c.model.key = 1;
        let far = ae.process_surface(&c, &lvl, 1, c.frustum.all_flags()).unwrap();
        ae.scan_edges();
        assert_partition(&ae);

        let near_px: i32 = ae.spans(near).map(|s| s.count).sum();
        assert_eq!(near_px, 16 * 16);
        let far_px: i32 = ae.spans(far).map(|s| s.count).sum();
        assert_eq!(far_px, W as i32 * H as i32 - 16 * 16);
        assert_eq!(ae.spans(BACKGROUND).count(), 0);
    }

    #[test]
    fn world_beats_submodel_at_equal_key() {
        // submodel behind the wall, then one in front of it, same key
        for (sub_z, world_first) in [(20.0, true), (20.0, false), (5.0, true), (5.0, false)] {
            let lvl = level(&[(-20.0, 20.0, -20.0, 20.0, 10.0), (-2.0, 2.0, -2.0, 2.0, sub_z)]);
            let mut c = ctx();
            let mut ae = ActiveEdgeContext::new();
            ae.begin_render(W, H, lvl.edges.len());
            let add = |ae: &mut ActiveEdgeContext, c: &mut FrameContext, s: u32, sub: bool| {
                c.model.in_submodel = sub;
                ae.process_surface(c, &lvl, s, c.frustum.all_flags()).unwrap()
            };
            let (world, sub) = if world_first {
                let w = add(&mut ae, &mut c, 0, false);
                (w, add(&mut ae, &mut c, 1, true))
            } else {
                let s = add(&mut ae, &mut c, 1, true);
                (add(&mut ae, &mut c, 0, false), s)
            };
            ae.scan_edges();
            assert_partition(&ae);

            let sub_px: i32 = ae.spans(sub).map(|s| s.count).sum();
            let world_px: i32 = ae.spans(world).map(|s| s.count).sum();
            assert_eq!(sub_px, 0, "submodel at z={sub_z} drew pixels");
            assert_eq!(world_px, W as i32 * H as i32);
        }
    }

    #[test]
    fn self_crossing_edges_are_ignored() {
        let lvl = level(&[(-5.0, 5.0, -5.0, 5.0, 10.0)]);
        let c = ctx();
        // swapped: the right side is met before the left one
        // otherwise: both sides open the surface
        for swapped in [true, false] {
            let mut ae = ActiveEdgeContext::new();
            ae.begin_render(W, H, lvl.edges.len());
            let s = ae.process_surface(&c, &lvl, 0, c.frustum.all_flags()).unwrap();
            for edge in &mut ae.edges[FIRST_EDGE..] {
                if swapped {
                    std::mem::swap(&mut edge.leading, &mut edge.trailing);
                } else {
                    edge.leading = Some(s);
                    edge.trailing = None;
                }
            }
            ae.scan_edges();
            assert_partition(&ae);
            assert!(ae.has_spans(s));
            assert!(ae.surfaces().iter().all(|surf| surf.span_state <= 1));
        }
    }

    #[test]
    fn equal_keys_fall_back_to_depth() {
        // both submodels, the far one processed first
        let lvl = level(&[(-20.0, 20.0, -20.0, 20.0, 20.0), (-2.5, 2.5, -2.5, 2.5, 10.0)]);
        let mut c = ctx();
        c.model.in_submodel = true;
        let mut ae = ActiveEdgeContext::new();
        ae.begin_render(W, H, lvl.edges.len());
        let far = ae.process_surface(&c, &lvl, 0, c.frustum.all_flags()).unwrap();
        let near = ae.process_surface(&c, &lvl, 1, c.frustum.all_flags()).unwrap();
        ae.scan_edges();
        assert_partition(&ae);
        let near_px: i32 = ae.spans(near).map(|s| s.count).sum();
        assert_eq!(near_px, 16 * 16);
        assert!(ae.has_spans(far));
    }

    #[test]
    fn sloped_edges_keep_partition() {
        let mut b = LevelBuilder::new("tri");
        let tex = b.add_texinfo(TexInfo::new(Vec3::X, Vec3::NEG_Y, 0));
        let tri = b
            .add_face(
                &[vec3(0.0, 7.0, 10.0), vec3(6.0, -6.0, 10.0), vec3(-9.0, -3.0, 10.0)],
                tex,
            )
            .unwrap();
        let other = b
            .add_face(
                &[vec3(-3.0, 9.0, 14.0), vec3(12.0, 2.0, 14.0), vec3(-14.0, -12.0, 14.0)],
                tex,
            )
            .unwrap();
        let leaf = b.add_leaf(Contents::Empty, &[tri, other]);
        let node = b
            .add_node(
                Plane::new(Vec3::NEG_Z, -10.0),
                BspChild::Leaf(leaf),
                BspChild::Leaf(SOLID_LEAF),
                &[tri],
            )
            .unwrap();
        b.set_root(BspChild::Node(node));
        let lvl = b.build().unwrap();

        let mut c = ctx();
        let mut ae = ActiveEdgeContext::new();
        ae.begin_render(W, H, lvl.edges.len());
        ae.process_surface(&c, &lvl, tri, c.frustum.all_flags()).unwrap();
        c.model.key = 1;
        ae.process_surface(&c, &lvl, other, c.frustum.all_flags()).unwrap();
        ae.scan_edges();
        assert_partition(&ae);
    }
}
