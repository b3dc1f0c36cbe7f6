//! ----------------------------------------------------------------------------
//! **BSP front‑to‑back traversal**
//!
//! Responsible for
//! * marking the leaves (and their ancestors) the PVS lets through
//! * walking visible nodes front‑to‑back, culling boxes against the frustum
//! * handing every visible, front‑facing surface to the edge list together
//!   with a *bsp key* that grows with distance along the walk
//! * splitting submodel polygons through the world tree so each fragment
//!   sorts with the leaf it lands in
//!
//! It deliberately **does not** clip or project anything; that is the job of
//! the active-edge context it feeds.
//! ----------------------------------------------------------------------------

use glam::Vec3;
use smallvec::SmallVec;

use crate::engine::active_edge::ActiveEdgeContext;
use crate::engine::frustum::{BoxClip, ClipFlags};
use crate::engine::types::{FrameContext, ModelState};
use crate::world::{
    BspChild, Contents, LeafId, LeafVisibleSet, Level, NodeId, Plane, SubmodelId, SurfaceFlags,
    SurfaceId,
};

/// Surfaces this close to edge-on are skipped.
const BACKFACE_EPSILON: f32 = 0.01;

pub type Polygon = SmallVec<[Vec3; 16]>;

/*──────────────────────────── Vis stamps ─────────────────────────────*/

/// Per-pass bookkeeping the walk needs, kept out of the immutable level.
///
/// Every table holds the id of the last pass that touched the entry, so
/// nothing has to be cleared between passes.
#[derive(Debug, Default)]
pub struct VisStamps {
    leaves: Vec<u32>,
    nodes: Vec<u32>,
    surfaces: Vec<u32>,
    leaf_keys: Vec<u32>,
    leaf_key_pass: Vec<u32>,
}

impl VisStamps {
    pub fn new(level: &Level) -> Self {
        let mut s = Self::default();
        s.resize_for(level);
        s
    }

    pub fn resize_for(&mut self, level: &Level) {
        self.leaves.resize(level.leaves.len(), 0);
        self.nodes.resize(level.nodes.len(), 0);
        self.surfaces.resize(level.surfaces.len(), 0);
        self.leaf_keys.resize(level.leaves.len(), 0);
        self.leaf_key_pass.resize(level.leaves.len(), 0);
    }

    /// Stamp every leaf in `pvs` and all of its ancestors with `stamp`.
    /// Returns the number of leaves marked.
    pub fn mark_visible_leaves(&mut self, level: &Level, pvs: &LeafVisibleSet, stamp: u32) -> usize {
        pvs.iter()
            .filter(|&leaf| self.mark_leaf(level, leaf, stamp))
            .count()
    }

    /// Stamp one leaf and its ancestors; `false` if it already was.
    pub fn mark_leaf(&mut self, level: &Level, leaf: LeafId, stamp: u32) -> bool {
        match self.leaves.get_mut(leaf as usize) {
            Some(slot) if *slot != stamp => *slot = stamp,
            _ => return false,
        }
        for node in level.ancestors(level.leaves[leaf as usize].parent) {
            if self.nodes[node as usize] == stamp {
                break;
            }
            self.nodes[node as usize] = stamp;
        }
        true
    }

    #[inline]
    pub fn leaf_visible(&self, leaf: LeafId, stamp: u32) -> bool {
        self.leaves.get(leaf as usize) == Some(&stamp)
    }

    #[inline]
    pub fn node_visible(&self, node: NodeId, stamp: u32) -> bool {
        self.nodes.get(node as usize) == Some(&stamp)
    }

    #[inline]
    pub fn surface_visible(&self, surface: SurfaceId, stamp: u32) -> bool {
        self.surfaces.get(surface as usize) == Some(&stamp)
    }

    /// Bsp key a leaf received during pass `stamp`, if the walk reached it.
    #[inline]
    pub fn leaf_key(&self, leaf: LeafId, stamp: u32) -> Option<u32> {
        (self.leaf_key_pass.get(leaf as usize) == Some(&stamp))
            .then(|| self.leaf_keys[leaf as usize])
    }
}

/*──────────────────────────── Walk ───────────────────────────────────*/

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WalkStats {
    pub nodes: usize,
    pub leaves: usize,
    pub culled_boxes: usize,
    pub surfaces_submitted: usize,
    pub surfaces_emitted: usize,
    pub fragments: usize,
}

/// One front-to-back walk of the world for one pass.
pub struct WorldPass<'a> {
    level: &'a Level,
    ctx: &'a mut FrameContext,
    stamps: &'a mut VisStamps,
    ae: &'a mut ActiveEdgeContext,
    key: u32,
    pub stats: WalkStats,
}

impl<'a> WorldPass<'a> {
    pub fn new(
        level: &'a Level,
        ctx: &'a mut FrameContext,
        stamps: &'a mut VisStamps,
        ae: &'a mut ActiveEdgeContext,
    ) -> Self {
        Self {
            level,
            ctx,
            stamps,
            ae,
            key: 0,
            stats: WalkStats::default(),
        }
    }

    /// Next unused bsp key.
    #[inline]
    pub fn current_key(&self) -> u32 {
        self.key
    }

    pub fn render_world(&mut self) {
        self.ctx.model = ModelState::default();
        let flags = self.ctx.frustum.all_flags();
        self.walk(self.level.root, flags);
    }

    fn cull(&mut self, mins: Vec3, maxs: Vec3, clip: ClipFlags) -> Option<ClipFlags> {
        if clip.is_empty() {
            return Some(clip);
        }
        match self.ctx.frustum.classify_box(mins, maxs, clip) {
            BoxClip::TotallyOutside => {
                self.stats.culled_boxes += 1;
                None
            }
            BoxClip::TotallyInside => Some(ClipFlags::empty()),
            BoxClip::Partial(flags) => Some(flags),
        }
    }

    fn walk(&mut self, child: BspChild, clip: ClipFlags) {
        let level = self.level;
        let pass = self.ctx.pass;
        match child {
            BspChild::Leaf(id) => {
                let leaf = &level.leaves[id as usize];
                if leaf.contents == Contents::Solid || !self.stamps.leaf_visible(id, pass) {
                    return;
                }
                if self.cull(leaf.mins, leaf.maxs, clip).is_none() {
                    return;
                }
                self.stats.leaves += 1;
                for &s in level.leaf_surfaces(leaf) {
                    self.stamps.surfaces[s as usize] = pass;
                }
                self.stamps.leaf_keys[id as usize] = self.key;
                self.stamps.leaf_key_pass[id as usize] = pass;
                self.key += 1;
            }
            BspChild::Node(id) => {
                if !self.stamps.node_visible(id, pass) {
                    return;
                }
                let node = &level.nodes[id as usize];
                let Some(clip) = self.cull(node.mins, node.maxs, clip) else {
                    return;
                };
                self.stats.nodes += 1;

                let dist = level.node_plane(node).distance(self.ctx.camera.pos());
                let side = if dist >= 0.0 { 0 } else { 1 };

                self.walk(node.children[side], clip);

                let faces = level.node_surfaces(node);
                if !faces.is_empty() {
                    if dist.abs() > BACKFACE_EPSILON {
                        self.draw_node_surfaces(faces, side == 1, clip);
                    }
                    // every surface of one node shares a key
                    self.key += 1;
                }

                self.walk(node.children[side ^ 1], clip);
            }
        }
    }

    fn draw_node_surfaces(&mut self, faces: &[SurfaceId], eye_behind: bool, clip: ClipFlags) {
        let pass = self.ctx.pass;
        self.ctx.model.key = self.key;
        for &s in faces {
            if !self.stamps.surface_visible(s, pass) {
                continue;
            }
            let faces_back = self.level.surfaces[s as usize]
                .flags
                .contains(SurfaceFlags::PLANE_BACK);
            if faces_back != eye_behind {
                continue;
            }
            self.stats.surfaces_submitted += 1;
            if self.ae.process_surface(self.ctx, self.level, s, clip).is_some() {
                self.stats.surfaces_emitted += 1;
            }
        }
    }

    /*──────────────────────── submodels ──────────────────────────────*/

    /// Feed every submodel in view, split into per-leaf fragments.
    pub fn draw_submodels(&mut self) {
        for id in 0..self.level.submodels.len() as SubmodelId {
            self.draw_submodel(id);
        }
        self.ctx.model = ModelState::default();
    }

    fn draw_submodel(&mut self, id: SubmodelId) {
        let level = self.level;
        let sub = &level.submodels[id as usize];
        let origin = sub.origin;
        let flags = self.ctx.frustum.all_flags();
        let Some(clip) = self.cull(sub.mins + origin, sub.maxs + origin, flags) else {
            return;
        };

        self.ctx.model = ModelState {
            key: 0,
            in_submodel: true,
            origin,
        };
        let eye = self.ctx.camera.pos();
        let first = sub.first_surface;
        for s in first..first + sub.num_surfaces {
            let plane = level.surface_plane(s).translated(origin);
            if plane.distance(eye) <= BACKFACE_EPSILON {
                continue;
            }
            let points: Polygon = level.surface_points(s).map(|p| p + origin).collect();
            self.clip_fragment(level.root, points, s, clip);
        }
    }

    fn clip_fragment(&mut self, child: BspChild, points: Polygon, surface: SurfaceId, clip: ClipFlags) {
        let level = self.level;
        match child {
            BspChild::Leaf(id) => {
                if level.leaves[id as usize].contents == Contents::Solid {
                    return;
                }
                let Some(key) = self.stamps.leaf_key(id, self.ctx.pass) else {
                    return;
                };
                self.ctx.model.key = key;
                self.stats.fragments += 1;
                self.ae
                    .process_fragment(self.ctx, level, surface, &points, clip);
            }
            BspChild::Node(id) => {
                let node = &level.nodes[id as usize];
                let (front, back) = split_polygon(&points, level.node_plane(node));
                if front.len() >= 3 {
                    self.clip_fragment(node.children[0], front, surface, clip);
                }
                if back.len() >= 3 {
                    self.clip_fragment(node.children[1], back, surface, clip);
                }
            }
        }
    }
}

/// Split a convex polygon by `plane`. Points on the plane go to both sides.
pub fn split_polygon(points: &[Vec3], plane: &Plane) -> (Polygon, Polygon) {
    let mut front = Polygon::new();
    let mut back = Polygon::new();
    let n = points.len();
    for i in 0..n {
        let a = points[i];
        let b = points[(i + 1) % n];
        let da = plane.distance(a);
        let db = plane.distance(b);
        if da >= 0.0 {
            front.push(a);
        }
        if da <= 0.0 {
            back.push(a);
        }
        if (da > 0.0 && db < 0.0) || (da < 0.0 && db > 0.0) {
            let mid = a + (b - a) * (da / (da - db));
            front.push(mid);
            back.push(mid);
        }
    }
    (front, back)
}

/*====================================================================*/
/*                                Tests                                */
/*====================================================================*/
#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::RenderSettings;
    use crate::engine::frustum::Frustum;
    use crate::engine::types::Viewport;
    use crate::world::{Camera, LevelBuilder, SOLID_LEAF, TexInfo};
    use glam::vec3;
    use std::f32::consts::FRAC_PI_2;

    fn quad(x0: f32, x1: f32, y0: f32, y1: f32, z: f32) -> [Vec3; 4] {
        [
            vec3(x0, y1, z),
            vec3(x1, y1, z),
            vec3(x1, y0, z),
            vec3(x0, y0, z),
        ]
    }

    /// Camera leaf (z < 10) | wall at z = 10 | far leaf (10 < z < 20) | wall at 20.
    fn corridor() -> Level {
        let mut b = LevelBuilder::new("corridor");
        let tex = b.add_texinfo(TexInfo::new(Vec3::X, Vec3::NEG_Y, 0));
        let window = b.add_face(&quad(-2.0, 2.0, -2.0, 2.0, 10.0), tex).unwrap();
        let far = b.add_face(&quad(-20.0, 20.0, -20.0, 20.0, 20.0), tex).unwrap();
        let near_leaf = b.add_leaf(Contents::Empty, &[window]);
        let far_leaf = b.add_leaf(Contents::Empty, &[far]);
        b.set_leaf_bounds(near_leaf, vec3(-20.0, -20.0, 0.0), vec3(20.0, 20.0, 10.0));
        b.set_leaf_bounds(far_leaf, vec3(-20.0, -20.0, 10.0), vec3(20.0, 20.0, 20.0));
        let back = b
            .add_node(
                Plane::new(Vec3::NEG_Z, -20.0),
                BspChild::Leaf(far_leaf),
                BspChild::Leaf(SOLID_LEAF),
                &[far],
            )
            .unwrap();
        let root = b
            .add_node(
                Plane::new(Vec3::NEG_Z, -10.0),
                BspChild::Leaf(near_leaf),
                BspChild::Node(back),
                &[window],
            )
            .unwrap();
        b.set_root(BspChild::Node(root));
        b.build().unwrap()
    }

    fn ctx_at(pos: Vec3, pass: u32) -> FrameContext {
        let vp = Viewport::new(64, 48, FRAC_PI_2);
        let cam = Camera::new(pos, 0.0, 0.0, FRAC_PI_2);
        let frustum = Frustum::new(&vp, &cam);
        FrameContext::new(cam, vp, frustum, RenderSettings::default(), 1, pass, 0)
    }

    fn all_visible(level: &Level) -> LeafVisibleSet {
        let mut pvs = LeafVisibleSet::new(level.vis_leaf_count());
        pvs.fill();
        pvs
    }

    #[test]
    fn marking_a_leaf_marks_its_ancestors() {
        let level = corridor();
        let mut stamps = VisStamps::new(&level);
        let mut pvs = LeafVisibleSet::new(level.vis_leaf_count());
        pvs.insert(2);
        assert_eq!(stamps.mark_visible_leaves(&level, &pvs, 7), 1);
        assert!(stamps.leaf_visible(2, 7));
        assert!(!stamps.leaf_visible(1, 7));
        assert!(stamps.node_visible(0, 7));
        assert!(stamps.node_visible(1, 7));
    }

    #[test]
    fn keys_grow_front_to_back() {
        let level = corridor();
        let mut stamps = VisStamps::new(&level);
        stamps.mark_visible_leaves(&level, &all_visible(&level), 1);
        let mut ctx = ctx_at(Vec3::ZERO, 1);
        let mut ae = ActiveEdgeContext::new();
        ae.begin_render(64, 48, level.edges.len());
        let mut pass = WorldPass::new(&level, &mut ctx, &mut stamps, &mut ae);
        pass.render_world();
        let stats = pass.stats;
        assert_eq!(stats.surfaces_emitted, 2);

        assert_eq!(stamps.leaf_key(1, 1), Some(0));
        assert_eq!(stamps.leaf_key(2, 1), Some(2));
        let keys: Vec<u32> = ae.surfaces()[1..].iter().map(|s| s.key).collect();
        assert_eq!(keys, vec![1, 3]);
    }

    #[test]
    fn pvs_hides_unmarked_leaves() {
        let level = corridor();
        let mut stamps = VisStamps::new(&level);
        let mut pvs = LeafVisibleSet::new(level.vis_leaf_count());
        pvs.insert(1);
        stamps.mark_visible_leaves(&level, &pvs, 1);
        let mut ctx = ctx_at(Vec3::ZERO, 1);
        let mut ae = ActiveEdgeContext::new();
        ae.begin_render(64, 48, level.edges.len());
        let mut pass = WorldPass::new(&level, &mut ctx, &mut stamps, &mut ae);
        pass.render_world();
        assert_eq!(pass.stats.surfaces_emitted, 1);
        assert_eq!(stamps.leaf_key(2, 1), None);
    }

    #[test]
    fn back_faces_are_skipped() {
        let level = corridor();
        let mut stamps = VisStamps::new(&level);
        stamps.mark_visible_leaves(&level, &all_visible(&level), 1);
        // between the walls, looking back at the window from behind
        let mut ctx = ctx_at(vec3(0.0, 0.0, 15.0), 1);
        let mut ae = ActiveEdgeContext::new();
        ae.begin_render(64, 48, level.edges.len());
        let mut pass = WorldPass::new(&level, &mut ctx, &mut stamps, &mut ae);
        pass.render_world();
        // the far wall is visible and facing, the window is seen from behind
        assert_eq!(pass.stats.surfaces_submitted, 1);
    }

    #[test]
    fn split_keeps_on_plane_points_on_both_sides() {
        let sq = quad(-1.0, 1.0, -1.0, 1.0, 0.0);
        let (front, back) = split_polygon(&sq, &Plane::new(Vec3::X, 0.0));
        assert_eq!(front.len(), 4);
        assert_eq!(back.len(), 4);
        assert!(front.iter().all(|p| p.x >= 0.0));
        assert!(back.iter().all(|p| p.x <= 0.0));

        let (front, back) = split_polygon(&sq, &Plane::new(Vec3::X, 1.0));
        assert_eq!(front.len(), 2);
        assert_eq!(back.len(), 4);
    }

    #[test]
    fn submodel_fragment_takes_leaf_key() {
        let mut b = LevelBuilder::new("door");
        let tex = b.add_texinfo(TexInfo::new(Vec3::X, Vec3::NEG_Y, 0));
        let wall = b.add_face(&quad(-20.0, 20.0, -20.0, 20.0, 20.0), tex).unwrap();
        let leaf = b.add_leaf(Contents::Empty, &[wall]);
        b.set_leaf_bounds(leaf, vec3(-20.0, -20.0, 0.0), vec3(20.0, 20.0, 20.0));
        let node = b
            .add_node(
                Plane::new(Vec3::NEG_Z, -20.0),
                BspChild::Leaf(leaf),
                BspChild::Leaf(SOLID_LEAF),
                &[wall],
            )
            .unwrap();
        b.set_root(BspChild::Node(node));
        // door authored around the origin, placed at z = 12
        let door = b.add_face(&quad(-3.0, 3.0, -3.0, 3.0, 0.0), tex).unwrap();
        b.add_submodel(&[door], vec3(0.0, 0.0, 12.0)).unwrap();
        let level = b.build().unwrap();

        let mut stamps = VisStamps::new(&level);
        stamps.mark_visible_leaves(&level, &all_visible(&level), 1);
        let mut ctx = ctx_at(Vec3::ZERO, 1);
        let mut ae = ActiveEdgeContext::new();
        ae.begin_render(64, 48, level.edges.len());
        let mut pass = WorldPass::new(&level, &mut ctx, &mut stamps, &mut ae);
        pass.render_world();
        pass.draw_submodels();
        assert_eq!(pass.stats.fragments, 1);

        let door_surf = ae.surfaces().iter().find(|s| s.in_submodel).unwrap();
        assert_eq!(door_surf.key, 0);
        assert_eq!(door_surf.origin, vec3(0.0, 0.0, 12.0));
        assert!((door_surf.nearest_z() - 12.0).abs() < 1e-3);
    }
}
