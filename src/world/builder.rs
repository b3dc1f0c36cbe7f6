//! Programmatic level construction.
//!
//! Faces are given as point loops, clockwise when seen from the side they
//! face. Vertices, edges and planes are shared automatically, so two faces
//! meeting along a segment reference the same [`Edge`] in opposite
//! directions.

use std::collections::HashMap;

use glam::Vec3;

use crate::world::geometry::{
    BspChild, Contents, Edge, EdgeId, Leaf, LeafId, Level, Node, NodeId, Plane, PlaneId, Portal,
    PortalId, PortalTransform, SOLID_LEAF, Submodel, SubmodelId, Surface, SurfaceEdge,
    SurfaceFlags, SurfaceId, TexInfo, TexInfoId, Vertex, VertexId,
};
use crate::world::pvs::{compress_row, row_bytes};

const PLANE_NORMAL_EPSILON: f32 = 1e-4;
const PLANE_DIST_EPSILON: f32 = 1e-2;
const DEFAULT_LIGHT: u8 = 200;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum LevelError {
    #[error("face needs at least 3 points, got {0}")]
    TooFewPoints(usize),

    #[error("face points are collinear")]
    Degenerate,

    #[error("face {0} does not lie on the plane of node {1}")]
    FaceOffNodePlane(SurfaceId, NodeId),

    #[error("lightmap for face {surface} has {got} samples, expected {expected}")]
    LightmapSize {
        surface: SurfaceId,
        got: usize,
        expected: usize,
    },

    #[error("{kind} index {index} out of range")]
    BadIndex { kind: &'static str, index: u32 },

    #[error("level has no root")]
    NoRoot,
}

/// Accumulates geometry and produces an immutable [`Level`].
pub struct LevelBuilder {
    name: String,
    planes: Vec<Plane>,
    vertices: Vec<Vertex>,
    vertex_lookup: HashMap<[u32; 3], VertexId>,
    edges: Vec<Edge>,
    edge_lookup: HashMap<(VertexId, VertexId), EdgeId>,
    surf_edges: Vec<SurfaceEdge>,
    texinfos: Vec<TexInfo>,
    surfaces: Vec<Surface>,
    mark_surfaces: Vec<SurfaceId>,
    node_surfaces: Vec<SurfaceId>,
    nodes: Vec<Node>,
    leaves: Vec<Leaf>,
    leaf_bounds: HashMap<LeafId, (Vec3, Vec3)>,
    vis_rows: HashMap<LeafId, Vec<LeafId>>,
    lightdata: Vec<u8>,
    submodels: Vec<Submodel>,
    portals: Vec<Portal>,
    root: Option<BspChild>,
}

impl LevelBuilder {
    pub fn new<S: Into<String>>(name: S) -> Self {
        let solid = Leaf {
            contents: Contents::Solid,
            vis_offset: None,
            mins: Vec3::ZERO,
            maxs: Vec3::ZERO,
            first_mark: 0,
            num_marks: 0,
            parent: None,
        };
        Self {
            name: name.into(),
            planes: Vec::new(),
            vertices: Vec::new(),
            vertex_lookup: HashMap::new(),
            edges: Vec::new(),
            edge_lookup: HashMap::new(),
            surf_edges: Vec::new(),
            texinfos: Vec::new(),
            surfaces: Vec::new(),
            mark_surfaces: Vec::new(),
            node_surfaces: Vec::new(),
            nodes: Vec::new(),
            leaves: vec![solid],
            leaf_bounds: HashMap::new(),
            vis_rows: HashMap::new(),
            lightdata: Vec::new(),
            submodels: Vec::new(),
            portals: Vec::new(),
            root: None,
        }
    }

    pub fn add_texinfo(&mut self, info: TexInfo) -> TexInfoId {
        self.texinfos.push(info);
        (self.texinfos.len() - 1) as TexInfoId
    }

    /// Returns the shared plane id and whether `plane` faces the other way.
    pub fn add_plane(&mut self, plane: Plane) -> (PlaneId, bool) {
        for (id, p) in self.planes.iter().enumerate() {
            if (p.dist - plane.dist).abs() < PLANE_DIST_EPSILON
                && (p.normal - plane.normal).length() < PLANE_NORMAL_EPSILON
            {
                return (id as PlaneId, false);
            }
            if (p.dist + plane.dist).abs() < PLANE_DIST_EPSILON
                && (p.normal + plane.normal).length() < PLANE_NORMAL_EPSILON
            {
                return (id as PlaneId, true);
            }
        }
        self.planes.push(plane);
        ((self.planes.len() - 1) as PlaneId, false)
    }

    fn add_vertex(&mut self, p: Vec3) -> VertexId {
        let key = [p.x.to_bits(), p.y.to_bits(), p.z.to_bits()];
        if let Some(&id) = self.vertex_lookup.get(&key) {
            return id;
        }
        let id = self.vertices.len() as VertexId;
        self.vertices.push(Vertex { pos: p });
        self.vertex_lookup.insert(key, id);
        id
    }

    fn add_edge(&mut self, a: VertexId, b: VertexId) -> SurfaceEdge {
        if let Some(&edge) = self.edge_lookup.get(&(b, a)) {
            return SurfaceEdge {
                edge,
                reversed: true,
            };
        }
        if let Some(&edge) = self.edge_lookup.get(&(a, b)) {
            return SurfaceEdge {
                edge,
                reversed: false,
            };
        }
        let edge = self.edges.len() as EdgeId;
        self.edges.push(Edge { v: [a, b] });
        self.edge_lookup.insert((a, b), edge);
        SurfaceEdge {
            edge,
            reversed: false,
        }
    }

    /// Add a convex face; `points` are clockwise seen from its front.
    pub fn add_face(&mut self, points: &[Vec3], texinfo: TexInfoId) -> Result<SurfaceId, LevelError> {
        if points.len() < 3 {
            return Err(LevelError::TooFewPoints(points.len()));
        }
        let info = *self
            .texinfos
            .get(texinfo as usize)
            .ok_or(LevelError::BadIndex {
                kind: "texinfo",
                index: texinfo,
            })?;
        let plane = points
            .windows(3)
            .find_map(|w| Plane::from_points(w[0], w[1], w[2]))
            .ok_or(LevelError::Degenerate)?;
        let (plane, back) = self.add_plane(plane);

        let first_edge = self.surf_edges.len() as u32;
        let ids: Vec<VertexId> = points.iter().map(|&p| self.add_vertex(p)).collect();
        for (i, &a) in ids.iter().enumerate() {
            let b = ids[(i + 1) % ids.len()];
            let se = self.add_edge(a, b);
            self.surf_edges.push(se);
        }

        let (texture_mins, extents) = texture_extents(points, &info);
        let mut flags = SurfaceFlags::empty();
        flags.set(SurfaceFlags::PLANE_BACK, back);
        self.surfaces.push(Surface {
            plane,
            flags,
            first_edge,
            num_edges: ids.len() as u32,
            texinfo,
            texture_mins,
            extents,
            lightmap: None,
            light: DEFAULT_LIGHT,
            portal: None,
        });
        Ok((self.surfaces.len() - 1) as SurfaceId)
    }

    /// Attach a lightmap: one byte per 16-texel sample, row-major.
    pub fn set_face_lightmap(&mut self, surface: SurfaceId, samples: &[u8]) -> Result<(), LevelError> {
        let s = self.surface_mut(surface)?;
        let (w, h) = s.lightmap_size();
        if samples.len() != w * h {
            return Err(LevelError::LightmapSize {
                surface,
                got: samples.len(),
                expected: w * h,
            });
        }
        let offset = self.lightdata.len();
        self.surface_mut(surface)?.lightmap = Some(offset);
        self.lightdata.extend_from_slice(samples);
        Ok(())
    }

    /// Lightmap grid `(w, h)` that [`Self::set_face_lightmap`] expects.
    pub fn face_lightmap_size(&self, surface: SurfaceId) -> Result<(usize, usize), LevelError> {
        self.surfaces
            .get(surface as usize)
            .map(Surface::lightmap_size)
            .ok_or(LevelError::BadIndex {
                kind: "surface",
                index: surface,
            })
    }

    pub fn set_face_light(&mut self, surface: SurfaceId, light: u8) -> Result<(), LevelError> {
        self.surface_mut(surface)?.light = light;
        Ok(())
    }

    fn surface_mut(&mut self, surface: SurfaceId) -> Result<&mut Surface, LevelError> {
        self.surfaces
            .get_mut(surface as usize)
            .ok_or(LevelError::BadIndex {
                kind: "surface",
                index: surface,
            })
    }

    /// New leaf marking `faces`; ids start at 1 (0 is the solid leaf).
    pub fn add_leaf(&mut self, contents: Contents, faces: &[SurfaceId]) -> LeafId {
        let first_mark = self.mark_surfaces.len() as u32;
        self.mark_surfaces.extend_from_slice(faces);
        self.leaves.push(Leaf {
            contents,
            vis_offset: None,
            mins: Vec3::splat(f32::MAX),
            maxs: Vec3::splat(f32::MIN),
            first_mark,
            num_marks: faces.len() as u32,
            parent: None,
        });
        (self.leaves.len() - 1) as LeafId
    }

    /// Override the box computed from the leaf's faces.
    pub fn set_leaf_bounds(&mut self, leaf: LeafId, mins: Vec3, maxs: Vec3) {
        self.leaf_bounds.insert(leaf, (mins, maxs));
    }

    /// Node splitting on `plane`; `faces` must lie on it.
    pub fn add_node(
        &mut self,
        plane: Plane,
        front: BspChild,
        back: BspChild,
        faces: &[SurfaceId],
    ) -> Result<NodeId, LevelError> {
        let (plane_id, flipped) = self.add_plane(plane);
        let children = if flipped { [back, front] } else { [front, back] };
        let id = self.nodes.len() as NodeId;
        for &f in faces {
            let s = self.surfaces.get(f as usize).ok_or(LevelError::BadIndex {
                kind: "surface",
                index: f,
            })?;
            if s.plane != plane_id {
                return Err(LevelError::FaceOffNodePlane(f, id));
            }
        }
        let first_surface = self.node_surfaces.len() as u32;
        self.node_surfaces.extend_from_slice(faces);
        self.nodes.push(Node {
            plane: plane_id,
            children,
            mins: Vec3::splat(f32::MAX),
            maxs: Vec3::splat(f32::MIN),
            first_surface,
            num_surfaces: faces.len() as u32,
            parent: None,
        });
        Ok(id)
    }

    pub fn set_root(&mut self, root: BspChild) {
        self.root = Some(root);
    }

    /// Turn `surface` into an opening that shows `dest_leaf`.
    pub fn add_portal(
        &mut self,
        surface: SurfaceId,
        dest_leaf: LeafId,
        transform: PortalTransform,
    ) -> Result<PortalId, LevelError> {
        let id = self.portals.len() as PortalId;
        let s = self.surface_mut(surface)?;
        s.flags |= SurfaceFlags::PORTAL;
        s.portal = Some(id);
        self.portals.push(Portal {
            surface,
            dest_leaf,
            transform,
            bridge: None,
        });
        Ok(id)
    }

    pub fn set_portal_bridge(&mut self, portal: PortalId, bridge: SubmodelId) {
        if let Some(p) = self.portals.get_mut(portal as usize) {
            p.bridge = Some(bridge);
        }
    }

    /// Brush model made of `faces` (given in model space), placed at `origin`.
    pub fn add_submodel(&mut self, faces: &[SurfaceId], origin: Vec3) -> Result<SubmodelId, LevelError> {
        let first_surface = faces.first().copied().unwrap_or(0);
        let contiguous = faces
            .iter()
            .enumerate()
            .all(|(i, &f)| f == first_surface + i as u32 && (f as usize) < self.surfaces.len());
        if faces.is_empty() || !contiguous {
            return Err(LevelError::BadIndex {
                kind: "submodel face",
                index: faces.first().copied().unwrap_or(0),
            });
        }
        let (mins, maxs) = self.bounds_of(faces.iter().copied());
        self.submodels.push(Submodel {
            first_surface,
            num_surfaces: faces.len() as u32,
            mins,
            maxs,
            origin,
        });
        Ok((self.submodels.len() - 1) as SubmodelId)
    }

    /// `leaf` can see exactly `visible` (itself is not implied).
    pub fn set_visibility(&mut self, leaf: LeafId, visible: &[LeafId]) {
        self.vis_rows.insert(leaf, visible.to_vec());
    }

    fn bounds_of(&self, faces: impl Iterator<Item = SurfaceId>) -> (Vec3, Vec3) {
        let mut mins = Vec3::splat(f32::MAX);
        let mut maxs = Vec3::splat(f32::MIN);
        for f in faces {
            let s = &self.surfaces[f as usize];
            let first = s.first_edge as usize;
            for se in &self.surf_edges[first..first + s.num_edges as usize] {
                let (v, _) = se.endpoints(&self.edges);
                let p = self.vertices[v as usize].pos;
                mins = mins.min(p);
                maxs = maxs.max(p);
            }
        }
        (mins, maxs)
    }

    /// Validate references, link parents, compute boxes and pack vis rows.
    pub fn build(mut self) -> Result<Level, LevelError> {
        let root = self.root.ok_or(LevelError::NoRoot)?;
        self.check_child(root)?;
        for n in 0..self.nodes.len() {
            for c in self.nodes[n].children {
                self.check_child(c)?;
            }
        }
        for p in &self.portals {
            if p.dest_leaf as usize >= self.leaves.len() || p.dest_leaf == SOLID_LEAF {
                return Err(LevelError::BadIndex {
                    kind: "portal leaf",
                    index: p.dest_leaf,
                });
            }
        }

        for leaf in 1..self.leaves.len() {
            let (mins, maxs) = match self.leaf_bounds.get(&(leaf as LeafId)) {
                Some(&b) => b,
                None => {
                    let l = &self.leaves[leaf];
                    let first = l.first_mark as usize;
                    let marks = self.mark_surfaces[first..first + l.num_marks as usize].to_vec();
                    self.bounds_of(marks.into_iter())
                }
            };
            self.leaves[leaf].mins = mins;
            self.leaves[leaf].maxs = maxs;
        }
        self.link(root, None);

        let mut visdata = Vec::new();
        let num_leaves = self.leaves.len() - 1;
        let mut rows: Vec<_> = self.vis_rows.drain().collect();
        rows.sort_by_key(|(leaf, _)| *leaf);
        for (leaf, visible) in rows {
            let mut row = vec![0u8; row_bytes(num_leaves)];
            for l in visible {
                if l >= 1 && (l as usize) <= num_leaves {
                    let bit = l as usize - 1;
                    row[bit >> 3] |= 1 << (bit & 7);
                }
            }
            if let Some(target) = self.leaves.get_mut(leaf as usize) {
                target.vis_offset = Some(visdata.len());
                visdata.extend(compress_row(&row));
            }
        }

        Ok(Level {
            name: self.name,
            planes: self.planes,
            vertices: self.vertices,
            edges: self.edges,
            surf_edges: self.surf_edges,
            texinfos: self.texinfos,
            surfaces: self.surfaces,
            mark_surfaces: self.mark_surfaces,
            node_surfaces: self.node_surfaces,
            nodes: self.nodes,
            leaves: self.leaves,
            root,
            visdata,
            lightdata: self.lightdata,
            submodels: self.submodels,
            portals: self.portals,
        })
    }

    fn check_child(&self, child: BspChild) -> Result<(), LevelError> {
        match child {
            BspChild::Node(n) if n as usize >= self.nodes.len() => Err(LevelError::BadIndex {
                kind: "node",
                index: n,
            }),
            BspChild::Leaf(l) if l as usize >= self.leaves.len() => Err(LevelError::BadIndex {
                kind: "leaf",
                index: l,
            }),
            _ => Ok(()),
        }
    }

    /// Set parents and grow node boxes bottom-up; returns the child's box.
    fn link(&mut self, child: BspChild, parent: Option<NodeId>) -> (Vec3, Vec3) {
        match child {
            BspChild::Leaf(SOLID_LEAF) => (Vec3::splat(f32::MAX), Vec3::splat(f32::MIN)),
            BspChild::Leaf(l) => {
                let leaf = &mut self.leaves[l as usize];
                leaf.parent = parent;
                (leaf.mins, leaf.maxs)
            }
            BspChild::Node(n) => {
                self.nodes[n as usize].parent = parent;
                let children = self.nodes[n as usize].children;
                let node = &self.nodes[n as usize];
                let first = node.first_surface as usize;
                let faces = self.node_surfaces[first..first + node.num_surfaces as usize].to_vec();
                let (mut mins, mut maxs) = self.bounds_of(faces.into_iter());
                for c in children {
                    let (cmin, cmax) = self.link(c, Some(n));
                    mins = mins.min(cmin);
                    maxs = maxs.max(cmax);
                }
                let node = &mut self.nodes[n as usize];
                node.mins = mins;
                node.maxs = maxs;
                (mins, maxs)
            }
        }
    }
}

/// Texture-space box of a face, snapped out to 16-texel blocks.
fn texture_extents(points: &[Vec3], info: &TexInfo) -> ([i32; 2], [i32; 2]) {
    let mut lo = [f32::MAX; 2];
    let mut hi = [f32::MIN; 2];
    for &p in points {
        let (s, t) = info.st(p);
        for (axis, v) in [s, t].into_iter().enumerate() {
            lo[axis] = lo[axis].min(v);
            hi[axis] = hi[axis].max(v);
        }
    }
    let mut mins = [0; 2];
    let mut extents = [0; 2];
    for axis in 0..2 {
        let bmin = (lo[axis] / 16.0).floor() as i32;
        let bmax = (hi[axis] / 16.0).ceil() as i32;
        mins[axis] = bmin * 16;
        extents[axis] = ((bmax - bmin) * 16).max(16);
    }
    (mins, extents)
}

/*======================================================================*/
/*                               Tests                                  */
/*======================================================================*/
#[cfg(test)]
mod tests {
    use super::*;
    use glam::vec3;

    fn quad(x0: f32, x1: f32, y0: f32, y1: f32, z: f32) -> [Vec3; 4] {
        [
            vec3(x0, y1, z),
            vec3(x1, y1, z),
            vec3(x1, y0, z),
            vec3(x0, y0, z),
        ]
    }

    #[test]
    fn abutting_faces_share_one_edge() {
        let mut b = LevelBuilder::new("pair");
        let tex = b.add_texinfo(TexInfo::new(Vec3::X, Vec3::NEG_Y, 0));
        let left = b.add_face(&quad(-10.0, 0.0, -10.0, 10.0, 10.0), tex).unwrap();
        let right = b.add_face(&quad(0.0, 10.0, -10.0, 10.0, 10.0), tex).unwrap();
        assert_eq!(b.edges.len(), 7);

        let l = &b.surfaces[left as usize];
        let r = &b.surfaces[right as usize];
        assert_eq!(l.plane, r.plane);
        // right edge of the left face, walked top to bottom
        let shared_l = b.surf_edges[l.first_edge as usize + 1];
        // left edge of the right face, walked bottom to top
        let shared_r = b.surf_edges[r.first_edge as usize + 3];
        assert_eq!(shared_l.edge, shared_r.edge);
        assert!(!shared_l.reversed);
        assert!(shared_r.reversed);
    }

    #[test]
    fn face_normal_points_at_viewer() {
        let mut b = LevelBuilder::new("one");
        let tex = b.add_texinfo(TexInfo::new(Vec3::X, Vec3::NEG_Y, 0));
        let f = b.add_face(&quad(-1.0, 1.0, -1.0, 1.0, 10.0), tex).unwrap();
        let plane = b.planes[b.surfaces[f as usize].plane as usize];
        assert!((plane.normal - Vec3::NEG_Z).length() < 1e-6);
        assert!((plane.dist + 10.0).abs() < 1e-6);
    }

    #[test]
    fn opposite_face_reuses_plane_backwards() {
        let mut b = LevelBuilder::new("two sided");
        let tex = b.add_texinfo(TexInfo::new(Vec3::X, Vec3::NEG_Y, 0));
        let mut pts = quad(-1.0, 1.0, -1.0, 1.0, 10.0);
        let front = b.add_face(&pts, tex).unwrap();
        pts.reverse();
        let back = b.add_face(&pts, tex).unwrap();
        let (fs, bs) = (&b.surfaces[front as usize], &b.surfaces[back as usize]);
        assert_eq!(fs.plane, bs.plane);
        assert!(!fs.flags.contains(SurfaceFlags::PLANE_BACK));
        assert!(bs.flags.contains(SurfaceFlags::PLANE_BACK));
    }

    #[test]
    fn extents_snap_to_blocks() {
        let info = TexInfo::new(Vec3::X, Vec3::NEG_Y, 0);
        let (mins, extents) = texture_extents(&quad(-20.0, 20.0, -4.0, 4.0, 0.0), &info);
        assert_eq!(mins, [-32, -16]);
        assert_eq!(extents, [64, 32]);
    }

    #[test]
    fn lightmap_size_checked() {
        let mut b = LevelBuilder::new("lit");
        let tex = b.add_texinfo(TexInfo::new(Vec3::X, Vec3::NEG_Y, 0));
        let f = b.add_face(&quad(0.0, 32.0, 0.0, 16.0, 5.0), tex).unwrap();
        // extents 32x16 -> 3x2 samples
        assert!(matches!(
            b.set_face_lightmap(f, &[0; 4]),
            Err(LevelError::LightmapSize { expected: 6, .. })
        ));
        b.set_face_lightmap(f, &[9; 6]).unwrap();
        assert_eq!(b.surfaces[f as usize].lightmap, Some(0));
    }

    #[test]
    fn build_links_parents_and_boxes() {
        let mut b = LevelBuilder::new("boxed");
        let tex = b.add_texinfo(TexInfo::new(Vec3::X, Vec3::NEG_Y, 0));
        let f = b.add_face(&quad(-4.0, 4.0, -4.0, 4.0, 10.0), tex).unwrap();
        let leaf = b.add_leaf(Contents::Empty, &[f]);
        let node = b
            .add_node(
                Plane::new(Vec3::NEG_Z, -10.0),
                BspChild::Leaf(leaf),
                BspChild::Leaf(SOLID_LEAF),
                &[f],
            )
            .unwrap();
        b.set_root(BspChild::Node(node));
        b.set_visibility(leaf, &[leaf]);
        let level = b.build().unwrap();

        assert_eq!(level.leaves[leaf as usize].parent, Some(node));
        assert_eq!(level.nodes[node as usize].mins, vec3(-4.0, -4.0, 10.0));
        assert_eq!(level.leaves[leaf as usize].vis_offset, Some(0));
        assert_eq!(level.visdata, vec![0x01]);
    }

    #[test]
    fn face_off_node_plane_rejected() {
        let mut b = LevelBuilder::new("bad");
        let tex = b.add_texinfo(TexInfo::new(Vec3::X, Vec3::NEG_Y, 0));
        let f = b.add_face(&quad(-4.0, 4.0, -4.0, 4.0, 10.0), tex).unwrap();
        let err = b
            .add_node(
                Plane::new(Vec3::X, 0.0),
                BspChild::Leaf(SOLID_LEAF),
                BspChild::Leaf(SOLID_LEAF),
                &[f],
            )
            .unwrap_err();
        assert_eq!(err, LevelError::FaceOffNodePlane(f, 0));
    }

    #[test]
    fn missing_root_is_an_error() {
        assert!(matches!(
            LevelBuilder::new("empty").build(),
            Err(LevelError::NoRoot)
        ));
    }
}
