use bitflags::bitflags;
use glam::{Mat3, Vec3};

use crate::world::texture::TextureId;

pub type PlaneId = u32;
pub type VertexId = u32;
pub type EdgeId = u32;
pub type TexInfoId = u32;
pub type SurfaceId = u32;
pub type NodeId = u32;
pub type LeafId = u32;
pub type PortalId = u32;
pub type SubmodelId = u32;

/// Leaf 0 is shared by every solid region of the map.
pub const SOLID_LEAF: LeafId = 0;

/// Runtime snapshot of one level (immutable after load).
///
/// Everything that changes from frame to frame (vis stamps, cached edges,
/// bsp keys) lives in the engine, so the renderer only ever needs `&Level`.
#[derive(Debug)]
pub struct Level {
    pub name: String,
    pub planes: Vec<Plane>,
    pub vertices: Vec<Vertex>,
    pub edges: Vec<Edge>,
    pub surf_edges: Vec<SurfaceEdge>,
    pub texinfos: Vec<TexInfo>,
    pub surfaces: Vec<Surface>,
    /// leaf → surfaces that are (partially) inside it
    pub mark_surfaces: Vec<SurfaceId>,
    /// node → surfaces lying on its splitting plane
    pub node_surfaces: Vec<SurfaceId>,
    pub nodes: Vec<Node>,
    pub leaves: Vec<Leaf>,
    pub root: BspChild,
    /// run-length compressed PVS rows, one per non-solid leaf
    pub visdata: Vec<u8>,
    /// 8-bit light samples, one block per lit surface
    pub lightdata: Vec<u8>,
    pub submodels: Vec<Submodel>,
    pub portals: Vec<Portal>,
}

/*--------------------------- planes ---------------------------------*/

/// `normal · p = dist`
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Plane {
    pub normal: Vec3,
    pub dist: f32,
}

impl Plane {
    pub const fn new(normal: Vec3, dist: f32) -> Self {
        Self { normal, dist }
    }

    /// Plane through `a`, `b`, `c`, facing the side from which the three
    /// points appear clockwise on screen.
    pub fn from_points(a: Vec3, b: Vec3, c: Vec3) -> Option<Self> {
        let normal = (b - a).cross(c - a).try_normalize()?;
        Some(Self {
            normal,
            dist: normal.dot(a),
        })
    }

    /// Signed distance, positive on the front side.
    #[inline(always)]
    pub fn distance(&self, p: Vec3) -> f32 {
        self.normal.dot(p) - self.dist
    }

    /// 0 = *front* of plane, 1 = *back*.
    #[inline(always)]
    pub fn point_side(&self, p: Vec3) -> usize {
        if self.distance(p) >= 0.0 { 0 } else { 1 }
    }

    #[inline]
    pub fn flipped(self) -> Self {
        Self {
            normal: -self.normal,
            dist: -self.dist,
        }
    }

    /// Same plane seen from a model placed at `origin`.
    #[inline]
    pub fn translated(self, origin: Vec3) -> Self {
        Self {
            normal: self.normal,
            dist: self.dist + self.normal.dot(origin),
        }
    }
}

/*----------------------- simple primitives --------------------------*/

#[derive(Clone, Copy, Debug)]
pub struct Vertex {
    pub pos: Vec3,
}

/// Level edge shared by every surface that borders it.
#[derive(Clone, Copy, Debug)]
pub struct Edge {
    pub v: [VertexId; 2],
}

/// One entry of a surface's edge loop.
///
/// `reversed` means the surface walks the shared edge from `v[1]` to `v[0]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfaceEdge {
    pub edge: EdgeId,
    pub reversed: bool,
}

impl SurfaceEdge {
    /// Endpoints in the surface's winding order.
    #[inline]
    pub fn endpoints(&self, edges: &[Edge]) -> (VertexId, VertexId) {
        let e = &edges[self.edge as usize];
        if self.reversed {
            (e.v[1], e.v[0])
        } else {
            (e.v[0], e.v[1])
        }
    }
}

/// Texture projection: `s = s_axis · p + s_offset`, same for `t`.
#[derive(Clone, Copy, Debug)]
pub struct TexInfo {
    pub s_axis: Vec3,
    pub s_offset: f32,
    pub t_axis: Vec3,
    pub t_offset: f32,
    pub texture: TextureId,
}

impl TexInfo {
    pub fn new(s_axis: Vec3, t_axis: Vec3, texture: TextureId) -> Self {
        Self {
            s_axis,
            s_offset: 0.0,
            t_axis,
            t_offset: 0.0,
            texture,
        }
    }

    #[inline]
    pub fn st(&self, p: Vec3) -> (f32, f32) {
        (
            self.s_axis.dot(p) + self.s_offset,
            self.t_axis.dot(p) + self.t_offset,
        )
    }
}

/*--------------------------- surfaces -------------------------------*/

bitflags! {
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct SurfaceFlags: u16 {
        /// The surface faces the back side of its plane.
        const PLANE_BACK = 0x0001;
        /// Opening into another region; its pixels come from a portal pass.
        const PORTAL     = 0x0002;
    }
}

/// One planar polygon face.
#[derive(Clone, Debug)]
pub struct Surface {
    pub plane: PlaneId,
    pub flags: SurfaceFlags,
    pub first_edge: u32,
    pub num_edges: u32,
    pub texinfo: TexInfoId,
    /// smallest (s, t) on the face, snapped down to 16 texels
    pub texture_mins: [i32; 2],
    /// (s, t) size in texels, a multiple of 16
    pub extents: [i32; 2],
    /// offset into `Level::lightdata`
    pub lightmap: Option<usize>,
    /// uniform light level used when there is no lightmap
    pub light: u8,
    pub portal: Option<PortalId>,
}

impl Surface {
    /// Size of the lightmap grid (one sample every 16 texels).
    #[inline]
    pub fn lightmap_size(&self) -> (usize, usize) {
        (
            (self.extents[0] >> 4) as usize + 1,
            (self.extents[1] >> 4) as usize + 1,
        )
    }

    #[inline]
    pub fn is_portal(&self) -> bool {
        self.flags.contains(SurfaceFlags::PORTAL)
    }
}

/*---------------------------- BSP tree ------------------------------*/

/// Leaf content kinds. Only `Solid` changes what the renderer does.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Contents {
    #[default]
    Empty,
    Solid,
    Water,
    Slime,
    Lava,
    Sky,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BspChild {
    Node(NodeId),
    Leaf(LeafId),
}

#[derive(Clone, Debug)]
pub struct Node {
    pub plane: PlaneId,
    /// [front, back]
    pub children: [BspChild; 2],
    pub mins: Vec3,
    pub maxs: Vec3,
    pub first_surface: u32,
    pub num_surfaces: u32,
    pub parent: Option<NodeId>,
}

#[derive(Clone, Debug)]
pub struct Leaf {
    pub contents: Contents,
    /// offset of this leaf's compressed row in `Level::visdata`
    pub vis_offset: Option<usize>,
    pub mins: Vec3,
    pub maxs: Vec3,
    pub first_mark: u32,
    pub num_marks: u32,
    pub parent: Option<NodeId>,
}

/*------------------------ submodels & portals -----------------------*/

/// Brush model (door, lift) drawn at `origin` on top of the world.
#[derive(Clone, Debug)]
pub struct Submodel {
    pub first_surface: u32,
    pub num_surfaces: u32,
    pub mins: Vec3,
    pub maxs: Vec3,
    pub origin: Vec3,
}

/// Rigid transform from a portal's own side to the region it opens into.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PortalTransform {
    pub rotation: Mat3,
    pub translation: Vec3,
}

impl PortalTransform {
    pub const IDENTITY: Self = Self {
        rotation: Mat3::IDENTITY,
        translation: Vec3::ZERO,
    };

    pub fn translation(t: Vec3) -> Self {
        Self {
            rotation: Mat3::IDENTITY,
            translation: t,
        }
    }

    #[inline]
    pub fn point(&self, p: Vec3) -> Vec3 {
        self.rotation * p + self.translation
    }

    #[inline]
    pub fn vector(&self, v: Vec3) -> Vec3 {
        self.rotation * v
    }

    pub fn plane(&self, plane: Plane) -> Plane {
        let normal = self.vector(plane.normal);
        let on_plane = self.point(plane.normal * plane.dist);
        Plane {
            normal,
            dist: normal.dot(on_plane),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Portal {
    /// The polygon on this side of the opening.
    pub surface: SurfaceId,
    /// Leaf the opening looks into.
    pub dest_leaf: LeafId,
    pub transform: PortalTransform,
    /// Collision model bridging the opening; the renderer only carries it.
    pub bridge: Option<SubmodelId>,
}
