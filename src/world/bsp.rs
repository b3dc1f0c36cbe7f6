use glam::Vec3;

use crate::world::geometry::{
    BspChild, Leaf, LeafId, Level, Node, NodeId, Plane, SurfaceEdge, SurfaceId,
};

// ──────────────────────────────────────────────────────────────────────────
//                       Level – public helpers
// ──────────────────────────────────────────────────────────────────────────
impl Level {
    #[inline(always)]
    pub fn node_plane(&self, node: &Node) -> &Plane {
        &self.planes[node.plane as usize]
    }

    /// Walk the BSP and return the leaf containing `p`.
    pub fn locate_leaf(&self, p: Vec3) -> LeafId {
        let mut child = self.root;
        loop {
            match child {
                BspChild::Leaf(leaf) => return leaf,
                BspChild::Node(idx) => {
                    let node = &self.nodes[idx as usize];
                    child = node.children[self.node_plane(node).point_side(p)];
                }
            }
        }
    }

    /// Surfaces marked as (partially) inside `leaf`.
    #[inline]
    pub fn leaf_surfaces(&self, leaf: &Leaf) -> &[SurfaceId] {
        let first = leaf.first_mark as usize;
        &self.mark_surfaces[first..first + leaf.num_marks as usize]
    }

    /// Surfaces lying on `node`'s splitting plane.
    #[inline]
    pub fn node_surfaces(&self, node: &Node) -> &[SurfaceId] {
        let first = node.first_surface as usize;
        &self.node_surfaces[first..first + node.num_surfaces as usize]
    }

    #[inline]
    pub fn surface_edges(&self, surface: SurfaceId) -> &[SurfaceEdge] {
        let s = &self.surfaces[surface as usize];
        let first = s.first_edge as usize;
        &self.surf_edges[first..first + s.num_edges as usize]
    }

    /// Polygon vertices of `surface` in winding order.
    pub fn surface_points(&self, surface: SurfaceId) -> impl Iterator<Item = Vec3> + '_ {
        self.surface_edges(surface).iter().map(|se| {
            let (v0, _) = se.endpoints(&self.edges);
            self.vertices[v0 as usize].pos
        })
    }

    /// Plane a surface faces, with `PLANE_BACK` already applied.
    pub fn surface_plane(&self, surface: SurfaceId) -> Plane {
        use crate::world::geometry::SurfaceFlags;
        let s = &self.surfaces[surface as usize];
        let plane = self.planes[s.plane as usize];
        if s.flags.contains(SurfaceFlags::PLANE_BACK) {
            plane.flipped()
        } else {
            plane
        }
    }

    /// Chain of ancestors of a node or leaf, nearest first.
    pub fn ancestors(&self, mut parent: Option<NodeId>) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::from_fn(move || {
            let id = parent?;
            parent = self.nodes[id as usize].parent;
            Some(id)
        })
    }

    /// Number of leaves that own a PVS bit (all but the solid leaf).
    #[inline]
    pub fn vis_leaf_count(&self) -> usize {
        self.leaves.len().saturating_sub(1)
    }
}

/*====================================================================*/
/*                                Tests                                */
/*====================================================================*/
