//! View frustum in world space.
//!
//! Four side planes through the screen edges, a near plane, and for
//! portal passes one extra plane that keeps only what lies beyond the
//! portal. Normals point into the visible volume.

use bitflags::bitflags;
use glam::Vec3;
use smallvec::SmallVec;

use crate::engine::types::{NEAR_CLIP, Viewport};
use crate::world::{Camera, Plane};

bitflags! {
    /// Planes a node/leaf box still straddles.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct ClipFlags: u8 {
        const LEFT   = 0x01;
        const RIGHT  = 0x02;
        const TOP    = 0x04;
        const BOTTOM = 0x08;
        const NEAR   = 0x10;
        const PORTAL = 0x20;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaneKind {
    Left,
    Right,
    Top,
    Bottom,
    Near,
    Portal,
}

impl PlaneKind {
    #[inline]
    pub fn flag(self) -> ClipFlags {
        match self {
            PlaneKind::Left => ClipFlags::LEFT,
            PlaneKind::Right => ClipFlags::RIGHT,
            PlaneKind::Top => ClipFlags::TOP,
            PlaneKind::Bottom => ClipFlags::BOTTOM,
            PlaneKind::Near => ClipFlags::NEAR,
            PlaneKind::Portal => ClipFlags::PORTAL,
        }
    }

    /// Polygons are clipped against every plane but the near one; the
    /// projection clamps what gets that close.
    #[inline]
    pub fn clips_polygons(self) -> bool {
        !matches!(self, PlaneKind::Near)
    }

    /// Clipping against this plane may need a closing edge along it.
    #[inline]
    pub fn tracks_crossings(self) -> bool {
        matches!(self, PlaneKind::Left | PlaneKind::Right | PlaneKind::Portal)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct FrustumPlane {
    pub plane: Plane,
    pub kind: PlaneKind,
}

/// Result of testing a box against the planes still in play.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoxClip {
    TotallyOutside,
    TotallyInside,
    /// Planes the box crosses.
    Partial(ClipFlags),
}

/// Plane indices to clip one polygon against, in order.
pub type ClipChain = SmallVec<[usize; 6]>;

#[derive(Clone, Debug)]
pub struct Frustum {
    planes: SmallVec<[FrustumPlane; 6]>,
}

impl Frustum {
    pub fn new(viewport: &Viewport, camera: &Camera) -> Self {
        let (hw, hh, s) = (viewport.half_w(), viewport.half_h(), viewport.scale);
        let view_normals = [
            (PlaneKind::Left, Vec3::new(s, 0.0, hw)),
            (PlaneKind::Right, Vec3::new(-s, 0.0, hw)),
            (PlaneKind::Top, Vec3::new(0.0, -s, hh)),
            (PlaneKind::Bottom, Vec3::new(0.0, s, hh)),
        ];
        let basis = camera.basis();
        let eye = camera.pos();
        let mut planes: SmallVec<[FrustumPlane; 6]> = view_normals
            .into_iter()
            .map(|(kind, n)| {
                let normal = (basis * n).normalize();
                FrustumPlane {
                    plane: Plane::new(normal, normal.dot(eye)),
                    kind,
                }
            })
            .collect();
        let fwd = camera.forward();
        planes.push(FrustumPlane {
            plane: Plane::new(fwd, fwd.dot(eye) + NEAR_CLIP),
            kind: PlaneKind::Near,
        });
        Self { planes }
    }

    /// Add the portal plane; geometry on its back side is cut away.
    pub fn with_portal_plane(mut self, plane: Plane) -> Self {
        self.planes.retain(|p| p.kind != PlaneKind::Portal);
        self.planes.push(FrustumPlane {
            plane,
            kind: PlaneKind::Portal,
        });
        self
    }

    #[inline]
    pub fn planes(&self) -> &[FrustumPlane] {
        &self.planes
    }

    /// Flags for every plane, used at the root of the walk.
    pub fn all_flags(&self) -> ClipFlags {
        self.planes
            .iter()
            .fold(ClipFlags::empty(), |acc, p| acc | p.kind.flag())
    }

    /// Test an axis-aligned box against the planes named in `flags`.
    ///
    /// Planes the box is fully inside are dropped from the result, so
    /// children of an inside node skip those tests.
    pub fn classify_box(&self, mins: Vec3, maxs: Vec3, flags: ClipFlags) -> BoxClip {
        let mut remaining = flags;
        for fp in self.planes.iter().filter(|p| flags.contains(p.kind.flag())) {
            let n = fp.plane.normal;
            // corner furthest along the normal, and the one opposite
            let far = Vec3::new(
                if n.x >= 0.0 { maxs.x } else { mins.x },
                if n.y >= 0.0 { maxs.y } else { mins.y },
                if n.z >= 0.0 { maxs.z } else { mins.z },
            );
            let near = Vec3::new(
                if n.x >= 0.0 { mins.x } else { maxs.x },
                if n.y >= 0.0 { mins.y } else { maxs.y },
                if n.z >= 0.0 { mins.z } else { maxs.z },
            );
            if fp.plane.distance(far) < 0.0 {
                return BoxClip::TotallyOutside;
            }
            if fp.plane.distance(near) >= 0.0 {
                remaining.remove(fp.kind.flag());
            }
        }
        if remaining.is_empty() {
            BoxClip::TotallyInside
        } else {
            BoxClip::Partial(remaining)
        }
    }

    /// Planes to clip a polygon against, given its node's flags.
    pub fn clip_chain(&self, flags: ClipFlags) -> ClipChain {
        self.planes
            .iter()
            .enumerate()
            .filter(|(_, p)| p.kind.clips_polygons() && flags.contains(p.kind.flag()))
            .map(|(i, _)| i)
            .collect()
    }
}

/*====================================================================*/
/*                                Tests                                */
/*====================================================================*/
#[cfg(test)]
mod tests {
    use super::*;
    use glam::vec3;
    use std::f32::consts::FRAC_PI_2;

    fn frustum() -> Frustum {
        let vp = Viewport::new(320, 240, FRAC_PI_2);
        let cam = Camera::new(Vec3::ZERO, 0.0, 0.0, FRAC_PI_2);
        Frustum::new(&vp, &cam)
    }

    #[test]
    fn box_ahead_is_inside() {
        let f = frustum();
        let r = f.classify_box(vec3(-1.0, -1.0, 50.0), vec3(1.0, 1.0, 52.0), f.all_flags());
        assert_eq!(r, BoxClip::TotallyInside);
    }

    #[test]
    fn box_behind_is_outside() {
        let f = frustum();
        let r = f.classify_box(vec3(-1.0, -1.0, -20.0), vec3(1.0, 1.0, -10.0), f.all_flags());
        assert_eq!(r, BoxClip::TotallyOutside);
    }

    #[test]
    fn box_across_left_edge_keeps_left_flag() {
        let f = frustum();
        // at z = 10 the left edge is x = -10
        let r = f.classify_box(vec3(-14.0, -1.0, 10.0), vec3(-6.0, 1.0, 10.0), f.all_flags());
        assert_eq!(r, BoxClip::Partial(ClipFlags::LEFT));
    }

    #[test]
    fn cleared_flags_are_not_retested() {
        let f = frustum();
        // outside on the left, but LEFT is no longer in play
        let r = f.classify_box(
            vec3(-30.0, -1.0, 10.0),
            vec3(-20.0, 1.0, 10.0),
            ClipFlags::RIGHT | ClipFlags::NEAR,
        );
        assert_eq!(r, BoxClip::TotallyInside);
    }

    #[test]
    fn portal_plane_cuts_and_is_chained() {
        let f = frustum().with_portal_plane(Plane::new(Vec3::Z, 30.0));
        assert!(f.all_flags().contains(ClipFlags::PORTAL));
        let r = f.classify_box(vec3(-1.0, -1.0, 10.0), vec3(1.0, 1.0, 20.0), f.all_flags());
        assert_eq!(r, BoxClip::TotallyOutside);
        let chain = f.clip_chain(f.all_flags());
        assert_eq!(chain.as_slice(), &[0, 1, 2, 3, 5]);
    }
}
