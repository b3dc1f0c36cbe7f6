use glam::{Mat3, Vec3};

use crate::world::geometry::PortalTransform;

/// Steepest look up/down, keeps the basis away from the world up axis.
const MAX_PITCH: f32 = 89.0 * std::f32::consts::PI / 180.0;

/// Viewpoint in world space.
///
/// * World **+Y** is up; yaw = 0 looks down **+Z**.
/// * The orientation is stored as a basis (right, up, forward), so
///   portal passes can hold views that yaw/pitch alone cannot express.
#[derive(Clone, Copy, Debug)]
pub struct Camera {
    pos: Vec3,
    yaw: f32,   // radians, positive = turn left
    pitch: f32, // radians, positive = look up
    fov: f32,   // horizontal FoV (radians, typical 90–110°)
    basis: Mat3,
}

impl Camera {
    /// Create a new camera at `pos`, facing `yaw`/`pitch`, with horizontal FoV `fov`.
    pub fn new(pos: Vec3, yaw: f32, pitch: f32, fov: f32) -> Self {
        let pitch = pitch.clamp(-MAX_PITCH, MAX_PITCH);
        Self {
            pos,
            yaw,
            pitch,
            fov,
            basis: basis_from_angles(yaw, pitch),
        }
    }

    /// Camera with an explicit orientation; columns are right, up, forward.
    pub fn from_basis(pos: Vec3, basis: Mat3, fov: f32) -> Self {
        let fwd = basis.z_axis;
        Self {
            pos,
            yaw: (-fwd.x).atan2(fwd.z),
            pitch: fwd.y.clamp(-1.0, 1.0).asin(),
            fov,
            basis,
        }
    }

    #[inline]
    pub fn pos(&self) -> Vec3 {
        self.pos
    }

    #[inline]
    pub fn set_pos(&mut self, pos: Vec3) {
        self.pos = pos;
    }

    #[inline]
    pub fn yaw(&self) -> f32 {
        self.yaw
    }

    #[inline]
    pub fn pitch(&self) -> f32 {
        self.pitch
    }

    #[inline]
    pub fn fov(&self) -> f32 {
        self.fov
    }

    #[inline]
    pub fn basis(&self) -> Mat3 {
        self.basis
    }

    /// World point → view space: x right, y up, z depth.
    #[inline]
    pub fn to_view(&self, p: Vec3) -> Vec3 {
        self.rotate_to_view(p - self.pos)
    }

    /// World direction → view space (no translation).
    #[inline]
    pub fn rotate_to_view(&self, v: Vec3) -> Vec3 {
        Vec3::new(
            v.dot(self.basis.x_axis),
            v.dot(self.basis.y_axis),
            v.dot(self.basis.z_axis),
        )
    }

    /*──────────────────────── derived vectors ───────────────────────*/

    #[inline(always)]
    pub fn forward(&self) -> Vec3 {
        self.basis.z_axis
    }

    #[inline(always)]
    pub fn right(&self) -> Vec3 {
        self.basis.x_axis
    }

    #[inline(always)]
    pub fn up(&self) -> Vec3 {
        self.basis.y_axis
    }

    /*──────────────────────── movement helpers ──────────────────────*/

    /// Move by `forward` units and `side` (strafe) in the horizontal plane.
    pub fn step(&mut self, forward: f32, side: f32) {
        let (s, c) = self.yaw.sin_cos();
        let f = Vec3::new(-s, 0.0, c);
        let r = Vec3::new(c, 0.0, s);
        self.pos += f * forward + r * side;
    }

    pub fn rise(&mut self, dy: f32) {
        self.pos.y += dy;
    }

    /// Rotate around the world up axis (positive = turn left).
    pub fn turn(&mut self, delta_yaw: f32) {
        self.yaw = (self.yaw + delta_yaw).rem_euclid(std::f32::consts::TAU);
        self.basis = basis_from_angles(self.yaw, self.pitch);
    }

    /// Tilt up (positive) or down, clamped short of straight up.
    pub fn look(&mut self, delta_pitch: f32) {
        self.pitch = (self.pitch + delta_pitch).clamp(-MAX_PITCH, MAX_PITCH);
        self.basis = basis_from_angles(self.yaw, self.pitch);
    }

    /// The same view seen through a portal: position and orientation are
    /// carried by the portal's transform.
    pub fn through_portal(&self, t: &PortalTransform) -> Camera {
        Camera::from_basis(t.point(self.pos), t.rotation * self.basis, self.fov)
    }

    /*───────────────── projection / frustum helpers ─────────────────*/

    /// Pixel-per-map-unit scale for viewport width `w`.
    ///
    /// ```text
    /// focal = w / (2 * tan(fov/2))
    /// ```
    #[inline]
    pub fn screen_scale(&self, w: usize) -> f32 {
        (w as f32) * 0.5 / (self.fov * 0.5).tan()
    }
}

fn basis_from_angles(yaw: f32, pitch: f32) -> Mat3 {
    let (sy, cy) = yaw.sin_cos();
    let (sp, cp) = pitch.sin_cos();
    let forward = Vec3::new(-sy * cp, sp, cy * cp);
    let right = Vec3::Y.cross(forward).normalize();
    let up = forward.cross(right);
    Mat3::from_cols(right, up, forward)
}

/*====================================================================*/
/*                                Tests                                */
/*====================================================================*/
#[cfg(test)]
mod tests {
    use super::*;
    use glam::vec3;
    use std::f32::consts::FRAC_PI_2;

    fn close(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < 1e-5
    }

    #[test]
    fn basis_is_orthonormal() {
        let cam = Camera::new(Vec3::ZERO, 0.3, -0.4, 1.57);
        let (f, r, u) = (cam.forward(), cam.right(), cam.up());
        assert!((f.length() - 1.0).abs() < 1e-5);
        assert!((r.length() - 1.0).abs() < 1e-5);
        assert!(f.dot(r).abs() < 1e-5);
        assert!(f.dot(u).abs() < 1e-5);
        assert!(close(r.cross(u), f));
    }

    #[test]
    fn screen_scale_at_90_deg() {
        let cam = Camera::new(Vec3::ZERO, 0.0, 0.0, FRAC_PI_2);
        assert!((cam.screen_scale(640) - 320.0).abs() < 1e-3);
    }

    #[test]
    fn to_view_axes_align() {
        let cam = Camera::new(Vec3::ZERO, 0.0, 0.0, FRAC_PI_2);
        assert!(close(cam.to_view(vec3(0.0, 0.0, 10.0)), vec3(0.0, 0.0, 10.0)));
        assert!(close(cam.to_view(vec3(5.0, 0.0, 0.0)), vec3(5.0, 0.0, 0.0)));
        assert!(close(cam.to_view(vec3(0.0, 3.0, 0.0)), vec3(0.0, 3.0, 0.0)));
    }

    #[test]
    fn positive_yaw_turns_left() {
        let cam = Camera::new(Vec3::ZERO, FRAC_PI_2, 0.0, FRAC_PI_2);
        // facing -X now; a point at -X is straight ahead
        assert!(close(cam.to_view(vec3(-10.0, 0.0, 0.0)), vec3(0.0, 0.0, 10.0)));
    }

    #[test]
    fn from_basis_round_trips_angles() {
        let cam = Camera::new(vec3(1.0, 2.0, 3.0), 0.7, 0.2, 1.5);
        let copy = Camera::from_basis(cam.pos(), cam.basis(), cam.fov());
        assert!((copy.yaw() - 0.7).abs() < 1e-4);
        assert!((copy.pitch() - 0.2).abs() < 1e-4);
    }

    #[test]
    fn portal_moves_the_eye() {
        let cam = Camera::new(vec3(0.0, 0.0, -5.0), 0.0, 0.0, FRAC_PI_2);
        let t = PortalTransform::translation(vec3(100.0, 0.0, 0.0));
        let through = cam.through_portal(&t);
        assert!(close(through.pos(), vec3(100.0, 0.0, -5.0)));
        assert!(close(through.forward(), cam.forward()));
    }
}
