use glam::Vec3;

use crate::engine::config::RenderSettings;
use crate::engine::frustum::Frustum;
use crate::world::{Camera, MIP_LEVELS};

/// Closest a projected point may get to the eye; nearer points are
/// clamped before the divide.
pub const NEAR_CLIP: f32 = 0.01;

/// 16.16 fixed point used for edge x positions and texture steps.
pub const FIXED_SHIFT: i32 = 16;
pub const FIXED_ONE: i32 = 1 << FIXED_SHIFT;
/// Added before truncation so that `x >> 16` rounds up.
pub const FIXED_CEIL_BIAS: i32 = FIXED_ONE - 1;

/// Constants that depend on the *frame-buffer* and FoV, not on the map.
///
/// Pixel centres sit on integer coordinates, so the visible rectangle is
/// `[-0.5, w - 0.5] × [-0.5, h - 0.5]` in projected space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub w: usize,
    pub h: usize,
    pub fov: f32,
    /// pixels per unit at depth 1
    pub scale: f32,
    pub center_x: f32,
    pub center_y: f32,
}

impl Viewport {
    pub fn new(w: usize, h: usize, fov: f32) -> Self {
        Self {
            w,
            h,
            fov,
            scale: (w as f32) * 0.5 / (fov * 0.5).tan(),
            center_x: w as f32 * 0.5 - 0.5,
            center_y: h as f32 * 0.5 - 0.5,
        }
    }

    #[inline]
    pub fn half_w(&self) -> f32 {
        self.w as f32 * 0.5
    }

    #[inline]
    pub fn half_h(&self) -> f32 {
        self.h as f32 * 0.5
    }

    /// View-space point → (u, v) screen coordinates, unclamped.
    #[inline]
    pub fn project(&self, v: Vec3) -> (f32, f32) {
        let s = self.scale / v.z;
        (self.center_x + v.x * s, self.center_y - v.y * s)
    }

    /// Depths at which mips 1, 2, 3 take over.
    pub fn mip_distances(&self) -> [f32; MIP_LEVELS - 1] {
        [self.scale, self.scale / 0.4, self.scale / 0.2]
    }
}

/// `1/z` as an affine function of screen position.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ZGradient {
    pub step_x: f32,
    pub step_y: f32,
    pub origin: f32,
}

impl ZGradient {
    #[inline(always)]
    pub fn at(&self, x: f32, y: f32) -> f32 {
        self.origin + x * self.step_x + y * self.step_y
    }
}

/// What kind of model the surfaces being fed to the edge list belong to.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ModelState {
    /// bsp key of the region the next surface belongs to
    pub key: u32,
    pub in_submodel: bool,
    /// translation applied to submodel geometry
    pub origin: Vec3,
}

impl Default for ModelState {
    fn default() -> Self {
        Self {
            key: 0,
            in_submodel: false,
            origin: Vec3::ZERO,
        }
    }
}

/// Everything the clipping, emission and drawing stages need to know about
/// the view being rendered. One context per pass; portal passes get a
/// fresh one with their own camera and clip plane.
#[derive(Clone, Debug)]
pub struct FrameContext {
    pub camera: Camera,
    pub viewport: Viewport,
    pub frustum: Frustum,
    pub settings: RenderSettings,
    /// frame counter, shared by every pass of one frame
    pub frame: u32,
    /// unique id of this pass (stamps, edge cache generation)
    pub pass: u32,
    /// portal recursion depth, 0 for the main view
    pub depth: u32,
    pub model: ModelState,
}

impl FrameContext {
    pub fn new(
        camera: Camera,
        viewport: Viewport,
        frustum: Frustum,
        settings: RenderSettings,
        frame: u32,
        pass: u32,
        depth: u32,
    ) -> Self {
        Self {
            camera,
            viewport,
            frustum,
            settings,
            frame,
            pass,
            depth,
            model: ModelState::default(),
        }
    }

    /// Eye position relative to the model currently being drawn.
    #[inline]
    pub fn model_eye(&self) -> Vec3 {
        self.camera.pos() - self.model.origin
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

    #[test]
    fn ninety_degree_scale_is_half_width() {
        let vp = Viewport::new(320, 200, FRAC_PI_2);
        assert!((vp.scale - 160.0).abs() < 1e-3);
        assert_eq!(vp.center_x, 159.5);
        assert_eq!(vp.center_y, 99.5);
    }

    #[test]
    fn frustum_corners_hit_screen_edges() {
        let vp = Viewport::new(320, 200, FRAC_PI_2);
        let (u, v) = vp.project(vec3(-10.0, 100.0 / 16.0, 10.0));
        assert!((u + 0.5).abs() < 1e-3);
        assert!((v + 0.5).abs() < 1e-3);
    }

    #[test]
    fn mip_thresholds_grow() {
        let vp = Viewport::new(320, 200, FRAC_PI_2);
        let d = vp.mip_distances();
        assert!(d[0] < d[1] && d[1] < d[2]);
        assert!((d[2] - 800.0).abs() < 1e-2);
    }
}
