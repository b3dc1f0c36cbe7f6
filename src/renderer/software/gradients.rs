use glam::Vec3;

use crate::engine::types::{FIXED_ONE, Viewport, ZGradient};
use crate::renderer::RenderError;
use crate::world::{Camera, MIP_LEVELS, Surface, TexInfo};

/// Mip level for a surface whose closest point is `nearest_z` away.
///
/// A forced level wins; it must exist in the mip chain.
pub fn select_mip(
    nearest_z: f32,
    viewport: &Viewport,
    mip_override: Option<u8>,
) -> Result<usize, RenderError> {
    match mip_override {
        Some(m) if (m as usize) < MIP_LEVELS => Ok(m as usize),
        Some(m) => Err(RenderError::MipOutOfRange(m)),
        None => Ok(viewport
            .mip_distances()
            .iter()
            .filter(|&&d| nearest_z > d)
            .count()),
    }
}

/// `s/z` and `t/z` as affine functions of screen position, plus what has to
/// be added back after multiplying by z.
///
/// For a pixel (u, v) on the surface, with the view ray
/// `p = eye + z·(R·(u-cx)/scale - U·(v-cy)/scale + F)`, the texture
/// coordinate `s = S·p + s_off` splits into `z · (affine in u, v)` plus a
/// constant. Everything is in cache-block texels of the chosen mip.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TextureGradients {
    pub sdivz: ZGradient,
    pub tdivz: ZGradient,
    /// 16.16, added after the multiply
    pub s_adjust: f32,
    pub t_adjust: f32,
    /// largest valid 16.16 coordinate inside the block
    pub bbextent_s: i32,
    pub bbextent_t: i32,
}

impl TextureGradients {
    pub fn new(
        camera: &Camera,
        viewport: &Viewport,
        info: &TexInfo,
        surface: &Surface,
        origin: Vec3,
        mip: usize,
    ) -> Self {
        let mipscale = 1.0 / (1 << mip) as f32;
        let (r, u, f) = (camera.right(), camera.up(), camera.forward());
        let (cx, cy) = (viewport.center_x, viewport.center_y);

        let axis = |a: Vec3| {
            let step_x = a.dot(r) / viewport.scale * mipscale;
            let step_y = -a.dot(u) / viewport.scale * mipscale;
            ZGradient {
                step_x,
                step_y,
                origin: a.dot(f) * mipscale - cx * step_x - cy * step_y,
            }
        };

        let eye = camera.pos() - origin;
        let fixed = FIXED_ONE as f32;
        let s_adjust = (info.s_axis.dot(eye) + info.s_offset - surface.texture_mins[0] as f32)
            * mipscale
            * fixed;
        let t_adjust = (info.t_axis.dot(eye) + info.t_offset - surface.texture_mins[1] as f32)
            * mipscale
            * fixed;

        Self {
            sdivz: axis(info.s_axis),
            tdivz: axis(info.t_axis),
            s_adjust,
            t_adjust,
            bbextent_s: ((surface.extents[0] >> mip) << 16) - 1,
            bbextent_t: ((surface.extents[1] >> mip) << 16) - 1,
        }
    }

    /// 16.16 block coordinates at screen (x, y), given `1/z` there.
    #[inline(always)]
    pub fn st_at(&self, inv_z: f32, x: f32, y: f32) -> (i32, i32) {
        let z = if inv_z > 0.0 {
            FIXED_ONE as f32 / inv_z
        } else {
            0.0
        };
        let s = (self.sdivz.at(x, y) * z + self.s_adjust) as i32;
        let t = (self.tdivz.at(x, y) * z + self.t_adjust) as i32;
        (s.clamp(0, self.bbextent_s), t.clamp(0, self.bbextent_t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::SurfaceFlags;
    use glam::vec3;
    use std::f32::consts::FRAC_PI_2;

    fn wall() -> Surface {
        Surface {
            plane: 0,
            flags: SurfaceFlags::empty(),
            first_edge: 0,
            num_edges: 4,
            texinfo: 0,
            texture_mins: [-64, -64],
            extents: [128, 128],
            lightmap: None,
            light: 255,
            portal: None,
        }
    }

    #[test]
    fn mip_follows_distance_and_override() {
        let vp = Viewport::new(320, 200, FRAC_PI_2);
        assert_eq!(select_mip(50.0, &vp, None).unwrap(), 0);
        assert_eq!(select_mip(200.0, &vp, None).unwrap(), 1);
        assert_eq!(select_mip(10_000.0, &vp, None).unwrap(), 3);
        assert_eq!(select_mip(10_000.0, &vp, Some(0)).unwrap(), 0);
        assert!(matches!(
            select_mip(1.0, &vp, Some(MIP_LEVELS as u8)),
            Err(RenderError::MipOutOfRange(4))
        ));
    }

    #[test]
    fn screen_centre_maps_to_texel_under_the_eye() {
        // wall at z = 10 facing the camera, s along +x, t along -y
        let vp = Viewport::new(64, 48, FRAC_PI_2);
        let cam = Camera::new(Vec3::ZERO, 0.0, 0.0, FRAC_PI_2);
        let info = TexInfo::new(Vec3::X, Vec3::NEG_Y, 0);
        let g = TextureGradients::new(&cam, &vp, &info, &wall(), Vec3::ZERO, 0);

        let (s, t) = g.st_at(0.1, vp.center_x, vp.center_y);
        // world (0, 0) is 64 texels into the block on both axes
        assert!((s - (64 << 16)).abs() < 16);
        assert!((t - (64 << 16)).abs() < 16);

        // one pixel right at depth 10 is 10/32 world units
        let (s1, _) = g.st_at(0.1, vp.center_x + 1.0, vp.center_y);
        let expected = (10.0 / 32.0 * 65536.0) as i32;
        assert!((s1 - s - expected).abs() < 16);
    }

    #[test]
    fn coordinates_are_clamped_to_the_block() {
        let vp = Viewport::new(64, 48, FRAC_PI_2);
        let cam = Camera::new(vec3(1000.0, 0.0, 0.0), 0.0, 0.0, FRAC_PI_2);
        let info = TexInfo::new(Vec3::X, Vec3::NEG_Y, 0);
        let g = TextureGradients::new(&cam, &vp, &info, &wall(), Vec3::ZERO, 1);
        let (s, t) = g.st_at(0.1, 0.0, 0.0);
        assert_eq!(s, g.bbextent_s);
        assert_eq!(g.bbextent_s, (64 << 16) - 1);
        assert!(t >= 0 && t <= g.bbextent_t);
    }
}
