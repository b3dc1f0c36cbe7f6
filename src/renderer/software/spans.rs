use crate::engine::types::ZGradient;
use crate::renderer::software::gradients::TextureGradients;
use crate::renderer::software::surface_cache::CachedSurface;
use crate::renderer::{Rgba, Span};

/// Pixels between two perspective-correct texture lookups.
const STRIDE: i32 = 16;

/// Frame and depth buffer of one frame, borrowed for span drawing.
pub(super) struct Target<'a> {
    pub pixels: &'a mut [Rgba],
    /// `1/z` per pixel, 0 = nothing drawn
    pub zbuffer: &'a mut [f32],
    pub width: usize,
}

/// Texture `spans` from a cached block. Depth is written, not tested.
pub(super) fn draw_textured(
    target: &mut Target<'_>,
    spans: &[Span],
    zi: &ZGradient,
    grads: &TextureGradients,
    block: CachedSurface<'_>,
) {
    for span in spans {
        let y = span.y as f32;
        let row = span.y as usize * target.width;
        let end = span.x + span.count;
        let mut x = span.x;
        let mut izi = zi.at(x as f32, y);
        let (mut s, mut t) = grads.st_at(izi, x as f32, y);

        // -------- one reciprocal per stride, linear inside ---------------
        while x < end {
            let n = (end - x).min(STRIDE);
            // full strides land on the next start, the tail on its last pixel
            let (next_x, steps) = if n == STRIDE { (x + n, n) } else { (x + n - 1, (n - 1).max(1)) };
            let (s_next, t_next) = grads.st_at(zi.at(next_x as f32, y), next_x as f32, y);
            let ds = (s_next - s) / steps;
            let dt = (t_next - t) / steps;

            for px in x..x + n {
                let idx = row + px as usize;
                let u = (s >> 16) as usize;
                let v = (t >> 16) as usize;
                target.pixels[idx] = block.pixels[v * block.width + u];
                target.zbuffer[idx] = izi;
                s += ds;
                t += dt;
                izi += zi.step_x;
            }

            s = s_next;
            t = t_next;
            x += n;
        }
    }
}

/// Fill `spans` with `color` wherever they are at least as near as what is
/// already there.
pub(super) fn fill_flat(target: &mut Target<'_>, spans: &[Span], zi: &ZGradient, color: Rgba) {
    for span in spans {
        let row = span.y as usize * target.width;
        let mut izi = zi.at(span.x as f32, span.y as f32);
        for px in span.x..span.x + span.count {
            let idx = row + px as usize;
            if izi >= target.zbuffer[idx] {
                target.pixels[idx] = color;
                target.zbuffer[idx] = izi;
            }
            izi += zi.step_x;
        }
    }
}
