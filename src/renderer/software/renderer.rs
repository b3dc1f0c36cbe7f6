use log::debug;

use crate::{
    engine::{portal::SpanMask, types::ZGradient},
    renderer::software::{
        gradients::{TextureGradients, select_mip},
        spans::{Target, draw_textured, fill_flat},
        surface_cache::{SurfaceCache, build_lit_block},
    },
    renderer::{RenderError, Renderer, Rgba, Span, SurfaceDraw},
    world::TextureBank,
};

#[derive(Default)]
pub struct Software {
    pub scratch: Vec<Rgba>,
    /// `1/z` per pixel, cleared to 0 (infinitely far)
    pub zbuffer: Vec<f32>,
    pub cache: SurfaceCache,

    pub width: usize,
    pub height: usize,
}

impl Software {
    #[inline]
    pub fn pixel(&self, x: usize, y: usize) -> Rgba {
        self.scratch[y * self.width + x]
    }

    #[inline]
    pub fn depth(&self, x: usize, y: usize) -> f32 {
        self.zbuffer[y * self.width + x]
    }

    fn target(&mut self) -> Target<'_> {
        Target {
            pixels: &mut self.scratch,
            zbuffer: &mut self.zbuffer,
            width: self.width,
        }
    }
}

impl Renderer for Software {
    fn begin_frame(&mut self, w: usize, h: usize, clear: Rgba) {
        if w != self.width || h != self.height {
            self.width = w;
            self.height = h;
            self.scratch.resize(w * h, 0);
            self.zbuffer.resize(w * h, 0.0);
        }
        self.scratch.fill(clear);
        self.zbuffer.fill(0.0);
    }

    fn set_surface_cache_size(&mut self, pixels: usize) {
        if self.cache.capacity() != pixels {
            debug!("surface cache: {} -> {pixels} pixels", self.cache.capacity());
            self.cache = SurfaceCache::new(pixels);
        }
    }

    fn draw_surface(&mut self, job: &SurfaceDraw<'_>, bank: &TextureBank) -> Result<(), RenderError> {
        let mip = select_mip(job.nearest_z, job.viewport, job.mip_override)?;
        let level = job.level;
        let surf = &level.surfaces[job.surface as usize];
        let info = &level.texinfos[surf.texinfo as usize];
        let key = (job.surface, mip as u8);

        // ─── (re)build the lit block if missing or stale ───
        if !self.cache.is_in_cache(key, job.lighting) {
            let tex = bank.texture(info.texture)?;
            let w = (surf.extents[0] >> mip) as usize;
            let h = (surf.extents[1] >> mip) as usize;
            let block = self.cache.alloc(key, w, h, job.lighting)?;
            build_lit_block(block, level, surf, tex, mip, bank, job.lighting);
        }
        let Some(block) = self.cache.get_cached_data(key) else {
            return Ok(());
        };

        let grads = TextureGradients::new(job.camera, job.viewport, info, surf, job.origin, mip);
        let mut target = Target {
            pixels: &mut self.scratch,
            zbuffer: &mut self.zbuffer,
            width: self.width,
        };
        draw_textured(&mut target, job.spans, &job.zi, &grads, block);
        Ok(())
    }

    fn fill_spans(&mut self, spans: &[Span], zi: &ZGradient, color: Rgba) {
        fill_flat(&mut self.target(), spans, zi, color);
    }

    fn draw_line(&mut self, x0: i32, y0: i32, x1: i32, y1: i32, col: Rgba, mask: Option<&SpanMask>) {
        let mut x0 = x0;
        let mut y0 = y0;
        let dx = (x1 - x0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let dy = -(y1 - y0).abs();
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;
        loop {
            let on_screen =
                (0..self.width as i32).contains(&x0) && (0..self.height as i32).contains(&y0);
            if on_screen && mask.is_none_or(|m| m.contains(x0, y0)) {
                self.scratch[y0 as usize * self.width + x0 as usize] = col;
            }
            if x0 == x1 && y0 == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x0 += sx;
            }
            if e2 <= dx {
                err += dx;
                y0 += sy;
            }
        }
    }

    fn end_frame<F>(&mut self, submit: F)
    where
        F: FnOnce(&[Rgba], usize, usize),
    {
        submit(&self.scratch, self.width, self.height);
    }
}
