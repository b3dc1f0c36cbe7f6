//! Lit texture blocks, one per (surface, mip), in a fixed-size ring.
//!
//! Allocation walks a rover around the arena; whatever older blocks the new
//! one overlaps are evicted. Blocks remember whether they were built with
//! lighting, so flipping the toggle rebuilds them lazily.

use std::collections::HashMap;

use log::trace;

use crate::renderer::Rgba;
use crate::world::{Level, MipView, Surface, SurfaceId, Texture, TextureBank, light_to_shade};

/// Texels per lightmap sample along each axis, at mip 0.
const LIGHT_BLOCK: usize = 16;

pub type CacheKey = (SurfaceId, u8);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SurfaceCacheError {
    #[error("surface block of {requested} pixels does not fit a {capacity} pixel cache")]
    TooLarge { requested: usize, capacity: usize },
}

#[derive(Clone, Copy, Debug)]
struct Block {
    offset: usize,
    width: usize,
    height: usize,
    lit: bool,
}

impl Block {
    #[inline]
    fn end(&self) -> usize {
        self.offset + self.width * self.height
    }
}

/// Borrowed view of one cached block.
#[derive(Clone, Copy, Debug)]
pub struct CachedSurface<'a> {
    pub width: usize,
    pub height: usize,
    pub pixels: &'a [Rgba],
}

#[derive(Debug)]
pub struct SurfaceCache {
    data: Vec<Rgba>,
    blocks: HashMap<CacheKey, Block>,
    rover: usize,
}

impl Default for SurfaceCache {
    fn default() -> Self {
        Self::new(1 << 20)
    }
}

impl SurfaceCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity],
            blocks: HashMap::new(),
            rover: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn clear(&mut self) {
        self.blocks.clear();
        self.rover = 0;
    }

    /// `true` if `key` holds a block built with the same lighting setting.
    pub fn is_in_cache(&self, key: CacheKey, lit: bool) -> bool {
        self.blocks.get(&key).is_some_and(|b| b.lit == lit)
    }

    pub fn get_cached_data(&self, key: CacheKey) -> Option<CachedSurface<'_>> {
        let b = self.blocks.get(&key)?;
        Some(CachedSurface {
            width: b.width,
            height: b.height,
            pixels: &self.data[b.offset..b.end()],
        })
    }

    /// Reserve a `width × height` block for `key` and return it for filling.
    pub fn alloc(
        &mut self,
        key: CacheKey,
        width: usize,
        height: usize,
        lit: bool,
    ) -> Result<&mut [Rgba], SurfaceCacheError> {
        let size = width * height;
        if size > self.capacity() {
            return Err(SurfaceCacheError::TooLarge {
                requested: size,
                capacity: self.capacity(),
            });
        }
        if self.rover + size > self.capacity() {
            self.rover = 0;
        }
        let (start, end) = (self.rover, self.rover + size);

        self.blocks.remove(&key);
        let before = self.blocks.len();
        self.blocks
            .retain(|_, b| b.end() <= start || b.offset >= end || b.width * b.height == 0);
        let evicted = before - self.blocks.len();
        if evicted > 0 {
            trace!("surface cache: {evicted} blocks evicted for {key:?}");
        }

        self.blocks.insert(
            key,
            Block {
                offset: start,
                width,
                height,
                lit,
            },
        );
        self.rover = end;
        Ok(&mut self.data[start..end])
    }
}

/// Fill `out` with the lit texels of `surface` at `mip`.
///
/// Texels wrap around the texture; light comes from the surface lightmap,
/// interpolated bilinearly between samples every 16 texels, or from the
/// surface's flat level when it has none. `lighting == false` means every
/// texel is drawn full bright.
pub fn build_lit_block(
    out: &mut [Rgba],
    level: &Level,
    surface: &Surface,
    texture: &Texture,
    mip: usize,
    bank: &TextureBank,
    lighting: bool,
) {
    let Some(tex) = texture.mip(mip) else {
        return;
    };
    let width = (surface.extents[0] >> mip) as usize;
    let height = (surface.extents[1] >> mip) as usize;
    let s0 = surface.texture_mins[0] >> mip;
    let t0 = surface.texture_mins[1] >> mip;
    let light = LightSampler::new(level, surface, mip, lighting);

    for (y, row) in out.chunks_exact_mut(width.max(1)).take(height).enumerate() {
        let ty = (t0 + y as i32).rem_euclid(tex.h as i32) as usize;
        for (x, px) in row.iter_mut().enumerate() {
            let tx = (s0 + x as i32).rem_euclid(tex.w as i32) as usize;
            *px = bank.get_color(light.shade(x, y), texel(&tex, tx, ty));
        }
    }
}

#[inline(always)]
fn texel(tex: &MipView<'_>, x: usize, y: usize) -> u8 {
    tex.pixels[y * tex.w + x]
}

/// Light level lookup across one block.
struct LightSampler<'a> {
    samples: Option<&'a [u8]>,
    grid_w: usize,
    grid_h: usize,
    /// block pixels per lightmap sample
    step: f32,
    flat: u8,
    lighting: bool,
}

impl<'a> LightSampler<'a> {
    fn new(level: &'a Level, surface: &Surface, mip: usize, lighting: bool) -> Self {
        let (grid_w, grid_h) = surface.lightmap_size();
        let samples = surface
            .lightmap
            .and_then(|off| level.lightdata.get(off..off + grid_w * grid_h));
        Self {
            samples,
            grid_w,
            grid_h,
            step: (LIGHT_BLOCK >> mip) as f32,
            flat: surface.light,
            lighting,
        }
    }

    fn shade(&self, x: usize, y: usize) -> u8 {
        if !self.lighting {
            return 0;
        }
        let Some(samples) = self.samples else {
            return light_to_shade(self.flat);
        };
        let fx = x as f32 / self.step;
        let fy = y as f32 / self.step;
        let (ix, iy) = (fx as usize, fy as usize);
        let (ax, ay) = (fx - ix as f32, fy - iy as f32);
        let at = |gx: usize, gy: usize| {
            samples[gy.min(self.grid_h - 1) * self.grid_w + gx.min(self.grid_w - 1)] as f32
        };
        let top = at(ix, iy) * (1.0 - ax) + at(ix + 1, iy) * ax;
        let bottom = at(ix, iy + 1) * (1.0 - ax) + at(ix + 1, iy + 1) * ax;
        light_to_shade((top * (1.0 - ay) + bottom * ay).round() as u8)
    }
}

/*──────────────────────────────── Tests ───────────────────────────────*/
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_and_lookup() {
        let mut c = SurfaceCache::new(64);
        c.alloc((3, 0), 4, 4, true).unwrap().fill(7);
        assert!(c.is_in_cache((3, 0), true));
        assert!(!c.is_in_cache((3, 0), false));
        assert!(!c.is_in_cache((3, 1), true));
        let d = c.get_cached_data((3, 0)).unwrap();
        assert_eq!((d.width, d.height), (4, 4));
        assert!(d.pixels.iter().all(|&p| p == 7));
    }

    #[test]
    fn wrapping_evicts_oldest_overlap() {
        let mut c = SurfaceCache::new(64);
        c.alloc((0, 0), 8, 4, true).unwrap();
        c.alloc((1, 0), 8, 3, true).unwrap();
        // 32 + 24 used, 8 left; a 16 pixel block wraps to the start
        c.alloc((2, 0), 4, 4, true).unwrap();
        assert!(c.get_cached_data((0, 0)).is_none());
        assert!(c.get_cached_data((1, 0)).is_some());
        assert!(c.get_cached_data((2, 0)).is_some());
        assert_eq!(c.len(), 2);
    }

    #[test]
    fn realloc_replaces_the_old_block() {
        let mut c = SurfaceCache::new(64);
        c.alloc((0, 0), 4, 4, true).unwrap();
        c.alloc((0, 0), 4, 4, false).unwrap();
        assert_eq!(c.len(), 1);
        assert!(c.is_in_cache((0, 0), false));
    }

    #[test]
    fn too_large_is_an_error() {
        let mut c = SurfaceCache::new(64);
        assert_eq!(
            c.alloc((0, 0), 16, 16, true).unwrap_err(),
            SurfaceCacheError::TooLarge {
                requested: 256,
                capacity: 64
            }
        );
    }
}
