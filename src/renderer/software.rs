//! ---------------------------------------------------------------------------
//! Software (CPU) span renderer
//!
//! * Fills a `Vec<u32>` frame-buffer in **0xAARRGGBB** format and keeps a
//!   `1/z` depth buffer next to it.
//! * Relies on the scan converter to hand it non-overlapping spans, so
//!   textured spans write depth without testing it.
//! * Texels come from a per-(surface, mip) cache of lit blocks; the
//!   perspective divide is done once per 16-pixel stride.
//! ---------------------------------------------------------------------------

mod gradients;
mod renderer;
mod spans;
mod surface_cache;

pub use gradients::{TextureGradients, select_mip};
pub use renderer::Software;
pub use surface_cache::{CacheKey, CachedSurface, SurfaceCache, SurfaceCacheError, build_lit_block};
