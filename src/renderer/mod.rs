//! Rendering abstraction layer.
//!
//! *The engine never touches a pixel buffer directly.* Once a pass has been
//! scanned it hands every surface's spans, one surface at a time, to a type
//! that implements [`Renderer`]. The scan already resolved visibility, so a
//! backend only has to fill the pixels it is given.
//!
//! * Textured spans go through [`Renderer::draw_surface`].
//! * The background and the flat debug mode go through
//!   [`Renderer::fill_spans`].
//! * Edge outlines go through [`Renderer::draw_line`]; the blanket
//!   [`RendererExt`] adds `outline_edges` so call-sites stay short.

use glam::Vec3;

use crate::engine::active_edge::AeEdge;
use crate::engine::portal::SpanMask;
use crate::engine::types::{Viewport, ZGradient};
use crate::world::{Camera, Level, SurfaceId, TextureBank, TextureError};

pub mod software;

pub use software::SurfaceCacheError;

/// Pixel format of the software frame-buffer (0xAARRGGBB).
pub type Rgba = u32;

/// Pixels `[x, x + count)` of row `y`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Span {
    pub x: i32,
    pub y: i32,
    pub count: i32,
}

/// Errors that abort a frame. Everything benign is skipped silently.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// A forced mip level the texture chain does not have.
    #[error("mip level {0} out of range")]
    MipOutOfRange(u8),

    #[error(transparent)]
    Texture(#[from] TextureError),

    #[error(transparent)]
    SurfaceCache(#[from] SurfaceCacheError),
}

/// Everything a backend needs to texture the spans of one surface.
#[derive(Clone, Copy, Debug)]
pub struct SurfaceDraw<'a> {
    pub level: &'a Level,
    pub surface: SurfaceId,
    pub spans: &'a [Span],
    /// `1/z` across the screen
    pub zi: ZGradient,
    pub camera: &'a Camera,
    pub viewport: &'a Viewport,
    /// submodel placement, zero for world surfaces
    pub origin: Vec3,
    /// depth of the closest emitted point, drives mip selection
    pub nearest_z: f32,
    pub mip_override: Option<u8>,
    pub lighting: bool,
}

/// A renderer that owns an internal scratch buffer for the whole frame.
///
/// `end_frame` hands the finished buffer to a user-supplied closure.
pub trait Renderer {
    /// (Re)allocate internal scratch for the requested resolution, clear
    /// colour to `clear` and depth to infinitely far.
    fn begin_frame(&mut self, width: usize, height: usize, clear: Rgba);

    /// Resize the surface cache to `pixels`; a change drops every block.
    fn set_surface_cache_size(&mut self, pixels: usize);

    /// Texture, light and write the spans of one surface. Depth is written,
    /// never tested.
    fn draw_surface(&mut self, job: &SurfaceDraw<'_>, bank: &TextureBank) -> Result<(), RenderError>;

    /// Fill spans with one colour, testing and writing depth per pixel.
    fn fill_spans(&mut self, spans: &[Span], zi: &ZGradient, color: Rgba);

    /// One-pixel line; with a mask only pixels inside it are touched.
    fn draw_line(&mut self, x0: i32, y0: i32, x1: i32, y1: i32, color: Rgba, mask: Option<&SpanMask>);

    /// Finish the frame and **loan** the finished buffer to `submit`.
    fn end_frame<F>(&mut self, submit: F)
    where
        F: FnOnce(&[Rgba], usize, usize);
}

/// Convenience blanket-impl for outlining projected edges.
pub trait RendererExt: Renderer {
    fn outline_edges(&mut self, edges: &[AeEdge], color: Rgba, mask: Option<&SpanMask>) {
        for e in edges {
            self.draw_line(
                e.from.x.round() as i32,
                e.from.y.round() as i32,
                e.to.x.round() as i32,
                e.to.y.round() as i32,
                color,
                mask,
            );
        }
    }
}
impl<T: Renderer + ?Sized> RendererExt for T {}
