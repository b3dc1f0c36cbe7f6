//! Runtime render settings.
//!
//! The library never reads the environment or the command line; the
//! viewer binary maps its flags onto [`RenderSettings`].

use crate::renderer::Rgba;

/// What the span pass puts on screen.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum RenderMode {
    /// Textured, lit spans.
    #[default]
    Both,
    /// Each surface's spans flat-filled with one colour; shows the span
    /// partition without texturing.
    SpansOnly,
    /// Only the emitted edges, as lines.
    EdgesOnly,
}

/// Limits for the portal queue, per frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PortalBudget {
    /// pending portal views; extra ones are dropped
    pub queue_capacity: usize,
    /// portal passes rendered in one frame
    pub max_renders: usize,
    /// nesting depth, the main view is depth 0
    pub max_depth: u32,
}

impl Default for PortalBudget {
    fn default() -> Self {
        Self {
            queue_capacity: 8,
            max_renders: 16,
            max_depth: 4,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RenderSettings {
    pub mode: RenderMode,
    /// draw emitted edges over whatever `mode` produced
    pub wireframe: bool,
    /// force one mip level for every surface
    pub mip_override: Option<u8>,
    /// apply lightmaps; off means full bright
    pub lighting: bool,
    /// surface cache size in pixels
    pub surface_cache_pixels: usize,
    pub portals: PortalBudget,
    /// colour of pixels no surface covers
    pub background: Rgba,
    pub edge_color: Rgba,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            mode: RenderMode::Both,
            wireframe: false,
            mip_override: None,
            lighting: true,
            surface_cache_pixels: 1 << 20,
            portals: PortalBudget::default(),
            background: 0xFF_202020,
            edge_color: 0xFF_FFFFFF,
        }
    }
}
