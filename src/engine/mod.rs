//! Frame pipeline: visibility, edge emission, the scanline sweep and the
//! portal passes that feed a [`crate::renderer::Renderer`].

pub mod active_edge;
pub mod bsp;
mod clip;
pub mod config;
#[allow(clippy::module_inception)]
pub mod engine;
pub mod frustum;
pub mod portal;
mod scan;
pub mod types;

pub use config::{PortalBudget, RenderMode, RenderSettings};
pub use engine::{Engine, FrameStats, PassSummary};
pub use types::Viewport;
