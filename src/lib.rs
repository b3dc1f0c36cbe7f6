//! Quake-style software renderer: BSP and PVS walk, active-edge scan
//! conversion, surface-cached spans and portal views.

pub mod engine;
pub mod renderer;
pub mod world;
