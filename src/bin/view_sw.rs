//! Walk around the built-in two-room level with the software renderer.
//!
//! ```bash
//! cargo run --release -- --width 960 --height 600 --mode both
//! ```
//!
//! Arrows / WASD move and turn, PgUp/PgDn look up and down, Q/E rise and
//! sink. `1` `2` `3` switch between textured, span and edge display, `F`
//! toggles the wireframe overlay, `L` lighting, `M` cycles forced mips.

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use minifb::{Key, KeyRepeat, Window, WindowOptions};
use std::time::{Duration, Instant};

use yaquake_rs::{
    engine::{Engine, RenderMode, RenderSettings},
    renderer::software::Software,
    world::{MIP_LEVELS, demo},
};

const MOVE_SPEED: f32 = 4.0;
const TURN_SPEED: f32 = 0.04;

/// Software-rendered walk through two rooms joined by portals
#[derive(Parser, Debug)]
#[command(name = "view_sw", version)]
struct Args {
    #[arg(long, default_value_t = 960)]
    width: usize,

    #[arg(long, default_value_t = 600)]
    height: usize,

    /// Horizontal field of view in degrees
    #[arg(long, default_value_t = 90.0)]
    fov: f32,

    #[arg(long, value_enum, default_value_t = RenderMode::Both)]
    mode: RenderMode,

    /// Draw emitted edges on top of the spans
    #[arg(long)]
    wireframe: bool,

    /// Force one mip level on every surface
    #[arg(long)]
    mip: Option<u8>,

    /// Draw every surface full bright
    #[arg(long)]
    no_lighting: bool,

    /// Surface cache size in pixels
    #[arg(long)]
    cache_pixels: Option<usize>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(args.log.as_str()))
        .format_timestamp_millis()
        .init();

    let demo = demo::build(args.fov.to_radians()).context("building the demo level")?;
    info!(
        "level `{}`: {} surfaces, {} leaves, {} portals",
        demo.level.name,
        demo.level.surfaces.len(),
        demo.level.leaves.len(),
        demo.level.portals.len()
    );

    let defaults = RenderSettings::default();
    let settings = RenderSettings {
        mode: args.mode,
        wireframe: args.wireframe,
        mip_override: args.mip,
        lighting: !args.no_lighting,
        surface_cache_pixels: args.cache_pixels.unwrap_or(defaults.surface_cache_pixels),
        ..defaults
    };

    let mut engine = Engine::new(
        Software::default(),
        demo.level,
        demo.camera,
        demo.textures,
        args.width,
        args.height,
    );
    engine.settings = settings;

    let mut win = Window::new("yaquake software", args.width, args.height, WindowOptions::default())?;
    win.set_target_fps(60);

    // ─────────── benchmarking state ───────────
    let mut acc_time = Duration::ZERO;
    let mut acc_frames = 0usize;
    let mut last_print = Instant::now();

    while win.is_open() && !win.is_key_down(Key::Escape) {
        let t0 = Instant::now();
        handle_input(&win, &mut engine);

        let mut present = Ok(());
        let stats = engine.render_frame(|fb, w, h| {
            present = win.update_with_buffer(fb, w, h);
        })?;
        present?;

        acc_time += t0.elapsed();
        acc_frames += 1;
        if last_print.elapsed() >= Duration::from_secs(3) {
            let avg_ms = acc_time.as_secs_f64() * 1000.0 / acc_frames as f64;
            info!(
                "avg render: {:.2} ms ({:.1} FPS), {} passes, {} spans",
                avg_ms,
                1000.0 / avg_ms,
                stats.passes,
                stats.spans
            );
            acc_time = Duration::ZERO;
            acc_frames = 0;
            last_print = Instant::now();
        }
    }
    Ok(())
}

fn handle_input(win: &Window, engine: &mut Engine<Software>) {
    let cam = &mut engine.camera;
    let down = |k: Key| win.is_key_down(k);

    /* movement ----------------------------------------------------------- */
    if down(Key::Up) || down(Key::W) {
        cam.step(MOVE_SPEED, 0.0);
    }
    if down(Key::Down) || down(Key::S) {
        cam.step(-MOVE_SPEED, 0.0);
    }
    if down(Key::A) {
        cam.step(0.0, -MOVE_SPEED);
    }
    if down(Key::D) {
        cam.step(0.0, MOVE_SPEED);
    }
    if down(Key::Left) {
        cam.turn(TURN_SPEED);
    }
    if down(Key::Right) {
        cam.turn(-TURN_SPEED);
    }
    if down(Key::PageUp) {
        cam.look(TURN_SPEED);
    }
    if down(Key::PageDown) {
        cam.look(-TURN_SPEED);
    }
    if down(Key::Q) {
        cam.rise(MOVE_SPEED);
    }
    if down(Key::E) {
        cam.rise(-MOVE_SPEED);
    }

    /* display toggles ---------------------------------------------------- */
    let pressed = |k: Key| win.is_key_pressed(k, KeyRepeat::No);
    let settings = &mut engine.settings;
    for (key, mode) in [
        (Key::Key1, RenderMode::Both),
        (Key::Key2, RenderMode::SpansOnly),
        (Key::Key3, RenderMode::EdgesOnly),
    ] {
        if pressed(key) {
            settings.mode = mode;
            info!("mode: {mode:?}");
        }
    }
    if pressed(Key::F) {
        settings.wireframe = !settings.wireframe;
    }
    if pressed(Key::L) {
        settings.lighting = !settings.lighting;
        info!("lighting: {}", settings.lighting);
    }
    if pressed(Key::M) {
        settings.mip_override = match settings.mip_override {
            None => Some(0),
            Some(m) if (m as usize) + 1 < MIP_LEVELS => Some(m + 1),
            Some(_) => None,
        };
        info!("mip override: {:?}", settings.mip_override);
    }
}
