// Whole-frame scenarios: build a level, render through the engine and look
// at the spans, edges and pixels that come out.

use std::collections::BTreeMap;
use std::f32::consts::FRAC_PI_2;

use glam::{Vec3, vec3};
use yaquake_rs::engine::active_edge::{ActiveEdgeContext, BACKGROUND};
use yaquake_rs::engine::{Engine, RenderMode, RenderSettings};
use yaquake_rs::renderer::Rgba;
use yaquake_rs::renderer::software::Software;
use yaquake_rs::world::demo::{self, Demo};
use yaquake_rs::world::{
    BspChild, Camera, Contents, Level, LevelBuilder, Plane, SOLID_LEAF, SurfaceId, TexInfo,
    TextureBank,
};

const W: usize = 320;
const H: usize = 200;

/// Quads at z = 10 facing the origin, all in one leaf.
fn quads_level(quads: &[(f32, f32, f32, f32)]) -> Level {
    let mut b = LevelBuilder::new("quads");
    let tex = b.add_texinfo(TexInfo::new(Vec3::X, Vec3::NEG_Y, 0));
    let faces: Vec<SurfaceId> = quads
        .iter()
        .map(|&(x0, x1, y0, y1)| {
            b.add_face(
                &[
                    vec3(x0, y1, 10.0),
                    vec3(x1, y1, 10.0),
                    vec3(x1, y0, 10.0),
                    vec3(x0, y0, 10.0),
                ],
                tex,
            )
            .unwrap()
        })
        .collect();
    let leaf = b.add_leaf(Contents::Empty, &faces);
    let node = b
        .add_node(
            Plane::new(Vec3::NEG_Z, -10.0),
            BspChild::Leaf(leaf),
            BspChild::Leaf(SOLID_LEAF),
            &faces,
        )
        .unwrap();
    b.set_root(BspChild::Node(node));
    b.build().unwrap()
}

fn quads_engine(quads: &[(f32, f32, f32, f32)]) -> Engine<Software> {
    let mut e = Engine::new(
        Software::default(),
        quads_level(quads),
        Camera::new(Vec3::ZERO, 0.0, 0.0, FRAC_PI_2),
        TextureBank::default_with_checker(),
        64,
        48,
    );
    e.settings.mode = RenderMode::SpansOnly;
    e
}

fn demo_engine(settings: RenderSettings) -> Engine<Software> {
    let Demo {
        level,
        textures,
        camera,
        ..
    } = demo::build(FRAC_PI_2).unwrap();
    let mut e = Engine::new(Software::default(), level, camera, textures, W, H);
    e.settings = settings;
    e
}

fn no_portals() -> RenderSettings {
    let mut s = RenderSettings::default();
    s.portals.max_depth = 0;
    s
}

fn frame(e: &mut Engine<Software>) -> Vec<Rgba> {
    let mut out = Vec::new();
    e.render_frame(|fb, _, _| out = fb.to_vec()).unwrap();
    out
}

/// Slot of the arena surface drawn for level surface `source`.
fn slot_of(ae: &ActiveEdgeContext, source: SurfaceId) -> u32 {
    ae.surfaces()
        .iter()
        .position(|s| s.source == Some(source))
        .unwrap() as u32
}

/// Every span in the arena, per row, as sorted `(x, count, slot)`.
fn spans_by_row(ae: &ActiveEdgeContext) -> BTreeMap<i32, Vec<(i32, i32, u32)>> {
    let mut rows: BTreeMap<i32, Vec<(i32, i32, u32)>> = BTreeMap::new();
    for slot in 0..ae.surfaces().len() as u32 {
        for s in ae.spans(slot).filter(|s| s.count > 0) {
            rows.entry(s.y).or_default().push((s.x, s.count, slot));
        }
    }
    for r in rows.values_mut() {
        r.sort_unstable();
    }
    rows
}

#[test]
fn single_quad_gives_one_span_per_row() {
    let mut e = quads_engine(&[(-5.0, 5.0, -5.0, 5.0)]);
    let stats = e.render_frame(|_, _, _| {}).unwrap();
    assert_eq!(stats.surfaces, 1);
    assert_eq!(stats.edges, 2);

    let ae = e.active_edges();
    let quad = slot_of(ae, 0);
    let spans: Vec<_> = ae.spans(quad).collect();
    let mut rows: Vec<i32> = spans.iter().map(|s| s.y).collect();
    rows.sort_unstable();
    rows.dedup();
    assert_eq!(rows.len(), spans.len(), "a row got two spans");
    assert!((30..=34).contains(&rows.len()));
    assert!(rows.windows(2).all(|w| w[1] == w[0] + 1));

    let first = spans[0];
    assert!(spans.iter().all(|s| s.x == first.x && s.count == first.count));
    assert!((15..=17).contains(&first.x));
}

#[test]
fn abutting_quads_share_their_common_edge() {
    let mut e = quads_engine(&[(-5.0, 0.0, -5.0, 5.0), (0.0, 5.0, -5.0, 5.0)]);
    let stats = e.render_frame(|_, _, _| {}).unwrap();
    assert_eq!(stats.surfaces, 2);
    assert_eq!(stats.cached_edge_hits, 1);
    assert_eq!(stats.edges, 3);

    let ae = e.active_edges();
    let (left, right) = (slot_of(ae, 0), slot_of(ae, 1));
    let shared = ae
        .emitted_edges()
        .iter()
        .find(|edge| edge.trailing.is_some() && edge.leading.is_some())
        .unwrap();
    assert_eq!(shared.trailing, Some(left));
    assert_eq!(shared.leading, Some(right));

    // no crack and no overdraw along the shared edge
    let right_rows: BTreeMap<i32, (i32, i32)> =
        ae.spans(right).map(|s| (s.y, (s.x, s.count))).collect();
    assert!(!right_rows.is_empty());
    for s in ae.spans(left) {
        let (x, _) = right_rows[&s.y];
        assert_eq!(s.x + s.count, x);
    }
}

#[test]
fn spans_partition_every_row() {
    let mut e = demo_engine(no_portals());
    let stats = e.render_frame(|_, _, _| {}).unwrap();
    assert_eq!(stats.passes, 1);
    assert!(stats.fragments > 0, "pillar was not drawn");

    let rows = spans_by_row(e.active_edges());
    assert_eq!(rows.len(), H);
    for (y, spans) in rows {
        let mut x = 0;
        for (sx, count, _) in spans {
            assert_eq!(sx, x, "gap or overlap on row {y}");
            x += count;
        }
        assert_eq!(x, W as i32, "row {y} not covered");
    }
}

#[test]
fn pillar_sorts_in_front_of_the_walls_around_it() {
    let mut e = demo_engine(no_portals());
    e.render_frame(|_, _, _| {}).unwrap();
    let ae = e.active_edges();
    let sub = &e.level.submodels[0];
    let pillar = sub.first_surface..sub.first_surface + sub.num_surfaces;

    let fragments: Vec<_> = ae.surfaces().iter().filter(|s| s.in_submodel).collect();
    assert!(!fragments.is_empty());
    for f in &fragments {
        assert!(f.source.is_some_and(|s| pillar.contains(&s)));
    }
    let key = fragments[0].key;
    for s in ae.surfaces().iter().skip(BACKGROUND as usize + 1) {
        if !s.in_submodel {
            assert!(s.key > key, "world surface key {} not behind {key}", s.key);
        }
    }
}

#[test]
fn same_frame_twice_is_identical() {
    let mut e = demo_engine(RenderSettings::default());
    let first = frame(&mut e);
    let first_spans = spans_by_row(e.active_edges());
    let first_keys: Vec<_> = e.active_edges().surfaces().iter().map(|s| (s.source, s.key)).collect();
    let first_passes = e.last_passes().to_vec();

    let second = frame(&mut e);
    assert!(first == second, "frame buffer changed between identical frames");
    assert_eq!(spans_by_row(e.active_edges()), first_spans);
    let second_keys: Vec<_> = e.active_edges().surfaces().iter().map(|s| (s.source, s.key)).collect();
    assert_eq!(second_keys, first_keys);
    assert_eq!(e.last_passes(), first_passes.as_slice());
}

#[test]
fn portal_chain_stops_at_the_depth_limit() {
    let mut e = demo_engine(RenderSettings::default());
    let stats = e.render_frame(|_, _, _| {}).unwrap();
    let max_depth = e.settings.portals.max_depth as usize;
    assert_eq!(stats.passes, max_depth + 1);
    assert_eq!(stats.portal_passes, max_depth);
    assert_eq!(stats.portals_dropped, 1);

    let depths: Vec<u32> = e.last_passes().iter().map(|p| p.depth).collect();
    assert_eq!(depths, (0..=max_depth as u32).collect::<Vec<_>>());
    let portals: Vec<_> = e.last_passes().iter().map(|p| p.portal).collect();
    let expected: [Option<u32>; 3] = [None, Some(0), Some(1)];
    assert_eq!(portals[..3], expected);
}

#[test]
fn occluded_portal_is_not_scheduled() {
    let mut e = demo_engine(RenderSettings::default());
    e.render_frame(|_, _, _| {}).unwrap();
    assert_eq!(e.last_passes()[0].eligible, vec![0]);

    // right behind the pillar, which then fills the screen
    e.camera = Camera::new(demo::PILLAR_ORIGIN + vec3(0.0, 56.0, -20.0), 0.0, 0.0, FRAC_PI_2);
    let stats = e.render_frame(|_, _, _| {}).unwrap();
    assert_eq!(stats.passes, 1);
    assert!(e.last_passes()[0].eligible.is_empty());
    assert!(e.last_passes()[0].surfaces > 0);
}

#[test]
fn portal_pass_only_writes_inside_the_window() {
    let mut e = demo_engine(no_portals());
    let closed = frame(&mut e);
    let window = slot_of(e.active_edges(), e.level.portals[0].surface);
    let mut inside = vec![false; W * H];
    for s in e.active_edges().spans(window) {
        for x in s.x..s.x + s.count {
            inside[s.y as usize * W + x as usize] = true;
        }
    }
    let mask_pixels = inside.iter().filter(|&&i| i).count();
    assert!(mask_pixels > 100);

    let background = e.settings.background;
    for (i, &p) in closed.iter().enumerate() {
        if inside[i] {
            assert_eq!(p, background, "unrendered window must keep the clear colour");
        }
    }

    e.settings = RenderSettings::default();
    let open = frame(&mut e);
    let mut filled = 0;
    for i in 0..W * H {
        if inside[i] {
            filled += (open[i] != background) as usize;
        } else {
            assert_eq!(open[i], closed[i], "portal pass wrote outside its mask at {i}");
        }
    }
    assert!(filled * 2 > mask_pixels, "only {filled} of {mask_pixels} window pixels drawn");
}

#[test]
fn edges_only_mode_draws_no_spans() {
    let mut e = demo_engine(RenderSettings {
        mode: RenderMode::EdgesOnly,
        ..no_portals()
    });
    let edge_color = e.settings.edge_color;
    let background = e.settings.background;
    let fb = frame(&mut e);
    assert!(fb.iter().any(|&p| p == edge_color));
    assert!(fb.iter().all(|&p| p == edge_color || p == background));
}
