//! Built-in level used by the viewer and the frame tests.
//!
//! Two box rooms sit in separate parts of the world. A window cut into the
//! far wall of each room is a portal onto the other one, placed so that
//! looking through room A's window shows room B straight ahead and B's own
//! window shows A again. The recursion stops wherever the portal budget
//! says. A stone pillar submodel stands in room A, partly in front of the
//! window.

use glam::Vec3;

use crate::world::{
    BspChild, Camera, Colormap, Contents, LeafId, Level, LevelBuilder, LevelError, Palette, Plane,
    PortalTransform, SHADE_LEVELS, SOLID_LEAF, SubmodelId, SurfaceId, TexInfo, TexInfoId, Texture,
    TextureBank, TextureError, TextureId,
};

pub const ROOM_HALF: f32 = 128.0;
pub const ROOM_HEIGHT: f32 = 128.0;

/// Centres (on the floor) of the two rooms.
pub const ROOM_A: Vec3 = Vec3::new(0.0, 0.0, 0.0);
pub const ROOM_B: Vec3 = Vec3::new(1024.0, 0.0, 256.0);

const WINDOW_HALF_W: f32 = 48.0;
const WINDOW_BOTTOM: f32 = 24.0;
const WINDOW_TOP: f32 = 104.0;

/// Where the pillar submodel is placed; its faces are built around (0, 0, 0).
pub const PILLAR_ORIGIN: Vec3 = Vec3::new(-40.0, 0.0, 40.0);
const PILLAR_HALF: f32 = 16.0;
const PILLAR_HEIGHT: f32 = 96.0;

pub const START_POS: Vec3 = Vec3::new(0.0, 56.0, -96.0);

#[derive(Debug, thiserror::Error)]
pub enum DemoError {
    #[error(transparent)]
    Level(#[from] LevelError),
    #[error(transparent)]
    Texture(#[from] TextureError),
}

/// Everything the viewer needs to start drawing.
pub struct Demo {
    pub level: Level,
    pub textures: TextureBank,
    pub camera: Camera,
    pub room_a: LeafId,
    pub room_b: LeafId,
    pub pillar: SubmodelId,
}

struct Materials {
    brick: TextureId,
    panel: TextureId,
    tiles: TextureId,
    stone: TextureId,
}

/// Build the level, its textures and a camera in room A looking at the
/// window, with horizontal field of view `fov`.
pub fn build(fov: f32) -> Result<Demo, DemoError> {
    let (textures, mat) = textures()?;
    let mut b = LevelBuilder::new("two rooms");

    let room_a = add_room(&mut b, ROOM_A, mat.brick, mat.tiles, 200)?;
    let room_b = add_room(&mut b, ROOM_B, mat.panel, mat.tiles, 150)?;
    let pillar = add_pillar(&mut b, mat.stone)?;

    let floor = room_a.walls[0].1[0];
    let (w, h) = b.face_lightmap_size(floor)?;
    b.set_face_lightmap(floor, &pool_of_light(w, h))?;

    let leaf_a = b.add_leaf(Contents::Empty, &room_a.faces());
    let leaf_b = b.add_leaf(Contents::Empty, &room_b.faces());
    b.set_visibility(leaf_a, &[leaf_a]);
    b.set_visibility(leaf_b, &[leaf_b]);

    let across = Vec3::Z * (2.0 * ROOM_HALF);
    b.add_portal(
        room_a.window,
        leaf_b,
        PortalTransform::translation(ROOM_B - ROOM_A - across),
    )?;
    b.add_portal(
        room_b.window,
        leaf_a,
        PortalTransform::translation(ROOM_A - ROOM_B - across),
    )?;

    let chain_a = wall_chain(&mut b, &room_a.walls, leaf_a)?;
    let chain_b = wall_chain(&mut b, &room_b.walls, leaf_b)?;
    let split = Plane::new(Vec3::X, (ROOM_A.x + ROOM_B.x) * 0.5);
    let root = b.add_node(split, chain_b, chain_a, &[])?;
    b.set_root(BspChild::Node(root));

    Ok(Demo {
        level: b.build()?,
        textures,
        camera: Camera::new(START_POS, 0.0, 0.0, fov),
        room_a: leaf_a,
        room_b: leaf_b,
        pillar,
    })
}

/*──────────────────────────── geometry ───────────────────────────────*/

type Quad = [Vec3; 4];

/// Faces of one room, grouped by the wall plane they lie on.
struct Room {
    walls: Vec<(Plane, Vec<SurfaceId>)>,
    window: SurfaceId,
}

impl Room {
    fn faces(&self) -> Vec<SurfaceId> {
        self.walls.iter().flat_map(|(_, f)| f.iter().copied()).collect()
    }
}

/// Inward-facing box around `centre` with a window in its +z wall.
fn add_room(
    b: &mut LevelBuilder,
    centre: Vec3,
    wall_tex: TextureId,
    floor_tex: TextureId,
    light: u8,
) -> Result<Room, LevelError> {
    let (x0, x1) = (centre.x - ROOM_HALF, centre.x + ROOM_HALF);
    let (z0, z1) = (centre.z - ROOM_HALF, centre.z + ROOM_HALF);
    let top = ROOM_HEIGHT;
    let along_x = b.add_texinfo(TexInfo::new(Vec3::X, Vec3::NEG_Y, wall_tex));
    let along_z = b.add_texinfo(TexInfo::new(Vec3::Z, Vec3::NEG_Y, wall_tex));
    let flat = b.add_texinfo(TexInfo::new(Vec3::X, Vec3::Z, floor_tex));

    let mut walls = vec![
        wall(b, Vec3::Y, &[y_rect(x0, x1, z0, z1, 0.0)], flat)?,
        wall(b, Vec3::NEG_Y, &[y_rect(x0, x1, z0, z1, top)], flat)?,
        wall(b, Vec3::X, &[x_rect(z0, z1, 0.0, top, x0)], along_z)?,
        wall(b, Vec3::NEG_X, &[x_rect(z0, z1, 0.0, top, x1)], along_z)?,
        wall(b, Vec3::Z, &[z_rect(x0, x1, 0.0, top, z0)], along_x)?,
    ];

    let (wx0, wx1) = (centre.x - WINDOW_HALF_W, centre.x + WINDOW_HALF_W);
    let frame = [
        z_rect(x0, wx0, 0.0, top, z1),
        z_rect(wx1, x1, 0.0, top, z1),
        z_rect(wx0, wx1, 0.0, WINDOW_BOTTOM, z1),
        z_rect(wx0, wx1, WINDOW_TOP, top, z1),
    ];
    let mut far = wall(b, Vec3::NEG_Z, &frame, along_x)?;
    let window = b.add_face(
        &facing(z_rect(wx0, wx1, WINDOW_BOTTOM, WINDOW_TOP, z1), Vec3::NEG_Z),
        along_x,
    )?;
    far.1.push(window);
    walls.push(far);

    for (_, faces) in &walls {
        for &f in faces {
            b.set_face_light(f, light)?;
        }
    }
    Ok(Room { walls, window })
}

/// Square stone column, open at the bottom, faces in model space.
fn add_pillar(b: &mut LevelBuilder, tex: TextureId) -> Result<SubmodelId, LevelError> {
    let r = PILLAR_HALF;
    let h = PILLAR_HEIGHT;
    let along_x = b.add_texinfo(TexInfo::new(Vec3::X, Vec3::NEG_Y, tex));
    let along_z = b.add_texinfo(TexInfo::new(Vec3::Z, Vec3::NEG_Y, tex));
    let flat = b.add_texinfo(TexInfo::new(Vec3::X, Vec3::Z, tex));

    let sides: [(Quad, Vec3, TexInfoId); 5] = [
        (z_rect(-r, r, 0.0, h, -r), Vec3::NEG_Z, along_x),
        (z_rect(-r, r, 0.0, h, r), Vec3::Z, along_x),
        (x_rect(-r, r, 0.0, h, -r), Vec3::NEG_X, along_z),
        (x_rect(-r, r, 0.0, h, r), Vec3::X, along_z),
        (y_rect(-r, r, -r, r, h), Vec3::Y, flat),
    ];
    let mut faces = Vec::with_capacity(sides.len());
    for (quad, normal, info) in sides {
        let f = b.add_face(&facing(quad, normal), info)?;
        b.set_face_light(f, 180)?;
        faces.push(f);
    }
    b.add_submodel(&faces, PILLAR_ORIGIN)
}

/// Convex room as a chain of nodes, one per wall: the inside is always in
/// front, solid behind.
fn wall_chain(
    b: &mut LevelBuilder,
    walls: &[(Plane, Vec<SurfaceId>)],
    leaf: LeafId,
) -> Result<BspChild, LevelError> {
    let mut child = BspChild::Leaf(leaf);
    for (plane, faces) in walls.iter().rev() {
        child = BspChild::Node(b.add_node(*plane, child, BspChild::Leaf(SOLID_LEAF), faces)?);
    }
    Ok(child)
}

/// Faces sharing one plane, which faces along `normal`.
fn wall(
    b: &mut LevelBuilder,
    normal: Vec3,
    quads: &[Quad],
    texinfo: TexInfoId,
) -> Result<(Plane, Vec<SurfaceId>), LevelError> {
    let faces = quads
        .iter()
        .map(|q| b.add_face(&facing(*q, normal), texinfo))
        .collect::<Result<Vec<_>, _>>()?;
    let dist = quads.first().map_or(0.0, |q| normal.dot(q[0]));
    Ok((Plane::new(normal, dist), faces))
}

/// Wind `quad` so that it faces along `normal`.
fn facing(quad: Quad, normal: Vec3) -> Quad {
    match Plane::from_points(quad[0], quad[1], quad[2]) {
        Some(p) if p.normal.dot(normal) < 0.0 => [quad[3], quad[2], quad[1], quad[0]],
        _ => quad,
    }
}

fn z_rect(x0: f32, x1: f32, y0: f32, y1: f32, z: f32) -> Quad {
    [
        Vec3::new(x0, y1, z),
        Vec3::new(x1, y1, z),
        Vec3::new(x1, y0, z),
        Vec3::new(x0, y0, z),
    ]
}

fn x_rect(z0: f32, z1: f32, y0: f32, y1: f32, x: f32) -> Quad {
    [
        Vec3::new(x, y1, z0),
        Vec3::new(x, y1, z1),
        Vec3::new(x, y0, z1),
        Vec3::new(x, y0, z0),
    ]
}

fn y_rect(x0: f32, x1: f32, z0: f32, z1: f32, y: f32) -> Quad {
    [
        Vec3::new(x0, y, z0),
        Vec3::new(x1, y, z0),
        Vec3::new(x1, y, z1),
        Vec3::new(x0, y, z1),
    ]
}

/// Bright in the middle of the grid, dimmer towards the corners.
fn pool_of_light(w: usize, h: usize) -> Vec<u8> {
    let (sx, sy) = ((w.max(2) - 1) as f32, (h.max(2) - 1) as f32);
    (0..h)
        .flat_map(|y| {
            (0..w).map(move |x| {
                let dx = x as f32 / sx - 0.5;
                let dy = y as f32 / sy - 0.5;
                let d = (dx * dx + dy * dy).sqrt() * std::f32::consts::SQRT_2;
                (255.0 - 170.0 * d.min(1.0)) as u8
            })
        })
        .collect()
}

/*──────────────────────────── textures ───────────────────────────────*/

/// Base colour of each 16-entry ramp; entry 15 of a ramp is the base itself.
const RAMPS: [u32; 16] = [
    0xC8C8C8, 0xB0482C, 0x8C6A44, 0x4868A8, 0x50A058, 0xC8A848, 0x8C4C90, 0x60A8A8,
    0xA07858, 0x687890, 0xD08040, 0x707050, 0x9098B0, 0xB05070, 0x58B088, 0xE0D8C0,
];

#[inline]
fn ramp(r: u8, shade: u8) -> u8 {
    (r << 4) | (shade & 15)
}

fn palette() -> Palette {
    let mut pal = Palette::default();
    for (i, c) in pal.0.iter_mut().enumerate() {
        let base = RAMPS[i >> 4];
        let k = (i & 15) as u32 + 1;
        let ch = |shift: u32| ((base >> shift) & 0xFF) * k / 16;
        *c = 0xFF00_0000 | ch(16) << 16 | ch(8) << 8 | ch(0);
    }
    pal
}

/// Row `n` darkens every ramp entry proportionally; row 0 is the identity.
fn colormap() -> Colormap {
    let mut map = Colormap::default();
    let last = (SHADE_LEVELS - 1) as u32;
    for (n, row) in map.0.iter_mut().enumerate() {
        for (i, out) in row.iter_mut().enumerate() {
            let shade = (i as u32 & 15) * (last - n as u32) / last;
            *out = ramp((i >> 4) as u8, shade as u8);
        }
    }
    map
}

fn pattern(
    name: &str,
    w: usize,
    h: usize,
    texel: impl Fn(usize, usize) -> u8,
) -> Result<Texture, TextureError> {
    let pixels = (0..h).flat_map(|y| (0..w).map(move |x| (x, y))).map(|(x, y)| texel(x, y));
    Texture::new(name, w, h, pixels.collect())
}

fn textures() -> Result<(TextureBank, Materials), TextureError> {
    let mut bank = TextureBank::default_with_checker();
    bank.set_palette(palette());
    bank.set_colormap(colormap());

    let brick = pattern("BRICK", 64, 32, |x, y| {
        let course = y / 16;
        if y % 16 == 0 || (x + course * 16) % 32 == 0 {
            ramp(0, 7)
        } else {
            ramp(1, 11 + ((x * 7 + y * 13) % 3) as u8)
        }
    })?;
    let panel = pattern("PANEL", 32, 32, |x, y| {
        let edge = x.min(y).min(31 - x).min(31 - y);
        match edge {
            0 => ramp(12, 4),
            1 => ramp(3, 14),
            _ => ramp(3, 10),
        }
    })?;
    let tiles = pattern("TILES", 64, 64, |x, y| {
        if x % 32 == 0 || y % 32 == 0 {
            ramp(11, 5)
        } else if (x / 32 + y / 32) % 2 == 0 {
            ramp(2, 12)
        } else {
            ramp(8, 10)
        }
    })?;
    let stone = pattern("STONE", 16, 16, |x, y| ramp(5, 9 + ((x + y) / 4 % 2) as u8 * 3))?;

    let mat = Materials {
        brick: bank.insert("BRICK", brick)?,
        panel: bank.insert("PANEL", panel)?,
        tiles: bank.insert("TILES", tiles)?,
        stone: bank.insert("STONE", stone)?,
    };
    Ok((bank, mat))
}

/*====================================================================*/
/*                                Tests                                */
/*====================================================================*/
