// Format-agnostic repository of palettized textures and their mip chains.
// The renderer and world logic interact through `TextureId` only.

use std::collections::HashMap;

use std::ops::{Index, IndexMut};

/// Runtime handle for a texture in this bank.
///
/// *Guaranteed* to remain stable for the lifetime of the bank.
pub type TextureId = u16;

/// `TextureId` whose pixels are the checkerboard fallback.
/// Always = 0 because `TextureBank::new()` inserts it first.
pub const NO_TEXTURE: TextureId = 0;

/// Mip levels kept per texture, full size included.
pub const MIP_LEVELS: usize = 4;

/// Light levels in the colormap; row 0 is full bright.
pub const SHADE_LEVELS: usize = 32;

/// Borrowed view of one mip level.
#[derive(Clone, Copy, Debug)]
pub struct MipView<'a> {
    pub w: usize,
    pub h: usize,
    pub pixels: &'a [u8],
}

/// CPU-side storage: 8-bit palette indices in row-major order, with the
/// smaller mips derived on construction.
#[derive(Clone, Debug, PartialEq)]
pub struct Texture {
    pub name: String,
    pub w: usize,
    pub h: usize,
    pub pixels: Vec<u8>,
    /// mip 1 .. MIP_LEVELS-1
    mips: Vec<Vec<u8>>,
}

impl Texture {
    /// Build a texture and its mip chain by point sampling.
    ///
    /// Dimensions must be multiples of `1 << (MIP_LEVELS-1)`.
    pub fn new<S: Into<String>>(
        name: S,
        w: usize,
        h: usize,
        pixels: Vec<u8>,
    ) -> Result<Self, TextureError> {
        let name = name.into();
        let step = 1 << (MIP_LEVELS - 1);
        if w == 0 || h == 0 || w % step != 0 || h % step != 0 || pixels.len() != w * h {
            return Err(TextureError::BadSize { name, w, h });
        }
        Ok(Self::with_mips(name, w, h, pixels))
    }

    fn with_mips(name: String, w: usize, h: usize, pixels: Vec<u8>) -> Self {
        let mips = (1..MIP_LEVELS)
            .map(|level| {
                let (mw, mh) = (w >> level, h >> level);
                let mut out = Vec::with_capacity(mw * mh);
                for y in 0..mh {
                    for x in 0..mw {
                        out.push(pixels[(y << level) * w + (x << level)]);
                    }
                }
                out
            })
            .collect();
        Self {
            name,
            w,
            h,
            pixels,
            mips,
        }
    }

    /// Pixels of mip `level`; level 0 is the full-size image.
    pub fn mip(&self, level: usize) -> Option<MipView<'_>> {
        let pixels: &[u8] = match level {
            0 => &self.pixels,
            l if l < MIP_LEVELS => &self.mips[l - 1],
            _ => return None,
        };
        Some(MipView {
            w: self.w >> level,
            h: self.h >> level,
            pixels,
        })
    }
}

/// Convenience checkerboard 16×16 (dark/light grey).
impl Default for Texture {
    fn default() -> Self {
        const LIGHT_IDX: u8 = 8;
        const DARK_IDX: u8 = 16;
        let mut pix = vec![0u8; 16 * 16];
        for y in 0..16 {
            for x in 0..16 {
                pix[y * 16 + x] = if ((x >> 2) ^ (y >> 2)) & 1 == 0 {
                    LIGHT_IDX
                } else {
                    DARK_IDX
                };
            }
        }
        Texture::with_mips("CHECKER".into(), 16, 16, pix)
    }
}

/// Things that can go wrong when using the bank.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TextureError {
    /// Attempted to insert a second texture with an existing name.
    #[error("texture name `{0}` already present in bank")]
    Duplicate(String),

    /// Requested ID is outside `0 .. bank.len()`.
    #[error("texture id {0} out of range")]
    BadId(TextureId),

    /// Pixel buffer does not match the size, or the size cannot be mipped.
    #[error("texture `{name}` has unusable size {w}x{h}")]
    BadSize { name: String, w: usize, h: usize },
}

pub struct Palette(pub [u32; 256]);
impl Default for Palette {
    fn default() -> Self {
        Palette([0u32; 256])
    }
}
impl Index<usize> for Palette {
    type Output = u32;
    fn index(&self, idx: usize) -> &u32 {
        &self.0[idx]
    }
}
impl IndexMut<usize> for Palette {
    fn index_mut(&mut self, idx: usize) -> &mut u32 {
        &mut self.0[idx]
    }
}

/// `shade → palette index → palette index` remap tables.
pub struct Colormap(pub [[u8; 256]; SHADE_LEVELS]);
impl Default for Colormap {
    /// Identity in every row: lighting has no visible effect.
    fn default() -> Self {
        let mut row = [0u8; 256];
        for (i, v) in row.iter_mut().enumerate() {
            *v = i as u8;
        }
        Colormap([row; SHADE_LEVELS])
    }
}
impl Index<usize> for Colormap {
    type Output = [u8; 256];
    fn index(&self, idx: usize) -> &Self::Output {
        &self.0[idx]
    }
}
impl IndexMut<usize> for Colormap {
    fn index_mut(&mut self, idx: usize) -> &mut [u8; 256] {
        &mut self.0[idx]
    }
}

/// Map an 8-bit light value (255 = brightest) to a colormap row.
#[inline]
pub fn light_to_shade(light: u8) -> u8 {
    ((255 - light) >> 3).min(SHADE_LEVELS as u8 - 1)
}

/// A palette-agnostic, format-agnostic cache of textures.
///
/// * Does **not** know about level files or image formats.
/// * Stores exactly one copy of every name.
/// * ID **0** is always the “missing” checkerboard.
///
/// **Thread-safety:** access `TextureBank` from a single thread or wrap it
/// in `RwLock`; the struct itself is not `Sync`.
pub struct TextureBank {
    by_name: HashMap<String, TextureId>,
    data: Vec<Texture>,
    palette: Palette,
    colormap: Colormap,
}

impl TextureBank {
    // ---------------------------------------------------------------------
    // Constructors
    // ---------------------------------------------------------------------

    /// Create an empty bank with a mandatory *missing* texture used as
    /// fallback.  The texture is inserted under the fixed name `"MISSING"`
    /// and obtains the handle **0**.
    pub fn new(missing_tex: Texture) -> Self {
        let mut by_name = HashMap::new();
        by_name.insert("MISSING".into(), NO_TEXTURE);
        Self {
            by_name,
            data: vec![missing_tex],
            palette: Palette::default(),
            colormap: Colormap::default(),
        }
    }

    pub fn set_palette(&mut self, palette: Palette) {
        self.palette = palette;
    }

    pub fn set_colormap(&mut self, colormap: Colormap) {
        self.colormap = colormap;
    }

    #[inline]
    pub fn get_color(&self, shade_idx: u8, texel: u8) -> u32 {
        let pal_idx = self.colormap[shade_idx as usize][texel as usize];
        self.palette[pal_idx as usize]
    }

    pub fn default_with_checker() -> Self {
        Self::new(Texture::default())
    }

    // ---------------------------------------------------------------------
    // Query helpers
    // ---------------------------------------------------------------------

    /// Number of textures stored (including the “missing” one).
    pub fn len(&self) -> usize {
        self.data.len()
    }
    pub fn is_empty(&self) -> bool {
        self.data.len() == 1
    } // only checker

    /// Obtain the id for a *loaded* texture by name.
    pub fn id(&self, name: &str) -> Option<TextureId> {
        self.by_name.get(name).copied()
    }

    /// Fallback-safe query: unknown names resolve to the checkerboard id.
    pub fn id_or_missing(&self, name: &str) -> TextureId {
        self.id(name).unwrap_or(NO_TEXTURE)
    }

    /// Borrow a texture by id, with bounds-checking.
    pub fn texture(&self, id: TextureId) -> Result<&Texture, TextureError> {
        self.data.get(id as usize).ok_or(TextureError::BadId(id))
    }

    // ---------------------------------------------------------------------
    // Mutations
    // ---------------------------------------------------------------------

    /// Insert a texture under `name`.
    ///
    /// * Returns the newly assigned `TextureId`.
    /// * Fails if the name already exists (`Duplicate`).
    pub fn insert<S: Into<String>>(
        &mut self,
        name: S,
        tex: Texture,
    ) -> Result<TextureId, TextureError> {
        let name = name.into();
        if self.by_name.contains_key(&name) {
            return Err(TextureError::Duplicate(name));
        }
        let id = self.data.len() as TextureId;
        self.data.push(tex);
        self.by_name.insert(name, id);
        Ok(id)
    }
}

/*======================================================================*/
/*                               Tests                                  */
/*======================================================================*/
#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_tex(color: u8) -> Texture {
        Texture::new("Dummy", 8, 8, vec![color; 64]).unwrap()
    }

    #[test]
    fn insert_and_lookup() {
        let mut bank = TextureBank::default_with_checker();
        let red = bank.insert("RED", dummy_tex(0x00)).unwrap();
        let blue = bank.insert("BLUE", dummy_tex(0xFF)).unwrap();

        assert_ne!(red, NO_TEXTURE);
        assert_ne!(blue, red);
        assert_eq!(bank.id("RED"), Some(red));
        assert_eq!(bank.id_or_missing("NOPE"), NO_TEXTURE);

        assert_eq!(bank.texture(red).unwrap().pixels[0], 0x00);
        assert_eq!(bank.texture(blue).unwrap().pixels[0], 0xFF);
    }

    #[test]
    fn duplicate_name_rejected() {
        let mut bank = TextureBank::default_with_checker();
        bank.insert("WOOD", dummy_tex(1)).unwrap();
        let err = bank.insert("WOOD", dummy_tex(2)).unwrap_err();
        assert_eq!(err, TextureError::Duplicate("WOOD".into()));
        assert_eq!(bank.len(), 2);
    }

    #[test]
    fn bad_id_guard() {
        let bank = TextureBank::default_with_checker();
        let bad = TextureId::MAX;
        assert_eq!(bank.texture(bad).unwrap_err(), TextureError::BadId(bad));
    }

    #[test]
    fn mip_chain_point_samples() {
        let pixels: Vec<u8> = (0..64).collect();
        let tex = Texture::new("RAMP", 8, 8, pixels).unwrap();
        let m1 = tex.mip(1).unwrap();
        assert_eq!((m1.w, m1.h), (4, 4));
        assert_eq!(m1.pixels[1], 2);
        assert_eq!(m1.pixels[4], 16);
        let m3 = tex.mip(3).unwrap();
        assert_eq!((m3.w, m3.h, m3.pixels[0]), (1, 1, 0));
        assert!(tex.mip(MIP_LEVELS).is_none());
    }

    #[test]
    fn odd_sizes_rejected() {
        assert!(matches!(
            Texture::new("ODD", 12, 8, vec![0; 96]),
            Err(TextureError::BadSize { .. })
        ));
    }

    #[test]
    fn shade_ramp_ends() {
        assert_eq!(light_to_shade(255), 0);
        assert_eq!(light_to_shade(0), SHADE_LEVELS as u8 - 1);
    }
}
