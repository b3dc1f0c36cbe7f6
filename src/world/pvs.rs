//! Potentially visible sets.
//!
//! Each non-solid leaf owns one row of run-length compressed bits in
//! `Level::visdata`. Bit *i* of a row stands for leaf *i + 1*, the solid
//! leaf 0 never gets a bit. A zero byte in the stream is followed by the
//! number of zero bytes it expands to; every other byte is copied as is.

use log::warn;

use crate::world::geometry::{LeafId, Level};

/// Fixed-capacity bit set with one bit per vis leaf.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeafVisibleSet {
    bits: Vec<u8>,
    num_leaves: usize,
}

impl LeafVisibleSet {
    /// Empty set sized for `num_leaves` vis leaves.
    pub fn new(num_leaves: usize) -> Self {
        Self {
            bits: vec![0; row_bytes(num_leaves)],
            num_leaves,
        }
    }

    #[inline]
    pub fn num_leaves(&self) -> usize {
        self.num_leaves
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    /// Marks every leaf visible (levels without vis data).
    pub fn fill(&mut self) {
        self.bits.fill(0xFF);
        self.trim_tail();
    }

    pub fn clear(&mut self) {
        self.bits.fill(0);
    }

    /// `leaf` counts from 1; the solid leaf is never visible.
    #[inline]
    pub fn contains(&self, leaf: LeafId) -> bool {
        let Some(bit) = (leaf as usize).checked_sub(1) else {
            return false;
        };
        bit < self.num_leaves && self.bits[bit >> 3] & (1 << (bit & 7)) != 0
    }

    pub fn insert(&mut self, leaf: LeafId) {
        if let Some(bit) = (leaf as usize).checked_sub(1) {
            if bit < self.num_leaves {
                self.bits[bit >> 3] |= 1 << (bit & 7);
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = LeafId> + '_ {
        (1..=self.num_leaves as LeafId).filter(|&l| self.contains(l))
    }

    pub fn count(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }

    fn trim_tail(&mut self) {
        let spare = self.bits.len() * 8 - self.num_leaves;
        if spare > 0 {
            if let Some(last) = self.bits.last_mut() {
                *last &= 0xFF >> spare;
            }
        }
    }
}

#[inline]
pub fn row_bytes(num_leaves: usize) -> usize {
    num_leaves.div_ceil(8)
}

/// Expand one compressed row into `dest`.
///
/// Returns the number of compressed bytes consumed. A stream that ends
/// early leaves the rest of `dest` zeroed.
pub fn decompress_row(data: &[u8], dest: &mut [u8]) -> usize {
    dest.fill(0);
    let mut src = 0;
    let mut out = 0;
    while out < dest.len() {
        let Some(&byte) = data.get(src) else {
            warn!("pvs row truncated after {out} of {} bytes", dest.len());
            break;
        };
        src += 1;
        if byte != 0 {
            dest[out] = byte;
            out += 1;
            continue;
        }
        let Some(&run) = data.get(src) else {
            warn!("pvs zero run without a count");
            break;
        };
        src += 1;
        out = (out + run as usize).min(dest.len());
    }
    src
}

/// Inverse of [`decompress_row`], used by the level builder.
pub fn compress_row(row: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(row.len());
    let mut i = 0;
    while i < row.len() {
        if row[i] != 0 {
            out.push(row[i]);
            i += 1;
            continue;
        }
        let mut run = 0u8;
        while i < row.len() && row[i] == 0 && run < u8::MAX {
            run += 1;
            i += 1;
        }
        out.push(0);
        out.push(run);
    }
    out
}

impl Level {
    /// Decompress the PVS row of `leaf` into `dest`.
    ///
    /// Leaves without a row (and levels without vis data) see everything.
    pub fn decompress_pvs(&self, leaf: LeafId, dest: &mut LeafVisibleSet) {
        let offset = self
            .leaves
            .get(leaf as usize)
            .and_then(|l| l.vis_offset)
            .filter(|&o| o < self.visdata.len());
        match offset {
            Some(o) => {
                decompress_row(&self.visdata[o..], &mut dest.bits);
                dest.trim_tail();
            }
            None => dest.fill(),
        }
    }
}

/// Decompressed PVS of the leaf a viewpoint was in last time.
///
/// Only re-decompresses when the leaf changes.
#[derive(Debug)]
pub struct PvsCache {
    leaf: Option<LeafId>,
    set: LeafVisibleSet,
}

impl PvsCache {
    pub fn new(num_leaves: usize) -> Self {
        Self {
            leaf: None,
            set: LeafVisibleSet::new(num_leaves),
        }
    }

    /// Returns the set for `leaf` and whether it had to be decompressed.
    pub fn update(&mut self, level: &Level, leaf: LeafId) -> (&LeafVisibleSet, bool) {
        let fresh = self.leaf != Some(leaf) || self.set.num_leaves != level.vis_leaf_count();
        if fresh {
            if self.set.num_leaves != level.vis_leaf_count() {
                self.set = LeafVisibleSet::new(level.vis_leaf_count());
            }
            level.decompress_pvs(leaf, &mut self.set);
            self.leaf = Some(leaf);
        }
        (&self.set, fresh)
    }
}

/*======================================================================*/
/*                               Tests                                  */
/*======================================================================*/
