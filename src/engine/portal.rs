//! ----------------------------------------------------------------------------
//! **Portal scheduling**
//!
//! After a pass has been scanned, every portal surface that ended up owning
//! at least one pixel becomes a candidate for a recursive view: the camera
//! is carried through the portal's transform, the destination leaf is taken
//! from the portal instead of locating it again, and the pass only writes
//! inside the pixels the portal received.
//!
//! Views are queued FIFO and drained breadth-first. Capacity, total renders
//! and depth are all bounded; whatever does not fit is dropped and the
//! portal simply stays unrendered.
//! ----------------------------------------------------------------------------

use std::collections::VecDeque;

use log::{trace, warn};
use smallvec::SmallVec;

use crate::engine::active_edge::{ActiveEdgeContext, BACKGROUND};
use crate::engine::config::PortalBudget;
use crate::renderer::Span;
use crate::world::{Camera, LeafId, Level, Plane, PortalId};

/*──────────────────────────── Span mask ──────────────────────────────*/

/// Set of screen pixels, stored as sorted, disjoint `[x0, x1)` runs per row.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SpanMask {
    rows: Vec<SmallVec<[(i32, i32); 2]>>,
}

impl SpanMask {
    pub fn full(w: usize, h: usize) -> Self {
        Self {
            rows: (0..h).map(|_| SmallVec::from_elem((0, w as i32), 1)).collect(),
        }
    }

    pub fn from_spans(h: usize, spans: impl IntoIterator<Item = Span>) -> Self {
        let mut rows: Vec<SmallVec<[(i32, i32); 2]>> = vec![SmallVec::new(); h];
        for s in spans {
            if s.count > 0 && s.y >= 0 && (s.y as usize) < h {
                rows[s.y as usize].push((s.x, s.x + s.count));
            }
        }
        for row in &mut rows {
            row.sort_unstable();
            let mut merged: SmallVec<[(i32, i32); 2]> = SmallVec::new();
            for &(a, b) in row.iter() {
                match merged.last_mut() {
                    Some(last) if a <= last.1 => last.1 = last.1.max(b),
                    _ => merged.push((a, b)),
                }
            }
            *row = merged;
        }
        Self { rows }
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.rows.len()
    }

    pub fn intersect(&self, other: &SpanMask) -> SpanMask {
        let rows = self
            .rows
            .iter()
            .zip(&other.rows)
            .map(|(a, b)| {
                let mut out = SmallVec::new();
                let (mut i, mut j) = (0, 0);
                while i < a.len() && j < b.len() {
                    let lo = a[i].0.max(b[j].0);
                    let hi = a[i].1.min(b[j].1);
                    if lo < hi {
                        out.push((lo, hi));
                    }
                    if a[i].1 < b[j].1 {
                        i += 1;
                    } else {
                        j += 1;
                    }
                }
                out
            })
            .collect();
        SpanMask { rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.iter().all(|r| r.is_empty())
    }

    pub fn pixel_count(&self) -> usize {
        self.rows
            .iter()
            .flatten()
            .map(|&(a, b)| (b - a) as usize)
            .sum()
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        usize::try_from(y)
            .ok()
            .and_then(|y| self.rows.get(y))
            .is_some_and(|row| row.iter().any(|&(a, b)| a <= x && x < b))
    }

    /// Append the parts of `span` inside the mask to `out`.
    pub fn clip_span(&self, span: Span, out: &mut Vec<Span>) {
        let Some(row) = usize::try_from(span.y).ok().and_then(|y| self.rows.get(y)) else {
            return;
        };
        let end = span.x + span.count;
        for &(a, b) in row {
            let lo = a.max(span.x);
            let hi = b.min(end);
            if lo < hi {
                out.push(Span {
                    x: lo,
                    y: span.y,
                    count: hi - lo,
                });
            }
        }
    }
}

/*──────────────────────────── Views ──────────────────────────────────*/

/// One view to render: the main camera or a camera carried through a portal.
#[derive(Clone, Debug)]
pub struct View {
    pub camera: Camera,
    /// leaf the camera is in; never looked up again for portal views
    pub leaf: LeafId,
    /// keeps only what lies beyond the portal
    pub clip_plane: Option<Plane>,
    /// pixels this view may write; `None` for the whole screen
    pub mask: Option<SpanMask>,
    pub depth: u32,
    pub portal: Option<PortalId>,
}

impl View {
    pub fn main(camera: Camera, leaf: LeafId) -> Self {
        Self {
            camera,
            leaf,
            clip_plane: None,
            mask: None,
            depth: 0,
            portal: None,
        }
    }

    /// The view on the far side of `portal`, as seen from `parent`.
    pub fn through_portal(level: &Level, parent: &View, portal: PortalId, mask: SpanMask) -> Self {
        let p = &level.portals[portal as usize];
        let plane = p.transform.plane(level.surface_plane(p.surface)).flipped();
        Self {
            camera: parent.camera.through_portal(&p.transform),
            leaf: p.dest_leaf,
            clip_plane: Some(plane),
            mask: Some(mask),
            depth: parent.depth + 1,
            portal: Some(portal),
        }
    }
}

/// Portals that received pixels in the pass held by `ae`, each with the
/// pixels it covers (limited to `parent` when given), in portal order.
pub fn eligible_portals(
    level: &Level,
    ae: &ActiveEdgeContext,
    parent: Option<&SpanMask>,
) -> Vec<(PortalId, SpanMask)> {
    let h = ae.bounds().bottom.max(0) as usize;
    let mut hits: Vec<(PortalId, Vec<Span>)> = Vec::new();
    for (id, surf) in ae.surfaces().iter().enumerate().skip(BACKGROUND as usize + 1) {
        let Some(portal) = surf
            .source
            .and_then(|s| level.surfaces.get(s as usize))
            .and_then(|s| s.portal)
        else {
            continue;
        };
        let spans = ae
            .spans(id as u32)
            .filter(|s| s.count > 0)
            .map(Span::from);
        match hits.iter_mut().find(|(p, _)| *p == portal) {
            Some((_, list)) => list.extend(spans),
            None => hits.push((portal, spans.collect())),
        }
    }
    hits.sort_by_key(|(p, _)| *p);

    hits.into_iter()
        .filter_map(|(portal, spans)| {
            let mut mask = SpanMask::from_spans(h, spans);
            if let Some(parent) = parent {
                mask = mask.intersect(parent);
            }
            if mask.is_empty() {
                trace!("portal {portal}: no visible pixels");
                None
            } else {
                Some((portal, mask))
            }
        })
        .collect()
}

/*──────────────────────────── Scheduler ──────────────────────────────*/

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SchedulerState {
    #[default]
    Idle,
    Scheduled,
    Rendering,
    Drained,
}

#[derive(Debug, Default)]
pub struct PortalScheduler {
    queue: VecDeque<View>,
    budget: PortalBudget,
    state: SchedulerState,
    rendered: usize,
    dropped: usize,
    overflow_warned: bool,
}

impl PortalScheduler {
    pub fn new(budget: PortalBudget) -> Self {
        Self {
            budget,
            ..Self::default()
        }
    }

    /// Forget last frame's queue and take this frame's budget.
    pub fn begin_frame(&mut self, budget: PortalBudget) {
        self.queue.clear();
        self.budget = budget;
        self.state = SchedulerState::Idle;
        self.rendered = 0;
        self.dropped = 0;
        self.overflow_warned = false;
    }

    /// Queue `view`; returns `false` if a budget refused it.
    pub fn schedule(&mut self, view: View) -> bool {
        if view.depth > self.budget.max_depth {
            trace!(
                "portal {:?}: depth {} over limit {}",
                view.portal, view.depth, self.budget.max_depth
            );
            self.dropped += 1;
            return false;
        }
        if self.queue.len() >= self.budget.queue_capacity {
            if !self.overflow_warned {
                warn!(
                    "portal queue full ({} views), dropping further portals this frame",
                    self.budget.queue_capacity
                );
                self.overflow_warned = true;
            }
            self.dropped += 1;
            return false;
        }
        trace!("portal {:?}: scheduled at depth {}", view.portal, view.depth);
        self.queue.push_back(view);
        self.state = SchedulerState::Scheduled;
        true
    }

    /// Next view to render, or `None` once the queue or the render budget
    /// is exhausted. Views left over at that point are discarded.
    pub fn next_view(&mut self) -> Option<View> {
        if self.rendered >= self.budget.max_renders {
            if !self.queue.is_empty() {
                trace!("portal render budget spent, dropping {} views", self.queue.len());
                self.dropped += self.queue.len();
                self.queue.clear();
            }
            self.state = SchedulerState::Drained;
            return None;
        }
        match self.queue.pop_front() {
            Some(view) => {
                self.rendered += 1;
                self.state = SchedulerState::Rendering;
                Some(view)
            }
            None => {
                self.state = SchedulerState::Drained;
                None
            }
        }
    }

    #[inline]
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    #[inline]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    #[inline]
    pub fn rendered(&self) -> usize {
        self.rendered
    }

    #[inline]
    pub fn dropped(&self) -> usize {
        self.dropped
    }
}

/*====================================================================*/
/*                                Tests                                */
/*====================================================================*/
