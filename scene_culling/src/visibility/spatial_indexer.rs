/// Grid-hashed index of visibility notifiers against viewports.
///
/// Each notifier holds one reference on every grid cell its rectangle
/// touches. `update()` walks the cells under each viewport, stamps the
/// notifiers it finds with the current pass and emits `Entered` for new
/// ones; anything left with an older stamp has left the viewport and
/// emits `Exited`.

use glam::IVec2;
use rustc_hash::FxHashMap;
use slotmap::{new_key_type, SlotMap};
use crate::dispatch::{EventSinks, SinkId};
use crate::error::Result;
use crate::math::Rect2;
use crate::engine_bail;

const SOURCE: &str = "culling::SpatialIndexer2D";

// ===== SLOT MAP KEYS =====

new_key_type! {
    /// Stable key for a notifier rectangle.
    pub struct NotifierKey;

    /// Stable key for a viewport rectangle.
    pub struct ViewportKey;
}

// ===== CONFIG =====

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexerConfig {
    /// Side of a grid cell in world units
    pub cell_size: f32,
    /// Above this many cells under a viewport, `update()` scans the stored
    /// cells instead of the viewport's cell range. Notifiers covering more
    /// cells than this are kept out of the grid and tested directly.
    pub threshold: i64,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            cell_size: 100.0,
            threshold: 10_000,
        }
    }
}

// ===== EVENTS =====

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisibilityEvent {
    Entered { viewport: ViewportKey, notifier: NotifierKey },
    Exited { viewport: ViewportKey, notifier: NotifierKey },
}

// ===== INDEXER =====

struct ViewportData {
    rect: Rect2,
    /// Notifier -> pass that last saw it
    notifiers: FxHashMap<NotifierKey, u64>,
}

/// Inclusive cell range covered by a rectangle.
#[derive(Debug, Clone, Copy)]
struct CellRange {
    begin: IVec2,
    end: IVec2,
}

impl CellRange {
    fn contains(&self, cell: IVec2) -> bool {
        cell.x >= self.begin.x && cell.x <= self.end.x
            && cell.y >= self.begin.y && cell.y <= self.end.y
    }

    /// Number of cells in the range; widened first so saturated ranges
    /// cannot overflow.
    fn area(&self) -> i64 {
        let width = self.end.x as i64 - self.begin.x as i64 + 1;
        let height = self.end.y as i64 - self.begin.y as i64 + 1;
        width.max(0).saturating_mul(height.max(0))
    }

    fn cells(self) -> impl Iterator<Item = IVec2> {
        (self.begin.x..=self.end.x)
            .flat_map(move |x| (self.begin.y..=self.end.y).map(move |y| IVec2::new(x, y)))
    }
}

pub struct SpatialIndexer2D {
    config: IndexerConfig,
    /// Cell -> notifier -> reference count
    cells: FxHashMap<IVec2, FxHashMap<NotifierKey, u32>>,
    /// Notifiers too large for the grid -> reference count
    oversized: FxHashMap<NotifierKey, u32>,
    notifiers: SlotMap<NotifierKey, Rect2>,
    viewports: SlotMap<ViewportKey, ViewportData>,
    pass: u64,
    changed: bool,
    events: EventSinks<VisibilityEvent>,
}

impl SpatialIndexer2D {
    pub fn new(config: IndexerConfig) -> Result<Self> {
        if config.cell_size.is_nan() || config.cell_size <= 0.0 {
            engine_bail!(InvalidArgument: SOURCE, "Cell size must be positive, got {}", config.cell_size);
        }
        Ok(Self {
            config,
            cells: FxHashMap::default(),
            oversized: FxHashMap::default(),
            notifiers: SlotMap::with_key(),
            viewports: SlotMap::with_key(),
            pass: 0,
            changed: false,
            events: EventSinks::new(),
        })
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    pub fn subscribe<F>(&mut self, sink: F) -> SinkId
    where
        F: FnMut(&VisibilityEvent) + Send + 'static,
    {
        self.events.subscribe(sink)
    }

    pub fn unsubscribe(&mut self, id: SinkId) -> bool {
        self.events.unsubscribe(id)
    }

    fn cell_range(&self, rect: &Rect2) -> CellRange {
        let size = self.config.cell_size;
        let begin = (rect.position / size).floor().as_ivec2();
        let end = (rect.end() / size).floor().as_ivec2();
        CellRange { begin, end }
    }

    fn reference_cells(&mut self, notifier: NotifierKey, rect: &Rect2) {
        let range = self.cell_range(rect);
        if range.area() > self.config.threshold {
            *self.oversized.entry(notifier).or_insert(0) += 1;
            return;
        }
        for cell in range.cells() {
            *self.cells.entry(cell).or_default().entry(notifier).or_insert(0) += 1;
        }
    }

    fn release_cells(&mut self, notifier: NotifierKey, rect: &Rect2) {
        let range = self.cell_range(rect);
        if range.area() > self.config.threshold {
            if let Some(count) = self.oversized.get_mut(&notifier) {
                *count -= 1;
                if *count == 0 {
                    self.oversized.remove(&notifier);
                }
            }
            return;
        }
        for cell in range.cells() {
            let Some(refs) = self.cells.get_mut(&cell) else {
                continue;
            };
            if let Some(count) = refs.get_mut(&notifier) {
                *count -= 1;
                if *count == 0 {
                    refs.remove(&notifier);
                }
            }
            if refs.is_empty() {
                self.cells.remove(&cell);
            }
        }
    }

    // ===== NOTIFIERS =====

    pub fn add_notifier(&mut self, rect: Rect2) -> NotifierKey {
        let key = self.notifiers.insert(rect);
        self.reference_cells(key, &rect);
        self.changed = true;
        key
    }

    /// Move a notifier. Unchanged rectangles are a no-op.
    pub fn update_notifier(&mut self, notifier: NotifierKey, rect: Rect2) -> Result<()> {
        let Some(&old) = self.notifiers.get(notifier) else {
            engine_bail!(InvalidResource: SOURCE, "Unknown notifier {:?}", notifier);
        };
        if old == rect {
            return Ok(());
        }

        // New references first so cells shared by both rects survive
        self.reference_cells(notifier, &rect);
        self.release_cells(notifier, &old);
        self.notifiers[notifier] = rect;
        self.changed = true;
        Ok(())
    }

    /// Remove a notifier, emitting `Exited` for every viewport showing it.
    pub fn remove_notifier(&mut self, notifier: NotifierKey) -> Result<()> {
        let Some(rect) = self.notifiers.remove(notifier) else {
            engine_bail!(InvalidResource: SOURCE, "Unknown notifier {:?}", notifier);
        };

        for (viewport, data) in &mut self.viewports {
            if data.notifiers.remove(&notifier).is_some() {
                self.events.emit(&VisibilityEvent::Exited { viewport, notifier });
            }
        }

        self.release_cells(notifier, &rect);
        self.changed = true;
        Ok(())
    }

    pub fn notifier_rect(&self, notifier: NotifierKey) -> Option<Rect2> {
        self.notifiers.get(notifier).copied()
    }

    pub fn notifier_count(&self) -> usize {
        self.notifiers.len()
    }

    // ===== VIEWPORTS =====

    pub fn add_viewport(&mut self, rect: Rect2) -> ViewportKey {
        self.changed = true;
        self.viewports.insert(ViewportData {
            rect,
            notifiers: FxHashMap::default(),
        })
    }

    pub fn update_viewport(&mut self, viewport: ViewportKey, rect: Rect2) -> Result<()> {
        let Some(data) = self.viewports.get_mut(viewport) else {
            engine_bail!(InvalidResource: SOURCE, "Unknown viewport {:?}", viewport);
        };
        if data.rect != rect {
            data.rect = rect;
            self.changed = true;
        }
        Ok(())
    }

    /// Remove a viewport, emitting `Exited` for every notifier it shows.
    pub fn remove_viewport(&mut self, viewport: ViewportKey) -> Result<()> {
        let Some(data) = self.viewports.remove(viewport) else {
            engine_bail!(InvalidResource: SOURCE, "Unknown viewport {:?}", viewport);
        };
        for notifier in data.notifiers.into_keys() {
            self.events.emit(&VisibilityEvent::Exited { viewport, notifier });
        }
        Ok(())
    }

    pub fn viewport_count(&self) -> usize {
        self.viewports.len()
    }

    // ===== QUERIES =====

    pub fn is_notifier_visible(&self, viewport: ViewportKey, notifier: NotifierKey) -> bool {
        self.viewports
            .get(viewport)
            .is_some_and(|data| data.notifiers.contains_key(&notifier))
    }

    /// Number of grid cells holding at least one notifier reference.
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// References `notifier` holds on `cell` (0 when none).
    pub fn cell_refcount(&self, cell: IVec2, notifier: NotifierKey) -> u32 {
        self.cells
            .get(&cell)
            .and_then(|refs| refs.get(&notifier))
            .copied()
            .unwrap_or(0)
    }

    /// Whether `notifier` is tested directly instead of through grid cells.
    pub fn is_oversized(&self, notifier: NotifierKey) -> bool {
        self.oversized.contains_key(&notifier)
    }

    pub fn is_changed(&self) -> bool {
        self.changed
    }

    // ===== UPDATE =====

    /// Recompute viewport membership and emit enter/exit events.
    ///
    /// Does nothing unless a notifier or viewport changed since the last
    /// call.
    pub fn update(&mut self) {
        if !self.changed {
            return;
        }

        self.pass += 1;
        let pass = self.pass;
        let threshold = self.config.threshold;
        let ranges: Vec<(ViewportKey, CellRange)> = self
            .viewports
            .iter()
            .map(|(key, data)| (key, self.cell_range(&data.rect)))
            .collect();

        let Self { cells, oversized, notifiers, viewports, events, .. } = self;

        for (viewport, range) in ranges {
            let data = &mut viewports[viewport];
            let view_rect = data.rect;

            let mut visit = |refs: &FxHashMap<NotifierKey, u32>| {
                for &notifier in refs.keys() {
                    let overlaps = notifiers
                        .get(notifier)
                        .is_some_and(|rect| touches(rect, &view_rect));
                    if !overlaps {
                        continue;
                    }
                    if data.notifiers.insert(notifier, pass).is_none() {
                        events.emit(&VisibilityEvent::Entered { viewport, notifier });
                    }
                }
            };

            visit(&*oversized);
            if range.area() > threshold {
                // Zoomed far out: the stored cells are fewer than the range
                for (cell, refs) in cells.iter() {
                    if range.contains(*cell) {
                        visit(refs);
                    }
                }
            } else {
                for cell in range.cells() {
                    if let Some(refs) = cells.get(&cell) {
                        visit(refs);
                    }
                }
            }

            data.notifiers.retain(|&notifier, stamp| {
                if *stamp == pass {
                    return true;
                }
                events.emit(&VisibilityEvent::Exited { viewport, notifier });
                false
            });
        }

        self.changed = false;
    }
}

/// Closed overlap test, so zero-area notifiers on a viewport still count.
fn touches(a: &Rect2, b: &Rect2) -> bool {
    let a_end = a.end();
    let b_end = b.end();
    a.position.x <= b_end.x
        && a_end.x >= b.position.x
        && a.position.y <= b_end.y
        && a_end.y >= b.position.y
}

#[cfg(test)]
#[path = "spatial_indexer_tests.rs"]
mod tests;
