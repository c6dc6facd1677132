use crate::surface::{FontMetrics, Geometry, PixelSize, TerminalSurface};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeTrigger {
    Mount,
    Window,
    Container,
    Orientation,
    /// Visual viewport changes, e.g. an on-screen keyboard sliding in.
    VisualViewport,
    /// A media-query breakpoint was crossed (devtools responsive mode).
    Breakpoint,
    Layout,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    /// Offsets of the fit passes scheduled per trigger.
    pub pass_offsets_ms: Vec<u64>,
    pub min_cols: u16,
    pub min_rows: u16,
    pub padding_px: f32,
    pub scrollbar_px: f32,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            pass_offsets_ms: vec![0, 100, 250],
            min_cols: 2,
            min_rows: 1,
            padding_px: 0.0,
            scrollbar_px: 0.0,
        }
    }
}

/// Largest grid that fits `size` with the given cell metrics.
pub fn compute_geometry(
    size: PixelSize,
    metrics: FontMetrics,
    config: &FitConfig,
) -> Option<Geometry> {
    if metrics.cell_width <= 0.0 || metrics.cell_height <= 0.0 {
        return None;
    }
    let width = size.width - config.padding_px * 2.0 - config.scrollbar_px;
    let height = size.height - config.padding_px * 2.0;
    if width <= 0.0 || height <= 0.0 {
        return None;
    }
    let cols = (width / metrics.cell_width).floor().min(f32::from(u16::MAX)) as u16;
    let rows = (height / metrics.cell_height).floor().min(f32::from(u16::MAX)) as u16;
    Some(Geometry::new(
        cols.max(config.min_cols),
        rows.max(config.min_rows),
    ))
}

/// Turns resize triggers into a small burst of idempotent fit passes and
/// reports a geometry only when it differs from the last one reported.
#[derive(Debug)]
pub struct FitCoordinator {
    config: FitConfig,
    pending: BTreeSet<Instant>,
    last_reported: Option<Geometry>,
}

impl FitCoordinator {
    pub fn new(config: FitConfig) -> Self {
        Self {
            config,
            pending: BTreeSet::new(),
            last_reported: None,
        }
    }

    pub fn request(&mut self, trigger: ResizeTrigger, now: Instant) {
        debug!(event = "fit_requested", trigger = ?trigger);
        for offset in &self.config.pass_offsets_ms {
            self.pending.insert(now + Duration::from_millis(*offset));
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.iter().next().copied()
    }

    pub fn pending_passes(&self) -> usize {
        self.pending.len()
    }

    /// Runs at most one pass however many are due; passes read the
    /// container's current size, so the latest layout always wins.
    pub fn poll<S: TerminalSurface>(&mut self, now: Instant, surface: &mut S) -> Option<Geometry> {
        let still_pending = self.pending.split_off(&(now + Duration::from_nanos(1)));
        let due = std::mem::replace(&mut self.pending, still_pending);
        if due.is_empty() {
            return None;
        }
        let geometry = self.fit(surface)?;
        if self.last_reported == Some(geometry) {
            return None;
        }
        self.last_reported = Some(geometry);
        Some(geometry)
    }

    /// Fits immediately and reports the result even if unchanged. Used when a
    /// fresh socket needs the current size regardless of history.
    pub fn force<S: TerminalSurface>(&mut self, surface: &mut S) -> Geometry {
        let geometry = self.fit(surface).unwrap_or_else(|| surface.geometry());
        self.last_reported = Some(geometry);
        geometry
    }

    fn fit<S: TerminalSurface>(&self, surface: &mut S) -> Option<Geometry> {
        let size = surface.container_size()?;
        let target = compute_geometry(size, surface.font_metrics(), &self.config)?;
        if surface.geometry() != target {
            let preserve = surface.is_touch_primary();
            let line = surface.viewport_line();
            surface.apply_geometry(target);
            if preserve {
                surface.scroll_to_line(line);
            }
        }
        Some(target)
    }
}
