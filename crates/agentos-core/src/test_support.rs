use crate::surface::{FontMetrics, Geometry, PixelSize, ScrollSnapshot, TerminalSurface};
use std::time::{Duration, Instant};

pub(crate) fn at(base: Instant, ms: u64) -> Instant {
    base + Duration::from_millis(ms)
}

#[derive(Debug, Clone)]
pub(crate) struct FakeSurface {
    pub size: Option<PixelSize>,
    pub metrics: FontMetrics,
    pub font_px: f32,
    pub geometry: Geometry,
    pub applied: Vec<Geometry>,
    pub output: String,
    pub viewport: usize,
    pub scrolled: i32,
    pub alternate: bool,
    pub touch_primary: bool,
    pub focus_count: u32,
    pub snapshot: ScrollSnapshot,
}

impl FakeSurface {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            size: Some(PixelSize::new(width, height)),
            metrics: FontMetrics {
                cell_width: 10.0,
                cell_height: 20.0,
            },
            font_px: 14.0,
            geometry: Geometry::new(80, 24),
            applied: Vec::new(),
            output: String::new(),
            viewport: 0,
            scrolled: 0,
            alternate: false,
            touch_primary: false,
            focus_count: 0,
            snapshot: ScrollSnapshot::default(),
        }
    }
}

impl TerminalSurface for FakeSurface {
    fn container_size(&self) -> Option<PixelSize> {
        self.size
    }

    fn font_metrics(&self) -> FontMetrics {
        self.metrics
    }

    fn font_size(&self) -> f32 {
        self.font_px
    }

    fn set_font_size(&mut self, px: f32) {
        self.font_px = px;
    }

    fn geometry(&self) -> Geometry {
        self.geometry
    }

    fn apply_geometry(&mut self, geometry: Geometry) {
        // Shrinking rows pushes the viewport down the scrollback, like a real grid reflow.
        if geometry.rows < self.geometry.rows {
            self.viewport += usize::from(self.geometry.rows - geometry.rows);
        }
        self.geometry = geometry;
        self.applied.push(geometry);
    }

    fn write_output(&mut self, data: &str) {
        self.output.push_str(data);
    }

    fn viewport_line(&self) -> usize {
        self.viewport
    }

    fn scroll_to_line(&mut self, line: usize) {
        self.viewport = line;
    }

    fn scroll_lines(&mut self, delta: i32) {
        self.scrolled += delta;
        self.viewport = (self.viewport as i64 + i64::from(delta)).max(0) as usize;
    }

    fn is_alternate_screen(&self) -> bool {
        self.alternate
    }

    fn focus(&mut self) {
        self.focus_count += 1;
    }

    fn scroll_snapshot(&self) -> ScrollSnapshot {
        ScrollSnapshot {
            scroll_top: self.viewport,
            ..self.snapshot
        }
    }

    fn restore_scroll(&mut self, snapshot: ScrollSnapshot) {
        self.viewport = snapshot.scroll_top;
        self.snapshot = snapshot;
    }

    fn is_touch_primary(&self) -> bool {
        self.touch_primary
    }
}
