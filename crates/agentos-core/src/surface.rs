//! The seam between the connection layer and whatever renders the cell grid.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelSize {
    pub width: f32,
    pub height: f32,
}

impl PixelSize {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FontMetrics {
    pub cell_width: f32,
    pub cell_height: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Geometry {
    pub cols: u16,
    pub rows: u16,
}

impl Geometry {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }
}

/// Where a tab's viewport sat in its scrollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScrollSnapshot {
    pub scroll_top: usize,
    pub cursor_row: usize,
    pub base_row: usize,
}

/// A terminal renderer instance. One per (pane, tab), never shared.
pub trait TerminalSurface {
    /// Pixel size of the hosting container, or `None` while it has no layout.
    fn container_size(&self) -> Option<PixelSize>;
    fn font_metrics(&self) -> FontMetrics;
    fn font_size(&self) -> f32;
    fn set_font_size(&mut self, px: f32);
    fn geometry(&self) -> Geometry;
    fn apply_geometry(&mut self, geometry: Geometry);
    fn write_output(&mut self, data: &str);
    /// First scrollback line currently shown at the top of the viewport.
    fn viewport_line(&self) -> usize;
    fn scroll_to_line(&mut self, line: usize);
    fn scroll_lines(&mut self, delta: i32);
    /// True while a full-screen program owns the alternate buffer.
    fn is_alternate_screen(&self) -> bool;
    fn focus(&mut self);
    fn scroll_snapshot(&self) -> ScrollSnapshot;
    fn restore_scroll(&mut self, snapshot: ScrollSnapshot);

    /// Touch-first devices lose their scroll position across row changes.
    fn is_touch_primary(&self) -> bool {
        false
    }
}
