//! The local terminal as a renderer surface. The host terminal owns the
//! cell grid and its scrollback, so one cell is one "pixel" here and the
//! scroll operations have nothing to move.

use agentos_core::{FontMetrics, Geometry, PixelSize, ScrollSnapshot, TerminalSurface};
use std::io::{self, Write};

const ALT_SCREEN_ENTER: [&str; 3] = ["\x1b[?1049h", "\x1b[?1047h", "\x1b[?47h"];
const ALT_SCREEN_LEAVE: [&str; 3] = ["\x1b[?1049l", "\x1b[?1047l", "\x1b[?47l"];

pub struct TtySurface<W: Write> {
	out: W,
	size: Box<dyn Fn() -> Option<(u16, u16)> + Send>,
	geometry: Geometry,
	font_px: f32,
	alternate: bool,
	// escape sequences can straddle two output frames
	tail: String,
}

impl TtySurface<io::Stdout> {
	pub fn stdout() -> Self {
		Self::new(io::stdout(), Box::new(|| crossterm::terminal::size().ok()))
	}
}

impl<W: Write> TtySurface<W> {
	pub fn new(out: W, size: Box<dyn Fn() -> Option<(u16, u16)> + Send>) -> Self {
		let geometry = size()
			.map(|(cols, rows)| Geometry::new(cols, rows))
			.unwrap_or(Geometry::new(80, 24));
		Self {
			out,
			size,
			geometry,
			font_px: 14.0,
			alternate: false,
			tail: String::new(),
		}
	}

	pub fn writer(&self) -> &W {
		&self.out
	}

	fn track_alternate_screen(&mut self, data: &str) {
		let mut window = std::mem::take(&mut self.tail);
		window.push_str(data);
		let last = |patterns: &[&str]| patterns.iter().filter_map(|p| window.rfind(p)).max();
		match (last(&ALT_SCREEN_ENTER[..]), last(&ALT_SCREEN_LEAVE[..])) {
			(Some(enter), Some(leave)) => self.alternate = enter > leave,
			(Some(_), None) => self.alternate = true,
			(None, Some(_)) => self.alternate = false,
			(None, None) => {}
		}
		let keep = window
			.char_indices()
			.rev()
			.nth(7)
			.map(|(index, _)| index)
			.unwrap_or(0);
		self.tail = window.split_off(keep);
	}
}

impl<W: Write> TerminalSurface for TtySurface<W> {
	fn container_size(&self) -> Option<PixelSize> {
		let (cols, rows) = (self.size)()?;
		Some(PixelSize::new(f32::from(cols), f32::from(rows)))
	}

	fn font_metrics(&self) -> FontMetrics {
		FontMetrics {
			cell_width: 1.0,
			cell_height: 1.0,
		}
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
		self.geometry = geometry;
	}

	fn write_output(&mut self, data: &str) {
		self.track_alternate_screen(data);
		let _ = self.out.write_all(data.as_bytes());
		let _ = self.out.flush();
	}

	fn viewport_line(&self) -> usize {
		0
	}

	fn scroll_to_line(&mut self, _line: usize) {}

	fn scroll_lines(&mut self, _delta: i32) {}

	fn is_alternate_screen(&self) -> bool {
		self.alternate
	}

	fn focus(&mut self) {
		let _ = self.out.flush();
	}

	fn scroll_snapshot(&self) -> ScrollSnapshot {
		ScrollSnapshot::default()
	}

	fn restore_scroll(&mut self, _snapshot: ScrollSnapshot) {}
}
