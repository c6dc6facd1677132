use crate::surface::TerminalSurface;
use serde::Deserialize;

const MIN_PIXELS_PER_LINE: f32 = 10.0;
const MAX_PIXELS_PER_LINE: f32 = 25.0;
const SGR_WHEEL_UP: u8 = 64;
const SGR_WHEEL_DOWN: u8 = 65;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TouchConfig {
    pub classify_threshold_px: f32,
    pub pixels_per_line: f32,
    pub min_font_px: f32,
    pub max_font_px: f32,
}

impl Default for TouchConfig {
    fn default() -> Self {
        Self {
            classify_threshold_px: 15.0,
            pixels_per_line: 20.0,
            min_font_px: 8.0,
            max_font_px: 32.0,
        }
    }
}

impl TouchConfig {
    fn line_step(&self) -> f32 {
        self.pixels_per_line
            .clamp(MIN_PIXELS_PER_LINE, MAX_PIXELS_PER_LINE)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TouchPoint {
    pub x: f32,
    pub y: f32,
}

impl TouchPoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    fn distance(&self, other: &TouchPoint) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TouchOutcome {
    None,
    /// Horizontal drag; the hosting container owns it (session switching).
    Delegated { dx: f32 },
    /// Local scrollback moved by this many lines (positive is toward newer output).
    Scrolled(i32),
    /// Synthetic wheel input destined for the remote program.
    WheelInput(String),
    FontSize(f32),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Gesture {
    Idle,
    Pending { origin: TouchPoint },
    Horizontal { origin: TouchPoint },
    Vertical { last_y: f32, carry: f32 },
    Pinch { start_distance: f32, start_font: f32 },
}

#[derive(Debug)]
pub struct TouchScrollTranslator {
    config: TouchConfig,
    gesture: Gesture,
}

impl TouchScrollTranslator {
    pub fn new(config: TouchConfig) -> Self {
        Self {
            config,
            gesture: Gesture::Idle,
        }
    }

    pub fn start<S: TerminalSurface>(&mut self, points: &[TouchPoint], surface: &S) {
        self.gesture = match points {
            [] => Gesture::Idle,
            [single] => Gesture::Pending { origin: *single },
            [first, second, ..] => Gesture::Pinch {
                start_distance: first.distance(second),
                start_font: surface.font_size(),
            },
        };
    }

    pub fn moved<S: TerminalSurface>(
        &mut self,
        points: &[TouchPoint],
        surface: &mut S,
    ) -> TouchOutcome {
        if points.len() >= 2 && !matches!(self.gesture, Gesture::Pinch { .. }) {
            self.start(points, surface);
            return TouchOutcome::None;
        }
        let Some(point) = points.first().copied() else {
            return TouchOutcome::None;
        };
        match self.gesture {
            Gesture::Idle => TouchOutcome::None,
            Gesture::Pending { origin } => {
                let dx = point.x - origin.x;
                let dy = point.y - origin.y;
                let threshold = self.config.classify_threshold_px;
                if dx.abs() <= threshold && dy.abs() <= threshold {
                    return TouchOutcome::None;
                }
                if dx.abs() > dy.abs() {
                    self.gesture = Gesture::Horizontal { origin };
                    TouchOutcome::Delegated { dx }
                } else {
                    self.gesture = Gesture::Vertical {
                        last_y: origin.y,
                        carry: 0.0,
                    };
                    self.scroll(point, surface)
                }
            }
            Gesture::Horizontal { origin } => TouchOutcome::Delegated {
                dx: point.x - origin.x,
            },
            Gesture::Vertical { .. } => self.scroll(point, surface),
            Gesture::Pinch {
                start_distance,
                start_font,
            } => {
                let [first, second, ..] = points else {
                    return TouchOutcome::None;
                };
                if start_distance <= 0.0 {
                    return TouchOutcome::None;
                }
                let scaled = start_font * first.distance(second) / start_distance;
                let font = scaled.clamp(self.config.min_font_px, self.config.max_font_px);
                if (font - surface.font_size()).abs() < f32::EPSILON {
                    return TouchOutcome::None;
                }
                surface.set_font_size(font);
                TouchOutcome::FontSize(font)
            }
        }
    }

    pub fn end(&mut self) {
        self.gesture = Gesture::Idle;
    }

    fn scroll<S: TerminalSurface>(&mut self, point: TouchPoint, surface: &mut S) -> TouchOutcome {
        let Gesture::Vertical { last_y, carry } = self.gesture else {
            return TouchOutcome::None;
        };
        let step = self.config.line_step();
        // finger moving up reveals newer lines
        let carry = carry + (last_y - point.y);
        let lines = (carry / step).trunc() as i32;
        self.gesture = Gesture::Vertical {
            last_y: point.y,
            carry: carry - lines as f32 * step,
        };
        if lines == 0 {
            return TouchOutcome::None;
        }
        if surface.is_alternate_screen() {
            return TouchOutcome::WheelInput(wheel_sequence(lines, point, surface));
        }
        surface.scroll_lines(lines);
        TouchOutcome::Scrolled(lines)
    }
}

/// SGR mouse-wheel reports at the cell under `point`, one per line.
fn wheel_sequence<S: TerminalSurface>(lines: i32, point: TouchPoint, surface: &S) -> String {
    let metrics = surface.font_metrics();
    let geometry = surface.geometry();
    let cell = |px: f32, size: f32, max: u16| -> u16 {
        if size <= 0.0 {
            return 1;
        }
        let index = (px.max(0.0) / size).floor() as u16;
        index.saturating_add(1).clamp(1, max.max(1))
    };
    let col = cell(point.x, metrics.cell_width, geometry.cols);
    let row = cell(point.y, metrics.cell_height, geometry.rows);
    let button = if lines > 0 { SGR_WHEEL_DOWN } else { SGR_WHEEL_UP };
    format!("\x1b[<{button};{col};{row}M").repeat(lines.unsigned_abs() as usize)
}
