use image::GrayImage;
use anyhow::Result;

use crate::font;
use crate::types::{DeviceState, Point, Status};

/// Everything the debug view shows for one tick.
pub struct DebugView<'a> {
    pub frame: Option<&'a GrayImage>,
    pub marker: Option<Point>,
    pub trace: &'a [Point],
    pub status: Status,
    pub device: DeviceState,
    pub busy: bool,
    /// Toggles each redraw while classifying, to blink the border.
    pub blink: bool,
}

const TRACE_COLOR: (u8, u8, u8) = (0, 255, 0);
const MARKER_COLOR: (u8, u8, u8) = (255, 0, 0);
const BUSY_COLOR: (u8, u8, u8) = (255, 200, 0);

fn status_color(status: Status) -> (u8, u8, u8) {
    match status {
        Status::Ready => (255, 255, 255),
        Status::Tracing => (0, 255, 0),
        Status::Canceled => (255, 80, 80),
    }
}

fn put(buffer: &mut [u8], width: usize, height: usize, x: i64, y: i64, color: (u8, u8, u8)) {
    if x >= 0 && y >= 0 && (x as usize) < width && (y as usize) < height {
        let idx = (y as usize * width + x as usize) * 3;
        buffer[idx..idx + 3].copy_from_slice(&[color.0, color.1, color.2]);
    }
}

fn line(buffer: &mut [u8], width: usize, height: usize, a: &Point, b: &Point, color: (u8, u8, u8)) {
    let steps = a.distance(b).ceil().max(1.0) as usize;
    for i in 0..=steps {
        let t = i as f64 / steps as f64;
        let x = (a.x + (b.x - a.x) * t).round() as i64;
        let y = (a.y + (b.y - a.y) * t).round() as i64;
        put(buffer, width, height, x, y, color);
    }
}

/// Renders the view into an RGB8 buffer of `width * height * 3` bytes.
pub fn compose_frame(view: &DebugView, width: usize, height: usize) -> Vec<u8> {
    let mut buffer = vec![0u8; width * height * 3];

    if let Some(frame) = view.frame {
        for (x, y, p) in frame.enumerate_pixels() {
            let v = p[0];
            put(&mut buffer, width, height, x as i64, y as i64, (v, v, v));
        }
    }

    for pair in view.trace.windows(2) {
        if pair[0].is_valid() && pair[1].is_valid() {
            line(&mut buffer, width, height, &pair[0], &pair[1], TRACE_COLOR);
        }
    }

    if let Some(p) = view.marker.filter(Point::is_valid) {
        let (cx, cy) = (p.x.round() as i64, p.y.round() as i64);
        for d in -4..=4 {
            put(&mut buffer, width, height, cx + d, cy, MARKER_COLOR);
            put(&mut buffer, width, height, cx, cy + d, MARKER_COLOR);
        }
    }

    if view.busy && view.blink {
        for x in 0..width as i64 {
            for t in 0..3 {
                put(&mut buffer, width, height, x, t, BUSY_COLOR);
                put(&mut buffer, width, height, x, height as i64 - 1 - t, BUSY_COLOR);
            }
        }
        for y in 0..height as i64 {
            for t in 0..3 {
                put(&mut buffer, width, height, t, y, BUSY_COLOR);
                put(&mut buffer, width, height, width as i64 - 1 - t, y, BUSY_COLOR);
            }
        }
    }

    font::draw_text_line(&mut buffer, width, height, 10, 10, view.status.label(), status_color(view.status), 3);
    let device = format!("LID {}", view.device);
    let dx = width.saturating_sub(font::measure_text_width(&device, 2) + 10);
    font::draw_text_line(&mut buffer, width, height, dx, 10, &device, (180, 180, 180), 2);

    buffer
}

pub struct WindowOutput {
    window: minifb::Window,
    buffer: Vec<u32>,
    width: usize,
    height: usize,
}

impl WindowOutput {
    pub fn new(title: &str, width: usize, height: usize) -> Result<Self> {
        let mut window = minifb::Window::new(
            title,
            width,
            height,
            minifb::WindowOptions {
                resize: true,
                ..minifb::WindowOptions::default()
            },
        ).map_err(|e| anyhow::anyhow!("Failed to create window: {}", e))?;

        window.limit_update_rate(Some(std::time::Duration::from_micros(16600))); // ~60 FPS

        Ok(Self {
            window,
            buffer: vec![0; width * height],
            width,
            height,
        })
    }

    pub fn is_open(&self) -> bool {
        self.window.is_open()
    }

    pub fn is_key_down(&self, key: minifb::Key) -> bool {
        self.window.is_key_down(key)
    }

    pub fn get_mouse_pos(&self, mode: minifb::MouseMode) -> Option<(f32, f32)> {
        self.window.get_mouse_pos(mode)
    }

    pub fn is_mouse_down(&self, button: minifb::MouseButton) -> bool {
        self.window.get_mouse_down(button)
    }

    pub fn is_key_pressed(&self, key: minifb::Key) -> bool {
        self.window.is_key_pressed(key, minifb::KeyRepeat::No)
    }

    /// Shows an RGB8 buffer of the window's size.
    pub fn update(&mut self, buffer: &[u8]) -> Result<()> {
        if self.buffer.len() != self.width * self.height {
            self.buffer.resize(self.width * self.height, 0);
        }

        for (i, chunk) in buffer.chunks(3).enumerate() {
            if i >= self.buffer.len() { break; }
            let r = chunk[0] as u32;
            let g = chunk[1] as u32;
            let b = chunk[2] as u32;
            self.buffer[i] = (r << 16) | (g << 8) | b;
        }

        self.window.update_with_buffer(&self.buffer, self.width, self.height)
            .map_err(|e| anyhow::anyhow!(e))
    }
}
