//! Software-rendered visualizer using `minifb`.
//!
//! Layout:
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ C5 ████████████████████████████████████████ │
//! │ B4 ████████████████████████████████████████ │
//! │ A4 ██████████████████ ● ← fingertip ███████ │   camera area
//! │ ...                                          │   (width × height)
//! │ C4 ████████████████████████████████████████ │
//! ├──────────────────────────────────────────────┤
//! │ status bar                                   │
//! │ key legend                                   │
//! └──────────────────────────────────────────────┘
//! ```

use std::sync::mpsc::Sender;

use minifb::{Key, KeyRepeat, MouseButton, MouseMode, Window, WindowOptions};
use pitch_mapper::NoteId;

use crate::app::Control;
use crate::bands::BandState;
use crate::error::Result;
use crate::landmark::SimInput;

// ════════════════════════════════════════════════════════════════════════════
// Layout constants
// ════════════════════════════════════════════════════════════════════════════

const STATUS_H:      usize = 40;
const BG_COLOR:      u32   = 0xFF1A1A2E;
const TEXT_BG:       u32   = 0xFF0F3460;
const ACTIVE_COLOR:  u32   = 0xFFFFD700;  // gold
const TIP_COLOR:     u32   = 0xFFFFFFFF;
const TRAIL_COLOR:   u32   = 0xFF9AD0FF;
const TEXT_SCALE:    usize = 2;

const TEST_KEYS: [Key; 9] = [
    Key::Key1, Key::Key2, Key::Key3, Key::Key4, Key::Key5,
    Key::Key6, Key::Key7, Key::Key8, Key::Key9,
];

// ════════════════════════════════════════════════════════════════════════════
// Canvas — the framebuffer and its drawing primitives
// ════════════════════════════════════════════════════════════════════════════

/// ARGB framebuffer, independent of the window so it can be tested.
pub struct Canvas {
    pub width:  usize,
    pub height: usize,
    pub buf:    Vec<u32>,
}

impl Canvas {
    pub fn new(width: usize, height: usize) -> Self {
        Canvas { width, height, buf: vec![BG_COLOR; width * height] }
    }

    pub fn clear(&mut self, color: u32) { self.buf.fill(color); }

    pub fn pixel(&self, x: usize, y: usize) -> Option<u32> {
        (x < self.width && y < self.height).then(|| self.buf[y * self.width + x])
    }

    fn set_pixel(&mut self, x: usize, y: usize, color: u32) {
        if x < self.width && y < self.height {
            self.buf[y * self.width + x] = color;
        }
    }

    fn fill_rect(&mut self, x: usize, y: usize, w: usize, h: usize, color: u32) {
        for row in y..(y + h).min(self.height) {
            for col in x..(x + w).min(self.width) {
                self.buf[row * self.width + col] = color;
            }
        }
    }

    fn draw_border(&mut self, x: usize, y: usize, w: usize, h: usize, color: u32) {
        if w == 0 || h == 0 { return; }
        for col in x..(x + w).min(self.width) {
            self.set_pixel(col, y, color);
            self.set_pixel(col, y + h - 1, color);
        }
        for row in y..(y + h).min(self.height) {
            self.set_pixel(x, row, color);
            self.set_pixel(x + w - 1, row, color);
        }
    }

    fn fill_disc(&mut self, cx: usize, cy: usize, r: usize, color: u32) {
        let r2 = (r * r) as isize;
        for dy in -(r as isize)..=(r as isize) {
            for dx in -(r as isize)..=(r as isize) {
                if dx * dx + dy * dy > r2 { continue; }
                let (sx, sy) = (cx as isize + dx, cy as isize + dy);
                if sx >= 0 && sy >= 0 {
                    self.set_pixel(sx as usize, sy as usize, color);
                }
            }
        }
    }

    /// Minimal bitmap font: 3×5 glyphs, each pixel drawn as a
    /// `scale`×`scale` block.
    fn draw_label(&mut self, text: &str, x: usize, y: usize, color: u32, scale: usize) {
        let mut cx = x;
        for ch in text.chars() {
            let glyph = char_glyph(ch);
            for (row, &bits) in glyph.iter().enumerate() {
                for col in 0..3usize {
                    if bits & (1 << (2 - col)) != 0 {
                        self.fill_rect(cx + col * scale, y + row * scale, scale, scale, color);
                    }
                }
            }
            cx += 4 * scale; // 3 wide + 1 gap
            if cx + 4 * scale > self.width { break; }
        }
    }

    /// Pixel width of `text` as drawn by `draw_label`.
    fn label_width(text: &str, scale: usize) -> usize {
        text.chars().count() * 4 * scale
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Frame painting
// ════════════════════════════════════════════════════════════════════════════

/// Paint one frame of the band view onto `canvas`.  The camera area is the
/// top `canvas.height - STATUS_H` rows.
pub fn paint(
    canvas:   &mut Canvas,
    bands:    &BandState,
    status:   &str,
    running:  bool,
    sounding: Option<&NoteId>,
) {
    let width  = canvas.width;
    let area_h = canvas.height.saturating_sub(STATUS_H);
    let count  = bands.bands.len().max(1);

    canvas.clear(BG_COLOR);

    // ── Note bands ────────────────────────────────────────────────────────
    for (i, band) in bands.bands.iter().enumerate() {
        let y0 = i * area_h / count;
        let y1 = (i + 1) * area_h / count;
        let mut color = band.color;
        if bands.hover == Some(i) {
            color = blend(color, 0xFFFFFFFF, 0.15);
        }
        color = blend(color, 0xFFFFFFFF, band.glow * 0.6);
        canvas.fill_rect(0, y0, width, y1 - y0, color);
        canvas.draw_border(0, y0, width, y1 - y0, 0xFF000000);

        let label_y = y0 + (y1 - y0).saturating_sub(5 * TEXT_SCALE) / 2;
        canvas.draw_label(band.note.name(), 8, label_y, 0xFFEEEEEE, TEXT_SCALE);

        if bands.active == Some(i) {
            canvas.draw_border(1, y0 + 1, width.saturating_sub(2), (y1 - y0).saturating_sub(2), ACTIVE_COLOR);
            canvas.draw_border(2, y0 + 2, width.saturating_sub(4), (y1 - y0).saturating_sub(4), ACTIVE_COLOR);
        }
    }

    // ── Fingertip trail and marker ────────────────────────────────────────
    let to_px = |(x, y): (f32, f32)| {
        let px = (x.clamp(0.0, 1.0) * (width.saturating_sub(1)) as f32) as usize;
        let py = (y.clamp(0.0, 1.0) * (area_h.saturating_sub(1)) as f32) as usize;
        (px, py)
    };
    if let Some((&tip, rest)) = bands.trail.split_last() {
        for &p in rest {
            let (px, py) = to_px(p);
            canvas.fill_disc(px, py, 2, TRAIL_COLOR);
        }
        let (px, py) = to_px(tip);
        canvas.fill_disc(px, py, 7, 0xFF000000);
        canvas.fill_disc(px, py, 5, TIP_COLOR);
    }

    // ── Idle overlay ──────────────────────────────────────────────────────
    if !running {
        let msg = "PRESS ENTER TO START";
        let scale = TEXT_SCALE * 2;
        let w = Canvas::label_width(msg, scale);
        let x = width.saturating_sub(w) / 2;
        let y = area_h.saturating_sub(5 * scale) / 2;
        canvas.fill_rect(x.saturating_sub(10), y.saturating_sub(10), w + 20, 5 * scale + 20, TEXT_BG);
        canvas.draw_label(msg, x, y, ACTIVE_COLOR, scale);
    }

    // ── Status bar ────────────────────────────────────────────────────────
    canvas.fill_rect(0, area_h, width, STATUS_H, TEXT_BG);
    canvas.draw_label(status, 10, area_h + 6, 0xFFEEEEEE, TEXT_SCALE);
    if let Some(note) = sounding {
        let w = Canvas::label_width(note.name(), TEXT_SCALE);
        canvas.draw_label(note.name(), width.saturating_sub(w + 10), area_h + 6, ACTIVE_COLOR, TEXT_SCALE);
    }

    // ── Key legend ────────────────────────────────────────────────────────
    canvas.draw_label(
        "Enter=start  Esc=stop  1-9=test note  Up/Down=instrument  mouse=hand  Q=quit",
        10, area_h + STATUS_H - 10, 0xFF888888, 1,
    );
}

// ════════════════════════════════════════════════════════════════════════════
// Visualizer
// ════════════════════════════════════════════════════════════════════════════

pub struct Visualizer {
    window: Window,
    canvas: Canvas,
    /// Present only in mouse-simulation mode.
    sim_tx: Option<Sender<SimInput>>,
}

impl Visualizer {
    /// Open a window whose camera area is `width` × `height`.
    pub fn new(width: usize, height: usize, sim_tx: Option<Sender<SimInput>>) -> Result<Self> {
        let total_h = height + STATUS_H;
        let mut window = Window::new(
            "Hand Theremin",
            width, total_h,
            WindowOptions {
                resize: false,
                ..WindowOptions::default()
            },
        )?;

        window.set_target_fps(60);

        Ok(Visualizer {
            window,
            canvas: Canvas::new(width, total_h),
            sim_tx,
        })
    }

    /// Returns false when the window should close.
    pub fn is_open(&self) -> bool { self.window.is_open() }

    /// Poll keyboard and mouse.  Keys become [`Control`]s; in simulation
    /// mode the mouse is forwarded as a [`SimInput::Pointer`].
    pub fn poll_input(&mut self) -> Vec<Control> {
        let mut controls = Vec::new();
        if !self.window.is_open() {
            controls.push(Control::Quit);
            return controls;
        }

        let one_shot = |k: Key| self.window.is_key_pressed(k, KeyRepeat::No);

        if one_shot(Key::Q)      { controls.push(Control::Quit); }
        if one_shot(Key::Enter)  { controls.push(Control::Start); }
        if one_shot(Key::Escape) { controls.push(Control::Stop); }
        if one_shot(Key::Up)     { controls.push(Control::ShiftInstrument(1)); }
        if one_shot(Key::Down)   { controls.push(Control::ShiftInstrument(-1)); }
        for (i, &key) in TEST_KEYS.iter().enumerate() {
            if one_shot(key) { controls.push(Control::TestNote(i)); }
        }

        if let Some(tx) = &self.sim_tx {
            let area_h = self.canvas.height - STATUS_H;
            let pointer = if self.window.get_mouse_down(MouseButton::Left) {
                self.window
                    .get_mouse_pos(MouseMode::Discard)
                    .filter(|&(_, my)| my < area_h as f32)
                    .map(|(mx, my)| (mx as f64 / self.canvas.width as f64, my as f64 / area_h as f64))
            } else {
                None
            };
            let _ = tx.send(SimInput::Pointer(pointer));
        }

        controls
    }

    /// Render one frame.
    pub fn render(
        &mut self,
        bands:    &BandState,
        status:   &str,
        running:  bool,
        sounding: Option<&NoteId>,
    ) {
        paint(&mut self.canvas, bands, status, running, sounding);
        let (w, h) = (self.canvas.width, self.canvas.height);
        if let Err(e) = self.window.update_with_buffer(&self.canvas.buf, w, h) {
            log::warn!(target: "visualizer", "frame dropped: {}", e);
        }
    }

    /// Tell the simulation source to finish.
    pub fn close(&mut self) {
        if let Some(tx) = self.sim_tx.take() {
            let _ = tx.send(SimInput::Quit);
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Minimal 3×5 bitmap font
// ────────────────────────────────────────────────────────────────────────────

fn char_glyph(c: char) -> [u8; 5] {
    match c {
        '0' => [0b111, 0b101, 0b101, 0b101, 0b111],
        '1' => [0b010, 0b110, 0b010, 0b010, 0b111],
        '2' => [0b111, 0b001, 0b111, 0b100, 0b111],
        '3' => [0b111, 0b001, 0b111, 0b001, 0b111],
        '4' => [0b101, 0b101, 0b111, 0b001, 0b001],
        '5' => [0b111, 0b100, 0b111, 0b001, 0b111],
        '6' => [0b111, 0b100, 0b111, 0b101, 0b111],
        '7' => [0b111, 0b001, 0b001, 0b001, 0b001],
        '8' => [0b111, 0b101, 0b111, 0b101, 0b111],
        '9' => [0b111, 0b101, 0b111, 0b001, 0b111],
        'A' => [0b111, 0b101, 0b111, 0b101, 0b101],
        'B' => [0b110, 0b101, 0b110, 0b101, 0b110],
        'C' => [0b111, 0b100, 0b100, 0b100, 0b111],
        'D' => [0b110, 0b101, 0b101, 0b101, 0b110],
        'E' => [0b111, 0b100, 0b111, 0b100, 0b111],
        'F' => [0b111, 0b100, 0b111, 0b100, 0b100],
        'G' => [0b111, 0b100, 0b101, 0b101, 0b111],
        'H' => [0b101, 0b101, 0b111, 0b101, 0b101],
        'I' => [0b111, 0b010, 0b010, 0b010, 0b111],
        'J' => [0b001, 0b001, 0b001, 0b101, 0b111],
        'K' => [0b101, 0b101, 0b110, 0b101, 0b101],
        'L' => [0b100, 0b100, 0b100, 0b100, 0b111],
        'M' => [0b101, 0b111, 0b101, 0b101, 0b101],
        'N' => [0b111, 0b101, 0b101, 0b101, 0b101],
        'O' => [0b111, 0b101, 0b101, 0b101, 0b111],
        'P' => [0b111, 0b101, 0b111, 0b100, 0b100],
        'Q' => [0b111, 0b101, 0b101, 0b111, 0b001],
        'R' => [0b110, 0b101, 0b110, 0b101, 0b101],
        'S' => [0b111, 0b100, 0b111, 0b001, 0b111],
        'T' => [0b111, 0b010, 0b010, 0b010, 0b010],
        'U' => [0b101, 0b101, 0b101, 0b101, 0b111],
        'V' => [0b101, 0b101, 0b101, 0b010, 0b010],
        'W' => [0b101, 0b101, 0b101, 0b111, 0b101],
        'X' => [0b101, 0b101, 0b010, 0b101, 0b101],
        'Y' => [0b101, 0b101, 0b111, 0b010, 0b010],
        'Z' => [0b111, 0b001, 0b010, 0b100, 0b111],
        // Lower case: small capitals, except the flat sign.
        'b' => [0b100, 0b100, 0b110, 0b101, 0b110],
        c if c.is_ascii_lowercase() => {
            let upper = char_glyph(c.to_ascii_uppercase());
            [0, upper[0], upper[2], upper[3], upper[4]]
        }
        '#' => [0b101, 0b111, 0b101, 0b111, 0b101],
        '/' => [0b001, 0b001, 0b010, 0b100, 0b100],
        '-' => [0b000, 0b000, 0b111, 0b000, 0b000],
        '>' => [0b100, 0b010, 0b001, 0b010, 0b100],
        '.' => [0b000, 0b000, 0b000, 0b000, 0b010],
        ',' => [0b000, 0b000, 0b000, 0b010, 0b100],
        ':' => [0b000, 0b010, 0b000, 0b010, 0b000],
        '=' => [0b000, 0b111, 0b000, 0b111, 0b000],
        '+' => [0b000, 0b010, 0b111, 0b010, 0b000],
        ' ' => [0b000, 0b000, 0b000, 0b000, 0b000],
        _   => [0b000, 0b000, 0b010, 0b000, 0b000], // fallback dot
    }
}

/// Alpha-blend two ARGB colors. `t` = 0.0 → all `a`, `t` = 1.0 → all `b`.
fn blend(a: u32, b: u32, t: f32) -> u32 {
    let t = t.clamp(0.0, 1.0);
    let lerp = |ca: u32, cb: u32| (ca as f32 * (1.0 - t) + cb as f32 * t) as u32;
    let ar = (a >> 16) & 0xFF; let br = (b >> 16) & 0xFF;
    let ag = (a >>  8) & 0xFF; let bg = (b >>  8) & 0xFF;
    let ab =  a        & 0xFF; let bb =  b        & 0xFF;
    0xFF000000 | (lerp(ar, br) << 16) | (lerp(ag, bg) << 8) | lerp(ab, bb)
}

// ════════════════════════════════════════════════════════════════════════════
// Tests
// ════════════════════════════════════════════════════════════════════════════
