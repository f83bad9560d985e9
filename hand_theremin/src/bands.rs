//! Note-band visualization state.
//!
//! The frame is split into one horizontal band per scale note.  The band
//! under the fingertip is lit; a played note makes its band flash and fade.
//! A short trail of recent fingertip positions is kept for drawing.

use pitch_mapper::{NoteId, NoteScale};

// ════════════════════════════════════════════════════════════════════════════
// Color palette — band index → RGB
// ════════════════════════════════════════════════════════════════════════════

/// Map band `index` of `count` to an ARGB color.
///
/// Hues run from red at the top band to violet at the bottom, so adjacent
/// bands are always distinct.
pub fn band_color(index: usize, count: usize) -> u32 {
    let hue = (index as f32 / count.max(1) as f32) * 300.0;
    hsv_to_argb(hue, 0.55, 0.45)
}

/// Convert HSV → packed ARGB (0xAARRGGBB, A=0xFF).
fn hsv_to_argb(h: f32, s: f32, v: f32) -> u32 {
    let h  = h % 360.0;
    let hi = (h / 60.0) as u32;
    let f  = h / 60.0 - hi as f32;
    let p  = v * (1.0 - s);
    let q  = v * (1.0 - s * f);
    let t  = v * (1.0 - s * (1.0 - f));
    let (r, g, b) = match hi {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    };
    let ri = (r * 255.0) as u32;
    let gi = (g * 255.0) as u32;
    let bi = (b * 255.0) as u32;
    0xFF000000 | (ri << 16) | (gi << 8) | bi
}

// ════════════════════════════════════════════════════════════════════════════
// Band
// ════════════════════════════════════════════════════════════════════════════

#[derive(Clone, Debug)]
pub struct Band {
    pub note:  NoteId,
    pub color: u32,
    /// Flash intensity, 1.0 right after a note-on, decaying to 0.0.
    pub glow:  f32,
}

// ════════════════════════════════════════════════════════════════════════════
// BandState
// ════════════════════════════════════════════════════════════════════════════

/// Per-frame glow decay.
const GLOW_DECAY: f32 = 0.90;
/// Number of fingertip samples kept for the trail.
pub const TRAIL_LEN: usize = 12;

#[derive(Debug)]
pub struct BandState {
    pub bands:  Vec<Band>,
    /// Band currently under the fingertip, if a hand is visible.
    pub hover:  Option<usize>,
    /// Band of the mapper-driven note that is sounding.
    pub active: Option<usize>,
    /// Recent normalized fingertip positions, oldest first.
    pub trail:  Vec<(f32, f32)>,
}

impl BandState {
    pub fn new(scale: &NoteScale) -> Self {
        let count = scale.len();
        let bands = scale
            .iter()
            .enumerate()
            .map(|(i, note)| Band {
                note:  note.clone(),
                color: band_color(i, count),
                glow:  0.0,
            })
            .collect();
        BandState { bands, hover: None, active: None, trail: Vec::with_capacity(TRAIL_LEN) }
    }

    /// Record this frame's fingertip (or its absence).
    pub fn track(&mut self, tip: Option<(f32, f32)>, hover: Option<usize>) {
        self.hover = hover;
        match tip {
            Some(p) => {
                if self.trail.len() >= TRAIL_LEN {
                    self.trail.remove(0);
                }
                self.trail.push(p);
            }
            // Let the trail shrink away while no hand is visible.
            None => {
                if !self.trail.is_empty() {
                    self.trail.remove(0);
                }
            }
        }
    }

    /// Flash the band that plays `note`.
    pub fn flash(&mut self, note: &NoteId) {
        if let Some(band) = self.bands.iter_mut().find(|b| &b.note == note) {
            band.glow = 1.0;
        }
    }

    /// Advance animations by one frame.
    pub fn tick(&mut self) {
        for band in &mut self.bands {
            band.glow *= GLOW_DECAY;
            if band.glow < 0.02 { band.glow = 0.0; }
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Tests
// ════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> BandState { BandState::new(&NoteScale::default()) }

    #[test]
    fn one_band_per_note() {
        let s = state();
        assert_eq!(s.bands.len(), 8);
        assert_eq!(s.bands[0].note.name(), "C5");
        assert_eq!(s.bands[7].note.name(), "C4");
    }

    #[test]
    fn adjacent_bands_differ_in_color() {
        let s = state();
        for pair in s.bands.windows(2) {
            assert_ne!(pair[0].color, pair[1].color);
        }
    }

    #[test]
    fn colors_are_opaque() {
        for i in 0..8 {
            assert_eq!(band_color(i, 8) >> 24, 0xFF);
        }
    }

    #[test]
    fn flash_then_decay() {
        let mut s = state();
        let g4 = NoteId::parse("G4").unwrap();
        s.flash(&g4);
        assert_eq!(s.bands[3].glow, 1.0);
        s.tick();
        assert!(s.bands[3].glow < 1.0 && s.bands[3].glow > 0.0);
        for _ in 0..100 { s.tick(); }
        assert_eq!(s.bands[3].glow, 0.0);
    }

    #[test]
    fn trail_is_bounded_and_drains() {
        let mut s = state();
        for i in 0..(TRAIL_LEN + 5) {
            s.track(Some((0.5, i as f32 / 100.0)), Some(0));
        }
        assert_eq!(s.trail.len(), TRAIL_LEN);
        assert_eq!(s.trail.last(), Some(&(0.5, (TRAIL_LEN + 4) as f32 / 100.0)));
        for _ in 0..TRAIL_LEN {
            s.track(None, None);
        }
        assert!(s.trail.is_empty());
        assert_eq!(s.hover, None);
    }
}
