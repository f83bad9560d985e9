//! # pitch_mapper
//!
//! Turn a stream of normalized fingertip heights into monophonic note
//! transitions for an external synthesizer.
//!
//! * The screen is split top-to-bottom into `N` equal bands, one per entry
//!   of a [`NoteScale`].  Band `i` covers `y ∈ [i/N, (i+1)/N)`.
//! * A [`PitchMapper`] remembers the one note currently sounding and only
//!   reports a [`NoteTransition`] when that note changes, so a held hand
//!   does not retrigger the same pitch thirty times a second.
//!
//! No I/O happens here; the caller pulls a frame from its vision pipeline,
//! hands the observation to [`PitchMapper::process_frame`], and forwards the
//! result to whatever audio engine it has.
//!
//! ## Quick start
//!
//! ```rust
//! use pitch_mapper::{NoteTransition, Observation, PitchMapper};
//!
//! let mut mapper = PitchMapper::from_names(
//!     &["C5", "B4", "A4", "G4", "F4", "E4", "D4", "C4"],
//! ).unwrap();
//!
//! // Hand near the bottom of the frame → lowest note.
//! let t = mapper.process_frame(Some(Observation::new(0.9)));
//! assert!(matches!(t, Some(NoteTransition::Attack(ref n)) if n.name() == "C4"));
//!
//! // Same band again → nothing to do.
//! assert_eq!(mapper.process_frame(Some(Observation::new(0.92))), None);
//!
//! // Hand leaves the frame → release.
//! assert!(matches!(mapper.process_frame(None), Some(NoteTransition::Release(_))));
//! ```

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

// ════════════════════════════════════════════════════════════════════════════
// ConfigError
// ════════════════════════════════════════════════════════════════════════════

/// Construction-time failures.  Once a mapper exists it cannot fail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The note table has no entries.
    #[error("note scale must contain at least one note")]
    EmptyScale,

    /// A note name could not be parsed as scientific pitch notation.
    #[error("invalid note name {name:?}: {reason}")]
    InvalidNote {
        name:   String,
        reason: &'static str,
    },
}

// ════════════════════════════════════════════════════════════════════════════
// NoteId — a named pitch such as "C5" or "F#4"
// ════════════════════════════════════════════════════════════════════════════

/// A note identifier in scientific pitch notation.
///
/// The spelling is kept as given (letter upper-cased), so `"C#4"` and
/// `"Db4"` are different identifiers even though both resolve to MIDI 61.
///
/// ```rust
/// use pitch_mapper::NoteId;
///
/// let a4: NoteId = "A4".parse().unwrap();
/// assert_eq!(a4.midi(), 69);
/// assert_eq!(NoteId::parse("c4").unwrap().name(), "C4");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NoteId {
    name: String,
    midi: u8,
}

impl NoteId {
    /// Parse `letter [accidentals] octave`, e.g. `C5`, `F#4`, `Bb3`, `C-1`.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let invalid = |reason| ConfigError::InvalidNote { name: text.to_string(), reason };

        let trimmed = text.trim();
        let mut chars = trimmed.chars();
        let letter = chars.next().ok_or_else(|| invalid("empty name"))?;
        let letter = letter.to_ascii_uppercase();
        let base: i32 = match letter {
            'C' => 0,
            'D' => 2,
            'E' => 4,
            'F' => 5,
            'G' => 7,
            'A' => 9,
            'B' => 11,
            _   => return Err(invalid("note letter must be A-G")),
        };

        let rest = chars.as_str();
        let accidental_len = rest
            .find(|c: char| c != '#' && c != 'b')
            .unwrap_or(rest.len());
        let (accidentals, octave_text) = rest.split_at(accidental_len);
        if accidentals.len() > 2 {
            return Err(invalid("at most two accidentals"));
        }
        let shift: i32 = accidentals
            .chars()
            .map(|c| if c == '#' { 1 } else { -1 })
            .sum();

        if octave_text.is_empty() {
            return Err(invalid("missing octave"));
        }
        let octave: i32 = octave_text
            .parse()
            .map_err(|_| invalid("octave must be an integer"))?;
        if !(-1..=9).contains(&octave) {
            return Err(invalid("octave out of range -1..=9"));
        }

        let midi = (octave + 1) * 12 + base + shift;
        if !(0..=127).contains(&midi) {
            return Err(invalid("pitch outside MIDI range 0-127"));
        }

        Ok(NoteId {
            name: format!("{}{}{}", letter, accidentals, octave),
            midi: midi as u8,
        })
    }

    /// Canonical spelling, e.g. `"F#4"`.
    pub fn name(&self) -> &str { &self.name }

    /// MIDI note number (middle C = 60).
    pub fn midi(&self) -> u8 { self.midi }

    /// Equal-tempered frequency in Hz (A4 = 440 Hz).
    pub fn frequency(&self) -> f32 {
        440.0 * 2f32.powf((self.midi as f32 - 69.0) / 12.0)
    }
}

impl FromStr for NoteId {
    type Err = ConfigError;
    fn from_str(s: &str) -> Result<Self, Self::Err> { NoteId::parse(s) }
}

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

// ════════════════════════════════════════════════════════════════════════════
// NoteScale — the fixed, top-to-bottom note table
// ════════════════════════════════════════════════════════════════════════════

/// Ordered, non-empty sequence of notes.  Index 0 is the top of the screen.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NoteScale {
    notes: Vec<NoteId>,
}

impl NoteScale {
    /// Build a scale from already-parsed notes.
    pub fn new(notes: Vec<NoteId>) -> Result<Self, ConfigError> {
        if notes.is_empty() {
            return Err(ConfigError::EmptyScale);
        }
        Ok(NoteScale { notes })
    }

    /// Parse and build in one step.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, ConfigError> {
        let notes = names
            .iter()
            .map(|n| NoteId::parse(n.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        NoteScale::new(notes)
    }

    /// Number of bands.  Always ≥ 1.
    pub fn len(&self) -> usize { self.notes.len() }

    /// Always false; present for API symmetry with `len`.
    pub fn is_empty(&self) -> bool { self.notes.is_empty() }

    pub fn get(&self, index: usize) -> Option<&NoteId> { self.notes.get(index) }

    pub fn notes(&self) -> &[NoteId] { &self.notes }

    pub fn iter(&self) -> std::slice::Iter<'_, NoteId> { self.notes.iter() }

    /// Position of `note` in the table, if present.
    pub fn index_of(&self, note: &NoteId) -> Option<usize> {
        self.notes.iter().position(|n| n == note)
    }
}

impl Default for NoteScale {
    /// One octave of C major, C5 at the top down to C4 at the bottom.
    fn default() -> Self {
        const NAMES: [&str; 8] = ["C5", "B4", "A4", "G4", "F4", "E4", "D4", "C4"];
        let notes = NAMES
            .iter()
            .filter_map(|n| NoteId::parse(n).ok())
            .collect();
        NoteScale { notes }
    }
}

impl<'a> IntoIterator for &'a NoteScale {
    type Item = &'a NoteId;
    type IntoIter = std::slice::Iter<'a, NoteId>;
    fn into_iter(self) -> Self::IntoIter { self.notes.iter() }
}

// ════════════════════════════════════════════════════════════════════════════
// Observation / NoteTransition
// ════════════════════════════════════════════════════════════════════════════

/// One tracked fingertip in one frame.  `y` is 0.0 at the top of the image
/// and 1.0 at the bottom.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Observation {
    pub y: f64,
}

impl Observation {
    pub fn new(y: f64) -> Self { Observation { y } }
}

/// What the audio engine should do after a frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NoteTransition {
    /// Silence → `note`.
    Attack(NoteId),
    /// `note` → silence.
    Release(NoteId),
    /// One note sounding → another.  Release `from` before attacking `to`
    /// on a monophonic synth, or glide between them.
    ChangeNote { from: NoteId, to: NoteId },
}

impl NoteTransition {
    /// The note sounding after this transition, if any.
    pub fn sounding(&self) -> Option<&NoteId> {
        match self {
            NoteTransition::Attack(n)             => Some(n),
            NoteTransition::ChangeNote { to, .. } => Some(to),
            NoteTransition::Release(_)            => None,
        }
    }
}

impl fmt::Display for NoteTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoteTransition::Attack(n)               => write!(f, "attack {}", n),
            NoteTransition::Release(n)              => write!(f, "release {}", n),
            NoteTransition::ChangeNote { from, to } => write!(f, "change {} -> {}", from, to),
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// PitchMapper
// ════════════════════════════════════════════════════════════════════════════

/// Height → note mapping with one-note debounce.
///
/// Exactly one `process_frame` or `stop` call may run at a time; the
/// mapper holds no locks.
#[derive(Clone, Debug)]
pub struct PitchMapper {
    scale:       NoteScale,
    last_played: Option<NoteId>,
}

impl PitchMapper {
    /// A silent mapper over `scale`.
    pub fn configure(scale: NoteScale) -> Self {
        PitchMapper { scale, last_played: None }
    }

    /// Parse `names` into a scale and configure a mapper over it.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, ConfigError> {
        Ok(PitchMapper::configure(NoteScale::from_names(names)?))
    }

    pub fn scale(&self) -> &NoteScale { &self.scale }

    /// The note currently sounding, if any.
    pub fn sounding(&self) -> Option<&NoteId> { self.last_played.as_ref() }

    /// Band index for height `y`.
    ///
    /// `y` is clamped to `[0, 1]` first; NaN counts as the top of the frame.
    /// `y == 1.0` lands in the last band rather than one past it.
    pub fn index_for(&self, y: f64) -> usize {
        let n = self.scale.len();
        let y = if y.is_nan() { 0.0 } else { y.clamp(0.0, 1.0) };
        let index = (y * n as f64).floor() as usize;
        index.min(n - 1)
    }

    /// Note for height `y`, without touching the mapper state.
    pub fn note_for(&self, y: f64) -> &NoteId {
        &self.scale.notes[self.index_for(y)]
    }

    /// Advance by one video frame.
    ///
    /// `None` means no hand was detected.  Returns at most one transition.
    pub fn process_frame(&mut self, observation: Option<Observation>) -> Option<NoteTransition> {
        let Some(obs) = observation else {
            return self.stop();
        };

        let note = self.note_for(obs.y).clone();
        if self.last_played.as_ref() == Some(&note) {
            return None;
        }

        match self.last_played.replace(note.clone()) {
            Some(from) => Some(NoteTransition::ChangeNote { from, to: note }),
            None       => Some(NoteTransition::Attack(note)),
        }
    }

    /// Silence the mapper.  Releases the sounding note, if any.
    pub fn stop(&mut self) -> Option<NoteTransition> {
        self.last_played.take().map(NoteTransition::Release)
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Tests
// ════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    const C_MAJOR_DOWN: [&str; 8] = ["C5", "B4", "A4", "G4", "F4", "E4", "D4", "C4"];

    fn note(name: &str) -> NoteId { NoteId::parse(name).unwrap() }

    fn mapper() -> PitchMapper { PitchMapper::from_names(&C_MAJOR_DOWN).unwrap() }

    // ── NoteId ────────────────────────────────────────────────────────────
    #[test]
    fn parse_naturals() {
        assert_eq!(note("C4").midi(), 60);
        assert_eq!(note("A4").midi(), 69);
        assert_eq!(note("C5").midi(), 72);
        assert_eq!(note("B4").midi(), 71);
    }

    #[test]
    fn parse_accidentals() {
        assert_eq!(note("F#4").midi(), 66);
        assert_eq!(note("Bb3").midi(), 58);
        assert_eq!(note("C##4").midi(), 62);
        assert_ne!(note("C#4"), note("Db4"));
        assert_eq!(note("C#4").midi(), note("Db4").midi());
    }

    #[test]
    fn parse_extremes() {
        assert_eq!(note("C-1").midi(), 0);
        assert_eq!(note("G9").midi(), 127);
        assert!(NoteId::parse("G#9").is_err());
        assert!(NoteId::parse("Cb-1").is_err());
    }

    #[test]
    fn parse_lowercase_letter_is_canonicalised() {
        assert_eq!(note("e4").name(), "E4");
        assert_eq!(note(" g3 ").name(), "G3");
    }

    #[test]
    fn parse_rejects_garbage() {
        for bad in ["", "H4", "C", "C#", "C#x", "Cbbb4", "C10"] {
            assert!(
                matches!(NoteId::parse(bad), Err(ConfigError::InvalidNote { .. })),
                "{bad:?} should not parse"
            );
        }
    }

    #[test]
    fn a4_frequency() {
        assert!((note("A4").frequency() - 440.0).abs() < 1e-3);
        assert!((note("A5").frequency() - 880.0).abs() < 1e-2);
    }

    // ── NoteScale ─────────────────────────────────────────────────────────
    #[test]
    fn empty_scale_is_rejected() {
        assert_eq!(NoteScale::new(Vec::new()), Err(ConfigError::EmptyScale));
        let empty: [&str; 0] = [];
        assert!(matches!(PitchMapper::from_names(&empty), Err(ConfigError::EmptyScale)));
    }

    #[test]
    fn bad_name_in_scale_is_rejected() {
        let err = NoteScale::from_names(&["C5", "X4"]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidNote { ref name, .. } if name == "X4"));
    }

    #[test]
    fn default_scale_is_c_major_descending() {
        let s = NoteScale::default();
        assert_eq!(s.len(), 8);
        let names: Vec<&str> = s.iter().map(NoteId::name).collect();
        assert_eq!(names, C_MAJOR_DOWN);
        assert_eq!(s.index_of(&note("G4")), Some(3));
    }

    // ── Mapping ───────────────────────────────────────────────────────────
    #[test]
    fn boundaries_map_to_first_and_last() {
        let m = mapper();
        assert_eq!(m.note_for(0.0).name(), "C5");
        assert_eq!(m.note_for(1.0).name(), "C4");
    }

    #[test]
    fn out_of_range_is_clamped() {
        let m = mapper();
        assert_eq!(m.index_for(-0.3), 0);
        assert_eq!(m.index_for(1.7), 7);
        assert_eq!(m.index_for(f64::NAN), 0);
        assert_eq!(m.index_for(f64::INFINITY), 7);
    }

    #[test]
    fn bands_partition_unit_interval() {
        for n in 1..=12usize {
            let names: Vec<String> = (0..n).map(|i| format!("C{}", i.min(9))).collect();
            let m = PitchMapper::from_names(&names).unwrap();
            for i in 0..n {
                let lo  = i as f64 / n as f64;
                let mid = (i as f64 + 0.5) / n as f64;
                let hi  = (i as f64 + 0.999) / n as f64;
                assert_eq!(m.index_for(lo),  i, "n={n} left edge of band {i}");
                assert_eq!(m.index_for(mid), i, "n={n} mid of band {i}");
                assert_eq!(m.index_for(hi),  i, "n={n} top of band {i}");
            }
        }
    }

    #[test]
    fn decimal_band_edges_land_in_their_own_band() {
        let names: Vec<String> = (0..10).map(|i| format!("C{}", i.min(9))).collect();
        let m = PitchMapper::from_names(&names).unwrap();
        assert_eq!(m.index_for(0.1), 1);
        assert_eq!(m.index_for(0.3), 3);
        assert_eq!(m.index_for(0.7), 7);
        assert_eq!(m.index_for(0.9), 9);
        assert_eq!(m.index_for(0.8999), 8);
    }

    #[test]
    fn single_note_scale_always_maps_to_it() {
        let m = PitchMapper::from_names(&["A4"]).unwrap();
        for y in [0.0, 0.25, 0.5, 0.999, 1.0] {
            assert_eq!(m.note_for(y).name(), "A4");
        }
    }

    // ── Debounce state machine ────────────────────────────────────────────
    #[test]
    fn held_position_emits_once() {
        let mut m = mapper();
        let first = m.process_frame(Some(Observation::new(0.4)));
        assert_eq!(first, Some(NoteTransition::Attack(note("G4"))));
        for _ in 0..30 {
            assert_eq!(m.process_frame(Some(Observation::new(0.4))), None);
        }
        // Moving within the same band is still silent.
        assert_eq!(m.process_frame(Some(Observation::new(0.45))), None);
        assert_eq!(m.sounding(), Some(&note("G4")));
    }

    #[test]
    fn attack_then_change_reports_both_ends() {
        let mut m = mapper();
        assert_eq!(
            m.process_frame(Some(Observation::new(0.9))),
            Some(NoteTransition::Attack(note("C4")))
        );
        assert_eq!(
            m.process_frame(Some(Observation::new(0.1))),
            Some(NoteTransition::ChangeNote { from: note("C4"), to: note("C5") })
        );
    }

    #[test]
    fn absence_releases_once() {
        let mut m = mapper();
        m.process_frame(Some(Observation::new(0.6)));
        assert_eq!(m.process_frame(None), Some(NoteTransition::Release(note("F4"))));
        assert_eq!(m.process_frame(None), None);
        assert_eq!(m.sounding(), None);
    }

    #[test]
    fn absence_while_silent_is_noop() {
        let mut m = mapper();
        assert_eq!(m.process_frame(None), None);
    }

    #[test]
    fn stop_releases_and_clears() {
        let mut m = mapper();
        assert_eq!(m.stop(), None);
        m.process_frame(Some(Observation::new(0.0)));
        assert_eq!(m.stop(), Some(NoteTransition::Release(note("C5"))));
        assert_eq!(m.stop(), None);
        // After a stop the same height attacks again.
        assert_eq!(
            m.process_frame(Some(Observation::new(0.0))),
            Some(NoteTransition::Attack(note("C5")))
        );
    }

    #[test]
    fn repeated_name_in_scale_does_not_retrigger() {
        let mut m = PitchMapper::from_names(&["C4", "C4", "D4"]).unwrap();
        assert!(m.process_frame(Some(Observation::new(0.1))).is_some());
        assert_eq!(m.process_frame(Some(Observation::new(0.5))), None);
    }

    #[test]
    fn transition_sounding_and_display() {
        let t = NoteTransition::ChangeNote { from: note("C4"), to: note("D4") };
        assert_eq!(t.sounding(), Some(&note("D4")));
        assert_eq!(t.to_string(), "change C4 -> D4");
        assert_eq!(NoteTransition::Release(note("C4")).sounding(), None);
    }
}
