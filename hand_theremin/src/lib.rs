//! # hand_theremin
//!
//! Play a monophonic instrument by raising and lowering your index finger.
//! Hand-landmark frames go in; the fingertip height picks one note of a
//! fixed scale; MIDI note-on/off goes out, and a software-rendered window
//! shows which note band the finger is in.
//!
//! ## Pipeline
//!
//! | Stage | Module | Thread |
//! |---|---|---|
//! | Landmark frames (mouse, JSON lines, LeapMotion) | [`landmark`] | source thread |
//! | Height → note, one-note debounce | `pitch_mapper` | UI thread |
//! | Note-on/off, test notes, instrument | [`player`] | player thread |
//! | Band glow and fingertip trail | [`bands`] | UI thread |
//! | Window, keys, mouse | [`visualizer`] | UI thread |
//! | Start/stop, wiring | [`app`] | UI thread |
//!
//! ## Feature flags
//!
//! * (default): mouse simulation in the window, or JSON-lines replay.
//! * `leap`: index fingertip from a real LeapMotion controller via LeapC.
//!
//! ### Keys
//!
//! | Key | Action |
//! |---|---|
//! | `Enter` | Start mapping frames to notes |
//! | `Escape` | Stop and silence |
//! | `1`–`9` | Test note: play that band's note briefly |
//! | `Up` / `Down` | Next / previous MIDI instrument |
//! | Left mouse button | Simulated fingertip (mouse mode) |
//! | `Q` | Quit |

pub mod app;
pub mod bands;
pub mod config;
pub mod error;
pub mod landmark;
pub mod player;
pub mod visualizer;
