//! Hand-landmark sources.  Frames come from an external detector's JSON
//! output or from mouse simulation; LeapMotion hardware sits behind the
//! `leap` feature.
//!
//! The public interface is [`SourceEvent`] delivered over a `mpsc` channel.
//! Consumers don't need to know whether frames came from a webcam pipeline,
//! a recorded file, or the simulator.
//!
//! Coordinates follow the MediaPipe hand-landmark convention: 21 points per
//! hand, normalized to the image, `y = 0` at the top.  Only the index
//! fingertip (landmark 8) of the first hand is ever read.

use std::io::BufRead;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;

use pitch_mapper::Observation;
use serde::{Deserialize, Serialize};

/// Landmarks per hand in the MediaPipe model.
pub const HAND_LANDMARKS: usize = 21;
/// Index of the index-finger tip.
pub const INDEX_FINGER_TIP: usize = 8;

// ════════════════════════════════════════════════════════════════════════════
// Frame data
// ════════════════════════════════════════════════════════════════════════════

/// One keypoint, normalized to the image (`z` is relative depth).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

/// All keypoints of one detected hand.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HandLandmarks {
    pub landmarks:  Vec<Landmark>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handedness: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score:      Option<f32>,
}

impl HandLandmarks {
    /// A degenerate hand whose every keypoint sits at the given fingertip.
    /// Used by sources that only track a single point.
    pub fn from_index_tip(x: f64, y: f64, z: f64) -> Self {
        HandLandmarks {
            landmarks:  vec![Landmark { x, y, z }; HAND_LANDMARKS],
            handedness: None,
            score:      None,
        }
    }

    /// The index fingertip, or `None` for a truncated landmark list.
    pub fn index_tip(&self) -> Option<Landmark> {
        self.landmarks.get(INDEX_FINGER_TIP).copied()
    }
}

/// Everything the detector reported for one video frame.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LandmarkFrame {
    #[serde(default)]
    pub hands: Vec<HandLandmarks>,
}

/// A JSON line is either `{"hands": [...]}` or just the `[...]`.
#[derive(Deserialize)]
#[serde(untagged)]
enum FrameLine {
    Hands(Vec<HandLandmarks>),
    Frame(LandmarkFrame),
}

impl LandmarkFrame {
    pub fn empty() -> Self { LandmarkFrame { hands: Vec::new() } }

    pub fn single(hand: HandLandmarks) -> Self { LandmarkFrame { hands: vec![hand] } }

    /// Index fingertip of the first detected hand.  Further hands are
    /// ignored.
    pub fn fingertip(&self) -> Option<Landmark> {
        self.hands.first().and_then(HandLandmarks::index_tip)
    }

    /// What the pitch mapper sees for this frame.
    pub fn observation(&self) -> Option<Observation> {
        self.fingertip().map(|tip| Observation::new(tip.y))
    }

    /// Parse one JSON line.  Blank lines yield `Ok(None)`.
    pub fn parse_line(line: &str) -> Result<Option<Self>, serde_json::Error> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let frame = match serde_json::from_str::<FrameLine>(line)? {
            FrameLine::Hands(hands) => LandmarkFrame { hands },
            FrameLine::Frame(frame) => frame,
        };
        Ok(Some(frame))
    }
}

// ════════════════════════════════════════════════════════════════════════════
// LandmarkSource trait — unified interface for all frame producers
// ════════════════════════════════════════════════════════════════════════════

/// Delivered by every source.
#[derive(Clone, Debug, PartialEq)]
pub enum SourceEvent {
    Frame(LandmarkFrame),
    /// The source has no more frames (end of file, device lost, window
    /// closed).
    Ended,
}

/// Anything that can deliver [`SourceEvent`]s over a channel.
pub trait LandmarkSource: Send + 'static {
    fn run(self: Box<Self>, tx: Sender<SourceEvent>);
}

/// Spawn a landmark source on its own thread and return the receiving end.
pub fn spawn_landmark_source<S: LandmarkSource>(source: S) -> Receiver<SourceEvent> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || Box::new(source).run(tx));
    rx
}

// ════════════════════════════════════════════════════════════════════════════
// JsonLinesSource — frames from an external detector or a recording
// ════════════════════════════════════════════════════════════════════════════

/// Reads one JSON frame per line, e.g. piped from a MediaPipe process.
///
/// Malformed lines are logged and skipped; a read error ends the stream.
pub struct JsonLinesSource<R> {
    reader: R,
    pace:   Option<Duration>,
}

impl<R: BufRead> JsonLinesSource<R> {
    pub fn new(reader: R) -> Self {
        JsonLinesSource { reader, pace: None }
    }

    /// Sleep `interval` after each delivered frame (threaded use only).
    pub fn pace(mut self, interval: Duration) -> Self {
        self.pace = Some(interval);
        self
    }

    /// Pull frames synchronously on the calling thread.
    pub fn into_frames(self) -> impl Iterator<Item = LandmarkFrame> {
        self.reader
            .lines()
            .enumerate()
            .map_while(|(i, line)| match line {
                Ok(text) => Some((i + 1, text)),
                Err(e) => {
                    log::warn!(target: "landmark", "read error after line {}: {}", i, e);
                    None
                }
            })
            .filter_map(|(lineno, text)| match LandmarkFrame::parse_line(&text) {
                Ok(frame) => frame,
                Err(e) => {
                    log::warn!(target: "landmark", "skipping line {}: {}", lineno, e);
                    None
                }
            })
    }
}

impl<R: BufRead + Send + 'static> LandmarkSource for JsonLinesSource<R> {
    fn run(self: Box<Self>, tx: Sender<SourceEvent>) {
        let this = *self;
        let pace = this.pace;
        let mut delivered = 0usize;
        for frame in this.into_frames() {
            if tx.send(SourceEvent::Frame(frame)).is_err() { return; }
            delivered += 1;
            if let Some(p) = pace { thread::sleep(p); }
        }
        log::info!(target: "landmark", "replay finished after {} frames", delivered);
        let _ = tx.send(SourceEvent::Ended);
    }
}

// ════════════════════════════════════════════════════════════════════════════
// SimLandmarkSource — mouse simulation (always available)
// ════════════════════════════════════════════════════════════════════════════

/// Raw pointer input from the visualizer window.
#[derive(Clone, Debug, PartialEq)]
pub enum SimInput {
    /// Normalized pointer position while the "hand" is present, `None`
    /// otherwise.  Sent once per window frame.
    Pointer(Option<(f64, f64)>),
    Quit,
}

/// Turns [`SimInput`] from the window into landmark frames, so the window
/// event loop stays independent of frame handling.
pub struct SimLandmarkSource {
    pub rx: Receiver<SimInput>,
}

impl SimLandmarkSource {
    fn translate(input: SimInput) -> Option<LandmarkFrame> {
        match input {
            SimInput::Pointer(Some((x, y))) =>
                Some(LandmarkFrame::single(HandLandmarks::from_index_tip(x, y, 0.0))),
            SimInput::Pointer(None) => Some(LandmarkFrame::empty()),
            SimInput::Quit          => None,
        }
    }
}

impl LandmarkSource for SimLandmarkSource {
    fn run(self: Box<Self>, tx: Sender<SourceEvent>) {
        for input in self.rx {
            let Some(frame) = Self::translate(input) else { break };
            if tx.send(SourceEvent::Frame(frame)).is_err() { return; }
        }
        let _ = tx.send(SourceEvent::Ended);
    }
}

// ════════════════════════════════════════════════════════════════════════════
// LeapLandmarkSource — real hardware (feature = "leap")
// ════════════════════════════════════════════════════════════════════════════

/// Index fingertip from a LeapMotion controller.
///
/// Requires the `leap` feature flag and the LeapC shared library installed.
/// Leap reports millimetres with `y` pointing up; the tip height is mapped
/// linearly from `[floor_mm, ceiling_mm]` onto image-style `y ∈ [1, 0]`.
/// Poll timeout for the Leap connection.
#[cfg(feature = "leap")]
const LEAP_POLL_MS: u32 = 100;

/// Consecutive failed polls (about five seconds) before the device counts
/// as lost.
#[cfg(any(feature = "leap", test))]
const MAX_POLL_FAILURES: u32 = 50;

/// True once `failures` consecutive polls have failed.
#[cfg(any(feature = "leap", test))]
fn poll_failures_exhausted(failures: u32) -> bool {
    failures >= MAX_POLL_FAILURES
}

#[cfg(feature = "leap")]
pub struct LeapLandmarkSource {
    pub floor_mm:   f32,
    pub ceiling_mm: f32,
    /// Half-width of the tracked region along x.
    pub half_width_mm: f32,
}

#[cfg(feature = "leap")]
impl Default for LeapLandmarkSource {
    fn default() -> Self {
        LeapLandmarkSource { floor_mm: 100.0, ceiling_mm: 450.0, half_width_mm: 200.0 }
    }
}

#[cfg(feature = "leap")]
impl LeapLandmarkSource {
    fn normalize(&self, x_mm: f32, y_mm: f32) -> (f32, f32) {
        let span = (self.ceiling_mm - self.floor_mm).max(1.0);
        let y = 1.0 - (y_mm - self.floor_mm) / span;
        let x = (x_mm + self.half_width_mm) / (2.0 * self.half_width_mm).max(1.0);
        (x.clamp(0.0, 1.0), y.clamp(0.0, 1.0))
    }
}

#[cfg(feature = "leap")]
impl LandmarkSource for LeapLandmarkSource {
    fn run(self: Box<Self>, tx: Sender<SourceEvent>) {
        use leaprs::*;

        let mut connection = match Connection::create(ConnectionConfig::default()) {
            Ok(c)  => c,
            Err(e) => {
                log::error!(target: "landmark", "LeapC connection failed: {:?}", e);
                let _ = tx.send(SourceEvent::Ended);
                return;
            }
        };
        if let Err(e) = connection.open() {
            log::error!(target: "landmark", "could not open LeapMotion device: {:?}", e);
            let _ = tx.send(SourceEvent::Ended);
            return;
        }

        let mut failures = 0u32;
        loop {
            let msg = match connection.poll(LEAP_POLL_MS) {
                Ok(m)  => { failures = 0; m }
                Err(e) => {
                    failures += 1;
                    if poll_failures_exhausted(failures) {
                        log::error!(
                            target: "landmark",
                            "LeapMotion lost after {} failed polls: {:?}", failures, e
                        );
                        let _ = tx.send(SourceEvent::Ended);
                        return;
                    }
                    continue;
                }
            };

            if let Event::Tracking(frame) = msg.event() {
                let hands = frame
                    .hands()
                    .iter()
                    .map(|hand| {
                        let tip = hand.index().distal().next_joint();
                        let (x, y) = self.normalize(tip.x(), tip.y());
                        HandLandmarks::from_index_tip(x as f64, y as f64, 0.0)
                    })
                    .collect();
                if tx.send(SourceEvent::Frame(LandmarkFrame { hands })).is_err() {
                    return;
                }
            }
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Tests
// ════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn hand_json(tip_y: f64) -> String {
        let mut points = vec![r#"{"x":0.5,"y":0.5,"z":0.0}"#.to_string(); HAND_LANDMARKS];
        points[INDEX_FINGER_TIP] = format!(r#"{{"x":0.4,"y":{},"z":-0.02}}"#, tip_y);
        format!(r#"{{"landmarks":[{}],"handedness":"Right","score":0.97}}"#, points.join(","))
    }

    #[test]
    fn parse_frame_object() {
        let line = format!(r#"{{"hands":[{}]}}"#, hand_json(0.25));
        let frame = LandmarkFrame::parse_line(&line).unwrap().unwrap();
        assert_eq!(frame.hands.len(), 1);
        assert_eq!(frame.hands[0].handedness.as_deref(), Some("Right"));
        assert_eq!(frame.observation(), Some(Observation::new(0.25)));
    }

    #[test]
    fn parse_bare_array() {
        let line = format!("[{},{}]", hand_json(0.75), hand_json(0.1));
        let frame = LandmarkFrame::parse_line(&line).unwrap().unwrap();
        assert_eq!(frame.hands.len(), 2);
        // Only the first hand counts.
        assert_eq!(frame.observation(), Some(Observation::new(0.75)));
    }

    #[test]
    fn decimal_tip_height_survives_parsing() {
        let line = format!(r#"{{"hands":[{}]}}"#, hand_json(0.9));
        let frame = LandmarkFrame::parse_line(&line).unwrap().unwrap();
        assert_eq!(frame.observation(), Some(Observation::new(0.9)));

        let names: Vec<String> = (0..10).map(|i| format!("C{}", i.min(9))).collect();
        let mapper = pitch_mapper::PitchMapper::from_names(&names).unwrap();
        assert_eq!(mapper.index_for(frame.observation().unwrap().y), 9);
    }

    #[test]
    fn parse_empty_detections() {
        assert_eq!(LandmarkFrame::parse_line("[]").unwrap(), Some(LandmarkFrame::empty()));
        assert_eq!(LandmarkFrame::parse_line(r#"{"hands":[]}"#).unwrap(), Some(LandmarkFrame::empty()));
        assert_eq!(LandmarkFrame::parse_line("{}").unwrap(), Some(LandmarkFrame::empty()));
        assert_eq!(LandmarkFrame::parse_line("   ").unwrap(), None);
        assert_eq!(LandmarkFrame::empty().observation(), None);
    }

    #[test]
    fn parse_garbage_is_error() {
        assert!(LandmarkFrame::parse_line("not json").is_err());
        assert!(LandmarkFrame::parse_line(r#"{"hands":3}"#).is_err());
    }

    #[test]
    fn truncated_hand_counts_as_absent() {
        let hand = HandLandmarks {
            landmarks: vec![Landmark::default(); 5],
            ..HandLandmarks::default()
        };
        assert_eq!(LandmarkFrame::single(hand).observation(), None);
    }

    #[test]
    fn json_lines_skips_bad_lines() {
        let input = format!(
            "{}\n\nnonsense\n[]\n{{\"hands\":[{}]}}\n",
            hand_json(0.9), hand_json(0.1)
        );
        // First line is a bare hand object, not a frame; it parses as an
        // empty frame because `hands` is missing.
        let frames: Vec<_> = JsonLinesSource::new(Cursor::new(input)).into_frames().collect();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].observation(), None);
        assert_eq!(frames[1].observation(), None);
        assert_eq!(frames[2].observation(), Some(Observation::new(0.1)));
    }

    #[test]
    fn spawned_json_source_ends() {
        let input = format!("[{}]\n[]\n", hand_json(0.5));
        let rx = spawn_landmark_source(JsonLinesSource::new(Cursor::new(input)));
        let events: Vec<_> = rx.iter().collect();
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], SourceEvent::Frame(f) if f.hands.len() == 1));
        assert_eq!(events[1], SourceEvent::Frame(LandmarkFrame::empty()));
        assert_eq!(events[2], SourceEvent::Ended);
    }

    #[test]
    fn device_is_lost_after_repeated_poll_failures() {
        assert!(!poll_failures_exhausted(1));
        assert!(!poll_failures_exhausted(MAX_POLL_FAILURES - 1));
        assert!(poll_failures_exhausted(MAX_POLL_FAILURES));
    }

    #[test]
    fn sim_source_translates_pointer() {
        let (tx, sim_rx) = mpsc::channel();
        let rx = spawn_landmark_source(SimLandmarkSource { rx: sim_rx });
        tx.send(SimInput::Pointer(Some((0.3, 0.6)))).unwrap();
        tx.send(SimInput::Pointer(None)).unwrap();
        tx.send(SimInput::Quit).unwrap();

        let events: Vec<_> = rx.iter().collect();
        assert_eq!(events.len(), 3);
        match &events[0] {
            SourceEvent::Frame(f) => {
                let tip = f.fingertip().unwrap();
                assert_eq!((tip.x, tip.y), (0.3, 0.6));
            }
            other => panic!("expected frame, got {:?}", other),
        }
        assert_eq!(events[1], SourceEvent::Frame(LandmarkFrame::empty()));
        assert_eq!(events[2], SourceEvent::Ended);
    }
}
