//! Top-level application state machine.
//!
//! `AppState` owns the `PitchMapper`, the `Player`, and the `BandState`.
//! It processes landmark frames and control-surface triggers, and drives the
//! visualizer each render frame.  Every landmark frame received is mapped,
//! even when several arrive between two renders; drawing never gates a note
//! change.

use std::io::{BufRead, Write};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::time::Duration;

use pitch_mapper::{NoteId, NoteScale, NoteTransition, PitchMapper};

use crate::bands::BandState;
use crate::config::AppConfig;
use crate::error::Result;
use crate::landmark::{
    spawn_landmark_source, JsonLinesSource, LandmarkFrame, SimLandmarkSource, SourceEvent,
};
use crate::player::{Player, PlayerConfig};
use crate::visualizer::Visualizer;

// ════════════════════════════════════════════════════════════════════════════
// Control surface
// ════════════════════════════════════════════════════════════════════════════

/// Discrete user triggers.  None of these go through the mapper except
/// `Stop`, which silences it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Start,
    Stop,
    /// Play `scale[i]` directly.
    TestNote(usize),
    /// Step the MIDI program up or down.
    ShiftInstrument(i8),
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState { Idle, Running }

// ════════════════════════════════════════════════════════════════════════════
// AppState
// ════════════════════════════════════════════════════════════════════════════

pub struct AppState {
    mapper:    PitchMapper,
    player:    Player,
    bands:     BandState,
    run_state: RunState,
    instrument: u8,
    pub status: String,
}

impl AppState {
    pub fn new(scale: NoteScale, player: Player) -> Self {
        let bands = BandState::new(&scale);
        let status = format!(
            "Ready - {} notes {}..{}  press Enter to start",
            scale.len(),
            scale.notes()[0],
            scale.notes()[scale.len() - 1],
        );
        AppState {
            mapper: PitchMapper::configure(scale),
            player,
            bands,
            run_state: RunState::Idle,
            instrument: PlayerConfig::default().instrument,
            status,
        }
    }

    /// Record the program the player was opened with.
    pub fn with_instrument(mut self, program: u8) -> Self {
        self.instrument = program.min(127);
        self
    }

    // ── control surface ───────────────────────────────────────────────────

    pub fn handle_control(&mut self, control: Control) {
        match control {
            Control::Start => {
                if self.run_state == RunState::Idle {
                    self.run_state = RunState::Running;
                    log::info!(target: "app", "started");
                    self.status = "Running - raise or lower your index finger".to_string();
                }
            }

            Control::Stop => {
                if let Some(t) = self.mapper.stop() {
                    self.forward(t);
                }
                self.player.all_notes_off();
                if self.run_state == RunState::Running {
                    self.run_state = RunState::Idle;
                    log::info!(target: "app", "stopped");
                    self.status = "Stopped - press Enter to start".to_string();
                }
            }

            Control::TestNote(i) => {
                if let Some(note) = self.mapper.scale().get(i).cloned() {
                    log::debug!(target: "app", "test note {}", note);
                    self.status = format!("Test note {}", note);
                    self.player.test_note(note);
                }
            }

            Control::ShiftInstrument(delta) => {
                let program = (self.instrument as i16 + delta as i16).clamp(0, 127) as u8;
                if program != self.instrument {
                    self.instrument = program;
                    log::info!(target: "app", "instrument {}", program);
                    self.status = format!("Instrument {}", program);
                    self.player.set_instrument(program);
                }
            }

            Control::Quit => { /* handled in run loop */ }
        }
    }

    // ── landmark frames ───────────────────────────────────────────────────

    /// Feed one detector frame.  While idle the fingertip is tracked for
    /// display but no notes are played.
    pub fn handle_frame(&mut self, frame: &LandmarkFrame) -> Option<NoteTransition> {
        let tip = frame.fingertip();
        let hover = tip.map(|t| self.mapper.index_for(t.y));
        self.bands.track(tip.map(|t| (t.x as f32, t.y as f32)), hover);

        if self.run_state == RunState::Idle {
            return None;
        }

        let transition = self.mapper.process_frame(frame.observation())?;
        self.forward(transition.clone());
        Some(transition)
    }

    /// The source ran dry; treat it as the hand leaving the frame.
    pub fn source_ended(&mut self) -> Option<NoteTransition> {
        self.bands.track(None, None);
        let t = self.mapper.process_frame(None);
        if let Some(ref t) = t {
            self.forward(t.clone());
        }
        self.status = "Landmark source ended".to_string();
        t
    }

    fn forward(&mut self, t: NoteTransition) {
        log::debug!(target: "app", "{}", t);
        self.bands.active = t
            .sounding()
            .and_then(|n| self.mapper.scale().index_of(n));
        self.status = match &t {
            NoteTransition::Attack(n)               => format!("Playing {}", n),
            NoteTransition::ChangeNote { to, .. }   => format!("Playing {}", to),
            NoteTransition::Release(_)              => "Silent".to_string(),
        };
        self.player.transition(t);
    }

    // ── per-frame tick ────────────────────────────────────────────────────

    pub fn tick(&mut self) {
        self.bands.tick();
        for played in self.player.drain_played() {
            self.bands.flash(&played.note);
        }
    }

    /// Release the held note and stop the player thread.
    pub fn shutdown(&mut self) {
        if let Some(t) = self.mapper.stop() {
            self.forward(t);
        }
        self.player.shutdown();
    }

    // ── accessors for the render loop ─────────────────────────────────────

    pub fn bands(&self)      -> &BandState      { &self.bands }
    pub fn sounding(&self)   -> Option<&NoteId> { self.mapper.sounding() }
    pub fn is_running(&self) -> bool            { self.run_state == RunState::Running }
    pub fn run_state(&self)  -> RunState        { self.run_state }
    pub fn instrument(&self) -> u8              { self.instrument }
}

// ════════════════════════════════════════════════════════════════════════════
// Frame sources for `run`
// ════════════════════════════════════════════════════════════════════════════

/// Where landmark frames come from in windowed mode.
pub enum FrameInput {
    /// Mouse simulation in the visualizer window.
    Mouse,
    /// JSON lines from a file, a pipe, or stdin.
    Replay(Box<dyn BufRead + Send>),
    /// LeapMotion hardware.
    #[cfg(feature = "leap")]
    Leap,
}

// ════════════════════════════════════════════════════════════════════════════
// run() — the windowed application loop
// ════════════════════════════════════════════════════════════════════════════

/// Run the full application.
///
/// Creates the visualizer, the landmark source, and the player, then drives
/// the event/render loop at ~60 fps until the window closes or `Q` is
/// pressed.
pub fn run(cfg: AppConfig, input: FrameInput, player: Player) -> Result<()> {
    let scale = cfg.note_scale()?;

    // ── Landmark source ───────────────────────────────────────────────────
    let (frames_rx, sim_tx) = match input {
        FrameInput::Mouse => {
            let (sim_tx, sim_rx) = mpsc::channel();
            (spawn_landmark_source(SimLandmarkSource { rx: sim_rx }), Some(sim_tx))
        }
        FrameInput::Replay(reader) => {
            let interval = Duration::from_secs_f64(1.0 / cfg.camera.fps as f64);
            (spawn_landmark_source(JsonLinesSource::new(reader).pace(interval)), None)
        }
        #[cfg(feature = "leap")]
        FrameInput::Leap => {
            (spawn_landmark_source(crate::landmark::LeapLandmarkSource::default()), None)
        }
    };

    // ── Visualizer (owns the window and the sim input sender) ────────────
    let mut vis = Visualizer::new(cfg.camera.width, cfg.camera.height, sim_tx)?;

    // ── App state ─────────────────────────────────────────────────────────
    let mut app = AppState::new(scale, player).with_instrument(cfg.midi.instrument);

    // ── Main loop ─────────────────────────────────────────────────────────
    'main: while vis.is_open() {
        // 1. Control surface
        for control in vis.poll_input() {
            if control == Control::Quit { break 'main; }
            app.handle_control(control);
        }

        // 2. Drain landmark frames
        drain_frames(&mut app, &frames_rx);

        // 3. Per-frame logic
        app.tick();

        // 4. Render
        vis.render(app.bands(), &app.status, app.is_running(), app.sounding());
    }

    vis.close();
    app.shutdown();
    Ok(())
}

fn drain_frames(app: &mut AppState, rx: &Receiver<SourceEvent>) {
    loop {
        match rx.try_recv() {
            Ok(SourceEvent::Frame(frame)) => { app.handle_frame(&frame); }
            Ok(SourceEvent::Ended)        => { app.source_ended(); }
            Err(TryRecvError::Empty)        => break,
            Err(TryRecvError::Disconnected) => break,
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// run_headless() — replay without a window
// ════════════════════════════════════════════════════════════════════════════

/// Pull every frame through the mapper and the player, writing one line per
/// transition to `out`.  Returns the number of transitions.
pub fn run_headless<I, W>(scale: NoteScale, frames: I, player: Player, out: &mut W) -> std::io::Result<usize>
where
    I: IntoIterator<Item = LandmarkFrame>,
    W: Write,
{
    let mut app = AppState::new(scale, player);
    app.handle_control(Control::Start);

    let mut count = 0usize;
    let mut frame_no = 0usize;
    for frame in frames {
        if let Some(t) = app.handle_frame(&frame) {
            writeln!(out, "{:>6}  {}", frame_no, t)?;
            count += 1;
        }
        frame_no += 1;
    }

    if let Some(t) = app.source_ended() {
        writeln!(out, "{:>6}  {}", frame_no, t)?;
        count += 1;
    }
    app.shutdown();
    log::info!(target: "app", "{} frames, {} transitions", frame_no, count);
    Ok(count)
}

// ════════════════════════════════════════════════════════════════════════════
// Tests
// ════════════════════════════════════════════════════════════════════════════
