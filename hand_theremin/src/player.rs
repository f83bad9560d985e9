//! Real-time MIDI output thread.
//!
//! Note transitions from the pitch mapper (and test-note triggers from the
//! control surface) are sent over a channel and turned into note on/off
//! messages for whatever synthesizer is listening on the MIDI port.  When no
//! port is available the player keeps running against a null output, so the
//! rest of the app never has to care.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use pitch_mapper::{NoteId, NoteTransition};
use serde::Deserialize;

// ════════════════════════════════════════════════════════════════════════════
// Configuration
// ════════════════════════════════════════════════════════════════════════════

/// How a change between two sounding notes reaches the synth.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangePolicy {
    /// Note-off old, then note-on new.  Each note gets a fresh attack.
    #[default]
    Retrigger,
    /// Note-on new, then note-off old.  Mono synths with legato/portamento
    /// glide instead of re-attacking.
    Legato,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PlayerConfig {
    pub port_hint:     Option<String>,
    pub instrument:    u8,
    pub velocity:      u8,
    pub channel:       u8,
    pub change_policy: ChangePolicy,
    pub test_note_ms:  u64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        PlayerConfig {
            port_hint:     None,
            instrument:    80,
            velocity:      100,
            channel:       0,
            change_policy: ChangePolicy::Retrigger,
            test_note_ms:  250,
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// PlayerCommand / PlayedEvent
// ════════════════════════════════════════════════════════════════════════════

#[derive(Clone, Debug, PartialEq)]
pub enum PlayerCommand {
    /// Output of `PitchMapper::process_frame` or `stop`.
    Transition(NoteTransition),
    /// Play a note for `test_note_ms`, bypassing the mapper.
    TestNote(NoteId),
    /// Silence everything, including pending test notes.
    AllNotesOff,
    /// Change instrument (MIDI program 0–127).
    SetInstrument(u8),
    /// Terminate the thread.
    Quit,
}

/// Emitted for every note-on, so the visualizer can flash the band.
#[derive(Clone, Debug, PartialEq)]
pub struct PlayedEvent {
    pub note: NoteId,
    /// True for control-surface test notes.
    pub test: bool,
}

// ════════════════════════════════════════════════════════════════════════════
// MidiOut — abstraction over midir / null (for testing)
// ════════════════════════════════════════════════════════════════════════════

pub(crate) trait MidiOut: Send {
    fn send(&mut self, message: &[u8]);

    fn program_change(&mut self, channel: u8, program: u8) {
        self.send(&[0xC0 | (channel & 0x0F), program & 0x7F]);
    }
    fn note_on(&mut self, channel: u8, note: u8, velocity: u8) {
        self.send(&[0x90 | (channel & 0x0F), note & 0x7F, velocity & 0x7F]);
    }
    fn note_off(&mut self, channel: u8, note: u8) {
        self.send(&[0x80 | (channel & 0x0F), note & 0x7F, 0]);
    }
    /// Channel-mode message 123.
    fn all_notes_off(&mut self, channel: u8) {
        self.send(&[0xB0 | (channel & 0x0F), 123, 0]);
    }
}

// ── midir backend ─────────────────────────────────────────────────────────

struct MidirOut {
    conn: midir::MidiOutputConnection,
}

impl MidiOut for MidirOut {
    fn send(&mut self, message: &[u8]) {
        if let Err(e) = self.conn.send(message) {
            log::debug!(target: "player", "MIDI send {:02X?} failed: {}", message, e);
        }
    }
}

// ── null backend (used when no MIDI port is available) ────────────────────

struct NullOut;
impl MidiOut for NullOut {
    fn send(&mut self, _message: &[u8]) {}
}

// ════════════════════════════════════════════════════════════════════════════
// Port selection
// ════════════════════════════════════════════════════════════════════════════

const CLIENT_NAME: &str = "hand_theremin";

/// Names of all MIDI output ports, in port order.
pub fn list_output_ports() -> Vec<String> {
    let Ok(midi_out) = midir::MidiOutput::new(CLIENT_NAME) else {
        return Vec::new();
    };
    midi_out
        .ports()
        .iter()
        .map(|p| midi_out.port_name(p).unwrap_or_else(|_| "Unknown".to_string()))
        .collect()
}

/// Choose a port: the first whose name contains `hint`, else a known
/// softsynth, else port 0.
fn pick_port(names: &[String], hint: Option<&str>) -> Option<usize> {
    if names.is_empty() {
        return None;
    }
    let lower: Vec<String> = names.iter().map(|n| n.to_lowercase()).collect();

    if let Some(hint) = hint {
        let hint = hint.to_lowercase();
        if let Some(i) = lower.iter().position(|n| n.contains(&hint)) {
            return Some(i);
        }
        log::warn!(target: "player", "no MIDI port matches {:?}", hint);
    }

    let softsynth = lower.iter().position(|n| {
        n.contains("fluid") || n.contains("timidity") ||
        n.contains("microsoft") || n.contains("gm") ||
        n.contains("synth")
    });
    Some(softsynth.unwrap_or(0))
}

/// Try to open a MIDI output port.
/// Falls back to `NullOut` with a warning if none can be opened.
fn open_midi_output(hint: Option<&str>) -> Box<dyn MidiOut> {
    let midi_out = match midir::MidiOutput::new(CLIENT_NAME) {
        Ok(m)  => m,
        Err(e) => {
            log::warn!(target: "player", "MIDI init error: {}; notes will be dropped", e);
            return Box::new(NullOut);
        }
    };

    let ports = midi_out.ports();
    let names: Vec<String> = ports
        .iter()
        .map(|p| midi_out.port_name(p).unwrap_or_else(|_| "Unknown".to_string()))
        .collect();

    let Some(idx) = pick_port(&names, hint) else {
        log::warn!(target: "player", "no MIDI output ports found; notes will be dropped");
        log::warn!(target: "player", "start a synthesizer such as `fluidsynth` or `timidity -iA`");
        return Box::new(NullOut);
    };

    log::info!(target: "player", "opening MIDI port: {}", names[idx]);
    match midi_out.connect(&ports[idx], "hand-theremin-out") {
        Ok(conn) => Box::new(MidirOut { conn }),
        Err(e) => {
            log::warn!(target: "player", "failed to connect: {}; notes will be dropped", e);
            Box::new(NullOut)
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Voice — monophonic note bookkeeping, independent of the thread
// ════════════════════════════════════════════════════════════════════════════

struct Voice {
    out:       Box<dyn MidiOut>,
    cfg:       PlayerConfig,
    /// MIDI number of the mapper-driven note, if sounding.
    sounding:  Option<u8>,
    /// Test notes awaiting their note-off.
    test_offs: Vec<(u8, Instant)>,
}

impl Voice {
    fn new(mut out: Box<dyn MidiOut>, cfg: PlayerConfig) -> Self {
        out.program_change(cfg.channel, cfg.instrument);
        Voice { out, cfg, sounding: None, test_offs: Vec::new() }
    }

    fn on(&mut self, note: u8) {
        self.out.note_on(self.cfg.channel, note, self.cfg.velocity);
    }

    fn off(&mut self, note: u8) {
        self.out.note_off(self.cfg.channel, note);
    }

    /// Note-off for the mapper's held note, unless a test note of the same
    /// pitch is still pending; `expire` sends that note-off when it is due.
    fn release_held(&mut self, note: u8) {
        if self.test_offs.iter().any(|&(n, _)| n == note) {
            return;
        }
        self.off(note);
    }

    /// Apply one transition.  Returns the note that was attacked, if any.
    fn transition(&mut self, t: NoteTransition) -> Option<NoteId> {
        log::debug!(target: "player", "{}", t);
        match t {
            NoteTransition::Attack(note) => {
                self.on(note.midi());
                self.sounding = Some(note.midi());
                Some(note)
            }
            NoteTransition::Release(note) => {
                self.release_held(note.midi());
                self.sounding = None;
                None
            }
            NoteTransition::ChangeNote { from, to } => {
                let (old, new) = (from.midi(), to.midi());
                if old == new {
                    // Enharmonic respelling: under legato the key just stays
                    // down; a retrigger still re-attacks.
                    if self.cfg.change_policy == ChangePolicy::Retrigger {
                        self.off(old);
                        self.on(new);
                    }
                } else {
                    match self.cfg.change_policy {
                        ChangePolicy::Retrigger => { self.release_held(old); self.on(new); }
                        ChangePolicy::Legato    => { self.on(new);  self.release_held(old); }
                    }
                }
                self.sounding = Some(new);
                Some(to)
            }
        }
    }

    fn test_note(&mut self, note: &NoteId, now: Instant) {
        let midi = note.midi();
        self.on(midi);
        let due = now + Duration::from_millis(self.cfg.test_note_ms);
        self.test_offs.retain(|&(n, _)| n != midi);
        self.test_offs.push((midi, due));
    }

    /// Send note-offs for test notes that are due.  A test note that now
    /// doubles the mapper's held note is left sounding.
    fn expire(&mut self, now: Instant) {
        let (due, keep): (Vec<_>, Vec<_>) =
            self.test_offs.drain(..).partition(|&(_, at)| at <= now);
        self.test_offs = keep;
        for (note, _) in due {
            if self.sounding != Some(note) {
                self.off(note);
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.test_offs.iter().map(|&(_, at)| at).min()
    }

    fn silence(&mut self) {
        if let Some(n) = self.sounding.take() {
            self.off(n);
        }
        let pending: Vec<u8> = self.test_offs.drain(..).map(|(n, _)| n).collect();
        for n in pending {
            self.off(n);
        }
        self.out.all_notes_off(self.cfg.channel);
    }

    fn set_instrument(&mut self, program: u8) {
        self.cfg.instrument = program.min(127);
        self.out.program_change(self.cfg.channel, self.cfg.instrument);
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Player — the output thread
// ════════════════════════════════════════════════════════════════════════════

/// Handle to the MIDI output thread.  Dropping it silences the synth and
/// joins the thread.
pub struct Player {
    cmd_tx:    Sender<PlayerCommand>,
    played_rx: Receiver<PlayedEvent>,
    handle:    Option<JoinHandle<()>>,
}

impl Player {
    /// Open a MIDI port (or the null output) and spawn the output thread.
    pub fn spawn(cfg: PlayerConfig) -> Self {
        let out = open_midi_output(cfg.port_hint.as_deref());
        Self::with_output(out, cfg)
    }

    /// A player that drops every message, for headless dry runs.
    pub fn null(cfg: PlayerConfig) -> Self {
        Self::with_output(Box::new(NullOut), cfg)
    }

    pub(crate) fn with_output(out: Box<dyn MidiOut>, cfg: PlayerConfig) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel::<PlayerCommand>();
        let (played_tx, played_rx) = mpsc::channel::<PlayedEvent>();

        let handle = thread::spawn(move || {
            player_thread(Voice::new(out, cfg), cmd_rx, played_tx);
        });

        Player { cmd_tx, played_rx, handle: Some(handle) }
    }

    pub fn send(&self, cmd: PlayerCommand) {
        let _ = self.cmd_tx.send(cmd);
    }

    pub fn transition(&self, t: NoteTransition) { self.send(PlayerCommand::Transition(t)); }
    pub fn test_note(&self, note: NoteId)       { self.send(PlayerCommand::TestNote(note)); }
    pub fn all_notes_off(&self)                 { self.send(PlayerCommand::AllNotesOff); }

    pub fn set_instrument(&self, program: u8) {
        self.send(PlayerCommand::SetInstrument(program));
    }

    /// Drain any pending played events (non-blocking).
    pub fn drain_played(&self) -> Vec<PlayedEvent> {
        self.played_rx.try_iter().collect()
    }

    /// Silence, stop the thread and wait for it.
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.cmd_tx.send(PlayerCommand::Quit);
            let _ = handle.join();
        }
    }
}

impl Drop for Player {
    fn drop(&mut self) { self.shutdown(); }
}

fn player_thread(
    mut voice: Voice,
    cmd_rx:    Receiver<PlayerCommand>,
    played_tx: Sender<PlayedEvent>,
) {
    loop {
        // ── wait for a command or the next test-note release ──────────────
        let cmd = match voice.next_deadline() {
            Some(deadline) => {
                let wait = deadline.saturating_duration_since(Instant::now());
                match cmd_rx.recv_timeout(wait) {
                    Ok(c)                               => Some(c),
                    Err(RecvTimeoutError::Timeout)      => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            None => match cmd_rx.recv() {
                Ok(c)  => Some(c),
                Err(_) => break,
            },
        };

        let now = Instant::now();
        match cmd {
            Some(PlayerCommand::Transition(t)) => {
                if let Some(note) = voice.transition(t) {
                    let _ = played_tx.send(PlayedEvent { note, test: false });
                }
            }
            Some(PlayerCommand::TestNote(note)) => {
                voice.test_note(&note, now);
                let _ = played_tx.send(PlayedEvent { note, test: true });
            }
            Some(PlayerCommand::AllNotesOff)      => voice.silence(),
            Some(PlayerCommand::SetInstrument(p)) => voice.set_instrument(p),
            Some(PlayerCommand::Quit)             => break,
            None                                  => {}
        }
        voice.expire(now);
    }

    voice.silence();
}

// ════════════════════════════════════════════════════════════════════════════
// Tests
// ════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Captures raw MIDI bytes.
    #[derive(Clone, Default)]
    struct RecordingOut {
        log: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl RecordingOut {
        fn messages(&self) -> Vec<Vec<u8>> { self.log.lock().unwrap().clone() }
        fn clear(&self) { self.log.lock().unwrap().clear(); }
    }

    impl MidiOut for RecordingOut {
        fn send(&mut self, message: &[u8]) {
            self.log.lock().unwrap().push(message.to_vec());
        }
    }

    fn note(name: &str) -> NoteId { NoteId::parse(name).unwrap() }

    fn voice(policy: ChangePolicy) -> (Voice, RecordingOut) {
        let rec = RecordingOut::default();
        let cfg = PlayerConfig { change_policy: policy, ..PlayerConfig::default() };
        let v = Voice::new(Box::new(rec.clone()), cfg);
        rec.clear();
        (v, rec)
    }

    #[test]
    fn program_change_on_start() {
        let rec = RecordingOut::default();
        let _v = Voice::new(Box::new(rec.clone()), PlayerConfig { channel: 2, ..PlayerConfig::default() });
        assert_eq!(rec.messages(), vec![vec![0xC2, 80]]);
    }

    #[test]
    fn attack_and_release() {
        let (mut v, rec) = voice(ChangePolicy::Retrigger);
        assert_eq!(v.transition(NoteTransition::Attack(note("C4"))), Some(note("C4")));
        assert_eq!(v.transition(NoteTransition::Release(note("C4"))), None);
        assert_eq!(rec.messages(), vec![vec![0x90, 60, 100], vec![0x80, 60, 0]]);
        assert_eq!(v.sounding, None);
    }

    #[test]
    fn retrigger_releases_before_attack() {
        let (mut v, rec) = voice(ChangePolicy::Retrigger);
        v.transition(NoteTransition::Attack(note("C4")));
        rec.clear();
        v.transition(NoteTransition::ChangeNote { from: note("C4"), to: note("C5") });
        assert_eq!(rec.messages(), vec![vec![0x80, 60, 0], vec![0x90, 72, 100]]);
        assert_eq!(v.sounding, Some(72));
    }

    #[test]
    fn legato_attacks_before_release() {
        let (mut v, rec) = voice(ChangePolicy::Legato);
        v.transition(NoteTransition::Attack(note("C4")));
        rec.clear();
        v.transition(NoteTransition::ChangeNote { from: note("C4"), to: note("D4") });
        assert_eq!(rec.messages(), vec![vec![0x90, 62, 100], vec![0x80, 60, 0]]);
    }

    #[test]
    fn legato_enharmonic_change_keeps_note() {
        let (mut v, rec) = voice(ChangePolicy::Legato);
        v.transition(NoteTransition::Attack(note("C#4")));
        rec.clear();
        v.transition(NoteTransition::ChangeNote { from: note("C#4"), to: note("Db4") });
        assert!(rec.messages().is_empty());
        assert_eq!(v.sounding, Some(61));
    }

    #[test]
    fn retrigger_enharmonic_change_reattacks() {
        let (mut v, rec) = voice(ChangePolicy::Retrigger);
        v.transition(NoteTransition::Attack(note("C#4")));
        rec.clear();
        let played = v.transition(NoteTransition::ChangeNote { from: note("C#4"), to: note("Db4") });
        assert_eq!(played, Some(note("Db4")));
        assert_eq!(rec.messages(), vec![vec![0x80, 61, 0], vec![0x90, 61, 100]]);
        assert_eq!(v.sounding, Some(61));
    }

    #[test]
    fn release_does_not_cut_pending_test_note() {
        let (mut v, rec) = voice(ChangePolicy::Retrigger);
        let t0 = Instant::now();
        v.transition(NoteTransition::Attack(note("A4")));
        v.test_note(&note("A4"), t0);
        rec.clear();
        v.transition(NoteTransition::Release(note("A4")));
        assert!(rec.messages().is_empty());
        assert_eq!(v.sounding, None);
        v.expire(t0 + Duration::from_millis(250));
        assert_eq!(rec.messages(), vec![vec![0x80, 69, 0]]);
    }

    #[test]
    fn change_away_does_not_cut_pending_test_note() {
        let (mut v, rec) = voice(ChangePolicy::Retrigger);
        let t0 = Instant::now();
        v.transition(NoteTransition::Attack(note("A4")));
        v.test_note(&note("A4"), t0);
        rec.clear();
        v.transition(NoteTransition::ChangeNote { from: note("A4"), to: note("G4") });
        assert_eq!(rec.messages(), vec![vec![0x90, 67, 100]]);
        v.expire(t0 + Duration::from_millis(250));
        assert_eq!(rec.messages(), vec![vec![0x90, 67, 100], vec![0x80, 69, 0]]);
    }

    #[test]
    fn test_note_expires() {
        let (mut v, rec) = voice(ChangePolicy::Retrigger);
        let t0 = Instant::now();
        v.test_note(&note("A4"), t0);
        assert_eq!(v.next_deadline(), Some(t0 + Duration::from_millis(250)));
        v.expire(t0 + Duration::from_millis(100));
        assert_eq!(rec.messages(), vec![vec![0x90, 69, 100]]);
        v.expire(t0 + Duration::from_millis(250));
        assert_eq!(rec.messages(), vec![vec![0x90, 69, 100], vec![0x80, 69, 0]]);
        assert_eq!(v.next_deadline(), None);
    }

    #[test]
    fn test_note_does_not_cut_held_note() {
        let (mut v, rec) = voice(ChangePolicy::Retrigger);
        let t0 = Instant::now();
        v.transition(NoteTransition::Attack(note("A4")));
        v.test_note(&note("A4"), t0);
        rec.clear();
        v.expire(t0 + Duration::from_secs(1));
        assert!(rec.messages().is_empty());
        assert_eq!(v.sounding, Some(69));
    }

    #[test]
    fn silence_releases_everything() {
        let (mut v, rec) = voice(ChangePolicy::Retrigger);
        v.transition(NoteTransition::Attack(note("E4")));
        v.test_note(&note("G4"), Instant::now());
        rec.clear();
        v.silence();
        assert_eq!(
            rec.messages(),
            vec![vec![0x80, 64, 0], vec![0x80, 67, 0], vec![0xB0, 123, 0]]
        );
        assert_eq!(v.next_deadline(), None);
    }

    #[test]
    fn pick_port_prefers_hint_then_softsynth() {
        let names: Vec<String> = ["Midi Through", "FLUID Synth (123)", "USB Keys"]
            .iter().map(|s| s.to_string()).collect();
        assert_eq!(pick_port(&names, Some("usb")), Some(2));
        assert_eq!(pick_port(&names, Some("nothing")), Some(1));
        assert_eq!(pick_port(&names, None), Some(1));
        assert_eq!(pick_port(&names[..1], None), Some(0));
        assert_eq!(pick_port(&[], None), None);
    }

    #[test]
    fn threaded_player_reports_and_silences_on_drop() {
        let rec = RecordingOut::default();
        let mut player = Player::with_output(Box::new(rec.clone()), PlayerConfig::default());
        player.transition(NoteTransition::Attack(note("D4")));
        player.test_note(note("F4"));
        player.shutdown();

        let played = player.drain_played();
        assert_eq!(
            played,
            vec![
                PlayedEvent { note: note("D4"), test: false },
                PlayedEvent { note: note("F4"), test: true },
            ]
        );
        let msgs = rec.messages();
        assert!(msgs.contains(&vec![0x80, 62, 0]), "held note released on shutdown");
        assert!(msgs.contains(&vec![0x80, 65, 0]), "pending test note released on shutdown");
    }
}
