//! Command-line flags.  Every flag overrides the matching config-file key.

use std::path::PathBuf;

use clap::Parser;

use hand_theremin::config::AppConfig;
use hand_theremin::player::ChangePolicy;

/// Fingertip-height theremin with MIDI output
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// TOML config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Comma-separated note names, top of the frame first (e.g. C5,B4,A4)
    #[arg(short, long, value_delimiter = ',')]
    pub scale: Option<Vec<String>>,

    /// Replay JSON-lines landmark frames from FILE (`-` for stdin)
    #[arg(short, long, value_name = "FILE")]
    pub replay: Option<PathBuf>,

    /// No window: print each transition of the replayed frames
    #[arg(long, requires = "replay")]
    pub headless: bool,

    /// Replay pacing in frames per second
    #[arg(long)]
    pub fps: Option<u32>,

    /// Case-insensitive substring of the MIDI output port name
    #[arg(short, long)]
    pub port: Option<String>,

    /// Overlap notes on a change instead of retriggering
    #[arg(long)]
    pub legato: bool,

    /// List MIDI output ports and exit
    #[arg(long)]
    pub list_ports: bool,

    /// Use the LeapMotion controller as the landmark source
    #[cfg(feature = "leap")]
    #[arg(long, conflicts_with = "replay")]
    pub leap: bool,

    /// Debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Fold the flags into `cfg`.
    pub fn apply(&self, cfg: &mut AppConfig) {
        if let Some(scale) = &self.scale {
            cfg.scale = scale.iter().map(|s| s.trim().to_string()).collect();
        }
        if let Some(fps) = self.fps {
            cfg.camera.fps = fps;
        }
        if let Some(port) = &self.port {
            cfg.midi.port_hint = Some(port.clone());
        }
        if self.legato {
            cfg.midi.change_policy = ChangePolicy::Legato;
        }
    }
}
