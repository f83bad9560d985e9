//! hand_theremin: interactive entry point.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use log::info;

use hand_theremin::app::{self, FrameInput};
use hand_theremin::config::AppConfig;
use hand_theremin::landmark::JsonLinesSource;
use hand_theremin::player::{list_output_ports, Player};

mod cli;
use cli::Cli;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    if cli.list_ports {
        let ports = list_output_ports();
        if ports.is_empty() {
            println!("No MIDI output ports.");
        }
        for (i, name) in ports.iter().enumerate() {
            println!("{:>3}  {}", i, name);
        }
        return Ok(());
    }

    // ── Configuration: file, then flags ───────────────────────────────────
    let mut cfg = match &cli.config {
        Some(path) => AppConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => AppConfig::default(),
    };
    cli.apply(&mut cfg);
    cfg.validate().context("invalid settings")?;

    let scale = cfg.note_scale()?;
    info!(
        "{} notes {}..{}, {:?} on channel {}",
        scale.len(),
        scale.notes()[0],
        scale.notes()[scale.len() - 1],
        cfg.midi.change_policy,
        cfg.midi.channel,
    );

    let player = Player::spawn(cfg.player_config());

    // ── Headless replay ───────────────────────────────────────────────────
    if cli.headless {
        let path = cli.replay.as_deref().context("--headless needs --replay")?;
        let frames = JsonLinesSource::new(open_replay(path)?).into_frames();
        let stdout = io::stdout();
        app::run_headless(scale, frames, player, &mut stdout.lock())
            .context("writing transitions")?;
        return Ok(());
    }

    // ── Windowed ──────────────────────────────────────────────────────────
    let input = frame_input(&cli)?;
    app::run(cfg, input, player).context("visualizer")?;
    Ok(())
}

fn frame_input(cli: &Cli) -> Result<FrameInput> {
    #[cfg(feature = "leap")]
    if cli.leap {
        info!("landmarks from LeapMotion");
        return Ok(FrameInput::Leap);
    }

    Ok(match &cli.replay {
        Some(path) => {
            info!("replaying landmarks from {}", path.display());
            FrameInput::Replay(open_replay(path)?)
        }
        None => {
            info!("mouse simulation: hold the left button and move over the bands");
            FrameInput::Mouse
        }
    })
}

/// `-` is stdin.
fn open_replay(path: &Path) -> Result<Box<dyn BufRead + Send>> {
    if path == Path::new("-") {
        return Ok(Box::new(BufReader::new(io::stdin())));
    }
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    Ok(Box::new(BufReader::new(file)))
}
