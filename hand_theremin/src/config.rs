//! TOML configuration.
//!
//! Every field has a default, so a config file only needs the keys it
//! changes.  `theremin.toml` at the crate root documents the full set.

use std::path::Path;

use pitch_mapper::NoteScale;
use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::player::{ChangePolicy, PlayerConfig};

/// The shipped sample config; kept in sync with `AppConfig::default()`.
pub const SAMPLE_CONFIG: &str = include_str!("../theremin.toml");

// ════════════════════════════════════════════════════════════════════════════
// AppConfig
// ════════════════════════════════════════════════════════════════════════════

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    /// Note names, top of the frame first.
    pub scale:  Vec<String>,
    pub camera: CameraConfig,
    pub midi:   MidiConfig,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CameraConfig {
    pub width:  usize,
    pub height: usize,
    /// Frame rate used to pace replayed landmark files in windowed mode.
    pub fps:    u32,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MidiConfig {
    /// Case-insensitive substring of the preferred output port name.
    pub port_hint:     Option<String>,
    pub instrument:    u8,
    pub velocity:      u8,
    pub channel:       u8,
    pub change_policy: ChangePolicy,
    /// Length of a test-note trigger.
    pub test_note_ms:  u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            scale: NoteScale::default()
                .iter()
                .map(|n| n.name().to_string())
                .collect(),
            camera: CameraConfig::default(),
            midi:   MidiConfig::default(),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        CameraConfig { width: 640, height: 480, fps: 30 }
    }
}

impl Default for MidiConfig {
    fn default() -> Self {
        MidiConfig {
            port_hint:     None,
            instrument:    80, // Lead 1 (Square)
            velocity:      100,
            channel:       0,
            change_policy: ChangePolicy::Retrigger,
            test_note_ms:  250,
        }
    }
}

impl AppConfig {
    /// Read and validate a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| AppError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg = Self::parse(&text, path)?;
        log::info!(target: "config", "loaded {}", path.display());
        Ok(cfg)
    }

    /// Parse TOML text; `origin` is only used in error messages.
    pub fn parse(text: &str, origin: &Path) -> Result<Self> {
        let cfg: AppConfig = toml::from_str(text).map_err(|source| AppError::ConfigParse {
            path: origin.to_path_buf(),
            source,
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Range checks that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        self.note_scale()?;
        if self.midi.channel > 15 {
            return Err(AppError::ConfigValue(format!(
                "midi.channel {} (expected 0-15)", self.midi.channel
            )));
        }
        // Note-on with velocity 0 is a note-off.
        if !(1..=127).contains(&self.midi.velocity) {
            return Err(AppError::ConfigValue(format!(
                "midi.velocity {} (expected 1-127)", self.midi.velocity
            )));
        }
        if self.midi.instrument > 127 {
            return Err(AppError::ConfigValue(format!(
                "midi.instrument {} (expected 0-127)", self.midi.instrument
            )));
        }
        if self.camera.width < 64 || self.camera.height < 64 {
            return Err(AppError::ConfigValue(format!(
                "camera {}x{} (minimum 64x64)", self.camera.width, self.camera.height
            )));
        }
        if self.camera.fps == 0 {
            return Err(AppError::ConfigValue("camera.fps must be positive".to_string()));
        }
        Ok(())
    }

    pub fn note_scale(&self) -> Result<NoteScale> {
        Ok(NoteScale::from_names(&self.scale)?)
    }

    pub fn player_config(&self) -> PlayerConfig {
        PlayerConfig {
            port_hint:     self.midi.port_hint.clone(),
            instrument:    self.midi.instrument,
            velocity:      self.midi.velocity,
            channel:       self.midi.channel,
            change_policy: self.midi.change_policy,
            test_note_ms:  self.midi.test_note_ms,
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Tests
// ════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn sample_config_matches_defaults() {
        let cfg = AppConfig::parse(SAMPLE_CONFIG, Path::new("theremin.toml")).unwrap();
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let cfg = AppConfig::parse(
            "scale = [\"A4\", \"E4\"]\n[midi]\nchange_policy = \"legato\"\n",
            Path::new("inline"),
        ).unwrap();
        assert_eq!(cfg.scale, vec!["A4", "E4"]);
        assert_eq!(cfg.midi.change_policy, ChangePolicy::Legato);
        assert_eq!(cfg.midi.velocity, 100);
        assert_eq!(cfg.camera, CameraConfig::default());
        assert_eq!(cfg.note_scale().unwrap().len(), 2);
    }

    #[test]
    fn empty_scale_is_rejected() {
        let err = AppConfig::parse("scale = []\n", Path::new("inline")).unwrap_err();
        assert!(matches!(err, AppError::Scale(pitch_mapper::ConfigError::EmptyScale)));
    }

    #[test]
    fn bad_note_is_rejected() {
        let err = AppConfig::parse("scale = [\"C4\", \"Q9\"]\n", Path::new("inline")).unwrap_err();
        assert!(matches!(err, AppError::Scale(pitch_mapper::ConfigError::InvalidNote { .. })));
    }

    #[test]
    fn out_of_range_channel_is_rejected() {
        let err = AppConfig::parse("[midi]\nchannel = 16\n", Path::new("inline")).unwrap_err();
        assert!(matches!(err, AppError::ConfigValue(_)));
    }

    #[test]
    fn velocity_zero_is_rejected() {
        let err = AppConfig::parse("[midi]\nvelocity = 0\n", Path::new("inline")).unwrap_err();
        assert!(matches!(err, AppError::ConfigValue(ref msg) if msg.contains("velocity")));
        let cfg = AppConfig::parse("[midi]\nvelocity = 1\n", Path::new("inline")).unwrap();
        assert_eq!(cfg.midi.velocity, 1);
    }

    #[test]
    fn unknown_key_is_a_parse_error() {
        let err = AppConfig::parse("volume = 3\n", Path::new("inline")).unwrap_err();
        assert!(matches!(err, AppError::ConfigParse { .. }));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[camera]\nwidth = 320\nheight = 240").unwrap();
        let cfg = AppConfig::load(file.path()).unwrap();
        assert_eq!(cfg.camera.width, 320);
        assert_eq!(cfg.camera.height, 240);
        assert_eq!(cfg.camera.fps, 30);
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = AppConfig::load(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, AppError::Io { .. }));
    }
}
