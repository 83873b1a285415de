use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;
use crate::mapper::{MapperConfigPatch, MapperMode};
use crate::physics::PhysicsTuning;
use crate::tracking::{Hand, TrackingSettings};

const DEFAULT_CONFIG: &str = include_str!("../config.toml");

#[derive(Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    game: GameSection,
    #[serde(default)]
    mapper: MapperSection,
    #[serde(default)]
    physics: PhysicsSection,
    #[serde(default)]
    midi: MidiSection,
    #[serde(default)]
    tracking: TrackingSection,
}

#[derive(Deserialize, Default)]
struct GameSection {
    speed: Option<f64>,
    practice: Option<bool>,
}

#[derive(Deserialize, Default)]
struct MapperSection {
    mode: Option<String>,
    up_note: Option<String>,
    down_note: Option<String>,
    up_chord: Option<String>,
    up_chord_type: Option<String>,
    down_chord: Option<String>,
    down_chord_type: Option<String>,
}

#[derive(Deserialize, Default)]
struct PhysicsSection {
    gravity: Option<f64>,
    up_thrust: Option<f64>,
    down_thrust: Option<f64>,
    max_velocity: Option<f64>,
    drag: Option<f64>,
    bounce_damping: Option<f64>,
    side_impulse: Option<f64>,
    horizontal_drag: Option<f64>,
    spawn_period: Option<u32>,
    gate_timeout_ms: Option<u64>,
    clearance: Option<f64>,
}

#[derive(Deserialize, Default)]
struct MidiSection {
    enabled: Option<bool>,
}

#[derive(Deserialize, Default)]
struct TrackingSection {
    enabled: Option<bool>,
    base_url: Option<String>,
    user_id: Option<i64>,
    game_id: Option<i64>,
    level_id: Option<i64>,
    key: Option<String>,
    batch_size: Option<usize>,
    hand: Option<Hand>,
}

/// Embedded defaults with the user's file layered on top.
pub struct Config {
    file: ConfigFile,
}

impl Config {
    /// Loads `path` if given (errors are returned), otherwise the user
    /// config file if it exists (errors are logged and the file skipped).
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::defaults();
        match path {
            Some(path) => config.merge(read_file(path)?),
            None => {
                if let Some(path) = user_config_path().filter(|p| p.exists()) {
                    match read_file(&path) {
                        Ok(user) => config.merge(user),
                        Err(e) => log::warn!(target: "config", "ignoring {e}"),
                    }
                }
            }
        }
        Ok(config)
    }

    pub fn defaults() -> Self {
        // The embedded file is covered by tests; fall back to all-`None`
        // sections rather than failing at runtime.
        let file = toml::from_str(DEFAULT_CONFIG).unwrap_or_else(|e| {
            log::error!(target: "config", "embedded config.toml is malformed: {e}");
            ConfigFile::default()
        });
        Self { file }
    }

    /// Layers a TOML document over the current values.
    pub fn merge_str(&mut self, contents: &str) -> Result<(), toml::de::Error> {
        self.merge(toml::from_str(contents)?);
        Ok(())
    }

    fn merge(&mut self, user: ConfigFile) {
        let base = &mut self.file;

        pick(&mut base.game.speed, user.game.speed);
        pick(&mut base.game.practice, user.game.practice);

        let (m, u) = (&mut base.mapper, user.mapper);
        pick(&mut m.mode, u.mode);
        pick(&mut m.up_note, u.up_note);
        pick(&mut m.down_note, u.down_note);
        pick(&mut m.up_chord, u.up_chord);
        pick(&mut m.up_chord_type, u.up_chord_type);
        pick(&mut m.down_chord, u.down_chord);
        pick(&mut m.down_chord_type, u.down_chord_type);

        let (p, u) = (&mut base.physics, user.physics);
        pick(&mut p.gravity, u.gravity);
        pick(&mut p.up_thrust, u.up_thrust);
        pick(&mut p.down_thrust, u.down_thrust);
        pick(&mut p.max_velocity, u.max_velocity);
        pick(&mut p.drag, u.drag);
        pick(&mut p.bounce_damping, u.bounce_damping);
        pick(&mut p.side_impulse, u.side_impulse);
        pick(&mut p.horizontal_drag, u.horizontal_drag);
        pick(&mut p.spawn_period, u.spawn_period);
        pick(&mut p.gate_timeout_ms, u.gate_timeout_ms);
        pick(&mut p.clearance, u.clearance);

        pick(&mut base.midi.enabled, user.midi.enabled);

        let (t, u) = (&mut base.tracking, user.tracking);
        pick(&mut t.enabled, u.enabled);
        pick(&mut t.base_url, u.base_url);
        pick(&mut t.user_id, u.user_id);
        pick(&mut t.game_id, u.game_id);
        pick(&mut t.level_id, u.level_id);
        pick(&mut t.key, u.key);
        pick(&mut t.batch_size, u.batch_size);
        pick(&mut t.hand, u.hand);
    }

    pub fn speed(&self) -> f64 {
        self.file.game.speed.unwrap_or(1.0)
    }

    pub fn practice(&self) -> bool {
        self.file.game.practice.unwrap_or(false)
    }

    pub fn midi_enabled(&self) -> bool {
        self.file.midi.enabled.unwrap_or(true)
    }

    pub fn physics(&self) -> PhysicsTuning {
        let p = &self.file.physics;
        let d = PhysicsTuning::default();
        PhysicsTuning {
            gravity: p.gravity.unwrap_or(d.gravity),
            up_thrust: p.up_thrust.unwrap_or(d.up_thrust),
            down_thrust: p.down_thrust.unwrap_or(d.down_thrust),
            max_velocity: p.max_velocity.unwrap_or(d.max_velocity),
            drag: p.drag.unwrap_or(d.drag),
            bounce_damping: p.bounce_damping.unwrap_or(d.bounce_damping),
            side_impulse: p.side_impulse.unwrap_or(d.side_impulse),
            horizontal_drag: p.horizontal_drag.unwrap_or(d.horizontal_drag),
            spawn_period: p.spawn_period.unwrap_or(d.spawn_period),
            gate_timeout_ms: p.gate_timeout_ms.unwrap_or(d.gate_timeout_ms),
            clearance: p.clearance.unwrap_or(d.clearance),
        }
    }

    /// The `[mapper]` section as a patch over the built-in mapper defaults.
    pub fn mapper_patch(&self) -> Result<MapperConfigPatch, ConfigError> {
        let m = &self.file.mapper;
        Ok(MapperConfigPatch {
            mode: parse_field("mapper.mode", m.mode.as_deref(), |s| s.parse::<MapperMode>())?,
            up_note: parse_field("mapper.up_note", m.up_note.as_deref(), str::parse)?,
            down_note: parse_field("mapper.down_note", m.down_note.as_deref(), str::parse)?,
            up_chord: parse_field("mapper.up_chord", m.up_chord.as_deref(), str::parse)?,
            up_chord_type: parse_field("mapper.up_chord_type", m.up_chord_type.as_deref(), str::parse)?,
            down_chord: parse_field("mapper.down_chord", m.down_chord.as_deref(), str::parse)?,
            down_chord_type: parse_field(
                "mapper.down_chord_type",
                m.down_chord_type.as_deref(),
                str::parse,
            )?,
        })
    }

    pub fn tracking_enabled(&self) -> bool {
        self.file.tracking.enabled.unwrap_or(false)
    }

    pub fn set_tracking_url(&mut self, url: String) {
        self.file.tracking.base_url = Some(url);
        self.file.tracking.enabled = Some(true);
    }

    pub fn tracking_url(&self) -> &str {
        self.file
            .tracking
            .base_url
            .as_deref()
            .unwrap_or("http://localhost:3000")
    }

    pub fn tracking_settings(&self) -> TrackingSettings {
        let t = &self.file.tracking;
        let d = TrackingSettings::default();
        TrackingSettings {
            user_id: t.user_id.unwrap_or(d.user_id),
            game_id: t.game_id.unwrap_or(d.game_id),
            level_id: t.level_id.or(d.level_id),
            key: t.key.clone().or(d.key),
            batch_size: t.batch_size.unwrap_or(d.batch_size).max(1),
            hand: t.hand.unwrap_or(d.hand),
        }
    }
}

fn pick<T>(base: &mut Option<T>, user: Option<T>) {
    if user.is_some() {
        *base = user;
    }
}

fn parse_field<T, E: std::fmt::Display>(
    field: &'static str,
    value: Option<&str>,
    parse: impl Fn(&str) -> Result<T, E>,
) -> Result<Option<T>, ConfigError> {
    value
        .map(|v| {
            parse(v).map_err(|e| ConfigError::Invalid {
                field,
                message: e.to_string(),
            })
        })
        .transpose()
}

fn read_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("flappy-piano").join("config.toml"))
}
