use std::cell::RefCell;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use strum::{EnumIter, IntoStaticStr};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::sys::hotkey::HotkeyBinding;

pub const SETTINGS_FILE: &str = "settings.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no configuration directory available")]
    NoConfigDir,
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// How strongly the background is dimmed, in percent.
///
/// Always within [`DimLevel::MIN`, `DimLevel::MAX`]; out of range values are
/// clamped rather than rejected so a hand-edited file still loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "f64", into = "u8")]
pub struct DimLevel(u8);

impl DimLevel {
    pub const MIN: DimLevel = DimLevel(10);
    pub const MAX: DimLevel = DimLevel(100);
    /// Granularity of the menu slider.
    pub const SLIDER_STEP: u8 = 10;
    /// Granularity of scrolling over the status item.
    pub const SCROLL_STEP: u8 = 1;

    pub fn new(percent: u8) -> DimLevel { DimLevel(percent.clamp(Self::MIN.0, Self::MAX.0)) }

    pub fn get(self) -> u8 { self.0 }

    /// Opacity of the black overlay fill.
    pub fn alpha(self) -> f64 { f64::from(self.0) / 100.0 }

    pub fn adjusted(self, delta: i32) -> DimLevel {
        let raw = (i32::from(self.0) + delta).clamp(i32::from(Self::MIN.0), i32::from(Self::MAX.0));
        DimLevel(raw as u8)
    }

    /// Snaps to the slider's step.
    pub fn from_slider(value: f64) -> DimLevel {
        let step = f64::from(Self::SLIDER_STEP);
        DimLevel::from((value / step).round() * step)
    }
}

impl Default for DimLevel {
    fn default() -> Self { DimLevel(50) }
}

impl From<f64> for DimLevel {
    fn from(value: f64) -> Self {
        if value.is_nan() {
            return DimLevel::default();
        }
        let clamped = value.round().clamp(f64::from(Self::MIN.0), f64::from(Self::MAX.0));
        DimLevel(clamped as u8)
    }
}

impl From<DimLevel> for u8 {
    fn from(level: DimLevel) -> u8 { level.0 }
}

impl fmt::Display for DimLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}%", self.0) }
}

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    TryFromPrimitive,
    IntoPrimitive,
    EnumIter,
    IntoStaticStr
)]
#[repr(u8)]
#[serde(try_from = "u8", into = "u8")]
pub enum DimMode {
    /// Every display is dimmed behind the single frontmost window.
    #[default]
    Single = 0,
    /// Each display is dimmed behind its own frontmost window.
    Parallel = 1,
}

impl DimMode {
    pub fn label(self) -> &'static str { self.into() }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DimSettings {
    pub enabled: bool,
    pub level: DimLevel,
    pub mode: DimMode,
    pub hotkey: Option<HotkeyBinding>,
    pub auto_start_at_login: bool,
    pub open_preferences_on_launch: bool,
}

impl Default for DimSettings {
    fn default() -> Self {
        DimSettings {
            enabled: true,
            level: DimLevel::default(),
            mode: DimMode::Single,
            hotkey: None,
            auto_start_at_login: false,
            open_preferences_on_launch: false,
        }
    }
}

impl DimSettings {
    pub fn parse(text: &str) -> Result<DimSettings, toml::de::Error> { toml::from_str(text) }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> { toml::to_string_pretty(self) }

    /// Lists the fields that differ between `self` and `other`, as changes
    /// that would turn `self` into `other`.
    pub fn diff(&self, other: &DimSettings) -> Vec<SettingChange> {
        let mut changes = vec![];
        if self.enabled != other.enabled {
            changes.push(SettingChange::Enabled(other.enabled));
        }
        if self.level != other.level {
            changes.push(SettingChange::Level(other.level));
        }
        if self.mode != other.mode {
            changes.push(SettingChange::Mode(other.mode));
        }
        if self.hotkey != other.hotkey {
            changes.push(SettingChange::Hotkey(other.hotkey.clone()));
        }
        if self.auto_start_at_login != other.auto_start_at_login {
            changes.push(SettingChange::AutoStartAtLogin(other.auto_start_at_login));
        }
        if self.open_preferences_on_launch != other.open_preferences_on_launch {
            changes.push(SettingChange::OpenPreferencesOnLaunch(
                other.open_preferences_on_launch,
            ));
        }
        changes
    }
}

/// A single field mutation, as observed by whoever reacts to settings.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingChange {
    Enabled(bool),
    Level(DimLevel),
    Mode(DimMode),
    Hotkey(Option<HotkeyBinding>),
    AutoStartAtLogin(bool),
    OpenPreferencesOnLaunch(bool),
}

pub trait SettingsStore {
    /// Returns `Ok(None)` when nothing has been stored yet.
    fn load(&self) -> Result<Option<DimSettings>, ConfigError>;
    fn save(&self, settings: &DimSettings) -> Result<(), ConfigError>;
    /// Backing file, for stores that have one.
    fn path(&self) -> Option<&Path> { None }
}

#[derive(Debug, Clone)]
pub struct TomlSettingsStore {
    path: PathBuf,
}

impl TomlSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self { TomlSettingsStore { path: path.into() } }

    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(dir.join("blurred").join(SETTINGS_FILE))
    }
}

impl SettingsStore for TomlSettingsStore {
    fn load(&self) -> Result<Option<DimSettings>, ConfigError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ConfigError::Io { path: self.path.clone(), source });
            }
        };
        DimSettings::parse(&text)
            .map(Some)
            .map_err(|source| ConfigError::Parse { path: self.path.clone(), source })
    }

    fn save(&self, settings: &DimSettings) -> Result<(), ConfigError> {
        let text = settings.to_toml()?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| ConfigError::Io { path: parent.to_path_buf(), source })?;
        }
        fs::write(&self.path, text)
            .map_err(|source| ConfigError::Io { path: self.path.clone(), source })
    }

    fn path(&self) -> Option<&Path> { Some(&self.path) }
}

/// Keeps settings in memory only.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    stored: RefCell<Option<DimSettings>>,
    saves: RefCell<usize>,
}

impl MemorySettingsStore {
    pub fn with(settings: DimSettings) -> Self {
        MemorySettingsStore {
            stored: RefCell::new(Some(settings)),
            saves: RefCell::new(0),
        }
    }

    pub fn stored(&self) -> Option<DimSettings> { self.stored.borrow().clone() }

    pub fn save_count(&self) -> usize { *self.saves.borrow() }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&self) -> Result<Option<DimSettings>, ConfigError> { Ok(self.stored()) }

    fn save(&self, settings: &DimSettings) -> Result<(), ConfigError> {
        *self.stored.borrow_mut() = Some(settings.clone());
        *self.saves.borrow_mut() += 1;
        Ok(())
    }
}

/// The live settings of the process together with where they persist.
///
/// Every setter writes through to the store before returning. A failed write
/// is logged and the in-memory value still changes, so the session behaves as
/// the user asked even if the file could not be updated.
pub struct Settings {
    values: DimSettings,
    store: Box<dyn SettingsStore>,
}

impl Settings {
    pub fn load(store: impl SettingsStore + 'static) -> Settings {
        let values = match store.load() {
            Ok(Some(values)) => values,
            Ok(None) => {
                info!("no stored settings, using defaults");
                DimSettings::default()
            }
            Err(err) => {
                warn!(%err, "could not load settings, using defaults");
                DimSettings::default()
            }
        };
        debug!(?values, "settings loaded");
        Settings { values, store: Box::new(store) }
    }

    pub fn values(&self) -> &DimSettings { &self.values }

    pub fn path(&self) -> Option<&Path> { self.store.path() }

    pub fn set_enabled(&mut self, enabled: bool) -> Option<SettingChange> {
        self.update(|s| s.enabled = enabled)
    }

    pub fn toggle_enabled(&mut self) -> Option<SettingChange> {
        let enabled = !self.values.enabled;
        self.set_enabled(enabled)
    }

    pub fn set_level(&mut self, level: DimLevel) -> Option<SettingChange> {
        self.update(|s| s.level = level)
    }

    pub fn adjust_level(&mut self, delta: i32) -> Option<SettingChange> {
        let level = self.values.level.adjusted(delta);
        self.set_level(level)
    }

    pub fn set_mode(&mut self, mode: DimMode) -> Option<SettingChange> {
        self.update(|s| s.mode = mode)
    }

    pub fn set_auto_start_at_login(&mut self, on: bool) -> Option<SettingChange> {
        self.update(|s| s.auto_start_at_login = on)
    }

    pub fn set_open_preferences_on_launch(&mut self, on: bool) -> Option<SettingChange> {
        self.update(|s| s.open_preferences_on_launch = on)
    }

    /// Re-reads the store and adopts its contents, returning what changed.
    /// Leaves the current values alone if the store cannot be read.
    pub fn reload(&mut self) -> Vec<SettingChange> {
        let fresh = match self.store.load() {
            Ok(Some(fresh)) => fresh,
            Ok(None) => return vec![],
            Err(err) => {
                warn!(%err, "ignoring unreadable settings");
                return vec![];
            }
        };
        let changes = self.values.diff(&fresh);
        if !changes.is_empty() {
            debug!(?changes, "settings reloaded");
            self.values = fresh;
        }
        changes
    }

    /// Writes the current values out, creating the file if needed.
    pub fn save(&self) -> Result<(), ConfigError> { self.store.save(&self.values) }

    /// Restores defaults and persists them.
    pub fn reset(&mut self) -> Vec<SettingChange> {
        let defaults = DimSettings::default();
        let changes = self.values.diff(&defaults);
        self.values = defaults;
        self.persist();
        changes
    }

    fn update(&mut self, mutate: impl FnOnce(&mut DimSettings)) -> Option<SettingChange> {
        let mut next = self.values.clone();
        mutate(&mut next);
        let change = self.values.diff(&next).pop()?;
        self.values = next;
        self.persist();
        Some(change)
    }

    fn persist(&self) {
        if let Err(err) = self.store.save(&self.values) {
            warn!(%err, "failed to persist settings");
        }
    }
}
