//! User settings and the key-value store they persist to.
//!
//! The store is an external collaborator: string keys, string values, read at
//! session start and whenever the UI reports an update.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

pub const KEY_ENABLED: &str = "enabled";
pub const KEY_SENSITIVITY: &str = "sensitivity";
pub const KEY_PROFILE: &str = "profile";

/// Voice used by the scold profile's escalation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScoldingVoice {
    #[default]
    Classic,
    Polite,
    Dramatic,
}

/// What happens when a loud event is confirmed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionProfile {
    /// Activate the ad's skip control
    #[default]
    Skip,
    /// Pause playback, exit fullscreen, escalate after repeated events
    Scold { voice: ScoldingVoice },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub enabled: bool,
    pub sensitivity: f32,
    pub profile: ActionProfile,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled: true,
            sensitivity: 0.5,
            profile: ActionProfile::Skip,
        }
    }
}

/// Bring a raw sensitivity into [0, 1].
///
/// Values above 1 come from the legacy 1..10 slider and are scaled down.
pub fn normalize_sensitivity(raw: f32) -> f32 {
    if !raw.is_finite() {
        return Settings::default().sensitivity;
    }
    let scaled = if raw > 1.0 { raw / 10.0 } else { raw };
    scaled.clamp(0.0, 1.0)
}

impl Settings {
    pub fn normalized(mut self) -> Self {
        self.sensitivity = normalize_sensitivity(self.sensitivity);
        self
    }

    /// Read settings from the store, falling back to defaults per key.
    pub fn load(store: &dyn KeyValueStore) -> io::Result<Self> {
        let defaults = Self::default();
        let enabled = read_key(store, KEY_ENABLED)?.unwrap_or(defaults.enabled);
        let sensitivity = read_key::<f32>(store, KEY_SENSITIVITY)?
            .map(normalize_sensitivity)
            .unwrap_or(defaults.sensitivity);
        let profile = read_key(store, KEY_PROFILE)?.unwrap_or(defaults.profile);
        Ok(Self {
            enabled,
            sensitivity,
            profile,
        })
    }

    pub fn save(&self, store: &dyn KeyValueStore) -> io::Result<()> {
        store.set(KEY_ENABLED, &encode(&self.enabled)?)?;
        store.set(KEY_SENSITIVITY, &encode(&self.sensitivity)?)?;
        store.set(KEY_PROFILE, &encode(&self.profile)?)?;
        Ok(())
    }

    /// Write defaults for any key the store does not hold yet.
    pub fn seed_defaults(store: &dyn KeyValueStore) -> io::Result<()> {
        let defaults = Self::default();
        if store.get(KEY_ENABLED)?.is_none() {
            store.set(KEY_ENABLED, &encode(&defaults.enabled)?)?;
        }
        if store.get(KEY_SENSITIVITY)?.is_none() {
            store.set(KEY_SENSITIVITY, &encode(&defaults.sensitivity)?)?;
        }
        if store.get(KEY_PROFILE)?.is_none() {
            store.set(KEY_PROFILE, &encode(&defaults.profile)?)?;
        }
        Ok(())
    }
}

fn encode<T: Serialize>(value: &T) -> io::Result<String> {
    serde_json::to_string(value).map_err(io::Error::other)
}

fn read_key<T: for<'de> Deserialize<'de>>(
    store: &dyn KeyValueStore,
    key: &str,
) -> io::Result<Option<T>> {
    match store.get(key)? {
        Some(raw) => match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                log::warn!("[Settings] Ignoring malformed value for {}: {}", key, err);
                Ok(None)
            }
        },
        None => Ok(None),
    }
}

/// Simple string key-value persistence
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> io::Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> io::Result<()>;
}

/// In-memory store
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> io::Result<Option<String>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| io::Error::other("settings store lock poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> io::Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| io::Error::other("settings store lock poisoned"))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Store backed by a single JSON object on disk, rewritten on every set.
pub struct JsonFileStore {
    path: PathBuf,
    guard: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Mutex::new(()),
        }
    }

    fn read_all(&self) -> io::Result<HashMap<String, String>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) if contents.trim().is_empty() => Ok(HashMap::new()),
            Ok(contents) => serde_json::from_str(&contents)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(err) => Err(err),
        }
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> io::Result<Option<String>> {
        let _lock = self
            .guard
            .lock()
            .map_err(|_| io::Error::other("settings file lock poisoned"))?;
        Ok(self.read_all()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> io::Result<()> {
        let _lock = self
            .guard
            .lock()
            .map_err(|_| io::Error::other("settings file lock poisoned"))?;
        let mut entries = self.read_all()?;
        entries.insert(key.to_string(), value.to_string());
        let json = serde_json::to_string_pretty(&entries).map_err(io::Error::other)?;
        fs::write(&self.path, json)
    }
}
