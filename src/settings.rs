//! Game options and preferences
//!
//! Persisted as a nested JSON object. Each option is addressed by a
//! slash-separated path (`audio/music_gain` lives at `{"audio": {"music_gain": ..}}`).
//! Unknown keys are ignored on load; save always writes the full fixed key set.

use std::path::Path;

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors reading or writing the options file
#[derive(Debug, Error)]
pub enum OptionsError {
    #[error("failed to access options file: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed options JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("options root must be a JSON object")]
    NotAnObject,
}

/// A typed option value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OptionValue {
    Float(f32),
    Int(i64),
    Bool(bool),
}

impl OptionValue {
    fn to_json(self) -> Value {
        match self {
            OptionValue::Float(v) => Value::from(v as f64),
            OptionValue::Int(v) => Value::from(v),
            OptionValue::Bool(v) => Value::from(v),
        }
    }

    /// Coerce a JSON value into the same variant as `self`
    fn coerce(self, value: &Value) -> Option<Self> {
        match self {
            OptionValue::Float(_) => value.as_f64().map(|v| OptionValue::Float(v as f32)),
            OptionValue::Int(_) => value.as_i64().map(OptionValue::Int),
            OptionValue::Bool(_) => value.as_bool().map(OptionValue::Bool),
        }
    }
}

/// Recognized option keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionKey {
    MusicGain,
    SfxGain,
    Resolution,
    Fullscreen,
    Antialiasing,
    Bloom,
}

impl OptionKey {
    pub const ALL: [OptionKey; 6] = [
        OptionKey::MusicGain,
        OptionKey::SfxGain,
        OptionKey::Resolution,
        OptionKey::Fullscreen,
        OptionKey::Antialiasing,
        OptionKey::Bloom,
    ];

    pub fn path(&self) -> &'static str {
        match self {
            OptionKey::MusicGain => "audio/music_gain",
            OptionKey::SfxGain => "audio/sfx_gain",
            OptionKey::Resolution => "graphics/resolution",
            OptionKey::Fullscreen => "graphics/fullscreen",
            OptionKey::Antialiasing => "graphics/aa",
            OptionKey::Bloom => "graphics/bloom",
        }
    }

    pub fn from_path(path: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.path() == path)
    }
}

/// Game options
#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    /// Music volume (0.0 - 1.0)
    pub music_gain: f32,
    /// Sound effects volume (0.0 - 1.0)
    pub sfx_gain: f32,
    /// Index into the display mode list
    pub resolution: i64,
    pub fullscreen: bool,
    /// Multisample anti-aliasing
    pub aa: bool,
    pub bloom: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            music_gain: 0.7,
            sfx_gain: 1.0,
            resolution: 0,
            fullscreen: false,
            aa: true,
            bloom: true,
        }
    }
}

impl Options {
    pub fn get(&self, key: OptionKey) -> OptionValue {
        match key {
            OptionKey::MusicGain => OptionValue::Float(self.music_gain),
            OptionKey::SfxGain => OptionValue::Float(self.sfx_gain),
            OptionKey::Resolution => OptionValue::Int(self.resolution),
            OptionKey::Fullscreen => OptionValue::Bool(self.fullscreen),
            OptionKey::Antialiasing => OptionValue::Bool(self.aa),
            OptionKey::Bloom => OptionValue::Bool(self.bloom),
        }
    }

    /// Set an option; returns false if the value has the wrong type
    pub fn set(&mut self, key: OptionKey, value: OptionValue) -> bool {
        match (key, value) {
            (OptionKey::MusicGain, OptionValue::Float(v)) => self.music_gain = v.clamp(0.0, 1.0),
            (OptionKey::SfxGain, OptionValue::Float(v)) => self.sfx_gain = v.clamp(0.0, 1.0),
            (OptionKey::Resolution, OptionValue::Int(v)) => self.resolution = v,
            (OptionKey::Fullscreen, OptionValue::Bool(v)) => self.fullscreen = v,
            (OptionKey::Antialiasing, OptionValue::Bool(v)) => self.aa = v,
            (OptionKey::Bloom, OptionValue::Bool(v)) => self.bloom = v,
            _ => return false,
        }
        true
    }

    /// Look up an option by its path (e.g. `graphics/bloom`)
    pub fn get_path(&self, path: &str) -> Option<OptionValue> {
        OptionKey::from_path(path).map(|k| self.get(k))
    }

    /// Parse an options document; missing or mistyped keys keep their defaults
    pub fn from_json(text: &str) -> Result<Self, OptionsError> {
        let root: Value = serde_json::from_str(text)?;
        if !root.is_object() {
            return Err(OptionsError::NotAnObject);
        }

        let mut options = Self::default();
        for key in OptionKey::ALL {
            let pointer = format!("/{}", key.path());
            let Some(raw) = root.pointer(&pointer) else {
                continue;
            };
            match options.get(key).coerce(raw) {
                Some(value) => {
                    options.set(key, value);
                }
                None => log::warn!("Ignoring option {} with unexpected value {}", key.path(), raw),
            }
        }
        Ok(options)
    }

    /// Serialize the fixed key set, pretty-printed with a 4-space indent
    pub fn to_json(&self) -> Result<String, OptionsError> {
        let mut root = Map::new();
        for key in OptionKey::ALL {
            let (section, name) = key
                .path()
                .split_once('/')
                .unwrap_or(("", key.path()));
            let entry = root
                .entry(section.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(map) = entry {
                map.insert(name.to_string(), self.get(key).to_json());
            }
        }

        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
        Value::Object(root).serialize(&mut ser)?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, OptionsError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let options = Self::from_json(&text)?;
        log::info!("Loaded options from {}", path.as_ref().display());
        Ok(options)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), OptionsError> {
        std::fs::write(path.as_ref(), self.to_json()?)?;
        log::info!("Options saved to {}", path.as_ref().display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested_keys() {
        let text = r#"{
            "audio": { "music_gain": 0.25, "sfx_gain": 0.5 },
            "graphics": { "resolution": 3, "fullscreen": true, "aa": false, "bloom": false }
        }"#;
        let options = Options::from_json(text).unwrap();
        assert_eq!(options.music_gain, 0.25);
        assert_eq!(options.sfx_gain, 0.5);
        assert_eq!(options.resolution, 3);
        assert!(options.fullscreen);
        assert!(!options.aa);
        assert!(!options.bloom);
    }

    #[test]
    fn test_missing_and_mistyped_keys_keep_defaults() {
        let text = r#"{ "audio": { "music_gain": "loud" }, "extra": 1 }"#;
        let options = Options::from_json(text).unwrap();
        assert_eq!(options, Options::default());
    }

    #[test]
    fn test_int_accepted_for_float() {
        let options = Options::from_json(r#"{ "audio": { "sfx_gain": 1 } }"#).unwrap();
        assert_eq!(options.sfx_gain, 1.0);
    }

    #[test]
    fn test_malformed_json_is_error() {
        assert!(matches!(
            Options::from_json("{ not json"),
            Err(OptionsError::Json(_))
        ));
        assert!(matches!(
            Options::from_json("[1, 2]"),
            Err(OptionsError::NotAnObject)
        ));
    }

    #[test]
    fn test_save_uses_four_space_indent() {
        let text = Options::default().to_json().unwrap();
        assert!(text.contains("\n    \"audio\": {"));
        assert!(text.contains("\n        \"music_gain\": "));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("options.json");

        let mut options = Options::default();
        options.set(OptionKey::Resolution, OptionValue::Int(2));
        options.set(OptionKey::Bloom, OptionValue::Bool(false));
        options.save(&path).unwrap();

        let loaded = Options::load(&path).unwrap();
        assert_eq!(loaded.get_path("graphics/resolution"), Some(OptionValue::Int(2)));
        assert_eq!(loaded.get_path("graphics/bloom"), Some(OptionValue::Bool(false)));
        assert_eq!(loaded, options);
    }

    #[test]
    fn test_set_rejects_wrong_type() {
        let mut options = Options::default();
        assert!(!options.set(OptionKey::Fullscreen, OptionValue::Int(1)));
        assert!(!options.fullscreen);
    }
}
