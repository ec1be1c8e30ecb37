// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 itsakeyfut
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Emulator settings
//!
//! Settings are read from a TOML file and can be overridden through
//! environment variables (a `.env` file in the working directory is honoured).
//!
//! ```toml
//! [audio]
//! volume = 0.8
//! enable_audio_stretching = true
//! output_device = "auto"
//! sink = "auto"          # auto | cpal | null
//!
//! [system]
//! sleep_mode = false
//! headphones_connected = false
//! program_id = 0x0004000000030800
//!
//! [shader]
//! cache_shaders = true
//! ```
//!
//! | Variable                    | Setting                          |
//! |-----------------------------|----------------------------------|
//! | `CTR_HLE_VOLUME`            | `audio.volume`                   |
//! | `CTR_HLE_AUDIO_STRETCHING`  | `audio.enable_audio_stretching`  |
//! | `CTR_HLE_OUTPUT_DEVICE`     | `audio.output_device`            |
//! | `CTR_HLE_SLEEP_MODE`        | `system.sleep_mode`              |
//! | `CTR_HLE_HEADPHONES`        | `system.headphones_connected`    |

use crate::core::error::{EmulatorError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Which audio backend to open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// Real device if one is available, otherwise null
    #[default]
    Auto,
    /// Real device through cpal
    Cpal,
    /// No output
    Null,
}

/// `[audio]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    /// Master volume slider (0.0..=1.0)
    pub volume: f32,
    pub enable_audio_stretching: bool,
    /// Device name, or `"auto"` for the host default
    pub output_device: String,
    pub sink: SinkKind,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            volume: 1.0,
            enable_audio_stretching: true,
            output_device: "auto".to_string(),
            sink: SinkKind::Auto,
        }
    }
}

/// `[system]` section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemSettings {
    pub sleep_mode: bool,
    pub headphones_connected: bool,
    /// Title ID of the running program
    pub program_id: u64,
}

/// `[shader]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShaderSettings {
    /// Reuse compiled shaders across batches
    pub cache_shaders: bool,
}

impl Default for ShaderSettings {
    fn default() -> Self {
        Self {
            cache_shaders: true,
        }
    }
}

/// All emulator settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub audio: AudioSettings,
    pub system: SystemSettings,
    pub shader: ShaderSettings,
}

impl Settings {
    /// Parse settings from TOML text
    ///
    /// Missing keys take their default values.
    ///
    /// # Example
    ///
    /// ```
    /// use ctr_hle::config::Settings;
    ///
    /// let settings = Settings::from_toml_str("[audio]\nvolume = 0.25\n")?;
    /// assert_eq!(settings.audio.volume, 0.25);
    /// assert!(settings.audio.enable_audio_stretching);
    /// # Ok::<(), ctr_hle::EmulatorError>(())
    /// ```
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| EmulatorError::ConfigRead {
            path: path.display().to_string(),
            source,
        })?;
        let settings = Self::from_toml_str(&text)?;
        log::info!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Serialize to TOML text
    pub fn to_toml_string(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    /// Apply overrides from the process environment (and `.env`, if present)
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(path) = dotenvy::dotenv() {
            log::debug!("Loaded environment from {}", path.display());
        }
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable lookup
    ///
    /// # Arguments
    ///
    /// * `lookup` - Returns the value of a variable, if set
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("CTR_HLE_VOLUME") {
            self.audio.volume = value
                .trim()
                .parse()
                .map_err(|_| invalid("audio.volume", format!("not a number: {:?}", value)))?;
        }
        if let Some(value) = lookup("CTR_HLE_AUDIO_STRETCHING") {
            self.audio.enable_audio_stretching =
                parse_bool(&value).ok_or_else(|| invalid("audio.enable_audio_stretching", value))?;
        }
        if let Some(value) = lookup("CTR_HLE_OUTPUT_DEVICE") {
            self.audio.output_device = value;
        }
        if let Some(value) = lookup("CTR_HLE_SLEEP_MODE") {
            self.system.sleep_mode =
                parse_bool(&value).ok_or_else(|| invalid("system.sleep_mode", value))?;
        }
        if let Some(value) = lookup("CTR_HLE_HEADPHONES") {
            self.system.headphones_connected =
                parse_bool(&value).ok_or_else(|| invalid("system.headphones_connected", value))?;
        }
        self.validate()
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        let volume = self.audio.volume;
        if !(0.0..=1.0).contains(&volume) {
            return Err(invalid(
                "audio.volume",
                format!("{} is outside 0.0..=1.0", volume),
            ));
        }
        Ok(())
    }
}

fn invalid(name: &'static str, reason: String) -> EmulatorError {
    EmulatorError::InvalidSetting { name, reason }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.audio.volume, 1.0);
        assert!(settings.audio.enable_audio_stretching);
        assert_eq!(settings.audio.output_device, "auto");
        assert_eq!(settings.audio.sink, SinkKind::Auto);
        assert!(!settings.system.sleep_mode);
        assert!(settings.shader.cache_shaders);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[audio]\nsink = \"null\"\n\n[system]\nsleep_mode = true\nprogram_id = 0x0004001000021500"
        )
        .unwrap();

        let settings = Settings::load(file.path()).unwrap();
        assert_eq!(settings.audio.sink, SinkKind::Null);
        assert!(settings.system.sleep_mode);
        assert_eq!(settings.system.program_id, 0x0004_0010_0002_1500);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Settings::load(dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, EmulatorError::ConfigRead { .. }));
    }

    #[test]
    fn test_bad_volume_rejected() {
        let err = Settings::from_toml_str("[audio]\nvolume = 1.5").unwrap_err();
        assert!(matches!(
            err,
            EmulatorError::InvalidSetting {
                name: "audio.volume",
                ..
            }
        ));
    }

    #[test]
    fn test_round_trip_toml() {
        let mut settings = Settings::default();
        settings.audio.volume = 0.5;
        settings.system.headphones_connected = true;
        let parsed = Settings::from_toml_str(&settings.to_toml_string()).unwrap();
        assert_eq!(parsed, settings);
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("CTR_HLE_VOLUME", "0.3"),
            ("CTR_HLE_AUDIO_STRETCHING", "off"),
            ("CTR_HLE_OUTPUT_DEVICE", "Speakers"),
            ("CTR_HLE_SLEEP_MODE", "1"),
            ("CTR_HLE_HEADPHONES", "true"),
        ]
        .into_iter()
        .collect();

        let mut settings = Settings::default();
        settings
            .apply_overrides(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(settings.audio.volume, 0.3);
        assert!(!settings.audio.enable_audio_stretching);
        assert_eq!(settings.audio.output_device, "Speakers");
        assert!(settings.system.sleep_mode);
        assert!(settings.system.headphones_connected);
    }

    #[test]
    fn test_override_parse_errors() {
        let mut settings = Settings::default();
        let err = settings
            .apply_overrides(|name| (name == "CTR_HLE_SLEEP_MODE").then(|| "maybe".to_string()))
            .unwrap_err();
        assert!(matches!(err, EmulatorError::InvalidSetting { .. }));

        let err = settings
            .apply_overrides(|name| (name == "CTR_HLE_VOLUME").then(|| "7".to_string()))
            .unwrap_err();
        assert!(matches!(err, EmulatorError::InvalidSetting { .. }));
    }
}
