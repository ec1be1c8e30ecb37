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

//! Error types for the emulator core
//!
//! Only setup paths (loading settings, opening an audio device) are fallible.
//! The DSP pipeline itself never returns errors across its public surface; it
//! logs and degrades instead.

use thiserror::Error;

/// Result type used throughout the emulator core
pub type Result<T> = std::result::Result<T, EmulatorError>;

/// Emulator error
#[derive(Debug, Error)]
pub enum EmulatorError {
    /// Configuration file could not be read
    #[error("failed to read config file {path}: {source}")]
    ConfigRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Configuration file is not valid TOML for [`crate::config::Settings`]
    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// A setting is outside its valid range
    #[error("invalid setting {name}: {reason}")]
    InvalidSetting { name: &'static str, reason: String },

    /// No usable host audio output device
    #[error("no audio output device available")]
    NoAudioDevice,

    /// Host audio backend failure
    #[error("audio device error: {0}")]
    AudioDevice(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_invalid_setting() {
        let err = EmulatorError::InvalidSetting {
            name: "audio.volume",
            reason: "must be within 0.0..=1.0".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid setting audio.volume: must be within 0.0..=1.0"
        );
    }

    #[test]
    fn test_error_from_toml() {
        let parse: std::result::Result<toml::Value, _> = toml::from_str("volume = = 1");
        let err: EmulatorError = parse.unwrap_err().into();
        assert!(matches!(err, EmulatorError::ConfigParse(_)));
    }
}
