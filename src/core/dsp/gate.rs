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

//! Audio output gate
//!
//! While the console is in sleep mode the DSP keeps producing frames only
//! for a handful of titles (the system sound application), and only when
//! headphones are plugged in. Everything else is silenced by skipping frame
//! generation entirely.

/// Title IDs of the regional "Nintendo 3DS Sound" applications
pub const SOUND_APP_TITLE_IDS: [u64; 6] = [
    0x0004_0010_0002_0500,
    0x0004_0010_0002_1500,
    0x0004_0010_0002_2500,
    0x0004_0010_0002_6500,
    0x0004_0010_0002_7500,
    0x0004_0010_0002_8500,
];

/// Decides whether the DSP may generate audio this frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputGate {
    /// Emulated sleep mode
    pub sleep_mode_enabled: bool,

    /// Whether headphones are plugged in
    pub headphones_connected: bool,

    /// Titles allowed to play audio during sleep
    pub allow_list: Vec<u64>,
}

impl OutputGate {
    /// Gate with the default allow list
    pub fn new(sleep_mode_enabled: bool, headphones_connected: bool) -> Self {
        Self {
            sleep_mode_enabled,
            headphones_connected,
            allow_list: SOUND_APP_TITLE_IDS.to_vec(),
        }
    }

    /// Check whether `program_id` may produce audio
    ///
    /// # Example
    ///
    /// ```
    /// use ctr_hle::core::dsp::OutputGate;
    ///
    /// let awake = OutputGate::new(false, false);
    /// assert!(awake.is_output_allowed(0x0004_0000_0000_1234));
    ///
    /// let asleep = OutputGate::new(true, true);
    /// assert!(asleep.is_output_allowed(0x0004_0010_0002_0500));
    /// assert!(!asleep.is_output_allowed(0x0004_0000_0000_1234));
    /// ```
    pub fn is_output_allowed(&self, program_id: u64) -> bool {
        if !self.sleep_mode_enabled {
            return true;
        }

        self.allow_list.contains(&program_id) && self.headphones_connected
    }
}

impl Default for OutputGate {
    fn default() -> Self {
        Self::new(false, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_awake_always_allowed() {
        let gate = OutputGate::new(false, false);
        assert!(gate.is_output_allowed(0));
        assert!(gate.is_output_allowed(u64::MAX));
    }

    #[test]
    fn test_sleep_requires_headphones() {
        let gate = OutputGate::new(true, false);
        for id in SOUND_APP_TITLE_IDS {
            assert!(!gate.is_output_allowed(id));
        }
    }

    #[test]
    fn test_sleep_allows_listed_titles_only() {
        let gate = OutputGate::new(true, true);
        for id in SOUND_APP_TITLE_IDS {
            assert!(gate.is_output_allowed(id), "0x{:016X} should play", id);
        }
        assert!(!gate.is_output_allowed(0x0004_0000_0003_0800));
    }

    #[test]
    fn test_custom_allow_list() {
        let gate = OutputGate {
            sleep_mode_enabled: true,
            headphones_connected: true,
            allow_list: vec![42],
        };
        assert!(gate.is_output_allowed(42));
        assert!(!gate.is_output_allowed(SOUND_APP_TITLE_IDS[0]));
    }
}
