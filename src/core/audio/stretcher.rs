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

//! Audio time stretching
//!
//! The emulated DSP does not run in lockstep with the host audio device, so
//! the FIFO between them drifts. The stretcher keeps a backlog of input
//! frames and plays it back faster or slower to keep that backlog near a
//! target fill level, avoiding both underruns and runaway latency.
//!
//! Playback speed is changed by resampling, so pitch follows speed. The
//! consumption ratio is smoothed with a one-pole low-pass filter so that
//! short bursts of jitter are not audible.

use std::collections::VecDeque;

/// Backlog size, in seconds of audio, treated as "full"
const MAX_LATENCY: f64 = 0.25;

/// Backlog fill level the stretcher steers towards (fraction of full)
const TARGET_FULLNESS: f64 = 0.5;

/// Time scale of the fill-level correction, in seconds
const TWEAK_TIME_SCALE: f64 = 0.05;

/// Time constant of the ratio smoothing filter, in seconds
const LPF_TIME_SCALE: f64 = 0.712;

/// Slowest playback speed
const MIN_RATIO: f64 = 0.05;

/// Fastest playback speed
const MAX_RATIO: f64 = 4.0;

/// Resampling time stretcher
pub struct TimeStretcher {
    sample_rate: u32,

    /// Smoothed input frames consumed per output frame
    stretch_ratio: f64,

    /// Read position within `backlog`
    position: f64,

    backlog: VecDeque<[i16; 2]>,
}

impl TimeStretcher {
    /// Create a stretcher for a device running at `sample_rate`
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            stretch_ratio: 1.0,
            position: 0.0,
            backlog: VecDeque::new(),
        }
    }

    /// Output sample rate
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Current smoothed playback speed
    pub fn stretch_ratio(&self) -> f64 {
        self.stretch_ratio
    }

    /// Frames buffered inside the stretcher
    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    fn max_backlog(&self) -> f64 {
        self.sample_rate as f64 * MAX_LATENCY
    }

    /// Accept new input and produce up to `output.len()` frames
    ///
    /// # Arguments
    ///
    /// * `input` - Newly available frames
    /// * `output` - Destination for stretched frames
    ///
    /// # Returns
    ///
    /// Number of frames written to `output`
    pub fn process(&mut self, input: &[[i16; 2]], output: &mut [[i16; 2]]) -> usize {
        if output.is_empty() {
            self.backlog.extend(input.iter().copied());
            return 0;
        }

        let num_out = output.len() as f64;
        let time_delta = num_out / self.sample_rate as f64;
        let mut current_ratio = input.len() as f64 / num_out;

        let backlog_fullness = self.backlog.len() as f64 / self.max_backlog();
        if backlog_fullness <= 4.0 {
            self.backlog.extend(input.iter().copied());
        } else {
            log::debug!(
                "TimeStretcher: backlog full ({} frames), dropping {} frames",
                self.backlog.len(),
                input.len()
            );
        }

        // Nudge the ratio so the backlog drifts towards the target level
        let correction = (backlog_fullness - TARGET_FULLNESS) * (time_delta / TWEAK_TIME_SCALE);
        let exponent = if correction < 0.0 { 3.0 } else { 1.0 };
        current_ratio *= (1.0 + 2.0 * correction).max(0.0).powf(exponent);

        let lpf_gain = 1.0 - (-time_delta / LPF_TIME_SCALE).exp();
        self.stretch_ratio += lpf_gain * (current_ratio - self.stretch_ratio);
        self.stretch_ratio = self.stretch_ratio.clamp(MIN_RATIO, MAX_RATIO);

        self.resample(output, self.stretch_ratio)
    }

    /// Play out the backlog at unity speed
    ///
    /// Used when stretching is switched off: whatever is still buffered is
    /// emitted once, anything that does not fit is discarded, and the
    /// stretcher starts over from a clean state.
    ///
    /// # Returns
    ///
    /// Number of frames written to `output`
    pub fn flush(&mut self, output: &mut [[i16; 2]]) -> usize {
        let start = (self.position as usize).min(self.backlog.len());
        let count = (self.backlog.len() - start).min(output.len());
        for (dst, src) in output.iter_mut().zip(self.backlog.range(start..start + count)) {
            *dst = *src;
        }

        let dropped = self.backlog.len() - start - count;
        if dropped > 0 {
            log::debug!("TimeStretcher: flush discarded {} frames", dropped);
        }

        self.backlog.clear();
        self.position = 0.0;
        self.stretch_ratio = 1.0;
        count
    }

    /// Linear-interpolating resampler over the backlog
    fn resample(&mut self, output: &mut [[i16; 2]], ratio: f64) -> usize {
        let mut written = 0;
        for out in output.iter_mut() {
            let index = self.position as usize;
            if index + 1 >= self.backlog.len() {
                break;
            }
            let fraction = self.position - index as f64;
            let a = self.backlog[index];
            let b = self.backlog[index + 1];
            for channel in 0..2 {
                let value = a[channel] as f64 + (b[channel] as f64 - a[channel] as f64) * fraction;
                out[channel] = value.round() as i16;
            }
            self.position += ratio;
            written += 1;
        }

        let consumed = (self.position as usize).min(self.backlog.len());
        self.backlog.drain(..consumed);
        self.position -= consumed as f64;
        written
    }
}
