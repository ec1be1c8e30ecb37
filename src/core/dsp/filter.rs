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

//! Per-source filters
//!
//! Each source can run its output through a one-pole filter (Q15
//! coefficients) followed by a biquad (Q14 coefficients). A disabled filter
//! is reset to passthrough and skipped.

use super::adpcm::StereoFrame16;
use super::shared_memory::{BiquadFilterCoefficients, SimpleFilterCoefficients};

#[inline(always)]
fn clamp16(value: i64) -> i16 {
    value.clamp(i16::MIN as i64, i16::MAX as i64) as i16
}

/// One-pole filter: `y[n] = (b0 * x[n] + a1 * y[n-1]) >> 15`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimpleFilter {
    b0: i64,
    a1: i64,
    y1: StereoFrame16,
}

impl SimpleFilter {
    pub fn new() -> Self {
        Self {
            b0: 1 << 15,
            a1: 0,
            y1: [0; 2],
        }
    }

    /// Clear history and restore unity gain
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn configure(&mut self, coefficients: &SimpleFilterCoefficients) {
        self.b0 = coefficients.b0.get() as i64;
        self.a1 = coefficients.a1.get() as i64;
    }

    pub fn process_sample(&mut self, x0: StereoFrame16) -> StereoFrame16 {
        let mut y0 = [0i16; 2];
        for (i, y) in y0.iter_mut().enumerate() {
            *y = clamp16((self.b0 * x0[i] as i64 + self.a1 * self.y1[i] as i64) >> 15);
        }
        self.y1 = y0;
        y0
    }
}

impl Default for SimpleFilter {
    fn default() -> Self {
        Self::new()
    }
}

/// Biquad filter
///
/// `y[n] = (b0*x[n] + b1*x[n-1] + b2*x[n-2] + a1*y[n-1] + a2*y[n-2]) >> 14`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BiquadFilter {
    b0: i64,
    b1: i64,
    b2: i64,
    a1: i64,
    a2: i64,
    x1: StereoFrame16,
    x2: StereoFrame16,
    y1: StereoFrame16,
    y2: StereoFrame16,
}

impl BiquadFilter {
    pub fn new() -> Self {
        Self {
            b0: 1 << 14,
            b1: 0,
            b2: 0,
            a1: 0,
            a2: 0,
            x1: [0; 2],
            x2: [0; 2],
            y1: [0; 2],
            y2: [0; 2],
        }
    }

    /// Clear history and restore unity gain
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn configure(&mut self, coefficients: &BiquadFilterCoefficients) {
        self.b0 = coefficients.b0.get() as i64;
        self.b1 = coefficients.b1.get() as i64;
        self.b2 = coefficients.b2.get() as i64;
        self.a1 = coefficients.a1.get() as i64;
        self.a2 = coefficients.a2.get() as i64;
    }

    pub fn process_sample(&mut self, x0: StereoFrame16) -> StereoFrame16 {
        let mut y0 = [0i16; 2];
        for (i, y) in y0.iter_mut().enumerate() {
            let acc = self.b0 * x0[i] as i64
                + self.b1 * self.x1[i] as i64
                + self.b2 * self.x2[i] as i64
                + self.a1 * self.y1[i] as i64
                + self.a2 * self.y2[i] as i64;
            *y = clamp16(acc >> 14);
        }
        self.x2 = self.x1;
        self.x1 = x0;
        self.y2 = self.y1;
        self.y1 = y0;
        y0
    }
}

impl Default for BiquadFilter {
    fn default() -> Self {
        Self::new()
    }
}

/// Filter chain of one source
#[derive(Debug, Clone, Default)]
pub struct SourceFilters {
    simple_enabled: bool,
    biquad_enabled: bool,
    simple: SimpleFilter,
    biquad: BiquadFilter,
}

impl SourceFilters {
    /// Disable both filters
    pub fn reset(&mut self) {
        self.enable(false, false);
    }

    /// Enable or disable each stage; disabled stages are reset
    pub fn enable(&mut self, simple: bool, biquad: bool) {
        self.simple_enabled = simple;
        self.biquad_enabled = biquad;
        if !simple {
            self.simple.reset();
        }
        if !biquad {
            self.biquad.reset();
        }
    }

    pub fn configure_simple(&mut self, coefficients: &SimpleFilterCoefficients) {
        self.simple.configure(coefficients);
    }

    pub fn configure_biquad(&mut self, coefficients: &BiquadFilterCoefficients) {
        self.biquad.configure(coefficients);
    }

    /// Filter a frame in place
    pub fn process_frame(&mut self, frame: &mut [StereoFrame16]) {
        if !self.simple_enabled && !self.biquad_enabled {
            return;
        }

        for sample in frame.iter_mut() {
            if self.simple_enabled {
                *sample = self.simple.process_sample(*sample);
            }
            if self.biquad_enabled {
                *sample = self.biquad.process_sample(*sample);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dsp::shared_memory::I16Le;

    fn simple(b0: i16, a1: i16) -> SimpleFilterCoefficients {
        SimpleFilterCoefficients {
            b0: I16Le::new(b0),
            a1: I16Le::new(a1),
        }
    }

    #[test]
    fn test_disabled_filters_pass_through() {
        let mut filters = SourceFilters::default();
        filters.configure_simple(&simple(0, 0));
        let mut frame = [[123, -456], [7, 8]];
        filters.process_frame(&mut frame);
        assert_eq!(frame, [[123, -456], [7, 8]]);
    }

    #[test]
    fn test_simple_filter_half_gain() {
        let mut filters = SourceFilters::default();
        filters.enable(true, false);
        filters.configure_simple(&simple(1 << 14, 0));
        let mut frame = [[1000, -1000]];
        filters.process_frame(&mut frame);
        assert_eq!(frame, [[500, -500]]);
    }

    #[test]
    fn test_simple_filter_feedback() {
        let mut filter = SimpleFilter::new();
        filter.configure(&simple(1 << 14, 1 << 14));
        assert_eq!(filter.process_sample([1000, 1000]), [500, 500]);
        // 0.5 * 1000 + 0.5 * 500
        assert_eq!(filter.process_sample([1000, 1000]), [750, 750]);
    }

    #[test]
    fn test_biquad_unity_and_clamp() {
        let mut filter = BiquadFilter::new();
        assert_eq!(filter.process_sample([i16::MAX, i16::MIN]), [i16::MAX, i16::MIN]);

        filter.configure(&BiquadFilterCoefficients {
            a2: I16Le::new(0),
            a1: I16Le::new(0),
            b2: I16Le::new(0),
            b1: I16Le::new(0),
            b0: I16Le::new(i16::MAX),
        });
        assert_eq!(filter.process_sample([i16::MAX, i16::MIN]), [i16::MAX, i16::MIN]);
    }

    #[test]
    fn test_biquad_uses_history() {
        let mut filter = BiquadFilter::new();
        filter.configure(&BiquadFilterCoefficients {
            a2: I16Le::new(0),
            a1: I16Le::new(0),
            b2: I16Le::new(1 << 14),
            b1: I16Le::new(0),
            b0: I16Le::new(0),
        });
        // Pure two-sample delay
        assert_eq!(filter.process_sample([10, 20]), [0, 0]);
        assert_eq!(filter.process_sample([30, 40]), [0, 0]);
        assert_eq!(filter.process_sample([0, 0]), [10, 20]);
    }

    #[test]
    fn test_disable_resets_state() {
        let mut filters = SourceFilters::default();
        filters.enable(true, true);
        filters.configure_simple(&simple(0, 0));
        filters.enable(false, true);
        filters.enable(true, true);
        let mut frame = [[100, 100]];
        filters.process_frame(&mut frame);
        assert_eq!(frame, [[100, 100]], "Re-enabled simple filter starts at unity");
    }
}
