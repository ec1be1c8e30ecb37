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

//! Sample-rate conversion for DSP sources
//!
//! A source steps through its decoded input at `rate` input samples per
//! output sample. The position is kept as a 24-bit fixed-point fraction, and
//! the last two input samples of the previous step are carried over so that
//! interpolation is seamless across buffer boundaries.

use super::adpcm::{StereoBuffer16, StereoFrame16};

/// Fixed-point scale of the fractional position (24 fractional bits)
pub const SCALE_FACTOR: u64 = 1 << 24;

/// Mask selecting the fractional part of a position
pub const SCALE_MASK: u64 = SCALE_FACTOR - 1;

/// Interpolator history
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterpolationState {
    /// Most recent consumed input sample
    pub xn1: StereoFrame16,

    /// Input sample before `xn1`
    pub xn2: StereoFrame16,

    /// Fractional position relative to `xn2`
    pub fposition: u64,
}

/// Walk the input at `rate`, producing one output per step via `sample_fn`
///
/// Output generation stops when the output is full or the input runs dry.
/// Consumed input is removed from `input`, leaving what the next call needs.
fn step_over_samples<F>(
    state: &mut InterpolationState,
    input: &mut StereoBuffer16,
    rate: f32,
    output: &mut [StereoFrame16],
    outputi: &mut usize,
    sample_fn: F,
) where
    F: Fn(u64, &StereoBuffer16, usize) -> StereoFrame16,
{
    if input.is_empty() || rate <= 0.0 {
        return;
    }

    input.push_front(state.xn1);
    input.push_front(state.xn2);

    let step_size = (rate as f64 * SCALE_FACTOR as f64) as u64;
    let mut fposition = state.fposition;
    let mut inputi = 0usize;

    while *outputi < output.len() {
        inputi = (fposition / SCALE_FACTOR) as usize;
        if inputi + 2 >= input.len() {
            inputi = input.len() - 2;
            break;
        }

        let fraction = fposition & SCALE_MASK;
        output[*outputi] = sample_fn(fraction, input, inputi);
        *outputi += 1;

        fposition = fposition.saturating_add(step_size);
    }

    state.xn2 = input[inputi];
    state.xn1 = input[inputi + 1];
    state.fposition = fposition - inputi as u64 * SCALE_FACTOR;
    input.drain(..inputi + 2);
}

/// No interpolation: every output repeats the nearest earlier input sample
///
/// # Arguments
///
/// * `state` - Interpolator history
/// * `input` - Decoded input, consumed from the front
/// * `rate` - Input samples per output sample
/// * `output` - Frame being filled
/// * `outputi` - Next output index, advanced as samples are produced
pub fn none(
    state: &mut InterpolationState,
    input: &mut StereoBuffer16,
    rate: f32,
    output: &mut [StereoFrame16],
    outputi: &mut usize,
) {
    step_over_samples(state, input, rate, output, outputi, |_, x, i| x[i]);
}

/// Linear interpolation between adjacent input samples
///
/// The difference between neighbours saturates to the i16 range before it
/// is scaled.
///
/// # Arguments
///
/// * `state` - Interpolator history
/// * `input` - Decoded input, consumed from the front
/// * `rate` - Input samples per output sample
/// * `output` - Frame being filled
/// * `outputi` - Next output index, advanced as samples are produced
pub fn linear(
    state: &mut InterpolationState,
    input: &mut StereoBuffer16,
    rate: f32,
    output: &mut [StereoFrame16],
    outputi: &mut usize,
) {
    step_over_samples(state, input, rate, output, outputi, |fraction, x, i| {
        let lerp = |channel: usize| -> i16 {
            let a = x[i][channel] as i64;
            let delta = (x[i + 1][channel] as i64 - a).clamp(-32768, 32767);
            (a + fraction as i64 * delta / SCALE_FACTOR as i64) as i16
        };
        [lerp(0), lerp(1)]
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(samples: &[i16]) -> StereoBuffer16 {
        samples.iter().map(|&s| [s, s]).collect()
    }

    #[test]
    fn test_empty_input_produces_nothing() {
        let mut state = InterpolationState::default();
        let mut input = StereoBuffer16::new();
        let mut output = [[0i16; 2]; 4];
        let mut outputi = 0;
        linear(&mut state, &mut input, 1.0, &mut output, &mut outputi);
        assert_eq!(outputi, 0);
        assert_eq!(state, InterpolationState::default());
    }

    #[test]
    fn test_none_unity_rate_is_delayed_by_history() {
        let mut state = InterpolationState::default();
        let mut input = buffer(&[10, 20, 30, 40]);
        let mut output = [[0i16; 2]; 8];
        let mut outputi = 0;

        none(&mut state, &mut input, 1.0, &mut output, &mut outputi);

        // Two history samples precede the input
        assert_eq!(outputi, 4);
        assert_eq!(&output[..4], &[[0, 0], [0, 0], [10, 10], [20, 20]]);
        assert_eq!(state.xn2, [30, 30]);
        assert_eq!(state.xn1, [40, 40]);
        assert_eq!(state.fposition, 0);
        assert!(input.is_empty());
    }

    #[test]
    fn test_none_stops_when_output_full() {
        let mut state = InterpolationState::default();
        let mut input = buffer(&[1, 2, 3, 4, 5, 6]);
        let mut output = [[0i16; 2]; 2];
        let mut outputi = 0;

        none(&mut state, &mut input, 1.0, &mut output, &mut outputi);

        assert_eq!(outputi, 2);
        assert_eq!(state.xn2, [0, 0]);
        assert_eq!(state.xn1, [1, 1]);
        assert_eq!(state.fposition, SCALE_FACTOR);
        assert_eq!(input.len(), 5, "Unconsumed samples must be kept");
    }

    #[test]
    fn test_linear_half_rate_midpoints() {
        let mut state = InterpolationState {
            xn1: [100, 100],
            xn2: [0, 0],
            fposition: 0,
        };
        let mut input = buffer(&[200, 300]);
        let mut output = [[0i16; 2]; 4];
        let mut outputi = 0;

        linear(&mut state, &mut input, 0.5, &mut output, &mut outputi);

        assert_eq!(outputi, 4);
        assert_eq!(&output[..], &[[0, 0], [50, 50], [100, 100], [150, 150]]);
    }

    #[test]
    fn test_linear_delta_saturates() {
        let mut state = InterpolationState {
            xn1: [i16::MAX, i16::MAX],
            xn2: [i16::MIN, i16::MIN],
            fposition: SCALE_FACTOR / 2,
        };
        let mut input = buffer(&[0]);
        let mut output = [[0i16; 2]; 1];
        let mut outputi = 0;

        linear(&mut state, &mut input, 1.0, &mut output, &mut outputi);

        // delta is clamped to 32767 so halfway lands just below zero
        assert_eq!(outputi, 1);
        assert_eq!(output[0][0], -32768 + 32767 / 2);
    }
}
