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

//! Sample decoding for DSP sources
//!
//! Implements the three buffer encodings the DSP firmware understands:
//! signed 8-bit PCM, signed 16-bit little-endian PCM, and the DSP's ADPCM
//! format. ADPCM compresses 16-bit PCM audio to 4 bits per sample using
//! a second-order prediction filter with per-source coefficients.
//!
//! All decoders return stereo frames; mono input is duplicated to both
//! channels.

use std::collections::VecDeque;

/// One stereo sample pair
pub type StereoFrame16 = [i16; 2];

/// Decoded stereo samples waiting to be interpolated
pub type StereoBuffer16 = VecDeque<StereoFrame16>;

/// Bytes per ADPCM frame (1 header byte + 7 data bytes)
pub const ADPCM_FRAME_LEN: usize = 8;

/// Samples per ADPCM frame
pub const ADPCM_SAMPLES_PER_FRAME: usize = 14;

/// 4-bit two's complement nibble values
const SIGNED_NIBBLES: [i32; 16] = [0, 1, 2, 3, 4, 5, 6, 7, -8, -7, -6, -5, -4, -3, -2, -1];

/// ADPCM decoder state
///
/// Holds the two previous output samples used by the prediction filter.
/// Carries over between consecutive buffers of the same source unless the
/// application supplies fresh values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdpcmState {
    /// Previous sample
    pub yn1: i16,

    /// Sample before the previous one
    pub yn2: i16,
}

/// Number of bytes `sample_count` ADPCM samples occupy
pub fn adpcm_byte_len(sample_count: usize) -> usize {
    sample_count.div_ceil(ADPCM_SAMPLES_PER_FRAME) * ADPCM_FRAME_LEN
}

/// Decode ADPCM data
///
/// # Arguments
///
/// * `data` - Encoded frames
/// * `sample_count` - Number of samples to produce
/// * `coefficients` - Eight predictor coefficient pairs
/// * `state` - Filter history, updated in place
///
/// # Returns
///
/// Decoded samples (mono, duplicated to both channels)
///
/// # ADPCM Frame Format
///
/// ```text
/// Byte 0: Scale shift (bits 0-3) | Coefficient index (bits 4-6)
/// Bytes 1-7: 7 bytes of nibble pairs, high nibble first (14 samples)
/// ```
pub fn decode_adpcm(
    data: &[u8],
    sample_count: usize,
    coefficients: &[i16; 16],
    state: &mut AdpcmState,
) -> StereoBuffer16 {
    let mut samples = StereoBuffer16::with_capacity(sample_count);
    let mut yn1 = state.yn1 as i64;
    let mut yn2 = state.yn2 as i64;

    for frame in data.chunks(ADPCM_FRAME_LEN) {
        if samples.len() >= sample_count {
            break;
        }

        let header = frame[0];
        let scale = 1i64 << (header & 0xF);
        let index = ((header >> 4) & 0x7) as usize;
        let coef1 = coefficients[index * 2] as i64;
        let coef2 = coefficients[index * 2 + 1] as i64;

        // Guest coefficients can push the prediction past i32
        let mut decode = |nibble: u8| -> i16 {
            let xn = SIGNED_NIBBLES[nibble as usize] as i64 * scale;
            let val = ((xn << 11) + 0x400 + coef1 * yn1 + coef2 * yn2) >> 11;
            let clamped = val.clamp(i16::MIN as i64, i16::MAX as i64);
            yn2 = yn1;
            yn1 = clamped;
            clamped as i16
        };

        for &byte in &frame[1..] {
            for nibble in [byte >> 4, byte & 0xF] {
                if samples.len() >= sample_count {
                    break;
                }
                let sample = decode(nibble);
                samples.push_back([sample, sample]);
            }
        }
    }

    state.yn1 = yn1 as i16;
    state.yn2 = yn2 as i16;
    samples
}

/// Decode signed 8-bit PCM
///
/// Each sample is widened to 16 bits by shifting into the high byte.
///
/// # Arguments
///
/// * `num_channels` - 1 (mono) or 2 (interleaved stereo)
/// * `data` - Raw sample bytes
/// * `sample_count` - Number of sample frames to produce
pub fn decode_pcm8(num_channels: usize, data: &[u8], sample_count: usize) -> StereoBuffer16 {
    let widen = |b: u8| ((b as i8) as i16) << 8;
    match num_channels {
        1 => data
            .iter()
            .take(sample_count)
            .map(|&b| [widen(b), widen(b)])
            .collect(),
        _ => data
            .chunks_exact(2)
            .take(sample_count)
            .map(|pair| [widen(pair[0]), widen(pair[1])])
            .collect(),
    }
}

/// Decode signed 16-bit little-endian PCM
///
/// # Arguments
///
/// * `num_channels` - 1 (mono) or 2 (interleaved stereo)
/// * `data` - Raw sample bytes
/// * `sample_count` - Number of sample frames to produce
pub fn decode_pcm16(num_channels: usize, data: &[u8], sample_count: usize) -> StereoBuffer16 {
    let read = |b: &[u8]| i16::from_le_bytes([b[0], b[1]]);
    match num_channels {
        1 => data
            .chunks_exact(2)
            .take(sample_count)
            .map(|b| {
                let s = read(b);
                [s, s]
            })
            .collect(),
        _ => data
            .chunks_exact(4)
            .take(sample_count)
            .map(|b| [read(&b[0..2]), read(&b[2..4])])
            .collect(),
    }
}
