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

//! Host-side audio output stage
//!
//! Runs inside the sink's audio callback. Pulls frames out of the FIFO,
//! optionally time-stretches them, holds the last frame through underruns
//! so gaps do not pop, and applies the master volume.

use super::fifo::FifoConsumer;
use super::stretcher::TimeStretcher;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

/// Runtime audio settings shared with the audio thread
///
/// # Example
///
/// ```
/// use ctr_hle::core::audio::AudioControls;
///
/// let controls = AudioControls::new(1.0, true);
/// controls.set_volume(0.5);
/// assert_eq!(controls.volume(), 0.5);
/// ```
#[derive(Debug)]
pub struct AudioControls {
    /// f32 bit pattern of the volume slider (0.0..=1.0)
    volume_bits: AtomicU32,

    stretching: AtomicBool,
}

impl AudioControls {
    pub fn new(volume: f32, stretching: bool) -> Self {
        Self {
            volume_bits: AtomicU32::new(volume.to_bits()),
            stretching: AtomicBool::new(stretching),
        }
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume_bits.load(Ordering::Relaxed))
    }

    pub fn set_volume(&self, volume: f32) {
        self.volume_bits.store(volume.to_bits(), Ordering::Relaxed);
    }

    pub fn stretching_enabled(&self) -> bool {
        self.stretching.load(Ordering::Relaxed)
    }

    pub fn set_stretching(&self, enabled: bool) {
        self.stretching.store(enabled, Ordering::Relaxed);
    }
}

impl Default for AudioControls {
    fn default() -> Self {
        Self::new(1.0, true)
    }
}

/// Map the volume slider onto a gain
///
/// An exponential curve approximates a linear change in loudness; 0.0 maps
/// to 0.001 and 1.0 to (almost exactly) unity.
pub fn volume_scale_factor(volume: f32) -> f32 {
    (6.90775 * volume).exp() * 0.001
}

/// Consumer side of the audio pipeline
pub struct OutputStage {
    consumer: FifoConsumer,
    stretcher: TimeStretcher,
    controls: Arc<AudioControls>,

    /// Stretching state seen on the previous callback
    was_stretching: bool,

    /// Last frame emitted, repeated during underruns
    last_frame: [i16; 2],

    /// Scratch for FIFO reads and stretched output
    input: Vec<[i16; 2]>,
    output: Vec<[i16; 2]>,
}

impl OutputStage {
    /// Create an output stage
    ///
    /// # Arguments
    ///
    /// * `consumer` - Reading half of the frame FIFO
    /// * `sample_rate` - Native rate of the host device
    /// * `controls` - Shared runtime settings
    pub fn new(consumer: FifoConsumer, sample_rate: u32, controls: Arc<AudioControls>) -> Self {
        let was_stretching = controls.stretching_enabled();
        Self {
            consumer,
            stretcher: TimeStretcher::new(sample_rate),
            controls,
            was_stretching,
            last_frame: [0; 2],
            input: Vec::new(),
            output: Vec::new(),
        }
    }

    /// Frames waiting in the FIFO
    pub fn queued_frames(&self) -> usize {
        self.consumer.len()
    }

    /// Fill an interleaved stereo buffer for the host device
    ///
    /// # Arguments
    ///
    /// * `buffer` - Interleaved `[L, R, L, R, ...]` samples, at least `2 * num_frames` long
    /// * `num_frames` - Number of stereo frames requested
    pub fn fill(&mut self, buffer: &mut [i16], num_frames: usize) {
        let num_frames = num_frames.min(buffer.len() / 2);
        if num_frames == 0 {
            return;
        }

        self.output.clear();
        self.output.resize(num_frames, [0; 2]);

        let stretching = self.controls.stretching_enabled();
        let frames_written = if stretching {
            self.input = self.consumer.pop_all();
            self.stretcher.process(&self.input, &mut self.output)
        } else if self.was_stretching {
            let flushed = self.stretcher.flush(&mut self.output);
            flushed + self.consumer.pop(&mut self.output[flushed..])
        } else {
            self.consumer.pop(&mut self.output)
        };
        self.was_stretching = stretching;

        if frames_written > 0 {
            self.last_frame = self.output[frames_written - 1];
        }

        // Hold the last emitted frame through underruns to prevent popping
        for frame in self.output[frames_written..].iter_mut() {
            *frame = self.last_frame;
        }

        let volume = self.controls.volume();
        let scale = if volume == 1.0 {
            None
        } else {
            Some(volume_scale_factor(volume))
        };

        for (dst, frame) in buffer.chunks_exact_mut(2).zip(self.output.iter()) {
            match scale {
                Some(scale) => {
                    dst[0] = (frame[0] as f32 * scale) as i16;
                    dst[1] = (frame[1] as f32 * scale) as i16;
                }
                None => dst.copy_from_slice(frame),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::audio::{AudioFifo, FifoProducer};

    fn make_stage(
        stretching: bool,
        volume: f32,
    ) -> (FifoProducer, OutputStage, Arc<AudioControls>) {
        let (producer, consumer) = AudioFifo::with_capacity(1024);
        let controls = Arc::new(AudioControls::new(volume, stretching));
        let stage = OutputStage::new(consumer, 32728, Arc::clone(&controls));
        (producer, stage, controls)
    }

    #[test]
    fn test_direct_path_copies_frames() {
        let (mut producer, mut stage, _) = make_stage(false, 1.0);
        producer.push(&[[1, 2], [3, 4]]);
        let mut buffer = [0i16; 4];
        stage.fill(&mut buffer, 2);
        assert_eq!(buffer, [1, 2, 3, 4]);
    }

    #[test]
    fn test_underrun_holds_last_frame() {
        let (mut producer, mut stage, _) = make_stage(false, 1.0);
        producer.push(&[[5, -5]]);
        let mut buffer = [0i16; 8];
        stage.fill(&mut buffer, 4);
        assert_eq!(buffer, [5, -5, 5, -5, 5, -5, 5, -5]);

        // Still held on the next callback with an empty FIFO
        let mut buffer = [0i16; 2];
        stage.fill(&mut buffer, 1);
        assert_eq!(buffer, [5, -5]);
    }

    #[test]
    fn test_volume_zero_attenuates() {
        let (mut producer, mut stage, _) = make_stage(false, 0.0);
        producer.push(&[[10000, -10000]]);
        let mut buffer = [0i16; 2];
        stage.fill(&mut buffer, 1);
        assert_eq!(buffer, [10, -10]);
    }

    #[test]
    fn test_volume_scale_factor_curve() {
        assert!((volume_scale_factor(0.0) - 0.001).abs() < 1e-6);
        assert!((volume_scale_factor(1.0) - 1.0).abs() < 1e-3);
        assert!(volume_scale_factor(0.5) < 0.5);
    }

    #[test]
    fn test_flush_then_direct_when_stretching_disabled() {
        let (mut producer, mut stage, controls) = make_stage(true, 1.0);
        let ramp: Vec<[i16; 2]> = (0..8).map(|i| [i, i]).collect();
        producer.push(&ramp);

        let mut buffer = [0i16; 2];
        stage.fill(&mut buffer, 1);

        controls.set_stretching(false);
        producer.push(&[[100, 100]]);
        let mut buffer = vec![0i16; 2 * 16];
        stage.fill(&mut buffer, 16);

        // Backlog comes out first, then the FIFO, then the held frame
        let frames: Vec<[i16; 2]> = buffer.chunks(2).map(|c| [c[0], c[1]]).collect();
        let hundred = frames.iter().position(|f| *f == [100, 100]).unwrap();
        assert!(hundred > 0, "Flushed backlog precedes new frames");
        assert!(frames[hundred..].iter().all(|f| *f == [100, 100]));
    }

    #[test]
    fn test_controls_shared() {
        let controls = AudioControls::default();
        assert_eq!(controls.volume(), 1.0);
        assert!(controls.stretching_enabled());
        controls.set_stretching(false);
        assert!(!controls.stretching_enabled());
    }
}
