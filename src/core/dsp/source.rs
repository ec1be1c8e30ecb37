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

//! DSP source (voice) implementation
//!
//! Each of the 24 sources plays a queue of sample buffers out of guest
//! memory, resamples them to the output rate, filters the result and mixes
//! it into the three intermediate quad buses with independent gains.
//!
//! A source is configured entirely through its [`SourceConfiguration`] in
//! shared memory. The application sets dirty bits for the fields it changed;
//! the source applies those fields once per frame and clears the bits.

use super::adpcm::{
    adpcm_byte_len, decode_adpcm, decode_pcm16, decode_pcm8, AdpcmState, StereoBuffer16,
};
use super::filter::SourceFilters;
use super::interpolate::{self, InterpolationState};
use super::shared_memory::{
    AdpcmCoefficients, Format, InterpolationMode, MonoOrStereo, SourceConfiguration, SourceDirty,
    SourceStatus, U16Le, U32Dsp, NUM_BUFFER_SLOTS,
};
use super::{FrameSamples, QuadFrame32};
use crate::core::memory::GuestMemory;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// A buffer waiting to be played
#[derive(Debug, Clone, Copy)]
struct Buffer {
    physical_address: u32,
    /// Length in samples
    length: u32,
    adpcm_ps: u8,
    adpcm_yn: [i16; 2],
    adpcm_dirty: bool,
    is_looping: bool,
    buffer_id: u16,
    mono_or_stereo: MonoOrStereo,
    format: Format,
    /// Came from the buffer queue rather than the embedded slot
    from_queue: bool,
    /// First sample to play on the first pass
    play_position: u32,
    /// Already played once (looping buffers are re-queued)
    has_played: bool,
    /// Insertion order, breaks ties between equal buffer ids
    sequence: u64,
}

impl PartialEq for Buffer {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Buffer {}

impl PartialOrd for Buffer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Buffer {
    // BinaryHeap is a max-heap; the lowest buffer id must come out first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .buffer_id
            .cmp(&self.buffer_id)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Playback state of one source
#[derive(Debug, Clone)]
struct State {
    enabled: bool,
    sync_count: u16,

    /// Quad gains for the main bus and the two aux buses
    gain: [[f32; 4]; 3],

    input_queue: BinaryHeap<Buffer>,
    next_sequence: u64,
    mono_or_stereo: MonoOrStereo,
    format: Format,

    current_sample_number: u32,
    next_sample_number: u32,
    current_buffer_physical_address: u32,
    current_buffer: StereoBuffer16,

    buffer_update: bool,
    current_buffer_id: u16,
    previous_buffer_id: u16,

    adpcm_coefficients: [i16; 16],
    adpcm_state: AdpcmState,

    rate_multiplier: f32,
    interpolation_mode: InterpolationMode,
    interp_state: InterpolationState,

    filters: SourceFilters,
}

impl Default for State {
    fn default() -> Self {
        Self {
            enabled: false,
            sync_count: 0,
            gain: [[0.0; 4]; 3],
            input_queue: BinaryHeap::new(),
            next_sequence: 0,
            mono_or_stereo: MonoOrStereo::Mono,
            format: Format::Adpcm,
            current_sample_number: 0,
            next_sample_number: 0,
            current_buffer_physical_address: 0,
            current_buffer: StereoBuffer16::new(),
            buffer_update: false,
            current_buffer_id: 0,
            previous_buffer_id: 0,
            adpcm_coefficients: [0; 16],
            adpcm_state: AdpcmState::default(),
            rate_multiplier: 1.0,
            interpolation_mode: InterpolationMode::Polyphase,
            interp_state: InterpolationState::default(),
            filters: SourceFilters::default(),
        }
    }
}

/// One DSP voice
pub struct Source {
    /// Source number (0-23)
    id: usize,

    /// Output of the most recent frame
    current_frame: FrameSamples,

    state: State,
}

impl Source {
    /// Create a new source in its reset state
    ///
    /// # Arguments
    ///
    /// * `id` - Source number (0-23)
    pub fn new(id: usize) -> Self {
        Self {
            id,
            current_frame: [[0; 2]; super::SAMPLES_PER_FRAME],
            state: State::default(),
        }
    }

    /// Source number
    pub fn id(&self) -> usize {
        self.id
    }

    /// Return to the power-on state
    pub fn reset(&mut self) {
        self.current_frame = [[0; 2]; super::SAMPLES_PER_FRAME];
        self.state = State::default();
    }

    /// Whether the source is currently playing
    pub fn is_enabled(&self) -> bool {
        self.state.enabled
    }

    /// Output of the most recent frame
    pub fn current_frame(&self) -> &FrameSamples {
        &self.current_frame
    }

    /// Run one audio frame
    ///
    /// Applies dirty configuration (clearing the dirty bits in `config`),
    /// renders a frame if enabled and reports the resulting status.
    ///
    /// # Arguments
    ///
    /// * `config` - This source's configuration in the read region
    /// * `adpcm_coefficients` - This source's ADPCM coefficients
    /// * `memory` - Guest memory holding the sample buffers
    ///
    /// # Returns
    ///
    /// Status to publish in the write region
    pub fn tick(
        &mut self,
        config: &mut SourceConfiguration,
        adpcm_coefficients: &AdpcmCoefficients,
        memory: &dyn GuestMemory,
    ) -> SourceStatus {
        self.parse_config(config, adpcm_coefficients);

        if self.state.enabled {
            self.generate_frame(memory);
        }

        self.current_status()
    }

    /// Add this source's last frame into an intermediate bus
    ///
    /// Stereo becomes quad here: `[g0*L, g1*R, g2*L, g3*R]`.
    ///
    /// # Arguments
    ///
    /// * `dest` - Bus accumulator
    /// * `intermediate_mix_id` - 0 for the main bus, 1-2 for the aux buses
    pub fn mix_into(&self, dest: &mut QuadFrame32, intermediate_mix_id: usize) {
        if !self.state.enabled {
            return;
        }

        let gains = &self.state.gain[intermediate_mix_id];
        for (quad, stereo) in dest.iter_mut().zip(self.current_frame.iter()) {
            let left = stereo[0] as f32;
            let right = stereo[1] as f32;
            quad[0] = quad[0].wrapping_add((gains[0] * left) as i32);
            quad[1] = quad[1].wrapping_add((gains[1] * right) as i32);
            quad[2] = quad[2].wrapping_add((gains[2] * left) as i32);
            quad[3] = quad[3].wrapping_add((gains[3] * right) as i32);
        }
    }

    fn push_buffer(&mut self, mut buffer: Buffer) {
        buffer.sequence = self.state.next_sequence;
        self.state.next_sequence += 1;
        self.state.input_queue.push(buffer);
    }

    fn parse_config(
        &mut self,
        config: &mut SourceConfiguration,
        adpcm_coefficients: &AdpcmCoefficients,
    ) {
        let mut dirty = config.dirty_flags();
        if dirty.is_empty() {
            return;
        }

        if dirty.contains(SourceDirty::RESET) {
            dirty.remove(SourceDirty::RESET);
            self.reset();
            log::trace!("source_id={} reset", self.id);
        }

        if dirty.contains(SourceDirty::PARTIAL_RESET) {
            dirty.remove(SourceDirty::PARTIAL_RESET);
            self.state.input_queue.clear();
            log::trace!("source_id={} partial reset", self.id);
        }

        if dirty.contains(SourceDirty::ENABLE) {
            dirty.remove(SourceDirty::ENABLE);
            self.state.enabled = config.enable != 0;
            log::trace!("source_id={} enable={}", self.id, self.state.enabled);
        }

        if dirty.contains(SourceDirty::SYNC_COUNT) {
            dirty.remove(SourceDirty::SYNC_COUNT);
            self.state.sync_count = config.sync_count.get();
            log::trace!("source_id={} sync={}", self.id, self.state.sync_count);
        }

        if dirty.contains(SourceDirty::RATE_MULTIPLIER) {
            dirty.remove(SourceDirty::RATE_MULTIPLIER);
            self.state.rate_multiplier = config.rate_multiplier.get();
            log::trace!("source_id={} rate={}", self.id, self.state.rate_multiplier);
        }

        if dirty.contains(SourceDirty::ADPCM_COEFFICIENTS) {
            dirty.remove(SourceDirty::ADPCM_COEFFICIENTS);
            self.state.adpcm_coefficients = adpcm_coefficients.to_array();
            log::trace!("source_id={} adpcm update", self.id);
        }

        for (bus, flag) in [SourceDirty::GAIN_0, SourceDirty::GAIN_1, SourceDirty::GAIN_2]
            .into_iter()
            .enumerate()
        {
            if dirty.contains(flag) {
                dirty.remove(flag);
                self.state.gain[bus] = config.gain[bus].map(|g| g.get());
                log::trace!("source_id={} gain {} update", self.id, bus);
            }
        }

        if dirty.contains(SourceDirty::FILTERS_ENABLED) {
            dirty.remove(SourceDirty::FILTERS_ENABLED);
            self.state.filters.enable(
                config.simple_filter_enabled(),
                config.biquad_filter_enabled(),
            );
            log::trace!(
                "source_id={} enable_simple={} enable_biquad={}",
                self.id,
                config.simple_filter_enabled(),
                config.biquad_filter_enabled()
            );
        }

        if dirty.contains(SourceDirty::SIMPLE_FILTER) {
            dirty.remove(SourceDirty::SIMPLE_FILTER);
            self.state.filters.configure_simple(&config.simple_filter);
        }

        if dirty.contains(SourceDirty::BIQUAD_FILTER) {
            dirty.remove(SourceDirty::BIQUAD_FILTER);
            self.state.filters.configure_biquad(&config.biquad_filter);
        }

        if dirty.contains(SourceDirty::INTERPOLATION) {
            dirty.remove(SourceDirty::INTERPOLATION);
            match InterpolationMode::from_raw(config.interpolation_mode) {
                Some(mode) => self.state.interpolation_mode = mode,
                None => log::warn!(
                    "source_id={} unknown interpolation mode {}",
                    self.id,
                    config.interpolation_mode
                ),
            }
        }

        let embedded_dirty = dirty.contains(SourceDirty::EMBEDDED_BUFFER);

        if dirty.contains(SourceDirty::FORMAT) || embedded_dirty {
            dirty.remove(SourceDirty::FORMAT);
            match Format::from_raw(config.format_raw()) {
                Some(format) => self.state.format = format,
                None => log::error!(
                    "source_id={} unknown sample format {}",
                    self.id,
                    config.format_raw()
                ),
            }
        }

        if dirty.contains(SourceDirty::MONO_OR_STEREO) || embedded_dirty {
            dirty.remove(SourceDirty::MONO_OR_STEREO);
            match MonoOrStereo::from_raw(config.mono_or_stereo_raw()) {
                Some(channels) => self.state.mono_or_stereo = channels,
                None => log::error!(
                    "source_id={} unknown channel setting {}",
                    self.id,
                    config.mono_or_stereo_raw()
                ),
            }
        }

        // Only applies to the embedded buffer, and only on its first pass
        let mut play_position = 0;
        if dirty.contains(SourceDirty::PLAY_POSITION) && config.play_position.get() != 0 {
            dirty.remove(SourceDirty::PLAY_POSITION);
            play_position = config.play_position.get();
        }

        if embedded_dirty {
            dirty.remove(SourceDirty::EMBEDDED_BUFFER);
            let buffer = Buffer {
                physical_address: config.physical_address.get(),
                length: config.length.get(),
                adpcm_ps: config.adpcm_ps.get() as u8,
                adpcm_yn: [config.adpcm_yn[0].get(), config.adpcm_yn[1].get()],
                adpcm_dirty: config.adpcm_dirty(),
                is_looping: config.is_looping(),
                buffer_id: config.buffer_id.get(),
                mono_or_stereo: self.state.mono_or_stereo,
                format: self.state.format,
                from_queue: false,
                play_position,
                has_played: false,
                sequence: 0,
            };
            self.push_buffer(buffer);
            log::trace!(
                "source_id={} enqueued embedded buffer_id={} length={}",
                self.id,
                buffer.buffer_id,
                buffer.length
            );
        }

        if dirty.contains(SourceDirty::LOOP_RELATED) && config.loop_related.get() != 0 {
            dirty.remove(SourceDirty::LOOP_RELATED);
            log::warn!(
                "source_id={} unhandled complex loop with loop_related=0x{:08X}",
                self.id,
                config.loop_related.get()
            );
        }

        if dirty.contains(SourceDirty::BUFFER_QUEUE) {
            dirty.remove(SourceDirty::BUFFER_QUEUE);
            let buffers_dirty = config.buffers_dirty.get();
            for (i, slot) in config.buffers.iter().enumerate().take(NUM_BUFFER_SLOTS) {
                if buffers_dirty & (1 << i) == 0 {
                    continue;
                }
                let buffer = Buffer {
                    physical_address: slot.physical_address.get(),
                    length: slot.length.get(),
                    adpcm_ps: slot.adpcm_ps,
                    adpcm_yn: [slot.adpcm_yn[0].get(), slot.adpcm_yn[1].get()],
                    adpcm_dirty: slot.adpcm_dirty != 0,
                    is_looping: slot.is_looping != 0,
                    buffer_id: slot.buffer_id.get(),
                    mono_or_stereo: self.state.mono_or_stereo,
                    format: self.state.format,
                    from_queue: true,
                    play_position: 0,
                    has_played: false,
                    sequence: 0,
                };
                self.push_buffer(buffer);
                log::trace!(
                    "source_id={} enqueued queued buffer_id={} length={}",
                    self.id,
                    buffer.buffer_id,
                    buffer.length
                );
            }
            config.buffers_dirty = U16Le::new(0);
        }

        if !dirty.is_empty() {
            log::debug!(
                "source_id={} remaining_dirty=0x{:08X}",
                self.id,
                dirty.bits()
            );
        }

        config.dirty = U32Dsp::new(0);
    }

    fn generate_frame(&mut self, memory: &dyn GuestMemory) {
        self.current_frame = [[0; 2]; super::SAMPLES_PER_FRAME];

        if self.state.current_buffer.is_empty() && !self.dequeue_buffer(memory) {
            self.state.enabled = false;
            self.state.buffer_update = true;
            self.state.previous_buffer_id = self.state.current_buffer_id;
            self.state.current_buffer_id = 0;
            return;
        }

        let rate = self.state.rate_multiplier;
        if !(rate.is_finite() && rate > 0.0) {
            log::warn!("source_id={} invalid rate multiplier {}", self.id, rate);
            return;
        }

        let mut frame_position = 0usize;
        self.state.current_sample_number = self.state.next_sample_number;

        while frame_position < self.current_frame.len() {
            if self.state.current_buffer.is_empty() && !self.dequeue_buffer(memory) {
                break;
            }

            let state = &mut self.state;
            match state.interpolation_mode {
                InterpolationMode::None => interpolate::none(
                    &mut state.interp_state,
                    &mut state.current_buffer,
                    rate,
                    &mut self.current_frame,
                    &mut frame_position,
                ),
                InterpolationMode::Linear => interpolate::linear(
                    &mut state.interp_state,
                    &mut state.current_buffer,
                    rate,
                    &mut self.current_frame,
                    &mut frame_position,
                ),
                InterpolationMode::Polyphase => {
                    log::debug!("Polyphase interpolation unimplemented; falling back to linear");
                    interpolate::linear(
                        &mut state.interp_state,
                        &mut state.current_buffer,
                        rate,
                        &mut self.current_frame,
                        &mut frame_position,
                    )
                }
            }
        }

        self.state.next_sample_number = self
            .state
            .next_sample_number
            .wrapping_add((frame_position as f32 * rate) as u32);

        self.state.filters.process_frame(&mut self.current_frame);
    }

    /// Decode the next queued buffer into `current_buffer`
    ///
    /// Returns `false` when the queue is empty.
    fn dequeue_buffer(&mut self, memory: &dyn GuestMemory) -> bool {
        let Some(mut buffer) = self.state.input_queue.pop() else {
            return false;
        };

        // An empty looping buffer would be re-queued forever
        if buffer.length == 0 {
            log::warn!(
                "source_id={} buffer_id={}: zero-length buffer dropped",
                self.id,
                buffer.buffer_id
            );
            self.state.current_buffer.clear();
            return true;
        }

        if buffer.adpcm_dirty {
            self.state.adpcm_state = AdpcmState {
                yn1: buffer.adpcm_yn[0],
                yn2: buffer.adpcm_yn[1],
            };
        }

        let num_channels = match buffer.mono_or_stereo {
            MonoOrStereo::Stereo => 2,
            MonoOrStereo::Mono => 1,
        };
        let length = buffer.length as usize;
        let byte_len = match buffer.format {
            Format::Pcm8 => length * num_channels,
            Format::Pcm16 => length * 2 * num_channels,
            Format::Adpcm => adpcm_byte_len(length),
        };

        let address = buffer.physical_address & 0xFFFF_FFFC;
        let Some(data) = memory.physical_slice(address, byte_len) else {
            log::warn!(
                "source_id={} buffer_id={} length={}: invalid physical address 0x{:08X}",
                self.id,
                buffer.buffer_id,
                buffer.length,
                buffer.physical_address
            );
            self.state.current_buffer.clear();
            return true;
        };

        self.state.current_buffer = match buffer.format {
            Format::Pcm8 => decode_pcm8(num_channels, data, length),
            Format::Pcm16 => decode_pcm16(num_channels, data, length),
            Format::Adpcm => {
                if num_channels != 1 {
                    log::warn!("source_id={} stereo ADPCM is not supported", self.id);
                }
                decode_adpcm(
                    data,
                    length,
                    &self.state.adpcm_coefficients,
                    &mut self.state.adpcm_state,
                )
            }
        };

        // First pass starts at play_position, loops restart at the beginning
        self.state.current_sample_number = if buffer.has_played {
            0
        } else {
            buffer.play_position
        };
        self.state.next_sample_number = self.state.current_sample_number;
        self.state.current_buffer_physical_address = buffer.physical_address;
        if self.state.current_buffer_id != buffer.buffer_id {
            self.state.previous_buffer_id = self.state.current_buffer_id;
        }
        self.state.current_buffer_id = buffer.buffer_id;
        self.state.buffer_update = buffer.from_queue && !buffer.has_played;

        if buffer.is_looping {
            buffer.has_played = true;
            self.push_buffer(buffer);
        }

        // Interpolation consumes from the front, so skip what is already played
        let skip = (self.state.current_sample_number as usize).min(self.state.current_buffer.len());
        self.state.current_buffer.drain(..skip);

        log::trace!(
            "source_id={} buffer_id={} from_queue={} current_buffer.len()={} (adpcm ps=0x{:02X})",
            self.id,
            buffer.buffer_id,
            buffer.from_queue,
            self.state.current_buffer.len(),
            buffer.adpcm_ps
        );
        true
    }

    fn current_status(&mut self) -> SourceStatus {
        let status = SourceStatus {
            is_enabled: self.state.enabled as u8,
            current_buffer_id_dirty: self.state.buffer_update as u8,
            sync_count: U16Le::new(self.state.sync_count),
            current_sample_position: U32Dsp::new(self.state.current_sample_number),
            current_buffer_id: U16Le::new(self.state.current_buffer_id),
            previous_buffer_id: U16Le::new(self.state.previous_buffer_id),
        };
        self.state.buffer_update = false;
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dsp::shared_memory::F32Le;
    use crate::core::memory::FlatMemory;
    use bytemuck::Zeroable;

    const BASE: u32 = 0x2000_0000;

    fn memory_with_pcm16(samples: &[i16]) -> FlatMemory {
        let mut mem = FlatMemory::new(BASE, 0x10000);
        for (i, s) in samples.iter().enumerate() {
            mem.write16(BASE + 2 * i as u32, *s as u16);
        }
        mem
    }

    /// Enabled mono PCM16 source at unity rate, no interpolation, gain 1 on bus 0
    fn playing_config(length: u32) -> SourceConfiguration {
        let mut config = SourceConfiguration::zeroed();
        config.enable = 1;
        config.rate_multiplier = F32Le::new(1.0);
        config.interpolation_mode = InterpolationMode::None as u8;
        config.gain[0] = [F32Le::new(1.0); 4];
        config.physical_address = U32Dsp::new(BASE);
        config.length = U32Dsp::new(length);
        config.buffer_id = U16Le::new(1);
        config.set_embedded_format(Format::Pcm16, MonoOrStereo::Mono);
        config.set_dirty_flags(
            SourceDirty::ENABLE
                | SourceDirty::RATE_MULTIPLIER
                | SourceDirty::INTERPOLATION
                | SourceDirty::GAIN_0
                | SourceDirty::EMBEDDED_BUFFER,
        );
        config
    }

    fn queue_slot(config: &mut SourceConfiguration, slot: usize, address: u32, length: u32, id: u16) {
        config.buffers[slot].physical_address = U32Dsp::new(address);
        config.buffers[slot].length = U32Dsp::new(length);
        config.buffers[slot].buffer_id = U16Le::new(id);
        config.buffers_dirty = U16Le::new(config.buffers_dirty.get() | (1 << slot));
        config.set_dirty_flags(config.dirty_flags() | SourceDirty::BUFFER_QUEUE);
    }

    // ============================================================================
    // Configuration Tests
    // ============================================================================

    #[test]
    fn test_idle_source_reports_disabled() {
        let mut source = Source::new(0);
        let mut config = SourceConfiguration::zeroed();
        let mem = FlatMemory::new(BASE, 0);
        let status = source.tick(&mut config, &AdpcmCoefficients::zeroed(), &mem);
        assert_eq!(status, SourceStatus::zeroed());
        assert!(!source.is_enabled());
    }

    #[test]
    fn test_dirty_bits_are_cleared() {
        let mut source = Source::new(3);
        let mut config = playing_config(4);
        config.buffers_dirty = U16Le::new(0);
        let mem = memory_with_pcm16(&[1, 2, 3, 4]);

        source.tick(&mut config, &AdpcmCoefficients::zeroed(), &mem);

        assert_eq!(config.dirty.get(), 0);
        assert_eq!(config.buffers_dirty.get(), 0);
    }

    #[test]
    fn test_sync_count_reported() {
        let mut source = Source::new(0);
        let mut config = SourceConfiguration::zeroed();
        config.sync_count = U16Le::new(42);
        config.set_dirty_flags(SourceDirty::SYNC_COUNT);
        let mem = FlatMemory::new(BASE, 0);
        let status = source.tick(&mut config, &AdpcmCoefficients::zeroed(), &mem);
        assert_eq!(status.sync_count.get(), 42);
    }

    // ============================================================================
    // Playback Tests
    // ============================================================================

    #[test]
    fn test_embedded_buffer_plays_and_mixes() {
        let samples: Vec<i16> = (1..=200).collect();
        let mem = memory_with_pcm16(&samples);
        let mut source = Source::new(0);
        let mut config = playing_config(200);

        let status = source.tick(&mut config, &AdpcmCoefficients::zeroed(), &mem);
        assert_eq!(status.is_enabled, 1);
        assert_eq!(status.current_buffer_id.get(), 1);
        assert_eq!(
            status.current_buffer_id_dirty, 0,
            "Embedded buffers do not raise the buffer-id dirty flag"
        );

        // Two zero history samples lead the output
        let frame = source.current_frame();
        assert_eq!(frame[0], [0, 0]);
        assert_eq!(frame[1], [0, 0]);
        assert_eq!(frame[2], [1, 1]);
        assert_eq!(frame[159], [158, 158]);

        let mut bus = [[0i32; 4]; 160];
        source.mix_into(&mut bus, 0);
        assert_eq!(bus[2], [1, 1, 1, 1]);

        let mut aux = [[0i32; 4]; 160];
        source.mix_into(&mut aux, 1);
        assert!(aux.iter().all(|q| *q == [0; 4]), "Aux gain defaults to 0");
    }

    #[test]
    fn test_source_disables_when_queue_drains() {
        let mem = memory_with_pcm16(&[100; 10]);
        let mut source = Source::new(0);
        let mut config = playing_config(10);

        source.tick(&mut config, &AdpcmCoefficients::zeroed(), &mem);
        assert!(source.is_enabled());

        let status = source.tick(&mut config, &AdpcmCoefficients::zeroed(), &mem);
        assert!(!source.is_enabled());
        assert_eq!(status.is_enabled, 0);
        assert_eq!(status.current_buffer_id_dirty, 1);
        assert_eq!(status.current_buffer_id.get(), 0);
        assert_eq!(status.previous_buffer_id.get(), 1);

        let status = source.tick(&mut config, &AdpcmCoefficients::zeroed(), &mem);
        assert_eq!(status.current_buffer_id_dirty, 0, "Dirty flag is reported once");
    }

    #[test]
    fn test_queue_plays_in_buffer_id_order() {
        let mut mem = FlatMemory::new(BASE, 0x1000);
        mem.write16(BASE + 0x100, 7);
        mem.write16(BASE + 0x102, 8);
        mem.write16(BASE + 0x200, 9);
        mem.write16(BASE + 0x202, 10);

        let mut source = Source::new(0);
        let mut config = playing_config(0);
        config.set_dirty_flags(
            SourceDirty::ENABLE
                | SourceDirty::RATE_MULTIPLIER
                | SourceDirty::INTERPOLATION
                | SourceDirty::GAIN_0
                | SourceDirty::FORMAT
                | SourceDirty::MONO_OR_STEREO,
        );
        queue_slot(&mut config, 0, BASE + 0x200, 2, 6);
        queue_slot(&mut config, 1, BASE + 0x100, 2, 5);

        let status = source.tick(&mut config, &AdpcmCoefficients::zeroed(), &mem);

        // Buffer 5 then 6; output lags the input by the two history samples
        let frame = source.current_frame();
        assert_eq!(&frame[..5], &[[0, 0], [0, 0], [7, 7], [8, 8], [0, 0]]);
        assert_eq!(status.current_buffer_id.get(), 6);
        assert_eq!(status.previous_buffer_id.get(), 5);
        assert_eq!(status.current_buffer_id_dirty, 1);
    }

    #[test]
    fn test_looping_buffer_repeats() {
        let mem = memory_with_pcm16(&[5, 6]);
        let mut source = Source::new(0);
        let mut config = playing_config(2);
        config.flags2 = U16Le::new(0b10);

        source.tick(&mut config, &AdpcmCoefficients::zeroed(), &mem);
        assert!(source.is_enabled());

        let frame = source.current_frame();
        assert_eq!(&frame[2..8], &[[5, 5], [6, 6], [5, 5], [6, 6], [5, 5], [6, 6]]);
    }

    #[test]
    fn test_zero_length_looping_buffer_is_dropped() {
        let mem = memory_with_pcm16(&[5, 6]);
        let mut source = Source::new(0);
        let mut config = playing_config(0);
        config.flags2 = U16Le::new(0b10);
        queue_slot(&mut config, 0, BASE, 2, 2);

        let status = source.tick(&mut config, &AdpcmCoefficients::zeroed(), &mem);

        // The queued buffer plays after the empty embedded one
        assert_eq!(&source.current_frame()[2..4], &[[5, 5], [6, 6]]);
        assert_eq!(status.current_buffer_id.get(), 2);

        source.tick(&mut config, &AdpcmCoefficients::zeroed(), &mem);
        assert!(!source.is_enabled());
    }

    #[test]
    fn test_play_position_skips_samples() {
        let mem = memory_with_pcm16(&[1, 2, 3, 4, 5, 6, 7, 8]);
        let mut source = Source::new(0);
        let mut config = playing_config(8);
        config.play_position = U32Dsp::new(4);
        config.set_dirty_flags(config.dirty_flags() | SourceDirty::PLAY_POSITION);

        let status = source.tick(&mut config, &AdpcmCoefficients::zeroed(), &mem);
        assert_eq!(status.current_sample_position.get(), 4);
        assert_eq!(source.current_frame()[2], [5, 5]);
    }

    #[test]
    fn test_unmapped_buffer_is_skipped() {
        let mem = FlatMemory::new(BASE, 0x10);
        let mut source = Source::new(0);
        let mut config = playing_config(0x1000);

        source.tick(&mut config, &AdpcmCoefficients::zeroed(), &mem);

        assert!(source.current_frame().iter().all(|s| *s == [0, 0]));
        source.tick(&mut config, &AdpcmCoefficients::zeroed(), &mem);
        assert!(!source.is_enabled());
    }

    #[test]
    fn test_reset_flag_clears_state() {
        let mem = memory_with_pcm16(&[1; 400]);
        let mut source = Source::new(0);
        let mut config = playing_config(400);
        source.tick(&mut config, &AdpcmCoefficients::zeroed(), &mem);
        assert!(source.is_enabled());

        config.set_dirty_flags(SourceDirty::RESET);
        let status = source.tick(&mut config, &AdpcmCoefficients::zeroed(), &mem);
        assert!(!source.is_enabled());
        assert_eq!(status.current_buffer_id.get(), 0);
    }

    #[test]
    fn test_adpcm_buffer_uses_coefficients() {
        let mut mem = FlatMemory::new(BASE, 0x100);
        // scale 1, pair 0, nibbles 1 to 4
        mem.write_bytes(BASE, &[0x00, 0x12, 0x34, 0, 0, 0, 0, 0]);

        let mut source = Source::new(0);
        let mut config = playing_config(4);
        config.set_embedded_format(Format::Adpcm, MonoOrStereo::Mono);
        config.set_dirty_flags(config.dirty_flags() | SourceDirty::ADPCM_COEFFICIENTS);

        source.tick(&mut config, &AdpcmCoefficients::zeroed(), &mem);
        let frame = source.current_frame();
        assert_eq!(frame[2], [1, 1]);
        assert_eq!(frame[3], [2, 2]);
    }
}
