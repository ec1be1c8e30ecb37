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

//! DSP final mixer
//!
//! Combines the three intermediate quad buses (main plus two aux buses) into
//! the final stereo frame. When an aux bus is enabled the application gets
//! to process it: the DSP sends the bus out through the write region and
//! takes the processed samples back from the read region one frame later.
//!
//! ```text
//!  sources ─► bus 0 ──────────────────────────────┐
//!  sources ─► bus 1 ─► aux send ┄ app ┄ aux return ┼─► downmix ─► frame
//!  sources ─► bus 2 ─► aux send ┄ app ┄ aux return ┘
//! ```

use super::shared_memory::{
    DspConfigDirty, DspConfiguration, DspStatus, IntermediateBus, IntermediateMixSamples,
    OutputFormat, U32Dsp,
};
use super::{FrameSamples, QuadFrame32, SAMPLES_PER_FRAME};
use bytemuck::Zeroable;

#[inline(always)]
fn clamp16(value: i32) -> i16 {
    value.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

#[derive(Debug, Clone)]
struct State {
    /// Main, aux 0 return and aux 1 return volumes
    intermediate_mixer_volume: [f32; 3],
    aux_bus_enable: [bool; 2],
    intermediate_mix_buffer: [QuadFrame32; 3],
    output_format: OutputFormat,
    headphones_connected: bool,
}

impl Default for State {
    fn default() -> Self {
        Self {
            intermediate_mixer_volume: [0.0; 3],
            aux_bus_enable: [false; 2],
            intermediate_mix_buffer: [[[0; 4]; SAMPLES_PER_FRAME]; 3],
            output_format: OutputFormat::Stereo,
            headphones_connected: false,
        }
    }
}

/// Final mix stage
pub struct Mixer {
    current_frame: FrameSamples,
    state: State,
}

impl Mixer {
    pub fn new() -> Self {
        Self {
            current_frame: [[0; 2]; SAMPLES_PER_FRAME],
            state: State::default(),
        }
    }

    /// Return to the power-on state
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Stereo output of the most recent frame
    pub fn output(&self) -> &FrameSamples {
        &self.current_frame
    }

    /// Current output channel layout
    pub fn output_format(&self) -> OutputFormat {
        self.state.output_format
    }

    /// Headphone state last reported by the application
    pub fn headphones_connected(&self) -> bool {
        self.state.headphones_connected
    }

    /// Run one audio frame
    ///
    /// # Arguments
    ///
    /// * `config` - DSP configuration in the read region (dirty bits cleared)
    /// * `read_samples` - Aux return buffers from the read region
    /// * `write_samples` - Aux send buffers in the write region
    /// * `input` - The three buses accumulated from the sources
    ///
    /// # Returns
    ///
    /// Status to publish in the write region
    pub fn tick(
        &mut self,
        config: &mut DspConfiguration,
        read_samples: &IntermediateMixSamples,
        write_samples: &mut IntermediateMixSamples,
        input: &[QuadFrame32; 3],
    ) -> DspStatus {
        self.parse_config(config);
        self.aux_return(read_samples);
        self.aux_send(write_samples, input);
        self.mix_current_frame();
        DspStatus::zeroed()
    }

    fn parse_config(&mut self, config: &mut DspConfiguration) {
        let mut dirty = config.dirty_flags();
        if dirty.is_empty() {
            return;
        }

        for (bus, flag) in [DspConfigDirty::MIXER1_ENABLED, DspConfigDirty::MIXER2_ENABLED]
            .into_iter()
            .enumerate()
        {
            if dirty.contains(flag) {
                dirty.remove(flag);
                self.state.aux_bus_enable[bus] = config.aux_bus_enable[bus].get() != 0;
                log::trace!(
                    "mixers aux_bus_enable[{}] = {}",
                    bus,
                    self.state.aux_bus_enable[bus]
                );
            }
        }

        if dirty.contains(DspConfigDirty::MASTER_VOLUME) {
            dirty.remove(DspConfigDirty::MASTER_VOLUME);
            self.state.intermediate_mixer_volume[0] = config.master_volume.get();
            log::trace!("mixers master_volume = {}", config.master_volume.get());
        }

        for (aux, flag) in [
            DspConfigDirty::AUX_RETURN_VOLUME_0,
            DspConfigDirty::AUX_RETURN_VOLUME_1,
        ]
        .into_iter()
        .enumerate()
        {
            if dirty.contains(flag) {
                dirty.remove(flag);
                self.state.intermediate_mixer_volume[aux + 1] = config.aux_return_volume[aux].get();
                log::trace!(
                    "mixers aux_return_volume[{}] = {}",
                    aux,
                    config.aux_return_volume[aux].get()
                );
            }
        }

        if dirty.contains(DspConfigDirty::OUTPUT_FORMAT) {
            dirty.remove(DspConfigDirty::OUTPUT_FORMAT);
            match OutputFormat::from_raw(config.output_format.get()) {
                Some(format) => self.state.output_format = format,
                None => log::error!(
                    "mixers unknown output format {}",
                    config.output_format.get()
                ),
            }
            log::trace!("mixers output_format = {:?}", self.state.output_format);
        }

        if dirty.contains(DspConfigDirty::CLIPPING_MODE) {
            dirty.remove(DspConfigDirty::CLIPPING_MODE);
            log::warn!(
                "mixers clipping mode {} unimplemented",
                config.clipping_mode.get()
            );
        }

        if dirty.contains(DspConfigDirty::HEADPHONES_CONNECTED) {
            dirty.remove(DspConfigDirty::HEADPHONES_CONNECTED);
            self.state.headphones_connected = config.headphones_connected.get() != 0;
            log::trace!(
                "mixers headphones_connected = {}",
                self.state.headphones_connected
            );
        }

        if !dirty.is_empty() {
            log::debug!("mixers remaining_dirty=0x{:08X}", dirty.bits());
        }

        config.dirty = U32Dsp::new(0);
    }

    /// Take processed aux buses back from the application
    fn aux_return(&mut self, read_samples: &IntermediateMixSamples) {
        for aux in 0..2 {
            if !self.state.aux_bus_enable[aux] {
                continue;
            }
            // Shared memory is channel-major, the internal buffer sample-major
            let bus: &IntermediateBus = read_samples.bus(aux);
            let dest = &mut self.state.intermediate_mix_buffer[aux + 1];
            for (sample, quad) in dest.iter_mut().enumerate() {
                for (channel, value) in quad.iter_mut().enumerate() {
                    *value = bus.0[channel][sample].get();
                }
            }
        }
    }

    /// Hand aux buses to the application, or route them straight through
    fn aux_send(&mut self, write_samples: &mut IntermediateMixSamples, input: &[QuadFrame32; 3]) {
        self.state.intermediate_mix_buffer[0] = input[0];

        for aux in 0..2 {
            if self.state.aux_bus_enable[aux] {
                let bus = write_samples.bus_mut(aux);
                for (sample, quad) in input[aux + 1].iter().enumerate() {
                    for (channel, value) in quad.iter().enumerate() {
                        bus.0[channel][sample].set(*value);
                    }
                }
            } else {
                self.state.intermediate_mix_buffer[aux + 1] = input[aux + 1];
            }
        }
    }

    fn mix_current_frame(&mut self) {
        self.current_frame = [[0; 2]; SAMPLES_PER_FRAME];
        for mix in 0..3 {
            let gain = self.state.intermediate_mixer_volume[mix];
            let samples = self.state.intermediate_mix_buffer[mix];
            self.downmix_and_mix_into_current_frame(gain, &samples);
        }
        // Compressor is not applied.
    }

    fn downmix_and_mix_into_current_frame(&mut self, gain: f32, samples: &QuadFrame32) {
        let format = self.state.output_format;
        for (accumulator, sample) in self.current_frame.iter_mut().zip(samples.iter()) {
            let s = sample.map(|v| gain * v as f32);
            let (left, right) = match format {
                OutputFormat::Mono => {
                    let mono = clamp16(((s[0] + s[1] + s[2] + s[3]) / 2.0) as i32);
                    (mono, mono)
                }
                // Surround is mixed as stereo
                OutputFormat::Stereo | OutputFormat::Surround => (
                    clamp16((s[0] + s[2]) as i32),
                    clamp16((s[1] + s[3]) as i32),
                ),
            };
            accumulator[0] = accumulator[0].saturating_add(left);
            accumulator[1] = accumulator[1].saturating_add(right);
        }
    }
}

impl Default for Mixer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dsp::shared_memory::{F32Le, U16Le};

    fn constant_bus(value: [i32; 4]) -> QuadFrame32 {
        [value; SAMPLES_PER_FRAME]
    }

    fn config_with_volumes(master: f32, aux: [f32; 2]) -> DspConfiguration {
        let mut config = DspConfiguration::zeroed();
        config.master_volume = F32Le::new(master);
        config.aux_return_volume = [F32Le::new(aux[0]), F32Le::new(aux[1])];
        config.set_dirty_flags(
            DspConfigDirty::MASTER_VOLUME
                | DspConfigDirty::AUX_RETURN_VOLUME_0
                | DspConfigDirty::AUX_RETURN_VOLUME_1,
        );
        config
    }

    fn run(mixer: &mut Mixer, config: &mut DspConfiguration, input: &[QuadFrame32; 3]) {
        let read = IntermediateMixSamples::zeroed();
        let mut write = IntermediateMixSamples::zeroed();
        mixer.tick(config, &read, &mut write, input);
    }

    // ============================================================================
    // Downmix Tests
    // ============================================================================

    #[test]
    fn test_default_volume_is_silent() {
        let mut mixer = Mixer::new();
        let mut config = DspConfiguration::zeroed();
        let input = [constant_bus([1000; 4]); 3];
        run(&mut mixer, &mut config, &input);
        assert!(mixer.output().iter().all(|s| *s == [0, 0]));
    }

    #[test]
    fn test_stereo_downmix() {
        let mut mixer = Mixer::new();
        let mut config = config_with_volumes(1.0, [0.0, 0.0]);
        let input = [
            constant_bus([100, 200, 10, 20]),
            constant_bus([0; 4]),
            constant_bus([0; 4]),
        ];
        run(&mut mixer, &mut config, &input);
        assert_eq!(mixer.output()[0], [110, 220]);
        assert_eq!(config.dirty.get(), 0, "Dirty word is cleared");
    }

    #[test]
    fn test_mono_downmix_halves_sum() {
        let mut mixer = Mixer::new();
        let mut config = config_with_volumes(0.5, [0.0, 0.0]);
        config.output_format = U16Le::new(OutputFormat::Mono as u16);
        config.set_dirty_flags(config.dirty_flags() | DspConfigDirty::OUTPUT_FORMAT);
        let input = [constant_bus([100, 100, 100, 100]), constant_bus([0; 4]), constant_bus([0; 4])];
        run(&mut mixer, &mut config, &input);
        assert_eq!(mixer.output_format(), OutputFormat::Mono);
        assert_eq!(mixer.output()[5], [100, 100]);
    }

    #[test]
    fn test_buses_saturate() {
        let mut mixer = Mixer::new();
        let mut config = config_with_volumes(1.0, [1.0, 1.0]);
        let input = [constant_bus([30000, -30000, 0, 0]); 3];
        run(&mut mixer, &mut config, &input);
        assert_eq!(mixer.output()[0], [i16::MAX, i16::MIN]);
    }

    // ============================================================================
    // Aux Bus Tests
    // ============================================================================

    #[test]
    fn test_aux_send_and_return() {
        let mut mixer = Mixer::new();
        let mut config = config_with_volumes(0.0, [1.0, 0.0]);
        config.aux_bus_enable[0] = U16Le::new(1);
        config.set_dirty_flags(config.dirty_flags() | DspConfigDirty::MIXER1_ENABLED);

        let mut read = IntermediateMixSamples::zeroed();
        for channel in 0..4 {
            for sample in 0..SAMPLES_PER_FRAME {
                read.mix1.0[channel][sample].set(channel as i32 + 1);
            }
        }
        let mut write = IntermediateMixSamples::zeroed();
        let input = [
            constant_bus([0; 4]),
            constant_bus([7, 8, 9, 10]),
            constant_bus([0; 4]),
        ];

        mixer.tick(&mut config, &read, &mut write, &input);

        // Returned bus: L = 1 + 3, R = 2 + 4
        assert_eq!(mixer.output()[0], [4, 6]);
        // Sent bus is channel-major in shared memory
        assert_eq!(write.mix1.0[2][17].get(), 9);
        assert_eq!(write.mix2.0[0][0].get(), 0, "Disabled bus is not sent");
    }

    #[test]
    fn test_disabled_aux_uses_input_directly() {
        let mut mixer = Mixer::new();
        let mut config = config_with_volumes(0.0, [0.0, 2.0]);
        let input = [
            constant_bus([0; 4]),
            constant_bus([0; 4]),
            constant_bus([1, 2, 0, 0]),
        ];
        run(&mut mixer, &mut config, &input);
        assert_eq!(mixer.output()[0], [2, 4]);
    }

    #[test]
    fn test_headphones_flag_parsed() {
        let mut mixer = Mixer::new();
        let mut config = DspConfiguration::zeroed();
        config.headphones_connected = U16Le::new(1);
        config.set_dirty_flags(DspConfigDirty::HEADPHONES_CONNECTED);
        run(&mut mixer, &mut config, &[constant_bus([0; 4]); 3]);
        assert!(mixer.headphones_connected());
    }
}
