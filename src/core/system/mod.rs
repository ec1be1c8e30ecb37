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

//! System integration module
//!
//! This module ties together the emulated components (DSP, interrupt
//! controller, guest memory, shader engine) around one timing scheduler and
//! provides the main emulation loop.

use super::audio::{open_sink, AudioControls, Sink};
use super::dsp::{DspHle, OutputGate, AUDIO_FRAME_TICKS};
use super::error::Result;
use super::interrupt::{DspInterruptHandler, InterruptController};
use super::memory::FlatMemory;
use super::shader::JitEngine;
use super::timing::TimingEventManager;
use crate::config::Settings;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;

/// Size of the emulated FCRAM
pub const FCRAM_SIZE: usize = 0x0800_0000;

/// Nintendo 3DS system (audio DSP and shader units)
///
/// # Components
/// - DSP: HLE audio DSP, ticked every audio frame
/// - Interrupt controller: receives DSP pipe interrupts
/// - FCRAM: guest memory holding sample buffers
/// - Shader engine: compiles and runs PICA shader programs
///
/// # Example
/// ```
/// use ctr_hle::core::dsp::{DspPipe, DspState};
/// use ctr_hle::core::system::System;
///
/// let mut system = System::new();
/// system.dsp_mut().pipe_write(DspPipe::Audio, &[0, 0, 0, 0]);
/// system.run_audio_frames(2);
///
/// assert_eq!(system.dsp().state(), DspState::On);
/// assert_eq!(system.dsp().frames_generated(), 2);
/// ```
pub struct System {
    /// Timing event manager
    timing: TimingEventManager,
    /// HLE audio DSP
    dsp: DspHle,
    /// DSP interrupt controller (shared via Rc<RefCell>, the DSP holds a weak handle)
    interrupt_controller: Rc<RefCell<InterruptController>>,
    /// Guest FCRAM
    memory: FlatMemory,
    /// Shader compiler and cache
    shader_engine: JitEngine,
    /// Volume and stretching shared with the audio callback
    audio_controls: Arc<AudioControls>,
    /// Title ID reported to the DSP output gate
    program_id: Rc<Cell<u64>>,
    settings: Settings,
    /// Total cycles executed
    cycles: u64,
}

impl System {
    /// Create a system with default settings
    pub fn new() -> Self {
        Self::with_settings(Settings::default())
    }

    /// Create a system configured from `settings`
    ///
    /// Wires the DSP to the interrupt controller, installs the output gate
    /// and registers the DSP frame event. No audio sink is opened; see
    /// [`System::open_audio`].
    pub fn with_settings(settings: Settings) -> Self {
        let interrupt_controller = Rc::new(RefCell::new(InterruptController::new()));
        let handler: Rc<RefCell<dyn DspInterruptHandler>> = interrupt_controller.clone();

        let program_id = Rc::new(Cell::new(settings.system.program_id));
        let provider = Rc::clone(&program_id);

        let mut dsp = DspHle::new();
        dsp.set_interrupt_handler(Rc::downgrade(&handler));
        dsp.set_output_gate(OutputGate::new(
            settings.system.sleep_mode,
            settings.system.headphones_connected,
        ));
        dsp.set_program_id_provider(move || provider.get());

        let mut timing = TimingEventManager::new();
        dsp.register_events(&mut timing);

        let audio_controls = Arc::new(AudioControls::new(
            settings.audio.volume,
            settings.audio.enable_audio_stretching,
        ));

        log::info!("System: all components initialized and timing events registered");

        Self {
            timing,
            dsp,
            interrupt_controller,
            memory: FlatMemory::new(FlatMemory::FCRAM_BASE, FCRAM_SIZE),
            shader_engine: JitEngine::from_settings(&settings.shader),
            audio_controls,
            program_id,
            settings,
            cycles: 0,
        }
    }

    /// Open the audio backend selected in the settings and attach it
    ///
    /// # Errors
    ///
    /// Returns an error if the configured backend cannot be opened.
    pub fn open_audio(&mut self) -> Result<()> {
        let sink = open_sink(&self.settings.audio)?;
        self.attach_sink(sink);
        Ok(())
    }

    /// Attach an already opened sink
    pub fn attach_sink(&mut self, sink: Box<dyn Sink>) {
        self.dsp.set_sink(sink, Arc::clone(&self.audio_controls));
    }

    /// Advance emulated time by `cycles` ARM11 cycles
    ///
    /// Time advances in slices ending exactly at each due event, so events
    /// fire on time.
    pub fn run_cycles(&mut self, cycles: u64) {
        let mut remaining = cycles;
        while remaining > 0 {
            let until_event = self
                .timing
                .downcount
                .saturating_sub(self.timing.pending_ticks)
                .max(1);
            let step = remaining.min(until_event);
            self.timing.add_ticks(step);
            remaining -= step;

            if self.timing.events_due() {
                let fired = self.timing.run_events();
                self.dsp
                    .process_events(&mut self.timing, &fired, &self.memory);
            }
        }
        self.cycles += cycles;
    }

    /// Run `frames` audio frames worth of cycles
    pub fn run_audio_frames(&mut self, frames: u64) {
        self.run_cycles(frames * AUDIO_FRAME_TICKS);
    }

    /// Stop the DSP frame event
    pub fn shutdown(&mut self) {
        self.dsp.unregister_events(&mut self.timing);
        log::info!("System: shut down after {} cycles", self.cycles);
    }

    /// Change the running program's title ID
    pub fn set_program_id(&mut self, program_id: u64) {
        self.program_id.set(program_id);
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn dsp(&self) -> &DspHle {
        &self.dsp
    }

    pub fn dsp_mut(&mut self) -> &mut DspHle {
        &mut self.dsp
    }

    pub fn interrupt_controller(&self) -> Rc<RefCell<InterruptController>> {
        Rc::clone(&self.interrupt_controller)
    }

    pub fn memory(&self) -> &FlatMemory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut FlatMemory {
        &mut self.memory
    }

    pub fn shader_engine(&self) -> &JitEngine {
        &self.shader_engine
    }

    pub fn audio_controls(&self) -> Arc<AudioControls> {
        Arc::clone(&self.audio_controls)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }
}

impl Default for System {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::audio::AudioFifo;
    use crate::core::dsp::shared_memory::{
        DspConfigDirty, F32Le, Format, InterpolationMode, MonoOrStereo, SourceDirty, U16Le,
        U32Dsp,
    };
    use crate::core::dsp::{DspPipe, DspState, SAMPLES_PER_FRAME};
    use crate::core::interrupt::interrupts;
    use crate::core::shader::assemble::{bare, common, plain_swizzle};
    use crate::core::shader::{DestRegister, OpCode, ShaderSetup, SourceRegister, UnitState};

    fn initialized_system(settings: Settings) -> System {
        let mut system = System::with_settings(settings);
        system.dsp_mut().pipe_write(DspPipe::Audio, &[0, 0, 0, 0]);
        system
    }

    // ========== Construction Tests ==========

    #[test]
    fn test_system_creation() {
        let system = System::new();
        assert_eq!(system.dsp().state(), DspState::Off);
        assert_eq!(system.cycles(), 0);
        assert_eq!(system.memory().base(), FlatMemory::FCRAM_BASE);
        assert_eq!(system.memory().len(), FCRAM_SIZE);
    }

    #[test]
    fn test_settings_reach_components() {
        let mut settings = Settings::default();
        settings.audio.volume = 0.25;
        settings.audio.enable_audio_stretching = false;
        settings.system.sleep_mode = true;
        let system = System::with_settings(settings);

        assert_eq!(system.audio_controls().volume(), 0.25);
        assert!(!system.audio_controls().stretching_enabled());
        assert!(system.dsp().output_gate().sleep_mode_enabled);
    }

    // ========== Frame Loop Tests ==========

    #[test]
    fn test_frames_follow_cycles() {
        let mut system = initialized_system(Settings::default());

        system.run_cycles(AUDIO_FRAME_TICKS - 1);
        assert_eq!(system.dsp().frames_generated(), 0);

        system.run_cycles(1);
        assert_eq!(system.dsp().frames_generated(), 1);

        system.run_audio_frames(10);
        assert_eq!(system.dsp().frames_generated(), 11);
        assert_eq!(system.cycles(), 11 * AUDIO_FRAME_TICKS);
    }

    #[test]
    fn test_frames_raise_pipe_interrupts() {
        let mut system = initialized_system(Settings::default());
        system.run_audio_frames(3);

        let ic = system.interrupt_controller();
        let ic = ic.borrow();
        // Initialize signals the audio pipe once
        assert_eq!(ic.signal_count(interrupts::PIPE_AUDIO), 4);
        assert_eq!(ic.signal_count(interrupts::PIPE_BINARY), 3);
        assert_ne!(ic.read_status() & interrupts::PIPE_AUDIO as u32, 0);
    }

    #[test]
    fn test_gate_silences_frames_but_keeps_ticking() {
        let mut settings = Settings::default();
        settings.system.sleep_mode = true;
        settings.system.program_id = 0x0004_0000_0000_1234;
        let mut system = initialized_system(settings);

        system.run_audio_frames(2);
        assert_eq!(system.dsp().frames_generated(), 0);

        // Allow-listed titles also need headphones
        system.set_program_id(0x0004_0010_0002_0500);
        system.run_audio_frames(1);
        assert_eq!(system.dsp().frames_generated(), 0);

        let ic = system.interrupt_controller();
        assert_eq!(ic.borrow().signal_count(interrupts::PIPE_BINARY), 0);
    }

    #[test]
    fn test_allowed_title_plays_in_sleep() {
        let mut settings = Settings::default();
        settings.system.sleep_mode = true;
        settings.system.headphones_connected = true;
        settings.system.program_id = 0x0004_0010_0002_1500;
        let mut system = initialized_system(settings);

        system.run_audio_frames(2);
        assert_eq!(system.dsp().frames_generated(), 2);
    }

    #[test]
    fn test_shutdown_stops_frames() {
        let mut system = initialized_system(Settings::default());
        system.run_audio_frames(1);
        system.shutdown();
        system.run_audio_frames(5);
        assert_eq!(system.dsp().frames_generated(), 1);
    }

    #[test]
    fn test_source_plays_from_fcram() {
        let mut system = initialized_system(Settings::default());
        let (producer, mut consumer) = AudioFifo::with_capacity(4 * SAMPLES_PER_FRAME);
        system.dsp_mut().attach_output(producer);

        let base = FlatMemory::FCRAM_BASE;
        for i in 0..SAMPLES_PER_FRAME as u32 * 2 {
            system.memory_mut().write16(base + 2 * i, 2000);
        }

        let shared = system.dsp_mut().dsp_memory_mut().region_mut(1);
        let config = &mut shared.source_configurations[5];
        config.enable = 1;
        config.rate_multiplier = F32Le::new(1.0);
        config.interpolation_mode = InterpolationMode::Linear as u8;
        config.gain[0] = [F32Le::new(0.5); 4];
        config.physical_address = U32Dsp::new(base);
        config.length = U32Dsp::new(SAMPLES_PER_FRAME as u32 * 2);
        config.buffer_id = U16Le::new(3);
        config.set_embedded_format(Format::Pcm16, MonoOrStereo::Mono);
        config.set_dirty_flags(
            SourceDirty::ENABLE
                | SourceDirty::RATE_MULTIPLIER
                | SourceDirty::INTERPOLATION
                | SourceDirty::GAIN_0
                | SourceDirty::EMBEDDED_BUFFER,
        );
        shared.dsp_configuration.master_volume = F32Le::new(1.0);
        shared
            .dsp_configuration
            .set_dirty_flags(DspConfigDirty::MASTER_VOLUME);

        system.run_audio_frames(1);

        let written = system.dsp().dsp_memory().region(0);
        assert_eq!(written.source_statuses[5].is_enabled, 1);
        assert_eq!(written.source_statuses[5].current_buffer_id.get(), 3);

        let frames = consumer.pop_all();
        assert_eq!(frames.len(), SAMPLES_PER_FRAME);
        assert!(frames[SAMPLES_PER_FRAME - 1][0] > 0);
    }

    // ========== Shader Engine Tests ==========

    #[test]
    fn test_shader_engine_available() {
        let system = System::new();
        let mut setup = ShaderSetup::new();
        setup.set_swizzle_data(0, &[plain_swizzle(0xF)]);
        setup.set_program_code(
            0,
            &[
                common(
                    OpCode::Mul,
                    DestRegister::Output(0),
                    SourceRegister::Input(0),
                    SourceRegister::Input(0),
                    0,
                    0,
                ),
                bare(OpCode::End),
            ],
        );
        system.shader_engine().prepare_batch(&mut setup, 0);

        let mut state = UnitState::new();
        state.load_input(&[[3.0; 4]]);
        system.shader_engine().run(&setup, &mut state);
        assert_eq!(state.registers.output[0], [9.0; 4]);
    }
}
