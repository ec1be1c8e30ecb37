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

//! High-level emulation of the 3DS audio DSP
//!
//! Instead of running the DSP firmware, this module reproduces what the
//! firmware does with the shared memory regions:
//!
//! - the application talks to the DSP through byte pipes ([`pipe`]);
//! - every audio frame (160 samples at ~32728 Hz) the DSP reads the current
//!   shared memory region, renders the 24 sources, runs the final mixer and
//!   writes statuses and the final samples into the other region;
//! - finished frames are pushed to the host audio FIFO and the application
//!   is notified through pipe interrupts.
//!
//! ## Frame Timing
//!
//! ```text
//! ARM11 clock:      268,111,856 Hz
//! Output rate:      ~32,728 Hz
//! Frame:            160 samples
//! Frame period:     1,310,252 ARM11 cycles
//! ```
//!
//! ## State Machine
//!
//! ```text
//!        Initialize / Wakeup            Sleep
//!  Off ─────────────────────────► On ─────────► Sleeping
//!   ▲                              │               │
//!   └──────── Shutdown ────────────┘◄── Wakeup ────┘
//! ```

pub mod adpcm;
pub mod filter;
pub mod gate;
pub mod interpolate;
pub mod mixer;
pub mod pipe;
pub mod shared_memory;
pub mod source;


pub use gate::OutputGate;
pub use pipe::{DspPipe, StateChange, NUM_DSP_PIPE};
pub use shared_memory::{DspMemory, SharedMemory, NUM_SOURCES, SAMPLES_PER_FRAME};

use crate::core::audio::{AudioControls, AudioFifo, FifoProducer, OutputStage, Sink};
use crate::core::audio::DEFAULT_FIFO_CAPACITY;
use crate::core::interrupt::{DspInterruptHandler, InterruptType};
use crate::core::memory::GuestMemory;
use crate::core::timing::{EventHandle, TimingEventManager};
use adpcm::StereoFrame16;
use mixer::Mixer;
use pipe::PipeQueues;
use source::Source;
use std::cell::RefCell;
use std::rc::Weak;
use std::sync::Arc;

/// ARM11 cycles between audio frames
pub const AUDIO_FRAME_TICKS: u64 = 1_310_252;

/// Four-channel accumulator for one frame
pub type QuadFrame32 = [[i32; 4]; SAMPLES_PER_FRAME];

/// One frame of stereo output
pub type FrameSamples = [StereoFrame16; SAMPLES_PER_FRAME];

/// Supplies the title ID of the running program
pub type ProgramIdProvider = Box<dyn Fn() -> u64>;

/// DSP power state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DspState {
    #[default]
    Off,
    On,
    Sleeping,
}

/// HLE DSP
///
/// # Example
///
/// ```
/// use ctr_hle::core::dsp::{DspHle, DspPipe, DspState};
///
/// let mut dsp = DspHle::new();
/// dsp.pipe_write(DspPipe::Audio, &[0, 0, 0, 0]); // Initialize
/// assert_eq!(dsp.state(), DspState::On);
///
/// // Address directory: count followed by 15 DSP addresses
/// assert_eq!(dsp.pipe_readable_size(DspPipe::Audio), 32);
/// ```
pub struct DspHle {
    state: DspState,

    /// DSP data RAM with both shared memory regions
    memory: DspMemory,

    pipes: PipeQueues,
    sources: [Source; NUM_SOURCES],
    mixer: Mixer,

    gate: OutputGate,
    program_id: ProgramIdProvider,

    /// Receiver of DSP interrupts (may have been torn down)
    interrupt_handler: Option<Weak<RefCell<dyn DspInterruptHandler>>>,

    /// Host audio FIFO, present once a sink is attached
    output: Option<FifoProducer>,
    sink: Option<Box<dyn Sink>>,

    tick_event: Option<EventHandle>,

    frames_generated: u64,
    frames_dropped: u64,
}

impl DspHle {
    /// Create a powered-off DSP with no sink and an open output gate
    pub fn new() -> Self {
        Self {
            state: DspState::Off,
            memory: DspMemory::new(),
            pipes: PipeQueues::new(),
            sources: std::array::from_fn(Source::new),
            mixer: Mixer::new(),
            gate: OutputGate::default(),
            program_id: Box::new(|| 0),
            interrupt_handler: None,
            output: None,
            sink: None,
            tick_event: None,
            frames_generated: 0,
            frames_dropped: 0,
        }
    }

    // ========== Accessors ==========

    pub fn state(&self) -> DspState {
        self.state
    }

    /// DSP data RAM
    pub fn dsp_memory(&self) -> &DspMemory {
        &self.memory
    }

    /// DSP data RAM, as the application sees it
    pub fn dsp_memory_mut(&mut self) -> &mut DspMemory {
        &mut self.memory
    }

    /// Output of the most recent frame
    pub fn current_frame(&self) -> &FrameSamples {
        self.mixer.output()
    }

    /// Source by index
    pub fn source(&self, index: usize) -> Option<&Source> {
        self.sources.get(index)
    }

    /// Frames generated since power-on
    pub fn frames_generated(&self) -> u64 {
        self.frames_generated
    }

    /// Frames that did not fit into the host FIFO
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }

    // ========== Collaborators ==========

    /// Route DSP interrupts to `handler`
    ///
    /// Only a weak reference is kept; once the handler is dropped, interrupts
    /// are silently discarded.
    pub fn set_interrupt_handler(&mut self, handler: Weak<RefCell<dyn DspInterruptHandler>>) {
        self.interrupt_handler = Some(handler);
    }

    /// Install the source of the running program's title ID
    pub fn set_program_id_provider<F>(&mut self, provider: F)
    where
        F: Fn() -> u64 + 'static,
    {
        self.program_id = Box::new(provider);
    }

    /// Replace the output gate
    pub fn set_output_gate(&mut self, gate: OutputGate) {
        self.gate = gate;
    }

    pub fn output_gate(&self) -> &OutputGate {
        &self.gate
    }

    /// Push finished frames into `producer` instead of a sink
    pub fn attach_output(&mut self, producer: FifoProducer) {
        self.output = Some(producer);
    }

    /// Attach a host sink
    ///
    /// Creates the FIFO, hands its consumer to an [`OutputStage`] running in
    /// the sink's callback and keeps the producer for the DSP tick.
    ///
    /// # Arguments
    ///
    /// * `sink` - Host audio backend
    /// * `controls` - Volume and stretching settings shared with the callback
    pub fn set_sink(&mut self, mut sink: Box<dyn Sink>, controls: Arc<AudioControls>) {
        let (producer, consumer) = AudioFifo::with_capacity(DEFAULT_FIFO_CAPACITY);
        let mut stage = OutputStage::new(consumer, sink.native_sample_rate(), controls);
        sink.set_callback(Box::new(move |buffer, num_frames| {
            stage.fill(buffer, num_frames)
        }));
        log::info!(
            "DSP: sink attached at {} Hz",
            sink.native_sample_rate()
        );
        self.output = Some(producer);
        self.sink = Some(sink);
    }

    /// Attached sink, if any
    pub fn sink_mut(&mut self) -> Option<&mut (dyn Sink + 'static)> {
        self.sink.as_deref_mut()
    }

    fn signal_interrupt(&self, kind: InterruptType, pipe: DspPipe) {
        let Some(handler) = self.interrupt_handler.as_ref().and_then(Weak::upgrade) else {
            return;
        };
        match handler.try_borrow_mut() {
            Ok(mut handler) => handler.signal_interrupt(kind, pipe),
            Err(_) => log::error!(
                "DSP: interrupt handler busy, dropped {:?} interrupt for {:?}",
                kind,
                pipe
            ),
        };
    }

    // ========== Pipes ==========

    /// Read bytes the DSP has queued on a pipe
    ///
    /// # Arguments
    ///
    /// * `pipe` - Pipe index (0-7)
    /// * `length` - Number of bytes wanted (at most 65535)
    ///
    /// # Returns
    ///
    /// The bytes read; empty for an invalid pipe or an oversized request,
    /// shorter than `length` if fewer bytes are queued
    pub fn pipe_read(&mut self, pipe: impl Into<u32>, length: usize) -> Vec<u8> {
        self.pipes.read(pipe.into() as usize, length)
    }

    /// Number of bytes queued on a pipe (0 for an invalid pipe)
    pub fn pipe_readable_size(&self, pipe: impl Into<u32>) -> usize {
        self.pipes.readable_size(pipe.into() as usize)
    }

    /// Send bytes to the DSP on a pipe
    ///
    /// Audio pipe writes are 4-byte state-change commands; they are mirrored
    /// onto the Binary pipe. Binary pipe writes are queued as-is. Other pipes
    /// are not implemented.
    ///
    /// # Arguments
    ///
    /// * `pipe` - Pipe index (0-7)
    /// * `buffer` - Bytes to send
    pub fn pipe_write(&mut self, pipe: impl Into<u32>, buffer: &[u8]) {
        let index = pipe.into();
        match DspPipe::from_index(index) {
            Some(DspPipe::Audio) => self.write_audio_pipe(buffer),
            Some(DspPipe::Binary) => {
                self.pipes.push(DspPipe::Binary as usize, buffer);
            }
            _ if (index as usize) < NUM_DSP_PIPE => {
                log::error!(
                    "DSP: pipe_write to pipe {} unimplemented ({} bytes dropped)",
                    index,
                    buffer.len()
                );
            }
            _ => {
                log::error!("DSP: pipe_write to invalid pipe {}", index);
            }
        }
    }

    fn write_audio_pipe(&mut self, buffer: &[u8]) {
        if buffer.len() != 4 {
            log::error!(
                "DSP: audio pipe write of {} bytes ignored (expected 4)",
                buffer.len()
            );
            return;
        }

        match StateChange::from_raw(buffer[0]) {
            Some(change @ (StateChange::Initialize | StateChange::Wakeup)) => {
                log::info!("DSP: application requested {:?}", change);
                self.pipes.reset();
                self.pipes
                    .push(DspPipe::Audio as usize, &pipe::directory_bytes());
                self.signal_interrupt(InterruptType::Pipe, DspPipe::Audio);
                self.state = DspState::On;
            }
            Some(StateChange::Shutdown) => {
                log::info!("DSP: application requested shutdown");
                self.state = DspState::Off;
            }
            Some(StateChange::Sleep) => {
                log::warn!("DSP: sleep requested; sleep side effects are unimplemented");
                self.state = DspState::Sleeping;
            }
            None => {
                log::error!("DSP: unknown audio pipe command {}", buffer[0]);
                self.state = DspState::Off;
            }
        }

        self.pipes.push(DspPipe::Binary as usize, buffer);
    }

    // ========== Frame Generation ==========

    /// Generate one audio frame
    ///
    /// Does nothing when the output gate denies the running program.
    ///
    /// # Arguments
    ///
    /// * `memory` - Guest memory holding source sample buffers
    ///
    /// # Returns
    ///
    /// `true` if a frame was generated
    pub fn tick(&mut self, memory: &dyn GuestMemory) -> bool {
        if !self.gate.is_output_allowed((self.program_id)()) {
            return false;
        }

        let read_index = self.memory.current_region_index();
        let (read, write) = self.memory.split_regions(read_index);

        let mut intermediate_mixes: [QuadFrame32; 3] = [[[0; 4]; SAMPLES_PER_FRAME]; 3];
        for (i, source) in self.sources.iter_mut().enumerate() {
            write.source_statuses[i] = source.tick(
                &mut read.source_configurations[i],
                &read.adpcm_coefficients[i],
                memory,
            );
            for (mix, bus) in intermediate_mixes.iter_mut().enumerate() {
                source.mix_into(bus, mix);
            }
        }

        write.dsp_status = self.mixer.tick(
            &mut read.dsp_configuration,
            &read.intermediate_mix_samples,
            &mut write.intermediate_mix_samples,
            &intermediate_mixes,
        );

        let frame = self.mixer.output();
        for (dst, sample) in write.final_samples.0.chunks_exact_mut(2).zip(frame.iter()) {
            dst[0].set(sample[0]);
            dst[1].set(sample[1]);
        }

        // The region just written becomes current for the next frame
        write
            .frame_counter
            .set(read.frame_counter.get().wrapping_add(1));

        if let Some(output) = self.output.as_mut() {
            let pushed = output.push(frame);
            if pushed < frame.len() {
                self.frames_dropped += 1;
                log::trace!(
                    "DSP: host FIFO full, dropped {} samples",
                    frame.len() - pushed
                );
            }
        }

        self.frames_generated += 1;
        true
    }

    // ========== Timing Events ==========

    /// Register and start the audio frame event
    ///
    /// # Arguments
    ///
    /// * `timing` - Timing event manager
    pub fn register_events(&mut self, timing: &mut TimingEventManager) {
        let handle = timing.register_event("DSP Audio Frame");
        timing.schedule(handle, AUDIO_FRAME_TICKS as i64);
        self.tick_event = Some(handle);
        log::info!("DSP: audio frame event registered");
    }

    /// Stop the audio frame event
    pub fn unregister_events(&mut self, timing: &mut TimingEventManager) {
        if let Some(handle) = self.tick_event.take() {
            timing.deactivate(handle);
            log::debug!("DSP: audio frame event removed");
        }
    }

    /// Process DSP timing events
    ///
    /// # Arguments
    ///
    /// * `timing` - Timing event manager
    /// * `triggered_events` - Event handles that have fired
    /// * `memory` - Guest memory for source sample buffers
    pub fn process_events(
        &mut self,
        timing: &mut TimingEventManager,
        triggered_events: &[EventHandle],
        memory: &dyn GuestMemory,
    ) {
        let Some(handle) = self.tick_event else {
            return;
        };
        if triggered_events.contains(&handle) {
            self.audio_tick_callback(timing, handle, memory);
        }
    }

    fn audio_tick_callback(
        &mut self,
        timing: &mut TimingEventManager,
        handle: EventHandle,
        memory: &dyn GuestMemory,
    ) {
        let cycles_late = timing.cycles_late(handle);

        if self.tick(memory) {
            self.signal_interrupt(InterruptType::Pipe, DspPipe::Audio);
            self.signal_interrupt(InterruptType::Pipe, DspPipe::Binary);
        }

        timing.schedule(handle, AUDIO_FRAME_TICKS as i64 - cycles_late);
    }
}

impl Default for DspHle {
    fn default() -> Self {
        Self::new()
    }
}
