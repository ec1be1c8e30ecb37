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

//! DSP shared memory layout
//!
//! The application communicates with the DSP firmware through two
//! double-buffered regions of DSP data RAM. Each region is `0x8000` bytes and
//! has exactly the layout below; the guest writes configuration into one
//! region while the DSP reads the other, and the frame counters decide which
//! one is current.
//!
//! ```text
//! Byte offset | DSP addr | Field
//! ------------|----------|------------------------------------------
//! 0           | 0x8000   | frame_counter
//! 2           | 0x8001   | source_configurations [24]
//! 4610        | 0x8901   | source_statuses [24]
//! 4898        | 0x8991   | adpcm_coefficients [24][16]
//! 5666        | 0x8B11   | dsp_configuration
//! 5862        | 0x8B73   | dsp_status
//! 5894        | 0x8B83   | final_samples
//! 6534        | 0x8CC3   | intermediate_mix_samples
//! 11654       | 0x96C3   | compressor
//! 18374       | 0xA3E3   | dsp_debug
//! 18982       | 0xA513   | unknown10
//! 19014       | 0xA523   | unknown11
//! 19062       | 0xA53B   | unknown12
//! 19158       | 0xA56B   | unknown13
//! 19222       | 0xA58B   | unknown14
//! 19286       | -        | padding up to 0x8000 bytes
//! ```
//!
//! DSP addresses count 16-bit words from `0x8000`.
//!
//! Every field is built from byte arrays, so all structures have alignment 1
//! and can be viewed in place over raw DSP RAM with `bytemuck`. 32-bit values
//! the DSP itself produces or consumes are stored middle-endian: two
//! little-endian halfwords, high halfword first ([`U32Dsp`]).

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use std::mem::{offset_of, size_of};

/// Number of audio sources (voices) the DSP mixes
pub const NUM_SOURCES: usize = 24;

/// Stereo samples produced per audio frame
pub const SAMPLES_PER_FRAME: usize = 160;

/// Number of queued buffers each source configuration can describe
pub const NUM_BUFFER_SLOTS: usize = 4;

/// Total size of DSP data RAM
pub const DSP_RAM_SIZE: usize = 0x80000;

/// Byte offset of region 0 within DSP RAM
pub const REGION0_OFFSET: usize = 0x50000;

/// Byte offset of region 1 within DSP RAM
pub const REGION1_OFFSET: usize = 0x60000;

/// Size of one shared memory region
pub const REGION_SIZE: usize = 0x8000;

// ========== Endian-explicit field types ==========

/// Little-endian u16 stored as raw bytes
#[derive(Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(transparent)]
pub struct U16Le([u8; 2]);

impl U16Le {
    pub const fn new(value: u16) -> Self {
        Self(value.to_le_bytes())
    }

    #[inline]
    pub fn get(self) -> u16 {
        u16::from_le_bytes(self.0)
    }

    #[inline]
    pub fn set(&mut self, value: u16) {
        self.0 = value.to_le_bytes();
    }
}

/// Little-endian i16 stored as raw bytes
#[derive(Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(transparent)]
pub struct I16Le([u8; 2]);

impl I16Le {
    pub const fn new(value: i16) -> Self {
        Self(value.to_le_bytes())
    }

    #[inline]
    pub fn get(self) -> i16 {
        i16::from_le_bytes(self.0)
    }

    #[inline]
    pub fn set(&mut self, value: i16) {
        self.0 = value.to_le_bytes();
    }
}

/// Little-endian f32 stored as raw bytes
#[derive(Clone, Copy, Default, PartialEq, Pod, Zeroable)]
#[repr(transparent)]
pub struct F32Le([u8; 4]);

impl F32Le {
    pub fn new(value: f32) -> Self {
        Self(value.to_le_bytes())
    }

    #[inline]
    pub fn get(self) -> f32 {
        f32::from_le_bytes(self.0)
    }

    #[inline]
    pub fn set(&mut self, value: f32) {
        self.0 = value.to_le_bytes();
    }
}

/// Middle-endian u32: high halfword first, each halfword little-endian
///
/// # Example
///
/// ```
/// use ctr_hle::core::dsp::shared_memory::U32Dsp;
///
/// let v = U32Dsp::new(0x1234_5678);
/// assert_eq!(bytemuck::bytes_of(&v), &[0x34, 0x12, 0x78, 0x56]);
/// assert_eq!(v.get(), 0x1234_5678);
/// ```
#[derive(Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(transparent)]
pub struct U32Dsp([u8; 4]);

impl U32Dsp {
    pub const fn new(value: u32) -> Self {
        Self(value.rotate_left(16).to_le_bytes())
    }

    #[inline]
    pub fn get(self) -> u32 {
        u32::from_le_bytes(self.0).rotate_left(16)
    }

    #[inline]
    pub fn set(&mut self, value: u32) {
        *self = Self::new(value);
    }
}

/// Middle-endian i32
#[derive(Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(transparent)]
pub struct I32Dsp(U32Dsp);

impl I32Dsp {
    pub const fn new(value: i32) -> Self {
        Self(U32Dsp::new(value as u32))
    }

    #[inline]
    pub fn get(self) -> i32 {
        self.0.get() as i32
    }

    #[inline]
    pub fn set(&mut self, value: i32) {
        self.0.set(value as u32);
    }
}

macro_rules! impl_debug_via_get {
    ($($ty:ty),*) => {
        $(impl std::fmt::Debug for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                std::fmt::Debug::fmt(&self.get(), f)
            }
        })*
    };
}

impl_debug_via_get!(U16Le, I16Le, F32Le, U32Dsp, I32Dsp);

// ========== Dirty flags ==========

bitflags! {
    /// Per-source dirty bits, set by the application when it changes a field
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SourceDirty: u32 {
        const FORMAT = 1 << 0;
        const MONO_OR_STEREO = 1 << 1;
        const ADPCM_COEFFICIENTS = 1 << 2;
        const PARTIAL_EMBEDDED_BUFFER = 1 << 3;
        const PARTIAL_RESET = 1 << 4;
        const ENABLE = 1 << 16;
        const INTERPOLATION = 1 << 17;
        const RATE_MULTIPLIER = 1 << 18;
        const BUFFER_QUEUE = 1 << 19;
        const LOOP_RELATED = 1 << 20;
        const PLAY_POSITION = 1 << 21;
        const FILTERS_ENABLED = 1 << 22;
        const SIMPLE_FILTER = 1 << 23;
        const BIQUAD_FILTER = 1 << 24;
        const GAIN_0 = 1 << 25;
        const GAIN_1 = 1 << 26;
        const GAIN_2 = 1 << 27;
        const SYNC_COUNT = 1 << 28;
        const RESET = 1 << 29;
        const EMBEDDED_BUFFER = 1 << 30;
    }
}

bitflags! {
    /// DSP configuration dirty bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DspConfigDirty: u32 {
        const MIXER1_ENABLED = 1 << 8;
        const MIXER2_ENABLED = 1 << 9;
        const MASTER_VOLUME = 1 << 16;
        const AUX_RETURN_VOLUME_0 = 1 << 24;
        const AUX_RETURN_VOLUME_1 = 1 << 25;
        const OUTPUT_FORMAT = 1 << 26;
        const CLIPPING_MODE = 1 << 27;
        const HEADPHONES_CONNECTED = 1 << 28;
    }
}

// ========== Enumerated field values ==========

/// Source interpolation mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterpolationMode {
    #[default]
    Polyphase = 0,
    Linear = 1,
    None = 2,
}

impl InterpolationMode {
    /// Decode the raw configuration byte
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Polyphase),
            1 => Some(Self::Linear),
            2 => Some(Self::None),
            _ => None,
        }
    }
}

/// Sample encoding of a source buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    Pcm8 = 0,
    #[default]
    Pcm16 = 1,
    Adpcm = 2,
}

impl Format {
    pub fn from_raw(raw: u16) -> Option<Self> {
        match raw {
            0 => Some(Self::Pcm8),
            1 => Some(Self::Pcm16),
            2 => Some(Self::Adpcm),
            _ => None,
        }
    }
}

/// Channel count of a source buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MonoOrStereo {
    #[default]
    Mono = 1,
    Stereo = 2,
}

impl MonoOrStereo {
    pub fn from_raw(raw: u16) -> Option<Self> {
        match raw {
            1 => Some(Self::Mono),
            2 => Some(Self::Stereo),
            _ => None,
        }
    }
}

/// Final mix channel layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    Mono = 0,
    #[default]
    Stereo = 1,
    Surround = 2,
}

impl OutputFormat {
    pub fn from_raw(raw: u16) -> Option<Self> {
        match raw {
            0 => Some(Self::Mono),
            1 => Some(Self::Stereo),
            2 => Some(Self::Surround),
            _ => None,
        }
    }
}

// ========== Source configuration ==========

/// One entry of a source's buffer queue
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
pub struct BufferSlot {
    pub physical_address: U32Dsp,
    /// Length in samples
    pub length: U32Dsp,
    pub adpcm_ps: u8,
    _pad0: u8,
    pub adpcm_yn: [I16Le; 2],
    pub adpcm_dirty: u8,
    pub is_looping: u8,
    pub buffer_id: U16Le,
    _pad1: [u8; 2],
}

/// Simple one-pole filter coefficients (Q15)
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
pub struct SimpleFilterCoefficients {
    pub b0: I16Le,
    pub a1: I16Le,
}

/// Biquad filter coefficients (Q14)
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
pub struct BiquadFilterCoefficients {
    pub a2: I16Le,
    pub a1: I16Le,
    pub b2: I16Le,
    pub b1: I16Le,
    pub b0: I16Le,
}

/// Per-source configuration written by the application
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
pub struct SourceConfiguration {
    pub dirty: U32Dsp,

    /// Quad gains for the main bus and the two aux buses
    pub gain: [[F32Le; 4]; 3],
    pub rate_multiplier: F32Le,
    pub interpolation_mode: u8,
    _pad0: u8,

    /// Bit 0: simple filter, bit 1: biquad filter
    pub filters_enabled: U16Le,
    pub simple_filter: SimpleFilterCoefficients,
    pub biquad_filter: BiquadFilterCoefficients,

    /// One bit per buffer slot
    pub buffers_dirty: U16Le,
    pub buffers: [BufferSlot; NUM_BUFFER_SLOTS],

    pub loop_related: U32Dsp,
    pub enable: u8,
    _pad1: u8,
    pub sync_count: U16Le,
    pub play_position: U32Dsp,
    _pad2: [u8; 4],

    // Embedded buffer, played before anything in the queue
    pub physical_address: U32Dsp,
    pub length: U32Dsp,
    /// Bits 0-1: mono/stereo, bits 2-3: format, bit 5: fade in
    pub flags1: U16Le,
    pub adpcm_ps: U16Le,
    pub adpcm_yn: [I16Le; 2],
    /// Bit 0: ADPCM state dirty, bit 1: looping
    pub flags2: U16Le,
    pub buffer_id: U16Le,
}

impl SourceConfiguration {
    pub fn dirty_flags(&self) -> SourceDirty {
        SourceDirty::from_bits_retain(self.dirty.get())
    }

    pub fn set_dirty_flags(&mut self, flags: SourceDirty) {
        self.dirty.set(flags.bits());
    }

    pub fn mono_or_stereo_raw(&self) -> u16 {
        self.flags1.get() & 0x3
    }

    pub fn format_raw(&self) -> u16 {
        (self.flags1.get() >> 2) & 0x3
    }

    pub fn fade_in(&self) -> bool {
        self.flags1.get() & (1 << 5) != 0
    }

    pub fn adpcm_dirty(&self) -> bool {
        self.flags2.get() & 1 != 0
    }

    pub fn is_looping(&self) -> bool {
        self.flags2.get() & 2 != 0
    }

    pub fn simple_filter_enabled(&self) -> bool {
        self.filters_enabled.get() & 1 != 0
    }

    pub fn biquad_filter_enabled(&self) -> bool {
        self.filters_enabled.get() & 2 != 0
    }

    /// Pack the embedded buffer's format flags
    pub fn set_embedded_format(&mut self, format: Format, channels: MonoOrStereo) {
        let keep = self.flags1.get() & !0xF;
        self.flags1
            .set(keep | (channels as u16) | ((format as u16) << 2));
    }
}

/// Per-source status reported back by the DSP
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable, PartialEq, Eq)]
#[repr(C)]
pub struct SourceStatus {
    pub is_enabled: u8,
    pub current_buffer_id_dirty: u8,
    pub sync_count: U16Le,
    pub current_sample_position: U32Dsp,
    pub current_buffer_id: U16Le,
    pub previous_buffer_id: U16Le,
}

/// ADPCM predictor coefficient pairs for one source
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(transparent)]
pub struct AdpcmCoefficients(pub [I16Le; 16]);

impl AdpcmCoefficients {
    pub fn to_array(&self) -> [i16; 16] {
        self.0.map(I16Le::get)
    }
}

// ========== DSP configuration ==========

/// Delay effect parameters
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
pub struct DelayEffect {
    pub dirty: U16Le,
    pub enable: U16Le,
    _pad0: [u8; 2],
    pub outputs: U16Le,
    pub work_buffer_address: U32Dsp,
    pub frame_count: U16Le,
    pub gain_source: I16Le,
    pub gain_feedback: I16Le,
    _pad1: [u8; 2],
}

/// Reverb effect parameters
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
pub struct ReverbEffect {
    pub dirty: U16Le,
    pub enable: U16Le,
    _pad0: [u8; 2],
    pub outputs: U16Le,
    pub work_buffer_address: U32Dsp,
    pub frame_count: U16Le,
    pub params: [U16Le; 19],
}

/// Global mixer configuration written by the application
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
pub struct DspConfiguration {
    pub dirty: U32Dsp,
    pub master_volume: F32Le,
    pub aux_return_volume: [F32Le; 2],
    pub output_buffer_count: U16Le,
    _pad0: [u8; 4],
    pub output_format: U16Le,
    pub clipping_mode: U16Le,
    pub headphones_connected: U16Le,
    pub surround_depth: U16Le,
    pub surround_speaker_position: U16Le,
    _pad1: [u8; 2],
    pub rear_ratio: U16Le,
    pub aux_front_bypass: [U16Le; 2],
    pub aux_bus_enable: [U16Le; 2],
    pub delay_effects: [DelayEffect; 2],
    pub reverb_effects: [ReverbEffect; 2],
    pub sync_mode: U16Le,
    _pad2: [u8; 2],
    pub dirty2: U32Dsp,
}

impl DspConfiguration {
    pub fn dirty_flags(&self) -> DspConfigDirty {
        DspConfigDirty::from_bits_retain(self.dirty.get())
    }

    pub fn set_dirty_flags(&mut self, flags: DspConfigDirty) {
        self.dirty.set(flags.bits());
    }
}

/// Mixer status reported back by the DSP
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
pub struct DspStatus {
    pub unknown: U16Le,
    pub dropped_frames: U16Le,
    _pad: [u8; 28],
}

// ========== Sample buffers ==========

/// Final interleaved stereo output of one frame
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(transparent)]
pub struct FinalMixSamples(pub [I16Le; 2 * SAMPLES_PER_FRAME]);

/// One aux bus: four channels, each `SAMPLES_PER_FRAME` long
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(transparent)]
pub struct IntermediateBus(pub [[I32Dsp; SAMPLES_PER_FRAME]; 4]);

/// Aux bus exchange buffers (aux send/return)
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct IntermediateMixSamples {
    pub mix1: IntermediateBus,
    pub mix2: IntermediateBus,
}

impl IntermediateMixSamples {
    /// Aux bus by index (0 = mix1, 1 = mix2)
    pub fn bus(&self, index: usize) -> &IntermediateBus {
        if index == 0 {
            &self.mix1
        } else {
            &self.mix2
        }
    }

    pub fn bus_mut(&mut self, index: usize) -> &mut IntermediateBus {
        if index == 0 {
            &mut self.mix1
        } else {
            &mut self.mix2
        }
    }
}

// ========== Region ==========

/// One double-buffered shared memory region
#[derive(Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct SharedMemory {
    pub frame_counter: U16Le,
    pub source_configurations: [SourceConfiguration; NUM_SOURCES],
    pub source_statuses: [SourceStatus; NUM_SOURCES],
    pub adpcm_coefficients: [AdpcmCoefficients; NUM_SOURCES],
    pub dsp_configuration: DspConfiguration,
    pub dsp_status: DspStatus,
    pub final_samples: FinalMixSamples,
    pub intermediate_mix_samples: IntermediateMixSamples,
    pub compressor: [U16Le; 0xD20],
    pub dsp_debug: [U16Le; 0x130],
    pub unknown10: [U16Le; 0x10],
    pub unknown11: [U16Le; 0x18],
    pub unknown12: [U16Le; 0x30],
    pub unknown13: [U16Le; 0x20],
    pub unknown14: [U16Le; 0x20],
    _padding: [u8; 13482],
}

const _: () = assert!(size_of::<BufferSlot>() == 20);
const _: () = assert!(size_of::<SourceConfiguration>() == 192);
const _: () = assert!(size_of::<SourceStatus>() == 12);
const _: () = assert!(size_of::<AdpcmCoefficients>() == 32);
const _: () = assert!(size_of::<DelayEffect>() == 20);
const _: () = assert!(size_of::<ReverbEffect>() == 52);
const _: () = assert!(size_of::<DspConfiguration>() == 196);
const _: () = assert!(size_of::<DspStatus>() == 32);
const _: () = assert!(size_of::<FinalMixSamples>() == 640);
const _: () = assert!(size_of::<IntermediateMixSamples>() == 5120);
const _: () = assert!(size_of::<SharedMemory>() == REGION_SIZE);
const _: () = assert!(std::mem::align_of::<SharedMemory>() == 1);

/// Number of entries in the address directory
pub const NUM_DIRECTORY_ENTRIES: usize = 15;

/// Convert a byte offset within a region to a DSP word address
pub const fn dsp_address(byte_offset: usize) -> u16 {
    (0x8000 + byte_offset / 2) as u16
}

/// DSP addresses of the region fields, in directory order
///
/// This is what the DSP publishes on the audio pipe after Initialize/Wakeup.
pub const fn address_directory() -> [u16; NUM_DIRECTORY_ENTRIES] {
    [
        dsp_address(offset_of!(SharedMemory, frame_counter)),
        dsp_address(offset_of!(SharedMemory, source_configurations)),
        dsp_address(offset_of!(SharedMemory, source_statuses)),
        dsp_address(offset_of!(SharedMemory, adpcm_coefficients)),
        dsp_address(offset_of!(SharedMemory, dsp_configuration)),
        dsp_address(offset_of!(SharedMemory, dsp_status)),
        dsp_address(offset_of!(SharedMemory, final_samples)),
        dsp_address(offset_of!(SharedMemory, intermediate_mix_samples)),
        dsp_address(offset_of!(SharedMemory, compressor)),
        dsp_address(offset_of!(SharedMemory, dsp_debug)),
        dsp_address(offset_of!(SharedMemory, unknown10)),
        dsp_address(offset_of!(SharedMemory, unknown11)),
        dsp_address(offset_of!(SharedMemory, unknown12)),
        dsp_address(offset_of!(SharedMemory, unknown13)),
        dsp_address(offset_of!(SharedMemory, unknown14)),
    ]
}

/// Pick the region the application most recently finished writing
///
/// Frame counters normally increase by one per frame; `0xFFFF` next to a
/// counter other than `0xFFFE` means the counter just wrapped.
///
/// # Arguments
///
/// * `frame_counter_0` - Frame counter of region 0
/// * `frame_counter_1` - Frame counter of region 1
///
/// # Returns
///
/// Index of the current region (0 or 1)
pub fn current_region_index(frame_counter_0: u16, frame_counter_1: u16) -> usize {
    if frame_counter_0 == 0xFFFF && frame_counter_1 != 0xFFFE {
        // Wraparound has occurred.
        1
    } else if frame_counter_1 == 0xFFFF && frame_counter_0 != 0xFFFE {
        // Wraparound has occurred.
        0
    } else if frame_counter_0 > frame_counter_1 {
        0
    } else {
        1
    }
}

/// DSP data RAM containing both shared memory regions
pub struct DspMemory {
    raw: Box<[u8]>,
}

impl DspMemory {
    /// Create zero-filled DSP RAM
    pub fn new() -> Self {
        Self {
            raw: vec![0u8; DSP_RAM_SIZE].into_boxed_slice(),
        }
    }

    /// Raw DSP RAM
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// Raw DSP RAM, mutable (the application-facing side of the mapping)
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.raw
    }

    fn region_offset(index: usize) -> usize {
        if index == 0 {
            REGION0_OFFSET
        } else {
            REGION1_OFFSET
        }
    }

    /// Shared memory region 0 or 1
    pub fn region(&self, index: usize) -> &SharedMemory {
        let start = Self::region_offset(index);
        bytemuck::from_bytes(&self.raw[start..start + REGION_SIZE])
    }

    /// Shared memory region 0 or 1, mutable
    pub fn region_mut(&mut self, index: usize) -> &mut SharedMemory {
        let start = Self::region_offset(index);
        bytemuck::from_bytes_mut(&mut self.raw[start..start + REGION_SIZE])
    }

    /// Index of the region the DSP should read this frame
    pub fn current_region_index(&self) -> usize {
        current_region_index(
            self.region(0).frame_counter.get(),
            self.region(1).frame_counter.get(),
        )
    }

    /// Borrow the read region and the write region at the same time
    ///
    /// # Arguments
    ///
    /// * `read_index` - Index of the region to read (the other is written)
    ///
    /// # Returns
    ///
    /// `(read, write)` region views
    pub fn split_regions(&mut self, read_index: usize) -> (&mut SharedMemory, &mut SharedMemory) {
        let (low, high) = self.raw.split_at_mut(REGION1_OFFSET);
        let region0: &mut SharedMemory =
            bytemuck::from_bytes_mut(&mut low[REGION0_OFFSET..REGION0_OFFSET + REGION_SIZE]);
        let region1: &mut SharedMemory = bytemuck::from_bytes_mut(&mut high[..REGION_SIZE]);
        if read_index == 0 {
            (region0, region1)
        } else {
            (region1, region0)
        }
    }
}

impl Default for DspMemory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // ============================================================================
    // Layout Tests
    // ============================================================================

    #[test]
    fn test_directory_addresses() {
        assert_eq!(
            address_directory(),
            [
                0x8000, 0x8001, 0x8901, 0x8991, 0x8B11, 0x8B73, 0x8B83, 0x8CC3, 0x96C3, 0xA3E3,
                0xA513, 0xA523, 0xA53B, 0xA56B, 0xA58B
            ]
        );
    }

    #[test]
    fn test_padding_offset() {
        assert_eq!(offset_of!(SharedMemory, _padding), 19286);
        assert_eq!(offset_of!(SharedMemory, dsp_debug) - offset_of!(SharedMemory, compressor), 2 * 0xD20);
    }

    #[test]
    fn test_source_configuration_field_offsets() {
        assert_eq!(offset_of!(SourceConfiguration, gain), 4);
        assert_eq!(offset_of!(SourceConfiguration, rate_multiplier), 52);
        assert_eq!(offset_of!(SourceConfiguration, interpolation_mode), 56);
        assert_eq!(offset_of!(SourceConfiguration, filters_enabled), 58);
        assert_eq!(offset_of!(SourceConfiguration, buffers_dirty), 74);
        assert_eq!(offset_of!(SourceConfiguration, buffers), 76);
        assert_eq!(offset_of!(SourceConfiguration, physical_address), 172);
        assert_eq!(offset_of!(SourceConfiguration, buffer_id), 190);
    }

    #[test]
    fn test_dsp_configuration_field_offsets() {
        assert_eq!(offset_of!(DspConfiguration, output_format), 22);
        assert_eq!(offset_of!(DspConfiguration, aux_bus_enable), 40);
        assert_eq!(offset_of!(DspConfiguration, delay_effects), 44);
        assert_eq!(offset_of!(DspConfiguration, reverb_effects), 84);
        assert_eq!(offset_of!(DspConfiguration, dirty2), 192);
    }

    // ============================================================================
    // Field Encoding Tests
    // ============================================================================

    #[test]
    fn test_u32_dsp_is_middle_endian() {
        let mut v = U32Dsp::default();
        v.set(0xAABB_CCDD);
        assert_eq!(bytemuck::bytes_of(&v), &[0xBB, 0xAA, 0xDD, 0xCC]);
        assert_eq!(v.get(), 0xAABB_CCDD);
    }

    #[test]
    fn test_i32_dsp_negative() {
        let v = I32Dsp::new(-2);
        assert_eq!(v.get(), -2);
        assert_eq!(bytemuck::bytes_of(&v), &[0xFF, 0xFF, 0xFE, 0xFF]);
    }

    #[test]
    fn test_embedded_format_flags() {
        let mut config = SourceConfiguration::zeroed();
        config.flags1.set(1 << 5);
        config.set_embedded_format(Format::Adpcm, MonoOrStereo::Stereo);
        assert_eq!(config.format_raw(), 2);
        assert_eq!(config.mono_or_stereo_raw(), 2);
        assert!(config.fade_in());
    }

    #[test]
    fn test_dirty_flags_round_trip_through_memory() {
        let mut config = SourceConfiguration::zeroed();
        config.set_dirty_flags(SourceDirty::RESET | SourceDirty::EMBEDDED_BUFFER);
        assert_eq!(config.dirty.get(), (1 << 29) | (1 << 30));
        assert!(config.dirty_flags().contains(SourceDirty::RESET));
    }

    // ============================================================================
    // Region Selection Tests
    // ============================================================================

    #[test]
    fn test_region_index_basic() {
        assert_eq!(current_region_index(5, 4), 0);
        assert_eq!(current_region_index(4, 5), 1);
        assert_eq!(current_region_index(0, 0), 1);
    }

    #[test]
    fn test_region_index_wraparound() {
        assert_eq!(current_region_index(0xFFFF, 0), 1);
        assert_eq!(current_region_index(0, 0xFFFF), 0);
        // 0xFFFE then 0xFFFF is ordinary counting
        assert_eq!(current_region_index(0xFFFF, 0xFFFE), 0);
        assert_eq!(current_region_index(0xFFFE, 0xFFFF), 1);
    }

    #[test]
    fn test_split_regions_maps_to_ram_offsets() {
        let mut mem = DspMemory::new();
        {
            let (read, write) = mem.split_regions(1);
            read.frame_counter.set(0x1111);
            write.frame_counter.set(0x2222);
        }
        let raw = mem.as_bytes();
        assert_eq!(&raw[REGION1_OFFSET..REGION1_OFFSET + 2], &[0x11, 0x11]);
        assert_eq!(&raw[REGION0_OFFSET..REGION0_OFFSET + 2], &[0x22, 0x22]);
        assert_eq!(mem.current_region_index(), 0);
    }

    proptest! {
        #[test]
        fn test_region_index_picks_larger_counter(a in 0u16..0xFFFE, b in 0u16..0xFFFE) {
            prop_assume!(a != b);
            let expected = if a > b { 0 } else { 1 };
            prop_assert_eq!(current_region_index(a, b), expected);
        }

        #[test]
        fn test_region_index_wrap_prefers_other(other in 0u16..0xFFFE) {
            prop_assert_eq!(current_region_index(0xFFFF, other), 1);
            prop_assert_eq!(current_region_index(other, 0xFFFF), 0);
        }
    }
}
