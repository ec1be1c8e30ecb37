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

//! DSP Interrupt Controller Implementation
//!
//! The DSP raises interrupts towards the ARM11 side through the `dsp::DSP`
//! service. Besides two plain interrupt lines there is one "pipe" interrupt
//! per DSP pipe, raised whenever the DSP has put data on that pipe.
//!
//! ## Status Bits
//!
//! ```text
//! Bit  | Source        | Description
//! -----|---------------|----------------------------------
//! 0    | ZERO          | Interrupt line 0
//! 1    | ONE           | Interrupt line 1
//! 2    | PIPE_DEBUG    | Data available on the Debug pipe
//! 3    | PIPE_DMA      | Data available on the DMA pipe
//! 4    | PIPE_AUDIO    | Data available on the Audio pipe
//! 5    | PIPE_BINARY   | Data available on the Binary pipe
//! 6-9  | PIPE_4..7     | Remaining pipe slots
//! 10-15| -             | Not used
//! ```
//!
//! The DSP only holds a weak handle to whoever receives its interrupts (see
//! [`DspInterruptHandler`]); if the receiver has been torn down, signals are
//! dropped.

use crate::core::dsp::DspPipe;

/// Interrupt categories the DSP can raise
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptType {
    /// Interrupt line 0
    Zero = 0,
    /// Interrupt line 1
    One = 1,
    /// Per-pipe "data available" interrupt
    Pipe = 2,
}

/// Interrupt source bit flags
pub mod interrupts {
    use crate::core::dsp::DspPipe;

    /// Interrupt line 0 (bit 0)
    pub const ZERO: u16 = 1 << 0;

    /// Interrupt line 1 (bit 1)
    pub const ONE: u16 = 1 << 1;

    /// First pipe interrupt bit; pipe `n` uses bit `PIPE_SHIFT + n`
    pub const PIPE_SHIFT: u16 = 2;

    /// Debug pipe interrupt (bit 2)
    pub const PIPE_DEBUG: u16 = pipe(DspPipe::Debug);

    /// DMA pipe interrupt (bit 3)
    pub const PIPE_DMA: u16 = pipe(DspPipe::Dma);

    /// Audio pipe interrupt (bit 4)
    pub const PIPE_AUDIO: u16 = pipe(DspPipe::Audio);

    /// Binary pipe interrupt (bit 5)
    pub const PIPE_BINARY: u16 = pipe(DspPipe::Binary);

    /// Status bit for a pipe interrupt
    pub const fn pipe(pipe: DspPipe) -> u16 {
        1 << (PIPE_SHIFT + pipe as u16)
    }
}

/// Receiver of DSP interrupts
///
/// Implemented by whatever models the ARM11-side `dsp::DSP` service. The DSP
/// only keeps a weak reference to its handler.
pub trait DspInterruptHandler {
    /// Raise an interrupt
    ///
    /// # Arguments
    ///
    /// * `kind` - Interrupt category
    /// * `pipe` - Pipe the interrupt refers to (only meaningful for `Pipe`)
    fn signal_interrupt(&mut self, kind: InterruptType, pipe: DspPipe);
}

/// DSP Interrupt Controller
///
/// Latches interrupt requests from the DSP and exposes them to the guest
/// through a status/mask register pair.
///
/// # Example
///
/// ```
/// use ctr_hle::core::dsp::DspPipe;
/// use ctr_hle::core::interrupt::{interrupts, DspInterruptHandler, InterruptController, InterruptType};
///
/// let mut ic = InterruptController::new();
///
/// // DSP reports data on the audio pipe
/// ic.signal_interrupt(InterruptType::Pipe, DspPipe::Audio);
///
/// // Enable audio pipe interrupts
/// ic.write_mask(interrupts::PIPE_AUDIO as u32);
/// assert!(ic.is_pending());
///
/// // Acknowledge the interrupt (write 0 to clear)
/// ic.write_status(!interrupts::PIPE_AUDIO as u32);
/// assert!(!ic.is_pending());
/// ```
pub struct InterruptController {
    /// Pending interrupt flags
    ///
    /// Writing 0 to a bit acknowledges (clears) that interrupt.
    /// Writing 1 to a bit leaves it unchanged.
    status: u16,

    /// Interrupt mask (1 = interrupt enabled, 0 = masked)
    mask: u16,

    /// Number of signals received, per status bit
    signal_counts: [u64; 16],
}

impl InterruptController {
    /// Create a new interrupt controller
    ///
    /// Initializes with all interrupts cleared and masked.
    pub fn new() -> Self {
        Self {
            status: 0,
            mask: 0,
            signal_counts: [0; 16],
        }
    }

    /// Request an interrupt
    ///
    /// Sets the specified interrupt bit(s) in the status register.
    ///
    /// # Arguments
    ///
    /// * `interrupt` - Interrupt bit(s) to set (can be multiple ORed together)
    ///
    /// # Example
    ///
    /// ```
    /// use ctr_hle::core::interrupt::{interrupts, InterruptController};
    ///
    /// let mut ic = InterruptController::new();
    /// ic.request(interrupts::ZERO);
    /// assert_eq!(ic.read_status(), interrupts::ZERO as u32);
    /// ```
    pub fn request(&mut self, interrupt: u16) {
        self.status |= interrupt;
        for (bit, count) in self.signal_counts.iter_mut().enumerate() {
            if interrupt & (1 << bit) != 0 {
                *count += 1;
            }
        }
        log::trace!(
            "DSP IRQ requested: 0x{:04X}, status=0x{:04X}",
            interrupt,
            self.status
        );
    }

    /// Acknowledge interrupt (write 0 to clear bits)
    ///
    /// # Arguments
    ///
    /// * `value` - Acknowledge mask (0 bits will clear corresponding interrupts)
    pub fn acknowledge(&mut self, value: u16) {
        self.status &= value;
        log::trace!("DSP IRQ acknowledged, status=0x{:04X}", self.status);
    }

    /// Check if any unmasked interrupt is pending
    pub fn is_pending(&self) -> bool {
        (self.status & self.mask) != 0
    }

    /// Read the status register
    pub fn read_status(&self) -> u32 {
        self.status as u32
    }

    /// Write the status register (acknowledge)
    ///
    /// Only the lower 16 bits are used; 0 bits clear interrupts.
    pub fn write_status(&mut self, value: u32) {
        self.acknowledge(value as u16);
    }

    /// Read the mask register
    pub fn read_mask(&self) -> u32 {
        self.mask as u32
    }

    /// Write the mask register
    ///
    /// Only the lower 16 bits are used.
    pub fn write_mask(&mut self, value: u32) {
        self.mask = value as u16;
        log::debug!("DSP IRQ mask set: 0x{:04X}", self.mask);
    }

    /// Total number of times an interrupt bit has been requested
    ///
    /// # Arguments
    ///
    /// * `interrupt` - A single interrupt bit from [`interrupts`]
    pub fn signal_count(&self, interrupt: u16) -> u64 {
        match interrupt.trailing_zeros() {
            bit @ 0..=15 => self.signal_counts[bit as usize],
            _ => 0,
        }
    }
}

impl DspInterruptHandler for InterruptController {
    fn signal_interrupt(&mut self, kind: InterruptType, pipe: DspPipe) {
        let bit = match kind {
            InterruptType::Zero => interrupts::ZERO,
            InterruptType::One => interrupts::ONE,
            InterruptType::Pipe => interrupts::pipe(pipe),
        };
        self.request(bit);
    }
}

impl Default for InterruptController {
    fn default() -> Self {
        Self::new()
    }
}
