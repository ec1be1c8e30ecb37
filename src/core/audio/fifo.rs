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

//! Lock-free single-producer single-consumer frame FIFO
//!
//! Carries stereo frames from the emulation thread (the DSP tick) to the
//! host audio callback. Each slot holds one frame packed into an
//! `AtomicU32` (left in the low half, right in the high half). The read and
//! write indices increase monotonically and are masked on access, so a full
//! and an empty FIFO are distinguishable without a spare slot.
//!
//! # Example
//!
//! ```
//! use ctr_hle::core::audio::AudioFifo;
//!
//! let (mut producer, mut consumer) = AudioFifo::with_capacity(4);
//! assert_eq!(producer.push(&[[1, 2], [3, 4]]), 2);
//!
//! let mut out = [[0i16; 2]; 4];
//! assert_eq!(consumer.pop(&mut out), 2);
//! assert_eq!(&out[..2], &[[1, 2], [3, 4]]);
//! ```

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

/// Default FIFO capacity in frames
pub const DEFAULT_FIFO_CAPACITY: usize = 0x2000;

#[inline(always)]
fn pack(frame: [i16; 2]) -> u32 {
    (frame[0] as u16 as u32) | ((frame[1] as u16 as u32) << 16)
}

#[inline(always)]
fn unpack(value: u32) -> [i16; 2] {
    [value as u16 as i16, (value >> 16) as u16 as i16]
}

struct Shared {
    slots: Box<[AtomicU32]>,
    mask: usize,
    /// Total frames ever written
    write_index: AtomicUsize,
    /// Total frames ever read
    read_index: AtomicUsize,
}

impl Shared {
    fn capacity(&self) -> usize {
        self.slots.len()
    }
}

/// Constructor for the producer/consumer pair
pub struct AudioFifo;

impl AudioFifo {
    /// Create a FIFO holding at least `capacity` frames
    ///
    /// The capacity is rounded up to a power of two.
    ///
    /// # Returns
    ///
    /// `(producer, consumer)` halves, each movable to its own thread
    pub fn with_capacity(capacity: usize) -> (FifoProducer, FifoConsumer) {
        let capacity = capacity.max(1).next_power_of_two();
        let slots = (0..capacity).map(|_| AtomicU32::new(0)).collect();
        let shared = Arc::new(Shared {
            slots,
            mask: capacity - 1,
            write_index: AtomicUsize::new(0),
            read_index: AtomicUsize::new(0),
        });
        (
            FifoProducer {
                shared: Arc::clone(&shared),
            },
            FifoConsumer { shared },
        )
    }
}

/// Writing half of the FIFO
pub struct FifoProducer {
    shared: Arc<Shared>,
}

impl FifoProducer {
    /// Append frames, dropping whatever does not fit
    ///
    /// # Returns
    ///
    /// Number of frames actually pushed
    pub fn push(&mut self, frames: &[[i16; 2]]) -> usize {
        let shared = &*self.shared;
        let write = shared.write_index.load(Ordering::Relaxed);
        let read = shared.read_index.load(Ordering::Acquire);
        let free = shared.capacity() - write.wrapping_sub(read);
        let count = frames.len().min(free);

        for (i, frame) in frames[..count].iter().enumerate() {
            shared.slots[write.wrapping_add(i) & shared.mask].store(pack(*frame), Ordering::Relaxed);
        }
        shared
            .write_index
            .store(write.wrapping_add(count), Ordering::Release);
        count
    }

    /// Frames that can currently be pushed
    pub fn free_space(&self) -> usize {
        let shared = &*self.shared;
        let write = shared.write_index.load(Ordering::Relaxed);
        let read = shared.read_index.load(Ordering::Acquire);
        shared.capacity() - write.wrapping_sub(read)
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }
}

/// Reading half of the FIFO
pub struct FifoConsumer {
    shared: Arc<Shared>,
}

impl FifoConsumer {
    /// Frames waiting to be read
    pub fn len(&self) -> usize {
        let shared = &*self.shared;
        let write = shared.write_index.load(Ordering::Acquire);
        let read = shared.read_index.load(Ordering::Relaxed);
        write.wrapping_sub(read)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Move up to `out.len()` frames into `out`
    ///
    /// # Returns
    ///
    /// Number of frames popped
    pub fn pop(&mut self, out: &mut [[i16; 2]]) -> usize {
        let shared = &*self.shared;
        let read = shared.read_index.load(Ordering::Relaxed);
        let count = out.len().min(self.len());

        for (i, frame) in out[..count].iter_mut().enumerate() {
            *frame = unpack(shared.slots[read.wrapping_add(i) & shared.mask].load(Ordering::Relaxed));
        }
        shared
            .read_index
            .store(read.wrapping_add(count), Ordering::Release);
        count
    }

    /// Drain everything currently queued
    pub fn pop_all(&mut self) -> Vec<[i16; 2]> {
        let mut out = vec![[0i16; 2]; self.len()];
        let count = self.pop(&mut out);
        out.truncate(count);
        out
    }
}
