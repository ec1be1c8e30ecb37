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

//! DSP pipes
//!
//! Pipes are byte FIFOs between the application and the DSP firmware. The
//! application writes commands to the Audio pipe and reads back the address
//! directory; the Binary pipe mirrors everything sent on the Audio pipe.
//!
//! ```text
//! Index | Pipe
//! ------|--------
//! 0     | Debug
//! 1     | DMA
//! 2     | Audio
//! 3     | Binary
//! 4-7   | unused slots
//! ```

use super::shared_memory::{address_directory, NUM_DIRECTORY_ENTRIES};
use std::collections::VecDeque;

/// Number of pipe slots; indices at or above this are invalid
pub const NUM_DSP_PIPE: usize = 8;

/// Largest read the pipe interface accepts
pub const MAX_PIPE_READ: usize = 0xFFFF;

/// Named DSP pipes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DspPipe {
    Debug = 0,
    Dma = 1,
    Audio = 2,
    Binary = 3,
}

impl DspPipe {
    /// Map a raw pipe index to a named pipe
    pub fn from_index(index: u32) -> Option<Self> {
        match index {
            0 => Some(Self::Debug),
            1 => Some(Self::Dma),
            2 => Some(Self::Audio),
            3 => Some(Self::Binary),
            _ => None,
        }
    }
}

impl From<DspPipe> for u32 {
    fn from(pipe: DspPipe) -> u32 {
        pipe as u32
    }
}

/// Commands accepted on the Audio pipe (first byte of a 4-byte write)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChange {
    Initialize = 0,
    Shutdown = 1,
    Wakeup = 2,
    Sleep = 3,
}

impl StateChange {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Initialize),
            1 => Some(Self::Shutdown),
            2 => Some(Self::Wakeup),
            3 => Some(Self::Sleep),
            _ => None,
        }
    }
}

/// Byte queues backing every pipe slot
pub struct PipeQueues {
    queues: [VecDeque<u8>; NUM_DSP_PIPE],
}

impl PipeQueues {
    pub fn new() -> Self {
        Self {
            queues: Default::default(),
        }
    }

    /// Discard the contents of every pipe
    pub fn reset(&mut self) {
        for queue in self.queues.iter_mut() {
            queue.clear();
        }
    }

    /// Bytes waiting in a pipe (0 for an invalid index)
    pub fn readable_size(&self, index: usize) -> usize {
        self.queues.get(index).map_or(0, VecDeque::len)
    }

    /// Append bytes to a pipe
    ///
    /// Returns `false` without queuing anything when `index` is invalid.
    pub fn push(&mut self, index: usize, bytes: &[u8]) -> bool {
        match self.queues.get_mut(index) {
            Some(queue) => {
                queue.extend(bytes.iter().copied());
                true
            }
            None => false,
        }
    }

    /// Remove up to `length` bytes from the front of a pipe
    ///
    /// Invalid pipes and oversized requests are logged and yield nothing; a
    /// request larger than what is queued is truncated.
    ///
    /// # Arguments
    ///
    /// * `index` - Raw pipe index
    /// * `length` - Number of bytes wanted
    ///
    /// # Returns
    ///
    /// The bytes removed, oldest first
    pub fn read(&mut self, index: usize, length: usize) -> Vec<u8> {
        let Some(queue) = self.queues.get_mut(index) else {
            log::error!("DSP: pipe_read on invalid pipe index {}", index);
            return Vec::new();
        };

        if length > MAX_PIPE_READ {
            log::error!(
                "DSP: pipe_read length {} exceeds maximum of {}",
                length,
                MAX_PIPE_READ
            );
            return Vec::new();
        }

        let available = queue.len();
        let length = if length > available {
            log::warn!(
                "DSP: pipe {} has {} bytes, {} requested; truncating",
                index,
                available,
                length
            );
            available
        } else {
            length
        };

        queue.drain(..length).collect()
    }
}

impl Default for PipeQueues {
    fn default() -> Self {
        Self::new()
    }
}

/// Serialize the address directory as published on the Audio pipe
///
/// Layout: u16 LE entry count followed by one u16 LE DSP address per entry.
pub fn directory_bytes() -> Vec<u8> {
    let mut bytes = Vec::with_capacity(2 + 2 * NUM_DIRECTORY_ENTRIES);
    bytes.extend_from_slice(&(NUM_DIRECTORY_ENTRIES as u16).to_le_bytes());
    for address in address_directory() {
        bytes.extend_from_slice(&address.to_le_bytes());
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipe_index_conversion() {
        assert_eq!(u32::from(DspPipe::Binary), 3);
        assert_eq!(DspPipe::from_index(2), Some(DspPipe::Audio));
        assert_eq!(DspPipe::from_index(4), None);
    }

    #[test]
    fn test_read_is_fifo() {
        let mut pipes = PipeQueues::new();
        assert!(pipes.push(3, &[1, 2, 3]));
        assert!(pipes.push(3, &[4]));
        assert_eq!(pipes.read(3, 2), vec![1, 2]);
        assert_eq!(pipes.readable_size(3), 2);
        assert_eq!(pipes.read(3, 2), vec![3, 4]);
    }

    #[test]
    fn test_read_truncates_when_under_supplied() {
        let mut pipes = PipeQueues::new();
        pipes.push(0, &[9, 8]);
        assert_eq!(pipes.read(0, 10), vec![9, 8]);
        assert_eq!(pipes.readable_size(0), 0);
    }

    #[test]
    fn test_invalid_index_and_oversized_read() {
        let mut pipes = PipeQueues::new();
        assert!(!pipes.push(NUM_DSP_PIPE, &[1]));
        assert!(pipes.read(NUM_DSP_PIPE, 1).is_empty());
        assert_eq!(pipes.readable_size(NUM_DSP_PIPE), 0);

        pipes.push(2, &[1, 2, 3]);
        assert!(pipes.read(2, MAX_PIPE_READ + 1).is_empty());
        assert_eq!(pipes.readable_size(2), 3, "Oversized read must not consume");
    }

    #[test]
    fn test_reset_clears_all() {
        let mut pipes = PipeQueues::new();
        for i in 0..NUM_DSP_PIPE {
            pipes.push(i, &[0xAA]);
        }
        pipes.reset();
        assert!((0..NUM_DSP_PIPE).all(|i| pipes.readable_size(i) == 0));
    }

    #[test]
    fn test_directory_bytes() {
        let bytes = directory_bytes();
        assert_eq!(bytes.len(), 32);
        assert_eq!(&bytes[0..2], &[15, 0]);
        assert_eq!(&bytes[2..4], &[0x00, 0x80]);
        assert_eq!(&bytes[18..20], &[0xC3, 0x96]);
        assert_eq!(&bytes[20..22], &[0xE3, 0xA3]);
        assert_eq!(&bytes[30..32], &[0x8B, 0xA5]);
    }
}
