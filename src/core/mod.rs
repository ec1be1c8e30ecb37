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

//! Core emulation components
//!
//! - [`dsp`]: HLE audio DSP (pipes, shared memory, sources, mixer)
//! - [`audio`]: Host-side output path (FIFO, time stretching, sinks)
//! - [`shader`]: PICA shader decoding, compilation and caching
//! - [`interrupt`]: DSP interrupt controller
//! - [`memory`]: Guest memory access
//! - [`timing`]: Cycle-based event scheduler
//! - [`system`]: Component wiring and main loop

pub mod audio;
pub mod dsp;
pub mod error;
pub mod interrupt;
pub mod memory;
pub mod shader;
pub mod system;
pub mod timing;
