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

//! ctr-hle: High-level emulation of the Nintendo 3DS audio DSP and PICA shader units
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`core`]: Emulated components (DSP, audio output, shader engine, System)
//! - [`config`]: Settings loaded from TOML and environment variables
//!
//! # Example
//!
//! ```no_run
//! use ctr_hle::config::Settings;
//! use ctr_hle::core::dsp::{DspPipe, StateChange};
//! use ctr_hle::core::system::System;
//!
//! let settings = Settings::load("ctr-hle.toml")?;
//! let mut system = System::with_settings(settings);
//! system.open_audio()?;
//! system
//!     .dsp_mut()
//!     .pipe_write(DspPipe::Audio, &[StateChange::Initialize as u8, 0, 0, 0]);
//! system.run_audio_frames(60);
//! # Ok::<(), ctr_hle::core::error::EmulatorError>(())
//! ```
//!
//! # Modules
//!
//! - [`core::dsp`]: Pipe protocol, shared memory regions and the per-frame audio pipeline
//! - [`core::audio`]: FIFO between emulation and the host callback, time stretcher, sinks
//! - [`core::shader`]: Shader instruction set, compiler and compiled-program cache
//! - [`core::system`]: System integration and main loop
//!
//! # Error Handling
//!
//! All fallible operations return [`core::error::Result<T>`] which is an alias for
//! `Result<T, EmulatorError>`. Malformed shader programs are programming errors
//! and panic instead.

pub mod config;
pub mod core;

// Re-export commonly used types
pub use config::Settings;
pub use core::error::{EmulatorError, Result};
