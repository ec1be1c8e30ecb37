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

//! Audio output pipeline
//!
//! Frames generated by the DSP on the emulation thread travel through a
//! lock-free FIFO to the host audio callback, where they are time-stretched
//! and scaled by the master volume.
//!
//! ```text
//! DSP tick ─► FifoProducer ══► FifoConsumer ─► TimeStretcher ─► volume ─► Sink
//!  (emulation thread)            (audio thread)
//! ```

pub mod fifo;
pub mod output;
pub mod sink;
pub mod stretcher;

pub use fifo::{AudioFifo, FifoConsumer, FifoProducer, DEFAULT_FIFO_CAPACITY};
pub use output::{volume_scale_factor, AudioControls, OutputStage};
#[cfg(feature = "audio")]
pub use sink::CpalSink;
pub use sink::{open_sink, NullSink, Sink, SinkCallback, NATIVE_SAMPLE_RATE};
pub use stretcher::TimeStretcher;
