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

//! Host audio sinks
//!
//! A sink owns the host audio device and periodically asks for more frames
//! through a callback running on the device's audio thread. The emulator
//! installs an [`OutputStage`](super::OutputStage)-backed callback.
//!
//! Backends:
//! - [`NullSink`]: no device, pulled manually (headless runs and tests)
//! - `CpalSink`: real output through cpal (feature `audio`)

use crate::config::{AudioSettings, SinkKind};
use crate::core::error::Result;

/// Sample rate the DSP produces natively (Hz)
pub const NATIVE_SAMPLE_RATE: u32 = 32728;

/// Callback filling an interleaved stereo buffer with `num_frames` frames
pub type SinkCallback = Box<dyn FnMut(&mut [i16], usize) + Send>;

/// Host audio output
pub trait Sink {
    /// Rate the device consumes frames at (Hz)
    fn native_sample_rate(&self) -> u32;

    /// Install the callback that produces audio, replacing any previous one
    fn set_callback(&mut self, callback: SinkCallback);
}

/// Sink without a device
///
/// Audio is only produced when [`NullSink::pull`] is called.
pub struct NullSink {
    sample_rate: u32,
    callback: Option<SinkCallback>,
}

impl NullSink {
    pub fn new() -> Self {
        Self {
            sample_rate: NATIVE_SAMPLE_RATE,
            callback: None,
        }
    }

    /// Request `num_frames` frames as a device callback would
    ///
    /// # Returns
    ///
    /// Interleaved stereo samples (silence when no callback is installed)
    pub fn pull(&mut self, num_frames: usize) -> Vec<i16> {
        let mut buffer = vec![0i16; num_frames * 2];
        if let Some(callback) = self.callback.as_mut() {
            callback(&mut buffer, num_frames);
        }
        buffer
    }
}

impl Default for NullSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Sink for NullSink {
    fn native_sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn set_callback(&mut self, callback: SinkCallback) {
        self.callback = Some(callback);
    }
}

#[cfg(feature = "audio")]
pub use cpal_sink::CpalSink;

#[cfg(feature = "audio")]
mod cpal_sink {
    use super::{Sink, SinkCallback, NATIVE_SAMPLE_RATE};
    use crate::core::error::{EmulatorError, Result};
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

    /// Audio output through cpal
    pub struct CpalSink {
        device: cpal::Device,
        config: cpal::StreamConfig,
        sample_format: cpal::SampleFormat,
        /// Kept alive while playing
        stream: Option<cpal::Stream>,
    }

    impl CpalSink {
        /// Open an output device
        ///
        /// # Arguments
        ///
        /// * `device_name` - Device to use, or `"auto"` for the host default
        pub fn new(device_name: &str) -> Result<Self> {
            let host = cpal::default_host();

            let device = if device_name.is_empty() || device_name == "auto" {
                host.default_output_device()
            } else {
                host.output_devices()
                    .map_err(|e| EmulatorError::AudioDevice(e.to_string()))?
                    .find(|d| d.name().map(|n| n == device_name).unwrap_or(false))
            }
            .ok_or(EmulatorError::NoAudioDevice)?;

            // Prefer the DSP's own rate in stereo so no host resampling is needed
            let preferred = device
                .supported_output_configs()
                .map_err(|e| EmulatorError::AudioDevice(e.to_string()))?
                .filter(|range| range.channels() == 2)
                .filter(|range| {
                    matches!(
                        range.sample_format(),
                        cpal::SampleFormat::I16 | cpal::SampleFormat::F32
                    )
                })
                .find(|range| {
                    range.min_sample_rate().0 <= NATIVE_SAMPLE_RATE
                        && NATIVE_SAMPLE_RATE <= range.max_sample_rate().0
                })
                .map(|range| range.with_sample_rate(cpal::SampleRate(NATIVE_SAMPLE_RATE)));

            let supported = match preferred {
                Some(config) => config,
                None => device
                    .default_output_config()
                    .map_err(|e| EmulatorError::AudioDevice(e.to_string()))?,
            };

            log::info!(
                "Audio: using device {:?} at {} Hz, {} channels, {:?}",
                device.name().unwrap_or_default(),
                supported.sample_rate().0,
                supported.channels(),
                supported.sample_format()
            );

            Ok(Self {
                device,
                sample_format: supported.sample_format(),
                config: supported.into(),
                stream: None,
            })
        }

        fn build_stream(&self, mut callback: SinkCallback) -> Result<cpal::Stream> {
            let channels = self.config.channels.max(1) as usize;
            let mut scratch: Vec<i16> = Vec::new();
            let on_error = |err: cpal::StreamError| log::error!("Audio stream error: {}", err);

            // Render stereo into scratch, then spread it over the device channels
            let mut render = move |len: usize, write: &mut dyn FnMut(usize, i16)| {
                let num_frames = len / channels;
                scratch.clear();
                scratch.resize(num_frames * 2, 0);
                callback(&mut scratch, num_frames);
                for frame in 0..num_frames {
                    for channel in 0..channels {
                        let sample = if channel < 2 {
                            scratch[frame * 2 + channel]
                        } else {
                            0
                        };
                        write(frame * channels + channel, sample);
                    }
                }
            };

            let stream = match self.sample_format {
                cpal::SampleFormat::I16 => self.device.build_output_stream(
                    &self.config,
                    move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                        render(data.len(), &mut |i, s| data[i] = s);
                    },
                    on_error,
                    None,
                ),
                cpal::SampleFormat::F32 => self.device.build_output_stream(
                    &self.config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        render(data.len(), &mut |i, s| data[i] = s as f32 / 32768.0);
                    },
                    on_error,
                    None,
                ),
                other => {
                    return Err(EmulatorError::AudioDevice(format!(
                        "unsupported sample format {:?}",
                        other
                    )))
                }
            }
            .map_err(|e| EmulatorError::AudioDevice(e.to_string()))?;

            stream
                .play()
                .map_err(|e| EmulatorError::AudioDevice(e.to_string()))?;
            Ok(stream)
        }
    }

    impl Sink for CpalSink {
        fn native_sample_rate(&self) -> u32 {
            self.config.sample_rate.0
        }

        fn set_callback(&mut self, callback: SinkCallback) {
            self.stream = None;
            match self.build_stream(callback) {
                Ok(stream) => {
                    log::debug!("Audio stream started");
                    self.stream = Some(stream);
                }
                Err(e) => log::error!("Audio: failed to start stream: {}", e),
            }
        }
    }
}

/// Open the sink selected in the settings
///
/// `auto` tries the real backend and falls back to [`NullSink`] when no
/// device is available.
pub fn open_sink(settings: &AudioSettings) -> Result<Box<dyn Sink>> {
    match settings.sink {
        SinkKind::Null => Ok(Box::new(NullSink::new())),
        SinkKind::Cpal => open_device_sink(&settings.output_device),
        SinkKind::Auto => match open_device_sink(&settings.output_device) {
            Ok(sink) => Ok(sink),
            Err(e) => {
                log::warn!("Audio: {}; falling back to null sink", e);
                Ok(Box::new(NullSink::new()))
            }
        },
    }
}

#[cfg(feature = "audio")]
fn open_device_sink(device_name: &str) -> Result<Box<dyn Sink>> {
    Ok(Box::new(CpalSink::new(device_name)?))
}

#[cfg(not(feature = "audio"))]
fn open_device_sink(_device_name: &str) -> Result<Box<dyn Sink>> {
    Err(crate::core::error::EmulatorError::AudioDevice(
        "built without the `audio` feature".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_sink_silent_without_callback() {
        let mut sink = NullSink::new();
        assert_eq!(sink.native_sample_rate(), NATIVE_SAMPLE_RATE);
        assert_eq!(sink.pull(3), vec![0; 6]);
    }

    #[test]
    fn test_null_sink_invokes_callback() {
        let mut sink = NullSink::new();
        sink.set_callback(Box::new(|buffer, num_frames| {
            assert_eq!(buffer.len(), num_frames * 2);
            buffer.fill(7);
        }));
        assert_eq!(sink.pull(2), vec![7; 4]);
    }

    #[test]
    fn test_open_null_sink() {
        let settings = AudioSettings {
            sink: SinkKind::Null,
            ..AudioSettings::default()
        };
        let sink = open_sink(&settings).unwrap();
        assert_eq!(sink.native_sample_rate(), NATIVE_SAMPLE_RATE);
    }
}
