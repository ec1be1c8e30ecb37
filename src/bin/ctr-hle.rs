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

//! ctr-hle entry point
//!
//! Runs the HLE DSP for a number of audio frames, optionally feeding a real
//! audio device, and can exercise the shader engine on a demo program.
//!
//! # Usage
//!
//! ```bash
//! ctr-hle --frames 600
//! ctr-hle --config ctr-hle.toml --frames 120 --no-audio
//! ctr-hle --shader-demo
//! ```

use clap::Parser;
use ctr_hle::config::{Settings, SinkKind};
use ctr_hle::core::dsp::{DspPipe, StateChange};
use ctr_hle::core::interrupt::interrupts;
use ctr_hle::core::shader::assemble::{bare, common, plain_swizzle};
use ctr_hle::core::shader::{DestRegister, OpCode, ShaderSetup, SourceRegister, UnitState};
use ctr_hle::core::system::System;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ctr-hle")]
#[command(author, version, about = "Nintendo 3DS audio DSP and shader HLE")]
struct Args {
    /// Settings file (TOML)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Number of audio frames to run
    #[arg(long, short = 'n', default_value = "300")]
    frames: u64,

    /// Do not open an audio device
    #[arg(long)]
    no_audio: bool,

    /// Title ID reported to the DSP
    #[arg(long, value_parser = parse_title_id)]
    program_id: Option<u64>,

    /// Compile and run a small vertex shader
    #[arg(long)]
    shader_demo: bool,
}

fn parse_title_id(text: &str) -> Result<u64, String> {
    let digits = text.trim_start_matches("0x").trim_start_matches("0X");
    u64::from_str_radix(digits, 16).map_err(|e| format!("invalid title ID {:?}: {}", text, e))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let args = Args::parse();

    let mut settings = match &args.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    settings.apply_env_overrides()?;
    if args.no_audio {
        settings.audio.sink = SinkKind::Null;
    }
    if let Some(program_id) = args.program_id {
        settings.system.program_id = program_id;
    }

    log::info!("Starting ctr-hle...");

    let mut system = System::with_settings(settings);
    system.open_audio()?;

    system
        .dsp_mut()
        .pipe_write(DspPipe::Audio, &[StateChange::Initialize as u8, 0, 0, 0]);
    let directory = system.dsp_mut().pipe_read(DspPipe::Audio, 32);
    log::debug!("DSP structure directory: {:02X?}", directory);

    system.run_audio_frames(args.frames);

    let interrupts_raised = system
        .interrupt_controller()
        .borrow()
        .signal_count(interrupts::PIPE_BINARY);
    log::info!(
        "Ran {} frames ({} cycles): {} generated, {} dropped, {} binary pipe interrupts",
        args.frames,
        system.cycles(),
        system.dsp().frames_generated(),
        system.dsp().frames_dropped(),
        interrupts_raised
    );

    if args.shader_demo {
        run_shader_demo(&system);
    }

    system.shutdown();
    Ok(())
}

/// o0 = v0 * c0 + v1 (MUL into a temporary, then ADD)
fn run_shader_demo(system: &System) {
    let mut setup = ShaderSetup::new();
    setup.uniforms.f[0] = [2.0, 2.0, 2.0, 1.0];
    setup.set_swizzle_data(0, &[plain_swizzle(0xF)]);
    setup.set_program_code(
        0,
        &[
            common(
                OpCode::Mul,
                DestRegister::Temporary(0),
                SourceRegister::Input(0),
                SourceRegister::FloatUniform(0),
                0,
                0,
            ),
            common(
                OpCode::Add,
                DestRegister::Output(0),
                SourceRegister::Temporary(0),
                SourceRegister::Input(1),
                0,
                0,
            ),
            bare(OpCode::End),
        ],
    );

    let engine = system.shader_engine();
    engine.prepare_batch(&mut setup, 0);

    let mut state = UnitState::new();
    state.load_input(&[[1.0, 2.0, 3.0, 4.0], [0.5, 0.5, 0.5, 0.5]]);
    engine.run(&setup, &mut state);

    log::info!(
        "Shader demo: o0 = {:?} ({} compiled, {} cached)",
        state.registers.output[0],
        engine.compile_count(),
        engine.cache_len()
    );
}
