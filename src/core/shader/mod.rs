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

//! PICA200 vertex and geometry shader units
//!
//! Shader programs are uploaded as two 4096-word tables: the instruction
//! stream and the operand descriptors it indexes. [`JitEngine`] compiles a
//! program once into a chain of closures and caches the result by content
//! hash, so re-uploading an identical program costs only two hashes.
//!
//! ## Register Files
//!
//! ```text
//! v0-v15   input        (per vertex)
//! r0-r15   temporary
//! o0-o15   output
//! c0-c95   float uniform
//! b0-b15   bool uniform
//! i0-i3    int uniform  (x = count - 1, y = start, z = increment)
//! a0.x a0.y aL          address registers
//! cc.x cc.y             condition codes
//! ```
//!
//! Arithmetic uses `f32` rather than the hardware's 24-bit floats, but
//! keeps its `0 * inf = 0` multiply rule.
//!
//! # Example
//!
//! ```
//! use ctr_hle::core::shader::assemble::{bare, common, plain_swizzle};
//! use ctr_hle::core::shader::{
//!     DestRegister, JitEngine, OpCode, ShaderSetup, SourceRegister, UnitState,
//! };
//!
//! let mut setup = ShaderSetup::new();
//! setup.set_swizzle_data(0, &[plain_swizzle(0xF)]);
//! setup.set_program_code(
//!     0,
//!     &[
//!         common(OpCode::Add, DestRegister::Output(0), SourceRegister::Input(0),
//!                SourceRegister::Input(1), 0, 0),
//!         bare(OpCode::End),
//!     ],
//! );
//!
//! let engine = JitEngine::new();
//! engine.prepare_batch(&mut setup, 0);
//!
//! let mut state = UnitState::new();
//! state.registers.input[0] = [1.0, 2.0, 3.0, 4.0];
//! state.registers.input[1] = [0.5; 4];
//! engine.run(&setup, &mut state);
//! assert_eq!(state.registers.output[0], [1.5, 2.5, 3.5, 4.5]);
//! ```

pub mod compiler;
pub mod emitter;
pub mod instruction;
pub mod jit;

pub use compiler::CompiledShader;
pub use emitter::{AttributeBuffer, EmittedPrimitive, GeometryEmitter};
pub use instruction::{
    assemble, CompareOp, ConditionOp, DestRegister, Instruction, OpCode, SourceRegister,
    SwizzlePattern,
};
pub use jit::JitEngine;

use std::sync::Arc;
use xxhash_rust::xxh3::xxh3_64;

/// Words in the program code table
pub const MAX_PROGRAM_CODE_LENGTH: usize = 4096;

/// Words in the operand descriptor table
pub const MAX_SWIZZLE_DATA_LENGTH: usize = 4096;

pub const NUM_FLOAT_UNIFORMS: usize = 96;
pub const NUM_BOOL_UNIFORMS: usize = 16;
pub const NUM_INT_UNIFORMS: usize = 4;

/// Four-component shader vector
pub type Vec4 = [f32; 4];

/// Uniform registers
#[derive(Debug, Clone, PartialEq)]
pub struct ShaderUniforms {
    pub f: [Vec4; NUM_FLOAT_UNIFORMS],
    pub b: [bool; NUM_BOOL_UNIFORMS],

    /// Loop parameters: x = iteration count - 1, y = initial aL,
    /// z = aL increment (signed)
    pub i: [[u8; 4]; NUM_INT_UNIFORMS],
}

impl Default for ShaderUniforms {
    fn default() -> Self {
        Self {
            f: [[0.0; 4]; NUM_FLOAT_UNIFORMS],
            b: [false; NUM_BOOL_UNIFORMS],
            i: [[0; 4]; NUM_INT_UNIFORMS],
        }
    }
}

/// Compiled routine bound to a setup by [`JitEngine::prepare_batch`]
#[derive(Debug, Clone, Default)]
pub struct EngineData {
    pub entry_point: u32,
    pub cached_shader: Option<Arc<CompiledShader>>,
}

/// Program, operand descriptors and uniforms of one shader unit
pub struct ShaderSetup {
    pub uniforms: ShaderUniforms,

    program_code: Box<[u32]>,
    swizzle_data: Box<[u32]>,

    program_code_hash: u64,
    swizzle_data_hash: u64,
    program_code_dirty: bool,
    swizzle_data_dirty: bool,

    pub engine_data: EngineData,
}

impl ShaderSetup {
    /// Zeroed program and descriptor tables
    pub fn new() -> Self {
        Self {
            uniforms: ShaderUniforms::default(),
            program_code: vec![0; MAX_PROGRAM_CODE_LENGTH].into_boxed_slice(),
            swizzle_data: vec![0; MAX_SWIZZLE_DATA_LENGTH].into_boxed_slice(),
            program_code_hash: 0,
            swizzle_data_hash: 0,
            program_code_dirty: true,
            swizzle_data_dirty: true,
            engine_data: EngineData::default(),
        }
    }

    pub fn program_code(&self) -> &[u32] {
        &self.program_code
    }

    pub fn swizzle_data(&self) -> &[u32] {
        &self.swizzle_data
    }

    /// Upload instruction words starting at `offset`
    ///
    /// Words past the end of the table are dropped with a warning.
    pub fn set_program_code(&mut self, offset: usize, words: &[u32]) {
        Self::upload(&mut self.program_code, offset, words, "program code");
        self.program_code_dirty = true;
    }

    /// Upload operand descriptors starting at `offset`
    pub fn set_swizzle_data(&mut self, offset: usize, words: &[u32]) {
        Self::upload(&mut self.swizzle_data, offset, words, "swizzle data");
        self.swizzle_data_dirty = true;
    }

    fn upload(table: &mut [u32], offset: usize, words: &[u32], name: &str) {
        let start = offset.min(table.len());
        let count = words.len().min(table.len() - start);
        if count < words.len() {
            log::warn!(
                "Shader: {} upload at {} truncated ({} of {} words)",
                name,
                offset,
                count,
                words.len()
            );
        }
        table[start..start + count].copy_from_slice(&words[..count]);
    }

    /// Content hash of the program code, recomputed after uploads
    pub fn program_code_hash(&mut self) -> u64 {
        if self.program_code_dirty {
            self.program_code_hash = xxh3_64(bytemuck::cast_slice(&self.program_code[..]));
            self.program_code_dirty = false;
        }
        self.program_code_hash
    }

    /// Content hash of the operand descriptors, recomputed after uploads
    pub fn swizzle_data_hash(&mut self) -> u64 {
        if self.swizzle_data_dirty {
            self.swizzle_data_hash = xxh3_64(bytemuck::cast_slice(&self.swizzle_data[..]));
            self.swizzle_data_dirty = false;
        }
        self.swizzle_data_hash
    }
}

impl Default for ShaderSetup {
    fn default() -> Self {
        Self::new()
    }
}

/// Input, temporary and output registers
#[derive(Debug, Clone, PartialEq)]
pub struct Registers {
    pub input: [Vec4; 16],
    pub temporary: [Vec4; 16],
    pub output: [Vec4; 16],
}

impl Default for Registers {
    fn default() -> Self {
        Self {
            input: [[0.0; 4]; 16],
            temporary: [[0.0; 4]; 16],
            output: [[0.0; 4]; 16],
        }
    }
}

/// Per-invocation state of a shader unit
#[derive(Debug, Clone, Default)]
pub struct UnitState {
    pub registers: Registers,

    /// a0.x, a0.y and aL
    pub address_registers: [i32; 3],

    /// cc.x and cc.y
    pub conditional_code: [bool; 2],

    /// Present on geometry shader units
    pub emitter: Option<GeometryEmitter>,
}

impl UnitState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Geometry shader unit
    pub fn with_emitter(emitter: GeometryEmitter) -> Self {
        Self {
            emitter: Some(emitter),
            ..Self::default()
        }
    }

    /// Load vertex attributes into v0.. and clear everything else
    pub fn load_input(&mut self, attributes: &[Vec4]) {
        let emitter = self.emitter.take();
        *self = Self {
            emitter,
            ..Self::default()
        };
        for (reg, attr) in self.registers.input.iter_mut().zip(attributes) {
            *reg = *attr;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_tracks_uploads() {
        let mut setup = ShaderSetup::new();
        let initial = setup.program_code_hash();
        assert_eq!(setup.program_code_hash(), initial);

        setup.set_program_code(10, &[0x8800_0000]);
        assert_ne!(setup.program_code_hash(), initial);

        setup.set_program_code(10, &[0]);
        assert_eq!(setup.program_code_hash(), initial);
    }

    #[test]
    fn test_swizzle_hash_independent_of_code() {
        let mut setup = ShaderSetup::new();
        let code = setup.program_code_hash();
        let swizzle = setup.swizzle_data_hash();
        setup.set_swizzle_data(0, &[0xF]);
        assert_eq!(setup.program_code_hash(), code);
        assert_ne!(setup.swizzle_data_hash(), swizzle);
    }

    #[test]
    fn test_upload_truncates_at_end() {
        let mut setup = ShaderSetup::new();
        setup.set_program_code(MAX_PROGRAM_CODE_LENGTH - 1, &[1, 2, 3]);
        assert_eq!(setup.program_code()[MAX_PROGRAM_CODE_LENGTH - 1], 1);

        setup.set_program_code(MAX_PROGRAM_CODE_LENGTH + 5, &[7]);
        assert_eq!(setup.program_code().len(), MAX_PROGRAM_CODE_LENGTH);
    }

    #[test]
    fn test_load_input_keeps_emitter() {
        let mut state = UnitState::with_emitter(GeometryEmitter::new(1));
        state.registers.temporary[0] = [9.0; 4];
        state.address_registers = [1, 2, 3];
        state.load_input(&[[1.0; 4], [2.0; 4]]);

        assert!(state.emitter.is_some());
        assert_eq!(state.registers.input[1], [2.0; 4]);
        assert_eq!(state.registers.temporary[0], [0.0; 4]);
        assert_eq!(state.address_registers, [0; 3]);
    }
}
