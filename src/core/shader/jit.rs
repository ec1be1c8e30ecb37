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

//! Shader engine with a content-addressed program cache
//!
//! The cache key is `xxh3(program_code) ^ xxh3(swizzle_data)`. Two setups
//! whose tables are swapped produce the same key and share one compiled
//! routine; see `test_swapped_tables_collide`.

use super::compiler::CompiledShader;
use super::{ShaderSetup, UnitState, MAX_PROGRAM_CODE_LENGTH};
use crate::config::ShaderSettings;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Compiles and runs shader programs
///
/// Shared between threads; the cache is guarded by a mutex.
pub struct JitEngine {
    cache: Mutex<HashMap<u64, Arc<CompiledShader>>>,
    compile_count: AtomicU64,
    cache_shaders: bool,
}

impl JitEngine {
    /// Engine with caching enabled
    pub fn new() -> Self {
        Self::with_caching(true)
    }

    /// Engine configured from the `[shader]` settings
    pub fn from_settings(settings: &ShaderSettings) -> Self {
        Self::with_caching(settings.cache_shaders)
    }

    /// Engine that caches compiled programs only when `cache_shaders` is set
    pub fn with_caching(cache_shaders: bool) -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
            compile_count: AtomicU64::new(0),
            cache_shaders,
        }
    }

    /// Bind a compiled routine for the setup's current program
    ///
    /// Reuses a cached routine when the program and operand descriptor
    /// tables hash to a known key; compiles and caches otherwise.
    ///
    /// # Arguments
    ///
    /// * `setup` - Shader unit setup (hashes are refreshed if dirty)
    /// * `entry_point` - First instruction to execute
    ///
    /// # Panics
    ///
    /// If `entry_point` is outside the program, or the program fails the
    /// compiler's structural checks.
    pub fn prepare_batch(&self, setup: &mut ShaderSetup, entry_point: u32) {
        assert!(
            (entry_point as usize) < MAX_PROGRAM_CODE_LENGTH,
            "Shader entry point {} out of range",
            entry_point
        );

        let key = setup.program_code_hash() ^ setup.swizzle_data_hash();

        let shader = if self.cache_shaders {
            let mut cache = self.cache.lock();
            match cache.get(&key) {
                Some(shader) => Arc::clone(shader),
                None => {
                    let shader = Arc::new(self.compile(setup, key));
                    cache.insert(key, Arc::clone(&shader));
                    shader
                }
            }
        } else {
            Arc::new(self.compile(setup, key))
        };

        setup.engine_data.entry_point = entry_point;
        setup.engine_data.cached_shader = Some(shader);
    }

    fn compile(&self, setup: &ShaderSetup, key: u64) -> CompiledShader {
        log::debug!("Shader: compiling program {:016X}", key);
        self.compile_count.fetch_add(1, Ordering::Relaxed);
        CompiledShader::compile(setup.program_code(), setup.swizzle_data())
    }

    /// Run the routine bound by [`prepare_batch`](Self::prepare_batch)
    ///
    /// # Panics
    ///
    /// If `prepare_batch` has not been called on `setup`.
    pub fn run(&self, setup: &ShaderSetup, state: &mut UnitState) {
        let Some(shader) = setup.engine_data.cached_shader.as_ref() else {
            panic!("Shader run without prepare_batch");
        };
        shader.run(&setup.uniforms, state, setup.engine_data.entry_point);
    }

    /// Number of programs compiled so far
    pub fn compile_count(&self) -> u64 {
        self.compile_count.load(Ordering::Relaxed)
    }

    /// Number of cached programs
    pub fn cache_len(&self) -> usize {
        self.cache.lock().len()
    }

    /// Drop every cached program
    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }
}

impl Default for JitEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::shader::assemble::{bare, common, plain_swizzle};
    use crate::core::shader::{DestRegister, OpCode, SourceRegister};
    use proptest::prelude::*;

    fn add_program() -> ShaderSetup {
        let mut setup = ShaderSetup::new();
        setup.set_swizzle_data(0, &[plain_swizzle(0xF)]);
        setup.set_program_code(
            0,
            &[
                common(
                    OpCode::Add,
                    DestRegister::Output(0),
                    SourceRegister::Input(0),
                    SourceRegister::Input(1),
                    0,
                    0,
                ),
                bare(OpCode::End),
            ],
        );
        setup
    }

    // ========== Cache Tests ==========

    #[test]
    fn test_identical_program_hits_cache() {
        let engine = JitEngine::new();
        let mut first = add_program();
        let mut second = add_program();

        engine.prepare_batch(&mut first, 0);
        engine.prepare_batch(&mut second, 0);
        engine.prepare_batch(&mut first, 0);

        assert_eq!(engine.compile_count(), 1);
        assert_eq!(engine.cache_len(), 1);
        let a = first.engine_data.cached_shader.as_ref().unwrap();
        let b = second.engine_data.cached_shader.as_ref().unwrap();
        assert!(Arc::ptr_eq(a, b));
    }

    #[test]
    fn test_changed_tables_recompile() {
        let engine = JitEngine::new();
        let mut setup = add_program();
        engine.prepare_batch(&mut setup, 0);

        setup.set_program_code(1, &[bare(OpCode::Nop)]);
        engine.prepare_batch(&mut setup, 0);
        assert_eq!(engine.compile_count(), 2);

        setup.set_swizzle_data(1, &[0x1234]);
        engine.prepare_batch(&mut setup, 0);
        assert_eq!(engine.compile_count(), 3);
        assert_eq!(engine.cache_len(), 3);
    }

    #[test]
    fn test_swapped_tables_collide() {
        // Known weakness of the XOR key: swapping the two tables keeps it
        let engine = JitEngine::new();
        let code: Vec<u32> = (0..64).map(|i| bare(OpCode::Nop) | i).collect();
        let swizzle: Vec<u32> = (0..64).map(|i| plain_swizzle(0xF) ^ (i << 8)).collect();

        let mut a = ShaderSetup::new();
        a.set_program_code(0, &code);
        a.set_swizzle_data(0, &swizzle);

        let mut b = ShaderSetup::new();
        b.set_program_code(0, &swizzle);
        b.set_swizzle_data(0, &code);

        engine.prepare_batch(&mut a, 0);
        engine.prepare_batch(&mut b, 0);
        assert_eq!(engine.compile_count(), 1);
    }

    #[test]
    fn test_caching_disabled_always_compiles() {
        let engine = JitEngine::from_settings(&ShaderSettings {
            cache_shaders: false,
        });
        let mut setup = add_program();
        engine.prepare_batch(&mut setup, 0);
        engine.prepare_batch(&mut setup, 0);
        assert_eq!(engine.compile_count(), 2);
        assert_eq!(engine.cache_len(), 0);
    }

    #[test]
    fn test_clear_cache() {
        let engine = JitEngine::new();
        let mut setup = add_program();
        engine.prepare_batch(&mut setup, 0);
        engine.clear_cache();
        engine.prepare_batch(&mut setup, 0);
        assert_eq!(engine.compile_count(), 2);
    }

    // ========== Execution Tests ==========

    #[test]
    fn test_run_prepared_program() {
        let engine = JitEngine::new();
        let mut setup = add_program();
        engine.prepare_batch(&mut setup, 0);

        let mut state = UnitState::new();
        state.load_input(&[[1.0, 2.0, 3.0, 4.0], [10.0; 4]]);
        engine.run(&setup, &mut state);
        assert_eq!(state.registers.output[0], [11.0, 12.0, 13.0, 14.0]);
    }

    #[test]
    fn test_engine_shared_between_threads() {
        let engine = Arc::new(JitEngine::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let engine = Arc::clone(&engine);
                std::thread::spawn(move || {
                    let mut setup = add_program();
                    engine.prepare_batch(&mut setup, 0);
                    let mut state = UnitState::new();
                    state.load_input(&[[1.0; 4], [1.0; 4]]);
                    engine.run(&setup, &mut state);
                    state.registers.output[0]
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), [2.0; 4]);
        }
        assert_eq!(engine.compile_count(), 1);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_entry_point_out_of_range() {
        let engine = JitEngine::new();
        let mut setup = add_program();
        engine.prepare_batch(&mut setup, MAX_PROGRAM_CODE_LENGTH as u32);
    }

    #[test]
    #[should_panic(expected = "without prepare_batch")]
    fn test_run_unprepared_panics() {
        let engine = JitEngine::new();
        let setup = add_program();
        engine.run(&setup, &mut UnitState::new());
    }

    // ========== Property Tests ==========

    proptest! {
        #[test]
        fn prop_single_word_change_misses_cache(offset in 2usize..MAX_PROGRAM_CODE_LENGTH, word in 1u32..) {
            let engine = JitEngine::new();
            let mut setup = add_program();
            engine.prepare_batch(&mut setup, 0);

            // NOP-class words never trip the structural checks
            setup.set_program_code(offset, &[bare(OpCode::Nop) | (word & 0x03FF_FFFF)]);
            engine.prepare_batch(&mut setup, 0);
            prop_assert_eq!(engine.compile_count(), 2);
        }
    }
}
