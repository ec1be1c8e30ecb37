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

//! Geometry shader vertex emitter
//!
//! A geometry shader builds primitives one vertex at a time. `SETEMIT`
//! selects the vertex slot (0-2) and whether the next `EMIT` completes a
//! primitive; `EMIT` copies the enabled output registers into that slot.

use super::Vec4;

/// Output attributes of one vertex
pub type AttributeBuffer = [Vec4; 16];

/// Triangle assembled by the emitter
#[derive(Debug, Clone, PartialEq)]
pub struct EmittedPrimitive {
    pub vertices: [AttributeBuffer; 3],

    /// Winding flip requested by SETEMIT
    pub winding: bool,
}

/// Vertex emitter attached to a geometry shader unit
#[derive(Debug, Clone)]
pub struct GeometryEmitter {
    buffer: [AttributeBuffer; 3],
    vertex_id: u8,
    prim_emit: bool,
    winding: bool,

    /// Output registers copied on EMIT (bit n = o<n>), packed in order
    output_mask: u16,

    primitives: Vec<EmittedPrimitive>,
}

impl GeometryEmitter {
    /// Create an emitter copying the output registers in `output_mask`
    pub fn new(output_mask: u16) -> Self {
        Self {
            buffer: [[[0.0; 4]; 16]; 3],
            vertex_id: 0,
            prim_emit: false,
            winding: false,
            output_mask,
            primitives: Vec::new(),
        }
    }

    /// Latch the SETEMIT parameters
    pub fn set_emit(&mut self, vertex_id: u8, prim_emit: bool, winding: bool) {
        self.vertex_id = vertex_id;
        self.prim_emit = prim_emit;
        self.winding = winding;
    }

    /// Store the masked outputs into the current vertex slot
    ///
    /// # Panics
    ///
    /// If the latched vertex id is not 0, 1 or 2.
    pub fn emit(&mut self, outputs: &[Vec4; 16]) {
        assert!(
            self.vertex_id < 3,
            "EMIT with invalid vertex id {}",
            self.vertex_id
        );

        let slot = &mut self.buffer[self.vertex_id as usize];
        let enabled = (0..16).filter(|reg| self.output_mask & (1 << reg) != 0);
        for (dst, reg) in slot.iter_mut().zip(enabled) {
            *dst = outputs[reg];
        }

        if self.prim_emit {
            log::trace!("GS: primitive emitted (winding={})", self.winding);
            self.primitives.push(EmittedPrimitive {
                vertices: self.buffer,
                winding: self.winding,
            });
        }
    }

    /// Vertex slot contents
    pub fn vertex(&self, slot: usize) -> Option<&AttributeBuffer> {
        self.buffer.get(slot)
    }

    pub fn primitives(&self) -> &[EmittedPrimitive] {
        &self.primitives
    }

    /// Remove and return all completed primitives
    pub fn take_primitives(&mut self) -> Vec<EmittedPrimitive> {
        std::mem::take(&mut self.primitives)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outputs() -> [Vec4; 16] {
        std::array::from_fn(|i| [i as f32; 4])
    }

    #[test]
    fn test_emit_packs_masked_outputs() {
        let mut emitter = GeometryEmitter::new(0b1010);
        emitter.set_emit(1, false, false);
        emitter.emit(&outputs());

        let vertex = emitter.vertex(1).unwrap();
        assert_eq!(vertex[0], [1.0; 4]);
        assert_eq!(vertex[1], [3.0; 4]);
        assert_eq!(vertex[2], [0.0; 4]);
        assert!(emitter.primitives().is_empty());
    }

    #[test]
    fn test_prim_emit_records_triangle() {
        let mut emitter = GeometryEmitter::new(0b1);
        for id in 0..3u8 {
            let mut regs = outputs();
            regs[0] = [id as f32 + 10.0; 4];
            emitter.set_emit(id, id == 2, true);
            emitter.emit(&regs);
        }

        let prims = emitter.take_primitives();
        assert_eq!(prims.len(), 1);
        assert!(prims[0].winding);
        assert_eq!(prims[0].vertices[0][0], [10.0; 4]);
        assert_eq!(prims[0].vertices[2][0], [12.0; 4]);
        assert!(emitter.primitives().is_empty());
    }

    #[test]
    #[should_panic(expected = "invalid vertex id")]
    fn test_invalid_vertex_id_panics() {
        let mut emitter = GeometryEmitter::new(0b1);
        emitter.set_emit(3, false, false);
        emitter.emit(&outputs());
    }
}
