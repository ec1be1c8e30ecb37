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

//! Shader program compiler
//!
//! Each instruction word is decoded exactly once into a boxed closure with
//! its operands, swizzles and write mask already resolved. Running a shader
//! is then a walk over the closure table driven by the flow control stack.
//!
//! ## Flow Control
//!
//! CALL, IF and LOOP push a frame `(start, end, return, repeat, increment)`.
//! Before every instruction the top frame is probed: reaching `end` either
//! repeats the body (loops) or pops the frame and continues at `return`.
//! END stops the program regardless of the stack.
//!
//! Backward branch targets and nested loops are rejected at compile time.

use super::instruction::{
    CompareOp, ConditionOp, DestRegister, Instruction, OpCode, SourceRegister, SwizzlePattern,
};
use super::{ShaderUniforms, UnitState, Vec4};
use std::fmt;

/// Upper clamp of LITP's y component (127 + 255/256)
const LITP_Y_LIMIT: f32 = 127.996_093_75;

/// Initial capacity of the flow control stack
const CALL_STACK_CAPACITY: usize = 16;

/// Flow control stack entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CallFrame {
    /// First instruction of the body (also where loops restart)
    start: u32,

    /// First instruction past the body
    end: u32,

    return_address: u32,
    repeat_counter: u8,
    loop_increment: i32,
    is_loop: bool,
}

impl CallFrame {
    fn subroutine(start: u32, num_instructions: u32, return_address: u32) -> Self {
        Self {
            start,
            end: start + num_instructions,
            return_address,
            repeat_counter: 0,
            loop_increment: 0,
            is_loop: false,
        }
    }
}

/// What the dispatcher does after an instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Next,
    Jump(u32),
    Call(CallFrame),
    Break,
    End,
}

type CompiledOp = Box<dyn Fn(&ShaderUniforms, &mut UnitState) -> Flow + Send + Sync>;

/// Multiply where `0 * inf` is 0 instead of NaN
#[inline(always)]
fn sanitized_mul(a: f32, b: f32) -> f32 {
    let product = a * b;
    if product.is_nan() && !a.is_nan() && !b.is_nan() {
        0.0
    } else {
        product
    }
}

/// Keep 12 mantissa bits, the precision of the hardware RCP/RSQ units
#[inline(always)]
fn approximate(value: f32) -> f32 {
    f32::from_bits(value.to_bits() & !0x7FF)
}

/// Float to address offset; NaN and out-of-range values become `i32::MIN`
#[inline(always)]
fn truncate_to_address(value: f32) -> i32 {
    if value >= -2_147_483_648.0 && value < 2_147_483_648.0 {
        value as i32
    } else {
        i32::MIN
    }
}

#[inline(always)]
fn dot(a: &Vec4, b: &Vec4, components: usize) -> f32 {
    (1..components).fold(sanitized_mul(a[0], b[0]), |sum, i| {
        sum + sanitized_mul(a[i], b[i])
    })
}

#[inline(always)]
fn evaluate_condition(cc: [bool; 2], refx: bool, refy: bool, op: ConditionOp) -> bool {
    let x = cc[0] == refx;
    let y = cc[1] == refy;
    match op {
        ConditionOp::Or => x || y,
        ConditionOp::And => x && y,
        ConditionOp::JustX => x,
        ConditionOp::JustY => y,
    }
}

/// Decoded source operand
#[derive(Debug, Clone, Copy)]
struct SourceOperand {
    register: SourceRegister,
    selector: [usize; 4],
    negate: bool,

    /// Address register added to float uniform indices (0 = none)
    address_index: usize,
}

impl SourceOperand {
    fn new(
        register: SourceRegister,
        pattern: SwizzlePattern,
        source: usize,
        address_index: usize,
    ) -> Self {
        Self {
            register,
            selector: pattern.selectors(source),
            negate: pattern.negate(source),
            address_index,
        }
    }

    /// Fetch, swizzle, then negate
    #[inline(always)]
    fn read(&self, uniforms: &ShaderUniforms, state: &UnitState) -> Vec4 {
        let value = match self.register {
            SourceRegister::Input(i) => state.registers.input[i],
            SourceRegister::Temporary(i) => state.registers.temporary[i],
            SourceRegister::FloatUniform(i) => {
                let offset = match self.address_index {
                    0 => 0,
                    n => state.address_registers[n - 1] as i64,
                };
                usize::try_from(i as i64 + offset)
                    .ok()
                    .and_then(|index| uniforms.f.get(index))
                    .copied()
                    .unwrap_or([0.0; 4])
            }
        };

        let s = self.selector;
        let swizzled = [value[s[0]], value[s[1]], value[s[2]], value[s[3]]];
        if self.negate {
            swizzled.map(|v| -v)
        } else {
            swizzled
        }
    }
}

/// Decoded destination operand
#[derive(Debug, Clone, Copy)]
struct DestOperand {
    register: DestRegister,
    mask: [bool; 4],
}

impl DestOperand {
    fn new(register: DestRegister, pattern: SwizzlePattern) -> Self {
        Self {
            register,
            mask: pattern.dest_components(),
        }
    }

    /// Write the enabled components, leaving the others untouched
    #[inline(always)]
    fn write(&self, state: &mut UnitState, value: Vec4) {
        let dest = match self.register {
            DestRegister::Output(i) => &mut state.registers.output[i],
            DestRegister::Temporary(i) => &mut state.registers.temporary[i],
        };
        for (i, enabled) in self.mask.iter().enumerate() {
            if *enabled {
                dest[i] = value[i];
            }
        }
    }
}

fn binary<F>(src1: SourceOperand, src2: SourceOperand, dest: DestOperand, f: F) -> CompiledOp
where
    F: Fn(Vec4, Vec4) -> Vec4 + Send + Sync + 'static,
{
    Box::new(move |uniforms, state| {
        let a = src1.read(uniforms, state);
        let b = src2.read(uniforms, state);
        dest.write(state, f(a, b));
        Flow::Next
    })
}

fn unary<F>(src1: SourceOperand, dest: DestOperand, f: F) -> CompiledOp
where
    F: Fn(Vec4) -> Vec4 + Send + Sync + 'static,
{
    Box::new(move |uniforms, state| {
        let a = src1.read(uniforms, state);
        dest.write(state, f(a));
        Flow::Next
    })
}

fn next() -> CompiledOp {
    Box::new(|_, _| Flow::Next)
}

/// A shader program compiled to closures
pub struct CompiledShader {
    ops: Vec<CompiledOp>,
}

impl fmt::Debug for CompiledShader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledShader")
            .field("instructions", &self.ops.len())
            .finish()
    }
}

impl CompiledShader {
    /// Compile every word of `program_code`
    ///
    /// # Arguments
    ///
    /// * `program_code` - Instruction words
    /// * `swizzle_data` - Operand descriptors (missing entries read as 0)
    ///
    /// # Panics
    ///
    /// On a backward CALL/IF/JMP/LOOP target, a LOOP inside another LOOP
    /// body, or a BREAK outside any LOOP body.
    pub fn compile(program_code: &[u32], swizzle_data: &[u32]) -> Self {
        let mut compiler = Compiler {
            swizzle_data,
            loop_end: None,
        };
        let ops = program_code
            .iter()
            .enumerate()
            .map(|(pc, word)| compiler.compile_instruction(pc as u32, Instruction(*word)))
            .collect();
        Self { ops }
    }

    /// Number of compiled instructions
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Execute from `entry_point` until END (or the end of the program)
    pub fn run(&self, uniforms: &ShaderUniforms, state: &mut UnitState, entry_point: u32) {
        let mut stack: Vec<CallFrame> = Vec::with_capacity(CALL_STACK_CAPACITY);
        let mut pc = entry_point;

        loop {
            while let Some(top) = stack.last_mut() {
                if pc != top.end {
                    break;
                }
                state.address_registers[2] =
                    state.address_registers[2].wrapping_add(top.loop_increment);
                if top.repeat_counter == 0 {
                    pc = top.return_address;
                    stack.pop();
                } else {
                    top.repeat_counter -= 1;
                    pc = top.start;
                }
            }

            let Some(op) = self.ops.get(pc as usize) else {
                log::warn!("Shader: execution ran past the end of the program ({})", pc);
                break;
            };

            match op(uniforms, state) {
                Flow::Next => pc += 1,
                Flow::Jump(target) => pc = target,
                Flow::Call(frame) => {
                    pc = frame.start;
                    stack.push(frame);
                }
                Flow::Break => match stack.iter().rposition(|frame| frame.is_loop) {
                    Some(depth) => {
                        pc = stack[depth].return_address;
                        stack.truncate(depth);
                    }
                    None => {
                        log::error!("Shader: BREAK at {} outside of a loop", pc);
                        pc += 1;
                    }
                },
                Flow::End => break,
            }
        }
    }
}

struct Compiler<'a> {
    swizzle_data: &'a [u32],

    /// Last instruction of the loop body being compiled
    loop_end: Option<u32>,
}

impl Compiler<'_> {
    fn swizzle(&self, id: usize) -> SwizzlePattern {
        SwizzlePattern(self.swizzle_data.get(id).copied().unwrap_or(0))
    }

    fn compile_instruction(&mut self, pc: u32, instr: Instruction) -> CompiledOp {
        if self.loop_end.is_some_and(|end| pc > end) {
            self.loop_end = None;
        }

        let Some(op) = instr.opcode() else {
            log::error!(
                "Shader: unhandled opcode 0x{:02X} at {} (0x{:08X}), skipped",
                instr.0 >> 26,
                pc,
                instr.0
            );
            return next();
        };

        match op {
            OpCode::Mad | OpCode::Madi => self.compile_mad(op, instr),
            OpCode::Cmp => self.compile_cmp(instr),
            OpCode::Nop => next(),
            OpCode::End => Box::new(|_, _| Flow::End),
            OpCode::Break | OpCode::Breakc => self.compile_break(op, pc, instr),
            OpCode::Call
            | OpCode::Callc
            | OpCode::Callu
            | OpCode::Ifu
            | OpCode::Ifc
            | OpCode::Jmpc
            | OpCode::Jmpu => self.compile_branch(op, pc, instr),
            OpCode::Loop => self.compile_loop(pc, instr),
            OpCode::Emit => Box::new(|_, state| {
                let Some(emitter) = state.emitter.as_mut() else {
                    panic!("EMIT executed on a shader unit without a geometry emitter");
                };
                emitter.emit(&state.registers.output);
                Flow::Next
            }),
            OpCode::SetEmit => {
                let (vertex_id, prim_emit, winding) =
                    (instr.vertex_id(), instr.prim_emit(), instr.winding());
                Box::new(move |_, state| {
                    let Some(emitter) = state.emitter.as_mut() else {
                        panic!("SETEMIT executed on a shader unit without a geometry emitter");
                    };
                    emitter.set_emit(vertex_id, prim_emit, winding);
                    Flow::Next
                })
            }
            _ => self.compile_arithmetic(op, instr),
        }
    }

    // ========== Arithmetic ==========

    fn compile_arithmetic(&self, op: OpCode, instr: Instruction) -> CompiledOp {
        let pattern = self.swizzle(instr.operand_desc_id());
        let index = instr.address_register_index();
        let (src1, src2) = if op.is_inverted() {
            (
                SourceOperand::new(instr.src1i(), pattern, 1, 0),
                SourceOperand::new(instr.src2i(), pattern, 2, index),
            )
        } else {
            (
                SourceOperand::new(instr.src1(), pattern, 1, index),
                SourceOperand::new(instr.src2(), pattern, 2, 0),
            )
        };
        let dest = DestOperand::new(instr.dest(), pattern);

        match op {
            OpCode::Add => binary(src1, src2, dest, |a, b| std::array::from_fn(|i| a[i] + b[i])),
            OpCode::Mul => binary(src1, src2, dest, |a, b| {
                std::array::from_fn(|i| sanitized_mul(a[i], b[i]))
            }),
            OpCode::Dp3 => binary(src1, src2, dest, |a, b| [dot(&a, &b, 3); 4]),
            OpCode::Dp4 => binary(src1, src2, dest, |a, b| [dot(&a, &b, 4); 4]),
            OpCode::Dph | OpCode::Dphi => binary(src1, src2, dest, |mut a, b| {
                a[3] = 1.0;
                [dot(&a, &b, 4); 4]
            }),
            OpCode::Dst | OpCode::Dsti => binary(src1, src2, dest, |a, b| {
                [1.0, sanitized_mul(a[1], b[1]), a[2], b[3]]
            }),
            OpCode::Sge | OpCode::Sgei => binary(src1, src2, dest, |a, b| {
                std::array::from_fn(|i| if a[i] >= b[i] { 1.0 } else { 0.0 })
            }),
            OpCode::Slt | OpCode::Slti => binary(src1, src2, dest, |a, b| {
                std::array::from_fn(|i| if a[i] < b[i] { 1.0 } else { 0.0 })
            }),
            OpCode::Max => binary(src1, src2, dest, |a, b| {
                std::array::from_fn(|i| if a[i] > b[i] { a[i] } else { b[i] })
            }),
            OpCode::Min => binary(src1, src2, dest, |a, b| {
                std::array::from_fn(|i| if a[i] < b[i] { a[i] } else { b[i] })
            }),
            OpCode::Ex2 => unary(src1, dest, |a| [a[0].exp2(); 4]),
            OpCode::Lg2 => unary(src1, dest, |a| [a[0].log2(); 4]),
            OpCode::Rcp => unary(src1, dest, |a| [approximate(1.0 / a[0]); 4]),
            OpCode::Rsq => unary(src1, dest, |a| [approximate(1.0 / a[0].sqrt()); 4]),
            OpCode::Flr => unary(src1, dest, |a| a.map(f32::floor)),
            OpCode::Mov => unary(src1, dest, |a| a),
            OpCode::Mova => Box::new(move |uniforms, state| {
                let a = src1.read(uniforms, state);
                for i in 0..2 {
                    if dest.mask[i] {
                        state.address_registers[i] = truncate_to_address(a[i]);
                    }
                }
                Flow::Next
            }),
            OpCode::Litp => Box::new(move |uniforms, state| {
                let a = src1.read(uniforms, state);
                state.conditional_code = [a[0] >= 0.0, a[3] >= 0.0];
                let clamped = [
                    a[0].max(0.0),
                    a[1].clamp(-LITP_Y_LIMIT, LITP_Y_LIMIT),
                    a[2].max(0.0),
                    a[3].max(0.0),
                ];
                dest.write(state, [clamped[0], clamped[1], clamped[3], clamped[2]]);
                Flow::Next
            }),
            _ => {
                log::error!("Shader: {:?} is not an arithmetic instruction", op);
                next()
            }
        }
    }

    fn compile_mad(&self, op: OpCode, instr: Instruction) -> CompiledOp {
        let pattern = self.swizzle(instr.mad_operand_desc_id());
        let index = instr.mad_address_register_index();
        let src1 = SourceOperand::new(instr.mad_src1(), pattern, 1, 0);
        let (src2, src3) = if op == OpCode::Madi {
            (
                SourceOperand::new(instr.madi_src2(), pattern, 2, 0),
                SourceOperand::new(instr.madi_src3(), pattern, 3, index),
            )
        } else {
            (
                SourceOperand::new(instr.mad_src2(), pattern, 2, index),
                SourceOperand::new(instr.mad_src3(), pattern, 3, 0),
            )
        };
        let dest = DestOperand::new(instr.mad_dest(), pattern);

        Box::new(move |uniforms, state| {
            let a = src1.read(uniforms, state);
            let b = src2.read(uniforms, state);
            let c = src3.read(uniforms, state);
            dest.write(
                state,
                std::array::from_fn(|i| sanitized_mul(a[i], b[i]) + c[i]),
            );
            Flow::Next
        })
    }

    fn compile_cmp(&self, instr: Instruction) -> CompiledOp {
        let pattern = self.swizzle(instr.operand_desc_id());
        let src1 = SourceOperand::new(instr.src1(), pattern, 1, instr.address_register_index());
        let src2 = SourceOperand::new(instr.src2(), pattern, 2, 0);
        let (op_x, op_y) = (instr.compare_x(), instr.compare_y());
        if op_x.is_none() || op_y.is_none() {
            log::error!(
                "Shader: unknown CMP comparison in 0x{:08X}, treated as always true",
                instr.0
            );
        }

        let compare = |op: Option<CompareOp>, a: f32, b: f32| op.is_none_or(|op| op.evaluate(a, b));
        Box::new(move |uniforms, state| {
            let a = src1.read(uniforms, state);
            let b = src2.read(uniforms, state);
            state.conditional_code = [compare(op_x, a[0], b[0]), compare(op_y, a[1], b[1])];
            Flow::Next
        })
    }

    // ========== Flow Control ==========

    fn check_forward(op: OpCode, pc: u32, target: u32) {
        assert!(
            target > pc,
            "Backwards {:?} ({} -> {}) not supported",
            op,
            pc,
            target
        );
    }

    fn compile_break(&self, op: OpCode, pc: u32, instr: Instruction) -> CompiledOp {
        assert!(
            self.loop_end.is_some(),
            "{:?} at {} must be inside a LOOP",
            op,
            pc
        );

        if op == OpCode::Break {
            return Box::new(|_, _| Flow::Break);
        }

        let (refx, refy, cond) = (instr.refx(), instr.refy(), instr.condition_op());
        Box::new(move |_, state| {
            if evaluate_condition(state.conditional_code, refx, refy, cond) {
                Flow::Break
            } else {
                Flow::Next
            }
        })
    }

    fn compile_branch(&self, op: OpCode, pc: u32, instr: Instruction) -> CompiledOp {
        let dest = instr.dest_offset();
        let num = instr.num_instructions();
        Self::check_forward(op, pc, dest);

        let (refx, refy, cond) = (instr.refx(), instr.refy(), instr.condition_op());
        let bool_id = instr.bool_uniform_id();

        let call = CallFrame::subroutine(dest, num, pc + 1);
        let if_frame = CallFrame::subroutine(pc + 1, dest - (pc + 1), dest + num);
        let else_frame = CallFrame::subroutine(dest, num, dest + num);

        match op {
            OpCode::Call => Box::new(move |_, _| Flow::Call(call)),
            OpCode::Callc => Box::new(move |_, state| {
                if evaluate_condition(state.conditional_code, refx, refy, cond) {
                    Flow::Call(call)
                } else {
                    Flow::Next
                }
            }),
            OpCode::Callu => Box::new(move |uniforms, _| {
                if uniforms.b[bool_id] {
                    Flow::Call(call)
                } else {
                    Flow::Next
                }
            }),
            OpCode::Ifu => Box::new(move |uniforms, _| {
                Flow::Call(if uniforms.b[bool_id] { if_frame } else { else_frame })
            }),
            OpCode::Ifc => Box::new(move |_, state| {
                let taken = evaluate_condition(state.conditional_code, refx, refy, cond);
                Flow::Call(if taken { if_frame } else { else_frame })
            }),
            OpCode::Jmpc => Box::new(move |_, state| {
                if evaluate_condition(state.conditional_code, refx, refy, cond) {
                    Flow::Jump(dest)
                } else {
                    Flow::Next
                }
            }),
            OpCode::Jmpu => {
                // Bit 0 of num_instructions inverts the test
                let expected = num & 1 == 0;
                Box::new(move |uniforms, _| {
                    if uniforms.b[bool_id] == expected {
                        Flow::Jump(dest)
                    } else {
                        Flow::Next
                    }
                })
            }
            _ => {
                log::error!("Shader: {:?} is not a branch instruction", op);
                next()
            }
        }
    }

    fn compile_loop(&mut self, pc: u32, instr: Instruction) -> CompiledOp {
        let dest = instr.dest_offset();
        assert!(
            dest >= pc,
            "Backwards Loop ({} -> {}) not supported",
            pc,
            dest
        );
        if let Some(end) = self.loop_end {
            panic!("Nested loops not supported (LOOP at {} inside loop ending at {})", pc, end);
        }
        self.loop_end = Some(dest);

        let int_id = instr.int_uniform_id();
        let (start, end) = (pc + 1, dest + 1);
        Box::new(move |uniforms, state| {
            let [count, initial, increment, _] = uniforms.i[int_id];
            state.address_registers[2] = initial as i32;
            Flow::Call(CallFrame {
                start,
                end,
                return_address: end,
                repeat_counter: count,
                loop_increment: increment as i8 as i32,
                is_loop: true,
            })
        })
    }
}
