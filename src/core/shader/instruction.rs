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

//! PICA200 shader instruction encoding
//!
//! Every instruction is one 32-bit word. The opcode lives in the top six
//! bits; the remaining bits follow one of four layouts.
//!
//! ```text
//! Common:   | op (6) | dest (5) | idx (2) | src1 (7) | src2 (5) | desc (7) |
//! Inverted: | op (6) | dest (5) | idx (2) | src1 (5) | src2 (7) | desc (7) |
//! MAD:      | op (3) | dest (5) | idx (2) | src1 (5) | src2 (7) | src3 (5) | desc (5) |
//! MADI:     | op (3) | dest (5) | idx (2) | src1 (5) | src2 (5) | src3 (7) | desc (5) |
//! Flow:     | op (6) | refx | refy | cond (2) | dest_offset (12) | -- (2) | num (8) |
//! ```
//!
//! `desc` selects an operand descriptor ([`SwizzlePattern`]) from the
//! swizzle table uploaded next to the program.

/// Instruction opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    Add,
    Dp3,
    Dp4,
    Dph,
    Dst,
    Ex2,
    Lg2,
    Litp,
    Mul,
    Sge,
    Slt,
    Flr,
    Max,
    Min,
    Rcp,
    Rsq,
    Mova,
    Mov,
    Dphi,
    Dsti,
    Sgei,
    Slti,
    Break,
    Nop,
    End,
    Breakc,
    Call,
    Callc,
    Callu,
    Ifu,
    Ifc,
    Loop,
    Emit,
    SetEmit,
    Jmpc,
    Jmpu,
    Cmp,
    Madi,
    Mad,
}

impl OpCode {
    /// Decode the 6-bit opcode field
    ///
    /// CMP spans two encodings and MAD/MADI eight each, because their
    /// operand fields reach into the opcode bits.
    pub fn from_raw(raw: u8) -> Option<Self> {
        let op = match raw & 0x3F {
            0x00 => Self::Add,
            0x01 => Self::Dp3,
            0x02 => Self::Dp4,
            0x03 => Self::Dph,
            0x04 => Self::Dst,
            0x05 => Self::Ex2,
            0x06 => Self::Lg2,
            0x07 => Self::Litp,
            0x08 => Self::Mul,
            0x09 => Self::Sge,
            0x0A => Self::Slt,
            0x0B => Self::Flr,
            0x0C => Self::Max,
            0x0D => Self::Min,
            0x0E => Self::Rcp,
            0x0F => Self::Rsq,
            0x12 => Self::Mova,
            0x13 => Self::Mov,
            0x18 => Self::Dphi,
            0x19 => Self::Dsti,
            0x1A => Self::Sgei,
            0x1B => Self::Slti,
            0x20 => Self::Break,
            0x21 => Self::Nop,
            0x22 => Self::End,
            0x23 => Self::Breakc,
            0x24 => Self::Call,
            0x25 => Self::Callc,
            0x26 => Self::Callu,
            0x27 => Self::Ifu,
            0x28 => Self::Ifc,
            0x29 => Self::Loop,
            0x2A => Self::Emit,
            0x2B => Self::SetEmit,
            0x2C => Self::Jmpc,
            0x2D => Self::Jmpu,
            0x2E | 0x2F => Self::Cmp,
            0x30..=0x37 => Self::Madi,
            0x38..=0x3F => Self::Mad,
            _ => return None,
        };
        Some(op)
    }

    /// Base encoding of the opcode (low bits of CMP/MAD/MADI cleared)
    pub fn to_raw(self) -> u8 {
        match self {
            Self::Add => 0x00,
            Self::Dp3 => 0x01,
            Self::Dp4 => 0x02,
            Self::Dph => 0x03,
            Self::Dst => 0x04,
            Self::Ex2 => 0x05,
            Self::Lg2 => 0x06,
            Self::Litp => 0x07,
            Self::Mul => 0x08,
            Self::Sge => 0x09,
            Self::Slt => 0x0A,
            Self::Flr => 0x0B,
            Self::Max => 0x0C,
            Self::Min => 0x0D,
            Self::Rcp => 0x0E,
            Self::Rsq => 0x0F,
            Self::Mova => 0x12,
            Self::Mov => 0x13,
            Self::Dphi => 0x18,
            Self::Dsti => 0x19,
            Self::Sgei => 0x1A,
            Self::Slti => 0x1B,
            Self::Break => 0x20,
            Self::Nop => 0x21,
            Self::End => 0x22,
            Self::Breakc => 0x23,
            Self::Call => 0x24,
            Self::Callc => 0x25,
            Self::Callu => 0x26,
            Self::Ifu => 0x27,
            Self::Ifc => 0x28,
            Self::Loop => 0x29,
            Self::Emit => 0x2A,
            Self::SetEmit => 0x2B,
            Self::Jmpc => 0x2C,
            Self::Jmpu => 0x2D,
            Self::Cmp => 0x2E,
            Self::Madi => 0x30,
            Self::Mad => 0x38,
        }
    }

    /// Common-format opcodes whose 7-bit source is src2 instead of src1
    pub fn is_inverted(self) -> bool {
        matches!(self, Self::Dphi | Self::Dsti | Self::Sgei | Self::Slti)
    }
}

/// Source register file and index
///
/// ```text
/// 0x00-0x0F  v0-v15   input
/// 0x10-0x1F  r0-r15   temporary
/// 0x20-0x7F  c0-c95   float uniform
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceRegister {
    Input(usize),
    Temporary(usize),
    FloatUniform(usize),
}

impl SourceRegister {
    pub fn from_raw(raw: u32) -> Self {
        let raw = (raw & 0x7F) as usize;
        match raw {
            0x00..=0x0F => Self::Input(raw),
            0x10..=0x1F => Self::Temporary(raw - 0x10),
            _ => Self::FloatUniform(raw - 0x20),
        }
    }

    pub fn to_raw(self) -> u32 {
        match self {
            Self::Input(i) => i as u32 & 0x0F,
            Self::Temporary(i) => 0x10 | (i as u32 & 0x0F),
            Self::FloatUniform(i) => 0x20 + (i as u32).min(0x5F),
        }
    }
}

/// Destination register file and index
///
/// ```text
/// 0x00-0x0F  o0-o15   output
/// 0x10-0x1F  r0-r15   temporary
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestRegister {
    Output(usize),
    Temporary(usize),
}

impl DestRegister {
    pub fn from_raw(raw: u32) -> Self {
        let raw = (raw & 0x1F) as usize;
        match raw {
            0x00..=0x0F => Self::Output(raw),
            _ => Self::Temporary(raw - 0x10),
        }
    }

    pub fn to_raw(self) -> u32 {
        match self {
            Self::Output(i) => i as u32 & 0x0F,
            Self::Temporary(i) => 0x10 | (i as u32 & 0x0F),
        }
    }
}

/// CMP comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Equal = 0,
    NotEqual = 1,
    LessThan = 2,
    LessEqual = 3,
    GreaterThan = 4,
    GreaterEqual = 5,
}

impl CompareOp {
    /// Decode a 3-bit comparison field; 6 and 7 behave as "always true"
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw & 7 {
            0 => Some(Self::Equal),
            1 => Some(Self::NotEqual),
            2 => Some(Self::LessThan),
            3 => Some(Self::LessEqual),
            4 => Some(Self::GreaterThan),
            5 => Some(Self::GreaterEqual),
            _ => None,
        }
    }

    #[inline]
    pub fn evaluate(self, a: f32, b: f32) -> bool {
        match self {
            Self::Equal => a == b,
            Self::NotEqual => a != b,
            Self::LessThan => a < b,
            Self::LessEqual => a <= b,
            Self::GreaterThan => a > b,
            Self::GreaterEqual => a >= b,
        }
    }
}

/// How a flow control instruction combines the two condition codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionOp {
    Or = 0,
    And = 1,
    JustX = 2,
    JustY = 3,
}

impl ConditionOp {
    pub fn from_raw(raw: u32) -> Self {
        match raw & 3 {
            0 => Self::Or,
            1 => Self::And,
            2 => Self::JustX,
            _ => Self::JustY,
        }
    }
}

/// One shader instruction word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction(pub u32);

#[inline(always)]
const fn bits(word: u32, shift: u32, width: u32) -> u32 {
    (word >> shift) & ((1 << width) - 1)
}

impl Instruction {
    #[inline(always)]
    pub fn opcode(self) -> Option<OpCode> {
        OpCode::from_raw((self.0 >> 26) as u8)
    }

    // ========== Common format ==========

    pub fn operand_desc_id(self) -> usize {
        bits(self.0, 0, 7) as usize
    }

    pub fn src1(self) -> SourceRegister {
        SourceRegister::from_raw(bits(self.0, 12, 7))
    }

    pub fn src2(self) -> SourceRegister {
        SourceRegister::from_raw(bits(self.0, 7, 5))
    }

    pub fn src1i(self) -> SourceRegister {
        SourceRegister::from_raw(bits(self.0, 14, 5))
    }

    pub fn src2i(self) -> SourceRegister {
        SourceRegister::from_raw(bits(self.0, 7, 7))
    }

    /// 0 = none, 1 = a0.x, 2 = a0.y, 3 = aL
    pub fn address_register_index(self) -> usize {
        bits(self.0, 19, 2) as usize
    }

    pub fn dest(self) -> DestRegister {
        DestRegister::from_raw(bits(self.0, 21, 5))
    }

    pub fn compare_x(self) -> Option<CompareOp> {
        CompareOp::from_raw(bits(self.0, 24, 3))
    }

    pub fn compare_y(self) -> Option<CompareOp> {
        CompareOp::from_raw(bits(self.0, 21, 3))
    }

    // ========== MAD format ==========

    pub fn mad_operand_desc_id(self) -> usize {
        bits(self.0, 0, 5) as usize
    }

    pub fn mad_src1(self) -> SourceRegister {
        SourceRegister::from_raw(bits(self.0, 17, 5))
    }

    pub fn mad_src2(self) -> SourceRegister {
        SourceRegister::from_raw(bits(self.0, 10, 7))
    }

    pub fn mad_src3(self) -> SourceRegister {
        SourceRegister::from_raw(bits(self.0, 5, 5))
    }

    pub fn madi_src2(self) -> SourceRegister {
        SourceRegister::from_raw(bits(self.0, 12, 5))
    }

    pub fn madi_src3(self) -> SourceRegister {
        SourceRegister::from_raw(bits(self.0, 5, 7))
    }

    pub fn mad_address_register_index(self) -> usize {
        bits(self.0, 22, 2) as usize
    }

    pub fn mad_dest(self) -> DestRegister {
        DestRegister::from_raw(bits(self.0, 24, 5))
    }

    // ========== Flow control format ==========

    pub fn num_instructions(self) -> u32 {
        bits(self.0, 0, 8)
    }

    pub fn dest_offset(self) -> u32 {
        bits(self.0, 10, 12)
    }

    pub fn condition_op(self) -> ConditionOp {
        ConditionOp::from_raw(bits(self.0, 22, 2))
    }

    pub fn refy(self) -> bool {
        bits(self.0, 24, 1) != 0
    }

    pub fn refx(self) -> bool {
        bits(self.0, 25, 1) != 0
    }

    pub fn bool_uniform_id(self) -> usize {
        bits(self.0, 22, 4) as usize
    }

    pub fn int_uniform_id(self) -> usize {
        bits(self.0, 22, 2) as usize
    }

    // ========== SETEMIT format ==========

    pub fn winding(self) -> bool {
        bits(self.0, 22, 1) != 0
    }

    pub fn prim_emit(self) -> bool {
        bits(self.0, 23, 1) != 0
    }

    pub fn vertex_id(self) -> u8 {
        bits(self.0, 24, 2) as u8
    }
}

/// Operand descriptor
///
/// ```text
/// | -- | src3 sel (8) | neg3 | src2 sel (8) | neg2 | src1 sel (8) | neg1 | mask (4) |
/// ```
///
/// Selectors hold two bits per component with x in the most significant
/// pair; the write mask likewise has x in bit 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SwizzlePattern(pub u32);

/// Identity selector (xyzw)
pub const SELECTOR_XYZW: u32 = 0b00_01_10_11;

impl SwizzlePattern {
    pub fn dest_mask(self) -> u32 {
        bits(self.0, 0, 4)
    }

    /// Write enables in component order
    pub fn dest_components(self) -> [bool; 4] {
        let mask = self.dest_mask();
        std::array::from_fn(|i| mask & (1 << (3 - i)) != 0)
    }

    /// Component indices for source 1, 2 or 3, in component order
    pub fn selectors(self, source: usize) -> [usize; 4] {
        let field = match source {
            1 => bits(self.0, 5, 8),
            2 => bits(self.0, 14, 8),
            _ => bits(self.0, 23, 8),
        };
        std::array::from_fn(|i| ((field >> (2 * (3 - i))) & 3) as usize)
    }

    pub fn negate(self, source: usize) -> bool {
        let bit = match source {
            1 => 4,
            2 => 13,
            _ => 22,
        };
        bits(self.0, bit, 1) != 0
    }
}

/// Instruction and operand descriptor builders
///
/// Used to assemble programs for tests, benches and the demo binary.
pub mod assemble {
    use super::*;

    /// Pack component indices (x first) into a selector field
    pub fn selector(components: [usize; 4]) -> u32 {
        components
            .iter()
            .fold(0, |acc, &c| (acc << 2) | (c as u32 & 3))
    }

    /// Build an operand descriptor
    ///
    /// # Arguments
    ///
    /// * `mask` - Write mask with x in bit 3 (`0xF` = xyzw)
    /// * `sources` - Selector and negate flag for sources 1, 2 and 3
    pub fn swizzle(mask: u32, sources: [([usize; 4], bool); 3]) -> u32 {
        let [(s1, n1), (s2, n2), (s3, n3)] = sources;
        (mask & 0xF)
            | (n1 as u32) << 4
            | selector(s1) << 5
            | (n2 as u32) << 13
            | selector(s2) << 14
            | (n3 as u32) << 22
            | selector(s3) << 23
    }

    /// Descriptor with identity swizzles, no negation and the given mask
    pub fn plain_swizzle(mask: u32) -> u32 {
        const XYZW: [usize; 4] = [0, 1, 2, 3];
        swizzle(mask, [(XYZW, false); 3])
    }

    /// Common or inverted format arithmetic instruction
    pub fn common(
        op: OpCode,
        dest: DestRegister,
        src1: SourceRegister,
        src2: SourceRegister,
        address_index: usize,
        desc: usize,
    ) -> u32 {
        let (src1_bits, src2_bits) = if op.is_inverted() {
            ((src1.to_raw() & 0x1F) << 14, (src2.to_raw() & 0x7F) << 7)
        } else {
            ((src1.to_raw() & 0x7F) << 12, (src2.to_raw() & 0x1F) << 7)
        };
        (op.to_raw() as u32) << 26
            | dest.to_raw() << 21
            | (address_index as u32 & 3) << 19
            | src1_bits
            | src2_bits
            | (desc as u32 & 0x7F)
    }

    /// CMP with separate x and y comparisons
    pub fn cmp(
        x: CompareOp,
        y: CompareOp,
        src1: SourceRegister,
        src2: SourceRegister,
        desc: usize,
    ) -> u32 {
        (OpCode::Cmp.to_raw() as u32) << 26
            | (x as u32) << 24
            | (y as u32) << 21
            | (src1.to_raw() & 0x7F) << 12
            | (src2.to_raw() & 0x1F) << 7
            | (desc as u32 & 0x7F)
    }

    /// MAD (`inverted == false`) or MADI
    pub fn mad(
        inverted: bool,
        dest: DestRegister,
        src1: SourceRegister,
        src2: SourceRegister,
        src3: SourceRegister,
        address_index: usize,
        desc: usize,
    ) -> u32 {
        let (op, src2_bits, src3_bits) = if inverted {
            (OpCode::Madi, (src2.to_raw() & 0x1F) << 12, (src3.to_raw() & 0x7F) << 5)
        } else {
            (OpCode::Mad, (src2.to_raw() & 0x7F) << 10, (src3.to_raw() & 0x1F) << 5)
        };
        (op.to_raw() as u32) << 26
            | dest.to_raw() << 24
            | (address_index as u32 & 3) << 22
            | (src1.to_raw() & 0x1F) << 17
            | src2_bits
            | src3_bits
            | (desc as u32 & 0x1F)
    }

    /// Flow control instruction testing the condition codes
    pub fn flow(
        op: OpCode,
        dest_offset: u32,
        num_instructions: u32,
        condition: ConditionOp,
        refx: bool,
        refy: bool,
    ) -> u32 {
        (op.to_raw() as u32) << 26
            | (refx as u32) << 25
            | (refy as u32) << 24
            | (condition as u32) << 22
            | (dest_offset & 0xFFF) << 10
            | (num_instructions & 0xFF)
    }

    /// Flow control instruction driven by a bool or int uniform
    pub fn flow_uniform(op: OpCode, dest_offset: u32, num_instructions: u32, uniform: usize) -> u32 {
        (op.to_raw() as u32) << 26
            | (uniform as u32 & 0xF) << 22
            | (dest_offset & 0xFFF) << 10
            | (num_instructions & 0xFF)
    }

    /// Instruction with no operands (NOP, END, BREAK, EMIT)
    pub fn bare(op: OpCode) -> u32 {
        (op.to_raw() as u32) << 26
    }

    pub fn setemit(vertex_id: u8, prim_emit: bool, winding: bool) -> u32 {
        (OpCode::SetEmit.to_raw() as u32) << 26
            | (vertex_id as u32 & 3) << 24
            | (prim_emit as u32) << 23
            | (winding as u32) << 22
    }
}
