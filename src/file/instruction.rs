use crate::{dex_err, error::DexError, Result};

/// A view over the code units starting at one instruction.
pub struct Instruction<'a>(&'a [u16]);

#[allow(non_camel_case_types)]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Format {
    k10x, // op
    k12x, // op vA, vB
    k11n, // op vA, #+B
    k11x, // op vAA
    k10t, // op +AA
    k20t, // op +AAAA
    k22x, // op vAA, vBBBB
    k21t, // op vAA, +BBBB
    k21s, // op vAA, #+BBBB
    k21h, // op vAA, #+BBBB00000[00000000]
    k21c, // op vAA, thing@BBBB
    k23x, // op vAA, vBB, vCC
    k22b, // op vAA, vBB, #+CC
    k22t, // op vA, vB, +CCCC
    k22s, // op vA, vB, #+CCCC
    k22c, // op vA, vB, thing@CCCC
    k32x, // op vAAAA, vBBBB
    k30t, // op +AAAAAAAA
    k31t, // op vAA, +BBBBBBBB
    k31i, // op vAA, #+BBBBBBBB
    k31c, // op vAA, thing@BBBBBBBB
    k35c, // op {vC, vD, vE, vF, vG}, thing@BBBB (B: count, A: vG)
    k3rc, // op {vCCCC .. v(CCCC+AA-1)}, meth@BBBB

    // op {vC, vD, vE, vF, vG}, meth@BBBB, proto@HHHH (A: count)
    // format: AG op BBBB FEDC HHHH
    k45cc,

    // op {VCCCC .. v(CCCC+AA-1)}, meth@BBBB, proto@HHHH (AA: count)
    // format: AA op BBBB CCCC HHHH
    k4rcc,

    k51l, // op vAA, #+BBBBBBBBBBBBBBBB
    kInvalidFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    Unknown = 0,
    None,              // has no index
    TypeRef,           // type reference index
    StringRef,         // string reference index
    MethodRef,         // method reference index
    FieldRef,          // field reference index
    MethodAndProtoRef, // method and a proto reference index (for invoke-polymorphic)
    CallSiteRef,       // call site reference index
    MethodHandleRef,   // constant method handle reference index
    ProtoRef,          // prototype reference index
}

#[rustfmt::skip]
#[allow(non_upper_case_globals)]
pub mod code_flags {
    pub const Complex: u8 = 0xFF;
}

#[rustfmt::skip]
#[allow(non_upper_case_globals)]
pub mod signatures {
    pub const PackedSwitchSignature: u16 = 0x0100;
    pub const SparseSwitchSignature: u16 = 0x0200;
    pub const ArrayDataSignature: u16    = 0x0300;
}

pub struct InstructionDescriptor {
    pub name: &'static str,
    pub format: Format,
    pub index_type: IndexType,
    pub size_in_code_units: u8,
    pub opcode: Code,
}

impl<'a> Instruction<'a> {
    #[inline(always)]
    pub fn at(code: &[u16]) -> Instruction<'_> {
        Instruction(code)
    }

    pub fn raw(&self) -> &'a [u16] {
        self.0
    }

    #[inline(always)]
    pub fn fetch16(&self, offset: usize) -> Result<u16> {
        if offset >= self.0.len() {
            return dex_err!(DexLayoutError {
                offset: offset as u32,
                item_ty: "instruction code unit",
                array_len: self.0.len(),
                file_size: 0
            });
        }
        Ok(self.0[offset])
    }

    #[inline(always)]
    pub fn fetch32(&self, offset: usize) -> Result<u32> {
        Ok(self.fetch16(offset)? as u32 | ((self.fetch16(offset + 1)? as u32) << 16))
    }

    const fn format_desc_of(opcode: Code) -> &'static InstructionDescriptor {
        &Instruction::INSN_DESCRIPTORS[opcode as usize]
    }

    pub const fn format_of(opcode: Code) -> Format {
        Instruction::format_desc_of(opcode).format
    }

    pub const fn index_type_of(opcode: Code) -> IndexType {
        Instruction::format_desc_of(opcode).index_type
    }

    pub const fn name_of(opcode: Code) -> &'static str {
        Instruction::format_desc_of(opcode).name
    }

    #[inline(always)]
    pub const fn opcode_of(inst_data: u16) -> Code {
        // this will always return a valid result as we are limiting the
        // input to 0xFF
        Instruction::INSN_DESCRIPTORS[(inst_data & 0xFF) as usize].opcode
    }

    #[inline]
    const fn code_size_in_code_units_by_opcode(opcode: Code, format: Format) -> u8 {
        let format_idx = format as u8;
        if opcode as u8 == Code::NOP as u8 {
            code_flags::Complex // payload pseudo-instructions share the NOP opcode
        } else if format_idx >= Format::k10x as u8 && format_idx <= Format::k10t as u8 {
            1
        } else if format_idx >= Format::k20t as u8 && format_idx <= Format::k22c as u8 {
            2
        } else if format_idx >= Format::k30t as u8 && format_idx <= Format::k3rc as u8 {
            3
        } else if format_idx >= Format::k45cc as u8 && format_idx <= Format::k4rcc as u8 {
            4
        } else if format_idx == Format::k51l as u8 {
            5
        } else {
            1
        }
    }

    #[inline(always)]
    const fn format_desc(&self) -> &'static InstructionDescriptor {
        &Instruction::INSN_DESCRIPTORS[(self.0[0] & 0xFF) as usize]
    }

    #[inline(always)]
    pub const fn opcode(&self) -> Code {
        self.format_desc().opcode
    }

    #[inline(always)]
    pub const fn format(&self) -> Format {
        self.format_desc().format
    }

    #[inline(always)]
    pub const fn name(&self) -> &'static str {
        self.format_desc().name
    }

    #[inline(always)]
    pub fn size_in_code_units(&self) -> usize {
        let size = Instruction::format_desc_of(self.opcode()).size_in_code_units;
        match size {
            code_flags::Complex => self.size_in_code_units_complex().unwrap_or(1),
            _ => size as usize,
        }
    }

    pub fn size_in_code_units_complex(&self) -> Result<usize> {
        let inst_data = self.fetch16(0)?;
        Ok(match inst_data {
            signatures::PackedSwitchSignature => 4 + self.fetch16(1)? as usize * 2,
            signatures::SparseSwitchSignature => 2 + self.fetch16(1)? as usize * 4,
            signatures::ArrayDataSignature => {
                let element_size = self.fetch16(1)? as usize;
                let length = self.fetch32(2)? as usize;
                // The plus 1 is to round up for odd size and width.
                4 + (element_size * length + 1) / 2
            }
            _ => 1,
        })
    }

    /// True for fill-array-data / packed-switch / sparse-switch, whose
    /// payload data must stay 4-byte aligned within the code stream.
    pub fn is_payload_reference(&self) -> bool {
        matches!(
            self.opcode(),
            Code::FILL_ARRAY_DATA | Code::PACKED_SWITCH | Code::SPARSE_SWITCH
        )
    }

    // B|A|op ...
    #[inline]
    fn inst_b(&self) -> Result<u8> {
        Ok((self.fetch16(0)? >> 12) as u8)
    }

    /// The id-table index this instruction carries, if its format has one.
    ///
    /// Formats with an index operand: 21c/35c/3rc/45cc/4rcc and 31c carry
    /// it in vB, 22c carries it in vC. Everything else (including the
    /// quickened formats this writer never sees) reports `None`.
    pub fn carried_index(&self) -> Result<Option<(IndexType, u32)>> {
        let index = match self.format() {
            Format::k21c | Format::k35c | Format::k3rc | Format::k45cc | Format::k4rcc => {
                // op BBBB
                self.fetch16(1)? as u32
            }
            Format::k31c => self.fetch32(1)?,
            Format::k22c => {
                // op CCCC
                self.fetch16(1)? as u32
            }
            _ => return Ok(None),
        };
        Ok(match self.format_desc().index_type {
            IndexType::None | IndexType::Unknown => None,
            index_type => Some((index_type, index)),
        })
    }

    #[allow(dead_code)]
    fn var_arg_count(&self) -> Result<u8> {
        self.inst_b()
    }
}

// ----------------------------------------------------------------------------
// Instruction iterators
// ----------------------------------------------------------------------------
pub struct DexInstructionIterator<'a> {
    instructions: &'a [u16],
    pc: usize,
}

impl<'a> DexInstructionIterator<'a> {
    pub fn new(instructions: &'a [u16]) -> Self {
        Self {
            instructions,
            pc: 0,
        }
    }

    pub fn dex_pc(&self) -> usize {
        self.pc
    }
}

impl<'a> Iterator for DexInstructionIterator<'a> {
    type Item = Instruction<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pc < self.instructions.len() {
            let inst = Instruction::at(&self.instructions[self.pc..]);
            self.pc += inst.size_in_code_units();
            Some(inst)
        } else {
            None
        }
    }
}

/// Halting iterator: stops at the first instruction that would run past
/// the end of the code item or decodes to a zero width. Malformed code is
/// not an error here; the caller simply sees a shorter stream.
pub struct SafeDexInstructionIterator<'a> {
    instructions: &'a [u16],
    pc: usize,
    error_state: bool,
}

impl<'a> SafeDexInstructionIterator<'a> {
    pub fn new(instructions: &'a [u16]) -> Self {
        Self {
            instructions,
            pc: 0,
            error_state: false,
        }
    }

    pub fn in_error_state(&self) -> bool {
        self.error_state
    }
}

impl<'a> Iterator for SafeDexInstructionIterator<'a> {
    type Item = Instruction<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.error_state || self.pc >= self.instructions.len() {
            return None;
        }
        let inst = Instruction::at(&self.instructions[self.pc..]);
        let size = inst.size_in_code_units();
        if size == 0 || self.pc + size > self.instructions.len() {
            self.error_state = true;
            return None;
        }
        self.pc += size;
        Some(inst)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////
// instruction descriptors
////////////////////////////////////////////////////////////////////////////////////////////////////////////
macro_rules! insn_desc_table {
    ($({$code:ident, $name:literal, $format:ident, $idx_ty:ident},)*) => {
        impl Instruction<'_> {
            const INSN_DESCRIPTORS: &'static [InstructionDescriptor] = &[
                $(InstructionDescriptor {
                    name: $name,
                    format: Format::$format,
                    index_type: IndexType::$idx_ty,
                    size_in_code_units: Instruction::code_size_in_code_units_by_opcode(Code::$code, Format::$format),
                    opcode: Code::$code,
                },)*
            ];
        }

        #[repr(u8)]
        #[allow(non_camel_case_types)]
        #[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
        pub enum Code {
            $($code,)*
        }
    };
}
insn_desc_table!(
 /* 0x00 */ {NOP, "nop", k10x, None},
 /* 0x01 */ {MOVE, "move", k12x, None},
 /* 0x02 */ {MOVE_FROM16, "move/from16", k22x, None},
 /* 0x03 */ {MOVE_16, "move/16", k32x, None},
 /* 0x04 */ {MOVE_WIDE, "move-wide", k12x, None},
 /* 0x05 */ {MOVE_WIDE_FROM16, "move-wide/from16", k22x, None},
 /* 0x06 */ {MOVE_WIDE_16, "move-wide/16", k32x, None},
 /* 0x07 */ {MOVE_OBJECT, "move-object", k12x, None},
 /* 0x08 */ {MOVE_OBJECT_FROM16, "move-object/from16", k22x, None},
 /* 0x09 */ {MOVE_OBJECT_16, "move-object/16", k32x, None},
 /* 0x0a */ {MOVE_RESULT, "move-result", k11x, None},
 /* 0x0b */ {MOVE_RESULT_WIDE, "move-result-wide", k11x, None},
 /* 0x0c */ {MOVE_RESULT_OBJECT, "move-result-object", k11x, None},
 /* 0x0d */ {MOVE_EXCEPTION, "move-exception", k11x, None},
 /* 0x0e */ {RETURN_VOID, "return-void", k10x, None},
 /* 0x0f */ {RETURN, "return", k11x, None},
 /* 0x10 */ {RETURN_WIDE, "return-wide", k11x, None},
 /* 0x11 */ {RETURN_OBJECT, "return-object", k11x, None},
 /* 0x12 */ {CONST_4, "const/4", k11n, None},
 /* 0x13 */ {CONST_16, "const/16", k21s, None},
 /* 0x14 */ {CONST, "const", k31i, None},
 /* 0x15 */ {CONST_HIGH16, "const/high16", k21h, None},
 /* 0x16 */ {CONST_WIDE_16, "const-wide/16", k21s, None},
 /* 0x17 */ {CONST_WIDE_32, "const-wide/32", k31i, None},
 /* 0x18 */ {CONST_WIDE, "const-wide", k51l, None},
 /* 0x19 */ {CONST_WIDE_HIGH16, "const-wide/high16", k21h, None},
 /* 0x1a */ {CONST_STRING, "const-string", k21c, StringRef},
 /* 0x1b */ {CONST_STRING_JUMBO, "const-string/jumbo", k31c, StringRef},
 /* 0x1c */ {CONST_CLASS, "const-class", k21c, TypeRef},
 /* 0x1d */ {MONITOR_ENTER, "monitor-enter", k11x, None},
 /* 0x1e */ {MONITOR_EXIT, "monitor-exit", k11x, None},
 /* 0x1f */ {CHECK_CAST, "check-cast", k21c, TypeRef},
 /* 0x20 */ {INSTANCE_OF, "instance-of", k22c, TypeRef},
 /* 0x21 */ {ARRAY_LENGTH, "array-length", k12x, None},
 /* 0x22 */ {NEW_INSTANCE, "new-instance", k21c, TypeRef},
 /* 0x23 */ {NEW_ARRAY, "new-array", k22c, TypeRef},
 /* 0x24 */ {FILLED_NEW_ARRAY, "filled-new-array", k35c, TypeRef},
 /* 0x25 */ {FILLED_NEW_ARRAY_RANGE, "filled-new-array/range", k3rc, TypeRef},
 /* 0x26 */ {FILL_ARRAY_DATA, "fill-array-data", k31t, None},
 /* 0x27 */ {THROW, "throw", k11x, None},
 /* 0x28 */ {GOTO, "goto", k10t, None},
 /* 0x29 */ {GOTO_16, "goto/16", k20t, None},
 /* 0x2a */ {GOTO_32, "goto/32", k30t, None},
 /* 0x2b */ {PACKED_SWITCH, "packed-switch", k31t, None},
 /* 0x2c */ {SPARSE_SWITCH, "sparse-switch", k31t, None},
 /* 0x2d */ {CMPL_FLOAT, "cmpl-float", k23x, None},
 /* 0x2e */ {CMPG_FLOAT, "cmpg-float", k23x, None},
 /* 0x2f */ {CMPL_DOUBLE, "cmpl-double", k23x, None},
 /* 0x30 */ {CMPG_DOUBLE, "cmpg-double", k23x, None},
 /* 0x31 */ {CMP_LONG, "cmp-long", k23x, None},
 /* 0x32 */ {IF_EQ, "if-eq", k22t, None},
 /* 0x33 */ {IF_NE, "if-ne", k22t, None},
 /* 0x34 */ {IF_LT, "if-lt", k22t, None},
 /* 0x35 */ {IF_GE, "if-ge", k22t, None},
 /* 0x36 */ {IF_GT, "if-gt", k22t, None},
 /* 0x37 */ {IF_LE, "if-le", k22t, None},
 /* 0x38 */ {IF_EQZ, "if-eqz", k21t, None},
 /* 0x39 */ {IF_NEZ, "if-nez", k21t, None},
 /* 0x3a */ {IF_LTZ, "if-ltz", k21t, None},
 /* 0x3b */ {IF_GEZ, "if-gez", k21t, None},
 /* 0x3c */ {IF_GTZ, "if-gtz", k21t, None},
 /* 0x3d */ {IF_LEZ, "if-lez", k21t, None},
 /* 0x3e */ {UNUSED_3E, "unused-3e", k10x, Unknown},
 /* 0x3f */ {UNUSED_3F, "unused-3f", k10x, Unknown},
 /* 0x40 */ {UNUSED_40, "unused-40", k10x, Unknown},
 /* 0x41 */ {UNUSED_41, "unused-41", k10x, Unknown},
 /* 0x42 */ {UNUSED_42, "unused-42", k10x, Unknown},
 /* 0x43 */ {UNUSED_43, "unused-43", k10x, Unknown},
 /* 0x44 */ {AGET, "aget", k23x, None},
 /* 0x45 */ {AGET_WIDE, "aget-wide", k23x, None},
 /* 0x46 */ {AGET_OBJECT, "aget-object", k23x, None},
 /* 0x47 */ {AGET_BOOLEAN, "aget-boolean", k23x, None},
 /* 0x48 */ {AGET_BYTE, "aget-byte", k23x, None},
 /* 0x49 */ {AGET_CHAR, "aget-char", k23x, None},
 /* 0x4a */ {AGET_SHORT, "aget-short", k23x, None},
 /* 0x4b */ {APUT, "aput", k23x, None},
 /* 0x4c */ {APUT_WIDE, "aput-wide", k23x, None},
 /* 0x4d */ {APUT_OBJECT, "aput-object", k23x, None},
 /* 0x4e */ {APUT_BOOLEAN, "aput-boolean", k23x, None},
 /* 0x4f */ {APUT_BYTE, "aput-byte", k23x, None},
 /* 0x50 */ {APUT_CHAR, "aput-char", k23x, None},
 /* 0x51 */ {APUT_SHORT, "aput-short", k23x, None},
 /* 0x52 */ {IGET, "iget", k22c, FieldRef},
 /* 0x53 */ {IGET_WIDE, "iget-wide", k22c, FieldRef},
 /* 0x54 */ {IGET_OBJECT, "iget-object", k22c, FieldRef},
 /* 0x55 */ {IGET_BOOLEAN, "iget-boolean", k22c, FieldRef},
 /* 0x56 */ {IGET_BYTE, "iget-byte", k22c, FieldRef},
 /* 0x57 */ {IGET_CHAR, "iget-char", k22c, FieldRef},
 /* 0x58 */ {IGET_SHORT, "iget-short", k22c, FieldRef},
 /* 0x59 */ {IPUT, "iput", k22c, FieldRef},
 /* 0x5a */ {IPUT_WIDE, "iput-wide", k22c, FieldRef},
 /* 0x5b */ {IPUT_OBJECT, "iput-object", k22c, FieldRef},
 /* 0x5c */ {IPUT_BOOLEAN, "iput-boolean", k22c, FieldRef},
 /* 0x5d */ {IPUT_BYTE, "iput-byte", k22c, FieldRef},
 /* 0x5e */ {IPUT_CHAR, "iput-char", k22c, FieldRef},
 /* 0x5f */ {IPUT_SHORT, "iput-short", k22c, FieldRef},
 /* 0x60 */ {SGET, "sget", k21c, FieldRef},
 /* 0x61 */ {SGET_WIDE, "sget-wide", k21c, FieldRef},
 /* 0x62 */ {SGET_OBJECT, "sget-object", k21c, FieldRef},
 /* 0x63 */ {SGET_BOOLEAN, "sget-boolean", k21c, FieldRef},
 /* 0x64 */ {SGET_BYTE, "sget-byte", k21c, FieldRef},
 /* 0x65 */ {SGET_CHAR, "sget-char", k21c, FieldRef},
 /* 0x66 */ {SGET_SHORT, "sget-short", k21c, FieldRef},
 /* 0x67 */ {SPUT, "sput", k21c, FieldRef},
 /* 0x68 */ {SPUT_WIDE, "sput-wide", k21c, FieldRef},
 /* 0x69 */ {SPUT_OBJECT, "sput-object", k21c, FieldRef},
 /* 0x6a */ {SPUT_BOOLEAN, "sput-boolean", k21c, FieldRef},
 /* 0x6b */ {SPUT_BYTE, "sput-byte", k21c, FieldRef},
 /* 0x6c */ {SPUT_CHAR, "sput-char", k21c, FieldRef},
 /* 0x6d */ {SPUT_SHORT, "sput-short", k21c, FieldRef},
 /* 0x6e */ {INVOKE_VIRTUAL, "invoke-virtual", k35c, MethodRef},
 /* 0x6f */ {INVOKE_SUPER, "invoke-super", k35c, MethodRef},
 /* 0x70 */ {INVOKE_DIRECT, "invoke-direct", k35c, MethodRef},
 /* 0x71 */ {INVOKE_STATIC, "invoke-static", k35c, MethodRef},
 /* 0x72 */ {INVOKE_INTERFACE, "invoke-interface", k35c, MethodRef},
 /* 0x73 */ {UNUSED_73, "unused-73", k10x, Unknown},
 /* 0x74 */ {INVOKE_VIRTUAL_RANGE, "invoke-virtual/range", k3rc, MethodRef},
 /* 0x75 */ {INVOKE_SUPER_RANGE, "invoke-super/range", k3rc, MethodRef},
 /* 0x76 */ {INVOKE_DIRECT_RANGE, "invoke-direct/range", k3rc, MethodRef},
 /* 0x77 */ {INVOKE_STATIC_RANGE, "invoke-static/range", k3rc, MethodRef},
 /* 0x78 */ {INVOKE_INTERFACE_RANGE, "invoke-interface/range", k3rc, MethodRef},
 /* 0x79 */ {UNUSED_79, "unused-79", k10x, Unknown},
 /* 0x7a */ {UNUSED_7A, "unused-7a", k10x, Unknown},
 /* 0x7b */ {NEG_INT, "neg-int", k12x, None},
 /* 0x7c */ {NOT_INT, "not-int", k12x, None},
 /* 0x7d */ {NEG_LONG, "neg-long", k12x, None},
 /* 0x7e */ {NOT_LONG, "not-long", k12x, None},
 /* 0x7f */ {NEG_FLOAT, "neg-float", k12x, None},
 /* 0x80 */ {NEG_DOUBLE, "neg-double", k12x, None},
 /* 0x81 */ {INT_TO_LONG, "int-to-long", k12x, None},
 /* 0x82 */ {INT_TO_FLOAT, "int-to-float", k12x, None},
 /* 0x83 */ {INT_TO_DOUBLE, "int-to-double", k12x, None},
 /* 0x84 */ {LONG_TO_INT, "long-to-int", k12x, None},
 /* 0x85 */ {LONG_TO_FLOAT, "long-to-float", k12x, None},
 /* 0x86 */ {LONG_TO_DOUBLE, "long-to-double", k12x, None},
 /* 0x87 */ {FLOAT_TO_INT, "float-to-int", k12x, None},
 /* 0x88 */ {FLOAT_TO_LONG, "float-to-long", k12x, None},
 /* 0x89 */ {FLOAT_TO_DOUBLE, "float-to-double", k12x, None},
 /* 0x8a */ {DOUBLE_TO_INT, "double-to-int", k12x, None},
 /* 0x8b */ {DOUBLE_TO_LONG, "double-to-long", k12x, None},
 /* 0x8c */ {DOUBLE_TO_FLOAT, "double-to-float", k12x, None},
 /* 0x8d */ {INT_TO_BYTE, "int-to-byte", k12x, None},
 /* 0x8e */ {INT_TO_CHAR, "int-to-char", k12x, None},
 /* 0x8f */ {INT_TO_SHORT, "int-to-short", k12x, None},
 /* 0x90 */ {ADD_INT, "add-int", k23x, None},
 /* 0x91 */ {SUB_INT, "sub-int", k23x, None},
 /* 0x92 */ {MUL_INT, "mul-int", k23x, None},
 /* 0x93 */ {DIV_INT, "div-int", k23x, None},
 /* 0x94 */ {REM_INT, "rem-int", k23x, None},
 /* 0x95 */ {AND_INT, "and-int", k23x, None},
 /* 0x96 */ {OR_INT, "or-int", k23x, None},
 /* 0x97 */ {XOR_INT, "xor-int", k23x, None},
 /* 0x98 */ {SHL_INT, "shl-int", k23x, None},
 /* 0x99 */ {SHR_INT, "shr-int", k23x, None},
 /* 0x9a */ {USHR_INT, "ushr-int", k23x, None},
 /* 0x9b */ {ADD_LONG, "add-long", k23x, None},
 /* 0x9c */ {SUB_LONG, "sub-long", k23x, None},
 /* 0x9d */ {MUL_LONG, "mul-long", k23x, None},
 /* 0x9e */ {DIV_LONG, "div-long", k23x, None},
 /* 0x9f */ {REM_LONG, "rem-long", k23x, None},
 /* 0xa0 */ {AND_LONG, "and-long", k23x, None},
 /* 0xa1 */ {OR_LONG, "or-long", k23x, None},
 /* 0xa2 */ {XOR_LONG, "xor-long", k23x, None},
 /* 0xa3 */ {SHL_LONG, "shl-long", k23x, None},
 /* 0xa4 */ {SHR_LONG, "shr-long", k23x, None},
 /* 0xa5 */ {USHR_LONG, "ushr-long", k23x, None},
 /* 0xa6 */ {ADD_FLOAT, "add-float", k23x, None},
 /* 0xa7 */ {SUB_FLOAT, "sub-float", k23x, None},
 /* 0xa8 */ {MUL_FLOAT, "mul-float", k23x, None},
 /* 0xa9 */ {DIV_FLOAT, "div-float", k23x, None},
 /* 0xaa */ {REM_FLOAT, "rem-float", k23x, None},
 /* 0xab */ {ADD_DOUBLE, "add-double", k23x, None},
 /* 0xac */ {SUB_DOUBLE, "sub-double", k23x, None},
 /* 0xad */ {MUL_DOUBLE, "mul-double", k23x, None},
 /* 0xae */ {DIV_DOUBLE, "div-double", k23x, None},
 /* 0xaf */ {REM_DOUBLE, "rem-double", k23x, None},
 /* 0xb0 */ {ADD_INT_2ADDR, "add-int/2addr", k12x, None},
 /* 0xb1 */ {SUB_INT_2ADDR, "sub-int/2addr", k12x, None},
 /* 0xb2 */ {MUL_INT_2ADDR, "mul-int/2addr", k12x, None},
 /* 0xb3 */ {DIV_INT_2ADDR, "div-int/2addr", k12x, None},
 /* 0xb4 */ {REM_INT_2ADDR, "rem-int/2addr", k12x, None},
 /* 0xb5 */ {AND_INT_2ADDR, "and-int/2addr", k12x, None},
 /* 0xb6 */ {OR_INT_2ADDR, "or-int/2addr", k12x, None},
 /* 0xb7 */ {XOR_INT_2ADDR, "xor-int/2addr", k12x, None},
 /* 0xb8 */ {SHL_INT_2ADDR, "shl-int/2addr", k12x, None},
 /* 0xb9 */ {SHR_INT_2ADDR, "shr-int/2addr", k12x, None},
 /* 0xba */ {USHR_INT_2ADDR, "ushr-int/2addr", k12x, None},
 /* 0xbb */ {ADD_LONG_2ADDR, "add-long/2addr", k12x, None},
 /* 0xbc */ {SUB_LONG_2ADDR, "sub-long/2addr", k12x, None},
 /* 0xbd */ {MUL_LONG_2ADDR, "mul-long/2addr", k12x, None},
 /* 0xbe */ {DIV_LONG_2ADDR, "div-long/2addr", k12x, None},
 /* 0xbf */ {REM_LONG_2ADDR, "rem-long/2addr", k12x, None},
 /* 0xc0 */ {AND_LONG_2ADDR, "and-long/2addr", k12x, None},
 /* 0xc1 */ {OR_LONG_2ADDR, "or-long/2addr", k12x, None},
 /* 0xc2 */ {XOR_LONG_2ADDR, "xor-long/2addr", k12x, None},
 /* 0xc3 */ {SHL_LONG_2ADDR, "shl-long/2addr", k12x, None},
 /* 0xc4 */ {SHR_LONG_2ADDR, "shr-long/2addr", k12x, None},
 /* 0xc5 */ {USHR_LONG_2ADDR, "ushr-long/2addr", k12x, None},
 /* 0xc6 */ {ADD_FLOAT_2ADDR, "add-float/2addr", k12x, None},
 /* 0xc7 */ {SUB_FLOAT_2ADDR, "sub-float/2addr", k12x, None},
 /* 0xc8 */ {MUL_FLOAT_2ADDR, "mul-float/2addr", k12x, None},
 /* 0xc9 */ {DIV_FLOAT_2ADDR, "div-float/2addr", k12x, None},
 /* 0xca */ {REM_FLOAT_2ADDR, "rem-float/2addr", k12x, None},
 /* 0xcb */ {ADD_DOUBLE_2ADDR, "add-double/2addr", k12x, None},
 /* 0xcc */ {SUB_DOUBLE_2ADDR, "sub-double/2addr", k12x, None},
 /* 0xcd */ {MUL_DOUBLE_2ADDR, "mul-double/2addr", k12x, None},
 /* 0xce */ {DIV_DOUBLE_2ADDR, "div-double/2addr", k12x, None},
 /* 0xcf */ {REM_DOUBLE_2ADDR, "rem-double/2addr", k12x, None},
 /* 0xd0 */ {ADD_INT_LIT16, "add-int/lit16", k22s, None},
 /* 0xd1 */ {RSUB_INT, "rsub-int", k22s, None},
 /* 0xd2 */ {MUL_INT_LIT16, "mul-int/lit16", k22s, None},
 /* 0xd3 */ {DIV_INT_LIT16, "div-int/lit16", k22s, None},
 /* 0xd4 */ {REM_INT_LIT16, "rem-int/lit16", k22s, None},
 /* 0xd5 */ {AND_INT_LIT16, "and-int/lit16", k22s, None},
 /* 0xd6 */ {OR_INT_LIT16, "or-int/lit16", k22s, None},
 /* 0xd7 */ {XOR_INT_LIT16, "xor-int/lit16", k22s, None},
 /* 0xd8 */ {ADD_INT_LIT8, "add-int/lit8", k22b, None},
 /* 0xd9 */ {RSUB_INT_LIT8, "rsub-int/lit8", k22b, None},
 /* 0xda */ {MUL_INT_LIT8, "mul-int/lit8", k22b, None},
 /* 0xdb */ {DIV_INT_LIT8, "div-int/lit8", k22b, None},
 /* 0xdc */ {REM_INT_LIT8, "rem-int/lit8", k22b, None},
 /* 0xdd */ {AND_INT_LIT8, "and-int/lit8", k22b, None},
 /* 0xde */ {OR_INT_LIT8, "or-int/lit8", k22b, None},
 /* 0xdf */ {XOR_INT_LIT8, "xor-int/lit8", k22b, None},
 /* 0xe0 */ {SHL_INT_LIT8, "shl-int/lit8", k22b, None},
 /* 0xe1 */ {SHR_INT_LIT8, "shr-int/lit8", k22b, None},
 /* 0xe2 */ {USHR_INT_LIT8, "ushr-int/lit8", k22b, None},
 /* 0xe3 */ {UNUSED_E3, "unused-e3", k10x, Unknown},
 /* 0xe4 */ {UNUSED_E4, "unused-e4", k10x, Unknown},
 /* 0xe5 */ {UNUSED_E5, "unused-e5", k10x, Unknown},
 /* 0xe6 */ {UNUSED_E6, "unused-e6", k10x, Unknown},
 /* 0xe7 */ {UNUSED_E7, "unused-e7", k10x, Unknown},
 /* 0xe8 */ {UNUSED_E8, "unused-e8", k10x, Unknown},
 /* 0xe9 */ {UNUSED_E9, "unused-e9", k10x, Unknown},
 /* 0xea */ {UNUSED_EA, "unused-ea", k10x, Unknown},
 /* 0xeb */ {UNUSED_EB, "unused-eb", k10x, Unknown},
 /* 0xec */ {UNUSED_EC, "unused-ec", k10x, Unknown},
 /* 0xed */ {UNUSED_ED, "unused-ed", k10x, Unknown},
 /* 0xee */ {UNUSED_EE, "unused-ee", k10x, Unknown},
 /* 0xef */ {UNUSED_EF, "unused-ef", k10x, Unknown},
 /* 0xf0 */ {UNUSED_F0, "unused-f0", k10x, Unknown},
 /* 0xf1 */ {UNUSED_F1, "unused-f1", k10x, Unknown},
 /* 0xf2 */ {UNUSED_F2, "unused-f2", k10x, Unknown},
 /* 0xf3 */ {UNUSED_F3, "unused-f3", k10x, Unknown},
 /* 0xf4 */ {UNUSED_F4, "unused-f4", k10x, Unknown},
 /* 0xf5 */ {UNUSED_F5, "unused-f5", k10x, Unknown},
 /* 0xf6 */ {UNUSED_F6, "unused-f6", k10x, Unknown},
 /* 0xf7 */ {UNUSED_F7, "unused-f7", k10x, Unknown},
 /* 0xf8 */ {UNUSED_F8, "unused-f8", k10x, Unknown},
 /* 0xf9 */ {UNUSED_F9, "unused-f9", k10x, Unknown},
 /* 0xfa */ {INVOKE_POLYMORPHIC, "invoke-polymorphic", k45cc, MethodAndProtoRef},
 /* 0xfb */ {INVOKE_POLYMORPHIC_RANGE, "invoke-polymorphic/range", k4rcc, MethodAndProtoRef},
 /* 0xfc */ {INVOKE_CUSTOM, "invoke-custom", k35c, CallSiteRef},
 /* 0xfd */ {INVOKE_CUSTOM_RANGE, "invoke-custom/range", k3rc, CallSiteRef},
 /* 0xfe */ {CONST_METHOD_HANDLE, "const-method-handle", k21c, MethodHandleRef},
 /* 0xff */ {CONST_METHOD_TYPE, "const-method-type", k21c, ProtoRef},
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widths_follow_format() {
        assert_eq!(Instruction::at(&[0x000e]).size_in_code_units(), 1); // return-void
        assert_eq!(Instruction::at(&[0x001a, 7]).size_in_code_units(), 2); // const-string
        assert_eq!(Instruction::at(&[0x0018, 0, 0, 0, 0]).size_in_code_units(), 5); // const-wide
    }

    #[test]
    fn payload_widths() {
        // packed-switch payload: ident, size=2, first_key, 2 targets
        let payload = [0x0100u16, 2, 0, 0, 1, 0, 2, 0];
        assert_eq!(Instruction::at(&payload).size_in_code_units(), 4 + 2 * 2);
        // array-data payload: ident, elem width 2, 3 elements
        let array = [0x0300u16, 2, 3, 0, 0, 0, 0];
        assert_eq!(Instruction::at(&array).size_in_code_units(), 4 + (2 * 3 + 1) / 2);
    }

    #[test]
    fn carried_index_extraction() {
        // const-string v0, string@7
        let inst = [0x001a, 7];
        let carried = Instruction::at(&inst).carried_index().unwrap();
        assert_eq!(carried, Some((IndexType::StringRef, 7)));
        // iget v1, v0, field@3 (22c carries the index in C)
        let iget = [0x0152, 3];
        let carried = Instruction::at(&iget).carried_index().unwrap();
        assert_eq!(carried, Some((IndexType::FieldRef, 3)));
        // return-void carries nothing
        assert_eq!(Instruction::at(&[0x000e]).carried_index().unwrap(), None);
    }

    #[test]
    fn safe_iterator_halts_on_overrun() {
        // const-wide needs five units but only one is present
        let code = [0x0018u16];
        let mut it = SafeDexInstructionIterator::new(&code);
        assert!(it.next().is_none());
        assert!(it.in_error_state());
    }
}
