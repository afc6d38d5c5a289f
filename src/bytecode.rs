use std::fmt::Display;

use crate::vm::Value;

/// Registers addressable by one function window (8-bit operands).
pub const MAX_REGISTERS: usize = 256;
/// Constants addressable by one function (16-bit operands).
pub const MAX_CONSTANTS: usize = 65536;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    LoadK,
    LoadBool,
    LoadNil,
    Move,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Neg,
    Eq,
    Lt,
    Le,
    Ne,
    And,
    Or,
    Not,
    Jmp,
    JmpIf,
    JmpIfNot,
    Call,
    Return,
    GetGlobal,
    SetGlobal,
    NewArray,
    GetElem,
    SetElem,
    Append,
    Len,
    Print,
    Halt,
    Sentinel,
}

impl From<OpCode> for u8 {
    fn from(value: OpCode) -> u8 {
        value as u8
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "Invalid byte {0} found when expecting OpCode value between 0 and {}",
    OpCode::Sentinel as u8
)]
pub struct OpCodeFromU8Error(u8);

impl TryFrom<u8> for OpCode {
    type Error = OpCodeFromU8Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if value < OpCode::Sentinel as u8 {
            Ok(unsafe { std::mem::transmute::<u8, OpCode>(value) })
        } else {
            Err(OpCodeFromU8Error(value))
        }
    }
}

enum Format {
    Abc,
    Abx,
    AsBx,
}

impl OpCode {
    fn format(self) -> Format {
        match self {
            OpCode::LoadK | OpCode::GetGlobal | OpCode::SetGlobal => Format::Abx,
            OpCode::Jmp | OpCode::JmpIf | OpCode::JmpIfNot => Format::AsBx,
            _ => Format::Abc,
        }
    }

    fn name(self) -> &'static str {
        match self {
            OpCode::LoadK => "LOADK",
            OpCode::LoadBool => "LOADBOOL",
            OpCode::LoadNil => "LOADNIL",
            OpCode::Move => "MOVE",
            OpCode::Add => "ADD",
            OpCode::Sub => "SUB",
            OpCode::Mul => "MUL",
            OpCode::Div => "DIV",
            OpCode::Mod => "MOD",
            OpCode::Pow => "POW",
            OpCode::Neg => "NEG",
            OpCode::Eq => "EQ",
            OpCode::Lt => "LT",
            OpCode::Le => "LE",
            OpCode::Ne => "NE",
            OpCode::And => "AND",
            OpCode::Or => "OR",
            OpCode::Not => "NOT",
            OpCode::Jmp => "JMP",
            OpCode::JmpIf => "JMPIF",
            OpCode::JmpIfNot => "JMPIFNOT",
            OpCode::Call => "CALL",
            OpCode::Return => "RETURN",
            OpCode::GetGlobal => "GETGLOBAL",
            OpCode::SetGlobal => "SETGLOBAL",
            OpCode::NewArray => "NEWARRAY",
            OpCode::GetElem => "GETELEM",
            OpCode::SetElem => "SETELEM",
            OpCode::Append => "APPEND",
            OpCode::Len => "LEN",
            OpCode::Print => "PRINT",
            OpCode::Halt => "HALT",
            OpCode::Sentinel => "SENTINEL",
        }
    }
}

impl Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One 32-bit instruction, either `[op:8][a:8][b:8][c:8]` or
/// `[op:8][a:8][bx:16]`. Jumps read `bx` as a signed offset relative to the
/// following instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction(u32);

impl Instruction {
    pub fn abc(op: OpCode, a: u8, b: u8, c: u8) -> Self {
        Self((op as u32) << 24 | (a as u32) << 16 | (b as u32) << 8 | c as u32)
    }

    pub fn abx(op: OpCode, a: u8, bx: u16) -> Self {
        Self((op as u32) << 24 | (a as u32) << 16 | bx as u32)
    }

    pub fn asbx(op: OpCode, a: u8, sbx: i16) -> Self {
        Self::abx(op, a, sbx as u16)
    }

    pub fn with_sbx(self, sbx: i16) -> Self {
        Self(self.0 & 0xFFFF_0000 | sbx as u16 as u32)
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn op(self) -> Result<OpCode, OpCodeFromU8Error> {
        OpCode::try_from((self.0 >> 24) as u8)
    }

    pub fn a(self) -> u8 {
        (self.0 >> 16) as u8
    }

    pub fn b(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub fn c(self) -> u8 {
        self.0 as u8
    }

    pub fn bx(self) -> u16 {
        self.0 as u16
    }

    pub fn sbx(self) -> i16 {
        self.bx() as i16
    }
}

impl From<u32> for Instruction {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Ok(op) = self.op() else {
            return write!(f, "{:<10} {:#010x}", "INVALID", self.0);
        };
        match op.format() {
            Format::Abc => write!(f, "{:<10} {:3} {:3} {:3}", op, self.a(), self.b(), self.c()),
            Format::Abx => write!(f, "{:<10} {:3} {:7}", op, self.a(), self.bx()),
            Format::AsBx => write!(f, "{:<10} {:3} {:+7}", op, self.a(), self.sbx()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FunctionProto {
    pub name: String,
    pub arity: usize,
    pub constants: Vec<Value>,
    pub code: Vec<Instruction>,
    pub lines: Vec<usize>,
    pub max_registers: usize,
}

impl FunctionProto {
    pub fn new(name: impl Into<String>, arity: usize) -> Self {
        Self {
            name: name.into(),
            arity,
            constants: Vec::new(),
            code: Vec::new(),
            lines: Vec::new(),
            max_registers: arity,
        }
    }

    pub fn add_instruction(&mut self, instruction: Instruction, line: usize) -> usize {
        self.code.push(instruction);
        self.lines.push(line);
        self.code.len() - 1
    }

    /// Returns the index of an equal constant of the same type, or appends
    /// a new one. `None` once the pool is full.
    pub fn add_constant(&mut self, value: Value) -> Option<u16> {
        if let Some(index) = self.constants.iter().position(|c| c == &value) {
            return u16::try_from(index).ok();
        }
        if self.constants.len() >= MAX_CONSTANTS {
            return None;
        }
        self.constants.push(value);
        u16::try_from(self.constants.len() - 1).ok()
    }

    pub fn constant(&self, index: u16) -> Option<&Value> {
        self.constants.get(index as usize)
    }

    pub fn line(&self, offset: usize) -> usize {
        self.lines.get(offset).copied().unwrap_or(0)
    }

    pub fn disassemble_instruction(&self, offset: usize) -> String {
        let Some(instruction) = self.code.get(offset) else {
            return format!("{:04} <end>", offset);
        };

        let line = if offset > 0 && self.line(offset) == self.line(offset - 1) {
            "   |".to_string()
        } else {
            format!("{:4}", self.line(offset))
        };

        let mut text = format!("{:04} {} {}", offset, line, instruction);
        match instruction.op() {
            Ok(OpCode::LoadK | OpCode::GetGlobal | OpCode::SetGlobal) => {
                if let Some(constant) = self.constant(instruction.bx()) {
                    text.push_str(&format!(" '{}'", constant));
                }
            }
            Ok(OpCode::Jmp | OpCode::JmpIf | OpCode::JmpIfNot) => {
                let target = (offset as i64) + 1 + instruction.sbx() as i64;
                text.push_str(&format!(" -> {:04}", target));
            }
            _ => {}
        }
        text
    }
}

impl Display for FunctionProto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "== {} (arity {}, {} registers) ==",
            self.name, self.arity, self.max_registers
        )?;
        for (index, constant) in self.constants.iter().enumerate() {
            writeln!(f, "  K{:<5} {}", index, constant)?;
        }
        for offset in 0..self.code.len() {
            writeln!(f, "{}", self.disassemble_instruction(offset))?;
        }
        Ok(())
    }
}

/// Every compiled function of one program; index 0 is the top-level body.
#[derive(Debug, Clone, Default)]
pub struct CompiledProgram {
    pub functions: Vec<FunctionProto>,
}

impl CompiledProgram {
    pub fn main(&self) -> Option<&FunctionProto> {
        self.functions.first()
    }
}

impl Display for CompiledProgram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for function in &self.functions {
            write!(f, "{}", function)?;
        }
        Ok(())
    }
}
