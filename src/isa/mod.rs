//! Data model shared by the assembler and the simulator: words, registers,
//! status flags, addressing modes and the instruction set.

use std::fmt::{self, Display};

use fxhash::FxHashMap;
use lazy_static::lazy_static;

pub mod encode;

/// The architecture word. All arithmetic wraps mod 2^32; signed operations
/// reinterpret the same bits as two's-complement i32.
pub type Word = u32;

/// Machine registers of the standard variation.
///
/// Codes are distinct, non-zero, and double as the word offset of each
/// register in the register-file layout.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Reg {
    A,
    B,
    /// Program counter
    Pc,
    /// Stack pointer
    Sp,
    /// Status register; writable in supervisor mode only
    Sr,
}

impl Reg {
    pub const ALL: [Reg; 5] = [Reg::A, Reg::B, Reg::Pc, Reg::Sp, Reg::Sr];

    pub fn code(self) -> u8 {
        match self {
            Reg::A => 1,
            Reg::B => 2,
            Reg::Pc => 3,
            Reg::Sp => 4,
            Reg::Sr => 5,
        }
    }

    pub fn from_code(code: u8) -> Option<Reg> {
        match code {
            1 => Some(Reg::A),
            2 => Some(Reg::B),
            3 => Some(Reg::Pc),
            4 => Some(Reg::Sp),
            5 => Some(Reg::Sr),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Reg::A => "a",
            Reg::B => "b",
            Reg::Pc => "pc",
            Reg::Sp => "sp",
            Reg::Sr => "sr",
        }
    }

    pub fn from_name(name: &str) -> Option<Reg> {
        match name {
            "a" => Some(Reg::A),
            "b" => Some(Reg::B),
            "pc" => Some(Reg::Pc),
            "sp" => Some(Reg::Sp),
            "sr" => Some(Reg::Sr),
            _ => None,
        }
    }

    /// Only supervisor code may write this register.
    pub fn write_protected(self) -> bool {
        matches!(self, Reg::Sr)
    }

    /// No register is read-protected in the standard variation.
    pub fn read_protected(self) -> bool {
        false
    }
}

impl Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.name())
    }
}

/// Bit positions within the status register.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StatusFlag {
    Carry,
    Zero,
    Negative,
    Overflow,
    InterruptEnable,
    Supervisor,
}

impl StatusFlag {
    pub fn mask(self) -> Word {
        match self {
            StatusFlag::Carry => 1 << 0,
            StatusFlag::Zero => 1 << 1,
            StatusFlag::Negative => 1 << 2,
            StatusFlag::Overflow => 1 << 3,
            StatusFlag::InterruptEnable => 1 << 8,
            StatusFlag::Supervisor => 1 << 9,
        }
    }
}

/// How an operand names a value.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Arg {
    /// Literal value
    Imm(Word),
    /// Register contents
    Reg(Reg),
    /// Absolute memory address
    Direct(Word),
    /// Register holding an address
    Indirect(Reg),
    /// Register plus signed offset
    Idx(Reg, i32),
}

impl Arg {
    pub fn kind(&self) -> ArgKind {
        match self {
            Arg::Imm(_) => ArgKind::Imm,
            Arg::Reg(_) => ArgKind::Reg,
            Arg::Direct(_) => ArgKind::Direct,
            Arg::Indirect(_) => ArgKind::Indirect,
            Arg::Idx(..) => ArgKind::Idx,
        }
    }
}

impl Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Imm(val) => write!(f, "{}", *val as i32),
            Arg::Reg(reg) => write!(f, "{reg}"),
            Arg::Direct(addr) => write!(f, "[{addr}]"),
            Arg::Indirect(reg) => write!(f, "[{reg}]"),
            Arg::Idx(reg, offs) if *offs < 0 => write!(f, "[{reg} - {}]", -(*offs as i64)),
            Arg::Idx(reg, offs) => write!(f, "[{reg} + {offs}]"),
        }
    }
}

/// Kind code of an operand as stored in the binary encoding.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ArgKind {
    Imm = 0,
    Reg = 1,
    Direct = 2,
    Indirect = 3,
    Idx = 4,
}

impl ArgKind {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<ArgKind> {
        match code {
            0 => Some(ArgKind::Imm),
            1 => Some(ArgKind::Reg),
            2 => Some(ArgKind::Direct),
            3 => Some(ArgKind::Indirect),
            4 => Some(ArgKind::Idx),
            _ => None,
        }
    }
}

/// Set of addressing modes acceptable at one operand position.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ModeSet(u8);

impl ModeSet {
    pub const IMM: ModeSet = ModeSet(1 << ArgKind::Imm as u8);
    pub const REG: ModeSet = ModeSet(1 << ArgKind::Reg as u8);
    pub const DIR: ModeSet = ModeSet(1 << ArgKind::Direct as u8);
    pub const IND: ModeSet = ModeSet(1 << ArgKind::Indirect as u8);
    pub const IDX: ModeSet = ModeSet(1 << ArgKind::Idx as u8);
    /// Any memory-naming mode
    pub const MEM: ModeSet = Self::DIR.or(Self::IND).or(Self::IDX);
    pub const ALL: ModeSet = Self::IMM.or(Self::REG).or(Self::MEM);

    pub const fn or(self, other: ModeSet) -> ModeSet {
        ModeSet(self.0 | other.0)
    }

    pub fn contains(self, kind: ArgKind) -> bool {
        self.0 & (1 << kind as u8) != 0
    }
}

/// Declared operand arity and acceptable modes per position.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum OperandSpec {
    None,
    Unary(ModeSet),
    Binary(ModeSet, ModeSet),
}

/// Per-instruction operand storage.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Arguments {
    None,
    Unary(Arg),
    Binary(Arg, Arg),
}

/// The closed set of instruction mnemonics. Opcode 17 and the in/out
/// instructions are reserved and unassigned.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum InstrKind {
    Add,
    And,
    Call,
    Cmp,
    Div,
    Fas,
    Jmp,
    Jeq,
    Jne,
    Jle,
    Jlt,
    Jge,
    Jgt,
    Ld,
    Nop,
    Not,
    Or,
    Pop,
    Push,
    Reset,
    Rti,
    Rtn,
    Shl,
    Shr,
    St,
    Sub,
    Swap,
    Trap,
    Xor,
}

impl InstrKind {
    pub const ALL: [InstrKind; 29] = [
        InstrKind::Add,
        InstrKind::And,
        InstrKind::Call,
        InstrKind::Cmp,
        InstrKind::Div,
        InstrKind::Fas,
        InstrKind::Jmp,
        InstrKind::Jeq,
        InstrKind::Jne,
        InstrKind::Jle,
        InstrKind::Jlt,
        InstrKind::Jge,
        InstrKind::Jgt,
        InstrKind::Ld,
        InstrKind::Nop,
        InstrKind::Not,
        InstrKind::Or,
        InstrKind::Pop,
        InstrKind::Push,
        InstrKind::Reset,
        InstrKind::Rti,
        InstrKind::Rtn,
        InstrKind::Shl,
        InstrKind::Shr,
        InstrKind::St,
        InstrKind::Sub,
        InstrKind::Swap,
        InstrKind::Trap,
        InstrKind::Xor,
    ];

    pub fn opcode(self) -> u8 {
        match self {
            InstrKind::Add => 0,
            InstrKind::And => 1,
            InstrKind::Call => 2,
            InstrKind::Cmp => 3,
            InstrKind::Div => 4,
            InstrKind::Fas => 5,
            InstrKind::Jmp => 6,
            InstrKind::Jeq => 7,
            InstrKind::Jne => 8,
            InstrKind::Jle => 9,
            InstrKind::Jlt => 10,
            InstrKind::Jge => 11,
            InstrKind::Jgt => 12,
            InstrKind::Ld => 13,
            InstrKind::Nop => 14,
            InstrKind::Not => 15,
            InstrKind::Or => 16,
            InstrKind::Pop => 18,
            InstrKind::Push => 19,
            InstrKind::Reset => 20,
            InstrKind::Rti => 21,
            InstrKind::Rtn => 22,
            InstrKind::Shl => 23,
            InstrKind::Shr => 24,
            InstrKind::St => 25,
            InstrKind::Sub => 26,
            InstrKind::Swap => 27,
            InstrKind::Trap => 28,
            InstrKind::Xor => 29,
        }
    }

    pub fn from_opcode(opcode: u8) -> Option<InstrKind> {
        OPCODES.get(&opcode).copied()
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            InstrKind::Add => "add",
            InstrKind::And => "and",
            InstrKind::Call => "call",
            InstrKind::Cmp => "cmp",
            InstrKind::Div => "div",
            InstrKind::Fas => "fas",
            InstrKind::Jmp => "jmp",
            InstrKind::Jeq => "jeq",
            InstrKind::Jne => "jne",
            InstrKind::Jle => "jle",
            InstrKind::Jlt => "jlt",
            InstrKind::Jge => "jge",
            InstrKind::Jgt => "jgt",
            InstrKind::Ld => "ld",
            InstrKind::Nop => "nop",
            InstrKind::Not => "not",
            InstrKind::Or => "or",
            InstrKind::Pop => "pop",
            InstrKind::Push => "push",
            InstrKind::Reset => "reset",
            InstrKind::Rti => "rti",
            InstrKind::Rtn => "rtn",
            InstrKind::Shl => "shl",
            InstrKind::Shr => "shr",
            InstrKind::St => "st",
            InstrKind::Sub => "sub",
            InstrKind::Swap => "swap",
            InstrKind::Trap => "trap",
            InstrKind::Xor => "xor",
        }
    }

    pub fn from_mnemonic(name: &str) -> Option<InstrKind> {
        MNEMONICS.get(name).copied()
    }

    /// Executable in supervisor mode only.
    pub fn is_privileged(self) -> bool {
        matches!(self, InstrKind::Rti)
    }

    /// Swaps the two operand payloads in the machine encoding. Reserved for
    /// future instructions; nothing sets it today.
    pub fn reversed_operands(self) -> bool {
        false
    }

    pub fn operand_spec(self) -> OperandSpec {
        use OperandSpec::*;
        match self {
            InstrKind::Add
            | InstrKind::And
            | InstrKind::Cmp
            | InstrKind::Div
            | InstrKind::Ld
            | InstrKind::Or
            | InstrKind::Shl
            | InstrKind::Shr
            | InstrKind::Sub
            | InstrKind::Xor => Binary(ModeSet::ALL, ModeSet::REG),
            InstrKind::Fas => Binary(ModeSet::MEM, ModeSet::REG),
            InstrKind::St => Binary(ModeSet::REG, ModeSet::MEM),
            InstrKind::Swap => Binary(ModeSet::REG.or(ModeSet::MEM), ModeSet::REG),
            InstrKind::Call
            | InstrKind::Jmp
            | InstrKind::Jeq
            | InstrKind::Jne
            | InstrKind::Jle
            | InstrKind::Jlt
            | InstrKind::Jge
            | InstrKind::Jgt => Unary(ModeSet::ALL),
            InstrKind::Not | InstrKind::Pop => Unary(ModeSet::REG),
            InstrKind::Push => Unary(ModeSet::IMM.or(ModeSet::REG)),
            InstrKind::Nop
            | InstrKind::Reset
            | InstrKind::Rti
            | InstrKind::Rtn
            | InstrKind::Trap => None,
        }
    }
}

lazy_static! {
    static ref OPCODES: FxHashMap<u8, InstrKind> = InstrKind::ALL
        .iter()
        .map(|kind| (kind.opcode(), *kind))
        .collect();
    static ref MNEMONICS: FxHashMap<&'static str, InstrKind> = InstrKind::ALL
        .iter()
        .map(|kind| (kind.mnemonic(), *kind))
        .collect();
}

/// One decoded machine instruction. Construction checks the operands against
/// the declared arity and mode sets, so a held value is always well-formed.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Instruction {
    kind: InstrKind,
    args: Arguments,
}

impl Instruction {
    pub fn new(kind: InstrKind, args: Arguments) -> Option<Instruction> {
        let valid = match (kind.operand_spec(), &args) {
            (OperandSpec::None, Arguments::None) => true,
            (OperandSpec::Unary(modes), Arguments::Unary(arg)) => modes.contains(arg.kind()),
            (OperandSpec::Binary(lhs, rhs), Arguments::Binary(a, b)) => {
                lhs.contains(a.kind()) && rhs.contains(b.kind())
            }
            _ => false,
        };
        valid.then_some(Instruction { kind, args })
    }

    pub fn kind(&self) -> InstrKind {
        self.kind
    }

    pub fn args(&self) -> Arguments {
        self.args
    }

    pub fn encode(&self) -> Option<u64> {
        encode::encode(self)
    }

    pub fn decode(raw: u64) -> Option<Instruction> {
        encode::decode(raw)
    }
}

impl Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind.mnemonic())?;
        match &self.args {
            Arguments::None => Ok(()),
            Arguments::Unary(arg) => write!(f, " {arg}"),
            Arguments::Binary(lhs, rhs) => write!(f, " {lhs}, {rhs}"),
        }
    }
}
