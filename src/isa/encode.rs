//! Bit-exact 64-bit machine format.
//!
//! ```text
//! bits 63..56  opcode
//! bits 55..53  kind of operand 0   (imm=0 reg=1 direct=2 indirect=3 idx=4)
//! bits 52..50  kind of operand 1
//! bit  49      precision, 1 = high
//! low  precision: operand 0 in bits 47..24, operand 1 in bits 23..0
//! high precision: wide payload in bits 43..10, register payload in bits 9..0
//! ```
//!
//! Within a low slot, immediates and indexed offsets are 14-bit two's
//! complement and direct addresses 14-bit unsigned; register codes take 10
//! bits, and an indexed operand packs `code << 14 | offset`. The wide slot
//! carries 32-bit immediates/addresses or `code << 24 | 24-bit offset`. Low
//! precision is chosen whenever every operand fits; unused bits are
//! don't-care.

use super::{Arg, ArgKind, Arguments, Instruction, InstrKind, OperandSpec};

const OPCODE_SHIFT: u32 = 56;
const KIND0_SHIFT: u32 = 53;
const KIND1_SHIFT: u32 = 50;
const PRECISION_BIT: u32 = 49;
const LOW0_SHIFT: u32 = 24;
const WIDE_SHIFT: u32 = 10;
const LOW_MASK: u64 = (1 << 24) - 1;
const WIDE_MASK: u64 = (1 << 34) - 1;
const NARROW_MASK: u64 = (1 << 10) - 1;

fn fits_i14(val: i32) -> bool {
    (-(1 << 13)..1 << 13).contains(&val)
}

fn fits_i24(val: i32) -> bool {
    (-(1 << 23)..1 << 23).contains(&val)
}

/// Payload is a bare register code in both precisions.
fn reg_family(arg: &Arg) -> bool {
    matches!(arg, Arg::Reg(_) | Arg::Indirect(_))
}

fn reg_kind(kind: ArgKind) -> bool {
    matches!(kind, ArgKind::Reg | ArgKind::Indirect)
}

fn fits_low(arg: &Arg) -> bool {
    match arg {
        Arg::Imm(val) => fits_i14(*val as i32),
        Arg::Direct(addr) => *addr < 1 << 14,
        Arg::Reg(_) | Arg::Indirect(_) => true,
        Arg::Idx(_, offs) => fits_i14(*offs),
    }
}

fn low_payload(arg: &Arg) -> u64 {
    match arg {
        Arg::Imm(val) => (*val as u64) & 0x3FFF,
        Arg::Direct(addr) => *addr as u64,
        Arg::Reg(reg) | Arg::Indirect(reg) => reg.code() as u64,
        Arg::Idx(reg, offs) => ((reg.code() as u64) << 14) | ((*offs as u32 as u64) & 0x3FFF),
    }
}

fn wide_payload(arg: &Arg) -> Option<u64> {
    match arg {
        Arg::Imm(val) => Some(*val as u64),
        Arg::Direct(addr) => Some(*addr as u64),
        Arg::Reg(reg) | Arg::Indirect(reg) => Some(reg.code() as u64),
        Arg::Idx(reg, offs) => fits_i24(*offs)
            .then(|| ((reg.code() as u64) << 24) | ((*offs as u32 as u64) & 0xFF_FFFF)),
    }
}

/// Encode to the 64-bit machine format. Absent when an operand cannot be
/// represented even at high precision.
pub fn encode(instr: &Instruction) -> Option<u64> {
    let kind = instr.kind();
    let mut raw = (kind.opcode() as u64) << OPCODE_SHIFT;

    let (op0, op1) = match instr.args() {
        Arguments::None => (None, None),
        Arguments::Unary(arg) => (Some(arg), None),
        Arguments::Binary(lhs, rhs) if kind.reversed_operands() => (Some(rhs), Some(lhs)),
        Arguments::Binary(lhs, rhs) => (Some(lhs), Some(rhs)),
    };

    if let Some(arg) = &op0 {
        raw |= (arg.kind().code() as u64) << KIND0_SHIFT;
    }
    if let Some(arg) = &op1 {
        raw |= (arg.kind().code() as u64) << KIND1_SHIFT;
    }

    if op0.iter().chain(op1.iter()).all(fits_low) {
        if let Some(arg) = &op0 {
            raw |= low_payload(arg) << LOW0_SHIFT;
        }
        if let Some(arg) = &op1 {
            raw |= low_payload(arg);
        }
        return Some(raw);
    }

    raw |= 1 << PRECISION_BIT;
    match (&op0, &op1) {
        (Some(arg), None) => raw |= wide_payload(arg)? << WIDE_SHIFT,
        (Some(lhs), Some(rhs)) => {
            // Every binary instruction constrains at least one side to a
            // register-code payload, so a single wide slot suffices.
            let (wide, narrow) = if reg_family(rhs) { (lhs, rhs) } else { (rhs, lhs) };
            debug_assert!(reg_family(narrow));
            raw |= wide_payload(wide)? << WIDE_SHIFT;
            raw |= low_payload(narrow) & NARROW_MASK;
        }
        _ => unreachable!("high precision requires an operand"),
    }
    Some(raw)
}

/// Decode from the 64-bit machine format. Absent for unassigned opcodes,
/// malformed kind fields, unknown register codes, or operands outside the
/// instruction's declared modes.
pub fn decode(raw: u64) -> Option<Instruction> {
    let kind = InstrKind::from_opcode((raw >> OPCODE_SHIFT) as u8)?;
    let high = raw & (1 << PRECISION_BIT) != 0;
    let kind0 = ((raw >> KIND0_SHIFT) & 0b111) as u8;
    let kind1 = ((raw >> KIND1_SHIFT) & 0b111) as u8;

    let args = match kind.operand_spec() {
        OperandSpec::None => Arguments::None,
        OperandSpec::Unary(_) => {
            let k = ArgKind::from_code(kind0)?;
            let payload = if high {
                (raw >> WIDE_SHIFT) & WIDE_MASK
            } else {
                (raw >> LOW0_SHIFT) & LOW_MASK
            };
            Arguments::Unary(decode_arg(k, payload, high)?)
        }
        OperandSpec::Binary(..) => {
            let ka = ArgKind::from_code(kind0)?;
            let kb = ArgKind::from_code(kind1)?;
            let (a, b) = if high {
                let wide = (raw >> WIDE_SHIFT) & WIDE_MASK;
                let narrow = raw & NARROW_MASK;
                if reg_kind(kb) {
                    (decode_arg(ka, wide, true)?, decode_arg(kb, narrow, true)?)
                } else {
                    (decode_arg(ka, narrow, true)?, decode_arg(kb, wide, true)?)
                }
            } else {
                (
                    decode_arg(ka, (raw >> LOW0_SHIFT) & LOW_MASK, false)?,
                    decode_arg(kb, raw & LOW_MASK, false)?,
                )
            };
            if kind.reversed_operands() {
                Arguments::Binary(b, a)
            } else {
                Arguments::Binary(a, b)
            }
        }
    };

    Instruction::new(kind, args)
}

fn decode_arg(kind: ArgKind, payload: u64, high: bool) -> Option<Arg> {
    let arg = match kind {
        ArgKind::Imm if high => Arg::Imm(payload as u32),
        ArgKind::Imm => Arg::Imm(s_ext(payload, 14) as u32),
        ArgKind::Reg => Arg::Reg(reg(payload)?),
        ArgKind::Indirect => Arg::Indirect(reg(payload)?),
        ArgKind::Direct if high => Arg::Direct(payload as u32),
        ArgKind::Direct => Arg::Direct((payload & 0x3FFF) as u32),
        ArgKind::Idx => {
            let (code, offs) = if high {
                (payload >> 24, s_ext(payload, 24))
            } else {
                (payload >> 14, s_ext(payload, 14))
            };
            Arg::Idx(reg(code)?, offs)
        }
    };
    Some(arg)
}

fn reg(payload: u64) -> Option<super::Reg> {
    u8::try_from(payload & NARROW_MASK).ok().and_then(super::Reg::from_code)
}

fn s_ext(val: u64, bits: u32) -> i32 {
    let val = (val & ((1u64 << bits) - 1)) as u32;
    if val & (1 << (bits - 1)) == 0 {
        val as i32
    } else {
        (val | !((1u32 << bits) - 1)) as i32
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::isa::Reg;

    fn instr(kind: InstrKind, args: Arguments) -> Instruction {
        Instruction::new(kind, args).unwrap()
    }

    #[test]
    fn small_operands_use_low_precision() {
        let raw = instr(
            InstrKind::Add,
            Arguments::Binary(Arg::Imm(3), Arg::Reg(Reg::A)),
        )
        .encode()
        .unwrap();
        assert_eq!(raw >> OPCODE_SHIFT, 0);
        assert_eq!((raw >> KIND0_SHIFT) & 0b111, 0);
        assert_eq!((raw >> KIND1_SHIFT) & 0b111, 1);
        assert_eq!(raw & (1 << PRECISION_BIT), 0);
        assert_eq!((raw >> LOW0_SHIFT) & LOW_MASK, 3);
        assert_eq!(raw & LOW_MASK, 1);
    }

    #[test]
    fn negative_immediate_is_sign_extended() {
        let i = instr(
            InstrKind::Add,
            Arguments::Binary(Arg::Imm(-1i32 as u32), Arg::Reg(Reg::B)),
        );
        let raw = i.encode().unwrap();
        // -1 still fits the 14-bit low slot
        assert_eq!(raw & (1 << PRECISION_BIT), 0);
        assert_eq!(Instruction::decode(raw), Some(i));
    }

    #[test]
    fn wide_operand_selects_high_precision() {
        let i = instr(
            InstrKind::Ld,
            Arguments::Binary(Arg::Imm(100_000), Arg::Reg(Reg::A)),
        );
        let raw = i.encode().unwrap();
        assert_ne!(raw & (1 << PRECISION_BIT), 0);
        assert_eq!((raw >> WIDE_SHIFT) & WIDE_MASK, 100_000);
        assert_eq!(raw & NARROW_MASK, 1);
        assert_eq!(Instruction::decode(raw), Some(i));
    }

    #[test]
    fn wide_slot_follows_the_memory_operand() {
        // st places its register first; the wide payload must still carry
        // the direct address
        let i = instr(
            InstrKind::St,
            Arguments::Binary(Arg::Reg(Reg::B), Arg::Direct(20_000)),
        );
        let raw = i.encode().unwrap();
        assert_ne!(raw & (1 << PRECISION_BIT), 0);
        assert_eq!((raw >> WIDE_SHIFT) & WIDE_MASK, 20_000);
        assert_eq!(raw & NARROW_MASK, 2);
        assert_eq!(Instruction::decode(raw), Some(i));
    }

    #[test]
    fn indexed_offset_packs_code_and_offset() {
        let i = instr(
            InstrKind::Ld,
            Arguments::Binary(Arg::Idx(Reg::B, -2), Arg::Reg(Reg::A)),
        );
        let raw = i.encode().unwrap();
        assert_eq!(raw & (1 << PRECISION_BIT), 0);
        let payload = (raw >> LOW0_SHIFT) & LOW_MASK;
        assert_eq!(payload >> 14, 2);
        assert_eq!(payload & 0x3FFF, 0x3FFE);
        assert_eq!(Instruction::decode(raw), Some(i));
    }

    #[test]
    fn indexed_offset_beyond_24_bits_fails() {
        let i = instr(
            InstrKind::Ld,
            Arguments::Binary(Arg::Idx(Reg::B, 1 << 23), Arg::Reg(Reg::A)),
        );
        assert_eq!(i.encode(), None);
        let i = instr(
            InstrKind::Ld,
            Arguments::Binary(Arg::Idx(Reg::B, 1 << 20), Arg::Reg(Reg::A)),
        );
        assert!(i.encode().is_some());
    }

    #[test]
    fn round_trip_all_modes() {
        let cases = [
            instr(InstrKind::Nop, Arguments::None),
            instr(InstrKind::Reset, Arguments::None),
            instr(InstrKind::Rti, Arguments::None),
            instr(InstrKind::Jmp, Arguments::Unary(Arg::Imm(500))),
            instr(InstrKind::Jeq, Arguments::Unary(Arg::Direct(9_999))),
            instr(InstrKind::Call, Arguments::Unary(Arg::Indirect(Reg::Sp))),
            instr(InstrKind::Not, Arguments::Unary(Arg::Reg(Reg::B))),
            instr(InstrKind::Push, Arguments::Unary(Arg::Imm(0xFFFF_FFFF))),
            instr(InstrKind::Pop, Arguments::Unary(Arg::Reg(Reg::A))),
            instr(
                InstrKind::Sub,
                Arguments::Binary(Arg::Imm(1), Arg::Reg(Reg::A)),
            ),
            instr(
                InstrKind::Fas,
                Arguments::Binary(Arg::Direct(300), Arg::Reg(Reg::A)),
            ),
            instr(
                InstrKind::Swap,
                Arguments::Binary(Arg::Indirect(Reg::B), Arg::Reg(Reg::A)),
            ),
            instr(
                InstrKind::St,
                Arguments::Binary(Arg::Reg(Reg::A), Arg::Idx(Reg::Sp, 8_200)),
            ),
            instr(
                InstrKind::Xor,
                Arguments::Binary(Arg::Imm(0xDEAD_BEEF), Arg::Reg(Reg::B)),
            ),
        ];
        for case in cases {
            let raw = case.encode().unwrap();
            assert_eq!(Instruction::decode(raw), Some(case), "{case}");
        }
    }

    #[test]
    fn decoder_output_reencodes_identically() {
        let raws = [
            instr(InstrKind::Jmp, Arguments::Unary(Arg::Imm(500)))
                .encode()
                .unwrap(),
            instr(
                InstrKind::Ld,
                Arguments::Binary(Arg::Idx(Reg::B, 70_000), Arg::Reg(Reg::A)),
            )
            .encode()
            .unwrap(),
        ];
        for raw in raws {
            assert_eq!(Instruction::decode(raw).unwrap().encode(), Some(raw));
        }
    }

    #[test]
    fn invalid_words_fail_to_decode() {
        // opcode 0 with two immediate kind fields: add requires a register rhs
        assert_eq!(Instruction::decode(0), None);
        // reserved opcode 17
        assert_eq!(Instruction::decode(17 << OPCODE_SHIFT), None);
        assert_eq!(Instruction::decode(0xFF << OPCODE_SHIFT), None);
        // unknown register code in the rhs slot
        let raw = (0u64 << OPCODE_SHIFT) | (1 << KIND1_SHIFT) | (42 << LOW0_SHIFT) | 0x3FF;
        assert_eq!(Instruction::decode(raw), None);
        // malformed kind field
        let raw = (6u64 << OPCODE_SHIFT) | (7 << KIND0_SHIFT);
        assert_eq!(Instruction::decode(raw), None);
    }

    #[test]
    fn argless_instructions_ignore_leftover_bits() {
        let raw = (14u64 << OPCODE_SHIFT) | 0xDEAD_BEEF;
        assert_eq!(
            Instruction::decode(raw),
            Some(instr(InstrKind::Nop, Arguments::None))
        );
    }
}
