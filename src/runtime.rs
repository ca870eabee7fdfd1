//! Execution engine: registers, memory, flag semantics, exception vectoring
//! and the decoded-instruction cache.

use std::fmt;

use miette::{miette, Result};

use crate::isa::{Arg, Arguments, Instruction, InstrKind, Reg, StatusFlag, Word};
use crate::program::Image;

/// Words of memory in the standard variation.
pub const MEMORY_SIZE: usize = 10_000;
/// Exception save area
pub const SAVED_PC_ADDR: Word = 100;
pub const SAVED_SR_ADDR: Word = 101;
pub const EVENT_CODE_ADDR: Word = 102;
/// Exception vector entry point
pub const EXCEPTION_VECTOR: Word = 200;

/// Exceptions raised by instruction execution, serviced through the
/// exception vector.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Exception {
    HardwareInterrupt,
    DivisionByZero,
    InvalidInstruction,
    PrivilegedInstruction,
    Trap,
    InvalidMemoryAccess,
}

impl Exception {
    /// Event code stored in the save area during service.
    pub fn code(self) -> Word {
        match self {
            Exception::HardwareInterrupt => 0,
            Exception::DivisionByZero => 1,
            Exception::InvalidInstruction => 2,
            Exception::PrivilegedInstruction => 3,
            Exception::Trap => 4,
            Exception::InvalidMemoryAccess => 5,
        }
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exception::HardwareInterrupt => write!(f, "hardware interrupt"),
            Exception::DivisionByZero => write!(f, "division by zero"),
            Exception::InvalidInstruction => write!(f, "invalid instruction"),
            Exception::PrivilegedInstruction => write!(f, "privileged instruction"),
            Exception::Trap => write!(f, "trap"),
            Exception::InvalidMemoryAccess => write!(f, "invalid memory access"),
        }
    }
}

impl std::error::Error for Exception {}

/// Flat word-addressed memory, bounds-checked on every access.
pub struct Memory {
    cells: Vec<Word>,
}

impl Memory {
    fn new() -> Self {
        Memory {
            cells: vec![0; MEMORY_SIZE],
        }
    }

    pub fn read(&self, addr: Word) -> Result<Word, Exception> {
        self.cells
            .get(addr as usize)
            .copied()
            .ok_or(Exception::InvalidMemoryAccess)
    }

    pub fn write(&mut self, addr: Word, value: Word) -> Result<(), Exception> {
        match self.cells.get_mut(addr as usize) {
            Some(cell) => {
                *cell = value;
                Ok(())
            }
            None => Err(Exception::InvalidMemoryAccess),
        }
    }
}

/// Whether executing an instruction changed the control flow of the run.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Effect {
    None,
    Reset,
}

/// Outcome of a single step of the runner.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StepOutcome {
    Continue,
    Reset,
    /// The exception was raised and serviced through the vector.
    Exception(Exception),
}

/// Complete machine state during a run.
pub struct RunState {
    a: Word,
    b: Word,
    pc: Word,
    sp: Word,
    sr: Word,
    mem: Memory,
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

impl RunState {
    pub fn new() -> Self {
        let mut state = RunState {
            a: 0,
            b: 0,
            pc: 0,
            sp: 0,
            sr: 0,
            mem: Memory::new(),
        };
        state.reset_registers();
        state
    }

    /// Power-on register values. Memory is untouched.
    fn reset_registers(&mut self) {
        self.a = 0;
        self.b = 0;
        self.pc = 0;
        self.sp = MEMORY_SIZE as Word;
        self.sr = 0;
    }

    pub fn mem(&self) -> &Memory {
        &self.mem
    }

    pub fn mem_mut(&mut self) -> &mut Memory {
        &mut self.mem
    }

    /// Raw register read, bypassing protection. Used by the runner itself
    /// and by tests.
    pub fn reg(&self, reg: Reg) -> Word {
        match reg {
            Reg::A => self.a,
            Reg::B => self.b,
            Reg::Pc => self.pc,
            Reg::Sp => self.sp,
            Reg::Sr => self.sr,
        }
    }

    /// Raw register write, bypassing protection.
    pub fn set_reg(&mut self, reg: Reg, value: Word) {
        match reg {
            Reg::A => self.a = value,
            Reg::B => self.b = value,
            Reg::Pc => self.pc = value,
            Reg::Sp => self.sp = value,
            Reg::Sr => self.sr = value,
        }
    }

    pub fn flag(&self, flag: StatusFlag) -> bool {
        self.sr & flag.mask() != 0
    }

    pub fn set_flag(&mut self, flag: StatusFlag, value: bool) {
        if value {
            self.sr |= flag.mask();
        } else {
            self.sr &= !flag.mask();
        }
    }

    pub fn supervisor(&self) -> bool {
        self.flag(StatusFlag::Supervisor)
    }

    /// Register read as performed by an instruction; protected registers
    /// require supervisor mode.
    pub fn read_register(&self, reg: Reg) -> Result<Word, Exception> {
        if reg.read_protected() && !self.supervisor() {
            return Err(Exception::PrivilegedInstruction);
        }
        Ok(self.reg(reg))
    }

    /// Register write as performed by an instruction; protected registers
    /// require supervisor mode.
    pub fn write_register(&mut self, reg: Reg, value: Word) -> Result<(), Exception> {
        if reg.write_protected() && !self.supervisor() {
            return Err(Exception::PrivilegedInstruction);
        }
        self.set_reg(reg, value);
        Ok(())
    }

    /// Value named by an operand.
    fn value_of(&self, arg: &Arg) -> Result<Word, Exception> {
        match arg {
            Arg::Imm(val) => Ok(*val),
            Arg::Reg(reg) => self.read_register(*reg),
            Arg::Direct(addr) => self.mem.read(*addr),
            Arg::Indirect(reg) => self.mem.read(self.read_register(*reg)?),
            Arg::Idx(reg, offs) => {
                let addr = self.read_register(*reg)?.wrapping_add(*offs as Word);
                self.mem.read(addr)
            }
        }
    }

    /// Address named by a memory operand.
    fn address_of(&self, arg: &Arg) -> Result<Word, Exception> {
        match arg {
            Arg::Direct(addr) => Ok(*addr),
            Arg::Indirect(reg) => self.read_register(*reg),
            Arg::Idx(reg, offs) => Ok(self.read_register(*reg)?.wrapping_add(*offs as Word)),
            Arg::Imm(_) | Arg::Reg(_) => unreachable!("operand does not name memory"),
        }
    }

    /// Store through a register or memory operand.
    fn write_target(&mut self, arg: &Arg, value: Word) -> Result<(), Exception> {
        match arg {
            Arg::Reg(reg) => self.write_register(*reg, value),
            _ => {
                let addr = self.address_of(arg)?;
                self.mem.write(addr, value)
            }
        }
    }

    fn set_zn(&mut self, result: Word) {
        self.set_flag(StatusFlag::Zero, result == 0);
        self.set_flag(StatusFlag::Negative, (result as i32) < 0);
    }

    fn set_arith_flags(&mut self, result: Word, carry: bool, overflow: bool) {
        self.set_flag(StatusFlag::Carry, carry);
        self.set_flag(StatusFlag::Overflow, overflow);
        self.set_zn(result);
    }

    /// Execute one decoded instruction against this state.
    pub fn execute(&mut self, instr: &Instruction) -> Result<Effect, Exception> {
        if instr.kind().is_privileged() && !self.supervisor() {
            return Err(Exception::PrivilegedInstruction);
        }
        use InstrKind::*;
        match (instr.kind(), instr.args()) {
            (Add, Arguments::Binary(src, Arg::Reg(dst))) => self.add(&src, dst),
            (And, Arguments::Binary(src, Arg::Reg(dst))) => {
                self.bitwise(&src, dst, |a, d| a & d)
            }
            (Or, Arguments::Binary(src, Arg::Reg(dst))) => self.bitwise(&src, dst, |a, d| a | d),
            (Xor, Arguments::Binary(src, Arg::Reg(dst))) => {
                self.bitwise(&src, dst, |a, d| a ^ d)
            }
            (Sub, Arguments::Binary(src, Arg::Reg(dst))) => self.sub(&src, dst),
            (Cmp, Arguments::Binary(src, Arg::Reg(dst))) => self.cmp(&src, dst),
            (Div, Arguments::Binary(src, Arg::Reg(dst))) => self.div(&src, dst),
            (Ld, Arguments::Binary(src, Arg::Reg(dst))) => {
                let value = self.value_of(&src)?;
                self.write_register(dst, value)?;
                Ok(Effect::None)
            }
            (St, Arguments::Binary(Arg::Reg(src), dst)) => {
                let value = self.read_register(src)?;
                let addr = self.address_of(&dst)?;
                self.mem.write(addr, value)?;
                Ok(Effect::None)
            }
            (Fas, Arguments::Binary(lhs, Arg::Reg(dst))) => self.fas(&lhs, dst),
            (Swap, Arguments::Binary(lhs, Arg::Reg(rhs))) => self.swap(&lhs, rhs),
            (Shl, Arguments::Binary(src, Arg::Reg(dst))) => self.shift(&src, dst, Word::checked_shl),
            (Shr, Arguments::Binary(src, Arg::Reg(dst))) => self.shift(&src, dst, Word::checked_shr),
            (Not, Arguments::Unary(Arg::Reg(dst))) => {
                let result = !self.read_register(dst)?;
                self.set_zn(result);
                self.write_register(dst, result)?;
                Ok(Effect::None)
            }
            (Jmp, Arguments::Unary(src)) | (Call, Arguments::Unary(src)) => self.jump(&src),
            (Jeq, Arguments::Unary(src)) => self.jump_if(self.flag(StatusFlag::Zero), &src),
            (Jne, Arguments::Unary(src)) => self.jump_if(!self.flag(StatusFlag::Zero), &src),
            (Jle, Arguments::Unary(src)) => {
                let cond = self.overflow_differs() || self.flag(StatusFlag::Zero);
                self.jump_if(cond, &src)
            }
            (Jlt, Arguments::Unary(src)) => self.jump_if(self.overflow_differs(), &src),
            (Jge, Arguments::Unary(src)) => self.jump_if(!self.overflow_differs(), &src),
            (Jgt, Arguments::Unary(src)) => {
                let cond = !self.overflow_differs() && !self.flag(StatusFlag::Zero);
                self.jump_if(cond, &src)
            }
            (Push, Arguments::Unary(src)) => self.push(&src),
            (Pop, Arguments::Unary(Arg::Reg(dst))) => self.pop(dst),
            (Rtn, Arguments::None) => {
                let target = self.mem.read(self.reg(Reg::Sp))?;
                self.write_register(Reg::Pc, target)?;
                Ok(Effect::None)
            }
            (Rti, Arguments::None) => {
                let pc = self.mem.read(SAVED_PC_ADDR)?;
                let sr = self.mem.read(SAVED_SR_ADDR)?;
                self.set_reg(Reg::Pc, pc);
                self.set_reg(Reg::Sr, sr);
                Ok(Effect::None)
            }
            (Nop, Arguments::None) => Ok(Effect::None),
            (Trap, Arguments::None) => Err(Exception::Trap),
            (Reset, Arguments::None) => {
                self.reset_registers();
                Ok(Effect::Reset)
            }
            _ => unreachable!("argument storage does not match declared arity"),
        }
    }

    /// `O != C` after a comparison means the left side compared less.
    fn overflow_differs(&self) -> bool {
        self.flag(StatusFlag::Overflow) != self.flag(StatusFlag::Carry)
    }

    fn add(&mut self, src: &Arg, dst: Reg) -> Result<Effect, Exception> {
        let a = self.value_of(src)?;
        let d = self.read_register(dst)?;
        let (result, carry) = a.overflowing_add(d);
        // Operands share a sign bit that differs from the result's
        let overflow = (a ^ result) & (d ^ result) & 0x8000_0000 != 0;
        self.set_arith_flags(result, carry, overflow);
        self.write_register(dst, result)?;
        Ok(Effect::None)
    }

    fn sub(&mut self, src: &Arg, dst: Reg) -> Result<Effect, Exception> {
        let a = self.value_of(src)?;
        let d = self.read_register(dst)?;
        let (result, borrow) = d.overflowing_sub(a);
        let overflow = (d ^ a) & (d ^ result) & 0x8000_0000 != 0;
        self.set_arith_flags(result, borrow, overflow);
        self.write_register(dst, result)?;
        Ok(Effect::None)
    }

    /// Computes `src - dst` for flags only; the register is unchanged.
    fn cmp(&mut self, src: &Arg, dst: Reg) -> Result<Effect, Exception> {
        let a = self.value_of(src)?;
        let d = self.read_register(dst)?;
        let (result, borrow) = a.overflowing_sub(d);
        let overflow = (a ^ d) & (a ^ result) & 0x8000_0000 != 0;
        self.set_arith_flags(result, borrow, overflow);
        Ok(Effect::None)
    }

    fn bitwise(
        &mut self,
        src: &Arg,
        dst: Reg,
        op: impl FnOnce(Word, Word) -> Word,
    ) -> Result<Effect, Exception> {
        let result = op(self.value_of(src)?, self.read_register(dst)?);
        self.set_zn(result);
        self.write_register(dst, result)?;
        Ok(Effect::None)
    }

    /// Signed wrapping division; the divisor is the destination register.
    fn div(&mut self, src: &Arg, dst: Reg) -> Result<Effect, Exception> {
        let a = self.value_of(src)?;
        let d = self.read_register(dst)?;
        if d == 0 {
            return Err(Exception::DivisionByZero);
        }
        let result = (a as i32).wrapping_div(d as i32) as Word;
        self.set_zn(result);
        self.write_register(dst, result)?;
        Ok(Effect::None)
    }

    /// Shift counts of 32 or more produce 0.
    fn shift(
        &mut self,
        src: &Arg,
        dst: Reg,
        op: impl FnOnce(Word, u32) -> Option<Word>,
    ) -> Result<Effect, Exception> {
        let amount = self.value_of(src)?;
        let d = self.read_register(dst)?;
        let result = op(d, amount).unwrap_or(0);
        self.set_zn(result);
        self.write_register(dst, result)?;
        Ok(Effect::None)
    }

    /// Reads the register, sets it to 1, and stores the old value through
    /// the memory operand.
    fn fas(&mut self, lhs: &Arg, dst: Reg) -> Result<Effect, Exception> {
        let old = self.read_register(dst)?;
        self.write_register(dst, 1)?;
        let addr = self.address_of(lhs)?;
        self.mem.write(addr, old)?;
        Ok(Effect::None)
    }

    /// Two-phase exchange: both locations are read before either write. If
    /// the second write raises, the first location keeps its new value and
    /// the exception still propagates.
    fn swap(&mut self, lhs: &Arg, rhs: Reg) -> Result<Effect, Exception> {
        let lhs_val = self.value_of(lhs)?;
        let rhs_val = self.read_register(rhs)?;
        self.write_target(lhs, rhs_val)?;
        self.write_register(rhs, lhs_val)?;
        Ok(Effect::None)
    }

    fn jump(&mut self, src: &Arg) -> Result<Effect, Exception> {
        let target = self.value_of(src)?;
        self.write_register(Reg::Pc, target)?;
        Ok(Effect::None)
    }

    fn jump_if(&mut self, cond: bool, src: &Arg) -> Result<Effect, Exception> {
        if cond {
            self.jump(src)?;
        }
        Ok(Effect::None)
    }

    fn push(&mut self, src: &Arg) -> Result<Effect, Exception> {
        let value = self.value_of(src)?;
        let sp = self.reg(Reg::Sp).wrapping_sub(1);
        self.mem.write(sp, value)?;
        self.set_reg(Reg::Sp, sp);
        Ok(Effect::None)
    }

    fn pop(&mut self, dst: Reg) -> Result<Effect, Exception> {
        let sp = self.reg(Reg::Sp);
        let value = self.mem.read(sp)?;
        self.write_register(dst, value)?;
        self.set_reg(Reg::Sp, sp.wrapping_add(1));
        Ok(Effect::None)
    }
}

/// Owns the machine state, loads programs, and drives execution over a
/// decoded-instruction cache.
pub struct Runner {
    state: RunState,
    cache: Vec<Option<Instruction>>,
    at: Word,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner {
    pub fn new() -> Self {
        Runner {
            state: RunState::new(),
            cache: Vec::new(),
            at: 0,
        }
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut RunState {
        &mut self.state
    }

    /// Encode `instrs` into memory starting at `at`; two words each. Later
    /// calls to [`code`] without an address continue from here.
    ///
    /// [`code`]: Runner::code
    pub fn code(&mut self, at: Word, instrs: &[Instruction]) -> Result<&mut Self> {
        self.at = at;
        for instr in instrs {
            let raw = instr
                .encode()
                .ok_or_else(|| miette!("instruction cannot be encoded: {instr}"))?;
            self.write_word(self.at, (raw >> 32) as Word)?;
            self.write_word(self.at + 1, raw as Word)?;
            self.at += 2;
        }
        Ok(self)
    }

    /// Shorthand for insertion at address 0.
    pub fn rom(&mut self, instrs: &[Instruction]) -> Result<&mut Self> {
        self.code(0, instrs)
    }

    /// Shorthand for insertion at the exception vector.
    pub fn interrupt_handler(&mut self, instrs: &[Instruction]) -> Result<&mut Self> {
        self.code(EXCEPTION_VECTOR, instrs)
    }

    /// Place an assembled image into memory.
    pub fn load_image(&mut self, image: &Image) -> Result<&mut Self> {
        for (addr, value) in image.cells() {
            self.write_word(*addr, *value)?;
        }
        Ok(self)
    }

    fn write_word(&mut self, addr: Word, value: Word) -> Result<()> {
        self.state
            .mem
            .write(addr, value)
            .map_err(|e| miette!("writing program word at {addr}: {e}"))
    }

    /// Decode all of memory once into the instruction cache and point the
    /// machine at address 0. The cache is read-only afterwards; stores do
    /// not rewrite decoded instructions.
    pub fn prepare(&mut self) {
        self.cache = (0..MEMORY_SIZE)
            .map(|i| {
                let hi = self.state.mem.read(i as Word).ok()?;
                let lo = self.state.mem.read(i as Word + 1).ok()?;
                Instruction::decode(((hi as u64) << 32) | lo as u64)
            })
            .collect();
        self.state.set_reg(Reg::Pc, 0);
    }

    /// Execute the cached instruction at `pc`. Exceptions are serviced
    /// through the vector and reported in the outcome; a failure inside the
    /// service prologue itself is fatal and aborts the run.
    pub fn step(&mut self) -> Result<StepOutcome> {
        assert!(!self.cache.is_empty(), "step before prepare");
        let pc = self.state.reg(Reg::Pc);
        let result = match self.cache.get(pc as usize).copied().flatten() {
            Some(instr) => self.state.execute(&instr),
            None => Err(Exception::InvalidInstruction),
        };
        match result {
            Ok(Effect::Reset) => Ok(StepOutcome::Reset),
            Ok(Effect::None) => {
                if self.state.reg(Reg::Pc) == pc {
                    self.state.set_reg(Reg::Pc, pc.wrapping_add(2));
                }
                Ok(StepOutcome::Continue)
            }
            Err(exception) => {
                self.service(exception)?;
                Ok(StepOutcome::Exception(exception))
            }
        }
    }

    /// Exception prologue: save `pc`, `sr` and the event code, enter
    /// supervisor mode and vector to the handler.
    fn service(&mut self, exception: Exception) -> Result<()> {
        let prologue = |state: &mut RunState| -> Result<(), Exception> {
            state.mem.write(SAVED_PC_ADDR, state.reg(Reg::Pc))?;
            state.mem.write(SAVED_SR_ADDR, state.reg(Reg::Sr))?;
            state.mem.write(EVENT_CODE_ADDR, exception.code())?;
            Ok(())
        };
        prologue(&mut self.state).map_err(|inner| {
            miette!("{inner} while servicing {exception}; aborting run")
        })?;
        self.state.set_flag(StatusFlag::Supervisor, true);
        self.state.set_reg(Reg::Pc, EXCEPTION_VECTOR);
        Ok(())
    }

    /// Service a hardware interrupt if the interrupt-enable flag is set.
    /// Returns whether the interrupt was taken.
    pub fn hardware_interrupt(&mut self) -> Result<bool> {
        if !self.state.flag(StatusFlag::InterruptEnable) {
            return Ok(false);
        }
        self.service(Exception::HardwareInterrupt)?;
        Ok(true)
    }

    /// Build the cache and execute from address 0 until a reset.
    pub fn run(&mut self) -> Result<()> {
        self.prepare();
        loop {
            if let StepOutcome::Reset = self.step()? {
                return Ok(());
            }
        }
    }
}
