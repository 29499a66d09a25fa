//! Reference interpreter for the register machine targeted by the compiler.
//!
//! Values are unsigned 64-bit machine words. `SUB` and `DEC` saturate at
//! zero (the compiled comparison sequences rely on truncated subtraction)
//! while `ADD`, `INC` and `SHL` wrap. Memory is a flat `u64`-addressed map
//! of cells; uninitialized cells read as zero.
//!
//! The machine exposes no data stack. `CALL`/`RTRN` are serviced by an
//! internal return-address list; its depth is bounded in practice because
//! the source language cannot express recursion.

use std::collections::VecDeque;

use impc_isa::{Instr, Operand, Reg, Target};
use rustc_hash::FxHashMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VmError {
    #[error("program counter ran past the end of the instruction stream")]
    PcOutOfRange,
    #[error("instruction {at} jumps to unresolved label")]
    PendingLabel { at: usize },
    #[error("RTRN at instruction {at} with no pending CALL")]
    ReturnWithoutCall { at: usize },
    #[error("READ at instruction {at} but input is exhausted")]
    InputExhausted { at: usize },
    #[error("step budget of {budget} exhausted; program may not terminate")]
    OutOfFuel { budget: u64 },
}

/// The machine's connection to the outside world.
///
/// `READ` pulls one value; a `None` aborts execution with
/// [`VmError::InputExhausted`]. `WRITE` pushes one value.
pub trait MachineIo {
    fn read(&mut self) -> Option<u64>;
    fn write(&mut self, value: u64);
}

/// In-memory I/O for tests and embedding: feeds a fixed input queue and
/// records every output.
#[derive(Debug, Default)]
pub struct VecIo {
    inputs: VecDeque<u64>,
    pub outputs: Vec<u64>,
}

impl VecIo {
    pub fn new(inputs: &[u64]) -> Self {
        Self {
            inputs: inputs.iter().copied().collect(),
            outputs: Vec::new(),
        }
    }
}

impl MachineIo for VecIo {
    fn read(&mut self) -> Option<u64> {
        self.inputs.pop_front()
    }

    fn write(&mut self, value: u64) {
        self.outputs.push(value);
    }
}

#[derive(Debug)]
pub struct Machine<'a> {
    program: &'a [Instr],
    pc: usize,
    regs: [u64; 8],
    memory: FxHashMap<u64, u64>,
    returns: Vec<usize>,
    fuel: u64,
}

enum Flow {
    Continue,
    Halt,
}

impl<'a> Machine<'a> {
    /// Generous default step budget; compiled programs that are still
    /// running after this many instructions are looping.
    pub const DEFAULT_FUEL: u64 = 50_000_000;

    pub fn new(program: &'a [Instr]) -> Self {
        Self {
            program,
            pc: 0,
            regs: [0; 8],
            memory: FxHashMap::default(),
            returns: Vec::new(),
            fuel: Self::DEFAULT_FUEL,
        }
    }

    pub fn with_fuel(mut self, fuel: u64) -> Self {
        self.fuel = fuel;
        self
    }

    pub fn reg(&self, reg: Reg) -> u64 {
        self.regs[reg.index()]
    }

    pub fn mem(&self, addr: u64) -> u64 {
        self.memory.get(&addr).copied().unwrap_or(0)
    }

    /// Runs to `HALT` or the first error.
    pub fn run(&mut self, io: &mut dyn MachineIo) -> Result<(), VmError> {
        let budget = self.fuel;
        loop {
            if self.fuel == 0 {
                return Err(VmError::OutOfFuel { budget });
            }
            self.fuel -= 1;
            match self.step(io)? {
                Flow::Continue => {}
                Flow::Halt => return Ok(()),
            }
        }
    }

    fn step(&mut self, io: &mut dyn MachineIo) -> Result<Flow, VmError> {
        let at = self.pc;
        let instr = *self.program.get(at).ok_or(VmError::PcOutOfRange)?;
        self.pc += 1;

        match instr {
            Instr::Rst(reg) => self.regs[reg.index()] = 0,
            Instr::Inc(reg) => {
                self.regs[reg.index()] = self.regs[reg.index()].wrapping_add(1);
            }
            Instr::Dec(reg) => {
                self.regs[reg.index()] = self.regs[reg.index()].saturating_sub(1);
            }
            Instr::Shl(reg) => {
                self.regs[reg.index()] = self.regs[reg.index()].wrapping_shl(1);
            }
            Instr::Shr(reg) => self.regs[reg.index()] >>= 1,
            Instr::Add(operand) => {
                self.regs[0] = self.regs[0].wrapping_add(self.operand_value(operand));
            }
            Instr::Sub(operand) => {
                self.regs[0] = self.regs[0].saturating_sub(self.operand_value(operand));
            }
            Instr::Load(addr) => self.regs[0] = self.mem(addr),
            Instr::Store(addr) => {
                self.memory.insert(addr, self.regs[0]);
            }
            Instr::Rload(reg) => self.regs[0] = self.mem(self.regs[reg.index()]),
            Instr::Rstore(reg) => {
                self.memory.insert(self.regs[reg.index()], self.regs[0]);
            }
            Instr::Swp(reg) => self.regs.swap(0, reg.index()),
            Instr::Jump(target) => self.pc = self.target_index(at, target)?,
            Instr::Jpos(target) => {
                if self.regs[0] > 0 {
                    self.pc = self.target_index(at, target)?;
                }
            }
            Instr::Jzero(target) => {
                if self.regs[0] == 0 {
                    self.pc = self.target_index(at, target)?;
                }
            }
            Instr::Call(target) => {
                self.returns.push(self.pc);
                self.pc = self.target_index(at, target)?;
            }
            Instr::Rtrn => {
                self.pc = self
                    .returns
                    .pop()
                    .ok_or(VmError::ReturnWithoutCall { at })?;
            }
            Instr::Read => {
                self.regs[0] = io.read().ok_or(VmError::InputExhausted { at })?;
            }
            Instr::Write => io.write(self.regs[0]),
            Instr::Halt => return Ok(Flow::Halt),
        }

        Ok(Flow::Continue)
    }

    fn operand_value(&self, operand: Operand) -> u64 {
        match operand {
            Operand::Reg(reg) => self.regs[reg.index()],
            Operand::Mem(addr) => self.mem(addr),
        }
    }

    fn target_index(&self, at: usize, target: Target) -> Result<usize, VmError> {
        match target {
            Target::Index(index) => Ok(index as usize),
            Target::Label(_) => Err(VmError::PendingLabel { at }),
        }
    }
}

/// Convenience wrapper: runs `program` against a fixed input queue and
/// returns everything it wrote.
pub fn run_program(program: &[Instr], inputs: &[u64]) -> Result<Vec<u64>, VmError> {
    let mut io = VecIo::new(inputs);
    Machine::new(program).run(&mut io)?;
    Ok(io.outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use impc_isa::parse_program;

    fn run_text(text: &str, inputs: &[u64]) -> Result<Vec<u64>, VmError> {
        let program = parse_program(text).expect("program text should parse");
        run_program(&program, inputs)
    }

    #[test]
    fn sub_saturates_at_zero() {
        let outputs = run_text("READ\nSWP b\nREAD\nSUB b\nWRITE\nHALT\n", &[3, 10]).expect("run");
        assert_eq!(outputs, vec![7]);

        let outputs = run_text("READ\nSWP b\nREAD\nSUB b\nWRITE\nHALT\n", &[10, 3]).expect("run");
        assert_eq!(outputs, vec![0]);
    }

    #[test]
    fn dec_of_zero_stays_zero() {
        let outputs = run_text("RST a\nDEC a\nWRITE\nHALT\n", &[]).expect("run");
        assert_eq!(outputs, vec![0]);
    }

    #[test]
    fn shl_doubles_and_shr_floors() {
        let outputs = run_text(
            "READ\nSHL a\nWRITE\nSHR a\nSHR a\nWRITE\nHALT\n",
            &[5],
        )
        .expect("run");
        assert_eq!(outputs, vec![10, 2]);
    }

    #[test]
    fn rload_and_rstore_dereference_through_register() {
        // mem[7] := 42 via a pointer in b, then read it back the same way.
        let text = "RST a\nINC a\nSHL a\nSHL a\nSHL a\nDEC a\nSWP b\nRST a\nINC a\n\
                    SHL a\nSHL a\nINC a\nSHL a\nSHL a\nINC a\nSHL a\nRSTORE b\nRST a\nRLOAD b\nWRITE\nHALT\n";
        let outputs = run_text(text, &[]).expect("run");
        assert_eq!(outputs, vec![42]);
    }

    #[test]
    fn call_and_rtrn_nest() {
        // 0: CALL 3 / 1: WRITE / 2: HALT / 3: CALL 6 / 4: INC a / 5: RTRN
        // 6: INC a / 7: RTRN
        let text = "CALL 3\nWRITE\nHALT\nCALL 6\nINC a\nRTRN\nINC a\nRTRN\n";
        let outputs = run_text(text, &[]).expect("run");
        assert_eq!(outputs, vec![2]);
    }

    #[test]
    fn rtrn_without_call_is_an_error() {
        let err = run_text("RTRN\n", &[]).expect_err("must fail");
        assert_eq!(err, VmError::ReturnWithoutCall { at: 0 });
    }

    #[test]
    fn running_off_the_end_is_an_error() {
        let err = run_text("RST a\n", &[]).expect_err("must fail");
        assert_eq!(err, VmError::PcOutOfRange);
    }

    #[test]
    fn exhausted_input_is_an_error() {
        let err = run_text("READ\nHALT\n", &[]).expect_err("must fail");
        assert_eq!(err, VmError::InputExhausted { at: 0 });
    }

    #[test]
    fn infinite_loop_exhausts_fuel() {
        let program = parse_program("JUMP 0\nHALT\n").expect("parse");
        let mut io = VecIo::new(&[]);
        let err = Machine::new(&program)
            .with_fuel(1_000)
            .run(&mut io)
            .expect_err("must fail");
        assert_eq!(err, VmError::OutOfFuel { budget: 1_000 });
    }

    #[test]
    fn jpos_and_jzero_test_the_accumulator() {
        // Writes 1 when input is nonzero, 0 otherwise.
        let text = "READ\nJPOS 4\nRST a\nJUMP 6\nRST a\nINC a\nWRITE\nHALT\n";
        assert_eq!(run_text(text, &[9]).expect("run"), vec![1]);
        assert_eq!(run_text(text, &[0]).expect("run"), vec![0]);
    }
}
