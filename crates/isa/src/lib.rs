//! Instruction set of the target register machine.
//!
//! The machine has eight named registers `a`..`h`, one flat memory array
//! addressed by `u64` cells, and no symbolic jump targets: all control
//! transfer is by absolute instruction index. Register `a` is the implied
//! accumulator for arithmetic, memory access, comparisons and I/O.
//!
//! Compiled programs are stored as text, one instruction per line. This
//! crate owns both directions of that boundary: [`format_program`] renders a
//! stream, [`parse_program`] reads one back for execution.

use std::fmt;

use thiserror::Error;

/// One of the eight machine registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reg {
    A,
    B,
    C,
    D,
    E,
    F,
    G,
    H,
}

impl Reg {
    pub const ALL: [Reg; 8] = [
        Reg::A,
        Reg::B,
        Reg::C,
        Reg::D,
        Reg::E,
        Reg::F,
        Reg::G,
        Reg::H,
    ];

    pub fn index(self) -> usize {
        match self {
            Reg::A => 0,
            Reg::B => 1,
            Reg::C => 2,
            Reg::D => 3,
            Reg::E => 4,
            Reg::F => 5,
            Reg::G => 6,
            Reg::H => 7,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Reg::A => "a",
            Reg::B => "b",
            Reg::C => "c",
            Reg::D => "d",
            Reg::E => "e",
            Reg::F => "f",
            Reg::G => "g",
            Reg::H => "h",
        }
    }

    fn from_name(name: &str) -> Option<Reg> {
        Reg::ALL.into_iter().find(|reg| reg.name() == name)
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Source operand of `ADD`/`SUB`: another register or a direct memory cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Reg(Reg),
    Mem(u64),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Reg(reg) => write!(f, "{reg}"),
            Operand::Mem(addr) => write!(f, "{addr}"),
        }
    }
}

/// A symbolic jump target handed out by the code generator's label table.
///
/// Labels are dense ids; they exist only between emission and resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(pub u32);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Jump operand: an absolute instruction index once resolved, or a pending
/// label while the code generator is still running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Index(u64),
    Label(Label),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Index(index) => write!(f, "{index}"),
            // Pending labels never survive resolution; this form only shows
            // up when debugging an unresolved stream.
            Target::Label(label) => write!(f, "@{label}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instr {
    /// `r := 0`
    Rst(Reg),
    /// `r := r + 1` (wrapping)
    Inc(Reg),
    /// `r := max(r - 1, 0)`
    Dec(Reg),
    /// `r := r * 2` (wrapping)
    Shl(Reg),
    /// `r := r / 2` (floor)
    Shr(Reg),
    /// `a := a + operand` (wrapping)
    Add(Operand),
    /// `a := max(a - operand, 0)`
    Sub(Operand),
    /// `a := mem[addr]`
    Load(u64),
    /// `mem[addr] := a`
    Store(u64),
    /// `a := mem[r]`, the sole pointer-dereference primitive (read side)
    Rload(Reg),
    /// `mem[r] := a`, pointer-dereference write side
    Rstore(Reg),
    /// exchange `a` and `r`
    Swp(Reg),
    Jump(Target),
    /// jump iff `a > 0`
    Jpos(Target),
    /// jump iff `a == 0`
    Jzero(Target),
    Call(Target),
    Rtrn,
    /// `a := next input value`
    Read,
    /// output `a`
    Write,
    Halt,
}

impl Instr {
    /// The pending-label operand of a control-transfer instruction, if any.
    pub fn target_mut(&mut self) -> Option<&mut Target> {
        match self {
            Instr::Jump(target)
            | Instr::Jpos(target)
            | Instr::Jzero(target)
            | Instr::Call(target) => Some(target),
            _ => None,
        }
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instr::Rst(reg) => write!(f, "RST {reg}"),
            Instr::Inc(reg) => write!(f, "INC {reg}"),
            Instr::Dec(reg) => write!(f, "DEC {reg}"),
            Instr::Shl(reg) => write!(f, "SHL {reg}"),
            Instr::Shr(reg) => write!(f, "SHR {reg}"),
            Instr::Add(operand) => write!(f, "ADD {operand}"),
            Instr::Sub(operand) => write!(f, "SUB {operand}"),
            Instr::Load(addr) => write!(f, "LOAD {addr}"),
            Instr::Store(addr) => write!(f, "STORE {addr}"),
            Instr::Rload(reg) => write!(f, "RLOAD {reg}"),
            Instr::Rstore(reg) => write!(f, "RSTORE {reg}"),
            Instr::Swp(reg) => write!(f, "SWP {reg}"),
            Instr::Jump(target) => write!(f, "JUMP {target}"),
            Instr::Jpos(target) => write!(f, "JPOS {target}"),
            Instr::Jzero(target) => write!(f, "JZERO {target}"),
            Instr::Call(target) => write!(f, "CALL {target}"),
            Instr::Rtrn => f.write_str("RTRN"),
            Instr::Read => f.write_str("READ"),
            Instr::Write => f.write_str("WRITE"),
            Instr::Halt => f.write_str("HALT"),
        }
    }
}

/// Renders a resolved instruction stream, one instruction per line.
pub fn format_program(program: &[Instr]) -> String {
    let mut out = String::new();
    for instr in program {
        out.push_str(&instr.to_string());
        out.push('\n');
    }
    out
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseProgramError {
    #[error("line {line}: unknown mnemonic '{mnemonic}'")]
    UnknownMnemonic { line: usize, mnemonic: String },
    #[error("line {line}: '{mnemonic}' takes no operand")]
    UnexpectedOperand { line: usize, mnemonic: String },
    #[error("line {line}: '{mnemonic}' is missing its operand")]
    MissingOperand { line: usize, mnemonic: String },
    #[error("line {line}: bad operand '{operand}' for '{mnemonic}'")]
    BadOperand {
        line: usize,
        mnemonic: String,
        operand: String,
    },
    #[error("line {line}: trailing text after instruction")]
    TrailingText { line: usize },
}

/// Parses a compiled program back from its text form.
///
/// Blank lines are skipped; pending-label targets (`@L..`) are rejected as
/// bad operands since a finished program never contains them.
pub fn parse_program(text: &str) -> Result<Vec<Instr>, ParseProgramError> {
    let mut program = Vec::new();
    for (index, raw) in text.lines().enumerate() {
        let line = index + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            continue;
        }
        program.push(parse_line(line, trimmed)?);
    }
    Ok(program)
}

fn parse_line(line: usize, text: &str) -> Result<Instr, ParseProgramError> {
    let mut parts = text.split_whitespace();
    let mnemonic = parts.next().expect("non-empty line has a first token");
    let operand = parts.next();
    if parts.next().is_some() {
        return Err(ParseProgramError::TrailingText { line });
    }

    let no_operand = |instr: Instr| match operand {
        None => Ok(instr),
        Some(_) => Err(ParseProgramError::UnexpectedOperand {
            line,
            mnemonic: mnemonic.to_string(),
        }),
    };

    let require = || {
        operand.ok_or_else(|| ParseProgramError::MissingOperand {
            line,
            mnemonic: mnemonic.to_string(),
        })
    };
    let bad = |operand: &str| ParseProgramError::BadOperand {
        line,
        mnemonic: mnemonic.to_string(),
        operand: operand.to_string(),
    };
    let reg = || {
        let text = require()?;
        Reg::from_name(text).ok_or_else(|| bad(text))
    };
    let addr = || {
        let text = require()?;
        text.parse::<u64>().map_err(|_| bad(text))
    };
    let reg_or_addr = || {
        let text = require()?;
        if let Some(reg) = Reg::from_name(text) {
            return Ok(Operand::Reg(reg));
        }
        text.parse::<u64>().map(Operand::Mem).map_err(|_| bad(text))
    };
    let target = || addr().map(Target::Index);

    match mnemonic {
        "RST" => Ok(Instr::Rst(reg()?)),
        "INC" => Ok(Instr::Inc(reg()?)),
        "DEC" => Ok(Instr::Dec(reg()?)),
        "SHL" => Ok(Instr::Shl(reg()?)),
        "SHR" => Ok(Instr::Shr(reg()?)),
        "ADD" => Ok(Instr::Add(reg_or_addr()?)),
        "SUB" => Ok(Instr::Sub(reg_or_addr()?)),
        "LOAD" => Ok(Instr::Load(addr()?)),
        "STORE" => Ok(Instr::Store(addr()?)),
        "RLOAD" => Ok(Instr::Rload(reg()?)),
        "RSTORE" => Ok(Instr::Rstore(reg()?)),
        "SWP" => Ok(Instr::Swp(reg()?)),
        "JUMP" => Ok(Instr::Jump(target()?)),
        "JPOS" => Ok(Instr::Jpos(target()?)),
        "JZERO" => Ok(Instr::Jzero(target()?)),
        "CALL" => Ok(Instr::Call(target()?)),
        "RTRN" => no_operand(Instr::Rtrn),
        "READ" => no_operand(Instr::Read),
        "WRITE" => no_operand(Instr::Write),
        "HALT" => no_operand(Instr::Halt),
        other => Err(ParseProgramError::UnknownMnemonic {
            line,
            mnemonic: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_every_operand_shape() {
        let program = [
            Instr::Rst(Reg::A),
            Instr::Add(Operand::Reg(Reg::B)),
            Instr::Sub(Operand::Mem(17)),
            Instr::Load(3),
            Instr::Jump(Target::Index(12)),
            Instr::Halt,
        ];
        assert_eq!(
            format_program(&program),
            "RST a\nADD b\nSUB 17\nLOAD 3\nJUMP 12\nHALT\n"
        );
    }

    #[test]
    fn parse_round_trips_formatted_output() {
        let program = vec![
            Instr::Read,
            Instr::Store(0),
            Instr::Load(0),
            Instr::Shl(Reg::A),
            Instr::Jzero(Target::Index(6)),
            Instr::Write,
            Instr::Halt,
        ];
        let parsed = parse_program(&format_program(&program)).expect("parse");
        assert_eq!(parsed, program);
    }

    #[test]
    fn rejects_unknown_mnemonic_with_line_number() {
        let err = parse_program("RST a\nNOPE 3\n").expect_err("must fail");
        assert_eq!(
            err,
            ParseProgramError::UnknownMnemonic {
                line: 2,
                mnemonic: "NOPE".to_string()
            }
        );
    }

    #[test]
    fn rejects_pending_label_targets() {
        let err = parse_program("JUMP @L3\n").expect_err("must fail");
        assert!(matches!(err, ParseProgramError::BadOperand { .. }));
    }

    #[test]
    fn rejects_register_operand_on_load() {
        let err = parse_program("LOAD b\n").expect_err("must fail");
        assert!(matches!(err, ParseProgramError::BadOperand { .. }));
    }

    #[test]
    fn skips_blank_lines() {
        let parsed = parse_program("\nREAD\n\nWRITE\n\n").expect("parse");
        assert_eq!(parsed, vec![Instr::Read, Instr::Write]);
    }
}
