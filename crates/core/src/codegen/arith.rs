//! Multiplication, division and modulo, lowered to shift/add/subtract loops.
//!
//! The machine has no native multiply or divide. Both algorithms keep their
//! loop state in memory cells because every iteration clobbers the working
//! registers. Callers spill both operands first; the cells are fresh
//! temporaries owned by the current expression and may be mutated freely.

use impc_isa::{Instr, Operand, Reg, Target};

use super::CodeGen;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum DivResult {
    Quotient,
    Remainder,
}

impl CodeGen {
    /// Binary double-and-add product of two memory-resident operands.
    ///
    /// While the multiplier is nonzero: add the multiplicand into the
    /// accumulator cell when the multiplier is odd, then double the
    /// multiplicand and halve the multiplier. O(log multiplier) iterations;
    /// the product ends up in register `a`.
    pub(super) fn gen_multiply(&mut self, multiplicand: u64, multiplier: u64) {
        let product = self.symbols.allocate_temp();
        let top = self.labels.fresh();
        let even = self.labels.fresh();
        let done = self.labels.fresh();

        self.emit(Instr::Rst(Reg::A));
        self.emit(Instr::Store(product));

        self.mark(top);
        self.emit(Instr::Load(multiplier));
        self.emit(Instr::Jzero(Target::Label(done)));

        // Low bit of the multiplier: m - (m >> 1 << 1).
        self.emit(Instr::Shr(Reg::A));
        self.emit(Instr::Shl(Reg::A));
        self.emit(Instr::Swp(Reg::B));
        self.emit(Instr::Load(multiplier));
        self.emit(Instr::Sub(Operand::Reg(Reg::B)));
        self.emit(Instr::Jzero(Target::Label(even)));

        self.emit(Instr::Load(product));
        self.emit(Instr::Swp(Reg::B));
        self.emit(Instr::Load(multiplicand));
        self.emit(Instr::Add(Operand::Reg(Reg::B)));
        self.emit(Instr::Store(product));

        self.mark(even);
        self.emit(Instr::Load(multiplicand));
        self.emit(Instr::Shl(Reg::A));
        self.emit(Instr::Store(multiplicand));
        self.emit(Instr::Load(multiplier));
        self.emit(Instr::Shr(Reg::A));
        self.emit(Instr::Store(multiplier));
        self.emit(Instr::Jump(Target::Label(top)));

        self.mark(done);
        self.emit(Instr::Load(product));
    }

    /// Long division by scale-then-subtract over memory-resident operands.
    ///
    /// Scale-up doubles the divisor (and a scale factor starting at 1)
    /// until it exceeds the dividend; subtract-down walks the scale back to
    /// zero, subtracting where the scaled divisor still fits and adding the
    /// scale factor into the quotient. A zero divisor yields quotient 0 and
    /// remainder 0. O(log(dividend/divisor)) iterations; the requested
    /// result ends up in register `a`.
    pub(super) fn gen_divmod(&mut self, dividend: u64, divisor: u64, result: DivResult) {
        let remainder = self.symbols.allocate_temp();
        let quotient = self.symbols.allocate_temp();
        let scaled = self.symbols.allocate_temp();
        let scale = self.symbols.allocate_temp();

        let scale_up = self.labels.fresh();
        let sub_down = self.labels.fresh();
        let skip = self.labels.fresh();
        let zero = self.labels.fresh();
        let done = self.labels.fresh();

        self.emit(Instr::Load(divisor));
        self.emit(Instr::Jzero(Target::Label(zero)));

        self.emit(Instr::Load(dividend));
        self.emit(Instr::Store(remainder));
        self.emit(Instr::Rst(Reg::A));
        self.emit(Instr::Store(quotient));
        self.emit(Instr::Load(divisor));
        self.emit(Instr::Store(scaled));
        self.emit(Instr::Rst(Reg::A));
        self.emit(Instr::Inc(Reg::A));
        self.emit(Instr::Store(scale));

        // Find the largest power-of-two multiple of the divisor not
        // exceeding the dividend.
        self.mark(scale_up);
        self.emit(Instr::Load(remainder));
        self.emit(Instr::Swp(Reg::B));
        self.emit(Instr::Load(scaled));
        self.emit(Instr::Sub(Operand::Reg(Reg::B)));
        self.emit(Instr::Jpos(Target::Label(sub_down)));
        self.emit(Instr::Load(scaled));
        self.emit(Instr::Shl(Reg::A));
        self.emit(Instr::Store(scaled));
        self.emit(Instr::Load(scale));
        self.emit(Instr::Shl(Reg::A));
        self.emit(Instr::Store(scale));
        self.emit(Instr::Jump(Target::Label(scale_up)));

        self.mark(sub_down);
        self.emit(Instr::Load(scale));
        self.emit(Instr::Jzero(Target::Label(done)));
        self.emit(Instr::Load(remainder));
        self.emit(Instr::Swp(Reg::B));
        self.emit(Instr::Load(scaled));
        self.emit(Instr::Sub(Operand::Reg(Reg::B)));
        self.emit(Instr::Jpos(Target::Label(skip)));

        self.emit(Instr::Load(scaled));
        self.emit(Instr::Swp(Reg::B));
        self.emit(Instr::Load(remainder));
        self.emit(Instr::Sub(Operand::Reg(Reg::B)));
        self.emit(Instr::Store(remainder));
        self.emit(Instr::Load(scale));
        self.emit(Instr::Swp(Reg::B));
        self.emit(Instr::Load(quotient));
        self.emit(Instr::Add(Operand::Reg(Reg::B)));
        self.emit(Instr::Store(quotient));

        self.mark(skip);
        self.emit(Instr::Load(scaled));
        self.emit(Instr::Shr(Reg::A));
        self.emit(Instr::Store(scaled));
        self.emit(Instr::Load(scale));
        self.emit(Instr::Shr(Reg::A));
        self.emit(Instr::Store(scale));
        self.emit(Instr::Jump(Target::Label(sub_down)));

        self.mark(zero);
        self.emit(Instr::Rst(Reg::A));
        self.emit(Instr::Store(quotient));
        self.emit(Instr::Store(remainder));

        self.mark(done);
        self.emit(Instr::Load(match result {
            DivResult::Quotient => quotient,
            DivResult::Remainder => remainder,
        }));
    }
}
