//! Relational expressions lowered to subtract-and-test jump sequences.
//!
//! Subtraction truncates at zero, so one subtraction can only answer a
//! one-sided ordering question. Orderings pick the direction whose
//! positivity (or zeroness) encodes the requested relation; equality and
//! inequality need both directions, with both operands parked in cells
//! because each test destroys the accumulator.

use impc_isa::{Instr, Label, Operand, Reg, Target};

use crate::ast::{Condition, RelOp};
use crate::error::CodegenError;

use super::CodeGen;

impl CodeGen {
    /// Emits a conditional jump to `target`, taken exactly when the
    /// condition's truth equals `jump_if_true`.
    pub(super) fn gen_condition_jump(
        &mut self,
        condition: &Condition,
        target: Label,
        jump_if_true: bool,
    ) -> Result<(), CodegenError> {
        match condition.op {
            RelOp::Gt | RelOp::Lt | RelOp::Le | RelOp::Ge => {
                self.gen_ordering_jump(condition, target, jump_if_true)
            }
            RelOp::Eq | RelOp::Neq => {
                let jump_on_equal = (condition.op == RelOp::Eq) == jump_if_true;
                self.gen_equality_jump(condition, target, jump_on_equal)
            }
        }
    }

    fn gen_ordering_jump(
        &mut self,
        condition: &Condition,
        target: Label,
        jump_if_true: bool,
    ) -> Result<(), CodegenError> {
        // Right first; its value waits in a cell while the left side runs.
        self.gen_expr(&condition.right)?;
        let right_cell = self.symbols.allocate_temp();
        self.emit(Instr::Store(right_cell));
        self.gen_expr(&condition.left)?;
        self.emit(Instr::Swp(Reg::B));
        self.emit(Instr::Load(right_cell));
        self.emit(Instr::Swp(Reg::B)); // a = left, b = right

        // `>` and `<=` test left - right; `<` and `>=` test right - left.
        let left_minus_right = matches!(condition.op, RelOp::Gt | RelOp::Le);
        if !left_minus_right {
            self.emit(Instr::Swp(Reg::B));
        }
        self.emit(Instr::Sub(Operand::Reg(Reg::B)));

        // Strict relations are true when the difference is positive, the
        // inclusive ones when it is zero; `jump_if_true = false` flips the
        // jump kind.
        let strict = matches!(condition.op, RelOp::Gt | RelOp::Lt);
        if strict == jump_if_true {
            self.emit(Instr::Jpos(Target::Label(target)));
        } else {
            self.emit(Instr::Jzero(Target::Label(target)));
        }
        Ok(())
    }

    /// Two-sided equality test: the operands are equal exactly when neither
    /// `left - right` nor `right - left` is positive.
    fn gen_equality_jump(
        &mut self,
        condition: &Condition,
        target: Label,
        jump_on_equal: bool,
    ) -> Result<(), CodegenError> {
        self.gen_expr(&condition.right)?;
        let right_cell = self.symbols.allocate_temp();
        self.emit(Instr::Store(right_cell));
        self.gen_expr(&condition.left)?;
        let left_cell = self.symbols.allocate_temp();
        self.emit(Instr::Store(left_cell));

        if jump_on_equal {
            let differ = self.labels.fresh();
            self.gen_difference(left_cell, right_cell);
            self.emit(Instr::Jpos(Target::Label(differ)));
            self.gen_difference(right_cell, left_cell);
            self.emit(Instr::Jpos(Target::Label(differ)));
            self.emit(Instr::Jump(Target::Label(target)));
            self.mark(differ);
        } else {
            // Short-circuit to the target on the first positive difference.
            self.gen_difference(left_cell, right_cell);
            self.emit(Instr::Jpos(Target::Label(target)));
            self.gen_difference(right_cell, left_cell);
            self.emit(Instr::Jpos(Target::Label(target)));
        }
        Ok(())
    }

    /// `a := mem[minuend] - mem[subtrahend]` (truncated).
    fn gen_difference(&mut self, minuend: u64, subtrahend: u64) {
        self.emit(Instr::Load(subtrahend));
        self.emit(Instr::Swp(Reg::B));
        self.emit(Instr::Load(minuend));
        self.emit(Instr::Sub(Operand::Reg(Reg::B)));
    }
}
