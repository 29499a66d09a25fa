//! The AST-walking code generator.
//!
//! Walks a [`Program`] and emits the final instruction stream, deciding
//! storage layout through the symbol table, lowering expressions and
//! conditions, and backpatching jump targets through the label table.
//!
//! Register convention is fixed: `a` is the accumulator every primitive
//! operates on, `b` holds the secondary operand around an `ADD`/`SUB`/
//! `RLOAD`/`RSTORE`, and everything that must survive a nested evaluation
//! is spilled to a fresh temporary cell. Temporaries are never reused.

mod arith;
mod cond;

use impc_isa::{Instr, Label, Operand, Reg, Target};
use indexmap::IndexMap;

use crate::ast::{
    Command, Declaration, Expr, ForDirection, Ident, Main, Name, ParamKind, Procedure, Program,
};
use crate::error::CodegenError;
use crate::labels::LabelTable;
use crate::span::Spanned;
use crate::symbols::{Symbol, SymbolTable};

use arith::DivResult;

#[derive(Debug, Clone, Copy)]
struct ParamSlot {
    kind: ParamKind,
    address: u64,
}

#[derive(Debug, Clone)]
struct ProcInfo {
    entry: Label,
    params: Vec<ParamSlot>,
}

pub struct CodeGen {
    symbols: SymbolTable,
    labels: LabelTable,
    code: Vec<Instr>,
    /// Procedures whose bodies have already been generated. Populating this
    /// only after a body is finished is what makes self- and forward-calls
    /// unresolvable, which keeps recursion out of the language.
    procedures: IndexMap<String, ProcInfo>,
}

/// Compiles a whole program into its final instruction stream.
pub fn generate(program: &Program) -> Result<Vec<Instr>, CodegenError> {
    CodeGen::new().run(program)
}

impl CodeGen {
    fn new() -> Self {
        Self {
            symbols: SymbolTable::new(),
            labels: LabelTable::new(),
            code: Vec::new(),
            procedures: IndexMap::new(),
        }
    }

    fn run(mut self, program: &Program) -> Result<Vec<Instr>, CodegenError> {
        if !program.procedures.is_empty() {
            // Falling off the end of the stream must never execute a
            // procedure body, so all of them sit behind one jump to main.
            let main_entry = self.labels.fresh();
            self.emit(Instr::Jump(Target::Label(main_entry)));
            for procedure in &program.procedures {
                self.gen_procedure(procedure)?;
            }
            self.mark(main_entry);
        }
        self.gen_main(&program.main)?;
        self.labels.resolve(&mut self.code)?;
        self.code.push(Instr::Halt);
        Ok(self.code)
    }

    fn emit(&mut self, instr: Instr) {
        self.code.push(instr);
    }

    fn mark(&mut self, label: Label) {
        self.labels.mark(label, self.code.len());
    }

    fn gen_procedure(&mut self, procedure: &Procedure) -> Result<(), CodegenError> {
        if self.procedures.contains_key(&procedure.name.text) {
            return Err(CodegenError::DuplicateDeclaration {
                name: procedure.name.text.clone(),
                span: procedure.name.span,
            });
        }

        let entry = self.labels.fresh();
        self.symbols.enter_scope();
        let mut params = Vec::with_capacity(procedure.params.len());
        for param in &procedure.params {
            let symbol = self
                .symbols
                .declare_param(&param.name, param.kind.is_array())?;
            params.push(ParamSlot {
                kind: param.kind,
                address: symbol.address,
            });
        }
        self.gen_declarations(&procedure.declarations)?;
        self.mark(entry);
        self.gen_commands(&procedure.commands)?;
        self.emit(Instr::Rtrn);
        self.symbols.exit_scope();

        self.procedures
            .insert(procedure.name.text.clone(), ProcInfo { entry, params });
        Ok(())
    }

    fn gen_main(&mut self, main: &Main) -> Result<(), CodegenError> {
        self.symbols.enter_scope();
        self.gen_declarations(&main.declarations)?;
        self.gen_commands(&main.commands)?;
        self.symbols.exit_scope();
        Ok(())
    }

    fn gen_declarations(
        &mut self,
        declarations: &[Spanned<Declaration>],
    ) -> Result<(), CodegenError> {
        for declaration in declarations {
            match &declaration.node {
                Declaration::Var(name) => {
                    self.symbols.declare_variable(name)?;
                }
                Declaration::Array { name, start, end } => {
                    self.symbols.declare_array(name, *start, *end)?;
                }
            }
        }
        Ok(())
    }

    fn gen_commands(&mut self, commands: &[Spanned<Command>]) -> Result<(), CodegenError> {
        for command in commands {
            self.gen_command(&command.node)?;
        }
        Ok(())
    }

    fn gen_command(&mut self, command: &Command) -> Result<(), CodegenError> {
        match command {
            Command::Assign { target, value } => {
                self.check_writable(target.name())?;
                self.gen_expr(value)?;
                self.gen_store_ident(target)
            }
            Command::Read { target } => {
                self.check_writable(target.name())?;
                self.emit(Instr::Read);
                self.gen_store_ident(target)
            }
            Command::Write { value } => {
                self.gen_expr(value)?;
                self.emit(Instr::Write);
                Ok(())
            }
            Command::If {
                condition,
                then_branch,
                else_branch,
            } => self.gen_if(condition, then_branch, else_branch),
            Command::While { condition, body } => self.gen_while(condition, body),
            Command::Repeat { body, condition } => self.gen_repeat(body, condition),
            Command::For {
                iterator,
                from,
                to,
                direction,
                body,
            } => self.gen_for(iterator, from, to, *direction, body),
            Command::Call { name, args } => self.gen_call(name, args),
        }
    }

    /// Rejects writes through a name currently bound as a loop iterator.
    fn check_writable(&self, name: &Name) -> Result<(), CodegenError> {
        let symbol = self.symbols.lookup(name)?;
        if symbol.is_iterator {
            return Err(CodegenError::AssignToIterator {
                name: name.text.clone(),
                span: name.span,
            });
        }
        Ok(())
    }

    /// Stores the accumulator into an assignment/read target.
    fn gen_store_ident(&mut self, target: &Ident) -> Result<(), CodegenError> {
        match target {
            Ident::Var(name) => {
                let symbol = self.lookup_scalar(name)?;
                self.store_scalar(symbol);
            }
            Ident::Indexed(name, index) => {
                let symbol = self.lookup_array(name)?;
                // Address computation clobbers the accumulator, so park the
                // value first.
                let value_cell = self.symbols.allocate_temp();
                self.emit(Instr::Store(value_cell));
                self.gen_array_addr(symbol, index)?;
                self.emit(Instr::Swp(Reg::B));
                self.emit(Instr::Load(value_cell));
                self.emit(Instr::Rstore(Reg::B));
            }
        }
        self.symbols.mark_initialized(&target.name().text);
        Ok(())
    }

    fn gen_if(
        &mut self,
        condition: &crate::ast::Condition,
        then_branch: &[Spanned<Command>],
        else_branch: &[Spanned<Command>],
    ) -> Result<(), CodegenError> {
        let else_label = self.labels.fresh();
        self.gen_condition_jump(condition, else_label, false)?;
        self.gen_commands(then_branch)?;
        if else_branch.is_empty() {
            self.mark(else_label);
        } else {
            let end_label = self.labels.fresh();
            self.emit(Instr::Jump(Target::Label(end_label)));
            self.mark(else_label);
            self.gen_commands(else_branch)?;
            self.mark(end_label);
        }
        Ok(())
    }

    fn gen_while(
        &mut self,
        condition: &crate::ast::Condition,
        body: &[Spanned<Command>],
    ) -> Result<(), CodegenError> {
        let start = self.labels.fresh();
        let exit = self.labels.fresh();
        self.mark(start);
        self.gen_condition_jump(condition, exit, false)?;
        self.gen_commands(body)?;
        self.emit(Instr::Jump(Target::Label(start)));
        self.mark(exit);
        Ok(())
    }

    fn gen_repeat(
        &mut self,
        body: &[Spanned<Command>],
        condition: &crate::ast::Condition,
    ) -> Result<(), CodegenError> {
        // Body first, then loop back while the condition is still false.
        let start = self.labels.fresh();
        self.mark(start);
        self.gen_commands(body)?;
        self.gen_condition_jump(condition, start, false)?;
        Ok(())
    }

    fn gen_for(
        &mut self,
        iterator: &Name,
        from: &Expr,
        to: &Expr,
        direction: ForDirection,
        body: &[Spanned<Command>],
    ) -> Result<(), CodegenError> {
        let existing = self.symbols.lookup(iterator).ok();
        let symbol = match existing {
            Some(symbol) => {
                if symbol.is_array {
                    return Err(CodegenError::NotAScalar {
                        name: iterator.text.clone(),
                        span: iterator.span,
                    });
                }
                symbol
            }
            None => self.symbols.declare_iterator(iterator)?,
        };
        let previous_flag = self.symbols.set_iterator(&iterator.text, true);

        self.gen_expr(from)?;
        self.store_scalar(symbol);
        self.symbols.mark_initialized(&iterator.text);

        // The end expression is evaluated once, before the loop; the limit
        // lives in its own cell for the whole run.
        let limit = self.symbols.allocate_temp();
        self.gen_expr(to)?;
        self.emit(Instr::Store(limit));

        let start = self.labels.fresh();
        let exit = self.labels.fresh();
        self.mark(start);

        // Exit once the iterator has passed the limit: the loop includes
        // the limit value itself.
        // The iterator loads first in both directions: loading a parameter
        // iterator goes through register b, which must not hold the other
        // operand yet.
        match direction {
            ForDirection::Up => {
                self.load_scalar(symbol);
                self.emit(Instr::Swp(Reg::B));
                self.emit(Instr::Load(limit));
                self.emit(Instr::Swp(Reg::B)); // a = iterator, b = limit
                self.emit(Instr::Sub(Operand::Reg(Reg::B))); // iterator - limit
            }
            ForDirection::Down => {
                self.load_scalar(symbol);
                self.emit(Instr::Swp(Reg::B));
                self.emit(Instr::Load(limit));
                self.emit(Instr::Sub(Operand::Reg(Reg::B))); // limit - iterator
            }
        }
        self.emit(Instr::Jpos(Target::Label(exit)));

        self.gen_commands(body)?;

        self.load_scalar(symbol);
        match direction {
            ForDirection::Up => self.emit(Instr::Inc(Reg::A)),
            ForDirection::Down => {
                // DEC saturates, so a descending loop whose inclusive lower
                // bound is 0 would otherwise spin on 0 forever.
                self.emit(Instr::Jzero(Target::Label(exit)));
                self.emit(Instr::Dec(Reg::A));
            }
        }
        self.store_scalar(symbol);
        self.emit(Instr::Jump(Target::Label(start)));
        self.mark(exit);

        let restored = if existing.is_some() {
            previous_flag
        } else {
            false
        };
        self.symbols.set_iterator(&iterator.text, restored);
        Ok(())
    }

    fn gen_call(&mut self, name: &Name, args: &[Expr]) -> Result<(), CodegenError> {
        let Some(info) = self.procedures.get(&name.text).cloned() else {
            return Err(CodegenError::UnknownProcedure {
                name: name.text.clone(),
                span: name.span,
            });
        };

        if info.params.len() != args.len() {
            return Err(CodegenError::ArgumentMismatch {
                name: name.text.clone(),
                details: format!(
                    "expected {} argument(s), got {}",
                    info.params.len(),
                    args.len()
                ),
                span: name.span,
            });
        }

        // Every parameter is a reference cell; bind each one to an address
        // before transferring control.
        for (position, (arg, slot)) in args.iter().zip(&info.params).enumerate() {
            match slot.kind {
                ParamKind::Array => self.bind_array_arg(name, position, arg, slot.address)?,
                ParamKind::ValueIn | ParamKind::ValueOut => {
                    self.bind_scalar_arg(name, position, arg, slot.address)?;
                }
            }
        }

        self.emit(Instr::Call(Target::Label(info.entry)));
        Ok(())
    }

    fn bind_array_arg(
        &mut self,
        callee: &Name,
        position: usize,
        arg: &Expr,
        slot_address: u64,
    ) -> Result<(), CodegenError> {
        let Expr::Variable(arg_name) = arg else {
            return Err(CodegenError::ArgumentMismatch {
                name: callee.text.clone(),
                details: format!("argument {} must name an array", position + 1),
                span: callee.span,
            });
        };
        let symbol = self.symbols.lookup(arg_name)?;
        if !symbol.is_array {
            return Err(CodegenError::ArgumentMismatch {
                name: callee.text.clone(),
                details: format!("'{}' is not an array", arg_name.text),
                span: arg_name.span,
            });
        }
        if symbol.is_param {
            // Forward the pointer we were given; it is already biased.
            self.emit(Instr::Load(symbol.address));
        } else {
            // The callee computes `pointer + index` directly, so the bound
            // pointer is `base - start` in two's complement; wrapping ADD
            // lands on the right cell for every in-range index.
            self.gen_const(symbol.address.wrapping_sub(symbol.array_start));
        }
        self.emit(Instr::Store(slot_address));
        Ok(())
    }

    fn bind_scalar_arg(
        &mut self,
        callee: &Name,
        position: usize,
        arg: &Expr,
        slot_address: u64,
    ) -> Result<(), CodegenError> {
        match arg {
            Expr::Variable(arg_name) => {
                let symbol = self.symbols.lookup(arg_name)?;
                if symbol.is_array {
                    return Err(CodegenError::ArgumentMismatch {
                        name: callee.text.clone(),
                        details: format!(
                            "argument {} is the array '{}' but a scalar is expected",
                            position + 1,
                            arg_name.text
                        ),
                        span: arg_name.span,
                    });
                }
                if symbol.is_param {
                    self.emit(Instr::Load(symbol.address));
                } else {
                    self.gen_const(symbol.address);
                }
                self.emit(Instr::Store(slot_address));
                // The callee may write through the reference.
                self.symbols.mark_initialized(&arg_name.text);
            }
            other => {
                // Literals (and any non-lvalue expression) must be
                // addressable: materialize into a fresh cell and bind that
                // cell's address.
                self.gen_expr(other)?;
                let cell = self.symbols.allocate_temp();
                self.emit(Instr::Store(cell));
                self.gen_const(cell);
                self.emit(Instr::Store(slot_address));
            }
        }
        Ok(())
    }

    // --- expressions ---

    fn gen_expr(&mut self, expr: &Expr) -> Result<(), CodegenError> {
        match expr {
            Expr::Number(value) => {
                self.gen_const(*value);
                Ok(())
            }
            Expr::Variable(name) => {
                let symbol = self.lookup_scalar(name)?;
                self.load_scalar(symbol);
                Ok(())
            }
            Expr::ArrayRef(name, index) => {
                let symbol = self.lookup_array(name)?;
                self.gen_array_addr(symbol, index)?;
                self.emit(Instr::Swp(Reg::B));
                self.emit(Instr::Rload(Reg::B));
                Ok(())
            }
            Expr::BinOp { left, op, right } => self.gen_binop(left, *op, right),
        }
    }

    fn gen_binop(
        &mut self,
        left: &Expr,
        op: crate::ast::BinaryOp,
        right: &Expr,
    ) -> Result<(), CodegenError> {
        use crate::ast::BinaryOp;

        // Literal-2 peepholes come before the generic paths.
        match op {
            BinaryOp::Mul => {
                if matches!(right, Expr::Number(2)) {
                    self.gen_expr(left)?;
                    self.emit(Instr::Shl(Reg::A));
                    return Ok(());
                }
                if matches!(left, Expr::Number(2)) {
                    self.gen_expr(right)?;
                    self.emit(Instr::Shl(Reg::A));
                    return Ok(());
                }
            }
            BinaryOp::Div => {
                if matches!(right, Expr::Number(2)) {
                    self.gen_expr(left)?;
                    self.emit(Instr::Shr(Reg::A));
                    return Ok(());
                }
            }
            BinaryOp::Mod => {
                if matches!(right, Expr::Number(2)) {
                    // x - (x>>1<<1) isolates the low bit.
                    self.gen_expr(left)?;
                    let original = self.symbols.allocate_temp();
                    self.emit(Instr::Store(original));
                    self.emit(Instr::Shr(Reg::A));
                    self.emit(Instr::Shl(Reg::A));
                    self.emit(Instr::Swp(Reg::B));
                    self.emit(Instr::Load(original));
                    self.emit(Instr::Sub(Operand::Reg(Reg::B)));
                    return Ok(());
                }
            }
            BinaryOp::Add | BinaryOp::Sub => {}
        }

        match op {
            BinaryOp::Add | BinaryOp::Sub => {
                // Evaluating the left side may clobber every register, so
                // the right side's value waits in a temporary.
                self.gen_expr(right)?;
                let spill = self.symbols.allocate_temp();
                self.emit(Instr::Store(spill));
                self.gen_expr(left)?;
                let operand = Operand::Mem(spill);
                self.emit(match op {
                    BinaryOp::Add => Instr::Add(operand),
                    _ => Instr::Sub(operand),
                });
            }
            BinaryOp::Mul => {
                let (left_cell, right_cell) = self.spill_operands(left, right)?;
                self.gen_multiply(left_cell, right_cell);
            }
            BinaryOp::Div => {
                let (left_cell, right_cell) = self.spill_operands(left, right)?;
                self.gen_divmod(left_cell, right_cell, DivResult::Quotient);
            }
            BinaryOp::Mod => {
                let (left_cell, right_cell) = self.spill_operands(left, right)?;
                self.gen_divmod(left_cell, right_cell, DivResult::Remainder);
            }
        }
        Ok(())
    }

    /// Evaluates both operands into fresh cells; the loop-based algorithms
    /// need memory-resident operands across register-clobbering iterations.
    fn spill_operands(&mut self, left: &Expr, right: &Expr) -> Result<(u64, u64), CodegenError> {
        self.gen_expr(right)?;
        let right_cell = self.symbols.allocate_temp();
        self.emit(Instr::Store(right_cell));
        self.gen_expr(left)?;
        let left_cell = self.symbols.allocate_temp();
        self.emit(Instr::Store(left_cell));
        Ok((left_cell, right_cell))
    }

    /// Synthesizes the literal `value` in the accumulator by replaying its
    /// binary digits, most significant first.
    fn gen_const(&mut self, value: u64) {
        self.emit(Instr::Rst(Reg::A));
        if value == 0 {
            return;
        }
        let bits = 64 - value.leading_zeros();
        for bit in (0..bits).rev() {
            if bit == bits - 1 {
                // The leading digit of a nonzero literal is always 1.
                self.emit(Instr::Inc(Reg::A));
            } else {
                self.emit(Instr::Shl(Reg::A));
                if (value >> bit) & 1 == 1 {
                    self.emit(Instr::Inc(Reg::A));
                }
            }
        }
    }

    /// Leaves the element address `base + (index - start)` (declared array)
    /// or `pointer + index` (array parameter) in the accumulator.
    fn gen_array_addr(&mut self, symbol: Symbol, index: &Expr) -> Result<(), CodegenError> {
        self.gen_expr(index)?;
        if symbol.is_param {
            self.emit(Instr::Swp(Reg::B));
            self.emit(Instr::Load(symbol.address));
            self.emit(Instr::Add(Operand::Reg(Reg::B)));
        } else if symbol.address >= symbol.array_start {
            let bias = symbol.address - symbol.array_start;
            if bias > 0 {
                self.emit(Instr::Swp(Reg::B));
                self.gen_const(bias);
                self.emit(Instr::Add(Operand::Reg(Reg::B)));
            }
        } else {
            // base < start: the bias is negative, so subtract its absolute
            // value from the index. In-range indices keep the difference
            // non-negative, which is all the saturating SUB needs.
            let bias = symbol.array_start - symbol.address;
            self.emit(Instr::Swp(Reg::B));
            self.gen_const(bias);
            self.emit(Instr::Swp(Reg::B));
            self.emit(Instr::Sub(Operand::Reg(Reg::B)));
        }
        Ok(())
    }

    /// Loads a scalar's value: one direct load, or a pointer load plus an
    /// indirect load for a by-reference parameter.
    fn load_scalar(&mut self, symbol: Symbol) {
        if symbol.is_param {
            self.emit(Instr::Load(symbol.address));
            self.emit(Instr::Swp(Reg::B));
            self.emit(Instr::Rload(Reg::B));
        } else {
            self.emit(Instr::Load(symbol.address));
        }
    }

    /// Stores the accumulator into a scalar, dereferencing parameters.
    fn store_scalar(&mut self, symbol: Symbol) {
        if symbol.is_param {
            self.emit(Instr::Swp(Reg::B));
            self.emit(Instr::Load(symbol.address));
            self.emit(Instr::Swp(Reg::B));
            self.emit(Instr::Rstore(Reg::B));
        } else {
            self.emit(Instr::Store(symbol.address));
        }
    }

    fn lookup_scalar(&self, name: &Name) -> Result<Symbol, CodegenError> {
        let symbol = self.symbols.lookup(name)?;
        if symbol.is_array {
            return Err(CodegenError::NotAScalar {
                name: name.text.clone(),
                span: name.span,
            });
        }
        Ok(symbol)
    }

    fn lookup_array(&self, name: &Name) -> Result<Symbol, CodegenError> {
        let symbol = self.symbols.lookup(name)?;
        if !symbol.is_array {
            return Err(CodegenError::NotAnArray {
                name: name.text.clone(),
                span: name.span,
            });
        }
        Ok(symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn const_sequence(value: u64) -> Vec<Instr> {
        let mut r#gen = CodeGen::new();
        r#gen.gen_const(value);
        r#gen.code
    }

    #[test]
    fn zero_literal_is_just_a_reset() {
        assert_eq!(const_sequence(0), vec![Instr::Rst(Reg::A)]);
    }

    #[test]
    fn literal_replays_binary_digits_most_significant_first() {
        // 5 = 0b101
        assert_eq!(
            const_sequence(5),
            vec![
                Instr::Rst(Reg::A),
                Instr::Inc(Reg::A),
                Instr::Shl(Reg::A),
                Instr::Shl(Reg::A),
                Instr::Inc(Reg::A),
            ]
        );
        // 12 = 0b1100
        assert_eq!(
            const_sequence(12),
            vec![
                Instr::Rst(Reg::A),
                Instr::Inc(Reg::A),
                Instr::Shl(Reg::A),
                Instr::Inc(Reg::A),
                Instr::Shl(Reg::A),
                Instr::Shl(Reg::A),
            ]
        );
    }

    #[test]
    fn literal_instruction_count_is_within_twice_bit_length() {
        for value in [1_u64, 2, 3, 7, 8, 100, 255, 256, 1023, 65_535, 1 << 40] {
            let bits = u64::from(64 - value.leading_zeros());
            let emitted = const_sequence(value).len() as u64;
            // Reset included, at most two instructions per binary digit.
            assert!(
                emitted <= 2 * bits,
                "literal {value} took {emitted} instructions"
            );
        }
    }

    #[test]
    fn literal_sequence_computes_the_value() {
        for value in [0_u64, 1, 2, 3, 4, 5, 6, 7, 9, 31, 32, 100, 1000, 65_535] {
            let mut accumulator: u64 = u64::MAX; // arbitrary junk; RST clears it
            for instr in const_sequence(value) {
                match instr {
                    Instr::Rst(Reg::A) => accumulator = 0,
                    Instr::Inc(Reg::A) => accumulator += 1,
                    Instr::Shl(Reg::A) => accumulator *= 2,
                    other => panic!("unexpected instruction {other}"),
                }
            }
            assert_eq!(accumulator, value);
        }
    }
}
