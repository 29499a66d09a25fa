//! Symbolic jump targets and the backpatching pass.
//!
//! Jump targets are handed out as dense label ids while code is being
//! emitted; marking a label pins it to the absolute index of the next
//! instruction. Once the whole tree has been walked, [`LabelTable::resolve`]
//! substitutes every pending label in place over the structured instruction
//! stream. No text is re-parsed.

use impc_isa::{Instr, Label, Target};

use crate::error::CodegenError;

#[derive(Debug, Default)]
pub struct LabelTable {
    marks: Vec<Option<u64>>,
}

impl LabelTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new, unmarked label.
    pub fn fresh(&mut self) -> Label {
        let label = Label(self.marks.len() as u32);
        self.marks.push(None);
        label
    }

    /// Pins `label` to instruction index `at` (the index of the next
    /// instruction to be emitted). Each label is marked exactly once.
    pub fn mark(&mut self, label: Label, at: usize) {
        let slot = &mut self.marks[label.0 as usize];
        assert!(slot.is_none(), "label {label} marked twice");
        *slot = Some(at as u64);
    }

    /// Rewrites every pending-label jump operand to its absolute index.
    pub fn resolve(&self, code: &mut [Instr]) -> Result<(), CodegenError> {
        for instr in code.iter_mut() {
            let Some(target) = instr.target_mut() else {
                continue;
            };
            if let Target::Label(label) = *target {
                let index = self.marks[label.0 as usize]
                    .ok_or(CodegenError::UnresolvedLabel { label })?;
                *target = Target::Index(index);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use impc_isa::Reg;

    #[test]
    fn resolves_forward_and_backward_references() {
        let mut labels = LabelTable::new();
        let top = labels.fresh();
        let exit = labels.fresh();

        let mut code = vec![
            Instr::Load(0),                     // 0, `top` marks here
            Instr::Jzero(Target::Label(exit)),  // 1, forward
            Instr::Dec(Reg::A),
            Instr::Store(0),
            Instr::Jump(Target::Label(top)),    // 4, backward
        ];
        labels.mark(top, 0);
        labels.mark(exit, code.len());

        labels.resolve(&mut code).expect("resolve");
        assert_eq!(code[1], Instr::Jzero(Target::Index(5)));
        assert_eq!(code[4], Instr::Jump(Target::Index(0)));
    }

    #[test]
    fn unmarked_label_is_an_internal_error() {
        let mut labels = LabelTable::new();
        let dangling = labels.fresh();
        let mut code = vec![Instr::Jump(Target::Label(dangling))];
        let err = labels.resolve(&mut code).expect_err("must fail");
        assert_eq!(err, CodegenError::UnresolvedLabel { label: dangling });
    }

    #[test]
    #[should_panic(expected = "marked twice")]
    fn double_marking_panics() {
        let mut labels = LabelTable::new();
        let label = labels.fresh();
        labels.mark(label, 0);
        labels.mark(label, 1);
    }

    #[test]
    fn non_jump_instructions_are_untouched() {
        let labels = LabelTable::new();
        let mut code = vec![Instr::Read, Instr::Store(3), Instr::Halt];
        let before = code.clone();
        labels.resolve(&mut code).expect("resolve");
        assert_eq!(code, before);
    }
}
