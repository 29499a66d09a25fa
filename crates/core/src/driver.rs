use thiserror::Error;

use impc_isa::{Instr, format_program};

use crate::codegen::generate;
use crate::diag::{Diagnostic, RenderOptions, render_diagnostics_with_options};
use crate::parser::parse;
use crate::span::SourceMap;

#[derive(Debug, Clone)]
pub struct CompileOutput {
    /// The final, label-resolved instruction stream, ending in `HALT`.
    pub instructions: Vec<Instr>,
    /// Text rendering of the stream, one instruction per line.
    pub text: String,
}

#[derive(Debug, Error)]
#[error("compilation failed")]
pub struct CompileError {
    pub diagnostics: Vec<Diagnostic>,
    pub rendered: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CompileRenderOptions {
    pub color: bool,
}

pub fn compile_source(source_name: &str, source_text: &str) -> Result<CompileOutput, CompileError> {
    compile_source_with_options(source_name, source_text, CompileRenderOptions::default())
}

pub fn compile_source_with_options(
    source_name: &str,
    source_text: &str,
    options: CompileRenderOptions,
) -> Result<CompileOutput, CompileError> {
    let mut source_map = SourceMap::default();
    let source_id = source_map.add_source(source_name, source_text);
    let render_options = RenderOptions {
        color: options.color,
    };

    let ast = parse(source_id, source_text)
        .map_err(|diagnostics| fail_with_rendered(&source_map, diagnostics, render_options))?;

    let instructions = generate(&ast).map_err(|error| {
        fail_with_rendered(
            &source_map,
            vec![error.to_diagnostic(source_id)],
            render_options,
        )
    })?;

    let text = format_program(&instructions);
    Ok(CompileOutput { instructions, text })
}

fn fail_with_rendered(
    source_map: &SourceMap,
    diagnostics: Vec<Diagnostic>,
    options: RenderOptions,
) -> CompileError {
    let rendered = render_diagnostics_with_options(source_map, &diagnostics, options);
    CompileError {
        diagnostics,
        rendered,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_a_minimal_program_to_text() {
        let output = compile_source("demo.imp", "PROGRAM IS x IN x := 0; WRITE x; END")
            .expect("compile");
        assert_eq!(output.instructions.last(), Some(&Instr::Halt));
        assert!(output.text.ends_with("HALT\n"));
        assert_eq!(output.text.lines().count(), output.instructions.len());
    }

    #[test]
    fn syntax_errors_come_back_rendered() {
        let error = compile_source("demo.imp", "PROGRAM IS x IN END").expect_err("must fail");
        assert!(!error.diagnostics.is_empty());
        assert!(error.rendered.contains("demo.imp"));
    }

    #[test]
    fn codegen_errors_carry_the_offending_name() {
        let error =
            compile_source("demo.imp", "PROGRAM IS x IN y := 1; END").expect_err("must fail");
        assert_eq!(error.diagnostics.len(), 1);
        assert!(
            error.diagnostics[0]
                .message
                .contains("undeclared variable 'y'")
        );
    }
}
