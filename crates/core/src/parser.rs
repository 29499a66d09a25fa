use chumsky::{
    IterParser, Parser as _,
    error::{RichPattern, RichReason},
    extra,
    input::{Input as _, Stream, ValueInput},
    prelude::{Rich, SimpleSpan, end, just, recursive},
};

use crate::ast::{
    BinaryOp, Command, Condition, Declaration, Expr, ForDirection, Ident, Main, Name, Param,
    ParamKind, Procedure, Program, RelOp,
};
use crate::diag::Diagnostic;
use crate::lexer::{TokenKind, lex};
use crate::span::{SourceId, Span, Spanned};

type ParseError<'src> = Rich<'src, TokenKind>;
type ParseExtra<'src> = extra::Err<ParseError<'src>>;

pub fn parse(source_id: SourceId, source_text: &str) -> Result<Program, Vec<Diagnostic>> {
    let tokens = lex(source_id, source_text)?;
    let end_offset = tokens.last().map(|token| token.span.end).unwrap_or(0);
    let token_stream = Stream::from_iter(tokens.into_iter().map(|token| {
        let span = (token.span.start..token.span.end).into();
        (token.kind, span)
    }))
    .map((end_offset..end_offset).into(), |(kind, span): (_, _)| {
        (kind, span)
    });

    let (output, errors) = program_parser(source_id)
        .parse(token_stream)
        .into_output_errors();
    let diagnostics = errors
        .into_iter()
        .map(|error| rich_error_to_diagnostic(source_id, error))
        .collect::<Vec<_>>();

    match (output, diagnostics.is_empty()) {
        (Some(program), true) => Ok(program),
        (_, _) => Err(if diagnostics.is_empty() {
            vec![Diagnostic::error(
                Span::top(source_id),
                "invalid syntax: empty program",
            )]
        } else {
            diagnostics
        }),
    }
}

fn program_parser<'src, I>(
    source_id: SourceId,
) -> impl chumsky::Parser<'src, I, Program, ParseExtra<'src>>
where
    I: ValueInput<'src, Token = TokenKind, Span = SimpleSpan>,
{
    procedure_parser(source_id)
        .repeated()
        .collect::<Vec<_>>()
        .then(main_parser(source_id))
        .then_ignore(end())
        .map(|(procedures, main)| Program { procedures, main })
}

fn procedure_parser<'src, I>(
    source_id: SourceId,
) -> impl chumsky::Parser<'src, I, Procedure, ParseExtra<'src>> + Clone
where
    I: ValueInput<'src, Token = TokenKind, Span = SimpleSpan>,
{
    let param = just(TokenKind::T)
        .ignore_then(name_parser(source_id))
        .map(|name| Param {
            kind: ParamKind::Array,
            name,
        })
        .or(name_parser(source_id).map(|name| Param {
            kind: ParamKind::ValueIn,
            name,
        }));

    let params = param
        .separated_by(just(TokenKind::Comma))
        .collect::<Vec<_>>()
        .delimited_by(just(TokenKind::LParen), just(TokenKind::RParen));

    just(TokenKind::Procedure)
        .ignore_then(name_parser(source_id))
        .then(params)
        .then_ignore(just(TokenKind::Is))
        .then(declarations_parser(source_id))
        .then_ignore(just(TokenKind::In))
        .then(commands_parser(source_id))
        .then_ignore(just(TokenKind::End))
        .map(|(((name, params), declarations), commands)| Procedure {
            name,
            params,
            declarations,
            commands,
        })
        .boxed()
}

fn main_parser<'src, I>(
    source_id: SourceId,
) -> impl chumsky::Parser<'src, I, Main, ParseExtra<'src>> + Clone
where
    I: ValueInput<'src, Token = TokenKind, Span = SimpleSpan>,
{
    just(TokenKind::Program)
        .ignore_then(just(TokenKind::Is))
        .ignore_then(declarations_parser(source_id))
        .then_ignore(just(TokenKind::In))
        .then(commands_parser(source_id))
        .then_ignore(just(TokenKind::End))
        .map(|(declarations, commands)| Main {
            declarations,
            commands,
        })
        .boxed()
}

fn declarations_parser<'src, I>(
    source_id: SourceId,
) -> impl chumsky::Parser<'src, I, Vec<Spanned<Declaration>>, ParseExtra<'src>> + Clone
where
    I: ValueInput<'src, Token = TokenKind, Span = SimpleSpan>,
{
    let range = number_parser()
        .then_ignore(just(TokenKind::Colon))
        .then(number_parser())
        .delimited_by(just(TokenKind::LBracket), just(TokenKind::RBracket));

    let decl = name_parser(source_id)
        .then(range.or_not())
        .map(|(name, range)| match range {
            Some((start, end)) => Declaration::Array { name, start, end },
            None => Declaration::Var(name),
        });

    spanned(decl, source_id)
        .separated_by(just(TokenKind::Comma))
        .collect::<Vec<_>>()
        .boxed()
}

fn commands_parser<'src, I>(
    source_id: SourceId,
) -> impl chumsky::Parser<'src, I, Vec<Spanned<Command>>, ParseExtra<'src>> + Clone
where
    I: ValueInput<'src, Token = TokenKind, Span = SimpleSpan>,
{
    let command = recursive(|command| {
        let commands = spanned(command, source_id)
            .repeated()
            .at_least(1)
            .collect::<Vec<_>>()
            .boxed();

        let expr = expr_parser(source_id);
        let condition = condition_parser(source_id);
        let target = ident_parser(source_id);

        let if_command = just(TokenKind::If)
            .ignore_then(condition.clone())
            .then_ignore(just(TokenKind::Then))
            .then(commands.clone())
            .then(
                just(TokenKind::Else)
                    .ignore_then(commands.clone())
                    .or_not(),
            )
            .then_ignore(just(TokenKind::Endif))
            .map(|((condition, then_branch), else_branch)| Command::If {
                condition,
                then_branch,
                else_branch: else_branch.unwrap_or_default(),
            });

        let while_command = just(TokenKind::While)
            .ignore_then(condition.clone())
            .then_ignore(just(TokenKind::Do))
            .then(commands.clone())
            .then_ignore(just(TokenKind::Endwhile))
            .map(|(condition, body)| Command::While { condition, body });

        let repeat_command = just(TokenKind::Repeat)
            .ignore_then(commands.clone())
            .then_ignore(just(TokenKind::Until))
            .then(condition.clone())
            .then_ignore(just(TokenKind::Semi))
            .map(|(body, condition)| Command::Repeat { body, condition });

        let direction = just(TokenKind::To)
            .to(ForDirection::Up)
            .or(just(TokenKind::Downto).to(ForDirection::Down));

        let for_command = just(TokenKind::For)
            .ignore_then(name_parser(source_id))
            .then_ignore(just(TokenKind::From))
            .then(expr.clone())
            .then(direction)
            .then(expr.clone())
            .then_ignore(just(TokenKind::Do))
            .then(commands.clone())
            .then_ignore(just(TokenKind::Endfor))
            .map(
                |((((iterator, from), direction), to), body)| Command::For {
                    iterator,
                    from,
                    to,
                    direction,
                    body,
                },
            );

        let read_command = just(TokenKind::Read)
            .ignore_then(target.clone())
            .then_ignore(just(TokenKind::Semi))
            .map(|target| Command::Read { target });

        let write_command = just(TokenKind::Write)
            .ignore_then(expr.clone())
            .then_ignore(just(TokenKind::Semi))
            .map(|value| Command::Write { value });

        let call_command = name_parser(source_id)
            .then(
                expr.clone()
                    .separated_by(just(TokenKind::Comma))
                    .collect::<Vec<_>>()
                    .delimited_by(just(TokenKind::LParen), just(TokenKind::RParen)),
            )
            .then_ignore(just(TokenKind::Semi))
            .map(|(name, args)| Command::Call { name, args });

        let assign_command = target
            .then_ignore(just(TokenKind::Assign))
            .then(expr)
            .then_ignore(just(TokenKind::Semi))
            .map(|(target, value)| Command::Assign { target, value });

        if_command
            .or(while_command)
            .or(repeat_command)
            .or(for_command)
            .or(read_command)
            .or(write_command)
            .or(call_command)
            .or(assign_command)
            .boxed()
    });

    spanned(command, source_id)
        .repeated()
        .at_least(1)
        .collect::<Vec<_>>()
        .boxed()
}

fn expr_parser<'src, I>(
    source_id: SourceId,
) -> impl chumsky::Parser<'src, I, Expr, ParseExtra<'src>> + Clone
where
    I: ValueInput<'src, Token = TokenKind, Span = SimpleSpan>,
{
    recursive(|expr| {
        let reference = name_parser(source_id)
            .then(
                expr.clone()
                    .delimited_by(just(TokenKind::LBracket), just(TokenKind::RBracket))
                    .or_not(),
            )
            .map(|(name, index)| match index {
                Some(index) => Expr::ArrayRef(name, Box::new(index)),
                None => Expr::Variable(name),
            });

        let atom = number_parser()
            .map(Expr::Number)
            .or(reference)
            .or(expr.delimited_by(just(TokenKind::LParen), just(TokenKind::RParen)))
            .boxed();

        let product_op = just(TokenKind::Times)
            .to(BinaryOp::Mul)
            .or(just(TokenKind::Div).to(BinaryOp::Div))
            .or(just(TokenKind::Mod).to(BinaryOp::Mod));

        let product = atom
            .clone()
            .foldl(product_op.then(atom).repeated(), |left, (op, right)| {
                Expr::BinOp {
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                }
            })
            .boxed();

        let sum_op = just(TokenKind::Plus)
            .to(BinaryOp::Add)
            .or(just(TokenKind::Minus).to(BinaryOp::Sub));

        product
            .clone()
            .foldl(sum_op.then(product).repeated(), |left, (op, right)| {
                Expr::BinOp {
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                }
            })
            .boxed()
    })
}

fn condition_parser<'src, I>(
    source_id: SourceId,
) -> impl chumsky::Parser<'src, I, Condition, ParseExtra<'src>> + Clone
where
    I: ValueInput<'src, Token = TokenKind, Span = SimpleSpan>,
{
    let relop = just(TokenKind::Eq)
        .to(RelOp::Eq)
        .or(just(TokenKind::Neq).to(RelOp::Neq))
        .or(just(TokenKind::Le).to(RelOp::Le))
        .or(just(TokenKind::Ge).to(RelOp::Ge))
        .or(just(TokenKind::Lt).to(RelOp::Lt))
        .or(just(TokenKind::Gt).to(RelOp::Gt));

    expr_parser(source_id)
        .then(relop)
        .then(expr_parser(source_id))
        .map(|((left, op), right)| Condition { left, op, right })
        .boxed()
}

fn ident_parser<'src, I>(
    source_id: SourceId,
) -> impl chumsky::Parser<'src, I, Ident, ParseExtra<'src>> + Clone
where
    I: ValueInput<'src, Token = TokenKind, Span = SimpleSpan>,
{
    name_parser(source_id)
        .then(
            expr_parser(source_id)
                .delimited_by(just(TokenKind::LBracket), just(TokenKind::RBracket))
                .or_not(),
        )
        .map(|(name, index)| match index {
            Some(index) => Ident::Indexed(name, index),
            None => Ident::Var(name),
        })
        .boxed()
}

fn name_parser<'src, I>(
    source_id: SourceId,
) -> impl chumsky::Parser<'src, I, Name, ParseExtra<'src>> + Clone
where
    I: ValueInput<'src, Token = TokenKind, Span = SimpleSpan>,
{
    chumsky::select! { TokenKind::Ident(text) => text }
        .map_with(move |text, extra| {
            let span: SimpleSpan = extra.span();
            let range = span.into_range();
            Name {
                text,
                span: Span::new(source_id, range.start, range.end),
            }
        })
        .boxed()
}

fn number_parser<'src, I>() -> impl chumsky::Parser<'src, I, u64, ParseExtra<'src>> + Clone
where
    I: ValueInput<'src, Token = TokenKind, Span = SimpleSpan>,
{
    chumsky::select! { TokenKind::Number(value) => value }.boxed()
}

fn spanned<'src, I, T, P>(
    parser: P,
    source_id: SourceId,
) -> impl chumsky::Parser<'src, I, Spanned<T>, ParseExtra<'src>> + Clone
where
    I: ValueInput<'src, Token = TokenKind, Span = SimpleSpan>,
    P: chumsky::Parser<'src, I, T, ParseExtra<'src>> + Clone,
{
    parser.map_with(move |node, extra| {
        let range = extra.span().into_range();
        Spanned::new(node, Span::new(source_id, range.start, range.end))
    })
}

fn rich_error_to_diagnostic(source_id: SourceId, error: Rich<'_, TokenKind>) -> Diagnostic {
    let range = error.span().into_range();
    let span = Span::new(source_id, range.start, range.end);
    let message = match error.reason() {
        RichReason::Custom(custom) => format!("invalid syntax: {custom}"),
        RichReason::ExpectedFound { expected, found } => {
            let expected = format_expected_patterns(expected);
            let found = found
                .as_deref()
                .map(token_kind_message)
                .unwrap_or_else(|| "end of input".to_string());
            format!("invalid syntax: expected {expected}, found {found}")
        }
    };
    Diagnostic::error(span, message)
}

fn format_expected_patterns(expected: &[RichPattern<'_, TokenKind>]) -> String {
    let mut values = Vec::new();
    for pattern in expected {
        let text = rich_pattern_message(pattern);
        if !values.contains(&text) {
            values.push(text);
        }
    }

    match values.as_slice() {
        [] => "something else".to_string(),
        [single] => single.clone(),
        [a, b] => format!("{a} or {b}"),
        _ => {
            let head = values[..values.len() - 1].join(", ");
            let tail = values.last().expect("non-empty values");
            format!("{head}, or {tail}")
        }
    }
}

fn rich_pattern_message(pattern: &RichPattern<'_, TokenKind>) -> String {
    match pattern {
        RichPattern::Token(token) => token_kind_message(token),
        RichPattern::Label(label) => label.to_string(),
        RichPattern::Identifier(identifier) => format!("'{identifier}'"),
        RichPattern::Any => "any token".to_string(),
        RichPattern::SomethingElse => "something else".to_string(),
        RichPattern::EndOfInput => "end of input".to_string(),
        _ => "something else".to_string(),
    }
}

fn token_kind_message(token: &TokenKind) -> String {
    match token {
        TokenKind::Procedure => "'PROCEDURE'".to_string(),
        TokenKind::Program => "'PROGRAM'".to_string(),
        TokenKind::Is => "'IS'".to_string(),
        TokenKind::In => "'IN'".to_string(),
        TokenKind::End => "'END'".to_string(),
        TokenKind::If => "'IF'".to_string(),
        TokenKind::Then => "'THEN'".to_string(),
        TokenKind::Else => "'ELSE'".to_string(),
        TokenKind::Endif => "'ENDIF'".to_string(),
        TokenKind::While => "'WHILE'".to_string(),
        TokenKind::Do => "'DO'".to_string(),
        TokenKind::Endwhile => "'ENDWHILE'".to_string(),
        TokenKind::Repeat => "'REPEAT'".to_string(),
        TokenKind::Until => "'UNTIL'".to_string(),
        TokenKind::For => "'FOR'".to_string(),
        TokenKind::From => "'FROM'".to_string(),
        TokenKind::To => "'TO'".to_string(),
        TokenKind::Downto => "'DOWNTO'".to_string(),
        TokenKind::Endfor => "'ENDFOR'".to_string(),
        TokenKind::Read => "'READ'".to_string(),
        TokenKind::Write => "'WRITE'".to_string(),
        TokenKind::T => "'T'".to_string(),
        TokenKind::Assign => "':='".to_string(),
        TokenKind::Neq => "'!='".to_string(),
        TokenKind::Ge => "'>='".to_string(),
        TokenKind::Le => "'<='".to_string(),
        TokenKind::Eq => "'='".to_string(),
        TokenKind::Lt => "'<'".to_string(),
        TokenKind::Gt => "'>'".to_string(),
        TokenKind::Plus => "'+'".to_string(),
        TokenKind::Minus => "'-'".to_string(),
        TokenKind::Times => "'*'".to_string(),
        TokenKind::Div => "'/'".to_string(),
        TokenKind::Mod => "'%'".to_string(),
        TokenKind::LParen => "'('".to_string(),
        TokenKind::RParen => "')'".to_string(),
        TokenKind::LBracket => "'['".to_string(),
        TokenKind::RBracket => "']'".to_string(),
        TokenKind::Colon => "':'".to_string(),
        TokenKind::Semi => "';'".to_string(),
        TokenKind::Comma => "','".to_string(),
        TokenKind::Number(value) => format!("number '{value}'"),
        TokenKind::Ident(value) => format!("identifier '{value}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> Program {
        parse(SourceId(0), source).expect("parse")
    }

    #[test]
    fn parses_minimal_main() {
        let program = parse_ok("PROGRAM IS x IN x := 1; END");
        assert!(program.procedures.is_empty());
        assert_eq!(program.main.declarations.len(), 1);
        assert_eq!(program.main.commands.len(), 1);
        assert!(matches!(
            program.main.commands[0].node,
            Command::Assign { .. }
        ));
    }

    #[test]
    fn parses_array_declaration_bounds() {
        let program = parse_ok("PROGRAM IS tab[10:20], x IN x := 0; END");
        let Declaration::Array { name, start, end } = &program.main.declarations[0].node else {
            panic!("expected array declaration");
        };
        assert_eq!(name.text, "tab");
        assert_eq!((*start, *end), (10, 20));
        assert!(matches!(
            program.main.declarations[1].node,
            Declaration::Var(_)
        ));
    }

    #[test]
    fn parses_procedure_with_array_and_scalar_params() {
        let program = parse_ok(
            "PROCEDURE shift(T tab, n) IS i IN i := n; END \
             PROGRAM IS x IN shift(x, x); END",
        );
        assert_eq!(program.procedures.len(), 1);
        let procedure = &program.procedures[0];
        assert_eq!(procedure.name.text, "shift");
        assert_eq!(procedure.params.len(), 2);
        assert_eq!(procedure.params[0].kind, ParamKind::Array);
        assert_eq!(procedure.params[1].kind, ParamKind::ValueIn);
        let Command::Call { name, args } = &program.main.commands[0].node else {
            panic!("expected call command");
        };
        assert_eq!(name.text, "shift");
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn precedence_binds_product_tighter_than_sum() {
        let program = parse_ok("PROGRAM IS x IN x := 1 + 2 * 3; END");
        let Command::Assign { value, .. } = &program.main.commands[0].node else {
            panic!("expected assignment");
        };
        let Expr::BinOp { op, right, .. } = value else {
            panic!("expected top-level binop");
        };
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(
            right.as_ref(),
            Expr::BinOp {
                op: BinaryOp::Mul,
                ..
            }
        ));
    }

    #[test]
    fn parses_if_with_and_without_else() {
        let program = parse_ok(
            "PROGRAM IS x IN \
             IF x = 0 THEN x := 1; ELSE x := 2; ENDIF \
             IF x > 0 THEN x := 3; ENDIF \
             END",
        );
        let Command::If { else_branch, .. } = &program.main.commands[0].node else {
            panic!("expected if");
        };
        assert_eq!(else_branch.len(), 1);
        let Command::If { else_branch, .. } = &program.main.commands[1].node else {
            panic!("expected if");
        };
        assert!(else_branch.is_empty());
    }

    #[test]
    fn parses_loops_and_io() {
        let program = parse_ok(
            "PROGRAM IS i, n, tab[0:9] IN \
             READ n; \
             FOR i FROM 1 TO n DO tab[i - 1] := i; ENDFOR \
             WHILE n > 0 DO n := n - 1; ENDWHILE \
             REPEAT n := n + 1; UNTIL n = 10; \
             WRITE tab[3]; \
             END",
        );
        assert_eq!(program.main.commands.len(), 5);
        assert!(matches!(program.main.commands[1].node, Command::For { .. }));
        assert!(matches!(
            program.main.commands[2].node,
            Command::While { .. }
        ));
        assert!(matches!(
            program.main.commands[3].node,
            Command::Repeat { .. }
        ));
    }

    #[test]
    fn downto_direction_is_distinguished() {
        let program = parse_ok("PROGRAM IS i IN FOR i FROM 5 DOWNTO 3 DO WRITE i; ENDFOR END");
        let Command::For { direction, .. } = &program.main.commands[0].node else {
            panic!("expected for");
        };
        assert_eq!(*direction, ForDirection::Down);
    }

    #[test]
    fn missing_semicolon_is_a_readable_error() {
        let diagnostics =
            parse(SourceId(0), "PROGRAM IS x IN x := 1 END").expect_err("expected parse error");
        assert!(!diagnostics.is_empty());
        let message = &diagnostics[0].message;
        assert!(message.contains("expected"), "got: {message}");
        assert!(!message.contains("TokenKind"), "got: {message}");
    }

    #[test]
    fn name_spans_point_into_the_source() {
        let source = "PROGRAM IS abc IN abc := 1; END";
        let program = parse_ok(source);
        let Declaration::Var(name) = &program.main.declarations[0].node else {
            panic!("expected scalar declaration");
        };
        assert_eq!(&source[name.span.as_range()], "abc");
    }
}
