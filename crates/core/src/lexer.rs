use logos::Logos;

use crate::diag::Diagnostic;
use crate::span::{SourceId, Span};

#[derive(Logos, Debug, Clone, PartialEq, Eq)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip r"#[^\n]*")]
pub enum TokenKind {
    #[token("PROCEDURE")]
    Procedure,
    #[token("PROGRAM")]
    Program,
    #[token("IS")]
    Is,
    #[token("IN")]
    In,
    #[token("END")]
    End,
    #[token("IF")]
    If,
    #[token("THEN")]
    Then,
    #[token("ELSE")]
    Else,
    #[token("ENDIF")]
    Endif,
    #[token("WHILE")]
    While,
    #[token("DO")]
    Do,
    #[token("ENDWHILE")]
    Endwhile,
    #[token("REPEAT")]
    Repeat,
    #[token("UNTIL")]
    Until,
    #[token("FOR")]
    For,
    #[token("FROM")]
    From,
    #[token("TO")]
    To,
    #[token("DOWNTO")]
    Downto,
    #[token("ENDFOR")]
    Endfor,
    #[token("READ")]
    Read,
    #[token("WRITE")]
    Write,
    /// Marks an array parameter in a procedure head.
    #[token("T")]
    T,

    #[token(":=")]
    Assign,
    #[token("!=")]
    Neq,
    #[token(">=")]
    Ge,
    #[token("<=")]
    Le,
    #[token("=")]
    Eq,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Times,
    #[token("/")]
    Div,
    #[token("%")]
    Mod,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(":")]
    Colon,
    #[token(";")]
    Semi,
    #[token(",")]
    Comma,

    #[regex(r"[0-9]+", parse_number)]
    Number(u64),

    #[regex(r"[_a-zA-Z]+", parse_ident, priority = 1)]
    Ident(String),
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

pub fn lex(source_id: SourceId, input: &str) -> Result<Vec<Token>, Vec<Diagnostic>> {
    let mut lexer = TokenKind::lexer(input);
    let mut tokens = Vec::new();
    let mut diagnostics = Vec::new();

    while let Some(next) = lexer.next() {
        let range = lexer.span();
        let span = Span::new(source_id, range.start, range.end);
        match next {
            Ok(kind) => tokens.push(Token { kind, span }),
            Err(_) => {
                let token = format_token_for_message(lexer.slice());
                diagnostics.push(
                    Diagnostic::error(span, format!("unexpected token {token}"))
                        .with_note("identifiers are letters and underscores; keywords are uppercase"),
                );
            }
        }
    }

    if diagnostics.is_empty() {
        Ok(tokens)
    } else {
        Err(diagnostics)
    }
}

fn parse_number(lex: &mut logos::Lexer<TokenKind>) -> Option<u64> {
    lex.slice().parse::<u64>().ok()
}

fn parse_ident(lex: &mut logos::Lexer<TokenKind>) -> String {
    lex.slice().to_string()
}

fn format_token_for_message(token: &str) -> String {
    let escaped: String = token.chars().flat_map(char::escape_default).collect();
    format!("'{escaped}'")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        lex(SourceId(0), input)
            .expect("lex")
            .into_iter()
            .map(|token| token.kind)
            .collect()
    }

    #[test]
    fn lexes_assignment_command() {
        assert_eq!(
            kinds("x := y + 12;"),
            vec![
                TokenKind::Ident("x".to_string()),
                TokenKind::Assign,
                TokenKind::Ident("y".to_string()),
                TokenKind::Plus,
                TokenKind::Number(12),
                TokenKind::Semi,
            ]
        );
    }

    #[test]
    fn keywords_beat_identifiers_only_on_exact_match() {
        assert_eq!(
            kinds("FOR formula TO TOTAL"),
            vec![
                TokenKind::For,
                TokenKind::Ident("formula".to_string()),
                TokenKind::To,
                TokenKind::Ident("TOTAL".to_string()),
            ]
        );
    }

    #[test]
    fn array_marker_is_a_keyword() {
        assert_eq!(
            kinds("T tab, Tx"),
            vec![
                TokenKind::T,
                TokenKind::Ident("tab".to_string()),
                TokenKind::Comma,
                TokenKind::Ident("Tx".to_string()),
            ]
        );
    }

    #[test]
    fn skips_comments_to_end_of_line() {
        assert_eq!(
            kinds("x # everything here is ignored := 5\n:= 1;"),
            vec![
                TokenKind::Ident("x".to_string()),
                TokenKind::Assign,
                TokenKind::Number(1),
                TokenKind::Semi,
            ]
        );
    }

    #[test]
    fn reports_unrecognized_token_text() {
        let diagnostics = lex(SourceId(0), "x @ y").expect_err("expected lex error");
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].message, "unexpected token '@'");
    }

    #[test]
    fn multi_char_operators_win_over_prefixes() {
        assert_eq!(
            kinds("x:=1 a<=b c>=d e!=f g:h"),
            vec![
                TokenKind::Ident("x".to_string()),
                TokenKind::Assign,
                TokenKind::Number(1),
                TokenKind::Ident("a".to_string()),
                TokenKind::Le,
                TokenKind::Ident("b".to_string()),
                TokenKind::Ident("c".to_string()),
                TokenKind::Ge,
                TokenKind::Ident("d".to_string()),
                TokenKind::Ident("e".to_string()),
                TokenKind::Neq,
                TokenKind::Ident("f".to_string()),
                TokenKind::Ident("g".to_string()),
                TokenKind::Colon,
                TokenKind::Ident("h".to_string()),
            ]
        );
    }
}
