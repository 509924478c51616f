//! Implicit-multiplication insertion: `2i`, `2(a+b)`, `(a+b)(c+d)` all mean
//! multiplication without a `*`. Mirrors the teacher's
//! `parser::implicit_mul` pass, run after lexing and before parsing so the
//! pratt parser itself never has to special-case adjacency.

use super::lexer::{Token, TokenKind};
use crate::core::error::Span;

fn starts_value(kind: &TokenKind) -> bool {
    matches!(kind, TokenKind::Number(_) | TokenKind::Ident(_) | TokenKind::LParen | TokenKind::Dollar)
}

fn ends_value(kind: &TokenKind) -> bool {
    matches!(kind, TokenKind::Number(_) | TokenKind::Ident(_) | TokenKind::RParen | TokenKind::RBracket)
}

/// Insert a `Star` token wherever two adjacent tokens both look like the
/// edge of a value with no operator between them. An `Ident` immediately
/// followed by `LParen` is always a call, never implicit multiplication.
pub fn insert_implicit_multiplication(tokens: Vec<Token>) -> Vec<Token> {
    if tokens.is_empty() {
        return tokens;
    }
    let mut out = Vec::with_capacity(tokens.len() + 2);
    for window in tokens.windows(2) {
        let (prev, next) = (&window[0], &window[1]);
        out.push(prev.clone());
        let prev_is_ident_call = matches!(prev.kind, TokenKind::Ident(_)) && matches!(next.kind, TokenKind::LParen);
        if ends_value(&prev.kind) && starts_value(&next.kind) && !prev_is_ident_call {
            let at = prev.span.end();
            out.push(Token { kind: TokenKind::Star, span: Span::at(at) });
        }
    }
    out.push(tokens[tokens.len() - 1].clone());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::lexer::lex;

    #[test]
    fn inserts_star_between_coefficient_and_symbol() {
        let toks = insert_implicit_multiplication(lex("2i+1").expect("lex"));
        assert!(toks.iter().any(|t| t.kind == TokenKind::Star));
    }

    #[test]
    fn leaves_function_calls_alone() {
        let toks = insert_implicit_multiplication(lex("sin(x)").expect("lex"));
        let star_count = toks.iter().filter(|t| t.kind == TokenKind::Star).count();
        assert_eq!(star_count, 0);
    }
}
