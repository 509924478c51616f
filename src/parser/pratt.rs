//! Recursive-descent/precedence-climbing parser over the token stream
//! produced by [`super::lexer`] and [`super::implicit_mul`]. Grounded in
//! the teacher's `parser::pratt`, specialized to two distinct grammars:
//! the full scalar-expression grammar for the RHS, and the restricted
//! affine grammar for index positions inside `[...]` (§4.B "Affine index
//! decomposition").

use super::ast::{AssignOp, Equation, PExpr, PIndex, PLhs, PLhsIndex};
use super::lexer::{Token, TokenKind};
use crate::core::error::{CompileError, Span};

struct Parser<'t> {
    toks: &'t [Token],
    pos: usize,
}

impl<'t> Parser<'t> {
    fn new(toks: &'t [Token]) -> Self {
        Parser { toks, pos: 0 }
    }

    fn peek(&self) -> Option<&TokenKind> {
        self.toks.get(self.pos).map(|t| &t.kind)
    }

    fn peek_span(&self) -> Span {
        self.toks.get(self.pos).map_or_else(
            || self.toks.last().map_or_else(Span::empty, |t| Span::at(t.span.end())),
            |t| t.span,
        )
    }

    fn advance(&mut self) -> Option<&Token> {
        let t = self.toks.get(self.pos);
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn eof(&self) -> bool {
        self.pos >= self.toks.len()
    }

    fn expect_ident(&mut self) -> Result<String, CompileError> {
        match self.advance().map(|t| t.kind.clone()) {
            Some(TokenKind::Ident(name)) => Ok(name),
            other => Err(CompileError::unsupported_equation_at(
                format!("expected an identifier, found {other:?}"),
                self.peek_span(),
            )),
        }
    }

    fn consume_primes(&mut self, name: String) -> String {
        let mut saw_prime = false;
        while matches!(self.peek(), Some(TokenKind::Prime)) {
            self.advance();
            saw_prime = true;
        }
        if saw_prime && !name.ends_with('\u{2032}') {
            format!("{name}\u{2032}")
        } else {
            name
        }
    }

    // ---- RHS scalar-expression grammar ----

    fn parse_rhs(&mut self) -> Result<PExpr, CompileError> {
        let e = self.parse_sum()?;
        if !self.eof() {
            return Err(CompileError::unsupported_equation_at(
                "unexpected trailing input",
                self.peek_span(),
            ));
        }
        Ok(e)
    }

    fn parse_sum(&mut self) -> Result<PExpr, CompileError> {
        let mut terms = vec![self.parse_product()?];
        loop {
            match self.peek() {
                Some(TokenKind::Plus) => {
                    self.advance();
                    terms.push(self.parse_product()?);
                }
                Some(TokenKind::Minus) => {
                    self.advance();
                    terms.push(PExpr::Neg(Box::new(self.parse_product()?)));
                }
                _ => break,
            }
        }
        if terms.len() == 1 {
            Ok(terms.into_iter().next().expect("len checked"))
        } else {
            Ok(PExpr::Sum(terms))
        }
    }

    fn parse_product(&mut self) -> Result<PExpr, CompileError> {
        let mut node = self.parse_unary()?;
        loop {
            match self.peek() {
                Some(TokenKind::Star) => {
                    self.advance();
                    let rhs = self.parse_unary()?;
                    node = match node {
                        PExpr::Product(mut factors) => {
                            factors.push(rhs);
                            PExpr::Product(factors)
                        }
                        other => PExpr::Product(vec![other, rhs]),
                    };
                }
                Some(TokenKind::Slash) => {
                    self.advance();
                    let rhs = self.parse_unary()?;
                    node = PExpr::Div(Box::new(node), Box::new(rhs));
                }
                _ => break,
            }
        }
        Ok(node)
    }

    fn parse_unary(&mut self) -> Result<PExpr, CompileError> {
        if matches!(self.peek(), Some(TokenKind::Minus)) {
            self.advance();
            return Ok(PExpr::Neg(Box::new(self.parse_unary()?)));
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> Result<PExpr, CompileError> {
        let base = self.parse_primary()?;
        if matches!(self.peek(), Some(TokenKind::Caret)) {
            self.advance();
            let exp = self.parse_unary()?;
            return Ok(PExpr::Pow(Box::new(base), Box::new(exp)));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<PExpr, CompileError> {
        match self.peek().cloned() {
            Some(TokenKind::Number(n)) => {
                self.advance();
                Ok(PExpr::Number(n))
            }
            Some(TokenKind::Dollar) => {
                self.advance();
                let name = self.expect_ident()?;
                Ok(PExpr::Scalar(name))
            }
            Some(TokenKind::LParen) => {
                self.advance();
                let inner = self.parse_sum()?;
                self.expect_rparen()?;
                Ok(inner)
            }
            Some(TokenKind::Ident(name)) => {
                self.advance();
                let name = self.consume_primes(name);
                match self.peek() {
                    Some(TokenKind::LParen) => {
                        self.advance();
                        let args = self.parse_call_args()?;
                        Ok(PExpr::Call { name, args })
                    }
                    Some(TokenKind::LBracket) => {
                        self.advance();
                        let indices = self.parse_index_list()?;
                        self.expect_rbracket()?;
                        Ok(PExpr::Array { name, indices })
                    }
                    _ => Ok(PExpr::Ident(name)),
                }
            }
            other => Err(CompileError::unsupported_equation_at(
                format!("unexpected token {other:?} in expression"),
                self.peek_span(),
            )),
        }
    }

    fn parse_call_args(&mut self) -> Result<Vec<PExpr>, CompileError> {
        let mut args = Vec::new();
        if matches!(self.peek(), Some(TokenKind::RParen)) {
            self.advance();
            return Ok(args);
        }
        loop {
            args.push(self.parse_sum()?);
            match self.peek() {
                Some(TokenKind::Comma) => {
                    self.advance();
                }
                Some(TokenKind::RParen) => {
                    self.advance();
                    break;
                }
                _ => {
                    return Err(CompileError::unsupported_equation_at(
                        "expected ',' or ')' in call arguments",
                        self.peek_span(),
                    ));
                }
            }
        }
        Ok(args)
    }

    fn expect_rparen(&mut self) -> Result<(), CompileError> {
        match self.advance().map(|t| &t.kind) {
            Some(TokenKind::RParen) => Ok(()),
            _ => Err(CompileError::unsupported_equation_at("expected ')'", self.peek_span())),
        }
    }

    fn expect_rbracket(&mut self) -> Result<(), CompileError> {
        match self.advance().map(|t| &t.kind) {
            Some(TokenKind::RBracket) => Ok(()),
            _ => Err(CompileError::unsupported_equation_at("expected ']'", self.peek_span())),
        }
    }

    // ---- restricted affine grammar for `[...]` index positions ----

    fn parse_index_list(&mut self) -> Result<Vec<PIndex>, CompileError> {
        let mut out = Vec::new();
        if matches!(self.peek(), Some(TokenKind::RBracket)) {
            return Ok(out);
        }
        loop {
            out.push(self.parse_index_sum()?);
            match self.peek() {
                Some(TokenKind::Comma) => {
                    self.advance();
                }
                _ => break,
            }
        }
        Ok(out)
    }

    fn parse_index_sum(&mut self) -> Result<PIndex, CompileError> {
        let mut node = self.parse_index_term()?;
        loop {
            match self.peek() {
                Some(TokenKind::Plus) => {
                    self.advance();
                    node = PIndex::Add(Box::new(node), Box::new(self.parse_index_term()?));
                }
                Some(TokenKind::Minus) => {
                    self.advance();
                    let rhs = self.parse_index_term()?;
                    node = PIndex::Add(Box::new(node), Box::new(PIndex::Neg(Box::new(rhs))));
                }
                _ => break,
            }
        }
        Ok(node)
    }

    fn parse_index_term(&mut self) -> Result<PIndex, CompileError> {
        let mut node = self.parse_index_unary()?;
        while matches!(self.peek(), Some(TokenKind::Star)) {
            self.advance();
            let rhs = self.parse_index_unary()?;
            node = PIndex::Mul(Box::new(node), Box::new(rhs));
        }
        Ok(node)
    }

    fn parse_index_unary(&mut self) -> Result<PIndex, CompileError> {
        if matches!(self.peek(), Some(TokenKind::Minus)) {
            self.advance();
            return Ok(PIndex::Neg(Box::new(self.parse_index_unary()?)));
        }
        self.parse_index_primary()
    }

    fn parse_index_primary(&mut self) -> Result<PIndex, CompileError> {
        match self.peek().cloned() {
            Some(TokenKind::Number(n)) => {
                self.advance();
                #[allow(clippy::cast_possible_truncation, reason = "index literals are checked integral below")]
                if n.fract() == 0.0 {
                    Ok(PIndex::Int(n as i64))
                } else {
                    Err(CompileError::unsupported_equation_at(
                        format!("non-integer literal '{n}' in index position"),
                        self.peek_span(),
                    ))
                }
            }
            Some(TokenKind::Ident(name)) => {
                self.advance();
                let name = self.consume_primes(name);
                Ok(PIndex::Symbol(name))
            }
            Some(TokenKind::LParen) => {
                self.advance();
                let inner = self.parse_index_sum()?;
                self.expect_rparen()?;
                Ok(inner)
            }
            other => Err(CompileError::unsupported_equation_at(
                format!("unexpected token {other:?} in index position"),
                self.peek_span(),
            )),
        }
    }

    // ---- LHS grammar ----

    fn parse_lhs(&mut self) -> Result<PLhs, CompileError> {
        if matches!(self.peek(), Some(TokenKind::LBracket)) {
            self.advance();
            let indices = self.parse_lhs_index_list()?;
            self.expect_rbracket()?;
            return Ok(PLhs::Indexed { name: None, indices });
        }
        let name = self.expect_ident()?;
        if matches!(self.peek(), Some(TokenKind::LBracket)) {
            self.advance();
            let indices = self.parse_lhs_index_list()?;
            self.expect_rbracket()?;
            Ok(PLhs::Indexed { name: Some(name), indices })
        } else {
            Ok(PLhs::Scalar(name))
        }
    }

    fn parse_lhs_index_list(&mut self) -> Result<Vec<PLhsIndex>, CompileError> {
        let mut out = Vec::new();
        if matches!(self.peek(), Some(TokenKind::RBracket)) {
            return Ok(out);
        }
        loop {
            out.push(self.parse_lhs_index_one()?);
            match self.peek() {
                Some(TokenKind::Comma) => {
                    self.advance();
                }
                _ => break,
            }
        }
        Ok(out)
    }

    fn parse_lhs_index_one(&mut self) -> Result<PLhsIndex, CompileError> {
        if matches!(self.peek(), Some(TokenKind::Dollar)) {
            self.advance();
            let name = self.expect_ident()?;
            return Ok(PLhsIndex::Scalar(name));
        }
        if let Some(TokenKind::Number(n)) = self.peek().cloned() {
            self.advance();
            #[allow(clippy::cast_possible_truncation, reason = "checked integral just above")]
            if n.fract() == 0.0 {
                return Ok(PLhsIndex::Int(n as i64));
            }
            return Err(CompileError::unsupported_equation_at(
                format!("non-integer literal '{n}' on the left-hand side"),
                self.peek_span(),
            ));
        }
        let name = self.expect_ident()?;
        if matches!(self.peek(), Some(TokenKind::Eq)) {
            self.advance();
            let inner = self.parse_lhs_index_one()?;
            return Ok(PLhsIndex::Named(name, Box::new(inner)));
        }
        Ok(PLhsIndex::Symbol(self.consume_primes(name)))
    }
}

/// Parse a complete equation string: `lhs (:= | = | +=) rhs`.
pub fn parse_equation(tokens: &[Token]) -> Result<Equation, CompileError> {
    let mut p = Parser::new(tokens);
    let lhs = p.parse_lhs()?;
    let op = match p.advance().map(|t| t.kind.clone()) {
        Some(TokenKind::ColonEq) => AssignOp::Create,
        Some(TokenKind::Eq) => AssignOp::Overwrite,
        Some(TokenKind::PlusEq) => AssignOp::Accumulate,
        other => {
            return Err(CompileError::unsupported_equation_at(
                format!("expected ':=', '=', or '+=', found {other:?}"),
                p.peek_span(),
            ));
        }
    };
    let rhs = p.parse_rhs()?;
    Ok(Equation { lhs, op, rhs })
}
