//! Equation-string parsing (§B′). Converts a string into a
//! [`ast::Equation`] tree; [`crate::analyzer`] consumes that tree and
//! produces a populated [`crate::core::store::Store`].
//!
//! Pipeline: lex → insert implicit multiplication → recursive-descent
//! parse, the same three-stage split the teacher's own `parser` module
//! uses for formula strings.

pub mod ast;
pub mod builder;
mod implicit_mul;
mod lexer;
mod pratt;
mod range_decl;

pub use ast::{AssignOp, Equation, PExpr, PIndex, PLhs, PLhsIndex};
pub use builder::{EquationBuilder, LhsIndexArg};
pub use range_decl::parse_range_decls;

use crate::core::error::CompileError;

/// Parse one equation string, e.g. `"Z[i,k] := A[i,j] * B[j,k]"`.
///
/// # Errors
/// Returns [`CompileError::UnsupportedEquation`] on any lexical or
/// syntactic failure, with a [`crate::core::error::Span`] pointing at the
/// offending text.
pub fn parse_equation(input: &str) -> Result<Equation, CompileError> {
    if input.trim().is_empty() {
        return Err(CompileError::unsupported_equation("equation text is empty"));
    }
    let tokens = lexer::lex(input)?;
    let tokens = implicit_mul::insert_implicit_multiplication(tokens);
    pratt::parse_equation(&tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_matrix_multiply() {
        let eq = parse_equation("Z[i,k] := A[i,j] * B[j,k]").expect("parse");
        assert_eq!(eq.op, AssignOp::Create);
        match eq.lhs {
            PLhs::Indexed { name: Some(n), ref indices } => {
                assert_eq!(n, "Z");
                assert_eq!(indices.len(), 2);
            }
            _ => unreachable!("expected indexed LHS"),
        }
    }

    #[test]
    fn parses_scalar_reduction() {
        let eq = parse_equation("s := A[i] * A[i]").expect("parse");
        assert_eq!(eq.lhs, PLhs::Scalar("s".to_string()));
    }

    #[test]
    fn parses_scalar_interpolation_and_accumulate() {
        let eq = parse_equation("Z[i,k] += $alpha * A[i,j] * B[j,k]").expect("parse");
        assert_eq!(eq.op, AssignOp::Accumulate);
    }

    #[test]
    fn parses_affine_indices() {
        let eq = parse_equation("Z[i,j] := A[i+x,j+y] * K[x,y]").expect("parse");
        match eq.rhs {
            PExpr::Product(factors) => assert_eq!(factors.len(), 2),
            _ => unreachable!("expected Product"),
        }
    }

    #[test]
    fn rejects_self_reference_syntax_is_allowed_at_parse_time() {
        // Self-reference is a semantic error caught by the analyzer (§4.B),
        // not a syntax error, so parsing alone must succeed here.
        assert!(parse_equation("Z[i,k] := Z[i,j] * B[j,k]").is_ok());
    }
}
