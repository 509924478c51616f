//! Parsing for user-declared index ranges (§4.A, §6): `i ∈ 1:N`, or the
//! ASCII spelling `i in 1:N`, optionally grouped as a parenthesized tuple
//! `(i ∈ 1:N, j ∈ 1:M)`. These are supplied at the call site alongside the
//! equation, never inside the equation string itself, so they get their
//! own small grammar rather than a detour through [`super::lexer`].

use crate::core::error::CompileError;
use crate::core::options::RangeDecl;

/// Parse one or more range declarations from `text`.
///
/// Accepts a single declaration (`i ∈ 1:5`, or `i in 1:5`) or a
/// parenthesized, comma-separated tuple of them (`(i ∈ 1:5, j ∈ 1:3)`).
///
/// # Errors
/// [`CompileError::unsupported_equation`] if any clause is missing its
/// membership marker, is missing the `lo:hi` separator, or has a
/// non-integer bound.
pub fn parse_range_decls(text: &str) -> Result<Vec<RangeDecl>, CompileError> {
    let trimmed = text.trim();
    let body = trimmed.strip_prefix('(').and_then(|s| s.strip_suffix(')')).unwrap_or(trimmed);
    body.split(',').map(str::trim).filter(|clause| !clause.is_empty()).map(parse_one).collect()
}

fn parse_one(clause: &str) -> Result<RangeDecl, CompileError> {
    let (index, range) = split_membership(clause)?;
    let (lo, hi) = split_range(range.trim(), clause)?;
    Ok(RangeDecl { index: index.trim().to_string(), lo, hi })
}

fn split_membership(clause: &str) -> Result<(&str, &str), CompileError> {
    if let Some(pos) = clause.find('∈') {
        let (index, rest) = clause.split_at(pos);
        return Ok((index, &rest['∈'.len_utf8()..]));
    }
    if let Some(pos) = clause.find(" in ") {
        let (index, rest) = clause.split_at(pos);
        return Ok((index, &rest[" in ".len()..]));
    }
    Err(CompileError::unsupported_equation(format!("range declaration '{clause}' is missing '∈' (or 'in')")))
}

fn split_range(range: &str, clause: &str) -> Result<(i64, i64), CompileError> {
    let (lo, hi) = range
        .split_once(':')
        .ok_or_else(|| CompileError::unsupported_equation(format!("range declaration '{clause}' is missing ':' between bounds")))?;
    let lo = lo
        .trim()
        .parse::<i64>()
        .map_err(|_| CompileError::unsupported_equation(format!("range declaration '{clause}' has a non-integer lower bound")))?;
    let hi = hi
        .trim()
        .parse::<i64>()
        .map_err(|_| CompileError::unsupported_equation(format!("range declaration '{clause}' has a non-integer upper bound")))?;
    Ok((lo, hi))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_single_declaration() {
        let decls = parse_range_decls("i ∈ 1:5").expect("parse");
        assert_eq!(decls, vec![RangeDecl { index: "i".to_string(), lo: 1, hi: 5 }]);
    }

    #[test]
    fn parses_the_ascii_spelling() {
        let decls = parse_range_decls("i in 1:5").expect("parse");
        assert_eq!(decls, vec![RangeDecl { index: "i".to_string(), lo: 1, hi: 5 }]);
    }

    #[test]
    fn parses_a_tuple_of_declarations() {
        let decls = parse_range_decls("(i ∈ 1:5, j ∈ 1:3)").expect("parse");
        assert_eq!(
            decls,
            vec![RangeDecl { index: "i".to_string(), lo: 1, hi: 5 }, RangeDecl { index: "j".to_string(), lo: 1, hi: 3 }]
        );
    }

    #[test]
    fn rejects_a_missing_membership_marker() {
        assert!(parse_range_decls("i 1:5").is_err());
    }

    #[test]
    fn rejects_a_missing_colon() {
        assert!(parse_range_decls("i ∈ 5").is_err());
    }

    #[test]
    fn rejects_a_non_integer_bound() {
        assert!(parse_range_decls("i ∈ 1:5.5").is_err());
    }
}
