//! A typed builder alternative to the string parser, for callers who
//! already hold a tree instead of equation text — mirrors the teacher
//! offering both a string API (`diff`) and a builder API (`Diff`/`symb`).

use super::ast::{AssignOp, Equation, PExpr, PLhs, PLhsIndex};
use crate::core::error::CompileError;

/// One argument accepted by [`EquationBuilder::index`]: a bare index
/// symbol, or an integer axis pin.
#[derive(Debug, Clone)]
pub enum LhsIndexArg {
    Symbol(String),
    Int(i64),
}

impl From<&str> for LhsIndexArg {
    fn from(s: &str) -> Self {
        LhsIndexArg::Symbol(s.to_string())
    }
}

impl From<i64> for LhsIndexArg {
    fn from(n: i64) -> Self {
        LhsIndexArg::Int(n)
    }
}

/// Fluent builder for an [`Equation`], in lieu of parsing equation text.
#[derive(Debug, Clone)]
pub struct EquationBuilder {
    name: Option<String>,
    indices: Vec<PLhsIndex>,
    op: AssignOp,
    rhs: Option<PExpr>,
}

impl EquationBuilder {
    /// Start building an equation whose LHS array/scalar is named `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        EquationBuilder { name: Some(name.into()), indices: Vec::new(), op: AssignOp::Create, rhs: None }
    }

    /// Start building an equation with an anonymous (generated-name) LHS array.
    #[must_use]
    pub fn anonymous() -> Self {
        EquationBuilder { name: None, indices: Vec::new(), op: AssignOp::Create, rhs: None }
    }

    /// Append one LHS index position.
    #[must_use]
    pub fn index(mut self, idx: impl Into<LhsIndexArg>) -> Self {
        self.indices.push(match idx.into() {
            LhsIndexArg::Symbol(s) => PLhsIndex::Symbol(s),
            LhsIndexArg::Int(n) => PLhsIndex::Int(n),
        });
        self
    }

    /// Append a named-axis LHS index, `label=index`.
    #[must_use]
    pub fn named_index(mut self, label: impl Into<String>, inner: impl Into<LhsIndexArg>) -> Self {
        let inner = match inner.into() {
            LhsIndexArg::Symbol(s) => PLhsIndex::Symbol(s),
            LhsIndexArg::Int(n) => PLhsIndex::Int(n),
        };
        self.indices.push(PLhsIndex::Named(label.into(), Box::new(inner)));
        self
    }

    /// `:=` — allocate a new array.
    #[must_use]
    pub fn create(mut self) -> Self {
        self.op = AssignOp::Create;
        self
    }

    /// `=` — overwrite an existing array in place.
    #[must_use]
    pub fn overwrite(mut self) -> Self {
        self.op = AssignOp::Overwrite;
        self
    }

    /// `+=` — accumulate into an existing array.
    #[must_use]
    pub fn accumulate(mut self) -> Self {
        self.op = AssignOp::Accumulate;
        self
    }

    /// Provide the RHS tree.
    #[must_use]
    pub fn rhs(mut self, expr: PExpr) -> Self {
        self.rhs = Some(expr);
        self
    }

    /// Finish building, producing the [`Equation`] the analyzer consumes.
    ///
    /// # Errors
    /// Returns [`CompileError::unsupported_equation`] if no RHS was provided.
    pub fn build(self) -> Result<Equation, CompileError> {
        let rhs = self.rhs.ok_or_else(|| CompileError::unsupported_equation("builder equation has no RHS"))?;
        let lhs = if self.indices.is_empty() && self.name.is_some() {
            PLhs::Scalar(self.name.expect("checked is_some"))
        } else {
            PLhs::Indexed { name: self.name, indices: self.indices }
        };
        Ok(Equation { lhs, op: self.op, rhs })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_a_matmul_equation() {
        let eq = EquationBuilder::new("Z")
            .index("i")
            .index("k")
            .create()
            .rhs(PExpr::Product(vec![
                PExpr::Array { name: "A".into(), indices: vec![super::super::ast::PIndex::Symbol("i".into()), super::super::ast::PIndex::Symbol("j".into())] },
                PExpr::Array { name: "B".into(), indices: vec![super::super::ast::PIndex::Symbol("j".into()), super::super::ast::PIndex::Symbol("k".into())] },
            ]))
            .build()
            .expect("build");
        assert_eq!(eq.op, AssignOp::Create);
    }
}
