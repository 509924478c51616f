//! The right-hand-side expression tree and the raw index syntax nested
//! inside array subscripts.
//!
//! Mirrors the teacher's N-ary Sum/Product architecture (flat, not binary)
//! so that cost accumulation (§4.B.7) and symbolic differentiation (§4.F)
//! walk a shallow tree instead of unwinding nested binary `Add`/`Mul`.

use crate::core::symbol::Sym;
use std::sync::Arc;

/// The raw syntax appearing inside one array-index position, e.g. `i`,
/// `2*i+1`, or `i+j`. Decomposed into an affine form by
/// [`crate::analyzer::affine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawIndex {
    /// A bare index symbol.
    Symbol(Sym),
    /// An integer literal (pins that axis position, contributes no index).
    Int(i64),
    /// Unary negation.
    Neg(Box<RawIndex>),
    /// Addition of two index sub-expressions.
    Add(Box<RawIndex>, Box<RawIndex>),
    /// Multiplication of two index sub-expressions (used for integer strides).
    Mul(Box<RawIndex>, Box<RawIndex>),
}

impl RawIndex {
    /// Whether this index position is a bare symbol with no affine dressing.
    #[must_use]
    pub fn is_bare_symbol(&self) -> bool {
        matches!(self, RawIndex::Symbol(_))
    }
}

/// One node of the canonicalized right-hand side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExprKind {
    /// A numeric literal.
    Number(OrderedF64),
    /// A lifted scalar reference (from `$x` interpolation or a `threads=...`-style
    /// capture); always a plain reference after canonicalization (§4.B.6).
    Scalar(Sym),
    /// An indexed array reference `A[e1, .., en]`.
    Array {
        /// The array's name.
        name: Sym,
        /// Raw per-axis index syntax, not yet affine-decomposed.
        indices: Vec<RawIndex>,
    },
    /// N-ary sum: flattened, unsorted.
    Sum(Vec<Arc<Expr>>),
    /// N-ary product: flattened, unsorted.
    Product(Vec<Arc<Expr>>),
    /// Binary division (not associative, kept binary).
    Div(Arc<Expr>, Arc<Expr>),
    /// Binary exponentiation (not associative, kept binary).
    Pow(Arc<Expr>, Arc<Expr>),
    /// A scalar function call, e.g. `sin(..)`, `max(.., ..)`.
    Call {
        /// Canonical function name, looked up in [`crate::functions::lookup`].
        /// A `&'static str` rather than an interned [`Sym`]: call targets
        /// are always drawn from the crate's fixed operator registry, not
        /// from the equation's own call-scoped symbol table.
        name: &'static str,
        /// Call arguments.
        args: Vec<Expr>,
    },
}

/// `f64` wrapper with a total order, so `ExprKind` can derive `Eq`.
///
/// Equation literals are always finite by construction (the parser rejects
/// NaN/Inf literals), so bit-pattern equality is the only comparison needed.
#[derive(Debug, Clone, Copy)]
pub struct OrderedF64(pub f64);

impl PartialEq for OrderedF64 {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}
impl Eq for OrderedF64 {}

/// One node in the RHS expression tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expr {
    /// The node's structure.
    pub kind: ExprKind,
}

impl Expr {
    /// Wrap a kind into an `Expr`.
    #[must_use]
    pub fn new(kind: ExprKind) -> Self {
        Expr { kind }
    }

    /// A numeric literal.
    #[must_use]
    pub fn number(n: f64) -> Self {
        Expr::new(ExprKind::Number(OrderedF64(n)))
    }

    /// A lifted-scalar reference.
    #[must_use]
    pub fn scalar(s: Sym) -> Self {
        Expr::new(ExprKind::Scalar(s))
    }

    /// An indexed array reference.
    #[must_use]
    pub fn array(name: Sym, indices: Vec<RawIndex>) -> Self {
        Expr::new(ExprKind::Array { name, indices })
    }

    /// Build a flattened sum, absorbing any nested `Sum` terms.
    #[must_use]
    pub fn sum(terms: Vec<Expr>) -> Self {
        if terms.is_empty() {
            return Expr::number(0.0);
        }
        if terms.len() == 1 {
            return terms.into_iter().next().expect("checked len == 1");
        }
        let mut flat = Vec::with_capacity(terms.len());
        for t in terms {
            match t.kind {
                ExprKind::Sum(inner) => flat.extend(inner),
                other => flat.push(Arc::new(Expr::new(other))),
            }
        }
        Expr::new(ExprKind::Sum(flat))
    }

    /// Build a flattened product, absorbing any nested `Product` terms.
    #[must_use]
    pub fn product(factors: Vec<Expr>) -> Self {
        if factors.is_empty() {
            return Expr::number(1.0);
        }
        if factors.len() == 1 {
            return factors.into_iter().next().expect("checked len == 1");
        }
        let mut flat = Vec::with_capacity(factors.len());
        for f in factors {
            match f.kind {
                ExprKind::Product(inner) => flat.extend(inner),
                other => flat.push(Arc::new(Expr::new(other))),
            }
        }
        Expr::new(ExprKind::Product(flat))
    }

    /// Binary division.
    #[must_use]
    pub fn div(left: Expr, right: Expr) -> Self {
        Expr::new(ExprKind::Div(Arc::new(left), Arc::new(right)))
    }

    /// Binary exponentiation.
    #[must_use]
    pub fn pow(base: Expr, exponent: Expr) -> Self {
        Expr::new(ExprKind::Pow(Arc::new(base), Arc::new(exponent)))
    }

    /// A function call.
    #[must_use]
    pub fn call(name: &'static str, args: Vec<Expr>) -> Self {
        Expr::new(ExprKind::Call { name, args })
    }

    /// Negate: `-e = Product([-1, e])`.
    #[must_use]
    pub fn negate(self) -> Self {
        Expr::product(vec![Expr::number(-1.0), self])
    }

    /// Post-order transform of every node, innermost first.
    pub fn map<F>(&self, f: &F) -> Expr
    where
        F: Fn(&Expr) -> Expr,
    {
        let rebuilt = match &self.kind {
            ExprKind::Number(_) | ExprKind::Scalar(_) | ExprKind::Array { .. } => self.clone(),
            ExprKind::Sum(terms) => {
                Expr::new(ExprKind::Sum(terms.iter().map(|t| Arc::new(t.map(f))).collect()))
            }
            ExprKind::Product(factors) => {
                Expr::new(ExprKind::Product(factors.iter().map(|t| Arc::new(t.map(f))).collect()))
            }
            ExprKind::Div(a, b) => Expr::div(a.map(f), b.map(f)),
            ExprKind::Pow(a, b) => Expr::pow(a.map(f), b.map(f)),
            ExprKind::Call { name, args } => {
                Expr::call(*name, args.iter().map(|a| a.map(f)).collect())
            }
        };
        f(&rebuilt)
    }

    /// Fold over every node, pre-order.
    pub fn fold<T, F>(&self, init: T, f: &F) -> T
    where
        F: Fn(T, &Expr) -> T,
    {
        let acc = f(init, self);
        match &self.kind {
            ExprKind::Number(_) | ExprKind::Scalar(_) | ExprKind::Array { .. } => acc,
            ExprKind::Sum(terms) => terms.iter().fold(acc, |a, t| t.fold(a, f)),
            ExprKind::Product(factors) => factors.iter().fold(acc, |a, t| t.fold(a, f)),
            ExprKind::Div(a, b) | ExprKind::Pow(a, b) => {
                let acc = a.fold(acc, f);
                b.fold(acc, f)
            }
            ExprKind::Call { args, .. } => args.iter().fold(acc, |a, arg| arg.fold(a, f)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::symbol::SymbolTable;

    #[test]
    fn sum_flattens_nested_sums() {
        let mut t = SymbolTable::new();
        let i = t.intern("i");
        let a = Expr::array(i, vec![RawIndex::Symbol(i)]);
        let nested = Expr::sum(vec![a.clone(), Expr::number(1.0)]);
        let outer = Expr::sum(vec![nested, Expr::number(2.0)]);
        match outer.kind {
            ExprKind::Sum(terms) => assert_eq!(terms.len(), 3),
            _ => unreachable!("expected Sum"),
        }
    }

    #[test]
    fn product_flattens_nested_products() {
        let a = Expr::number(2.0);
        let b = Expr::number(3.0);
        let c = Expr::number(4.0);
        let inner = Expr::product(vec![a, b]);
        let outer = Expr::product(vec![inner, c]);
        match outer.kind {
            ExprKind::Product(factors) => assert_eq!(factors.len(), 3),
            _ => unreachable!("expected Product"),
        }
    }
}
