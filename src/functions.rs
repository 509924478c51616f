//! Static registry of scalar operators: the single source of truth for
//! numeric evaluation, cost accounting (§4.B.7), and symbolic
//! differentiation (§4.F) of every named function reachable from an RHS.
//!
//! Mirrors the teacher's `functions::registry::Registry`
//! (`OnceLock<HashMap<_, FunctionDefinition>>`). Keyed by name directly
//! rather than by interned-symbol id: call targets are drawn from this
//! fixed registry, never from the equation's own call-scoped symbol table
//! (see [`crate::core::expr::ExprKind::Call`]).

use crate::core::expr::Expr;
use rustc_hash::FxHashMap;
use std::ops::RangeInclusive;
use std::sync::OnceLock;

/// One named scalar operator: how to evaluate it, how expensive it is,
/// and how to differentiate it.
#[derive(Clone, Copy)]
pub struct FunctionDefinition {
    /// Canonical name, as it appears in equation text.
    pub name: &'static str,
    /// Accepted argument count.
    pub arity: RangeInclusive<usize>,
    /// Numeric evaluation; `None` for out-of-domain input (e.g. `ln` of a negative number).
    pub eval: fn(&[f64]) -> Option<f64>,
    /// Heuristic cost relative to a single addition (§4.B.7).
    pub cost: u64,
    /// `∂f/∂args[wrt]`, expressed in terms of `args` (not yet chain-ruled
    /// against the caller's variable — [`crate::grad`] composes that).
    pub partial: fn(args: &[Expr], wrt: usize) -> Expr,
}

impl FunctionDefinition {
    /// Whether `n` arguments is an arity this function accepts.
    #[must_use]
    pub fn accepts_arity(&self, n: usize) -> bool {
        self.arity.contains(&n)
    }
}

fn definitions() -> Vec<FunctionDefinition> {
    vec![
        FunctionDefinition {
            name: "sin",
            arity: 1..=1,
            eval: |a| Some(a[0].sin()),
            cost: 20,
            partial: |args, _| Expr::call("cos", vec![args[0].clone()]),
        },
        FunctionDefinition {
            name: "cos",
            arity: 1..=1,
            eval: |a| Some(a[0].cos()),
            cost: 20,
            partial: |args, _| Expr::call("sin", vec![args[0].clone()]).negate(),
        },
        FunctionDefinition {
            name: "exp",
            arity: 1..=1,
            eval: |a| Some(a[0].exp()),
            cost: 20,
            partial: |args, _| Expr::call("exp", vec![args[0].clone()]),
        },
        FunctionDefinition {
            name: "ln",
            arity: 1..=1,
            eval: |a| if a[0] > 0.0 { Some(a[0].ln()) } else { None },
            cost: 20,
            partial: |args, _| Expr::div(Expr::number(1.0), args[0].clone()),
        },
        FunctionDefinition {
            name: "sqrt",
            arity: 1..=1,
            eval: |a| if a[0] >= 0.0 { Some(a[0].sqrt()) } else { None },
            cost: 15,
            partial: |args, _| Expr::div(Expr::number(0.5), Expr::call("sqrt", vec![args[0].clone()])),
        },
        FunctionDefinition {
            name: "tanh",
            arity: 1..=1,
            eval: |a| Some(a[0].tanh()),
            cost: 20,
            partial: |args, _| {
                // 1 - tanh(x)^2
                let t = Expr::call("tanh", vec![args[0].clone()]);
                Expr::sum(vec![Expr::number(1.0), Expr::pow(t, Expr::number(2.0)).negate()])
            },
        },
        FunctionDefinition {
            name: "abs",
            arity: 1..=1,
            eval: |a| Some(a[0].abs()),
            cost: 5,
            partial: |args, _| {
                // d/dx |x| = x / |x|; undefined at 0, a concern this crate
                // leaves to the caller (matches the source's own treatment
                // of non-smooth points: accepted, not specially diagnosed).
                Expr::div(args[0].clone(), Expr::call("abs", vec![args[0].clone()]))
            },
        },
        FunctionDefinition {
            name: "max",
            arity: 2..=2,
            eval: |a| Some(a[0].max(a[1])),
            cost: 3,
            partial: |_args, wrt| if wrt == 0 { Expr::number(1.0) } else { Expr::number(0.0) },
        },
        FunctionDefinition {
            name: "min",
            arity: 2..=2,
            eval: |a| Some(a[0].min(a[1])),
            cost: 3,
            partial: |_args, wrt| if wrt == 0 { Expr::number(1.0) } else { Expr::number(0.0) },
        },
    ]
}

static REGISTRY: OnceLock<FxHashMap<&'static str, FunctionDefinition>> = OnceLock::new();

/// Look up a function definition by name.
#[must_use]
pub fn lookup(name: &str) -> Option<&'static FunctionDefinition> {
    REGISTRY
        .get_or_init(|| definitions().into_iter().map(|d| (d.name, d)).collect())
        .get(name)
}
