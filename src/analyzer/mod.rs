//! The expression analyzer (§4.B): turns a parsed [`Equation`] into a
//! populated [`Store`].

pub mod affine;
pub mod canonicalize;

use crate::core::error::CompileError;
use crate::core::store::{IndexSet, LhsIndex, ReductionOp, Store};
use crate::core::symbol::Sym;
use crate::parser::ast::{AssignOp, Equation, PExpr, PLhs, PLhsIndex};
use rustc_hash::{FxHashMap, FxHashSet};

/// Run the full analyzer: process the LHS, canonicalize the RHS, and
/// derive `redind`/`sharedind`, producing a populated [`Store`].
///
/// `ranks` must give the rank of every array name the equation's RHS
/// references (the caller's bound arguments).
///
/// # Errors
/// See §7 and [`canonicalize::canonicalize_rhs`].
pub fn analyze(equation: &Equation, ranks: &FxHashMap<String, usize>) -> Result<Store, CompileError> {
    let mut store = Store::new();
    store.flags.plusequals = matches!(equation.op, AssignOp::Accumulate);
    store.flags.newarray = matches!(equation.op, AssignOp::Create);

    let (redfun, rhs_expr) = detect_redfun(&equation.rhs);
    store.redfun = redfun;

    process_lhs(&mut store, &equation.lhs);
    store.flags.zero = has_repeated_free_index(&store.leftraw);

    let (right, per_array) = canonicalize::canonicalize_rhs(&mut store, rhs_expr, ranks)?;
    store.right = right;

    store.redind = store.rightind.difference(&store.leftind);
    store.sharedind = shared_indices(&per_array);

    if store.flags.newarray && store.arrays.contains(store.leftarray) {
        return Err(CompileError::SelfReferenceOnCreate {
            name: store.symbols.name(store.leftarray).to_string(),
        });
    }

    Ok(store)
}

fn detect_redfun(rhs: &PExpr) -> (ReductionOp, &PExpr) {
    if let PExpr::Call { name, args } = rhs {
        if args.len() == 1 {
            let op = match name.as_str() {
                "sum" | "+" => Some(ReductionOp::Add),
                "prod" | "*" => Some(ReductionOp::Mul),
                "max" if args.len() == 1 => Some(ReductionOp::Max),
                "min" if args.len() == 1 => Some(ReductionOp::Min),
                _ => None,
            };
            if let Some(op) = op {
                return (op, &args[0]);
            }
        }
    }
    (ReductionOp::Add, rhs)
}

fn process_lhs(store: &mut Store, lhs: &PLhs) {
    match lhs {
        PLhs::Scalar(name) => {
            let sym = store.symbols.intern(name);
            store.leftscalar = Some(sym);
            store.leftarray = sym;
        }
        PLhs::Indexed { name, indices } => {
            let sym = match name {
                Some(n) => store.symbols.intern(n),
                None => store.symbols.intern("Z"),
            };
            store.leftarray = sym;
            for idx in indices {
                process_lhs_index(store, idx, None);
            }
        }
    }
}

fn process_lhs_index(store: &mut Store, idx: &PLhsIndex, named_label: Option<Sym>) {
    match idx {
        PLhsIndex::Symbol(name) => {
            let sym = store.symbols.intern(name);
            store.leftind.insert(sym);
            store.leftraw.push(LhsIndex::Symbol(sym));
            if let Some(label) = named_label {
                store.leftnames.push((label, sym));
            }
        }
        PLhsIndex::Int(n) => {
            store.leftraw.push(LhsIndex::Int(*n));
        }
        PLhsIndex::Scalar(name) => {
            let sym = store.symbols.intern(name);
            store.scalars.insert(sym);
            store.leftraw.push(LhsIndex::Scalar(sym));
        }
        PLhsIndex::Named(label, inner) => {
            let label_sym = store.symbols.intern(label);
            process_lhs_index(store, inner, Some(label_sym));
        }
    }
}

fn has_repeated_free_index(leftraw: &[LhsIndex]) -> bool {
    let mut seen = FxHashSet::default();
    for idx in leftraw {
        if let LhsIndex::Symbol(s) = idx {
            if !seen.insert(*s) {
                return true;
            }
        }
    }
    false
}

fn shared_indices(per_array: &canonicalize::PerArrayIndices) -> IndexSet {
    let mut iter = per_array.values();
    let Some(first) = iter.next() else {
        return IndexSet::new();
    };
    let mut shared = first.clone();
    for set in iter {
        shared = shared.intersection(set);
    }
    shared
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_equation;

    fn ranks(pairs: &[(&str, usize)]) -> FxHashMap<String, usize> {
        pairs.iter().map(|(n, r)| ((*n).to_string(), *r)).collect()
    }

    #[test]
    fn matmul_analyzes_to_expected_shape() {
        let eq = parse_equation("Z[i,k] := A[i,j] * B[j,k]").expect("parse");
        let store = analyze(&eq, &ranks(&[("A", 2), ("B", 2)])).expect("analyze");
        assert_eq!(store.leftind.len(), 2);
        assert_eq!(store.redind.len(), 1);
        assert!(store.flags.newarray);
        assert!(!store.flags.plusequals);
    }

    #[test]
    fn scalar_reduction_has_no_leftind() {
        let eq = parse_equation("s := A[i] * A[i]").expect("parse");
        let store = analyze(&eq, &ranks(&[("A", 1)])).expect("analyze");
        assert!(store.leftind.is_empty());
        assert_eq!(store.redind.len(), 1);
        assert!(store.leftscalar.is_some());
    }

    #[test]
    fn self_reference_on_create_is_rejected() {
        let eq = parse_equation("Z[i,k] := Z[i,j] * B[j,k]").expect("parse");
        let err = analyze(&eq, &ranks(&[("Z", 2), ("B", 2)])).expect_err("should fail");
        assert!(matches!(err, CompileError::SelfReferenceOnCreate { .. }));
    }

    #[test]
    fn max_call_selects_reduction_operator() {
        let eq = parse_equation("Z[i] := max(A[i,j])").expect("parse");
        let store = analyze(&eq, &ranks(&[("A", 2)])).expect("analyze");
        assert_eq!(store.redfun, ReductionOp::Max);
        assert_eq!(store.redind.len(), 1);
    }

    #[test]
    fn unconstrained_reduction_index_without_declared_range_is_accepted_here() {
        // Range solving happens in a later phase (§4.C); the analyzer
        // itself only classifies j as a reduction index.
        let eq = parse_equation("Z[i] := A[i,j]").expect("parse");
        let store = analyze(&eq, &ranks(&[("A", 2)])).expect("analyze");
        assert_eq!(store.redind.len(), 1);
    }
}
