//! The `Store`: the mutable bag of analysis results threaded through
//! phases A → G (§3).
//!
//! Field order documents the phase-ordering precondition each one carries:
//! `leftraw`/`leftind`/`right`/`rightind` are populated by the analyzer
//! (§4.B), `constraints`/`pairconstraints`/`axisdefs` by the constraint
//! solver (§4.C), and so on. The redesign note in §9 allows keeping one
//! mutable structure as long as that order is documented — this is that
//! documentation.

use crate::core::expr::Expr;
use crate::core::symbol::{Sym, SymbolTable};
use rustc_hash::{FxHashMap, FxHashSet};
use std::ops::RangeInclusive;

/// An insertion-ordered, deduplicated set of symbols.
///
/// Resolves the open question in §9: reduction/right/array/scalar index
/// sets use first-appearance order rather than hash order, so output is
/// deterministic and comparable across runs.
#[derive(Debug, Clone, Default)]
pub struct IndexSet {
    order: Vec<Sym>,
    seen: FxHashSet<Sym>,
}

impl IndexSet {
    /// An empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `sym` if not already present; returns whether it was newly inserted.
    pub fn insert(&mut self, sym: Sym) -> bool {
        if self.seen.insert(sym) {
            self.order.push(sym);
            true
        } else {
            false
        }
    }

    /// Whether `sym` is a member.
    #[must_use]
    pub fn contains(&self, sym: Sym) -> bool {
        self.seen.contains(&sym)
    }

    /// Iterate in first-appearance order.
    pub fn iter(&self) -> impl Iterator<Item = Sym> + '_ {
        self.order.iter().copied()
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the set has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// `self \ other`, in `self`'s order.
    #[must_use]
    pub fn difference(&self, other: &IndexSet) -> IndexSet {
        let mut out = IndexSet::new();
        for s in self.iter() {
            if !other.contains(s) {
                out.insert(s);
            }
        }
        out
    }

    /// `self ∩ other`, in `self`'s order.
    #[must_use]
    pub fn intersection(&self, other: &IndexSet) -> IndexSet {
        let mut out = IndexSet::new();
        for s in self.iter() {
            if other.contains(s) {
                out.insert(s);
            }
        }
        out
    }
}

impl FromIterator<Sym> for IndexSet {
    fn from_iter<T: IntoIterator<Item = Sym>>(iter: T) -> Self {
        let mut set = IndexSet::new();
        for s in iter {
            set.insert(s);
        }
        set
    }
}

/// Decisions recorded while walking the equation (§3 `flags`).
#[derive(Debug, Clone, Copy, Default)]
pub struct Flags {
    /// `Z[...] += rhs` — accumulate in place.
    pub plusequals: bool,
    /// The LHS array must be freshly allocated.
    pub newarray: bool,
    /// The LHS must be pre-zeroed before accumulation (repeated/non-unique LHS indices).
    pub zero: bool,
    /// Vectorized specialization disabled by a flag-raising RHS construct.
    pub noavx: bool,
    /// Gradient synthesis disabled by a flag-raising RHS construct.
    pub nograd: bool,
}

/// One LHS index position, exactly as written (§4.B).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LhsIndex {
    /// A free index symbol.
    Symbol(Sym),
    /// An integer literal pinning that axis position.
    Int(i64),
    /// An interpolated scalar (`$x`) pinning that axis position.
    Scalar(Sym),
    /// A keyword-style named axis, `name=index`.
    Named(Sym, Box<LhsIndex>),
}

/// A candidate range for one index, gathered from array shapes, literal
/// declarations, or entangled-pair resolution (§4.C).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeExpr {
    /// The range is exactly axis `position` of `array`.
    AxisOf {
        /// The array this range is inferred from.
        array: Sym,
        /// Zero-based axis position within that array.
        position: usize,
    },
    /// A literal, user-declared range (`i ∈ lo:hi`).
    Literal {
        /// Inclusive lower bound.
        lo: i64,
        /// Inclusive upper bound.
        hi: i64,
    },
    /// `base` shifted by a constant affine offset (from `i+c` style indexing).
    Shifted {
        /// The range before the shift was applied.
        base: Box<RangeExpr>,
        /// The additive offset (`A[i+c]` shifts the *index* range by `-c`
        /// relative to the array's axis).
        offset: i64,
    },
    /// `base` divided by an integer stride (from `a*i` style indexing).
    Scaled {
        /// The range before the scale was applied.
        base: Box<RangeExpr>,
        /// The integer stride.
        factor: i64,
    },
}

/// An entangled-pair constraint from `A[i+j]`-style indexing (§3, §4.B.5).
#[derive(Debug, Clone)]
pub struct PairConstraint {
    /// First index of the pair.
    pub i: Sym,
    /// Second index of the pair.
    pub j: Sym,
    /// Range tied to `i`'s position in the containing axis.
    pub range_i: RangeExpr,
    /// Range tied to `j`'s position in the containing axis.
    pub range_j: RangeExpr,
}

/// A resolved `axis_i := range` binding (§4.C step 4).
#[derive(Debug, Clone)]
pub struct AxisDef {
    /// The index this axis was solved for.
    pub index: Sym,
    /// The concrete, resolved range.
    pub range: RangeInclusive<i64>,
}

/// The reduction operator combining values over reduction indices (§3 `redfun`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReductionOp {
    /// Sum; additive identity `0`.
    #[default]
    Add,
    /// Product; multiplicative identity `1`.
    Mul,
    /// Elementwise maximum; identity `-inf`.
    Max,
    /// Elementwise minimum; identity `+inf`.
    Min,
}

impl ReductionOp {
    /// The initializer used when `keep` is fresh (§4.E "Initializer by reduction operator").
    #[must_use]
    pub fn init(self) -> f64 {
        match self {
            ReductionOp::Add => 0.0,
            ReductionOp::Mul => 1.0,
            ReductionOp::Max => f64::NEG_INFINITY,
            ReductionOp::Min => f64::INFINITY,
        }
    }

    /// Combine an accumulator with one more term.
    #[must_use]
    pub fn combine(self, acc: f64, term: f64) -> f64 {
        match self {
            ReductionOp::Add => acc + term,
            ReductionOp::Mul => acc * term,
            ReductionOp::Max => acc.max(term),
            ReductionOp::Min => acc.min(term),
        }
    }
}

/// The mutable analysis state threaded through every phase (§3).
#[derive(Debug)]
pub struct Store {
    /// Scoped interner for every index/array/scalar/function name touched
    /// by this equation.
    pub symbols: SymbolTable,
    /// Phase-set decision flags.
    pub flags: Flags,
    /// LHS index positions, exactly as written.
    pub leftraw: Vec<LhsIndex>,
    /// Free (outer-loop) indices, first-appearance order.
    pub leftind: IndexSet,
    /// The LHS array's name (user-given, or a generated placeholder).
    pub leftarray: Sym,
    /// If the LHS is a bare name: the scalar output's name.
    pub leftscalar: Option<Sym>,
    /// Named-axis labels, `(label, index)`, if the LHS used keyword indices.
    pub leftnames: Vec<(Sym, Sym)>,
    /// The canonicalized RHS tree.
    pub right: Expr,
    /// Every index appearing anywhere on the RHS, first-appearance order.
    pub rightind: IndexSet,
    /// `rightind \ leftind`: indices to reduce over.
    pub redind: IndexSet,
    /// Intersection of index sets across every RHS array.
    pub sharedind: IndexSet,
    /// RHS array names, first-appearance order.
    pub arrays: IndexSet,
    /// RHS lifted-scalar names, first-appearance order.
    pub scalars: IndexSet,
    /// Indices that appeared inside a non-trivial affine expression somewhere.
    pub shiftedind: FxHashSet<Sym>,
    /// Range evidence gathered per index.
    pub constraints: FxHashMap<Sym, Vec<RangeExpr>>,
    /// Entangled-pair constraints.
    pub pairconstraints: Vec<PairConstraint>,
    /// Resolved axis bindings, the range solver's output.
    pub axisdefs: Vec<AxisDef>,
    /// The reduction operator.
    pub redfun: ReductionOp,
    /// Heuristic per-evaluation cost, used to size the threading threshold.
    pub cost: u64,
    /// Preamble fragments (rank checks, lifted bindings, axis defs) — for
    /// `verbose` dumps; the real checks are performed eagerly by
    /// [`crate::analyzer`]/[`crate::alloc`], not deferred to runtime.
    pub out_pre: Vec<String>,
    /// Main kernel-body fragments, for `verbose` dumps.
    pub out_ex: Vec<String>,
    /// Top-level definition fragments (kernel signatures), for `verbose` dumps.
    pub out_eval: Vec<String>,
}

impl Store {
    /// Create an empty store with a fresh symbol table and a placeholder
    /// LHS array name of `Z`.
    #[must_use]
    pub fn new() -> Self {
        let mut symbols = SymbolTable::new();
        let leftarray = symbols.intern("Z");
        Store {
            symbols,
            flags: Flags::default(),
            leftraw: Vec::new(),
            leftind: IndexSet::new(),
            leftarray,
            leftscalar: None,
            leftnames: Vec::new(),
            right: Expr::number(0.0),
            rightind: IndexSet::new(),
            redind: IndexSet::new(),
            sharedind: IndexSet::new(),
            arrays: IndexSet::new(),
            scalars: IndexSet::new(),
            shiftedind: FxHashSet::default(),
            constraints: FxHashMap::default(),
            pairconstraints: Vec::new(),
            axisdefs: Vec::new(),
            redfun: ReductionOp::default(),
            cost: 0,
            out_pre: Vec::new(),
            out_ex: Vec::new(),
            out_eval: Vec::new(),
        }
    }

    /// Look up the resolved axis for `index`, if the solver has run.
    #[must_use]
    pub fn axis_of(&self, index: Sym) -> Option<&RangeInclusive<i64>> {
        self.axisdefs.iter().find(|d| d.index == index).map(|d| &d.range)
    }

    /// A human-readable dump of the store, used when `verbose` is set (§4.A).
    #[must_use]
    pub fn verbose_dump(&self) -> String {
        let mut s = String::new();
        s.push_str("preamble:\n");
        for line in &self.out_pre {
            s.push_str("  ");
            s.push_str(line);
            s.push('\n');
        }
        s.push_str("axis defs:\n");
        for d in &self.axisdefs {
            s.push_str(&format!(
                "  axis_{} := {}:{}\n",
                self.symbols.name(d.index),
                d.range.start(),
                d.range.end()
            ));
        }
        s.push_str(&format!("cost: {}\n", self.cost));
        s
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_set_dedups_in_first_appearance_order() {
        let mut syms = SymbolTable::new();
        let i = syms.intern("i");
        let j = syms.intern("j");
        let mut set = IndexSet::new();
        assert!(set.insert(j));
        assert!(set.insert(i));
        assert!(!set.insert(j));
        let collected: Vec<_> = set.iter().collect();
        assert_eq!(collected, vec![j, i]);
    }

    #[test]
    fn reduction_op_identities() {
        assert_eq!(ReductionOp::Add.init(), 0.0);
        assert_eq!(ReductionOp::Mul.init(), 1.0);
        assert_eq!(ReductionOp::Add.combine(2.0, 3.0), 5.0);
        assert_eq!(ReductionOp::Max.combine(2.0, 3.0), 3.0);
    }
}
