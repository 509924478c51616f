//! Core data model: symbols, expressions, diagnostics, options, and the
//! analysis [`store::Store`]. Everything under this module is pure data —
//! no parsing, solving, or code generation lives here.

pub mod error;
pub mod expr;
pub mod options;
pub mod store;
pub mod symbol;

pub use error::{CompileError, Span};
pub use expr::{Expr, ExprKind, RawIndex};
pub use options::{Avx, CudaBlock, GradStrategy, Options, RangeDecl, Threads};
pub use store::{AxisDef, Flags, IndexSet, LhsIndex, PairConstraint, RangeExpr, ReductionOp, Store};
pub use symbol::{Sym, SymbolTable};
