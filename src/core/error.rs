//! Diagnostic errors raised while analyzing an equation.
//!
//! Every error in this crate is raised at analysis time (§7): nothing is
//! deferred to the synthesized kernel.

use std::fmt;

/// A byte-offset range into the source equation string, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    start: usize,
    end: usize,
}

impl Span {
    /// Create a span, swapping endpoints if given reversed.
    #[inline]
    #[must_use]
    pub fn new(start: usize, end: usize) -> Self {
        if end < start {
            Span { start: end, end: start }
        } else {
            Span { start, end }
        }
    }

    /// A span covering a single byte position.
    #[inline]
    #[must_use]
    pub fn at(pos: usize) -> Self {
        Span { start: pos, end: pos + 1 }
    }

    /// An empty, unknown span.
    #[inline]
    #[must_use]
    pub fn empty() -> Self {
        Span { start: 0, end: 0 }
    }

    /// Start offset.
    #[inline]
    #[must_use]
    pub fn start(&self) -> usize {
        self.start
    }

    /// End offset (exclusive).
    #[inline]
    #[must_use]
    pub fn end(&self) -> usize {
        self.end
    }

    fn is_valid(&self) -> bool {
        self.end > self.start
    }

    fn display(&self) -> String {
        if !self.is_valid() {
            String::new()
        } else if self.end - self.start == 1 {
            format!(" at position {}", self.start + 1)
        } else {
            format!(" at positions {}-{}", self.start + 1, self.end)
        }
    }
}

/// Every diagnostic this crate can raise, one variant per row of §7.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CompileError {
    /// LHS/RHS shape not recognized.
    UnsupportedEquation {
        /// What was found instead of a recognized shape.
        msg: String,
        /// Location in the source.
        span: Option<Span>,
    },
    /// An option name outside the recognized set (§4.A).
    UnknownOption {
        /// The unrecognized option name.
        name: String,
    },
    /// An option value outside its domain (§4.A).
    IllegalOptionValue {
        /// The option whose value was rejected.
        option: String,
        /// Description of why the value is illegal.
        reason: String,
    },
    /// Two candidate ranges for a non-shifted index disagree (§4.C step 3).
    RangeDisagreement {
        /// The index whose ranges disagree.
        index: String,
        /// The first (nominal) range, as text.
        first: String,
        /// The conflicting range, as text.
        other: String,
    },
    /// No candidate range could be found for an index (§4.C step 3).
    UnconstrainedIndex {
        /// The index with no range evidence.
        index: String,
    },
    /// Non-1-origin axis requested without offset-axis support (§4.D.3).
    OffsetWithoutSupport {
        /// The index whose axis is not 1-origin.
        index: String,
    },
    /// `$x` interpolation where `x` is not a bare symbol (§4.B.6).
    BadInterpolation {
        /// The text that was interpolated.
        text: String,
    },
    /// `Z := … Z …` (§4.B, end of RHS walk).
    SelfReferenceOnCreate {
        /// The array name that was both created and read.
        name: String,
    },
    /// Affine index form this crate does not support (§4.B "anything else").
    UnsupportedAffine {
        /// Textual description of the offending index expression.
        text: String,
    },
    /// Array rank did not match the number of index positions (§4.B.5, §3 invariant 3).
    RankMismatch {
        /// The array whose rank check failed.
        array: String,
        /// Rank implied by the indexing.
        expected: usize,
        /// Actual rank of the bound array.
        got: usize,
    },
}

impl CompileError {
    /// Construct [`CompileError::UnsupportedEquation`] without a span.
    #[must_use]
    pub fn unsupported_equation(msg: impl Into<String>) -> Self {
        CompileError::UnsupportedEquation { msg: msg.into(), span: None }
    }

    /// Construct [`CompileError::UnsupportedEquation`] with a span.
    #[must_use]
    pub fn unsupported_equation_at(msg: impl Into<String>, span: Span) -> Self {
        CompileError::UnsupportedEquation { msg: msg.into(), span: Some(span) }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::UnsupportedEquation { msg, span } => write!(
                f,
                "unsupported equation: {}{}",
                msg,
                span.map_or(String::new(), |s| s.display())
            ),
            CompileError::UnknownOption { name } => write!(f, "unknown option '{name}'"),
            CompileError::IllegalOptionValue { option, reason } => {
                write!(f, "illegal value for option '{option}': {reason}")
            }
            CompileError::RangeDisagreement { index, first, other } => write!(
                f,
                "index '{index}' has disagreeing ranges: '{first}' vs '{other}'"
            ),
            CompileError::UnconstrainedIndex { index } => {
                write!(f, "unable to infer range of index '{index}'")
            }
            CompileError::OffsetWithoutSupport { index } => write!(
                f,
                "index '{index}' requires a non-1-origin axis but offset axes are disabled"
            ),
            CompileError::BadInterpolation { text } => {
                write!(f, "'${text}' does not interpolate a bare symbol")
            }
            CompileError::SelfReferenceOnCreate { name } => write!(
                f,
                "can't create a new array '{name}' when '{name}' also appears on the right"
            ),
            CompileError::UnsupportedAffine { text } => {
                write!(f, "unsupported affine index expression: {text}")
            }
            CompileError::RankMismatch { array, expected, got } => write!(
                f,
                "array '{array}' indexed with {expected} position(s) but has rank {got}"
            ),
        }
    }
}

impl std::error::Error for CompileError {}
