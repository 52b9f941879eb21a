//! Identification of causal effects in acyclic directed mixed graphs by
//! [fixing], and comparison of the resulting formulas.
//!
//! A query asks for the effect of a set of treatments on a set of outcomes.
//! [`Identification`] finds every fixing order that witnesses the effect,
//! [`KernelBuilder`] turns each resulting [`Factorization`] into a
//! probability [`Expr`], and [`Evaluator`] compares two lists of such
//! expressions through their [`canon`]ical forms.
//!
//! [fixing]: https://arxiv.org/abs/1903.12210

#![warn(
  clippy::all,
  clippy::pedantic,
  anonymous_parameters,
  elided_lifetimes_in_paths,
  missing_copy_implementations,
  unreachable_pub,
  unused_lifetimes
)]
#![allow(clippy::non_ascii_literal)]

pub mod admg;
pub mod canon;
pub mod evaluate;
pub mod factorization;
pub mod fixing;
pub mod identify;
pub mod kernel;
pub mod symbolic;

pub use admg::{Admg, FixedView, GraphError, Vertex};
pub use canon::{CanonicalKey, canonical_form, canonicalize};
pub use evaluate::{
  Comparison, EvalConfig, EvalError, Evaluator, Metrics, compare_queries,
  evaluate_prediction_lists,
};
pub use factorization::{Factorization, ParseFactorizationError};
pub use fixing::{FixingOrders, FixingSequence, fixing_orders};
pub use identify::{District, Identification, IdentifyError, OneLineId};
pub use kernel::{KernelBuilder, KernelConfig, KernelError};
pub use symbolic::{Arg, Bound, Expr, Factor, Limit, MarginalKind, ParseExprError};
