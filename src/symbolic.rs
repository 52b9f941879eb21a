//! Probability expressions.
//!
//! An [`Expr`] is built from joint atoms `P(...)`, conditional atoms
//! `Pc(... | ...)`, the constant `1`, products with integer exponents, and
//! sums or integrals over bound variables. The constructors behave like a
//! computer algebra system would: [`Expr::product`] flattens nested products,
//! merges repeated factors, cancels, and orders the factors, and
//! [`Expr::marginalize`] pulls the factors that do not mention the bound
//! variable out of the sum.
//!
//! The text form produced by [`Display`] is parsed back by [`FromStr`]:
//!
//! ```text
//! Mul(P(X1, X2), Pow(Sum(P(X1, X2, X3), (X3, -oo, oo)), -1))
//! ```
//!
//! Parsing keeps the structure exactly as written (nothing is normalized),
//! so parsed expressions can be handed to [`crate::canon`] as they are.

use std::{
  collections::BTreeSet,
  fmt::{self, Display, Formatter},
  ops::{Div, Mul},
  str::FromStr,
};

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use strum::{Display as StrumDisplay, EnumString};

use crate::admg::Vertex;

pub use parse::ParseExprError;

mod parse;

/// An argument of a probability atom: a variable or a parenthesized group of
/// arguments.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Arg {
  /// A single variable
  Var(Vertex),
  /// A group of arguments
  Group(Vec<Arg>),
}

impl Arg {
  /// Returns the variables of the argument in order, with groups flattened.
  #[must_use]
  pub fn flatten(&self) -> Vec<Vertex> {
    let mut vars = Vec::new();
    self.collect_vars(&mut vars);
    vars
  }

  fn collect_vars(&self, vars: &mut Vec<Vertex>) {
    match self {
      Self::Var(v) => vars.push(v.clone()),
      Self::Group(args) => args.iter().for_each(|a| a.collect_vars(vars)),
    }
  }
}

/// Flattens a list of arguments into its variables, in order and without
/// removing duplicates.
#[must_use]
pub fn flatten(args: &[Arg]) -> Vec<Vertex> {
  let mut vars = Vec::new();
  for arg in args {
    arg.collect_vars(&mut vars);
  }
  vars
}

impl From<Vertex> for Arg {
  fn from(v: Vertex) -> Self {
    Self::Var(v)
  }
}

impl From<&Vertex> for Arg {
  fn from(v: &Vertex) -> Self {
    Self::Var(v.clone())
  }
}

impl From<&str> for Arg {
  fn from(v: &str) -> Self {
    Self::Var(v.into())
  }
}

/// Whether a marginalization is a discrete sum or a continuous integral.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Hash,
  StrumDisplay,
  EnumString,
  Serialize,
  Deserialize,
)]
pub enum MarginalKind {
  /// `Sum(...)`
  Sum,
  /// `Integral(...)`
  Integral,
}

impl MarginalKind {
  /// Returns [`MarginalKind::Sum`] for discrete variables and
  /// [`MarginalKind::Integral`] otherwise.
  #[must_use]
  pub fn for_discrete(discrete: bool) -> Self {
    if discrete { Self::Sum } else { Self::Integral }
  }
}

/// One end of the range of a bound variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Bound {
  /// `-oo`
  NegInfinity,
  /// An integer
  Finite(i64),
  /// `oo`
  Infinity,
}

impl Display for Bound {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    match self {
      Self::NegInfinity => f.write_str("-oo"),
      Self::Finite(n) => write!(f, "{n}"),
      Self::Infinity => f.write_str("oo"),
    }
  }
}

/// A bound variable and its range.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Limit {
  /// The bound variable
  pub var: Vertex,
  /// The lower end of the range
  pub lower: Bound,
  /// The upper end of the range
  pub upper: Bound,
}

impl Limit {
  /// Creates the limit `(var, -oo, oo)`.
  #[must_use]
  pub fn unbounded(var: Vertex) -> Self {
    Self {
      var,
      lower: Bound::NegInfinity,
      upper: Bound::Infinity,
    }
  }

  /// Returns `true` if the range is `(-oo, oo)`.
  #[must_use]
  pub fn is_unbounded(&self) -> bool {
    self.lower == Bound::NegInfinity && self.upper == Bound::Infinity
  }
}

impl Display for Limit {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    write!(f, "({}, {}, {})", self.var, self.lower, self.upper)
  }
}

/// A factor `base^exponent` of a product.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Factor {
  /// The base
  pub base: Expr,
  /// The exponent; negative exponents divide
  pub exponent: i32,
}

impl Factor {
  /// Creates a factor.
  #[must_use]
  pub fn new(base: Expr, exponent: i32) -> Self {
    Self { base, exponent }
  }
}

/// A probability expression.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Expr {
  /// The constant `1`
  One,
  /// A joint probability `P(args)`
  Joint(Vec<Arg>),
  /// A conditional probability `Pc(target | given)`
  Conditional {
    /// The arguments left of the bar
    target: Vec<Arg>,
    /// The arguments right of the bar
    given: Vec<Arg>,
  },
  /// A product of factors
  Product(Vec<Factor>),
  /// A sum or integral of `body` over the variables of `limits`, innermost
  /// limit first
  Marginal {
    /// Sum or integral
    kind: MarginalKind,
    /// The marginalized expression
    body: Box<Expr>,
    /// The bound variables
    limits: Vec<Limit>,
  },
}

impl Expr {
  /// Creates the joint atom `P(args)`.
  #[must_use]
  pub fn joint<I>(args: I) -> Self
  where
    I: IntoIterator,
    I::Item: Into<Arg>,
  {
    Self::Joint(args.into_iter().map(Into::into).collect())
  }

  /// Creates the joint atom over `vars`, sorted by name.
  #[must_use]
  pub fn joint_sorted<'a, I>(vars: I) -> Self
  where
    I: IntoIterator<Item = &'a Vertex>,
  {
    Self::joint(vars.into_iter().sorted())
  }

  /// Creates the conditional atom `Pc(target | given)`.
  #[must_use]
  pub fn conditional<T, G>(target: T, given: G) -> Self
  where
    T: IntoIterator,
    T::Item: Into<Arg>,
    G: IntoIterator,
    G::Item: Into<Arg>,
  {
    Self::Conditional {
      target: target.into_iter().map(Into::into).collect(),
      given: given.into_iter().map(Into::into).collect(),
    }
  }

  /// Creates a sum or integral node as given, without pulling any factor out.
  #[must_use]
  pub fn marginal(kind: MarginalKind, body: Self, limits: Vec<Limit>) -> Self {
    Self::Marginal {
      kind,
      body: Box::new(body),
      limits,
    }
  }

  /// Multiplies `factors` together.
  ///
  /// Nested products are flattened, factors with equal bases are merged by
  /// adding their exponents, factors with exponent zero and constant factors
  /// are dropped, and the remaining factors are ordered by their text form.
  /// An empty product is [`Expr::One`] and a single factor with exponent one
  /// is returned as is.
  #[must_use]
  pub fn product<I>(factors: I) -> Self
  where
    I: IntoIterator<Item = Factor>,
  {
    fn push(combined: &mut Vec<Factor>, base: Expr, exponent: i32) {
      match base {
        Expr::One => {}
        Expr::Product(inner) => {
          for factor in inner {
            push(combined, factor.base, factor.exponent * exponent);
          }
        }
        base => match combined.iter_mut().find(|f| f.base == base) {
          Some(existing) => existing.exponent += exponent,
          None => combined.push(Factor::new(base, exponent)),
        },
      }
    }

    let mut combined = Vec::new();
    for factor in factors {
      push(&mut combined, factor.base, factor.exponent);
    }
    combined.retain(|f| f.exponent != 0);
    combined.sort_by_cached_key(|f| (f.base.to_string(), f.exponent));

    match combined.len() {
      0 => Self::One,
      1 if combined[0].exponent == 1 => combined.swap_remove(0).base,
      _ => Self::Product(combined),
    }
  }

  /// Raises the expression to an integer power.
  #[must_use]
  pub fn pow(self, exponent: i32) -> Self {
    Self::product([Factor::new(self, exponent)])
  }

  /// Sums or integrates `var` out of the expression over `(-oo, oo)`.
  ///
  /// Factors of a product that do not mention `var` freely stay outside the
  /// marginalization.
  #[must_use]
  pub fn marginalize(self, var: &Vertex, kind: MarginalKind) -> Self {
    let wrap = |body| Self::marginal(kind, body, vec![Limit::unbounded(var.clone())]);
    match self {
      Self::Product(factors) => {
        let (dependent, independent): (Vec<_>, Vec<_>) =
          factors.into_iter().partition(|f| f.base.has_free(var));
        let marginal = wrap(Self::product(dependent));
        Self::product(independent.into_iter().chain([Factor::new(marginal, 1)]))
      }
      body if body.has_free(var) => wrap(body),
      body => body * wrap(Self::One),
    }
  }

  /// Returns the variables occurring outside the scope of a marginalization
  /// that binds them.
  #[must_use]
  pub fn free_vars(&self) -> BTreeSet<Vertex> {
    match self {
      Self::One => BTreeSet::new(),
      Self::Joint(args) => flatten(args).into_iter().collect(),
      Self::Conditional { target, given } => {
        flatten(target).into_iter().chain(flatten(given)).collect()
      }
      Self::Product(factors) => {
        factors.iter().flat_map(|f| f.base.free_vars()).collect()
      }
      Self::Marginal { body, limits, .. } => {
        let mut vars = body.free_vars();
        for limit in limits {
          vars.remove(&limit.var);
        }
        vars
      }
    }
  }

  /// Returns `true` if `var` occurs free in the expression.
  #[must_use]
  pub fn has_free(&self, var: &Vertex) -> bool {
    self.free_vars().contains(var)
  }

  /// Returns the number of nodes in the expression tree.
  #[must_use]
  pub fn size(&self) -> usize {
    1 + match self {
      Self::One | Self::Joint(_) | Self::Conditional { .. } => 0,
      Self::Product(factors) => factors.iter().map(|f| f.base.size()).sum(),
      Self::Marginal { body, .. } => body.size(),
    }
  }
}

impl Mul for Expr {
  type Output = Self;

  fn mul(self, rhs: Self) -> Self::Output {
    Self::product([Factor::new(self, 1), Factor::new(rhs, 1)])
  }
}

impl Div for Expr {
  type Output = Self;

  fn div(self, rhs: Self) -> Self::Output {
    Self::product([Factor::new(self, 1), Factor::new(rhs, -1)])
  }
}

impl Display for Arg {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    match self {
      Self::Var(v) => write!(f, "{v}"),
      Self::Group(args) => write!(f, "({})", args.iter().join(", ")),
    }
  }
}

impl Display for Factor {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    if self.exponent == 1 {
      write!(f, "{}", self.base)
    } else {
      write!(f, "Pow({}, {})", self.base, self.exponent)
    }
  }
}

impl Display for Expr {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    match self {
      Self::One => f.write_str("1"),
      Self::Joint(args) => write!(f, "P({})", args.iter().join(", ")),
      Self::Conditional { target, given } => write!(
        f,
        "Pc({} | {})",
        target.iter().join(", "),
        given.iter().join(", ")
      ),
      Self::Product(factors) => match factors.as_slice() {
        [] => f.write_str("1"),
        [single] => write!(f, "Pow({}, {})", single.base, single.exponent),
        factors => write!(f, "Mul({})", factors.iter().join(", ")),
      },
      Self::Marginal { kind, body, limits } => {
        write!(f, "{kind}({body}, {})", limits.iter().join(", "))
      }
    }
  }
}

impl FromStr for Expr {
  type Err = ParseExprError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    parse::parse_expr(s)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn v(name: &str) -> Vertex {
    Vertex::from(name)
  }

  fn p(args: &[&str]) -> Expr {
    Expr::joint(args.iter().copied())
  }

  #[test]
  fn products_cancel_and_merge() {
    let a = p(&["X1", "X2"]);
    let b = p(&["X1"]);
    assert_eq!(a.clone() / a.clone(), Expr::One);
    assert_eq!((a.clone() * b.clone()) / b.clone(), a);
    assert_eq!(
      (b.clone() * b.clone()).to_string(),
      "Pow(P(X1), 2)"
    );
    assert_eq!(
      (a.clone() / (b.clone() / a.clone())).to_string(),
      "Mul(Pow(P(X1), -1), Pow(P(X1, X2), 2))"
    );
  }

  #[test]
  fn product_order_does_not_depend_on_construction() {
    let (a, b, c) = (p(&["X1"]), p(&["X2"]), p(&["X3"]));
    assert_eq!(
      a.clone() * (b.clone() / c.clone()),
      (b / c) * a
    );
  }

  #[test]
  fn marginalize_pulls_out_independent_factors() {
    let q = p(&["X1", "X2"]) / p(&["X2"]);
    let outer = p(&["X3"]) * q;
    let summed = outer.marginalize(&v("X1"), MarginalKind::Sum);
    assert_eq!(
      summed.to_string(),
      "Mul(Pow(P(X2), -1), P(X3), Sum(P(X1, X2), (X1, -oo, oo)))"
    );
    assert_eq!(
      summed.free_vars(),
      [v("X2"), v("X3")].into_iter().collect()
    );
  }

  #[test]
  fn marginalizing_an_absent_variable_keeps_a_unit_sum() {
    let e = p(&["X1"]).marginalize(&v("X2"), MarginalKind::Integral);
    assert_eq!(e.to_string(), "Mul(Integral(1, (X2, -oo, oo)), P(X1))");
  }

  #[test]
  fn bound_variables_are_not_free() {
    let e = p(&["X1", "X2"]).marginalize(&v("X1"), MarginalKind::Sum);
    assert!(!e.has_free(&v("X1")));
    assert!(e.has_free(&v("X2")));
    let again = e.marginalize(&v("X1"), MarginalKind::Sum);
    assert_eq!(
      again.to_string(),
      "Mul(Sum(1, (X1, -oo, oo)), Sum(P(X1, X2), (X1, -oo, oo)))"
    );
  }

  #[test]
  fn groups_flatten_in_order() {
    let args = vec![
      Arg::Group(vec!["X3".into(), Arg::Group(vec!["X1".into()])]),
      "X2".into(),
      "X3".into(),
    ];
    assert_eq!(flatten(&args), vec![v("X3"), v("X1"), v("X2"), v("X3")]);
  }

  #[test]
  fn printed_expressions_parse_back() {
    let exprs = [
      Expr::One,
      p(&[]),
      Expr::conditional([Arg::Group(vec!["X1".into(), "X2".into()])], ["X3"]),
      p(&["X1", "X2"]) / p(&["X2"]).pow(3),
      p(&["X1"]).pow(-1),
      Expr::marginal(
        MarginalKind::Integral,
        p(&["X1", "X2"]),
        vec![
          Limit::unbounded(v("X1")),
          Limit {
            var: v("X2"),
            lower: Bound::Finite(-3),
            upper: Bound::Finite(7),
          },
        ],
      ),
      (p(&["X1", "X2"]) * p(&["X3"])).marginalize(&v("X1"), MarginalKind::Sum),
    ];
    for e in exprs {
      let text = e.to_string();
      assert_eq!(text.parse::<Expr>().unwrap(), e, "{text}");
    }
  }

  #[test]
  fn parsing_keeps_the_written_structure() {
    let e: Expr = "Mul(Mul(P(X1), P(X2)), 1)".parse().unwrap();
    assert_eq!(
      e,
      Expr::Product(vec![
        Factor::new(
          Expr::Product(vec![Factor::new(p(&["X1"]), 1), Factor::new(p(&["X2"]), 1)]),
          1
        ),
        Factor::new(Expr::One, 1),
      ])
    );
    assert_eq!(e.size(), 5);
  }

  #[test]
  fn marginal_heads_name_their_kind() {
    assert_eq!("Sum".parse::<MarginalKind>(), Ok(MarginalKind::Sum));
    assert_eq!(MarginalKind::Integral.to_string(), "Integral");
    let e: Expr = "Integral(P(X1, X2), (X2, -oo, oo))".parse().unwrap();
    assert!(matches!(
      e,
      Expr::Marginal {
        kind: MarginalKind::Integral,
        ..
      }
    ));
  }

  #[test]
  fn malformed_text_is_rejected() {
    let texts = [
      "",
      "P(X1",
      "Q(X1)",
      "Sum(P(X1))",
      "Mul()",
      "P(X1) junk",
      "Total(P(X1), (X1, -oo, oo))",
    ];
    for text in texts {
      assert!(text.parse::<Expr>().is_err(), "{text}");
    }
  }
}
