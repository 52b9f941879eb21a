//! Canonical forms of probability expressions.
//!
//! Two expressions that differ only in how conditionals, fractions,
//! marginalizations of whole joints, bound-variable lists, or argument lists
//! are written canonicalize to the same [`CanonicalKey`]. The canonical form
//! is computed by four passes, each a total rewrite of the tree:
//!
//! 1. [`expand_conditionals`]: `Pc(t | g)` becomes `P(t, g) / P(g)`.
//! 2. [`normalize_fractions`]: products are flattened and reduced.
//! 3. [`drop_trivial_marginals`]: a sum or integral of a joint over the
//!    whole real line keeps the joint of the remaining variables.
//! 4. [`order_canonically`]: nested marginalizations merge and every list
//!    whose order does not matter is sorted.
//!
//! The key is the text form of the result, which parses back into the same
//! canonical expression.

use std::{
  fmt::{self, Display, Formatter},
  ops::Deref,
};

use serde::{Deserialize, Serialize};

use crate::symbolic::{flatten, Arg, Expr, Factor};

/// The text of a canonical expression. Equal keys mean equal expressions up
/// to the rewrites of this module.
#[derive(
  Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct CanonicalKey(String);

impl CanonicalKey {
  /// The key as a string slice.
  #[must_use]
  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl Deref for CanonicalKey {
  type Target = str;

  fn deref(&self) -> &Self::Target {
    &self.0
  }
}

impl Display for CanonicalKey {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Computes the canonical key of `expr`.
#[must_use]
pub fn canonicalize(expr: &Expr) -> CanonicalKey {
  CanonicalKey(canonical_form(expr).to_string())
}

/// Runs the four canonicalization passes over `expr`.
#[must_use]
pub fn canonical_form(expr: &Expr) -> Expr {
  let expr = expand_conditionals(expr);
  let expr = normalize_fractions(&expr);
  let expr = drop_trivial_marginals(&expr);
  order_canonically(&expr)
}

/// Rewrites every `Pc(target | given)` as `P(target, given) / P(given)`
/// with both argument lists flattened. Nothing is deduplicated.
#[must_use]
pub fn expand_conditionals(expr: &Expr) -> Expr {
  match expr {
    Expr::One | Expr::Joint(_) => expr.clone(),
    Expr::Conditional { target, given } => {
      let given = flatten(given);
      let numer = Expr::joint(flatten(target).into_iter().chain(given.iter().cloned()));
      Expr::Product(vec![
        Factor::new(numer, 1),
        Factor::new(Expr::joint(given), -1),
      ])
    }
    Expr::Product(factors) => Expr::Product(
      factors
        .iter()
        .map(|f| Factor::new(expand_conditionals(&f.base), f.exponent))
        .collect(),
    ),
    Expr::Marginal { kind, body, limits } => {
      Expr::marginal(*kind, expand_conditionals(body), limits.clone())
    }
  }
}

/// Brings every product into normal form: nested products flattened, equal
/// factors merged, constant and cancelled factors dropped, and the rest
/// ordered by their text.
#[must_use]
pub fn normalize_fractions(expr: &Expr) -> Expr {
  match expr {
    Expr::One | Expr::Joint(_) | Expr::Conditional { .. } => expr.clone(),
    Expr::Product(factors) => Expr::product(
      factors
        .iter()
        .map(|f| Factor::new(normalize_fractions(&f.base), f.exponent)),
    ),
    Expr::Marginal { kind, body, limits } => {
      Expr::marginal(*kind, normalize_fractions(body), limits.clone())
    }
  }
}

/// Replaces each sum or integral of a joint atom over unbounded limits by
/// the joint of the arguments that are not bound, or by `1` if every
/// argument is bound. Works from the leaves up, so nested marginalizations
/// of a joint collapse completely.
#[must_use]
pub fn drop_trivial_marginals(expr: &Expr) -> Expr {
  match expr {
    Expr::One | Expr::Joint(_) | Expr::Conditional { .. } => expr.clone(),
    Expr::Product(factors) => Expr::product(
      factors
        .iter()
        .map(|f| Factor::new(drop_trivial_marginals(&f.base), f.exponent)),
    ),
    Expr::Marginal { kind, body, limits } => {
      let body = drop_trivial_marginals(body);
      match body {
        Expr::Joint(args) if limits.iter().all(|l| l.is_unbounded()) => {
          let remainder: Vec<Arg> = args
            .into_iter()
            .filter(|a| !matches!(a, Arg::Var(v) if limits.iter().any(|l| l.var == *v)))
            .collect();
          if remainder.is_empty() {
            Expr::One
          } else {
            Expr::Joint(remainder)
          }
        }
        body => Expr::marginal(*kind, body, limits.clone()),
      }
    }
  }
}

/// Merges directly nested marginalizations of the same kind, sorts bound
/// variables by name and joint arguments by their text, and rebuilds
/// products so their factors are reordered.
#[must_use]
pub fn order_canonically(expr: &Expr) -> Expr {
  match expr {
    Expr::One => Expr::One,
    Expr::Joint(args) => Expr::Joint(sorted_args(args)),
    Expr::Conditional { target, given } => Expr::Conditional {
      target: sorted_args(target),
      given: sorted_args(given),
    },
    Expr::Product(factors) => Expr::product(
      factors
        .iter()
        .map(|f| Factor::new(order_canonically(&f.base), f.exponent)),
    ),
    Expr::Marginal { kind, body, limits } => {
      let mut limits = limits.clone();
      let mut body = order_canonically(body);
      let body = loop {
        match body {
          Expr::Marginal {
            kind: inner_kind,
            body: inner_body,
            limits: inner_limits,
          } if inner_kind == *kind => {
            limits.splice(0..0, inner_limits);
            body = *inner_body;
          }
          other => break other,
        }
      };
      limits.sort_by(|a, b| a.var.cmp(&b.var));
      Expr::marginal(*kind, body, limits)
    }
  }
}

fn sorted_args(args: &[Arg]) -> Vec<Arg> {
  let mut args = args.to_vec();
  args.sort_by_cached_key(ToString::to_string);
  args
}

#[cfg(test)]
mod tests {
  use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};

  use super::*;
  use crate::{
    admg::{Admg, Vertex},
    identify::Identification,
    kernel::KernelBuilder,
    symbolic::MarginalKind,
  };

  fn key(text: &str) -> String {
    canonicalize(&text.parse().unwrap()).to_string()
  }

  #[test]
  fn conditionals_expand_by_bayes_rule() {
    assert_eq!(key("Pc(X1 | X2)"), "Mul(P(X1, X2), Pow(P(X2), -1))");
    assert_eq!(
      key("Pc((X2, X1) | X3)"),
      key("Mul(P(X3, X1, X2), Pow(P(X3), -1))")
    );
    assert_eq!(key("Pc(X1 | )"), "Mul(Pow(P(), -1), P(X1))");
  }

  #[test]
  fn towers_of_fractions_flatten() {
    assert_eq!(
      key("Mul(P(X1), Pow(Mul(P(X2), Pow(P(X1), -1)), -1))"),
      "Mul(Pow(P(X1), 2), Pow(P(X2), -1))"
    );
    assert_eq!(key("Mul(P(X1), Pow(P(X1), -1), 1)"), "1");
  }

  #[test]
  fn fully_marginalized_joints_are_one() {
    assert_eq!(key("Sum(P(X1, X2), (X1, -oo, oo), (X2, -oo, oo))"), "1");
    assert_eq!(
      key("Integral(Integral(P(X2, X1), (X1, -oo, oo)), (X2, -oo, oo))"),
      "1"
    );
    assert_eq!(key("Sum(P(X1, X2, X3), (X2, -oo, oo))"), "P(X1, X3)");
  }

  #[test]
  fn bounded_or_non_joint_marginals_stay() {
    assert_eq!(
      key("Sum(P(X1, X2), (X1, 0, 3))"),
      "Sum(P(X1, X2), (X1, 0, 3))"
    );
    assert_eq!(
      key("Sum(Mul(P(X1, X2), P(X3)), (X1, -oo, oo))"),
      "Sum(Mul(P(X1, X2), P(X3)), (X1, -oo, oo))"
    );
  }

  #[test]
  fn nesting_order_of_marginals_does_not_matter() {
    let body = "Mul(P(X1, X2, X3), Pow(P(X3), -1))";
    let a = format!("Sum(Sum({body}, (X1, -oo, oo)), (X2, -oo, oo))");
    let b = format!("Sum(Sum({body}, (X2, -oo, oo)), (X1, -oo, oo))");
    let c = format!("Sum({body}, (X2, -oo, oo), (X1, -oo, oo))");
    assert_eq!(key(&a), key(&b));
    assert_eq!(key(&b), key(&c));
    // a sum inside an integral is a different expression
    let d = format!("Integral(Sum({body}, (X1, -oo, oo)), (X2, -oo, oo))");
    assert_ne!(key(&d), key(&a));
  }

  #[test]
  fn joint_argument_order_does_not_matter() {
    let names = ["X1", "X2", "X3", "X4", "X5", "X6"];
    let expected = key(&format!("P({})", names.join(", ")));
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..20 {
      let mut shuffled = names.to_vec();
      shuffled.shuffle(&mut rng);
      let text = format!("Mul(P({}), Pow(P(X7), 0))", shuffled.join(", "));
      assert_eq!(key(&text), expected);
    }
  }

  #[test]
  fn canonicalization_is_idempotent_through_text() {
    let texts = [
      "Pc(X1 | X2)",
      "Mul(Pc((X3, X1) | X2), Sum(P(X4, X2), (X4, -oo, oo)))",
      "Sum(Mul(Pow(P(X2), -1), P(X1, X2), Sum(Pc(X3 | X1), (X1, -oo, oo))), (X2, -oo, oo))",
      "Integral(Pow(Integral(P(X1, X2, X3), (X3, 1, oo)), 2), (X1, -oo, oo))",
    ];
    for text in texts {
      let once = key(text);
      assert_eq!(key(&once), once, "{text}");
    }
  }

  #[test]
  fn canonicalization_is_idempotent_on_identified_formulas() {
    let front_door = Admg::new(
      ["X1", "X2", "X3", "X4"],
      [("X1", "X2"), ("X2", "X3"), ("X1", "X4"), ("X4", "X3")],
      [("X1", "X3")],
    )
    .unwrap();
    let confounded_mediator = Admg::new(
      ["X1", "X2", "X3", "X4"],
      [("X1", "X2"), ("X2", "X3"), ("X4", "X3"), ("X4", "X2")],
      [("X1", "X3")],
    )
    .unwrap();
    for (g, count) in [(&front_door, 18), (&confounded_mediator, 36)] {
      let id = Identification::from_query(g, ["X1"], ["X3"]).unwrap();
      let builder = KernelBuilder::new(g);
      let factorizations = id.factorizations().unwrap();
      assert_eq!(factorizations.len(), count);
      for f in &factorizations {
        let once = canonicalize(&builder.build(f).unwrap());
        assert_eq!(key(&once), once.as_str(), "{f}");
      }
    }
  }

  #[test]
  fn fixing_a_root_leaves_the_conditional_of_the_rest() {
    let g =
      Admg::new(["X1", "X2"], [("X1", "X2")], Vec::<(&str, &str)>::new()).unwrap();
    let kernel = KernelBuilder::new(&g)
      .kernel(&[Vertex::from("X1")])
      .unwrap();
    assert_eq!(canonicalize(&kernel), canonicalize(&Expr::conditional(["X2"], ["X1"])));
  }

  #[test]
  fn summing_out_an_absent_variable_is_not_trivial() {
    let e = Expr::joint(["X1"]).marginalize(&"X2".into(), MarginalKind::Sum);
    assert_eq!(canonicalize(&e).as_str(), "Mul(P(X1), Sum(1, (X2, -oo, oo)))");
  }
}
