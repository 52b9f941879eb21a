//! The factorization mini-language connecting identification to kernel
//! construction.
//!
//! A [`Factorization`] lists the vertices marginalized out of the product of
//! kernels, and one fixing order per district. Its text form is
//!
//! ```text
//! ΣX2X4 ΦX4X2X1(p(V);G) ΦX4X3X1(p(V);G)
//! ```
//!
//! where every `Φ` token spells its fixing order *reversed* and the optional
//! leading `Σ` token lists the hidden vertices in order. Vertex names must
//! have the form `X<digits>` to appear in the text form.

use std::{
  fmt::{self, Display, Formatter},
  str::FromStr,
};

use nom::{
  IResult,
  branch::alt,
  bytes::complete::take_till,
  character::complete::{char, digit1, multispace0, multispace1},
  combinator::{all_consuming, map, recognize},
  multi::{many0, many1, separated_list1},
  sequence::{delimited, pair, preceded},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{admg::Vertex, fixing::FixingSequence};

const SIGMA: char = 'Σ';
const PHI: char = 'Φ';
const KERNEL_SUFFIX: &str = "(p(V);G)";

/// The operators of an identified functional.
#[derive(
  Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Factorization {
  /// Vertices summed (or integrated) out of the product of kernels, in order.
  pub marginalized: Vec<Vertex>,
  /// One fixing order per district.
  pub kernels: Vec<FixingSequence>,
}

impl Factorization {
  /// Creates a factorization.
  #[must_use]
  pub fn new(marginalized: Vec<Vertex>, kernels: Vec<FixingSequence>) -> Self {
    Self {
      marginalized,
      kernels,
    }
  }
}

impl Display for Factorization {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    let mut tokens = Vec::with_capacity(self.kernels.len() + 1);
    if !self.marginalized.is_empty() {
      tokens.push(format!(
        "{SIGMA}{}",
        self.marginalized.iter().map(Vertex::as_str).collect::<String>()
      ));
    }
    for order in &self.kernels {
      tokens.push(format!(
        "{PHI}{}{KERNEL_SUFFIX}",
        order.iter().rev().map(Vertex::as_str).collect::<String>()
      ));
    }
    f.write_str(&tokens.join(" "))
  }
}

/// An error when parsing a [`Factorization`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseFactorizationError {
  /// There is no `Φ` token, so there is nothing to compute.
  #[error("no Φ token in {0:?}")]
  MissingKernel(String),
  /// A token is neither a `Σ` nor a `Φ` token.
  #[error("malformed factorization token at {0:?}")]
  Malformed(String),
}

enum Token {
  Sigma(Vec<Vertex>),
  Phi(FixingSequence),
}

fn vertex(input: &str) -> IResult<&str, Vertex> {
  map(recognize(pair(char('X'), digit1)), Vertex::from)(input)
}

fn sigma(input: &str) -> IResult<&str, Token> {
  map(preceded(char(SIGMA), many1(vertex)), Token::Sigma)(input)
}

/// `Φ`, the reversed order, then `(` and the rest of the token. An empty
/// order (a district with nothing to fix) is spelled `Φ(p(V);G)`.
fn phi(input: &str) -> IResult<&str, Token> {
  map(
    delimited(
      char(PHI),
      many0(vertex),
      pair(char('('), take_till(|c: char| c.is_whitespace())),
    ),
    |mut order| {
      order.reverse();
      Token::Phi(order)
    },
  )(input)
}

fn factorization_tokens(input: &str) -> IResult<&str, Vec<Token>> {
  delimited(
    multispace0,
    separated_list1(multispace1, alt((sigma, phi))),
    multispace0,
  )(input)
}

impl FromStr for Factorization {
  type Err = ParseFactorizationError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let (_, tokens) = all_consuming(factorization_tokens)(s).map_err(|e| match e {
      nom::Err::Error(e) | nom::Err::Failure(e) => {
        ParseFactorizationError::Malformed(e.input.to_owned())
      }
      nom::Err::Incomplete(_) => ParseFactorizationError::Malformed(s.to_owned()),
    })?;

    let mut factorization = Self::default();
    for token in tokens {
      match token {
        Token::Sigma(hidden) => factorization.marginalized.extend(hidden),
        Token::Phi(order) => factorization.kernels.push(order),
      }
    }
    if factorization.kernels.is_empty() {
      return Err(ParseFactorizationError::MissingKernel(s.to_owned()));
    }
    Ok(factorization)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn seq(vs: &[&str]) -> FixingSequence {
    vs.iter().map(|v| Vertex::from(*v)).collect()
  }

  #[test]
  fn prints_reversed_orders_after_the_hidden_vertices() {
    let f = Factorization::new(
      seq(&["X2", "X4"]),
      vec![seq(&["X1", "X2", "X4"]), seq(&["X3", "X1"])],
    );
    assert_eq!(f.to_string(), "ΣX2X4 ΦX4X2X1(p(V);G) ΦX1X3(p(V);G)");
  }

  #[test]
  fn prints_no_prefix_without_hidden_vertices() {
    let f = Factorization::new(vec![], vec![seq(&["X10", "X2"])]);
    assert_eq!(f.to_string(), "ΦX2X10(p(V);G)");
  }

  #[test]
  fn parsing_recovers_the_fixing_orders() {
    let f: Factorization = "ΣX2X4 ΦX4X2X1(p(V);G) ΦX1X3(p(V);G)".parse().unwrap();
    assert_eq!(f.marginalized, seq(&["X2", "X4"]));
    assert_eq!(f.kernels, vec![seq(&["X1", "X2", "X4"]), seq(&["X3", "X1"])]);
  }

  #[test]
  fn printed_factorizations_parse_back() {
    let f = Factorization::new(
      seq(&["X5"]),
      vec![seq(&["X12", "X3"]), seq(&["X1"]), seq(&["X7", "X6", "X2"])],
    );
    assert_eq!(f.to_string().parse::<Factorization>().unwrap(), f);
  }

  #[test]
  fn empty_fixing_orders_parse_back() {
    let f = Factorization::new(vec![], vec![vec![]]);
    assert_eq!(f.to_string(), "Φ(p(V);G)");
    assert_eq!(f.to_string().parse::<Factorization>().unwrap(), f);

    let f = Factorization::new(seq(&["X1"]), vec![vec![], seq(&["X3", "X2"])]);
    assert_eq!(f.to_string(), "ΣX1 Φ(p(V);G) ΦX2X3(p(V);G)");
    assert_eq!(f.to_string().parse::<Factorization>().unwrap(), f);
  }

  #[test]
  fn multiple_sigma_tokens_accumulate_in_order() {
    let f: Factorization =
      "  ΣX3 ΦX1(p(V);G) ΣX5X4  ".parse().unwrap();
    assert_eq!(f.marginalized, seq(&["X3", "X5", "X4"]));
  }

  #[test]
  fn missing_phi_is_an_error() {
    assert_eq!(
      "ΣX2X4".parse::<Factorization>(),
      Err(ParseFactorizationError::MissingKernel("ΣX2X4".to_owned()))
    );
  }

  #[test]
  fn garbage_is_malformed() {
    assert!(matches!(
      "ΦX1(p(V);G) Y2".parse::<Factorization>(),
      Err(ParseFactorizationError::Malformed(_))
    ));
    assert!(matches!(
      "".parse::<Factorization>(),
      Err(ParseFactorizationError::Malformed(_))
    ));
  }
}
