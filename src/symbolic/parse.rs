//! Parsing the text form of an [`Expr`].

use std::str::FromStr;

use nom::{
  IResult,
  branch::alt,
  bytes::complete::tag,
  character::complete::{
    alpha1, alphanumeric1, char, i32 as parse_i32, i64 as parse_i64, multispace0,
  },
  combinator::{all_consuming, map, map_res, recognize, value},
  multi::{many0_count, many1, separated_list0, separated_list1},
  sequence::{delimited, pair, preceded, separated_pair, terminated, tuple},
};
use thiserror::Error;

use super::{Arg, Bound, Expr, Factor, Limit, MarginalKind};
use crate::admg::Vertex;

/// An error when parsing an [`Expr`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed expression at {rest:?}")]
pub struct ParseExprError {
  rest: String,
}

impl ParseExprError {
  /// The unparsed remainder of the input where parsing failed.
  #[must_use]
  pub fn rest(&self) -> &str {
    &self.rest
  }
}

pub(super) fn parse_expr(s: &str) -> Result<Expr, ParseExprError> {
  all_consuming(expr)(s)
    .map(|(_, e)| e)
    .map_err(|e| match e {
      nom::Err::Error(e) | nom::Err::Failure(e) => ParseExprError {
        rest: e.input.to_owned(),
      },
      nom::Err::Incomplete(_) => ParseExprError { rest: s.to_owned() },
    })
}

fn ws<'a, F, O>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
  F: FnMut(&'a str) -> IResult<&'a str, O>,
{
  delimited(multispace0, inner, multispace0)
}

fn name(input: &str) -> IResult<&str, Vertex> {
  map(
    recognize(pair(
      alt((alpha1, tag("_"))),
      many0_count(alt((alphanumeric1, tag("_")))),
    )),
    Vertex::from,
  )(input)
}

fn arg(input: &str) -> IResult<&str, Arg> {
  alt((
    map(delimited(ws(char('(')), args, ws(char(')'))), Arg::Group),
    map(ws(name), Arg::Var),
  ))(input)
}

fn args(input: &str) -> IResult<&str, Vec<Arg>> {
  separated_list0(ws(char(',')), arg)(input)
}

fn one(input: &str) -> IResult<&str, Expr> {
  value(Expr::One, char('1'))(input)
}

fn joint(input: &str) -> IResult<&str, Expr> {
  map(delimited(tag("P("), args, ws(char(')'))), Expr::Joint)(input)
}

fn conditional(input: &str) -> IResult<&str, Expr> {
  map(
    delimited(
      tag("Pc("),
      separated_pair(args, ws(char('|')), args),
      ws(char(')')),
    ),
    |(target, given)| Expr::Conditional { target, given },
  )(input)
}

fn pow_factor(input: &str) -> IResult<&str, Factor> {
  map(
    delimited(
      tag("Pow("),
      separated_pair(expr, char(','), ws(parse_i32)),
      char(')'),
    ),
    |(base, exponent)| Factor::new(base, exponent),
  )(input)
}

fn pow(input: &str) -> IResult<&str, Expr> {
  map(pow_factor, |f| Expr::Product(vec![f]))(input)
}

/// A `Pow(...)` directly inside `Mul(...)` is read as a factor of that
/// product rather than as a nested single-factor product.
fn mul(input: &str) -> IResult<&str, Expr> {
  map(
    delimited(
      tag("Mul("),
      separated_list1(
        char(','),
        alt((ws(pow_factor), map(expr, |e| Factor::new(e, 1)))),
      ),
      char(')'),
    ),
    Expr::Product,
  )(input)
}

fn bound(input: &str) -> IResult<&str, Bound> {
  alt((
    value(Bound::NegInfinity, tag("-oo")),
    value(Bound::Infinity, tag("oo")),
    map(parse_i64, Bound::Finite),
  ))(input)
}

fn limit(input: &str) -> IResult<&str, Limit> {
  map(
    delimited(
      ws(char('(')),
      tuple((
        ws(name),
        preceded(char(','), ws(bound)),
        preceded(char(','), ws(bound)),
      )),
      char(')'),
    ),
    |(var, lower, upper)| Limit { var, lower, upper },
  )(input)
}

fn marginal(input: &str) -> IResult<&str, Expr> {
  let (input, kind) = map_res(terminated(alpha1, char('(')), MarginalKind::from_str)(input)?;
  let (input, body) = expr(input)?;
  let (input, limits) = many1(preceded(char(','), ws(limit)))(input)?;
  let (input, _) = char(')')(input)?;
  Ok((input, Expr::marginal(kind, body, limits)))
}

pub(super) fn expr(input: &str) -> IResult<&str, Expr> {
  ws(alt((conditional, joint, pow, mul, marginal, one)))(input)
}
