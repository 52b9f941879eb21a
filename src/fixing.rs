//! Enumeration of every valid fixing order for a set of vertices.
//!
//! A vertex `v` can be fixed when no other member of its district is one of
//! its descendants. Fixing it removes edges, which can make further vertices
//! fixable, so the search branches on every fixable vertex at every step and
//! reports each order that fixes the whole set. The number of orders is
//! factorial in the size of the set in the worst case.

use bitvec::prelude::*;
use log::debug;

use crate::admg::{Admg, FixedView, GraphError, Vertex};

/// An order in which a set of vertices can be fixed one at a time.
pub type FixingSequence = Vec<Vertex>;

/// All valid fixing orders for one set of vertices in one graph.
///
/// An empty collection means the set cannot be fixed. Fixing an empty set
/// (or a set of already fixed vertices) succeeds with a single empty order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FixingOrders {
  sequences: Vec<FixingSequence>,
}

impl FixingOrders {
  /// Returns `true` if at least one valid order exists.
  #[must_use]
  pub fn is_fixable(&self) -> bool {
    !self.sequences.is_empty()
  }

  /// Returns the number of valid orders.
  #[must_use]
  pub fn len(&self) -> usize {
    self.sequences.len()
  }

  /// Returns `true` if there is no valid order.
  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.sequences.is_empty()
  }

  /// Returns the valid orders.
  #[must_use]
  pub fn sequences(&self) -> &[FixingSequence] {
    &self.sequences
  }

  /// Returns the first order found, if any.
  #[must_use]
  pub fn first(&self) -> Option<&FixingSequence> {
    self.sequences.first()
  }

  /// Splits into the fixability flag and the orders.
  #[must_use]
  pub fn into_parts(self) -> (bool, Vec<FixingSequence>) {
    (self.is_fixable(), self.sequences)
  }
}

impl IntoIterator for FixingOrders {
  type Item = FixingSequence;

  type IntoIter = std::vec::IntoIter<FixingSequence>;

  fn into_iter(self) -> Self::IntoIter {
    self.sequences.into_iter()
  }
}

/// Finds every order in which `vertices` can be fixed in `graph`.
///
/// Vertices that are already fixed in `graph` are skipped. Candidates are
/// tried in the graph's vertex order, so the result is deterministic.
///
/// # Errors
///
/// Returns an error if a name is not a vertex of the graph.
pub fn fixing_orders<I>(graph: &Admg, vertices: I) -> Result<FixingOrders, GraphError>
where
  I: IntoIterator,
  I::Item: AsRef<str>,
{
  let mut remaining = bitvec![0; graph.len()];
  for v in graph.resolve(vertices)? {
    if !graph.is_fixed(v) {
      remaining.set(v, true);
    }
  }

  let mut found = Vec::new();
  search(graph.view(), &mut remaining, &mut Vec::new(), &mut found);
  debug!(
    "found {} fixing order(s) for {} vertices",
    found.len(),
    remaining.count_ones()
  );

  let sequences = found
    .into_iter()
    .map(|order| order.into_iter().map(|v| graph.vertex(v).clone()).collect())
    .collect();
  Ok(FixingOrders { sequences })
}

/// Depth-first search over fixing orders. `remaining` is restored before
/// returning, `path` holds the order fixed so far.
fn search(
  view: FixedView<'_>,
  remaining: &mut BitVec,
  path: &mut Vec<usize>,
  found: &mut Vec<Vec<usize>>,
) {
  if remaining.not_any() {
    found.push(path.clone());
    return;
  }

  let fixable_now: Vec<usize> = remaining
    .iter_ones()
    .filter(|&v| view.is_fixable(v))
    .collect();

  for v in fixable_now {
    remaining.set(v, false);
    path.push(v);
    search(view.with_fixed(v), remaining, path, found);
    path.pop();
    remaining.set(v, true);
  }
}

#[cfg(test)]
mod tests {
  use std::collections::BTreeSet;

  use itertools::Itertools;

  use super::*;

  fn front_door() -> Admg {
    Admg::new(
      ["X1", "X2", "X3", "X4"],
      [("X1", "X2"), ("X2", "X3"), ("X1", "X4"), ("X4", "X3")],
      [("X1", "X3")],
    )
    .unwrap()
  }

  fn orders(graph: &Admg, vertices: &[&str]) -> Vec<Vec<String>> {
    fixing_orders(graph, vertices)
      .unwrap()
      .into_iter()
      .map(|seq| seq.iter().map(ToString::to_string).collect())
      .collect()
  }

  #[test]
  fn empty_set_has_one_empty_order() {
    let g = front_door();
    let empty: [&str; 0] = [];
    let result = fixing_orders(&g, empty).unwrap();
    assert!(result.is_fixable());
    assert_eq!(result.sequences(), &[Vec::<Vertex>::new()]);
  }

  #[test]
  fn already_fixed_vertices_are_skipped() {
    let mut g = front_door();
    g.fix(["X2"]).unwrap();
    assert_eq!(orders(&g, &["X2"]), vec![Vec::<String>::new()]);
    assert_eq!(orders(&g, &["X2", "X4"]), vec![vec!["X4"]]);
  }

  #[test]
  fn all_orders_are_reported() {
    let g = front_door();
    // X1 can only go once both of its children are fixed
    assert_eq!(
      orders(&g, &["X1", "X2", "X4"]),
      vec![vec!["X2", "X4", "X1"], vec!["X4", "X2", "X1"]]
    );
    // X1 needs X3 out of its district first; X4 can go anywhere
    assert_eq!(
      orders(&g, &["X1", "X3", "X4"]),
      vec![
        vec!["X3", "X1", "X4"],
        vec!["X3", "X4", "X1"],
        vec!["X4", "X3", "X1"],
      ]
    );
  }

  #[test]
  fn unfixable_sets_yield_no_orders() {
    // X1 <-> X2 with X1 -> X2: X1 never leaves X2's district
    let g = Admg::new(["X1", "X2"], [("X1", "X2")], [("X1", "X2")]).unwrap();
    let result = fixing_orders(&g, ["X1"]).unwrap();
    assert!(!result.is_fixable());
    assert_eq!(result.into_parts(), (false, vec![]));
  }

  #[test]
  fn every_order_is_a_permutation_of_the_set() {
    let g = Admg::new(
      ["X1", "X2", "X3", "X4", "X5"],
      [("X1", "X2"), ("X2", "X3"), ("X3", "X4"), ("X1", "X5")],
      [("X1", "X3"), ("X2", "X5")],
    )
    .unwrap();
    let all: Vec<&str> = vec!["X1", "X2", "X3", "X4", "X5"];
    for size in 0..=all.len() {
      for subset in all.iter().copied().combinations(size) {
        let expected: BTreeSet<&str> = subset.iter().copied().collect();
        for order in orders(&g, &subset) {
          assert_eq!(order.len(), subset.len());
          let seen: BTreeSet<&str> = order.iter().map(String::as_str).collect();
          assert_eq!(seen, expected);
        }
      }
    }
  }

  #[test]
  fn unknown_vertices_are_errors() {
    let g = front_door();
    assert_eq!(
      fixing_orders(&g, ["X9"]).unwrap_err(),
      GraphError::UnknownVertex("X9".into())
    );
  }
}
