//! Identification of causal effects by fixing.
//!
//! The effect of a set of treatments on a set of outcomes is identified when,
//! for every district of the graph restricted to `Y*` (the ancestors of the
//! outcomes once the treatments are fixed), all vertices outside that
//! district can be fixed in the full graph. Every combination of one fixing
//! order per district gives a factorization of the effect.
//!
//! [`OneLineId`] holds the projection onto `Y*`. [`Identification`] builds on
//! it and records every fixing order of every district.

use std::{
  collections::{BTreeMap, BTreeSet},
  ops::Deref,
};

use itertools::Itertools;
use log::{debug, info};
use thiserror::Error;

use crate::{
  admg::{Admg, GraphError, Vertex},
  factorization::Factorization,
  fixing::{fixing_orders, FixingOrders, FixingSequence},
};

/// A set of vertices connected by bidirected edges.
pub type District = BTreeSet<Vertex>;

/// An error when identifying a causal effect.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifyError {
  /// The vertices outside the given district cannot be fixed.
  #[error("not identified: the complement of district {0:?} cannot be fixed")]
  NotIdentified(District),
  /// The query names a vertex the graph does not have.
  #[error(transparent)]
  Graph(#[from] GraphError),
}

/// The projection of a treatment/outcome query onto `Y*`.
#[derive(Debug, Clone)]
pub struct OneLineId<'g> {
  graph: &'g Admg,
  treatments: BTreeSet<Vertex>,
  outcomes: BTreeSet<Vertex>,
  ystar: Vec<Vertex>,
  projected: Admg,
}

impl<'g> OneLineId<'g> {
  /// Projects the query onto the ancestors of `outcomes` in `graph` with
  /// `treatments` fixed.
  ///
  /// # Errors
  ///
  /// Returns an error if a treatment or outcome is not a vertex of `graph`.
  pub fn new<T, O>(graph: &'g Admg, treatments: T, outcomes: O) -> Result<Self, GraphError>
  where
    T: IntoIterator,
    T::Item: Into<Vertex>,
    O: IntoIterator,
    O::Item: Into<Vertex>,
  {
    let treatments: BTreeSet<Vertex> = treatments.into_iter().map(Into::into).collect();
    let outcomes: BTreeSet<Vertex> = outcomes.into_iter().map(Into::into).collect();

    let mut intervened = graph.clone();
    intervened.fix(&treatments)?;
    let ancestors = intervened.ancestors(&outcomes)?;
    let ystar: Vec<Vertex> = graph
      .vertices()
      .enumerate()
      .filter(|(i, v)| ancestors.contains(*v) && !intervened.is_fixed(*i))
      .map(|(_, v)| v.clone())
      .collect();
    let projected = graph.subgraph(&ystar)?;
    debug!("Y* = {ystar:?}");

    Ok(Self {
      graph,
      treatments,
      outcomes,
      ystar,
      projected,
    })
  }

  /// The graph the query is asked on.
  #[must_use]
  pub fn graph(&self) -> &'g Admg {
    self.graph
  }

  /// The treatments.
  #[must_use]
  pub fn treatments(&self) -> &BTreeSet<Vertex> {
    &self.treatments
  }

  /// The outcomes.
  #[must_use]
  pub fn outcomes(&self) -> &BTreeSet<Vertex> {
    &self.outcomes
  }

  /// `Y*`, in the graph's vertex order.
  #[must_use]
  pub fn ystar(&self) -> &[Vertex] {
    &self.ystar
  }

  /// The subgraph of the original graph induced by `Y*`.
  #[must_use]
  pub fn projected(&self) -> &Admg {
    &self.projected
  }

  /// The districts of the projected graph, sorted.
  #[must_use]
  pub fn districts(&self) -> Vec<District> {
    let mut districts = self.projected.districts();
    districts.sort();
    districts
  }

  /// The vertices of `Y*` that are not outcomes, in the graph's vertex
  /// order. These are marginalized out of the product of kernels.
  #[must_use]
  pub fn marginalized(&self) -> Vec<Vertex> {
    self
      .ystar
      .iter()
      .filter(|v| !self.outcomes.contains(*v))
      .cloned()
      .collect()
  }
}

/// The fixing orders found for a query.
#[derive(Debug, Clone)]
pub struct Identification<'g> {
  id: OneLineId<'g>,
  orders: BTreeMap<District, FixingOrders>,
  unfixable: Option<District>,
}

impl<'g> Deref for Identification<'g> {
  type Target = OneLineId<'g>;

  fn deref(&self) -> &Self::Target {
    &self.id
  }
}

impl<'g> Identification<'g> {
  /// Looks for fixing orders of the complement of every district of the
  /// projection. The search stops at the first district whose complement
  /// cannot be fixed.
  ///
  /// # Errors
  ///
  /// Returns an error if the projection refers to vertices the graph does
  /// not have, which cannot happen for a projection built from the same
  /// graph.
  pub fn identify(id: OneLineId<'g>) -> Result<Self, GraphError> {
    let graph = id.graph();
    let mut orders = BTreeMap::new();
    let mut unfixable = None;
    for district in id.districts() {
      let rest = graph.vertices().filter(|v| !district.contains(*v));
      let found = fixing_orders(graph, rest)?;
      debug!("district {district:?}: {} fixing order(s)", found.len());
      if !found.is_fixable() {
        unfixable = Some(district);
        break;
      }
      orders.insert(district, found);
    }
    info!(
      "query {:?} -> {:?}: {}",
      id.treatments(),
      id.outcomes(),
      if unfixable.is_none() { "identified" } else { "not identified" }
    );
    Ok(Self {
      id,
      orders,
      unfixable,
    })
  }

  /// Projects and identifies the effect of `treatments` on `outcomes`.
  ///
  /// # Errors
  ///
  /// Returns an error if a treatment or outcome is not a vertex of `graph`.
  pub fn from_query<T, O>(
    graph: &'g Admg,
    treatments: T,
    outcomes: O,
  ) -> Result<Self, IdentifyError>
  where
    T: IntoIterator,
    T::Item: Into<Vertex>,
    O: IntoIterator,
    O::Item: Into<Vertex>,
  {
    let id = OneLineId::new(graph, treatments, outcomes)?;
    Self::identify(id).map_err(IdentifyError::from)
  }

  /// Returns `true` if the complement of every district can be fixed.
  #[must_use]
  pub fn is_identified(&self) -> bool {
    self.unfixable.is_none()
  }

  /// The district whose complement cannot be fixed, if any.
  #[must_use]
  pub fn unfixable_district(&self) -> Option<&District> {
    self.unfixable.as_ref()
  }

  /// One fixing order per district: the first one found.
  #[must_use]
  pub fn witness_orders(&self) -> BTreeMap<&District, &FixingSequence> {
    self
      .orders
      .iter()
      .filter_map(|(district, orders)| Some((district, orders.first()?)))
      .collect()
  }

  /// Every fixing order of every district examined.
  #[must_use]
  pub fn all_fixing_orders(&self) -> &BTreeMap<District, FixingOrders> {
    &self.orders
  }

  fn require_identified(&self) -> Result<(), IdentifyError> {
    match &self.unfixable {
      Some(district) => Err(IdentifyError::NotIdentified(district.clone())),
      None => Ok(()),
    }
  }

  /// Every factorization of the effect: one for each way of picking a
  /// fixing order per district, districts in sorted order. A query without
  /// districts has no factorization.
  ///
  /// # Errors
  ///
  /// Returns [`IdentifyError::NotIdentified`] if the effect is not
  /// identified.
  pub fn factorizations(&self) -> Result<Vec<Factorization>, IdentifyError> {
    self.require_identified()?;
    if self.orders.is_empty() {
      return Ok(Vec::new());
    }
    let marginalized = self.marginalized();
    Ok(
      self
        .orders
        .values()
        .map(|orders| orders.sequences().iter())
        .multi_cartesian_product()
        .map(|combo| {
          Factorization::new(marginalized.clone(), combo.into_iter().cloned().collect())
        })
        .collect(),
    )
  }

  /// The factorizations in their text form.
  ///
  /// # Errors
  ///
  /// Returns [`IdentifyError::NotIdentified`] if the effect is not
  /// identified.
  pub fn functional(&self) -> Result<Vec<String>, IdentifyError> {
    Ok(
      self
        .factorizations()?
        .iter()
        .map(ToString::to_string)
        .collect(),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::kernel::KernelBuilder;

  fn scenario_one() -> Admg {
    Admg::new(
      ["X1", "X2", "X3", "X4"],
      [("X1", "X2"), ("X2", "X3"), ("X1", "X4"), ("X4", "X3")],
      [("X1", "X3")],
    )
    .unwrap()
  }

  fn scenario_two() -> Admg {
    Admg::new(
      ["X1", "X2", "X3", "X4"],
      [("X1", "X2"), ("X2", "X3"), ("X4", "X3"), ("X4", "X2")],
      [("X1", "X3")],
    )
    .unwrap()
  }

  fn names(vs: &[&str]) -> District {
    vs.iter().map(|v| Vertex::from(*v)).collect()
  }

  #[test]
  fn projection_keeps_unfixed_ancestors_of_the_outcomes() {
    let g = scenario_one();
    let id = OneLineId::new(&g, ["X1"], ["X3"]).unwrap();
    assert_eq!(
      id.ystar().to_vec(),
      names(&["X2", "X3", "X4"]).into_iter().collect::<Vec<_>>()
    );
    assert_eq!(id.marginalized(), vec![Vertex::from("X2"), Vertex::from("X4")]);
    assert_eq!(
      id.districts(),
      vec![names(&["X2"]), names(&["X3"]), names(&["X4"])]
    );
    assert_eq!(id.projected().bidirected_edges().count(), 0);
  }

  #[test]
  fn front_door_is_identified() {
    let g = scenario_one();
    let id = Identification::from_query(&g, ["X1"], ["X3"]).unwrap();
    assert!(id.is_identified());
    let lens: Vec<usize> = id.all_fixing_orders().values().map(FixingOrders::len).collect();
    assert_eq!(lens, vec![3, 2, 3]);

    let functional = id.functional().unwrap();
    assert_eq!(functional.len(), 18);
    assert_eq!(
      functional[0],
      "ΣX2X4 ΦX4X1X3(p(V);G) ΦX1X4X2(p(V);G) ΦX1X3X2(p(V);G)"
    );
    for f in &functional {
      assert!(f.starts_with("ΣX2X4 "), "{f}");
      assert_eq!(f.matches('Φ').count(), 3, "{f}");
      assert_eq!(f.parse::<Factorization>().unwrap().to_string(), *f);
    }
  }

  #[test]
  fn witnesses_are_the_first_orders() {
    let g = scenario_one();
    let id = Identification::from_query(&g, ["X1"], ["X3"]).unwrap();
    let witnesses = id.witness_orders();
    assert_eq!(
      witnesses[&names(&["X3"])],
      &vec![Vertex::from("X2"), "X4".into(), "X1".into()]
    );
    assert_eq!(witnesses.len(), 3);
  }

  #[test]
  fn second_scenario_has_more_orders() {
    let g = scenario_two();
    let id = Identification::from_query(&g, ["X1"], ["X3"]).unwrap();
    assert!(id.is_identified());
    assert_eq!(id.functional().unwrap().len(), 36);
  }

  #[test]
  fn bow_arc_is_not_identified() {
    let g = Admg::new(["X1", "X2"], [("X1", "X2")], [("X1", "X2")]).unwrap();
    let id = Identification::from_query(&g, ["X1"], ["X2"]).unwrap();
    assert!(!id.is_identified());
    assert_eq!(id.unfixable_district(), Some(&names(&["X2"])));
    assert_eq!(
      id.functional(),
      Err(IdentifyError::NotIdentified(names(&["X2"])))
    );
  }

  #[test]
  fn no_outcome_left_means_no_factorization() {
    let g = scenario_one();
    let id = Identification::from_query(&g, ["X3"], ["X3"]).unwrap();
    assert!(id.ystar().is_empty());
    assert!(id.is_identified());
    assert_eq!(id.functional().unwrap(), Vec::<String>::new());
  }

  #[test]
  fn no_treatment_fixes_nothing_in_the_district() {
    let g = Admg::new(["X1", "X2"], [("X1", "X2")], [("X1", "X2")]).unwrap();
    let id = Identification::from_query(&g, Vec::<Vertex>::new(), ["X2"]).unwrap();
    assert!(id.is_identified());
    let functional = id.functional().unwrap();
    assert_eq!(functional, vec!["ΣX1 Φ(p(V);G)".to_owned()]);

    let factorizations = id.factorizations().unwrap();
    assert_eq!(factorizations[0].kernels, vec![FixingSequence::new()]);
    assert_eq!(functional[0].parse::<Factorization>().unwrap(), factorizations[0]);
    assert_eq!(
      KernelBuilder::new(&g).build_from_str(&functional[0]).unwrap().to_string(),
      "Sum(P(X1, X2), (X1, -oo, oo))"
    );
  }

  #[test]
  fn unknown_vertices_are_errors() {
    let g = scenario_one();
    assert_eq!(
      Identification::from_query(&g, ["X1"], ["X7"]).unwrap_err(),
      IdentifyError::Graph(GraphError::UnknownVertex("X7".into()))
    );
  }
}
