//! Turning fixing orders into probability expressions.
//!
//! The kernel of a fixing order starts from the joint distribution over all
//! vertices and applies one fixing operation per vertex of the order. Fixing
//! a vertex with children divides the current kernel by the conditional of
//! the vertex given its non-descendants, and fixing a vertex without
//! children sums (or integrates) it out. Either way the vertex then loses its
//! incoming directed edges in the working graph.

use bitvec::prelude::*;
use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
  admg::{Admg, GraphError, Vertex},
  factorization::{Factorization, ParseFactorizationError},
  symbolic::{Expr, Factor, MarginalKind},
};

/// An error when building a kernel expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KernelError {
  /// The factorization text could not be parsed.
  #[error(transparent)]
  Parse(#[from] ParseFactorizationError),
  /// The factorization names a vertex the graph does not have.
  #[error(transparent)]
  Graph(#[from] GraphError),
  /// The factorization has no kernels, so there is nothing to compute.
  #[error("the factorization has no kernels")]
  NoKernels,
}

/// How kernels are built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
  /// Sum out discrete variables if `true`, integrate out continuous ones
  /// otherwise.
  pub discrete: bool,
  /// The variables of the starting joint distribution and the order in
  /// which they are marginalized. Defaults to a topological order of the
  /// graph.
  pub joint_order: Option<Vec<Vertex>>,
}

impl Default for KernelConfig {
  fn default() -> Self {
    Self {
      discrete: true,
      joint_order: None,
    }
  }
}

impl KernelConfig {
  /// The marginalization used for this configuration.
  #[must_use]
  pub fn kind(&self) -> MarginalKind {
    MarginalKind::for_discrete(self.discrete)
  }
}

/// Builds kernel expressions over one graph.
#[derive(Debug, Clone)]
pub struct KernelBuilder<'g> {
  graph: &'g Admg,
  config: KernelConfig,
}

impl<'g> KernelBuilder<'g> {
  /// Creates a builder with the default configuration.
  #[must_use]
  pub fn new(graph: &'g Admg) -> Self {
    Self::with_config(graph, KernelConfig::default())
  }

  /// Creates a builder with the given configuration.
  #[must_use]
  pub fn with_config(graph: &'g Admg, config: KernelConfig) -> Self {
    Self { graph, config }
  }

  /// The configuration of this builder.
  #[must_use]
  pub fn config(&self) -> &KernelConfig {
    &self.config
  }

  /// Builds the kernel obtained by fixing `order` one vertex at a time,
  /// starting from the joint distribution.
  ///
  /// # Errors
  ///
  /// Returns an error if `order` or the configured joint order names a
  /// vertex the graph does not have.
  pub fn kernel(&self, order: &[Vertex]) -> Result<Expr, KernelError> {
    let kind = self.config.kind();
    let order = self.graph.resolve(order)?;
    let mut active = match &self.config.joint_order {
      Some(joint) => self.graph.resolve(joint)?,
      None => self.graph.topological_indices()?,
    };
    let mut dag = DirectedPart::of(self.graph);
    let mut q =
      Expr::joint_sorted(active.iter().map(|&i| self.graph.vertex(i)));

    for v in order {
      if dag.has_children(v) {
        let descendants = dag.descendants(v);
        let marginalize = |keep_v: bool| {
          active
            .iter()
            .filter(|&&x| descendants[x] && !(keep_v && x == v))
            .fold(q.clone(), |e, &x| e.marginalize(self.graph.vertex(x), kind))
        };
        let numer = marginalize(true);
        let denom = marginalize(false);
        q = q.clone() / (numer / denom);
      } else {
        q = q.marginalize(self.graph.vertex(v), kind);
        active.retain(|&x| x != v);
      }
      dag.remove_in_edges(v);
    }
    Ok(q)
  }

  /// Builds the expression of a factorization: the product of its kernels
  /// with the hidden vertices marginalized out in order.
  ///
  /// # Errors
  ///
  /// Returns an error if the factorization has no kernels or names a vertex
  /// the graph does not have.
  pub fn build(&self, factorization: &Factorization) -> Result<Expr, KernelError> {
    if factorization.kernels.is_empty() {
      return Err(KernelError::NoKernels);
    }
    self.graph.resolve(&factorization.marginalized)?;

    let kernels = factorization
      .kernels
      .iter()
      .map(|order| self.kernel(order).map(|k| Factor::new(k, 1)))
      .collect::<Result<Vec<_>, _>>()?;
    let kind = self.config.kind();
    let expr = factorization
      .marginalized
      .iter()
      .fold(Expr::product(kernels), |e, v| e.marginalize(v, kind));
    debug!("built {factorization} into an expression of size {}", expr.size());
    Ok(expr)
  }

  /// Parses a factorization string and builds its expression.
  ///
  /// # Errors
  ///
  /// Returns an error if the text is not a valid factorization or names a
  /// vertex the graph does not have.
  pub fn build_from_str(&self, text: &str) -> Result<Expr, KernelError> {
    self.build(&text.parse()?)
  }
}

/// The directed edges of a graph, with incoming edges removed as vertices
/// get fixed.
struct DirectedPart {
  children: Vec<Vec<usize>>,
}

impl DirectedPart {
  fn of(graph: &Admg) -> Self {
    Self {
      children: (0..graph.len())
        .map(|v| graph.children_of(v).to_vec())
        .collect(),
    }
  }

  fn has_children(&self, v: usize) -> bool {
    !self.children[v].is_empty()
  }

  /// `v` and its descendants.
  fn descendants(&self, v: usize) -> BitVec {
    let mut seen = bitvec![0; self.children.len()];
    let mut stack = vec![v];
    seen.set(v, true);
    while let Some(u) = stack.pop() {
      for &c in &self.children[u] {
        if !seen[c] {
          seen.set(c, true);
          stack.push(c);
        }
      }
    }
    seen
  }

  fn remove_in_edges(&mut self, v: usize) {
    for children in &mut self.children {
      children.retain(|&c| c != v);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn chain() -> Admg {
    Admg::new(["X1", "X2"], [("X1", "X2")], Vec::<(&str, &str)>::new()).unwrap()
  }

  fn front_door() -> Admg {
    Admg::new(
      ["X1", "X2", "X3", "X4"],
      [("X1", "X2"), ("X2", "X3"), ("X1", "X4"), ("X4", "X3")],
      [("X1", "X3")],
    )
    .unwrap()
  }

  fn seq(vs: &[&str]) -> Vec<Vertex> {
    vs.iter().map(|v| Vertex::from(*v)).collect()
  }

  #[test]
  fn empty_order_is_the_joint() {
    let g = front_door();
    let q = KernelBuilder::new(&g).kernel(&[]).unwrap();
    assert_eq!(q.to_string(), "P(X1, X2, X3, X4)");
  }

  #[test]
  fn fixing_a_sink_sums_it_out() {
    let g = chain();
    let q = KernelBuilder::new(&g).kernel(&seq(&["X2"])).unwrap();
    assert_eq!(q.to_string(), "Sum(P(X1, X2), (X2, -oo, oo))");
  }

  #[test]
  fn continuous_kernels_integrate() {
    let g = chain();
    let config = KernelConfig {
      discrete: false,
      ..KernelConfig::default()
    };
    let q = KernelBuilder::with_config(&g, config)
      .kernel(&seq(&["X2"]))
      .unwrap();
    assert_eq!(q.to_string(), "Integral(P(X1, X2), (X2, -oo, oo))");
  }

  #[test]
  fn fixing_a_root_divides_by_its_marginal() {
    let g = chain();
    let q = KernelBuilder::new(&g).kernel(&seq(&["X1"])).unwrap();
    assert_eq!(
      q.to_string(),
      "Mul(P(X1, X2), Pow(Sum(P(X1, X2), (X2, -oo, oo)), -1), \
       Sum(Sum(P(X1, X2), (X1, -oo, oo)), (X2, -oo, oo)))"
    );
  }

  #[test]
  fn fixed_vertices_lose_their_incoming_edges() {
    // X3 goes first, so X2 has no children left when it is fixed
    let g = Admg::new(
      ["X1", "X2", "X3"],
      [("X1", "X2"), ("X2", "X3")],
      Vec::<(&str, &str)>::new(),
    )
    .unwrap();
    let q = KernelBuilder::new(&g).kernel(&seq(&["X3", "X2"])).unwrap();
    assert_eq!(
      q.to_string(),
      "Sum(Sum(P(X1, X2, X3), (X3, -oo, oo)), (X2, -oo, oo))"
    );
  }

  #[test]
  fn factorizations_multiply_kernels_then_marginalize() {
    let g = front_door();
    let builder = KernelBuilder::new(&g);
    let text = "ΣX2 ΦX2X1(p(V);G) ΦX3(p(V);G)";
    let from_text = builder.build_from_str(text).unwrap();
    let expected = (builder.kernel(&seq(&["X1", "X2"])).unwrap()
      * builder.kernel(&seq(&["X3"])).unwrap())
    .marginalize(&"X2".into(), MarginalKind::Sum);
    assert_eq!(from_text, expected);
    assert!(!from_text.has_free(&"X2".into()));
  }

  #[test]
  fn joint_order_can_be_overridden() {
    let g = chain();
    let config = KernelConfig {
      joint_order: Some(seq(&["X2"])),
      ..KernelConfig::default()
    };
    let q = KernelBuilder::with_config(&g, config).kernel(&[]).unwrap();
    assert_eq!(q.to_string(), "P(X2)");
  }

  #[test]
  fn bad_factorizations_are_errors() {
    let g = front_door();
    let builder = KernelBuilder::new(&g);
    assert!(matches!(
      builder.build_from_str("ΣX2"),
      Err(KernelError::Parse(ParseFactorizationError::MissingKernel(_)))
    ));
    assert_eq!(
      builder.build(&Factorization::default()),
      Err(KernelError::NoKernels)
    );
    assert_eq!(
      builder.build_from_str("ΦX9(p(V);G)"),
      Err(KernelError::Graph(GraphError::UnknownVertex("X9".into())))
    );
  }
}
