//! Acyclic directed mixed graphs (ADMGs) and the fixing operation.
//!
//! Vertices are interned in insertion order, and that order is the one every
//! query reports results in. Queries that take vertex names resolve them
//! through the graph and fail with [`GraphError::UnknownVertex`] for names the
//! graph does not contain.
//!
//! Fixing a vertex removes every directed edge into it and every bidirected
//! edge touching it. [`Admg::fix`] does this destructively, while a
//! [`FixedView`] records only the set of fixed vertices and hides the removed
//! edges, so the search for fixing orders can branch without copying the
//! graph.

use std::{
  borrow::Borrow,
  cmp::Reverse,
  collections::{BTreeSet, BinaryHeap},
  fmt::{self, Debug, Display, Formatter},
  ops::Deref,
};

use bitvec::prelude::*;
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use thiserror::Error;

/// The name of a vertex. Its [`Debug`] and [`Display`] implementations both
/// print the bare name (e.g. `X1`).
#[derive(
  Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Vertex(String);

impl Vertex {
  /// Creates a vertex name.
  #[must_use]
  pub fn new(name: impl Into<String>) -> Self {
    Self(name.into())
  }

  /// Returns the name as a string slice.
  #[must_use]
  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl Deref for Vertex {
  type Target = str;

  fn deref(&self) -> &Self::Target {
    &self.0
  }
}

impl Borrow<str> for Vertex {
  fn borrow(&self) -> &str {
    &self.0
  }
}

impl AsRef<str> for Vertex {
  fn as_ref(&self) -> &str {
    &self.0
  }
}

impl Debug for Vertex {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    <Self as Display>::fmt(self, f)
  }
}

impl Display for Vertex {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for Vertex {
  fn from(name: &str) -> Self {
    Self(name.to_owned())
  }
}

impl From<String> for Vertex {
  fn from(name: String) -> Self {
    Self(name)
  }
}

/// An error raised while building or querying an [`Admg`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
  /// The same vertex was listed twice.
  #[error("vertex {0} is listed more than once")]
  DuplicateVertex(Vertex),
  /// A name does not belong to the graph.
  #[error("{0} is not a vertex of the graph")]
  UnknownVertex(Vertex),
  /// An edge connects a vertex to itself.
  #[error("edge from {0} to itself")]
  SelfLoop(Vertex),
  /// The directed edges are not acyclic.
  #[error("the directed edges contain a cycle through {0}")]
  Cycle(Vertex),
}

type Neighbors = SmallVec<[usize; 4]>;

/// An acyclic directed mixed graph with an optional set of fixed vertices.
#[derive(Debug, Clone)]
pub struct Admg {
  vertices: IndexSet<Vertex>,
  children: Vec<Neighbors>,
  parents: Vec<Neighbors>,
  siblings: Vec<Neighbors>,
  fixed: BitVec,
}

impl Admg {
  /// Creates a graph from its vertices, directed edges `a -> b`, and
  /// bidirected edges `a <-> b`. Repeated edges are kept once.
  ///
  /// # Errors
  ///
  /// Returns an error if a vertex is repeated, an edge mentions a vertex that
  /// was not listed, an edge is a self-loop, or the directed edges contain a
  /// cycle.
  pub fn new<V, D, B, S>(
    vertices: V,
    directed: D,
    bidirected: B,
  ) -> Result<Self, GraphError>
  where
    V: IntoIterator,
    V::Item: Into<Vertex>,
    D: IntoIterator<Item = (S, S)>,
    B: IntoIterator<Item = (S, S)>,
    S: Into<Vertex>,
  {
    let mut interned = IndexSet::new();
    for vertex in vertices {
      let vertex = vertex.into();
      if interned.contains(&vertex) {
        return Err(GraphError::DuplicateVertex(vertex));
      }
      interned.insert(vertex);
    }
    let n = interned.len();
    let mut graph = Self {
      vertices: interned,
      children: vec![Neighbors::new(); n],
      parents: vec![Neighbors::new(); n],
      siblings: vec![Neighbors::new(); n],
      fixed: bitvec![0; n],
    };
    for (from, to) in directed {
      let (from, to) = graph.endpoints(from.into(), to.into())?;
      if !graph.children[from].contains(&to) {
        graph.children[from].push(to);
        graph.parents[to].push(from);
      }
    }
    for (a, b) in bidirected {
      let (a, b) = graph.endpoints(a.into(), b.into())?;
      if !graph.siblings[a].contains(&b) {
        graph.siblings[a].push(b);
        graph.siblings[b].push(a);
      }
    }
    graph.topological_indices()?;
    Ok(graph)
  }

  fn endpoints(
    &self,
    a: Vertex,
    b: Vertex,
  ) -> Result<(usize, usize), GraphError> {
    let (a, b) = (self.require(&a)?, self.require(&b)?);
    if a == b {
      return Err(GraphError::SelfLoop(self.vertex(a).clone()));
    }
    Ok((a, b))
  }

  /// Returns the number of vertices.
  #[must_use]
  pub fn len(&self) -> usize {
    self.vertices.len()
  }

  /// Returns `true` if the graph has no vertices.
  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.vertices.is_empty()
  }

  /// Returns the vertices in insertion order.
  pub fn vertices(&self) -> impl Iterator<Item = &Vertex> {
    self.vertices.iter()
  }

  /// Returns the vertex at index `index`.
  ///
  /// # Panics
  ///
  /// Panics if `index` is out of bounds.
  #[must_use]
  pub fn vertex(&self, index: usize) -> &Vertex {
    &self.vertices[index]
  }

  /// Returns the index of the vertex called `name`, if there is one.
  #[must_use]
  pub fn index_of(&self, name: &str) -> Option<usize> {
    self.vertices.get_index_of(name)
  }

  pub(crate) fn require(&self, name: &str) -> Result<usize, GraphError> {
    self
      .index_of(name)
      .ok_or_else(|| GraphError::UnknownVertex(name.into()))
  }

  pub(crate) fn resolve<I>(&self, names: I) -> Result<Vec<usize>, GraphError>
  where
    I: IntoIterator,
    I::Item: AsRef<str>,
  {
    names
      .into_iter()
      .map(|name| self.require(name.as_ref()))
      .collect()
  }

  pub(crate) fn names(&self, mask: &BitSlice) -> BTreeSet<Vertex> {
    mask.iter_ones().map(|i| self.vertex(i).clone()).collect()
  }

  pub(crate) fn children_of(&self, index: usize) -> &[usize] {
    &self.children[index]
  }

  fn directed_pairs(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
    self
      .children
      .iter()
      .enumerate()
      .flat_map(|(from, to)| to.iter().map(move |&to| (from, to)))
  }

  fn bidirected_pairs(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
    self.siblings.iter().enumerate().flat_map(|(a, bs)| {
      bs.iter().filter(move |&&b| a < b).map(move |&b| (a, b))
    })
  }

  /// Returns the directed edges as `(tail, head)` pairs.
  pub fn directed_edges(&self) -> impl Iterator<Item = (&Vertex, &Vertex)> {
    self
      .directed_pairs()
      .map(|(a, b)| (self.vertex(a), self.vertex(b)))
  }

  /// Returns each bidirected edge once, earlier vertex first.
  pub fn bidirected_edges(&self) -> impl Iterator<Item = (&Vertex, &Vertex)> {
    self
      .bidirected_pairs()
      .map(|(a, b)| (self.vertex(a), self.vertex(b)))
  }

  /// Returns the fixed vertices in insertion order.
  #[must_use]
  pub fn fixed(&self) -> Vec<Vertex> {
    self.fixed.iter_ones().map(|i| self.vertex(i).clone()).collect()
  }

  /// Returns `true` if the vertex at `index` is fixed.
  #[must_use]
  pub fn is_fixed(&self, index: usize) -> bool {
    self.fixed[index]
  }

  /// Returns a view of the graph in which further vertices can be fixed
  /// without modifying it.
  #[must_use]
  pub fn view(&self) -> FixedView<'_> {
    FixedView::new(self)
  }

  /// Returns the given vertices together with all of their descendants.
  ///
  /// # Errors
  ///
  /// Returns an error if a name is not a vertex of the graph.
  pub fn descendants<I>(&self, vertices: I) -> Result<BTreeSet<Vertex>, GraphError>
  where
    I: IntoIterator,
    I::Item: AsRef<str>,
  {
    let roots = self.resolve(vertices)?;
    Ok(self.names(&self.view().descendants(roots)))
  }

  /// Returns the given vertices together with all of their ancestors.
  ///
  /// # Errors
  ///
  /// Returns an error if a name is not a vertex of the graph.
  pub fn ancestors<I>(&self, vertices: I) -> Result<BTreeSet<Vertex>, GraphError>
  where
    I: IntoIterator,
    I::Item: AsRef<str>,
  {
    let roots = self.resolve(vertices)?;
    Ok(self.names(&self.view().ancestors(roots)))
  }

  /// Returns the district of `vertex`: the vertices reachable from it along
  /// bidirected edges, itself included.
  ///
  /// # Errors
  ///
  /// Returns an error if `vertex` is not a vertex of the graph.
  pub fn district(&self, vertex: &str) -> Result<BTreeSet<Vertex>, GraphError> {
    let index = self.require(vertex)?;
    Ok(self.names(&self.view().district(index)))
  }

  /// Partitions the unfixed vertices into districts, ordered by their first
  /// vertex.
  #[must_use]
  pub fn districts(&self) -> Vec<BTreeSet<Vertex>> {
    let view = self.view();
    let mut seen = self.fixed.clone();
    let mut districts = Vec::new();
    for v in 0..self.len() {
      if seen[v] {
        continue;
      }
      let district = view.district(v);
      for i in district.iter_ones() {
        seen.set(i, true);
      }
      districts.push(self.names(&district));
    }
    districts
  }

  /// Fixes `vertices`: removes the directed edges into each of them and the
  /// bidirected edges touching them, and marks them as fixed.
  ///
  /// # Errors
  ///
  /// Returns an error if a name is not a vertex of the graph. The graph is
  /// left unchanged in that case.
  pub fn fix<I>(&mut self, vertices: I) -> Result<(), GraphError>
  where
    I: IntoIterator,
    I::Item: AsRef<str>,
  {
    for v in self.resolve(vertices)? {
      for parent in std::mem::take(&mut self.parents[v]) {
        self.children[parent].retain(|child| *child != v);
      }
      for sibling in std::mem::take(&mut self.siblings[v]) {
        self.siblings[sibling].retain(|other| *other != v);
      }
      self.fixed.set(v, true);
    }
    Ok(())
  }

  /// Returns the subgraph induced by `vertices`, keeping the graph's vertex
  /// order and the fixed status of the kept vertices.
  ///
  /// # Errors
  ///
  /// Returns an error if a name is not a vertex of the graph.
  pub fn subgraph<I>(&self, vertices: I) -> Result<Self, GraphError>
  where
    I: IntoIterator,
    I::Item: AsRef<str>,
  {
    let mut keep = bitvec![0; self.len()];
    for v in self.resolve(vertices)? {
      keep.set(v, true);
    }
    let kept = |&(a, b): &(usize, usize)| keep[a] && keep[b];
    let edge = |(a, b): (usize, usize)| {
      (self.vertex(a).clone(), self.vertex(b).clone())
    };
    let mut graph = Self::new(
      keep.iter_ones().map(|i| self.vertex(i).clone()),
      self.directed_pairs().filter(kept).map(edge),
      self.bidirected_pairs().filter(kept).map(edge),
    )?;
    for (new, old) in keep.iter_ones().enumerate() {
      graph.fixed.set(new, self.fixed[old]);
    }
    Ok(graph)
  }

  /// Returns the vertices in a topological order of the directed edges,
  /// breaking ties by insertion order.
  #[must_use]
  pub fn topological_order(&self) -> Vec<Vertex> {
    self
      .topological_indices()
      .unwrap_or_default()
      .into_iter()
      .map(|i| self.vertex(i).clone())
      .collect()
  }

  pub(crate) fn topological_indices(&self) -> Result<Vec<usize>, GraphError> {
    let mut indegree: Vec<usize> =
      self.parents.iter().map(|parents| parents.len()).collect();
    let mut ready: BinaryHeap<Reverse<usize>> = indegree
      .iter()
      .enumerate()
      .filter(|(_, d)| **d == 0)
      .map(|(v, _)| Reverse(v))
      .collect();
    let mut order = Vec::with_capacity(self.len());
    while let Some(Reverse(v)) = ready.pop() {
      order.push(v);
      for &child in &self.children[v] {
        indegree[child] -= 1;
        if indegree[child] == 0 {
          ready.push(Reverse(child));
        }
      }
    }
    match indegree.iter().position(|d| *d > 0) {
      Some(v) => Err(GraphError::Cycle(self.vertex(v).clone())),
      None => Ok(order),
    }
  }
}

#[derive(Debug, Clone, Copy)]
enum Walk {
  Children,
  Parents,
  Siblings,
}

/// A graph together with a set of fixed vertices, sharing the edges of the
/// underlying [`Admg`].
///
/// Directed edges into a fixed vertex and bidirected edges touching one are
/// hidden, which is exactly what [`Admg::fix`] would have removed.
#[derive(Debug, Clone)]
pub struct FixedView<'g> {
  graph: &'g Admg,
  fixed: BitVec,
}

impl<'g> FixedView<'g> {
  /// Creates a view with the graph's own fixed vertices.
  #[must_use]
  pub fn new(graph: &'g Admg) -> Self {
    Self {
      graph,
      fixed: graph.fixed.clone(),
    }
  }

  /// Returns the underlying graph.
  #[must_use]
  pub fn graph(&self) -> &'g Admg {
    self.graph
  }

  /// Returns `true` if the vertex at `index` is fixed in this view.
  #[must_use]
  pub fn is_fixed(&self, index: usize) -> bool {
    self.fixed[index]
  }

  /// Fixes the vertex at `index` in this view.
  pub fn fix(&mut self, index: usize) {
    self.fixed.set(index, true);
  }

  /// Returns a copy of this view with the vertex at `index` fixed as well.
  #[must_use]
  pub fn with_fixed(&self, index: usize) -> Self {
    let mut next = self.clone();
    next.fix(index);
    next
  }

  fn neighbors(&self, v: usize, walk: Walk) -> Neighbors {
    let fixed = &self.fixed;
    match walk {
      Walk::Children => self.graph.children[v]
        .iter()
        .copied()
        .filter(|&c| !fixed[c])
        .collect(),
      Walk::Parents | Walk::Siblings if fixed[v] => Neighbors::new(),
      Walk::Parents => self.graph.parents[v].clone(),
      Walk::Siblings => self.graph.siblings[v]
        .iter()
        .copied()
        .filter(|&s| !fixed[s])
        .collect(),
    }
  }

  fn closure<I>(&self, roots: I, walk: Walk) -> BitVec
  where
    I: IntoIterator<Item = usize>,
  {
    let mut seen = bitvec![0; self.graph.len()];
    let mut stack: Vec<usize> = roots.into_iter().collect();
    while let Some(v) = stack.pop() {
      if seen[v] {
        continue;
      }
      seen.set(v, true);
      stack.extend(self.neighbors(v, walk).into_iter().filter(|&u| !seen[u]));
    }
    seen
  }

  /// Returns `roots` and their descendants as a vertex mask.
  #[must_use]
  pub fn descendants<I>(&self, roots: I) -> BitVec
  where
    I: IntoIterator<Item = usize>,
  {
    self.closure(roots, Walk::Children)
  }

  /// Returns `roots` and their ancestors as a vertex mask.
  #[must_use]
  pub fn ancestors<I>(&self, roots: I) -> BitVec
  where
    I: IntoIterator<Item = usize>,
  {
    self.closure(roots, Walk::Parents)
  }

  /// Returns the district of the vertex at `index` as a vertex mask.
  #[must_use]
  pub fn district(&self, index: usize) -> BitVec {
    self.closure([index], Walk::Siblings)
  }

  /// Returns `true` if the vertex at `index` can be fixed: no other vertex
  /// in its district is one of its descendants.
  #[must_use]
  pub fn is_fixable(&self, index: usize) -> bool {
    let descendants = self.descendants([index]);
    let district = self.district(index);
    descendants.iter_ones().filter(|&i| district[i]).count() == 1
  }
}
