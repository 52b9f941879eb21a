//! Graph pairs read from TOML files, and the built-in demo pair.
//!
//! ```toml
//! [ground_truth]
//! vertices = ["X1", "X2", "X3"]
//! directed = [["X1", "X2"], ["X2", "X3"]]
//! bidirected = [["X1", "X3"]]
//!
//! [predicted]
//! vertices = ["X1", "X2", "X3"]
//! directed = [["X1", "X2"], ["X1", "X3"]]
//! ```

use std::{fs, path::Path};

use anyhow::Context;
use fixid::{Admg, GraphError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct GraphSpec {
  pub(crate) vertices: Vec<String>,
  #[serde(default)]
  pub(crate) directed: Vec<(String, String)>,
  #[serde(default)]
  pub(crate) bidirected: Vec<(String, String)>,
}

impl GraphSpec {
  fn new(vertices: &[&str], directed: &[(&str, &str)], bidirected: &[(&str, &str)]) -> Self {
    let owned = |edges: &[(&str, &str)]| {
      edges
        .iter()
        .map(|(a, b)| ((*a).to_owned(), (*b).to_owned()))
        .collect()
    };
    Self {
      vertices: vertices.iter().map(|v| (*v).to_owned()).collect(),
      directed: owned(directed),
      bidirected: owned(bidirected),
    }
  }

  pub(crate) fn build(&self) -> Result<Admg, GraphError> {
    Admg::new(
      self.vertices.iter().map(String::as_str),
      self.directed.iter().map(|(a, b)| (a.as_str(), b.as_str())),
      self.bidirected.iter().map(|(a, b)| (a.as_str(), b.as_str())),
    )
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct GraphPair {
  pub(crate) ground_truth: GraphSpec,
  pub(crate) predicted: GraphSpec,
}

impl GraphPair {
  pub(crate) fn load(path: &Path) -> anyhow::Result<Self> {
    let text = fs::read_to_string(path)
      .with_context(|| format!("could not read {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("could not parse {}", path.display()))
  }

  /// The front-door graph against a variant where `X4` confounds `X2`
  /// instead of mediating `X1`.
  pub(crate) fn demo(vertices: &[&str]) -> Self {
    Self {
      ground_truth: GraphSpec::new(
        vertices,
        &[("X1", "X2"), ("X2", "X3"), ("X1", "X4"), ("X4", "X3")],
        &[("X1", "X3")],
      ),
      predicted: GraphSpec::new(
        vertices,
        &[("X1", "X2"), ("X2", "X3"), ("X4", "X3"), ("X4", "X2")],
        &[("X1", "X3")],
      ),
    }
  }

  pub(crate) fn build(&self) -> anyhow::Result<(Admg, Admg)> {
    let ground_truth = self.ground_truth.build().context("invalid ground truth graph")?;
    let predicted = self.predicted.build().context("invalid predicted graph")?;
    Ok((ground_truth, predicted))
  }
}
