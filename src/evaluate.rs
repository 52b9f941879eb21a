//! Scoring predicted identification formulas against ground truth.
//!
//! Both lists are canonicalized into sets of [`CanonicalKey`]s, so repeated
//! or merely rewritten formulas count once, and the metrics compare the two
//! sets. Canonicalization runs on a dedicated `rayon` pool when there is
//! enough work for it.

use std::{num::NonZeroUsize, thread::available_parallelism, time::Instant};

use log::{debug, info};
use rayon::{ThreadPoolBuildError, ThreadPoolBuilder, prelude::*};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
  admg::{Admg, Vertex},
  canon::{CanonicalKey, canonicalize},
  factorization::Factorization,
  identify::{Identification, IdentifyError},
  kernel::{KernelBuilder, KernelConfig, KernelError},
  symbolic::{Expr, ParseExprError},
};

/// An error during evaluation. Any error aborts the whole evaluation.
#[derive(Debug, Error)]
pub enum EvalError {
  /// The worker pool could not be created.
  #[error("could not start {workers} workers")]
  Pool {
    /// The requested number of workers
    workers: usize,
    /// Why the pool could not be built
    #[source]
    source: ThreadPoolBuildError,
  },
  /// A worker could not process one of the expressions.
  #[error("worker failed on expression {index}")]
  WorkerFailure {
    /// The position of the expression in its list
    index: usize,
    /// The parse error
    #[source]
    source: ParseExprError,
  },
  /// A query could not be identified on one of the graphs.
  #[error(transparent)]
  Identify(#[from] IdentifyError),
  /// A factorization could not be turned into an expression.
  #[error(transparent)]
  Kernel(#[from] KernelError),
}

/// How evaluation is parallelized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
  /// The number of workers. `None` uses every available hardware thread,
  /// and `Some(1)` evaluates sequentially.
  pub workers: Option<usize>,
  /// Evaluation only runs in parallel if there are at least this many
  /// expressions per worker.
  pub min_items_per_worker: usize,
}

impl Default for EvalConfig {
  fn default() -> Self {
    Self {
      workers: None,
      min_items_per_worker: 5,
    }
  }
}

impl EvalConfig {
  /// A configuration with a fixed number of workers.
  #[must_use]
  pub fn with_workers(workers: usize) -> Self {
    Self {
      workers: Some(workers),
      ..Self::default()
    }
  }

  /// The number of workers this configuration asks for, at least one.
  #[must_use]
  pub fn worker_count(&self) -> usize {
    match self.workers {
      Some(workers) => workers.max(1),
      None => available_parallelism().map_or(1, NonZeroUsize::get),
    }
  }

  fn runs_in_parallel(&self, total: usize) -> bool {
    let workers = self.worker_count();
    workers > 1 && total >= self.min_items_per_worker.saturating_mul(workers)
  }
}

/// How well a set of predicted formulas matches the ground truth.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
  /// The fraction of predicted formulas that are in the ground truth, or
  /// `1.0` if nothing was predicted.
  pub predicted_correct: f64,
  /// `1 - predicted_correct`
  pub predicted_incorrect: f64,
  /// The fraction of ground-truth formulas that were predicted, or `1.0` if
  /// the ground truth is empty.
  pub ground_truth_covered: f64,
  /// `1 - ground_truth_covered`
  pub ground_truth_missing: f64,
  /// The number of distinct predicted formulas
  pub canonical_predicted: usize,
  /// The number of distinct ground-truth formulas
  pub canonical_ground_truth: usize,
  /// The number of formulas in both sets
  pub overlap: usize,
}

impl Metrics {
  /// Compares two sets of canonical keys.
  #[must_use]
  #[allow(clippy::cast_precision_loss)]
  pub fn from_keys(
    ground_truth: &FxHashSet<CanonicalKey>,
    predicted: &FxHashSet<CanonicalKey>,
  ) -> Self {
    let overlap = predicted.intersection(ground_truth).count();
    let rate = |total: usize| {
      if total == 0 { 1.0 } else { overlap as f64 / total as f64 }
    };
    let predicted_correct = rate(predicted.len());
    let ground_truth_covered = rate(ground_truth.len());
    Self {
      predicted_correct,
      predicted_incorrect: 1.0 - predicted_correct,
      ground_truth_covered,
      ground_truth_missing: 1.0 - ground_truth_covered,
      canonical_predicted: predicted.len(),
      canonical_ground_truth: ground_truth.len(),
      overlap,
    }
  }

  /// The metrics of a query identified on neither graph.
  #[must_use]
  pub fn perfect() -> Self {
    Self::from_keys(&FxHashSet::default(), &FxHashSet::default())
  }

  /// The metrics of a query identified on exactly one of the graphs.
  #[must_use]
  pub fn mismatch() -> Self {
    Self {
      predicted_correct: 0.0,
      predicted_incorrect: 1.0,
      ground_truth_covered: 0.0,
      ground_truth_missing: 1.0,
      ..Self::perfect()
    }
  }
}

/// Canonicalizes and compares lists of expressions.
#[derive(Debug, Clone, Copy, Default)]
pub struct Evaluator {
  config: EvalConfig,
}

impl Evaluator {
  /// Creates an evaluator.
  #[must_use]
  pub fn new(config: EvalConfig) -> Self {
    Self { config }
  }

  /// The configuration of this evaluator.
  #[must_use]
  pub fn config(&self) -> EvalConfig {
    self.config
  }

  /// Scores `predicted` against `ground_truth`.
  ///
  /// # Errors
  ///
  /// Returns an error if the worker pool cannot be created.
  pub fn score(&self, ground_truth: &[Expr], predicted: &[Expr]) -> Result<Metrics, EvalError> {
    let (ground_truth, predicted) =
      self.canonical_keys(ground_truth, predicted, |_, e| Ok(canonicalize(e)))?;
    Ok(Metrics::from_keys(&ground_truth, &predicted))
  }

  /// Scores expressions given in their text form. The text is parsed by the
  /// workers.
  ///
  /// # Errors
  ///
  /// Returns [`EvalError::WorkerFailure`] if an expression cannot be parsed,
  /// or an error if the worker pool cannot be created.
  pub fn score_texts<S>(&self, ground_truth: &[S], predicted: &[S]) -> Result<Metrics, EvalError>
  where
    S: AsRef<str> + Sync,
  {
    let (ground_truth, predicted) = self.canonical_keys(ground_truth, predicted, |index, text| {
      text
        .as_ref()
        .parse::<Expr>()
        .map(|e| canonicalize(&e))
        .map_err(|source| EvalError::WorkerFailure { index, source })
    })?;
    Ok(Metrics::from_keys(&ground_truth, &predicted))
  }

  fn canonical_keys<T, F>(
    &self,
    ground_truth: &[T],
    predicted: &[T],
    canon: F,
  ) -> Result<(FxHashSet<CanonicalKey>, FxHashSet<CanonicalKey>), EvalError>
  where
    T: Sync,
    F: Fn(usize, &T) -> Result<CanonicalKey, EvalError> + Sync,
  {
    let start = Instant::now();
    let total = ground_truth.len() + predicted.len();
    let keys = if self.config.runs_in_parallel(total) {
      let workers = self.config.worker_count();
      let pool = ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|source| EvalError::Pool { workers, source })?;
      debug!("canonicalizing {total} expressions on {workers} workers");
      pool.install(|| -> Result<_, EvalError> {
        let collect = |items: &[T]| {
          items
            .par_iter()
            .enumerate()
            .map(|(i, item)| canon(i, item))
            .collect::<Result<FxHashSet<_>, _>>()
        };
        Ok((collect(ground_truth)?, collect(predicted)?))
      })?
    } else {
      let collect = |items: &[T]| {
        items
          .iter()
          .enumerate()
          .map(|(i, item)| canon(i, item))
          .collect::<Result<FxHashSet<_>, _>>()
      };
      (collect(ground_truth)?, collect(predicted)?)
    };
    info!("canonicalized {total} expressions in {:?}", start.elapsed());
    Ok(keys)
  }
}

/// Scores `predicted` against `ground_truth` with the default
/// configuration and the given number of workers.
///
/// # Errors
///
/// Returns an error if the worker pool cannot be created.
pub fn evaluate_prediction_lists(
  ground_truth: &[Expr],
  predicted: &[Expr],
  workers: Option<usize>,
) -> Result<Metrics, EvalError> {
  let config = EvalConfig {
    workers,
    ..EvalConfig::default()
  };
  Evaluator::new(config).score(ground_truth, predicted)
}

/// The result of asking the same query on a ground-truth and a predicted
/// graph.
#[derive(Debug, Clone, Serialize)]
pub struct Comparison {
  /// The factorizations on the ground-truth graph, `None` if the effect is
  /// not identified there
  pub ground_truth: Option<Vec<Factorization>>,
  /// The factorizations on the predicted graph, `None` if the effect is not
  /// identified there
  pub predicted: Option<Vec<Factorization>>,
  /// How well the predicted formulas match
  pub metrics: Metrics,
}

/// Identifies the effect of `treatments` on `outcomes` on both graphs and
/// compares the resulting formulas. A query identified on neither graph
/// scores [`Metrics::perfect`], one identified on exactly one graph scores
/// [`Metrics::mismatch`].
///
/// # Errors
///
/// Returns an error if the query names vertices a graph does not have, or if
/// evaluation fails.
pub fn compare_queries(
  ground_truth: &Admg,
  predicted: &Admg,
  treatments: &[Vertex],
  outcomes: &[Vertex],
  kernel: &KernelConfig,
  eval: EvalConfig,
) -> Result<Comparison, EvalError> {
  let factorizations = |graph: &Admg| -> Result<Option<Vec<Factorization>>, EvalError> {
    let id =
      Identification::from_query(graph, treatments.iter().cloned(), outcomes.iter().cloned())?;
    if id.is_identified() {
      Ok(Some(id.factorizations()?))
    } else {
      Ok(None)
    }
  };
  let expressions = |graph: &Admg, factorizations: &[Factorization]| {
    let builder = KernelBuilder::with_config(graph, kernel.clone());
    factorizations
      .iter()
      .map(|f| builder.build(f))
      .collect::<Result<Vec<_>, _>>()
  };

  let gt = factorizations(ground_truth)?;
  let pred = factorizations(predicted)?;
  let metrics = match (&gt, &pred) {
    (None, None) => Metrics::perfect(),
    (Some(_), None) | (None, Some(_)) => Metrics::mismatch(),
    (Some(gt), Some(pred)) => Evaluator::new(eval).score(
      &expressions(ground_truth, gt)?,
      &expressions(predicted, pred)?,
    )?,
  };
  Ok(Comparison {
    ground_truth: gt,
    predicted: pred,
    metrics,
  })
}
