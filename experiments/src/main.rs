//! Compares the identification formulas of a ground-truth and a predicted
//! graph, for one treatment/outcome pair or for every pair of vertices.

#![warn(
  clippy::all,
  clippy::pedantic,
  anonymous_parameters,
  elided_lifetimes_in_paths,
  missing_copy_implementations,
  unreachable_pub,
  unused_lifetimes
)]

use std::{
  fs::File,
  path::{Path, PathBuf},
  time::Instant,
};

use anyhow::Context;
use clap::{Parser, Subcommand};
use fixid::{
  Admg, EvalConfig, Identification, KernelConfig, Metrics, Vertex, compare_queries,
};
use itertools::Itertools;
use log::info;
use serde::Serialize;

mod graphs;

use graphs::GraphPair;

#[derive(Parser)]
#[clap(name = "fixid", about = "Compare identification formulas of two ADMGs")]
struct Opts {
  /// Number of workers used to canonicalize formulas. Defaults to every
  /// hardware thread; 1 disables parallelism.
  #[clap(short, long, global = true)]
  workers: Option<usize>,

  /// A TOML file with `[ground_truth]` and `[predicted]` graphs. The
  /// built-in demo pair is used otherwise.
  #[clap(long, global = true)]
  graphs: Option<PathBuf>,

  /// Integrate continuous variables out instead of summing.
  #[clap(long, global = true)]
  continuous: bool,

  /// Print results as JSON.
  #[clap(long, global = true)]
  json: bool,

  #[clap(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Compare the formulas for one treatment/outcome query.
  Pair {
    /// A treatment vertex; repeat for several.
    #[clap(short, long, default_value = "X1")]
    treatment: Vec<String>,
    /// An outcome vertex; repeat for several.
    #[clap(short, long, default_value = "X3")]
    outcome: Vec<String>,
  },
  /// Compare the formulas for every ordered pair of distinct vertices.
  AllPairs {
    /// Write one row per pair to this CSV file.
    #[clap(long)]
    csv: Option<PathBuf>,
  },
}

#[derive(Debug, Clone, Serialize)]
struct PairRow {
  treatment: String,
  outcome: String,
  #[serde(flatten)]
  metrics: Metrics,
}

#[derive(Debug, Clone, Copy, Serialize)]
struct Averages {
  predicted_correct: f64,
  predicted_incorrect: f64,
  ground_truth_covered: f64,
  ground_truth_missing: f64,
}

impl Averages {
  #[allow(clippy::cast_precision_loss)]
  fn of(rows: &[PairRow]) -> Self {
    let mean = |field: fn(&Metrics) -> f64| {
      if rows.is_empty() {
        f64::NAN
      } else {
        rows.iter().map(|r| field(&r.metrics)).sum::<f64>() / rows.len() as f64
      }
    };
    Self {
      predicted_correct: mean(|m| m.predicted_correct),
      predicted_incorrect: mean(|m| m.predicted_incorrect),
      ground_truth_covered: mean(|m| m.ground_truth_covered),
      ground_truth_missing: mean(|m| m.ground_truth_missing),
    }
  }
}

#[derive(Serialize)]
struct Summary<'a> {
  pairs: &'a [PairRow],
  averages: Averages,
}

fn main() -> anyhow::Result<()> {
  env_logger::init();
  let opts = Opts::parse();

  let kernel = KernelConfig {
    discrete: !opts.continuous,
    ..KernelConfig::default()
  };
  let eval = EvalConfig {
    workers: opts.workers,
    ..EvalConfig::default()
  };

  match &opts.command {
    Command::Pair { treatment, outcome } => {
      let pair = match &opts.graphs {
        Some(path) => GraphPair::load(path)?,
        None => GraphPair::demo(&["X1", "X2", "X3", "X4"]),
      };
      let (ground_truth, predicted) = pair.build()?;
      let treatments: Vec<Vertex> =
        treatment.iter().map(|t| Vertex::from(t.as_str())).collect();
      let outcomes: Vec<Vertex> = outcome.iter().map(|o| Vertex::from(o.as_str())).collect();
      run_pair(&opts, &ground_truth, &predicted, &treatments, &outcomes, &kernel, eval)
    }
    Command::AllPairs { csv } => {
      let pair = match &opts.graphs {
        Some(path) => GraphPair::load(path)?,
        None => GraphPair::demo(&["X1", "X2", "X3", "X4", "X5"]),
      };
      let (ground_truth, predicted) = pair.build()?;
      run_all_pairs(&opts, &ground_truth, &predicted, csv.as_deref(), &kernel, eval)
    }
  }
}

fn print_identification(
  label: &str,
  graph: &Admg,
  treatments: &[Vertex],
  outcomes: &[Vertex],
) -> anyhow::Result<()> {
  let id =
    Identification::from_query(graph, treatments.iter().cloned(), outcomes.iter().cloned())?;
  println!("== {label} ==");
  for (district, orders) in id.all_fixing_orders() {
    println!(
      "{{{}}}: {}",
      district.iter().join(", "),
      orders.sequences().iter().map(|o| format!("[{}]", o.iter().join(", "))).join(" ")
    );
  }
  if id.is_identified() {
    let functional = id.functional()?;
    for f in &functional {
      println!("{f}");
    }
    println!("Number of solutions found: {}", functional.len());
  } else {
    println!("not identified");
  }
  Ok(())
}

fn run_pair(
  opts: &Opts,
  ground_truth: &Admg,
  predicted: &Admg,
  treatments: &[Vertex],
  outcomes: &[Vertex],
  kernel: &KernelConfig,
  eval: EvalConfig,
) -> anyhow::Result<()> {
  let comparison = compare_queries(ground_truth, predicted, treatments, outcomes, kernel, eval)?;
  if opts.json {
    println!("{}", serde_json::to_string_pretty(&comparison)?);
    return Ok(());
  }
  print_identification("ground truth", ground_truth, treatments, outcomes)?;
  print_identification("predicted", predicted, treatments, outcomes)?;
  println!("{:#?}", comparison.metrics);
  Ok(())
}

#[allow(clippy::cast_precision_loss)]
fn run_all_pairs(
  opts: &Opts,
  ground_truth: &Admg,
  predicted: &Admg,
  csv_path: Option<&Path>,
  kernel: &KernelConfig,
  eval: EvalConfig,
) -> anyhow::Result<()> {
  let start = Instant::now();
  let vertices: Vec<Vertex> = ground_truth.vertices().cloned().collect();
  let mut rows = Vec::new();
  for (treatment, outcome) in vertices
    .iter()
    .cartesian_product(&vertices)
    .filter(|(t, o)| t != o)
  {
    let comparison = compare_queries(
      ground_truth,
      predicted,
      std::slice::from_ref(treatment),
      std::slice::from_ref(outcome),
      kernel,
      eval,
    )
    .with_context(|| format!("comparing {treatment} -> {outcome}"))?;
    info!("{treatment} -> {outcome}: {:?}", comparison.metrics);
    rows.push(PairRow {
      treatment: treatment.to_string(),
      outcome: outcome.to_string(),
      metrics: comparison.metrics,
    });
  }
  let averages = Averages::of(&rows);

  if let Some(path) = csv_path {
    let mut writer = csv::Writer::from_writer(
      File::create(path).with_context(|| format!("could not create {}", path.display()))?,
    );
    for row in &rows {
      writer.serialize(CsvRow::from(row))?;
    }
    writer.flush()?;
  }

  if opts.json {
    println!(
      "{}",
      serde_json::to_string_pretty(&Summary {
        pairs: &rows,
        averages,
      })?
    );
  } else {
    let column = |field: fn(&Metrics) -> f64| {
      format!("[{}]", rows.iter().map(|r| field(&r.metrics)).join(", "))
    };
    println!("predicted_correct :   {}", column(|m| m.predicted_correct));
    println!("predicted_incorrect:  {}", column(|m| m.predicted_incorrect));
    println!("ground_truth_covered: {}", column(|m| m.ground_truth_covered));
    println!("ground_truth_missing: {}", column(|m| m.ground_truth_missing));

    println!("\n=== Averages across all pairs ===");
    println!("predicted_correct   : {:.3}", averages.predicted_correct);
    println!("predicted_incorrect : {:.3}", averages.predicted_incorrect);
    println!("ground_truth_covered: {:.3}", averages.ground_truth_covered);
    println!("ground_truth_missing: {:.3}", averages.ground_truth_missing);
  }

  println!("\nElapsed time: {:.2?}", start.elapsed());
  match memory_stats::memory_stats() {
    Some(usage) => println!(
      "Memory usage: physical={:.2} MB; virtual={:.2} MB",
      usage.physical_mem as f64 / 1e6,
      usage.virtual_mem as f64 / 1e6
    ),
    None => println!("Memory usage: unavailable"),
  }
  Ok(())
}

/// The csv crate cannot serialize flattened structs, so rows are written
/// with every column spelled out.
#[derive(Serialize)]
struct CsvRow<'a> {
  treatment: &'a str,
  outcome: &'a str,
  predicted_correct: f64,
  predicted_incorrect: f64,
  ground_truth_covered: f64,
  ground_truth_missing: f64,
  canonical_predicted: usize,
  canonical_ground_truth: usize,
  overlap: usize,
}

impl<'a> From<&'a PairRow> for CsvRow<'a> {
  fn from(row: &'a PairRow) -> Self {
    let m = &row.metrics;
    Self {
      treatment: &row.treatment,
      outcome: &row.outcome,
      predicted_correct: m.predicted_correct,
      predicted_incorrect: m.predicted_incorrect,
      ground_truth_covered: m.ground_truth_covered,
      ground_truth_missing: m.ground_truth_missing,
      canonical_predicted: m.canonical_predicted,
      canonical_ground_truth: m.canonical_ground_truth,
      overlap: m.overlap,
    }
  }
}
