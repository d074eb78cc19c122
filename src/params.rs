//! LWE parameter records and table-driven selection.
//!
//! The catalogue is a build-time CSV resource listing, per (log n,
//! log m, log q) triple, the error width sigma and the largest safe
//! plaintext modulus for each scheme. Selection scans for the first row
//! whose sample budget covers the requested number of LWE samples.

use std::fmt;
use std::fs;
use std::io::BufReader;

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

use crate::errors::{ErrorInvalidParams, ResultBoxedError};

lazy_static! {
  static ref CATALOGUE: Vec<CatalogueRow> =
    parse_catalogue(include_str!("params.csv"));
}

struct CatalogueRow {
  logn: usize,
  logm: usize,
  logq: usize,
  sigma: f64,
  p_simple: u64,
  p_double: u64,
}

fn parse_catalogue(raw: &str) -> Vec<CatalogueRow> {
  raw
    .lines()
    .skip(1)
    .filter(|line| !line.trim().is_empty())
    .map(|line| {
      let cols: Vec<&str> = line.split(',').collect();
      // The fifth column is carried in the resource but not consumed.
      CatalogueRow {
        logn: cols[0].trim().parse().expect("malformed catalogue: logn"),
        logm: cols[1].trim().parse().expect("malformed catalogue: logm"),
        logq: cols[2].trim().parse().expect("malformed catalogue: logq"),
        sigma: cols[3].trim().parse().expect("malformed catalogue: sigma"),
        p_simple: cols[5].trim().parse().expect("malformed catalogue: p"),
        p_double: cols[6].trim().parse().expect("malformed catalogue: p"),
      }
    })
    .collect()
}

/// LWE and database-shape parameters for one PIR instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Params {
  n: usize,
  sigma: f64,
  l: usize,
  m: usize,
  logq: usize,
  p: u64,
}

impl Params {
  /// Looks up sigma and the plaintext modulus for `(n, logq)` and a
  /// sample budget, then assembles the full record with database
  /// dimensions `(l, m)`.
  pub fn pick(
    n: usize,
    logq: usize,
    l: usize,
    m: usize,
    doublepir: bool,
    samples: &[usize],
  ) -> ResultBoxedError<Self> {
    if n == 0 || logq == 0 {
      return Err(Box::new(ErrorInvalidParams::new(
        "n and logq must be specified",
      )));
    }
    let num_samples = samples.iter().copied().max().unwrap_or(0);
    for row in CATALOGUE.iter() {
      if n == 1 << row.logn
        && num_samples <= 1 << row.logm
        && logq == row.logq
      {
        let p = if doublepir { row.p_double } else { row.p_simple };
        if row.sigma == 0.0 || p == 0 {
          return Err(Box::new(ErrorInvalidParams::new("Params invalid")));
        }
        return Ok(Self {
          n,
          sigma: row.sigma,
          l,
          m,
          logq,
          p,
        });
      }
    }
    Err(Box::new(ErrorInvalidParams::new(&format!(
      "no suitable LWE parameters known for n={}, {}-by-{}, logq={}",
      n, l, m, logq
    ))))
  }

  pub fn n(&self) -> usize {
    self.n
  }

  pub fn sigma(&self) -> f64 {
    self.sigma
  }

  pub fn l(&self) -> usize {
    self.l
  }

  pub fn m(&self) -> usize {
    self.m
  }

  pub fn logq(&self) -> usize {
    self.logq
  }

  pub fn p(&self) -> u64 {
    self.p
  }

  /// The ciphertext modulus q = 2^logq.
  pub fn q(&self) -> u64 {
    1u64 << self.logq
  }

  /// The plaintext-to-ciphertext scaling factor Delta = 2^logq / p.
  pub fn delta(&self) -> u64 {
    self.q() / self.p
  }

  /// Number of base-p digits needed to represent an element of Z_q.
  pub fn expansion(&self) -> usize {
    crate::utils::codec::num_entries_base_p(self.p, self.logq)
  }

  /// Nearest-integer rounding from ciphertext space back to Z_p.
  pub fn round(&self, x: u64) -> u64 {
    let delta = self.delta();
    ((x + delta / 2) / delta) % self.p
  }

  /// Writes the record as JSON.
  pub fn write_to_file(&self, path: &str) -> ResultBoxedError<()> {
    Ok(serde_json::to_writer(&fs::File::create(path)?, self)?)
  }

  /// Loads a record previously written with `write_to_file`.
  pub fn load(path: &str) -> ResultBoxedError<Self> {
    let reader = BufReader::new(fs::File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
  }
}

impl fmt::Display for Params {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(
      f,
      "n={}; db size=2^{} (l={}, m={}); logq={}; p={}; sigma={}",
      self.n,
      ((self.l * self.m) as f64).log2().round() as usize,
      self.l,
      self.m,
      self.logq,
      self.p,
      self.sigma
    )
  }
}
