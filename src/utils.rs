//! Utility modules for base-p digit manipulation and the small numeric
//! helpers shared by the benches.

/// Base-p decomposition and reconstruction of unsigned integers. Database
/// entries wider than one Z_p element and DoublePIR's ciphertext
/// expansion are both built on these.
pub mod codec {
  /// Returns the i-th digit (little-endian) of the representation of `m`
  /// in base `p`.
  pub fn base_p(p: u64, m: u64, i: usize) -> u64 {
    let mut m = m;
    for _ in 0..i {
      m /= p;
    }
    m % p
  }

  /// Returns the element whose base-p decomposition is given by the
  /// values in `vals`.
  pub fn reconstruct_from_base_p(p: u64, vals: &[u64]) -> u64 {
    let mut res = 0u64;
    let mut coeff = 1u64;
    for &v in vals {
      res = res.wrapping_add(coeff.wrapping_mul(v));
      coeff = coeff.wrapping_mul(p);
    }
    res
  }

  /// Returns how many entries in Z_p are needed to represent an element
  /// of Z_q, where q = 2^log_q.
  pub fn num_entries_base_p(p: u64, log_q: usize) -> usize {
    let log_p = (p as f64).log2();
    (log_q as f64 / log_p).ceil() as usize
  }
}

/// Mean and standard deviation over repeated benchmark runs.
pub mod stats {
  pub fn avg(data: &[f64]) -> f64 {
    data.iter().sum::<f64>() / data.len() as f64
  }

  pub fn stddev(data: &[f64]) -> f64 {
    let mean = avg(data);
    let variance =
      data.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / data.len() as f64;
    variance.sqrt()
  }
}
