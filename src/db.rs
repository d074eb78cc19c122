//! Mapping from raw fixed-width records to a packed matrix over Z_p.
//!
//! Depending on how a record's bit width compares with log2(p), either
//! several records share one Z_p element (`packing > 0`), or one record
//! spans `ne` elements stacked vertically in a column (`ne > 1`).

use serde::{Deserialize, Serialize};

use crate::errors::{ErrorInvalidParams, ErrorOutOfRange, ResultBoxedError};
use crate::matrix::{Elem, Matrix, SQUISH_BASIS, SQUISH_FACTOR};
use crate::params::Params;
use crate::prg::Prg;
use crate::utils::codec::{base_p, num_entries_base_p, reconstruct_from_base_p};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DbInfo {
  /// Number of database entries.
  pub num: usize,
  /// Number of bits per entry.
  pub row_length: usize,

  /// Number of entries per Z_p element, when log2(p) > row_length.
  pub packing: usize,
  /// Number of Z_p elements per entry, when row_length > log2(p).
  pub ne: usize,

  /// Repetition factor for the two-level scheme; a divisor of `ne` in
  /// the range [1, ne].
  pub x: usize,

  pub p: u64,
  pub logq: usize,

  // In-memory compression state, populated by `Database::squish`.
  pub basis: usize,
  pub squishing: usize,
  pub cols: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Database {
  pub info: DbInfo,
  pub data: Matrix,
}

/// Returns how many Z_p elements are needed for `num` entries of
/// `row_length` bits each, as (total elements, elements per entry,
/// entries per element).
pub fn num_db_entries(
  num: usize,
  row_length: usize,
  p: u64,
) -> ResultBoxedError<(usize, usize, usize)> {
  if row_length as f64 <= (p as f64).log2() {
    // Pack multiple entries into a single Z_p element.
    let logp = (p as f64).log2().floor() as usize;
    let entries_per_elem = logp / row_length;
    let db_elems = (num + entries_per_elem - 1) / entries_per_elem;
    if db_elems == 0 || db_elems > num {
      return Err(Box::new(ErrorInvalidParams::new(&format!(
        "packing {} entries yielded {} elements",
        num, db_elems
      ))));
    }
    return Ok((db_elems, 1, entries_per_elem));
  }
  // Use multiple Z_p elements to represent a single entry.
  let ne = num_entries_base_p(p, row_length);
  Ok((num * ne, ne, 0))
}

/// Finds the smallest (l, m) with l*m >= the element count, ne | l, and
/// l close to the square root of the element count.
pub fn approx_square_database_dims(
  num: usize,
  row_length: usize,
  p: u64,
) -> ResultBoxedError<(usize, usize)> {
  let (db_elems, ne, _) = num_db_entries(num, row_length, p)?;
  let mut l = (db_elems as f64).sqrt().floor() as usize;
  let rem = l % ne;
  if rem != 0 {
    l += ne - rem;
  }
  let m = (db_elems + l - 1) / l;
  Ok((l, m))
}

/// As `approx_square_database_dims`, additionally forcing
/// `m >= lower_bound_m`.
pub fn approx_database_dims(
  num: usize,
  row_length: usize,
  p: u64,
  lower_bound_m: usize,
) -> ResultBoxedError<(usize, usize)> {
  let (l, m) = approx_square_database_dims(num, row_length, p)?;
  if m >= lower_bound_m {
    return Ok((l, m));
  }
  let m = lower_bound_m;
  let (db_elems, ne, _) = num_db_entries(num, row_length, p)?;
  let mut l = (db_elems + m - 1) / m;
  let rem = l % ne;
  if rem != 0 {
    l += ne - rem;
  }
  Ok((l, m))
}

impl DbInfo {
  pub fn new(
    num: usize,
    row_length: usize,
    params: &Params,
  ) -> ResultBoxedError<Self> {
    if num == 0 || row_length == 0 {
      return Err(Box::new(ErrorInvalidParams::new("empty database")));
    }
    let (db_elems, ne, packing) = num_db_entries(num, row_length, params.p())?;
    if db_elems > params.l() * params.m() {
      return Err(Box::new(ErrorInvalidParams::new(&format!(
        "{} elements do not fit a {}-by-{} database",
        db_elems,
        params.l(),
        params.m()
      ))));
    }
    if params.l() % ne != 0 {
      return Err(Box::new(ErrorInvalidParams::new(
        "elements per entry must divide the database height",
      )));
    }
    Ok(Self {
      num,
      row_length,
      packing,
      ne,
      // The repetition factor must divide ne; starting it at ne keeps
      // the invariant without any search.
      x: ne,
      p: params.p(),
      logq: params.logq(),
      basis: 0,
      squishing: 0,
      cols: 0,
    })
  }
}

impl Database {
  /// Builds a database of `num` uniformly random `row_length`-bit
  /// entries, already mapped to the signed-centred representation.
  pub fn random(
    prg: &mut Prg,
    num: usize,
    row_length: usize,
    params: &Params,
  ) -> ResultBoxedError<Self> {
    let info = DbInfo::new(num, row_length, params)?;
    let mut data = Matrix::random(prg, params.l(), params.m(), params.p());
    data.sub_scalar((params.p() / 2) as Elem);
    Ok(Self { info, data })
  }

  /// Builds a database holding `vals`, packed row-major according to the
  /// regime `DbInfo` selected.
  pub fn from_entries(
    num: usize,
    row_length: usize,
    params: &Params,
    vals: &[u64],
  ) -> ResultBoxedError<Self> {
    let info = DbInfo::new(num, row_length, params)?;
    let mut data = Matrix::zeros(params.l(), params.m());

    if vals.len() != num {
      return Err(Box::new(ErrorInvalidParams::new(&format!(
        "expected {} entries, got {}",
        num,
        vals.len()
      ))));
    }

    if info.packing > 0 {
      // Multiple entries share each Z_p element.
      let mut at = 0usize;
      let mut cur = 0u64;
      let mut coeff = 1u64;
      for (i, &elem) in vals.iter().enumerate() {
        cur += elem * coeff;
        coeff *= 1u64 << row_length;
        if (i + 1) % info.packing == 0 || i == vals.len() - 1 {
          data.set(at / params.m(), at % params.m(), cur as Elem)?;
          at += 1;
          cur = 0;
          coeff = 1;
        }
      }
    } else {
      // Each entry spans ne consecutive elements of one column.
      for (i, &elem) in vals.iter().enumerate() {
        for j in 0..info.ne {
          data.set(
            (i / params.m()) * info.ne + j,
            i % params.m(),
            base_p(info.p, elem, j) as Elem,
          )?;
        }
      }
    }

    // Map the elements from [0, p) to [-p/2, p/2).
    data.sub_scalar((params.p() / 2) as Elem);
    Ok(Self { info, data })
  }

  /// Compresses the matrix in memory: three 10-bit columns per element.
  /// Entries must already be shifted back to [0, p).
  pub fn squish(&mut self) -> ResultBoxedError<()> {
    self.info.basis = SQUISH_BASIS;
    self.info.squishing = SQUISH_FACTOR;
    self.info.cols = self.data.cols();
    self.data.squish(SQUISH_BASIS, SQUISH_FACTOR);

    if self.info.p > (1u64 << SQUISH_BASIS)
      || self.info.logq < SQUISH_BASIS * SQUISH_FACTOR
    {
      return Err(Box::new(ErrorInvalidParams::new(
        "modulus does not fit the squished representation",
      )));
    }
    Ok(())
  }

  /// Restores the representation `squish` compressed.
  pub fn unsquish(&mut self) {
    self
      .data
      .unsquish(self.info.basis, self.info.squishing, self.info.cols);
  }

  /// Reads entry `i` back out of the packed matrix.
  pub fn get_elem(&self, i: usize) -> ResultBoxedError<u64> {
    if i >= self.info.num {
      return Err(Box::new(ErrorOutOfRange::new(&format!(
        "entry {} of a {}-entry database",
        i, self.info.num
      ))));
    }

    let mut col = i % self.data.cols();
    let mut row = i / self.data.cols();
    if self.info.packing > 0 {
      let new_i = i / self.info.packing;
      col = new_i % self.data.cols();
      row = new_i / self.data.cols();
    }

    let mut vals = Vec::with_capacity(self.info.ne);
    for j in row * self.info.ne..(row + 1) * self.info.ne {
      vals.push(self.data.get(j, col)? as u64);
    }

    Ok(reconstruct_elem(&mut vals, i, &self.info))
  }
}

/// Reassembles one entry from its signed-centred Z_p elements.
pub fn reconstruct_elem(vals: &mut [u64], index: usize, info: &DbInfo) -> u64 {
  let q = 1u64 << info.logq;
  for v in vals.iter_mut() {
    *v = (*v + info.p / 2) % q % info.p;
  }

  let mut val = reconstruct_from_base_p(info.p, vals);
  if info.packing > 0 {
    val = base_p(1u64 << info.row_length, val, index % info.packing);
  }
  val
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::Pir;
  use crate::simple::SimplePir;

  const LOGQ: usize = 32;
  const SEC_PARAM: usize = 1 << 10;

  // Multiple entries fit in one Z_p element.
  #[test]
  fn pack_short_entries() {
    let num = 4;
    let row_length = 3;
    let params = SimplePir.pick_params(num, row_length, SEC_PARAM, LOGQ).unwrap();
    let vals = vec![1u64, 2, 3, 4];
    let db = Database::from_entries(num, row_length, &params, &vals).unwrap();
    assert!(db.info.packing > 1);
    assert_eq!(db.info.ne, 1);
    for (i, &v) in vals.iter().enumerate() {
      assert_eq!(db.get_elem(i).unwrap(), v);
    }
  }

  // Each entry occupies roughly one Z_p element.
  #[test]
  fn pack_medium_entries() {
    let num = 4;
    let row_length = 9;
    let params = SimplePir.pick_params(num, row_length, SEC_PARAM, LOGQ).unwrap();
    let vals = vec![1u64, 2, 3, 4];
    let db = Database::from_entries(num, row_length, &params, &vals).unwrap();
    assert_eq!(db.info.packing, 1);
    assert_eq!(db.info.ne, 1);
    for (i, &v) in vals.iter().enumerate() {
      assert_eq!(db.get_elem(i).unwrap(), v);
    }
  }

  // Each entry needs several Z_p elements.
  #[test]
  fn pack_long_entries() {
    let num = 4;
    let row_length = 12;
    let params = SimplePir.pick_params(num, row_length, SEC_PARAM, LOGQ).unwrap();
    let vals = vec![1u64, 2, 3, 4];
    let db = Database::from_entries(num, row_length, &params, &vals).unwrap();
    assert_eq!(db.info.packing, 0);
    assert!(db.info.ne >= 2);
    for (i, &v) in vals.iter().enumerate() {
      assert_eq!(db.get_elem(i).unwrap(), v);
    }
  }

  #[test]
  fn repetition_factor_divides_ne() {
    let num = 4;
    let row_length = 12;
    let params = SimplePir.pick_params(num, row_length, SEC_PARAM, LOGQ).unwrap();
    let info = DbInfo::new(num, row_length, &params).unwrap();
    assert!(info.x >= 1);
    assert!(info.x <= info.ne);
    assert_eq!(info.ne % info.x, 0);
  }

  #[test]
  fn get_elem_is_bounds_checked() {
    let num = 4;
    let row_length = 9;
    let params = SimplePir.pick_params(num, row_length, SEC_PARAM, LOGQ).unwrap();
    let db =
      Database::from_entries(num, row_length, &params, &[1, 2, 3, 4]).unwrap();
    let err = db.get_elem(4).unwrap_err();
    assert!(err.downcast_ref::<ErrorOutOfRange>().is_some());
  }

  #[test]
  fn empty_databases_are_rejected() {
    let params = SimplePir.pick_params(4, 9, SEC_PARAM, LOGQ).unwrap();
    let err = DbInfo::new(0, 9, &params).unwrap_err();
    assert!(err.downcast_ref::<ErrorInvalidParams>().is_some());
    let err = DbInfo::new(4, 0, &params).unwrap_err();
    assert!(err.downcast_ref::<ErrorInvalidParams>().is_some());
  }

  #[test]
  fn squish_round_trips_through_the_lifecycle() {
    let num = 1 << 10;
    let row_length = 8;
    let params = SimplePir.pick_params(num, row_length, SEC_PARAM, LOGQ).unwrap();
    let mut prg = Prg::new(&[3u8; 16]);
    let mut db = Database::random(&mut prg, num, row_length, &params).unwrap();
    let before = db.data.clone();
    db.data.add_scalar((params.p() / 2) as Elem);
    db.squish().unwrap();
    assert_eq!(
      db.data.cols(),
      (db.info.cols + SQUISH_FACTOR - 1) / SQUISH_FACTOR
    );
    db.unsquish();
    db.data.sub_scalar((params.p() / 2) as Elem);
    assert_eq!(db.data, before);
  }

  #[test]
  fn random_entries_are_in_range() {
    let num = 1 << 8;
    let row_length = 6;
    let params = SimplePir.pick_params(num, row_length, SEC_PARAM, LOGQ).unwrap();
    let mut prg = Prg::new(&[9u8; 16]);
    let db = Database::random(&mut prg, num, row_length, &params).unwrap();
    for i in 0..num {
      assert!(db.get_elem(i).unwrap() < 1 << row_length);
    }
  }
}
