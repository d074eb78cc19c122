//! Row-major matrices over 32-bit words with wrapping arithmetic, plus
//! the compressed ("squished") representation and the packed
//! matrix-vector kernels that dominate the online cost of both schemes.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::errors::{
  ErrorHardcodedConstraint, ErrorOutOfRange, ErrorShapeMismatch,
  ResultBoxedError,
};
use crate::params::Params;
use crate::prg::Prg;
use crate::utils::codec::reconstruct_from_base_p;

/// Matrix element. All arithmetic wraps modulo 2^32; reductions modulo
/// q or p happen only on explicit rounding.
pub type Elem = u32;

/// Bits per packed slot in the squished representation.
pub const SQUISH_BASIS: usize = 10;

/// Number of logical columns folded into one element when squishing.
pub const SQUISH_FACTOR: usize = 3;

// The packed kernels write 8 rows past the logical output during the
// innermost unroll; the extra rows are dropped before returning.
const PACKED_OUT_PADDING: usize = 8;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Matrix {
  rows: usize,
  cols: usize,
  data: Vec<Elem>,
}

/// A borrowed window onto a contiguous row range of a parent matrix.
/// Row slices handed to the answer kernels are views; `rows_deep_copy`
/// is the materialising counterpart.
#[derive(Clone, Copy, Debug)]
pub struct MatrixView<'a> {
  rows: usize,
  cols: usize,
  data: &'a [Elem],
}

impl<'a> MatrixView<'a> {
  pub fn rows(&self) -> usize {
    self.rows
  }

  pub fn cols(&self) -> usize {
    self.cols
  }

  pub fn as_slice(&self) -> &[Elem] {
    self.data
  }
}

impl Matrix {
  pub fn zeros(rows: usize, cols: usize) -> Self {
    Self {
      rows,
      cols,
      data: vec![0; rows * cols],
    }
  }

  /// Samples a (rows x cols) matrix with entries uniform in
  /// [0, modulus), drawn from `prg` in row-major order.
  pub fn random(
    prg: &mut Prg,
    rows: usize,
    cols: usize,
    modulus: u64,
  ) -> Self {
    let data = (0..rows * cols)
      .map(|_| prg.rand_int(modulus) as Elem)
      .collect();
    Self { rows, cols, data }
  }

  /// Samples a (rows x cols) matrix of discrete Gaussian noise, stored
  /// as 2^32-wrapped signed values.
  pub fn gaussian(prg: &mut Prg, rows: usize, cols: usize) -> Self {
    let data = (0..rows * cols)
      .map(|_| prg.gauss_sample() as Elem)
      .collect();
    Self { rows, cols, data }
  }

  pub fn rows(&self) -> usize {
    self.rows
  }

  pub fn cols(&self) -> usize {
    self.cols
  }

  /// Total number of elements.
  pub fn size(&self) -> usize {
    self.rows * self.cols
  }

  pub fn as_slice(&self) -> &[Elem] {
    &self.data
  }

  pub fn view(&self) -> MatrixView<'_> {
    MatrixView {
      rows: self.rows,
      cols: self.cols,
      data: &self.data,
    }
  }

  pub fn get(&self, i: usize, j: usize) -> ResultBoxedError<Elem> {
    if i >= self.rows || j >= self.cols {
      return Err(Box::new(ErrorOutOfRange::new(&format!(
        "({}, {}) indexed in a {}-by-{} matrix",
        i, j, self.rows, self.cols
      ))));
    }
    Ok(self.data[i * self.cols + j])
  }

  pub fn set(&mut self, i: usize, j: usize, val: Elem) -> ResultBoxedError<()> {
    if i >= self.rows || j >= self.cols {
      return Err(Box::new(ErrorOutOfRange::new(&format!(
        "({}, {}) indexed in a {}-by-{} matrix",
        i, j, self.rows, self.cols
      ))));
    }
    self.data[i * self.cols + j] = val;
    Ok(())
  }

  /// Adds `val` into the element at (i, j), wrapping modulo 2^32.
  pub fn add_at(
    &mut self,
    i: usize,
    j: usize,
    val: Elem,
  ) -> ResultBoxedError<()> {
    let cur = self.get(i, j)?;
    self.set(i, j, cur.wrapping_add(val))
  }

  pub fn add_scalar(&mut self, val: Elem) {
    for v in self.data.iter_mut() {
      *v = v.wrapping_add(val);
    }
  }

  pub fn sub_scalar(&mut self, val: Elem) {
    for v in self.data.iter_mut() {
      *v = v.wrapping_sub(val);
    }
  }

  pub fn matrix_add(&mut self, other: &Matrix) -> ResultBoxedError<()> {
    if self.rows != other.rows || self.cols != other.cols {
      return Err(Box::new(ErrorShapeMismatch::new(&format!(
        "{}-by-{} vs. {}-by-{}",
        self.rows, self.cols, other.rows, other.cols
      ))));
    }
    for (v, o) in self.data.iter_mut().zip(&other.data) {
      *v = v.wrapping_add(*o);
    }
    Ok(())
  }

  pub fn matrix_sub(&mut self, other: &Matrix) -> ResultBoxedError<()> {
    if self.rows != other.rows || self.cols != other.cols {
      return Err(Box::new(ErrorShapeMismatch::new(&format!(
        "{}-by-{} vs. {}-by-{}",
        self.rows, self.cols, other.rows, other.cols
      ))));
    }
    for (v, o) in self.data.iter_mut().zip(&other.data) {
      *v = v.wrapping_sub(*o);
    }
    Ok(())
  }

  /// Reduces every element modulo `p`.
  pub fn reduce_mod(&mut self, p: u64) {
    for v in self.data.iter_mut() {
      *v = (*v as u64 % p) as Elem;
    }
  }

  /// Maps every element back to plaintext space via `Params::round`.
  pub fn round(&mut self, params: &Params) {
    for v in self.data.iter_mut() {
      *v = params.round(*v as u64) as Elem;
    }
  }

  pub fn transpose(&mut self) {
    if self.cols == 1 || self.rows == 1 {
      std::mem::swap(&mut self.rows, &mut self.cols);
      return;
    }
    let mut out = Matrix::zeros(self.cols, self.rows);
    for i in 0..self.rows {
      for j in 0..self.cols {
        out.data[j * self.rows + i] = self.data[i * self.cols + j];
      }
    }
    *self = out;
  }

  /// Vertically appends `other`. Appending to an empty matrix adopts the
  /// column count of `other`.
  pub fn concat(&mut self, other: &Matrix) -> ResultBoxedError<()> {
    if self.rows == 0 && self.cols == 0 {
      *self = other.clone();
      return Ok(());
    }
    if self.cols != other.cols {
      return Err(Box::new(ErrorShapeMismatch::new(&format!(
        "{}-by-{} vs. {}-by-{}",
        self.rows, self.cols, other.rows, other.cols
      ))));
    }
    self.rows += other.rows;
    self.data.extend_from_slice(&other.data);
    Ok(())
  }

  /// Appends `n` zero rows to a column vector.
  pub fn append_zeros(&mut self, n: usize) -> ResultBoxedError<()> {
    self.concat(&Matrix::zeros(n, 1))
  }

  /// Folds every n-th column under the first, turning a (r x c) matrix
  /// into an (r*n x c/n) one.
  pub fn concat_cols(&mut self, n: usize) -> ResultBoxedError<()> {
    if n == 1 {
      return Ok(());
    }
    if self.cols % n != 0 {
      return Err(Box::new(ErrorShapeMismatch::new(&format!(
        "{} columns cannot be folded {} ways",
        self.cols, n
      ))));
    }
    let mut out = Matrix::zeros(self.rows * n, self.cols / n);
    for i in 0..self.rows {
      for j in 0..self.cols {
        let col = j / n;
        let row = i + self.rows * (j % n);
        out.data[row * out.cols + col] = self.data[i * self.cols + j];
      }
    }
    *self = out;
    Ok(())
  }

  /// Borrows `num_rows` rows starting at `offset`; a short tail is
  /// clamped to the end of the matrix.
  pub fn select_rows(
    &self,
    offset: usize,
    num_rows: usize,
  ) -> ResultBoxedError<MatrixView<'_>> {
    if offset > self.rows {
      return Err(Box::new(ErrorOutOfRange::new(&format!(
        "row offset {} in a {}-row matrix",
        offset, self.rows
      ))));
    }
    let end = if offset + num_rows <= self.rows {
      offset + num_rows
    } else {
      self.rows
    };
    Ok(MatrixView {
      rows: end - offset,
      cols: self.cols,
      data: &self.data[offset * self.cols..end * self.cols],
    })
  }

  /// Copies `num_rows` rows starting at `offset` into a new matrix.
  pub fn rows_deep_copy(
    &self,
    offset: usize,
    num_rows: usize,
  ) -> ResultBoxedError<Matrix> {
    if offset + num_rows > self.rows {
      return Err(Box::new(ErrorOutOfRange::new(&format!(
        "rows [{}, {}) of a {}-row matrix",
        offset,
        offset + num_rows,
        self.rows
      ))));
    }
    Ok(Matrix {
      rows: num_rows,
      cols: self.cols,
      data: self.data[offset * self.cols..(offset + num_rows) * self.cols]
        .to_vec(),
    })
  }

  /// Copies column `i` out as a column vector.
  pub fn select_column(&self, i: usize) -> ResultBoxedError<Matrix> {
    if i >= self.cols {
      return Err(Box::new(ErrorOutOfRange::new(&format!(
        "column {} of a {}-column matrix",
        i, self.cols
      ))));
    }
    if self.cols == 1 {
      return Ok(self.clone());
    }
    let data = (0..self.rows)
      .map(|j| self.data[j * self.cols + i])
      .collect();
    Ok(Matrix {
      rows: self.rows,
      cols: 1,
      data,
    })
  }

  pub fn drop_last_rows(&mut self, n: usize) {
    self.rows -= n;
    self.data.truncate(self.rows * self.cols);
  }

  /// Replaces each entry with its length-`delta` base-`modulus`
  /// expansion, stacked vertically in the same column, with every digit
  /// re-centred to [-modulus/2, modulus/2).
  pub fn expand(&mut self, modulus: u64, delta: usize) {
    let mut out = Matrix::zeros(self.rows * delta, self.cols);
    let half = (modulus / 2) as Elem;
    for i in 0..self.rows {
      for j in 0..self.cols {
        let mut val = self.data[i * self.cols + j] as u64;
        for f in 0..delta {
          let digit = (val % modulus) as Elem;
          out.data[(i * delta + f) * self.cols + j] = digit.wrapping_sub(half);
          val /= modulus;
        }
      }
    }
    *self = out;
  }

  /// Inverse of `expand` on groups of `delta` consecutive rows; digits
  /// are shifted back by +modulus/2 before reconstruction.
  pub fn contract(&mut self, modulus: u64, delta: usize) {
    let mut out = Matrix::zeros(self.rows / delta, self.cols);
    let mut vals = vec![0u64; delta];
    for i in 0..out.rows {
      for j in 0..out.cols {
        for (f, v) in vals.iter_mut().enumerate() {
          let digit = self.data[(i * delta + f) * self.cols + j] as u64;
          *v = (digit + modulus / 2) % modulus;
        }
        out.data[i * self.cols + j] =
          reconstruct_from_base_p(modulus, &vals) as Elem;
      }
    }
    *self = out;
  }

  /// Packs `delta` consecutive columns into a single element, slot k
  /// holding `val << (k * basis)`. Entries must fit in `basis` bits.
  pub fn squish(&mut self, basis: usize, delta: usize) {
    let mut out = Matrix::zeros(self.rows, (self.cols + delta - 1) / delta);
    for i in 0..out.rows {
      for j in 0..out.cols {
        for k in 0..delta {
          if delta * j + k < self.cols {
            let val = self.data[i * self.cols + delta * j + k];
            out.data[i * out.cols + j] =
              out.data[i * out.cols + j].wrapping_add(val << (k * basis));
          }
        }
      }
    }
    *self = out;
  }

  /// Inverse of `squish`; `cols` is the original column count, which the
  /// squished shape alone cannot recover.
  pub fn unsquish(&mut self, basis: usize, delta: usize, cols: usize) {
    let mut out = Matrix::zeros(self.rows, cols);
    let mask = ((1u64 << basis) - 1) as Elem;
    for i in 0..self.rows {
      for j in 0..self.cols {
        for k in 0..delta {
          if j * delta + k < cols {
            out.data[i * out.cols + j * delta + k] =
              (self.data[i * self.cols + j] >> (k * basis)) & mask;
          }
        }
      }
    }
    *self = out;
  }

  /// Single-pass fusion of `transpose`, uncentred `expand(modulus,
  /// delta)`, `concat_cols(concat)` and `squish(basis, d)`, used on the
  /// first-layer answer so the three intermediate matrices are never
  /// allocated.
  pub fn transpose_and_expand_and_concat_cols_and_squish(
    &mut self,
    modulus: u64,
    delta: usize,
    concat: usize,
    basis: usize,
    d: usize,
  ) -> ResultBoxedError<()> {
    if self.rows % concat != 0 {
      return Err(Box::new(ErrorShapeMismatch::new(&format!(
        "{} rows cannot be folded {} ways",
        self.rows, concat
      ))));
    }
    let mut out = Matrix::zeros(
      self.cols * delta * concat,
      (self.rows / concat + d - 1) / d,
    );
    for j in 0..self.rows {
      for i in 0..self.cols {
        let mut val = self.data[i + j * self.cols] as u64;
        for f in 0..delta {
          let digit = (val % modulus) as Elem;
          let r = (i * delta + f) + self.cols * delta * (j % concat);
          let c = j / concat;
          out.data[r * out.cols + c / d] = out.data[r * out.cols + c / d]
            .wrapping_add(digit << (basis * (c % d)));
          val /= modulus;
        }
      }
    }
    *self = out;
    Ok(())
  }

  /// General multiply; dispatches to the vector path when `b` is a
  /// column vector.
  pub fn mul(a: &Matrix, b: &Matrix) -> ResultBoxedError<Matrix> {
    if b.cols == 1 {
      return Self::mul_vec(a, b);
    }
    if a.cols != b.rows {
      return Err(Box::new(ErrorShapeMismatch::new(&format!(
        "{}-by-{} vs. {}-by-{}",
        a.rows, a.cols, b.rows, b.cols
      ))));
    }
    let mut out = Matrix::zeros(a.rows, b.cols);
    let b_cols = b.cols;
    out
      .data
      .par_chunks_mut(b_cols)
      .enumerate()
      .for_each(|(i, out_row)| {
        for k in 0..a.cols {
          let v = a.data[i * a.cols + k];
          let b_row = &b.data[k * b_cols..(k + 1) * b_cols];
          for (o, &bv) in out_row.iter_mut().zip(b_row) {
            *o = o.wrapping_add(v.wrapping_mul(bv));
          }
        }
      });
    Ok(out)
  }

  /// Matrix-vector multiply. Tolerates `a.cols` up to two short of
  /// `b.rows`, because squishing rounds the database's column count up;
  /// the product runs over the shorter of the two.
  pub fn mul_vec(a: &Matrix, b: &Matrix) -> ResultBoxedError<Matrix> {
    if a.cols != b.rows && a.cols + 1 != b.rows && a.cols + 2 != b.rows {
      return Err(Box::new(ErrorShapeMismatch::new(&format!(
        "{}-by-{} vs. {}-by-{}",
        a.rows, a.cols, b.rows, b.cols
      ))));
    }
    if b.cols != 1 {
      return Err(Box::new(ErrorShapeMismatch::new(
        "second operand is not a column vector",
      )));
    }
    let mut out = Matrix::zeros(a.rows, 1);
    out
      .data
      .par_iter_mut()
      .enumerate()
      .for_each(|(i, out_e)| {
        let row = &a.data[i * a.cols..(i + 1) * a.cols];
        let mut acc = 0 as Elem;
        for (&av, &bv) in row.iter().zip(&b.data) {
          acc = acc.wrapping_add(av.wrapping_mul(bv));
        }
        *out_e = acc;
      });
    Ok(out)
  }

  /// The core online kernel: multiplies a squished matrix by a query
  /// vector whose length is `a.cols * squishing`.
  pub fn mul_vec_packed(
    a: MatrixView<'_>,
    b: &Matrix,
    basis: usize,
    squishing: usize,
  ) -> ResultBoxedError<Matrix> {
    if basis != SQUISH_BASIS || squishing != SQUISH_FACTOR {
      return Err(Box::new(ErrorHardcodedConstraint::new(&format!(
        "packed kernels require basis {} and squishing {}",
        SQUISH_BASIS, SQUISH_FACTOR
      ))));
    }
    if a.cols * squishing != b.rows {
      return Err(Box::new(ErrorShapeMismatch::new(&format!(
        "{}-by-{} vs. {}-by-{}",
        a.rows, a.cols, b.rows, b.cols
      ))));
    }
    if b.cols != 1 {
      return Err(Box::new(ErrorShapeMismatch::new(
        "second operand is not a column vector",
      )));
    }
    let mut out = Matrix::zeros(a.rows + PACKED_OUT_PADDING, 1);
    let mask = ((1u64 << basis) - 1) as Elem;
    out.data[..a.rows]
      .par_iter_mut()
      .enumerate()
      .for_each(|(i, out_e)| {
        let row = &a.data[i * a.cols..(i + 1) * a.cols];
        let mut acc = 0 as Elem;
        for (j, &v) in row.iter().enumerate() {
          let q = &b.data[j * squishing..(j + 1) * squishing];
          acc = acc
            .wrapping_add((v & mask).wrapping_mul(q[0]))
            .wrapping_add(((v >> basis) & mask).wrapping_mul(q[1]))
            .wrapping_add(((v >> (2 * basis)) & mask).wrapping_mul(q[2]));
        }
        *out_e = acc;
      });
    out.drop_last_rows(PACKED_OUT_PADDING);
    Ok(out)
  }

  /// Computes `unpack(a) * b^T` where `a` is squished and `b` is stored
  /// pre-transposed with `b.cols == a.cols * squishing`.
  pub fn mul_transposed_packed(
    a: &Matrix,
    b: &Matrix,
    basis: usize,
    squishing: usize,
  ) -> ResultBoxedError<Matrix> {
    if basis != SQUISH_BASIS || squishing != SQUISH_FACTOR {
      return Err(Box::new(ErrorHardcodedConstraint::new(&format!(
        "packed kernels require basis {} and squishing {}",
        SQUISH_BASIS, SQUISH_FACTOR
      ))));
    }
    if a.cols * squishing != b.cols {
      return Err(Box::new(ErrorShapeMismatch::new(&format!(
        "{}-by-{} vs. {}-by-{} transposed",
        a.rows, a.cols, b.rows, b.cols
      ))));
    }
    let mut out = Matrix::zeros(a.rows, b.rows);
    let mask = ((1u64 << basis) - 1) as Elem;
    let b_rows = b.rows;
    out
      .data
      .par_chunks_mut(b_rows)
      .enumerate()
      .for_each(|(i, out_row)| {
        let a_row = &a.data[i * a.cols..(i + 1) * a.cols];
        for (k, out_e) in out_row.iter_mut().enumerate() {
          let b_row = &b.data[k * b.cols..(k + 1) * b.cols];
          let mut acc = 0 as Elem;
          for (j, &v) in a_row.iter().enumerate() {
            let w = &b_row[j * squishing..(j + 1) * squishing];
            acc = acc
              .wrapping_add((v & mask).wrapping_mul(w[0]))
              .wrapping_add(((v >> basis) & mask).wrapping_mul(w[1]))
              .wrapping_add(((v >> (2 * basis)) & mask).wrapping_mul(w[2]));
          }
          *out_e = acc;
        }
      });
    Ok(out)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::errors::ErrorOutOfRange;
  use crate::prg::Prg;

  fn test_prg() -> Prg {
    Prg::new(&[7u8; 16])
  }

  #[test]
  fn transpose_twice_is_identity() {
    let mut prg = test_prg();
    let m = Matrix::random(&mut prg, 13, 7, 1u64 << 32);
    let mut t = m.clone();
    t.transpose();
    assert_eq!(t.rows(), 7);
    assert_eq!(t.cols(), 13);
    t.transpose();
    assert_eq!(t, m);
  }

  #[test]
  fn squish_then_unsquish_is_identity() {
    let mut prg = test_prg();
    for cols in &[9usize, 10, 11] {
      let m = Matrix::random(&mut prg, 6, *cols, 1u64 << SQUISH_BASIS);
      let mut s = m.clone();
      s.squish(SQUISH_BASIS, SQUISH_FACTOR);
      assert_eq!(s.cols(), (cols + SQUISH_FACTOR - 1) / SQUISH_FACTOR);
      s.unsquish(SQUISH_BASIS, SQUISH_FACTOR, *cols);
      assert_eq!(s, m);
    }
  }

  #[test]
  fn expand_then_contract_is_identity() {
    let mut prg = test_prg();
    let modulus = 991u64;
    let delta = 4usize;
    let m = Matrix::random(&mut prg, 5, 6, 1u64 << 32);
    let mut e = m.clone();
    e.expand(modulus, delta);
    assert_eq!(e.rows(), 5 * delta);
    // In the protocol the expanded digits reach `contract` reduced
    // modulo p (the rounding step lands there); emulate that reduction
    // on the 2^32-wrapped centred digits.
    let reduced: Vec<Elem> = e
      .as_slice()
      .iter()
      .map(|&v| (v as i32 as i64).rem_euclid(modulus as i64) as Elem)
      .collect();
    let mut c = Matrix {
      rows: e.rows(),
      cols: e.cols(),
      data: reduced,
    };
    c.contract(modulus, delta);
    // Entries reconstruct modulo p^delta = 991^4 > 2^32, i.e. exactly.
    assert_eq!(c, m);
  }

  #[test]
  fn concat_cols_reshapes() {
    let m = Matrix {
      rows: 1,
      cols: 4,
      data: vec![1, 2, 3, 4],
    };
    let mut folded = m;
    folded.concat_cols(2).unwrap();
    assert_eq!(folded.rows(), 2);
    assert_eq!(folded.cols(), 2);
    // Column j of the original lands in column j/2, row block j%2.
    assert_eq!(folded.as_slice(), &[1, 3, 2, 4]);
  }

  #[test]
  fn packed_vector_multiply_matches_naive() {
    let mut prg = test_prg();
    for cols in &[12usize, 13, 14] {
      let a = Matrix::random(&mut prg, 9, *cols, 1u64 << SQUISH_BASIS);
      let mut squished = a.clone();
      squished.squish(SQUISH_BASIS, SQUISH_FACTOR);
      let padded = squished.cols() * SQUISH_FACTOR;
      let b = Matrix::random(&mut prg, padded, 1, 1u64 << 32);
      let packed = Matrix::mul_vec_packed(
        squished.view(),
        &b,
        SQUISH_BASIS,
        SQUISH_FACTOR,
      )
      .unwrap();
      // Reference path: multiply the unsquished matrix against the same
      // (zero-padded) query.
      let mut reference = Matrix::zeros(a.rows(), 1);
      for i in 0..a.rows() {
        let mut acc = 0 as Elem;
        for j in 0..a.cols() {
          acc = acc.wrapping_add(
            a.get(i, j).unwrap().wrapping_mul(b.get(j, 0).unwrap()),
          );
        }
        reference.set(i, 0, acc).unwrap();
      }
      assert_eq!(packed, reference);
    }
  }

  #[test]
  fn packed_transposed_multiply_matches_naive() {
    let mut prg = test_prg();
    let a = Matrix::random(&mut prg, 4, 5, 1u64 << SQUISH_BASIS);
    let mut squished = a.clone();
    squished.squish(SQUISH_BASIS, SQUISH_FACTOR);
    let padded = squished.cols() * SQUISH_FACTOR;
    let b = Matrix::random(&mut prg, 6, padded, 1u64 << 32);
    let packed =
      Matrix::mul_transposed_packed(&squished, &b, SQUISH_BASIS, SQUISH_FACTOR)
        .unwrap();
    let mut reference = Matrix::zeros(a.rows(), b.rows());
    for i in 0..a.rows() {
      for k in 0..b.rows() {
        let mut acc = 0 as Elem;
        for j in 0..a.cols() {
          acc = acc.wrapping_add(
            a.get(i, j).unwrap().wrapping_mul(b.get(k, j).unwrap()),
          );
        }
        reference.set(i, k, acc).unwrap();
      }
    }
    assert_eq!(packed, reference);
  }

  #[test]
  fn packed_kernels_reject_other_constants() {
    let m = Matrix::zeros(3, 3);
    let b = Matrix::zeros(9, 1);
    let err = Matrix::mul_vec_packed(m.view(), &b, 8, 3).unwrap_err();
    assert!(err.downcast_ref::<ErrorHardcodedConstraint>().is_some());
    let err = Matrix::mul_transposed_packed(&m, &b, 10, 4).unwrap_err();
    assert!(err.downcast_ref::<ErrorHardcodedConstraint>().is_some());
  }

  #[test]
  fn fused_transform_matches_unfused_composition() {
    let mut prg = test_prg();
    let modulus = 175u64;
    let delta = 5usize;
    let concat = 2usize;
    let m = Matrix::random(&mut prg, 12, 1, 1u64 << 32);

    let mut fused = m.clone();
    fused
      .transpose_and_expand_and_concat_cols_and_squish(
        modulus,
        delta,
        concat,
        SQUISH_BASIS,
        SQUISH_FACTOR,
      )
      .unwrap();

    // The fused pass skips the digit centring, so the reference path
    // re-shifts by +modulus/2 before squishing.
    let mut reference = m;
    reference.transpose();
    reference.expand(modulus, delta);
    reference.concat_cols(concat).unwrap();
    reference.add_scalar((modulus / 2) as Elem);
    reference.squish(SQUISH_BASIS, SQUISH_FACTOR);
    assert_eq!(fused, reference);
  }

  #[test]
  fn vector_multiply_tolerates_padded_queries() {
    let mut prg = test_prg();
    let a = Matrix::random(&mut prg, 4, 10, 1u64 << 32);
    for pad in 0..3usize {
      let b = Matrix::random(&mut prg, 10 + pad, 1, 1u64 << 32);
      assert!(Matrix::mul_vec(&a, &b).is_ok());
    }
    let b = Matrix::random(&mut prg, 13, 1, 1u64 << 32);
    let err = Matrix::mul_vec(&a, &b).unwrap_err();
    assert!(err.downcast_ref::<ErrorShapeMismatch>().is_some());
  }

  #[test]
  fn shape_mismatches_are_reported() {
    let a = Matrix::zeros(2, 3);
    let b = Matrix::zeros(4, 2);
    let err = Matrix::mul(&a, &b).unwrap_err();
    assert!(err.downcast_ref::<ErrorShapeMismatch>().is_some());

    let mut c = Matrix::zeros(2, 3);
    let err = c.matrix_add(&Matrix::zeros(2, 4)).unwrap_err();
    assert!(err.downcast_ref::<ErrorShapeMismatch>().is_some());
    let err = c.concat(&Matrix::zeros(1, 4)).unwrap_err();
    assert!(err.downcast_ref::<ErrorShapeMismatch>().is_some());
  }

  #[test]
  fn indexing_is_bounds_checked() {
    let mut m = Matrix::zeros(2, 2);
    assert!(m.get(1, 1).is_ok());
    let err = m.get(2, 0).unwrap_err();
    assert!(err.downcast_ref::<ErrorOutOfRange>().is_some());
    let err = m.set(0, 2, 1).unwrap_err();
    assert!(err.downcast_ref::<ErrorOutOfRange>().is_some());
    let err = m.select_rows(3, 1).unwrap_err();
    assert!(err.downcast_ref::<ErrorOutOfRange>().is_some());
    let err = m.rows_deep_copy(1, 2).unwrap_err();
    assert!(err.downcast_ref::<ErrorOutOfRange>().is_some());
  }

  #[test]
  fn views_share_and_copies_detach() {
    let mut prg = test_prg();
    let m = Matrix::random(&mut prg, 6, 4, 1u64 << 32);
    let view = m.select_rows(2, 3).unwrap();
    assert_eq!(view.rows(), 3);
    assert_eq!(view.cols(), 4);
    assert_eq!(view.as_slice(), &m.as_slice()[2 * 4..5 * 4]);
    // A tail request past the end is clamped.
    let tail = m.select_rows(4, 10).unwrap();
    assert_eq!(tail.rows(), 2);
    let copy = m.rows_deep_copy(2, 3).unwrap();
    assert_eq!(copy.as_slice(), view.as_slice());
  }

  #[test]
  fn select_column_extracts() {
    let m = Matrix {
      rows: 2,
      cols: 3,
      data: vec![1, 2, 3, 4, 5, 6],
    };
    let col = m.select_column(1).unwrap();
    assert_eq!(col.rows(), 2);
    assert_eq!(col.as_slice(), &[2, 5]);
    assert!(m.select_column(3).is_err());
  }

  #[test]
  fn drop_last_rows_truncates() {
    let mut m = Matrix::zeros(10, 2);
    m.drop_last_rows(3);
    assert_eq!(m.rows(), 7);
    assert_eq!(m.size(), 14);
  }

  #[test]
  fn reduce_mod_folds_into_the_modulus() {
    let mut prg = test_prg();
    let mut m = Matrix::random(&mut prg, 4, 4, 1u64 << 32);
    m.reduce_mod(991);
    assert!(m.as_slice().iter().all(|&v| v < 991));
  }
}
