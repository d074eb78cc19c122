//! DoublePIR: a second LWE layer over the first-layer hint makes the
//! offline download independent of the client, at the cost of a larger
//! online download.
//!
//! Offline download: H2. Online query: q1 and ne/x second-level
//! queries. Online download: h1 followed by (a2, h2) pairs per query.
//! Server state: squished H1 and a padded, transposed copy of A2.
//! Client state: secret1 and the second-level secrets.

use crate::api::{Msg, MsgSlice, Pir, State};
use crate::db::{approx_database_dims, reconstruct_elem, Database, DbInfo};
use crate::errors::{
  ErrorInvalidParams, ErrorShapeMismatch, ResultBoxedError,
};
use crate::matrix::{Elem, Matrix, SQUISH_BASIS, SQUISH_FACTOR};
use crate::params::Params;
use crate::prg::Prg;

/// Ratio between the first-level and second-level database dimensions:
/// the width of the first-level database is at least 64 times the LWE
/// dimension.
pub const COMP_RATIO: usize = 64;

pub struct DoublePir;

impl Pir for DoublePir {
  fn name(&self) -> &'static str {
    "DoublePIR"
  }

  fn pick_params(
    &self,
    num: usize,
    row_length: usize,
    n: usize,
    logq: usize,
  ) -> ResultBoxedError<Params> {
    let mut good: Option<Params> = None;

    // Iteratively refine p and the database dimensions until the
    // catalogue cannot support a tighter plaintext modulus.
    let mut mod_p = 2u64;
    loop {
      let (l, m) =
        approx_database_dims(num, row_length, mod_p, COMP_RATIO * n)?;
      let params = Params::pick(n, logq, l, m, true, &[l, m])?;
      if params.p() < mod_p {
        return match good {
          Some(found) => {
            println!("Working with: {}", found);
            Ok(found)
          }
          None => Err(Box::new(ErrorInvalidParams::new(
            "catalogue cannot support any plaintext modulus",
          ))),
        };
      }
      good = Some(params);
      mod_p += 1;
    }
  }

  fn pick_params_given_dimensions(
    &self,
    l: usize,
    m: usize,
    n: usize,
    logq: usize,
  ) -> ResultBoxedError<Params> {
    Params::pick(n, logq, l, m, true, &[l, m])
  }

  fn bandwidth(&self, info: &DbInfo, params: &Params) {
    let delta = params.expansion();
    let n = params.n();
    let logq = params.logq();

    let offline_download =
      (delta * info.x * n * n * logq) as f64 / (8.0 * 1024.0);
    println!("\t\tOffline download: {:.0} KB", offline_download);

    let online_upload = (params.m() * logq
      + (info.ne / info.x) * (params.l() / info.x) * logq)
      as f64
      / (8.0 * 1024.0);
    println!("\t\tOnline upload: {:.0} KB", online_upload);

    let online_download = (delta * info.x * n * logq
      + delta * n * info.ne * logq
      + delta * info.ne * logq) as f64
      / (8.0 * 1024.0);
    println!("\t\tOnline download: {:.0} KB", online_download);
  }

  fn init(&self, info: &DbInfo, params: &Params, prg: &mut Prg) -> State {
    let a1 = Matrix::random(prg, params.m(), params.n(), params.q());
    let a2 = Matrix::random(prg, params.l() / info.x, params.n(), params.q());
    State::new(vec![a1, a2])
  }

  fn setup(
    &self,
    db: &mut Database,
    shared: &State,
    params: &Params,
  ) -> ResultBoxedError<(State, Msg)> {
    let a1 = &shared.data[0];
    let a2 = &shared.data[1];

    let mut h1 = Matrix::mul(&db.data, a1)?;
    h1.transpose();
    h1.expand(params.p(), params.expansion());
    h1.concat_cols(db.info.x)?;

    let h2 = Matrix::mul(&h1, a2)?;

    // Pack both online operands tightly; the answer is memory-bound.
    db.data.add_scalar((params.p() / 2) as Elem);
    db.squish()?;

    h1.add_scalar((params.p() / 2) as Elem);
    h1.squish(SQUISH_BASIS, SQUISH_FACTOR);

    let mut a2_copy = a2.rows_deep_copy(0, a2.rows())?;
    if a2_copy.rows() % SQUISH_FACTOR != 0 {
      let pad = SQUISH_FACTOR - (a2_copy.rows() % SQUISH_FACTOR);
      a2_copy.concat(&Matrix::zeros(pad, a2_copy.cols()))?;
    }
    a2_copy.transpose();

    Ok((State::new(vec![h1, a2_copy]), Msg::new(vec![h2])))
  }

  fn fake_setup(
    &self,
    db: &mut Database,
    params: &Params,
    prg: &mut Prg,
  ) -> ResultBoxedError<(State, f64)> {
    let info = db.info.clone();
    let delta = params.expansion();
    let mut h1 = Matrix::random(
      prg,
      params.n() * delta * info.x,
      params.l() / info.x,
      params.p(),
    );

    let offline_download = (params.n() * delta * info.x
      * params.n()
      * params.logq()) as f64
      / (8.0 * 1024.0);
    println!("\t\tOffline download: {:.0} KB", offline_download);

    db.data.add_scalar((params.p() / 2) as Elem);
    db.squish()?;

    h1.add_scalar((params.p() / 2) as Elem);
    h1.squish(SQUISH_BASIS, SQUISH_FACTOR);

    let mut a2_rows = params.l() / info.x;
    if a2_rows % SQUISH_FACTOR != 0 {
      a2_rows += SQUISH_FACTOR - (a2_rows % SQUISH_FACTOR);
    }
    let a2_copy = Matrix::random(prg, params.n(), a2_rows, params.q());

    Ok((State::new(vec![h1, a2_copy]), offline_download))
  }

  fn query(
    &self,
    i: usize,
    shared: &State,
    params: &Params,
    info: &DbInfo,
    prg: &mut Prg,
  ) -> ResultBoxedError<(State, Msg)> {
    if info.squishing == 0 {
      return Err(Box::new(ErrorInvalidParams::new(
        "database must be set up before queries are built",
      )));
    }
    let i1 = (i / params.m()) * (info.ne / info.x);
    let i2 = i % params.m();

    let a1 = &shared.data[0];
    let a2 = &shared.data[1];

    let secret1 = Matrix::random(prg, params.n(), 1, params.q());
    let err1 = Matrix::gaussian(prg, params.m(), 1);
    let mut query1 = Matrix::mul(a1, &secret1)?;
    query1.matrix_add(&err1)?;
    query1.add_at(i2, 0, params.delta() as Elem)?;

    if params.m() % info.squishing != 0 {
      query1.append_zeros(info.squishing - (params.m() % info.squishing))?;
    }

    let mut state = State::new(vec![secret1]);
    let mut msg = Msg::new(vec![query1]);

    let second_level_rows = params.l() / info.x;
    for j in 0..info.ne / info.x {
      let secret2 = Matrix::random(prg, params.n(), 1, params.q());
      let err2 = Matrix::gaussian(prg, second_level_rows, 1);
      let mut query2 = Matrix::mul(a2, &secret2)?;
      query2.matrix_add(&err2)?;
      query2.add_at(i1 + j, 0, params.delta() as Elem)?;

      if second_level_rows % info.squishing != 0 {
        query2
          .append_zeros(info.squishing - (second_level_rows % info.squishing))?;
      }

      state.data.push(secret2);
      msg.data.push(query2);
    }

    Ok((state, msg))
  }

  fn answer(
    &self,
    db: &Database,
    queries: &MsgSlice,
    server: &State,
    _shared: &State,
    params: &Params,
  ) -> ResultBoxedError<Msg> {
    let h1_server = &server.data[0];
    let a2_transpose = &server.data[1];

    let num_queries = queries.data.len();
    if num_queries == 0 {
      return Err(Box::new(ErrorShapeMismatch::new("empty query batch")));
    }
    if db.data.rows() / num_queries < db.info.ne {
      return Err(Box::new(ErrorShapeMismatch::new(&format!(
        "{} queries against {} database rows leave slices smaller than one entry",
        num_queries,
        db.data.rows()
      ))));
    }

    // First layer: answer every query against its slice of rows.
    let mut batch_sz = db.data.rows() / num_queries;
    let mut last = 0usize;
    let mut a1 = Matrix::default();
    for (batch, q) in queries.data.iter().enumerate() {
      if batch == num_queries - 1 {
        batch_sz = db.data.rows() - last;
      }
      let a = Matrix::mul_vec_packed(
        db.data.select_rows(last, batch_sz)?,
        &q.data[0],
        db.info.basis,
        db.info.squishing,
      )?;
      a1.concat(&a)?;
      last += batch_sz;
    }

    // Second layer: decompose the first-layer answer into base-p digits
    // laid out like H1, then answer the second-level queries against
    // both operands.
    a1.transpose_and_expand_and_concat_cols_and_squish(
      params.p(),
      params.expansion(),
      db.info.x,
      SQUISH_BASIS,
      SQUISH_FACTOR,
    )?;
    let h1 = Matrix::mul_transposed_packed(
      &a1,
      a2_transpose,
      SQUISH_BASIS,
      SQUISH_FACTOR,
    )?;

    let mut msg = Msg::new(vec![h1]);
    for q in &queries.data {
      for j in 0..db.info.ne / db.info.x {
        let q2 = &q.data[1 + j];
        let a2 = Matrix::mul_vec_packed(
          h1_server.view(),
          q2,
          SQUISH_BASIS,
          SQUISH_FACTOR,
        )?;
        let h2 =
          Matrix::mul_vec_packed(a1.view(), q2, SQUISH_BASIS, SQUISH_FACTOR)?;
        msg.data.push(a2);
        msg.data.push(h2);
      }
    }

    Ok(msg)
  }

  fn recover(
    &self,
    i: usize,
    batch_index: usize,
    offline: &Msg,
    query: &Msg,
    answer: &Msg,
    shared: &State,
    client: &State,
    params: &Params,
    info: &DbInfo,
  ) -> ResultBoxedError<u64> {
    let h2_hint = &offline.data[0];
    let secret1 = &client.data[0];
    let a2_shared = &shared.data[1];
    let mut h1 = answer.data[0].clone();

    let qmod = 1u64 << params.logq();
    let ratio = params.p() / 2;
    let n = params.n();
    let delta = params.expansion();

    // Scalar corrections for the +p/2 shifts applied to the database
    // and to H1 during setup.
    let q1 = &query.data[0];
    let mut val1 = 0u64;
    for j in 0..params.m() {
      val1 += ratio * q1.get(j, 0)? as u64;
    }
    val1 %= qmod;
    val1 = qmod - val1;

    let q2 = &query.data[1];
    let mut val2 = 0u64;
    for j in 0..params.l() / info.x {
      val2 += ratio * q2.get(j, 0)? as u64;
    }
    val2 %= qmod;
    val2 = qmod - val2;

    if a2_shared.cols() != n || h1.cols() != n {
      return Err(Box::new(ErrorShapeMismatch::new(&format!(
        "hint width {} and A2 width {} must both equal n={}",
        h1.cols(),
        a2_shared.cols(),
        n
      ))));
    }

    // Column-wise correction of h1 for the +p/2 shift in the digit
    // decomposition of the first-layer answer.
    for j1 in 0..n {
      let mut val3 = 0u64;
      for j2 in 0..a2_shared.rows() {
        val3 += ratio * a2_shared.get(j2, j1)? as u64;
      }
      val3 %= qmod;
      val3 = qmod - val3;
      for k in 0..h1.rows() {
        h1.add_at(k, j1, val3 as Elem)?;
      }
    }

    let pair_offset = (info.ne / info.x * 2) * batch_index;
    let mut vals = Vec::with_capacity(info.ne);
    for idx in 0..info.ne / info.x {
      let a2 = &answer.data[1 + 2 * idx + pair_offset];
      let mut h2 = answer.data[2 + 2 * idx + pair_offset].clone();
      let secret2 = &client.data[1 + idx];
      h2.add_scalar(val2 as Elem);

      for j in 0..info.x {
        // One second-level ciphertext per repetition: n*delta rows of
        // a2 followed by delta rows of h2, decrypted against the
        // matching rows of H2 and h1.
        let mut state = a2.rows_deep_copy(j * n * delta, n * delta)?;
        state.add_scalar(val2 as Elem);
        state.concat(&h2.rows_deep_copy(j * delta, delta)?)?;

        let mut hint = h2_hint.rows_deep_copy(j * n * delta, n * delta)?;
        hint.concat(&h1.rows_deep_copy(j * delta, delta)?)?;

        let interm = Matrix::mul(&hint, secret2)?;
        state.matrix_sub(&interm)?;
        state.round(params);
        state.contract(params.p(), delta);

        // The contracted state holds n noisy first-layer products and,
        // at position n, the masked entry digit; strip the first-layer
        // noise with secret1.
        let state_data = state.as_slice();
        let secret_data = secret1.as_slice();
        let mut noised = state_data[n] as u64 + val1;
        for l in 0..n {
          let prod = secret_data[l].wrapping_mul(state_data[l]);
          noised = noised.wrapping_sub(prod as u64) % qmod;
        }
        vals.push(params.round(noised));
      }
    }

    Ok(reconstruct_elem(&mut vals, i, info))
  }

  fn reset(
    &self,
    db: &mut Database,
    params: &Params,
  ) -> ResultBoxedError<()> {
    db.unsquish();
    db.data.sub_scalar((params.p() / 2) as Elem);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::runner::run_pir;

  const LOGQ: usize = 32;
  const SEC_PARAM: usize = 1 << 10;

  #[test]
  fn single_query_on_long_entries() {
    let num = 1 << 20;
    let row_length = 32;
    let pir = DoublePir;
    let params = pir.pick_params(num, row_length, SEC_PARAM, LOGQ).unwrap();
    let mut prg = Prg::from_random_key().0;
    let mut db = Database::random(&mut prg, num, row_length, &params).unwrap();

    println!(
      "Executing with entries of {} bits; p={}; packing={}; ne={}",
      row_length, db.info.p, db.info.packing, db.info.ne
    );
    run_pir(&pir, &mut db, &params, &[1 << 19]).unwrap();
  }

  #[test]
  fn batched_queries_on_short_entries() {
    let num = 1 << 20;
    let row_length = 8;
    let pir = DoublePir;
    let params = pir.pick_params(num, row_length, SEC_PARAM, LOGQ).unwrap();
    let mut prg = Prg::from_random_key().0;
    let mut db = Database::random(&mut prg, num, row_length, &params).unwrap();
    run_pir(&pir, &mut db, &params, &[0, 0, 0, 0]).unwrap();
  }

  #[test]
  fn compressed_state_round_trips() {
    let num = 1 << 12;
    let row_length = 9;
    let pir = DoublePir;
    let params = pir
      .pick_params_given_dimensions(64, 1024, SEC_PARAM, LOGQ)
      .unwrap();
    let info = DbInfo::new(num, row_length, &params).unwrap();
    let (state, comp) = pir.init_compressed(&info, &params).unwrap();
    let derived = pir.decompress_state(&info, &params, &comp);
    assert_eq!(state.data.len(), 2);
    assert_eq!(state, derived);
  }

  #[test]
  fn bandwidth_report_runs() {
    let num = 1 << 16;
    let row_length = 8;
    let pir = DoublePir;
    let params = pir.pick_params(num, row_length, SEC_PARAM, LOGQ).unwrap();
    let info = DbInfo::new(num, row_length, &params).unwrap();
    pir.bandwidth(&info, &params);
  }
}
