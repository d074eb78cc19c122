//! SimplePIR: one online round against a squished database, after a
//! client-specific offline download of the hint H = D * A.

use crate::api::{Msg, MsgSlice, Pir, State};
use crate::db::{approx_square_database_dims, reconstruct_elem, Database, DbInfo};
use crate::errors::{
  ErrorInvalidParams, ErrorShapeMismatch, ResultBoxedError,
};
use crate::matrix::{Elem, Matrix};
use crate::params::Params;
use crate::prg::Prg;

pub struct SimplePir;

impl Pir for SimplePir {
  fn name(&self) -> &'static str {
    "SimplePIR"
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
      let (l, m) = approx_square_database_dims(num, row_length, mod_p)?;
      let params = Params::pick(n, logq, l, m, false, &[m])?;
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
    Params::pick(n, logq, l, m, false, &[m])
  }

  fn bandwidth(&self, _info: &DbInfo, params: &Params) {
    let offline_download =
      (params.l() * params.n() * params.logq()) as f64 / (8.0 * 1024.0);
    println!("\t\tOffline download: {:.0} KB", offline_download);

    let online_upload = (params.m() * params.logq()) as f64 / (8.0 * 1024.0);
    println!("\t\tOnline upload: {:.0} KB", online_upload);

    let online_download = (params.l() * params.logq()) as f64 / (8.0 * 1024.0);
    println!("\t\tOnline download: {:.0} KB", online_download);
  }

  fn init(&self, _info: &DbInfo, params: &Params, prg: &mut Prg) -> State {
    let a = Matrix::random(prg, params.m(), params.n(), params.q());
    State::new(vec![a])
  }

  fn setup(
    &self,
    db: &mut Database,
    shared: &State,
    params: &Params,
  ) -> ResultBoxedError<(State, Msg)> {
    let a = &shared.data[0];
    let h = Matrix::mul(&db.data, a)?;

    // Map the database entries to [0, p) and pack them tightly in
    // memory; the online computation is memory-bandwidth-bound.
    db.data.add_scalar((params.p() / 2) as Elem);
    db.squish()?;

    Ok((State::default(), Msg::new(vec![h])))
  }

  fn fake_setup(
    &self,
    db: &mut Database,
    params: &Params,
    _prg: &mut Prg,
  ) -> ResultBoxedError<(State, f64)> {
    let offline_download =
      (params.l() * params.n() * params.logq()) as f64 / (8.0 * 1024.0);
    println!("\t\tOffline download: {:.0} KB", offline_download);

    db.data.add_scalar((params.p() / 2) as Elem);
    db.squish()?;

    Ok((State::default(), offline_download))
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
    let a = &shared.data[0];

    let secret = Matrix::random(prg, params.n(), 1, params.q());
    let err = Matrix::gaussian(prg, params.m(), 1);
    let mut query = Matrix::mul(a, &secret)?;
    query.matrix_add(&err)?;
    query.add_at(i % params.m(), 0, params.delta() as Elem)?;

    // Pad the query to match the squished database's column count.
    if params.m() % info.squishing != 0 {
      query.append_zeros(info.squishing - (params.m() % info.squishing))?;
    }

    Ok((State::new(vec![secret]), Msg::new(vec![query])))
  }

  fn answer(
    &self,
    db: &Database,
    queries: &MsgSlice,
    _server: &State,
    _shared: &State,
    _params: &Params,
  ) -> ResultBoxedError<Msg> {
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

    // Each query is answered against its own slice of rows; the last
    // slice absorbs the remainder.
    let mut batch_sz = db.data.rows() / num_queries;
    let mut last = 0usize;
    let mut ans = Matrix::default();
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
      ans.concat(&a)?;
      last += batch_sz;
    }

    Ok(Msg::new(vec![ans]))
  }

  fn recover(
    &self,
    i: usize,
    _batch_index: usize,
    offline: &Msg,
    query: &Msg,
    answer: &Msg,
    _shared: &State,
    client: &State,
    params: &Params,
    info: &DbInfo,
  ) -> ResultBoxedError<u64> {
    let secret = &client.data[0];
    let h = &offline.data[0];
    let ans = &answer.data[0];
    let q = &query.data[0];

    // The scalar +p/2 shift applied to the database during setup biases
    // the answer by (p/2) * sum(q); remove it globally.
    let qmod = 1u64 << params.logq();
    let ratio = params.p() / 2;
    let mut offset = 0u64;
    for j in 0..params.m() {
      offset += ratio * q.get(j, 0)? as u64;
    }
    offset %= qmod;
    offset = qmod - offset;

    let row = i / params.m();
    let interm = Matrix::mul(h, secret)?;

    // Recover each Z_p element that makes up the desired entry. The
    // answer is read immutably, so the caller may reuse it for other
    // indices of the batch.
    let mut vals = Vec::with_capacity(info.ne);
    for j in row * info.ne..(row + 1) * info.ne {
      let denoised = ans.as_slice()[j].wrapping_sub(interm.as_slice()[j]);
      let noised = denoised as u64 + offset;
      vals.push(params.round(noised));
    }

    Ok(reconstruct_elem(&mut vals, i, info))
  }

  fn reset(
    &self,
    db: &mut Database,
    params: &Params,
  ) -> ResultBoxedError<()> {
    // Uncompress the database and map its entries back to [-p/2, p/2).
    db.unsquish();
    db.data.sub_scalar((params.p() / 2) as Elem);
    Ok(())
  }
}
