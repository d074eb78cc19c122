//! End-to-end orchestration of a PIR scheme over a prepared database:
//! timing, throughput and bandwidth reporting, and verification of
//! every recovered entry against the canonical database.

use std::time::{Duration, Instant};

use crate::api::{MsgSlice, Pir};
use crate::db::Database;
use crate::errors::{
  ErrorReconstructFailure, ErrorShapeMismatch, ResultBoxedError,
};
use crate::params::Params;
use crate::prg::Prg;

fn print_time(start: Instant) -> Duration {
  let elapsed = start.elapsed();
  println!("\tElapsed: {:?}", elapsed);
  elapsed
}

fn print_rate(params: &Params, elapsed: Duration, batch_sz: usize) -> f64 {
  let rate = (params.p() as f64).log2()
    * (params.l() * params.m()) as f64
    * batch_sz as f64
    / (8.0 * 1024.0 * 1024.0 * elapsed.as_secs_f64());
  println!("\tRate: {:.2} MB/s", rate);
  rate
}

fn check_batch(db: &Database, num_queries: usize) -> ResultBoxedError<()> {
  if num_queries == 0 {
    return Err(Box::new(ErrorShapeMismatch::new("no queries to run")));
  }
  if db.data.rows() / num_queries < db.info.ne {
    return Err(Box::new(ErrorShapeMismatch::new(
      "too many queries to handle",
    )));
  }
  Ok(())
}

/// Runs the full scheme (offline and online phases) for `indices`, one
/// query per batch slice, and verifies every recovery. Returns the
/// answer throughput in MB/s and the total bandwidth in KB.
pub fn run_pir(
  scheme: &dyn Pir,
  db: &mut Database,
  params: &Params,
  indices: &[usize],
) -> ResultBoxedError<(f64, f64)> {
  println!("Executing {}", scheme.name());
  let num_queries = indices.len();
  check_batch(db, num_queries)?;
  let batch_sz =
    db.data.rows() / (db.info.ne * num_queries) * db.data.cols();
  let mut bw = 0f64;

  let mut prg = Prg::from_random_key().0;
  let shared = scheme.init(&db.info, params, &mut prg);

  println!("Setup...");
  let start = Instant::now();
  let (server_state, offline) = scheme.setup(db, &shared, params)?;
  print_time(start);
  let comm = (offline.size() * params.logq()) as f64 / (8.0 * 1024.0);
  println!("\t\tOffline download: {:.2} KB", comm);
  bw += comm;

  println!("Building query...");
  let start = Instant::now();
  let mut client_states = Vec::with_capacity(num_queries);
  let mut queries = MsgSlice::default();
  for (index, &i) in indices.iter().enumerate() {
    let index_to_query = i + index * batch_sz;
    let (cs, q) =
      scheme.query(index_to_query, &shared, params, &db.info, &mut prg)?;
    client_states.push(cs);
    queries.data.push(q);
  }
  print_time(start);
  let comm = (queries.size() * params.logq()) as f64 / (8.0 * 1024.0);
  println!("\t\tOnline upload: {:.2} KB", comm);
  bw += comm;

  println!("Answering query...");
  let start = Instant::now();
  let answer =
    scheme.answer(db, &queries, &server_state, &shared, params)?;
  let elapsed = print_time(start);
  let rate = print_rate(params, elapsed, num_queries);
  let comm = (answer.size() * params.logq()) as f64 / (8.0 * 1024.0);
  println!("\t\tOnline download: {:.2} KB", comm);
  bw += comm;

  // The database must be canonical again before recoveries are checked
  // against it.
  scheme.reset(db, params)?;
  println!("Reconstructing...");
  let start = Instant::now();
  for (index, &i) in indices.iter().enumerate() {
    let index_to_query = i + index * batch_sz;
    let val = scheme.recover(
      index_to_query,
      index,
      &offline,
      &queries.data[index],
      &answer,
      &shared,
      &client_states[index],
      params,
      &db.info,
    )?;
    let expected = db.get_elem(index_to_query)?;
    if expected != val {
      return Err(Box::new(ErrorReconstructFailure::new(&format!(
        "batch {} (querying index {}): got {} instead of {}",
        index, index_to_query, val, expected
      ))));
    }
  }
  println!("Success!");
  print_time(start);

  Ok((rate, bw))
}

/// As `run_pir`, but the shared state crosses the wire as a PRG seed:
/// the server derives it via `init_compressed` and the client re-derives
/// it from the seed. Client queries draw from a fresh local stream, not
/// from the shared seed.
pub fn run_pir_compressed(
  scheme: &dyn Pir,
  db: &mut Database,
  params: &Params,
  indices: &[usize],
) -> ResultBoxedError<(f64, f64)> {
  println!("Executing {}", scheme.name());
  let num_queries = indices.len();
  check_batch(db, num_queries)?;
  let batch_sz =
    db.data.rows() / (db.info.ne * num_queries) * db.data.cols();
  let mut bw = 0f64;

  let (server_shared, comp) = scheme.init_compressed(&db.info, params)?;
  let client_shared = scheme.decompress_state(&db.info, params, &comp);

  println!("Setup...");
  let start = Instant::now();
  let (server_state, offline) = scheme.setup(db, &server_shared, params)?;
  print_time(start);
  let comm = (offline.size() * params.logq()) as f64 / (8.0 * 1024.0);
  println!("\t\tOffline download: {:.2} KB", comm);
  bw += comm;

  println!("Building query...");
  let start = Instant::now();
  let mut client_prg = Prg::from_random_key().0;
  let mut client_states = Vec::with_capacity(num_queries);
  let mut queries = MsgSlice::default();
  for (index, &i) in indices.iter().enumerate() {
    let index_to_query = i + index * batch_sz;
    let (cs, q) = scheme.query(
      index_to_query,
      &client_shared,
      params,
      &db.info,
      &mut client_prg,
    )?;
    client_states.push(cs);
    queries.data.push(q);
  }
  print_time(start);
  let comm = (queries.size() * params.logq()) as f64 / (8.0 * 1024.0);
  println!("\t\tOnline upload: {:.2} KB", comm);
  bw += comm;

  println!("Answering query...");
  let start = Instant::now();
  let answer =
    scheme.answer(db, &queries, &server_state, &server_shared, params)?;
  let elapsed = print_time(start);
  let rate = print_rate(params, elapsed, num_queries);
  let comm = (answer.size() * params.logq()) as f64 / (8.0 * 1024.0);
  println!("\t\tOnline download: {:.2} KB", comm);
  bw += comm;

  scheme.reset(db, params)?;
  println!("Reconstructing...");
  let start = Instant::now();
  for (index, &i) in indices.iter().enumerate() {
    let index_to_query = i + index * batch_sz;
    let val = scheme.recover(
      index_to_query,
      index,
      &offline,
      &queries.data[index],
      &answer,
      &client_shared,
      &client_states[index],
      params,
      &db.info,
    )?;
    let expected = db.get_elem(index_to_query)?;
    if expected != val {
      return Err(Box::new(ErrorReconstructFailure::new(&format!(
        "batch {} (querying index {}): got {} instead of {}",
        index, index_to_query, val, expected
      ))));
    }
  }
  println!("Success!");
  print_time(start);

  Ok((rate, bw))
}

/// Runs the online phase against a faked preprocessing, for accurate
/// bandwidth and online-time measurements without the offline cost.
/// Returns (rate, total bandwidth, offline KB, online KB).
pub fn run_fake_pir(
  scheme: &dyn Pir,
  db: &mut Database,
  params: &Params,
  indices: &[usize],
) -> ResultBoxedError<(f64, f64, f64, f64)> {
  println!("Executing {}", scheme.name());
  let num_queries = indices.len();
  check_batch(db, num_queries)?;

  let mut prg = Prg::from_random_key().0;
  let shared = scheme.init(&db.info, params, &mut prg);

  println!("Setup...");
  let (server_state, offline_comm) =
    scheme.fake_setup(db, params, &mut prg)?;
  let mut bw = offline_comm;

  println!("Building query...");
  let start = Instant::now();
  let mut queries = MsgSlice::default();
  for &i in indices {
    let (_, q) = scheme.query(i, &shared, params, &db.info, &mut prg)?;
    queries.data.push(q);
  }
  print_time(start);
  let mut online_comm =
    (queries.size() * params.logq()) as f64 / (8.0 * 1024.0);
  println!("\t\tOnline upload: {:.2} KB", online_comm);
  bw += online_comm;

  println!("Answering query...");
  let start = Instant::now();
  let answer =
    scheme.answer(db, &queries, &server_state, &shared, params)?;
  let elapsed = print_time(start);
  let rate = print_rate(params, elapsed, num_queries);
  let online_down = (answer.size() * params.logq()) as f64 / (8.0 * 1024.0);
  println!("\t\tOnline download: {:.2} KB", online_down);
  bw += online_down;
  online_comm += online_down;

  scheme.reset(db, params)?;
  Ok((rate, bw, offline_comm, online_comm))
}
