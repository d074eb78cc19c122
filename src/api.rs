//! The `api` module is the shared surface of both PIR schemes: the
//! state and message containers exchanged between the roles, and the
//! `Pir` trait the runner drives.

use serde::{Deserialize, Serialize};

use crate::db::{Database, DbInfo};
use crate::errors::ResultBoxedError;
use crate::matrix::Matrix;
use crate::params::Params;
use crate::prg::{Prg, PrgKey};

/// An ordered list of matrices held by one role. The meaning of each
/// slot is a per-scheme convention (shared state holds the A matrices,
/// client state the secrets, server state the squished hint).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
  pub data: Vec<Matrix>,
}

impl State {
  pub fn new(data: Vec<Matrix>) -> Self {
    Self { data }
  }
}

/// A compressed shared state: the PRG seed the A matrices are
/// regenerated from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompressedState {
  pub seed: PrgKey,
}

/// An ordered list of matrices sent over the wire.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Msg {
  pub data: Vec<Matrix>,
}

impl Msg {
  pub fn new(data: Vec<Matrix>) -> Self {
    Self { data }
  }

  /// Total number of elements across all matrices.
  pub fn size(&self) -> usize {
    self.data.iter().map(|m| m.size()).sum()
  }
}

/// A batch of queries, one `Msg` per client index.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MsgSlice {
  pub data: Vec<Msg>,
}

impl MsgSlice {
  pub fn size(&self) -> usize {
    self.data.iter().map(|m| m.size()).sum()
  }
}

/// Interface for PIR-with-preprocessing schemes.
///
/// Sampling paths take an explicit `&mut Prg`; nothing in the crate
/// keeps PRG state behind the caller's back. For compressed-state use,
/// both sides must issue the same sequence of draws (shapes, in order)
/// against streams seeded with the same key, which the default
/// `init_compressed` / `decompress_state` implementations guarantee by
/// construction.
pub trait Pir {
  fn name(&self) -> &'static str;

  /// Searches for the tightest plaintext modulus and database shape for
  /// `num` entries of `row_length` bits under LWE dimension `n`.
  fn pick_params(
    &self,
    num: usize,
    row_length: usize,
    n: usize,
    logq: usize,
  ) -> ResultBoxedError<Params>;

  /// Parameter lookup for a caller-fixed database shape.
  fn pick_params_given_dimensions(
    &self,
    l: usize,
    m: usize,
    n: usize,
    logq: usize,
  ) -> ResultBoxedError<Params>;

  /// Prints the offline and online transfer sizes of one query.
  fn bandwidth(&self, info: &DbInfo, params: &Params);

  /// Samples the shared state (the A matrices) from `prg`.
  fn init(&self, info: &DbInfo, params: &Params, prg: &mut Prg) -> State;

  /// Samples a fresh seed, derives the shared state from it, and
  /// returns the seed for transfer in place of the matrices.
  fn init_compressed(
    &self,
    info: &DbInfo,
    params: &Params,
  ) -> ResultBoxedError<(State, CompressedState)> {
    let (mut prg, seed) = Prg::from_random_key();
    let state = self.init(info, params, &mut prg);
    Ok((state, CompressedState { seed }))
  }

  /// Re-derives the shared state from a transferred seed; the result is
  /// element-for-element equal to the state `init_compressed` produced.
  fn decompress_state(
    &self,
    info: &DbInfo,
    params: &Params,
    comp: &CompressedState,
  ) -> State {
    let mut prg = Prg::new(&comp.seed);
    self.init(info, params, &mut prg)
  }

  /// Server preprocessing: computes the offline hint and converts the
  /// database to its squished online form.
  fn setup(
    &self,
    db: &mut Database,
    shared: &State,
    params: &Params,
  ) -> ResultBoxedError<(State, Msg)>;

  /// Benchmarking variant of `setup` that skips the hint computation
  /// but still performs the representation change. Returns the offline
  /// download this fakes, in KB.
  fn fake_setup(
    &self,
    db: &mut Database,
    params: &Params,
    prg: &mut Prg,
  ) -> ResultBoxedError<(State, f64)>;

  /// Builds the encrypted query for index `i`. The returned client
  /// state holds the one-shot secrets; reusing them for a second answer
  /// leaks the queried index.
  fn query(
    &self,
    i: usize,
    shared: &State,
    params: &Params,
    info: &DbInfo,
    prg: &mut Prg,
  ) -> ResultBoxedError<(State, Msg)>;

  /// Computes the server response for a batch of queries, each against
  /// its own slice of database rows.
  fn answer(
    &self,
    db: &Database,
    queries: &MsgSlice,
    server: &State,
    shared: &State,
    params: &Params,
  ) -> ResultBoxedError<Msg>;

  /// Decrypts entry `i` from the answer to the `batch_index`-th query.
  #[allow(clippy::too_many_arguments)]
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
  ) -> ResultBoxedError<u64>;

  /// Restores the database to its canonical representation.
  fn reset(&self, db: &mut Database, params: &Params) -> ResultBoxedError<()>;
}
