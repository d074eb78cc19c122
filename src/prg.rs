//! AES-CTR pseudo-random generator used for all protocol sampling.
//!
//! The stream is the AES-128-CTR keystream under a 16-byte key with an
//! all-zero initial counter, so two `Prg` values built from the same key
//! produce identical byte streams. Compressed-state handling depends on
//! this: the server and the client replay the same sampling sequence
//! against seeds of the same key and derive identical shared matrices.

use aes::Aes128;
use ctr::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;
use lazy_static::lazy_static;
use rand_core::{CryptoRng, OsRng, RngCore};

/// Length of a PRG seed: one AES-128 key.
pub const PRG_KEY_LEN: usize = 16;

/// A PRG seed, carried inside `CompressedState`.
pub type PrgKey = [u8; PRG_KEY_LEN];

type Aes128Ctr = Ctr128BE<Aes128>;

const GAUSS_SIGMA: f64 = 6.4;
const GAUSS_MIN: i64 = -128;
const GAUSS_SUPPORT: usize = 256;

lazy_static! {
  // Cumulative distribution table of the discrete Gaussian over
  // [-128, 127], scaled to 63 bits. A 63-bit uniform draw is mapped to
  // the first bucket whose cumulative mass exceeds it.
  static ref GAUSS_CDT: Vec<u64> = build_gauss_cdt();
}

fn build_gauss_cdt() -> Vec<u64> {
  let weights: Vec<f64> = (0..GAUSS_SUPPORT)
    .map(|idx| {
      let k = idx as f64 + GAUSS_MIN as f64;
      (-k * k / (2.0 * GAUSS_SIGMA * GAUSS_SIGMA)).exp()
    })
    .collect();
  let total: f64 = weights.iter().sum();
  let scale = (1u64 << 63) as f64;
  let mut acc = 0.0;
  let mut cdt: Vec<u64> = weights
    .iter()
    .map(|w| {
      acc += w;
      ((acc / total) * scale) as u64
    })
    .collect();
  // The final cumulative entry must cover the whole 63-bit range.
  cdt[GAUSS_SUPPORT - 1] = 1u64 << 63;
  cdt
}

/// A deterministic pseudo-random byte stream.
///
/// There is intentionally no process-wide instance; every sampling path
/// takes `&mut Prg`, which makes the order of draws explicit and keeps
/// parallel PIR sessions from corrupting one another's sequences.
pub struct Prg {
  stream: Aes128Ctr,
}

impl Prg {
  /// Builds the stream for `key` with an all-zero initial counter.
  pub fn new(key: &PrgKey) -> Self {
    let iv = [0u8; PRG_KEY_LEN];
    Self {
      stream: Aes128Ctr::new(key.into(), (&iv).into()),
    }
  }

  /// Samples a fresh key from the operating system and returns the
  /// stream together with the key (the key becomes the compressed-state
  /// seed).
  pub fn from_random_key() -> (Self, PrgKey) {
    let mut key = [0u8; PRG_KEY_LEN];
    OsRng.fill_bytes(&mut key);
    (Self::new(&key), key)
  }

  /// Fills `dest` with the next keystream bytes.
  pub fn fill_bytes(&mut self, dest: &mut [u8]) {
    for b in dest.iter_mut() {
      *b = 0;
    }
    self.stream.apply_keystream(dest);
  }

  /// Reads 8 little-endian bytes from the stream.
  pub fn uint64(&mut self) -> u64 {
    let mut buf = [0u8; 8];
    self.fill_bytes(&mut buf);
    u64::from_le_bytes(buf)
  }

  /// Reads a non-negative 63-bit integer.
  pub fn int63(&mut self) -> i64 {
    (self.uint64() % (1u64 << 63)) as i64
  }

  /// Returns a uniform integer in [0, modulus) via rejection sampling.
  pub fn rand_int(&mut self, modulus: u64) -> u64 {
    debug_assert!(modulus > 0, "modulus must be positive");
    if modulus <= 1 {
      return 0;
    }
    let bits = 64 - (modulus - 1).leading_zeros();
    let mask = if bits == 64 {
      u64::MAX
    } else {
      (1u64 << bits) - 1
    };
    loop {
      let v = self.uint64() & mask;
      if v < modulus {
        return v;
      }
    }
  }

  /// Samples the discrete Gaussian with sigma = 6.4 over [-128, 127].
  pub fn gauss_sample(&mut self) -> i64 {
    let r = self.int63() as u64;
    let idx = GAUSS_CDT.partition_point(|&c| c <= r);
    idx as i64 + GAUSS_MIN
  }
}

impl RngCore for Prg {
  fn next_u32(&mut self) -> u32 {
    let mut buf = [0u8; 4];
    Prg::fill_bytes(self, &mut buf);
    u32::from_le_bytes(buf)
  }

  fn next_u64(&mut self) -> u64 {
    self.uint64()
  }

  fn fill_bytes(&mut self, dest: &mut [u8]) {
    Prg::fill_bytes(self, dest)
  }

  fn try_fill_bytes(
    &mut self,
    dest: &mut [u8],
  ) -> Result<(), rand_core::Error> {
    Prg::fill_bytes(self, dest);
    Ok(())
  }
}

impl CryptoRng for Prg {}

#[cfg(test)]
mod tests {
  use super::*;
  use hex_literal::hex;

  #[test]
  fn keystream_known_answer() {
    // AES-128 of the zero block under the zero key.
    let mut prg = Prg::new(&[0u8; PRG_KEY_LEN]);
    let mut block = [0u8; 16];
    prg.fill_bytes(&mut block);
    assert_eq!(block, hex!("66e94bd4ef8a2c3b884cfa59ca342b2e"));
  }

  #[test]
  fn same_key_same_stream() {
    let key = hex!("000102030405060708090a0b0c0d0e0f");
    let mut a = Prg::new(&key);
    let mut b = Prg::new(&key);
    for _ in 0..100 {
      assert_eq!(a.uint64(), b.uint64());
    }
  }

  #[test]
  fn misaligned_reads_share_the_stream() {
    let key = hex!("2b7e151628aed2a6abf7158809cf4f3c");
    let mut a = Prg::new(&key);
    let mut b = Prg::new(&key);
    let mut whole = [0u8; 24];
    a.fill_bytes(&mut whole);
    let mut head = [0u8; 5];
    let mut tail = [0u8; 19];
    b.fill_bytes(&mut head);
    b.fill_bytes(&mut tail);
    assert_eq!(&whole[..5], &head[..]);
    assert_eq!(&whole[5..], &tail[..]);
  }

  #[test]
  fn rand_int_respects_modulus() {
    let (mut prg, _) = Prg::from_random_key();
    for &modulus in &[1u64, 2, 3, 991, 1 << 20, 1 << 32] {
      for _ in 0..1000 {
        assert!(prg.rand_int(modulus) < modulus);
      }
    }
  }

  #[test]
  fn gauss_sample_matches_catalogue_sigma() {
    let (mut prg, _) = Prg::from_random_key();
    let n = 200_000usize;
    let mut sum = 0f64;
    let mut sum_sq = 0f64;
    for _ in 0..n {
      let s = prg.gauss_sample();
      assert!((-128..=127).contains(&s));
      sum += s as f64;
      sum_sq += (s * s) as f64;
    }
    let mean = sum / n as f64;
    let std = (sum_sq / n as f64 - mean * mean).sqrt();
    assert!(mean.abs() < 0.15, "mean drifted: {}", mean);
    assert!((std - GAUSS_SIGMA).abs() < 0.15, "sigma drifted: {}", std);
  }

  #[test]
  fn gauss_buckets_are_symmetric() {
    let (mut prg, _) = Prg::from_random_key();
    let mut buckets = [0u32; GAUSS_SUPPORT];
    for _ in 0..1_000_000 {
      buckets[(prg.gauss_sample() + 128) as usize] += 1;
    }
    // The central bucket dominates and +/-k buckets roughly agree.
    assert!(buckets[128] > buckets[140]);
    for k in 1..8usize {
      let lo = buckets[128 - k] as f64;
      let hi = buckets[128 + k] as f64;
      assert!((lo - hi).abs() < 0.2 * (lo + hi));
    }
  }
}
