//! Seeded random source — string-seeded, platform-independent pseudo-randomness.
//!
//! The seed string is folded into a 32-bit state with a murmur-style hash and
//! then stepped with a mulberry32 mixer. Only 32-bit wrapping integer math is
//! used, so a seed produces the same sequence on every platform. That is what
//! makes a shared seed replay the exact same endless pattern stream.

use rand::distributions::Alphanumeric;
use rand::{Rng, RngCore};

/// Length of seeds produced by [`generate_seed`].
pub const DEFAULT_SEED_LEN: usize = 8;

/// Deterministic pseudo-random generator created from an arbitrary string seed.
#[derive(Debug, Clone)]
pub struct SeededRandom {
    state: u32,
}

impl SeededRandom {
    /// Create a generator whose state is the hash of `seed`.
    pub fn new(seed: &str) -> Self {
        Self {
            state: hash_seed(seed),
        }
    }

    /// Next value in `[0, 1)`.
    pub fn random(&mut self) -> f64 {
        self.next_u32() as f64 / 4_294_967_296.0
    }

    /// Integer in `[min, max)`. Returns `min` when the range is empty.
    pub fn random_int(&mut self, min: i64, max: i64) -> i64 {
        if max <= min {
            return min;
        }
        let span = (max - min) as f64;
        min + (self.random() * span).floor() as i64
    }

    /// Uniformly chosen element, or `None` for an empty slice.
    pub fn pick<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        if items.is_empty() {
            return None;
        }
        let idx = self.random_int(0, items.len() as i64) as usize;
        items.get(idx)
    }

    /// Choose one element with probability proportional to `weight(item)`.
    ///
    /// Items with zero weight are never chosen. Returns `None` when the total
    /// weight is zero.
    pub fn pick_weighted<'a, T>(
        &mut self,
        items: &'a [T],
        weight: impl Fn(&T) -> u32,
    ) -> Option<&'a T> {
        let total: u64 = items.iter().map(|item| weight(item) as u64).sum();
        if total == 0 {
            return None;
        }
        let mut target = (self.random() * total as f64).floor() as u64;
        for item in items {
            let w = weight(item) as u64;
            if target < w {
                return Some(item);
            }
            target -= w;
        }
        items.iter().rev().find(|item| weight(item) > 0)
    }
}

impl RngCore for SeededRandom {
    fn next_u32(&mut self) -> u32 {
        self.state = self.state.wrapping_add(0x6D2B_79F5);
        let mut t = self.state;
        t = (t ^ (t >> 15)).wrapping_mul(1 | t);
        t = t.wrapping_add((t ^ (t >> 7)).wrapping_mul(61 | t)) ^ t;
        t ^ (t >> 14)
    }

    fn next_u64(&mut self) -> u64 {
        let lo = self.next_u32() as u64;
        let hi = self.next_u32() as u64;
        (hi << 32) | lo
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(4) {
            let bytes = self.next_u32().to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

/// Fold a seed string into a 32-bit state (xmur3 mixing over UTF-8 bytes).
fn hash_seed(seed: &str) -> u32 {
    let mut h: u32 = 1_779_033_703 ^ seed.len() as u32;
    for &byte in seed.as_bytes() {
        h = (h ^ byte as u32).wrapping_mul(3_432_918_353);
        h = h.rotate_left(13);
    }
    h = (h ^ (h >> 16)).wrapping_mul(2_246_822_507);
    h = (h ^ (h >> 13)).wrapping_mul(3_266_489_909);
    h ^ (h >> 16)
}

/// Draw a fresh shareable seed of `len` alphanumeric characters.
pub fn generate_seed<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    (0..len).map(|_| rng.sample(Alphanumeric) as char).collect()
}
