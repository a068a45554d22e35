//! Random source collaborator
//!
//! Supplies the three trailing characters of an account number. Collisions
//! are acceptable: uniqueness is enforced by the store, not by the source.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Alphabet account-number suffixes are drawn from
pub const ALPHANUMERIC: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Source of random alphanumeric strings
pub trait RandomSource: Send + Sync {
    /// `len` characters drawn uniformly from [`ALPHANUMERIC`]
    fn random_alphanumeric(&self, len: usize) -> String;
}

fn draw<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    (0..len)
        .map(|_| char::from(ALPHANUMERIC[rng.gen_range(0..ALPHANUMERIC.len())]))
        .collect()
}

/// Thread-local random source
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn random_alphanumeric(&self, len: usize) -> String {
        draw(&mut rand::thread_rng(), len)
    }
}

/// Deterministic random source for tests and reproducible runs
#[derive(Debug)]
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl RandomSource for SeededRandom {
    fn random_alphanumeric(&self, len: usize) -> String {
        draw(&mut *self.rng.lock(), len)
    }
}

/// Replays a fixed list of strings, then falls back to a seeded source
///
/// Used to force account-number collisions in tests.
#[derive(Debug)]
pub struct ScriptedRandom {
    scripted: Mutex<std::collections::VecDeque<String>>,
    fallback: SeededRandom,
}

impl ScriptedRandom {
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            scripted: Mutex::new(values.into_iter().map(Into::into).collect()),
            fallback: SeededRandom::new(0),
        }
    }
}

impl RandomSource for ScriptedRandom {
    fn random_alphanumeric(&self, len: usize) -> String {
        match self.scripted.lock().pop_front() {
            Some(value) => value,
            None => self.fallback.random_alphanumeric(len),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_random_uses_alphabet() {
        let value = ThreadRandom.random_alphanumeric(64);
        assert_eq!(value.len(), 64);
        assert!(value.bytes().all(|byte| ALPHANUMERIC.contains(&byte)));
    }

    #[test]
    fn test_seeded_random_is_deterministic() {
        let first = SeededRandom::new(7);
        let second = SeededRandom::new(7);
        for _ in 0..10 {
            assert_eq!(first.random_alphanumeric(3), second.random_alphanumeric(3));
        }
    }

    #[test]
    fn test_scripted_random_replays_then_falls_back() {
        let source = ScriptedRandom::new(["AAA", "BBB"]);
        assert_eq!(source.random_alphanumeric(3), "AAA");
        assert_eq!(source.random_alphanumeric(3), "BBB");

        let fallback = source.random_alphanumeric(3);
        assert_eq!(fallback.len(), 3);
        assert!(fallback.bytes().all(|byte| ALPHANUMERIC.contains(&byte)));
    }
}
