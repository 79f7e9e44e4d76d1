use std::collections::{HashSet, VecDeque};

use base64::prelude::*;
use parking_lot::Mutex;
use rand::RngCore as _;

/// Issued nonces kept beyond this many are evicted oldest-first.
const DEFAULT_CEILING: usize = 1 << 16;

/// Pool of single-use anti-replay tokens.
///
/// Issue-side state only: a consumed nonce is simply forgotten, so replays
/// and unknown nonces are indistinguishable (both fail).
#[derive(Debug)]
pub struct NoncePool {
    ceiling: usize,
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    /// Insertion order, for eviction. May contain already-consumed entries;
    /// they are skipped when evicting.
    order: VecDeque<String>,

    /// Issued and not yet consumed.
    live: HashSet<String>,
}

impl Default for NoncePool {
    fn default() -> Self {
        Self::new()
    }
}

impl NoncePool {
    pub fn new() -> Self {
        Self::with_ceiling(DEFAULT_CEILING)
    }

    pub fn with_ceiling(ceiling: usize) -> Self {
        NoncePool {
            ceiling,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Produces a fresh 128-bit token and records it as issued.
    pub fn issue(&self) -> String {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        let nonce = BASE64_URL_SAFE_NO_PAD.encode(bytes);

        let mut inner = self.inner.lock();
        inner.order.push_back(nonce.clone());
        inner.live.insert(nonce.clone());

        while inner.order.len() > self.ceiling {
            if let Some(oldest) = inner.order.pop_front() {
                inner.live.remove(&oldest);
            }
        }

        log::trace!("issued nonce ({} live)", inner.live.len());

        nonce
    }

    /// Atomically transitions a nonce from issued to consumed.
    ///
    /// Returns false for nonces that were never issued, were already
    /// consumed, or were evicted.
    pub fn consume(&self, nonce: &str) -> bool {
        self.inner.lock().live.remove(nonce)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nonce_is_single_use() {
        let pool = NoncePool::new();
        let nonce = pool.issue();

        assert!(pool.consume(&nonce));
        assert!(!pool.consume(&nonce));
    }

    #[test]
    fn test_unknown_nonce_fails() {
        let pool = NoncePool::new();
        assert!(!pool.consume("AAAAAAAAAAAAAAAAAAAAAA"));
    }

    #[test]
    fn test_nonces_are_unique() {
        let pool = NoncePool::new();
        let a = pool.issue();
        let b = pool.issue();
        assert_ne!(a, b);
    }

    #[test]
    fn test_eviction_of_oldest() {
        let pool = NoncePool::with_ceiling(2);
        let first = pool.issue();
        let second = pool.issue();
        let third = pool.issue();

        assert!(!pool.consume(&first));
        assert!(pool.consume(&second));
        assert!(pool.consume(&third));
    }

    #[test]
    fn test_concurrent_consume_single_winner() {
        use std::sync::Arc;

        let pool = Arc::new(NoncePool::new());
        let nonce = pool.issue();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let nonce = nonce.clone();
                std::thread::spawn(move || pool.consume(&nonce))
            })
            .collect();

        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();

        assert_eq!(wins, 1);
    }
}
