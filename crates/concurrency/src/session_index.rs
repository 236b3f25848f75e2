//! Session index allocator
//!
//! Session indices are small integers in `1..=capacity` (0 is reserved) that
//! key a session's shared context. The pool is a lock-free bitmap: one bit
//! per index, claimed with compare-and-swap, plus a hint pointing at the word
//! where the last claim or release happened.

use hyperstore_core::{Error, Result, SessionIndex};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

const BITS: usize = 64;

/// Largest pool the `u16` index space allows
pub const MAX_CAPACITY: usize = u16::MAX as usize;

/// Bounded pool of reusable session indices
#[derive(Debug)]
pub struct SessionIndexPool {
    words: Box<[AtomicU64]>,
    capacity: usize,
    hint: AtomicUsize,
    in_use: AtomicUsize,
}

impl SessionIndexPool {
    /// Create a pool handing out indices `1..=capacity`
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `capacity` is 0 or above [`MAX_CAPACITY`].
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 || capacity > MAX_CAPACITY {
            return Err(Error::InvalidArgument(format!(
                "session pool capacity must be in 1..={}, got {}",
                MAX_CAPACITY, capacity
            )));
        }
        let word_count = (capacity + BITS - 1) / BITS;
        let words = (0..word_count).map(|_| AtomicU64::new(0)).collect();
        Ok(Self {
            words,
            capacity,
            hint: AtomicUsize::new(0),
            in_use: AtomicUsize::new(0),
        })
    }

    /// Number of indices the pool can hand out
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of indices currently held
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }

    /// Bits of word `w` that map to valid indices
    fn valid_mask(&self, w: usize) -> u64 {
        let remaining = self.capacity - w * BITS;
        if remaining >= BITS {
            u64::MAX
        } else {
            (1u64 << remaining) - 1
        }
    }

    /// Claim a free index
    ///
    /// # Errors
    ///
    /// `SessionLimitReached` when every index is in use.
    pub fn acquire(&self) -> Result<SessionIndex> {
        let word_count = self.words.len();
        let start = self.hint.load(Ordering::Relaxed) % word_count;

        for step in 0..word_count {
            let w = (start + step) % word_count;
            let mask = self.valid_mask(w);
            let word = &self.words[w];
            let mut current = word.load(Ordering::Acquire);

            loop {
                let free = !current & mask;
                if free == 0 {
                    break;
                }
                let bit = free.trailing_zeros() as usize;
                match word.compare_exchange_weak(
                    current,
                    current | (1u64 << bit),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        self.hint.store(w, Ordering::Relaxed);
                        self.in_use.fetch_add(1, Ordering::AcqRel);
                        // position + 1 <= capacity <= u16::MAX
                        return Ok(SessionIndex((w * BITS + bit + 1) as u16));
                    }
                    Err(actual) => current = actual,
                }
            }
        }

        Err(Error::SessionLimitReached {
            capacity: self.capacity,
        })
    }

    /// Return an index to the pool
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if the index is outside the pool
    /// - `InvalidState` if the index is not currently held
    pub fn release(&self, index: SessionIndex) -> Result<()> {
        let raw = index.get() as usize;
        if raw == 0 || raw > self.capacity {
            return Err(Error::InvalidArgument(format!(
                "session index {} outside 1..={}",
                raw, self.capacity
            )));
        }
        let position = raw - 1;
        let (w, bit) = (position / BITS, position % BITS);
        let previous = self.words[w].fetch_and(!(1u64 << bit), Ordering::AcqRel);
        if previous & (1u64 << bit) == 0 {
            return Err(Error::InvalidState(format!(
                "session index {} released twice",
                raw
            )));
        }
        self.in_use.fetch_sub(1, Ordering::AcqRel);
        self.hint.store(w, Ordering::Relaxed);
        Ok(())
    }

    /// Check whether an index is currently held
    pub fn is_in_use(&self, index: SessionIndex) -> bool {
        let raw = index.get() as usize;
        if raw == 0 || raw > self.capacity {
            return false;
        }
        let position = raw - 1;
        self.words[position / BITS].load(Ordering::Acquire) & (1u64 << (position % BITS)) != 0
    }
}
