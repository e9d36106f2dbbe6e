//! Id factories.
//!
//! `IdFactory` hands out sequential numeric ids, `AlphaNumFactory` hands out
//! fixed-width base-36 strings, and the free functions produce random ids.
//! Both factories are lock-free and can be shared across threads.

use std::sync::atomic::{AtomicU64, Ordering};

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::error::{Error, Result};

/// Digits used by [`AlphaNumFactory`], in ascending order.
const ALPHANUM_DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Sequential numeric id generator.
#[derive(Debug)]
pub struct IdFactory {
    next: AtomicU64,
}

impl IdFactory {
    /// Creates a factory whose first id is `start`.
    #[must_use]
    pub const fn new(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start),
        }
    }

    /// Returns the next id.
    ///
    /// # Errors
    /// Returns `Error::Exhausted` once `u64::MAX` has been handed out.
    pub fn next(&self) -> Result<u64> {
        self.next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                current.checked_add(1)
            })
            .map_err(|_| Error::Exhausted {
                resource: "numeric ids",
            })
    }

    /// Returns the next id converted into a typed id.
    ///
    /// # Errors
    /// Returns `Error::Exhausted` once the counter is spent.
    pub fn next_id<T: From<u64>>(&self) -> Result<T> {
        self.next().map(T::from)
    }

    /// Returns the id the next call to `next` would produce.
    #[must_use]
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

impl Default for IdFactory {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Fixed-width base-36 id generator: `"0000"`, `"0001"`, ..., `"000z"`, `"0010"`.
#[derive(Debug)]
pub struct AlphaNumFactory {
    width: usize,
    /// Number of distinct ids for this width, `None` if it exceeds `u64`.
    capacity: Option<u64>,
    next: AtomicU64,
}

impl AlphaNumFactory {
    /// Default id width.
    pub const DEFAULT_WIDTH: usize = 8;

    /// Creates a factory producing ids of [`Self::DEFAULT_WIDTH`] characters.
    #[must_use]
    pub fn new() -> Self {
        Self::build(Self::DEFAULT_WIDTH)
    }

    /// Creates a factory producing ids of `width` characters.
    ///
    /// # Errors
    /// Returns `Error::InvalidArgument` if `width` is zero.
    pub fn with_width(width: usize) -> Result<Self> {
        if width == 0 {
            return Err(Error::InvalidArgument {
                name: "width",
                reason: "must be positive",
            });
        }
        Ok(Self::build(width))
    }

    fn build(width: usize) -> Self {
        let capacity = u32::try_from(width)
            .ok()
            .and_then(|w| 36_u64.checked_pow(w));
        Self {
            width,
            capacity,
            next: AtomicU64::new(0),
        }
    }

    /// Returns the id width in characters.
    #[must_use]
    pub const fn width(&self) -> usize {
        self.width
    }

    /// Returns the next id.
    ///
    /// # Errors
    /// Returns `Error::Exhausted` once every id of this width has been used.
    pub fn next(&self) -> Result<String> {
        let capacity = self.capacity;
        let value = self
            .next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                let bumped = current.checked_add(1)?;
                match capacity {
                    Some(cap) if current >= cap => None,
                    _ => Some(bumped),
                }
            })
            .map_err(|_| Error::Exhausted {
                resource: "alphanumeric ids",
            })?;
        Ok(encode_base36(value, self.width))
    }
}

impl Default for AlphaNumFactory {
    fn default() -> Self {
        Self::new()
    }
}

/// Encodes `value` in base 36, left-padded with `'0'` to `width` characters.
fn encode_base36(mut value: u64, width: usize) -> String {
    let mut digits = vec![b'0'; width];
    for slot in digits.iter_mut().rev() {
        if value == 0 {
            break;
        }
        // Remainder is < 36, so the index cast is lossless.
        #[allow(clippy::cast_possible_truncation)]
        let digit = (value % 36) as usize;
        *slot = ALPHANUM_DIGITS[digit];
        value /= 36;
    }
    digits.into_iter().map(char::from).collect()
}

/// Returns a random `[0-9a-zA-Z]` string of `len` characters.
#[must_use]
pub fn random_alphanumeric(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Returns a random 64-bit id.
#[must_use]
pub fn random_id() -> u64 {
    rand::random()
}
