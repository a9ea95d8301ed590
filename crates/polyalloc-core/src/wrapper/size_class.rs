//! Size-class table for the router.
//!
//! A request of `size` bytes falls in bucket `(size - 1) / base_size`; the
//! table maps each of the 32 buckets to a class, and class `c` is served by a
//! pool of `(c + 1) * base_size` bytes. Buckets past the table, and any entry
//! equal to [`FALLBACK`], go to the fallback policy.
//!
//! The default table keeps exact granularity for the four smallest buckets
//! and then merges buckets in pairs onto the larger class:
//!
//! ```text
//! bucket: 0 1 2 3 | 4 5 | 6 7 | ... | 30 31
//! class : 0 1 2 3 | 5 5 | 7 7 | ... | 31 31
//! ```
//!
//! That halves the pool count above `4 * base_size` for at most one
//! `base_size` of internal waste per block.

use crate::error::MappingError;

/// Number of table entries, and the fallback sentinel value.
pub const CLASSES: usize = 32;

/// Class value meaning "no fixed pool, use the fallback".
pub const FALLBACK: usize = CLASSES;

/// Default granularity: one pointer width.
pub const DEFAULT_BASE_SIZE: usize = std::mem::size_of::<usize>();

/// Default bucket-to-class table.
pub const DEFAULT_TABLE: [usize; CLASSES] = [
    0, 1, 2, 3, // exact
    5, 5, 7, 7, 9, 9, 11, 11, 13, 13, 15, 15, // pairs
    17, 17, 19, 19, 21, 21, 23, 23, 25, 25, 27, 27, 29, 29, 31, 31,
];

/// A validated granularity plus bucket-to-class table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SizeClassMap {
    base_size: usize,
    table: &'static [usize; CLASSES],
}

impl SizeClassMap {
    /// Pointer-width granularity with [`DEFAULT_TABLE`].
    pub const DEFAULT: Self = Self {
        base_size: DEFAULT_BASE_SIZE,
        table: &DEFAULT_TABLE,
    };

    /// Validates an alternative granularity and table.
    ///
    /// The table must be non-decreasing, hold classes no larger than
    /// [`FALLBACK`], and give every bucket a class whose block can hold the
    /// bucket's largest request.
    pub fn new(base_size: usize, table: &'static [usize; CLASSES]) -> Result<Self, MappingError> {
        if base_size == 0 {
            return Err(MappingError::ZeroBaseSize);
        }
        if base_size.checked_mul(CLASSES).is_none() {
            return Err(MappingError::BaseSizeOverflow { base_size });
        }
        for (index, &class) in table.iter().enumerate() {
            if class > FALLBACK {
                return Err(MappingError::ClassOutOfRange { index, class });
            }
            if class < index {
                return Err(MappingError::Undersized { index, class });
            }
            if index > 0 && class < table[index - 1] {
                return Err(MappingError::Decreasing {
                    index,
                    prev: table[index - 1],
                    next: class,
                });
            }
        }
        Ok(Self { base_size, table })
    }

    /// The default table at a different granularity.
    pub fn with_base_size(base_size: usize) -> Result<Self, MappingError> {
        Self::new(base_size, &DEFAULT_TABLE)
    }

    #[must_use]
    pub const fn base_size(&self) -> usize {
        self.base_size
    }

    #[must_use]
    pub const fn table(&self) -> &'static [usize; CLASSES] {
        self.table
    }

    /// Class serving a `size`-byte request, or [`FALLBACK`].
    ///
    /// `size == 0` wraps to the largest bucket and so maps to the fallback.
    #[must_use]
    pub const fn classify(&self, size: usize) -> usize {
        let index = size.wrapping_sub(1) / self.base_size;
        if index < CLASSES {
            self.table[index]
        } else {
            FALLBACK
        }
    }

    /// Block size of `class`, or `None` for the fallback sentinel.
    #[must_use]
    pub const fn class_size(&self, class: usize) -> Option<usize> {
        if class < CLASSES {
            Some((class + 1) * self.base_size)
        } else {
            None
        }
    }

    /// Largest request a fixed pool serves.
    #[must_use]
    pub const fn max_fixed_size(&self) -> usize {
        CLASSES * self.base_size
    }

    /// Distinct fixed classes the table uses, ascending.
    pub fn classes(&self) -> impl Iterator<Item = usize> + '_ {
        let table = self.table;
        table
            .iter()
            .enumerate()
            .filter(move |&(i, &class)| class < FALLBACK && (i == 0 || table[i - 1] != class))
            .map(|(_, &class)| class)
    }
}

impl Default for SizeClassMap {
    fn default() -> Self {
        Self::DEFAULT
    }
}
