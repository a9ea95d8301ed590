//! Size-class table as data.

use polyalloc_core::{CLASSES, FALLBACK, SizeClassMap};
use serde::{Deserialize, Serialize};

/// One bucket of the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassRow {
    pub index: usize,
    /// Inclusive request sizes falling in this bucket.
    pub size_range: (usize, usize),
    /// Class number; [`FALLBACK`] for the fallback policy.
    pub class: usize,
    /// Block size of the serving pool, `None` for the fallback.
    pub block_size: Option<usize>,
    /// Worst-case unused bytes per block in this bucket.
    pub max_waste: Option<usize>,
}

impl ClassRow {
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        self.class == FALLBACK
    }
}

/// One row per table entry, in bucket order.
#[must_use]
pub fn classification_table(map: &SizeClassMap) -> Vec<ClassRow> {
    let base = map.base_size();
    (0..CLASSES)
        .map(|index| {
            let low = index * base + 1;
            let high = (index + 1) * base;
            let class = map.classify(high);
            let block_size = map.class_size(class);
            ClassRow {
                index,
                size_range: (low, high),
                class,
                block_size,
                max_waste: block_size.map(|block| block - low),
            }
        })
        .collect()
}
