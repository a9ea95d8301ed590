//! Error types.
//!
//! The raw allocation paths never return these: they signal every failure with
//! `None`. The typed variants exist for callers that want the reason
//! (`PolicyAllocator::try_allocate`, `Singleton::init`) and for validating
//! alternative size-class tables.

use thiserror::Error;

/// Why an allocation request was not served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    /// A request for zero elements or zero bytes.
    #[error("zero-sized request")]
    ZeroSized,
    /// `count * elem_size` does not fit in `usize`.
    #[error("{count} elements of {elem_size} bytes overflow the address space")]
    CapacityOverflow { count: usize, elem_size: usize },
    /// The element type needs stricter alignment than the policy guarantees.
    #[error("alignment {align} exceeds the policy guarantee of {guaranteed}")]
    UnsupportedAlignment { align: usize, guaranteed: usize },
    /// The policy returned no memory.
    #[error("policy could not serve {size} bytes")]
    Exhausted { size: usize },
    /// `Singleton::init` lost to an earlier initialization.
    #[error("singleton already initialized")]
    AlreadyInitialized,
}

/// Convenience alias for results carrying [`AllocError`].
pub type AllocResult<T> = Result<T, AllocError>;

/// Rejection reasons for a custom size-class table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MappingError {
    #[error("base size must be non-zero")]
    ZeroBaseSize,
    #[error("base size {base_size} times the class count overflows usize")]
    BaseSizeOverflow { base_size: usize },
    #[error("table decreases at index {index}: {prev} -> {next}")]
    Decreasing {
        index: usize,
        prev: usize,
        next: usize,
    },
    #[error("class {class} at index {index} is beyond the fallback sentinel")]
    ClassOutOfRange { index: usize, class: usize },
    /// The class block is smaller than the largest request in its bucket.
    #[error("class {class} cannot hold requests of bucket {index}")]
    Undersized { index: usize, class: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_carry_context() {
        let err = AllocError::CapacityOverflow {
            count: usize::MAX,
            elem_size: 8,
        };
        assert!(err.to_string().contains("8 bytes"));

        let err = MappingError::Decreasing {
            index: 7,
            prev: 9,
            next: 3,
        };
        assert_eq!(err.to_string(), "table decreases at index 7: 9 -> 3");
    }
}
