//! Logging macros every renderer file pulls in through `use crate::utils::*`

#[cfg(feature = "trace")]
pub use tracing::info_span;
#[allow(unused_imports)]
pub use tracing::{debug, error, info, trace, warn};

/// Rounds `value` up to the next multiple of `align` (which must be a power of two).
pub(crate) const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}
