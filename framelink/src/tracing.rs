//! Tracing conveniences for crate-internal use.

/// The macros every module wants, importable in one line with
/// `use crate::tracing::prelude::*;`.
pub mod prelude {
    pub use ::tracing::{debug, error, info, trace, warn};
}
