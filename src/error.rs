//! Recoverable fiber errors.
//!
//! Only construction can fail recoverably. Protocol violations panic and
//! context failures abort the process.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FiberError {
    #[error("failed to allocate a {size}-byte fiber stack")]
    StackAllocation {
        size: usize,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, FiberError>;
