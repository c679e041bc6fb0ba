//! Stackful cooperative fibers for a single OS thread.
//!
//! - [`context`]: save/restore of register snapshots, the only
//!   architecture-specific part
//! - [`stack`]: page-rounded stacks owned by worker fibers
//! - [`fiber`]: the fiber state machine and the resume/yield switch protocol
//! - [`registry`]: per-thread tracking of the current and main fiber
//! - [`scheduler`]: a first-come-first-served driver
//!
//! Every switch goes between a worker fiber and its thread's main fiber;
//! workers never switch to each other directly.
//!
//! # Example
//!
//! ```no_run
//! use myfiber::{FiberRegistry, FiberState, Scheduler};
//!
//! let mut scheduler = Scheduler::new(FiberRegistry::local());
//! let fiber = scheduler.spawn(|| println!("Fiber: hello")).unwrap();
//!
//! scheduler.run();
//! assert_eq!(fiber.state(), FiberState::Terminated);
//! ```

mod arch;
pub mod context;
pub mod error;
pub mod fiber;
pub mod registry;
pub mod scheduler;
pub mod stack;

pub use error::{FiberError, Result};
pub use fiber::{DEFAULT_STACK_SIZE, Fiber, FiberBuilder, FiberHandle, FiberId, FiberState};
pub use registry::FiberRegistry;
pub use scheduler::Scheduler;

/// Returns the fiber running on this thread, creating the thread's main
/// fiber on first use.
pub fn current() -> FiberHandle {
    registry::with_local(FiberRegistry::current)
}

/// Live fibers of this thread's registry.
pub fn total_fibers() -> usize {
    registry::with_local(FiberRegistry::total_fibers)
}

/// Yield the running fiber of this thread's registry back to the main fiber.
///
/// The registry is borrowed for the switch; no handle to it stays on the
/// suspended fiber's stack.
///
/// # Panics
/// If called from the main fiber.
pub fn yield_now() {
    registry::with_local(FiberRegistry::yield_now)
}
