//! Stackful cooperative fibers.
//!
//! A worker fiber runs a callback on its own stack. Control only moves
//! between a worker and the main fiber of its registry:
//!
//! ```text
//! Ready --resume--> Running --yield_now--> Ready
//! Running --(callback returns)--> Terminated --reset--> Ready
//! ```
//!
//! # Example
//!
//! ```no_run
//! use myfiber::{Fiber, FiberRegistry, FiberState};
//!
//! let registry = FiberRegistry::local();
//! let yielder = registry.clone();
//!
//! let fiber = Fiber::new(&registry, move || {
//!     println!("Fiber: start");
//!     yielder.yield_now();
//!     println!("Fiber: end");
//! })
//! .unwrap();
//!
//! fiber.resume();
//! assert_eq!(fiber.state(), FiberState::Ready);
//! fiber.resume();
//! assert_eq!(fiber.state(), FiberState::Terminated);
//! ```

use std::cell::{Cell, UnsafeCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::process;
use std::ptr::{self, NonNull};
use std::rc::Rc;

use crate::context::ExecutionContext;
use crate::error::{FiberError, Result};
use crate::registry::FiberRegistry;
use crate::stack::Stack;

/// Stack size used when none (or zero) is requested (128KB)
pub const DEFAULT_STACK_SIZE: usize = 128 * 1024;

/// Owning handle to a fiber.
pub type FiberHandle = Rc<Fiber>;

/// Unit of work run by a fiber, consumed once per activation.
type Callback = Box<dyn FnOnce() + 'static>;

/// Identifier of a fiber, unique within its registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FiberId(u64);

impl FiberId {
    pub(crate) const fn new(id: u64) -> Self {
        FiberId(id)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle state of a fiber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberState {
    /// Created, reset, or yielded; may be resumed.
    Ready,
    /// Executing on this thread right now.
    Running,
    /// The callback returned. Only `reset` leaves this state.
    Terminated,
}

/// A cooperative fiber with its own stack and execution context.
///
/// Fibers are `!Send`: a fiber, its stack and its registry stay on the
/// thread that created them.
pub struct Fiber {
    id: FiberId,
    state: Cell<FiberState>,
    context: UnsafeCell<ExecutionContext>,
    /// `None` for the main fiber, which runs on the thread's own stack.
    stack: Option<Stack>,
    callback: Cell<Option<Callback>>,
    run_in_scheduler: bool,
    /// `None` for the main fiber, which the registry owns.
    registry: Option<FiberRegistry>,
}

impl Fiber {
    /// Create a worker fiber with the default configuration.
    pub fn new<F>(registry: &FiberRegistry, f: F) -> Result<FiberHandle>
    where
        F: FnOnce() + 'static,
    {
        FiberBuilder::new().build(registry, f)
    }

    /// Configure a worker fiber before creating it.
    pub fn builder() -> FiberBuilder {
        FiberBuilder::new()
    }

    /// The main fiber of a registry: it stands for the thread's own
    /// flow of control and is already running when created.
    pub(crate) fn new_main(id: FiberId) -> Fiber {
        Fiber {
            id,
            state: Cell::new(FiberState::Running),
            context: UnsafeCell::new(ExecutionContext::capture()),
            stack: None,
            callback: Cell::new(None),
            run_in_scheduler: false,
            registry: None,
        }
    }

    fn new_worker(
        registry: &FiberRegistry,
        callback: Callback,
        stack_size: usize,
        run_in_scheduler: bool,
    ) -> Result<FiberHandle> {
        let stack_size = if stack_size == 0 {
            DEFAULT_STACK_SIZE
        } else {
            stack_size
        };
        let stack = Stack::new(stack_size).map_err(|source| FiberError::StackAllocation {
            size: stack_size,
            source,
        })?;

        let fiber = Rc::new(Fiber {
            id: registry.next_id(),
            state: Cell::new(FiberState::Ready),
            context: UnsafeCell::new(ExecutionContext::capture()),
            stack: Some(stack),
            callback: Cell::new(Some(callback)),
            run_in_scheduler,
            registry: Some(registry.clone()),
        });
        // The context is bound only once the fiber has its final address.
        fiber.bind_context();
        registry.fiber_created();

        log::debug!(
            "fiber {} created with a {}-byte stack",
            fiber.id,
            fiber.stack_size()
        );
        Ok(fiber)
    }

    pub fn id(&self) -> FiberId {
        self.id
    }

    pub fn state(&self) -> FiberState {
        self.state.get()
    }

    /// Whether this is the main fiber of its thread.
    pub fn is_main(&self) -> bool {
        self.stack.is_none()
    }

    /// Whether the fiber was created to be driven by a scheduler.
    pub fn run_in_scheduler(&self) -> bool {
        self.run_in_scheduler
    }

    /// Size of the fiber's stack in bytes, zero for the main fiber.
    pub fn stack_size(&self) -> usize {
        self.stack.as_ref().map_or(0, Stack::size)
    }

    /// Lowest address of the fiber's stack, `None` for the main fiber.
    pub fn stack_base(&self) -> Option<NonNull<u8>> {
        self.stack.as_ref().map(Stack::base)
    }

    /// Switch from the main fiber into this fiber.
    ///
    /// Returns once the fiber yields or its callback returns.
    ///
    /// # Panics
    /// If this is the main fiber, if the fiber is not `Ready`, or if the
    /// caller is not the main fiber.
    pub fn resume(&self) {
        let Some(registry) = &self.registry else {
            panic!("main fiber {} cannot be resumed", self.id);
        };
        assert!(
            self.state.get() == FiberState::Ready,
            "fiber {} resumed while {:?}",
            self.id,
            self.state.get()
        );

        let main = registry.main();
        let current = registry.current_ptr();
        assert!(
            ptr::eq(current, main),
            "fiber {} resumed from fiber {} instead of the main fiber",
            self.id,
            // SAFETY: the current fiber is alive while it runs.
            unsafe { (*current).id }
        );

        registry.set_current(self);
        main.state.set(FiberState::Ready);
        self.state.set(FiberState::Running);

        log::trace!("switch: main {} -> fiber {}", main.id, self.id);
        // SAFETY: main is the running flow and `self` is Ready, so its context
        // holds either a bound entry or the point where it last yielded.
        unsafe { ExecutionContext::swap(main.context.get(), self.context.get()) };
    }

    /// Switch from this fiber back to the main fiber.
    ///
    /// Marks the fiber `Ready` unless its callback already returned.
    ///
    /// # Panics
    /// If this is the main fiber, if the fiber is neither `Running` nor
    /// `Terminated`, or if it is not the fiber currently executing.
    pub fn yield_now(&self) {
        let Some(registry) = &self.registry else {
            panic!("main fiber {} cannot yield", self.id);
        };
        let state = self.state.get();
        assert!(
            matches!(state, FiberState::Running | FiberState::Terminated),
            "fiber {} yielded while {:?}",
            self.id,
            state
        );
        assert!(
            ptr::eq(registry.current_ptr(), self),
            "fiber {} yielded while another fiber is running",
            self.id
        );

        let main = registry.main();
        registry.set_current(main);
        main.state.set(FiberState::Running);
        if state != FiberState::Terminated {
            self.state.set(FiberState::Ready);
        }

        log::trace!("switch: fiber {} -> main {}", self.id, main.id);
        // SAFETY: this fiber is the running flow; main is suspended inside
        // the `resume` call that activated it.
        unsafe { ExecutionContext::swap(self.context.get(), main.context.get()) };
    }

    /// Reuse a terminated fiber's stack for a new callback.
    ///
    /// The id and the stack are kept, the state becomes `Ready`.
    ///
    /// # Panics
    /// If this is the main fiber or the fiber is not `Terminated`.
    pub fn reset<F>(&self, f: F)
    where
        F: FnOnce() + 'static,
    {
        assert!(!self.is_main(), "main fiber {} cannot be reset", self.id);
        assert!(
            self.state.get() == FiberState::Terminated,
            "fiber {} reset while {:?}",
            self.id,
            self.state.get()
        );

        self.callback.set(Some(Box::new(f)));
        self.bind_context();
        self.state.set(FiberState::Ready);

        log::debug!("fiber {} reset", self.id);
    }

    /// Point the context at the start of `fiber_entry` on this fiber's stack.
    fn bind_context(&self) {
        let Some(stack) = &self.stack else {
            return;
        };
        // SAFETY: the fiber is not running, so nothing lives on its stack that
        // is still needed, and the stack is dropped together with the context.
        unsafe {
            (*self.context.get()).bind(
                stack.base().as_ptr(),
                stack.size(),
                fiber_entry,
                self as *const Fiber as usize,
            );
        }
    }
}

/// Entry point for worker fibers
///
/// `arg` is a non-owning pointer to the fiber: its owner keeps it alive, and
/// dropping a running fiber aborts.
extern "C" fn fiber_entry(arg: usize) -> ! {
    // SAFETY: `arg` was produced by `bind_context` from a live fiber.
    let fiber = unsafe { &*(arg as *const Fiber) };

    if let Some(callback) = fiber.callback.take() {
        // A panic cannot unwind across the switch back to main.
        if panic::catch_unwind(AssertUnwindSafe(callback)).is_err() {
            log::error!("fiber {} panicked; aborting", fiber.id);
            process::abort();
        }
    }

    fiber.state.set(FiberState::Terminated);
    fiber.yield_now();

    // Only `reset` makes a terminated fiber runnable again, and it rebinds
    // the context, so this frame is never resumed.
    log::error!("terminated fiber {} was switched back into", fiber.id);
    process::abort();
}

impl Drop for Fiber {
    fn drop(&mut self) {
        if self.stack.is_some() {
            match self.state.get() {
                FiberState::Running => {
                    log::error!("fiber {} dropped while running on its own stack", self.id);
                    process::abort();
                }
                FiberState::Ready if self.callback.get_mut().is_none() => {
                    log::warn!(
                        "fiber {} dropped while suspended; values on its stack are leaked",
                        self.id
                    );
                }
                _ => {}
            }
        }

        if let Some(registry) = &self.registry {
            registry.fiber_dropped();
        }
        log::debug!("fiber {} dropped", self.id);
    }
}

impl fmt::Debug for Fiber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fiber")
            .field("id", &self.id)
            .field("state", &self.state.get())
            .field("main", &self.is_main())
            .field("stack_size", &self.stack_size())
            .field("run_in_scheduler", &self.run_in_scheduler)
            .finish()
    }
}

/// Worker fiber configuration.
///
/// ```no_run
/// use myfiber::{Fiber, FiberRegistry};
///
/// let registry = FiberRegistry::local();
/// let fiber = Fiber::builder()
///     .stack_size(256 * 1024)
///     .run_in_scheduler(false)
///     .build(&registry, || println!("hello"))
///     .unwrap();
/// fiber.resume();
/// ```
#[derive(Debug, Clone)]
pub struct FiberBuilder {
    stack_size: usize,
    run_in_scheduler: bool,
}

impl FiberBuilder {
    pub fn new() -> Self {
        FiberBuilder {
            stack_size: DEFAULT_STACK_SIZE,
            run_in_scheduler: true,
        }
    }

    /// Stack size in bytes, rounded up to whole pages. Zero selects
    /// [`DEFAULT_STACK_SIZE`].
    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = size;
        self
    }

    pub fn run_in_scheduler(mut self, run_in_scheduler: bool) -> Self {
        self.run_in_scheduler = run_in_scheduler;
        self
    }

    /// Allocate the stack and create a `Ready` fiber that will run `f`.
    pub fn build<F>(self, registry: &FiberRegistry, f: F) -> Result<FiberHandle>
    where
        F: FnOnce() + 'static,
    {
        Fiber::new_worker(registry, Box::new(f), self.stack_size, self.run_in_scheduler)
    }
}

impl Default for FiberBuilder {
    fn default() -> Self {
        Self::new()
    }
}
