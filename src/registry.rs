//! Per-thread fiber registry.
//!
//! A [`FiberRegistry`] records which fiber is running and which fiber is the
//! main fiber, hands out fiber ids and counts live fibers. Every worker fiber
//! holds a handle to the registry it was created with, and all switches go
//! through that registry's main fiber.
//!
//! There is exactly one registry per thread, reached through
//! [`FiberRegistry::local`]; the crate-level [`current`], [`total_fibers`]
//! and [`yield_now`] functions use the same one. Registries are `!Send`, so
//! a fiber never leaves the thread whose main fiber it switches with.
//!
//! ```compile_fail
//! // A second registry would bring a second main fiber to the thread.
//! let registry = myfiber::FiberRegistry::new();
//! ```
//!
//! [`current`]: crate::current
//! [`total_fibers`]: crate::total_fibers
//! [`yield_now`]: crate::yield_now

use std::cell::{Cell, OnceCell};
use std::fmt;
use std::ptr;
use std::rc::Rc;

use crate::fiber::{Fiber, FiberHandle, FiberId};

thread_local! {
    static LOCAL: FiberRegistry = FiberRegistry::new();
}

/// Handle to the fiber bookkeeping of one thread. Clones share state.
#[derive(Clone)]
pub struct FiberRegistry {
    inner: Rc<Inner>,
}

struct Inner {
    /// Fiber executing right now. Non-owning; null until the main fiber exists.
    current: Cell<*const Fiber>,
    /// Created on first use, lives as long as the registry.
    main: OnceCell<FiberHandle>,
    next_id: Cell<u64>,
    live: Cell<usize>,
}

/// Runs `f` on this thread's registry without taking a new handle to it.
pub(crate) fn with_local<R>(f: impl FnOnce(&FiberRegistry) -> R) -> R {
    LOCAL.with(f)
}

impl FiberRegistry {
    fn new() -> Self {
        FiberRegistry {
            inner: Rc::new(Inner {
                current: Cell::new(ptr::null()),
                main: OnceCell::new(),
                next_id: Cell::new(0),
                live: Cell::new(0),
            }),
        }
    }

    /// The calling thread's registry.
    pub fn local() -> Self {
        LOCAL.with(FiberRegistry::clone)
    }

    /// Returns the fiber currently running.
    ///
    /// On first use this creates the main fiber, which stands for the
    /// caller's flow of control, and records it as current.
    pub fn current(&self) -> FiberHandle {
        let current = self.current_ptr();
        // SAFETY: `current` came from `Rc::as_ptr` of a live fiber: either the
        // main fiber held by `self`, or a running worker, whose owner cannot
        // drop it while it runs.
        unsafe {
            Rc::increment_strong_count(current);
            Rc::from_raw(current)
        }
    }

    /// Returns the main fiber, creating it on first use.
    pub fn main_fiber(&self) -> FiberHandle {
        Rc::clone(self.main_handle())
    }

    /// Whether a worker fiber is running.
    pub fn in_fiber(&self) -> bool {
        !ptr::eq(self.current_ptr(), self.main())
    }

    /// Fibers created through this registry minus those dropped, counting
    /// the main fiber once it exists.
    pub fn total_fibers(&self) -> usize {
        self.inner.live.get()
    }

    /// Yield the running worker fiber back to the main fiber.
    ///
    /// # Panics
    /// If called from the main fiber.
    pub fn yield_now(&self) {
        let current = self.current_ptr();
        assert!(
            !ptr::eq(current, self.main()),
            "yield_now called from the main fiber"
        );
        // SAFETY: a running worker is kept alive by its owner; no owning
        // handle is taken so none is held across the switch.
        unsafe { (*current).yield_now() };
    }

    pub(crate) fn main(&self) -> &Fiber {
        self.main_handle()
    }

    pub(crate) fn current_ptr(&self) -> *const Fiber {
        self.main_handle();
        self.inner.current.get()
    }

    /// Only `resume` and `yield_now` call this, right before they switch.
    pub(crate) fn set_current(&self, fiber: &Fiber) {
        self.inner.current.set(fiber);
    }

    pub(crate) fn next_id(&self) -> FiberId {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        FiberId::new(id)
    }

    pub(crate) fn fiber_created(&self) {
        self.inner.live.set(self.inner.live.get() + 1);
    }

    pub(crate) fn fiber_dropped(&self) {
        self.inner.live.set(self.inner.live.get() - 1);
    }

    fn main_handle(&self) -> &FiberHandle {
        self.inner.main.get_or_init(|| {
            let main = Rc::new(Fiber::new_main(self.next_id()));
            self.inner.current.set(Rc::as_ptr(&main));
            self.fiber_created();
            log::debug!("main fiber {} created", main.id());
            main
        })
    }
}

impl fmt::Debug for FiberRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberRegistry")
            .field("main", &self.inner.main.get().map(|main| main.id()))
            .field("next_id", &self.inner.next_id.get())
            .field("live", &self.inner.live.get())
            .finish()
    }
}
