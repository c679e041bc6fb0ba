//! Platform-independent execution contexts.
//!
//! An [`ExecutionContext`] is an opaque snapshot of the callee-saved
//! registers and stack pointer of a suspended flow of control. It supports:
//! - [`ExecutionContext::capture`]: a save slot for the flow that is running now
//! - [`ExecutionContext::bind`]: start a function on a fresh stack when activated
//! - [`ExecutionContext::swap`]: save the running flow and activate another one
//!
//! The register layout and the switch itself live in `crate::arch`.

use crate::arch::{self, Registers};

/// Function started on a fresh stack the first time a bound context is
/// activated. It receives the argument given to [`ExecutionContext::bind`].
pub type Entry = extern "C" fn(usize) -> !;

/// Smallest stack region [`ExecutionContext::bind`] accepts.
pub const MIN_BIND_SIZE: usize = 256;

/// Saved register state of a suspended flow of control.
#[repr(transparent)]
#[derive(Debug, Default)]
pub struct ExecutionContext {
    regs: Registers,
}

impl ExecutionContext {
    /// Create a context for the flow that is currently running.
    ///
    /// The snapshot is taken lazily: the first [`swap`](Self::swap) away from
    /// the caller stores the live registers here.
    pub fn capture() -> Self {
        Self::default()
    }

    /// Bind this context to a stack region and an entry function.
    ///
    /// Activating the context afterwards runs `entry(arg)` on the stack
    /// `stack_base .. stack_base + stack_size`. Any state previously held by
    /// the context is discarded.
    ///
    /// # Safety
    /// The stack region must be writable, must not be in use by any running
    /// flow, and must outlive every activation of this context.
    pub unsafe fn bind(&mut self, stack_base: *mut u8, stack_size: usize, entry: Entry, arg: usize) {
        assert!(
            stack_size >= MIN_BIND_SIZE,
            "stack of {stack_size} bytes is too small to bind a context"
        );

        // Stack grows downward, so we start at the top, aligned to 16 bytes
        let stack_top = (stack_base as usize + stack_size) & !0xF;

        unsafe { self.regs.prepare(stack_top, entry as usize, arg) };
    }

    /// Save the running flow into `current` and activate `target`.
    ///
    /// Returns when some later `swap` activates `current` again.
    ///
    /// # Safety
    /// `current` must be valid for writes and `target` must hold either a
    /// suspended flow or a bound, never-activated context whose stack is
    /// still alive. Neither may be accessed through another path while the
    /// switch is in progress.
    pub unsafe fn swap(current: *mut ExecutionContext, target: *const ExecutionContext) {
        unsafe { arch::switch(current.cast::<Registers>(), target.cast::<Registers>()) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::Stack;

    struct PingPong {
        main: ExecutionContext,
        worker: ExecutionContext,
        hits: usize,
        arg_seen: usize,
    }

    extern "C" fn ping(arg: usize) -> ! {
        let pp = arg as *mut PingPong;
        unsafe { (*pp).arg_seen = arg };
        loop {
            unsafe {
                (*pp).hits += 1;
                ExecutionContext::swap(&raw mut (*pp).worker, &raw const (*pp).main);
            }
        }
    }

    #[test]
    fn swap_enters_bound_entry_and_comes_back() {
        let stack = Stack::new(64 * 1024).unwrap();
        let pp = Box::into_raw(Box::new(PingPong {
            main: ExecutionContext::capture(),
            worker: ExecutionContext::capture(),
            hits: 0,
            arg_seen: 0,
        }));

        unsafe {
            (*pp).worker.bind(stack.base().as_ptr(), stack.size(), ping, pp as usize);

            for expected in 1..=3 {
                ExecutionContext::swap(&raw mut (*pp).main, &raw const (*pp).worker);
                assert_eq!((*pp).hits, expected);
            }
            assert_eq!((*pp).arg_seen, pp as usize);

            drop(Box::from_raw(pp));
        }
    }

    #[test]
    fn rebinding_restarts_the_entry() {
        let stack = Stack::new(64 * 1024).unwrap();
        let pp = Box::into_raw(Box::new(PingPong {
            main: ExecutionContext::capture(),
            worker: ExecutionContext::capture(),
            hits: 0,
            arg_seen: 0,
        }));

        unsafe {
            (*pp).worker.bind(stack.base().as_ptr(), stack.size(), ping, pp as usize);
            ExecutionContext::swap(&raw mut (*pp).main, &raw const (*pp).worker);

            // The suspended frame is abandoned and `ping` starts over.
            (*pp).arg_seen = 0;
            (*pp).worker.bind(stack.base().as_ptr(), stack.size(), ping, pp as usize);
            ExecutionContext::swap(&raw mut (*pp).main, &raw const (*pp).worker);

            assert_eq!((*pp).hits, 2);
            assert_eq!((*pp).arg_seen, pp as usize);

            drop(Box::from_raw(pp));
        }
    }

    #[test]
    #[should_panic(expected = "too small")]
    fn bind_rejects_tiny_stacks() {
        let mut buf = [0u8; 64];
        let mut ctx = ExecutionContext::capture();
        unsafe { ctx.bind(buf.as_mut_ptr(), buf.len(), ping, 0) };
    }
}
