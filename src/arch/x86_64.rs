//! x86_64 register snapshots and the switch between them.

use std::arch::naked_asm;
use std::mem::offset_of;

/// What a suspended fiber needs to continue: its stack pointer and the
/// System V callee-saved registers. Everything else was either spilled by
/// the compiler before calling `switch` or is dead at that point.
///
/// A context that has never run carries its entry function in `r14` and
/// the entry argument in `r15` until `bootstrap` picks them up.
#[repr(C)]
#[derive(Debug, Clone, Default)]
pub(crate) struct Registers {
    /// Points at the address `switch` returns to.
    rsp: u64,
    /// Zero in a fresh context.
    rbp: u64,
    rbx: u64,
    r12: u64,
    r13: u64,
    r14: u64,
    r15: u64,
}

impl Registers {
    /// Lay out a context that has never run.
    ///
    /// - `stack_top`: one past the highest usable byte, 16-byte aligned
    /// - `entry`: address of an `extern "C" fn(usize) -> !`
    /// - `arg`: first argument for `entry`
    ///
    /// # Safety
    /// `stack_top - 16 .. stack_top` must be writable memory owned by the caller.
    pub(crate) unsafe fn prepare(&mut self, stack_top: usize, entry: usize, arg: usize) {
        // The first switch into this context `ret`s into `bootstrap`, which
        // realigns the stack and calls `entry`, so `entry` observes the
        // usual 16n+8 stack pointer of a function that was just called.
        //
        //   stack_top - 8:  unused
        //   stack_top - 16: address of `bootstrap`, popped by `ret`
        let initial_rsp = stack_top - 16;
        let bootstrap: extern "C" fn() -> ! = bootstrap;

        unsafe {
            std::ptr::write(initial_rsp as *mut u64, bootstrap as usize as u64);
        }

        *self = Registers {
            rsp: initial_rsp as u64,
            r14: entry as u64,
            r15: arg as u64,
            ..Default::default()
        };
    }
}

/// First code run on a fresh stack.
///
/// rbp is zero here, which terminates frame-pointer walks. `entry` never
/// returns; if it does anyway, `ud2` traps instead of running off the stack.
#[unsafe(naked)]
extern "C" fn bootstrap() -> ! {
    naked_asm!(
        "and rsp, -16",
        "mov rdi, r15",
        "call r14",
        "ud2",
    );
}

/// Park the caller in `current` and continue `target`.
///
/// Returns once some later `switch` names `current` as its target. For a
/// target built by [`Registers::prepare`] the final `ret` lands in
/// `bootstrap`; for one parked by `switch` it lands right after that call.
///
/// # Safety
/// `current` must be writable and `target` must hold either a prepared
/// context or one parked by `switch` whose stack is still mapped.
#[unsafe(naked)]
pub(crate) unsafe extern "C" fn switch(_current: *mut Registers, _target: *const Registers) {
    naked_asm!(
        // rdi = current, rsi = target. rsp still points at our return address.
        "mov [rdi + {rsp}], rsp",
        "mov [rdi + {rbp}], rbp",
        "mov [rdi + {rbx}], rbx",
        "mov [rdi + {r12}], r12",
        "mov [rdi + {r13}], r13",
        "mov [rdi + {r14}], r14",
        "mov [rdi + {r15}], r15",
        "mov r15, [rsi + {r15}]",
        "mov r14, [rsi + {r14}]",
        "mov r13, [rsi + {r13}]",
        "mov r12, [rsi + {r12}]",
        "mov rbx, [rsi + {rbx}]",
        "mov rbp, [rsi + {rbp}]",
        "mov rsp, [rsi + {rsp}]",
        "ret",
        rsp = const offset_of!(Registers, rsp),
        rbp = const offset_of!(Registers, rbp),
        rbx = const offset_of!(Registers, rbx),
        r12 = const offset_of!(Registers, r12),
        r13 = const offset_of!(Registers, r13),
        r14 = const offset_of!(Registers, r14),
        r15 = const offset_of!(Registers, r15),
    );
}
