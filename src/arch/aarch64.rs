//! aarch64 register snapshots and the switch between them.

use std::arch::naked_asm;
use std::mem::offset_of;

/// What a suspended fiber needs to continue under AAPCS64: x19-x28, the
/// frame and link registers, sp, and the low halves of v8-v15.
///
/// Fields are ordered so `switch` can move them in `stp`/`ldp` pairs. A
/// context that has never run carries its entry argument in `x19`, its
/// entry function in `x20` and `bootstrap` in `lr`.
#[repr(C)]
#[derive(Debug, Clone, Default)]
pub(crate) struct Registers {
    x19: u64,
    x20: u64,
    x21: u64,
    x22: u64,
    x23: u64,
    x24: u64,
    x25: u64,
    x26: u64,
    x27: u64,
    x28: u64,
    /// x29, zero in a fresh context.
    fp: u64,
    /// x30, where `switch` returns to.
    lr: u64,
    sp: u64,
    d8: u64,
    d9: u64,
    d10: u64,
    d11: u64,
    d12: u64,
    d13: u64,
    d14: u64,
    d15: u64,
}

impl Registers {
    /// Lay out a context that has never run.
    ///
    /// - `stack_top`: one past the highest usable byte, 16-byte aligned
    /// - `entry`: address of an `extern "C" fn(usize) -> !`
    /// - `arg`: first argument for `entry`
    ///
    /// # Safety
    /// `stack_top` must be the end of a stack region owned by the caller.
    pub(crate) unsafe fn prepare(&mut self, stack_top: usize, entry: usize, arg: usize) {
        // `ret` jumps to lr, so nothing has to be pushed on the new stack.
        let bootstrap: extern "C" fn() -> ! = bootstrap;
        *self = Registers {
            sp: stack_top as u64,
            lr: bootstrap as usize as u64,
            x19: arg as u64,
            x20: entry as u64,
            ..Default::default()
        };
    }
}

/// First code run on a fresh stack.
///
/// fp is zero here, which terminates frame-pointer walks. `entry` never
/// returns; if it does anyway, `brk` traps instead of running off the stack.
#[unsafe(naked)]
extern "C" fn bootstrap() -> ! {
    naked_asm!(
        "mov x0, x19",
        "blr x20",
        "brk #0",
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
        // x0 = current, x1 = target. sp cannot be stored directly.
        "stp x19, x20, [x0, #{x19}]",
        "stp x21, x22, [x0, #{x21}]",
        "stp x23, x24, [x0, #{x23}]",
        "stp x25, x26, [x0, #{x25}]",
        "stp x27, x28, [x0, #{x27}]",
        "stp x29, x30, [x0, #{fp}]",
        "mov x9, sp",
        "str x9, [x0, #{sp}]",
        "stp d8, d9, [x0, #{d8}]",
        "stp d10, d11, [x0, #{d10}]",
        "stp d12, d13, [x0, #{d12}]",
        "stp d14, d15, [x0, #{d14}]",
        "ldp d14, d15, [x1, #{d14}]",
        "ldp d12, d13, [x1, #{d12}]",
        "ldp d10, d11, [x1, #{d10}]",
        "ldp d8, d9, [x1, #{d8}]",
        "ldr x9, [x1, #{sp}]",
        "mov sp, x9",
        "ldp x29, x30, [x1, #{fp}]",
        "ldp x27, x28, [x1, #{x27}]",
        "ldp x25, x26, [x1, #{x25}]",
        "ldp x23, x24, [x1, #{x23}]",
        "ldp x21, x22, [x1, #{x21}]",
        "ldp x19, x20, [x1, #{x19}]",
        "ret",
        x19 = const offset_of!(Registers, x19),
        x21 = const offset_of!(Registers, x21),
        x23 = const offset_of!(Registers, x23),
        x25 = const offset_of!(Registers, x25),
        x27 = const offset_of!(Registers, x27),
        fp = const offset_of!(Registers, fp),
        sp = const offset_of!(Registers, sp),
        d8 = const offset_of!(Registers, d8),
        d10 = const offset_of!(Registers, d10),
        d12 = const offset_of!(Registers, d12),
        d14 = const offset_of!(Registers, d14),
    );
}
