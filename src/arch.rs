//! Architecture-specific register snapshots and switch routines.
//!
//! Every item here is re-exported from the module matching the target:
//! - `Registers`: callee-saved register block saved and restored by a switch
//! - `Registers::prepare`: initial frame for a context that has never run
//! - `switch`: save the current registers and load another block

#[cfg(target_arch = "x86_64")]
mod x86_64;
#[cfg(target_arch = "x86_64")]
pub(crate) use x86_64::*;

#[cfg(target_arch = "aarch64")]
mod aarch64;
#[cfg(target_arch = "aarch64")]
pub(crate) use aarch64::*;

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
compile_error!("myfiber only supports x86_64 and aarch64");
