//! # Architecture Port Layer
//!
//! Everything the kernel needs from the CPU is funnelled through the small
//! set of operations exported by `imp`:
//!
//! - `init()`: install handler priorities, reset critical-section state
//! - `start_tick()`: program the tick source at `config::TICK_RATE_HZ`
//! - `init_task_stack(top, entry, parameter)`: lay down the initial
//!   register frame a context-switch return will consume
//! - `start_first_task()`: restore-only launch of the first task
//! - `request_context_switch()`: pend the context-switch trap, callable
//!   from task or ISR context
//! - `critical_enter()` / `critical_leave()`: nesting kernel-priority
//!   interrupt mask
//! - `critical_enter_from_isr()` / `critical_leave_from_isr(token)`:
//!   mask save/restore variants safe in nested interrupt handlers
//! - `wait_for_interrupt()`: idle-loop low-power hint
//!
//! The Cortex-M4 port implements these with BASEPRI, PendSV, SVCall and
//! SysTick. Building for any other target selects the host port, which
//! keeps the same contract with masking reduced to a nesting counter so
//! the kernel logic can run inside unit tests on the development machine.

use core::marker::PhantomData;

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod cortex_m4;
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub(crate) use cortex_m4 as imp;

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
pub mod host;
#[cfg(not(all(target_arch = "arm", target_os = "none")))]
pub(crate) use host as imp;

/// Proof that the kernel critical section is held.
///
/// The token cannot be constructed outside [`critical_section`], so any
/// function that demands `&CriticalToken` is statically confined to code
/// running under the mask. It is `!Send` — it must not leak to another
/// execution context.
pub struct CriticalToken {
    _not_send: PhantomData<*const ()>,
}

/// Execute `f` with kernel-priority and lower interrupts masked.
///
/// Nestable; the mask is dropped only when the outermost section ends.
/// Interrupts above the kernel priority stay live throughout, which is
/// why they must never call into the kernel.
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(&CriticalToken) -> R,
{
    imp::critical_enter();
    let token = CriticalToken {
        _not_send: PhantomData,
    };
    let result = f(&token);
    imp::critical_leave();
    result
}
