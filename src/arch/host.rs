//! # Host Simulation Port
//!
//! Selected automatically when the crate is built for anything other than
//! a bare-metal ARM target. Supplies the full port contract with the
//! hardware pieces replaced by observable stand-ins, so the kernel's
//! scheduling and synchronization logic runs unmodified inside `cargo
//! test` on the development machine:
//!
//! - the critical section degrades to a nesting counter (tests drive the
//!   kernel single-threaded),
//! - `request_context_switch` latches a flag that tests drain with
//!   [`take_pending_switch`] and honor by calling the kernel's switch
//!   entry themselves, the way PendSV would,
//! - the initial stack frame has the same shape and alignment as the
//!   Cortex-M4 frame so stack accounting and canary placement match the
//!   real port.
//!
//! Port state is thread-local: each test thread gets an independent
//! pending-switch flag and nesting counter.
//!
//! Actually running task code requires real context switching, which the
//! host cannot do; `start_first_task` is therefore unreachable here.

use core::cell::Cell;

use crate::task::TaskEntry;

std::thread_local! {
    static CRITICAL_NESTING: Cell<u32> = const { Cell::new(0) };
    static SWITCH_PENDING: Cell<bool> = const { Cell::new(false) };
}

const INITIAL_XPSR: u32 = 0x0100_0000;
const INITIAL_EXC_RETURN: u32 = 0xFFFF_FFFD;

pub(crate) fn init() {
    CRITICAL_NESTING.with(|n| n.set(0));
    SWITCH_PENDING.with(|p| p.set(false));
}

pub(crate) fn start_tick() {
    // Tests drive time by calling the kernel tick handler directly.
}

pub(crate) fn critical_enter() {
    CRITICAL_NESTING.with(|n| n.set(n.get() + 1));
}

pub(crate) fn critical_leave() {
    CRITICAL_NESTING.with(|n| {
        if n.get() > 0 {
            n.set(n.get() - 1);
        }
    });
}

pub(crate) fn critical_enter_from_isr() -> u32 {
    let saved = CRITICAL_NESTING.with(|n| n.get());
    critical_enter();
    saved
}

pub(crate) fn critical_leave_from_isr(_saved: u32) {
    critical_leave();
}

/// Current nesting depth; lets tests assert balanced enter/leave pairs.
#[cfg(test)]
pub(crate) fn critical_nesting() -> u32 {
    CRITICAL_NESTING.with(|n| n.get())
}

pub(crate) fn request_context_switch() {
    SWITCH_PENDING.with(|p| p.set(true));
}

/// Consume the pending-switch flag. Test harnesses call the kernel's
/// switch entry when this returns true, mirroring PendSV.
#[cfg(test)]
pub(crate) fn take_pending_switch() -> bool {
    SWITCH_PENDING.with(|p| p.replace(false))
}

pub(crate) fn wait_for_interrupt() {}

/// Mirror of the Cortex-M4 initial frame: hardware frame (xPSR, PC, LR,
/// R12, R3–R0), saved EXC_RETURN, then R4–R11. The frame is never
/// executed on the host; only its extent and placement matter.
pub(crate) fn init_task_stack(
    stack_top: *mut u32,
    entry: TaskEntry,
    parameter: *mut (),
) -> *mut u32 {
    let mut sp = (stack_top as usize & !(crate::config::STACK_ALIGNMENT - 1)) as *mut u32;

    unsafe {
        sp = sp.sub(1);
        *sp = INITIAL_XPSR;
        sp = sp.sub(1);
        *sp = (entry as usize as u32) | 1;
        sp = sp.sub(1);
        *sp = crate::task::task_exit_trap as usize as u32; // LR
        sp = sp.sub(1);
        *sp = 0; // R12
        sp = sp.sub(1);
        *sp = 0; // R3
        sp = sp.sub(1);
        *sp = 0; // R2
        sp = sp.sub(1);
        *sp = 0; // R1
        sp = sp.sub(1);
        *sp = parameter as usize as u32; // R0
        sp = sp.sub(1);
        *sp = INITIAL_EXC_RETURN;
        for _ in 0..8 {
            sp = sp.sub(1);
            *sp = 0;
        }
    }

    sp
}

pub(crate) fn start_first_task() -> ! {
    unreachable!("the host port cannot perform context switches");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn critical_sections_nest_and_balance() {
        init();
        critical_enter();
        critical_enter();
        assert_eq!(critical_nesting(), 2);

        let saved = critical_enter_from_isr();
        assert_eq!(saved, 2);
        critical_leave_from_isr(saved);

        critical_leave();
        critical_leave();
        assert_eq!(critical_nesting(), 0);

        // Unbalanced leave does not underflow.
        critical_leave();
        assert_eq!(critical_nesting(), 0);
    }

    #[test]
    fn pending_switch_latches_until_taken() {
        init();
        assert!(!take_pending_switch());
        request_context_switch();
        request_context_switch();
        assert!(take_pending_switch());
        assert!(!take_pending_switch());
    }

    #[test]
    fn initial_frame_sits_below_an_aligned_top() {
        extern "C" fn entry(_: *mut ()) {}

        let mut stack = [0u32; 64];
        let top = unsafe { stack.as_mut_ptr().add(64) };
        let sp = init_task_stack(top, entry, core::ptr::null_mut());

        assert!(sp as usize >= stack.as_ptr() as usize);
        assert_eq!(sp as usize % crate::config::STACK_ALIGNMENT, 0);
        // 17 words below the aligned top: hardware frame + EXC_RETURN +
        // R4-R11.
        let aligned_top = top as usize & !(crate::config::STACK_ALIGNMENT - 1);
        assert_eq!((aligned_top - sp as usize) / 4, 17);
    }
}

