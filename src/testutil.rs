//! # Test Harness Helpers
//!
//! Host-test stand-ins for the two hardware entry points the kernel
//! cannot exercise on the development machine: starting the scheduler
//! and the tick interrupt. Tests build a local [`Kernel`], `start` it,
//! then drive time with `tick` and honor pending context switches by
//! calling `switch_context` — exactly the sequence SysTick and PendSV
//! perform on the target.

use crate::arch::imp;
use crate::kernel::{Kernel, KernelState};

/// Route kernel logs to the test harness. `RUST_LOG=debug cargo test`
/// shows the kernel's own trace alongside failures.
pub(crate) fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Mark the kernel running and perform the first task selection, the way
/// `kernel::start` does before it hands control to the port.
pub(crate) fn start(k: &mut Kernel) {
    init_logging();
    k.state = KernelState::Running;
    k.switch_context();
    // Creation of the first tasks may have latched a switch request;
    // drain it so tests observe only their own.
    let _ = imp::take_pending_switch();
}

/// One tick interrupt.
pub(crate) fn tick(k: &mut Kernel) {
    unsafe { crate::kernel::kernel_tick(k) };
}

/// Run `ticks` tick interrupts, performing a context switch whenever one
/// is pending — a miniature of the target's interrupt loop.
#[allow(dead_code)]
pub(crate) fn run(k: &mut Kernel, ticks: u32) {
    for _ in 0..ticks {
        tick(k);
        if imp::take_pending_switch() {
            k.switch_context();
        }
    }
}
