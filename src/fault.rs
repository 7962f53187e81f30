//! # Fatal Fault Handling
//!
//! A detected invariant violation is not recoverable: the kernel's lists
//! or TCBs can no longer be trusted, so continuing to schedule would turn
//! a contained bug into silent data corruption. The fatal path masks all
//! interrupts and parks the CPU (or requests a reset when
//! [`crate::config::FATAL_RESETS`] is set).

/// Invariant check. Compiled out entirely when
/// [`crate::config::ASSERT_ENABLED`] is false.
#[macro_export]
macro_rules! kernel_assert {
    ($cond:expr) => {
        if $crate::config::ASSERT_ENABLED && !$cond {
            $crate::fault::assertion_failed(stringify!($cond), file!(), line!());
        }
    };
}

/// Terminal handler for a failed [`kernel_assert!`].
pub fn assertion_failed(expr: &str, file: &str, line: u32) -> ! {
    log::error!("assertion failed: {} at {}:{}", expr, file, line);
    fatal()
}

/// Mask every interrupt and stop. On the host port this panics instead so
/// a test that trips an invariant fails loudly.
pub fn fatal() -> ! {
    #[cfg(all(target_arch = "arm", target_os = "none"))]
    {
        cortex_m::interrupt::disable();
        if crate::config::FATAL_RESETS {
            cortex_m::peripheral::SCB::sys_reset();
        }
        loop {
            cortex_m::asm::wfi();
        }
    }
    #[cfg(not(all(target_arch = "arm", target_os = "none")))]
    {
        panic!("kernel fatal fault");
    }
}
