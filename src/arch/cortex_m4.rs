//! # Cortex-M4 Port
//!
//! Hardware-specific half of the kernel for ARMv7-M (Thumb-2) parts.
//!
//! ## Context switch mechanism
//!
//! Tasks run in Thread mode on the process stack (PSP); the kernel and all
//! handlers run on the main stack (MSP). Exception entry stacks
//! R0–R3/R12/LR/PC/xPSR automatically; the PendSV handler completes the
//! context by saving R4–R11 plus the active EXC_RETURN value, and — when
//! the EXC_RETURN FPU bit shows a floating-point frame was live — the
//! callee-saved S16–S31 bank. Saving EXC_RETURN per task rather than as a
//! global constant lets tasks that never touch the FPU skip the extended
//! save entirely.
//!
//! The saved stack pointer is stored through the current-TCB pointer
//! published by the kernel; `stack_pointer` must therefore sit at offset 0
//! of the TCB, which the kernel asserts at compile time.
//!
//! ## Interrupt priorities
//!
//! - PendSV runs at the lowest priority so a context switch never delays a
//!   real interrupt.
//! - SysTick runs at the kernel priority.
//! - The critical section raises BASEPRI to the kernel priority; anything
//!   configured above it ("critical" interrupts) is never masked by the
//!   kernel and must not call into it.

use core::arch::naked_asm;
use core::sync::atomic::{AtomicU32, Ordering};

use cortex_m::asm;
use cortex_m::peripheral::scb::SystemHandler;
use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::register::{basepri, basepri_max};

use crate::config::{SYSTEM_CLOCK_HZ, TICK_RATE_HZ};
use crate::task::TaskEntry;

/// BASEPRI threshold of the kernel critical section. Interrupts at this
/// priority value or numerically higher (= logically lower) are masked.
pub const KERNEL_INTERRUPT_PRIORITY: u8 = 0xE0;

/// Hardware priority of the PendSV context-switch trap (lowest).
const PENDSV_PRIORITY: u8 = 0xF0;

/// Initial xPSR for a new task: Thumb bit set, everything else clear.
const INITIAL_XPSR: u32 = 0x0100_0000;

/// Initial EXC_RETURN: return to Thread mode, use PSP, no FPU frame.
const INITIAL_EXC_RETURN: u32 = 0xFFFF_FFFD;

/// Critical-section nesting depth. Single writer per context; mutated
/// only while the mask is already raised, so plain relaxed ordering is
/// enough.
static CRITICAL_NESTING: AtomicU32 = AtomicU32::new(0);

/// BASEPRI value captured when the outermost critical section was entered.
static CRITICAL_BASEPRI: AtomicU32 = AtomicU32::new(0);

// ---------------------------------------------------------------------------
// Port initialization
// ---------------------------------------------------------------------------

/// One-time port setup: handler priorities and critical-section state.
pub(crate) fn init() {
    let mut peripherals = unsafe { cortex_m::Peripherals::steal() };

    unsafe {
        peripherals
            .SCB
            .set_priority(SystemHandler::PendSV, PENDSV_PRIORITY);
        peripherals
            .SCB
            .set_priority(SystemHandler::SysTick, KERNEL_INTERRUPT_PRIORITY);
    }

    #[cfg(target_abi = "eabihf")]
    unsafe {
        // ASPEN | LSPEN: reserve FPU stack space automatically and defer
        // the actual S0-S15 save until an ISR first touches the FPU.
        const FPCCR: *mut u32 = 0xE000_EF34 as *mut u32;
        const FPCCR_ASPEN: u32 = 1 << 31;
        const FPCCR_LSPEN: u32 = 1 << 30;
        core::ptr::write_volatile(FPCCR, core::ptr::read_volatile(FPCCR) | FPCCR_ASPEN | FPCCR_LSPEN);
    }

    basepri::write(0);
    CRITICAL_NESTING.store(0, Ordering::Relaxed);
    CRITICAL_BASEPRI.store(0, Ordering::Relaxed);

    log::info!(
        "port: PendSV prio {:#04x}, SysTick/kernel prio {:#04x}",
        PENDSV_PRIORITY,
        KERNEL_INTERRUPT_PRIORITY
    );
}

/// Program SysTick to fire at [`TICK_RATE_HZ`] from the core clock.
pub(crate) fn start_tick() {
    let mut peripherals = unsafe { cortex_m::Peripherals::steal() };
    let syst = &mut peripherals.SYST;

    syst.set_clock_source(SystClkSource::Core);
    syst.set_reload(SYSTEM_CLOCK_HZ / TICK_RATE_HZ - 1);
    syst.clear_current();
    syst.enable_interrupt();
    syst.enable_counter();
}

// ---------------------------------------------------------------------------
// Critical sections
// ---------------------------------------------------------------------------

/// Raise BASEPRI to the kernel threshold; nestable.
pub(crate) fn critical_enter() {
    let previous = basepri::read();
    basepri_max::write(KERNEL_INTERRUPT_PRIORITY);
    asm::dsb();
    asm::isb();

    let nesting = CRITICAL_NESTING.load(Ordering::Relaxed);
    if nesting == 0 {
        CRITICAL_BASEPRI.store(u32::from(previous), Ordering::Relaxed);
    }
    CRITICAL_NESTING.store(nesting + 1, Ordering::Relaxed);
}

/// Drop one nesting level; the outermost exit restores the saved mask.
pub(crate) fn critical_leave() {
    let nesting = CRITICAL_NESTING.load(Ordering::Relaxed);
    if nesting == 0 {
        return;
    }
    CRITICAL_NESTING.store(nesting - 1, Ordering::Relaxed);
    if nesting == 1 {
        basepri::write(CRITICAL_BASEPRI.load(Ordering::Relaxed) as u8);
        asm::dsb();
        asm::isb();
    }
}

/// ISR-safe critical entry: returns the caller's mask instead of keeping
/// nesting state, so it composes with arbitrary interrupt nesting.
pub(crate) fn critical_enter_from_isr() -> u32 {
    let saved = u32::from(basepri::read());
    basepri_max::write(KERNEL_INTERRUPT_PRIORITY);
    asm::dsb();
    asm::isb();
    saved
}

/// Restore the mask captured by [`critical_enter_from_isr`].
pub(crate) fn critical_leave_from_isr(saved: u32) {
    basepri::write(saved as u8);
    asm::dsb();
    asm::isb();
}

// ---------------------------------------------------------------------------
// Context switch plumbing
// ---------------------------------------------------------------------------

/// Pend the PendSV trap. The switch runs once every higher-priority
/// handler (and any open critical section) has drained.
#[inline]
pub(crate) fn request_context_switch() {
    cortex_m::peripheral::SCB::set_pendsv();
    asm::dsb();
    asm::isb();
}

/// Idle-loop low-power hint.
#[inline]
pub(crate) fn wait_for_interrupt() {
    asm::wfi();
}

/// Build the initial register frame on a new task's stack.
///
/// The frame is the exact image the PendSV restore path consumes, so the
/// very first entry into the task is indistinguishable from resuming a
/// preempted one. Layout from the returned stack pointer upward:
/// R4–R11, EXC_RETURN, then the hardware frame R0–R3/R12/LR/PC/xPSR with
/// the parameter in R0, the entry point in PC and the exit trampoline in
/// LR.
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
        *sp = (entry as usize as u32) | 1; // PC: Thumb bit set
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
            // R11 down to R4
            sp = sp.sub(1);
            *sp = 0;
        }
    }

    sp
}

/// Launch the first task: trigger SVCall, whose handler performs a
/// restore with no matching save. Never returns.
pub(crate) fn start_first_task() -> ! {
    unsafe {
        #[cfg(target_abi = "eabihf")]
        core::arch::asm!(
            // Clear CONTROL.FPCA so the SVC frame carries no stale FPU
            // state from before the scheduler started.
            "mov r0, #0",
            "msr control, r0",
            "isb",
            out("r0") _,
        );

        core::arch::asm!("svc 0", options(noreturn));
    }
}

/// SVCall: restore-only context load of the first task.
#[allow(non_snake_case)]
#[no_mangle]
#[unsafe(naked)]
pub unsafe extern "C" fn SVCall() {
    naked_asm!(
        "ldr r3, ={current}",
        "ldr r1, [r3]",            // r1 = first task's TCB
        "ldr r0, [r1]",            // first TCB field = stack pointer
        "ldmia r0!, {{r4-r11, r14}}",
        "msr psp, r0",
        "isb",
        "mov r0, #0",              // unmask: BASEPRI = 0
        "msr basepri, r0",
        "bx r14",
        current = sym crate::kernel::KERNEL_CURRENT_TCB,
    );
}

/// PendSV: the context switch itself.
///
/// Saves the outgoing task's registers on its process stack, stores the
/// resulting stack pointer at TCB offset 0, selects the next task under
/// the kernel mask, and restores the mirror image through the incoming
/// task's saved EXC_RETURN.
#[cfg(target_abi = "eabihf")]
#[allow(non_snake_case)]
#[no_mangle]
#[unsafe(naked)]
pub unsafe extern "C" fn PendSV() {
    naked_asm!(
        "mrs r0, psp",
        "isb",
        "ldr r3, ={current}",
        "ldr r2, [r3]",            // r2 = outgoing TCB
        "tst r14, #0x10",          // EXC_RETURN bit 4 clear = FPU frame live
        "bne 1f",
        "vstmdb r0!, {{s16-s31}}",
        "1:",
        "stmdb r0!, {{r4-r11, r14}}",
        "str r0, [r2]",            // outgoing TCB.stack_pointer = r0
        "mov r0, #{mask}",
        "msr basepri, r0",
        "dsb",
        "isb",
        "bl {switch}",
        "mov r0, #0",
        "msr basepri, r0",
        "ldr r3, ={current}",
        "ldr r2, [r3]",            // r2 = incoming TCB
        "ldr r0, [r2]",
        "ldmia r0!, {{r4-r11, r14}}",
        "tst r14, #0x10",
        "bne 2f",
        "vldmia r0!, {{s16-s31}}",
        "2:",
        "msr psp, r0",
        "isb",
        "bx r14",                  // per-task EXC_RETURN
        current = sym crate::kernel::KERNEL_CURRENT_TCB,
        switch = sym crate::kernel::kestrel_switch_context,
        mask = const KERNEL_INTERRUPT_PRIORITY,
    );
}

/// PendSV for soft-float targets: same switch without the FPU bank.
#[cfg(not(target_abi = "eabihf"))]
#[allow(non_snake_case)]
#[no_mangle]
#[unsafe(naked)]
pub unsafe extern "C" fn PendSV() {
    naked_asm!(
        "mrs r0, psp",
        "isb",
        "ldr r3, ={current}",
        "ldr r2, [r3]",
        "stmdb r0!, {{r4-r11, r14}}",
        "str r0, [r2]",
        "mov r0, #{mask}",
        "msr basepri, r0",
        "dsb",
        "isb",
        "bl {switch}",
        "mov r0, #0",
        "msr basepri, r0",
        "ldr r3, ={current}",
        "ldr r2, [r3]",
        "ldr r0, [r2]",
        "ldmia r0!, {{r4-r11, r14}}",
        "msr psp, r0",
        "isb",
        "bx r14",
        current = sym crate::kernel::KERNEL_CURRENT_TCB,
        switch = sym crate::kernel::kestrel_switch_context,
        mask = const KERNEL_INTERRUPT_PRIORITY,
    );
}

/// SysTick: tick bookkeeping runs in the kernel, not here.
#[allow(non_snake_case)]
#[no_mangle]
pub unsafe extern "C" fn SysTick() {
    crate::kernel::tick_from_isr();
}
