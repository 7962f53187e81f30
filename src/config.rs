//! # Kernel Configuration
//!
//! Compile-time constants governing the kernel. All limits are fixed at
//! build time — the kernel performs no dynamic allocation beyond the
//! monotonic stack arena sized here.

use crate::sched::SchedulerKind;
use crate::time::Tick;

/// System core clock frequency in Hz. Used by the port layer to derive
/// the SysTick reload value. Default matches an STM32F4 running from the
/// PLL at 84 MHz.
pub const SYSTEM_CLOCK_HZ: u32 = 84_000_000;

/// Tick interrupt frequency in Hz. Defines the resolution of every delay
/// and timeout in the system. 1 kHz gives a 1 ms tick.
pub const TICK_RATE_HZ: u32 = 1_000;

/// Length of one tick in milliseconds, derived from [`TICK_RATE_HZ`].
pub const TICK_PERIOD_MS: u32 = 1_000 / TICK_RATE_HZ;

/// Maximum number of tasks, including the idle task. Bounds the static
/// TCB pool.
pub const MAX_TASKS: usize = 8;

/// Number of distinct priority levels. Priorities run `0..MAX_PRIORITIES`
/// with higher numbers scheduled first. Must not exceed 32 — the
/// preemptive scheduler keeps one occupancy bit per level.
pub const MAX_PRIORITIES: u8 = 8;

/// Priority reserved for the idle task. Application tasks must be created
/// at a higher priority.
pub const IDLE_TASK_PRIORITY: u8 = 0;

/// Stack size, in bytes, used when task creation passes zero.
pub const DEFAULT_STACK_SIZE: usize = 512;

/// Smallest stack the kernel will hand out. Requests below this are
/// silently raised — enough for the saved register frame plus a shallow
/// call chain.
pub const MIN_STACK_SIZE: usize = 128;

/// Alignment of task stacks in bytes (AAPCS requires 8).
pub const STACK_ALIGNMENT: usize = 8;

/// Size of the static arena that backs task stacks, queue buffers and
/// timer control blocks. The arena is monotonic: allocations are never
/// returned.
pub const TOTAL_HEAP_SIZE: usize = 8 * 1024;

/// Scheduling discipline compiled into [`crate::kernel::init`].
pub const SCHEDULER_TYPE: SchedulerKind = SchedulerKind::PreemptiveStaticPriority;

/// Round-robin time slice in ticks.
pub const TIME_SLICE_TICKS: Tick = 10;

/// When set, each stack's bottom word is seeded with [`STACK_CANARY`] and
/// [`crate::kernel::check_stacks`] sweeps live tasks for corruption.
pub const ENABLE_STACK_OVERFLOW_CHECK: bool = true;

/// Sentinel written to the lowest word of every task stack. Any other
/// value read back means the stack has grown past its base.
pub const STACK_CANARY: u32 = 0xA5A5_A5A5;

/// Fill byte for freshly allocated stack memory.
pub const STACK_FILL: u8 = 0xAA;

/// Enables the internal invariant checks behind [`crate::kernel_assert!`].
pub const ASSERT_ENABLED: bool = true;

/// When true, a failed assertion requests a system reset instead of
/// parking the CPU with interrupts masked.
pub const FATAL_RESETS: bool = false;

/// Upper bound on the blocker-of-blocker chain walked by priority
/// inheritance. Exceeding it almost always means a mutex cycle; the walk
/// logs a warning and stops.
pub const MAX_INHERITANCE_DEPTH: usize = 8;

/// Recursive lock limit for mutexes.
pub const MAX_RECURSIVE_LOCKS: u8 = u8::MAX;

/// Timeout value meaning "do not block".
pub const NO_WAIT: Tick = 0;

/// Timeout value meaning "block until woken by a peer".
pub const WAIT_FOREVER: Tick = Tick::MAX;
