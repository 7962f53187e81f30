//! # Kernel Core
//!
//! Ties the port, the task model and the scheduler together: the global
//! kernel instance, init/start, the tick handler, voluntary yield and
//! delay, and the context-switch selector invoked by the port's trap.
//!
//! ## Startup sequence
//!
//! ```text
//! main()
//!   ├─► log::set_logger(...)     ← application-owned diagnostic sink
//!   ├─► kernel::init()           ← pool, arena, scheduler, idle task
//!   ├─► task::create(...)        ← application tasks (×N)
//!   └─► kernel::start()          ← tick source on, first task launched
//! ```
//!
//! ## Shared state
//!
//! The kernel instance is a process-wide singleton. Every mutation goes
//! through [`with_kernel`], which raises the kernel critical mask before
//! handing out the `&mut Kernel` — task-level callers and the tick ISR
//! therefore serialize on a single-core machine. The tick counter is the
//! one exception: a single-writer atomic that [`tick_count`] reads without
//! taking the mask.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::arch::{self, imp};
use crate::config;
use crate::error::KernelError;
use crate::kernel_assert;
use crate::memory::Arena;
use crate::sched::{Scheduler, SchedulerKind, SchedulingPolicy};
use crate::task::{idle_task_entry, TaskHandle, TaskId, TaskState, TaskTable, Tcb};
use crate::time::{ms_to_ticks, Tick};
use crate::timer::TimerList;

/// Lifecycle of the kernel singleton.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KernelState {
    /// Before [`init`].
    Inactive,
    /// Initialized, scheduler not yet started.
    Ready,
    /// Scheduler running; exactly one task owns the CPU.
    Running,
}

pub(crate) struct Kernel {
    pub(crate) state: KernelState,
    /// Monotonic tick counter. Written only by the tick handler.
    pub(crate) tick_count: AtomicU32,
    pub(crate) current: Option<TaskId>,
    pub(crate) idle: Option<TaskId>,
    /// Nested-kernel-call guard: while nonzero, the switch selector backs
    /// off and the pending switch is retried at the next request.
    pub(crate) scheduler_suspended: u8,
    pub(crate) scheduler: Scheduler,
    pub(crate) tasks: TaskTable,
    pub(crate) arena: Arena,
    pub(crate) timers: TimerList,
}

impl Kernel {
    pub(crate) const fn new() -> Self {
        Self {
            state: KernelState::Inactive,
            tick_count: AtomicU32::new(0),
            current: None,
            idle: None,
            scheduler_suspended: 0,
            scheduler: Scheduler::new(config::SCHEDULER_TYPE),
            tasks: TaskTable::new(),
            arena: Arena::new(),
            timers: TimerList::new(),
        }
    }

    /// One-shot initialization with an explicit discipline.
    pub(crate) fn init_with(&mut self, kind: SchedulerKind) -> Result<(), KernelError> {
        if self.state != KernelState::Inactive {
            return Err(KernelError::InvalidState);
        }

        self.tick_count.store(0, Ordering::Relaxed);
        self.current = None;
        self.idle = None;
        self.scheduler_suspended = 0;
        self.scheduler = Scheduler::new(kind);
        self.scheduler.reset();
        self.tasks.reset();
        self.arena.reset();
        self.timers.clear();

        imp::init();

        let idle = self.create_task(
            idle_task_entry,
            "idle",
            config::DEFAULT_STACK_SIZE,
            core::ptr::null_mut(),
            config::IDLE_TASK_PRIORITY,
            true,
        )?;
        self.idle = Some(idle);

        self.state = KernelState::Ready;
        log::info!(
            "kernel initialized: {:?} scheduler, {} tick/s",
            kind,
            config::TICK_RATE_HZ
        );
        Ok(())
    }

    #[inline]
    pub(crate) fn now(&self) -> Tick {
        self.tick_count.load(Ordering::Relaxed)
    }

    /// Select the next task to run. Called by the context-switch trap
    /// with the kernel mask raised.
    pub(crate) fn switch_context(&mut self) {
        if self.scheduler_suspended > 0 {
            return;
        }

        // An outgoing task that is still Running was preempted or
        // yielded, not blocked: hand it back to the scheduler.
        if let Some(current) = self.current {
            let tcb = self.tasks.tcb(current);
            // The saved stack pointer must still lie inside the task's
            // stack region.
            kernel_assert!(
                tcb.stack_pointer >= tcb.stack_base && tcb.stack_pointer <= tcb.stack_top
            );
            if tcb.state == TaskState::Running {
                self.tasks.tcb_mut(current).state = TaskState::Ready;
                self.scheduler.on_task_yielded(&mut self.tasks, current);
            }
        }

        let next = match self.scheduler.pick_next(&mut self.tasks) {
            Some(id) => {
                self.scheduler.ready_remove(&mut self.tasks, id);
                id
            }
            // Nothing ready at all: the idle task absorbs the gap.
            None => match self.idle {
                Some(idle) => idle,
                None => return,
            },
        };

        let tcb = self.tasks.tcb_mut(next);
        tcb.state = TaskState::Running;
        tcb.time_slice_remaining = config::TIME_SLICE_TICKS;
        self.current = Some(next);
        self.publish_current(next);
    }

    /// Expose the running task's TCB to the port's context-switch code.
    /// Only the singleton writes the pointer; unit-test kernels are
    /// separate instances and must not alias it.
    fn publish_current(&mut self, id: TaskId) {
        let tcb = self.tasks.tcb_ptr(id);
        let is_global = core::ptr::eq(self as *const Kernel, KERNEL.0.get() as *const Kernel);
        if is_global {
            unsafe { KERNEL_CURRENT_TCB = tcb };
        }
    }
}

// ---------------------------------------------------------------------------
// The kernel singleton
// ---------------------------------------------------------------------------

struct KernelCell(UnsafeCell<Kernel>);

// Single-core: every access is serialized by the kernel critical mask.
unsafe impl Sync for KernelCell {}

static KERNEL: KernelCell = KernelCell(UnsafeCell::new(Kernel::new()));

/// Running task's TCB, read and written by the port's context-switch
/// assembly (first TCB field = saved stack pointer).
#[no_mangle]
pub(crate) static mut KERNEL_CURRENT_TCB: *mut Tcb = core::ptr::null_mut();

/// Run `f` on the kernel singleton under the critical mask.
pub(crate) fn with_kernel<R>(f: impl FnOnce(&mut Kernel) -> R) -> R {
    arch::critical_section(|_token| f(unsafe { &mut *KERNEL.0.get() }))
}

/// Context-switch selector, invoked by the port trap with the mask
/// already raised.
#[no_mangle]
pub(crate) extern "C" fn kestrel_switch_context() {
    let kernel = unsafe { &mut *KERNEL.0.get() };
    kernel.switch_context();
}

// ---------------------------------------------------------------------------
// Tick handling
// ---------------------------------------------------------------------------

/// One tick of kernel time, in the order the tick contract demands:
/// counter, timers, delayed wake-ups, preemption decision. `kernel` must
/// point at a valid kernel; raw so that timer callbacks run with no
/// outstanding `&mut Kernel` borrow.
pub(crate) unsafe fn kernel_tick(kernel: *mut Kernel) {
    let now = {
        let k = &mut *kernel;
        if k.state != KernelState::Running {
            return;
        }
        let now = k.now().wrapping_add(1);
        k.tick_count.store(now, Ordering::Relaxed);
        now
    };

    crate::timer::process_tick(kernel, now);

    let k = &mut *kernel;
    k.scheduler.delayed_tick(&mut k.tasks, now);

    let candidate = k.scheduler.peek_next(&k.tasks);
    if k.scheduler.should_preempt(&mut k.tasks, k.current, candidate) {
        imp::request_context_switch();
    }
}

/// Tick ISR entry point. The bundled Cortex-M4 port calls this from its
/// SysTick handler; a custom port must invoke it once per tick from its
/// tick interrupt, at the kernel interrupt priority.
pub fn tick_from_isr() {
    let saved = imp::critical_enter_from_isr();
    unsafe { kernel_tick(KERNEL.0.get()) };
    imp::critical_leave_from_isr(saved);
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Initialize the kernel: task pool, stack arena, the configured
/// scheduler, the port layer and the idle task. Must be called exactly
/// once before any other kernel operation; a second call fails with
/// `InvalidState`.
pub fn init() -> Result<(), KernelError> {
    with_kernel(|k| k.init_with(config::SCHEDULER_TYPE))
}

/// Start the scheduler. Requires [`init`] and at least one application
/// task. On success the first task is entered and this function never
/// returns; every failure is reported before any irreversible step.
pub fn start() -> Result<(), KernelError> {
    with_kernel(|k| {
        if k.state != KernelState::Ready {
            return Err(KernelError::InvalidState);
        }
        // The idle task alone is not a schedulable application.
        if k.tasks.count() < 2 {
            return Err(KernelError::InvalidState);
        }
        k.state = KernelState::Running;
        k.switch_context();
        if k.current.is_none() {
            k.state = KernelState::Ready;
            return Err(KernelError::General);
        }
        log::info!("scheduler started");
        Ok(())
    })?;

    imp::start_tick();
    imp::start_first_task()
}

/// Current value of the monotonic tick counter. Lock-free: the counter
/// has a single writer (the tick ISR) and wraps modulo 2^32.
pub fn tick_count() -> Tick {
    unsafe { (*KERNEL.0.get()).tick_count.load(Ordering::Relaxed) }
}

/// Block the calling task for `ticks` tick periods. `delay(0)` is a
/// no-op. The task wakes in the first tick at or after the deadline.
pub fn delay(ticks: Tick) {
    if ticks == 0 {
        return;
    }
    with_kernel(|k| {
        if k.state != KernelState::Running {
            return;
        }
        if let Some(current) = k.current {
            k.task_block(current, ticks);
        }
    });
    // The pended context switch fires as the critical section above
    // closes; execution resumes here once the delay elapses.
}

/// Block the calling task for at least `ms` milliseconds (minimum one
/// tick for a nonzero request).
pub fn delay_ms(ms: u32) {
    delay(ms_to_ticks(ms));
}

/// Voluntarily offer the CPU. May return immediately if the caller is
/// still the scheduler's choice — still the highest priority, or slice
/// remaining.
pub fn yield_now() {
    imp::request_context_switch();
}

/// Sweep all live task stacks for canary corruption; returns the first
/// overflowed task, or `None` when every canary is intact (or the check
/// is compiled out).
pub fn check_stacks() -> Option<TaskHandle> {
    with_kernel(|k| k.first_overflowed_stack().map(TaskHandle))
}

/// Point-in-time snapshot of kernel load, for diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct KernelStats {
    pub tick_count: Tick,
    pub scheduler: SchedulerKind,
    pub tasks: usize,
    pub ready_tasks: usize,
    pub delayed_tasks: usize,
    pub active_timers: usize,
    pub current: Option<TaskHandle>,
    pub arena_used: usize,
}

/// Gather [`KernelStats`] under the critical mask.
pub fn stats() -> KernelStats {
    with_kernel(|k| KernelStats {
        tick_count: k.now(),
        scheduler: k.scheduler.kind(),
        tasks: k.tasks.count() as usize,
        ready_tasks: k.scheduler.ready_count(&k.tasks),
        delayed_tasks: k.scheduler.delayed_count(&k.tasks),
        active_timers: k.timers.len(),
        current: k.current.map(TaskHandle),
        arena_used: k.arena.used(),
    })
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    extern "C" fn noop_entry(_: *mut ()) {}

    // Boxed so the arena-backed stack pointers created by init stay
    // valid; a Kernel must not move once tasks exist.
    fn fresh(kind: SchedulerKind) -> std::boxed::Box<Kernel> {
        let mut k = std::boxed::Box::new(Kernel::new());
        k.init_with(kind).unwrap();
        k
    }

    fn spawn(k: &mut Kernel, name: &'static str, priority: u8) -> TaskId {
        k.create_task(noop_entry, name, 0, core::ptr::null_mut(), priority, false)
            .unwrap()
    }

    #[test]
    fn init_is_one_shot() {
        let mut k = Kernel::new();
        k.init_with(SchedulerKind::PreemptiveStaticPriority).unwrap();
        assert_eq!(
            k.init_with(SchedulerKind::PreemptiveStaticPriority),
            Err(KernelError::InvalidState)
        );
    }

    #[test]
    fn init_creates_the_idle_task() {
        let k = fresh(SchedulerKind::PreemptiveStaticPriority);
        let idle = k.idle.unwrap();
        assert_eq!(k.tasks.tcb(idle).priority, config::IDLE_TASK_PRIORITY);
        assert_eq!(k.tasks.tcb(idle).state, TaskState::Ready);
        assert_eq!(k.tasks.count(), 1);
    }

    #[test]
    fn first_switch_selects_highest_priority() {
        let mut k = fresh(SchedulerKind::PreemptiveStaticPriority);
        let low = spawn(&mut k, "low", 1);
        let high = spawn(&mut k, "high", 3);

        testutil::start(&mut k);
        assert_eq!(k.current, Some(high));
        assert_eq!(k.tasks.tcb(high).state, TaskState::Running);
        // The loser stays Ready, queued behind nothing at its level.
        assert_eq!(k.tasks.tcb(low).state, TaskState::Ready);
    }

    #[test]
    fn delay_parks_and_tick_wakes() {
        let mut k = fresh(SchedulerKind::PreemptiveStaticPriority);
        let low = spawn(&mut k, "low", 1);
        let high = spawn(&mut k, "high", 3);
        testutil::start(&mut k);
        assert_eq!(k.current, Some(high));

        // The running high task goes to sleep for 3 ticks.
        k.task_block(high, 3);
        assert!(crate::arch::imp::take_pending_switch());
        k.switch_context();
        assert_eq!(k.current, Some(low));
        assert_eq!(k.tasks.tcb(high).state, TaskState::Blocked);

        // Two ticks: still asleep, no preemption request.
        testutil::tick(&mut k);
        testutil::tick(&mut k);
        assert_eq!(k.tasks.tcb(high).state, TaskState::Blocked);
        assert!(!crate::arch::imp::take_pending_switch());

        // Third tick reaches the deadline: the task is woken before the
        // preemption decision, and wins it immediately.
        testutil::tick(&mut k);
        assert_eq!(k.tasks.tcb(high).state, TaskState::Ready);
        assert!(crate::arch::imp::take_pending_switch());
        k.switch_context();
        assert_eq!(k.current, Some(high));
    }

    #[test]
    fn delay_round_trip_advances_tick_by_requested_amount() {
        let mut k = fresh(SchedulerKind::PreemptiveStaticPriority);
        let worker = spawn(&mut k, "worker", 2);
        testutil::start(&mut k);

        let before = k.now();
        k.task_block(worker, 5);
        let _ = crate::arch::imp::take_pending_switch();
        k.switch_context();

        let mut elapsed = 0;
        while k.tasks.tcb(worker).state == TaskState::Blocked {
            testutil::tick(&mut k);
            elapsed += 1;
            assert!(elapsed <= 6, "delay(5) should complete within 6 ticks");
        }
        assert!(elapsed >= 5);
        assert_eq!(k.now() - before, elapsed);
    }

    #[test]
    fn tick_wakeup_is_correct_across_counter_wrap() {
        let mut k = fresh(SchedulerKind::PreemptiveStaticPriority);
        let worker = spawn(&mut k, "worker", 2);
        testutil::start(&mut k);

        // Pre-load the counter just below the wrap.
        k.tick_count.store(u32::MAX - 2, Ordering::Relaxed);
        k.task_block(worker, 5);
        let _ = crate::arch::imp::take_pending_switch();
        k.switch_context();

        for _ in 0..4 {
            testutil::tick(&mut k);
            assert_eq!(k.tasks.tcb(worker).state, TaskState::Blocked);
        }
        testutil::tick(&mut k); // deadline = 2 (wrapped)
        assert_eq!(k.tasks.tcb(worker).state, TaskState::Ready);
        assert_eq!(k.now(), 2);
    }

    #[test]
    fn tick_counter_is_monotonic_per_tick() {
        let mut k = fresh(SchedulerKind::PreemptiveStaticPriority);
        spawn(&mut k, "t", 1);
        testutil::start(&mut k);

        for expected in 1..=50u32 {
            testutil::tick(&mut k);
            assert_eq!(k.now(), expected);
        }
    }

    #[test]
    fn idle_runs_when_everyone_sleeps() {
        let mut k = fresh(SchedulerKind::PreemptiveStaticPriority);
        let only = spawn(&mut k, "only", 2);
        testutil::start(&mut k);

        k.task_block(only, 10);
        let _ = crate::arch::imp::take_pending_switch();
        k.switch_context();
        assert_eq!(k.current, k.idle);
        assert_eq!(k.tasks.tcb(k.idle.unwrap()).state, TaskState::Running);
    }

    #[test]
    fn round_robin_rotates_on_slice_expiry() {
        let mut k = fresh(SchedulerKind::RoundRobin);
        let a = spawn(&mut k, "a", 1);
        let b = spawn(&mut k, "b", 1);
        let c = spawn(&mut k, "c", 1);
        testutil::start(&mut k);

        let mut schedule = std::vec::Vec::new();
        for _ in 0..3 {
            schedule.push(k.current.unwrap());
            // Burn one full slice.
            for _ in 0..config::TIME_SLICE_TICKS {
                testutil::tick(&mut k);
            }
            if crate::arch::imp::take_pending_switch() {
                k.switch_context();
            }
        }
        schedule.push(k.current.unwrap());

        // Idle was created first, so rotation starts from it; every
        // task gets exactly one slice per revolution.
        let idle = k.idle.unwrap();
        assert_eq!(schedule, std::vec![idle, a, b, c]);
    }

    #[test]
    fn cooperative_never_preempts_on_tick() {
        let mut k = fresh(SchedulerKind::Cooperative);
        spawn(&mut k, "a", 1);
        spawn(&mut k, "b", 1);
        testutil::start(&mut k);
        let first = k.current;

        for _ in 0..100 {
            testutil::tick(&mut k);
        }
        assert!(!crate::arch::imp::take_pending_switch());
        assert_eq!(k.current, first);
    }

    #[test]
    fn scheduler_suspension_defers_switching() {
        let mut k = fresh(SchedulerKind::PreemptiveStaticPriority);
        let a = spawn(&mut k, "a", 1);
        testutil::start(&mut k);
        assert_eq!(k.current, Some(a));

        k.scheduler_suspended = 1;
        let b = spawn(&mut k, "b", 4);
        let _ = crate::arch::imp::take_pending_switch();
        k.switch_context(); // guard active: nothing happens
        assert_eq!(k.current, Some(a));

        k.scheduler_suspended = 0;
        k.switch_context();
        assert_eq!(k.current, Some(b));
    }
}
