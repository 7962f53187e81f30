//! # Counting Semaphore
//!
//! A counting semaphore with an optional ceiling (`max_count`, 0 meaning
//! unbounded) and a priority-ordered wait queue. `signal` always prefers
//! waking the best waiter over incrementing — the woken task leaves with
//! the unit consumed on its behalf, so a binary semaphore hands off
//! cleanly instead of bouncing the count through 1.

use core::cell::UnsafeCell;

use crate::config::NO_WAIT;
use crate::error::KernelError;
use crate::kernel::{with_kernel, Kernel};
use crate::sync::waitlist::WaitList;
use crate::task::{SyncKind, TaskId};
use crate::time::Tick;

pub(crate) struct SemaphoreInner {
    pub(crate) count: u32,
    pub(crate) max_count: u32,
    pub(crate) waiters: WaitList,
}

/// Counting semaphore. Suitable for `static` storage.
pub struct Semaphore {
    inner: UnsafeCell<SemaphoreInner>,
}

// Mutations only happen under the kernel critical mask, single-core.
unsafe impl Send for Semaphore {}
unsafe impl Sync for Semaphore {}

enum WaitProgress {
    Consumed,
    BlockedAwaitingSignal,
}

impl Semaphore {
    /// Build a semaphore with `initial_count` units and a ceiling of
    /// `max_count` (0 = unbounded). `initial_count` must not exceed a
    /// nonzero ceiling; violating that is a construction-time panic,
    /// which for the usual `static` case means a compile-time error.
    pub const fn new(initial_count: u32, max_count: u32) -> Self {
        assert!(max_count == 0 || initial_count <= max_count);
        Self {
            inner: UnsafeCell::new(SemaphoreInner {
                count: initial_count,
                max_count,
                waiters: WaitList::new(),
            }),
        }
    }

    /// Binary semaphore, initially empty.
    pub const fn binary() -> Self {
        Self::new(0, 1)
    }

    /// Consume one unit, blocking up to `timeout` ticks for a signal.
    pub fn wait(&self, timeout: Tick) -> Result<(), KernelError> {
        let inner = self.inner.get();

        let (progress, who) = with_kernel(|k| {
            let who = k.current.ok_or(KernelError::InvalidState)?;
            unsafe { wait_start(k, inner, who, timeout) }.map(|p| (p, who))
        })?;

        match progress {
            WaitProgress::Consumed => Ok(()),
            WaitProgress::BlockedAwaitingSignal => {
                with_kernel(|k| unsafe { wait_finish(k, inner, who) })
            }
        }
    }

    /// Non-blocking wait: `wait(NO_WAIT)`.
    pub fn try_wait(&self) -> Result<(), KernelError> {
        self.wait(NO_WAIT)
    }

    /// Release one unit: wake the highest-priority waiter if there is
    /// one, otherwise increment the count. Incrementing past a nonzero
    /// `max_count` fails with `Overflow` and the signal is not applied.
    pub fn signal(&self) -> Result<(), KernelError> {
        let inner = self.inner.get();
        with_kernel(|k| unsafe { signal_inner(k, inner) })
    }

    /// Snapshot of the current count.
    pub fn count(&self) -> u32 {
        let inner = self.inner.get();
        with_kernel(|_k| unsafe { (*inner).count })
    }
}

// ---------------------------------------------------------------------------
// Wait/signal state machine (critical section held throughout)
// ---------------------------------------------------------------------------

unsafe fn wait_start(
    k: &mut Kernel,
    inner: *mut SemaphoreInner,
    who: TaskId,
    timeout: Tick,
) -> Result<WaitProgress, KernelError> {
    if (*inner).count > 0 {
        (*inner).count -= 1;
        return Ok(WaitProgress::Consumed);
    }

    if timeout == NO_WAIT {
        return Err(KernelError::Timeout);
    }

    (*inner)
        .waiters
        .insert(&mut k.tasks, who, inner as *const (), SyncKind::Semaphore);
    k.task_block(who, timeout);
    Ok(WaitProgress::BlockedAwaitingSignal)
}

unsafe fn wait_finish(
    k: &mut Kernel,
    inner: *mut SemaphoreInner,
    who: TaskId,
) -> Result<(), KernelError> {
    if k.tasks.tcb(who).blocked_on == inner as *const () {
        (*inner).waiters.remove(&mut k.tasks, who);
        return Err(KernelError::Timeout);
    }
    // Handoff: the signaller consumed the unit on our behalf; there is
    // nothing to decrement.
    Ok(())
}

unsafe fn signal_inner(k: &mut Kernel, inner: *mut SemaphoreInner) -> Result<(), KernelError> {
    if let Some(waiter) = (*inner).waiters.pop_highest(&mut k.tasks) {
        k.task_unblock(waiter);
        return Ok(());
    }

    if (*inner).max_count != 0 && (*inner).count >= (*inner).max_count {
        log::error!(
            "semaphore overflow: count={}, max={}",
            (*inner).count,
            (*inner).max_count
        );
        return Err(KernelError::Overflow);
    }

    (*inner).count += 1;
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WAIT_FOREVER;
    use crate::sched::SchedulerKind;
    use crate::task::TaskState;
    use crate::testutil;
    use quickcheck_macros::quickcheck;
    use std::vec::Vec;

    extern "C" fn noop(_: *mut ()) {}

    // Boxed so the arena-backed stack pointers created by init stay
    // valid; a Kernel must not move once tasks exist.
    fn fresh() -> std::boxed::Box<Kernel> {
        let mut k = std::boxed::Box::new(Kernel::new());
        k.init_with(SchedulerKind::PreemptiveStaticPriority).unwrap();
        k
    }

    fn spawn(k: &mut Kernel, name: &'static str, priority: u8) -> TaskId {
        k.create_task(noop, name, 0, core::ptr::null_mut(), priority, false)
            .unwrap()
    }

    #[test]
    fn counts_down_and_fails_fast_when_empty() {
        let mut k = fresh();
        let t = spawn(&mut k, "t", 2);
        let sem = Semaphore::new(2, 0);
        let inner = sem.inner.get();

        unsafe {
            assert!(matches!(
                wait_start(&mut k, inner, t, NO_WAIT).unwrap(),
                WaitProgress::Consumed
            ));
            wait_start(&mut k, inner, t, NO_WAIT).unwrap();
            assert_eq!((*inner).count, 0);
            assert_eq!(
                wait_start(&mut k, inner, t, NO_WAIT).err(),
                Some(KernelError::Timeout)
            );
        }
    }

    #[test]
    fn signal_increments_up_to_the_ceiling() {
        let mut k = fresh();
        let _t = spawn(&mut k, "t", 2);
        let sem = Semaphore::new(0, 2);
        let inner = sem.inner.get();

        unsafe {
            signal_inner(&mut k, inner).unwrap();
            signal_inner(&mut k, inner).unwrap();
            assert_eq!((*inner).count, 2);
            assert_eq!(
                signal_inner(&mut k, inner).err(),
                Some(KernelError::Overflow)
            );
            // The failed signal was not applied.
            assert_eq!((*inner).count, 2);
        }
    }

    #[test]
    fn signal_hands_off_to_a_waiter_without_incrementing() {
        // Binary semaphore, initial 0: A signals while B waits. B wakes
        // and the count stays 0 — handoff, not increment.
        let mut k = fresh();
        let _a = spawn(&mut k, "A", 1);
        let b = spawn(&mut k, "B", 3);
        let sem = Semaphore::binary();
        let inner = sem.inner.get();

        unsafe {
            wait_start(&mut k, inner, b, WAIT_FOREVER).unwrap();
            assert_eq!(k.tasks.tcb(b).state, TaskState::Blocked);

            signal_inner(&mut k, inner).unwrap();
            assert_eq!(k.tasks.tcb(b).state, TaskState::Ready);
            assert_eq!((*inner).count, 0);
            assert!((*inner).waiters.is_empty());

            // B's resume path sees the handoff, not a timeout.
            assert!(wait_finish(&mut k, inner, b).is_ok());
        }
    }

    #[test]
    fn wakes_waiters_in_priority_order() {
        let mut k = fresh();
        let low = spawn(&mut k, "low", 1);
        let high = spawn(&mut k, "high", 3);
        let mid = spawn(&mut k, "mid", 2);
        let sem = Semaphore::binary();
        let inner = sem.inner.get();

        unsafe {
            wait_start(&mut k, inner, low, WAIT_FOREVER).unwrap();
            wait_start(&mut k, inner, high, WAIT_FOREVER).unwrap();
            wait_start(&mut k, inner, mid, WAIT_FOREVER).unwrap();

            signal_inner(&mut k, inner).unwrap();
            assert_eq!(k.tasks.tcb(high).state, TaskState::Ready);
            assert_eq!(k.tasks.tcb(mid).state, TaskState::Blocked);

            signal_inner(&mut k, inner).unwrap();
            assert_eq!(k.tasks.tcb(mid).state, TaskState::Ready);
            assert_eq!(k.tasks.tcb(low).state, TaskState::Blocked);
        }
    }

    #[test]
    fn timed_wait_expires() {
        let mut k = fresh();
        let t = spawn(&mut k, "t", 2);
        let sem = Semaphore::binary();
        let inner = sem.inner.get();
        testutil::start(&mut k);

        unsafe {
            wait_start(&mut k, inner, t, 4).unwrap();
            for _ in 0..4 {
                testutil::tick(&mut k);
            }
            assert_eq!(k.tasks.tcb(t).state, TaskState::Ready);
            assert_eq!(
                wait_finish(&mut k, inner, t).err(),
                Some(KernelError::Timeout)
            );
            assert!((*inner).waiters.is_empty());
        }
    }

    /// Conservation: successful waits never exceed the initial count
    /// plus successful signals, for any operation sequence.
    #[quickcheck]
    fn conservation_holds(ops: Vec<bool>, initial: u8) -> bool {
        let mut k = fresh();
        let t = spawn(&mut k, "t", 2);
        let initial = u32::from(initial % 4);
        let sem = Semaphore::new(initial, 0);
        let inner = sem.inner.get();

        let mut waits = 0u32;
        let mut signals = 0u32;
        for op in ops {
            unsafe {
                if op {
                    if wait_start(&mut k, inner, t, NO_WAIT).is_ok() {
                        waits += 1;
                    }
                } else if signal_inner(&mut k, inner).is_ok() {
                    signals += 1;
                }
            }
        }
        waits <= initial + signals
    }
}
