//! # Mutex
//!
//! Recursive mutex with transitive priority inheritance.
//!
//! - **Recursion**: the owner may re-lock up to
//!   [`crate::config::MAX_RECURSIVE_LOCKS`] deep; each unlock peels one
//!   level and only the last one releases the mutex.
//! - **Ownership transfer**: the final unlock hands the mutex directly to
//!   the highest-priority waiter with `lock_count = 1`. The woken task
//!   does not race other ready tasks for re-acquisition.
//! - **Priority inheritance**: a blocking waiter boosts the owner to its
//!   own priority, and the boost propagates through a chain of owners
//!   that are themselves blocked on other mutexes, bounded by
//!   [`crate::config::MAX_INHERITANCE_DEPTH`]. The boost follows the task
//!   into whichever ready or wait list it sits in, so scheduling and wake
//!   order honor the effective priority. The final unlock restores the
//!   owner's base priority.

use core::cell::UnsafeCell;

use crate::config::{MAX_INHERITANCE_DEPTH, MAX_RECURSIVE_LOCKS, NO_WAIT};
use crate::error::KernelError;
use crate::kernel::{with_kernel, Kernel};
use crate::sched::SchedulingPolicy;
use crate::sync::waitlist::WaitList;
use crate::task::{Priority, SyncKind, TaskId, TaskState};
use crate::time::Tick;

pub(crate) struct MutexInner {
    pub(crate) owner: Option<TaskId>,
    pub(crate) lock_count: u8,
    pub(crate) waiters: WaitList,
}

/// Recursive, priority-inheriting mutex. Suitable for `static` storage;
/// all state lives behind interior mutability guarded by the kernel
/// critical section.
pub struct Mutex {
    inner: UnsafeCell<MutexInner>,
}

// Mutations only happen under the kernel critical mask, single-core.
unsafe impl Send for Mutex {}
unsafe impl Sync for Mutex {}

enum LockProgress {
    Acquired,
    BlockedAwaitingOwner,
}

impl Mutex {
    pub const fn new() -> Self {
        Self {
            inner: UnsafeCell::new(MutexInner {
                owner: None,
                lock_count: 0,
                waiters: WaitList::new(),
            }),
        }
    }

    /// Acquire the mutex, blocking up to `timeout` ticks
    /// ([`crate::config::NO_WAIT`] to try once,
    /// [`crate::config::WAIT_FOREVER`] to wait indefinitely).
    pub fn lock(&self, timeout: Tick) -> Result<(), KernelError> {
        let inner = self.inner.get();

        let (progress, who) = with_kernel(|k| {
            let who = k.current.ok_or(KernelError::InvalidState)?;
            unsafe { lock_start(k, inner, who, timeout) }.map(|p| (p, who))
        })?;

        match progress {
            LockProgress::Acquired => Ok(()),
            // The pended switch fired when the critical section closed;
            // by the time we run again we either own the mutex or timed
            // out.
            LockProgress::BlockedAwaitingOwner => {
                with_kernel(|k| unsafe { lock_finish(k, inner, who) })
            }
        }
    }

    /// Non-blocking acquire: `lock(NO_WAIT)`.
    pub fn try_lock(&self) -> Result<(), KernelError> {
        self.lock(NO_WAIT)
    }

    /// Release one lock level. Only the owner may unlock; the final
    /// level restores the owner's base priority and either transfers the
    /// mutex to the best waiter or frees it.
    pub fn unlock(&self) -> Result<(), KernelError> {
        let inner = self.inner.get();
        with_kernel(|k| {
            let who = k.current.ok_or(KernelError::InvalidState)?;
            unsafe { unlock_inner(k, inner, who) }
        })
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Lock/unlock state machine (critical section held throughout)
// ---------------------------------------------------------------------------

unsafe fn lock_start(
    k: &mut Kernel,
    inner: *mut MutexInner,
    who: TaskId,
    timeout: Tick,
) -> Result<LockProgress, KernelError> {
    // Fast path: free mutex.
    if (*inner).owner.is_none() {
        (*inner).owner = Some(who);
        (*inner).lock_count = 1;
        return Ok(LockProgress::Acquired);
    }

    // Recursive re-lock by the owner.
    if (*inner).owner == Some(who) {
        if (*inner).lock_count >= MAX_RECURSIVE_LOCKS {
            log::error!("mutex recursion limit reached");
            return Err(KernelError::General);
        }
        (*inner).lock_count += 1;
        return Ok(LockProgress::Acquired);
    }

    if timeout == NO_WAIT {
        return Err(KernelError::Timeout);
    }

    // Contended: boost the owner chain before going to sleep so the
    // holder runs at least at our priority.
    apply_priority_inheritance(k, inner, who);
    (*inner)
        .waiters
        .insert(&mut k.tasks, who, inner as *const (), SyncKind::Mutex);
    k.task_block(who, timeout);
    Ok(LockProgress::BlockedAwaitingOwner)
}

unsafe fn lock_finish(
    k: &mut Kernel,
    inner: *mut MutexInner,
    who: TaskId,
) -> Result<(), KernelError> {
    // Still stamped as waiting on this mutex: the delay elapsed and the
    // tick handler woke us, not an unlock. Dequeue ourselves.
    if k.tasks.tcb(who).blocked_on == inner as *const () {
        (*inner).waiters.remove(&mut k.tasks, who);
        return Err(KernelError::Timeout);
    }

    // Woken by unlock: ownership was transferred to us before the wake.
    // Anything else that pulled us out of the wait list (a suspend/resume
    // cycle) left us without the lock.
    if (*inner).owner != Some(who) {
        log::error!("mutex wake without ownership transfer");
        return Err(KernelError::General);
    }
    Ok(())
}

unsafe fn unlock_inner(
    k: &mut Kernel,
    inner: *mut MutexInner,
    who: TaskId,
) -> Result<(), KernelError> {
    if (*inner).owner != Some(who) {
        log::error!("mutex unlock by non-owner");
        return Err(KernelError::InvalidState);
    }

    if (*inner).lock_count > 1 {
        (*inner).lock_count -= 1;
        return Ok(());
    }

    // Final unlock: shed any inherited priority first, then hand over.
    restore_base_priority(k, who);

    match (*inner).waiters.pop_highest(&mut k.tasks) {
        Some(waiter) => {
            (*inner).owner = Some(waiter);
            (*inner).lock_count = 1;
            k.task_unblock(waiter);
        }
        None => {
            (*inner).owner = None;
            (*inner).lock_count = 0;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Priority inheritance
// ---------------------------------------------------------------------------

/// Walk the blocker-of-blocker chain from this mutex's owner, raising
/// every task running below `waiter`'s effective priority. The walk ends
/// at a task not blocked on a mutex, or at the depth bound (at which
/// point a cycle — an application deadlock — is the likely cause).
unsafe fn apply_priority_inheritance(k: &mut Kernel, inner: *mut MutexInner, waiter: TaskId) {
    let mut boost = k.tasks.tcb(waiter).priority;
    let mut target = (*inner).owner;

    for _ in 0..MAX_INHERITANCE_DEPTH {
        let Some(owner) = target else {
            return;
        };

        let owner_priority = k.tasks.tcb(owner).priority;
        if owner_priority < boost {
            raise_priority(k, owner, boost);
        } else if owner_priority > boost {
            // The chain ahead must be held at least this high.
            boost = owner_priority;
        }

        let tcb = k.tasks.tcb(owner);
        if tcb.state == TaskState::Blocked
            && tcb.blocked_on_kind == SyncKind::Mutex
            && !tcb.blocked_on.is_null()
        {
            let next = tcb.blocked_on as *mut MutexInner;
            target = (*next).owner;
        } else {
            return;
        }
    }

    log::warn!(
        "priority inheritance chain exceeded {} levels; possible mutex cycle",
        MAX_INHERITANCE_DEPTH
    );
}

/// Set a task's effective priority, re-sorting whichever list position
/// depends on it.
fn raise_priority(k: &mut Kernel, id: TaskId, new_priority: Priority) {
    match k.tasks.tcb(id).state {
        TaskState::Ready => {
            // Ready lists are priority-keyed under the preemptive
            // discipline: move the task to its new level.
            k.scheduler.ready_remove(&mut k.tasks, id);
            k.tasks.tcb_mut(id).priority = new_priority;
            k.scheduler.ready_insert(&mut k.tasks, id);
        }
        TaskState::Blocked if !k.tasks.tcb(id).blocked_on.is_null() => {
            k.tasks.tcb_mut(id).priority = new_priority;
            crate::sync::reposition_in_wait_list(k, id);
        }
        _ => {
            k.tasks.tcb_mut(id).priority = new_priority;
        }
    }
}

/// Drop any inherited boost, re-sorting a Ready task into the FIFO of
/// its base level.
fn restore_base_priority(k: &mut Kernel, id: TaskId) {
    let (priority, base, state) = {
        let tcb = k.tasks.tcb(id);
        (tcb.priority, tcb.base_priority, tcb.state)
    };
    if priority == base {
        return;
    }

    log::debug!(
        "task '{}' priority restored {} -> {}",
        k.tasks.tcb(id).name,
        priority,
        base
    );
    if state == TaskState::Ready {
        k.scheduler.ready_remove(&mut k.tasks, id);
        k.tasks.tcb_mut(id).priority = base;
        k.scheduler.ready_insert(&mut k.tasks, id);
    } else {
        k.tasks.tcb_mut(id).priority = base;
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WAIT_FOREVER;
    use crate::sched::{SchedulerKind, SchedulingPolicy};
    use crate::testutil;

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
    fn uncontended_lock_unlock_restores_initial_state() {
        let mut k = fresh();
        let t = spawn(&mut k, "t", 2);
        let mutex = Mutex::new();
        let inner = mutex.inner.get();

        unsafe {
            assert!(matches!(
                lock_start(&mut k, inner, t, NO_WAIT).unwrap(),
                LockProgress::Acquired
            ));
            assert_eq!((*inner).owner, Some(t));
            assert_eq!((*inner).lock_count, 1);

            unlock_inner(&mut k, inner, t).unwrap();
            assert_eq!((*inner).owner, None);
            assert_eq!((*inner).lock_count, 0);
            assert!((*inner).waiters.is_empty());
        }
    }

    #[test]
    fn recursive_locking_counts_and_bounds() {
        let mut k = fresh();
        let t = spawn(&mut k, "t", 2);
        let mutex = Mutex::new();
        let inner = mutex.inner.get();

        unsafe {
            lock_start(&mut k, inner, t, NO_WAIT).unwrap();
            lock_start(&mut k, inner, t, NO_WAIT).unwrap();
            assert_eq!((*inner).lock_count, 2);

            (*inner).lock_count = MAX_RECURSIVE_LOCKS;
            assert_eq!(
                lock_start(&mut k, inner, t, NO_WAIT).err(),
                Some(KernelError::General)
            );

            (*inner).lock_count = 2;
            unlock_inner(&mut k, inner, t).unwrap();
            assert_eq!((*inner).owner, Some(t));
            unlock_inner(&mut k, inner, t).unwrap();
            assert_eq!((*inner).owner, None);
        }
    }

    #[test]
    fn unlock_by_non_owner_is_rejected() {
        let mut k = fresh();
        let a = spawn(&mut k, "a", 2);
        let b = spawn(&mut k, "b", 3);
        let mutex = Mutex::new();
        let inner = mutex.inner.get();

        unsafe {
            lock_start(&mut k, inner, a, NO_WAIT).unwrap();
            assert_eq!(
                unlock_inner(&mut k, inner, b).err(),
                Some(KernelError::InvalidState)
            );
            // Unlocked mutex: nobody owns it either.
            unlock_inner(&mut k, inner, a).unwrap();
            assert_eq!(
                unlock_inner(&mut k, inner, a).err(),
                Some(KernelError::InvalidState)
            );
        }
    }

    #[test]
    fn contended_try_lock_fails_fast() {
        let mut k = fresh();
        let a = spawn(&mut k, "a", 2);
        let b = spawn(&mut k, "b", 3);
        let mutex = Mutex::new();
        let inner = mutex.inner.get();

        unsafe {
            lock_start(&mut k, inner, a, NO_WAIT).unwrap();
            assert_eq!(
                lock_start(&mut k, inner, b, NO_WAIT).err(),
                Some(KernelError::Timeout)
            );
            assert!((*inner).waiters.is_empty());
        }
    }

    #[test]
    fn unlock_transfers_ownership_to_highest_waiter() {
        let mut k = fresh();
        let low = spawn(&mut k, "low", 1);
        let mid = spawn(&mut k, "mid", 2);
        let high = spawn(&mut k, "high", 3);
        let mutex = Mutex::new();
        let inner = mutex.inner.get();

        unsafe {
            lock_start(&mut k, inner, low, NO_WAIT).unwrap();
            lock_start(&mut k, inner, mid, WAIT_FOREVER).unwrap();
            lock_start(&mut k, inner, high, WAIT_FOREVER).unwrap();
            assert_eq!(k.tasks.tcb(mid).state, TaskState::Blocked);
            assert_eq!(k.tasks.tcb(high).state, TaskState::Blocked);

            unlock_inner(&mut k, inner, low).unwrap();

            // The highest-priority waiter owns the mutex without racing.
            assert_eq!((*inner).owner, Some(high));
            assert_eq!((*inner).lock_count, 1);
            assert_eq!(k.tasks.tcb(high).state, TaskState::Ready);
            assert_eq!(k.tasks.tcb(mid).state, TaskState::Blocked);

            // And its lock_finish sees the transfer, not a timeout.
            assert!(lock_finish(&mut k, inner, high).is_ok());
        }
    }

    #[test]
    fn timed_wait_expires_and_dequeues() {
        let mut k = fresh();
        let a = spawn(&mut k, "a", 1);
        let b = spawn(&mut k, "b", 2);
        let mutex = Mutex::new();
        let inner = mutex.inner.get();
        testutil::start(&mut k);

        unsafe {
            lock_start(&mut k, inner, a, NO_WAIT).unwrap();
            lock_start(&mut k, inner, b, 3).unwrap();
            assert!(k.scheduler.delayed_contains(&k.tasks, b));

            for _ in 0..3 {
                testutil::tick(&mut k);
            }
            // The tick handler woke b; its stamp still names the mutex.
            assert_eq!(k.tasks.tcb(b).state, TaskState::Ready);
            assert_eq!(
                lock_finish(&mut k, inner, b).err(),
                Some(KernelError::Timeout)
            );
            assert!((*inner).waiters.is_empty());
            assert_eq!((*inner).owner, Some(a));
        }
    }

    #[test]
    fn priority_inheritance_boosts_a_lowly_owner() {
        let mut k = fresh();
        let low = spawn(&mut k, "low", 1);
        let high = spawn(&mut k, "high", 3);
        let mutex = Mutex::new();
        let inner = mutex.inner.get();

        unsafe {
            lock_start(&mut k, inner, low, NO_WAIT).unwrap();
            lock_start(&mut k, inner, high, WAIT_FOREVER).unwrap();

            assert_eq!(k.tasks.tcb(low).priority, 3);
            assert_eq!(k.tasks.tcb(low).base_priority, 1);
            // The boosted owner moved to the priority-3 ready FIFO.
            assert_eq!(k.scheduler.peek_next(&k.tasks), Some(low));

            unlock_inner(&mut k, inner, low).unwrap();
            assert_eq!(k.tasks.tcb(low).priority, 1);
            assert_eq!((*inner).owner, Some(high));
        }
    }

    #[test]
    fn priority_inheritance_is_transitive() {
        // L (1) owns m1; M (2) owns m2; L blocks on m2; then H (3)
        // blocks on m1. At that instant M's effective priority is 3.
        let mut k = fresh();
        let l = spawn(&mut k, "L", 1);
        let m = spawn(&mut k, "M", 2);
        let h = spawn(&mut k, "H", 3);
        let m1 = Mutex::new();
        let m2 = Mutex::new();
        let inner1 = m1.inner.get();
        let inner2 = m2.inner.get();

        unsafe {
            lock_start(&mut k, inner1, l, NO_WAIT).unwrap();
            lock_start(&mut k, inner2, m, NO_WAIT).unwrap();
            lock_start(&mut k, inner2, l, WAIT_FOREVER).unwrap();
            assert_eq!(k.tasks.tcb(l).state, TaskState::Blocked);

            lock_start(&mut k, inner1, h, WAIT_FOREVER).unwrap();

            assert_eq!(k.tasks.tcb(l).priority, 3, "direct boost through m1");
            assert_eq!(k.tasks.tcb(m).priority, 3, "transitive boost through m2");
            assert_eq!(k.tasks.tcb(m).base_priority, 2);
        }
    }

    #[test]
    fn inheritance_chain_stops_at_depth_bound() {
        // Two mutexes locked by each other's waiter form a cycle; the
        // walk must terminate rather than spin.
        let mut k = fresh();
        let a = spawn(&mut k, "a", 1);
        let b = spawn(&mut k, "b", 2);
        let ma = Mutex::new();
        let mb = Mutex::new();
        let ia = ma.inner.get();
        let ib = mb.inner.get();

        unsafe {
            lock_start(&mut k, ia, a, NO_WAIT).unwrap();
            lock_start(&mut k, ib, b, NO_WAIT).unwrap();
            lock_start(&mut k, ib, a, WAIT_FOREVER).unwrap();
            // b blocking on ma closes the cycle a -> mb -> b -> ma -> a.
            lock_start(&mut k, ia, b, WAIT_FOREVER).unwrap();
            // Reaching here at all is the assertion.
        }
    }

    #[test]
    fn boost_reorders_the_wait_list() {
        // Scenario: C waits on m2 behind B. C's priority is then boosted
        // (it is also an owner in some other chain); the m2 wait list
        // must surface C first.
        let mut k = fresh();
        let owner = spawn(&mut k, "owner", 1);
        let b = spawn(&mut k, "b", 3);
        let c = spawn(&mut k, "c", 2);
        let mutex = Mutex::new();
        let inner = mutex.inner.get();

        unsafe {
            lock_start(&mut k, inner, owner, NO_WAIT).unwrap();
            lock_start(&mut k, inner, b, WAIT_FOREVER).unwrap();
            lock_start(&mut k, inner, c, WAIT_FOREVER).unwrap();
            assert_eq!((*inner).waiters.peek(), Some(b));

            raise_priority(&mut k, c, 5);
            assert_eq!((*inner).waiters.peek(), Some(c));

            unlock_inner(&mut k, inner, owner).unwrap();
            assert_eq!((*inner).owner, Some(c));
        }
    }
}
