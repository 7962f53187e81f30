//! # Synchronization Primitives
//!
//! Mutex with transitive priority inheritance, counting semaphore and
//! bounded FIFO queue. All three block through the kernel's transition
//! helpers and park waiters in the shared priority-ordered
//! [`WaitList`](waitlist::WaitList) — none of them touches a scheduler
//! list directly.
//!
//! ## The shared blocking shape
//!
//! ```text
//! under the critical mask:
//!     try the fast path; done if it succeeds
//!     timeout == 0?           -> fail immediately (Timeout/Full/Empty)
//!     enqueue on the object's wait list; block (delayed list iff finite)
//! ...context switch; resumed later...
//! under the critical mask:
//!     still stamped blocked_on this object?  -> timed out: dequeue, fail
//!     otherwise a peer woke us               -> finish the operation
//! ```
//!
//! Wake-ups always target the highest-priority waiter and hand the
//! resource over directly: a mutex transfers ownership, a semaphore skips
//! the count increment, a queue pairs the wake with the deposit that made
//! it possible.

pub mod mutex;
pub mod queue;
pub mod semaphore;
pub(crate) mod waitlist;

pub use mutex::Mutex;
pub use queue::Queue;
pub use semaphore::Semaphore;

use crate::kernel::Kernel;
use crate::task::{SyncKind, TaskId};

/// Remove `id` from whatever wait list its `blocked_on` stamp names.
/// Used by task suspension, which must pull a blocked task out of a wait
/// list it will no longer be woken from.
pub(crate) fn detach_from_wait_list(k: &mut Kernel, id: TaskId) {
    let (object, kind) = {
        let tcb = k.tasks.tcb(id);
        (tcb.blocked_on, tcb.blocked_on_kind)
    };
    if object.is_null() {
        return;
    }

    unsafe {
        match kind {
            SyncKind::Mutex => {
                let inner = object as *mut mutex::MutexInner;
                (*inner).waiters.remove(&mut k.tasks, id);
            }
            SyncKind::Semaphore => {
                let inner = object as *mut semaphore::SemaphoreInner;
                (*inner).waiters.remove(&mut k.tasks, id);
            }
            SyncKind::Queue => {
                let inner = object as *mut queue::QueueInner;
                if !(*inner).senders.remove(&mut k.tasks, id) {
                    (*inner).receivers.remove(&mut k.tasks, id);
                }
            }
            SyncKind::None => {}
        }
    }
}

/// Re-sort `id` inside its wait list after a priority-inheritance boost,
/// so the wake order keeps honoring effective priorities.
pub(crate) fn reposition_in_wait_list(k: &mut Kernel, id: TaskId) {
    let (object, kind) = {
        let tcb = k.tasks.tcb(id);
        (tcb.blocked_on, tcb.blocked_on_kind)
    };
    if object.is_null() {
        return;
    }

    unsafe {
        match kind {
            SyncKind::Mutex => {
                let inner = object as *mut mutex::MutexInner;
                (*inner).waiters.reposition(&mut k.tasks, id);
            }
            SyncKind::Semaphore => {
                let inner = object as *mut semaphore::SemaphoreInner;
                (*inner).waiters.reposition(&mut k.tasks, id);
            }
            SyncKind::Queue => {
                let inner = object as *mut queue::QueueInner;
                if (*inner).senders.contains(&k.tasks, id) {
                    (*inner).senders.reposition(&mut k.tasks, id);
                } else {
                    (*inner).receivers.reposition(&mut k.tasks, id);
                }
            }
            SyncKind::None => {}
        }
    }
}
