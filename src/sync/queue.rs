//! # Message Queue
//!
//! Bounded FIFO of fixed-size items over a circular buffer allocated from
//! the kernel arena. Senders block when the buffer is full, receivers
//! when it is empty, each side in its own priority-ordered wait list.
//!
//! Handoff is deposit-then-wake: a successful send that finds a blocked
//! receiver deposits into the buffer and wakes the receiver, whose resume
//! path immediately takes the item — observable delivery is one-shot,
//! FIFO, at most once. Receives wake blocked senders symmetrically after
//! freeing a slot.

use core::mem::{align_of, size_of};
use core::ptr::NonNull;

use crate::config::NO_WAIT;
use crate::error::KernelError;
use crate::kernel::{with_kernel, Kernel};
use crate::sync::waitlist::WaitList;
use crate::task::{SyncKind, TaskId};
use crate::time::Tick;

pub(crate) struct QueueInner {
    buffer: *mut u8,
    /// Capacity in items.
    length: usize,
    item_size: usize,
    count: usize,
    read_index: usize,
    write_index: usize,
    pub(crate) senders: WaitList,
    pub(crate) receivers: WaitList,
}

/// Handle to a kernel-allocated message queue. Copyable; all state lives
/// in the arena behind the handle.
#[derive(Clone, Copy)]
pub struct Queue {
    inner: NonNull<QueueInner>,
}

// Queue state is only touched under the kernel critical mask.
unsafe impl Send for Queue {}
unsafe impl Sync for Queue {}

enum SendProgress {
    Deposited,
    BlockedAwaitingSpace,
}

enum ReceiveProgress {
    Taken,
    BlockedAwaitingData,
}

impl Queue {
    /// Allocate a queue of `length` items of `item_size` bytes each from
    /// the kernel arena. Fails with `InvalidParam` for zero dimensions
    /// and `NoMemory` when the arena cannot hold the control block plus
    /// the buffer.
    pub fn create(length: usize, item_size: usize) -> Result<Queue, KernelError> {
        if length == 0 || item_size == 0 {
            return Err(KernelError::InvalidParam);
        }

        with_kernel(|k| {
            let control = k
                .arena
                .alloc(size_of::<QueueInner>(), align_of::<QueueInner>())
                .ok_or(KernelError::NoMemory)?
                .cast::<QueueInner>();
            let buffer = k
                .arena
                .alloc_aligned(length * item_size)
                .ok_or(KernelError::NoMemory)?;

            unsafe {
                control.as_ptr().write(QueueInner {
                    buffer: buffer.as_ptr(),
                    length,
                    item_size,
                    count: 0,
                    read_index: 0,
                    write_index: 0,
                    senders: WaitList::new(),
                    receivers: WaitList::new(),
                });
            }

            log::debug!("queue created: {} x {}B", length, item_size);
            Ok(Queue { inner: control })
        })
    }

    /// Send one item (`item.len()` must equal the queue's item size),
    /// blocking up to `timeout` ticks for space. A full queue fails with
    /// `Full` when `timeout` is [`NO_WAIT`], `Timeout` otherwise.
    pub fn send(&self, item: &[u8], timeout: Tick) -> Result<(), KernelError> {
        let inner = self.inner.as_ptr();
        if item.len() != item_size_of(inner) {
            return Err(KernelError::InvalidParam);
        }

        let (progress, who) = with_kernel(|k| unsafe { send_start(k, inner, item, timeout) })?;
        match progress {
            SendProgress::Deposited => Ok(()),
            SendProgress::BlockedAwaitingSpace => {
                with_kernel(|k| unsafe { send_finish(k, inner, who, item) })
            }
        }
    }

    /// Receive one item into `buffer` (length must equal the item size),
    /// blocking up to `timeout` ticks for data. An empty queue fails
    /// with `Empty` when `timeout` is [`NO_WAIT`], `Timeout` otherwise.
    pub fn receive(&self, buffer: &mut [u8], timeout: Tick) -> Result<(), KernelError> {
        let inner = self.inner.as_ptr();
        if buffer.len() != item_size_of(inner) {
            return Err(KernelError::InvalidParam);
        }

        let (progress, who) =
            with_kernel(|k| unsafe { receive_start(k, inner, buffer, timeout) })?;
        match progress {
            ReceiveProgress::Taken => Ok(()),
            ReceiveProgress::BlockedAwaitingData => {
                with_kernel(|k| unsafe { receive_finish(k, inner, who, buffer) })
            }
        }
    }

    /// Number of items currently queued.
    pub fn messages_waiting(&self) -> usize {
        let inner = self.inner.as_ptr();
        with_kernel(|_k| unsafe { (*inner).count })
    }

    /// Number of free item slots.
    pub fn spaces_available(&self) -> usize {
        let inner = self.inner.as_ptr();
        with_kernel(|_k| unsafe { (*inner).length - (*inner).count })
    }

    pub fn is_full(&self) -> bool {
        self.spaces_available() == 0
    }

    pub fn is_empty(&self) -> bool {
        self.messages_waiting() == 0
    }

    /// Discard all queued items and wake every blocked sender — the
    /// buffer just became all space, so their deposits proceed. Blocked
    /// receivers stay blocked: there is still nothing to read.
    pub fn reset(&self) {
        let inner = self.inner.as_ptr();
        with_kernel(|k| unsafe { reset_inner(k, inner) });
    }
}

fn item_size_of(inner: *mut QueueInner) -> usize {
    with_kernel(|_k| unsafe { (*inner).item_size })
}

// ---------------------------------------------------------------------------
// Circular buffer primitives (critical section held)
// ---------------------------------------------------------------------------

unsafe fn deposit(inner: *mut QueueInner, item: &[u8]) {
    let slot = (*inner).buffer.add((*inner).write_index * (*inner).item_size);
    core::ptr::copy_nonoverlapping(item.as_ptr(), slot, (*inner).item_size);
    (*inner).write_index = ((*inner).write_index + 1) % (*inner).length;
    (*inner).count += 1;
}

unsafe fn take(inner: *mut QueueInner, buffer: &mut [u8]) {
    let slot = (*inner).buffer.add((*inner).read_index * (*inner).item_size);
    core::ptr::copy_nonoverlapping(slot, buffer.as_mut_ptr(), (*inner).item_size);
    (*inner).read_index = ((*inner).read_index + 1) % (*inner).length;
    (*inner).count -= 1;
}

// ---------------------------------------------------------------------------
// Send/receive state machines (critical section held throughout)
// ---------------------------------------------------------------------------

unsafe fn send_start(
    k: &mut Kernel,
    inner: *mut QueueInner,
    item: &[u8],
    timeout: Tick,
) -> Result<(SendProgress, TaskId), KernelError> {
    // Fast path: space available.
    if (*inner).count < (*inner).length {
        deposit(inner, item);
        if let Some(receiver) = (*inner).receivers.pop_highest(&mut k.tasks) {
            k.task_unblock(receiver);
        }
        // The task id is unused on this arm.
        return Ok((SendProgress::Deposited, 0));
    }

    if timeout == NO_WAIT {
        return Err(KernelError::Full);
    }

    let who = k.current.ok_or(KernelError::InvalidState)?;
    (*inner)
        .senders
        .insert(&mut k.tasks, who, inner as *const (), SyncKind::Queue);
    k.task_block(who, timeout);
    Ok((SendProgress::BlockedAwaitingSpace, who))
}

unsafe fn send_finish(
    k: &mut Kernel,
    inner: *mut QueueInner,
    who: TaskId,
    item: &[u8],
) -> Result<(), KernelError> {
    if k.tasks.tcb(who).blocked_on == inner as *const () {
        (*inner).senders.remove(&mut k.tasks, who);
        return Err(KernelError::Timeout);
    }

    // A receiver freed a slot for us (or a reset drained the buffer).
    // Between its wake and our resume a higher-priority sender can steal
    // the slot; surface that instead of corrupting the buffer.
    if (*inner).count >= (*inner).length {
        log::error!("queue send woken with no free slot");
        return Err(KernelError::Full);
    }

    deposit(inner, item);
    if let Some(receiver) = (*inner).receivers.pop_highest(&mut k.tasks) {
        k.task_unblock(receiver);
    }
    Ok(())
}

unsafe fn receive_start(
    k: &mut Kernel,
    inner: *mut QueueInner,
    buffer: &mut [u8],
    timeout: Tick,
) -> Result<(ReceiveProgress, TaskId), KernelError> {
    // Fast path: data available.
    if (*inner).count > 0 {
        take(inner, buffer);
        if let Some(sender) = (*inner).senders.pop_highest(&mut k.tasks) {
            k.task_unblock(sender);
        }
        return Ok((ReceiveProgress::Taken, 0));
    }

    if timeout == NO_WAIT {
        return Err(KernelError::Empty);
    }

    let who = k.current.ok_or(KernelError::InvalidState)?;
    (*inner)
        .receivers
        .insert(&mut k.tasks, who, inner as *const (), SyncKind::Queue);
    k.task_block(who, timeout);
    Ok((ReceiveProgress::BlockedAwaitingData, who))
}

unsafe fn receive_finish(
    k: &mut Kernel,
    inner: *mut QueueInner,
    who: TaskId,
    buffer: &mut [u8],
) -> Result<(), KernelError> {
    if k.tasks.tcb(who).blocked_on == inner as *const () {
        (*inner).receivers.remove(&mut k.tasks, who);
        return Err(KernelError::Timeout);
    }

    if (*inner).count == 0 {
        log::error!("queue receive woken with nothing queued");
        return Err(KernelError::Empty);
    }

    take(inner, buffer);
    if let Some(sender) = (*inner).senders.pop_highest(&mut k.tasks) {
        k.task_unblock(sender);
    }
    Ok(())
}

unsafe fn reset_inner(k: &mut Kernel, inner: *mut QueueInner) {
    (*inner).count = 0;
    (*inner).read_index = 0;
    (*inner).write_index = 0;

    while let Some(sender) = (*inner).senders.pop_highest(&mut k.tasks) {
        k.task_unblock(sender);
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
