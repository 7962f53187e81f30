//! # Software Timers
//!
//! One-shot and auto-reload timers driven by the kernel tick. All active
//! timers chain in a single list sorted by absolute expiry instant, so
//! the per-tick cost is one head comparison until something is actually
//! due.
//!
//! Expiry runs the callback from tick context at kernel interrupt
//! priority: callbacks must be short and MUST NOT block. Auto-reload
//! re-arming advances from the previous expiry instant — not from "now" —
//! so periodic timers do not drift; when a callback overruns whole
//! periods, the expiry is advanced repeatedly until it lands strictly in
//! the future, which bounds a late timer to a single catch-up firing.

use core::ptr::NonNull;

use crate::error::KernelError;
use crate::kernel::{with_kernel, Kernel};
use crate::time::{tick_before, tick_reached, Tick};

/// What happens after a timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerMode {
    /// Fire once and deactivate.
    OneShot,
    /// Re-arm drift-free every `period` ticks until stopped.
    AutoReload,
}

/// Expiry callback. Runs in tick context; must not block or take
/// kernel-visible time.
pub type TimerCallback = fn(timer: Timer, parameter: *mut ());

pub(crate) struct TimerControl {
    name: &'static str,
    period: Tick,
    /// Absolute expiry instant; valid while `linked`.
    expiry_time: Tick,
    mode: TimerMode,
    callback: TimerCallback,
    parameter: *mut (),
    active: bool,
    /// Membership in the active list. Distinct from `active`: an expired
    /// auto-reload timer is active but momentarily unlinked while its
    /// callback runs, and the callback may legally restart or stop it.
    linked: bool,
    next: Option<NonNull<TimerControl>>,
}

/// Handle to a kernel-allocated software timer. Copyable; all state
/// lives in the arena behind the handle.
#[derive(Clone, Copy)]
pub struct Timer {
    pub(crate) control: NonNull<TimerControl>,
}

// Timer state is only touched under the kernel critical mask.
unsafe impl Send for Timer {}
unsafe impl Sync for Timer {}

impl Timer {
    /// Allocate a timer from the kernel arena, created inactive. A zero
    /// `period` is rejected.
    pub fn create(
        name: &'static str,
        period: Tick,
        mode: TimerMode,
        callback: TimerCallback,
        parameter: *mut (),
    ) -> Result<Timer, KernelError> {
        if period == 0 {
            return Err(KernelError::InvalidParam);
        }

        with_kernel(|k| {
            let control = k
                .arena
                .alloc(
                    core::mem::size_of::<TimerControl>(),
                    core::mem::align_of::<TimerControl>(),
                )
                .ok_or(KernelError::NoMemory)?
                .cast::<TimerControl>();

            unsafe {
                control.as_ptr().write(TimerControl {
                    name,
                    period,
                    expiry_time: 0,
                    mode,
                    callback,
                    parameter,
                    active: false,
                    linked: false,
                    next: None,
                });
            }

            log::debug!("timer '{}' created: period={} ticks", name, period);
            Ok(Timer { control })
        })
    }

    /// Arm the timer to fire `period` ticks from now. Starting an
    /// already-armed timer re-arms it from now.
    pub fn start(&self) -> Result<(), KernelError> {
        let control = self.control.as_ptr();
        with_kernel(|k| unsafe {
            if (*control).linked {
                k.timers.remove(self.control);
            }
            (*control).expiry_time = k.now().wrapping_add((*control).period);
            (*control).active = true;
            k.timers.insert(self.control);
            Ok(())
        })
    }

    /// Disarm the timer. A pending expiry is discarded.
    pub fn stop(&self) -> Result<(), KernelError> {
        let control = self.control.as_ptr();
        with_kernel(|k| unsafe {
            if (*control).linked {
                k.timers.remove(self.control);
            }
            (*control).active = false;
            Ok(())
        })
    }

    /// Change the period. An active timer is re-armed with the new
    /// period measured from now.
    pub fn change_period(&self, new_period: Tick) -> Result<(), KernelError> {
        if new_period == 0 {
            return Err(KernelError::InvalidParam);
        }
        let control = self.control.as_ptr();
        with_kernel(|k| unsafe {
            (*control).period = new_period;
            if (*control).active {
                if (*control).linked {
                    k.timers.remove(self.control);
                }
                (*control).expiry_time = k.now().wrapping_add(new_period);
                k.timers.insert(self.control);
            }
            Ok(())
        })
    }

    pub fn is_active(&self) -> bool {
        let control = self.control.as_ptr();
        with_kernel(|_k| unsafe { (*control).active })
    }

    pub fn period(&self) -> Tick {
        let control = self.control.as_ptr();
        with_kernel(|_k| unsafe { (*control).period })
    }

    pub fn name(&self) -> &'static str {
        let control = self.control.as_ptr();
        with_kernel(|_k| unsafe { (*control).name })
    }
}

// ---------------------------------------------------------------------------
// Active-timer list
// ---------------------------------------------------------------------------

/// Singly-linked list of armed timers, sorted ascending by expiry
/// (signed-difference order, wrap-safe).
pub(crate) struct TimerList {
    head: Option<NonNull<TimerControl>>,
}

impl TimerList {
    pub(crate) const fn new() -> Self {
        Self { head: None }
    }

    pub(crate) fn clear(&mut self) {
        self.head = None;
    }

    pub(crate) fn insert(&mut self, timer: NonNull<TimerControl>) {
        unsafe {
            let expiry = (*timer.as_ptr()).expiry_time;
            (*timer.as_ptr()).linked = true;

            let mut prev: Option<NonNull<TimerControl>> = None;
            let mut cursor = self.head;
            while let Some(c) = cursor {
                if tick_before(expiry, (*c.as_ptr()).expiry_time) {
                    break;
                }
                prev = Some(c);
                cursor = (*c.as_ptr()).next;
            }

            (*timer.as_ptr()).next = cursor;
            match prev {
                Some(p) => (*p.as_ptr()).next = Some(timer),
                None => self.head = Some(timer),
            }
        }
    }

    pub(crate) fn remove(&mut self, timer: NonNull<TimerControl>) {
        unsafe {
            let mut prev: Option<NonNull<TimerControl>> = None;
            let mut cursor = self.head;
            while let Some(c) = cursor {
                if c == timer {
                    match prev {
                        Some(p) => (*p.as_ptr()).next = (*c.as_ptr()).next,
                        None => self.head = (*c.as_ptr()).next,
                    }
                    (*timer.as_ptr()).next = None;
                    (*timer.as_ptr()).linked = false;
                    return;
                }
                prev = Some(c);
                cursor = (*c.as_ptr()).next;
            }
        }
    }

    /// Detach and return the head if it has expired.
    fn pop_expired(&mut self, now: Tick) -> Option<NonNull<TimerControl>> {
        let head = self.head?;
        unsafe {
            if !tick_reached(now, (*head.as_ptr()).expiry_time) {
                return None;
            }
            self.head = (*head.as_ptr()).next;
            (*head.as_ptr()).next = None;
            (*head.as_ptr()).linked = false;
        }
        Some(head)
    }

    pub(crate) fn len(&self) -> usize {
        let mut count = 0;
        let mut cursor = self.head;
        while let Some(c) = cursor {
            count += 1;
            cursor = unsafe { (*c.as_ptr()).next };
        }
        count
    }
}

// ---------------------------------------------------------------------------
// Tick-side processing
// ---------------------------------------------------------------------------

/// Fire every expired timer. Called from the tick handler with `kernel`
/// raw so callbacks run with no outstanding `&mut Kernel` borrow — a
/// callback may start, stop or re-period timers (its own included), but
/// it must not block.
pub(crate) unsafe fn process_tick(kernel: *mut Kernel, now: Tick) {
    loop {
        let expired = {
            let k = &mut *kernel;
            k.timers.pop_expired(now)
        };
        let Some(timer) = expired else {
            return;
        };

        let control = timer.as_ptr();
        let callback = (*control).callback;
        let parameter = (*control).parameter;
        let mode = (*control).mode;

        // A one-shot is done before its callback runs, so the callback
        // can re-start it without the state fighting back.
        if mode == TimerMode::OneShot {
            (*control).active = false;
        }

        callback(Timer { control: timer }, parameter);

        if mode == TimerMode::AutoReload && (*control).active && !(*control).linked {
            let k = &mut *kernel;
            // Drift-free advance from the previous expiry; catch up past
            // any whole periods the callback burned.
            let mut expiry = (*control).expiry_time;
            loop {
                expiry = expiry.wrapping_add((*control).period);
                if !tick_reached(k.now(), expiry) {
                    break;
                }
            }
            (*control).expiry_time = expiry;
            k.timers.insert(timer);
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
