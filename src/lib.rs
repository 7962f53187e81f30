//! # kestrel — a preemptive real-time kernel for ARM Cortex-M
//!
//! kestrel multiplexes one CPU across a bounded set of tasks with strict,
//! predictable latency, and provides the synchronization primitives —
//! mutex with transitive priority inheritance, counting semaphore,
//! bounded message queue and software timers — that real-time
//! applications compose on top.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    Application Tasks                     │
//! ├──────────────────────────────────────────────────────────┤
//! │             Kernel API (kernel.rs, task.rs)              │
//! │   init() · create() · start() · delay() · yield_now()    │
//! ├──────────────┬──────────────────────┬────────────────────┤
//! │  Scheduler   │   Sync Primitives    │  Software Timers   │
//! │  sched/      │   sync/              │  timer.rs          │
//! │  ─ preemptive│   ─ Mutex (PI)       │  ─ one-shot        │
//! │  ─ cooperative   ─ Semaphore        │  ─ auto-reload     │
//! │  ─ round-robin   ─ Queue            │                    │
//! ├──────────────┴──────────────────────┴────────────────────┤
//! │            Task Model (task.rs, memory.rs)               │
//! │      TCB pool · stack arena · state transitions          │
//! ├──────────────────────────────────────────────────────────┤
//! │              Port Layer (arch/cortex_m4.rs)              │
//! │   PendSV · SVCall · SysTick · BASEPRI critical section   │
//! ├──────────────────────────────────────────────────────────┤
//! │              ARM Cortex-M4 Hardware (Thumb-2)            │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Scheduling disciplines
//!
//! Selected at build time through [`config::SCHEDULER_TYPE`]:
//!
//! - **Preemptive static priority** (default): the highest-priority ready
//!   task always runs; equal priorities share FIFO.
//! - **Cooperative**: tasks run until they yield or block.
//! - **Round-robin**: equal time slices with FIFO rotation.
//!
//! ## Memory model
//!
//! - No heap, no `alloc`: a fixed TCB pool plus one monotonic arena for
//!   task stacks, queue buffers and timer blocks, all sized in
//!   [`config`].
//! - Stacks carry a canary word; [`kernel::check_stacks`] sweeps them.
//! - Every shared structure is guarded by one nesting BASEPRI critical
//!   section; interrupts above the kernel priority are never masked and
//!   must never call the kernel.
//!
//! ## Diagnostics
//!
//! The kernel logs through the [`log`] facade. Install any `log::Log`
//! sink before [`kernel::init`] to capture kernel events; leave it out
//! and logging compiles down to nothing.
//!
//! ## Host testing
//!
//! Built for anything other than bare-metal ARM, the port layer swaps in
//! a simulation (`arch/host.rs`) and the whole kernel logic — scheduling,
//! blocking, timers, inheritance — runs under `cargo test` on the
//! development machine.

#![no_std]

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
extern crate std;

pub mod arch;
pub mod config;
pub mod error;
pub mod fault;
pub mod kernel;
pub mod memory;
pub mod sched;
pub mod sync;
pub mod task;
pub mod time;
pub mod timer;

#[cfg(test)]
pub(crate) mod testutil;

pub use error::KernelError;
pub use task::{Priority, TaskEntry, TaskHandle, TaskState};
pub use time::Tick;
