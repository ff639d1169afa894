//! Build-time configuration constants. There is no runtime config file —
//! everything here is a `const`, matching the teacher's own hard-coded
//! limits rather than a parsed settings blob.

/// Only one CPU is actually brought up (SMP bring-up is out of scope); this
/// stays as a named constant so the TCB's `cpu_affinity` field has honest
/// bounds to document rather than a magic `0`.
pub const MAX_CPU_COUNT: usize = 1;

/// Scheduler tick rate, also the default PIT programming frequency.
pub const TICK_HZ: u32 = crate::timer::DEFAULT_FREQUENCY_HZ;

/// Number of distinct ready-queue priority levels. Level 0 is highest
/// priority; `PRIORITY_LEVELS - 1` is reserved for the idle thread.
pub const PRIORITY_LEVELS: usize = 8;
pub const IDLE_PRIORITY: u8 = (PRIORITY_LEVELS - 1) as u8;
pub const INIT_PRIORITY: u8 = 0;

/// The init thread halts the system once it has joined this many direct
/// children: the `main` thread it kickstarts, plus the idle thread.
pub const MAX_SYSTEM_THREADS: usize = 2;
