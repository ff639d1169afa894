//! C7: the preemptive, priority-based scheduler. Ready queues are drained
//! strictly by priority; the timer tick drives election exactly as the
//! teacher's own `Scheduler::schedule` drives its single `VecDeque`, just
//! generalized to `PRIORITY_LEVELS` queues plus a sleep queue.
pub mod thread;

extern crate alloc;

use alloc::boxed::Box;
use alloc::collections::{BTreeMap, BinaryHeap, VecDeque};
use alloc::string::String;
use alloc::vec::Vec;
use core::arch::asm;
use core::cmp::Reverse;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use arch_x86_64::memory::Address;
use arch_x86_64::register::Cr3;
use boot_api::{BootInfo, VirtualMemoryRegion};
use lazy_static::lazy_static;
use util::Mutex;

use crate::config::{IDLE_PRIORITY, INIT_PRIORITY, MAX_SYSTEM_THREADS, PRIORITY_LEVELS};
use crate::error::KernelError;
use thread::{
    BlockKind, CpuContext, EntryPoint, ReturnState, TerminationCause, ThreadControlBlock, ThreadKind,
    ThreadState, Tid,
};

/// A queue node handed back by `sched_lock_current`, letting a sync
/// primitive enqueue the caller into its own waiters list and later name it
/// again in `sched_unlock`.
pub struct QueueNode {
    pub tid: Tid,
    pub block_type: BlockKind,
}

struct SleepEntry {
    wake_at: u64,
    tid: Tid,
}

impl PartialEq for SleepEntry {
    fn eq(&self, other: &Self) -> bool {
        self.wake_at == other.wake_at
    }
}
impl Eq for SleepEntry {}
impl PartialOrd for SleepEntry {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for SleepEntry {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        self.wake_at.cmp(&other.wake_at)
    }
}

struct Scheduler {
    all_threads: BTreeMap<Tid, Box<ThreadControlBlock>>,
    ready: [VecDeque<Tid>; PRIORITY_LEVELS],
    sleeping: BinaryHeap<Reverse<SleepEntry>>,
    zombies: VecDeque<Tid>,
    current: Option<Tid>,
    idle_tid: Option<Tid>,
    init_tid: Option<Tid>,
    first_schedule_done: bool,
}

impl Scheduler {
    const fn new() -> Self {
        const EMPTY: VecDeque<Tid> = VecDeque::new();
        Self {
            all_threads: BTreeMap::new(),
            ready: [EMPTY; PRIORITY_LEVELS],
            sleeping: BinaryHeap::new(),
            zombies: VecDeque::new(),
            current: None,
            idle_tid: None,
            init_tid: None,
            first_schedule_done: false,
        }
    }
}

lazy_static! {
    static ref SCHEDULER: Mutex<Scheduler> = Mutex::new(Scheduler::new());
}

static NEXT_TID: AtomicU32 = AtomicU32::new(1);
static TICKS: AtomicU64 = AtomicU64::new(0);

fn now_ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

fn ms_to_ticks(ms: u64) -> u64 {
    (ms * crate::config::TICK_HZ as u64) / 1000
}

/// Brings up the init thread (running on the current, already-executing
/// stack) and the idle thread, then arms the timer tick as the election
/// driver.
pub fn init(boot_info: &BootInfo) -> Result<(), KernelError> {
    let (pml4t, _) = Cr3::read();
    let init_tid = alloc_tid();
    let init_tcb = ThreadControlBlock::new(
        init_tid,
        None,
        String::from("init"),
        ThreadKind::Kernel,
        INIT_PRIORITY,
        init_trampoline,
        core::ptr::null_mut(),
        CpuContext { stack_pointer: 0, page_table: pml4t },
        boot_info.kernel_stack,
        boot_info.kernel_stack,
        now_ticks(),
    );

    {
        let mut sched = SCHEDULER.lock();
        let mut tcb = init_tcb;
        tcb.state = ThreadState::Running;
        sched.init_tid = Some(init_tid);
        sched.current = Some(init_tid);
        sched.all_threads.insert(init_tid, tcb);
    }

    spawn_idle()?;

    crate::timer::set_handler(on_timer_tick);
    Ok(())
}

/// The init thread never exits and is never reparented onto anything; it
/// joins whichever children accumulate in its list (normally just `main`,
/// once a caller spawns one) and halts the system once it has seen
/// `MAX_SYSTEM_THREADS`. The idle thread is deliberately not one of those
/// children (see `spawn_idle`): it runs forever by contract and joining it
/// would wedge `init` permanently.
extern "C" fn init_trampoline(_arg: *mut ()) -> i32 {
    loop {
        let children = {
            let sched = SCHEDULER.lock();
            let tid = sched.current.expect("init thread is always current here");
            sched.all_threads.get(&tid).map(|t| t.children.clone()).unwrap_or_default()
        };
        for child in &children {
            let _ = sched_wait_thread(*child);
        }
        if children.len() >= MAX_SYSTEM_THREADS {
            loop {
                unsafe { arch_x86_64::interrupts::disable() };
                arch_x86_64::instructions::hlt();
            }
        }
        yield_now();
    }
}

fn alloc_tid() -> Tid {
    NEXT_TID.fetch_add(1, Ordering::Relaxed)
}

extern "C" fn idle_entry(_arg: *mut ()) -> i32 {
    loop {
        unsafe { arch_x86_64::interrupts::enable() };
        arch_x86_64::instructions::hlt();
    }
}

/// Spawned like any other thread, then immediately un-parented from
/// `init`'s child list: idle never terminates, so `init` must never wait
/// on it.
fn spawn_idle() -> Result<(), KernelError> {
    let tid = create_thread("idle", ThreadKind::Kernel, IDLE_PRIORITY, idle_entry, core::ptr::null_mut())?;
    let mut sched = SCHEDULER.lock();
    sched.idle_tid = Some(tid);
    if let Some(init_tid) = sched.init_tid {
        if let Some(init_tcb) = sched.all_threads.get_mut(&init_tid) {
            init_tcb.children.retain(|&c| c != tid);
        }
    }
    Ok(())
}

/// Builds a fresh kernel stack frame so the first context switch into this
/// thread "returns" into `entry_trampoline`, mirroring the teacher's own
/// `save_state!`/`restore_state!` register layout.
fn prepare_initial_stack(stack_top: u64) -> u64 {
    unsafe {
        let mut rsp = stack_top as *mut u64;
        // Return address `task_switch`'s `ret` will pop.
        rsp = rsp.sub(1);
        rsp.write(entry_trampoline as usize as u64);
        // r15..rax placeholders restored by `restore_state!`, in push order
        // r11 down to rax plus rflags: 16 qwords, entry/arg passed through
        // statics instead of registers to keep the stub parameterless.
        for _ in 0..16 {
            rsp = rsp.sub(1);
            rsp.write(0);
        }
        rsp as u64
    }
}

/// `entry_trampoline` can't receive the thread's entry/arg as register
/// arguments (the naked switch stub doesn't pass any), so each new thread's
/// entry point is recorded here, keyed by tid, at creation time and read
/// back once on its first dispatch. This kernel has no TLS, so a shared map
/// keyed by tid stands in for one; the argument pointer is stored as a
/// `usize` so the map stays `Send`.
static CURRENT_ENTRY: Mutex<BTreeMap<Tid, (EntryPoint, usize)>> = Mutex::new(BTreeMap::new());

extern "C" fn entry_trampoline() -> ! {
    let tid = current_tid().expect("entry_trampoline running without a current thread");
    let (entry, arg) = CURRENT_ENTRY
        .lock()
        .get(&tid)
        .copied()
        .expect("thread entry point not recorded");
    let rc = entry(arg as *mut ());
    terminate_current(TerminationCause::Normal, rc);
}

#[allow(clippy::too_many_arguments)]
pub fn create_thread(
    name: &str,
    kind: ThreadKind,
    priority: u8,
    entry: EntryPoint,
    arg: *mut (),
) -> Result<Tid, KernelError> {
    if priority as usize >= PRIORITY_LEVELS {
        return Err(KernelError::ForbiddenPriority);
    }
    let tid = alloc_tid();

    let stack_size = 16 * 1024;
    let stack_base = crate::mm::page_allocator::alloc_pages(stack_size / arch_x86_64::memory::PAGE_SIZE)?;
    let stack = VirtualMemoryRegion { start: stack_base.as_u64(), len: stack_size };
    crate::mm::mapper::map_alloc(
        stack_base,
        stack_size,
        crate::mm::mapper::MapFlags::WRITABLE,
    )?;

    let stack_top = stack_base.as_u64() + stack_size;
    CURRENT_ENTRY.lock().insert(tid, (entry, arg as usize));
    let rsp = prepare_initial_stack(stack_top);

    let (pml4t, _) = Cr3::read();
    let mut sched = SCHEDULER.lock();
    let ptid = sched.current;
    let mut tcb = ThreadControlBlock::new(
        tid,
        ptid,
        String::from(name),
        kind,
        priority,
        entry,
        arg,
        CpuContext { stack_pointer: rsp, page_table: pml4t },
        stack,
        stack,
        now_ticks(),
    );
    tcb.state = ThreadState::Ready;
    if let Some(parent) = ptid {
        if let Some(parent_tcb) = sched.all_threads.get_mut(&parent) {
            parent_tcb.children.push(tid);
        }
    }
    sched.ready[priority as usize].push_back(tid);
    sched.all_threads.insert(tid, tcb);
    Ok(tid)
}

pub fn current_tid() -> Option<Tid> {
    SCHEDULER.lock().current
}

/// `sched_sleep(ms)`: transitions the current thread to `Sleeping` and
/// yields. Returns once woken by a subsequent tick.
pub fn sched_sleep(ms: u64) {
    let prev = crate::interrupts::disable_local_interrupts();
    {
        let mut sched = SCHEDULER.lock();
        if let Some(tid) = sched.current {
            let wake_at = now_ticks() + ms_to_ticks(ms);
            if let Some(tcb) = sched.all_threads.get_mut(&tid) {
                tcb.state = ThreadState::Sleeping;
                tcb.wakeup_time = Some(wake_at);
            }
        }
    }
    crate::interrupts::restore_local_interrupts(prev);
    yield_now();
}

/// `sched_lock_current(kind)`: records the block reason and returns a node
/// the caller enqueues into its own waiters list.
pub fn sched_lock_current(kind: BlockKind) -> QueueNode {
    let mut sched = SCHEDULER.lock();
    let tid = sched.current.expect("sched_lock_current with no running thread");
    if let Some(tcb) = sched.all_threads.get_mut(&tid) {
        tcb.state = ThreadState::Waiting;
        tcb.block_type = Some(kind);
    }
    QueueNode { tid, block_type: kind }
}

/// `sched_unlock(node, kind)`: wakes the thread named by `node`, failing if
/// it was blocked for a different reason than `kind`. Only moves the
/// thread to its ready queue -- it does not itself preempt the caller;
/// callers that need the immediate-reschedule half of the contract (e.g.
/// `Semaphore::post`) call `yield_now` themselves afterward.
pub fn sched_unlock(node: QueueNode, kind: BlockKind) -> Result<(), KernelError> {
    if node.block_type != kind {
        return Err(match kind {
            BlockKind::Sem => KernelError::NoSemBlocked,
            BlockKind::Mutex => KernelError::NoMutexBlocked,
            BlockKind::Io => KernelError::NoSemBlocked,
        });
    }
    let mut sched = SCHEDULER.lock();
    if let Some(tcb) = sched.all_threads.get_mut(&node.tid) {
        tcb.state = ThreadState::Ready;
        tcb.block_type = None;
        let priority = tcb.priority as usize;
        sched.ready[priority].push_back(node.tid);
    }
    Ok(())
}

fn terminate_current(cause: TerminationCause, return_value: i32) -> ! {
    {
        let mut sched = SCHEDULER.lock();
        let tid = sched.current.expect("terminate_current with no running thread");
        let init_tid = sched.init_tid;
        let end = now_ticks();
        let children = if let Some(tcb) = sched.all_threads.get_mut(&tid) {
            tcb.state = ThreadState::Zombie;
            tcb.return_state = if matches!(cause, TerminationCause::Normal) {
                ReturnState::Returned
            } else {
                ReturnState::Killed
            };
            tcb.termination_cause = cause;
            tcb.return_value = Some(return_value);
            tcb.end_time = Some(end);
            core::mem::take(&mut tcb.children)
        } else {
            Vec::new()
        };
        if let Some(init_tid) = init_tid {
            for child in children {
                if let Some(child_tcb) = sched.all_threads.get_mut(&child) {
                    child_tcb.ptid = Some(init_tid);
                }
                if let Some(init_tcb) = sched.all_threads.get_mut(&init_tid) {
                    init_tcb.children.push(child);
                }
            }
        }
        sched.zombies.push_back(tid);
    }
    loop {
        yield_now();
    }
}

pub fn sched_terminate_current(cause: TerminationCause) -> ! {
    terminate_current(cause, -1)
}

/// Blocks until `tid` reaches `Zombie`, then reaps it (frees its stacks and
/// TCB) and returns its exit value.
pub fn sched_wait_thread(tid: Tid) -> Result<i32, KernelError> {
    loop {
        {
            let mut sched = SCHEDULER.lock();
            let zombie = matches!(sched.all_threads.get(&tid).map(|t| t.state), Some(ThreadState::Zombie));
            if zombie {
                if let Some(tcb) = sched.all_threads.remove(&tid) {
                    sched.zombies.retain(|&z| z != tid);
                    let rc = tcb.return_value.unwrap_or(-1);
                    drop(sched);
                    let _ = crate::mm::mapper::unmap(
                        arch_x86_64::memory::VirtualAddress::new(tcb.kernel_stack.start),
                        tcb.kernel_stack.len,
                    );
                    return Ok(rc);
                }
            }
        }
        yield_now();
    }
}

/// Invoked from interrupt context on every timer tick: wakes due sleepers
/// and runs an election.
pub fn on_timer_tick() {
    TICKS.fetch_add(1, Ordering::Relaxed);
    let mut sched = SCHEDULER.lock();
    let now = now_ticks();
    while let Some(Reverse(entry)) = sched.sleeping.peek() {
        if entry.wake_at > now {
            break;
        }
        let Reverse(entry) = sched.sleeping.pop().unwrap();
        if let Some(tcb) = sched.all_threads.get_mut(&entry.tid) {
            if tcb.state == ThreadState::Sleeping {
                tcb.state = ThreadState::Ready;
                let priority = tcb.priority as usize;
                sched.ready[priority].push_back(entry.tid);
            }
        }
    }
    drop(sched);
    schedule();
}

/// Cooperative yield: runs the same election the timer tick runs, usable
/// outside interrupt context (e.g. from `sched_sleep`, `sem_pend`).
pub fn yield_now() {
    schedule();
}

/// Steps 1-5 of the election algorithm from the component design: park the
/// current thread in its right queue, drain due sleepers, pick the next
/// ready thread, and switch.
fn schedule() {
    let prev = crate::interrupts::disable_local_interrupts();
    let switch = {
        let mut sched = SCHEDULER.lock();

        if let Some(current) = sched.current {
            if sched.first_schedule_done {
                requeue_current(&mut sched, current);
            }
        }

        let next = pick_next(&mut sched);
        let Some(next_tid) = next else {
            crate::interrupts::restore_local_interrupts(prev);
            return;
        };

        let old_tid = sched.current;
        sched.current = Some(next_tid);
        if let Some(tcb) = sched.all_threads.get_mut(&next_tid) {
            tcb.state = ThreadState::Running;
        }

        let first = !sched.first_schedule_done;
        sched.first_schedule_done = true;

        if old_tid == Some(next_tid) {
            None
        } else {
            let new_ctx = sched.all_threads.get(&next_tid).map(|t| t.context).unwrap();
            let old_ctx_ptr = old_tid
                .and_then(|t| sched.all_threads.get_mut(&t))
                .map(|t| &mut t.context as *mut CpuContext);
            Some((first, old_ctx_ptr, new_ctx))
        }
    };

    if let Some((first, old_ctx_ptr, new_ctx)) = switch {
        if first || old_ctx_ptr.is_none() {
            unsafe { load_context_and_return(new_ctx) };
        } else {
            let old_ctx_ptr = old_ctx_ptr.unwrap();
            unsafe { task_switch(old_ctx_ptr, new_ctx.stack_pointer, new_ctx.page_table.start()) };
        }
    }
    crate::interrupts::restore_local_interrupts(prev);
}

fn requeue_current(sched: &mut Scheduler, tid: Tid) {
    let Some(tcb) = sched.all_threads.get(&tid) else { return };
    match tcb.state {
        ThreadState::Running | ThreadState::Ready => {
            let priority = tcb.priority as usize;
            sched.ready[priority].push_back(tid);
            if let Some(tcb) = sched.all_threads.get_mut(&tid) {
                tcb.state = ThreadState::Ready;
            }
        }
        ThreadState::Sleeping => {
            let wake_at = tcb.wakeup_time.unwrap_or(now_ticks());
            sched.sleeping.push(Reverse(SleepEntry { wake_at, tid }));
        }
        // Waiting/Zombie threads are owned by a sync primitive's waiters
        // list or the zombie queue respectively; nothing to requeue here.
        ThreadState::Waiting | ThreadState::Zombie | ThreadState::Dead => {}
    }
}

fn pick_next(sched: &mut Scheduler) -> Option<Tid> {
    for level in sched.ready.iter_mut() {
        if let Some(tid) = level.pop_front() {
            return Some(tid);
        }
    }
    None
}

macro_rules! save_state {
    () => {
        "pushfq; push rax; push rcx; push rdx; push rbx; sub rsp, 8; push rbp; push rsi; push rdi; push r8; push r9; push r10; push r11; push r12; push r13; push r14; push r15"
    };
}

macro_rules! restore_state {
    () => {
        "pop r15; pop r14; pop r13; pop r12; pop r11; pop r10; pop r9; pop r8; pop rdi; pop rsi; pop rbp; add rsp, 8; pop rbx; pop rdx; pop rcx; pop rax; popfq"
    };
}

/// Saves the outgoing thread's callee-saved registers onto its own stack,
/// swaps `rsp`, conditionally reloads `cr3`, and restores the incoming
/// thread's registers from its stack -- identical shape to the teacher's
/// own `task_switch`, generalized to an always-possibly-different `cr3`.
#[unsafe(naked)]
unsafe extern "C" fn task_switch(old_ctx: *mut CpuContext, new_rsp: u64, new_cr3: u64) {
    core::arch::naked_asm!(
        save_state!(),
        "mov [rdi], rsp",
        "mov rsp, rsi",
        "mov rax, cr3",
        "cmp rax, rdx",
        "je 1f",
        "mov cr3, rdx",
        "1:",
        restore_state!(),
        "ret",
    )
}

/// Used only for the very first dispatch into a brand-new thread, where
/// there is no "old" context to save: load `rsp`/`cr3` and fall through the
/// restore sequence straight into `entry_trampoline`.
unsafe fn load_context_and_return(ctx: CpuContext) -> ! {
    unsafe {
        asm!(
            "mov cr3, {cr3}",
            "mov rsp, {rsp}",
            restore_state!(),
            "ret",
            cr3 = in(reg) ctx.page_table.start(),
            rsp = in(reg) ctx.stack_pointer,
            options(noreturn)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    extern crate std;

    fn dummy_tcb(tid: Tid, priority: u8, state: ThreadState) -> Box<ThreadControlBlock> {
        use arch_x86_64::memory::PhysicalFrame;
        let mut tcb = ThreadControlBlock::new(
            tid,
            None,
            String::from("t"),
            ThreadKind::Kernel,
            priority,
            idle_entry,
            core::ptr::null_mut(),
            CpuContext {
                stack_pointer: 0,
                page_table: PhysicalFrame::containing_address(arch_x86_64::memory::PhysicalAddress::new(0)),
            },
            VirtualMemoryRegion { start: 0, len: 0 },
            VirtualMemoryRegion { start: 0, len: 0 },
            0,
        );
        tcb.state = state;
        tcb
    }

    #[test]
    fn sleep_heap_orders_by_earliest_wake() {
        let mut sleeping = BinaryHeap::new();
        sleeping.push(Reverse(SleepEntry { wake_at: 50, tid: 1 }));
        sleeping.push(Reverse(SleepEntry { wake_at: 10, tid: 2 }));
        sleeping.push(Reverse(SleepEntry { wake_at: 30, tid: 3 }));

        let Reverse(first) = sleeping.pop().unwrap();
        assert_eq!(first.tid, 2);
        let Reverse(second) = sleeping.pop().unwrap();
        assert_eq!(second.tid, 3);
        let Reverse(third) = sleeping.pop().unwrap();
        assert_eq!(third.tid, 1);
    }

    #[test]
    fn pick_next_drains_highest_priority_first() {
        let mut sched = Scheduler::new();
        sched.all_threads.insert(1, dummy_tcb(1, 2, ThreadState::Ready));
        sched.all_threads.insert(2, dummy_tcb(2, 0, ThreadState::Ready));
        sched.ready[2].push_back(1);
        sched.ready[0].push_back(2);

        assert_eq!(pick_next(&mut sched), Some(2));
        assert_eq!(pick_next(&mut sched), Some(1));
        assert_eq!(pick_next(&mut sched), None);
    }

    #[test]
    fn requeue_current_routes_sleeping_thread_to_sleep_heap() {
        let mut sched = Scheduler::new();
        let mut tcb = dummy_tcb(1, 3, ThreadState::Sleeping);
        tcb.wakeup_time = Some(42);
        sched.all_threads.insert(1, tcb);

        requeue_current(&mut sched, 1);

        assert!(sched.ready[3].is_empty());
        assert_eq!(sched.sleeping.len(), 1);
        let Reverse(entry) = sched.sleeping.peek().unwrap();
        assert_eq!(entry.wake_at, 42);
    }

    #[test]
    fn requeue_current_routes_ready_thread_back_to_its_level() {
        let mut sched = Scheduler::new();
        sched.all_threads.insert(1, dummy_tcb(1, 5, ThreadState::Running));

        requeue_current(&mut sched, 1);

        assert_eq!(sched.ready[5].len(), 1);
        assert_eq!(sched.ready[5][0], 1);
    }
}
