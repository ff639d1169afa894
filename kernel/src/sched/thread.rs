//! The thread control block and the small enums hung off it.
extern crate alloc;

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;

use arch_x86_64::memory::PhysicalFrame;
use boot_api::VirtualMemoryRegion;

pub type Tid = u32;
pub type EntryPoint = extern "C" fn(*mut ()) -> i32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadKind {
    Kernel,
    User,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Ready,
    Running,
    Sleeping,
    Waiting,
    Zombie,
    Dead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Sem,
    Mutex,
    Io,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnState {
    Running,
    Returned,
    Killed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationCause {
    Normal,
    DivByZero,
    InvalidOpcode,
    PageFault,
    Killed,
}

/// Saved register state a naked context switch restores. Only the
/// callee-saved slots the switch stub itself touches need to live here;
/// everything else is already on the stack `stack_pointer` points at.
#[derive(Debug, Clone, Copy)]
pub struct CpuContext {
    pub stack_pointer: u64,
    pub page_table: PhysicalFrame,
}

pub struct ThreadControlBlock {
    pub tid: Tid,
    pub ptid: Option<Tid>,
    pub name: String,
    pub kind: ThreadKind,
    pub init_priority: u8,
    pub priority: u8,
    pub state: ThreadState,
    pub block_type: Option<BlockKind>,
    pub return_state: ReturnState,
    pub termination_cause: TerminationCause,
    pub entry: EntryPoint,
    pub arg: *mut (),
    pub return_value: Option<i32>,
    pub context: CpuContext,
    pub kernel_stack: VirtualMemoryRegion,
    pub user_stack: VirtualMemoryRegion,
    pub wakeup_time: Option<u64>,
    pub children: Vec<Tid>,
    pub joiner: Option<Tid>,
    pub start_time: u64,
    pub end_time: Option<u64>,
    pub cpu_affinity: u8,
}

unsafe impl Send for ThreadControlBlock {}

impl ThreadControlBlock {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tid: Tid,
        ptid: Option<Tid>,
        name: String,
        kind: ThreadKind,
        priority: u8,
        entry: EntryPoint,
        arg: *mut (),
        context: CpuContext,
        kernel_stack: VirtualMemoryRegion,
        user_stack: VirtualMemoryRegion,
        start_time: u64,
    ) -> Box<Self> {
        Box::new(Self {
            tid,
            ptid,
            name,
            kind,
            init_priority: priority,
            priority,
            state: ThreadState::Ready,
            block_type: None,
            return_state: ReturnState::Running,
            termination_cause: TerminationCause::Normal,
            entry,
            arg,
            return_value: None,
            context,
            kernel_stack,
            user_stack,
            wakeup_time: None,
            children: Vec::new(),
            joiner: None,
            start_time,
            end_time: None,
            cpu_affinity: 0,
        })
    }
}
