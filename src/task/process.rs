//! # 进程表与进程生命周期
//!
//! ## Overview
//! 进程表是固定大小的槽位数组，进程 ID 即槽位下标，
//! 空闲槽位通过 `next_free` 串成单链表。
//! - pid 0：idle 伪进程，没有父进程也没有线程
//! - pid 1：init 进程，没有父进程，收养所有孤儿
//!
//! ## Invariants
//! - `Free` 槽位只出现在空闲链表中
//! - 子进程在被父进程回收之前一直位于父进程的 `children` 中；
//!   成为僵尸后同时位于 `exited` 中
//! - 僵尸进程只在父进程执行 `WaitChild` 时释放槽位

use super::manager::ThreadKind;
use super::task::spawn_thread;
use super::{Pid, Task, Tid};
use crate::error::{KernelResult, SysError};
use crate::fs::{fcb_decref, FcbId};
use crate::kernel::{Kernel, KernelState, StateGuard};
use crate::sync::Condvar;
use log::{debug, trace, warn};
use std::collections::VecDeque;
use std::sync::Arc;

pub const IDLE_PID: Pid = 0;
pub const INIT_PID: Pid = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Free,
    Alive,
    Zombie,
}

pub(crate) struct ProcessControlBlock {
    pub state: ProcessState,
    /// 槽位每次被占用时递增，区分先后占用同一 pid 的进程
    pub generation: u64,
    pub parent: Option<Pid>,
    pub children: Vec<Pid>,
    /// 已成为僵尸、尚未回收的子进程，按退出先后排列
    pub exited: VecDeque<Pid>,
    /// 文件描述符表，下标即 fid
    pub fidt: Vec<Option<FcbId>>,
    /// 属于本进程、尚未释放的线程记录
    pub threads: Vec<Tid>,
    /// 仍在运行的线程数
    pub thread_count: usize,
    pub exitval: i32,
    pub argl: i32,
    pub args: Option<Vec<u8>>,
    /// 任一子进程退出时广播
    pub child_exit: Arc<Condvar>,
    next_free: Option<Pid>,
}

impl ProcessControlBlock {
    fn free(max_fileid: usize, next_free: Option<Pid>) -> Self {
        Self {
            state: ProcessState::Free,
            generation: 0,
            parent: None,
            children: Vec::new(),
            exited: VecDeque::new(),
            fidt: vec![None; max_fileid],
            threads: Vec::new(),
            thread_count: 0,
            exitval: 0,
            argl: 0,
            args: None,
            child_exit: Arc::new(Condvar::new()),
            next_free,
        }
    }
}

pub(crate) struct ProcessTable {
    pcbs: Vec<ProcessControlBlock>,
    free_head: Option<Pid>,
    max_fileid: usize,
    next_generation: u64,
}

impl ProcessTable {
    pub fn new(max_proc: usize, max_fileid: usize) -> Self {
        let pcbs = (0..max_proc)
            .map(|pid| {
                let next = if pid + 1 < max_proc { Some(pid + 1) } else { None };
                ProcessControlBlock::free(max_fileid, next)
            })
            .collect();
        Self {
            pcbs,
            free_head: if max_proc > 0 { Some(0) } else { None },
            max_fileid,
            next_generation: 1,
        }
    }

    /// 下一次 `acquire` 将返回的槽位
    pub fn peek_free(&self) -> Option<Pid> {
        self.free_head
    }

    /// 从空闲链表头取出一个槽位并初始化为 `Alive`
    pub fn acquire(&mut self) -> Option<Pid> {
        let pid = self.free_head?;
        let next = self.pcbs[pid].next_free;
        self.pcbs[pid] = ProcessControlBlock::free(self.max_fileid, None);
        self.pcbs[pid].state = ProcessState::Alive;
        self.pcbs[pid].generation = self.next_generation;
        self.next_generation += 1;
        self.free_head = next;
        Some(pid)
    }

    /// 槽位归还空闲链表头
    pub fn release(&mut self, pid: Pid) {
        self.pcbs[pid] = ProcessControlBlock::free(self.max_fileid, self.free_head);
        self.free_head = Some(pid);
    }

    pub fn get(&self, pid: Pid) -> Option<&ProcessControlBlock> {
        self.pcbs
            .get(pid)
            .filter(|pcb| pcb.state != ProcessState::Free)
    }

    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut ProcessControlBlock> {
        self.pcbs
            .get_mut(pid)
            .filter(|pcb| pcb.state != ProcessState::Free)
    }

    pub fn state(&self, pid: Pid) -> ProcessState {
        self.pcbs
            .get(pid)
            .map_or(ProcessState::Free, |pcb| pcb.state)
    }

    pub fn is_zombie(&self, pid: Pid) -> bool {
        self.state(pid) == ProcessState::Zombie
    }

    /// 僵尸进程的退出码
    pub fn exit_status(&self, pid: Pid) -> Option<i32> {
        self.get(pid)
            .filter(|pcb| pcb.state == ProcessState::Zombie)
            .map(|pcb| pcb.exitval)
    }

    /// 从 `from` 开始的第一个非空闲槽位
    pub fn next_used(&self, from: Pid) -> Option<(Pid, &ProcessControlBlock)> {
        self.pcbs
            .iter()
            .enumerate()
            .skip(from)
            .find(|(_, pcb)| pcb.state != ProcessState::Free)
    }
}

/// 创建进程
///
/// ## Behavior
/// - pid 大于 1 的进程挂到 `caller` 的子进程链表上，并继承其描述符表（共享引用计数加一）
/// - 参数块复制为进程自有的存储
/// - 主线程最后派生，派生失败时撤销全部簿记，进程表保持不变
///
/// ## Returns
/// - `Err(ResourceExhausted)`：进程表已满或无法派生线程
/// - `Err(NoTask)`：非 idle/init 进程缺少调用者
/// - `Err(InvalidHandle)`：普通进程缺少入口函数
pub(crate) fn exec(
    kernel: &Arc<Kernel>,
    st: &mut KernelState,
    caller: Option<Pid>,
    task: Option<Task>,
    argl: i32,
    args: Option<&[u8]>,
) -> KernelResult<Pid> {
    let pid = st.procs.peek_free().ok_or(SysError::ResourceExhausted)?;
    let parent = if pid > INIT_PID {
        Some(caller.ok_or(SysError::NoTask)?)
    } else {
        None
    };
    if task.is_none() && pid != IDLE_PID {
        return Err(SysError::InvalidHandle);
    }
    let inherited = match parent {
        Some(ppid) => st.procs.get(ppid).ok_or(SysError::NoTask)?.fidt.clone(),
        None => vec![None; st.config.max_fileid],
    };

    let acquired = st.procs.acquire();
    debug_assert_eq!(acquired, Some(pid));
    for fcb in inherited.iter().flatten() {
        st.files.incref(*fcb);
    }
    let owned_args = args.map(|args| args.to_vec());
    {
        let pcb = st.procs.get_mut(pid).ok_or(SysError::InvalidState)?;
        pcb.parent = parent;
        pcb.fidt = inherited;
        pcb.argl = argl;
        pcb.args = owned_args.clone();
    }
    if let Some(ppid) = parent {
        if let Some(ppcb) = st.procs.get_mut(ppid) {
            ppcb.children.push(pid);
        }
    }

    if let Some(task) = task {
        let thread_args = owned_args.unwrap_or_default();
        if let Err(err) = spawn_thread(kernel, st, pid, task, argl, thread_args, ThreadKind::Main)
        {
            rollback_exec(st, pid);
            return Err(err);
        }
    }
    debug!("exec: pid {} created by {:?}", pid, parent);
    Ok(pid)
}

fn rollback_exec(st: &mut KernelState, pid: Pid) {
    let (parent, fidt) = match st.procs.get_mut(pid) {
        Some(pcb) => (pcb.parent, core::mem::take(&mut pcb.fidt)),
        None => return,
    };
    if let Some(ppid) = parent {
        if let Some(ppcb) = st.procs.get_mut(ppid) {
            ppcb.children.retain(|&c| c != pid);
        }
    }
    for fcb in fidt.into_iter().flatten() {
        if let Err(err) = fcb_decref(st, fcb) {
            warn!("pid {}: closing fcb {} failed: {}", pid, fcb, err);
        }
    }
    st.procs.release(pid);
}

/// 等待并回收子进程
///
/// ## Behavior
/// - `target == Some(pid)`：`pid` 必须是 `caller` 的子进程，阻塞直到其成为僵尸
/// - `target == None`：没有任何子进程时立即失败，否则阻塞直到 `exited` 非空并回收最早退出者
/// - 每次被唤醒后都重新校验，期间子进程可能已被同进程的其他线程回收，
///   其槽位甚至可能已被新的子进程占用（以 `generation` 区分）
///
/// ## Returns
/// - `Ok((pid, exitval))`
pub(crate) fn wait_child(
    st: &mut StateGuard<'_>,
    caller: Pid,
    target: Option<Pid>,
) -> KernelResult<(Pid, i32)> {
    let cpid = match target {
        Some(cpid) => {
            let generation = st
                .procs
                .get(cpid)
                .ok_or(SysError::InvalidHandle)?
                .generation;
            loop {
                let child = st
                    .procs
                    .get(cpid)
                    .filter(|child| child.generation == generation)
                    .ok_or(SysError::InvalidHandle)?;
                if child.parent != Some(caller) {
                    return Err(SysError::InvalidHandle);
                }
                if child.state == ProcessState::Zombie {
                    break cpid;
                }
                let cv = st
                    .procs
                    .get(caller)
                    .ok_or(SysError::InvalidHandle)?
                    .child_exit
                    .clone();
                trace!("pid {} waiting for child {}", caller, cpid);
                cv.wait(st);
            }
        }
        None => loop {
            let pcb = st.procs.get(caller).ok_or(SysError::InvalidHandle)?;
            if pcb.children.is_empty() {
                return Err(SysError::NoChild);
            }
            if let Some(&cpid) = pcb.exited.front() {
                break cpid;
            }
            let cv = pcb.child_exit.clone();
            trace!("pid {} waiting for any child", caller);
            cv.wait(st);
        },
    };
    let status = cleanup_zombie(st, caller, cpid);
    debug!("pid {} reaped child {} (status {})", caller, cpid, status);
    Ok((cpid, status))
}

fn cleanup_zombie(st: &mut KernelState, parent: Pid, cpid: Pid) -> i32 {
    let status = st.procs.get(cpid).map_or(-1, |child| child.exitval);
    if let Some(ppcb) = st.procs.get_mut(parent) {
        ppcb.children.retain(|&c| c != cpid);
        ppcb.exited.retain(|&c| c != cpid);
    }
    st.procs.release(cpid);
    status
}

/// 进程最后一个线程退出时的拆除级联
///
/// ## Behavior
/// - init：反复回收子进程直到一个不剩，然后成为僵尸并唤醒 `boot`
/// - 其他进程：子进程过继给 init，未回收的僵尸子进程移入 init 的 `exited`，唤醒 init；
///   自身加入父进程的 `exited` 并唤醒父进程
/// - 之后释放参数块、描述符与剩余线程记录，状态置为 `Zombie`
pub(crate) fn terminate_process(kernel: &Kernel, st: &mut StateGuard<'_>, pid: Pid) {
    if pid == INIT_PID {
        while wait_child(st, INIT_PID, None).is_ok() {}
    } else {
        reparent_to_init(st, pid);
        let parent = st.procs.get(pid).and_then(|pcb| pcb.parent);
        if let Some(ppcb) = parent.and_then(|ppid| st.procs.get_mut(ppid)) {
            ppcb.exited.push_back(pid);
            ppcb.child_exit.broadcast();
        }
    }

    let (fidt, threads) = match st.procs.get_mut(pid) {
        Some(pcb) => {
            pcb.args = None;
            (core::mem::take(&mut pcb.fidt), core::mem::take(&mut pcb.threads))
        }
        None => return,
    };
    for fcb in fidt.into_iter().flatten() {
        if let Err(err) = fcb_decref(st, fcb) {
            warn!("pid {}: closing fcb {} failed: {}", pid, fcb, err);
        }
    }
    for tid in threads {
        st.threads.remove(tid);
    }
    if let Some(pcb) = st.procs.get_mut(pid) {
        pcb.state = ProcessState::Zombie;
    }
    debug!("pid {} is now a zombie", pid);
    if pid == INIT_PID {
        kernel.notify_halt();
    }
}

fn reparent_to_init(st: &mut KernelState, pid: Pid) {
    let (children, exited) = match st.procs.get_mut(pid) {
        Some(pcb) => (core::mem::take(&mut pcb.children), core::mem::take(&mut pcb.exited)),
        None => return,
    };
    for &child in &children {
        if let Some(cpcb) = st.procs.get_mut(child) {
            cpcb.parent = Some(INIT_PID);
        }
    }
    if let Some(init) = st.procs.get_mut(INIT_PID) {
        if !children.is_empty() {
            trace!("pid {} hands {} children to init", pid, children.len());
        }
        init.children.extend(children);
        init.exited.extend(exited);
        init.child_exit.broadcast();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_list_hands_out_ascending_pids_and_reuses_released_slots() {
        let mut table = ProcessTable::new(3, 4);
        assert_eq!(table.peek_free(), Some(0));
        assert_eq!(table.acquire(), Some(0));
        assert_eq!(table.acquire(), Some(1));
        assert_eq!(table.acquire(), Some(2));
        assert_eq!(table.acquire(), None);
        assert!((0..3).all(|pid| table.state(pid) == ProcessState::Alive));

        table.release(1);
        assert_eq!(table.state(1), ProcessState::Free);
        assert!(table.get(1).is_none());
        assert_eq!(table.acquire(), Some(1));
        assert_eq!(table.get(1).map(|pcb| pcb.fidt.len()), Some(4));
    }

    #[test]
    fn exit_status_is_only_visible_for_zombies() {
        let mut table = ProcessTable::new(2, 1);
        let pid = table.acquire().unwrap();
        table.get_mut(pid).unwrap().exitval = 7;
        assert_eq!(table.exit_status(pid), None);
        table.get_mut(pid).unwrap().state = ProcessState::Zombie;
        assert!(table.is_zombie(pid));
        assert_eq!(table.exit_status(pid), Some(7));
        assert_eq!(table.next_used(0).map(|(pid, _)| pid), Some(pid));
        assert!(table.next_used(pid + 1).is_none());
    }

    /// 子进程 `pid` 的槽位被回收后又分配给同一父进程的新子进程
    fn reap_and_reuse(st: &mut KernelState, parent: Pid, pid: Pid) -> Pid {
        st.procs.get_mut(pid).unwrap().state = ProcessState::Zombie;
        cleanup_zombie(st, parent, pid);
        let reused = st.procs.acquire().unwrap();
        let pcb = st.procs.get_mut(reused).unwrap();
        pcb.parent = Some(parent);
        pcb.exitval = 99;
        pcb.state = ProcessState::Zombie;
        st.procs.get_mut(parent).unwrap().children.push(reused);
        reused
    }

    #[test]
    fn waiting_on_a_pid_ignores_a_reused_slot() {
        let kernel = crate::Kernel::new(crate::KernelConfig::default().with_max_proc(4));
        let (parent, child) = {
            let mut st = kernel.exclusive_access();
            let parent = st.procs.acquire().unwrap();
            let child = st.procs.acquire().unwrap();
            st.procs.get_mut(child).unwrap().parent = Some(parent);
            st.procs.get_mut(parent).unwrap().children.push(child);
            (parent, child)
        };

        let waiter = {
            let kernel = Arc::clone(&kernel);
            std::thread::spawn(move || {
                let mut st = kernel.exclusive_access();
                wait_child(&mut st, parent, Some(child))
            })
        };
        std::thread::sleep(std::time::Duration::from_millis(50));
        {
            let mut st = kernel.exclusive_access();
            let first_generation = st.procs.get(child).unwrap().generation;
            let reused = reap_and_reuse(&mut st, parent, child);
            assert_eq!(reused, child);
            assert_ne!(st.procs.get(reused).unwrap().generation, first_generation);
            st.procs.get(parent).unwrap().child_exit.broadcast();
        }
        assert_eq!(waiter.join().unwrap(), Err(SysError::InvalidHandle));
        assert_eq!(kernel.exclusive_access().procs.state(child), ProcessState::Zombie);
    }
}

#[cfg(test)]
mod lifecycle_tests {
    use super::{ProcessState, INIT_PID};
    use crate::syscall::{sys_create_thread, sys_exec, sys_getpid, sys_getppid, sys_waitchild, NOPROC};
    use crate::test_util::{
        children_of, exited_children_of, process_state, run_kernel, run_kernel_with, thread_count,
        wait_for,
    };
    use crate::{KernelConfig, Pid, SysError};
    use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    static GATES: [AtomicBool; 3] = [
        AtomicBool::new(false),
        AtomicBool::new(false),
        AtomicBool::new(false),
    ];

    fn gated(argl: i32, _args: &[u8]) -> i32 {
        wait_for("gate", || GATES[argl as usize].load(Ordering::SeqCst));
        0
    }

    fn three_threads(_argl: i32, _args: &[u8]) -> i32 {
        sys_create_thread(Some(gated), 1, None);
        sys_create_thread(Some(gated), 2, None);
        gated(0, &[]);
        42
    }

    fn zombie_after_last_thread(_argl: i32, _args: &[u8]) -> i32 {
        let pid = sys_exec(Some(three_threads), 0, None);
        assert!(pid > INIT_PID as isize);
        let pid = pid as Pid;
        wait_for("three live threads", || thread_count(pid) == 3);

        for (gate, left) in [(0, 2), (1, 1)] {
            GATES[gate].store(true, Ordering::SeqCst);
            wait_for("thread exit", || thread_count(pid) == left);
            assert_eq!(process_state(pid), ProcessState::Alive);
        }
        GATES[2].store(true, Ordering::SeqCst);
        wait_for("zombie", || process_state(pid) == ProcessState::Zombie);

        let mut status = 0;
        assert_eq!(sys_waitchild(pid as isize, Some(&mut status)), pid as isize);
        assert_eq!(status, 42);
        assert_eq!(process_state(pid), ProcessState::Free);
        0
    }

    #[test]
    fn process_becomes_zombie_with_its_last_thread() {
        assert_eq!(run_kernel(zombie_after_last_thread), 0);
    }

    static QUICK: AtomicUsize = AtomicUsize::new(0);
    static SLOW: AtomicUsize = AtomicUsize::new(0);
    static RELEASE_SLOW: AtomicBool = AtomicBool::new(false);

    fn quick(_argl: i32, _args: &[u8]) -> i32 {
        5
    }

    fn slow(_argl: i32, _args: &[u8]) -> i32 {
        wait_for("slow release", || RELEASE_SLOW.load(Ordering::SeqCst));
        assert_eq!(sys_getppid(), INIT_PID as isize);
        6
    }

    fn middle(_argl: i32, _args: &[u8]) -> i32 {
        let me = sys_getpid();
        let q = sys_exec(Some(quick), 0, None) as Pid;
        let s = sys_exec(Some(slow), 0, None) as Pid;
        QUICK.store(q, Ordering::SeqCst);
        SLOW.store(s, Ordering::SeqCst);
        wait_for("quick child zombie", || process_state(q) == ProcessState::Zombie);
        assert_eq!(exited_children_of(me as Pid), vec![q]);
        1
    }

    fn orphans_go_to_init(_argl: i32, _args: &[u8]) -> i32 {
        assert_eq!(sys_getpid(), INIT_PID as isize);
        assert_eq!(sys_getppid(), NOPROC);
        assert_eq!(sys_waitchild(NOPROC, None), NOPROC);

        let mid = sys_exec(Some(middle), 0, None);
        let mut status = 0;
        assert_eq!(sys_waitchild(mid, Some(&mut status)), mid);
        assert_eq!(status, 1);

        let (q, s) = (QUICK.load(Ordering::SeqCst), SLOW.load(Ordering::SeqCst));
        let mut kids = children_of(INIT_PID);
        kids.sort_unstable();
        assert_eq!(kids, vec![q, s]);
        assert_eq!(exited_children_of(INIT_PID), vec![q]);

        RELEASE_SLOW.store(true, Ordering::SeqCst);
        assert_eq!(sys_waitchild(NOPROC, Some(&mut status)), q as isize);
        assert_eq!(status, 5);
        assert_eq!(sys_waitchild(NOPROC, Some(&mut status)), s as isize);
        assert_eq!(status, 6);
        assert_eq!(sys_waitchild(NOPROC, None), NOPROC);
        0
    }

    #[test]
    fn orphans_are_reparented_to_init() {
        assert_eq!(run_kernel(orphans_go_to_init), 0);
    }

    fn fills_the_pool(_argl: i32, _args: &[u8]) -> i32 {
        // idle + init + one child fill a three-slot table
        let child = sys_exec(Some(quick), 0, None);
        assert!(child > 0);
        assert_eq!(sys_exec(Some(quick), 0, None), NOPROC);
        assert_eq!(sys_exec(None, 0, None), NOPROC);
        assert_eq!(sys_waitchild(child, None), child);
        let again = sys_exec(Some(quick), 0, None);
        assert_eq!(again, child);
        assert_eq!(sys_waitchild(NOPROC, None), again);
        0
    }

    #[test]
    fn exec_fails_on_a_full_table() {
        let config = KernelConfig::default().with_max_proc(3);
        assert_eq!(run_kernel_with(config, fills_the_pool), 0);
    }

    #[test]
    fn syscalls_outside_the_kernel_fail() {
        assert_eq!(sys_getpid(), SysError::NoTask.code());
        assert_eq!(sys_waitchild(NOPROC, None), NOPROC);
    }

    fn init_exits_with(argl: i32, _args: &[u8]) -> i32 {
        argl
    }

    #[test]
    fn boot_returns_init_status() {
        let status = crate::boot(KernelConfig::default(), init_exits_with, 9, None);
        assert_eq!(status, Ok(9));
    }
}
