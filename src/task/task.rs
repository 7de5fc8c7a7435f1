//! # 线程控制块与线程生命周期
//!
//! ## Overview
//! 线程记录保存在全局 `ThreadTable` 中，记录 ID 即对外可见的线程句柄（`Tid`）。
//! 进程在 `ProcessControlBlock::threads` 中登记自己的线程记录，
//! `thread_count` 只统计仍在运行的线程。
//!
//! ## Invariants
//! - 一旦 `detached`，任何仍在等待或之后到来的 Join 都会失败
//! - 记录在“已退出且无等待者”时释放：分离的线程在退出时释放，
//!   可汇合的线程在最后一个等待者离开时释放，剩余的在进程拆除时统一回收

use super::manager::{self, ThreadKind};
use super::process::terminate_process;
use super::{Pid, Task, TaskRef, Tid};
use crate::error::{KernelResult, SysError};
use crate::kernel::{Kernel, KernelState, StateGuard};
use crate::sync::Condvar;
use crate::util::IdTable;
use log::{debug, trace, warn};
use std::sync::Arc;

pub(crate) struct ThreadControlBlock {
    pub pid: Pid,
    #[allow(unused)]
    pub task: Task,
    #[allow(unused)]
    pub argl: i32,
    pub exited: bool,
    pub detached: bool,
    /// 阻塞在 Join 上的线程数
    pub waiters: usize,
    pub exitval: i32,
    /// 退出或分离时广播
    pub exit_cv: Arc<Condvar>,
}

pub(crate) type ThreadTable = IdTable<ThreadControlBlock>;

/// 分配线程记录并派生宿主线程
///
/// 失败时撤销记录与计数，调用者看到的状态与调用前一致。
pub(crate) fn spawn_thread(
    kernel: &Arc<Kernel>,
    st: &mut KernelState,
    pid: Pid,
    task: Task,
    argl: i32,
    args: Vec<u8>,
    kind: ThreadKind,
) -> KernelResult<Tid> {
    let tid = st.threads.insert(ThreadControlBlock {
        pid,
        task,
        argl,
        exited: false,
        detached: false,
        waiters: 0,
        exitval: 0,
        exit_cv: Arc::new(Condvar::new()),
    });
    let pcb = st.procs.get_mut(pid).ok_or(SysError::InvalidHandle)?;
    pcb.threads.push(tid);
    pcb.thread_count += 1;

    let handle = TaskRef {
        kernel: Arc::clone(kernel),
        pid,
        tid,
    };
    if let Err(err) = manager::spawn(handle, task, argl, args, kind) {
        warn!("failed to spawn thread for pid {}: {}", pid, err);
        st.threads.remove(tid);
        if let Some(pcb) = st.procs.get_mut(pid) {
            pcb.threads.retain(|&t| t != tid);
            pcb.thread_count -= 1;
        }
        return Err(SysError::ResourceExhausted);
    }
    debug!("pid {} spawned thread {} ({:?})", pid, tid, kind);
    Ok(tid)
}

/// CreateThread
///
/// ## Returns
/// - `Err(InvalidHandle)`：`task` 为空
pub(crate) fn create_thread(
    kernel: &Arc<Kernel>,
    st: &mut KernelState,
    pid: Pid,
    task: Option<Task>,
    argl: i32,
    args: Option<&[u8]>,
) -> KernelResult<Tid> {
    let task = task.ok_or(SysError::InvalidHandle)?;
    let args = args.map(|args| args.to_vec()).unwrap_or_default();
    spawn_thread(kernel, st, pid, task, argl, args, ThreadKind::Secondary)
}

/// 查找属于 `pid` 的线程记录
fn owned(st: &KernelState, pid: Pid, tid: Tid) -> KernelResult<&ThreadControlBlock> {
    st.threads
        .get(tid)
        .filter(|tcb| tcb.pid == pid)
        .ok_or(SysError::InvalidHandle)
}

/// ThreadJoin
///
/// ## Behavior
/// - 等待期间目标被分离，则 Join 失败，即使目标之后退出
/// - 最后一个等待者离开已退出的记录时释放该记录
///
/// ## Returns
/// - `Ok(exitval)`
/// - `Err(InvalidHandle)`：目标不属于调用者所在进程，或目标就是调用者自身
/// - `Err(InvalidState)`：目标已分离
pub(crate) fn thread_join(
    st: &mut StateGuard<'_>,
    pid: Pid,
    caller: Tid,
    tid: Tid,
) -> KernelResult<i32> {
    if tid == caller {
        return Err(SysError::InvalidHandle);
    }
    let tcb = owned(st, pid, tid)?;
    if tcb.detached {
        return Err(SysError::InvalidState);
    }
    let cv = Arc::clone(&tcb.exit_cv);
    if let Some(tcb) = st.threads.get_mut(tid) {
        tcb.waiters += 1;
    }
    loop {
        let tcb = owned(st, pid, tid)?;
        if tcb.exited || tcb.detached {
            break;
        }
        trace!("thread {} joining {}", caller, tid);
        cv.wait(st);
    }

    let (detached, status, last) = {
        let tcb = st.threads.get_mut(tid).ok_or(SysError::InvalidHandle)?;
        tcb.waiters -= 1;
        (tcb.detached, tcb.exitval, tcb.waiters == 0)
    };
    if detached {
        debug!("join on {} failed: detached while waiting", tid);
        if last && st.threads.get(tid).map_or(false, |tcb| tcb.exited) {
            release_thread(st, tid);
        }
        return Err(SysError::InvalidState);
    }
    if last {
        release_thread(st, tid);
    }
    Ok(status)
}

/// ThreadDetach
///
/// 唤醒全部阻塞在 Join 上的线程，它们随后都会失败。
pub(crate) fn thread_detach(st: &mut KernelState, pid: Pid, tid: Tid) -> KernelResult<()> {
    let tcb = st
        .threads
        .get_mut(tid)
        .filter(|tcb| tcb.pid == pid)
        .ok_or(SysError::InvalidHandle)?;
    if tcb.exited {
        return Err(SysError::InvalidState);
    }
    tcb.detached = true;
    tcb.exit_cv.broadcast();
    debug!("thread {} detached", tid);
    Ok(())
}

/// ThreadExit 的内核部分
///
/// ## Behavior
/// - 标记退出、保存退出码并唤醒所有等待者
/// - 已分离且无人等待的记录立即释放
/// - 进程中最后一个线程退出时执行进程拆除级联
pub(crate) fn thread_exit(kernel: &Kernel, st: &mut StateGuard<'_>, pid: Pid, tid: Tid, status: i32) {
    let unclaimed = match st.threads.get_mut(tid) {
        Some(tcb) => {
            tcb.exited = true;
            tcb.exitval = status;
            tcb.exit_cv.broadcast();
            tcb.detached && tcb.waiters == 0
        }
        None => false,
    };
    if unclaimed {
        release_thread(st, tid);
    }
    let remaining = match st.procs.get_mut(pid) {
        Some(pcb) => {
            pcb.thread_count = pcb.thread_count.saturating_sub(1);
            pcb.thread_count
        }
        None => return,
    };
    trace!("thread {} exited with {}, {} left in pid {}", tid, status, remaining, pid);
    if remaining == 0 {
        terminate_process(kernel, st, pid);
    }
}

fn release_thread(st: &mut KernelState, tid: Tid) {
    if let Some(tcb) = st.threads.remove(tid) {
        if let Some(pcb) = st.procs.get_mut(tcb.pid) {
            pcb.threads.retain(|&t| t != tid);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::error::SysError;
    use crate::syscall::{
        sys_create_thread, sys_thread_detach, sys_thread_join, sys_thread_self, NOTHREAD,
    };
    use crate::test_util::{run_kernel, thread_record_exists, thread_waiters, wait_for};
    use crate::Tid;
    use core::sync::atomic::{AtomicBool, Ordering};

    fn returns_seven(_argl: i32, _args: &[u8]) -> i32 {
        7
    }

    fn echoes_args(argl: i32, args: &[u8]) -> i32 {
        argl + args.iter().map(|&b| b as i32).sum::<i32>()
    }

    fn join_and_inspect(_argl: i32, _args: &[u8]) -> i32 {
        assert_eq!(sys_create_thread(None, 0, None), NOTHREAD);

        let tid = sys_create_thread(Some(returns_seven), 0, None);
        assert_ne!(tid, NOTHREAD);
        let mut status = 0;
        assert_eq!(sys_thread_join(tid, Some(&mut status)), 0);
        assert_eq!(status, 7);
        assert!(!thread_record_exists(tid));
        assert_eq!(sys_thread_join(tid, None), SysError::InvalidHandle.code());
        assert_eq!(
            sys_thread_join(sys_thread_self(), None),
            SysError::InvalidHandle.code()
        );

        let tid = sys_create_thread(Some(echoes_args), 10, Some(&[1, 2, 3]));
        assert_eq!(sys_thread_join(tid, Some(&mut status)), 0);
        assert_eq!(status, 16);
        0
    }

    #[test]
    fn join_collects_exit_status_and_frees_the_record() {
        assert_eq!(run_kernel(join_and_inspect), 0);
    }

    static RELEASE_TARGET: AtomicBool = AtomicBool::new(false);

    fn waits_for_release(_argl: i32, _args: &[u8]) -> i32 {
        wait_for("release", || RELEASE_TARGET.load(Ordering::SeqCst));
        3
    }

    fn joins_argl(argl: i32, _args: &[u8]) -> i32 {
        sys_thread_join(argl as Tid, None) as i32
    }

    fn detach_under_join(_argl: i32, _args: &[u8]) -> i32 {
        let target = sys_create_thread(Some(waits_for_release), 0, None);
        let first = sys_create_thread(Some(joins_argl), target as i32, None);
        let second = sys_create_thread(Some(joins_argl), target as i32, None);
        wait_for("both joiners to block", || thread_waiters(target) == 2);

        assert_eq!(sys_thread_detach(target), 0);
        let expected = SysError::InvalidState.code() as i32;
        for joiner in [first, second] {
            let mut status = 0;
            assert_eq!(sys_thread_join(joiner, Some(&mut status)), 0);
            assert_eq!(status, expected);
        }
        assert_eq!(sys_thread_join(target, None), SysError::InvalidState.code());

        RELEASE_TARGET.store(true, Ordering::SeqCst);
        wait_for("detached thread to be reaped", || !thread_record_exists(target));
        assert_eq!(sys_thread_detach(target), SysError::InvalidHandle.code());
        0
    }

    #[test]
    fn detach_fails_blocked_joins() {
        assert_eq!(run_kernel(detach_under_join), 0);
    }
}
