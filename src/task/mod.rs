//! # 进程与线程管理模块（task）
//!
//! ## Overview
//! - `manager`：宿主线程调度垫片（派生、蹦床函数、回收）
//! - `process`：进程表、Exec / WaitChild、退出级联
//! - `task`：线程控制块与 CreateThread / Join / Detach / Exit
//! - `procinfo`：进程信息流
//!
//! 每个内核线程在线程局部变量中保存自己的 `TaskRef`，
//! 系统调用由此找到所属的内核实例、进程与线程。

pub(crate) mod manager;
pub(crate) mod process;
pub(crate) mod procinfo;
#[allow(clippy::module_inception)]
pub(crate) mod task;

use crate::error::{KernelResult, SysError};
use crate::kernel::{Kernel, StateGuard};
use core::cell::RefCell;
use std::sync::Arc;

pub use process::{ProcessState, IDLE_PID, INIT_PID};
pub use procinfo::{ProcInfo, PROCINFO_RECORD_SIZE};
pub(crate) use task::ThreadTable;

/// 进程 ID，即进程表下标
pub type Pid = usize;
/// 线程句柄，0 保留为 `NOTHREAD`
pub type Tid = usize;
/// 进程主函数与线程函数的入口：`(argl, args) -> exitval`
pub type Task = fn(i32, &[u8]) -> i32;

/// 当前内核线程的身份
#[derive(Clone)]
pub struct TaskRef {
    pub kernel: Arc<Kernel>,
    pub pid: Pid,
    pub tid: Tid,
}

thread_local! {
    static CURRENT: RefCell<Option<TaskRef>> = RefCell::new(None);
}

pub(crate) fn set_current(task: Option<TaskRef>) {
    CURRENT.with(|current| *current.borrow_mut() = task);
}

/// 当前线程对应的任务
///
/// ## Returns
/// - `Err(SysError::NoTask)`：调用者不是内核线程
pub fn current_task() -> KernelResult<TaskRef> {
    CURRENT
        .try_with(|current| current.borrow().clone())
        .ok()
        .flatten()
        .ok_or(SysError::NoTask)
}

/// 供日志使用，不会因线程局部变量已销毁而 panic
pub(crate) fn current_ids() -> Option<(Pid, Tid)> {
    CURRENT
        .try_with(|current| current.borrow().as_ref().map(|task| (task.pid, task.tid)))
        .ok()
        .flatten()
}

/// 以当前任务身份持有内核锁执行 `f`
pub(crate) fn with_current<R>(
    f: impl FnOnce(&TaskRef, &mut StateGuard<'_>) -> KernelResult<R>,
) -> KernelResult<R> {
    let task = current_task()?;
    let mut st = task.kernel.exclusive_access();
    f(&task, &mut st)
}

/// 结束当前线程（不展开栈），由蹦床函数与 `sys_thread_exit` 共用
pub(crate) fn exit_current_thread(cur: &TaskRef, status: i32) {
    let mut st = cur.kernel.exclusive_access();
    task::thread_exit(&cur.kernel, &mut st, cur.pid, cur.tid, status);
}

/// 记录进程退出码后结束当前线程
pub(crate) fn exit_current_process(cur: &TaskRef, status: i32) {
    let mut st = cur.kernel.exclusive_access();
    if let Some(pcb) = st.procs.get_mut(cur.pid) {
        pcb.exitval = status;
    }
    task::thread_exit(&cur.kernel, &mut st, cur.pid, cur.tid, status);
}
