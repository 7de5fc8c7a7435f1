//! # 内核线程管理
//!
//! ## Overview
//! 每个内核线程对应一个具名的宿主线程，
//! 本模块负责派生这些线程、运行蹦床函数，并在关机时统一回收。
//!
//! ## Assumptions
//! - 派生总是在持有内核锁时发生，新线程在拿到内核锁之前不会观察到任何状态
//!
//! ## Behavior
//! - 任务函数正常返回：主线程执行 `Exit`，其余线程执行 `ThreadExit`
//! - 任务函数内部调用 `sys_exit` / `sys_thread_exit`：以 `ThreadExited` 展开栈，蹦床静默吸收
//! - 任务函数发生其他 panic：以退出码 -1 结束线程，使进程树仍能回收，再把 panic 重新抛出，
//!   最终由 `TaskManager::join_all` 交给 `boot` 的调用者

use super::{exit_current_process, exit_current_thread, set_current, Task, TaskRef};
use log::{error, trace};
use parking_lot::Mutex;
use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

/// 线程在任务函数内部主动退出时使用的展开载荷
pub(crate) struct ThreadExited;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ThreadKind {
    /// 进程的主线程，返回值作为进程退出码
    Main,
    Secondary,
}

/// 已派生但尚未回收的宿主线程
pub struct TaskManager {
    handles: Vec<JoinHandle<()>>,
}

impl TaskManager {
    pub fn new() -> Self {
        Self {
            handles: Vec::new(),
        }
    }

    pub fn add(&mut self, handle: JoinHandle<()>) {
        self.handles.push(handle);
    }

    /// 回收全部线程，包括回收过程中新派生的线程
    ///
    /// ## Panics
    /// - 若有线程因 panic 结束，在全部回收后重新抛出第一个 panic
    pub fn join_all(manager: &Mutex<TaskManager>) {
        let mut first_panic: Option<Box<dyn Any + Send>> = None;
        loop {
            let handles = core::mem::take(&mut manager.lock().handles);
            if handles.is_empty() {
                break;
            }
            for handle in handles {
                if let Err(payload) = handle.join() {
                    first_panic.get_or_insert(payload);
                }
            }
        }
        if let Some(payload) = first_panic {
            panic::resume_unwind(payload);
        }
    }
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}

/// 派生一个内核线程运行 `entry(argl, args)`
///
/// 必须在持有内核锁时调用；新线程会先阻塞在内核锁上。
pub(crate) fn spawn(
    task: TaskRef,
    entry: Task,
    argl: i32,
    args: Vec<u8>,
    kind: ThreadKind,
) -> io::Result<()> {
    let kernel = task.kernel.clone();
    let handle = thread::Builder::new()
        .name(format!("pid{}-tid{}", task.pid, task.tid))
        .spawn(move || run_task(task, entry, argl, args, kind))?;
    kernel.manager().lock().add(handle);
    Ok(())
}

/// 蹦床函数
fn run_task(task: TaskRef, entry: Task, argl: i32, args: Vec<u8>, kind: ThreadKind) {
    set_current(Some(task.clone()));
    trace!("kernel thread {}:{} started", task.pid, task.tid);
    let result = panic::catch_unwind(AssertUnwindSafe(|| entry(argl, &args)));
    match result {
        Ok(status) => finish(&task, status, kind),
        Err(payload) if payload.is::<ThreadExited>() => {}
        Err(payload) => {
            error!(
                "kernel thread {}:{} panicked: {}",
                task.pid,
                task.tid,
                panic_message(payload.as_ref())
            );
            finish(&task, -1, kind);
            set_current(None);
            panic::resume_unwind(payload);
        }
    }
    set_current(None);
}

fn finish(task: &TaskRef, status: i32, kind: ThreadKind) {
    match kind {
        ThreadKind::Main => exit_current_process(task, status),
        ThreadKind::Secondary => exit_current_thread(task, status),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "<non-string payload>"
    }
}
