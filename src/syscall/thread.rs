use super::{status, NOTHREAD};
use crate::task::manager::ThreadExited;
use crate::task::task::{create_thread, thread_detach, thread_join};
use crate::task::{current_task, exit_current_thread, with_current, Task, Tid};
use log::{debug, error};
use std::panic;

/// 在当前进程中创建线程运行 `task(argl, args)`
///
/// 返回线程句柄，`task` 为空或无法派生时返回 `NOTHREAD`
pub fn sys_create_thread(task: Option<Task>, argl: i32, args: Option<&[u8]>) -> Tid {
    let result = with_current(|cur, st| create_thread(&cur.kernel, st, cur.pid, task, argl, args));
    result.unwrap_or_else(|err| {
        debug!("create_thread failed: {}", err);
        NOTHREAD
    })
}

pub fn sys_thread_self() -> Tid {
    current_task().map_or(NOTHREAD, |task| task.tid)
}

/// 等待同进程的线程 `tid` 退出，成功时把退出码写入 `exitval`
pub fn sys_thread_join(tid: Tid, exitval: Option<&mut i32>) -> isize {
    let result = with_current(|task, st| thread_join(st, task.pid, task.tid, tid));
    status(
        "thread_join",
        result.map(|code| {
            if let Some(exitval) = exitval {
                *exitval = code;
            }
            0
        }),
    )
}

pub fn sys_thread_detach(tid: Tid) -> isize {
    let result = with_current(|task, st| thread_detach(st, task.pid, tid));
    status("thread_detach", result.map(|_| 0))
}

/// 结束当前线程，不会返回
pub fn sys_thread_exit(exitval: i32) -> ! {
    match current_task() {
        Ok(task) => exit_current_thread(&task, exitval),
        Err(_) => error!("sys_thread_exit({}) called outside a kernel thread", exitval),
    }
    panic::resume_unwind(Box::new(ThreadExited))
}
