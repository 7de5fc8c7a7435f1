use super::{handle, status, NOFILE, NOPROC};
use crate::error::SysError;
use crate::task::manager::ThreadExited;
use crate::task::process;
use crate::task::procinfo::open_info;
use crate::task::{current_task, exit_current_process, with_current, Pid, Task};
use log::error;
use std::panic;

/// 创建子进程运行 `task(argl, args)`，参数块被复制
///
/// 返回新进程的 pid，失败时返回 `NOPROC`
pub fn sys_exec(task: Option<Task>, argl: i32, args: Option<&[u8]>) -> isize {
    let result = with_current(|cur, st| {
        let call = task.ok_or(SysError::InvalidHandle)?;
        process::exec(&cur.kernel, st, Some(cur.pid), Some(call), argl, args)
    });
    handle("exec", result, NOPROC)
}

/// 保存进程退出码并结束当前线程，不会返回
///
/// 进程在最后一个线程结束时才真正终止。
pub fn sys_exit(status: i32) -> ! {
    match current_task() {
        Ok(task) => exit_current_process(&task, status),
        Err(_) => error!("sys_exit({}) called outside a kernel thread", status),
    }
    panic::resume_unwind(Box::new(ThreadExited))
}

/// 等待子进程 `pid`（`NOPROC` 表示任意子进程）并回收
///
/// 返回被回收的 pid，失败（包括没有任何子进程）时返回 `NOPROC`
pub fn sys_waitchild(pid: isize, exitval: Option<&mut i32>) -> isize {
    let target = match pid {
        NOPROC => None,
        pid if pid < 0 => return NOPROC,
        pid => Some(pid as Pid),
    };
    let result = with_current(|task, st| process::wait_child(st, task.pid, target));
    handle(
        "waitchild",
        result.map(|(cpid, code)| {
            if let Some(exitval) = exitval {
                *exitval = code;
            }
            cpid
        }),
        NOPROC,
    )
}

pub fn sys_getpid() -> isize {
    status("getpid", current_task().map(|task| task.pid as isize))
}

/// idle 与 init 没有父进程，返回 `NOPROC`
pub fn sys_getppid() -> isize {
    let result = with_current(|task, st| {
        let pcb = st.procs.get(task.pid).ok_or(SysError::NoTask)?;
        Ok(pcb.parent.map_or(NOPROC, |ppid| ppid as isize))
    });
    status("getppid", result)
}

/// 打开进程信息流，每次读取得到一条 `ProcInfo` 记录
pub fn sys_open_info() -> isize {
    let result = with_current(|task, st| open_info(st, task.pid));
    handle("open_info", result, NOFILE)
}
