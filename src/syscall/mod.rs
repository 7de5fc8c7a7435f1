//! # 系统调用接口（syscall）
//!
//! ## Overview
//! 面向“用户程序”（在内核线程中运行的 `Task`）的 `sys_*` 函数：
//! - `fs`：Pipe / Read / Write / Close
//! - `net`：Socket / Listen / Accept / Connect / ShutDown
//! - `process`：Exec / Exit / WaitChild / GetPid / GetPPid / OpenInfo
//! - `thread`：CreateThread / ThreadSelf / ThreadJoin / ThreadDetach / ThreadExit
//!
//! ## Behavior
//! - 返回状态的调用：成功为 0，失败为负的错误码（见 `SysError`）
//! - 返回描述符、进程或线程句柄的调用：失败时返回 `NOFILE` / `NOPROC` / `NOTHREAD`
//! - 在内核线程之外调用时失败并返回 `SysError::NoTask` 对应的值或哨兵

mod fs;
mod net;
mod process;
mod thread;

pub use fs::{sys_close, sys_pipe, sys_read, sys_write, PipeFds};
pub use net::{sys_accept, sys_connect, sys_listen, sys_shutdown, sys_socket};
pub use process::{sys_exec, sys_exit, sys_getpid, sys_getppid, sys_open_info, sys_waitchild};
pub use thread::{
    sys_create_thread, sys_thread_detach, sys_thread_exit, sys_thread_join, sys_thread_self,
};

pub use crate::net::ShutdownMode;

use crate::error::KernelResult;
use log::debug;

/// 无效描述符
pub const NOFILE: isize = -1;
/// 无效进程；作为 `sys_waitchild` 的参数时表示“任意子进程”
pub const NOPROC: isize = -1;
/// 无效线程句柄
pub const NOTHREAD: usize = 0;

/// 成功返回值本身，失败返回错误码
fn status(name: &str, result: KernelResult<isize>) -> isize {
    match result {
        Ok(value) => value,
        Err(err) => {
            debug!("{} failed: {}", name, err);
            err.code()
        }
    }
}

/// 成功返回句柄，失败返回 `sentinel`
fn handle(name: &str, result: KernelResult<usize>, sentinel: isize) -> isize {
    match result {
        Ok(handle) => handle as isize,
        Err(err) => {
            debug!("{} failed: {}", name, err);
            sentinel
        }
    }
}
