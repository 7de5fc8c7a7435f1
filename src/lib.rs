//! # tinyos 内核同步核心
//!
//! ## Overview
//! 一个教学用分时内核的进程间通信与进程/线程生命周期部分：
//! - `fs::pipe`：有界循环字节缓冲区（管道）
//! - `net::socket`：本地套接字与连接会合协议（Listen / Connect / Accept）
//! - `task`：进程表、线程表、退出级联与僵尸回收
//! - `syscall`：面向“用户程序”的 `sys_*` 接口，以哨兵值返回错误
//!
//! 所有共享状态由唯一的内核锁保护，所有条件变量都在谓词循环中等待（Mesa 语义）。

pub mod config;
pub mod console;
pub mod error;
pub mod fs;
pub mod kernel;
pub mod net;
pub mod sync;
pub mod syscall;
pub mod task;
pub mod timer;
mod util;

#[cfg(test)]
mod test_util;

pub use config::KernelConfig;
pub use error::{KernelResult, SysError};
pub use kernel::{boot, Kernel};
pub use task::{Pid, Task, Tid};
