//! # 内核实例与启动
//!
//! ## Overview
//! `Kernel` 持有唯一的内核锁以及锁所保护的全部状态（`KernelState`）：
//! 进程表、线程表、FCB 表、管道表、套接字与端口表。
//! 内核对象是注入式的，不是全局变量，同一宿主进程中可以同时运行多个互不干扰的实例。
//!
//! ## Behavior
//! `boot` 依次创建 idle 伪进程（pid 0，没有线程）与 init 进程（pid 1），
//! 随后阻塞直到 init 成为僵尸，回收全部内核线程并返回 init 的退出码。

use crate::config::KernelConfig;
use crate::console;
use crate::error::{KernelResult, SysError};
use crate::fs::{FileTable, PipeTable};
use crate::net::SocketTable;
use crate::sync::{Condvar, KernelGuard, KernelLock};
use crate::task::manager::TaskManager;
use crate::task::process::{self, ProcessTable, IDLE_PID, INIT_PID};
use crate::task::{Task, ThreadTable};
use log::info;
use parking_lot::Mutex;
use std::sync::Arc;

/// 持有内核锁时的状态守卫
pub type StateGuard<'a> = KernelGuard<'a, KernelState>;

/// 由内核锁保护的全部共享状态
pub struct KernelState {
    pub(crate) config: KernelConfig,
    pub(crate) procs: ProcessTable,
    pub(crate) threads: ThreadTable,
    pub(crate) files: FileTable,
    pub(crate) pipes: PipeTable,
    pub(crate) sockets: SocketTable,
}

impl KernelState {
    fn new(config: KernelConfig) -> Self {
        Self {
            config,
            procs: ProcessTable::new(config.max_proc, config.max_fileid),
            threads: ThreadTable::new(),
            files: FileTable::new(config.max_files),
            pipes: PipeTable::new(),
            sockets: SocketTable::new(config.max_port),
        }
    }
}

pub struct Kernel {
    config: KernelConfig,
    state: KernelLock<KernelState>,
    /// init 成为僵尸时广播
    halt: Condvar,
    manager: Mutex<TaskManager>,
}

impl Kernel {
    pub fn new(config: KernelConfig) -> Arc<Kernel> {
        Arc::new(Kernel {
            config,
            state: KernelLock::new(KernelState::new(config)),
            halt: Condvar::new(),
            manager: Mutex::new(TaskManager::new()),
        })
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub(crate) fn exclusive_access(&self) -> StateGuard<'_> {
        self.state.exclusive_access()
    }

    pub(crate) fn manager(&self) -> &Mutex<TaskManager> {
        &self.manager
    }

    /// 必须在持有内核锁时调用
    pub(crate) fn notify_halt(&self) {
        self.halt.broadcast();
    }

    /// 启动内核并运行到 init 退出
    ///
    /// ## Returns
    /// - `Ok(status)`：init 进程的退出码
    /// - `Err(_)`：进程表无法容纳 idle 与 init
    ///
    /// ## Panics
    /// - 任意内核线程发生 panic 时，在所有线程回收完毕后重新抛出该 panic
    pub fn boot(self: &Arc<Self>, init: Task, argl: i32, args: Option<&[u8]>) -> KernelResult<i32> {
        console::init();
        info!("booting: {:?}", self.config);
        let status = {
            let mut st = self.exclusive_access();
            let idle = process::exec(self, &mut st, None, None, 0, None)?;
            if idle != IDLE_PID {
                return Err(SysError::InvalidState);
            }
            let init_pid = process::exec(self, &mut st, None, Some(init), argl, args)?;
            if init_pid != INIT_PID {
                return Err(SysError::InvalidState);
            }
            while !st.procs.is_zombie(INIT_PID) {
                self.halt.wait(&mut st);
            }
            st.procs.exit_status(INIT_PID).unwrap_or(-1)
        };
        info!("init exited with status {}, reaping kernel threads", status);
        TaskManager::join_all(&self.manager);
        Ok(status)
    }
}

/// 以给定配置创建内核并运行 `init`
pub fn boot(config: KernelConfig, init: Task, argl: i32, args: Option<&[u8]>) -> KernelResult<i32> {
    Kernel::new(config).boot(init, argl, args)
}
