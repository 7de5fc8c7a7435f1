//! 单元测试辅助：启动内核实例并在内核线程中探查内部状态

use crate::fs::get_file;
use crate::task::{with_current, Pid, ProcessState, Task, Tid};
use crate::KernelConfig;
use std::thread;
use std::time::{Duration, Instant};

const POLL_LIMIT: Duration = Duration::from_secs(10);

pub fn run_kernel(init: Task) -> i32 {
    run_kernel_with(KernelConfig::default(), init)
}

pub fn run_kernel_with(config: KernelConfig, init: Task) -> i32 {
    crate::boot(config, init, 0, None).expect("kernel failed to boot")
}

pub fn process_state(pid: Pid) -> ProcessState {
    with_current(|_, st| Ok(st.procs.state(pid))).expect("not in a kernel thread")
}

pub fn thread_count(pid: Pid) -> usize {
    with_current(|_, st| Ok(st.procs.get(pid).map_or(0, |pcb| pcb.thread_count)))
        .expect("not in a kernel thread")
}

pub fn thread_record_exists(tid: Tid) -> bool {
    with_current(|_, st| Ok(st.threads.contains(tid))).expect("not in a kernel thread")
}

pub fn thread_waiters(tid: Tid) -> usize {
    with_current(|_, st| Ok(st.threads.get(tid).map_or(0, |tcb| tcb.waiters)))
        .expect("not in a kernel thread")
}

pub fn children_of(pid: Pid) -> Vec<Pid> {
    with_current(|_, st| Ok(st.procs.get(pid).map(|pcb| pcb.children.clone()).unwrap_or_default()))
        .expect("not in a kernel thread")
}

pub fn exited_children_of(pid: Pid) -> Vec<Pid> {
    with_current(|_, st| {
        Ok(st
            .procs
            .get(pid)
            .map(|pcb| pcb.exited.iter().copied().collect())
            .unwrap_or_default())
    })
    .expect("not in a kernel thread")
}

/// 描述符 `fd` 对应监听者的排队请求数
pub fn listener_backlog(fd: usize) -> usize {
    with_current(|task, st| {
        let sid = get_file(st, task.pid, fd)?
            .as_socket()
            .ok_or(crate::SysError::InvalidHandle)?;
        Ok(st.sockets.backlog(sid))
    })
    .expect("not a socket descriptor")
}

pub fn pending_requests() -> usize {
    with_current(|_, st| Ok(st.sockets.pending_requests())).expect("not in a kernel thread")
}

/// 轮询直到 `pred` 成立，超时则 panic
pub fn wait_for(what: &str, pred: impl Fn() -> bool) {
    let start = Instant::now();
    while !pred() {
        assert!(start.elapsed() < POLL_LIMIT, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(1));
    }
}
