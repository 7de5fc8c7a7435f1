use super::{handle, status, NOFILE};
use crate::error::{KernelResult, SysError};
use crate::fs::{get_file, Fid};
use crate::kernel::KernelState;
use crate::net::{self, Port, ShutdownMode, SocketId};
use crate::task::{with_current, Pid};
use crate::timer::deadline_after_ms;

fn socket_of(st: &KernelState, pid: Pid, fd: Fid) -> KernelResult<SocketId> {
    get_file(st, pid, fd)?
        .as_socket()
        .ok_or(SysError::InvalidHandle)
}

/// 在 `port` 上创建未绑定的套接字，`port` 可以是 `NOPORT`
pub fn sys_socket(port: Port) -> isize {
    let result = with_current(|task, st| net::socket_create(st, task.pid, port));
    handle("socket", result, NOFILE)
}

pub fn sys_listen(fd: Fid) -> isize {
    let result = with_current(|task, st| {
        let sid = socket_of(st, task.pid, fd)?;
        net::listen(st, sid)
    });
    status("listen", result.map(|_| 0))
}

/// 阻塞到有连接请求，返回服务端新套接字的描述符
pub fn sys_accept(fd: Fid) -> isize {
    let result = with_current(|task, st| {
        let lid = socket_of(st, task.pid, fd)?;
        net::accept(st, task.pid, lid)
    });
    handle("accept", result, NOFILE)
}

/// 连接到 `port` 上的监听者，`timeout_ms` 为 `NO_TIMEOUT` 时不设超时
pub fn sys_connect(fd: Fid, port: Port, timeout_ms: u64) -> isize {
    let deadline = deadline_after_ms(timeout_ms);
    let result = with_current(|task, st| {
        let sid = socket_of(st, task.pid, fd)?;
        net::connect(st, sid, port, deadline)
    });
    status("connect", result.map(|_| 0))
}

pub fn sys_shutdown(fd: Fid, mode: ShutdownMode) -> isize {
    let result = with_current(|task, st| {
        let sid = socket_of(st, task.pid, fd)?;
        net::shutdown(st, sid, mode)
    });
    status("shutdown", result.map(|_| 0))
}
