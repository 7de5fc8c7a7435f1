use super::status;
use crate::error::SysError;
use crate::fs::{close_fid, get_file, make_pipe, Fid};
use crate::task::with_current;

/// `sys_pipe` 填写的一对描述符
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipeFds {
    pub read: Fid,
    pub write: Fid,
}

/// 创建管道，成功时把读端、写端描述符写入 `fds`
pub fn sys_pipe(fds: &mut PipeFds) -> isize {
    let result = with_current(|task, st| make_pipe(st, task.pid));
    status(
        "pipe",
        result.map(|(read, write)| {
            *fds = PipeFds { read, write };
            0
        }),
    )
}

/// 返回读到的字节数，0 表示 EOF
pub fn sys_read(fd: Fid, buf: &mut [u8]) -> isize {
    let result = with_current(|task, st| {
        let file = get_file(st, task.pid, fd)?;
        if !file.readable() {
            return Err(SysError::InvalidState);
        }
        file.read(st, buf)
    });
    status("read", result.map(|n| n as isize))
}

/// 返回写入的字节数，对端关闭时可能短于 `buf.len()`
pub fn sys_write(fd: Fid, buf: &[u8]) -> isize {
    let result = with_current(|task, st| {
        let file = get_file(st, task.pid, fd)?;
        if !file.writable() {
            return Err(SysError::InvalidState);
        }
        file.write(st, buf)
    });
    status("write", result.map(|n| n as isize))
}

pub fn sys_close(fd: Fid) -> isize {
    let result = with_current(|task, st| close_fid(st, task.pid, fd));
    status("close", result.map(|_| 0))
}
