//! # 内核错误码
//!
//! ## Overview
//! 内核内部以 `KernelResult` 传递错误，系统调用层再把它折叠为负数哨兵值。
//! 错误码沿用类 Unix 约定（负数表示失败）。

use num_enum::{IntoPrimitive, TryFromPrimitive};

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive, thiserror::Error)]
#[repr(isize)]
pub enum SysError {
    /// 调用者不是内核线程
    #[error("not called from a kernel thread")]
    NoTask = -3,
    /// 未知或不属于调用者的句柄
    #[error("unknown or foreign handle")]
    InvalidHandle = -9,
    /// 调用者没有任何子进程
    #[error("no child processes")]
    NoChild = -10,
    /// 对象状态不允许该操作（重复 listen、已关闭的端等）
    #[error("operation not allowed in the current state")]
    InvalidState = -22,
    /// 描述符表、FCB 表或进程表已满
    #[error("resource pool exhausted")]
    ResourceExhausted = -24,
    /// Accept/Connect 与并发的拆除操作发生竞争
    #[error("peer torn down during rendezvous")]
    ProtocolViolation = -71,
    /// Connect 超时
    #[error("timed out")]
    Timeout = -110,
}

pub type KernelResult<T> = Result<T, SysError>;

impl SysError {
    #[inline]
    pub fn code(self) -> isize {
        self.into()
    }
}
