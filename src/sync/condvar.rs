//! # 条件变量（Condvar）同步原语模块
//!
//! ## Overview
//! 条件变量本身 **不保存条件状态**，只负责让等待者在内核锁上睡眠与被唤醒，
//! 具体条件判断由调用者在临界区内完成：
//!
//! ```text
//! lock(kernel)
//! while !condition {
//!     condvar.wait(kernel)
//! }
//! unlock(kernel)
//! ```
//!
//! ## Invariants
//! - `wait*` 原子地释放内核锁并睡眠，返回前重新获得内核锁
//! - 唤醒只是提示，被唤醒者必须重新检查谓词
//! - 一个条件变量只会与一把内核锁配合使用

use crate::sync::KernelGuard;
use std::time::Instant;

pub struct Condvar {
    inner: parking_lot::Condvar,
}

impl Default for Condvar {
    fn default() -> Self {
        Self::new()
    }
}

impl Condvar {
    pub fn new() -> Self {
        Self {
            inner: parking_lot::Condvar::new(),
        }
    }

    /// 唤醒一个等待者，返回是否确实有人被唤醒
    pub fn signal(&self) -> bool {
        self.inner.notify_one()
    }

    /// 唤醒全部等待者，返回被唤醒的数量
    pub fn broadcast(&self) -> usize {
        self.inner.notify_all()
    }

    /// 释放内核锁并睡眠，被唤醒后重新加锁
    pub fn wait<T>(&self, guard: &mut KernelGuard<'_, T>) {
        self.inner.wait(guard);
    }

    /// 带截止时刻的等待
    ///
    /// ## Returns
    /// - `true`：截止时刻已过（调用者仍需重新检查谓词，唤醒可能与超时同时发生）
    /// - `false`：在截止时刻之前被唤醒
    pub fn wait_until<T>(&self, guard: &mut KernelGuard<'_, T>, deadline: Instant) -> bool {
        self.inner.wait_until(guard, deadline).timed_out()
    }
}
