//! # 内核锁
//!
//! ## Overview
//! 宿主环境下的“单处理器临界区”：一把 `parking_lot::Mutex` 保护整个内核状态，
//! 对外只提供 `exclusive_access`。
//!
//! ## Invariants
//! - 守卫存活期间，调用者独占全部内核状态
//! - 守卫只会在 `Condvar::wait*` 内部被暂时释放，返回前重新获得

use parking_lot::{Mutex, MutexGuard};

/// 内核锁的守卫
pub type KernelGuard<'a, T> = MutexGuard<'a, T>;

pub struct KernelLock<T> {
    inner: Mutex<T>,
}

impl<T> KernelLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    /// 获取内核状态的独占访问权，必要时阻塞
    pub fn exclusive_access(&self) -> KernelGuard<'_, T> {
        self.inner.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_sees_previous_updates() {
        let lock = KernelLock::new(0usize);
        *lock.exclusive_access() += 2;
        *lock.exclusive_access() += 1;
        assert_eq!(*lock.exclusive_access(), 3);
    }
}
