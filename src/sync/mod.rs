//! # 内核同步原语模块（sync）
//!
//! ## Overview
//! 本模块是内核同步设施的统一入口：
//! - `up`：唯一的内核锁（`KernelLock`）及其守卫
//! - `condvar`：与内核锁配合使用的条件变量
//!
//! ## Assumptions
//! - 所有共享状态（进程表、端口表、管道缓冲区、监听队列）都由同一把内核锁保护
//! - 不存在更细粒度的锁
//!
//! ## Invariants
//! - 条件变量只在持有内核锁时 `signal` / `broadcast`
//! - 每一次 `wait` 都位于重新检查谓词的循环之中（Mesa 语义）

mod condvar;
mod up;

/// 条件变量
pub use condvar::Condvar;

/// 内核锁与守卫
pub use up::{KernelGuard, KernelLock};
