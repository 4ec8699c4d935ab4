//! 同步层：一把中断安全的元数据锁、两把方向互斥锁、两个等待/唤醒通道。
//!
//! # 教案式说明
//! - **意图（Why）**：同一队列同时被中断处理程序与可睡眠线程访问。元数据只能由不睡眠的锁保护；
//!   睡眠只发生在方向互斥锁的获取与 [`Rendez::sleep`] 内部。
//! - **逻辑（How）**：
//!   - [`IrqLock`] 包装 `spin::Mutex`，临界区只做 O(1) 的链表与计数修改；
//!   - [`QLock`] 包装 `parking_lot::Mutex<()>`，串行化同一方向的多个阻塞调用者；
//!   - [`Rendez`] 以互斥锁加条件变量实现“条件成立前睡眠”，条件在持有 `Rendez` 内部锁时求值，
//!     唤醒方在修改状态并释放元数据锁之后才获取同一把内部锁，因此不会丢失唤醒。
//! - **契约（What）**：
//!   - 锁顺序固定为 `QLock → Rendez 内部锁 → IrqLock`，任何路径都不得在持有 `IrqLock` 时睡眠；
//!   - [`Rendez::wakeup`] 只唤醒一个等待者：方向互斥锁保证同一时刻每个通道至多一个逻辑等待者。
//!
//! 在 `cfg(loom)`/`cfg(spark_loom)` 下，`Rendez` 改用 `loom::sync` 以便穷举调度交错。

use core::fmt;

/// 中断安全的元数据锁。
pub struct IrqLock<T> {
    inner: spin::Mutex<T>,
}

/// [`IrqLock`] 的守卫。
pub type IrqGuard<'a, T> = spin::MutexGuard<'a, T>;

impl<T> IrqLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: spin::Mutex::new(value),
        }
    }

    /// 自旋获取锁；持有期间不得睡眠或复制调用方内存。
    pub fn lock(&self) -> IrqGuard<'_, T> {
        self.inner.lock()
    }

    /// 锁当前是否被持有；只用于诊断，结果在返回时可能已过期。
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}

impl<T> fmt::Debug for IrqLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IrqLock")
            .field("locked", &self.is_locked())
            .finish()
    }
}

/// 方向互斥锁：串行化同一方向上的阻塞调用者，本身不保护任何数据。
#[derive(Default)]
pub struct QLock {
    inner: parking_lot::Mutex<()>,
}

impl QLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// 可能睡眠，只能在可阻塞上下文调用。
    pub fn lock(&self) -> parking_lot::MutexGuard<'_, ()> {
        self.inner.lock()
    }
}

impl fmt::Debug for QLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QLock")
            .field("locked", &self.inner.is_locked())
            .finish()
    }
}

#[cfg(not(any(loom, spark_loom)))]
mod imp {
    pub(super) use parking_lot::{Condvar, Mutex, MutexGuard};

    pub(super) fn lock(mutex: &Mutex<()>) -> MutexGuard<'_, ()> {
        mutex.lock()
    }

    pub(super) fn wait<'a>(cond: &Condvar, mut guard: MutexGuard<'a, ()>) -> MutexGuard<'a, ()> {
        cond.wait(&mut guard);
        guard
    }
}

#[cfg(any(loom, spark_loom))]
mod imp {
    use std::sync::PoisonError;

    pub(super) use loom::sync::{Condvar, Mutex, MutexGuard};

    pub(super) fn lock(mutex: &Mutex<()>) -> MutexGuard<'_, ()> {
        mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn wait<'a>(cond: &Condvar, guard: MutexGuard<'a, ()>) -> MutexGuard<'a, ()> {
        cond.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }
}

/// 等待/唤醒通道。
///
/// # 契约说明（What）
/// - [`sleep`](Self::sleep) 在 `ready()` 为真时立即返回，否则睡眠直到被唤醒且 `ready()` 为真；
///   `ready` 可以获取 [`IrqLock`]，但不得获取任何 `Rendez`；
/// - [`wakeup`](Self::wakeup) 必须在释放元数据锁之后调用；
/// - 不提供超时与取消，需要时由调用方在外层实现。
pub struct Rendez {
    lock: imp::Mutex<()>,
    cond: imp::Condvar,
}

impl Rendez {
    pub fn new() -> Self {
        Self {
            lock: imp::Mutex::new(()),
            cond: imp::Condvar::new(),
        }
    }

    pub fn sleep<F>(&self, mut ready: F)
    where
        F: FnMut() -> bool,
    {
        let mut guard = imp::lock(&self.lock);
        while !ready() {
            guard = imp::wait(&self.cond, guard);
        }
    }

    /// 唤醒一个等待者。
    pub fn wakeup(&self) {
        let _guard = imp::lock(&self.lock);
        self.cond.notify_one();
    }
}

impl Default for Rendez {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Rendez {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rendez").finish_non_exhaustive()
    }
}
