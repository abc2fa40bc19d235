// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 并发限制器
//!
//! 计数信号量，限制同一目标实例上同时执行的查询数量

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Semaphore;

/// 计数信号量
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    inner: Arc<LimiterInner>,
}

#[derive(Debug)]
struct LimiterInner {
    semaphore: Semaphore,
    capacity: usize,
    outstanding: AtomicUsize,
}

impl ConcurrencyLimiter {
    /// 创建限制器，容量 0 视为 1
    pub fn new(parallelism: usize) -> Self {
        let capacity = parallelism.max(1);
        Self {
            inner: Arc::new(LimiterInner {
                semaphore: Semaphore::new(capacity),
                capacity,
                outstanding: AtomicUsize::new(0),
            }),
        }
    }

    /// 获取一个令牌，无可用令牌时等待
    ///
    /// 返回的令牌在释放时自动归还
    pub async fn acquire(&self) -> LimiterToken {
        // 信号量从不关闭，acquire 只会成功
        if let Ok(permit) = self.inner.semaphore.acquire().await {
            permit.forget();
        }
        self.inner.outstanding.fetch_add(1, Ordering::SeqCst);
        LimiterToken {
            limiter: self.clone(),
            released: false,
        }
    }

    /// 归还一个令牌
    ///
    /// # Panics
    ///
    /// 没有对应的 `acquire` 时 panic，防止并发预算被悄悄扩大
    pub fn release(&self) {
        let previous = self
            .inner
            .outstanding
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if previous.is_err() {
            panic!("ConcurrencyLimiter::release called without a matching acquire");
        }
        self.inner.semaphore.add_permits(1);
    }

    /// 当前已发出的令牌数
    pub fn in_flight(&self) -> usize {
        self.inner.outstanding.load(Ordering::SeqCst)
    }

    /// 容量
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }
}

/// 限制器令牌，drop 时归还
#[derive(Debug)]
pub struct LimiterToken {
    limiter: ConcurrencyLimiter,
    released: bool,
}

impl LimiterToken {
    /// 显式归还令牌
    pub fn release(mut self) {
        self.released = true;
        self.limiter.release();
    }
}

impl Drop for LimiterToken {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            self.limiter.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// TEST-U-901: 容量归一化测试
    #[test]
    fn test_zero_normalised_to_one() {
        assert_eq!(ConcurrencyLimiter::new(0).capacity(), 1);
        assert_eq!(ConcurrencyLimiter::new(4).capacity(), 4);
    }

    /// TEST-U-902: 令牌获取与归还测试
    #[tokio::test]
    async fn test_acquire_and_release() {
        let limiter = ConcurrencyLimiter::new(2);

        let first = limiter.acquire().await;
        let second = limiter.acquire().await;
        assert_eq!(limiter.in_flight(), 2);

        let blocked = tokio::time::timeout(Duration::from_millis(20), limiter.acquire()).await;
        assert!(blocked.is_err());

        first.release();
        drop(second);
        assert_eq!(limiter.in_flight(), 0);

        let _third = limiter.acquire().await;
        assert_eq!(limiter.in_flight(), 1);
    }

    /// TEST-U-903: 不匹配的归还触发 panic
    #[test]
    #[should_panic(expected = "without a matching acquire")]
    fn test_unbalanced_release_panics() {
        let limiter = ConcurrencyLimiter::new(1);
        limiter.release();
    }
}
