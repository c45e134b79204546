//! 并发节流
//!
//! 限制同时穿过被拦截方法的调用数量，超出上限的调用阻塞等待空位。

use anyhow::Result;
use parking_lot::{Condvar, Mutex};

use crate::error::AopError;
use crate::interceptor::MethodInterceptor;
use crate::invocation::MethodInvocation;
use crate::target::Value;

/// 不限制并发
pub const UNBOUNDED_CONCURRENCY: i32 = -1;

/// 不允许任何调用
pub const NO_CONCURRENCY: i32 = 0;

/// 计数信号量式的并发节流拦截器
///
/// 一个实例对应一组共享上限的方法，可以同时挂在多个代理上
#[derive(Debug)]
pub struct ConcurrencyThrottleInterceptor {
    limit: i32,
    count: Mutex<usize>,
    released: Condvar,
}

impl ConcurrencyThrottleInterceptor {
    /// `limit` 为 -1 表示不限制，0 表示拒绝所有调用
    pub fn new(limit: i32) -> Self {
        Self {
            limit,
            count: Mutex::new(0),
            released: Condvar::new(),
        }
    }

    pub fn limit(&self) -> i32 {
        self.limit
    }

    pub fn is_throttle_active(&self) -> bool {
        self.limit >= 0
    }

    /// 正在执行的调用数
    pub fn current_concurrency(&self) -> usize {
        *self.count.lock()
    }

    fn acquire(&self) -> Result<Permit<'_>, AopError> {
        if self.limit == NO_CONCURRENCY {
            return Err(AopError::NoConcurrencyAllowed {
                interceptor: self.name().to_string(),
            });
        }
        let limit = self.limit as usize;
        let mut count = self.count.lock();
        while *count >= limit {
            tracing::debug!("Concurrency count {} has reached limit {} - blocking", *count, limit);
            self.released.wait(&mut count);
        }
        *count += 1;
        tracing::trace!("Entering throttle at concurrency count {}", *count);
        Ok(Permit { throttle: self })
    }

    fn release(&self) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(1);
        tracing::trace!("Returning from throttle at concurrency count {}", *count);
        self.released.notify_one();
    }
}

impl Default for ConcurrencyThrottleInterceptor {
    /// 默认只允许一个调用
    fn default() -> Self {
        Self::new(1)
    }
}

/// 出作用域时归还名额，目标报错时同样归还
struct Permit<'a> {
    throttle: &'a ConcurrencyThrottleInterceptor,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.throttle.release();
    }
}

impl MethodInterceptor for ConcurrencyThrottleInterceptor {
    fn invoke(&self, invocation: &mut dyn MethodInvocation) -> Result<Value> {
        if !self.is_throttle_active() {
            return invocation.proceed();
        }
        let _permit = self.acquire()?;
        invocation.proceed()
    }

    fn name(&self) -> &str {
        "ConcurrencyThrottleInterceptor"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::FnInterceptor;
    use crate::invocation::tests::{context_for, Calculator};
    use crate::invocation::ReflectiveMethodInvocation;
    use crate::target::{unit, value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn run(chain: &[Arc<dyn MethodInterceptor>]) -> Result<Value> {
        let target = Calculator::new();
        let ctx = context_for(&target, "echo", vec![value("x".to_string())]);
        ReflectiveMethodInvocation::new(&target, chain, ctx).proceed()
    }

    #[test]
    fn test_zero_limit_rejects() {
        let chain: Vec<Arc<dyn MethodInterceptor>> = vec![Arc::new(ConcurrencyThrottleInterceptor::new(NO_CONCURRENCY))];
        let err = run(&chain).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AopError>(),
            Some(AopError::NoConcurrencyAllowed { .. })
        ));
    }

    #[test]
    fn test_unbounded_passes_through() {
        let throttle = Arc::new(ConcurrencyThrottleInterceptor::new(UNBOUNDED_CONCURRENCY));
        assert!(!throttle.is_throttle_active());
        let chain: Vec<Arc<dyn MethodInterceptor>> = vec![throttle.clone()];
        assert!(run(&chain).is_ok());
        assert_eq!(throttle.current_concurrency(), 0);
    }

    #[test]
    fn test_permit_released_on_error() {
        let throttle = Arc::new(ConcurrencyThrottleInterceptor::new(1));
        let chain: Vec<Arc<dyn MethodInterceptor>> = vec![
            throttle.clone(),
            Arc::new(FnInterceptor::new("fail", |_mi: &mut dyn MethodInvocation| anyhow::bail!("boom"))),
        ];
        assert!(run(&chain).is_err());
        assert_eq!(throttle.current_concurrency(), 0);
        assert!(run(&chain).is_err());
    }

    #[test]
    fn test_limit_bounds_concurrent_callers() {
        let throttle = Arc::new(ConcurrencyThrottleInterceptor::new(2));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (active_in, peak_in) = (Arc::clone(&active), Arc::clone(&peak));
        let chain: Arc<Vec<Arc<dyn MethodInterceptor>>> = Arc::new(vec![
            throttle.clone(),
            Arc::new(FnInterceptor::new("work", move |_mi: &mut dyn MethodInvocation| {
                let now = active_in.fetch_add(1, Ordering::SeqCst) + 1;
                peak_in.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(20));
                active_in.fetch_sub(1, Ordering::SeqCst);
                Ok(unit())
            })),
        ]);

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let chain = Arc::clone(&chain);
                thread::spawn(move || run(&chain).is_ok())
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(throttle.current_concurrency(), 0);
    }
}
