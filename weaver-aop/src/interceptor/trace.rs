//! 跟踪与监控类拦截器

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::error_info::ErrorInfo;
use crate::interceptor::MethodInterceptor;
use crate::invocation::MethodInvocation;
use crate::target::Value;

fn invocation_description(invocation: &dyn MethodInvocation) -> String {
    format!(
        "method '{}' of type [{}]",
        invocation.method().name(),
        invocation.context().target_type().name()
    )
}

/// 记录方法进入、退出和耗时
#[derive(Debug, Default, Clone, Copy)]
pub struct TraceInterceptor;

impl TraceInterceptor {
    pub fn new() -> Self {
        Self
    }
}

impl MethodInterceptor for TraceInterceptor {
    fn invoke(&self, invocation: &mut dyn MethodInvocation) -> Result<Value> {
        let description = invocation_description(invocation);
        tracing::trace!("Entering {}", description);
        let started = Instant::now();
        match invocation.proceed() {
            Ok(value) => {
                tracing::trace!("Exiting {} after {:?}", description, started.elapsed());
                Ok(value)
            }
            Err(error) => {
                let info = ErrorInfo::from_error(&error);
                tracing::error!("Exception thrown in {}: {}", description, info.full_description());
                Err(error)
            }
        }
    }

    fn name(&self) -> &str {
        "TraceInterceptor"
    }
}

/// 统计耗时，超过阈值时告警
#[derive(Debug)]
pub struct PerformanceMonitorInterceptor {
    threshold: Duration,
    slow_invocations: AtomicU64,
}

impl PerformanceMonitorInterceptor {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            slow_invocations: AtomicU64::new(0),
        }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// 超过阈值的调用次数
    pub fn slow_invocations(&self) -> u64 {
        self.slow_invocations.load(Ordering::Relaxed)
    }
}

impl MethodInterceptor for PerformanceMonitorInterceptor {
    fn invoke(&self, invocation: &mut dyn MethodInvocation) -> Result<Value> {
        let signature = invocation.method().signature();
        let started = Instant::now();
        let result = invocation.proceed();
        let elapsed = started.elapsed();
        if elapsed > self.threshold {
            self.slow_invocations.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                "Slow invocation of {}: {:?} exceeds threshold {:?}",
                signature,
                elapsed,
                self.threshold
            );
        } else {
            tracing::trace!("{} completed in {:?}", signature, elapsed);
        }
        result
    }

    fn name(&self) -> &str {
        "PerformanceMonitorInterceptor"
    }
}

/// 跟踪调用并统计次数，调试用
#[derive(Debug, Default)]
pub struct DebugInterceptor {
    count: AtomicUsize,
}

impl DebugInterceptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn reset_count(&self) {
        self.count.store(0, Ordering::SeqCst);
    }
}

impl MethodInterceptor for DebugInterceptor {
    fn invoke(&self, invocation: &mut dyn MethodInvocation) -> Result<Value> {
        let n = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!("Debug interceptor: count={} invocation={:?}", n, invocation.context());
        TraceInterceptor.invoke(invocation)
    }

    fn name(&self) -> &str {
        "DebugInterceptor"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::FnInterceptor;
    use crate::invocation::tests::{context_for, Calculator};
    use crate::invocation::ReflectiveMethodInvocation;
    use crate::target::{downcast_value, unit, value};
    use std::sync::Arc;
    use std::thread;

    fn run(chain: &[Arc<dyn MethodInterceptor>]) -> Result<Value> {
        let target = Calculator::new();
        let ctx = context_for(&target, "add", vec![value(2i64), value(3i64)]);
        ReflectiveMethodInvocation::new(&target, chain, ctx).proceed()
    }

    #[test]
    fn test_trace_passes_result_and_error_through() {
        let chain: Vec<Arc<dyn MethodInterceptor>> = vec![Arc::new(TraceInterceptor::new())];
        assert_eq!(downcast_value::<i64>(&run(&chain).unwrap()).unwrap(), 5);

        let failing: Vec<Arc<dyn MethodInterceptor>> = vec![
            Arc::new(TraceInterceptor::new()),
            Arc::new(FnInterceptor::new("fail", |_mi: &mut dyn MethodInvocation| anyhow::bail!("boom"))),
        ];
        assert_eq!(run(&failing).unwrap_err().to_string(), "boom");
    }

    #[test]
    fn test_debug_interceptor_counts() {
        let debug = Arc::new(DebugInterceptor::new());
        let chain: Vec<Arc<dyn MethodInterceptor>> = vec![debug.clone()];
        run(&chain).unwrap();
        run(&chain).unwrap();
        assert_eq!(debug.count(), 2);
        debug.reset_count();
        assert_eq!(debug.count(), 0);
    }

    #[test]
    fn test_performance_monitor_counts_slow_calls() {
        let monitor = Arc::new(PerformanceMonitorInterceptor::new(Duration::from_millis(5)));
        let slow: Vec<Arc<dyn MethodInterceptor>> = vec![
            monitor.clone(),
            Arc::new(FnInterceptor::new("sleep", |_mi: &mut dyn MethodInvocation| {
                thread::sleep(Duration::from_millis(15));
                Ok(unit())
            })),
        ];
        run(&slow).unwrap();
        assert_eq!(monitor.slow_invocations(), 1);

        let fast = Arc::new(PerformanceMonitorInterceptor::new(Duration::from_secs(60)));
        let chain: Vec<Arc<dyn MethodInterceptor>> = vec![fast.clone()];
        run(&chain).unwrap();
        assert_eq!(fast.slow_invocations(), 0);
    }
}
