//! 方法拦截器
//!
//! 所有通知最终都被适配为 `MethodInterceptor`，由代理按顺序组成拦截器链。

mod bean_name;
mod expose;
mod throttle;
mod trace;

use std::fmt;

use anyhow::Result;

use crate::invocation::MethodInvocation;
use crate::target::Value;

pub use bean_name::{current_bean_name, ExposeBeanNameInterceptor, BEAN_NAME_ATTRIBUTE};
pub use expose::{
    current_invocation, expose_invocation_advisor, is_expose_invocation_advisor,
    ExposeInvocationInterceptor,
};
pub use throttle::ConcurrencyThrottleInterceptor;
pub use trace::{DebugInterceptor, PerformanceMonitorInterceptor, TraceInterceptor};

/// 方法拦截器
pub trait MethodInterceptor: Send + Sync {
    /// 在调用前后做额外处理，通过 `invocation.proceed()` 继续执行
    fn invoke(&self, invocation: &mut dyn MethodInvocation) -> Result<Value>;

    /// 拦截器名称（用于日志和诊断）
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// 闭包拦截器
pub struct FnInterceptor<F> {
    name: String,
    f: F,
}

impl<F> FnInterceptor<F>
where
    F: Fn(&mut dyn MethodInvocation) -> Result<Value> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> MethodInterceptor for FnInterceptor<F>
where
    F: Fn(&mut dyn MethodInvocation) -> Result<Value> + Send + Sync,
{
    fn invoke(&self, invocation: &mut dyn MethodInvocation) -> Result<Value> {
        (self.f)(invocation)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl<F> fmt::Debug for FnInterceptor<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnInterceptor").field("name", &self.name).finish()
    }
}
