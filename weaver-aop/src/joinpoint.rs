//! 连接点（JoinPoint）定义
//!
//! 连接点表示一次被拦截的方法调用，通知方法通过它读取方法、参数和目标信息

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::error::AopError;
use crate::invocation::{InvocationContext, ProxyMethodInvocation};
use crate::target::{arg, Method, TargetId, TargetType, Value};

/// 连接点信息
#[derive(Clone)]
pub struct JoinPoint {
    context: Arc<InvocationContext>,
}

impl JoinPoint {
    pub fn new(context: Arc<InvocationContext>) -> Self {
        Self { context }
    }

    /// 获取完整的方法签名
    pub fn signature(&self) -> String {
        self.context.method().signature()
    }

    pub fn method(&self) -> &Method {
        self.context.method()
    }

    /// 获取方法名称
    pub fn method_name(&self) -> &str {
        self.context.method().name()
    }

    pub fn target_type(&self) -> &TargetType {
        self.context.target_type()
    }

    pub fn target_id(&self) -> &TargetId {
        self.context.target_id()
    }

    /// 当前参数（环绕通知替换参数后可见新值）
    pub fn args(&self) -> Vec<Value> {
        self.context.arguments()
    }

    /// 按下标读取参数
    pub fn arg<T: Any + Send + Sync + Clone>(&self, index: usize) -> Result<T> {
        arg(&self.context.arguments(), index)
    }

    /// 获取调用时间戳
    pub fn timestamp(&self) -> Instant {
        self.context.started()
    }

    pub fn elapsed(&self) -> Duration {
        self.context.started().elapsed()
    }

    pub fn invocation_id(&self) -> u64 {
        self.context.id()
    }

    pub fn context(&self) -> &Arc<InvocationContext> {
        &self.context
    }
}

impl fmt::Debug for JoinPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinPoint")
            .field("signature", &self.signature())
            .field("target", &self.target_id())
            .field("invocation", &self.invocation_id())
            .finish()
    }
}

impl fmt::Display for JoinPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "execution({})", self.signature())
    }
}

/// 环绕通知的连接点
///
/// 每次 `proceed` 都从当前链位置复制一份调用再继续，
/// 因此可以不调用、调用一次或多次，每次都会重新执行后续拦截器和目标方法
pub struct ProceedingJoinPoint<'a> {
    invocation: &'a mut dyn ProxyMethodInvocation,
    join_point: JoinPoint,
}

impl<'a> ProceedingJoinPoint<'a> {
    pub fn new(invocation: &'a mut dyn ProxyMethodInvocation) -> Self {
        let join_point = JoinPoint::new(Arc::clone(invocation.context()));
        Self {
            invocation,
            join_point,
        }
    }

    /// 使用原参数继续执行
    pub fn proceed(&mut self) -> Result<Value> {
        let mut invocation = self.invocation.invocable_clone();
        invocation.proceed()
    }

    /// 使用新参数继续执行，参数个数必须与方法声明一致
    pub fn proceed_with(&mut self, args: Vec<Value>) -> Result<Value> {
        let expected = self.join_point.method().parameter_types().len();
        if args.len() != expected {
            return Err(AopError::ArgumentCountMismatch {
                method: self.join_point.signature(),
                expected,
                actual: args.len(),
            }
            .into());
        }
        let mut invocation = self.invocation.invocable_clone_with(args);
        invocation.proceed()
    }

    /// 替换后续 `proceed()` 使用的参数
    pub fn set_args(&mut self, args: Vec<Value>) {
        self.invocation.set_arguments(args);
    }

    /// 获取连接点信息
    pub fn join_point(&self) -> &JoinPoint {
        &self.join_point
    }
}

impl fmt::Debug for ProceedingJoinPoint<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProceedingJoinPoint")
            .field("join_point", &self.join_point)
            .finish()
    }
}

impl std::ops::Deref for ProceedingJoinPoint<'_> {
    type Target = JoinPoint;

    fn deref(&self) -> &JoinPoint {
        &self.join_point
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::MethodInterceptor;
    use crate::invocation::tests::{context_for, Calculator};
    use crate::invocation::ReflectiveMethodInvocation;
    use crate::target::{downcast_value, value};

    #[test]
    fn test_join_point_accessors() {
        let target = Calculator::new();
        let ctx = context_for(&target, "add", vec![value(4i64), value(5i64)]);
        let jp = JoinPoint::new(ctx);
        assert_eq!(jp.method_name(), "add");
        assert_eq!(jp.signature(), "test.Calculator.add(i64, i64)");
        assert_eq!(jp.arg::<i64>(1).unwrap(), 5);
        assert_eq!(jp.to_string(), "execution(test.Calculator.add(i64, i64))");
    }

    #[test]
    fn test_proceed_with_validates_argument_count() {
        let target = Calculator::new();
        let chain: Vec<Arc<dyn MethodInterceptor>> = Vec::new();
        let ctx = context_for(&target, "add", vec![value(1i64), value(2i64)]);
        let mut invocation = ReflectiveMethodInvocation::new(&target, &chain, ctx);
        let mut pjp = ProceedingJoinPoint::new(&mut invocation);

        let err = pjp.proceed_with(vec![value(1i64)]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AopError>(),
            Some(AopError::ArgumentCountMismatch { expected: 2, actual: 1, .. })
        ));

        pjp.set_args(vec![value(7i64), value(8i64)]);
        assert_eq!(downcast_value::<i64>(&pjp.proceed().unwrap()).unwrap(), 15);
        assert_eq!(pjp.arg::<i64>(0).unwrap(), 7);
    }
}
