//! 通知
//!
//! 五种通知在这里统一适配为拦截器：
//! - `Before`：执行通知后继续调用
//! - `After`：无论调用成功与否都在之后执行，相当于 finally
//! - `AfterReturning`：仅在正常返回且返回值类型符合时执行
//! - `AfterThrowing`：仅在出错且错误类型符合时执行，之后原样重新返回该错误
//! - `Around`：完全控制是否、何时、以什么参数继续调用

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use anyhow::Result;

use crate::error::AopError;
use crate::instance_factory::AspectInstanceFactory;
use crate::interceptor::MethodInterceptor;
use crate::invocation::MethodInvocation;
use crate::joinpoint::{JoinPoint, ProceedingJoinPoint};
use crate::target::Value;

/// 通知类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdviceKind {
    Before,
    After,
    AfterReturning,
    AfterThrowing,
    Around,
}

impl AdviceKind {
    /// 在目标方法之后执行的通知
    pub fn is_after(&self) -> bool {
        matches!(
            self,
            AdviceKind::After | AdviceKind::AfterReturning | AdviceKind::AfterThrowing
        )
    }

    pub fn is_before(&self) -> bool {
        matches!(self, AdviceKind::Before)
    }
}

impl fmt::Display for AdviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AdviceKind::Before => "before",
            AdviceKind::After => "after",
            AdviceKind::AfterReturning => "afterReturning",
            AdviceKind::AfterThrowing => "afterThrowing",
            AdviceKind::Around => "around",
        };
        f.write_str(s)
    }
}

pub type BeforeFn = Arc<dyn Fn(&dyn Any, &JoinPoint) -> Result<()> + Send + Sync>;
pub type AfterReturningFn = Arc<dyn Fn(&dyn Any, &JoinPoint, &Value) -> Result<()> + Send + Sync>;
pub type AfterThrowingFn = Arc<dyn Fn(&dyn Any, &JoinPoint, &anyhow::Error) -> Result<()> + Send + Sync>;
pub type AroundFn = Arc<dyn Fn(&dyn Any, &mut ProceedingJoinPoint<'_>) -> Result<Value> + Send + Sync>;

fn is_value<T: Any>(value: &Value) -> bool {
    (**value).is::<T>()
}

fn is_error<E>(error: &anyhow::Error) -> bool
where
    E: fmt::Display + fmt::Debug + Send + Sync + 'static,
{
    error.is::<E>()
}

/// `returning` 过滤：返回值是指定类型时才执行通知
#[derive(Clone, Copy)]
pub struct ReturningFilter {
    type_name: &'static str,
    matches: fn(&Value) -> bool,
}

impl ReturningFilter {
    pub fn of<T: Any>() -> Self {
        Self {
            type_name: std::any::type_name::<T>(),
            matches: is_value::<T>,
        }
    }

    pub fn matches(&self, value: &Value) -> bool {
        (self.matches)(value)
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl fmt::Debug for ReturningFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReturningFilter<{}>", self.type_name)
    }
}

/// `throwing` 过滤：错误链顶层是指定类型时才执行通知
#[derive(Clone, Copy)]
pub struct ThrowingFilter {
    type_name: &'static str,
    matches: fn(&anyhow::Error) -> bool,
}

impl ThrowingFilter {
    pub fn of<E>() -> Self
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        Self {
            type_name: std::any::type_name::<E>(),
            matches: is_error::<E>,
        }
    }

    pub fn matches(&self, error: &anyhow::Error) -> bool {
        (self.matches)(error)
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl fmt::Debug for ThrowingFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ThrowingFilter<{}>", self.type_name)
    }
}

/// 绑定到切面实例上的通知方法
#[derive(Clone)]
pub enum AdviceMethod {
    Before(BeforeFn),
    After(BeforeFn),
    AfterReturning {
        method: AfterReturningFn,
        returning: Option<ReturningFilter>,
    },
    AfterThrowing {
        method: AfterThrowingFn,
        throwing: Option<ThrowingFilter>,
    },
    Around(AroundFn),
}

impl AdviceMethod {
    pub fn kind(&self) -> AdviceKind {
        match self {
            AdviceMethod::Before(_) => AdviceKind::Before,
            AdviceMethod::After(_) => AdviceKind::After,
            AdviceMethod::AfterReturning { .. } => AdviceKind::AfterReturning,
            AdviceMethod::AfterThrowing { .. } => AdviceKind::AfterThrowing,
            AdviceMethod::Around(_) => AdviceKind::Around,
        }
    }
}

impl fmt::Debug for AdviceMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdviceMethod::AfterReturning { returning, .. } => f
                .debug_struct("AfterReturning")
                .field("returning", returning)
                .finish(),
            AdviceMethod::AfterThrowing { throwing, .. } => f
                .debug_struct("AfterThrowing")
                .field("throwing", throwing)
                .finish(),
            other => write!(f, "{}", other.kind()),
        }
    }
}

/// 切面通知
///
/// 每次调用时从实例工厂获取切面实例，单例切面总是同一个实例，
/// per-target 切面按目标实例各自创建
pub struct AspectJAdvice {
    name: String,
    aspect_name: String,
    expression: String,
    method: AdviceMethod,
    instance_factory: Arc<dyn AspectInstanceFactory>,
}

impl AspectJAdvice {
    pub fn new(
        aspect_name: impl Into<String>,
        declaration_order: usize,
        expression: impl Into<String>,
        method: AdviceMethod,
        instance_factory: Arc<dyn AspectInstanceFactory>,
    ) -> Self {
        let aspect_name = aspect_name.into();
        Self {
            name: format!("{}.{}#{}", aspect_name, method.kind(), declaration_order),
            aspect_name,
            expression: expression.into(),
            method,
            instance_factory,
        }
    }

    pub fn kind(&self) -> AdviceKind {
        self.method.kind()
    }

    pub fn aspect_name(&self) -> &str {
        &self.aspect_name
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn instance_factory(&self) -> &Arc<dyn AspectInstanceFactory> {
        &self.instance_factory
    }

    fn aspect_instance(&self, invocation: &dyn MethodInvocation) -> Result<Arc<dyn Any + Send + Sync>> {
        Ok(self
            .instance_factory
            .aspect_instance(invocation.context().target_id())?)
    }
}

impl fmt::Debug for AspectJAdvice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AspectJAdvice")
            .field("name", &self.name)
            .field("expression", &self.expression)
            .field("method", &self.method)
            .finish()
    }
}

impl MethodInterceptor for AspectJAdvice {
    fn invoke(&self, invocation: &mut dyn MethodInvocation) -> Result<Value> {
        match &self.method {
            AdviceMethod::Before(method) => {
                let aspect = self.aspect_instance(invocation)?;
                let join_point = JoinPoint::new(Arc::clone(invocation.context()));
                method(&*aspect, &join_point)?;
                invocation.proceed()
            }
            AdviceMethod::After(method) => {
                let result = invocation.proceed();
                let aspect = self.aspect_instance(invocation)?;
                let join_point = JoinPoint::new(Arc::clone(invocation.context()));
                method(&*aspect, &join_point)?;
                result
            }
            AdviceMethod::AfterReturning { method, returning } => {
                let value = invocation.proceed()?;
                if returning.map_or(true, |filter| filter.matches(&value)) {
                    let aspect = self.aspect_instance(invocation)?;
                    let join_point = JoinPoint::new(Arc::clone(invocation.context()));
                    method(&*aspect, &join_point, &value)?;
                }
                Ok(value)
            }
            AdviceMethod::AfterThrowing { method, throwing } => match invocation.proceed() {
                Ok(value) => Ok(value),
                Err(error) => {
                    if throwing.map_or(true, |filter| filter.matches(&error)) {
                        let join_point = JoinPoint::new(Arc::clone(invocation.context()));
                        let outcome = self
                            .aspect_instance(invocation)
                            .and_then(|aspect| method(&*aspect, &join_point, &error));
                        if let Err(advice_error) = outcome {
                            tracing::error!(
                                "After-throwing advice '{}' failed: {:#}; rethrowing original error",
                                self.name,
                                advice_error
                            );
                        }
                    }
                    Err(error)
                }
            },
            AdviceMethod::Around(method) => {
                let aspect = self.aspect_instance(invocation)?;
                let proxy_invocation =
                    invocation
                        .as_proxy_invocation()
                        .ok_or_else(|| AopError::ProceedNotSupported {
                            advice: self.name.clone(),
                        })?;
                let mut join_point = ProceedingJoinPoint::new(proxy_invocation);
                method(&*aspect, &mut join_point)
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
