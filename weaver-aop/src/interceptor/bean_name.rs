//! 在调用上暴露 Bean 名称
//!
//! 代理工厂知道目标的 Bean 名称，而通知只看得到调用。
//! 这个拦截器把名称写入调用的用户属性，后续通知通过 [`current_bean_name`] 读取。

use anyhow::Result;

use crate::error::AopError;
use crate::interceptor::{current_invocation, MethodInterceptor};
use crate::invocation::MethodInvocation;
use crate::target::{value, Value};

/// 用户属性中保存 Bean 名称的键
pub const BEAN_NAME_ATTRIBUTE: &str = "weaver.aop.beanName";

#[derive(Debug, Clone)]
pub struct ExposeBeanNameInterceptor {
    bean_name: String,
}

impl ExposeBeanNameInterceptor {
    pub fn new(bean_name: impl Into<String>) -> Self {
        Self {
            bean_name: bean_name.into(),
        }
    }

    pub fn bean_name(&self) -> &str {
        &self.bean_name
    }
}

impl MethodInterceptor for ExposeBeanNameInterceptor {
    fn invoke(&self, invocation: &mut dyn MethodInvocation) -> Result<Value> {
        let proxy_invocation = invocation
            .as_proxy_invocation()
            .ok_or_else(|| AopError::ProceedNotSupported {
                advice: "ExposeBeanNameInterceptor".to_string(),
            })?;
        proxy_invocation.set_user_attribute(BEAN_NAME_ATTRIBUTE, Some(value(self.bean_name.clone())));
        proxy_invocation.proceed()
    }

    fn name(&self) -> &str {
        "ExposeBeanNameInterceptor"
    }
}

/// 当前调用所属的 Bean 名称
///
/// 需要链上同时存在 `ExposeInvocationInterceptor` 和 `ExposeBeanNameInterceptor`
pub fn current_bean_name() -> Result<String, AopError> {
    let invocation = current_invocation()?;
    invocation
        .user_attribute(BEAN_NAME_ATTRIBUTE)
        .and_then(|name| name.downcast_ref::<String>().cloned())
        .ok_or_else(|| AopError::NoBeanNameExposed {
            method: invocation.method().signature(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::{ExposeInvocationInterceptor, FnInterceptor};
    use crate::invocation::tests::{context_for, Calculator};
    use crate::invocation::ReflectiveMethodInvocation;
    use crate::target::downcast_value;
    use std::sync::Arc;

    fn bean_name_reader() -> Arc<dyn MethodInterceptor> {
        Arc::new(FnInterceptor::new("beanNameReader", |_mi: &mut dyn MethodInvocation| {
            Ok(value(current_bean_name()?))
        }))
    }

    #[test]
    fn test_bean_name_visible_to_later_advice() {
        let chain: Vec<Arc<dyn MethodInterceptor>> = vec![
            Arc::new(ExposeInvocationInterceptor),
            Arc::new(ExposeBeanNameInterceptor::new("userService")),
            bean_name_reader(),
        ];
        let target = Calculator::new();
        let ctx = context_for(&target, "echo", vec![value("x".to_string())]);
        let result = ReflectiveMethodInvocation::new(&target, &chain, ctx).proceed().unwrap();
        assert_eq!(downcast_value::<String>(&result).unwrap(), "userService");
    }

    #[test]
    fn test_missing_bean_name_is_reported() {
        let chain: Vec<Arc<dyn MethodInterceptor>> = vec![Arc::new(ExposeInvocationInterceptor), bean_name_reader()];
        let target = Calculator::new();
        let ctx = context_for(&target, "echo", vec![value("x".to_string())]);
        let err = ReflectiveMethodInvocation::new(&target, &chain, ctx).proceed().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AopError>(),
            Some(AopError::NoBeanNameExposed { method }) if method == "test.Calculator.echo(String)"
        ));
    }
}
