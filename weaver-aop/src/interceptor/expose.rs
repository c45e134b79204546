//! 暴露当前调用
//!
//! 通知方法拿不到调用对象的引用时，可以通过线程本地变量取得正在进行的调用。
//! 拦截器进入时保存旧值并设置当前调用，返回（包括出错）时恢复旧值，
//! 因此嵌套的代理调用结束后外层调用会重新可见。

use std::cell::RefCell;
use std::sync::Arc;

use anyhow::Result;
use once_cell::sync::Lazy;

use crate::advisor::{Advisor, DefaultPointcutAdvisor};
use crate::error::AopError;
use crate::interceptor::MethodInterceptor;
use crate::invocation::{InvocationContext, MethodInvocation};
use crate::target::Value;

thread_local! {
    static CURRENT_INVOCATION: RefCell<Option<Arc<InvocationContext>>> = const { RefCell::new(None) };
}

static ADVISOR: Lazy<Arc<dyn Advisor>> = Lazy::new(|| {
    Arc::new(
        DefaultPointcutAdvisor::always(Arc::new(ExposeInvocationInterceptor))
            .with_order(i32::MIN + 1),
    )
});

/// 把当前调用写入线程本地变量的拦截器
///
/// 需要位于链的最前面，其余通知才能通过 [`current_invocation`] 看到调用
#[derive(Debug, Default, Clone, Copy)]
pub struct ExposeInvocationInterceptor;

impl MethodInterceptor for ExposeInvocationInterceptor {
    fn invoke(&self, invocation: &mut dyn MethodInvocation) -> Result<Value> {
        let _scope = ExposedInvocation::enter(Arc::clone(invocation.context()));
        invocation.proceed()
    }

    fn name(&self) -> &str {
        "ExposeInvocationInterceptor"
    }
}

struct ExposedInvocation {
    previous: Option<Arc<InvocationContext>>,
}

impl ExposedInvocation {
    fn enter(context: Arc<InvocationContext>) -> Self {
        let previous = CURRENT_INVOCATION.with(|slot| slot.borrow_mut().replace(context));
        Self { previous }
    }
}

impl Drop for ExposedInvocation {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT_INVOCATION.with(|slot| *slot.borrow_mut() = previous);
    }
}

/// 当前线程正在进行的调用
pub fn current_invocation() -> Result<Arc<InvocationContext>, AopError> {
    CURRENT_INVOCATION
        .with(|slot| slot.borrow().clone())
        .ok_or(AopError::NoInvocationExposed)
}

/// 共享的 Advisor，顺序紧随最高优先级
pub fn expose_invocation_advisor() -> Arc<dyn Advisor> {
    Arc::clone(&ADVISOR)
}

pub fn is_expose_invocation_advisor(advisor: &Arc<dyn Advisor>) -> bool {
    Arc::ptr_eq(advisor, &ADVISOR)
}
