//! 方法调用与拦截器链
//!
//! 一次代理调用对应一个 `ReflectiveMethodInvocation`：它持有目标、按顺序排好的拦截器
//! 和当前位置。每个拦截器拿到 `&mut dyn MethodInvocation`，调用 `proceed()` 把控制权
//! 交给下一个拦截器，最后一个拦截器之后是目标方法本身。

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use parking_lot::{Mutex, RwLock};

use crate::interceptor::MethodInterceptor;
use crate::target::{Advisable, Method, TargetId, TargetType, Value};

static NEXT_INVOCATION_ID: AtomicU64 = AtomicU64::new(1);

/// 调用上下文
///
/// 在拦截器、通知和线程本地暴露之间共享。参数可被环绕通知替换，
/// 用户属性在调用副本之间共享。
pub struct InvocationContext {
    id: u64,
    method: Arc<Method>,
    target_type: Arc<TargetType>,
    target_id: TargetId,
    arguments: RwLock<Vec<Value>>,
    attributes: Arc<Mutex<HashMap<String, Value>>>,
    started: Instant,
}

impl InvocationContext {
    pub fn new(
        method: Arc<Method>,
        target_type: Arc<TargetType>,
        target_id: TargetId,
        arguments: Vec<Value>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_INVOCATION_ID.fetch_add(1, Ordering::Relaxed),
            method,
            target_type,
            target_id,
            arguments: RwLock::new(arguments),
            attributes: Arc::new(Mutex::new(HashMap::new())),
            started: Instant::now(),
        })
    }

    /// 派生副本：新的 id 与参数，共享用户属性
    fn derive(&self, arguments: Vec<Value>) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_INVOCATION_ID.fetch_add(1, Ordering::Relaxed),
            method: Arc::clone(&self.method),
            target_type: Arc::clone(&self.target_type),
            target_id: self.target_id.clone(),
            arguments: RwLock::new(arguments),
            attributes: Arc::clone(&self.attributes),
            started: Instant::now(),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn target_type(&self) -> &TargetType {
        &self.target_type
    }

    pub fn target_id(&self) -> &TargetId {
        &self.target_id
    }

    pub fn arguments(&self) -> Vec<Value> {
        self.arguments.read().clone()
    }

    pub fn set_arguments(&self, arguments: Vec<Value>) {
        *self.arguments.write() = arguments;
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    pub fn user_attribute(&self, key: &str) -> Option<Value> {
        self.attributes.lock().get(key).cloned()
    }

    /// 设置用户属性，`None` 表示移除
    pub fn set_user_attribute(&self, key: impl Into<String>, value: Option<Value>) {
        let mut attributes = self.attributes.lock();
        match value {
            Some(value) => {
                attributes.insert(key.into(), value);
            }
            None => {
                attributes.remove(&key.into());
            }
        }
    }
}

impl fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationContext")
            .field("id", &self.id)
            .field("method", &self.method.signature())
            .field("target", &self.target_id)
            .finish()
    }
}

/// 拦截器看到的调用
pub trait MethodInvocation {
    fn context(&self) -> &Arc<InvocationContext>;

    /// 真正的目标对象
    fn target(&self) -> &Arc<dyn Advisable>;

    /// 继续执行链上的下一个拦截器，或在链尾调用目标方法
    fn proceed(&mut self) -> Result<Value>;

    /// 支持副本与参数替换的调用，环绕通知依赖这一能力
    fn as_proxy_invocation(&mut self) -> Option<&mut dyn ProxyMethodInvocation> {
        None
    }

    fn method(&self) -> &Method {
        self.context().method()
    }

    fn arguments(&self) -> Vec<Value> {
        self.context().arguments()
    }
}

/// 代理调用的扩展能力
pub trait ProxyMethodInvocation: MethodInvocation {
    fn set_arguments(&mut self, arguments: Vec<Value>) {
        self.context().set_arguments(arguments);
    }

    /// 从当前位置继续的副本，参数与原调用相同
    fn invocable_clone(&self) -> Box<dyn ProxyMethodInvocation + '_>;

    /// 从当前位置继续的副本，使用新的参数
    fn invocable_clone_with(&self, arguments: Vec<Value>) -> Box<dyn ProxyMethodInvocation + '_>;

    fn user_attribute(&self, key: &str) -> Option<Value> {
        self.context().user_attribute(key)
    }

    fn set_user_attribute(&self, key: &str, value: Option<Value>) {
        self.context().set_user_attribute(key, value);
    }
}

/// 基于拦截器切片的默认调用实现
pub struct ReflectiveMethodInvocation<'a> {
    target: &'a Arc<dyn Advisable>,
    interceptors: &'a [Arc<dyn MethodInterceptor>],
    /// 已经进入的拦截器数量
    current: usize,
    context: Arc<InvocationContext>,
}

impl<'a> ReflectiveMethodInvocation<'a> {
    pub fn new(
        target: &'a Arc<dyn Advisable>,
        interceptors: &'a [Arc<dyn MethodInterceptor>],
        context: Arc<InvocationContext>,
    ) -> Self {
        Self {
            target,
            interceptors,
            current: 0,
            context,
        }
    }

    fn invoke_joinpoint(&self) -> Result<Value> {
        let arguments = self.context.arguments();
        tracing::trace!(
            "Invoking target method {} (invocation #{})",
            self.context.method().signature(),
            self.context.id()
        );
        self.target.invoke_method(self.context.method(), &arguments)
    }
}

impl MethodInvocation for ReflectiveMethodInvocation<'_> {
    fn context(&self) -> &Arc<InvocationContext> {
        &self.context
    }

    fn target(&self) -> &Arc<dyn Advisable> {
        self.target
    }

    fn proceed(&mut self) -> Result<Value> {
        let interceptors = self.interceptors;
        match interceptors.get(self.current) {
            Some(interceptor) => {
                self.current += 1;
                interceptor.invoke(self)
            }
            None => self.invoke_joinpoint(),
        }
    }

    fn as_proxy_invocation(&mut self) -> Option<&mut dyn ProxyMethodInvocation> {
        Some(self)
    }
}

impl ProxyMethodInvocation for ReflectiveMethodInvocation<'_> {
    fn invocable_clone(&self) -> Box<dyn ProxyMethodInvocation + '_> {
        self.invocable_clone_with(self.context.arguments())
    }

    fn invocable_clone_with(&self, arguments: Vec<Value>) -> Box<dyn ProxyMethodInvocation + '_> {
        Box::new(ReflectiveMethodInvocation {
            target: self.target,
            interceptors: self.interceptors,
            current: self.current,
            context: self.context.derive(arguments),
        })
    }
}
