//! 代理
//!
//! `ProxyFactory` 收集目标和 Advisor，`get_proxy` 一次性确定代理暴露的类型和每个方法的拦截器链。
//! `AopProxy` 自身实现 `Advisable`，因此可以再次被代理。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use anyhow::Result;

use crate::advisor::{Advisor, AdvisorKind, DefaultPointcutAdvisor};
use crate::aop_utils;
use crate::auto_proxy::ProxiedBeanName;
use crate::error::AopError;
use crate::interceptor::MethodInterceptor;
use crate::invocation::{InvocationContext, MethodInvocation, ReflectiveMethodInvocation};
use crate::target::{Advisable, Method, TargetId, TargetType, Value};

/// 代理工厂
pub struct ProxyFactory {
    target: Arc<dyn Advisable>,
    advisors: Vec<Arc<dyn Advisor>>,
    proxy_target_class: bool,
    bean_name: Option<String>,
}

impl ProxyFactory {
    pub fn new(target: Arc<dyn Advisable>) -> Self {
        Self {
            target,
            advisors: Vec::new(),
            proxy_target_class: true,
            bean_name: None,
        }
    }

    /// Advisor 按添加顺序生效，需要排序时由调用方先排好
    pub fn add_advisor(&mut self, advisor: Arc<dyn Advisor>) -> &mut Self {
        self.advisors.push(advisor);
        self
    }

    pub fn add_advisors(&mut self, advisors: impl IntoIterator<Item = Arc<dyn Advisor>>) -> &mut Self {
        self.advisors.extend(advisors);
        self
    }

    /// 对所有方法生效的拦截器
    pub fn add_interceptor(&mut self, interceptor: Arc<dyn MethodInterceptor>) -> &mut Self {
        self.add_advisor(Arc::new(DefaultPointcutAdvisor::always(interceptor)))
    }

    /// `true` 时代理暴露目标类型的全部方法，`false` 时只暴露接口方法
    pub fn proxy_target_class(&mut self, proxy_target_class: bool) -> &mut Self {
        self.proxy_target_class = proxy_target_class;
        self
    }

    /// 计算拦截器链时 `bean()` 切点使用的名称
    pub fn bean_name(&mut self, bean_name: impl Into<String>) -> &mut Self {
        self.bean_name = Some(bean_name.into());
        self
    }

    pub fn advisors(&self) -> &[Arc<dyn Advisor>] {
        &self.advisors
    }

    pub fn get_proxy(&self) -> Result<Arc<AopProxy>, AopError> {
        let _bean = self.bean_name.as_deref().map(ProxiedBeanName::enter);
        let target_type = Arc::new(self.target.target_type().clone());

        let proxy_target_class = self.proxy_target_class || target_type.interfaces().is_empty();
        if !self.proxy_target_class && proxy_target_class {
            tracing::debug!(
                "Type '{}' implements no interfaces, proxying the type itself",
                target_type.name()
            );
        }

        let mut proxy_type = if proxy_target_class {
            TargetType::new(target_type.name())
        } else {
            TargetType::new(format!("$Proxy[{}]", target_type.name()))
        };
        for interface in target_type.interfaces() {
            proxy_type = proxy_type.implements(interface.as_str());
        }
        for method in target_type.methods() {
            if proxy_target_class || target_type.interfaces().iter().any(|i| i == method.declaring_type()) {
                proxy_type = proxy_type.with_method(method.clone());
            }
        }

        let mut introduced_interfaces = Vec::new();
        for advisor in &self.advisors {
            if let AdvisorKind::Introduction(introduction) = advisor.kind() {
                if !introduction.class_filter().matches(&target_type) {
                    continue;
                }
                if proxy_type.is_assignable_to(introduction.interface()) {
                    continue;
                }
                tracing::debug!(
                    "Introducing interface '{}' into proxy for '{}'",
                    introduction.interface(),
                    target_type.name()
                );
                proxy_type = proxy_type.implements(introduction.interface());
                for method in introduction.introduced_methods() {
                    proxy_type = proxy_type.with_method(method.clone());
                }
                introduced_interfaces.push(introduction.interface().to_string());
            }
        }

        let mut methods = HashMap::with_capacity(proxy_type.methods().len());
        for method in proxy_type.methods() {
            let chain = aop_utils::interceptors_for(&self.advisors, method, &target_type);
            tracing::trace!(
                "Interceptor chain for {}: {:?}",
                method.signature(),
                chain.iter().map(|i| i.name()).collect::<Vec<_>>()
            );
            methods.insert(
                method.signature(),
                MethodEntry {
                    method: Arc::new(method.clone()),
                    chain,
                },
            );
        }

        Ok(Arc::new(AopProxy {
            target: Arc::clone(&self.target),
            target_id: TargetId::of(&self.target),
            target_type,
            proxy_type,
            advisors: self.advisors.clone(),
            methods,
            introduced_interfaces,
            proxy_target_class,
            bean_name: self.bean_name.clone(),
        }))
    }
}

struct MethodEntry {
    method: Arc<Method>,
    chain: Vec<Arc<dyn MethodInterceptor>>,
}

/// AOP 代理
pub struct AopProxy {
    target: Arc<dyn Advisable>,
    target_id: TargetId,
    target_type: Arc<TargetType>,
    proxy_type: TargetType,
    advisors: Vec<Arc<dyn Advisor>>,
    /// 方法签名 -> 拦截器链
    methods: HashMap<String, MethodEntry>,
    introduced_interfaces: Vec<String>,
    proxy_target_class: bool,
    bean_name: Option<String>,
}

impl AopProxy {
    /// 按方法名调用
    pub fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        let method = self.proxy_type.find_method(method).ok_or_else(|| AopError::UnknownMethod {
            target: self.proxy_type.name().to_string(),
            method: method.to_string(),
        })?;
        self.invoke_method(method, &args)
    }

    /// 代理是否实现该接口（包括引入的接口）
    pub fn implements(&self, interface: &str) -> bool {
        self.proxy_type.is_assignable_to(interface)
    }

    pub fn proxied_interfaces(&self) -> &[String] {
        self.proxy_type.interfaces()
    }

    pub fn introduced_interfaces(&self) -> &[String] {
        &self.introduced_interfaces
    }

    pub fn advisors(&self) -> &[Arc<dyn Advisor>] {
        &self.advisors
    }

    pub fn target(&self) -> &Arc<dyn Advisable> {
        &self.target
    }

    pub fn is_proxy_target_class(&self) -> bool {
        self.proxy_target_class
    }

    pub fn bean_name(&self) -> Option<&str> {
        self.bean_name.as_deref()
    }

    /// 方法的拦截器数量，方法不存在时为 `None`
    pub fn chain_len(&self, method: &str) -> Option<usize> {
        let method = self.proxy_type.find_method(method)?;
        self.methods.get(&method.signature()).map(|entry| entry.chain.len())
    }
}

impl Advisable for AopProxy {
    fn target_type(&self) -> &TargetType {
        &self.proxy_type
    }

    fn invoke_method(&self, method: &Method, args: &[Value]) -> Result<Value> {
        let signature = method.signature();
        let entry = self.methods.get(&signature).ok_or_else(|| AopError::UnknownMethod {
            target: self.proxy_type.name().to_string(),
            method: signature.clone(),
        })?;
        let expected = entry.method.parameter_types().len();
        if args.len() != expected {
            return Err(AopError::ArgumentCountMismatch {
                method: signature,
                expected,
                actual: args.len(),
            }
            .into());
        }

        if entry.chain.is_empty() {
            return self.target.invoke_method(&entry.method, args);
        }
        let context = InvocationContext::new(
            Arc::clone(&entry.method),
            Arc::clone(&self.target_type),
            self.target_id.clone(),
            args.to_vec(),
        );
        ReflectiveMethodInvocation::new(&self.target, &entry.chain, context).proceed()
    }
}

impl fmt::Debug for AopProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AopProxy")
            .field("type", &self.proxy_type.name())
            .field("target", &self.target_type.name())
            .field("advisors", &self.advisors.len())
            .field("bean_name", &self.bean_name)
            .finish()
    }
}

/// 通过任意 `Advisable` 按方法名调用，参数自动装箱
///
/// ```ignore
/// let total = invoke!(proxy => i64, "add", 1i64, 2i64)?;
/// let raw = invoke!(proxy, "echo", "hi".to_string())?;
/// ```
#[macro_export]
macro_rules! invoke {
    ($target:expr => $ret:ty, $method:expr $(, $arg:expr)* $(,)?) => {
        $crate::AdvisableExt::call_as::<$ret>(&*$target, $method, vec![$($crate::value($arg)),*])
    };
    ($target:expr, $method:expr $(, $arg:expr)* $(,)?) => {
        $crate::AdvisableExt::call(&*$target, $method, vec![$($crate::value($arg)),*])
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::{DebugInterceptor, FnInterceptor};
    use crate::introduction::DeclareParentsAdvisor;
    use crate::target::{downcast_value, value, AdvisableExt};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Account {
        ty: TargetType,
        balance: AtomicUsize,
    }

    impl Account {
        fn new() -> Arc<dyn Advisable> {
            Arc::new(Self {
                ty: TargetType::new("bank.Account")
                    .interface_method("bank.Ledger", "deposit", ["usize"], "usize")
                    .method("audit", Vec::<String>::new(), "()"),
                balance: AtomicUsize::new(0),
            })
        }
    }

    impl Advisable for Account {
        fn target_type(&self) -> &TargetType {
            &self.ty
        }

        fn invoke_method(&self, method: &Method, args: &[Value]) -> Result<Value> {
            match method.name() {
                "deposit" => {
                    let amount = crate::target::arg::<usize>(args, 0)?;
                    Ok(value(self.balance.fetch_add(amount, Ordering::SeqCst) + amount))
                }
                "audit" => Ok(crate::target::unit()),
                other => anyhow::bail!("unexpected method {}", other),
            }
        }
    }

    struct Tag {
        ty: TargetType,
    }

    impl Advisable for Tag {
        fn target_type(&self) -> &TargetType {
            &self.ty
        }

        fn invoke_method(&self, _method: &Method, _args: &[Value]) -> Result<Value> {
            Ok(value("tagged".to_string()))
        }
    }

    fn doubling() -> Arc<dyn MethodInterceptor> {
        Arc::new(FnInterceptor::new("doubling", |mi: &mut dyn MethodInvocation| {
            let amount = crate::target::arg::<usize>(&mi.arguments(), 0)?;
            mi.context().set_arguments(vec![value(amount * 2)]);
            mi.proceed()
        }))
    }

    #[test]
    fn test_class_proxy_exposes_all_methods() {
        let debug = Arc::new(DebugInterceptor::new());
        let proxy = ProxyFactory::new(Account::new()).add_interceptor(debug.clone()).get_proxy().unwrap();
        assert!(proxy.is_proxy_target_class());
        assert_eq!(proxy.target_type().name(), "bank.Account");
        assert!(proxy.invoke("audit", Vec::new()).is_ok());
        assert_eq!(debug.count(), 1);
    }

    #[test]
    fn test_interface_proxy_hides_class_methods() {
        let proxy = ProxyFactory::new(Account::new())
            .proxy_target_class(false)
            .add_interceptor(doubling())
            .get_proxy()
            .unwrap();
        assert!(!proxy.is_proxy_target_class());
        assert!(proxy.implements("bank.Ledger"));
        let err = proxy.invoke("audit", Vec::new()).unwrap_err();
        assert!(matches!(err.downcast_ref::<AopError>(), Some(AopError::UnknownMethod { .. })));
        assert_eq!(proxy.call_as::<usize>("deposit", vec![value(5usize)]).unwrap(), 10);
    }

    #[test]
    fn test_argument_count_checked() {
        let proxy = ProxyFactory::new(Account::new()).get_proxy().unwrap();
        let err = proxy.invoke("deposit", Vec::new()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AopError>(),
            Some(AopError::ArgumentCountMismatch { expected: 1, actual: 0, .. })
        ));
        assert_eq!(proxy.chain_len("deposit"), Some(0));
    }

    #[test]
    fn test_proxies_nest() {
        let inner = ProxyFactory::new(Account::new()).add_interceptor(doubling()).get_proxy().unwrap();
        let outer = ProxyFactory::new(inner).add_interceptor(doubling()).get_proxy().unwrap();
        assert_eq!(crate::invoke!(outer => usize, "deposit", 3usize).unwrap(), 12);
    }

    #[test]
    fn test_introduction_adds_interface_and_methods() {
        let delegate: Arc<dyn Advisable> = Arc::new(Tag {
            ty: TargetType::new("mixin.TagImpl").interface_method("meta.Tagged", "tag", Vec::<String>::new(), "String"),
        });
        let introduction = DeclareParentsAdvisor::shared("meta.Tagged", "bank.*", delegate).unwrap();
        let proxy = ProxyFactory::new(Account::new())
            .add_advisor(Arc::new(introduction))
            .get_proxy()
            .unwrap();
        assert!(proxy.implements("meta.Tagged"));
        assert_eq!(proxy.introduced_interfaces(), ["meta.Tagged".to_string()]);
        let tag = proxy.invoke("tag", Vec::new()).unwrap();
        assert_eq!(downcast_value::<String>(&tag).unwrap(), "tagged");
        assert_eq!(proxy.call_as::<usize>("deposit", vec![value(4usize)]).unwrap(), 4);
    }
}
