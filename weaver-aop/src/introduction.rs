//! 引入（declare-parents）
//!
//! 为匹配类型模式的目标额外实现一个接口，接口方法转交给委托对象执行。
//! 委托可以在所有目标之间共享，也可以每个目标实例各自一份。

use std::fmt;
use std::sync::Arc;

use anyhow::Result;

use crate::advisor::{Advice, Advisor, AdvisorKind};
use crate::error::AopError;
use crate::interceptor::MethodInterceptor;
use crate::invocation::MethodInvocation;
use crate::pointcut::{ClassFilter, TypePatternClassFilter};
use crate::target::{Advisable, Method, PerTarget, TargetId, TargetType, Value};

/// 为每个目标实例创建委托
pub type DelegateFactory = Arc<dyn Fn() -> Arc<dyn Advisable> + Send + Sync>;

/// 引入型 Advisor
pub trait IntroductionAdvisor: Send + Sync {
    fn class_filter(&self) -> &dyn ClassFilter;

    /// 引入的接口名
    fn interface(&self) -> &str;

    /// 接口上的方法，代理会把它们加入可调用的方法表
    fn introduced_methods(&self) -> &[Method];
}

enum Delegate {
    Shared(Arc<dyn Advisable>),
    PerInstance {
        create: DelegateFactory,
        delegates: PerTarget<Arc<dyn Advisable>>,
    },
}

/// 把引入接口的方法转交给委托，其余方法继续执行
pub struct IntroductionInterceptor {
    interface: String,
    delegate: Delegate,
}

impl IntroductionInterceptor {
    pub fn interface(&self) -> &str {
        &self.interface
    }

    fn delegate_for(&self, target: &TargetId) -> Arc<dyn Advisable> {
        match &self.delegate {
            Delegate::Shared(delegate) => Arc::clone(delegate),
            Delegate::PerInstance { create, delegates } => delegates.get_or_insert_with(target, || {
                tracing::debug!("Creating '{}' delegate for target {}", self.interface, target);
                create()
            }),
        }
    }

    /// 当前保留的每实例委托数量
    pub fn delegate_count(&self) -> usize {
        match &self.delegate {
            Delegate::Shared(_) => 1,
            Delegate::PerInstance { delegates, .. } => delegates.len(),
        }
    }
}

impl MethodInterceptor for IntroductionInterceptor {
    fn invoke(&self, invocation: &mut dyn MethodInvocation) -> Result<Value> {
        if invocation.method().declaring_type() != self.interface {
            return invocation.proceed();
        }
        let delegate = self.delegate_for(invocation.context().target_id());
        tracing::trace!(
            "Dispatching introduced method {} to delegate",
            invocation.method().signature()
        );
        delegate.invoke_method(invocation.method(), &invocation.arguments())
    }

    fn name(&self) -> &str {
        "IntroductionInterceptor"
    }
}

/// 按类型模式声明引入
pub struct DeclareParentsAdvisor {
    interface: String,
    type_filter: TypePatternClassFilter,
    methods: Vec<Method>,
    interceptor: Arc<IntroductionInterceptor>,
    order: Option<i32>,
}

impl DeclareParentsAdvisor {
    /// 所有目标共享同一个委托
    pub fn shared(interface: &str, type_pattern: &str, delegate: Arc<dyn Advisable>) -> Result<Self, AopError> {
        let methods = interface_methods(interface, delegate.target_type())?;
        Self::build(interface, type_pattern, methods, Delegate::Shared(delegate))
    }

    /// 每个目标实例一份委托，`delegate_type` 描述委托的类型，用于构建时校验
    pub fn per_instance(
        interface: &str,
        type_pattern: &str,
        delegate_type: &TargetType,
        create: DelegateFactory,
    ) -> Result<Self, AopError> {
        let methods = interface_methods(interface, delegate_type)?;
        Self::build(
            interface,
            type_pattern,
            methods,
            Delegate::PerInstance {
                create,
                delegates: PerTarget::new(),
            },
        )
    }

    fn build(interface: &str, type_pattern: &str, methods: Vec<Method>, delegate: Delegate) -> Result<Self, AopError> {
        Ok(Self {
            interface: interface.to_string(),
            type_filter: TypePatternClassFilter::parse(type_pattern)?,
            methods,
            interceptor: Arc::new(IntroductionInterceptor {
                interface: interface.to_string(),
                delegate,
            }),
            order: None,
        })
    }

    pub fn with_order(mut self, order: Option<i32>) -> Self {
        self.order = order;
        self
    }
}

/// 委托必须实现接口并至少提供一个接口方法
fn interface_methods(interface: &str, delegate_type: &TargetType) -> Result<Vec<Method>, AopError> {
    let mismatch = || AopError::IntroductionMismatch {
        interface: interface.to_string(),
        delegate: delegate_type.name().to_string(),
    };
    if !delegate_type.is_assignable_to(interface) {
        return Err(mismatch());
    }
    let methods: Vec<Method> = delegate_type
        .methods()
        .iter()
        .filter(|m| m.declaring_type() == interface)
        .cloned()
        .collect();
    if methods.is_empty() {
        return Err(mismatch());
    }
    Ok(methods)
}

impl ClassFilter for DeclareParentsAdvisor {
    /// 已经实现该接口的类型不再引入
    fn matches(&self, target: &TargetType) -> bool {
        self.type_filter.matches(target) && !target.is_assignable_to(&self.interface)
    }
}

impl IntroductionAdvisor for DeclareParentsAdvisor {
    fn class_filter(&self) -> &dyn ClassFilter {
        self
    }

    fn interface(&self) -> &str {
        &self.interface
    }

    fn introduced_methods(&self) -> &[Method] {
        &self.methods
    }
}

impl Advisor for DeclareParentsAdvisor {
    fn advice(&self) -> Advice {
        Advice::Introduction(Arc::clone(&self.interceptor))
    }

    fn kind(&self) -> AdvisorKind<'_> {
        AdvisorKind::Introduction(self)
    }

    fn order(&self) -> Option<i32> {
        self.order
    }

    fn is_per_instance(&self) -> bool {
        matches!(self.interceptor.delegate, Delegate::PerInstance { .. })
    }

    fn describe(&self) -> String {
        format!(
            "DeclareParentsAdvisor: interface [{}], types [{}]",
            self.interface,
            self.type_filter.expression()
        )
    }
}

impl fmt::Debug for DeclareParentsAdvisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::MethodInterceptor;
    use crate::invocation::{InvocationContext, ReflectiveMethodInvocation};
    use crate::target::{downcast_value, value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter {
        ty: TargetType,
        count: AtomicUsize,
    }

    impl Counter {
        fn target_type() -> TargetType {
            TargetType::new("mixin.CounterImpl").interface_method("app.Countable", "increment", Vec::<String>::new(), "usize")
        }

        fn new() -> Arc<dyn Advisable> {
            Arc::new(Self {
                ty: Self::target_type(),
                count: AtomicUsize::new(0),
            })
        }
    }

    impl Advisable for Counter {
        fn target_type(&self) -> &TargetType {
            &self.ty
        }

        fn invoke_method(&self, _method: &Method, _args: &[Value]) -> Result<Value> {
            Ok(value(self.count.fetch_add(1, Ordering::SeqCst) + 1))
        }
    }

    fn increment(advisor: &DeclareParentsAdvisor, target: &Arc<dyn Advisable>) -> usize {
        let chain = vec![advisor.advice().interceptor()];
        let method = Arc::new(advisor.introduced_methods()[0].clone());
        let ctx = InvocationContext::new(
            method,
            Arc::new(target.target_type().clone()),
            TargetId::of(target),
            Vec::new(),
        );
        let result = ReflectiveMethodInvocation::new(target, &chain, ctx).proceed().unwrap();
        downcast_value::<usize>(&result).unwrap()
    }

    #[test]
    fn test_delegate_must_implement_interface() {
        let err = DeclareParentsAdvisor::per_instance(
            "app.Lockable",
            "app.*",
            &Counter::target_type(),
            Arc::new(Counter::new),
        )
        .err()
        .unwrap();
        assert!(matches!(err, AopError::IntroductionMismatch { .. }));

        let no_methods = TargetType::new("mixin.Empty").implements("app.Countable");
        assert!(DeclareParentsAdvisor::per_instance("app.Countable", "app.*", &no_methods, Arc::new(Counter::new)).is_err());
    }

    #[test]
    fn test_class_filter_excludes_existing_implementors() {
        let advisor = DeclareParentsAdvisor::shared("app.Countable", "app.*Service", Counter::new()).unwrap();
        assert!(ClassFilter::matches(&advisor, &TargetType::new("app.UserService")));
        assert!(!ClassFilter::matches(
            &advisor,
            &TargetType::new("app.OrderService").implements("app.Countable")
        ));
        assert!(!ClassFilter::matches(&advisor, &TargetType::new("other.UserService")));
    }

    #[test]
    fn test_shared_and_per_instance_delegates() {
        let a: Arc<dyn Advisable> = Counter::new();
        let b: Arc<dyn Advisable> = Counter::new();

        let shared = DeclareParentsAdvisor::shared("app.Countable", "*", Counter::new()).unwrap();
        assert_eq!(increment(&shared, &a), 1);
        assert_eq!(increment(&shared, &b), 2);
        assert!(!shared.is_per_instance());

        let per_instance = DeclareParentsAdvisor::per_instance(
            "app.Countable",
            "*",
            &Counter::target_type(),
            Arc::new(Counter::new),
        )
        .unwrap();
        assert_eq!(increment(&per_instance, &a), 1);
        assert_eq!(increment(&per_instance, &a), 2);
        assert_eq!(increment(&per_instance, &b), 1);
        assert!(per_instance.is_per_instance());
    }

    #[test]
    fn test_fresh_targets_never_see_released_delegates() {
        let advisor = DeclareParentsAdvisor::per_instance(
            "app.Countable",
            "*",
            &Counter::target_type(),
            Arc::new(Counter::new),
        )
        .unwrap();

        let stale = (0..50)
            .filter(|_| {
                let target: Arc<dyn Advisable> = Counter::new();
                increment(&advisor, &target) != 1
            })
            .count();
        assert_eq!(stale, 0);
        assert_eq!(advisor.interceptor.delegate_count(), 1);
    }

    #[test]
    fn test_other_methods_proceed() {
        let advisor = DeclareParentsAdvisor::shared("app.Countable", "*", Counter::new()).unwrap();
        let interceptor = advisor.advice().interceptor();
        assert_eq!(interceptor.name(), "IntroductionInterceptor");
    }
}
