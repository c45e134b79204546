//! 切面（Aspect）定义
//!
//! 切面是横切关注点的模块化。Rust 没有注解扫描，切面通过 [`Aspect::declare_advice`]
//! 在构建器上依次声明通知，声明顺序就是切面内部的优先级依据。
//!
//! ```ignore
//! #[derive(AspectMetadata)]
//! #[aspect(order = 10)]
//! struct AuditAspect;
//!
//! impl Aspect for AuditAspect {
//!     fn declare_advice(advice: &mut AdviceDeclarations<Self>) {
//!         advice
//!             .before("execution(* app..*Service.*(..))", |_aspect, jp| {
//!                 tracing::info!("calling {}", jp.signature());
//!                 Ok(())
//!             })
//!             .around("bean(orderService)", |_aspect, pjp| pjp.proceed());
//!     }
//! }
//! ```

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

use anyhow::Result;
use weaver_core::ListableBeanFactory;

use crate::advice::{AdviceMethod, AspectJAdvice, ReturningFilter, ThrowingFilter};
use crate::advisor::{Advisor, AspectAdvisor};
use crate::error::AopError;
use crate::instance_factory::{
    AspectCreator, AspectInstance, AspectInstanceFactory, BeanFactoryAspectInstanceFactory,
    LazySingletonAspectInstanceFactory, PerTargetAspectInstanceFactory, SimpleAspectInstanceFactory,
    SingletonAspectInstanceFactory,
};
use crate::introduction::{DeclareParentsAdvisor, DelegateFactory};
use crate::joinpoint::{JoinPoint, ProceedingJoinPoint};
use crate::pointcut::{AspectJExpressionPointcut, ComposablePointcut, Pointcut};
use crate::precedence::AspectPrecedence;
use crate::target::{Advisable, TargetType, Value};

/// 切面实例化模型
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum InstantiationModel {
    /// 全局一个实例
    #[default]
    Singleton,
    /// 每个匹配表达式的代理对象一个实例
    PerThis(String),
    /// 每个匹配表达式的目标对象一个实例
    PerTarget(String),
}

impl InstantiationModel {
    /// per 子句表达式
    pub fn per_clause(&self) -> Option<&str> {
        match self {
            InstantiationModel::Singleton => None,
            InstantiationModel::PerThis(expression) | InstantiationModel::PerTarget(expression) => {
                Some(expression)
            }
        }
    }

    pub fn is_per_instance(&self) -> bool {
        self.per_clause().is_some()
    }
}

/// 切面元数据，通常由 `#[derive(AspectMetadata)]` 生成
pub trait AspectMetadata {
    fn aspect_name() -> &'static str;

    fn aspect_order() -> Option<i32> {
        None
    }

    fn instantiation_model() -> InstantiationModel {
        InstantiationModel::Singleton
    }
}

/// 切面
pub trait Aspect: AspectMetadata + Send + Sync + 'static {
    /// 声明切面的全部通知
    fn declare_advice(advice: &mut AdviceDeclarations<Self>)
    where
        Self: Sized;
}

/// 一条已擦除切面类型的声明
enum AdviceDeclaration {
    Advice {
        expression: String,
        method: AdviceMethod,
    },
    DeclareParents {
        interface: String,
        type_pattern: String,
        delegate_type: TargetType,
        create: DelegateFactory,
    },
}

/// 通知声明构建器
pub struct AdviceDeclarations<A> {
    declarations: Vec<AdviceDeclaration>,
    _aspect: PhantomData<fn() -> A>,
}

/// 把 `&dyn Any` 还原为具体的切面类型
fn aspect_ref<A: Aspect>(aspect: &dyn Any) -> Result<&A> {
    aspect.downcast_ref::<A>().ok_or_else(|| {
        AopError::AspectInstantiation {
            aspect: A::aspect_name().to_string(),
            reason: format!("instance is not of type {}", std::any::type_name::<A>()),
        }
        .into()
    })
}

impl<A: Aspect> AdviceDeclarations<A> {
    fn new() -> Self {
        Self {
            declarations: Vec::new(),
            _aspect: PhantomData,
        }
    }

    fn push(&mut self, expression: &str, method: AdviceMethod) -> &mut Self {
        self.declarations.push(AdviceDeclaration::Advice {
            expression: expression.to_string(),
            method,
        });
        self
    }

    pub fn before<F>(&mut self, expression: &str, f: F) -> &mut Self
    where
        F: Fn(&A, &JoinPoint) -> Result<()> + Send + Sync + 'static,
    {
        self.push(
            expression,
            AdviceMethod::Before(Arc::new(move |aspect, jp| f(aspect_ref::<A>(aspect)?, jp))),
        )
    }

    /// 无论正常返回还是出错都会执行
    pub fn after<F>(&mut self, expression: &str, f: F) -> &mut Self
    where
        F: Fn(&A, &JoinPoint) -> Result<()> + Send + Sync + 'static,
    {
        self.push(
            expression,
            AdviceMethod::After(Arc::new(move |aspect, jp| f(aspect_ref::<A>(aspect)?, jp))),
        )
    }

    pub fn after_returning<F>(&mut self, expression: &str, f: F) -> &mut Self
    where
        F: Fn(&A, &JoinPoint, &Value) -> Result<()> + Send + Sync + 'static,
    {
        self.push(
            expression,
            AdviceMethod::AfterReturning {
                method: Arc::new(move |aspect, jp, value| f(aspect_ref::<A>(aspect)?, jp, value)),
                returning: None,
            },
        )
    }

    /// 只在返回值是 `T` 时执行
    pub fn after_returning_typed<T, F>(&mut self, expression: &str, f: F) -> &mut Self
    where
        T: Any + Send + Sync,
        F: Fn(&A, &JoinPoint, &T) -> Result<()> + Send + Sync + 'static,
    {
        self.push(
            expression,
            AdviceMethod::AfterReturning {
                method: Arc::new(move |aspect, jp, value| match value.downcast_ref::<T>() {
                    Some(returned) => f(aspect_ref::<A>(aspect)?, jp, returned),
                    None => Ok(()),
                }),
                returning: Some(ReturningFilter::of::<T>()),
            },
        )
    }

    pub fn after_throwing<F>(&mut self, expression: &str, f: F) -> &mut Self
    where
        F: Fn(&A, &JoinPoint, &anyhow::Error) -> Result<()> + Send + Sync + 'static,
    {
        self.push(
            expression,
            AdviceMethod::AfterThrowing {
                method: Arc::new(move |aspect, jp, error| f(aspect_ref::<A>(aspect)?, jp, error)),
                throwing: None,
            },
        )
    }

    /// 只在错误是 `E` 时执行，错误本身总是原样继续传播
    pub fn after_throwing_typed<E, F>(&mut self, expression: &str, f: F) -> &mut Self
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
        F: Fn(&A, &JoinPoint, &E) -> Result<()> + Send + Sync + 'static,
    {
        self.push(
            expression,
            AdviceMethod::AfterThrowing {
                method: Arc::new(move |aspect, jp, error| match error.downcast_ref::<E>() {
                    Some(thrown) => f(aspect_ref::<A>(aspect)?, jp, thrown),
                    None => Ok(()),
                }),
                throwing: Some(ThrowingFilter::of::<E>()),
            },
        )
    }

    pub fn around<F>(&mut self, expression: &str, f: F) -> &mut Self
    where
        F: Fn(&A, &mut ProceedingJoinPoint<'_>) -> Result<Value> + Send + Sync + 'static,
    {
        self.push(
            expression,
            AdviceMethod::Around(Arc::new(move |aspect, pjp| f(aspect_ref::<A>(aspect)?, pjp))),
        )
    }

    /// 为匹配 `type_pattern` 的类型引入 `interface`，每个目标实例一份委托
    pub fn declare_parents<F>(
        &mut self,
        interface: &str,
        type_pattern: &str,
        delegate_type: TargetType,
        create: F,
    ) -> &mut Self
    where
        F: Fn() -> Arc<dyn Advisable> + Send + Sync + 'static,
    {
        self.declarations.push(AdviceDeclaration::DeclareParents {
            interface: interface.to_string(),
            type_pattern: type_pattern.to_string(),
            delegate_type,
            create: Arc::new(create),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.declarations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }
}

/// 切面实例的来源
enum AspectSource {
    Instance(AspectInstance),
    Factory(AspectCreator),
    Bean(String),
}

/// 已擦除类型的切面定义，可以转换为一组 Advisor
pub struct AspectDefinition {
    name: String,
    order: Option<i32>,
    model: InstantiationModel,
    declarations: Vec<AdviceDeclaration>,
    source: AspectSource,
}

impl AspectDefinition {
    /// 使用已有实例（只能用于单例模型）
    pub fn singleton<A: Aspect>(instance: A) -> Self {
        Self::declare::<A>(AspectSource::Instance(Arc::new(instance)))
    }

    /// 通过工厂函数创建实例，单例模型下首次调用时创建一次
    pub fn from_factory<A, F>(create: F) -> Self
    where
        A: Aspect,
        F: Fn() -> Result<A> + Send + Sync + 'static,
    {
        let creator: AspectCreator = Arc::new(move || Ok(Arc::new(create()?) as AspectInstance));
        Self::declare::<A>(AspectSource::Factory(creator))
    }

    /// 从 Bean 工厂获取实例，Bean 以切面自身类型注册
    pub fn from_bean<A: Aspect>(bean_name: impl Into<String>) -> Self {
        Self::declare::<A>(AspectSource::Bean(bean_name.into()))
    }

    fn declare<A: Aspect>(source: AspectSource) -> Self {
        let mut advice = AdviceDeclarations::<A>::new();
        A::declare_advice(&mut advice);
        tracing::debug!(
            "Declared aspect '{}' with {} advice declaration(s)",
            A::aspect_name(),
            advice.len()
        );
        Self {
            name: A::aspect_name().to_string(),
            order: A::aspect_order(),
            model: A::instantiation_model(),
            declarations: advice.declarations,
            source,
        }
    }

    /// 覆盖元数据中的 order
    pub fn with_order(mut self, order: i32) -> Self {
        self.order = Some(order);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn order(&self) -> Option<i32> {
        self.order
    }

    pub fn instantiation_model(&self) -> &InstantiationModel {
        &self.model
    }

    pub fn is_per_instance(&self) -> bool {
        self.model.is_per_instance()
    }

    /// 切面实例所在的 Bean 名称
    pub fn bean_name(&self) -> Option<&str> {
        match &self.source {
            AspectSource::Bean(name) => Some(name),
            _ => None,
        }
    }

    pub fn declaration_count(&self) -> usize {
        self.declarations.len()
    }
}

impl fmt::Debug for AspectDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AspectDefinition")
            .field("name", &self.name)
            .field("order", &self.order)
            .field("model", &self.model)
            .field("declarations", &self.declarations.len())
            .finish()
    }
}

/// 把切面定义转换为 Advisor
pub struct AspectAdvisorFactory;

impl AspectAdvisorFactory {
    /// 每条声明对应一个 Advisor，声明顺序作为切面内的优先级依据
    ///
    /// 非单例模型的切点与 per 子句取交集，实例按目标延迟创建
    pub fn get_advisors(
        definition: &AspectDefinition,
        bean_factory: Option<&Weak<dyn ListableBeanFactory>>,
    ) -> Result<Vec<Arc<dyn Advisor>>, AopError> {
        let instance_factory = Self::instance_factory(definition, bean_factory)?;
        let per_clause = match definition.model.per_clause() {
            Some(expression) => {
                Some(Arc::new(AspectJExpressionPointcut::parse(expression)?) as Arc<dyn Pointcut>)
            }
            None => None,
        };

        let mut advisors: Vec<Arc<dyn Advisor>> = Vec::with_capacity(definition.declarations.len());
        for (declaration_order, declaration) in definition.declarations.iter().enumerate() {
            match declaration {
                AdviceDeclaration::Advice { expression, method } => {
                    let expression_pointcut: Arc<dyn Pointcut> =
                        Arc::new(AspectJExpressionPointcut::parse(expression)?);
                    let pointcut = match &per_clause {
                        Some(per_clause) => Arc::new(ComposablePointcut::intersection(
                            expression_pointcut,
                            Arc::clone(per_clause),
                        )) as Arc<dyn Pointcut>,
                        None => expression_pointcut,
                    };
                    let advice = Arc::new(AspectJAdvice::new(
                        definition.name.as_str(),
                        declaration_order,
                        expression.as_str(),
                        method.clone(),
                        Arc::clone(&instance_factory),
                    ));
                    let precedence =
                        AspectPrecedence::new(definition.name.as_str(), declaration_order, method.kind());
                    advisors.push(Arc::new(AspectAdvisor::new(
                        pointcut,
                        expression.as_str(),
                        advice,
                        precedence,
                        definition.is_per_instance(),
                    )));
                }
                AdviceDeclaration::DeclareParents {
                    interface,
                    type_pattern,
                    delegate_type,
                    create,
                } => {
                    let advisor = DeclareParentsAdvisor::per_instance(
                        interface,
                        type_pattern,
                        delegate_type,
                        Arc::clone(create),
                    )?
                    .with_order(definition.order);
                    advisors.push(Arc::new(advisor));
                }
            }
        }

        tracing::debug!(
            "Built {} advisor(s) for aspect '{}' ({:?})",
            advisors.len(),
            definition.name,
            definition.model
        );
        Ok(advisors)
    }

    fn instance_factory(
        definition: &AspectDefinition,
        bean_factory: Option<&Weak<dyn ListableBeanFactory>>,
    ) -> Result<Arc<dyn AspectInstanceFactory>, AopError> {
        let name = definition.name.as_str();
        let base: Arc<dyn AspectInstanceFactory> = match &definition.source {
            AspectSource::Instance(instance) => {
                if definition.is_per_instance() {
                    return Err(AopError::AspectInstantiation {
                        aspect: name.to_string(),
                        reason: format!(
                            "{:?} requires a factory or bean source, not a shared instance",
                            definition.model
                        ),
                    });
                }
                return Ok(Arc::new(SingletonAspectInstanceFactory::new(
                    name,
                    definition.order,
                    Arc::clone(instance),
                )));
            }
            AspectSource::Factory(creator) => Arc::new(SimpleAspectInstanceFactory::new(
                name,
                definition.order,
                Arc::clone(creator),
            )),
            AspectSource::Bean(bean_name) => {
                let bean_factory = bean_factory.ok_or(AopError::BeanFactoryUnavailable)?;
                Arc::new(BeanFactoryAspectInstanceFactory::new(
                    name,
                    bean_name.as_str(),
                    definition.order,
                    Weak::clone(bean_factory),
                ))
            }
        };

        if definition.is_per_instance() {
            Ok(Arc::new(PerTargetAspectInstanceFactory::new(base)))
        } else {
            Ok(Arc::new(LazySingletonAspectInstanceFactory::new(base)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advice::AdviceKind;
    use crate::advisor::AdvisorKind;
    use crate::target::Method;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static CREATED: AtomicUsize = AtomicUsize::new(0);

    struct AuditAspect;

    impl AspectMetadata for AuditAspect {
        fn aspect_name() -> &'static str {
            "auditAspect"
        }

        fn aspect_order() -> Option<i32> {
            Some(5)
        }
    }

    impl Aspect for AuditAspect {
        fn declare_advice(advice: &mut AdviceDeclarations<Self>) {
            advice
                .before("execution(* app..*Service.*(..))", |_aspect, _jp| Ok(()))
                .after_returning_typed::<String, _>("execution(* *(..))", |_aspect, _jp, _s| Ok(()))
                .around("within(app.*)", |_aspect, pjp| pjp.proceed());
        }
    }

    struct CounterAspect;

    impl AspectMetadata for CounterAspect {
        fn aspect_name() -> &'static str {
            "counterAspect"
        }

        fn instantiation_model() -> InstantiationModel {
            InstantiationModel::PerTarget("within(app..*)".to_string())
        }
    }

    impl Aspect for CounterAspect {
        fn declare_advice(advice: &mut AdviceDeclarations<Self>) {
            advice.before("execution(* *(..))", |_aspect, _jp| Ok(()));
        }
    }

    fn counter_factory() -> AspectDefinition {
        AspectDefinition::from_factory(|| {
            CREATED.fetch_add(1, Ordering::SeqCst);
            Ok(CounterAspect)
        })
    }

    #[test]
    fn test_declarations_become_ordered_advisors() {
        let definition = AspectDefinition::singleton(AuditAspect);
        assert_eq!(definition.declaration_count(), 3);

        let advisors = AspectAdvisorFactory::get_advisors(&definition, None).unwrap();
        let kinds: Vec<_> = advisors
            .iter()
            .map(|a| {
                let precedence = a.precedence().unwrap();
                (precedence.declaration_order(), precedence.kind())
            })
            .collect();
        assert_eq!(
            kinds,
            vec![(0, AdviceKind::Before), (1, AdviceKind::AfterReturning), (2, AdviceKind::Around)]
        );
        assert!(advisors.iter().all(|a| a.order() == Some(5) && a.is_aspectj()));
        assert!(!advisors[0].is_lazy());
    }

    #[test]
    fn test_per_target_pointcut_is_narrowed_and_lazy() {
        let definition = counter_factory();
        assert!(definition.is_per_instance());
        let advisors = AspectAdvisorFactory::get_advisors(&definition, None).unwrap();
        let advisor = &advisors[0];
        assert!(advisor.is_per_instance());
        assert!(advisor.is_lazy());

        let before = CREATED.load(Ordering::SeqCst);
        assert!(!advisor.is_advice_instantiated());
        match advisor.kind() {
            AdvisorKind::Pointcut(pointcut) => {
                assert!(pointcut.class_filter().matches(&TargetType::new("app.UserService")));
                assert!(!pointcut.class_filter().matches(&TargetType::new("other.UserService")));
                let method = Method::new("app.UserService", "find");
                assert!(pointcut.method_matcher().matches(&method, &TargetType::new("app.UserService")));
            }
            _ => panic!("expected pointcut advisor"),
        }
        assert_eq!(CREATED.load(Ordering::SeqCst), before);
    }

    #[test]
    fn test_per_target_requires_creatable_source() {
        let err = AspectAdvisorFactory::get_advisors(&AspectDefinition::singleton(CounterAspect), None)
            .err()
            .unwrap();
        assert!(matches!(err, AopError::AspectInstantiation { .. }));
    }

    #[test]
    fn test_bean_source_requires_bean_factory() {
        let err = AspectAdvisorFactory::get_advisors(&AspectDefinition::from_bean::<AuditAspect>("audit"), None)
            .err()
            .unwrap();
        assert!(matches!(err, AopError::BeanFactoryUnavailable));
    }

    #[test]
    fn test_wrong_instance_type_is_reported() {
        let wrong: AspectInstance = Arc::new(42u8);
        let err = aspect_ref::<AuditAspect>(&*wrong).err().unwrap();
        assert!(err.to_string().contains("auditAspect"));
    }
}
