//! Weaver AOP - 面向切面编程支持
//!
//! 在 weaver-core 的 Bean 工厂之上提供类似 Spring AOP 的代理能力：
//! - 切点表达式（`execution`、`within`、`bean` 等）与类型模式
//! - 五种通知（Before、After、AfterReturning、AfterThrowing、Around）及其优先级排序
//! - 基于拦截器链的代理与引入（introduction）
//! - 通过 BeanPostProcessor 自动为匹配的 Bean 创建代理

// 派生宏生成的代码通过 `::weaver_aop` 引用本 crate
extern crate self as weaver_aop;

pub mod advice;
pub mod advisor;
pub mod aop_utils;
pub mod aspect;
pub mod auto_proxy;
pub mod bean_post_processor;
pub mod config;
pub mod error;
pub mod error_info;
pub mod instance_factory;
pub mod interceptor;
pub mod introduction;
pub mod invocation;
pub mod joinpoint;
pub mod plugin;
pub mod pointcut;
pub mod precedence;
pub mod proxy;
pub mod registry;
pub mod target;

// 重新导出核心类型
pub use advice::{AdviceKind, AspectJAdvice};
pub use advisor::{Advice, Advisor, AdvisorKind, AspectAdvisor, DefaultPointcutAdvisor};
pub use aspect::{
    AdviceDeclarations, Aspect, AspectAdvisorFactory, AspectDefinition, AspectMetadata, InstantiationModel,
};
pub use auto_proxy::{current_proxied_bean_name, AdvicePlan, AutoProxyCreator, AutoProxyMode, ProxiedBeanName};
pub use config::AopProperties;
pub use error::{AopError, AopResult};
pub use error_info::ErrorInfo;
pub use interceptor::{
    current_bean_name, current_invocation, ConcurrencyThrottleInterceptor, DebugInterceptor,
    ExposeBeanNameInterceptor, ExposeInvocationInterceptor, FnInterceptor, MethodInterceptor,
    PerformanceMonitorInterceptor, TraceInterceptor,
};
pub use introduction::{DeclareParentsAdvisor, IntroductionAdvisor, IntroductionInterceptor};
pub use invocation::{InvocationContext, MethodInvocation, ProxyMethodInvocation, ReflectiveMethodInvocation};
pub use joinpoint::{JoinPoint, ProceedingJoinPoint};
pub use plugin::AopPlugin;
pub use pointcut::{AspectJExpressionPointcut, ClassFilter, MethodMatcher, NameMatchMethodPointcut, Pointcut};
pub use proxy::{AopProxy, ProxyFactory};
pub use registry::{global_registry, AspectRegistration, AspectRegistry};
pub use target::{arg, downcast_value, unit, value, Advisable, AdvisableExt, Method, TargetId, TargetType, Value};

// 派生宏与 trait 同名，和 serde 的做法一致
pub use weaver_aop_macros::AspectMetadata;

// 导出 inventory 供宏使用
pub use inventory;

/// 预导入模块
pub mod prelude {
    pub use crate::aspect::{AdviceDeclarations, Aspect, AspectDefinition, AspectMetadata, InstantiationModel};
    pub use crate::auto_proxy::{AutoProxyCreator, AutoProxyMode};
    pub use crate::error::AopError;
    pub use crate::interceptor::MethodInterceptor;
    pub use crate::joinpoint::{JoinPoint, ProceedingJoinPoint};
    pub use crate::plugin::AopPlugin;
    pub use crate::proxy::{AopProxy, ProxyFactory};
    pub use crate::target::{arg, downcast_value, unit, value, Advisable, AdvisableExt, Method, TargetType, Value};
    pub use crate::{invoke, register_aspect};
}
