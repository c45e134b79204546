//! Advisor：通知与适用范围的组合
//!
//! 代理只认识 Advisor。切点型 Advisor 按类型和方法筛选，
//! 引入型 Advisor 只按类型筛选并为代理增加新的接口。

use std::fmt;
use std::sync::Arc;

use crate::advice::AspectJAdvice;
use crate::instance_factory::AspectInstanceFactory;
use crate::interceptor::MethodInterceptor;
use crate::introduction::{IntroductionAdvisor, IntroductionInterceptor};
use crate::pointcut::{Pointcut, TruePointcut};
use crate::precedence::AspectPrecedence;

/// Advisor 携带的通知
#[derive(Clone)]
pub enum Advice {
    /// 普通拦截器
    Interceptor(Arc<dyn MethodInterceptor>),
    /// 来自切面声明的通知
    AspectJ(Arc<AspectJAdvice>),
    /// 引入
    Introduction(Arc<IntroductionInterceptor>),
}

impl Advice {
    /// 适配为拦截器
    pub fn interceptor(&self) -> Arc<dyn MethodInterceptor> {
        match self {
            Advice::Interceptor(interceptor) => Arc::clone(interceptor),
            Advice::AspectJ(advice) => Arc::clone(advice) as Arc<dyn MethodInterceptor>,
            Advice::Introduction(interceptor) => Arc::clone(interceptor) as Arc<dyn MethodInterceptor>,
        }
    }

    pub fn is_aspectj(&self) -> bool {
        matches!(self, Advice::AspectJ(_))
    }
}

impl fmt::Debug for Advice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Advice::Interceptor(interceptor) => write!(f, "Interceptor({})", interceptor.name()),
            Advice::AspectJ(advice) => write!(f, "AspectJ({})", advice.name()),
            Advice::Introduction(interceptor) => write!(f, "Introduction({})", interceptor.interface()),
        }
    }
}

/// Advisor 的适用范围
pub enum AdvisorKind<'a> {
    Pointcut(&'a dyn Pointcut),
    Introduction(&'a dyn IntroductionAdvisor),
    /// 没有切点信息，视为对所有方法适用
    Generic,
}

/// Advisor
pub trait Advisor: Send + Sync {
    fn advice(&self) -> Advice;

    fn kind(&self) -> AdvisorKind<'_>;

    /// 排序值，越小越靠外层；`None` 视为最低优先级
    fn order(&self) -> Option<i32> {
        None
    }

    /// 通知是否持有与目标实例相关的状态
    fn is_per_instance(&self) -> bool {
        false
    }

    /// 来自切面声明时的优先级信息
    fn precedence(&self) -> Option<&AspectPrecedence> {
        None
    }

    /// 切面实例是否延迟创建
    fn is_lazy(&self) -> bool {
        false
    }

    fn is_advice_instantiated(&self) -> bool {
        true
    }

    /// 是否来自切面（基于元数据判断，不会触发切面实例化）
    fn is_aspectj(&self) -> bool {
        self.precedence().is_some()
    }

    fn describe(&self) -> String;
}

/// 切点 + 拦截器
pub struct DefaultPointcutAdvisor {
    pointcut: Arc<dyn Pointcut>,
    advice: Advice,
    order: Option<i32>,
}

impl DefaultPointcutAdvisor {
    pub fn new(pointcut: Arc<dyn Pointcut>, interceptor: Arc<dyn MethodInterceptor>) -> Self {
        Self {
            pointcut,
            advice: Advice::Interceptor(interceptor),
            order: None,
        }
    }

    /// 对所有方法生效
    pub fn always(interceptor: Arc<dyn MethodInterceptor>) -> Self {
        Self::new(Arc::new(TruePointcut), interceptor)
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = Some(order);
        self
    }

    pub fn pointcut(&self) -> &Arc<dyn Pointcut> {
        &self.pointcut
    }
}

impl Advisor for DefaultPointcutAdvisor {
    fn advice(&self) -> Advice {
        self.advice.clone()
    }

    fn kind(&self) -> AdvisorKind<'_> {
        AdvisorKind::Pointcut(self.pointcut.as_ref())
    }

    fn order(&self) -> Option<i32> {
        self.order
    }

    fn describe(&self) -> String {
        format!("DefaultPointcutAdvisor: advice [{:?}], order {:?}", self.advice, self.order)
    }
}

/// 切面中一条通知声明对应的 Advisor
///
/// 非单例切面的切点已经与 per 子句取交集，实例在第一次调用时才创建
pub struct AspectAdvisor {
    pointcut: Arc<dyn Pointcut>,
    expression: String,
    advice: Arc<AspectJAdvice>,
    precedence: AspectPrecedence,
    per_instance: bool,
}

impl AspectAdvisor {
    pub fn new(
        pointcut: Arc<dyn Pointcut>,
        expression: impl Into<String>,
        advice: Arc<AspectJAdvice>,
        precedence: AspectPrecedence,
        per_instance: bool,
    ) -> Self {
        Self {
            pointcut,
            expression: expression.into(),
            advice,
            precedence,
            per_instance,
        }
    }

    pub fn aspect_name(&self) -> &str {
        self.precedence.aspect_name()
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    fn instance_factory(&self) -> &Arc<dyn AspectInstanceFactory> {
        self.advice.instance_factory()
    }
}

impl Advisor for AspectAdvisor {
    fn advice(&self) -> Advice {
        Advice::AspectJ(Arc::clone(&self.advice))
    }

    fn kind(&self) -> AdvisorKind<'_> {
        AdvisorKind::Pointcut(self.pointcut.as_ref())
    }

    fn order(&self) -> Option<i32> {
        self.instance_factory().order()
    }

    fn is_per_instance(&self) -> bool {
        self.per_instance
    }

    fn precedence(&self) -> Option<&AspectPrecedence> {
        Some(&self.precedence)
    }

    fn is_lazy(&self) -> bool {
        self.instance_factory().is_lazy()
    }

    fn is_advice_instantiated(&self) -> bool {
        self.instance_factory().is_advice_instantiated()
    }

    fn describe(&self) -> String {
        format!(
            "AspectAdvisor: expression [{}]; advice [{}]; aspect '{}' #{}",
            self.expression,
            self.advice.name(),
            self.precedence.aspect_name(),
            self.precedence.declaration_order()
        )
    }
}

impl fmt::Debug for dyn Advisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}
