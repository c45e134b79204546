//! AOP 错误类型
//!
//! 这里的错误都属于配置错误或使用错误：一旦出现立即返回，不做降级或重试。
//! 目标方法自身抛出的错误不会被包装成 `AopError`，而是原样沿拦截器链传播。

use thiserror::Error;
use weaver_core::ContainerError;

/// AOP 结果类型
pub type AopResult<T> = std::result::Result<T, AopError>;

/// AOP 配置与调用错误
#[derive(Debug, Error)]
pub enum AopError {
    /// 切点表达式无法解析
    #[error("Invalid pointcut expression '{expression}': {reason}")]
    InvalidPointcut { expression: String, reason: String },

    /// 名称匹配模式无法编译
    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// 通知所在的调用不支持副本、参数替换或用户属性
    #[error("'{advice}' requires a proxy method invocation that supports proceed and user attributes")]
    ProceedNotSupported { advice: String },

    /// 当前线程没有暴露调用上下文
    #[error(
        "No method invocation found: check that an AOP invocation is in progress and that \
         the ExposeInvocationInterceptor is upfront in the interceptor chain"
    )]
    NoInvocationExposed,

    /// 当前调用上没有 Bean 名称属性
    #[error("Cannot get bean name: not set on invocation of {method}; ExposeBeanNameInterceptor missing from the chain?")]
    NoBeanNameExposed { method: String },

    /// 引入的接口没有被委托对象实现
    #[error("Introduction delegate '{delegate}' does not implement interface '{interface}'")]
    IntroductionMismatch { interface: String, delegate: String },

    /// 切面实例创建或类型转换失败
    #[error("Cannot obtain instance of aspect '{aspect}': {reason}")]
    AspectInstantiation { aspect: String, reason: String },

    /// 自动代理创建器持有的 Bean 工厂已被释放
    #[error("Bean factory is no longer available")]
    BeanFactoryUnavailable,

    /// 目标上不存在该方法
    #[error("Type '{target}' has no method named '{method}'")]
    UnknownMethod { target: String, method: String },

    /// 实参数量与方法声明不一致
    #[error("Method '{method}' expects {expected} argument(s) but got {actual}")]
    ArgumentCountMismatch {
        method: String,
        expected: usize,
        actual: usize,
    },

    /// 参数或返回值类型与声明不一致
    #[error("Value for {what} is not of type '{expected}'")]
    ValueTypeMismatch { what: String, expected: &'static str },

    /// 并发上限为 0，拒绝所有调用
    #[error("Currently no invocations allowed: concurrency limit of '{interceptor}' is 0")]
    NoConcurrencyAllowed { interceptor: String },

    /// 获取候选 Advisor 时容器报错
    #[error(transparent)]
    Container(#[from] ContainerError),
}
