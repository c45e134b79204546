//! 容器错误类型
//!
//! 框架内部使用 `thiserror` 定义结构化错误，调用方需要附加上下文时使用 `anyhow::Result`。

use std::error::Error as StdError;
use thiserror::Error;

/// 统一的应用结果类型
pub use anyhow::Result;

/// 容器操作结果
pub type ContainerResult<T> = std::result::Result<T, ContainerError>;

/// 可跨线程传递的底层错误
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// 容器错误
#[derive(Debug, Error)]
pub enum ContainerError {
    /// 未找到 Bean 定义
    #[error("No bean named '{0}' is defined")]
    BeanNotFound(String),

    /// Bean 名称重复
    #[error("Bean '{0}' is already defined")]
    BeanAlreadyExists(String),

    /// Bean 正在创建中（循环引用）
    #[error("Bean '{name}' is currently in creation: unresolvable circular reference ({chain})")]
    BeanCurrentlyInCreation { name: String, chain: String },

    /// Bean 创建失败，`source` 保留原始原因
    #[error("Error creating bean '{name}': {source}")]
    BeanCreationFailed {
        name: String,
        #[source]
        source: BoxError,
    },

    /// BeanPostProcessor 处理失败
    #[error("Post-processor '{processor}' failed for bean '{name}': {source}")]
    PostProcessingFailed {
        name: String,
        processor: String,
        #[source]
        source: BoxError,
    },

    /// Bean 类型与请求类型不符
    #[error("Bean '{name}' is not of required type '{expected}'")]
    TypeMismatch { name: String, expected: String },

    /// 配置已冻结
    #[error("Cannot {0}: configuration is frozen")]
    ConfigurationFrozen(&'static str),

    /// 配置源读取或解析失败
    #[error("Invalid configuration source '{source_name}': {message}")]
    InvalidConfiguration { source_name: String, message: String },
}

impl ContainerError {
    /// 将任意错误包装为创建失败
    pub fn creation_failed(name: impl Into<String>, source: impl Into<BoxError>) -> Self {
        ContainerError::BeanCreationFailed {
            name: name.into(),
            source: source.into(),
        }
    }

    /// 沿 `source()` 链找到最底层的原因
    pub fn root_cause(&self) -> &(dyn StdError + 'static) {
        let mut current: &(dyn StdError + 'static) = self;
        while let Some(next) = current.source() {
            current = next;
        }
        current
    }

    /// 如果最底层原因是"正在创建中"，返回对应的 Bean 名称
    pub fn currently_in_creation_root(&self) -> Option<&str> {
        match self.root_cause().downcast_ref::<ContainerError>() {
            Some(ContainerError::BeanCurrentlyInCreation { name, .. }) => Some(name.as_str()),
            _ => None,
        }
    }
}
