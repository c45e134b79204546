// weaver-core: AOP 核心所依赖的最小 Bean 注册表
//
// 提供：
// - 带角色元数据的 Bean 定义
// - 单例/原型作用域与循环引用检测
// - BeanPostProcessor 扩展点（自动代理在这里接入）
// - 分层配置与日志初始化

pub mod bean;
pub mod bean_factory;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod scope;
pub mod utils;

pub use bean::{BeanDefinition, BeanFactoryFn, BeanInstance};
pub use bean_factory::{
    BeanFactory, BeanFactoryExt, DefaultListableBeanFactory, ListableBeanFactory,
};
pub use config::{
    ConfigValue, Environment, EnvironmentPropertySource, MapPropertySource, PropertySource,
    TomlPropertySource,
};
pub use error::{BoxError, ContainerError, ContainerResult, Result};
pub use lifecycle::BeanPostProcessor;
pub use logging::{LogFormat, LogLevel, LoggingConfig};
pub use scope::{BeanRole, Scope};

/// Prelude 模块，包含常用的 traits 和类型
pub mod prelude {
    pub use crate::bean::{BeanDefinition, BeanInstance};
    pub use crate::bean_factory::{
        BeanFactory, BeanFactoryExt, DefaultListableBeanFactory, ListableBeanFactory,
    };
    pub use crate::config::{ConfigValue, Environment, MapPropertySource, TomlPropertySource};
    pub use crate::error::{ContainerError, ContainerResult, Result};
    pub use crate::lifecycle::BeanPostProcessor;
    pub use crate::logging::{LogFormat, LogLevel, LoggingConfig};
    pub use crate::scope::{BeanRole, Scope};
    pub use anyhow::{anyhow, Context};
}
