//! AOP 插件
//!
//! 根据 `[aop]` 配置把自动代理创建器注册到 Bean 工厂：
//!
//! ```ignore
//! let factory = Arc::new(DefaultListableBeanFactory::new());
//! AopPlugin::from_environment(&env).install(&factory)?;
//! factory.preinstantiate_singletons()?;
//! ```

use std::sync::Arc;

use weaver_core::{DefaultListableBeanFactory, Environment};

use crate::auto_proxy::{AutoProxyCreator, AutoProxyMode};
use crate::config::AopProperties;
use crate::error::AopError;
use crate::interceptor::MethodInterceptor;
use crate::registry::global_registry;

pub struct AopPlugin {
    properties: AopProperties,
    common_interceptors: Vec<Arc<dyn MethodInterceptor>>,
}

impl AopPlugin {
    pub fn new(properties: AopProperties) -> Self {
        Self {
            properties,
            common_interceptors: Vec::new(),
        }
    }

    pub fn from_environment(env: &Environment) -> Self {
        Self::new(AopProperties::from_environment(env))
    }

    /// 作用于每个自动代理的拦截器
    pub fn with_common_interceptor(mut self, interceptor: Arc<dyn MethodInterceptor>) -> Self {
        self.common_interceptors.push(interceptor);
        self
    }

    pub fn properties(&self) -> &AopProperties {
        &self.properties
    }

    /// 注册自动代理创建器，`auto = false` 时返回 `None`
    pub fn install(self, bean_factory: &Arc<DefaultListableBeanFactory>) -> Result<Option<Arc<AutoProxyCreator>>, AopError> {
        if !self.properties.auto {
            tracing::info!("Auto-proxying is disabled, skipping AOP initialization");
            return Ok(None);
        }

        let mode = if self.properties.infrastructure_only {
            AutoProxyMode::Infrastructure
        } else {
            AutoProxyMode::AspectJ
        };
        let aspects = global_registry().definitions();
        tracing::info!("Initializing AOP support in {:?} mode with {} registered aspect(s)", mode, aspects.len());

        let creator = AutoProxyCreator::new(mode, bean_factory)?
            .with_proxy_target_class(self.properties.proxy_target_class)
            .with_common_interceptors(self.common_interceptors, self.properties.apply_common_interceptors_first)
            .with_aspects(aspects)
            .with_include_patterns(&self.properties.include_patterns)?;
        let creator = Arc::new(creator);
        bean_factory.add_bean_post_processor(Arc::clone(&creator) as Arc<dyn weaver_core::BeanPostProcessor>);
        tracing::info!("AOP auto-proxy creator registered");
        Ok(Some(creator))
    }
}

impl Default for AopPlugin {
    fn default() -> Self {
        Self::new(AopProperties::default())
    }
}
