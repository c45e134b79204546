//! 自动代理接入容器
//!
//! `AutoProxyCreator` 作为 BeanPostProcessor 注册后，容器在 Bean 初始化完成时把
//! `Arc<dyn Advisable>` 类型的 Bean 交给它，必要时替换成代理。

use std::sync::Arc;

use weaver_core::{BeanInstance, BeanPostProcessor, ContainerError, ContainerResult};

use crate::auto_proxy::AutoProxyCreator;
use crate::target::Advisable;

/// 自动代理在其他处理器之后执行，拿到的是已经完成初始化的 Bean
pub const AUTO_PROXY_ORDER: i32 = 2000;

impl BeanPostProcessor for AutoProxyCreator {
    fn post_process_after_initialization(&self, bean: BeanInstance, bean_name: &str) -> ContainerResult<BeanInstance> {
        let Some(target) = bean.downcast_ref::<Arc<dyn Advisable>>() else {
            tracing::trace!("Bean '{}' is not advisable, skipping auto-proxy", bean_name);
            return Ok(bean);
        };

        let wrapped = self
            .wrap_if_necessary(Arc::clone(target), bean_name)
            .map_err(|e| ContainerError::PostProcessingFailed {
                name: bean_name.to_string(),
                processor: self.name().to_string(),
                source: Box::new(e),
            })?;
        if Arc::ptr_eq(&wrapped, target) {
            return Ok(bean);
        }
        Ok(Arc::new(wrapped) as BeanInstance)
    }

    fn name(&self) -> &str {
        "AutoProxyCreator"
    }

    fn order(&self) -> i32 {
        AUTO_PROXY_ORDER
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advisor::{Advisor, DefaultPointcutAdvisor};
    use crate::auto_proxy::AutoProxyMode;
    use crate::interceptor::DebugInterceptor;
    use crate::invocation::tests::Calculator;
    use crate::pointcut::AspectJExpressionPointcut;
    use weaver_core::{BeanDefinition, BeanFactoryExt, DefaultListableBeanFactory};

    fn container() -> Arc<DefaultListableBeanFactory> {
        let factory = Arc::new(DefaultListableBeanFactory::new());
        factory
            .register_bean_definition(BeanDefinition::new("addAdvisor", |_| {
                let pointcut = AspectJExpressionPointcut::parse("execution(* test.Calculator.add(..))")
                    .map_err(|e| ContainerError::creation_failed("addAdvisor", e))?;
                let advisor: Arc<dyn Advisor> = Arc::new(DefaultPointcutAdvisor::new(
                    Arc::new(pointcut),
                    Arc::new(DebugInterceptor::new()),
                ));
                Ok(advisor)
            }))
            .unwrap();
        factory
            .register_bean_definition(BeanDefinition::new("calculator", |_| Ok(Calculator::new())))
            .unwrap();
        factory
            .register_bean_definition(BeanDefinition::new("port", |_| Ok(8080u16)))
            .unwrap();
        factory
    }

    #[test]
    fn test_advisable_bean_is_replaced_by_proxy() {
        let factory = container();
        let creator = AutoProxyCreator::new(AutoProxyMode::AspectJ, &factory).unwrap();
        factory.add_bean_post_processor(Arc::new(creator));

        let calculator = factory.get_bean_of::<Arc<dyn Advisable>>("calculator").unwrap();
        let calculator: Arc<dyn Advisable> = Arc::clone(&*calculator);
        let target_type = calculator.target_type().name().to_string();
        assert_eq!(target_type, "test.Calculator");
        assert_eq!(crate::invoke!(calculator => i64, "add", 2i64, 3i64).unwrap(), 5);

        assert_eq!(*factory.get_bean_of::<u16>("port").unwrap(), 8080);
    }

    #[test]
    fn test_unmatched_bean_keeps_identity() {
        let factory = container();
        let creator = AutoProxyCreator::new(
            AutoProxyMode::Default {
                advisor_bean_name_prefix: Some("audit".to_string()),
            },
            &factory,
        )
        .unwrap();
        let original = Calculator::new();
        let bean: BeanInstance = Arc::new(Arc::clone(&original));
        let processed = creator.post_process_after_initialization(bean, "calculator").unwrap();
        let processed = processed.downcast_ref::<Arc<dyn Advisable>>().unwrap();
        assert!(Arc::ptr_eq(processed, &original));
    }

    #[test]
    fn test_proxied_beans_are_counted_once() {
        let factory = container();
        let creator = Arc::new(AutoProxyCreator::new(AutoProxyMode::AspectJ, &factory).unwrap());
        factory.add_bean_post_processor(Arc::clone(&creator) as Arc<dyn BeanPostProcessor>);
        factory.preinstantiate_singletons().unwrap();
        assert_eq!(creator.proxied_bean_count(), 1);

        let first = factory.get_bean_of::<Arc<dyn Advisable>>("calculator").unwrap();
        let second = factory.get_bean_of::<Arc<dyn Advisable>>("calculator").unwrap();
        assert!(Arc::ptr_eq(&*first, &*second));
    }

    #[test]
    fn test_dropped_factory_fails_post_processing() {
        let factory = container();
        let creator = AutoProxyCreator::new(AutoProxyMode::AspectJ, &factory).unwrap();
        drop(factory);
        let bean: BeanInstance = Arc::new(Calculator::new());
        let error = creator.post_process_after_initialization(bean, "calculator").unwrap_err();
        assert!(matches!(error, ContainerError::PostProcessingFailed { .. }));
    }
}
