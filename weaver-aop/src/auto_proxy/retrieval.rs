//! 候选 Advisor 的来源
//!
//! - 容器中以 `Arc<dyn Advisor>` 注册的 Bean
//! - 切面定义（全局注册表、显式添加的定义以及以 `Arc<AspectDefinition>` 注册的 Bean）

use std::any::TypeId;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use regex::Regex;
use weaver_core::{BeanFactoryExt, ContainerError, ListableBeanFactory};

use crate::advisor::Advisor;
use crate::aspect::{AspectAdvisorFactory, AspectDefinition};
use crate::error::AopError;

/// 从容器中取出 Advisor Bean
pub struct AdvisorRetrievalHelper {
    bean_factory: Weak<dyn ListableBeanFactory>,
    cached_names: RwLock<Option<Vec<String>>>,
}

impl AdvisorRetrievalHelper {
    pub fn new(bean_factory: Weak<dyn ListableBeanFactory>) -> Self {
        Self {
            bean_factory,
            cached_names: RwLock::new(None),
        }
    }

    /// 丢弃缓存的 Advisor Bean 名称，下次查找时重新扫描
    pub fn invalidate(&self) {
        *self.cached_names.write() = None;
    }

    fn advisor_bean_names(&self, bean_factory: &dyn ListableBeanFactory) -> Vec<String> {
        if let Some(names) = self.cached_names.read().as_ref() {
            return names.clone();
        }
        let names = bean_factory.get_bean_names_for_type(TypeId::of::<Arc<dyn Advisor>>());
        tracing::debug!("Found {} advisor bean(s): {:?}", names.len(), names);
        *self.cached_names.write() = Some(names.clone());
        names
    }

    /// 按注册顺序返回合格的 Advisor Bean
    ///
    /// 正在创建中的候选直接跳过；候选因依赖正在创建的 Bean 而创建失败时同样跳过，
    /// 其他创建失败原样返回
    pub fn find_advisor_beans<P>(&self, is_eligible: P) -> Result<Vec<Arc<dyn Advisor>>, AopError>
    where
        P: Fn(&str) -> bool,
    {
        let bean_factory = self.bean_factory.upgrade().ok_or(AopError::BeanFactoryUnavailable)?;
        let names = self.advisor_bean_names(&*bean_factory);

        let mut advisors = Vec::with_capacity(names.len());
        for name in names {
            if !is_eligible(&name) {
                continue;
            }
            if bean_factory.is_currently_in_creation(&name) {
                tracing::debug!("Skipping currently created advisor '{}'", name);
                continue;
            }
            match bean_factory.get_bean_of::<Arc<dyn Advisor>>(&name) {
                Ok(advisor) => advisors.push(Arc::clone(&*advisor)),
                Err(error) if Self::is_circular_reference(&*bean_factory, &error) => {
                    tracing::debug!(
                        "Skipping advisor '{}' with dependency on currently created bean: {}",
                        name,
                        error
                    );
                }
                Err(error) => return Err(error.into()),
            }
        }
        Ok(advisors)
    }

    fn is_circular_reference(bean_factory: &dyn ListableBeanFactory, error: &ContainerError) -> bool {
        error
            .currently_in_creation_root()
            .map(|name| bean_factory.is_currently_in_creation(name))
            .unwrap_or(false)
    }
}

struct AspectEntry {
    definition: Arc<AspectDefinition>,
    /// 单例切面的 Advisor 只构建一次
    advisors: Option<Vec<Arc<dyn Advisor>>>,
}

/// 把切面定义转换为 Advisor 并缓存
pub struct AspectAdvisorsBuilder {
    bean_factory: Weak<dyn ListableBeanFactory>,
    definitions: Vec<Arc<AspectDefinition>>,
    include_patterns: Vec<Regex>,
    entries: RwLock<Option<Vec<AspectEntry>>>,
}

impl AspectAdvisorsBuilder {
    pub fn new(bean_factory: Weak<dyn ListableBeanFactory>) -> Self {
        Self {
            bean_factory,
            definitions: Vec::new(),
            include_patterns: Vec::new(),
            entries: RwLock::new(None),
        }
    }

    pub fn add_definition(&mut self, definition: Arc<AspectDefinition>) {
        self.definitions.push(definition);
        *self.entries.get_mut() = None;
    }

    /// 只保留名称完整匹配任一正则的切面，空列表表示全部保留
    pub fn set_include_patterns(&mut self, patterns: &[String]) -> Result<(), AopError> {
        self.include_patterns = patterns
            .iter()
            .map(|pattern| {
                Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| AopError::InvalidPattern {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<_, _>>()?;
        *self.entries.get_mut() = None;
        Ok(())
    }

    pub fn is_eligible_aspect(&self, aspect_name: &str) -> bool {
        self.include_patterns.is_empty() || self.include_patterns.iter().any(|p| p.is_match(aspect_name))
    }

    /// 切面实例所在的 Bean 名称，这些 Bean 本身不会被代理
    pub fn aspect_bean_names(&self) -> Result<Vec<String>, AopError> {
        self.ensure_entries()?;
        Ok(self
            .entries
            .read()
            .iter()
            .flatten()
            .filter_map(|entry| entry.definition.bean_name().map(String::from))
            .collect())
    }

    /// 全部切面的 Advisor，单例切面来自缓存，per-target 切面每次重新构建
    pub fn build_aspect_advisors(&self) -> Result<Vec<Arc<dyn Advisor>>, AopError> {
        self.ensure_entries()?;
        let entries = self.entries.read();
        let mut advisors = Vec::new();
        for entry in entries.iter().flatten() {
            match &entry.advisors {
                Some(cached) => advisors.extend(cached.iter().cloned()),
                None => advisors.extend(AspectAdvisorFactory::get_advisors(
                    &entry.definition,
                    Some(&self.bean_factory),
                )?),
            }
        }
        Ok(advisors)
    }

    fn ensure_entries(&self) -> Result<(), AopError> {
        if self.entries.read().is_some() {
            return Ok(());
        }
        let mut entries = Vec::new();
        for definition in self.collect_definitions()? {
            if !self.is_eligible_aspect(definition.name()) {
                tracing::debug!("Aspect '{}' excluded by include patterns", definition.name());
                continue;
            }
            let advisors = if definition.is_per_instance() {
                None
            } else {
                Some(AspectAdvisorFactory::get_advisors(&definition, Some(&self.bean_factory))?)
            };
            entries.push(AspectEntry { definition, advisors });
        }
        tracing::debug!("Resolved {} aspect(s) for auto-proxying", entries.len());
        *self.entries.write() = Some(entries);
        Ok(())
    }

    fn collect_definitions(&self) -> Result<Vec<Arc<AspectDefinition>>, AopError> {
        let mut definitions = self.definitions.clone();
        let Some(bean_factory) = self.bean_factory.upgrade() else {
            return Ok(definitions);
        };
        for name in bean_factory.get_bean_names_for_type(TypeId::of::<Arc<AspectDefinition>>()) {
            if bean_factory.is_currently_in_creation(&name) {
                tracing::debug!("Skipping currently created aspect definition '{}'", name);
                continue;
            }
            let definition = bean_factory.get_bean_of::<Arc<AspectDefinition>>(&name)?;
            definitions.push(Arc::clone(&*definition));
        }
        Ok(definitions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advisor::DefaultPointcutAdvisor;
    use crate::aspect::{AdviceDeclarations, Aspect, AspectMetadata};
    use crate::interceptor::DebugInterceptor;
    use weaver_core::{BeanDefinition, BeanFactory, DefaultListableBeanFactory};

    fn weak(factory: &Arc<DefaultListableBeanFactory>) -> Weak<dyn ListableBeanFactory> {
        let weak: Weak<DefaultListableBeanFactory> = Arc::downgrade(factory);
        weak
    }

    fn debug_advisor() -> Arc<dyn Advisor> {
        Arc::new(DefaultPointcutAdvisor::always(Arc::new(DebugInterceptor::new())))
    }

    #[test]
    fn test_finds_advisor_beans_in_order() {
        let factory = Arc::new(DefaultListableBeanFactory::new());
        factory
            .register_bean_definition(BeanDefinition::new("first", |_| Ok(debug_advisor())))
            .unwrap();
        factory
            .register_bean_definition(BeanDefinition::new("plain", |_| Ok(42u32)))
            .unwrap();
        factory
            .register_bean_definition(BeanDefinition::new("second", |_| Ok(debug_advisor())))
            .unwrap();

        let helper = AdvisorRetrievalHelper::new(weak(&factory));
        assert_eq!(helper.find_advisor_beans(|_| true).unwrap().len(), 2);
        assert_eq!(helper.find_advisor_beans(|name| name == "second").unwrap().len(), 1);
    }

    #[test]
    fn test_advisor_in_creation_is_skipped_while_others_are_found() {
        let factory = Arc::new(DefaultListableBeanFactory::new());
        let helper = Arc::new(AdvisorRetrievalHelper::new(weak(&factory)));
        let found = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let lookup = Arc::clone(&helper);
        let found_during_creation = Arc::clone(&found);
        factory
            .register_bean_definition(BeanDefinition::new("selfAware", move |_| {
                let advisors = lookup
                    .find_advisor_beans(|_| true)
                    .map_err(|e| ContainerError::creation_failed("selfAware", e))?;
                *found_during_creation.lock() = advisors;
                Ok(debug_advisor())
            }))
            .unwrap();
        factory
            .register_bean_definition(BeanDefinition::new("tracing", |_| Ok(debug_advisor())))
            .unwrap();

        factory.get_bean("selfAware").unwrap();
        let tracing = factory.get_bean_of::<Arc<dyn Advisor>>("tracing").unwrap();
        let found = found.lock();
        assert_eq!(found.len(), 1);
        assert!(Arc::ptr_eq(&found[0], &*tracing));
    }

    #[test]
    fn test_unrelated_creation_failure_propagates() {
        let factory = Arc::new(DefaultListableBeanFactory::new());
        factory
            .register_bean_definition(BeanDefinition::new::<Arc<dyn Advisor>, _>("broken", |_| {
                Err(ContainerError::BeanNotFound("dataSource".to_string()))
            }))
            .unwrap();
        let helper = AdvisorRetrievalHelper::new(weak(&factory));
        assert!(matches!(
            helper.find_advisor_beans(|_| true),
            Err(AopError::Container(ContainerError::BeanCreationFailed { .. }))
        ));
    }

    #[test]
    fn test_name_cache_until_invalidated() {
        let factory = Arc::new(DefaultListableBeanFactory::new());
        let helper = AdvisorRetrievalHelper::new(weak(&factory));
        assert!(helper.find_advisor_beans(|_| true).unwrap().is_empty());

        factory
            .register_bean_definition(BeanDefinition::new("late", |_| Ok(debug_advisor())))
            .unwrap();
        assert!(helper.find_advisor_beans(|_| true).unwrap().is_empty());
        helper.invalidate();
        assert_eq!(helper.find_advisor_beans(|_| true).unwrap().len(), 1);
    }

    #[test]
    fn test_dropped_factory_is_reported() {
        let factory = Arc::new(DefaultListableBeanFactory::new());
        let helper = AdvisorRetrievalHelper::new(weak(&factory));
        drop(factory);
        assert!(matches!(
            helper.find_advisor_beans(|_| true),
            Err(AopError::BeanFactoryUnavailable)
        ));
    }

    struct MetricsAspect;

    impl AspectMetadata for MetricsAspect {
        fn aspect_name() -> &'static str {
            "metricsAspect"
        }
    }

    impl Aspect for MetricsAspect {
        fn declare_advice(advice: &mut AdviceDeclarations<Self>) {
            advice.before("execution(* *(..))", |_aspect, _jp| Ok(()));
        }
    }

    #[test]
    fn test_aspect_definitions_from_beans_and_include_patterns() {
        let factory = Arc::new(DefaultListableBeanFactory::new());
        factory
            .register_bean_definition(BeanDefinition::new("metricsDefinition", |_| {
                Ok(Arc::new(AspectDefinition::singleton(MetricsAspect)))
            }))
            .unwrap();
        assert!(factory.contains_bean("metricsDefinition"));

        let mut builder = AspectAdvisorsBuilder::new(weak(&factory));
        let first = builder.build_aspect_advisors().unwrap();
        let second = builder.build_aspect_advisors().unwrap();
        assert_eq!(first.len(), 1);
        assert!(Arc::ptr_eq(&first[0], &second[0]));

        builder.set_include_patterns(&["audit.*".to_string()]).unwrap();
        assert!(builder.build_aspect_advisors().unwrap().is_empty());
        assert!(builder.set_include_patterns(&["(".to_string()]).is_err());
    }
}
