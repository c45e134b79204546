//! 切面实例工厂
//!
//! 通知在每次调用时通过工厂取得切面实例。工厂决定实例的生命周期：
//! 预先创建的单例、每次新建、从 Bean 工厂获取、首次使用时创建，或按目标实例各自创建。

use std::any::Any;
use std::sync::{Arc, Weak};

use once_cell::sync::OnceCell;
use weaver_core::ListableBeanFactory;

use crate::error::AopError;
use crate::target::{PerTarget, TargetId};

/// 切面实例
pub type AspectInstance = Arc<dyn Any + Send + Sync>;

/// 创建切面实例的函数
pub type AspectCreator = Arc<dyn Fn() -> anyhow::Result<AspectInstance> + Send + Sync>;

/// 切面实例工厂
pub trait AspectInstanceFactory: Send + Sync {
    /// 为目标实例取得切面实例，只有 per-target 工厂会用到 `target`
    fn aspect_instance(&self, target: &TargetId) -> Result<AspectInstance, AopError>;

    fn aspect_name(&self) -> &str;

    fn order(&self) -> Option<i32>;

    /// 实例是否延迟到第一次调用时创建
    fn is_lazy(&self) -> bool {
        false
    }

    /// 是否已经创建过实例
    fn is_advice_instantiated(&self) -> bool {
        true
    }
}

/// 预先创建的单例
pub struct SingletonAspectInstanceFactory {
    name: String,
    order: Option<i32>,
    instance: AspectInstance,
}

impl SingletonAspectInstanceFactory {
    pub fn new(name: impl Into<String>, order: Option<i32>, instance: AspectInstance) -> Self {
        Self {
            name: name.into(),
            order,
            instance,
        }
    }
}

impl AspectInstanceFactory for SingletonAspectInstanceFactory {
    fn aspect_instance(&self, _target: &TargetId) -> Result<AspectInstance, AopError> {
        Ok(Arc::clone(&self.instance))
    }

    fn aspect_name(&self) -> &str {
        &self.name
    }

    fn order(&self) -> Option<i32> {
        self.order
    }
}

/// 每次调用都创建新实例
pub struct SimpleAspectInstanceFactory {
    name: String,
    order: Option<i32>,
    creator: AspectCreator,
}

impl SimpleAspectInstanceFactory {
    pub fn new(name: impl Into<String>, order: Option<i32>, creator: AspectCreator) -> Self {
        Self {
            name: name.into(),
            order,
            creator,
        }
    }
}

impl AspectInstanceFactory for SimpleAspectInstanceFactory {
    fn aspect_instance(&self, _target: &TargetId) -> Result<AspectInstance, AopError> {
        tracing::trace!("Creating new instance of aspect '{}'", self.name);
        (self.creator)().map_err(|e| AopError::AspectInstantiation {
            aspect: self.name.clone(),
            reason: format!("{:#}", e),
        })
    }

    fn aspect_name(&self) -> &str {
        &self.name
    }

    fn order(&self) -> Option<i32> {
        self.order
    }
}

/// 从 Bean 工厂获取切面实例
///
/// 切面以自身类型注册为 Bean，单例还是原型由 Bean 定义决定
pub struct BeanFactoryAspectInstanceFactory {
    name: String,
    bean_name: String,
    order: Option<i32>,
    bean_factory: Weak<dyn ListableBeanFactory>,
}

impl BeanFactoryAspectInstanceFactory {
    pub fn new(
        name: impl Into<String>,
        bean_name: impl Into<String>,
        order: Option<i32>,
        bean_factory: Weak<dyn ListableBeanFactory>,
    ) -> Self {
        Self {
            name: name.into(),
            bean_name: bean_name.into(),
            order,
            bean_factory,
        }
    }

    pub fn bean_name(&self) -> &str {
        &self.bean_name
    }
}

impl AspectInstanceFactory for BeanFactoryAspectInstanceFactory {
    fn aspect_instance(&self, _target: &TargetId) -> Result<AspectInstance, AopError> {
        let bean_factory = self.bean_factory.upgrade().ok_or(AopError::BeanFactoryUnavailable)?;
        Ok(bean_factory.get_bean(&self.bean_name)?)
    }

    fn aspect_name(&self) -> &str {
        &self.name
    }

    fn order(&self) -> Option<i32> {
        self.order
    }
}

/// 首次使用时才创建并缓存实例的装饰器
pub struct LazySingletonAspectInstanceFactory {
    inner: Arc<dyn AspectInstanceFactory>,
    instance: OnceCell<AspectInstance>,
}

impl LazySingletonAspectInstanceFactory {
    pub fn new(inner: Arc<dyn AspectInstanceFactory>) -> Self {
        Self {
            inner,
            instance: OnceCell::new(),
        }
    }
}

impl AspectInstanceFactory for LazySingletonAspectInstanceFactory {
    fn aspect_instance(&self, target: &TargetId) -> Result<AspectInstance, AopError> {
        self.instance
            .get_or_try_init(|| {
                tracing::debug!("Instantiating lazy aspect '{}'", self.inner.aspect_name());
                self.inner.aspect_instance(target)
            })
            .map(Arc::clone)
    }

    fn aspect_name(&self) -> &str {
        self.inner.aspect_name()
    }

    fn order(&self) -> Option<i32> {
        self.inner.order()
    }

    fn is_lazy(&self) -> bool {
        true
    }

    fn is_advice_instantiated(&self) -> bool {
        self.instance.get().is_some()
    }
}

/// 按目标实例各自创建切面实例
///
/// 同一目标在并发下也只会创建一次：表锁只用于取出该目标的单元格，创建在锁外进行。
/// 目标释放后，它的切面实例在之后的插入中被清理。
pub struct PerTargetAspectInstanceFactory {
    inner: Arc<dyn AspectInstanceFactory>,
    instances: PerTarget<Arc<OnceCell<AspectInstance>>>,
}

impl PerTargetAspectInstanceFactory {
    pub fn new(inner: Arc<dyn AspectInstanceFactory>) -> Self {
        Self {
            inner,
            instances: PerTarget::new(),
        }
    }

    /// 已创建的实例数量
    pub fn instantiated_count(&self) -> usize {
        self.instances
            .values()
            .iter()
            .filter(|cell| cell.get().is_some())
            .count()
    }

    /// 表中保留的目标数量
    pub fn tracked_targets(&self) -> usize {
        self.instances.len()
    }
}

impl AspectInstanceFactory for PerTargetAspectInstanceFactory {
    fn aspect_instance(&self, target: &TargetId) -> Result<AspectInstance, AopError> {
        let cell = self.instances.get_or_insert_with(target, Default::default);
        cell.get_or_try_init(|| {
            tracing::debug!(
                "Instantiating aspect '{}' for target {}",
                self.inner.aspect_name(),
                target
            );
            self.inner.aspect_instance(target)
        })
        .map(Arc::clone)
    }

    fn aspect_name(&self) -> &str {
        self.inner.aspect_name()
    }

    fn order(&self) -> Option<i32> {
        self.inner.order()
    }

    fn is_lazy(&self) -> bool {
        true
    }

    fn is_advice_instantiated(&self) -> bool {
        self.instantiated_count() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn counting_creator(counter: Arc<AtomicUsize>) -> AspectCreator {
        Arc::new(move || -> anyhow::Result<AspectInstance> {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(n) as AspectInstance)
        })
    }

    fn id_of(n: usize) -> TargetId {
        TargetId::of(&Arc::new(n))
    }

    #[test]
    fn test_simple_factory_creates_each_time() {
        let counter = Arc::new(AtomicUsize::new(0));
        let factory = SimpleAspectInstanceFactory::new("a", None, counting_creator(Arc::clone(&counter)));
        let target = id_of(0);
        factory.aspect_instance(&target).unwrap();
        factory.aspect_instance(&target).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_lazy_singleton_creates_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let factory = LazySingletonAspectInstanceFactory::new(Arc::new(
            SimpleAspectInstanceFactory::new("a", Some(3), counting_creator(Arc::clone(&counter))),
        ));
        assert!(factory.is_lazy());
        assert!(!factory.is_advice_instantiated());

        let target = id_of(0);
        let first = factory.aspect_instance(&target).unwrap();
        let second = factory.aspect_instance(&target).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(factory.is_advice_instantiated());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(factory.order(), Some(3));
    }

    #[test]
    fn test_per_target_instances() {
        let counter = Arc::new(AtomicUsize::new(0));
        let factory = Arc::new(PerTargetAspectInstanceFactory::new(Arc::new(
            SimpleAspectInstanceFactory::new("p", None, counting_creator(Arc::clone(&counter))),
        )));
        assert!(!factory.is_advice_instantiated());

        let a: Arc<String> = Arc::new("a".into());
        let b: Arc<String> = Arc::new("b".into());
        let a1 = factory.aspect_instance(&TargetId::of(&a)).unwrap();
        let a2 = factory.aspect_instance(&TargetId::of(&a)).unwrap();
        let b1 = factory.aspect_instance(&TargetId::of(&b)).unwrap();
        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &b1));
        assert_eq!(factory.instantiated_count(), 2);
    }

    #[test]
    fn test_per_target_creates_once_under_contention() {
        let counter = Arc::new(AtomicUsize::new(0));
        let factory = Arc::new(PerTargetAspectInstanceFactory::new(Arc::new(
            SimpleAspectInstanceFactory::new("p", None, counting_creator(Arc::clone(&counter))),
        )));
        let shared: Arc<usize> = Arc::new(42);
        let target = TargetId::of(&shared);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let factory = Arc::clone(&factory);
                let target = target.clone();
                thread::spawn(move || factory.aspect_instance(&target).map(|_| ()).is_ok())
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_per_target_released_targets_do_not_share_instances() {
        let counter = Arc::new(AtomicUsize::new(0));
        let factory = PerTargetAspectInstanceFactory::new(Arc::new(SimpleAspectInstanceFactory::new(
            "p",
            None,
            counting_creator(Arc::clone(&counter)),
        )));

        for expected in 0..20 {
            let target: Arc<String> = Arc::new(format!("target-{}", expected));
            let instance = factory.aspect_instance(&TargetId::of(&target)).unwrap();
            assert_eq!(*instance.downcast_ref::<usize>().unwrap(), expected);
        }
        assert_eq!(counter.load(Ordering::SeqCst), 20);
        assert_eq!(factory.tracked_targets(), 1);
    }

    #[test]
    fn test_creation_failure_is_reported() {
        let factory = SimpleAspectInstanceFactory::new(
            "broken",
            None,
            Arc::new(|| -> anyhow::Result<AspectInstance> { Err(anyhow::anyhow!("no dependencies")) }),
        );
        let err = factory.aspect_instance(&id_of(0)).err().unwrap();
        assert!(matches!(err, AopError::AspectInstantiation { ref aspect, .. } if aspect == "broken"));
    }
}
