//! 切面注册表
//!
//! 通过 `register_aspect!` 在编译期登记的切面由 inventory 收集，
//! 首次访问全局注册表时统一转换为 `AspectDefinition`。

use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::aspect::AspectDefinition;

/// 编译期登记的切面
pub struct AspectRegistration {
    pub name: &'static str,
    pub build: fn() -> AspectDefinition,
}

impl AspectRegistration {
    pub const fn new(name: &'static str, build: fn() -> AspectDefinition) -> Self {
        Self { name, build }
    }
}

inventory::collect!(AspectRegistration);

/// 登记一个切面，默认通过 `Default` 延迟创建实例
///
/// ```ignore
/// register_aspect!(AuditAspect);
/// register_aspect!(TxAspect, || AspectDefinition::from_bean::<TxAspect>("txAspect"));
/// ```
#[macro_export]
macro_rules! register_aspect {
    ($ty:ty) => {
        $crate::inventory::submit! {
            $crate::registry::AspectRegistration::new(
                ::std::stringify!($ty),
                || $crate::aspect::AspectDefinition::from_factory(|| ::std::result::Result::Ok(<$ty as ::std::default::Default>::default())),
            )
        }
    };
    ($ty:ty, $build:expr) => {
        $crate::inventory::submit! {
            $crate::registry::AspectRegistration::new(::std::stringify!($ty), $build)
        }
    };
}

static GLOBAL_ASPECT_REGISTRY: Lazy<AspectRegistry> = Lazy::new(|| {
    let registry = AspectRegistry::new();
    registry.auto_load_aspects();
    registry
});

/// 全局注册表，首次访问时加载全部登记的切面
pub fn global_registry() -> &'static AspectRegistry {
    &GLOBAL_ASPECT_REGISTRY
}

/// 切面定义的集合，按登记顺序保存
#[derive(Default)]
pub struct AspectRegistry {
    definitions: RwLock<Vec<Arc<AspectDefinition>>>,
}

impl AspectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, definition: AspectDefinition) -> Arc<AspectDefinition> {
        let definition = Arc::new(definition);
        tracing::debug!(
            "Registering aspect '{}' ({:?})",
            definition.name(),
            definition.instantiation_model()
        );
        self.definitions.write().push(Arc::clone(&definition));
        definition
    }

    pub fn definitions(&self) -> Vec<Arc<AspectDefinition>> {
        self.definitions.read().clone()
    }

    pub fn find(&self, aspect_name: &str) -> Option<Arc<AspectDefinition>> {
        self.definitions
            .read()
            .iter()
            .find(|definition| definition.name() == aspect_name)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.definitions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.read().is_empty()
    }

    /// 加载所有通过 `register_aspect!` 登记的切面
    pub fn auto_load_aspects(&self) {
        let mut loaded = 0;
        for registration in inventory::iter::<AspectRegistration> {
            tracing::debug!("  ├─ Loading aspect registered as {}", registration.name);
            self.register((registration.build)());
            loaded += 1;
        }
        tracing::info!("Auto-loaded {} aspect(s)", loaded);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aspect::{AdviceDeclarations, Aspect, AspectMetadata, InstantiationModel};

    #[derive(Default)]
    struct TimingAspect;

    impl AspectMetadata for TimingAspect {
        fn aspect_name() -> &'static str {
            "timingAspect"
        }
    }

    impl Aspect for TimingAspect {
        fn declare_advice(advice: &mut AdviceDeclarations<Self>) {
            advice.around("execution(* *(..))", |_aspect, pjp| pjp.proceed());
        }
    }

    #[derive(Default)]
    struct SessionAspect;

    impl AspectMetadata for SessionAspect {
        fn aspect_name() -> &'static str {
            "sessionAspect"
        }

        fn instantiation_model() -> InstantiationModel {
            InstantiationModel::PerTarget("execution(* *(..))".to_string())
        }
    }

    impl Aspect for SessionAspect {
        fn declare_advice(advice: &mut AdviceDeclarations<Self>) {
            advice.before("execution(* *(..))", |_aspect, _jp| Ok(()));
        }
    }

    register_aspect!(TimingAspect);
    register_aspect!(SessionAspect, || AspectDefinition::from_factory(|| Ok(SessionAspect)).with_order(5));

    #[test]
    fn test_global_registry_loads_registrations() {
        let registry = global_registry();
        let timing = registry.find("timingAspect").unwrap();
        assert_eq!(timing.declaration_count(), 1);
        assert!(!timing.is_per_instance());

        let session = registry.find("sessionAspect").unwrap();
        assert!(session.is_per_instance());
        assert_eq!(session.order(), Some(5));
    }

    #[test]
    fn test_local_registry_keeps_order() {
        let registry = AspectRegistry::new();
        assert!(registry.is_empty());
        registry.register(AspectDefinition::singleton(TimingAspect));
        registry.register(AspectDefinition::from_bean::<SessionAspect>("sessionAspect"));
        let names: Vec<_> = registry.definitions().iter().map(|d| d.name().to_string()).collect();
        assert_eq!(names, vec!["timingAspect", "sessionAspect"]);
        assert_eq!(registry.len(), 2);
    }
}
