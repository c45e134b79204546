//! Bean Factory - 核心容器接口
//!
//! 参考 Spring 的 BeanFactory 架构设计，只保留 AOP 核心需要消费的能力：
//! 按名称获取、按类型列举、角色元数据以及"正在创建中"状态

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{ReentrantMutex, RwLock};

use crate::bean::{BeanDefinition, BeanInstance};
use crate::error::{ContainerError, ContainerResult};
use crate::lifecycle::BeanPostProcessor;
use crate::scope::{BeanRole, Scope};
use crate::utils::dependency::{CreationGuard, CreationTracker};

/// BeanFactory - 最基础的容器接口
///
/// 此 trait 不包含泛型方法，可以作为 trait object 使用
pub trait BeanFactory: Send + Sync {
    /// 通过名称获取 Bean
    fn get_bean(&self, name: &str) -> ContainerResult<BeanInstance>;

    /// 检查是否包含指定名称的 Bean
    fn contains_bean(&self, name: &str) -> bool;

    /// 指定 Bean 当前是否处于创建过程中
    fn is_currently_in_creation(&self, name: &str) -> bool;
}

/// BeanFactory 的泛型扩展，不能作为 trait object 使用
pub trait BeanFactoryExt: BeanFactory {
    /// 获取 Bean 并向下转型为 `T`
    fn get_bean_of<T: Any + Send + Sync>(&self, name: &str) -> ContainerResult<Arc<T>> {
        self.get_bean(name)?
            .downcast::<T>()
            .map_err(|_| ContainerError::TypeMismatch {
                name: name.to_string(),
                expected: std::any::type_name::<T>().to_string(),
            })
    }
}

impl<F: BeanFactory + ?Sized> BeanFactoryExt for F {}

/// ListableBeanFactory - 可列举的 Bean 工厂
pub trait ListableBeanFactory: BeanFactory {
    /// 按注册顺序返回所有 Bean 名称
    fn get_bean_names(&self) -> Vec<String>;

    /// 按注册顺序返回指定类型的 Bean 名称
    fn get_bean_names_for_type(&self, type_id: TypeId) -> Vec<String>;

    /// 获取 Bean 定义的角色
    fn get_bean_role(&self, name: &str) -> Option<BeanRole>;

    /// 获取 Bean 定义的数量
    fn get_bean_definition_count(&self) -> usize;
}

/// DefaultListableBeanFactory - 默认实现
///
/// 所有创建过程串行化在一把可重入锁上：同一线程内的嵌套获取可以重入，
/// 其他线程等待，避免并发创建同一单例时误判为循环引用
pub struct DefaultListableBeanFactory {
    /// Bean 定义存储
    definitions: RwLock<HashMap<String, BeanDefinition>>,

    /// 注册顺序
    definition_names: RwLock<Vec<String>>,

    /// 单例 Bean 缓存
    singletons: RwLock<HashMap<String, BeanInstance>>,

    /// 循环引用检测
    creation_tracker: CreationTracker,

    /// 创建锁
    creation_lock: ReentrantMutex<()>,

    /// Bean 后置处理器列表（按优先级排序）
    bean_post_processors: RwLock<Vec<Arc<dyn BeanPostProcessor>>>,

    /// 配置是否已冻结
    configuration_frozen: AtomicBool,
}

impl DefaultListableBeanFactory {
    /// 创建新的 Bean 工厂
    pub fn new() -> Self {
        Self {
            definitions: RwLock::new(HashMap::new()),
            definition_names: RwLock::new(Vec::new()),
            singletons: RwLock::new(HashMap::new()),
            creation_tracker: CreationTracker::new(),
            creation_lock: ReentrantMutex::new(()),
            bean_post_processors: RwLock::new(Vec::new()),
            configuration_frozen: AtomicBool::new(false),
        }
    }

    /// 注册 Bean 定义
    pub fn register_bean_definition(&self, definition: BeanDefinition) -> ContainerResult<()> {
        if self.is_configuration_frozen() {
            return Err(ContainerError::ConfigurationFrozen("register bean definition"));
        }

        let name = definition.name.clone();
        tracing::trace!(
            "Registering bean: name='{}', type='{}', scope={:?}, role={:?}",
            name,
            definition.type_name,
            definition.scope,
            definition.role
        );

        {
            let mut definitions = self.definitions.write();
            if definitions.contains_key(&name) {
                tracing::warn!("Bean '{}' already exists, registration failed", name);
                return Err(ContainerError::BeanAlreadyExists(name));
            }
            definitions.insert(name.clone(), definition);
        }
        self.definition_names.write().push(name.clone());

        tracing::debug!("Bean definition registered: '{}'", name);
        Ok(())
    }

    /// 获取 Bean 定义的副本
    pub fn get_bean_definition(&self, name: &str) -> ContainerResult<BeanDefinition> {
        self.definitions
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ContainerError::BeanNotFound(name.to_string()))
    }

    /// 添加 BeanPostProcessor，按 `order()` 稳定排序
    pub fn add_bean_post_processor(&self, processor: Arc<dyn BeanPostProcessor>) {
        tracing::debug!(
            "Adding bean post-processor '{}' (order {})",
            processor.name(),
            processor.order()
        );
        let mut processors = self.bean_post_processors.write();
        processors.push(processor);
        processors.sort_by_key(|p| p.order());
    }

    /// 获取所有 BeanPostProcessor
    pub fn get_bean_post_processors(&self) -> Vec<Arc<dyn BeanPostProcessor>> {
        self.bean_post_processors.read().clone()
    }

    /// 预实例化所有非延迟单例
    pub fn preinstantiate_singletons(&self) -> ContainerResult<()> {
        let names: Vec<String> = {
            let definitions = self.definitions.read();
            self.definition_names
                .read()
                .iter()
                .filter(|name| {
                    definitions
                        .get(name.as_str())
                        .map(|def| def.scope == Scope::Singleton && !def.lazy)
                        .unwrap_or(false)
                })
                .cloned()
                .collect()
        };

        tracing::debug!("Pre-instantiating {} singleton beans", names.len());
        for name in names {
            self.get_bean(&name)?;
        }
        Ok(())
    }

    /// 冻结配置（不再允许注册 Bean 定义）
    pub fn freeze_configuration(&self) {
        self.configuration_frozen.store(true, Ordering::Release);
        tracing::debug!("Bean factory configuration frozen");
    }

    /// 检查配置是否已冻结
    pub fn is_configuration_frozen(&self) -> bool {
        self.configuration_frozen.load(Ordering::Acquire)
    }

    /// 创建 Bean 实例并应用后置处理器
    fn create_bean(&self, definition: &BeanDefinition) -> ContainerResult<BeanInstance> {
        let name = definition.name.as_str();

        if !self.creation_tracker.start_creating(name) {
            let chain = self.creation_tracker.describe_cycle(name);
            tracing::debug!("Bean '{}' requested while in creation: {}", name, chain);
            return Err(ContainerError::BeanCurrentlyInCreation {
                name: name.to_string(),
                chain,
            });
        }
        let _guard = CreationGuard::new(&self.creation_tracker, name);

        let mut bean = definition.create(self)?;
        for processor in self.get_bean_post_processors() {
            bean = processor.post_process_before_initialization(bean, name)?;
        }
        for processor in self.get_bean_post_processors() {
            bean = processor.post_process_after_initialization(bean, name)?;
        }
        Ok(bean)
    }
}

impl Default for DefaultListableBeanFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl BeanFactory for DefaultListableBeanFactory {
    fn get_bean(&self, name: &str) -> ContainerResult<BeanInstance> {
        tracing::trace!("Requesting bean: '{}'", name);

        let definition = self.get_bean_definition(name)?;

        match definition.scope {
            Scope::Singleton => {
                if let Some(bean) = self.singletons.read().get(name) {
                    return Ok(Arc::clone(bean));
                }

                let _lock = self.creation_lock.lock();
                // 等锁期间可能已被其他线程创建
                if let Some(bean) = self.singletons.read().get(name) {
                    return Ok(Arc::clone(bean));
                }

                tracing::debug!("Creating shared instance of singleton bean '{}'", name);
                let bean = self.create_bean(&definition)?;
                self.singletons
                    .write()
                    .insert(name.to_string(), Arc::clone(&bean));
                Ok(bean)
            }
            Scope::Prototype => {
                let _lock = self.creation_lock.lock();
                tracing::trace!("Creating new instance of prototype bean '{}'", name);
                self.create_bean(&definition)
            }
        }
    }

    fn contains_bean(&self, name: &str) -> bool {
        self.definitions.read().contains_key(name)
    }

    fn is_currently_in_creation(&self, name: &str) -> bool {
        self.creation_tracker.is_creating(name)
    }
}

impl ListableBeanFactory for DefaultListableBeanFactory {
    fn get_bean_names(&self) -> Vec<String> {
        self.definition_names.read().clone()
    }

    fn get_bean_names_for_type(&self, type_id: TypeId) -> Vec<String> {
        let definitions = self.definitions.read();
        self.definition_names
            .read()
            .iter()
            .filter(|name| {
                definitions
                    .get(name.as_str())
                    .map(|def| def.type_id == type_id)
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    fn get_bean_role(&self, name: &str) -> Option<BeanRole> {
        self.definitions.read().get(name).map(|def| def.role)
    }

    fn get_bean_definition_count(&self) -> usize {
        self.definitions.read().len()
    }
}
