use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use crate::bean_factory::BeanFactory;
use crate::error::{ContainerError, ContainerResult};
use crate::scope::{BeanRole, Scope};

/// 容器中保存的 Bean 实例
pub type BeanInstance = Arc<dyn Any + Send + Sync>;

/// 创建 Bean 实例的函数
///
/// 工厂函数可以通过传入的 `BeanFactory` 获取依赖，
/// 依赖获取失败时直接返回错误，由容器包装为 `BeanCreationFailed`
pub type BeanFactoryFn =
    Arc<dyn Fn(&dyn BeanFactory) -> ContainerResult<BeanInstance> + Send + Sync>;

/// Bean 定义 - 描述如何创建和管理 Bean
#[derive(Clone)]
pub struct BeanDefinition {
    /// Bean 的名称
    pub name: String,

    /// Bean 的作用域
    pub scope: Scope,

    /// Bean 的角色
    pub role: BeanRole,

    /// 是否延迟初始化（仅对单例有效）
    pub lazy: bool,

    /// 工厂产出值的类型
    pub type_id: TypeId,

    /// 类型名称（日志和错误信息使用）
    pub type_name: &'static str,

    /// Bean 工厂
    pub factory: BeanFactoryFn,
}

impl BeanDefinition {
    /// 创建新的 Bean 定义
    ///
    /// `T` 是工厂返回的值类型，容器按 `TypeId::of::<T>()` 建立类型索引。
    /// 注册 trait 对象时使用 `Arc<dyn Trait>` 作为 `T`。
    pub fn new<T, F>(name: impl Into<String>, factory: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&dyn BeanFactory) -> ContainerResult<T> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            scope: Scope::default(),
            role: BeanRole::default(),
            lazy: false,
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            factory: Arc::new(move |bf| factory(bf).map(|bean| Arc::new(bean) as BeanInstance)),
        }
    }

    /// 使用已有实例创建定义
    pub fn instance<T>(name: impl Into<String>, instance: T) -> Self
    where
        T: Any + Send + Sync + Clone,
    {
        Self::new(name, move |_| Ok(instance.clone()))
    }

    /// 设置作用域
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    /// 设置角色
    pub fn with_role(mut self, role: BeanRole) -> Self {
        self.role = role;
        self
    }

    /// 设置延迟初始化
    pub fn with_lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }

    /// 调用工厂函数创建实例
    pub(crate) fn create(&self, bean_factory: &dyn BeanFactory) -> ContainerResult<BeanInstance> {
        // 原始错误保留在 source 链中，便于调用方定位根因
        (self.factory)(bean_factory)
            .map_err(|e| ContainerError::creation_failed(self.name.clone(), e))
    }
}

impl fmt::Debug for BeanDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeanDefinition")
            .field("name", &self.name)
            .field("scope", &self.scope)
            .field("role", &self.role)
            .field("lazy", &self.lazy)
            .field("type_name", &self.type_name)
            .finish()
    }
}
