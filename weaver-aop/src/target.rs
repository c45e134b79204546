//! 目标类型元数据
//!
//! Rust 没有运行时反射，候选"类"通过 `TargetType` 显式描述：
//! 类型名、实现的接口以及可被拦截的方法。真正的方法分派由 `Advisable` 完成。

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use anyhow::Result;
use parking_lot::Mutex;

use crate::error::AopError;

/// 调用参数与返回值的统一表示
pub type Value = Arc<dyn Any + Send + Sync>;

/// 包装为 `Value`
pub fn value<T: Any + Send + Sync>(v: T) -> Value {
    Arc::new(v)
}

/// 无返回值方法的返回值
pub fn unit() -> Value {
    Arc::new(())
}

/// 将 `Value` 转换回具体类型
pub fn downcast_value<T: Any + Send + Sync + Clone>(v: &Value) -> Result<T> {
    (**v).downcast_ref::<T>().cloned().ok_or_else(|| {
        AopError::ValueTypeMismatch {
            what: "return value".to_string(),
            expected: std::any::type_name::<T>(),
        }
        .into()
    })
}

/// 取出第 `index` 个参数
pub fn arg<T: Any + Send + Sync + Clone>(args: &[Value], index: usize) -> Result<T> {
    args.get(index)
        .and_then(|v| (**v).downcast_ref::<T>().cloned())
        .ok_or_else(|| {
            AopError::ValueTypeMismatch {
                what: format!("argument #{}", index),
                expected: std::any::type_name::<T>(),
            }
            .into()
        })
}

/// 方法描述
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Method {
    declaring_type: String,
    name: String,
    parameter_types: Vec<String>,
    return_type: String,
}

impl Method {
    pub fn new(declaring_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            declaring_type: declaring_type.into(),
            name: name.into(),
            parameter_types: Vec::new(),
            return_type: "()".to_string(),
        }
    }

    pub fn params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parameter_types = params.into_iter().map(Into::into).collect();
        self
    }

    pub fn returns(mut self, return_type: impl Into<String>) -> Self {
        self.return_type = return_type.into();
        self
    }

    pub fn declaring_type(&self) -> &str {
        &self.declaring_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameter_types(&self) -> &[String] {
        &self.parameter_types
    }

    pub fn return_type(&self) -> &str {
        &self.return_type
    }

    /// `UserService.find_user(u64)`
    pub fn signature(&self) -> String {
        format!(
            "{}.{}({})",
            self.declaring_type,
            self.name,
            self.parameter_types.join(", ")
        )
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.return_type, self.signature())
    }
}

/// 候选类型描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetType {
    name: String,
    interfaces: Vec<String>,
    methods: Vec<Method>,
}

impl TargetType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            interfaces: Vec::new(),
            methods: Vec::new(),
        }
    }

    /// 声明实现的接口
    pub fn implements(mut self, interface: impl Into<String>) -> Self {
        let interface = interface.into();
        if !self.interfaces.contains(&interface) {
            self.interfaces.push(interface);
        }
        self
    }

    /// 声明类型自身的方法
    pub fn method<I, S>(self, name: &str, params: I, return_type: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let method = Method::new(self.name.clone(), name)
            .params(params)
            .returns(return_type);
        self.with_method(method)
    }

    /// 声明来自接口的方法，同时登记该接口
    pub fn interface_method<I, S>(self, interface: &str, name: &str, params: I, return_type: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let method = Method::new(interface, name).params(params).returns(return_type);
        self.implements(interface).with_method(method)
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.methods.push(method);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 最后一段名称，`app.service.UserService` -> `UserService`
    pub fn simple_name(&self) -> &str {
        simple_name(&self.name)
    }

    pub fn interfaces(&self) -> &[String] {
        &self.interfaces
    }

    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    pub fn find_method(&self, name: &str) -> Option<&Method> {
        self.methods.iter().find(|m| m.name == name)
    }

    /// 类型本身或其接口之一
    pub fn is_assignable_to(&self, type_name: &str) -> bool {
        self.name == type_name || self.interfaces.iter().any(|i| i == type_name)
    }
}

pub(crate) fn simple_name(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

/// 可被代理的目标对象
///
/// `invoke_method` 是真正的目标方法调用，拦截器链的最后一环
pub trait Advisable: Send + Sync {
    fn target_type(&self) -> &TargetType;

    fn invoke_method(&self, method: &Method, args: &[Value]) -> Result<Value>;
}

/// 按方法名调用的便捷扩展
pub trait AdvisableExt: Advisable {
    fn call(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        let method = self.target_type().find_method(method).ok_or_else(|| AopError::UnknownMethod {
            target: self.target_type().name().to_string(),
            method: method.to_string(),
        })?;
        self.invoke_method(method, &args)
    }

    fn call_as<T: Any + Send + Sync + Clone>(&self, method: &str, args: Vec<Value>) -> Result<T> {
        downcast_value(&self.call(method, args)?)
    }
}

impl<T: Advisable + ?Sized> AdvisableExt for T {}

trait Liveness: Send + Sync {
    fn is_alive(&self) -> bool;
}

impl<T: ?Sized + Send + Sync> Liveness for Weak<T> {
    fn is_alive(&self) -> bool {
        self.strong_count() > 0
    }
}

/// 目标实例的身份
///
/// 按共享分配的地址区分，同时持有该分配的弱引用：只要 `TargetId` 还在，
/// 这块分配就不会被释放复用，地址相同即为同一实例。
#[derive(Clone)]
pub struct TargetId {
    addr: usize,
    owner: Arc<dyn Liveness>,
}

impl TargetId {
    pub fn of<T: ?Sized + Send + Sync + 'static>(target: &Arc<T>) -> Self {
        TargetId {
            addr: Arc::as_ptr(target) as *const () as usize,
            owner: Arc::new(Arc::downgrade(target)),
        }
    }

    /// 目标实例是否仍存活
    pub fn is_alive(&self) -> bool {
        self.owner.is_alive()
    }
}

impl PartialEq for TargetId {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr
    }
}

impl Eq for TargetId {}

impl Hash for TargetId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr.hash(state);
    }
}

impl fmt::Debug for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetId")
            .field("addr", &format_args!("{:#x}", self.addr))
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.addr)
    }
}

/// 按目标实例保存的值
///
/// 插入新条目时顺带清理已释放目标的条目。
pub(crate) struct PerTarget<V> {
    entries: Mutex<HashMap<TargetId, V>>,
}

impl<V: Clone> PerTarget<V> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn get_or_insert_with(&self, target: &TargetId, create: impl FnOnce() -> V) -> V {
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(target) {
            return existing.clone();
        }
        let before = entries.len();
        entries.retain(|id, _| id.is_alive());
        if entries.len() < before {
            tracing::trace!("Pruned {} entries of released targets", before - entries.len());
        }
        let created = create();
        entries.insert(target.clone(), created.clone());
        created
    }

    pub(crate) fn values(&self) -> Vec<V> {
        self.entries.lock().values().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_type_builder() {
        let ty = TargetType::new("app.UserService")
            .method("find_user", ["u64"], "User")
            .interface_method("Repository", "count", Vec::<String>::new(), "usize");

        assert_eq!(ty.simple_name(), "UserService");
        assert!(ty.is_assignable_to("Repository"));
        assert!(!ty.is_assignable_to("Lockable"));
        assert_eq!(ty.find_method("count").unwrap().declaring_type(), "Repository");
        assert_eq!(
            ty.find_method("find_user").unwrap().signature(),
            "app.UserService.find_user(u64)"
        );
    }

    #[test]
    fn test_value_helpers() {
        let args = vec![value(7u64), value("x".to_string())];
        assert_eq!(arg::<u64>(&args, 0).unwrap(), 7);
        assert_eq!(arg::<String>(&args, 1).unwrap(), "x");
        assert!(arg::<u32>(&args, 0).is_err());
        assert!(arg::<u64>(&args, 5).is_err());
        assert!(downcast_value::<()>(&unit()).is_ok());
    }

    #[test]
    fn test_target_id_is_identity() {
        let a: Arc<String> = Arc::new("a".into());
        let b = Arc::clone(&a);
        let c: Arc<String> = Arc::new("a".into());
        assert_eq!(TargetId::of(&a), TargetId::of(&b));
        assert_ne!(TargetId::of(&a), TargetId::of(&c));
    }

    #[test]
    fn test_target_id_keeps_identity_after_release() {
        let a: Arc<String> = Arc::new("a".into());
        let id = TargetId::of(&a);
        assert!(id.is_alive());
        drop(a);
        assert!(!id.is_alive());

        // 持有 id 期间旧分配不会被复用
        let fresh: Vec<Arc<String>> = (0..16).map(|i| Arc::new(i.to_string())).collect();
        assert!(fresh.iter().all(|f| TargetId::of(f) != id));
    }

    #[test]
    fn test_per_target_prunes_released_targets() {
        let values = PerTarget::new();
        let kept: Arc<String> = Arc::new("kept".into());
        assert_eq!(values.get_or_insert_with(&TargetId::of(&kept), || 1), 1);
        assert_eq!(values.get_or_insert_with(&TargetId::of(&kept), || 2), 1);

        for i in 0..10 {
            let transient: Arc<String> = Arc::new(i.to_string());
            assert_eq!(values.get_or_insert_with(&TargetId::of(&transient), || 10 + i), 10 + i);
        }
        assert_eq!(values.len(), 2);
        assert_eq!(values.get_or_insert_with(&TargetId::of(&kept), || 3), 1);
    }
}
