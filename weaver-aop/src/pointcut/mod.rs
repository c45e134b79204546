//! 切点
//!
//! 切点由类过滤器和方法匹配器组成：先按候选类型粗筛，再逐个方法精确匹配。

mod expression;
mod type_pattern;

use std::fmt;
use std::sync::Arc;

use crate::target::{Method, TargetType};

pub use expression::{AspectJExpressionPointcut, TypePatternClassFilter};
pub use type_pattern::{NamePattern, TypePattern};

/// 类过滤器
pub trait ClassFilter: Send + Sync {
    fn matches(&self, target: &TargetType) -> bool;
}

/// 方法匹配器
pub trait MethodMatcher: Send + Sync {
    fn matches(&self, method: &Method, target: &TargetType) -> bool;

    /// 对任何方法都返回 true，用于跳过逐方法匹配
    fn is_always_true(&self) -> bool {
        false
    }
}

/// 切点
pub trait Pointcut: Send + Sync {
    fn class_filter(&self) -> &dyn ClassFilter;

    fn method_matcher(&self) -> &dyn MethodMatcher;
}

/// 匹配一切的切点
#[derive(Debug, Default, Clone, Copy)]
pub struct TruePointcut;

impl ClassFilter for TruePointcut {
    fn matches(&self, _target: &TargetType) -> bool {
        true
    }
}

impl MethodMatcher for TruePointcut {
    fn matches(&self, _method: &Method, _target: &TargetType) -> bool {
        true
    }

    fn is_always_true(&self) -> bool {
        true
    }
}

impl Pointcut for TruePointcut {
    fn class_filter(&self) -> &dyn ClassFilter {
        self
    }

    fn method_matcher(&self) -> &dyn MethodMatcher {
        self
    }
}

/// 按方法名匹配，支持 `*` 通配
#[derive(Debug, Clone, Default)]
pub struct NameMatchMethodPointcut {
    patterns: Vec<NamePattern>,
}

impl NameMatchMethodPointcut {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_method_name(mut self, pattern: &str) -> Result<Self, crate::error::AopError> {
        self.patterns.push(NamePattern::parse(pattern)?);
        Ok(self)
    }
}

impl ClassFilter for NameMatchMethodPointcut {
    fn matches(&self, _target: &TargetType) -> bool {
        true
    }
}

impl MethodMatcher for NameMatchMethodPointcut {
    fn matches(&self, method: &Method, _target: &TargetType) -> bool {
        self.patterns.iter().any(|p| p.matches(method.name()))
    }
}

impl Pointcut for NameMatchMethodPointcut {
    fn class_filter(&self) -> &dyn ClassFilter {
        self
    }

    fn method_matcher(&self) -> &dyn MethodMatcher {
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Composition {
    Intersection,
    Union,
}

/// 两个切点的交集或并集
#[derive(Clone)]
pub struct ComposablePointcut {
    left: Arc<dyn Pointcut>,
    right: Arc<dyn Pointcut>,
    composition: Composition,
}

impl ComposablePointcut {
    pub fn intersection(left: Arc<dyn Pointcut>, right: Arc<dyn Pointcut>) -> Self {
        Self {
            left,
            right,
            composition: Composition::Intersection,
        }
    }

    pub fn union(left: Arc<dyn Pointcut>, right: Arc<dyn Pointcut>) -> Self {
        Self {
            left,
            right,
            composition: Composition::Union,
        }
    }
}

impl fmt::Debug for ComposablePointcut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComposablePointcut")
            .field("composition", &self.composition)
            .finish()
    }
}

impl ClassFilter for ComposablePointcut {
    fn matches(&self, target: &TargetType) -> bool {
        let left = self.left.class_filter().matches(target);
        let right = self.right.class_filter().matches(target);
        match self.composition {
            Composition::Intersection => left && right,
            Composition::Union => left || right,
        }
    }
}

impl MethodMatcher for ComposablePointcut {
    fn matches(&self, method: &Method, target: &TargetType) -> bool {
        match self.composition {
            Composition::Intersection => {
                self.left.method_matcher().matches(method, target)
                    && self.right.method_matcher().matches(method, target)
            }
            // 并集的每一侧都要求自己的类过滤器成立
            Composition::Union => {
                (self.left.class_filter().matches(target)
                    && self.left.method_matcher().matches(method, target))
                    || (self.right.class_filter().matches(target)
                        && self.right.method_matcher().matches(method, target))
            }
        }
    }

    fn is_always_true(&self) -> bool {
        let left = self.left.method_matcher().is_always_true();
        let right = self.right.method_matcher().is_always_true();
        match self.composition {
            Composition::Intersection => left && right,
            Composition::Union => false,
        }
    }
}

impl Pointcut for ComposablePointcut {
    fn class_filter(&self) -> &dyn ClassFilter {
        self
    }

    fn method_matcher(&self) -> &dyn MethodMatcher {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ty() -> TargetType {
        TargetType::new("app.UserService")
            .method("find_user", ["u64"], "User")
            .method("save", ["User"], "()")
    }

    #[test]
    fn test_name_match() {
        let pointcut = NameMatchMethodPointcut::new().add_method_name("find*").unwrap();
        let ty = ty();
        assert!(pointcut.method_matcher().matches(ty.find_method("find_user").unwrap(), &ty));
        assert!(!pointcut.method_matcher().matches(ty.find_method("save").unwrap(), &ty));
    }

    #[test]
    fn test_composition() {
        let find: Arc<dyn Pointcut> =
            Arc::new(NameMatchMethodPointcut::new().add_method_name("find*").unwrap());
        let other_type: Arc<dyn Pointcut> =
            Arc::new(AspectJExpressionPointcut::parse("within(app.OrderService)").unwrap());
        let ty = ty();
        let method = ty.find_method("find_user").unwrap();

        let both = ComposablePointcut::intersection(Arc::clone(&find), Arc::clone(&other_type));
        assert!(!both.class_filter().matches(&ty));

        let either = ComposablePointcut::union(find, other_type);
        assert!(either.class_filter().matches(&ty));
        assert!(either.method_matcher().matches(method, &ty));
        assert!(!either.method_matcher().matches(ty.find_method("save").unwrap(), &ty));
    }

    #[test]
    fn test_true_pointcut() {
        let ty = ty();
        assert!(TruePointcut.class_filter().matches(&ty));
        assert!(TruePointcut.method_matcher().is_always_true());
    }
}
