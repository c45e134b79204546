//! Advisor 匹配工具
//!
//! 判断 Advisor 能否作用于某个类型、筛选候选 Advisor，以及为单个方法计算拦截器链。

use std::sync::Arc;

use crate::advisor::{Advisor, AdvisorKind};
use crate::interceptor::{expose_invocation_advisor, is_expose_invocation_advisor, MethodInterceptor};
use crate::pointcut::Pointcut;
use crate::target::{Method, TargetType};

/// Advisor 能否作用于该类型的至少一个方法
///
/// `introduced` 是已经确定会引入的接口方法，同样参与方法匹配
pub fn can_apply(advisor: &dyn Advisor, target: &TargetType, introduced: &[Method]) -> bool {
    match advisor.kind() {
        AdvisorKind::Introduction(introduction) => introduction.class_filter().matches(target),
        AdvisorKind::Pointcut(pointcut) => can_apply_pointcut(pointcut, target, introduced),
        AdvisorKind::Generic => true,
    }
}

fn can_apply_pointcut(pointcut: &dyn Pointcut, target: &TargetType, introduced: &[Method]) -> bool {
    if !pointcut.class_filter().matches(target) {
        return false;
    }
    let matcher = pointcut.method_matcher();
    if matcher.is_always_true() {
        return true;
    }
    target
        .methods()
        .iter()
        .chain(introduced)
        .any(|method| matcher.matches(method, target))
}

/// 筛选能作用于该类型的 Advisor，保持候选顺序
///
/// 先确定引入，其余 Advisor 的方法匹配会把引入的接口方法也考虑在内
pub fn find_advisors_that_can_apply(
    candidates: &[Arc<dyn Advisor>],
    target: &TargetType,
) -> Vec<Arc<dyn Advisor>> {
    let mut introduced = Vec::new();
    let mut eligible = vec![false; candidates.len()];
    for (i, candidate) in candidates.iter().enumerate() {
        if let AdvisorKind::Introduction(introduction) = candidate.kind() {
            if introduction.class_filter().matches(target) {
                introduced.extend_from_slice(introduction.introduced_methods());
                eligible[i] = true;
            }
        }
    }
    for (i, candidate) in candidates.iter().enumerate() {
        if matches!(candidate.kind(), AdvisorKind::Introduction(_)) {
            continue;
        }
        eligible[i] = can_apply(candidate.as_ref(), target, &introduced);
    }

    candidates
        .iter()
        .zip(eligible)
        .filter(|(_, eligible)| *eligible)
        .map(|(candidate, _)| Arc::clone(candidate))
        .collect()
}

/// 为一个方法计算拦截器链，顺序与 Advisor 顺序一致
pub fn interceptors_for(
    advisors: &[Arc<dyn Advisor>],
    method: &Method,
    target: &TargetType,
) -> Vec<Arc<dyn MethodInterceptor>> {
    advisors
        .iter()
        .filter(|advisor| match advisor.kind() {
            AdvisorKind::Pointcut(pointcut) => {
                pointcut.class_filter().matches(target) && pointcut.method_matcher().matches(method, target)
            }
            AdvisorKind::Introduction(introduction) => introduction.class_filter().matches(target),
            AdvisorKind::Generic => true,
        })
        .map(|advisor| advisor.advice().interceptor())
        .collect()
}

/// 链中有切面通知时，在最前面加入暴露当前调用的 Advisor
///
/// 只读取 Advisor 元数据，不会为了判断而创建延迟切面的实例
pub fn make_advisor_chain_aspectj_capable_if_necessary(advisors: &mut Vec<Arc<dyn Advisor>>) -> bool {
    if advisors.is_empty() || !advisors.iter().any(|advisor| advisor.is_aspectj()) {
        return false;
    }
    if advisors.iter().any(is_expose_invocation_advisor) {
        return false;
    }
    tracing::trace!("Adding ExposeInvocationInterceptor to advisor chain");
    advisors.insert(0, expose_invocation_advisor());
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advisor::DefaultPointcutAdvisor;
    use crate::interceptor::DebugInterceptor;
    use crate::introduction::DeclareParentsAdvisor;
    use crate::pointcut::{AspectJExpressionPointcut, NameMatchMethodPointcut};
    use crate::target::{Advisable, Value};
    use anyhow::Result;

    struct Lock {
        ty: TargetType,
    }

    impl Advisable for Lock {
        fn target_type(&self) -> &TargetType {
            &self.ty
        }

        fn invoke_method(&self, _method: &Method, _args: &[Value]) -> Result<Value> {
            Ok(crate::target::unit())
        }
    }

    fn lock_delegate() -> Arc<dyn Advisable> {
        Arc::new(Lock {
            ty: TargetType::new("mixin.LockImpl").interface_method("app.Lockable", "lock", Vec::<String>::new(), "()"),
        })
    }

    fn service() -> TargetType {
        TargetType::new("app.UserService").method("find", ["u64"], "User")
    }

    fn named(pattern: &str) -> Arc<dyn Advisor> {
        let pointcut = NameMatchMethodPointcut::new().add_method_name(pattern).unwrap();
        Arc::new(DefaultPointcutAdvisor::new(Arc::new(pointcut), Arc::new(DebugInterceptor::new())))
    }

    #[test]
    fn test_find_advisors_that_can_apply() {
        let candidates = vec![named("find"), named("save*")];
        let eligible = find_advisors_that_can_apply(&candidates, &service());
        assert_eq!(eligible.len(), 1);
        assert!(Arc::ptr_eq(&eligible[0], &candidates[0]));
    }

    #[test]
    fn test_introduced_methods_take_part_in_matching() {
        let introduction: Arc<dyn Advisor> =
            Arc::new(DeclareParentsAdvisor::shared("app.Lockable", "app.*", lock_delegate()).unwrap());
        let candidates = vec![named("lock"), introduction];
        let eligible = find_advisors_that_can_apply(&candidates, &service());
        assert_eq!(eligible.len(), 2);

        let without_introduction = find_advisors_that_can_apply(&candidates[..1], &service());
        assert!(without_introduction.is_empty());
    }

    #[test]
    fn test_interceptors_for_method() {
        let pointcut = AspectJExpressionPointcut::parse("execution(* app.UserService.find(..))").unwrap();
        let advisors: Vec<Arc<dyn Advisor>> = vec![
            Arc::new(DefaultPointcutAdvisor::new(Arc::new(pointcut), Arc::new(DebugInterceptor::new()))),
            Arc::new(DefaultPointcutAdvisor::always(Arc::new(DebugInterceptor::new()))),
        ];
        let ty = service().method("save", ["User"], "()");
        assert_eq!(interceptors_for(&advisors, ty.find_method("find").unwrap(), &ty).len(), 2);
        assert_eq!(interceptors_for(&advisors, ty.find_method("save").unwrap(), &ty).len(), 1);
    }

    #[test]
    fn test_expose_advisor_only_added_for_aspect_chains() {
        let mut plain = vec![named("find")];
        assert!(!make_advisor_chain_aspectj_capable_if_necessary(&mut plain));
        assert_eq!(plain.len(), 1);

        let mut empty: Vec<Arc<dyn Advisor>> = Vec::new();
        assert!(!make_advisor_chain_aspectj_capable_if_necessary(&mut empty));
    }
}
