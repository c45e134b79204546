//! 自动代理
//!
//! Bean 初始化完成后，`AutoProxyCreator` 找出能作用于它的 Advisor，排序后创建代理替换原 Bean。
//! 匹配期间当前线程记录正在代理的 Bean 名称，`bean()` 切点据此判断。

mod retrieval;

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use weaver_core::{BeanRole, ListableBeanFactory};

use crate::advisor::{Advisor, DefaultPointcutAdvisor};
use crate::aop_utils;
use crate::aspect::AspectDefinition;
use crate::error::AopError;
use crate::interceptor::MethodInterceptor;
use crate::pointcut::NamePattern;
use crate::precedence;
use crate::proxy::ProxyFactory;
use crate::target::{Advisable, TargetType};

pub use retrieval::{AdvisorRetrievalHelper, AspectAdvisorsBuilder};

/// 原始实例的 Bean 名称后缀，这类 Bean 不做代理
pub const ORIGINAL_INSTANCE_SUFFIX: &str = ".ORIGINAL";

thread_local! {
    static PROXIED_BEAN_NAME: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// 标记当前线程正在代理的 Bean，离开作用域时恢复之前的值
pub struct ProxiedBeanName {
    previous: Option<String>,
}

impl ProxiedBeanName {
    pub fn enter(bean_name: &str) -> Self {
        let previous = PROXIED_BEAN_NAME.with(|slot| slot.borrow_mut().replace(bean_name.to_string()));
        Self { previous }
    }
}

impl Drop for ProxiedBeanName {
    fn drop(&mut self) {
        let previous = self.previous.take();
        PROXIED_BEAN_NAME.with(|slot| *slot.borrow_mut() = previous);
    }
}

/// 当前线程正在代理的 Bean 名称
pub fn current_proxied_bean_name() -> Option<String> {
    PROXIED_BEAN_NAME.with(|slot| slot.borrow().clone())
}

/// 自动代理的候选来源
#[derive(Debug, Clone)]
pub enum AutoProxyMode {
    /// 容器中全部 Advisor Bean，可以按名称前缀过滤
    Default { advisor_bean_name_prefix: Option<String> },
    /// 只使用角色为 `Infrastructure` 的 Advisor Bean
    Infrastructure,
    /// Advisor Bean 加上切面定义，按切面优先级排序
    AspectJ,
    /// 名称匹配的 Bean 只应用公共拦截器
    BeanName { patterns: Vec<String> },
}

/// 对一个 Bean 的处理结论
pub enum AdvicePlan {
    /// 不创建代理
    DoNotProxy,
    /// 创建代理，只应用公共拦截器
    ProxyWithoutAdditionalInterceptors,
    /// 创建代理，应用这些已排序的 Advisor
    Advisors(Vec<Arc<dyn Advisor>>),
}

impl AdvicePlan {
    pub fn is_proxy(&self) -> bool {
        !matches!(self, AdvicePlan::DoNotProxy)
    }
}

/// 自动代理创建器
pub struct AutoProxyCreator {
    mode: AutoProxyMode,
    bean_factory: Weak<dyn ListableBeanFactory>,
    retrieval: AdvisorRetrievalHelper,
    aspects: AspectAdvisorsBuilder,
    bean_name_patterns: Vec<NamePattern>,
    common_interceptors: Vec<Arc<dyn MethodInterceptor>>,
    apply_common_interceptors_first: bool,
    proxy_target_class: bool,
    /// Bean 名称 -> 是否已代理
    advised_beans: RwLock<HashMap<String, bool>>,
}

impl AutoProxyCreator {
    pub fn new<F>(mode: AutoProxyMode, bean_factory: &Arc<F>) -> Result<Self, AopError>
    where
        F: ListableBeanFactory + 'static,
    {
        let weak: Weak<F> = Arc::downgrade(bean_factory);
        Self::with_weak_factory(mode, weak)
    }

    pub fn with_weak_factory(mode: AutoProxyMode, bean_factory: Weak<dyn ListableBeanFactory>) -> Result<Self, AopError> {
        let bean_name_patterns = match &mode {
            AutoProxyMode::BeanName { patterns } => patterns
                .iter()
                .map(|p| NamePattern::parse(p))
                .collect::<Result<Vec<_>, _>>()?,
            _ => Vec::new(),
        };
        tracing::debug!("Creating auto-proxy creator in {:?} mode", mode);
        Ok(Self {
            retrieval: AdvisorRetrievalHelper::new(Weak::clone(&bean_factory)),
            aspects: AspectAdvisorsBuilder::new(Weak::clone(&bean_factory)),
            mode,
            bean_factory,
            bean_name_patterns,
            common_interceptors: Vec::new(),
            apply_common_interceptors_first: true,
            proxy_target_class: true,
            advised_beans: RwLock::new(HashMap::new()),
        })
    }

    pub fn with_proxy_target_class(mut self, proxy_target_class: bool) -> Self {
        self.proxy_target_class = proxy_target_class;
        self
    }

    /// 公共拦截器作用于每个代理，`first` 决定放在特定 Advisor 之前还是之后
    pub fn with_common_interceptors(mut self, interceptors: Vec<Arc<dyn MethodInterceptor>>, first: bool) -> Self {
        self.common_interceptors = interceptors;
        self.apply_common_interceptors_first = first;
        self
    }

    /// 追加切面定义（仅 AspectJ 模式使用）
    pub fn with_aspect(mut self, definition: Arc<AspectDefinition>) -> Self {
        self.aspects.add_definition(definition);
        self
    }

    pub fn with_aspects(mut self, definitions: impl IntoIterator<Item = Arc<AspectDefinition>>) -> Self {
        for definition in definitions {
            self.aspects.add_definition(definition);
        }
        self
    }

    pub fn with_include_patterns(mut self, patterns: &[String]) -> Result<Self, AopError> {
        self.aspects.set_include_patterns(patterns)?;
        Ok(self)
    }

    pub fn mode(&self) -> &AutoProxyMode {
        &self.mode
    }

    /// 已经处理过的 Bean 中创建了代理的数量
    pub fn proxied_bean_count(&self) -> usize {
        self.advised_beans.read().values().filter(|proxied| **proxied).count()
    }

    /// 丢弃 Advisor Bean 名称缓存
    pub fn invalidate_advisor_cache(&self) {
        self.retrieval.invalidate();
    }

    /// 必要时为 Bean 创建代理，不需要代理时原样返回
    pub fn wrap_if_necessary(&self, bean: Arc<dyn Advisable>, bean_name: &str) -> Result<Arc<dyn Advisable>, AopError> {
        if self.advised_beans.read().get(bean_name) == Some(&false) {
            return Ok(bean);
        }
        if self.should_skip(bean_name)? {
            tracing::trace!("Skipping auto-proxy for bean '{}'", bean_name);
            self.advised_beans.write().insert(bean_name.to_string(), false);
            return Ok(bean);
        }

        let plan = self.advice_plan(bean.target_type(), bean_name)?;
        let advisors = match plan {
            AdvicePlan::DoNotProxy => {
                self.advised_beans.write().insert(bean_name.to_string(), false);
                return Ok(bean);
            }
            AdvicePlan::ProxyWithoutAdditionalInterceptors => Vec::new(),
            AdvicePlan::Advisors(advisors) => advisors,
        };
        self.advised_beans.write().insert(bean_name.to_string(), true);
        let proxy = self.create_proxy(bean, bean_name, advisors)?;
        Ok(proxy)
    }

    /// 切面 Bean 自身以及原始实例不做代理
    fn should_skip(&self, bean_name: &str) -> Result<bool, AopError> {
        if bean_name.ends_with(ORIGINAL_INSTANCE_SUFFIX) {
            return Ok(true);
        }
        if let AutoProxyMode::AspectJ = self.mode {
            return Ok(self.aspects.aspect_bean_names()?.iter().any(|name| name == bean_name));
        }
        Ok(false)
    }

    /// 计算 Bean 的处理结论
    pub fn advice_plan(&self, target_type: &TargetType, bean_name: &str) -> Result<AdvicePlan, AopError> {
        if let AutoProxyMode::BeanName { .. } = self.mode {
            let matched = self.bean_name_patterns.iter().any(|p| p.matches(bean_name));
            return Ok(if matched {
                AdvicePlan::ProxyWithoutAdditionalInterceptors
            } else {
                AdvicePlan::DoNotProxy
            });
        }

        let advisors = self.find_eligible_advisors(target_type, bean_name)?;
        if advisors.is_empty() {
            return Ok(AdvicePlan::DoNotProxy);
        }
        Ok(AdvicePlan::Advisors(advisors))
    }

    fn find_eligible_advisors(&self, target_type: &TargetType, bean_name: &str) -> Result<Vec<Arc<dyn Advisor>>, AopError> {
        let candidates = self.find_candidate_advisors()?;
        let mut eligible = {
            let _proxied = ProxiedBeanName::enter(bean_name);
            aop_utils::find_advisors_that_can_apply(&candidates, target_type)
        };
        tracing::debug!(
            "{} of {} candidate advisor(s) apply to bean '{}'",
            eligible.len(),
            candidates.len(),
            bean_name
        );

        if let AutoProxyMode::AspectJ = self.mode {
            aop_utils::make_advisor_chain_aspectj_capable_if_necessary(&mut eligible);
        }
        if eligible.is_empty() {
            return Ok(eligible);
        }
        Ok(match self.mode {
            AutoProxyMode::AspectJ => precedence::sort_advisors(eligible),
            _ => {
                precedence::sort_by_order(&mut eligible);
                eligible
            }
        })
    }

    fn find_candidate_advisors(&self) -> Result<Vec<Arc<dyn Advisor>>, AopError> {
        let bean_factory = self.bean_factory.upgrade().ok_or(AopError::BeanFactoryUnavailable)?;
        let mut candidates = match &self.mode {
            AutoProxyMode::Default {
                advisor_bean_name_prefix,
            } => self.retrieval.find_advisor_beans(|name| {
                advisor_bean_name_prefix
                    .as_deref()
                    .map_or(true, |prefix| name.starts_with(prefix))
            })?,
            AutoProxyMode::Infrastructure => self
                .retrieval
                .find_advisor_beans(|name| bean_factory.get_bean_role(name) == Some(BeanRole::Infrastructure))?,
            AutoProxyMode::AspectJ => self.retrieval.find_advisor_beans(|_| true)?,
            AutoProxyMode::BeanName { .. } => Vec::new(),
        };
        if let AutoProxyMode::AspectJ = self.mode {
            candidates.extend(self.aspects.build_aspect_advisors()?);
        }
        Ok(candidates)
    }

    fn build_advisors(&self, specific: Vec<Arc<dyn Advisor>>) -> Vec<Arc<dyn Advisor>> {
        let common = self
            .common_interceptors
            .iter()
            .map(|interceptor| Arc::new(DefaultPointcutAdvisor::always(Arc::clone(interceptor))) as Arc<dyn Advisor>);
        if self.apply_common_interceptors_first {
            common.chain(specific).collect()
        } else {
            specific.into_iter().chain(common).collect()
        }
    }

    fn create_proxy(
        &self,
        bean: Arc<dyn Advisable>,
        bean_name: &str,
        specific: Vec<Arc<dyn Advisor>>,
    ) -> Result<Arc<dyn Advisable>, AopError> {
        let advisors = self.build_advisors(specific);
        tracing::info!(
            "Creating AOP proxy for bean '{}' of type [{}] with {} advisor(s)",
            bean_name,
            bean.target_type().name(),
            advisors.len()
        );
        let mut factory = ProxyFactory::new(bean);
        factory
            .proxy_target_class(self.proxy_target_class)
            .bean_name(bean_name)
            .add_advisors(advisors);
        let proxy: Arc<dyn Advisable> = factory.get_proxy()?;
        Ok(proxy)
    }
}
