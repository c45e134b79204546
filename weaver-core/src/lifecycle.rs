//! BeanPostProcessor - Bean 工厂扩展机制
//!
//! 在 Bean 初始化前后提供钩子，AOP 自动代理就是通过这里把目标替换为代理

use crate::bean::BeanInstance;
use crate::error::ContainerResult;

/// BeanPostProcessor trait
///
/// 返回值可以是原始 Bean，也可以是包装后的 Bean（例如 AOP 代理）
pub trait BeanPostProcessor: Send + Sync {
    /// 在 Bean 实例化之后、对外暴露之前调用
    fn post_process_before_initialization(
        &self,
        bean: BeanInstance,
        _bean_name: &str,
    ) -> ContainerResult<BeanInstance> {
        Ok(bean)
    }

    /// 在 Bean 初始化完成后调用
    ///
    /// # 典型用途
    /// - 创建 AOP 代理
    /// - 包装 Bean
    fn post_process_after_initialization(
        &self,
        bean: BeanInstance,
        _bean_name: &str,
    ) -> ContainerResult<BeanInstance> {
        Ok(bean)
    }

    /// 处理器名称（用于日志和错误信息）
    fn name(&self) -> &str {
        "BeanPostProcessor"
    }

    /// 处理器优先级（数字越小越先执行），默认 1000
    fn order(&self) -> i32 {
        1000
    }
}
