/// Bean 的作用域
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scope {
    /// 单例：首次获取时创建并缓存
    #[default]
    Singleton,

    /// 原型：每次获取都重新创建
    Prototype,
}

/// Bean 的角色，对应 Spring 的 ROLE_APPLICATION / ROLE_SUPPORT / ROLE_INFRASTRUCTURE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BeanRole {
    /// 应用自身定义的 Bean
    #[default]
    Application,

    /// 较大配置中的辅助部分
    Support,

    /// 框架内部基础设施，与最终用户无关
    Infrastructure,
}
