use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use weaver_aop::prelude::*;
use weaver_aop::{AspectMetadata, PerformanceMonitorInterceptor};
use weaver_core::prelude::*;
use weaver_core::TomlPropertySource;

// ==================== 业务服务 ====================

/// 用户仓库 - 通过接口代理暴露 `demo.UserRepository`
struct UserService {
    ty: TargetType,
    users: Mutex<Vec<String>>,
}

impl UserService {
    fn new() -> Arc<dyn Advisable> {
        Arc::new(Self {
            ty: TargetType::new("demo.UserService")
                .interface_method("demo.UserRepository", "find_user", ["u64"], "String")
                .interface_method("demo.UserRepository", "save_user", ["String"], "u64")
                .method("rebuild_index", Vec::<String>::new(), "()"),
            users: Mutex::new(vec!["alice".to_string()]),
        })
    }
}

impl Advisable for UserService {
    fn target_type(&self) -> &TargetType {
        &self.ty
    }

    fn invoke_method(&self, method: &Method, args: &[Value]) -> Result<Value> {
        match method.name() {
            "find_user" => {
                let id: u64 = arg(args, 0)?;
                let users = self.users.lock();
                let user = users
                    .get(id as usize)
                    .cloned()
                    .ok_or_else(|| anyhow!("user {} not found", id))?;
                Ok(value(user))
            }
            "save_user" => {
                let name: String = arg(args, 0)?;
                let mut users = self.users.lock();
                users.push(name);
                Ok(value((users.len() - 1) as u64))
            }
            "rebuild_index" => Ok(unit()),
            other => Err(anyhow!("unknown method {}", other)),
        }
    }
}

// ==================== 引入的接口 ====================

/// `demo.Auditable` 的默认实现，每个目标一份
struct AuditLog {
    ty: TargetType,
    entries: AtomicUsize,
}

impl AuditLog {
    fn target_type() -> TargetType {
        TargetType::new("demo.AuditLog")
            .interface_method("demo.Auditable", "audit_count", Vec::<String>::new(), "usize")
            .interface_method("demo.Auditable", "record", Vec::<String>::new(), "()")
    }
}

impl Advisable for AuditLog {
    fn target_type(&self) -> &TargetType {
        &self.ty
    }

    fn invoke_method(&self, method: &Method, _args: &[Value]) -> Result<Value> {
        match method.name() {
            "audit_count" => Ok(value(self.entries.load(Ordering::SeqCst))),
            "record" => {
                self.entries.fetch_add(1, Ordering::SeqCst);
                Ok(unit())
            }
            other => Err(anyhow!("unknown method {}", other)),
        }
    }
}

// ==================== 切面 ====================

/// 日志切面 - 记录调用与返回
#[derive(Default, AspectMetadata)]
#[aspect(name = "loggingAspect", order = 1, register)]
struct LoggingAspect;

impl Aspect for LoggingAspect {
    fn declare_advice(advice: &mut AdviceDeclarations<Self>) {
        advice
            .before("execution(* demo.UserRepository.*(..))", |_aspect, jp| {
                tracing::info!("→ {} args={}", jp.signature(), jp.args().len());
                Ok(())
            })
            .after_returning_typed::<String, _>("execution(String demo.UserRepository.*(..))", |_aspect, jp, user| {
                tracing::info!("← {} returned '{}'", jp.method_name(), user);
                Ok(())
            })
            .after_throwing("execution(* demo..*.*(..))", |_aspect, jp, error| {
                tracing::warn!("✗ {} failed: {}", jp.method_name(), error);
                Ok(())
            });
    }
}

/// 计时切面
#[derive(Default, AspectMetadata)]
#[aspect(name = "timingAspect", order = 5, register)]
struct TimingAspect;

impl Aspect for TimingAspect {
    fn declare_advice(advice: &mut AdviceDeclarations<Self>) {
        advice.around("execution(* demo.UserRepository.save*(..))", |_aspect, pjp| {
            let result = pjp.proceed();
            tracing::info!("⏱ {} took {:?}", pjp.join_point().method_name(), pjp.join_point().elapsed());
            result
        });
    }
}

/// 审计切面 - 为所有 demo 服务引入 `demo.Auditable`
#[derive(Default, AspectMetadata)]
#[aspect(name = "auditingAspect", register)]
struct AuditingAspect;

impl Aspect for AuditingAspect {
    fn declare_advice(advice: &mut AdviceDeclarations<Self>) {
        advice.declare_parents("demo.Auditable", "demo.*Service", AuditLog::target_type(), || {
            Arc::new(AuditLog {
                ty: AuditLog::target_type(),
                entries: AtomicUsize::new(0),
            }) as Arc<dyn Advisable>
        });
    }
}

fn main() -> Result<()> {
    let env = Environment::new().with_property_source(Box::new(TomlPropertySource::parse(
        include_str!("../config/application.toml"),
        "application.toml",
    )?));
    LoggingConfig::from_environment(&env).init()?;

    let factory = Arc::new(DefaultListableBeanFactory::new());
    factory.register_bean_definition(BeanDefinition::new("userService", |_| Ok(UserService::new())))?;

    AopPlugin::from_environment(&env)
        .with_common_interceptor(Arc::new(PerformanceMonitorInterceptor::new(Duration::from_millis(50))))
        .install(&factory)?;
    factory.preinstantiate_singletons()?;
    factory.freeze_configuration();

    let users = factory.get_bean_of::<Arc<dyn Advisable>>("userService")?;
    let users: Arc<dyn Advisable> = Arc::clone(&*users);
    tracing::info!("userService is proxied as [{}]", users.target_type().name());

    let id = invoke!(users => u64, "save_user", "bob".to_string())?;
    let name = invoke!(users => String, "find_user", id)?;
    tracing::info!("saved and loaded user #{}: {}", id, name);

    if let Err(e) = invoke!(users, "find_user", 42u64) {
        tracing::info!("lookup failed as expected: {}", e);
    }

    // 接口代理不暴露目标自身的方法
    if let Err(e) = invoke!(users, "rebuild_index") {
        tracing::info!("{}", e);
    }

    invoke!(users, "record")?;
    let audits = invoke!(users => usize, "audit_count")?;
    tracing::info!("introduced demo.Auditable, {} audit record(s)", audits);

    Ok(())
}
